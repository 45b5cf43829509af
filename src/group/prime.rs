//! Primality testing, prime search and factorisation of arbitrary precision integers.

use std::collections::BTreeSet;

use num_bigint::BigUint;
use num_integer::Integer;
use num_traits::{One, Zero};
use rand::{CryptoRng, Rng};

const SMALL_PRIMES: [u32; 25] = [
    2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37, 41, 43, 47, 53, 59, 61, 67, 71, 73, 79, 83, 89, 97,
];

/// Number of fixed Miller-Rabin bases; together they are deterministic below 3.3 * 10^24.
const FIXED_BASES: usize = 13;

/// Additional Miller-Rabin rounds with random bases.
const RANDOM_ROUNDS: usize = 16;

/// Batch size of the gcd accumulation in Brent's cycle detection.
const RHO_BATCH: u64 = 128;

/// Draws a uniformly random integer in `[0, bound)` by rejection sampling.
///
/// `bound` must be non-zero.
pub(crate) fn random_below<R: CryptoRng + Rng>(rng: &mut R, bound: &BigUint) -> BigUint {
    debug_assert!(!bound.is_zero(), "cannot sample below zero");
    let bits = bound.bits();
    let len = bits.div_ceil(8) as usize;
    let excess = len as u64 * 8 - bits;
    let mut buf = vec![0u8; len];
    loop {
        rng.fill_bytes(&mut buf);
        buf[0] &= 0xff >> excess;
        let candidate = BigUint::from_bytes_be(&buf);
        if &candidate < bound {
            return candidate;
        }
    }
}

/// Draws a uniformly random integer with exactly `bits` bits (the top bit is always set).
pub(crate) fn random_with_bits<R: CryptoRng + Rng>(rng: &mut R, bits: u64) -> BigUint {
    let top = BigUint::one() << (bits - 1);
    random_below(rng, &top) | top
}

/// Miller-Rabin probable prime test.
///
/// Uses the first primes as fixed bases followed by a number of random bases drawn from `rng`.
pub fn is_probable_prime<R: CryptoRng + Rng>(n: &BigUint, rng: &mut R) -> bool {
    if n < &BigUint::from(2u32) {
        return false;
    }
    for p in SMALL_PRIMES {
        if n == &BigUint::from(p) {
            return true;
        }
        if (n % p).is_zero() {
            return false;
        }
    }

    let n_minus_1 = n - 1u32;
    let s = n_minus_1.trailing_zeros().unwrap_or(0);
    let d = &n_minus_1 >> s;
    let proves_composite = |a: &BigUint| {
        let mut x = a.modpow(&d, n);
        if x.is_one() || x == n_minus_1 {
            return false;
        }
        for _ in 1..s {
            x = &x * &x % n;
            if x == n_minus_1 {
                return false;
            }
        }
        true
    };

    for a in SMALL_PRIMES[..FIXED_BASES].iter().map(|&p| BigUint::from(p)) {
        if proves_composite(&a) {
            return false;
        }
    }
    // n > 97 here, so [2, n - 2] is never empty
    let span = n - 3u32;
    for _ in 0..RANDOM_ROUNDS {
        let a = random_below(rng, &span) + 2u32;
        if proves_composite(&a) {
            return false;
        }
    }
    true
}

/// Returns the smallest odd prime `>= n`, i.e. 2 is never returned.
pub fn next_prime<R: CryptoRng + Rng>(n: &BigUint, rng: &mut R) -> BigUint {
    let three = BigUint::from(3u32);
    if n <= &three {
        return three;
    }
    let mut candidate = if n.is_even() { n + 1u32 } else { n.clone() };
    while !is_probable_prime(&candidate, rng) {
        candidate += 2u32;
    }
    candidate
}

/// Returns the distinct prime factors of `n` in ascending order.
///
/// Small factors are removed by trial division, the remaining cofactor is split with Pollard's
/// rho until every part is a probable prime.
pub fn prime_factors<R: CryptoRng + Rng>(n: &BigUint, rng: &mut R) -> Vec<BigUint> {
    let mut factors = BTreeSet::new();
    let mut rest = n.clone();
    if rest.is_zero() {
        return vec![];
    }
    for p in SMALL_PRIMES {
        if (&rest % p).is_zero() {
            factors.insert(BigUint::from(p));
            while (&rest % p).is_zero() {
                rest /= p;
            }
        }
    }

    let mut pending = vec![rest];
    while let Some(m) = pending.pop() {
        if m.is_one() {
            continue;
        }
        if is_probable_prime(&m, rng) {
            factors.insert(m);
            continue;
        }
        let d = pollard_brent(&m, rng);
        pending.push(&m / &d);
        pending.push(d);
    }
    factors.into_iter().collect()
}

fn abs_diff(a: &BigUint, b: &BigUint) -> BigUint {
    if a > b { a - b } else { b - a }
}

/// Finds a non-trivial divisor of the odd composite `n` (Brent's variant of Pollard's rho).
fn pollard_brent<R: CryptoRng + Rng>(n: &BigUint, rng: &mut R) -> BigUint {
    loop {
        let c = random_below(rng, &(n - 1u32)) + 1u32;
        let f = |v: &BigUint| (v * v + &c) % n;

        let mut y = random_below(rng, n);
        let mut x = y.clone();
        let mut ys = y.clone();
        let mut q = BigUint::one();
        let mut g = BigUint::one();
        let mut r = 1u64;
        while g.is_one() {
            x = y.clone();
            for _ in 0..r {
                y = f(&y);
            }
            let mut k = 0;
            while k < r && g.is_one() {
                ys = y.clone();
                for _ in 0..RHO_BATCH.min(r - k) {
                    y = f(&y);
                    q = q * abs_diff(&x, &y) % n;
                }
                g = q.gcd(n);
                k += RHO_BATCH;
            }
            r *= 2;
        }
        if &g == n {
            // the batch overshot, retrace one step at a time
            loop {
                ys = f(&ys);
                g = abs_diff(&x, &ys).gcd(n);
                if !g.is_one() {
                    break;
                }
            }
        }
        if &g != n {
            return g;
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    use super::*;

    fn big(n: u128) -> BigUint {
        BigUint::from(n)
    }

    #[test]
    fn primality_of_known_numbers() {
        let mut rng = ChaCha20Rng::seed_from_u64(1);
        for p in [2u128, 3, 5, 97, 101, 7919, 2_147_483_647, (1 << 61) - 1, (1 << 89) - 1] {
            assert!(is_probable_prime(&big(p), &mut rng), "{p} is prime");
        }
        // 561 and 41041 are Carmichael numbers, 3215031751 is a strong pseudoprime to 2, 3, 5, 7
        for c in [0u128, 1, 4, 9, 561, 41041, 3_215_031_751, (1 << 61) + 1] {
            assert!(!is_probable_prime(&big(c), &mut rng), "{c} is composite");
        }
    }

    #[test]
    fn next_prime_skips_two_and_includes_start() {
        let mut rng = ChaCha20Rng::seed_from_u64(2);
        assert_eq!(next_prime(&big(0), &mut rng), big(3));
        assert_eq!(next_prime(&big(2), &mut rng), big(3));
        assert_eq!(next_prime(&big(14), &mut rng), big(17));
        assert_eq!(next_prime(&big(17), &mut rng), big(17));
        assert_eq!(next_prime(&big(7908), &mut rng), big(7919));
    }

    #[test]
    fn factors_with_small_and_large_primes() {
        let mut rng = ChaCha20Rng::seed_from_u64(3);
        let n = big(8 * 3 * 1_000_003 * 1_000_033);
        assert_eq!(
            prime_factors(&n, &mut rng),
            vec![big(2), big(3), big(1_000_003), big(1_000_033)]
        );
        // product of the two largest 32 bit primes
        let n = big(4_294_967_279) * big(4_294_967_291);
        assert_eq!(
            prime_factors(&n, &mut rng),
            vec![big(4_294_967_279), big(4_294_967_291)]
        );
        assert_eq!(prime_factors(&big(1_000_003 * 1_000_003), &mut rng), vec![big(1_000_003)]);
        assert!(prime_factors(&big(1), &mut rng).is_empty());
    }

    #[test]
    fn random_values_respect_bounds() {
        let mut rng = ChaCha20Rng::seed_from_u64(4);
        let bound = big(1000);
        for _ in 0..500 {
            assert!(random_below(&mut rng, &bound) < bound);
            assert_eq!(random_with_bits(&mut rng, 20).bits(), 20);
        }
    }
}
