//! The multiplicative group of integers modulo a random prime, used as the discrete-log base of
//! the oblivious transfer.
//!
//! A [`Group`] is plain value data: the prime modulus and a primitive root. All randomness is
//! drawn from the caller's cryptographically secure RNG, including the generator search.

use num_bigint::BigUint;
use num_traits::{One, Zero};
use rand::{CryptoRng, Rng};
use serde::{Deserialize, Serialize};
use tracing::debug;

mod prime;

pub use prime::{is_probable_prime, next_prime, prime_factors};

use prime::random_below;

/// Size of the prime modulus unless configured otherwise.
pub const DEFAULT_PRIME_BITS: u64 = 64;

/// Size of the largest prime accepted from the other party unless configured otherwise. Checking
/// a group factors `p - 1`, which gets infeasible for large primes.
pub const DEFAULT_MAX_PRIME_BITS: u64 = 128;

/// Errors raised when constructing a [`Group`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// A prime needs at least 2 bits.
    #[error("a group needs a prime of at least 2 bits, got {0}")]
    TooFewBits(u64),
    /// The modulus is even or composite.
    #[error("group modulus is not an odd prime")]
    NotPrime,
    /// The generator does not generate the whole group.
    #[error("group generator is not a primitive root of the modulus")]
    NotPrimitiveRoot,
}

/// A cyclic group `Z_p^*` together with a generator of order `p - 1`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    prime: BigUint,
    generator: BigUint,
}

impl Group {
    /// Generates a fresh group whose prime has (at least) `bits` bits.
    ///
    /// A random `bits`-bit candidate is advanced to the next odd prime, `p - 1` is factored and
    /// random candidates are tested until a primitive root is found.
    pub fn generate<R: CryptoRng + Rng>(bits: u64, rng: &mut R) -> Result<Self, Error> {
        if bits < 2 {
            return Err(Error::TooFewBits(bits));
        }
        let candidate = prime::random_with_bits(rng, bits);
        let prime = next_prime(&candidate, rng);
        let factors = prime_factors(&(&prime - 1u32), rng);
        let mut group = Self {
            prime,
            generator: BigUint::one(),
        };
        loop {
            let candidate = group.random_exponent(rng);
            if group.is_primitive_root(&candidate, &factors) {
                group.generator = candidate;
                break;
            }
        }
        debug!(bits = group.prime.bits(), "generated prime group");
        Ok(group)
    }

    /// Checks and assembles group parameters received from the other party.
    pub fn from_parts<R: CryptoRng + Rng>(
        prime: BigUint,
        generator: BigUint,
        rng: &mut R,
    ) -> Result<Self, Error> {
        let group = Self { prime, generator };
        group.validate(rng)?;
        Ok(group)
    }

    /// Checks that the modulus is an odd prime and the generator a primitive root.
    ///
    /// This factors `p - 1`, so it is as expensive as the generator search in [`Group::generate`].
    pub fn validate<R: CryptoRng + Rng>(&self, rng: &mut R) -> Result<(), Error> {
        if self.prime < BigUint::from(3u32) || !is_probable_prime(&self.prime, rng) {
            return Err(Error::NotPrime);
        }
        if !self.contains(&self.generator) {
            return Err(Error::NotPrimitiveRoot);
        }
        let factors = prime_factors(&(&self.prime - 1u32), rng);
        if !self.is_primitive_root(&self.generator, &factors) {
            return Err(Error::NotPrimitiveRoot);
        }
        Ok(())
    }

    /// The prime modulus.
    pub fn prime(&self) -> &BigUint {
        &self.prime
    }

    /// The generator of the group.
    pub fn generator(&self) -> &BigUint {
        &self.generator
    }

    /// Returns `true` if `x` is an element of the group, i.e. in `[1, p - 1]`.
    pub fn contains(&self, x: &BigUint) -> bool {
        !x.is_zero() && x < &self.prime
    }

    /// `a * b mod p`
    pub fn multiply(&self, a: &BigUint, b: &BigUint) -> BigUint {
        a * b % &self.prime
    }

    /// `base ^ exponent mod p`
    pub fn power(&self, base: &BigUint, exponent: &BigUint) -> BigUint {
        base.modpow(exponent, &self.prime)
    }

    /// `g ^ exponent mod p`
    pub fn generator_power(&self, exponent: &BigUint) -> BigUint {
        self.power(&self.generator, exponent)
    }

    /// The multiplicative inverse `a ^ (p - 2) mod p` (Fermat), valid for any non-zero `a`.
    pub fn inverse(&self, a: &BigUint) -> BigUint {
        self.power(a, &(&self.prime - 2u32))
    }

    /// A uniformly random exponent in `[1, p - 1]`.
    pub fn random_exponent<R: CryptoRng + Rng>(&self, rng: &mut R) -> BigUint {
        random_below(rng, &(&self.prime - 1u32)) + 1u32
    }

    fn is_primitive_root(&self, candidate: &BigUint, factors: &[BigUint]) -> bool {
        let order = &self.prime - 1u32;
        factors
            .iter()
            .all(|f| !self.power(candidate, &(&order / f)).is_one())
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    use super::*;

    #[test]
    fn group_law_holds() -> Result<(), Error> {
        let mut rng = ChaCha20Rng::seed_from_u64(42);
        let group = Group::generate(48, &mut rng)?;
        let order = group.prime() - 1u32;
        let g = group.generator().clone();
        for _ in 0..64 {
            let a = group.random_exponent(&mut rng);
            let b = group.random_exponent(&mut rng);
            let ga = group.power(&g, &a);
            let gb = group.power(&g, &b);
            assert_eq!(
                group.multiply(&ga, &gb),
                group.power(&g, &((&a + &b) % &order))
            );
            assert!(group.multiply(&group.inverse(&ga), &ga).is_one());
            assert_eq!(ga, group.generator_power(&a));
        }
        Ok(())
    }

    #[test]
    fn generated_groups_are_valid() -> Result<(), Error> {
        let mut rng = ChaCha20Rng::seed_from_u64(7);
        for bits in [2, 3, 8, 16, 32, 64] {
            let group = Group::generate(bits, &mut rng)?;
            assert!(group.prime().bits() >= bits);
            assert!(is_probable_prime(group.prime(), &mut rng));
            let checked =
                Group::from_parts(group.prime().clone(), group.generator().clone(), &mut rng)?;
            assert_eq!(checked, group);
        }
        assert_eq!(Group::generate(1, &mut rng), Err(Error::TooFewBits(1)));
        Ok(())
    }

    #[test]
    fn tiny_group_has_three_elements() -> Result<(), Error> {
        let mut rng = ChaCha20Rng::seed_from_u64(9);
        let group = Group::generate(2, &mut rng)?;
        assert_eq!(group.prime(), &BigUint::from(3u32));
        assert_eq!(group.generator(), &BigUint::from(2u32));
        Ok(())
    }

    #[test]
    fn rejects_bad_parameters() {
        let mut rng = ChaCha20Rng::seed_from_u64(5);
        let p = BigUint::from(23u32);
        assert!(Group::from_parts(p.clone(), BigUint::from(5u32), &mut rng).is_ok());
        // 2 has order 11 modulo 23
        assert_eq!(
            Group::from_parts(p.clone(), BigUint::from(2u32), &mut rng),
            Err(Error::NotPrimitiveRoot)
        );
        assert_eq!(
            Group::from_parts(p.clone(), BigUint::from(0u32), &mut rng),
            Err(Error::NotPrimitiveRoot)
        );
        assert_eq!(
            Group::from_parts(p, BigUint::from(23u32), &mut rng),
            Err(Error::NotPrimitiveRoot)
        );
        assert_eq!(
            Group::from_parts(BigUint::from(21u32), BigUint::from(2u32), &mut rng),
            Err(Error::NotPrime)
        );
        assert_eq!(
            Group::from_parts(BigUint::from(2u32), BigUint::from(1u32), &mut rng),
            Err(Error::NotPrime)
        );
    }

    #[test]
    fn random_exponents_stay_in_range() -> Result<(), Error> {
        let mut rng = ChaCha20Rng::seed_from_u64(11);
        let group = Group::generate(5, &mut rng)?;
        for _ in 0..1000 {
            let x = group.random_exponent(&mut rng);
            assert!(group.contains(&x));
        }
        Ok(())
    }
}
