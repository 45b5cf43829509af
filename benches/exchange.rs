use criterion::{BenchmarkId, Criterion};
use yao_max::{
    circuit::Circuit,
    data::PrivateData,
    protocol::{EvaluatorOpts, GarblerOpts, simulate_exchange},
};

/// Benchmark a complete exchange, including garbling, key transfer and verification.
pub fn exchange_benchmark(c: &mut Criterion) {
    let mut g = c.benchmark_group("exchange");
    for bit_width in [4, 16, 32] {
        let circuits = [Circuit::maximum(bit_width).unwrap()];
        let opts = GarblerOpts {
            bit_width,
            ..GarblerOpts::default()
        };
        let garbler = PrivateData::new(vec![3, 1 << (bit_width - 1)]);
        let evaluator = PrivateData::new(vec![5, 7]);
        g.bench_function(BenchmarkId::new("maximum", bit_width), |b| {
            b.iter(|| {
                simulate_exchange(
                    &circuits,
                    garbler.clone(),
                    evaluator.clone(),
                    opts,
                    EvaluatorOpts::default(),
                )
                .unwrap()
            })
        });
    }
}
