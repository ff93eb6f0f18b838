use criterion::{criterion_group, criterion_main, Criterion};
use dlrs_protocol::zk::{commit, prove_capability, Challenge};
use dlrs_protocol::{factorize, CryptoParams, FactorTarget, LowRankFactorSet, Method, ZkContext};
use nalgebra::DMatrix;

fn bench_factorization(c: &mut Criterion) {
    let k = DMatrix::new_random(100, 80);

    c.bench_function("factorize_100x80_rank8", |b| {
        b.iter(|| factorize(&k, FactorTarget::Rank(8), &Method::Exact))
    });

    let randomized = Method::Randomized {
        oversample: 5,
        power_iterations: 2,
        seed: 7,
    };
    c.bench_function("factorize_randomized_100x80_rank8", |b| {
        b.iter(|| factorize(&k, FactorTarget::Rank(8), &randomized))
    });

    let factors = LowRankFactorSet::from_matrix(&k, 8).unwrap();
    c.bench_function("reconstruct_100x80_rank8", |b| {
        b.iter(|| factors.reconstruct())
    });
}

fn bench_commitment(c: &mut Criterion) {
    let ctx = ZkContext::new(CryptoParams::default()).unwrap();
    let factors = LowRankFactorSet::from_matrix(&DMatrix::new_random(32, 24), 4).unwrap();
    c.bench_function("commit_32x24_rank4", |b| {
        b.iter(|| commit(&ctx, &factors, &mut rand::thread_rng()))
    });
}

fn bench_capability(c: &mut Criterion) {
    let ctx = ZkContext::new(CryptoParams::default()).unwrap();
    let factors = LowRankFactorSet::from_matrix(&DMatrix::new_random(16, 12), 3).unwrap();
    let (commitment, secret) = commit(&ctx, &factors, &mut rand::thread_rng()).unwrap();
    let challenge = Challenge::for_domain("bench", 12);
    c.bench_function("prove_capability_16x12_rank3", |b| {
        b.iter(|| prove_capability(&ctx, &commitment, &secret, &challenge, 0.0, &mut rand::thread_rng()))
    });
}

criterion_group!(benches, bench_factorization, bench_commitment, bench_capability);
criterion_main!(benches);
