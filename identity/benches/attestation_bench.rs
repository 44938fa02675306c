// Attestation benchmarks for the echo identity vault.
//
// Covers Merkle commitment and proof verification at several claim-set
// sizes, and proof-chain append and full replay.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde_json::json;

use echo_identity::attestation::{ClaimTree, Claims, ProofPipeline};

fn claim_set(size: usize) -> Claims {
    (0..size)
        .map(|i| (format!("claim-{i:04}"), json!({ "value": i, "issuer": "did:echo:bench" })))
        .collect()
}

fn bench_merkle_commit(c: &mut Criterion) {
    let mut group = c.benchmark_group("merkle/commit");

    for size in [8, 64, 512] {
        let claims = claim_set(size);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &claims, |b, claims| {
            b.iter(|| ClaimTree::commit(claims.clone()).unwrap());
        });
    }

    group.finish();
}

fn bench_merkle_verify(c: &mut Criterion) {
    let mut group = c.benchmark_group("merkle/verify_one");

    for size in [8, 64, 512] {
        let tree = ClaimTree::commit(claim_set(size)).unwrap();
        let proof = tree.prove(["claim-0003"]).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(size), &proof, |b, proof| {
            b.iter(|| assert!(proof.verify()));
        });
    }

    group.finish();
}

fn bench_proof_chain(c: &mut Criterion) {
    c.bench_function("proof_chain/append", |b| {
        let mut pipeline = ProofPipeline::new("echo.bench");
        b.iter(|| {
            pipeline
                .append("claim", "observed", &json!({ "disclosed_keys": ["a", "b"] }))
                .unwrap()
        });
    });

    let mut group = c.benchmark_group("proof_chain/verify");
    for depth in [16, 256, 1024] {
        let mut pipeline = ProofPipeline::new("echo.bench");
        for i in 0..depth {
            pipeline
                .append(format!("claim:{i}"), "observed", &json!({ "i": i }))
                .unwrap();
        }
        group.throughput(Throughput::Elements(depth as u64));
        group.bench_with_input(BenchmarkId::from_parameter(depth), &pipeline, |b, pipeline| {
            b.iter(|| assert!(pipeline.verify_chain()));
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_merkle_commit,
    bench_merkle_verify,
    bench_proof_chain,
);
criterion_main!(benches);
