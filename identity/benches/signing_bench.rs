// Key derivation & signing benchmarks for the echo identity vault.
//
// Covers BIP-32 derivation from a master seed, ECDSA secp256k1 signing and
// verification, and the full vault sign path including the audit append.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use echo_identity::config::{KdfParams, VaultConfig};
use echo_identity::crypto::keys::EchoKeypair;
use echo_identity::identity::{derive, Chain, DerivationPath, MasterSeed};
use echo_identity::vault::{KeyRequest, Vault};

fn bench_derive_key(c: &mut Criterion) {
    let seed = MasterSeed::generate();
    let path = DerivationPath::new(Chain::Bitcoin, 0, 0, 0).unwrap();

    c.bench_function("bip32/derive_key", |b| {
        b.iter(|| derive(&seed, &path).unwrap());
    });
}

fn bench_sign_message(c: &mut Criterion) {
    let keypair = EchoKeypair::generate();
    let message = b"capability grant: read; subject=did:echo:x; nonce=42";

    c.bench_function("secp256k1/sign_message", |b| {
        b.iter(|| keypair.sign(message));
    });
}

fn bench_verify_signature(c: &mut Criterion) {
    let keypair = EchoKeypair::generate();
    let message = b"capability grant: read; subject=did:echo:x; nonce=42";
    let signature = keypair.sign(message);
    let public_key = keypair.public_key();

    c.bench_function("secp256k1/verify_signature", |b| {
        b.iter(|| public_key.verify(message, &signature));
    });
}

fn bench_vault_sign(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let config = VaultConfig::new(dir.path()).with_kdf(KdfParams::for_testing());
    let vault = Vault::open(config, "bench").unwrap();
    let did = vault
        .ensure_key(&KeyRequest::new(Chain::Bitcoin, 0, 0))
        .unwrap()
        .did
        .to_string();

    // Each sign rewrites the whole audit log, so cost grows with history.
    c.bench_function("vault/sign_with_audit", |b| {
        b.iter(|| vault.sign(&did, b"heartbeat").unwrap());
    });
}

fn bench_derive_many(c: &mut Criterion) {
    let mut group = c.benchmark_group("bip32/derive_indices");
    let seed = MasterSeed::generate();

    for size in [10u32, 50, 100] {
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                for index in 0..size {
                    let path = DerivationPath::new(Chain::Ethereum, 0, 0, index).unwrap();
                    derive(&seed, &path).unwrap();
                }
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_derive_key,
    bench_sign_message,
    bench_verify_signature,
    bench_vault_sign,
    bench_derive_many,
);
criterion_main!(benches);
