//! End-to-end integration tests for the echo identity vault.
//!
//! These tests drive the public API the way an embedding service would:
//! open a vault, derive keys, sign, attest, damage files on disk and
//! reopen. Each test owns its own temporary vault root.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::json;

use echo_identity::attestation::{
    CapabilityCredential, CapabilityIssuer, CapabilityRequest, CapabilityVerifier, ClaimTree,
    Claims, ProofPipeline,
};
use echo_identity::config::{KdfParams, RotationPolicy, VaultConfig};
use echo_identity::identity::{derive, Chain, DerivationPath, MasterSeed};
use echo_identity::stealth::StealthChannel;
use echo_identity::trust::{TrustAttestation, TrustClaim, TrustFabric, TrustSubject};
use echo_identity::vault::{EventKind, KeyRequest, Vault};
use echo_identity::{SovereignIdentityLayer, VaultError};

const PASSPHRASE: &str = "correct horse battery staple";

// ---------------------------------------------------------------------------
// Test Helpers
// ---------------------------------------------------------------------------

fn config(root: &Path) -> VaultConfig {
    VaultConfig::new(root)
        .with_kdf(KdfParams::for_testing())
        .with_platform("e2e")
}

fn open(root: &Path) -> Vault {
    Vault::open(config(root), PASSPHRASE).expect("vault opens")
}

fn btc(index: u32) -> KeyRequest {
    KeyRequest::new(Chain::Bitcoin, 0, index).with_origin("e2e")
}

fn flip_last_byte(path: &Path) {
    let mut bytes = fs::read(path).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;
    fs::write(path, bytes).unwrap();
}

fn claims(pairs: &[(&str, serde_json::Value)]) -> Claims {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

// ---------------------------------------------------------------------------
// Vault lifecycle
// ---------------------------------------------------------------------------

#[test]
fn derivation_is_deterministic_from_the_mnemonic() {
    let dir = tempfile::tempdir().unwrap();
    let vault = open(dir.path());
    let record = vault.ensure_key(&btc(3)).unwrap();
    let phrase = vault.mnemonic_phrase().unwrap();

    let seed = MasterSeed::from_phrase(&phrase).unwrap();
    let path = DerivationPath::new(Chain::Bitcoin, 0, 0, 3).unwrap();
    let first = derive(&seed, &path).unwrap();
    let second = derive(&seed, &path).unwrap();

    assert_eq!(first.public_key_bytes, second.public_key_bytes);
    assert_eq!(&first.public_key_bytes, record.public_key().as_bytes());
    assert_eq!(record.derivation_path, "m/44'/0'/0'/0/3");
}

#[test]
fn keys_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let (btc_key, eth_key) = {
        let vault = open(dir.path());
        let a = vault.ensure_key(&btc(0)).unwrap();
        let b = vault
            .ensure_key(&KeyRequest::new(Chain::Ethereum, 1, 2).with_change(1))
            .unwrap();
        (a, b)
    };

    let vault = open(dir.path());
    assert!(!vault.healed_on_open());
    assert_eq!(vault.list_keys().len(), 2);

    let again = vault.ensure_key(&btc(0)).unwrap();
    assert_eq!(again.did, btc_key.did);
    assert!(again.same_material(&btc_key));
    assert_eq!(again.metadata.platform, "e2e");

    let eth = vault.find_by_did(&eth_key.did.to_string()).unwrap();
    assert_eq!(eth.derivation_path, "m/44'/60'/1'/1/2");
}

#[test]
fn flipped_body_byte_self_heals() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path());
    let expected = {
        let vault = open(dir.path());
        vault.ensure_key(&btc(0)).unwrap();
        vault.ensure_key(&btc(1)).unwrap();
        vault.list_keys()
    };

    flip_last_byte(&cfg.vault_path());

    let vault = open(dir.path());
    assert!(vault.healed_on_open());
    let healed = vault.list_keys();
    assert_eq!(healed.len(), 2);
    for (before, after) in expected.iter().zip(&healed) {
        assert_eq!(before.did, after.did);
        assert!(before.same_material(after));
        assert_eq!(after.metadata.origin, "e2e");
    }

    let history = vault.export_history().unwrap();
    let healed_event = history
        .iter()
        .find(|e| e.event == EventKind::VaultHealed)
        .expect("heal is audited");
    assert_eq!(healed_event.metadata.recovered_keys, Some(2));

    // The healed body is a normal body again.
    drop(vault);
    assert!(!open(dir.path()).healed_on_open());
}

#[test]
fn damaged_header_salt_self_heals() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path());
    let expected = {
        let vault = open(dir.path());
        vault.ensure_key(&btc(0)).unwrap()
    };

    let mut bytes = fs::read(cfg.vault_path()).unwrap();
    let marker = br#""salt":""#;
    let at = bytes
        .windows(marker.len())
        .position(|w| w == marker)
        .expect("header carries a salt")
        + marker.len();
    bytes[at] = if bytes[at] == b'a' { b'b' } else { b'a' };
    fs::write(cfg.vault_path(), bytes).unwrap();

    let vault = open(dir.path());
    assert!(vault.healed_on_open());
    let restored = vault.get_key(&expected.path).unwrap();
    assert_eq!(restored.did, expected.did);
    assert!(restored.same_material(&expected));

    drop(vault);
    assert!(!open(dir.path()).healed_on_open());
}

#[test]
fn damaged_history_does_not_lock_out_an_intact_vault() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path());
    let expected = {
        let vault = open(dir.path());
        vault.ensure_key(&btc(0)).unwrap()
    };
    flip_last_byte(&cfg.history_path());

    let vault = open(dir.path());
    assert!(!vault.healed_on_open());
    let key = vault.get_key(&expected.path).unwrap();
    assert_eq!(key.did, expected.did);
    vault.sign(&key.did.to_string(), b"still works").unwrap();

    // The body can still be rebuilt from the fresh history.
    drop(vault);
    fs::remove_file(cfg.vault_path()).unwrap();
    let vault = open(dir.path());
    assert!(vault.healed_on_open());
    assert_eq!(vault.get_key(&expected.path).unwrap().did, expected.did);
}

#[test]
fn flipped_body_without_sidecar_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path());
    {
        let vault = open(dir.path());
        vault.ensure_key(&btc(0)).unwrap();
    }
    flip_last_byte(&cfg.vault_path());
    fs::remove_file(cfg.recovery_path()).unwrap();

    let err = Vault::open(cfg, PASSPHRASE).unwrap_err();
    assert!(matches!(err, VaultError::VaultIntegrity(_)));
    assert!(err.is_fatal());
}

#[test]
fn wrong_passphrase_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    drop(open(dir.path()));
    let err = Vault::open(config(dir.path()), "not the passphrase").unwrap_err();
    assert!(matches!(err, VaultError::InvalidPassphrase));
}

#[test]
fn second_writer_is_locked_out() {
    let dir = tempfile::tempdir().unwrap();
    let _first = open(dir.path());
    let err = Vault::open(config(dir.path()), PASSPHRASE).unwrap_err();
    assert!(matches!(err, VaultError::VaultLocked(_)));
}

#[test]
fn rotation_keeps_material_and_reissues_did() {
    let dir = tempfile::tempdir().unwrap();
    let vault = open(dir.path());
    let original = vault.ensure_key(&btc(0)).unwrap();
    assert_eq!(original.derivation_path, "m/44'/0'/0'/0/0");

    let rotated = vault.rotate(&btc(0)).unwrap();
    assert_ne!(rotated.did, original.did);
    assert_eq!(rotated.public_key(), original.public_key());
    assert_eq!(vault.list_keys().len(), 1);

    assert!(matches!(
        vault.sign(&original.did.to_string(), b"old did"),
        Err(VaultError::UnknownKey(_))
    ));
    let sig = vault.sign(&rotated.did.to_string(), b"new did").unwrap();
    assert!(rotated.public_key().verify(b"new did", &sig));

    let history = vault.export_history().unwrap();
    let rotation = history
        .iter()
        .find(|e| e.event == EventKind::KeyRotated)
        .unwrap();
    assert_eq!(rotation.metadata.previous_did.as_ref(), Some(&original.did));
    assert_eq!(rotation.did.as_ref(), Some(&rotated.did));

    // A heal after rotation restores the rotated DID, not the original.
    drop(vault);
    fs::remove_file(config(dir.path()).vault_path()).unwrap();
    let vault = open(dir.path());
    assert_eq!(vault.list_keys()[0].did, rotated.did);
}

#[test]
fn new_key_material_comes_from_the_next_index() {
    let dir = tempfile::tempdir().unwrap();
    let vault = open(dir.path());
    assert_eq!(config(dir.path()).rotation, RotationPolicy::ResaltIdentity);

    let current = vault.ensure_key(&btc(0)).unwrap();
    let rotated = vault.rotate(&btc(0)).unwrap();
    assert_eq!(rotated.public_key(), current.public_key());

    let next = vault.ensure_key(&btc(1)).unwrap();
    assert_eq!(next.derivation_path, "m/44'/0'/0'/0/1");
    assert_ne!(next.public_key(), current.public_key());
    assert_ne!(next.did, rotated.did);

    let seed = MasterSeed::from_phrase(&vault.mnemonic_phrase().unwrap()).unwrap();
    let expected = derive(&seed, &DerivationPath::new(Chain::Bitcoin, 0, 0, 1).unwrap()).unwrap();
    assert_eq!(next.public_key().as_bytes(), &expected.public_key_bytes);

    // Both slots stay live: moving on does not retire the old key.
    assert_eq!(vault.list_keys().len(), 2);
    let sig = vault.sign(&rotated.did.to_string(), b"old slot").unwrap();
    assert!(rotated.public_key().verify(b"old slot", &sig));
}

#[test]
fn signing_is_audited_without_the_message() {
    let dir = tempfile::tempdir().unwrap();
    let vault = open(dir.path());
    let key = vault.ensure_key(&btc(0)).unwrap();
    vault.sign(&key.did.to_string(), b"launch codes").unwrap();

    let raw = fs::read(config(dir.path()).history_path()).unwrap();
    assert!(!String::from_utf8_lossy(&raw).contains("launch codes"));

    let signed = vault
        .export_history()
        .unwrap()
        .into_iter()
        .find(|e| e.event == EventKind::KeySigned)
        .unwrap();
    assert_eq!(
        signed.metadata.message_digest.as_deref(),
        Some(echo_identity::crypto::sha256_hex(b"launch codes").as_str())
    );
}

// ---------------------------------------------------------------------------
// Attestation
// ---------------------------------------------------------------------------

#[test]
fn selective_disclosure_is_sound() {
    let tree = ClaimTree::commit(claims(&[("a", json!(1)), ("b", json!(2)), ("c", json!(3))]))
        .unwrap();
    let proof = tree.prove(["a"]).unwrap();

    assert!(proof.verify_against(&claims(&[("a", json!(1))])));
    assert!(!proof.verify_against(&claims(&[("a", json!(99))])));

    let mut forged = proof.clone();
    forged.disclosed.insert("a".into(), json!(99));
    assert!(!forged.verify());
    assert!(!serde_json::to_string(&proof).unwrap().contains("\"b\":2"));
}

#[test]
fn capability_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let vault = Arc::new(open(dir.path()));
    let issuer = vault.ensure_key(&btc(0)).unwrap().did.to_string();

    let credential = CapabilityIssuer::new()
        .issue(
            &vault,
            CapabilityRequest::new(&issuer, "did:echo:x", ["read"])
                .expires_at(Utc::now() + Duration::hours(1)),
        )
        .unwrap();

    let wire = credential.to_json().unwrap();
    let received = CapabilityCredential::from_json(&wire).unwrap();
    let verifier = CapabilityVerifier::new(vault.key_resolver());
    verifier.verify(&received).unwrap();

    let later = Utc::now() + Duration::hours(2);
    assert!(matches!(
        verifier.verify_at(&received, later),
        Err(VaultError::ExpiredCredential { .. })
    ));

    let mut widened = received;
    widened.capabilities.push("write".into());
    assert!(matches!(
        verifier.verify(&widened),
        Err(VaultError::CredentialVerification(_))
    ));
}

#[test]
fn proof_chain_detects_tampering() {
    let mut pipeline = ProofPipeline::new("echo.zk-attestation");
    for i in 0..4 {
        pipeline
            .append(format!("claim:{i}"), "observed", &json!({ "i": i }))
            .unwrap();
    }
    assert!(pipeline.verify_chain());

    let mut nodes = pipeline.nodes().to_vec();
    nodes[1].statement = "rewritten".into();
    let tampered = ProofPipeline::from_nodes("echo.zk-attestation", nodes);
    assert!(!tampered.verify_chain());
    assert_eq!(tampered.first_invalid(), Some(1));
    assert!(tampered.verify_from(2));
}

#[test]
fn stealth_envelope_roundtrip_and_tamper() {
    let channel = StealthChannel::new();
    let mut metadata = BTreeMap::new();
    metadata.insert("host".to_string(), "edge-3".to_string());
    let envelope = channel.encode("rotate", Some("cpu"), Some(metadata)).unwrap();

    let wire = serde_json::to_string(&envelope).unwrap();
    assert!(!wire.contains("rotate"));
    assert_eq!(channel.decode(&serde_json::from_str(&wire).unwrap()).unwrap(), "rotate");

    let mut raw = hex::decode(&envelope.payload).unwrap();
    raw[12] ^= 0x01;
    let tampered = echo_identity::stealth::TelemetryEnvelope {
        payload: hex::encode(raw),
        ..envelope
    };
    let err = channel.decode(&tampered).unwrap_err();
    assert!(matches!(err, VaultError::Decryption));
    assert!(err.is_ignorable());
}

#[test]
fn trust_fabric_across_two_vaults() {
    let dir_a = tempfile::tempdir().unwrap();
    let dir_b = tempfile::tempdir().unwrap();
    let regulator = Arc::new(open(dir_a.path()));
    let bank = Arc::new(open(dir_b.path()));
    let regulator_did = regulator.ensure_key(&btc(0)).unwrap().did.to_string();
    let bank_key = bank.ensure_key(&btc(0)).unwrap();
    let bank_did = bank_key.did.to_string();

    let accreditation = TrustAttestation::issue(
        &regulator,
        &regulator_did,
        TrustSubject::new(&bank_did)
            .with_relationship("accredits")
            .with_jurisdiction("EU")
            .trusts(TrustClaim::new("did:echo:clearing-house").with_confidence(0.9)),
        ["TrustCredential"],
        None,
    )
    .unwrap();

    // The fabric lives on the bank side and only knows the regulator's key
    // through its resolver.
    let regulator_resolver = regulator.key_resolver();
    let mut fabric = TrustFabric::new(regulator_resolver);
    let links = fabric.ingest(&accreditation).unwrap();
    assert_eq!(links.len(), 2);
    assert_eq!(fabric.relationships_for(&regulator_did)[0].target, bank_did);
    assert_eq!(fabric.relationships_for(&bank_did)[0].confidence, 0.9);

    let self_signed = TrustAttestation::issue(
        &bank,
        &bank_did,
        TrustSubject::new("did:echo:anyone"),
        ["TrustCredential"],
        None,
    )
    .unwrap();
    assert!(matches!(
        fabric.ingest(&self_signed),
        Err(VaultError::CredentialVerification(_))
    ));
}

// ---------------------------------------------------------------------------
// Facade
// ---------------------------------------------------------------------------

#[test]
fn sovereign_layer_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let layer = SovereignIdentityLayer::new(Arc::new(open(&dir.path().join("vault"))));
    let did = layer.ensure_key(&btc(0)).unwrap().did.to_string();

    let proof = layer
        .selective_disclosure(
            claims(&[("name", json!("echo")), ("tier", json!("gold"))]),
            ["tier"],
        )
        .unwrap();
    assert!(proof.verify());

    let credential = layer
        .issue_capability(CapabilityRequest::new(&did, "did:echo:x", ["read"]))
        .unwrap();
    layer.verify_capability(&credential).unwrap();

    let artifact = dir.path().join("build.bin");
    fs::write(&artifact, b"artifact").unwrap();
    let upgrade = layer
        .self_attest_upgrade("node", "security fix", &artifact, &did)
        .unwrap();
    assert!(upgrade.matches_artifact(&artifact).unwrap());

    let envelope = layer.encode_command("drain", None, None).unwrap();
    assert_eq!(layer.decode_command(&envelope).unwrap(), "drain");

    assert!(layer.verify_proofs());
    let snapshot = layer.snapshot();
    assert_eq!(snapshot.proof_pipeline.depth, 3);
    assert!(snapshot.proof_pipeline.verified);
    assert_eq!(snapshot.keys.len(), 1);
    assert_eq!(snapshot.upgrades.len(), 1);

    let json = serde_json::to_string(&snapshot).unwrap();
    assert!(!json.contains(layer.shared_command_secret().as_str()));
}
