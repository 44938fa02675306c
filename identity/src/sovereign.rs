//! # Sovereign Identity Layer
//!
//! One object per identity that ties the pieces together: the vault, the
//! attestation primitives, the stealth channel and the trust fabric.
//! External callers should go through this rather than the parts.
//!
//! Every attestation operation also appends a node to the layer's proof
//! chain (domain `echo.zk-attestation`), so the chain is an ordered,
//! tamper-evident record of what this identity has attested to:
//!
//! | operation                   | claim_id                | statement                |
//! |-----------------------------|-------------------------|--------------------------|
//! | `selective_disclosure`      | `disclosure:<root>`     | `selective_disclosure`   |
//! | `issue_capability`          | `capability:<nonce>`    | `capability-issued`      |
//! | `self_attest_upgrade`       | `<upgrade_id>`          | `self-attesting-upgrade` |
//! | `record_artifact_integrity` | `integrity:<sha256>`    | `artifact-integrity`     |
//! | `ingest_trust`              | `trust:<attestation>`   | `trust-ingested`         |
//!
//! Recent disclosures, capabilities and upgrades are kept in bounded
//! histories for [`snapshot`](SovereignIdentityLayer::snapshot).

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::attestation::{
    ArtifactIntegrityVerifier, CapabilityCredential, CapabilityIssuer, CapabilityRequest,
    CapabilitySummary, CapabilityVerifier, ClaimTree, Claims, IntegrityStatus, ProofNode,
    ProofPipeline, ProofSnapshot, SelectiveDisclosureProof, SelfAttestingUpgrade,
};
use crate::config::{
    ATTESTATION_PROOF_DOMAIN, CAPABILITY_HISTORY, DISCLOSURE_HISTORY, PROOF_SNAPSHOT_LIMIT,
    UPGRADE_HISTORY,
};
use crate::crypto::keys::{EchoPublicKey, EchoSignature};
use crate::error::Result;
use crate::stealth::{StealthChannel, TelemetryEnvelope};
use crate::trust::{TrustAttestation, TrustFabric, TrustLink, TrustSummary};
use crate::vault::{KeyRecord, KeyRequest, KeyResolver, Vault};

fn push_bounded<T>(queue: &mut VecDeque<T>, item: T, capacity: usize) {
    if queue.len() == capacity {
        queue.pop_front();
    }
    queue.push_back(item);
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Public view of one vault key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeySummary {
    pub did: String,
    pub derivation_path: String,
    pub public_key: EchoPublicKey,
    pub origin: String,
    pub platform: String,
    pub created_at: DateTime<Utc>,
}

impl From<&KeyRecord> for KeySummary {
    fn from(record: &KeyRecord) -> Self {
        Self {
            did: record.did.to_string(),
            derivation_path: record.derivation_path.clone(),
            public_key: record.public_key().clone(),
            origin: record.metadata.origin.clone(),
            platform: record.metadata.platform.clone(),
            created_at: record.metadata.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StealthSummary {
    pub topic: String,
}

/// Everything an observer may see about this identity. Holds no secrets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentitySnapshot {
    pub keys: Vec<KeySummary>,
    pub disclosures: Vec<SelectiveDisclosureProof>,
    pub capabilities: Vec<CapabilitySummary>,
    pub upgrades: Vec<SelfAttestingUpgrade>,
    pub proof_pipeline: ProofSnapshot,
    pub integrity: Option<IntegrityStatus>,
    pub stealth_channel: StealthSummary,
    pub trust: TrustSummary,
}

// ---------------------------------------------------------------------------
// SovereignIdentityLayer
// ---------------------------------------------------------------------------

struct LayerState {
    proofs: ProofPipeline,
    disclosures: VecDeque<SelectiveDisclosureProof>,
    capabilities: VecDeque<CapabilitySummary>,
    upgrades: VecDeque<SelfAttestingUpgrade>,
    trust: TrustFabric,
    integrity: Option<IntegrityStatus>,
}

pub struct SovereignIdentityLayer {
    vault: Arc<Vault>,
    issuer: CapabilityIssuer,
    stealth: StealthChannel,
    foreign_keys: Arc<RwLock<HashMap<String, EchoPublicKey>>>,
    integrity: Option<ArtifactIntegrityVerifier>,
    state: Mutex<LayerState>,
}

impl SovereignIdentityLayer {
    pub fn new(vault: Arc<Vault>) -> Self {
        let foreign_keys = Arc::new(RwLock::new(HashMap::new()));
        let resolver = combined_resolver(&vault, &foreign_keys);
        Self {
            vault,
            issuer: CapabilityIssuer::new(),
            stealth: StealthChannel::new(),
            foreign_keys,
            integrity: None,
            state: Mutex::new(LayerState {
                proofs: ProofPipeline::new(ATTESTATION_PROOF_DOMAIN),
                disclosures: VecDeque::with_capacity(DISCLOSURE_HISTORY),
                capabilities: VecDeque::with_capacity(CAPABILITY_HISTORY),
                upgrades: VecDeque::with_capacity(UPGRADE_HISTORY),
                trust: TrustFabric::new(resolver),
                integrity: None,
            }),
        }
    }

    pub fn with_integrity(mut self, verifier: ArtifactIntegrityVerifier) -> Self {
        self.integrity = Some(verifier);
        self
    }

    pub fn with_stealth_channel(mut self, channel: StealthChannel) -> Self {
        self.stealth = channel;
        self
    }

    /// Restrict which trust attestation types `ingest_trust` accepts.
    pub fn with_accepted_trust_types<I, S>(self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let resolver = self.resolver();
        self.state.lock().trust = TrustFabric::new(resolver).with_accepted_types(types);
        self
    }

    pub fn vault(&self) -> &Arc<Vault> {
        &self.vault
    }

    // -- Keys ----------------------------------------------------------------

    pub fn ensure_key(&self, request: &KeyRequest) -> Result<KeyRecord> {
        self.vault.ensure_key(request)
    }

    pub fn rotate(&self, request: &KeyRequest) -> Result<KeyRecord> {
        self.vault.rotate(request)
    }

    pub fn sign(&self, did: &str, message: &[u8]) -> Result<EchoSignature> {
        self.vault.sign(did, message)
    }

    /// Make a key from outside this vault resolvable for capability and
    /// trust verification.
    pub fn register_foreign_key(&self, did: impl Into<String>, key: EchoPublicKey) {
        let did = did.into();
        debug!(%did, "foreign key registered");
        self.foreign_keys.write().insert(did, key);
    }

    /// Vault keys first, then registered foreign keys.
    pub fn resolver(&self) -> KeyResolver {
        combined_resolver(&self.vault, &self.foreign_keys)
    }

    // -- Attestation ---------------------------------------------------------

    pub fn selective_disclosure<I, S>(&self, claims: Claims, reveal: I) -> Result<SelectiveDisclosureProof>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let proof = ClaimTree::commit(claims)?.prove(reveal)?;

        let mut state = self.state.lock();
        state.proofs.append(
            format!("disclosure:{}", proof.merkle_root),
            "selective_disclosure",
            &json!({ "disclosed_keys": proof.disclosed_keys() }),
        )?;
        push_bounded(&mut state.disclosures, proof.clone(), DISCLOSURE_HISTORY);
        Ok(proof)
    }

    pub fn issue_capability(&self, request: CapabilityRequest) -> Result<CapabilityCredential> {
        let credential = self.issuer.issue(&self.vault, request)?;

        let mut state = self.state.lock();
        state.proofs.append(
            format!("capability:{}", credential.nonce),
            "capability-issued",
            &json!({
                "issuer": credential.issuer_did,
                "subject": credential.subject_did,
                "caps": credential.capabilities,
            }),
        )?;
        push_bounded(&mut state.capabilities, credential.summary(), CAPABILITY_HISTORY);
        Ok(credential)
    }

    /// Verify against vault and registered foreign keys, as of now.
    pub fn verify_capability(&self, credential: &CapabilityCredential) -> Result<()> {
        CapabilityVerifier::new(self.resolver()).verify(credential)
    }

    pub fn self_attest_upgrade(
        &self,
        component: &str,
        description: &str,
        artifact_path: impl AsRef<Path>,
        issuer_did: &str,
    ) -> Result<SelfAttestingUpgrade> {
        let upgrade =
            SelfAttestingUpgrade::create(&self.vault, component, description, artifact_path, issuer_did)?;

        let mut state = self.state.lock();
        state.proofs.append(
            upgrade.upgrade_id.clone(),
            "self-attesting-upgrade",
            &json!({ "component": upgrade.component, "digest": upgrade.artifact_digest }),
        )?;
        push_bounded(&mut state.upgrades, upgrade.clone(), UPGRADE_HISTORY);
        Ok(upgrade)
    }

    /// Measure the configured artifact and chain the result. `None` when
    /// no integrity verifier is configured.
    pub fn record_artifact_integrity(&self) -> Result<Option<ProofNode>> {
        let Some(verifier) = &self.integrity else {
            return Ok(None);
        };
        let status = verifier.status()?;

        let mut state = self.state.lock();
        let node = state.proofs.append(
            format!("integrity:{}", status.measurement),
            "artifact-integrity",
            &status,
        )?;
        info!(allowed = status.allowed, measurement = %status.measurement, "artifact integrity recorded");
        state.integrity = Some(status);
        Ok(Some(node))
    }

    pub fn proofs(&self) -> Vec<ProofNode> {
        self.state.lock().proofs.nodes().to_vec()
    }

    pub fn verify_proofs(&self) -> bool {
        self.state.lock().proofs.verify_chain()
    }

    // -- Stealth channel -----------------------------------------------------

    pub fn encode_command(
        &self,
        command: &str,
        hint: Option<&str>,
        metadata: Option<BTreeMap<String, String>>,
    ) -> Result<TelemetryEnvelope> {
        self.stealth.encode(command, hint, metadata)
    }

    pub fn decode_command(&self, envelope: &TelemetryEnvelope) -> Result<String> {
        self.stealth.decode(envelope)
    }

    pub fn shared_command_secret(&self) -> Zeroizing<String> {
        self.stealth.shared_secret_hex()
    }

    // -- Trust ---------------------------------------------------------------

    /// Verify and ingest a trust attestation. A newly ingested attestation
    /// is chained; duplicates and type-filtered ones are not.
    pub fn ingest_trust(&self, attestation: &TrustAttestation) -> Result<Vec<TrustLink>> {
        let mut state = self.state.lock();
        let known = state.trust.attestation(&attestation.id).is_some();
        let links = state.trust.ingest(attestation)?;
        if !known && !links.is_empty() {
            state.proofs.append(
                format!("trust:{}", attestation.id),
                "trust-ingested",
                &json!({
                    "issuer": attestation.issuer,
                    "subject": attestation.subject.id,
                    "links": links.len(),
                }),
            )?;
        }
        Ok(links)
    }

    pub fn trust_relationships(&self, did: &str) -> Vec<TrustLink> {
        self.state
            .lock()
            .trust
            .relationships_for(did)
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn interoperability_map(&self) -> BTreeMap<String, Vec<TrustLink>> {
        self.state.lock().trust.interoperability_map()
    }

    // -- Snapshot ------------------------------------------------------------

    pub fn snapshot(&self) -> IdentitySnapshot {
        let keys = self.vault.list_keys().iter().map(KeySummary::from).collect();
        let state = self.state.lock();
        IdentitySnapshot {
            keys,
            disclosures: state.disclosures.iter().cloned().collect(),
            capabilities: state.capabilities.iter().cloned().collect(),
            upgrades: state.upgrades.iter().cloned().collect(),
            proof_pipeline: state.proofs.snapshot(PROOF_SNAPSHOT_LIMIT),
            integrity: state.integrity.clone(),
            stealth_channel: StealthSummary {
                topic: self.stealth.topic().to_string(),
            },
            trust: state.trust.summary(),
        }
    }
}

impl std::fmt::Debug for SovereignIdentityLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SovereignIdentityLayer")
            .field("vault", &self.vault)
            .field("topic", &self.stealth.topic())
            .finish_non_exhaustive()
    }
}

fn combined_resolver(
    vault: &Arc<Vault>,
    foreign_keys: &Arc<RwLock<HashMap<String, EchoPublicKey>>>,
) -> KeyResolver {
    let local = vault.key_resolver();
    let foreign = Arc::clone(foreign_keys);
    Arc::new(move |did: &str| local(did).or_else(|| foreign.read().get(did).cloned()))
}
