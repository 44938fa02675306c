//! # Trust Fabric
//!
//! Verified trust attestations from many issuers, folded into one directed
//! graph. Every attestation contributes:
//!
//! - an edge `issuer -> subject` labelled with the subject's relationship
//! - an edge `subject -> target` for each onward [`TrustClaim`](super::TrustClaim)
//!
//! Nothing enters the graph unverified. An issuer the resolver cannot find
//! or a bad signature is a [`VaultError::CredentialVerification`].

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use super::attestation::{TrustAttestation, TrustClaim, TrustSubject};
use crate::error::{Result, VaultError};
use crate::vault::KeyResolver;

/// Subject metadata keys copied onto the issuer edge as evidence.
const SUBJECT_EVIDENCE_KEYS: [&str; 3] = ["trust_framework", "registry", "roles"];

fn clamp_confidence(value: f64, fallback: f64) -> f64 {
    if value.is_nan() {
        return fallback;
    }
    value.clamp(0.0, 1.0)
}

/// A DID seen anywhere in the fabric.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrustEntity {
    pub did: String,
    pub jurisdiction: Option<String>,
    pub entity_type: Option<String>,
    pub display_name: Option<String>,
    pub metadata: BTreeMap<String, Value>,
}

impl TrustEntity {
    fn new(did: &str) -> Self {
        Self {
            did: did.to_string(),
            ..Default::default()
        }
    }

    fn update_from_subject(&mut self, subject: &TrustSubject) {
        merge(&mut self.jurisdiction, &subject.jurisdiction);
        merge(&mut self.entity_type, &subject.entity_type);
        merge(&mut self.display_name, &subject.display_name);
        self.metadata
            .extend(subject.metadata.iter().map(|(k, v)| (k.clone(), v.clone())));
    }

    fn update_from_claim(&mut self, claim: &TrustClaim) {
        merge(&mut self.jurisdiction, &claim.jurisdiction);
        merge(&mut self.entity_type, &claim.entity_type);
        merge(&mut self.display_name, &claim.display_name);
    }
}

fn merge(slot: &mut Option<String>, incoming: &Option<String>) {
    if let Some(value) = incoming {
        *slot = Some(value.clone());
    }
}

/// A directed trust edge backed by one attestation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrustLink {
    pub source: String,
    pub target: String,
    pub relationship: String,
    pub attestation_id: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub confidence: f64,
    pub evidence: BTreeMap<String, Value>,
}

impl TrustLink {
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.issued_at <= now && self.expires_at.map_or(true, |at| now <= at)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustSummary {
    pub entities: usize,
    pub links: usize,
    pub attestations: usize,
}

// ---------------------------------------------------------------------------
// TrustFabric
// ---------------------------------------------------------------------------

pub struct TrustFabric {
    resolver: KeyResolver,
    accepted_types: Option<Vec<String>>,
    entities: BTreeMap<String, TrustEntity>,
    links: Vec<TrustLink>,
    link_index: HashSet<(String, String, String, String)>,
    attestations: BTreeMap<String, TrustAttestation>,
}

impl TrustFabric {
    pub fn new(resolver: KeyResolver) -> Self {
        Self {
            resolver,
            accepted_types: None,
            entities: BTreeMap::new(),
            links: Vec::new(),
            link_index: HashSet::new(),
            attestations: BTreeMap::new(),
        }
    }

    /// Only ingest attestations carrying at least one of `types`.
    pub fn with_accepted_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.accepted_types = Some(types.into_iter().map(Into::into).collect());
        self
    }

    /// Verify `attestation` and add its edges.
    ///
    /// Re-ingesting a known id returns its existing edges and adds nothing.
    /// An attestation filtered out by type returns no edges.
    pub fn ingest(&mut self, attestation: &TrustAttestation) -> Result<Vec<TrustLink>> {
        if self.attestations.contains_key(&attestation.id) {
            debug!(id = %attestation.id, "trust attestation already ingested");
            return Ok(self.links_for_attestation(&attestation.id));
        }

        let key = (self.resolver)(&attestation.issuer).ok_or_else(|| {
            VaultError::CredentialVerification(format!(
                "no verification key for issuer {}",
                attestation.issuer
            ))
        })?;

        if let Some(accepted) = &self.accepted_types {
            if !attestation.types.iter().any(|t| accepted.contains(t)) {
                debug!(id = %attestation.id, "trust attestation type not accepted");
                return Ok(Vec::new());
            }
        }

        if !attestation.verify(&key) {
            warn!(id = %attestation.id, issuer = %attestation.issuer, "trust attestation signature rejected");
            return Err(VaultError::CredentialVerification(format!(
                "signature on {} does not verify",
                attestation.id
            )));
        }

        let subject = &attestation.subject;
        if subject.id.is_empty() {
            return Err(VaultError::CredentialVerification(
                "attestation subject has no id".into(),
            ));
        }

        let issuer_entity = self.ensure_entity(&attestation.issuer);
        if attestation.issuer == subject.id {
            issuer_entity.update_from_subject(subject);
        }
        self.ensure_entity(&subject.id).update_from_subject(subject);

        let confidence = clamp_confidence(subject.confidence, 1.0);
        let mut evidence = BTreeMap::new();
        if let Some(jurisdiction) = &subject.jurisdiction {
            evidence.insert("jurisdiction".to_string(), Value::String(jurisdiction.clone()));
        }
        for key in SUBJECT_EVIDENCE_KEYS {
            if let Some(value) = subject.metadata.get(key) {
                evidence.insert(key.to_string(), value.clone());
            }
        }

        let mut pathway = vec![TrustLink {
            source: attestation.issuer.clone(),
            target: subject.id.clone(),
            relationship: subject.relationship.clone(),
            attestation_id: attestation.id.clone(),
            issued_at: attestation.issued_at,
            expires_at: attestation.expires_at,
            confidence,
            evidence,
        }];

        for claim in &subject.trusts {
            if claim.target.is_empty() {
                continue;
            }
            self.ensure_entity(&claim.target).update_from_claim(claim);

            let mut evidence = claim.evidence.clone();
            if let Some(jurisdiction) = &claim.jurisdiction {
                evidence.insert("jurisdiction".to_string(), Value::String(jurisdiction.clone()));
            }
            pathway.push(TrustLink {
                source: subject.id.clone(),
                target: claim.target.clone(),
                relationship: claim.relationship.clone(),
                attestation_id: attestation.id.clone(),
                issued_at: attestation.issued_at,
                expires_at: attestation.expires_at,
                confidence: clamp_confidence(claim.confidence.unwrap_or(confidence), confidence),
                evidence,
            });
        }

        for link in &pathway {
            self.register_link(link.clone());
        }
        self.attestations
            .insert(attestation.id.clone(), attestation.clone());

        debug!(id = %attestation.id, links = pathway.len(), "trust attestation ingested");
        Ok(pathway)
    }

    /// Outbound edges of `did`.
    pub fn relationships_for(&self, did: &str) -> Vec<&TrustLink> {
        self.links.iter().filter(|l| l.source == did).collect()
    }

    /// Outbound edges of `did` that are live at `now`.
    pub fn active_relationships_for(&self, did: &str, now: DateTime<Utc>) -> Vec<&TrustLink> {
        self.links
            .iter()
            .filter(|l| l.source == did && l.is_active_at(now))
            .collect()
    }

    /// Every source with its outbound edges.
    pub fn interoperability_map(&self) -> BTreeMap<String, Vec<TrustLink>> {
        let mut map: BTreeMap<String, Vec<TrustLink>> = BTreeMap::new();
        for link in &self.links {
            map.entry(link.source.clone()).or_default().push(link.clone());
        }
        map
    }

    pub fn entity(&self, did: &str) -> Option<&TrustEntity> {
        self.entities.get(did)
    }

    pub fn entities(&self) -> impl Iterator<Item = &TrustEntity> {
        self.entities.values()
    }

    pub fn links(&self) -> &[TrustLink] {
        &self.links
    }

    pub fn attestation(&self, id: &str) -> Option<&TrustAttestation> {
        self.attestations.get(id)
    }

    pub fn summary(&self) -> TrustSummary {
        TrustSummary {
            entities: self.entities.len(),
            links: self.links.len(),
            attestations: self.attestations.len(),
        }
    }

    fn links_for_attestation(&self, id: &str) -> Vec<TrustLink> {
        self.links
            .iter()
            .filter(|l| l.attestation_id == id)
            .cloned()
            .collect()
    }

    fn register_link(&mut self, link: TrustLink) {
        let key = (
            link.source.clone(),
            link.target.clone(),
            link.relationship.clone(),
            link.attestation_id.clone(),
        );
        if self.link_index.insert(key) {
            self.links.push(link);
        }
    }

    fn ensure_entity(&mut self, did: &str) -> &mut TrustEntity {
        self.entities
            .entry(did.to_string())
            .or_insert_with(|| TrustEntity::new(did))
    }
}

impl fmt::Debug for TrustFabric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrustFabric")
            .field("accepted_types", &self.accepted_types)
            .field("entities", &self.entities.len())
            .field("links", &self.links.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Duration;
    use serde_json::json;

    use super::*;
    use crate::crypto::keys::EchoPublicKey;
    use crate::config::{KdfParams, VaultConfig};
    use crate::identity::derivation::Chain;
    use crate::vault::{KeyRequest, Vault};

    struct Fixture {
        _dir: tempfile::TempDir,
        vault: Arc<Vault>,
        issuer: String,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let vault = Arc::new(
            Vault::open(
                VaultConfig::new(dir.path()).with_kdf(KdfParams::for_testing()),
                "fabric",
            )
            .unwrap(),
        );
        let issuer = vault
            .ensure_key(&KeyRequest::new(Chain::Bitcoin, 0, 0))
            .unwrap()
            .did
            .to_string();
        Fixture {
            _dir: dir,
            vault,
            issuer,
        }
    }

    fn attest(fx: &Fixture, subject: TrustSubject) -> TrustAttestation {
        TrustAttestation::issue(&fx.vault, &fx.issuer, subject, ["TrustCredential"], None).unwrap()
    }

    #[test]
    fn test_ingest_builds_edges() {
        let fx = fixture();
        let mut fabric = TrustFabric::new(fx.vault.key_resolver());
        let subject = TrustSubject::new("did:echo:agency")
            .with_relationship("accredits")
            .with_confidence(1.7)
            .with_jurisdiction("EU")
            .with_metadata("registry", json!("eu-reg"))
            .trusts(TrustClaim::new("did:echo:bank").with_confidence(-2.0))
            .trusts(TrustClaim::new("did:echo:insurer"));

        let links = fabric.ingest(&attest(&fx, subject)).unwrap();

        assert_eq!(links.len(), 3);
        assert_eq!(links[0].source, fx.issuer);
        assert_eq!(links[0].relationship, "accredits");
        assert_eq!(links[0].confidence, 1.0);
        assert_eq!(links[0].evidence["registry"], json!("eu-reg"));
        assert_eq!(links[1].source, "did:echo:agency");
        assert_eq!(links[1].confidence, 0.0);
        assert_eq!(links[2].confidence, 1.0);
        assert_eq!(fabric.relationships_for("did:echo:agency").len(), 2);
        assert_eq!(
            fabric.entity("did:echo:agency").unwrap().jurisdiction.as_deref(),
            Some("EU")
        );
        assert_eq!(fabric.entities().count(), 4);
    }

    #[test]
    fn test_duplicate_attestation_adds_nothing() {
        let fx = fixture();
        let mut fabric = TrustFabric::new(fx.vault.key_resolver());
        let attestation = attest(
            &fx,
            TrustSubject::new("did:echo:a").trusts(TrustClaim::new("did:echo:b")),
        );
        let first = fabric.ingest(&attestation).unwrap();
        let second = fabric.ingest(&attestation).unwrap();
        assert_eq!(first, second);
        assert_eq!(fabric.links().len(), 2);
        assert_eq!(fabric.summary().attestations, 1);
    }

    #[test]
    fn test_unknown_issuer_fails_closed() {
        let fx = fixture();
        let mut fabric = TrustFabric::new(Arc::new(|_: &str| -> Option<EchoPublicKey> { None }));
        let result = fabric.ingest(&attest(&fx, TrustSubject::new("did:echo:a")));
        assert!(matches!(result, Err(VaultError::CredentialVerification(_))));
        assert!(fabric.links().is_empty());
    }

    #[test]
    fn test_bad_signature_rejected() {
        let fx = fixture();
        let mut fabric = TrustFabric::new(fx.vault.key_resolver());
        let mut attestation = attest(&fx, TrustSubject::new("did:echo:a"));
        attestation.subject.id = "did:echo:mallory".into();
        assert!(matches!(
            fabric.ingest(&attestation),
            Err(VaultError::CredentialVerification(_))
        ));
        assert!(fabric.entity("did:echo:mallory").is_none());
    }

    #[test]
    fn test_type_filter() {
        let fx = fixture();
        let mut fabric =
            TrustFabric::new(fx.vault.key_resolver()).with_accepted_types(["RegistryCredential"]);
        let links = fabric.ingest(&attest(&fx, TrustSubject::new("did:echo:a"))).unwrap();
        assert!(links.is_empty());
        assert!(fabric.links().is_empty());
    }

    #[test]
    fn test_active_relationships_respect_expiry() {
        let fx = fixture();
        let mut fabric = TrustFabric::new(fx.vault.key_resolver());
        let expiry = Utc::now() + Duration::hours(1);
        let attestation = TrustAttestation::issue(
            &fx.vault,
            &fx.issuer,
            TrustSubject::new("did:echo:a"),
            ["TrustCredential"],
            Some(expiry),
        )
        .unwrap();
        fabric.ingest(&attestation).unwrap();

        assert_eq!(fabric.active_relationships_for(&fx.issuer, Utc::now()).len(), 1);
        assert!(fabric
            .active_relationships_for(&fx.issuer, expiry + Duration::minutes(1))
            .is_empty());
        assert_eq!(fabric.relationships_for(&fx.issuer).len(), 1);
    }

    #[test]
    fn test_interoperability_map_groups_by_source() {
        let fx = fixture();
        let mut fabric = TrustFabric::new(fx.vault.key_resolver());
        fabric
            .ingest(&attest(
                &fx,
                TrustSubject::new("did:echo:a").trusts(TrustClaim::new("did:echo:b")),
            ))
            .unwrap();
        fabric.ingest(&attest(&fx, TrustSubject::new("did:echo:c"))).unwrap();

        let map = fabric.interoperability_map();
        assert_eq!(map[&fx.issuer].len(), 2);
        assert_eq!(map["did:echo:a"].len(), 1);
        assert!(!map.contains_key("did:echo:b"));
    }

    #[test]
    fn test_nan_confidence_falls_back() {
        assert_eq!(clamp_confidence(f64::NAN, 0.4), 0.4);
        assert_eq!(clamp_confidence(0.25, 1.0), 0.25);
    }
}
