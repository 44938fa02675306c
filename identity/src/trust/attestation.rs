//! Signed trust attestations: "issuer vouches for subject, and subject in
//! turn trusts these others".

use std::collections::BTreeMap;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;
use uuid::Uuid;

use crate::crypto::hash::canonical_json;
use crate::crypto::keys::{EchoPublicKey, EchoSignature};
use crate::error::Result;
use crate::vault::Vault;

pub const DEFAULT_SUBJECT_RELATIONSHIP: &str = "verifies";
pub const DEFAULT_CLAIM_RELATIONSHIP: &str = "trusts";

fn default_subject_relationship() -> String {
    DEFAULT_SUBJECT_RELATIONSHIP.to_string()
}

fn default_claim_relationship() -> String {
    DEFAULT_CLAIM_RELATIONSHIP.to_string()
}

fn default_confidence() -> f64 {
    1.0
}

/// An onward trust edge carried inside a subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrustClaim {
    pub target: String,
    #[serde(default = "default_claim_relationship")]
    pub relationship: String,
    /// Falls back to the subject's confidence when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jurisdiction: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub evidence: BTreeMap<String, Value>,
}

impl TrustClaim {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            relationship: default_claim_relationship(),
            confidence: None,
            jurisdiction: None,
            entity_type: None,
            display_name: None,
            evidence: BTreeMap::new(),
        }
    }

    pub fn with_relationship(mut self, relationship: impl Into<String>) -> Self {
        self.relationship = relationship.into();
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn with_jurisdiction(mut self, jurisdiction: impl Into<String>) -> Self {
        self.jurisdiction = Some(jurisdiction.into());
        self
    }

    pub fn with_evidence(mut self, key: impl Into<String>, value: Value) -> Self {
        self.evidence.insert(key.into(), value);
        self
    }
}

/// Who the attestation is about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrustSubject {
    pub id: String,
    #[serde(default = "default_subject_relationship")]
    pub relationship: String,
    /// Clamped to `[0, 1]` when the fabric builds links.
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jurisdiction: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub trusts: Vec<TrustClaim>,
}

impl TrustSubject {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            relationship: default_subject_relationship(),
            confidence: default_confidence(),
            jurisdiction: None,
            entity_type: None,
            display_name: None,
            metadata: BTreeMap::new(),
            trusts: Vec::new(),
        }
    }

    pub fn with_relationship(mut self, relationship: impl Into<String>) -> Self {
        self.relationship = relationship.into();
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_jurisdiction(mut self, jurisdiction: impl Into<String>) -> Self {
        self.jurisdiction = Some(jurisdiction.into());
        self
    }

    pub fn with_entity_type(mut self, entity_type: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn trusts(mut self, claim: TrustClaim) -> Self {
        self.trusts.push(claim);
        self
    }
}

/// A signed trust statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrustAttestation {
    /// `urn:uuid:<v4>`. The fabric deduplicates on this.
    pub id: String,
    pub types: Vec<String>,
    pub issuer: String,
    pub issued_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub subject: TrustSubject,
    pub signature: EchoSignature,
}

impl TrustAttestation {
    /// Sign `subject` with the vault key behind `issuer_did`.
    pub fn issue<I, S>(
        vault: &Vault,
        issuer_did: &str,
        subject: TrustSubject,
        types: I,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut attestation = Self {
            id: format!("urn:uuid:{}", Uuid::new_v4()),
            types: types.into_iter().map(Into::into).collect(),
            issuer: issuer_did.to_string(),
            issued_at: Utc::now().trunc_subsecs(0),
            expires_at: expires_at.map(|at| at.trunc_subsecs(0)),
            subject,
            signature: EchoSignature::from_bytes([0u8; 64]),
        };
        attestation.signature = vault.sign(issuer_did, &attestation.signing_payload()?)?;
        debug!(id = %attestation.id, issuer = issuer_did, subject = %attestation.subject.id, "trust attestation issued");
        Ok(attestation)
    }

    /// Canonical JSON of everything but the signature.
    pub fn signing_payload(&self) -> Result<Vec<u8>> {
        Ok(canonical_json(&json!({
            "id": self.id,
            "types": self.types,
            "issuer": self.issuer,
            "issued_at": self.issued_at,
            "expires_at": self.expires_at,
            "subject": self.subject,
        }))?)
    }

    pub fn verify(&self, issuer_key: &EchoPublicKey) -> bool {
        match self.signing_payload() {
            Ok(payload) => issuer_key.verify(&payload, &self.signature),
            Err(_) => false,
        }
    }

    pub fn has_type(&self, ty: &str) -> bool {
        self.types.iter().any(|t| t == ty)
    }
}
