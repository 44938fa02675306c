//! # Self-Attested Upgrades
//!
//! A component announcing a new build signs a record binding its name, a
//! description and the SHA-256 of the artifact it shipped. Anyone with the
//! issuer's public key can later check both the signature and that a file
//! on disk is the artifact the record names.

use std::path::Path;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use crate::crypto::hash::{canonical_json, sha256_hex};
use crate::crypto::keys::{EchoPublicKey, EchoSignature};
use crate::error::Result;
use crate::vault::Vault;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelfAttestingUpgrade {
    /// `upgrade:<component>:<unix seconds>`
    pub upgrade_id: String,
    pub component: String,
    pub description: String,
    /// SHA-256 of the artifact, hex.
    pub artifact_digest: String,
    pub issuer: String,
    pub issued_at: DateTime<Utc>,
    pub signature: EchoSignature,
}

impl SelfAttestingUpgrade {
    /// Hash `artifact_path` and sign the upgrade record with `issuer_did`.
    pub fn create(
        vault: &Vault,
        component: &str,
        description: &str,
        artifact_path: impl AsRef<Path>,
        issuer_did: &str,
    ) -> Result<Self> {
        let artifact_digest = sha256_hex(&std::fs::read(artifact_path.as_ref())?);
        let issued_at = Utc::now().trunc_subsecs(0);

        let mut upgrade = Self {
            upgrade_id: format!("upgrade:{component}:{}", issued_at.timestamp()),
            component: component.to_string(),
            description: description.to_string(),
            artifact_digest,
            issuer: issuer_did.to_string(),
            issued_at,
            signature: EchoSignature::from_bytes([0u8; 64]),
        };
        upgrade.signature = vault.sign(issuer_did, &upgrade.signing_payload()?)?;

        info!(
            upgrade_id = %upgrade.upgrade_id,
            digest = %upgrade.artifact_digest,
            "self-attested upgrade recorded"
        );
        Ok(upgrade)
    }

    pub fn signing_payload(&self) -> Result<Vec<u8>> {
        Ok(canonical_json(&json!({
            "upgrade_id": self.upgrade_id,
            "component": self.component,
            "description": self.description,
            "artifact_digest": self.artifact_digest,
            "issuer": self.issuer,
            "issued_at": self.issued_at,
        }))?)
    }

    /// `true` if `issuer_key` signed this record as it stands.
    pub fn verify(&self, issuer_key: &EchoPublicKey) -> bool {
        match self.signing_payload() {
            Ok(payload) => issuer_key.verify(&payload, &self.signature),
            Err(_) => false,
        }
    }

    /// `true` if the file at `path` hashes to the recorded digest.
    pub fn matches_artifact(&self, path: impl AsRef<Path>) -> Result<bool> {
        let digest = sha256_hex(&std::fs::read(path.as_ref())?);
        Ok(digest == self.artifact_digest)
    }
}
