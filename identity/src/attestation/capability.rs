//! # Capability Credentials
//!
//! A capability credential is a signed grant: *issuer* lets *subject* do
//! *these things*, under *these constraints*, until *then*. The issuer
//! signs with a vault key; anyone holding the issuer's public key can check
//! the grant offline.
//!
//! ## Signed payload
//!
//! The signature covers the canonical JSON of every field except the
//! signature itself, plus the namespace under `@context`:
//!
//! ```text
//! {"@context":"echo.capability","capabilities":[...],"constraints":{...},
//!  "expires_at":...,"issued_at":...,"issuer_did":...,"nonce":...,"subject_did":...}
//! ```
//!
//! The 16-byte random nonce makes two otherwise identical grants distinct.
//! Timestamps are truncated to whole seconds so the wire form is stable.
//!
//! Verification checks the signature first and expiry second. A forged
//! credential is a [`VaultError::CredentialVerification`], a genuine but
//! stale one is a [`VaultError::ExpiredCredential`].

use std::collections::BTreeMap;

use chrono::{DateTime, SubsecRound, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::config::CAPABILITY_NAMESPACE;
use crate::crypto::hash::canonical_json;
use crate::crypto::keys::{EchoPublicKey, EchoSignature};
use crate::error::{Result, VaultError};
use crate::vault::{KeyResolver, Vault};

const NONCE_LENGTH: usize = 16;

fn default_context() -> String {
    CAPABILITY_NAMESPACE.to_string()
}

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// What to grant. Built by the caller, consumed by [`CapabilityIssuer`].
#[derive(Debug, Clone, PartialEq)]
pub struct CapabilityRequest {
    pub issuer_did: String,
    pub subject_did: String,
    pub capabilities: Vec<String>,
    pub constraints: BTreeMap<String, Value>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl CapabilityRequest {
    pub fn new<I, S>(issuer_did: impl Into<String>, subject_did: impl Into<String>, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            issuer_did: issuer_did.into(),
            subject_did: subject_did.into(),
            capabilities: capabilities.into_iter().map(Into::into).collect(),
            constraints: BTreeMap::new(),
            expires_at: None,
        }
    }

    pub fn with_constraint(mut self, key: impl Into<String>, value: Value) -> Self {
        self.constraints.insert(key.into(), value);
        self
    }

    pub fn expires_at(mut self, at: DateTime<Utc>) -> Self {
        self.expires_at = Some(at);
        self
    }
}

// ---------------------------------------------------------------------------
// Credential
// ---------------------------------------------------------------------------

/// A signed capability grant. Serializes to the wire format as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityCredential {
    #[serde(rename = "@context", default = "default_context")]
    pub context: String,
    pub issuer_did: String,
    pub subject_did: String,
    pub capabilities: Vec<String>,
    /// 16 random bytes, hex.
    pub nonce: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub constraints: BTreeMap<String, Value>,
    pub signature: EchoSignature,
}

impl CapabilityCredential {
    /// Canonical bytes covered by the signature.
    pub fn signing_payload(&self) -> Result<Vec<u8>> {
        Ok(canonical_json(&json!({
            "@context": self.context,
            "issuer_did": self.issuer_did,
            "subject_did": self.subject_did,
            "capabilities": self.capabilities,
            "nonce": self.nonce,
            "issued_at": self.issued_at,
            "expires_at": self.expires_at,
            "constraints": self.constraints,
        }))?)
    }

    /// Verify against `issuer_key` as of now.
    pub fn verify_with_key(&self, issuer_key: &EchoPublicKey) -> Result<()> {
        self.verify_with_key_at(issuer_key, Utc::now())
    }

    /// Verify against `issuer_key` as of `now`.
    pub fn verify_with_key_at(&self, issuer_key: &EchoPublicKey, now: DateTime<Utc>) -> Result<()> {
        let payload = self.signing_payload()?;
        if !issuer_key.verify(&payload, &self.signature) {
            return Err(VaultError::CredentialVerification(format!(
                "signature from {} does not verify",
                self.issuer_did
            )));
        }
        if let Some(expired_at) = self.expires_at {
            if now > expired_at {
                return Err(VaultError::ExpiredCredential { expired_at });
            }
        }
        Ok(())
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(false, |at| now > at)
    }

    pub fn grants(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability)
    }

    /// Canonical JSON wire form.
    pub fn to_json(&self) -> Result<String> {
        let bytes = canonical_json(self)?;
        String::from_utf8(bytes)
            .map_err(|e| VaultError::CredentialVerification(format!("non-utf8 credential: {e}")))
    }

    /// Parse the wire form. Malformed input fails closed.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| VaultError::CredentialVerification(format!("malformed credential: {e}")))
    }

    /// Short form for snapshots: no signature, no constraints.
    pub fn summary(&self) -> CapabilitySummary {
        CapabilitySummary {
            issuer_did: self.issuer_did.clone(),
            subject_did: self.subject_did.clone(),
            capabilities: self.capabilities.clone(),
            expires_at: self.expires_at,
            nonce: self.nonce.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilitySummary {
    pub issuer_did: String,
    pub subject_did: String,
    pub capabilities: Vec<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub nonce: String,
}

// ---------------------------------------------------------------------------
// Issuer / Verifier
// ---------------------------------------------------------------------------

/// Issues capability credentials signed by vault keys.
#[derive(Debug, Clone)]
pub struct CapabilityIssuer {
    namespace: String,
}

impl Default for CapabilityIssuer {
    fn default() -> Self {
        Self::new()
    }
}

impl CapabilityIssuer {
    pub fn new() -> Self {
        Self {
            namespace: CAPABILITY_NAMESPACE.to_string(),
        }
    }

    pub fn with_namespace(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    /// Sign `request` with the issuer's vault key.
    ///
    /// Fails with [`VaultError::UnknownKey`] if the vault does not hold the
    /// issuer DID.
    pub fn issue(&self, vault: &Vault, request: CapabilityRequest) -> Result<CapabilityCredential> {
        let mut nonce = [0u8; NONCE_LENGTH];
        rand::rngs::OsRng.fill_bytes(&mut nonce);

        let mut credential = CapabilityCredential {
            context: self.namespace.clone(),
            issuer_did: request.issuer_did,
            subject_did: request.subject_did,
            capabilities: request.capabilities,
            nonce: hex::encode(nonce),
            issued_at: Utc::now().trunc_subsecs(0),
            expires_at: request.expires_at.map(|at| at.trunc_subsecs(0)),
            constraints: request.constraints,
            signature: EchoSignature::from_bytes([0u8; 64]),
        };
        credential.signature = vault.sign(&credential.issuer_did, &credential.signing_payload()?)?;

        debug!(
            issuer = %credential.issuer_did,
            subject = %credential.subject_did,
            capabilities = credential.capabilities.len(),
            "capability issued"
        );
        Ok(credential)
    }
}

/// Verifies credentials from any issuer a resolver can find.
pub struct CapabilityVerifier {
    resolver: KeyResolver,
}

impl CapabilityVerifier {
    pub fn new(resolver: KeyResolver) -> Self {
        Self { resolver }
    }

    /// Resolve the issuer and verify as of now.
    pub fn verify(&self, credential: &CapabilityCredential) -> Result<()> {
        self.verify_at(credential, Utc::now())
    }

    pub fn verify_at(&self, credential: &CapabilityCredential, now: DateTime<Utc>) -> Result<()> {
        let key = (self.resolver)(&credential.issuer_did)
            .ok_or_else(|| VaultError::UnknownIssuer(credential.issuer_did.clone()))?;
        credential.verify_with_key_at(&key, now)
    }
}

impl std::fmt::Debug for CapabilityVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityVerifier").finish_non_exhaustive()
    }
}
