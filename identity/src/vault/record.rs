//! Persisted vault records.
//!
//! [`VaultState`] is the plaintext inside `vault.enc`. It carries its own
//! checksum: SHA-256 over the canonical JSON of every other field. AES-GCM
//! already authenticates the ciphertext, so the checksum catches a
//! different failure: a body that was written with the right key but wrong
//! contents (a buggy writer, a hand-edited export, a half-applied
//! migration). A mismatch sends `open` into self-heal.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use zeroize::Zeroizing;

use crate::config::KdfParams;
use crate::crypto::hash::{canonical_json_secret, canonical_value_secret, sha256_hex};
use crate::crypto::keys::{EchoKeypair, EchoPublicKey};
use crate::crypto::secret::{SecretBytes, SecretString};
use crate::error::{Result, VaultError};
use crate::identity::derivation::{DerivationPath, DerivedKey, MasterSeed};
use crate::identity::did::EchoDid;

/// Schema version written into new vault bodies.
pub const VAULT_STATE_VERSION: u32 = 1;

/// Schema version of [`KeyMetadata`].
pub const KEY_METADATA_VERSION: u32 = 1;

fn metadata_version() -> u32 {
    KEY_METADATA_VERSION
}

// ---------------------------------------------------------------------------
// KeyMetadata
// ---------------------------------------------------------------------------

/// The non-deterministic part of a key record. Derivation cannot recreate
/// any of this, which is why the audit log keeps a copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyMetadata {
    #[serde(default = "metadata_version")]
    pub version: u32,
    /// Who asked for the key (a service name, "cli", "test", ...).
    pub origin: String,
    pub platform: String,
    pub created_at: DateTime<Utc>,
    /// Forward-compatible extension fields.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, Value>,
}

impl KeyMetadata {
    pub fn new(origin: impl Into<String>, platform: impl Into<String>) -> Self {
        Self {
            version: KEY_METADATA_VERSION,
            origin: origin.into(),
            platform: platform.into(),
            created_at: Utc::now(),
            extra: BTreeMap::new(),
        }
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }
}

// ---------------------------------------------------------------------------
// KeyRecord
// ---------------------------------------------------------------------------

/// One active vault key. Unique per `(chain, account, change, index)`.
///
/// `Debug` is safe: the secret fields redact themselves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyRecord {
    pub did: EchoDid,
    /// `m/44'/...` rendering of the coordinates below.
    pub derivation_path: String,
    #[serde(flatten)]
    pub path: DerivationPath,
    pub public_key_bytes: EchoPublicKey,
    pub private_key_bytes: SecretBytes,
    pub extended_public_key: String,
    pub extended_private_key: SecretString,
    pub metadata: KeyMetadata,
}

impl KeyRecord {
    pub fn from_derived(did: EchoDid, derived: DerivedKey, metadata: KeyMetadata) -> Result<Self> {
        Ok(Self {
            did,
            derivation_path: derived.path.to_bip44_string(),
            path: derived.path,
            public_key_bytes: derived.public_key()?,
            private_key_bytes: derived.private_key.clone(),
            extended_public_key: derived.extended_public_key.clone(),
            extended_private_key: derived.extended_private_key.clone(),
            metadata,
        })
    }

    pub fn public_key(&self) -> &EchoPublicKey {
        &self.public_key_bytes
    }

    /// Rebuild the signing keypair. Short-lived; drop it after use.
    pub fn keypair(&self) -> Result<EchoKeypair> {
        Ok(EchoKeypair::from_secret_bytes(self.private_key_bytes.expose())?)
    }

    /// Same key slot and same key material. DIDs and metadata may differ.
    pub fn same_material(&self, other: &KeyRecord) -> bool {
        self.path == other.path
            && self.public_key_bytes == other.public_key_bytes
            && self.private_key_bytes == other.private_key_bytes
    }
}

// ---------------------------------------------------------------------------
// VaultState
// ---------------------------------------------------------------------------

/// Everything `vault.enc` holds once decrypted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultState {
    pub version: u32,
    /// BIP-39 phrase behind `master_seed`. Required for self-heal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mnemonic: Option<SecretString>,
    pub master_seed: SecretBytes,
    pub keys: Vec<KeyRecord>,
    pub kdf_params: KdfParams,
    #[serde(default)]
    pub checksum: String,
}

impl VaultState {
    /// Empty state for a freshly generated seed. Checksum is filled in.
    pub fn new(seed: &MasterSeed, kdf_params: KdfParams) -> Result<Self> {
        let mut state = Self {
            version: VAULT_STATE_VERSION,
            mnemonic: seed.phrase().map(|p| SecretString::new(p.to_string())),
            master_seed: SecretBytes::from_slice(seed.as_bytes()),
            keys: Vec::new(),
            kdf_params,
            checksum: String::new(),
        };
        state.seal()?;
        Ok(state)
    }

    /// `sha256(canonical(state without checksum))`, hex.
    pub fn compute_checksum(&self) -> Result<String> {
        let mut value = serde_json::to_value(self)?;
        if let Value::Object(map) = &mut value {
            map.remove("checksum");
        }
        Ok(sha256_hex(&canonical_value_secret(value)?))
    }

    /// Recompute and store the checksum. Call after every mutation.
    pub fn seal(&mut self) -> Result<()> {
        self.checksum = self.compute_checksum()?;
        Ok(())
    }

    pub fn verify_checksum(&self) -> Result<bool> {
        Ok(self.compute_checksum()? == self.checksum)
    }

    /// Rebuild the master seed, preferring the mnemonic.
    pub fn master_seed(&self) -> Result<MasterSeed> {
        match &self.mnemonic {
            Some(phrase) => MasterSeed::from_phrase(phrase.expose()),
            None => MasterSeed::from_seed_bytes(self.master_seed.expose()),
        }
    }

    pub fn find(&self, path: &DerivationPath) -> Option<&KeyRecord> {
        self.keys.iter().find(|k| &k.path == path)
    }

    pub fn find_by_did(&self, did: &str) -> Option<&KeyRecord> {
        self.keys.iter().find(|k| k.did.to_string() == did)
    }

    /// Remove and return the active record at `path`.
    pub fn remove(&mut self, path: &DerivationPath) -> Option<KeyRecord> {
        let position = self.keys.iter().position(|k| &k.path == path)?;
        Some(self.keys.remove(position))
    }

    /// Canonical body bytes. Wiped on drop, as is every intermediate copy.
    pub fn to_canonical_bytes(&self) -> Result<Zeroizing<Vec<u8>>> {
        Ok(canonical_json_secret(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| VaultError::MalformedVaultFile(format!("vault body: {e}")))
    }
}
