//! Error types for the identity vault and its attestation layer.
//!
//! Every fallible public operation returns a [`VaultError`]. The enum is
//! split in two halves: the domain failures callers are expected to branch
//! on, and plumbing failures (I/O, serialization, primitive errors) that
//! mostly get logged and propagated.
//!
//! Self-heal is the only automatic recovery path in the crate. Everything
//! else surfaces here and nothing is swallowed.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::crypto::encryption::EncryptionError;
use crate::crypto::kdf::KdfError;
use crate::crypto::keys::KeyError;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, VaultError>;

/// Errors produced by the vault, key derivation and attestation primitives.
#[derive(Debug, Error)]
pub enum VaultError {
    // -- Domain failures ----------------------------------------------------
    /// The vault checksum did not hold and self-heal could not rebuild it.
    /// Fatal. Do not retry.
    #[error("vault integrity failure: {0}")]
    VaultIntegrity(String),

    /// An operation referenced a DID the vault does not hold.
    #[error("unknown key: {0}")]
    UnknownKey(String),

    /// A capability was presented by an issuer nobody can resolve.
    #[error("unknown issuer: {0}")]
    UnknownIssuer(String),

    /// Signature mismatch, malformed credential or unresolved issuer key.
    /// Fail closed.
    #[error("credential verification failed: {0}")]
    CredentialVerification(String),

    /// The signature checked out but the credential is past its expiry.
    #[error("credential expired at {expired_at}")]
    ExpiredCredential {
        /// The `expires_at` value carried by the credential.
        expired_at: DateTime<Utc>,
    },

    /// A stealth envelope failed authentication. Usually just someone
    /// else's telemetry; callers should ignore it.
    #[error("envelope could not be decrypted")]
    Decryption,

    /// The derivation chain identifier is not one we know how to derive.
    #[error("unsupported chain: {0}")]
    UnsupportedChain(String),

    // -- Plumbing -----------------------------------------------------------
    /// Neither the vault body nor the recovery sidecar authenticated under
    /// the derived key.
    #[error("invalid passphrase")]
    InvalidPassphrase,

    /// Another vault instance holds the writer lock for this root.
    ///
    /// A lock left by a process that has since exited is reclaimed where
    /// liveness can be checked (Linux). Elsewhere, delete `vault.lock` by
    /// hand once no process has the vault open.
    #[error("vault at {0} is locked by another writer")]
    VaultLocked(PathBuf),

    /// The vault file is structurally broken (truncated, bad header).
    #[error("malformed vault file: {0}")]
    MalformedVaultFile(String),

    /// Hierarchical derivation rejected the path or seed.
    #[error("derivation failed: {0}")]
    Derivation(String),

    /// Claims handed to selective disclosure were empty or unusable.
    #[error("invalid claims: {0}")]
    InvalidClaims(String),

    #[error("kdf error: {0}")]
    Kdf(#[from] KdfError),

    #[error("encryption error: {0}")]
    Encryption(#[from] EncryptionError),

    #[error("key error: {0}")]
    Key(#[from] KeyError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl VaultError {
    /// Fatal errors must not be retried.
    pub fn is_fatal(&self) -> bool {
        matches!(self, VaultError::VaultIntegrity(_))
    }

    /// Errors the caller may drop on the floor (foreign telemetry).
    pub fn is_ignorable(&self) -> bool {
        matches!(self, VaultError::Decryption)
    }
}
