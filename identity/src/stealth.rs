//! # Stealth Channel
//!
//! Short commands sealed with AES-256-GCM and wrapped in an envelope that
//! looks like routine telemetry:
//!
//! ```json
//! {"topic": "telemetry", "hint": "node-health", "issued_at": "...", "payload": "<hex>"}
//! ```
//!
//! `payload` is `nonce || ciphertext || tag` in hex. The topic is bound in
//! as associated data, so an envelope replayed under a different topic
//! fails to open. A failed open is [`VaultError::Decryption`], which
//! callers treat as "not for us" and drop.
//!
//! The channel key is symmetric and random per channel. Distributing it is
//! the caller's problem.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::debug;
use zeroize::Zeroizing;

use crate::config::{AES_KEY_LENGTH, DEFAULT_COMMAND_HINT, DEFAULT_COMMAND_TOPIC};
use crate::crypto::encryption::{decrypt_with_aad, encrypt_with_aad};
use crate::error::{Result, VaultError};

// ---------------------------------------------------------------------------
// EncryptedMemoryContainer
// ---------------------------------------------------------------------------

/// A symmetric key in zeroizing memory, with seal/open around it.
pub struct EncryptedMemoryContainer {
    key: Zeroizing<[u8; AES_KEY_LENGTH]>,
}

impl Default for EncryptedMemoryContainer {
    fn default() -> Self {
        Self::new()
    }
}

impl EncryptedMemoryContainer {
    /// Fresh random key.
    pub fn new() -> Self {
        let mut key = Zeroizing::new([0u8; AES_KEY_LENGTH]);
        rand::rngs::OsRng.fill_bytes(&mut *key);
        Self { key }
    }

    pub fn with_key(key: [u8; AES_KEY_LENGTH]) -> Self {
        Self {
            key: Zeroizing::new(key),
        }
    }

    /// Restore a container from [`key_hex`](Self::key_hex) output.
    pub fn from_key_hex(key_hex: &str) -> Result<Self> {
        let mut key = Zeroizing::new([0u8; AES_KEY_LENGTH]);
        hex::decode_to_slice(key_hex, &mut *key).map_err(|_| VaultError::Decryption)?;
        Ok(Self { key })
    }

    /// `nonce || ciphertext || tag`.
    pub fn seal(&self, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        Ok(encrypt_with_aad(&self.key, plaintext, aad)?)
    }

    /// Any authentication failure is [`VaultError::Decryption`].
    pub fn open(&self, sealed: &[u8], aad: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        decrypt_with_aad(&self.key, sealed, aad).map_err(|_| VaultError::Decryption)
    }

    pub fn key_hex(&self) -> Zeroizing<String> {
        Zeroizing::new(hex::encode(&*self.key))
    }
}

impl fmt::Debug for EncryptedMemoryContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EncryptedMemoryContainer([REDACTED])")
    }
}

// ---------------------------------------------------------------------------
// TelemetryEnvelope
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryEnvelope {
    pub topic: String,
    pub hint: String,
    pub issued_at: DateTime<Utc>,
    /// Sealed command, hex.
    pub payload: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<BTreeMap<String, String>>,
}

// ---------------------------------------------------------------------------
// StealthChannel
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct StealthChannel {
    container: EncryptedMemoryContainer,
    topic: String,
}

impl Default for StealthChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl StealthChannel {
    /// Random key, default topic.
    pub fn new() -> Self {
        Self::with_container(EncryptedMemoryContainer::new(), DEFAULT_COMMAND_TOPIC)
    }

    pub fn with_container(container: EncryptedMemoryContainer, topic: impl Into<String>) -> Self {
        Self {
            container,
            topic: topic.into(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// The channel key, hex. Whoever holds it can read every command.
    pub fn shared_secret_hex(&self) -> Zeroizing<String> {
        self.container.key_hex()
    }

    /// Seal `command` into an envelope. `hint` defaults to `node-health`.
    pub fn encode(
        &self,
        command: &str,
        hint: Option<&str>,
        metadata: Option<BTreeMap<String, String>>,
    ) -> Result<TelemetryEnvelope> {
        let sealed = self.container.seal(command.as_bytes(), self.topic.as_bytes())?;
        Ok(TelemetryEnvelope {
            topic: self.topic.clone(),
            hint: hint.unwrap_or(DEFAULT_COMMAND_HINT).to_string(),
            issued_at: Utc::now(),
            payload: hex::encode(sealed),
            metadata: metadata.filter(|m| !m.is_empty()),
        })
    }

    /// Open an envelope. Tampering, a wrong key, a changed topic or a
    /// garbled payload all come back as [`VaultError::Decryption`].
    pub fn decode(&self, envelope: &TelemetryEnvelope) -> Result<String> {
        let sealed = hex::decode(&envelope.payload).map_err(|_| VaultError::Decryption)?;
        let plaintext = self.container.open(&sealed, envelope.topic.as_bytes())?;
        let command = std::str::from_utf8(&plaintext)
            .map_err(|_| VaultError::Decryption)?
            .to_string();
        debug!(topic = %envelope.topic, hint = %envelope.hint, "stealth envelope opened");
        Ok(command)
    }
}
