//! # Audit Log
//!
//! Every mutation the vault performs leaves an event here: keys generated,
//! keys rotated, messages signed, vaults healed. The log is encrypted under
//! the same passphrase-derived key as the vault body, with its own fresh
//! nonce on every write.
//!
//! ## File format
//!
//! ```text
//! [12-byte nonce][AES-256-GCM ciphertext of canonical JSON array of events]
//! ```
//!
//! The whole array is rewritten on every append. Fine for the few thousand
//! events a personal vault accumulates; a busy signer will feel it, and a
//! segmented log with the same read contract is the obvious next step.
//!
//! ## Why the vault needs it
//!
//! Key material is deterministic, metadata is not. When `open` has to
//! rebuild a damaged body, the `key.generated` events are where the DID
//! salt, origin, platform and creation time come back from.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use zeroize::Zeroizing;

use crate::config::AES_KEY_LENGTH;
use crate::crypto::encryption::{decrypt, encrypt};
use crate::crypto::hash::canonical_json;
use crate::error::{Result, VaultError};
use crate::identity::derivation::DerivationPath;
use crate::identity::did::EchoDid;
use crate::vault::lock::write_atomic;

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "key.generated")]
    KeyGenerated,
    #[serde(rename = "key.rotated")]
    KeyRotated,
    #[serde(rename = "key.signed")]
    KeySigned,
    #[serde(rename = "vault.healed")]
    VaultHealed,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::KeyGenerated => "key.generated",
            EventKind::KeyRotated => "key.rotated",
            EventKind::KeySigned => "key.signed",
            EventKind::VaultHealed => "vault.healed",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed event payload. Every field is optional because each kind uses a
/// different subset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    /// DID superseded by a rotation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_did: Option<EchoDid>,
    /// SHA-256 of a signed message. The message itself is never logged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_digest: Option<String>,
    /// Number of keys restored by a heal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovered_keys: Option<usize>,
    /// Why a heal ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, Value>,
}

/// One line of the audit history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VaultEvent {
    pub event: EventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub did: Option<EchoDid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<DerivationPath>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: EventMetadata,
}

impl VaultEvent {
    pub fn new(event: EventKind) -> Self {
        Self {
            event,
            did: None,
            path: None,
            timestamp: Utc::now(),
            metadata: EventMetadata::default(),
        }
    }

    /// Event about one key: carries its DID and coordinates.
    pub fn for_key(event: EventKind, did: &EchoDid) -> Self {
        Self {
            did: Some(did.clone()),
            path: Some(*did.path()),
            ..Self::new(event)
        }
    }

    pub fn with_metadata(mut self, metadata: EventMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

// ---------------------------------------------------------------------------
// AuditLog
// ---------------------------------------------------------------------------

/// The encrypted event stream for one vault.
pub struct AuditLog {
    path: PathBuf,
    key: Zeroizing<[u8; AES_KEY_LENGTH]>,
    events: Vec<VaultEvent>,
}

impl AuditLog {
    /// Decrypt the log at `path`. A missing file is an empty log.
    pub fn load(path: impl Into<PathBuf>, key: &[u8; AES_KEY_LENGTH]) -> Result<Self> {
        let path = path.into();
        let events = read_events(&path, key)?;
        debug!(path = %path.display(), events = events.len(), "audit log loaded");
        Ok(Self {
            path,
            key: Zeroizing::new(*key),
            events,
        })
    }

    /// Append `event` and rewrite the file. On failure the in-memory log is
    /// left as it was and the error is returned.
    pub fn record(&mut self, event: VaultEvent) -> Result<()> {
        self.events.push(event);
        if let Err(e) = self.persist() {
            self.events.pop();
            return Err(e);
        }
        Ok(())
    }

    /// Append several events with a single write. Either all of them land
    /// or none do.
    pub fn record_all(&mut self, events: impl IntoIterator<Item = VaultEvent>) -> Result<()> {
        let before = self.events.len();
        self.events.extend(events);
        if let Err(e) = self.persist() {
            self.events.truncate(before);
            return Err(e);
        }
        Ok(())
    }

    pub fn events(&self) -> &[VaultEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replay helper for self-heal: the most recent `key.generated` event
    /// for every derivation path. A rotation emits a fresh `key.generated`,
    /// so the latest one names the active DID.
    pub fn latest_generated_by_path(&self) -> BTreeMap<DerivationPath, VaultEvent> {
        let mut latest = BTreeMap::new();
        for event in &self.events {
            if event.event != EventKind::KeyGenerated {
                continue;
            }
            let path = match (&event.path, &event.did) {
                (Some(path), _) => *path,
                (None, Some(did)) => *did.path(),
                (None, None) => continue,
            };
            latest.insert(path, event.clone());
        }
        latest
    }

    fn persist(&self) -> Result<()> {
        let plaintext = Zeroizing::new(canonical_json(&self.events)?);
        let sealed = encrypt(&self.key, &plaintext)?;
        write_atomic(&self.path, &sealed)
    }
}

impl fmt::Debug for AuditLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuditLog")
            .field("path", &self.path)
            .field("events", &self.events.len())
            .finish_non_exhaustive()
    }
}

fn read_events(path: &Path, key: &[u8; AES_KEY_LENGTH]) -> Result<Vec<VaultEvent>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let raw = std::fs::read(path)?;
    let plaintext = decrypt(key, &raw)?;
    serde_json::from_slice(&plaintext)
        .map_err(|e| VaultError::MalformedVaultFile(format!("audit history: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::derivation::Chain;

    const KEY: [u8; 32] = [0x11; 32];

    fn did(index: u32) -> EchoDid {
        EchoDid::new(&DerivationPath::new(Chain::Bitcoin, 0, 0, index).unwrap())
    }

    #[test]
    fn test_event_kind_wire_names() {
        assert_eq!(
            serde_json::to_string(&EventKind::KeyGenerated).unwrap(),
            "\"key.generated\""
        );
        assert_eq!(
            serde_json::from_str::<EventKind>("\"vault.healed\"").unwrap(),
            EventKind::VaultHealed
        );
        assert_eq!(EventKind::KeySigned.to_string(), "key.signed");
    }

    #[test]
    fn test_record_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.log");

        let mut log = AuditLog::load(&path, &KEY).unwrap();
        assert!(log.is_empty());
        log.record(VaultEvent::for_key(EventKind::KeyGenerated, &did(0))).unwrap();
        log.record(VaultEvent::for_key(EventKind::KeySigned, &did(0))).unwrap();

        let reloaded = AuditLog::load(&path, &KEY).unwrap();
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded.events(), log.events());
    }

    #[test]
    fn test_file_is_encrypted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.log");
        let mut log = AuditLog::load(&path, &KEY).unwrap();
        log.record(VaultEvent::for_key(EventKind::KeyGenerated, &did(0))).unwrap();

        let raw = std::fs::read(&path).unwrap();
        assert!(!String::from_utf8_lossy(&raw).contains("key.generated"));
        assert!(AuditLog::load(&path, &[0x22; 32]).is_err());
    }

    #[test]
    fn test_failed_write_leaves_log_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        // A directory where the file should be makes the rename fail.
        let path = dir.path().join("history.log");
        std::fs::create_dir(&path).unwrap();
        let mut log = AuditLog {
            path,
            key: Zeroizing::new(KEY),
            events: Vec::new(),
        };
        assert!(log
            .record(VaultEvent::for_key(EventKind::KeyGenerated, &did(0)))
            .is_err());
        assert!(log.is_empty());
    }

    #[test]
    fn test_record_all_is_all_or_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.log");
        let mut log = AuditLog::load(&path, &KEY).unwrap();
        log.record_all([
            VaultEvent::for_key(EventKind::KeyGenerated, &did(0)),
            VaultEvent::for_key(EventKind::KeyRotated, &did(0)),
        ])
        .unwrap();
        assert_eq!(AuditLog::load(&path, &KEY).unwrap().len(), 2);

        std::fs::remove_file(&path).unwrap();
        std::fs::create_dir(&path).unwrap();
        assert!(log
            .record_all([
                VaultEvent::for_key(EventKind::KeyGenerated, &did(1)),
                VaultEvent::for_key(EventKind::KeyRotated, &did(1)),
            ])
            .is_err());
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn test_latest_generated_by_path_prefers_newest() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = AuditLog::load(dir.path().join("history.log"), &KEY).unwrap();
        let first = did(0);
        let second = did(0);
        let other = did(1);
        log.record(VaultEvent::for_key(EventKind::KeyGenerated, &first)).unwrap();
        log.record(VaultEvent::for_key(EventKind::KeyGenerated, &other)).unwrap();
        log.record(VaultEvent::for_key(EventKind::KeyGenerated, &second)).unwrap();
        log.record(VaultEvent::for_key(EventKind::KeyRotated, &second)).unwrap();

        let latest = log.latest_generated_by_path();
        assert_eq!(latest.len(), 2);
        assert_eq!(latest[first.path()].did.as_ref(), Some(&second));
        assert_eq!(latest[other.path()].did.as_ref(), Some(&other));
    }

    #[test]
    fn test_metadata_skips_empty_fields() {
        let event = VaultEvent::for_key(EventKind::KeyGenerated, &did(0)).with_metadata(
            EventMetadata {
                origin: Some("cli".into()),
                ..Default::default()
            },
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["metadata"]["origin"], "cli");
        assert!(json["metadata"].get("previous_did").is_none());
    }
}
