//! # Encrypted Vault Store
//!
//! The vault owns the master seed and every key derived from it. On disk it
//! is three files under one root:
//!
//! ```text
//! vault.enc     [u32 BE header len][KdfHeader JSON][nonce][AES-GCM(VaultState)]
//! recovery.enc  [u32 BE header len][KdfHeader JSON][nonce][AES-GCM(mnemonic)]
//! history.log   [nonce][AES-GCM(events)]
//! ```
//!
//! All three are sealed with one AES key, derived from the passphrase with
//! Argon2id once per `open`. The header (salt and costs) is written once at
//! creation and reused for every later write, so the slow KDF never runs on
//! the hot path.
//!
//! ## Self-heal
//!
//! `open` rebuilds the key set when the body cannot be trusted:
//!
//! - the body decrypts but its checksum is wrong, or
//! - the body fails authentication (flipped bits, truncation, a missing
//!   file) but the recovery sidecar still opens.
//!
//! Coordinates and DIDs come back from the audit log, key material comes
//! back from the mnemonic. Without a mnemonic there is nothing to heal
//! from and `open` fails with [`VaultError::VaultIntegrity`].
//!
//! The sidecar keeps its own copy of the KDF header. If the body's header
//! was damaged the sidecar's copy is used to derive the key, and the heal
//! rewrites the body under it. A history that no longer decrypts is set
//! aside rather than blocking an intact body.
//!
//! ## Concurrency
//!
//! One writer per root, enforced by [`WriterLock`]. Inside the process a
//! `parking_lot::Mutex` serialises every operation, so a `Vault` can sit in
//! an `Arc` and be shared freely.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::config::{RotationPolicy, VaultConfig, AES_KEY_LENGTH, HEADER_LENGTH_PREFIX};
use crate::crypto::encryption::{decrypt, encrypt};
use crate::crypto::hash::{canonical_json, canonical_json_secret, sha256_hex};
use crate::crypto::kdf::KdfHeader;
use crate::crypto::keys::{EchoPublicKey, EchoSignature};
use crate::crypto::secret::SecretString;
use crate::error::{Result, VaultError};
use crate::identity::derivation::{derive, Chain, DerivationPath, MasterSeed};
use crate::identity::did::EchoDid;
use crate::vault::audit::{AuditLog, EventKind, EventMetadata, VaultEvent};
use crate::vault::lock::{write_atomic, WriterLock};
use crate::vault::record::{KeyMetadata, KeyRecord, VaultState, KEY_METADATA_VERSION};

/// Resolves a DID to its public key. Used wherever a signature made by
/// someone else has to be checked.
pub type KeyResolver = Arc<dyn Fn(&str) -> Option<EchoPublicKey> + Send + Sync>;

/// Origin recorded when healing cannot find one.
const UNKNOWN_ORIGIN: &str = "unknown";

// ---------------------------------------------------------------------------
// KeyRequest
// ---------------------------------------------------------------------------

/// Which key to ensure or rotate, and who is asking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRequest {
    pub chain: Chain,
    pub account: u32,
    pub index: u32,
    pub change: u32,
    pub origin: String,
    /// Overrides [`VaultConfig::platform`] for this key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
}

impl KeyRequest {
    /// External chain (`change = 0`), origin `"local"`.
    pub fn new(chain: Chain, account: u32, index: u32) -> Self {
        Self {
            chain,
            account,
            index,
            change: 0,
            origin: "local".to_string(),
            platform: None,
        }
    }

    pub fn with_change(mut self, change: u32) -> Self {
        self.change = change;
        self
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = origin.into();
        self
    }

    pub fn with_platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = Some(platform.into());
        self
    }

    pub fn path(&self) -> Result<DerivationPath> {
        DerivationPath::new(self.chain, self.account, self.change, self.index)
    }
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// Sealed mnemonic stored in `recovery.enc`.
#[derive(Serialize, Deserialize)]
struct RecoveryRecord {
    mnemonic: SecretString,
    created_at: DateTime<Utc>,
}

fn encode_envelope(header: &KdfHeader, sealed: &[u8]) -> Result<Vec<u8>> {
    let header_bytes = canonical_json(header)?;
    let header_len = u32::try_from(header_bytes.len())
        .map_err(|_| VaultError::MalformedVaultFile("header too large".into()))?;
    let mut out = Vec::with_capacity(HEADER_LENGTH_PREFIX + header_bytes.len() + sealed.len());
    out.extend_from_slice(&header_len.to_be_bytes());
    out.extend_from_slice(&header_bytes);
    out.extend_from_slice(sealed);
    Ok(out)
}

fn decode_envelope(bytes: &[u8]) -> Result<(KdfHeader, &[u8])> {
    if bytes.len() < HEADER_LENGTH_PREFIX {
        return Err(VaultError::MalformedVaultFile("truncated header length".into()));
    }
    let (prefix, rest) = bytes.split_at(HEADER_LENGTH_PREFIX);
    let mut len_bytes = [0u8; HEADER_LENGTH_PREFIX];
    len_bytes.copy_from_slice(prefix);
    let header_len = u32::from_be_bytes(len_bytes) as usize;
    if rest.len() < header_len {
        return Err(VaultError::MalformedVaultFile("truncated header".into()));
    }
    let (header_bytes, sealed) = rest.split_at(header_len);
    let header: KdfHeader = serde_json::from_slice(header_bytes)
        .map_err(|e| VaultError::MalformedVaultFile(format!("header: {e}")))?;
    Ok((header, sealed))
}

/// Read and split an envelope file. `None` when the file is missing or its
/// header is unreadable.
fn read_envelope(path: &Path) -> Option<(KdfHeader, Vec<u8>)> {
    let bytes = fs::read(path).ok()?;
    match decode_envelope(&bytes) {
        Ok((header, sealed)) => Some((header, sealed.to_vec())),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "unreadable vault envelope");
            None
        }
    }
}

/// Rename `path` to `<path>.<suffix>` so a damaged file is kept for
/// inspection rather than overwritten.
fn set_aside(path: &Path, suffix: &str) -> Result<()> {
    let mut aside = path.as_os_str().to_os_string();
    aside.push(".");
    aside.push(suffix);
    fs::rename(path, &aside)?;
    Ok(())
}

/// Try the body under `key`.
fn inspect_body(
    key: &[u8; AES_KEY_LENGTH],
    body: Option<&(KdfHeader, Vec<u8>)>,
) -> Result<BodyStatus> {
    let Some((_, sealed)) = body else {
        return Ok(BodyStatus::Missing);
    };
    let Ok(plaintext) = decrypt(key, sealed) else {
        return Ok(BodyStatus::Rejected);
    };
    let status = match VaultState::from_bytes(&plaintext) {
        Err(e) => {
            warn!(error = %e, "vault body decrypted but did not parse");
            BodyStatus::Garbled
        }
        Ok(state) if state.verify_checksum()? => BodyStatus::Intact(state),
        Ok(state) => BodyStatus::ChecksumMismatch(state),
    };
    Ok(status)
}

/// What `open` found in the body before deciding whether to heal.
enum BodyStatus {
    Intact(VaultState),
    ChecksumMismatch(VaultState),
    /// No file, or no readable header.
    Missing,
    /// Failed AEAD authentication.
    Rejected,
    /// Authenticated, but not a vault state.
    Garbled,
}

// ---------------------------------------------------------------------------
// Vault
// ---------------------------------------------------------------------------

struct VaultInner {
    state: VaultState,
    audit: AuditLog,
}

/// An unlocked vault.
///
/// ```no_run
/// use echo_identity::config::{KdfParams, VaultConfig};
/// use echo_identity::identity::derivation::Chain;
/// use echo_identity::vault::{KeyRequest, Vault};
///
/// let config = VaultConfig::new("/tmp/echo-vault").with_kdf(KdfParams::for_testing());
/// let vault = Vault::open(config, "correct horse battery staple").unwrap();
/// let key = vault.ensure_key(&KeyRequest::new(Chain::Bitcoin, 0, 0)).unwrap();
/// let sig = vault.sign(&key.did.to_string(), b"hello").unwrap();
/// assert!(key.public_key().verify(b"hello", &sig));
/// ```
pub struct Vault {
    config: VaultConfig,
    header: KdfHeader,
    key: Zeroizing<[u8; AES_KEY_LENGTH]>,
    inner: Mutex<VaultInner>,
    healed_on_open: bool,
    _lock: WriterLock,
}

impl Vault {
    /// Unlock the vault under `config.root`, creating it on first use.
    pub fn open(config: VaultConfig, passphrase: &str) -> Result<Self> {
        fs::create_dir_all(config.root())?;
        let lock = WriterLock::acquire(config.lock_path())?;

        let vault_exists = config.vault_path().exists();
        let sidecar_exists = config.recovery_path().exists();
        if !vault_exists && !sidecar_exists {
            return Self::create(config, passphrase, lock);
        }
        Self::unlock(config, passphrase, lock)
    }

    fn create(config: VaultConfig, passphrase: &str, lock: WriterLock) -> Result<Self> {
        let header = KdfHeader::generate(&config.kdf);
        let key = header.derive_key(passphrase.as_bytes())?;
        let seed = MasterSeed::generate();
        let state = VaultState::new(&seed, config.kdf)?;

        let history = config.history_path();
        if history.exists() {
            // Sealed under some other vault's key; unreadable from here.
            warn!(path = %history.display(), "moving aside audit history with no vault");
            set_aside(&history, "orphaned")?;
        }
        let audit = AuditLog::load(history, &key)?;

        let vault = Self {
            config,
            header,
            key,
            inner: Mutex::new(VaultInner { state, audit }),
            healed_on_open: false,
            _lock: lock,
        };
        vault.write_sidecar(&seed)?;
        {
            let inner = vault.inner.lock();
            vault.persist(&inner.state)?;
        }
        info!(root = %vault.config.root().display(), "vault created");
        Ok(vault)
    }

    fn unlock(config: VaultConfig, passphrase: &str, lock: WriterLock) -> Result<Self> {
        let body = read_envelope(&config.vault_path());
        let sidecar = read_envelope(&config.recovery_path());

        let mut header = match (&body, &sidecar) {
            (Some((header, _)), _) | (None, Some((header, _))) => header.clone(),
            (None, None) => {
                return Err(VaultError::VaultIntegrity(
                    "neither vault body nor recovery sidecar has a readable header".into(),
                ))
            }
        };
        let mut key = match header.derive_key(passphrase.as_bytes()) {
            Ok(key) => Some(key),
            Err(e) => {
                warn!(error = %e, "vault header parameters unusable");
                None
            }
        };
        let mut status = match &key {
            Some(key) => inspect_body(key, body.as_ref())?,
            None => BodyStatus::Rejected,
        };
        let mut header_repaired = false;

        // A damaged salt or cost in the body header derives the wrong key.
        // The sidecar carries its own copy of the header; try that before
        // blaming the passphrase.
        if matches!(status, BodyStatus::Rejected) {
            if let Some((sidecar_header, _)) = &sidecar {
                if *sidecar_header != header {
                    let sidecar_key = sidecar_header.derive_key(passphrase.as_bytes())?;
                    let retry = inspect_body(&sidecar_key, body.as_ref())?;
                    let sidecar_opens = !matches!(retry, BodyStatus::Rejected)
                        || Self::open_sidecar(&config, &sidecar_key, sidecar.as_ref()).is_ok();
                    if sidecar_opens {
                        warn!(
                            root = %config.root().display(),
                            "vault header disagrees with recovery sidecar, using sidecar header"
                        );
                        header = sidecar_header.clone();
                        key = Some(sidecar_key);
                        status = retry;
                        header_repaired = true;
                    }
                }
            }
        }
        let key = key.ok_or_else(|| {
            VaultError::VaultIntegrity("vault header is damaged and no sidecar header works".into())
        })?;

        let (state, heal) = match status {
            BodyStatus::Intact(state) if header_repaired => {
                let sidecar_seed = Self::open_sidecar(&config, &key, sidecar.as_ref())
                    .unwrap_or_else(|e| {
                        warn!(error = %e, "recovery sidecar unusable");
                        None
                    });
                let heal = HealInput {
                    reason: "header_damaged",
                    sidecar_seed,
                    body_keys_usable: true,
                };
                (state, Some(heal))
            }
            BodyStatus::Intact(state) => (state, None),
            BodyStatus::ChecksumMismatch(state) => {
                warn!(root = %config.root().display(), "vault checksum mismatch, self-healing");
                // The body authenticated, so the passphrase is right and a
                // bad sidecar is just more damage. Fall back to the body's
                // own mnemonic.
                let sidecar_seed = match Self::open_sidecar(&config, &key, sidecar.as_ref()) {
                    Ok(seed) => seed,
                    Err(e) => {
                        warn!(error = %e, "recovery sidecar unusable");
                        None
                    }
                };
                let heal = HealInput {
                    reason: "checksum_mismatch",
                    sidecar_seed,
                    body_keys_usable: true,
                };
                (state, Some(heal))
            }
            damaged @ (BodyStatus::Missing | BodyStatus::Rejected | BodyStatus::Garbled) => {
                let body_authenticated = matches!(damaged, BodyStatus::Garbled);
                let seed = match Self::open_sidecar(&config, &key, sidecar.as_ref()) {
                    Ok(Some(seed)) => seed,
                    Ok(None) => {
                        return Err(VaultError::VaultIntegrity(
                            "vault body unreadable and no recovery sidecar present".into(),
                        ))
                    }
                    Err(VaultError::InvalidPassphrase) if body_authenticated => {
                        return Err(VaultError::VaultIntegrity(
                            "vault body and recovery sidecar are both corrupt".into(),
                        ))
                    }
                    Err(e) => return Err(e),
                };
                warn!(
                    root = %config.root().display(),
                    "vault body unusable, self-healing from recovery sidecar"
                );
                let placeholder = VaultState::new(&seed, header.params())?;
                let heal = HealInput {
                    reason: "body_unreadable",
                    sidecar_seed: Some(seed),
                    body_keys_usable: false,
                };
                (placeholder, Some(heal))
            }
        };

        let audit = match AuditLog::load(config.history_path(), &key) {
            Ok(audit) => audit,
            // Healing replays the history; without it DIDs cannot come back.
            Err(e) if heal.is_some() => {
                return Err(VaultError::VaultIntegrity(format!(
                    "audit history unreadable during self-heal: {e}"
                )))
            }
            Err(e) => {
                warn!(error = %e, "audit history unreadable, starting a fresh log");
                set_aside(&config.history_path(), "damaged")?;
                let mut audit = AuditLog::load(config.history_path(), &key)?;
                // Re-record the active keys so a later heal can still find
                // their DIDs.
                for record in &state.keys {
                    audit.record(generated_event(record))?;
                }
                audit
            }
        };

        let mut vault = Self {
            config,
            header,
            key,
            inner: Mutex::new(VaultInner { state, audit }),
            healed_on_open: false,
            _lock: lock,
        };

        if let Some(heal) = heal {
            vault.heal(heal)?;
            vault.healed_on_open = true;
        }

        let keys = vault.inner.lock().state.keys.len();
        info!(
            root = %vault.config.root().display(),
            keys,
            healed = vault.healed_on_open,
            "vault unlocked"
        );
        Ok(vault)
    }

    /// Decrypt the recovery sidecar.
    ///
    /// `Ok(None)` when there is no sidecar, `Err(InvalidPassphrase)` when it
    /// does not authenticate.
    fn open_sidecar(
        config: &VaultConfig,
        key: &[u8; AES_KEY_LENGTH],
        sidecar: Option<&(KdfHeader, Vec<u8>)>,
    ) -> Result<Option<MasterSeed>> {
        let Some((_, sealed)) = sidecar else {
            debug!(path = %config.recovery_path().display(), "no recovery sidecar");
            return Ok(None);
        };
        let plaintext = decrypt(key, sealed).map_err(|_| VaultError::InvalidPassphrase)?;
        let record: RecoveryRecord = serde_json::from_slice(&plaintext)
            .map_err(|e| VaultError::MalformedVaultFile(format!("recovery sidecar: {e}")))?;
        Ok(Some(MasterSeed::from_phrase(record.mnemonic.expose())?))
    }

    // -----------------------------------------------------------------------
    // Self-heal
    // -----------------------------------------------------------------------

    /// Rebuild the active key set from the seed and the audit log, then
    /// persist it and record a `vault.healed` event.
    fn heal(&mut self, input: HealInput) -> Result<()> {
        let inner = self.inner.get_mut();

        // Trust order for the seed: the independently sealed sidecar, then
        // the mnemonic inside a checksum-mismatched body.
        let seed = match input.sidecar_seed {
            Some(seed) => seed,
            None => match &inner.state.mnemonic {
                Some(phrase) => MasterSeed::from_phrase(phrase.expose()).map_err(|_| {
                    VaultError::VaultIntegrity("stored mnemonic is corrupt".into())
                })?,
                None => {
                    return Err(VaultError::VaultIntegrity(
                        "no mnemonic available to re-derive keys".into(),
                    ))
                }
            },
        };

        // Coordinates surviving in the damaged body, then the audit replay
        // on top. The latest `key.generated` names the active DID.
        let mut slots: BTreeMap<DerivationPath, (EchoDid, KeyMetadata)> = BTreeMap::new();
        if input.body_keys_usable {
            for record in &inner.state.keys {
                slots.insert(record.path, (record.did.clone(), record.metadata.clone()));
            }
        }
        for (path, event) in inner.audit.latest_generated_by_path() {
            let Some(did) = event.did.clone() else { continue };
            let fallback = slots.remove(&path).map(|(_, meta)| meta);
            let metadata = KeyMetadata {
                version: KEY_METADATA_VERSION,
                origin: event
                    .metadata
                    .origin
                    .clone()
                    .or_else(|| fallback.as_ref().map(|m| m.origin.clone()))
                    .unwrap_or_else(|| UNKNOWN_ORIGIN.to_string()),
                platform: event
                    .metadata
                    .platform
                    .clone()
                    .or_else(|| fallback.as_ref().map(|m| m.platform.clone()))
                    .unwrap_or_else(|| self.config.platform.clone()),
                created_at: event.timestamp,
                extra: fallback.map(|m| m.extra).unwrap_or_default(),
            };
            slots.insert(path, (did, metadata));
        }

        let mut keys = Vec::with_capacity(slots.len());
        for (path, (did, metadata)) in slots {
            let derived = derive(&seed, &path).map_err(|e| {
                VaultError::VaultIntegrity(format!("cannot re-derive {path}: {e}"))
            })?;
            keys.push(KeyRecord::from_derived(did, derived, metadata)?);
        }
        keys.sort_by(|a, b| {
            a.metadata
                .created_at
                .cmp(&b.metadata.created_at)
                .then(a.path.cmp(&b.path))
        });

        let mut state = VaultState::new(&seed, self.header.params())?;
        state.keys = keys;
        state.seal()?;

        let recovered = state.keys.len();
        persist_state(&self.config, &self.header, &self.key, &state)?;
        write_sidecar_file(&self.config, &self.header, &self.key, &seed)?;
        inner.state = state;

        inner.audit.record(VaultEvent::new(EventKind::VaultHealed).with_metadata(
            EventMetadata {
                recovered_keys: Some(recovered),
                reason: Some(input.reason.to_string()),
                ..Default::default()
            },
        ))?;
        info!(recovered_keys = recovered, reason = input.reason, "vault self-heal complete");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    fn persist(&self, state: &VaultState) -> Result<()> {
        persist_state(&self.config, &self.header, &self.key, state)
    }

    fn write_sidecar(&self, seed: &MasterSeed) -> Result<()> {
        write_sidecar_file(&self.config, &self.header, &self.key, seed)
    }

    // -----------------------------------------------------------------------
    // Keys
    // -----------------------------------------------------------------------

    /// Return the record at the request's path, deriving and persisting it
    /// first if the vault does not hold it yet. Audits `key.generated` only
    /// when a key is created.
    pub fn ensure_key(&self, request: &KeyRequest) -> Result<KeyRecord> {
        let path = request.path()?;
        let mut inner = self.inner.lock();

        if let Some(existing) = inner.state.find(&path) {
            debug!(path = %path, did = %existing.did, "ensure_key hit");
            return Ok(existing.clone());
        }

        let record = self.derive_record(&inner.state, &path, request)?;
        self.commit_new_record(&mut inner, record.clone())?;
        if let Err(e) = inner.audit.record(generated_event(&record)) {
            self.undo_commit(&mut inner, &path, None);
            return Err(e);
        }

        debug!(path = %path, did = %record.did, origin = %request.origin, "ensure_key derived new key");
        Ok(record)
    }

    /// Re-issue the key at the request's path under a fresh DID.
    ///
    /// Under [`RotationPolicy::ResaltIdentity`] the key material is
    /// re-derived from the same path, so the public key is unchanged and
    /// only the DID salt moves. Audits `key.generated` for the new DID and
    /// `key.rotated` linking it to the old one. If the audit write fails the
    /// previous record is restored on disk, so a later heal never replays a
    /// DID the log does not know about.
    pub fn rotate(&self, request: &KeyRequest) -> Result<KeyRecord> {
        let path = request.path()?;
        let mut inner = self.inner.lock();

        let previous = inner.state.remove(&path);
        let record = match self.config.rotation {
            RotationPolicy::ResaltIdentity => self.derive_record(&inner.state, &path, request)?,
        };

        if let Err(e) = self.commit_new_record(&mut inner, record.clone()) {
            if let Some(previous) = previous {
                inner.state.keys.push(previous);
                inner.state.seal()?;
            }
            return Err(e);
        }

        let mut rotated = VaultEvent::for_key(EventKind::KeyRotated, &record.did);
        rotated.metadata = EventMetadata {
            origin: Some(request.origin.clone()),
            previous_did: previous.as_ref().map(|p| p.did.clone()),
            ..Default::default()
        };
        if let Err(e) = inner.audit.record_all([generated_event(&record), rotated]) {
            self.undo_commit(&mut inner, &path, previous);
            return Err(e);
        }

        info!(
            path = %path,
            did = %record.did,
            previous = ?previous.as_ref().map(|p| p.did.to_string()),
            "key rotated"
        );
        Ok(record)
    }

    fn derive_record(
        &self,
        state: &VaultState,
        path: &DerivationPath,
        request: &KeyRequest,
    ) -> Result<KeyRecord> {
        let seed = state.master_seed()?;
        let derived = derive(&seed, path)?;
        let platform = request
            .platform
            .clone()
            .unwrap_or_else(|| self.config.platform.clone());
        let metadata = KeyMetadata::new(request.origin.clone(), platform);
        KeyRecord::from_derived(EchoDid::new(path), derived, metadata)
    }

    /// Append `record`, reseal, persist. Rolls the in-memory state back if
    /// the write fails.
    fn commit_new_record(&self, inner: &mut VaultInner, record: KeyRecord) -> Result<()> {
        inner.state.keys.push(record);
        inner.state.seal()?;
        if let Err(e) = self.persist(&inner.state) {
            inner.state.keys.pop();
            inner.state.seal()?;
            return Err(e);
        }
        Ok(())
    }

    /// Drop the record just committed at `path`, put `restore` back in its
    /// place and persist. Failures are logged; the caller is already
    /// returning an error.
    fn undo_commit(&self, inner: &mut VaultInner, path: &DerivationPath, restore: Option<KeyRecord>) {
        inner.state.remove(path);
        if let Some(previous) = restore {
            inner.state.keys.push(previous);
        }
        let undone = inner.state.seal().and_then(|()| self.persist(&inner.state));
        if let Err(e) = undone {
            warn!(path = %path, error = %e, "could not roll back vault write after audit failure");
        }
    }

    /// Sign `message` with the key behind `did`. Audits `key.signed` with
    /// the message digest.
    pub fn sign(&self, did: &str, message: &[u8]) -> Result<EchoSignature> {
        let mut inner = self.inner.lock();
        let record = inner
            .state
            .find_by_did(did)
            .ok_or_else(|| VaultError::UnknownKey(did.to_string()))?;

        let signature = record.keypair()?.sign(message);
        let event = VaultEvent::for_key(EventKind::KeySigned, &record.did).with_metadata(
            EventMetadata {
                message_digest: Some(sha256_hex(message)),
                ..Default::default()
            },
        );
        inner.audit.record(event)?;

        debug!(did, bytes = message.len(), "message signed");
        Ok(signature)
    }

    pub fn public_key(&self, did: &str) -> Result<EchoPublicKey> {
        self.inner
            .lock()
            .state
            .find_by_did(did)
            .map(|r| r.public_key().clone())
            .ok_or_else(|| VaultError::UnknownKey(did.to_string()))
    }

    /// Resolver over this vault's active keys.
    pub fn key_resolver(self: &Arc<Self>) -> KeyResolver {
        let vault = Arc::clone(self);
        Arc::new(move |did: &str| vault.public_key(did).ok())
    }

    pub fn list_keys(&self) -> Vec<KeyRecord> {
        self.inner.lock().state.keys.clone()
    }

    pub fn get_key(&self, path: &DerivationPath) -> Option<KeyRecord> {
        self.inner.lock().state.find(path).cloned()
    }

    pub fn find_by_did(&self, did: &str) -> Option<KeyRecord> {
        self.inner.lock().state.find_by_did(did).cloned()
    }

    /// Decrypt the audit history from disk.
    pub fn export_history(&self) -> Result<Vec<VaultEvent>> {
        let _guard = self.inner.lock();
        let log = AuditLog::load(self.config.history_path(), &self.key)?;
        Ok(log.events().to_vec())
    }

    /// The BIP-39 recovery phrase. Handle with care.
    pub fn mnemonic_phrase(&self) -> Option<Zeroizing<String>> {
        self.inner
            .lock()
            .state
            .mnemonic
            .as_ref()
            .map(|m| Zeroizing::new(m.expose().to_string()))
    }

    pub fn root(&self) -> &Path {
        self.config.root()
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    /// Whether `open` had to run self-heal.
    pub fn healed_on_open(&self) -> bool {
        self.healed_on_open
    }
}

impl fmt::Debug for Vault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vault")
            .field("root", &self.config.root())
            .field("healed_on_open", &self.healed_on_open)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

struct HealInput {
    reason: &'static str,
    sidecar_seed: Option<MasterSeed>,
    body_keys_usable: bool,
}

fn generated_event(record: &KeyRecord) -> VaultEvent {
    VaultEvent::for_key(EventKind::KeyGenerated, &record.did)
        .with_timestamp(record.metadata.created_at)
        .with_metadata(EventMetadata {
            origin: Some(record.metadata.origin.clone()),
            platform: Some(record.metadata.platform.clone()),
            ..Default::default()
        })
}

fn persist_state(
    config: &VaultConfig,
    header: &KdfHeader,
    key: &[u8; AES_KEY_LENGTH],
    state: &VaultState,
) -> Result<()> {
    let plaintext = state.to_canonical_bytes()?;
    let sealed = encrypt(key, &plaintext)?;
    write_atomic(&config.vault_path(), &encode_envelope(header, &sealed)?)
}

fn write_sidecar_file(
    config: &VaultConfig,
    header: &KdfHeader,
    key: &[u8; AES_KEY_LENGTH],
    seed: &MasterSeed,
) -> Result<()> {
    let Some(phrase) = seed.phrase() else {
        warn!("master seed has no mnemonic, recovery sidecar not written");
        return Ok(());
    };
    let record = RecoveryRecord {
        mnemonic: SecretString::new(phrase.to_string()),
        created_at: Utc::now(),
    };
    let plaintext = canonical_json_secret(&record)?;
    let sealed = encrypt(key, &plaintext)?;
    write_atomic(&config.recovery_path(), &encode_envelope(header, &sealed)?)
}
