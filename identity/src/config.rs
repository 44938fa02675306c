//! # Vault Configuration & Constants
//!
//! Every magic number in the identity layer lives here, next to the one
//! struct that callers hand to [`Vault::open`](crate::vault::Vault::open).
//!
//! There is deliberately no "default vault directory" and no environment
//! lookup. A vault lives exactly where the caller says it lives. Implicit
//! process-wide paths are how two test suites end up sharing a keystore.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Identity Format
// ---------------------------------------------------------------------------

/// DID method for identities minted by this vault: `did:echo:...`.
pub const DID_METHOD: &str = "echo";

/// Number of random bytes in a DID salt. Encoded with base58, so a DID
/// carries roughly 11 characters of salt.
pub const DID_SALT_LENGTH: usize = 8;

/// BIP-44 purpose field. Hardened, always.
pub const BIP44_PURPOSE: u32 = 44;

/// BIP-39 mnemonic length for fresh vaults.
pub const MNEMONIC_WORD_COUNT: usize = 24;

// ---------------------------------------------------------------------------
// Cryptographic Parameters
// ---------------------------------------------------------------------------

/// ECDSA over secp256k1, RFC 6979 nonces, SHA-256 prehash.
pub const SIGNING_ALGORITHM: &str = "ECDSA-secp256k1-SHA256";

/// secp256k1 private scalar length in bytes.
pub const PRIVATE_KEY_LENGTH: usize = 32;

/// Compressed SEC1 public key length (0x02/0x03 prefix + x coordinate).
pub const PUBLIC_KEY_LENGTH: usize = 33;

/// Compact `r || s` signature length.
pub const SIGNATURE_LENGTH: usize = 64;

/// AES-256-GCM key length in bytes.
pub const AES_KEY_LENGTH: usize = 32;

/// AES-256-GCM nonce length. Twelve bytes, fresh from the OS RNG per write.
pub const AES_NONCE_LENGTH: usize = 12;

/// AES-256-GCM authentication tag length in bytes.
pub const AES_TAG_LENGTH: usize = 16;

/// SHA-256 output length.
pub const HASH_OUTPUT_LENGTH: usize = 32;

/// Random salt length fed to Argon2id alongside the passphrase.
pub const KDF_SALT_LENGTH: usize = 32;

/// Width of the big-endian header length prefix in the vault file.
pub const HEADER_LENGTH_PREFIX: usize = 4;

// ---------------------------------------------------------------------------
// Attestation Parameters
// ---------------------------------------------------------------------------

/// Namespace bound into every capability credential payload.
pub const CAPABILITY_NAMESPACE: &str = "echo.capability";

/// Domain separator of the facade's proof pipeline.
pub const ATTESTATION_PROOF_DOMAIN: &str = "echo.zk-attestation";

/// Default telemetry topic used by the stealth channel.
pub const DEFAULT_COMMAND_TOPIC: &str = "telemetry";

/// Default telemetry hint when the caller does not pick one.
pub const DEFAULT_COMMAND_HINT: &str = "node-health";

/// How many recent disclosures the facade remembers for snapshots.
pub const DISCLOSURE_HISTORY: usize = 16;

/// How many recent capability grants the facade remembers.
pub const CAPABILITY_HISTORY: usize = 8;

/// How many recent self-attested upgrades the facade remembers.
pub const UPGRADE_HISTORY: usize = 4;

/// Proof nodes included in a pipeline snapshot.
pub const PROOF_SNAPSHOT_LIMIT: usize = 6;

// ---------------------------------------------------------------------------
// File Names
// ---------------------------------------------------------------------------

/// Encrypted vault body.
pub const DEFAULT_VAULT_FILE: &str = "vault.enc";

/// Encrypted audit history.
pub const DEFAULT_HISTORY_FILE: &str = "history.log";

/// Recovery sidecar: the mnemonic sealed under the passphrase-derived key.
pub const DEFAULT_RECOVERY_FILE: &str = "recovery.enc";

/// Writer lock held for the lifetime of an open vault.
pub const DEFAULT_LOCK_FILE: &str = "vault.lock";

// ---------------------------------------------------------------------------
// KDF parameters
// ---------------------------------------------------------------------------

/// Argon2id cost parameters.
///
/// These are persisted in the plaintext vault header next to the salt, so a
/// vault created with one set of costs can always be reopened even after the
/// defaults change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Number of passes over memory.
    pub time_cost: u32,
    /// Memory in KiB.
    pub memory_cost: u32,
    /// Lanes.
    pub parallelism: u32,
    /// Output length in bytes. Must equal [`AES_KEY_LENGTH`].
    pub hash_len: u32,
}

impl KdfParams {
    /// Cheaper profile for interactive unlocks on small devices.
    pub fn interactive() -> Self {
        Self {
            time_cost: 3,
            memory_cost: 65_536,
            parallelism: 4,
            hash_len: AES_KEY_LENGTH as u32,
        }
    }

    /// 1 MiB, single pass. Only for tests and benchmarks.
    pub fn for_testing() -> Self {
        Self {
            time_cost: 1,
            memory_cost: 1_024,
            parallelism: 1,
            hash_len: AES_KEY_LENGTH as u32,
        }
    }
}

impl Default for KdfParams {
    /// 4 passes over 100 MiB with 8 lanes. Slow on purpose; runs once per
    /// process, not per operation.
    fn default() -> Self {
        Self {
            time_cost: 4,
            memory_cost: 102_400,
            parallelism: 8,
            hash_len: AES_KEY_LENGTH as u32,
        }
    }
}

// ---------------------------------------------------------------------------
// Rotation
// ---------------------------------------------------------------------------

/// What `rotate` changes.
///
/// Only one policy exists today. Rotation re-derives the same key material
/// for the path and mints a fresh DID salt, so the public identity changes
/// while signatures stay verifiable under the same curve point. Callers who
/// need new key material move to the next `index`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationPolicy {
    #[default]
    ResaltIdentity,
}

// ---------------------------------------------------------------------------
// VaultConfig
// ---------------------------------------------------------------------------

/// Everything [`Vault::open`](crate::vault::Vault::open) needs to know,
/// passed explicitly.
///
/// ```
/// use echo_identity::config::{KdfParams, VaultConfig};
///
/// let config = VaultConfig::new("/tmp/echo-vault")
///     .with_kdf(KdfParams::for_testing())
///     .with_platform("ci-runner");
/// assert!(config.vault_path().ends_with("vault.enc"));
/// ```
#[derive(Debug, Clone)]
pub struct VaultConfig {
    /// Directory holding the vault, history, sidecar and lock files.
    pub root: PathBuf,
    /// KDF costs for *new* vaults. Existing vaults use their header.
    pub kdf: KdfParams,
    pub vault_file: String,
    pub history_file: String,
    pub recovery_file: String,
    pub lock_file: String,
    /// Platform label stamped on key metadata when the request has none.
    pub platform: String,
    pub rotation: RotationPolicy,
}

impl VaultConfig {
    /// Config rooted at `root` with production KDF costs.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            kdf: KdfParams::default(),
            vault_file: DEFAULT_VAULT_FILE.to_string(),
            history_file: DEFAULT_HISTORY_FILE.to_string(),
            recovery_file: DEFAULT_RECOVERY_FILE.to_string(),
            lock_file: DEFAULT_LOCK_FILE.to_string(),
            platform: default_platform(),
            rotation: RotationPolicy::default(),
        }
    }

    pub fn with_kdf(mut self, kdf: KdfParams) -> Self {
        self.kdf = kdf;
        self
    }

    pub fn with_history_file(mut self, name: impl Into<String>) -> Self {
        self.history_file = name.into();
        self
    }

    pub fn with_platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = platform.into();
        self
    }

    pub fn with_rotation(mut self, rotation: RotationPolicy) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn vault_path(&self) -> PathBuf {
        self.root.join(&self.vault_file)
    }

    pub fn history_path(&self) -> PathBuf {
        self.root.join(&self.history_file)
    }

    pub fn recovery_path(&self) -> PathBuf {
        self.root.join(&self.recovery_file)
    }

    pub fn lock_path(&self) -> PathBuf {
        self.root.join(&self.lock_file)
    }
}

/// `<os>-<arch>`, computed from compile-time constants. Not an environment
/// lookup, so it is stable for the life of the binary.
pub fn default_platform() -> String {
    format!("{}-{}", std::env::consts::OS, std::env::consts::ARCH)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crypto_parameter_sizes() {
        assert_eq!(PRIVATE_KEY_LENGTH, 32);
        assert_eq!(PUBLIC_KEY_LENGTH, 33);
        assert_eq!(SIGNATURE_LENGTH, 64);
        assert_eq!(AES_KEY_LENGTH, 32);
        assert_eq!(AES_NONCE_LENGTH, 12);
        assert_eq!(HASH_OUTPUT_LENGTH, 32);
    }

    #[test]
    fn test_default_kdf_matches_header_contract() {
        let params = KdfParams::default();
        assert_eq!(params.time_cost, 4);
        assert_eq!(params.memory_cost, 102_400);
        assert_eq!(params.parallelism, 8);
        assert_eq!(params.hash_len as usize, AES_KEY_LENGTH);
    }

    #[test]
    fn test_testing_profile_is_cheaper() {
        let fast = KdfParams::for_testing();
        let slow = KdfParams::default();
        assert!(fast.memory_cost < slow.memory_cost);
        assert!(fast.time_cost <= slow.time_cost);
        assert!(KdfParams::interactive().memory_cost < slow.memory_cost);
    }

    #[test]
    fn test_config_paths_are_rooted() {
        let config = VaultConfig::new("/var/lib/echo").with_history_file("events.log");
        assert_eq!(config.vault_path(), PathBuf::from("/var/lib/echo/vault.enc"));
        assert_eq!(config.history_path(), PathBuf::from("/var/lib/echo/events.log"));
        assert_eq!(config.recovery_path(), PathBuf::from("/var/lib/echo/recovery.enc"));
        assert_eq!(config.lock_path(), PathBuf::from("/var/lib/echo/vault.lock"));
    }

    #[test]
    fn test_default_platform_is_not_empty() {
        let platform = default_platform();
        assert!(platform.contains('-'));
    }

    #[test]
    fn test_rotation_policy_serde_name() {
        let json = serde_json::to_string(&RotationPolicy::ResaltIdentity).unwrap();
        assert_eq!(json, "\"resalt_identity\"");
    }
}
