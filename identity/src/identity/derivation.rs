//! # Hierarchical Key Derivation
//!
//! One master seed, many keys. Every vault identity is a BIP-44 leaf:
//!
//! ```text
//! mnemonic (24 words, BIP-39)
//!     -> PBKDF2 -> 64-byte seed
//!     -> BIP-32 over secp256k1
//!     -> m / 44' / coin' / account' / change / index
//! ```
//!
//! [`derive`] is a pure function of `(seed, path)`. Calling it twice gives
//! the same keypair, and two different paths give keys that share nothing
//! an attacker can use. That is the whole reason self-heal works: lose the
//! vault body, keep the mnemonic, and every key comes back bit for bit.
//!
//! The mnemonic is the only thing a human ever needs to write down.

use std::fmt;
use std::str::FromStr;

use bip32::{DerivationPath as Bip32Path, Language, Mnemonic, Prefix, XPrv};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::config::{BIP44_PURPOSE, PUBLIC_KEY_LENGTH};
use crate::crypto::keys::{EchoKeypair, EchoPublicKey};
use crate::crypto::secret::{SecretBytes, SecretString};
use crate::error::{Result, VaultError};

/// First hardened child index. Account and index must stay below it.
const HARDENED_OFFSET: u32 = 0x8000_0000;

// ---------------------------------------------------------------------------
// Chain
// ---------------------------------------------------------------------------

/// Chains the vault knows the BIP-44 coin type for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Chain {
    Bitcoin,
    Ethereum,
    Litecoin,
    Dogecoin,
}

impl Chain {
    /// SLIP-44 registered coin type.
    pub fn coin_type(&self) -> u32 {
        match self {
            Chain::Bitcoin => 0,
            Chain::Litecoin => 2,
            Chain::Dogecoin => 3,
            Chain::Ethereum => 60,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Chain::Bitcoin => "bitcoin",
            Chain::Ethereum => "ethereum",
            Chain::Litecoin => "litecoin",
            Chain::Dogecoin => "dogecoin",
        }
    }

    /// Case-insensitive lookup by name.
    pub fn parse(name: &str) -> Result<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "bitcoin" => Ok(Chain::Bitcoin),
            "ethereum" => Ok(Chain::Ethereum),
            "litecoin" => Ok(Chain::Litecoin),
            "dogecoin" => Ok(Chain::Dogecoin),
            _ => Err(VaultError::UnsupportedChain(name.to_string())),
        }
    }
}

impl FromStr for Chain {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self> {
        Chain::parse(s)
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// DerivationPath
// ---------------------------------------------------------------------------

/// Coordinates of one vault key. Unique per vault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DerivationPath {
    pub chain: Chain,
    pub account: u32,
    pub change: u32,
    pub index: u32,
}

impl DerivationPath {
    /// Build and validate a path.
    pub fn new(chain: Chain, account: u32, change: u32, index: u32) -> Result<Self> {
        let path = Self {
            chain,
            account,
            change,
            index,
        };
        path.validate()?;
        Ok(path)
    }

    /// `change` is 0 (external) or 1 (internal); account and index must fit
    /// below the hardened offset.
    pub fn validate(&self) -> Result<()> {
        if self.change > 1 {
            return Err(VaultError::Derivation(format!(
                "change must be 0 or 1, got {}",
                self.change
            )));
        }
        if self.account >= HARDENED_OFFSET || self.index >= HARDENED_OFFSET {
            return Err(VaultError::Derivation(
                "account and index must be below 2^31".into(),
            ));
        }
        Ok(())
    }

    /// `m/44'/<coin>'/<account>'/<change>/<index>`
    pub fn to_bip44_string(&self) -> String {
        format!(
            "m/{}'/{}'/{}'/{}/{}",
            BIP44_PURPOSE,
            self.chain.coin_type(),
            self.account,
            self.change,
            self.index
        )
    }
}

impl fmt::Display for DerivationPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_bip44_string())
    }
}

// ---------------------------------------------------------------------------
// MasterSeed
// ---------------------------------------------------------------------------

/// The vault's root secret.
///
/// Usually backed by a BIP-39 mnemonic. A seed restored from raw bytes has
/// no mnemonic, which also means it cannot be written to a recovery
/// sidecar.
#[derive(Clone)]
pub struct MasterSeed {
    mnemonic: Option<SecretString>,
    seed: SecretBytes,
}

impl MasterSeed {
    /// Fresh 24-word mnemonic from the OS RNG.
    pub fn generate() -> Self {
        let mnemonic = Mnemonic::random(OsRng, Language::English);
        Self::from_mnemonic(&mnemonic)
    }

    /// Restore from a BIP-39 phrase. The word list checksum is enforced.
    pub fn from_phrase(phrase: &str) -> Result<Self> {
        let mnemonic = Mnemonic::new(phrase.trim(), Language::English)
            .map_err(|e| VaultError::Derivation(format!("invalid mnemonic: {e}")))?;
        Ok(Self::from_mnemonic(&mnemonic))
    }

    /// Wrap raw seed bytes. BIP-32 accepts 16, 32 or 64 bytes.
    pub fn from_seed_bytes(bytes: &[u8]) -> Result<Self> {
        if ![16, 32, 64].contains(&bytes.len()) {
            return Err(VaultError::Derivation(format!(
                "seed must be 16, 32 or 64 bytes, got {}",
                bytes.len()
            )));
        }
        Ok(Self {
            mnemonic: None,
            seed: SecretBytes::from_slice(bytes),
        })
    }

    fn from_mnemonic(mnemonic: &Mnemonic) -> Self {
        let seed = mnemonic.to_seed("");
        Self {
            mnemonic: Some(SecretString::new(mnemonic.phrase().to_string())),
            seed: SecretBytes::from_slice(seed.as_bytes()),
        }
    }

    pub fn phrase(&self) -> Option<&str> {
        self.mnemonic.as_ref().map(|m| m.expose())
    }

    pub fn has_mnemonic(&self) -> bool {
        self.mnemonic.is_some()
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.seed.expose()
    }
}

impl fmt::Debug for MasterSeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MasterSeed")
            .field("mnemonic", &self.mnemonic.is_some())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Derivation
// ---------------------------------------------------------------------------

/// Output of [`derive`]: both halves of the leaf key plus its extended
/// forms.
#[derive(Clone)]
pub struct DerivedKey {
    pub path: DerivationPath,
    pub public_key_bytes: [u8; PUBLIC_KEY_LENGTH],
    pub private_key: SecretBytes,
    pub extended_public_key: String,
    pub extended_private_key: SecretString,
}

impl DerivedKey {
    pub fn public_key(&self) -> Result<EchoPublicKey> {
        Ok(EchoPublicKey::try_from_slice(&self.public_key_bytes)?)
    }

    pub fn keypair(&self) -> Result<EchoKeypair> {
        Ok(EchoKeypair::from_secret_bytes(self.private_key.expose())?)
    }
}

impl fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DerivedKey")
            .field("path", &self.path.to_bip44_string())
            .field("public_key", &hex::encode(self.public_key_bytes))
            .finish_non_exhaustive()
    }
}

/// Derive the leaf key at `path`. Pure and deterministic.
///
/// ```
/// use echo_identity::identity::derivation::{derive, Chain, DerivationPath, MasterSeed};
///
/// let seed = MasterSeed::from_seed_bytes(&[7u8; 64]).unwrap();
/// let path = DerivationPath::new(Chain::Bitcoin, 0, 0, 0).unwrap();
/// let a = derive(&seed, &path).unwrap();
/// let b = derive(&seed, &path).unwrap();
/// assert_eq!(a.public_key_bytes, b.public_key_bytes);
/// ```
pub fn derive(seed: &MasterSeed, path: &DerivationPath) -> Result<DerivedKey> {
    path.validate()?;

    let bip32_path: Bip32Path = path
        .to_bip44_string()
        .parse()
        .map_err(|e| VaultError::Derivation(format!("bad path: {e}")))?;

    let xprv = XPrv::derive_from_path(seed.as_bytes(), &bip32_path)
        .map_err(|e| VaultError::Derivation(e.to_string()))?;
    let xpub = xprv.public_key();

    let keypair = EchoKeypair::from_signing_key(xprv.private_key().clone());
    let private_key = Zeroizing::new(keypair.secret_key_bytes());
    let extended_private_key = xprv.to_string(Prefix::XPRV);

    Ok(DerivedKey {
        path: *path,
        public_key_bytes: xpub.to_bytes(),
        private_key: SecretBytes::from_slice(&private_key[..]),
        extended_public_key: xpub.to_string(Prefix::XPUB),
        extended_private_key: SecretString::new(extended_private_key.as_str().to_string()),
    })
}
