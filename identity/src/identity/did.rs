//! # Echo DIDs
//!
//! Every vault key is addressed by a decentralized identifier of the form
//!
//! ```text
//! did:echo:<chain>:<account>:<change>:<index>:<salt>
//! ```
//!
//! Example: `did:echo:bitcoin:0:0:0:3yZe7d2mKqP`
//!
//! The coordinates tell a reader which BIP-44 leaf the DID names. The salt
//! is 8 random bytes in base58, drawn once when the key is created and
//! stored with the record. It is never re-derived, so the DID cannot be
//! recomputed from the seed and path alone. Rotating a key keeps the
//! coordinates and draws a new salt.

use std::fmt;
use std::str::FromStr;

use rand::RngCore;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::config::{DID_METHOD, DID_SALT_LENGTH};
use crate::identity::derivation::{Chain, DerivationPath};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum DidError {
    /// Wrong number of segments or a non-numeric coordinate.
    #[error("invalid DID format: {0}")]
    InvalidFormat(String),

    #[error("unsupported DID method: expected '{DID_METHOD}', got '{0}'")]
    UnsupportedMethod(String),

    #[error("unsupported chain in DID: {0}")]
    UnsupportedChain(String),

    #[error("invalid DID salt")]
    InvalidSalt,
}

// ---------------------------------------------------------------------------
// EchoDid
// ---------------------------------------------------------------------------

/// A parsed `did:echo:` identifier.
///
/// ```
/// use echo_identity::identity::derivation::{Chain, DerivationPath};
/// use echo_identity::identity::did::EchoDid;
///
/// let path = DerivationPath::new(Chain::Bitcoin, 0, 0, 0).unwrap();
/// let did = EchoDid::new(&path);
/// assert!(did.to_string().starts_with("did:echo:bitcoin:0:0:0:"));
/// assert_eq!(EchoDid::parse(&did.to_string()).unwrap(), did);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EchoDid {
    path: DerivationPath,
    salt: String,
}

impl EchoDid {
    /// Mint a DID for `path` with a fresh random salt.
    pub fn new(path: &DerivationPath) -> Self {
        let mut salt = [0u8; DID_SALT_LENGTH];
        rand::rngs::OsRng.fill_bytes(&mut salt);
        Self {
            path: *path,
            salt: bs58::encode(salt).into_string(),
        }
    }

    /// Parse `did:echo:<chain>:<account>:<change>:<index>:<salt>`.
    pub fn parse(did: &str) -> Result<Self, DidError> {
        let parts: Vec<&str> = did.splitn(7, ':').collect();
        if parts.len() != 7 {
            return Err(DidError::InvalidFormat(format!(
                "expected 7 segments, got {}",
                parts.len()
            )));
        }

        if parts[0] != "did" {
            return Err(DidError::InvalidFormat(format!(
                "expected 'did' prefix, got '{}'",
                parts[0]
            )));
        }

        if parts[1] != DID_METHOD {
            return Err(DidError::UnsupportedMethod(parts[1].to_string()));
        }

        let chain =
            Chain::parse(parts[2]).map_err(|_| DidError::UnsupportedChain(parts[2].to_string()))?;
        let number = |s: &str| {
            s.parse::<u32>()
                .map_err(|_| DidError::InvalidFormat(format!("'{s}' is not a coordinate")))
        };
        let path = DerivationPath::new(chain, number(parts[3])?, number(parts[4])?, number(parts[5])?)
            .map_err(|e| DidError::InvalidFormat(e.to_string()))?;

        let salt = parts[6];
        match bs58::decode(salt).into_vec() {
            Ok(bytes) if !bytes.is_empty() => {}
            _ => return Err(DidError::InvalidSalt),
        }

        Ok(Self {
            path,
            salt: salt.to_string(),
        })
    }

    /// The BIP-44 coordinates this DID names.
    pub fn path(&self) -> &DerivationPath {
        &self.path
    }

    pub fn salt(&self) -> &str {
        &self.salt
    }

    /// Two DIDs name the same key slot when their coordinates match,
    /// whatever their salts.
    pub fn same_slot(&self, other: &EchoDid) -> bool {
        self.path == other.path
    }
}

impl fmt::Display for EchoDid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "did:{}:{}:{}:{}:{}:{}",
            DID_METHOD,
            self.path.chain,
            self.path.account,
            self.path.change,
            self.path.index,
            self.salt
        )
    }
}

impl FromStr for EchoDid {
    type Err = DidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EchoDid::parse(s)
    }
}

impl Serialize for EchoDid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for EchoDid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        EchoDid::parse(&s).map_err(serde::de::Error::custom)
    }
}
