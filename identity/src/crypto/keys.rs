//! # Key Management
//!
//! secp256k1 keypairs, public keys and signatures for vault identities.
//!
//! Every DID the vault mints is backed by one of these, derived along a
//! BIP-44 path (see [`crate::identity::derivation`]). Signing is ECDSA with
//! RFC 6979 deterministic nonces and a SHA-256 prehash, so a bad RNG at
//! signing time cannot leak the key.
//!
//! ## Security considerations
//!
//! - `k256::ecdsa::SigningKey` zeroizes its scalar on drop.
//! - Signatures are normalized to low-S before they leave this module.
//! - Key bytes are never logged. `Debug` prints the public half only.

use std::fmt;
use std::hash::{Hash, Hasher};

use k256::ecdsa::signature::{Signer, Verifier};
use k256::ecdsa::{Signature as EcdsaSignature, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::config::{PRIVATE_KEY_LENGTH, PUBLIC_KEY_LENGTH, SIGNATURE_LENGTH};

/// Errors that can occur during key operations.
///
/// Deliberately vague about *why* something failed.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("invalid secret key bytes: wrong length or not a valid scalar")]
    InvalidSecretKey,

    #[error("invalid public key bytes: not a valid secp256k1 point")]
    InvalidPublicKey,

    #[error("invalid signature encoding")]
    InvalidSignature,
}

/// A secp256k1 signing keypair.
///
/// Not `Serialize`. Exporting a private key should be a deliberate call to
/// [`secret_key_bytes`](Self::secret_key_bytes), never a side effect of
/// dropping a struct into a JSON response.
///
/// ```
/// use echo_identity::crypto::keys::EchoKeypair;
///
/// let kp = EchoKeypair::generate();
/// let sig = kp.sign(b"grant read to did:echo:x");
/// assert!(kp.public_key().verify(b"grant read to did:echo:x", &sig));
/// ```
pub struct EchoKeypair {
    signing_key: SigningKey,
}

/// Compressed SEC1 public key (33 bytes), safe to share.
#[derive(Clone, PartialEq, Eq)]
pub struct EchoPublicKey {
    bytes: [u8; PUBLIC_KEY_LENGTH],
}

/// Compact `r || s` ECDSA signature (64 bytes), hex on the wire.
#[derive(Clone, PartialEq, Eq)]
pub struct EchoSignature {
    bytes: [u8; SIGNATURE_LENGTH],
}

impl EchoKeypair {
    /// Fresh keypair from the OS RNG. Vault keys are derived, not generated;
    /// this is for ephemeral and test identities.
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::random(&mut OsRng),
        }
    }

    /// Rebuild a keypair from a raw 32-byte scalar.
    ///
    /// Fails for zero and for values at or above the curve order.
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        if bytes.len() != PRIVATE_KEY_LENGTH {
            return Err(KeyError::InvalidSecretKey);
        }
        let signing_key = SigningKey::from_slice(bytes).map_err(|_| KeyError::InvalidSecretKey)?;
        Ok(Self { signing_key })
    }

    /// Wrap a signing key that came out of HD derivation.
    pub(crate) fn from_signing_key(signing_key: SigningKey) -> Self {
        Self { signing_key }
    }

    pub fn public_key(&self) -> EchoPublicKey {
        EchoPublicKey::from_verifying_key(self.signing_key.verifying_key())
    }

    /// Sign `message`. SHA-256 is applied internally.
    pub fn sign(&self, message: &[u8]) -> EchoSignature {
        let sig: EcdsaSignature = self.signing_key.sign(message);
        let sig = sig.normalize_s().unwrap_or(sig);
        EchoSignature::from_ecdsa(&sig)
    }

    pub fn verify(&self, message: &[u8], signature: &EchoSignature) -> bool {
        self.public_key().verify(message, signature)
    }

    /// Raw 32-byte scalar. Wrap the result in `Zeroizing` at the call site.
    pub fn secret_key_bytes(&self) -> [u8; PRIVATE_KEY_LENGTH] {
        let mut out = [0u8; PRIVATE_KEY_LENGTH];
        out.copy_from_slice(&self.signing_key.to_bytes());
        out
    }
}

impl fmt::Debug for EchoKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EchoKeypair(pub={})", self.public_key().to_hex())
    }
}

// ---------------------------------------------------------------------------
// EchoPublicKey
// ---------------------------------------------------------------------------

impl EchoPublicKey {
    fn from_verifying_key(key: &VerifyingKey) -> Self {
        let point = key.to_encoded_point(true);
        let mut bytes = [0u8; PUBLIC_KEY_LENGTH];
        bytes.copy_from_slice(point.as_bytes());
        Self { bytes }
    }

    /// Parse and validate compressed SEC1 bytes. Uncompressed points are
    /// accepted and re-encoded compressed.
    pub fn try_from_slice(slice: &[u8]) -> Result<Self, KeyError> {
        let key = VerifyingKey::from_sec1_bytes(slice).map_err(|_| KeyError::InvalidPublicKey)?;
        Ok(Self::from_verifying_key(&key))
    }

    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_LENGTH] {
        &self.bytes
    }

    /// `false` for any malformed key or signature; no error oracle.
    pub fn verify(&self, message: &[u8], signature: &EchoSignature) -> bool {
        let Ok(key) = VerifyingKey::from_sec1_bytes(&self.bytes) else {
            return false;
        };
        let Ok(sig) = EcdsaSignature::from_slice(&signature.bytes) else {
            return false;
        };
        key.verify(message, &sig).is_ok()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.bytes)
    }

    pub fn from_hex(s: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(s).map_err(|_| KeyError::InvalidPublicKey)?;
        Self::try_from_slice(&bytes)
    }
}

impl Hash for EchoPublicKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.bytes.hash(state);
    }
}

impl fmt::Display for EchoPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for EchoPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EchoPublicKey({})", &self.to_hex()[..16])
    }
}

impl Serialize for EchoPublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for EchoPublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// EchoSignature
// ---------------------------------------------------------------------------

impl EchoSignature {
    fn from_ecdsa(sig: &EcdsaSignature) -> Self {
        let mut bytes = [0u8; SIGNATURE_LENGTH];
        bytes.copy_from_slice(&sig.to_bytes());
        Self { bytes }
    }

    pub fn from_bytes(bytes: [u8; SIGNATURE_LENGTH]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; SIGNATURE_LENGTH] {
        &self.bytes
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.bytes)
    }

    pub fn from_hex(s: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(s).map_err(|_| KeyError::InvalidSignature)?;
        let bytes: [u8; SIGNATURE_LENGTH] =
            bytes.try_into().map_err(|_| KeyError::InvalidSignature)?;
        Ok(Self { bytes })
    }
}

impl fmt::Display for EchoSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for EchoSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex_str = self.to_hex();
        write!(f, "EchoSignature({}...{})", &hex_str[..8], &hex_str[120..])
    }
}

impl Serialize for EchoSignature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for EchoSignature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}
