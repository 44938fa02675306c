//! Argon2id passphrase key derivation.
//!
//! The vault never stores a key. It stores a [`KdfHeader`] (salt plus cost
//! parameters) in plaintext, and re-derives the AES key from the passphrase
//! on unlock. The header travels with every encrypted file so each one can
//! be opened on its own.

use argon2::{Algorithm, Argon2, Params, Version};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::Zeroizing;

use crate::config::{KdfParams, AES_KEY_LENGTH, KDF_SALT_LENGTH};

#[derive(Debug, Error)]
pub enum KdfError {
    #[error("unsupported kdf output length {0}, expected {AES_KEY_LENGTH}")]
    UnsupportedHashLength(u32),

    #[error("invalid kdf parameters: {0}")]
    InvalidParams(String),

    #[error("malformed kdf salt")]
    MalformedSalt,
}

/// Plaintext header persisted in front of the vault ciphertext.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfHeader {
    /// Hex-encoded random salt.
    pub salt: String,
    pub kdf_time_cost: u32,
    pub kdf_memory_cost: u32,
    pub kdf_parallelism: u32,
    pub hash_len: u32,
}

impl KdfHeader {
    /// New header with a fresh random salt.
    pub fn generate(params: &KdfParams) -> Self {
        let mut salt = [0u8; KDF_SALT_LENGTH];
        rand::rngs::OsRng.fill_bytes(&mut salt);
        Self {
            salt: hex::encode(salt),
            kdf_time_cost: params.time_cost,
            kdf_memory_cost: params.memory_cost,
            kdf_parallelism: params.parallelism,
            hash_len: params.hash_len,
        }
    }

    pub fn params(&self) -> KdfParams {
        KdfParams {
            time_cost: self.kdf_time_cost,
            memory_cost: self.kdf_memory_cost,
            parallelism: self.kdf_parallelism,
            hash_len: self.hash_len,
        }
    }

    pub fn salt_bytes(&self) -> Result<Vec<u8>, KdfError> {
        hex::decode(&self.salt).map_err(|_| KdfError::MalformedSalt)
    }

    /// Run Argon2id over `passphrase` with this header's salt and costs.
    pub fn derive_key(
        &self,
        passphrase: &[u8],
    ) -> Result<Zeroizing<[u8; AES_KEY_LENGTH]>, KdfError> {
        derive_key(passphrase, &self.salt_bytes()?, &self.params())
    }
}

/// Derive a 32-byte key from a passphrase using Argon2id v1.3.
pub fn derive_key(
    passphrase: &[u8],
    salt: &[u8],
    params: &KdfParams,
) -> Result<Zeroizing<[u8; AES_KEY_LENGTH]>, KdfError> {
    if params.hash_len as usize != AES_KEY_LENGTH {
        return Err(KdfError::UnsupportedHashLength(params.hash_len));
    }

    let argon_params = Params::new(
        params.memory_cost,
        params.time_cost,
        params.parallelism,
        Some(AES_KEY_LENGTH),
    )
    .map_err(|e| KdfError::InvalidParams(e.to_string()))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon_params);

    let mut output = Zeroizing::new([0u8; AES_KEY_LENGTH]);
    argon2
        .hash_password_into(passphrase, salt, &mut output[..])
        .map_err(|e| KdfError::InvalidParams(e.to_string()))?;

    Ok(output)
}
