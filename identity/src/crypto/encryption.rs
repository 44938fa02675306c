//! # AES-256-GCM Encryption
//!
//! Authenticated encryption for the vault body, the audit log, the recovery
//! sidecar and stealth-channel payloads.
//!
//! ## Nonce management
//!
//! GCM is unforgiving about nonce reuse under one key: two messages with the
//! same `(key, nonce)` leak the XOR of their plaintexts and let an attacker
//! forge tags. Every call here draws a fresh 96-bit nonce from `OsRng`. The
//! vault rewrites its files on every mutation, so one passphrase-derived key
//! sees thousands of nonces over its life, far below the ~2^32 comfort bound
//! for random 96-bit nonces.
//!
//! ## Wire format
//!
//! Every function returns and expects `nonce || ciphertext || tag` as one
//! buffer. The first 12 bytes are the nonce.

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use rand::RngCore;
use thiserror::Error;
use zeroize::Zeroizing;

use crate::config::{AES_KEY_LENGTH, AES_NONCE_LENGTH, AES_TAG_LENGTH};

/// Errors that can occur during encryption/decryption.
///
/// "Wrong key" and "tampered ciphertext" are the same error on purpose.
#[derive(Debug, Error)]
pub enum EncryptionError {
    #[error("encryption failed")]
    EncryptFailed,

    #[error("decryption failed -- wrong key or corrupted ciphertext")]
    DecryptFailed,

    #[error("ciphertext too short: must be at least {} bytes", AES_NONCE_LENGTH + AES_TAG_LENGTH)]
    CiphertextTooShort,
}

fn fresh_nonce() -> [u8; AES_NONCE_LENGTH] {
    let mut nonce = [0u8; AES_NONCE_LENGTH];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    nonce
}

/// Encrypt `plaintext` under `key` with a random nonce.
///
/// ```
/// use echo_identity::crypto::encryption::{decrypt, encrypt};
///
/// let key = [0x42u8; 32];
/// let sealed = encrypt(&key, b"vault state").unwrap();
/// assert_eq!(decrypt(&key, &sealed).unwrap().as_slice(), b"vault state");
/// ```
pub fn encrypt(key: &[u8; AES_KEY_LENGTH], plaintext: &[u8]) -> Result<Vec<u8>, EncryptionError> {
    encrypt_with_aad(key, plaintext, &[])
}

/// Decrypt a buffer produced by [`encrypt`].
///
/// The plaintext comes back in a `Zeroizing` buffer; it usually holds key
/// material.
pub fn decrypt(
    key: &[u8; AES_KEY_LENGTH],
    data: &[u8],
) -> Result<Zeroizing<Vec<u8>>, EncryptionError> {
    decrypt_with_aad(key, data, &[])
}

/// Encrypt with additional authenticated data.
///
/// The AAD is authenticated, not encrypted. The same bytes must be supplied
/// at decryption time.
pub fn encrypt_with_aad(
    key: &[u8; AES_KEY_LENGTH],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, EncryptionError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| EncryptionError::EncryptFailed)?;
    let nonce_bytes = fresh_nonce();
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, Payload { msg: plaintext, aad })
        .map_err(|_| EncryptionError::EncryptFailed)?;

    let mut out = Vec::with_capacity(AES_NONCE_LENGTH + ciphertext.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt a buffer produced by [`encrypt_with_aad`].
pub fn decrypt_with_aad(
    key: &[u8; AES_KEY_LENGTH],
    data: &[u8],
    aad: &[u8],
) -> Result<Zeroizing<Vec<u8>>, EncryptionError> {
    if data.len() < AES_NONCE_LENGTH + AES_TAG_LENGTH {
        return Err(EncryptionError::CiphertextTooShort);
    }

    let (nonce_bytes, ciphertext) = data.split_at(AES_NONCE_LENGTH);
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| EncryptionError::DecryptFailed)?;
    let nonce = Nonce::from_slice(nonce_bytes);

    cipher
        .decrypt(nonce, Payload { msg: ciphertext, aad })
        .map(Zeroizing::new)
        .map_err(|_| EncryptionError::DecryptFailed)
}
