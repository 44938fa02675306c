//! # Cryptographic Primitives
//!
//! Everything security-related in the identity layer flows through here:
//! every signature, every hash, every sealed byte.
//!
//! - **ECDSA over secp256k1** for signatures, matching the BIP-32 curve the
//!   vault derives keys on.
//! - **AES-256-GCM** for everything at rest and for stealth payloads.
//! - **Argon2id** to turn a passphrase into the AES key.
//! - **SHA-256** for checksums, Merkle trees and commitments.
//!
//! Everything here wraps an audited implementation. Nothing is hand-rolled.

pub mod encryption;
pub mod hash;
pub mod kdf;
pub mod keys;
pub mod secret;

pub use encryption::{decrypt, encrypt};
pub use hash::{canonical_json, sha256, sha256_hex};
pub use keys::{EchoKeypair, EchoPublicKey, EchoSignature};
pub use secret::{SecretBytes, SecretString};
