//! # Identity Module
//!
//! Where vault identities come from. Two layers:
//!
//! 1. **Derivation**: BIP-39 mnemonic to BIP-32 seed to a BIP-44 leaf key
//!    on secp256k1. Deterministic: the mnemonic alone regenerates every key.
//! 2. **DID**: the public handle for a leaf, `did:echo:<chain>:...:<salt>`.
//!    Carries the coordinates plus a random salt, so the same key slot can
//!    be re-issued under a new identity without touching key material.
//!
//! Derivation goes through the `bip32` crate (with its `bip39` and
//! `secp256k1` features). Nothing in here hashes its way to a "key".

pub mod derivation;
pub mod did;

pub use derivation::{derive, Chain, DerivationPath, DerivedKey, MasterSeed};
pub use did::{DidError, EchoDid};
