// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Echo Identity: Core Library
//!
//! A self-custodied identity vault. One BIP-39 mnemonic deterministically
//! yields every key the identity will ever use; the vault keeps them
//! encrypted on disk, audits everything done with them, and can rebuild
//! itself from the mnemonic plus its audit trail when the body is damaged.
//!
//! On top of the vault sit the attestation primitives an identity needs to
//! prove things about itself without handing over more than it must.
//!
//! ## Architecture
//!
//! - **crypto**: Hashing, canonical JSON, AES-256-GCM, Argon2id, secp256k1.
//! - **identity**: BIP-32/44 derivation and `did:echo` identifiers.
//! - **vault**: Encrypted key store, self-heal, audit log, writer lock.
//! - **attestation**: Selective disclosure, capability credentials, proof
//!   chain, self-attested upgrades, artifact integrity.
//! - **trust**: Signed trust attestations and the fabric that aggregates them.
//! - **stealth**: Commands sealed inside telemetry-shaped envelopes.
//! - **sovereign**: The facade external callers use.
//! - **config**: Constants, KDF costs, vault configuration.
//! - **logging**: `tracing` subscriber setup.
//!
//! ## Design Philosophy
//!
//! 1. The mnemonic is the root of truth. Everything else is recoverable.
//! 2. Secrets live in zeroizing buffers and never reach a log line.
//! 3. Verification fails closed. Unknown issuers are never trusted.
//! 4. The proof chain is tamper evidence, not zero knowledge, and says so.

pub mod attestation;
pub mod config;
pub mod crypto;
pub mod error;
pub mod identity;
pub mod logging;
pub mod sovereign;
pub mod stealth;
pub mod trust;
pub mod vault;

pub use config::{KdfParams, RotationPolicy, VaultConfig};
pub use error::{Result, VaultError};
pub use identity::{Chain, DerivationPath, EchoDid};
pub use sovereign::{IdentitySnapshot, SovereignIdentityLayer};
pub use vault::{KeyRecord, KeyRequest, KeyResolver, Vault};
