//! # Vault Module
//!
//! The vault is where keys live. It holds the master seed, derives keys on
//! demand, persists them encrypted, and keeps an encrypted audit trail of
//! everything it does with them.
//!
//! ## Architecture
//!
//! ```text
//! record.rs : KeyRecord, KeyMetadata, VaultState and its checksum
//! store.rs  : Vault: open/create, self-heal, ensure_key, rotate, sign
//! audit.rs  : VaultEvent stream, sealed under the vault key
//! lock.rs   : per-root writer lock, atomic file replacement
//! ```
//!
//! ## Design Principles
//!
//! 1. **The mnemonic is the root of truth.** Everything else on disk can be
//!    rebuilt from it plus the audit log.
//!
//! 2. **Every write is atomic.** Temp file, fsync, rename. A crash leaves
//!    the previous file or the new one.
//!
//! 3. **Every mutation is audited.** Key creation, rotation, signing and
//!    healing each leave an event.

pub mod audit;
pub mod lock;
pub mod record;
pub mod store;

pub use audit::{AuditLog, EventKind, EventMetadata, VaultEvent};
pub use lock::WriterLock;
pub use record::{KeyMetadata, KeyRecord, VaultState};
pub use store::{KeyRequest, KeyResolver, Vault};
