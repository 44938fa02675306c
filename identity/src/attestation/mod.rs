//! # Attestation Module
//!
//! Primitives that let an identity prove things about itself using keys
//! held in the [`Vault`](crate::vault::Vault).
//!
//! ## Architecture
//!
//! ```text
//! disclosure.rs  : Merkle commitment over claims, partial-reveal proofs
//! capability.rs  : signed capability grants, issuer and verifier
//! proof_chain.rs : append-only chain of hash commitments
//! upgrade.rs     : signed records binding a component to an artifact hash
//! integrity.rs   : artifact measurement against an allow-list
//! ```
//!
//! None of these mutate vault state. The only vault call they make is
//! `sign`, which leaves a `key.signed` audit event.

pub mod capability;
pub mod disclosure;
pub mod integrity;
pub mod proof_chain;
pub mod upgrade;

pub use capability::{
    CapabilityCredential, CapabilityIssuer, CapabilityRequest, CapabilitySummary,
    CapabilityVerifier,
};
pub use disclosure::{ClaimTree, Claims, Direction, ProofSegment, SelectiveDisclosureProof};
pub use integrity::{ArtifactIntegrityVerifier, IntegrityManifest, IntegrityStatus, Measurement};
pub use proof_chain::{ProofMetadata, ProofNode, ProofPipeline, ProofSnapshot};
pub use upgrade::SelfAttestingUpgrade;
