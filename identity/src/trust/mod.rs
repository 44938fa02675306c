//! # Trust Module
//!
//! Cross-identity trust: signed attestations that one DID vouches for
//! another, and a fabric that verifies and aggregates them into a graph.

pub mod attestation;
pub mod fabric;

pub use attestation::{TrustAttestation, TrustClaim, TrustSubject};
pub use fabric::{TrustEntity, TrustFabric, TrustLink, TrustSummary};
