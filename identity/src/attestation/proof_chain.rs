//! # Proof Chain
//!
//! An append-only chain of hash commitments over witnessed statements.
//! Each node commits to its statement, a hash of its witness, and the
//! commitment of the node before it:
//!
//! ```text
//! witness_hash = hex(SHA-256(canonical(witness)))
//! commitment   = hex(SHA-256(domain || statement || witness_hash || parent?))
//! ```
//!
//! Every part is written as an 8-byte big-endian length followed by its
//! bytes, so no two different splits of the same text collide.
//!
//! The first node has no parent, so the domain string is all that anchors
//! it. Editing any node breaks its own commitment and, through the parent
//! link, every node after it.
//!
//! This is tamper evidence and ordering, nothing more. The witness is
//! hashed, not proven; there is no zero-knowledge property here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::crypto::hash::{canonical_json, sha256_hex};
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofMetadata {
    pub witness_hash: String,
    pub timestamp: DateTime<Utc>,
}

/// One link in the chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofNode {
    pub claim_id: String,
    pub statement: String,
    pub commitment: String,
    pub parent_commitment: Option<String>,
    pub metadata: ProofMetadata,
}

/// Summary used by identity snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProofSnapshot {
    pub depth: usize,
    pub latest_commitment: Option<String>,
    pub verified: bool,
    pub recent_claims: Vec<ProofNode>,
}

fn commitment(domain: &str, statement: &str, witness_hash: &str, parent: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    let parts = [Some(domain), Some(statement), Some(witness_hash), parent];
    for part in parts.into_iter().flatten() {
        hasher.update((part.len() as u64).to_be_bytes());
        hasher.update(part.as_bytes());
    }
    hex::encode(hasher.finalize())
}

// ---------------------------------------------------------------------------
// ProofPipeline
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ProofPipeline {
    domain: String,
    nodes: Vec<ProofNode>,
}

impl ProofPipeline {
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            nodes: Vec::new(),
        }
    }

    /// Rehydrate a chain the caller persisted. Nothing is checked here;
    /// call [`verify_chain`](Self::verify_chain) before trusting it.
    pub fn from_nodes(domain: impl Into<String>, nodes: Vec<ProofNode>) -> Self {
        Self {
            domain: domain.into(),
            nodes,
        }
    }

    /// Commit `statement` and `witness` on top of the current tip.
    pub fn append<W: Serialize + ?Sized>(
        &mut self,
        claim_id: impl Into<String>,
        statement: impl Into<String>,
        witness: &W,
    ) -> Result<ProofNode> {
        let statement = statement.into();
        let witness_hash = sha256_hex(&canonical_json(witness)?);
        let parent = self.nodes.last().map(|n| n.commitment.clone());
        let node = ProofNode {
            claim_id: claim_id.into(),
            commitment: commitment(&self.domain, &statement, &witness_hash, parent.as_deref()),
            statement,
            parent_commitment: parent,
            metadata: ProofMetadata {
                witness_hash,
                timestamp: Utc::now(),
            },
        };
        self.nodes.push(node.clone());
        Ok(node)
    }

    /// Replay the whole chain.
    pub fn verify_chain(&self) -> bool {
        self.first_invalid().is_none()
    }

    /// Index of the first node whose commitment or parent link does not
    /// replay.
    pub fn first_invalid(&self) -> Option<usize> {
        self.first_invalid_from(0)
    }

    /// Replay from node `start` to the tip, taking node `start - 1`'s
    /// commitment as given. `start == len` is trivially valid.
    pub fn verify_from(&self, start: usize) -> bool {
        start <= self.nodes.len() && self.first_invalid_from(start).is_none()
    }

    fn first_invalid_from(&self, start: usize) -> Option<usize> {
        let mut parent = start
            .checked_sub(1)
            .and_then(|i| self.nodes.get(i))
            .map(|n| n.commitment.as_str());

        for (offset, node) in self.nodes.iter().enumerate().skip(start) {
            let expected = commitment(
                &self.domain,
                &node.statement,
                &node.metadata.witness_hash,
                parent,
            );
            if node.parent_commitment.as_deref() != parent || node.commitment != expected {
                return Some(offset);
            }
            parent = Some(node.commitment.as_str());
        }
        None
    }

    pub fn nodes(&self) -> &[ProofNode] {
        &self.nodes
    }

    pub fn tip(&self) -> Option<&ProofNode> {
        self.nodes.last()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Depth, tip, verification result and the last `limit` nodes.
    pub fn snapshot(&self, limit: usize) -> ProofSnapshot {
        let skip = self.nodes.len().saturating_sub(limit);
        ProofSnapshot {
            depth: self.nodes.len(),
            latest_commitment: self.tip().map(|n| n.commitment.clone()),
            verified: self.verify_chain(),
            recent_claims: self.nodes[skip..].to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    const DOMAIN: &str = "echo.test";

    fn chain(n: usize) -> ProofPipeline {
        let mut pipeline = ProofPipeline::new(DOMAIN);
        for i in 0..n {
            pipeline
                .append(format!("claim:{i}"), format!("statement-{i}"), &json!({ "i": i }))
                .unwrap();
        }
        pipeline
    }

    #[test]
    fn test_first_node_has_no_parent() {
        let pipeline = chain(1);
        let node = &pipeline.nodes()[0];
        assert!(node.parent_commitment.is_none());
        assert_eq!(
            node.commitment,
            commitment(DOMAIN, "statement-0", &node.metadata.witness_hash, None)
        );
    }

    #[test]
    fn test_commitment_parts_are_framed() {
        let witness = sha256_hex(b"w");
        assert_ne!(
            commitment("echo.ab", "c", &witness, None),
            commitment("echo.a", "bc", &witness, None)
        );
        assert_ne!(
            commitment(DOMAIN, "s", &witness, Some("")),
            commitment(DOMAIN, "s", &witness, None)
        );
    }

    #[test]
    fn test_nodes_link_to_parent() {
        let pipeline = chain(3);
        let nodes = pipeline.nodes();
        assert_eq!(nodes[1].parent_commitment.as_deref(), Some(nodes[0].commitment.as_str()));
        assert_eq!(nodes[2].parent_commitment.as_deref(), Some(nodes[1].commitment.as_str()));
        assert!(pipeline.verify_chain());
    }

    #[test]
    fn test_empty_chain_verifies() {
        let pipeline = ProofPipeline::new(DOMAIN);
        assert!(pipeline.verify_chain());
        assert!(pipeline.verify_from(0));
        assert!(!pipeline.verify_from(1));
    }

    #[test]
    fn test_witness_is_canonicalized() {
        let mut a = ProofPipeline::new(DOMAIN);
        let mut b = ProofPipeline::new(DOMAIN);
        let x = a.append("c", "s", &json!({"x": 1, "y": 2})).unwrap();
        let y = b.append("c", "s", &json!({"y": 2, "x": 1})).unwrap();
        assert_eq!(x.metadata.witness_hash, y.metadata.witness_hash);
        assert_eq!(x.commitment, y.commitment);
    }

    #[test]
    fn test_domain_separates_chains() {
        let mut a = ProofPipeline::new("echo.a");
        let mut b = ProofPipeline::new("echo.b");
        let x = a.append("c", "s", &json!({})).unwrap();
        let y = b.append("c", "s", &json!({})).unwrap();
        assert_ne!(x.commitment, y.commitment);
    }

    #[test]
    fn test_tampered_statement_detected_from_that_node() {
        let mut pipeline = chain(5);
        pipeline.nodes[2].statement = "forged".into();

        assert!(!pipeline.verify_chain());
        assert_eq!(pipeline.first_invalid(), Some(2));
        assert!(pipeline.verify_from(3));
        assert!(!pipeline.verify_from(2));
    }

    #[test]
    fn test_recomputed_commitment_breaks_next_link() {
        let mut pipeline = chain(3);
        let node = &mut pipeline.nodes[1];
        node.statement = "forged".into();
        node.commitment = commitment(
            DOMAIN,
            &node.statement,
            &node.metadata.witness_hash,
            node.parent_commitment.as_deref(),
        );
        assert_eq!(pipeline.first_invalid(), Some(2));
    }

    #[test]
    fn test_wrong_domain_on_rehydrate_fails() {
        let pipeline = chain(2);
        let moved = ProofPipeline::from_nodes("echo.other", pipeline.nodes().to_vec());
        assert_eq!(moved.first_invalid(), Some(0));

        let same = ProofPipeline::from_nodes(DOMAIN, pipeline.nodes().to_vec());
        assert!(same.verify_chain());
    }

    #[test]
    fn test_append_after_rehydrate_continues_chain() {
        let pipeline = chain(2);
        let mut resumed = ProofPipeline::from_nodes(DOMAIN, pipeline.nodes().to_vec());
        let node = resumed.append("claim:2", "statement-2", &json!({})).unwrap();
        assert_eq!(
            node.parent_commitment.as_deref(),
            Some(pipeline.nodes()[1].commitment.as_str())
        );
        assert!(resumed.verify_chain());
    }

    #[test]
    fn test_snapshot_limits_recent_claims() {
        let pipeline = chain(10);
        let snapshot = pipeline.snapshot(6);
        assert_eq!(snapshot.depth, 10);
        assert!(snapshot.verified);
        assert_eq!(snapshot.recent_claims.len(), 6);
        assert_eq!(snapshot.recent_claims[0].claim_id, "claim:4");
        assert_eq!(
            snapshot.latest_commitment.as_deref(),
            Some(pipeline.nodes()[9].commitment.as_str())
        );

        let empty = ProofPipeline::new(DOMAIN).snapshot(6);
        assert_eq!(empty.depth, 0);
        assert!(empty.latest_commitment.is_none());
    }
}
