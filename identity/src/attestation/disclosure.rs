//! # Selective Disclosure
//!
//! Commit to a whole claim set with one hash, then reveal only the claims
//! you choose. The commitment is a binary Merkle tree:
//!
//! ```text
//! leaf(k, v) = SHA-256(canonical {"key": k, "value": v})
//! node(l, r) = SHA-256(l || r)
//! ```
//!
//! Leaves are ordered by key, so the same claims always give the same root
//! no matter how the caller built the map. When a level has an odd number
//! of nodes the last one is paired with itself.
//!
//! A proof carries the revealed `(key, value)` pairs and, for each, the
//! sibling hashes from leaf to root. Withheld claims show up only as
//! hashes inside those paths.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::crypto::hash::{canonical_digest, sha256_concat};
use crate::error::{Result, VaultError};

/// A claim set. `BTreeMap` keeps keys sorted, which is the leaf order.
pub type Claims = BTreeMap<String, Value>;

/// Which side of the running hash a sibling sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Left,
    Right,
}

/// One step of a Merkle path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofSegment {
    pub direction: Direction,
    /// Sibling hash, hex.
    pub hash: String,
}

fn leaf_hash(key: &str, value: &Value) -> Result<[u8; 32]> {
    Ok(canonical_digest(&json!({ "key": key, "value": value }))?)
}

fn parent_hash(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    sha256_concat(&[&left[..], &right[..]])
}

// ---------------------------------------------------------------------------
// ClaimTree
// ---------------------------------------------------------------------------

/// Merkle commitment over a claim set.
#[derive(Debug, Clone)]
pub struct ClaimTree {
    claims: Claims,
    /// `levels[0]` are the leaves, the last level is the root.
    levels: Vec<Vec<[u8; 32]>>,
}

impl ClaimTree {
    /// Build the tree. An empty claim set has no root and is rejected.
    pub fn commit(claims: Claims) -> Result<Self> {
        if claims.is_empty() {
            return Err(VaultError::InvalidClaims("claim set is empty".into()));
        }

        let leaves = claims
            .iter()
            .map(|(k, v)| leaf_hash(k, v))
            .collect::<Result<Vec<_>>>()?;

        let mut levels = vec![leaves];
        while let Some(current) = levels.last().filter(|level| level.len() > 1) {
            let next: Vec<[u8; 32]> = current
                .chunks(2)
                .map(|pair| {
                    let left = &pair[0];
                    let right = pair.get(1).unwrap_or(left);
                    parent_hash(left, right)
                })
                .collect();
            levels.push(next);
        }

        Ok(Self { claims, levels })
    }

    pub fn root(&self) -> [u8; 32] {
        // commit() guarantees at least one level with one node.
        self.levels
            .last()
            .and_then(|level| level.first())
            .copied()
            .unwrap_or_default()
    }

    pub fn root_hex(&self) -> String {
        hex::encode(self.root())
    }

    pub fn claims(&self) -> &Claims {
        &self.claims
    }

    pub fn len(&self) -> usize {
        self.claims.len()
    }

    pub fn is_empty(&self) -> bool {
        self.claims.is_empty()
    }

    /// Prove the claims named in `reveal`. Unknown keys are skipped; if
    /// nothing is left to disclose the call fails.
    pub fn prove<I, S>(&self, reveal: I) -> Result<SelectiveDisclosureProof>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut disclosed = Claims::new();
        let mut paths = BTreeMap::new();

        for key in reveal {
            let key = key.as_ref();
            let Some(index) = self.claims.keys().position(|k| k == key) else {
                continue;
            };
            disclosed.insert(key.to_string(), self.claims[key].clone());
            paths.insert(key.to_string(), self.path_for(index));
        }

        if disclosed.is_empty() {
            return Err(VaultError::InvalidClaims("no requested claim is in the tree".into()));
        }

        Ok(SelectiveDisclosureProof {
            merkle_root: self.root_hex(),
            disclosed,
            paths,
        })
    }

    fn path_for(&self, mut index: usize) -> Vec<ProofSegment> {
        let mut segments = Vec::with_capacity(self.levels.len().saturating_sub(1));
        for level in &self.levels[..self.levels.len() - 1] {
            let (sibling, direction) = if index % 2 == 0 {
                // Last node of an odd level pairs with itself.
                let sibling = if index + 1 < level.len() { index + 1 } else { index };
                (sibling, Direction::Right)
            } else {
                (index - 1, Direction::Left)
            };
            segments.push(ProofSegment {
                direction,
                hash: hex::encode(level[sibling]),
            });
            index /= 2;
        }
        segments
    }
}

// ---------------------------------------------------------------------------
// SelectiveDisclosureProof
// ---------------------------------------------------------------------------

/// Revealed claims plus the Merkle paths binding them to a root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectiveDisclosureProof {
    /// Hex root of the full claim set.
    pub merkle_root: String,
    pub disclosed: Claims,
    pub paths: BTreeMap<String, Vec<ProofSegment>>,
}

impl SelectiveDisclosureProof {
    /// Check the disclosed values against the root.
    pub fn verify(&self) -> bool {
        self.verify_against(&self.disclosed)
    }

    /// Check caller-supplied values for the disclosed keys against the
    /// root. Any missing path, missing value or hash mismatch is a `false`.
    pub fn verify_against(&self, claims: &Claims) -> bool {
        if self.disclosed.is_empty() || self.paths.len() != self.disclosed.len() {
            return false;
        }
        let Ok(root) = hex::decode(&self.merkle_root) else {
            return false;
        };

        self.disclosed.keys().all(|key| {
            let (Some(path), Some(value)) = (self.paths.get(key), claims.get(key)) else {
                return false;
            };
            match replay(key, value, path) {
                Some(computed) => computed.as_slice() == root.as_slice(),
                None => false,
            }
        })
    }

    /// Sorted list of disclosed keys.
    pub fn disclosed_keys(&self) -> Vec<String> {
        self.disclosed.keys().cloned().collect()
    }
}

/// Walk one path from leaf to root. `None` on malformed input.
fn replay(key: &str, value: &Value, path: &[ProofSegment]) -> Option<[u8; 32]> {
    let mut node = leaf_hash(key, value).ok()?;
    for segment in path {
        let mut sibling = [0u8; 32];
        hex::decode_to_slice(&segment.hash, &mut sibling).ok()?;
        node = match segment.direction {
            Direction::Left => parent_hash(&sibling, &node),
            Direction::Right => parent_hash(&node, &sibling),
        };
    }
    Some(node)
}
