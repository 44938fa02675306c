//! # Hashing & Canonical JSON
//!
//! SHA-256 is the only hash in the identity layer: Merkle leaves, vault
//! checksums, proof commitments and artifact measurements all use it, so a
//! digest produced here can be recomputed by anything that speaks SHA-256.
//!
//! ## Canonical JSON
//!
//! Anything that gets hashed or signed is first turned into canonical JSON:
//! object keys sorted, compact separators, UTF-8. Keys are re-sorted
//! explicitly rather than trusting `serde_json::Map` ordering, which flips
//! to insertion order if any crate in the graph enables `preserve_order`.
//!
//! Secret-bearing values (vault bodies, the recovery record) go through
//! [`canonical_json_secret`] instead: the intermediate `Value` tree has its
//! strings wiped before it drops, and the output buffer is sized up front
//! so it never reallocates and leaves a stale copy behind.

use std::io;

use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, Zeroizing};

/// SHA-256 into a fixed array.
///
/// ```
/// use echo_identity::crypto::hash::sha256;
///
/// assert_eq!(sha256(b"echo").len(), 32);
/// ```
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// SHA-256 as lowercase hex.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256(data))
}

/// SHA-256 over the concatenation of `parts`, without allocating the
/// concatenation.
pub fn sha256_concat(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// Canonical JSON bytes: sorted keys, no whitespace.
pub fn canonical_json<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, serde_json::Error> {
    let value = canonicalize(serde_json::to_value(value)?);
    serde_json::to_vec(&value)
}

/// Canonical JSON for values that carry key material.
pub fn canonical_json_secret<T: Serialize + ?Sized>(
    value: &T,
) -> Result<Zeroizing<Vec<u8>>, serde_json::Error> {
    canonical_value_secret(serde_json::to_value(value)?)
}

/// Like [`canonical_json_secret`], for a tree the caller already built.
/// `value` is wiped whether or not serialization succeeds.
pub fn canonical_value_secret(value: Value) -> Result<Zeroizing<Vec<u8>>, serde_json::Error> {
    let mut value = canonicalize(value);
    let bytes = write_exact(&value);
    zeroize_value(&mut value);
    bytes
}

/// Overwrite every string in `value`. Keys are field names and are left
/// alone.
pub fn zeroize_value(value: &mut Value) {
    match value {
        Value::String(s) => s.zeroize(),
        Value::Array(items) => items.iter_mut().for_each(zeroize_value),
        Value::Object(map) => map.values_mut().for_each(zeroize_value),
        Value::Null | Value::Bool(_) | Value::Number(_) => {}
    }
}

struct ByteCount(usize);

impl io::Write for ByteCount {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0 += buf.len();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn write_exact(value: &Value) -> Result<Zeroizing<Vec<u8>>, serde_json::Error> {
    let mut count = ByteCount(0);
    serde_json::to_writer(&mut count, value)?;
    let mut out = Zeroizing::new(Vec::with_capacity(count.0));
    serde_json::to_writer(&mut *out, value)?;
    Ok(out)
}

/// Recursively rebuild every object with its keys in lexicographic order.
pub fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut sorted = Map::new();
            for (key, inner) in entries {
                sorted.insert(key, canonicalize(inner));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

/// SHA-256 of the canonical JSON encoding of `value`.
pub fn canonical_digest<T: Serialize + ?Sized>(value: &T) -> Result<[u8; 32], serde_json::Error> {
    Ok(sha256(&canonical_json(value)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sha256_known_vector() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn concat_matches_single_buffer() {
        assert_eq!(sha256_concat(&[b"ab", b"c"]), sha256(b"abc"));
    }

    #[test]
    fn canonical_json_sorts_keys() {
        #[derive(Serialize)]
        struct Unsorted {
            zeta: u8,
            alpha: u8,
        }
        let bytes = canonical_json(&Unsorted { zeta: 1, alpha: 2 }).unwrap();
        assert_eq!(bytes, br#"{"alpha":2,"zeta":1}"#);
    }

    #[test]
    fn canonical_json_sorts_nested_keys() {
        let bytes = canonical_json(&json!({"b": {"y": 1, "x": 2}, "a": [3, 2]})).unwrap();
        assert_eq!(bytes, br#"{"a":[3,2],"b":{"x":2,"y":1}}"#);
    }

    #[test]
    fn secret_json_matches_plain_and_fits_exactly() {
        let value = json!({"mnemonic": "abandon ability", "index": 3, "keys": ["xprv9s"]});
        let secret = canonical_json_secret(&value).unwrap();
        assert_eq!(secret.as_slice(), canonical_json(&value).unwrap().as_slice());
        assert_eq!(secret.capacity(), secret.len());
    }

    #[test]
    fn zeroize_value_wipes_nested_strings() {
        let mut value = json!({"a": "secret", "b": [{"c": "xprv"}], "n": 7});
        zeroize_value(&mut value);
        assert_eq!(value, json!({"a": "", "b": [{"c": ""}], "n": 7}));
    }

    #[test]
    fn canonical_digest_is_order_independent() {
        let a = json!({"key": "a", "value": 1});
        let b = json!({"value": 1, "key": "a"});
        assert_eq!(canonical_digest(&a).unwrap(), canonical_digest(&b).unwrap());
    }
}
