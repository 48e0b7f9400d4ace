//! Deterministic canonical form of a JSON payload and its SHA-256 digest.
//!
//! Object members are emitted in lexicographic key order, arrays verbatim,
//! with no insignificant whitespace, so payloads that differ only in key
//! ordering digest identically. Any difference in value, array order, or
//! membership yields a different digest.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Render a JSON value into its canonical byte form.
pub fn canonical_bytes(value: &Value) -> Vec<u8> {
    let mut out = Vec::new();
    write_canonical(value, &mut out);
    out
}

/// Hex SHA-256 over the canonical bytes of the payload.
pub fn request_digest(value: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_bytes(value));
    format!("{:x}", hasher.finalize())
}

fn write_canonical(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Null => out.extend_from_slice(b"null"),
        Value::Bool(true) => out.extend_from_slice(b"true"),
        Value::Bool(false) => out.extend_from_slice(b"false"),
        // serde_json renders numbers in shortest-roundtrip form.
        Value::Number(n) => out.extend_from_slice(n.to_string().as_bytes()),
        Value::String(s) => write_string(s, out),
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_canonical(item, out);
            }
            out.push(b']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_unstable();
            out.push(b'{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_string(key, out);
                out.push(b':');
                if let Some(member) = map.get(key) {
                    write_canonical(member, out);
                }
            }
            out.push(b'}');
        }
    }
}

fn write_string(s: &str, out: &mut Vec<u8>) {
    // serde_json escapes deterministically and leaves non-ASCII UTF-8
    // as received.
    match serde_json::to_vec(s) {
        Ok(encoded) => out.extend_from_slice(&encoded),
        Err(_) => {
            // A bare string cannot fail to serialize; keep the digest
            // total anyway.
            out.push(b'"');
            out.extend_from_slice(s.as_bytes());
            out.push(b'"');
        }
    }
}
