/*
 * Copyright Raffel Contributors
 * SPDX-License-Identifier: Apache-2.0
 */

//! Deterministic fingerprinting used by the cache and dedup interceptors
//! (spec §4.7: `key = hash(procedure, canonical(payload), selectedHeaders)`).

use sha2::{Digest, Sha256};

use crate::metadata::Metadata;

/// Stable serialization of a JSON value: object keys sorted recursively, so
/// two semantically-identical payloads with differently-ordered keys
/// fingerprint to the same value.
pub fn canonicalize(value: &serde_json::Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &serde_json::Value, out: &mut String) {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, k) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(k).unwrap());
                out.push(':');
                write_canonical(&map[*k], out);
            }
            out.push('}');
        }
        serde_json::Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}

/// Computes the default fingerprint for a cache/dedup key: the procedure
/// name, the canonical payload, and the values of `selected_headers` (in the
/// order given), all hashed together with SHA-256. Callers needing a custom
/// scheme should replace this with their own `keyGenerator` at the
/// interceptor configuration layer rather than modifying this function.
pub fn fingerprint(procedure: &str, payload: &serde_json::Value, metadata: &Metadata, selected_headers: &[&str]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(procedure.as_bytes());
    hasher.update([0u8]);
    hasher.update(canonicalize(payload).as_bytes());
    for header in selected_headers {
        hasher.update([0u8]);
        hasher.update(header.as_bytes());
        hasher.update([b'=']);
        hasher.update(metadata.get(header).unwrap_or("").as_bytes());
    }
    hex::encode(hasher.finalize())
}

mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        use std::fmt::Write;
        let mut s = String::with_capacity(bytes.as_ref().len() * 2);
        for b in bytes.as_ref() {
            write!(s, "{b:02x}").unwrap();
        }
        s
    }
}
