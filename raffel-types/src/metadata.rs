/*
 * Copyright Raffel Contributors
 * SPDX-License-Identifier: Apache-2.0
 */

use std::collections::HashMap;

/// The string→string header/metadata map carried on every envelope.
///
/// Per spec §3, "`metadata` keys are lowercase-compared": all keys are
/// normalized to lowercase on insertion so callers never have to think about
/// casing when reading a header that an adapter may have copied in with
/// mixed case (`Authorization`, `X-Request-Id`, ...).
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct Metadata(HashMap<String, String>);

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.0.insert(key.into().to_ascii_lowercase(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(&key.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(&key.to_ascii_lowercase())
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.remove(&key.to_ascii_lowercase())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<HashMap<String, String>> for Metadata {
    fn from(map: HashMap<String, String>) -> Self {
        let mut m = Metadata::new();
        for (k, v) in map {
            m.insert(k, v);
        }
        m
    }
}

impl FromIterator<(String, String)> for Metadata {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        let mut m = Metadata::new();
        for (k, v) in iter {
            m.insert(k, v);
        }
        m
    }
}

/// Headers whose values must never reach a log line verbatim (spec §4.10).
pub const SENSITIVE_METADATA_KEYS: &[&str] = &[
    "authorization",
    "cookie",
    "set-cookie",
    "x-api-key",
    "proxy-authorization",
];

pub fn is_sensitive_key(key: &str) -> bool {
    SENSITIVE_METADATA_KEYS.contains(&key.to_ascii_lowercase().as_str())
}
