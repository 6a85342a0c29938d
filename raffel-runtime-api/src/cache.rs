/*
 * Copyright Raffel Contributors
 * SPDX-License-Identifier: Apache-2.0
 */

//! The pluggable cache store contract (spec §4.7).

use std::time::SystemTime;

use async_trait::async_trait;
use raffel_types::RaffelError;

/// `{value, createdAt, expiresAt, tags?, compressed?}` (spec §3 `CacheEntry`).
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub value: serde_json::Value,
    pub created_at: SystemTime,
    pub expires_at: SystemTime,
    pub tags: Vec<String>,
    pub compressed: bool,
}

/// `get`, `set`, `delete`, `clear`, `has`, `keys`, all async (spec §4.7).
/// Entries are cloned on `get` so callers can never mutate the stored value
/// through the reference they receive.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, RaffelError>;
    async fn set(&self, key: &str, entry: CacheEntry) -> Result<(), RaffelError>;
    async fn delete(&self, key: &str) -> Result<(), RaffelError>;
    async fn clear(&self, prefix: Option<&str>) -> Result<(), RaffelError>;
    async fn has(&self, key: &str) -> Result<bool, RaffelError>;
    async fn keys(&self, pattern: Option<&str>) -> Result<Vec<String>, RaffelError>;
}
