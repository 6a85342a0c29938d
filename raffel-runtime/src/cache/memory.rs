/*
 * Copyright Raffel Contributors
 * SPDX-License-Identifier: Apache-2.0
 */

//! An in-process [`CacheStore`] (spec §4.11, component C11): a dual-map design
//! — values in one table, `{lastAccess, insertOrder, sizeBytes, expiresAt}` in
//! a second — so eviction bookkeeping never touches the value itself. One
//! monotonic counter stamps both `lastAccess` (on read, for LRU) and
//! `insertOrder` (on insert, for FIFO), so either policy reads off the same
//! field without a second data structure.
//!
//! Grounded on `clawde-io-apps/daemon/src/resource_governor.rs`'s
//! `ResourceGovernor`/`PressureLevel` for the heap-pressure health check, and
//! on `aws-smithy-compression`'s compression-ratio accounting for the stats
//! this driver exposes (SPEC_FULL.md supplemented feature #3).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use raffel_types::RaffelError;
use sysinfo::System;
use tokio::sync::Notify;

use raffel_runtime_api::{CacheEntry, CacheStore};

/// Which entry to remove when capacity is exceeded (spec §4.11 "evict by policy").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionPolicy {
    /// Evict the entry with the oldest `lastAccess` ordinal.
    Lru,
    /// Evict the entry with the oldest `insertOrder` ordinal.
    Fifo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum EvictReason {
    Capacity,
    Memory,
    Pressure,
    Expired,
}

impl EvictReason {
    fn as_str(self) -> &'static str {
        match self {
            EvictReason::Capacity => "capacity",
            EvictReason::Memory => "memory",
            EvictReason::Pressure => "pressure",
            EvictReason::Expired => "expired",
        }
    }
}

/// How the effective memory cap is resolved (spec §4.11: "explicit bytes >
/// percent × containerMemory > 50% × containerMemory > 60% × processHeapLimit").
#[derive(Debug, Clone, Default)]
pub struct MemoryCapConfig {
    /// An explicit byte cap, taking precedence over every other source.
    pub explicit_bytes: Option<u64>,
    /// A fraction of detected container memory (`0.0..=1.0`).
    pub percent_of_container: Option<f64>,
}

pub struct MemoryCacheConfig {
    pub max_size: Option<usize>,
    pub eviction_policy: EvictionPolicy,
    pub memory_cap: MemoryCapConfig,
    pub compression_threshold_bytes: Option<usize>,
    pub monitor_interval: Duration,
    pub heap_usage_threshold: f64,
    pub cleanup_interval: Duration,
    pub on_evict: Option<Box<dyn Fn(&str, &str) + Send + Sync>>,
}

impl Default for MemoryCacheConfig {
    fn default() -> Self {
        Self {
            max_size: Some(10_000),
            eviction_policy: EvictionPolicy::Lru,
            memory_cap: MemoryCapConfig::default(),
            compression_threshold_bytes: None,
            monitor_interval: Duration::from_secs(30),
            heap_usage_threshold: 0.9,
            cleanup_interval: Duration::from_secs(60),
            on_evict: None,
        }
    }
}

#[derive(Debug, Clone)]
struct EntryMeta {
    last_access: u64,
    insert_order: u64,
    size_bytes: u64,
    expires_at: SystemTime,
}

/// Running compression stats (SPEC_FULL.md supplemented feature #3): how much
/// of what's been written was compressed, and how much space it saved.
#[derive(Debug, Default, Clone, Copy)]
pub struct MemoryCacheStats {
    pub compressed_entries: u64,
    pub uncompressed_entries: u64,
    pub raw_bytes_total: u64,
    pub stored_bytes_total: u64,
}

impl MemoryCacheStats {
    /// `storedBytes / rawBytes`; `1.0` (no savings) when nothing has been
    /// compressed yet.
    pub fn compression_ratio(&self) -> f64 {
        if self.raw_bytes_total == 0 {
            1.0
        } else {
            self.stored_bytes_total as f64 / self.raw_bytes_total as f64
        }
    }

    pub fn space_saved_bytes(&self) -> u64 {
        self.raw_bytes_total.saturating_sub(self.stored_bytes_total)
    }
}

struct Inner {
    entries: Mutex<HashMap<String, CacheEntry>>,
    meta: Mutex<HashMap<String, EntryMeta>>,
    ordinal: AtomicU64,
    current_bytes: AtomicU64,
    stats: Mutex<MemoryCacheStats>,
}

/// An in-memory [`CacheStore`] with LRU/FIFO eviction, a memory-bytes cap
/// resolved against detected container limits, a periodic heap-pressure
/// health check, and a periodic expired-entry sweep (spec §4.11). Timers are
/// spawned Tokio tasks, stoppable via [`MemoryCacheDriver::shutdown`] (spec
/// §5: "Timers MUST be... stoppable on `shutdown()`").
pub struct MemoryCacheDriver {
    inner: Arc<Inner>,
    config: MemoryCacheConfig,
    shutdown: Arc<Notify>,
    shutdown_acked: Arc<AtomicBool>,
}

impl MemoryCacheDriver {
    pub fn new(config: MemoryCacheConfig) -> Arc<Self> {
        let driver = Arc::new(Self {
            inner: Arc::new(Inner {
                entries: Mutex::new(HashMap::new()),
                meta: Mutex::new(HashMap::new()),
                ordinal: AtomicU64::new(0),
                current_bytes: AtomicU64::new(0),
                stats: Mutex::new(MemoryCacheStats::default()),
            }),
            config,
            shutdown: Arc::new(Notify::new()),
            shutdown_acked: Arc::new(AtomicBool::new(false)),
        });
        driver.clone().spawn_timers();
        driver
    }

    pub fn stats(&self) -> MemoryCacheStats {
        *self.inner.stats.lock().unwrap()
    }

    /// Stops the monitor and cleanup timers; returns once both have quiesced
    /// (spec §5: "`shutdown()` returns only after all timers are quiesced").
    pub async fn shutdown(&self) {
        self.shutdown.notify_waiters();
        while !self.shutdown_acked.load(Ordering::SeqCst) {
            tokio::task::yield_now().await;
        }
    }

    fn spawn_timers(self: Arc<Self>) {
        let monitor = self.clone();
        let monitor_shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            let mut sys = System::new();
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(monitor.config.monitor_interval) => monitor.run_pressure_check(&mut sys),
                    _ = monitor_shutdown.notified() => break,
                }
            }
        });

        let cleanup = self.clone();
        let cleanup_shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(cleanup.config.cleanup_interval) => cleanup.sweep_expired(),
                    _ = cleanup_shutdown.notified() => break,
                }
            }
        });

        let acker = self.clone();
        tokio::spawn(async move {
            acker.shutdown.notified().await;
            acker.shutdown_acked.store(true, Ordering::SeqCst);
        });
    }

    /// Detects the container memory limit via cgroup v2 (`memory.max`), then
    /// cgroup v1 (`memory.limit_in_bytes`), falling back to system total when
    /// neither is present or reads `"max"` (spec §4.11).
    fn container_memory_bytes(sys: &System) -> u64 {
        if let Ok(raw) = std::fs::read_to_string("/sys/fs/cgroup/memory.max") {
            let trimmed = raw.trim();
            if trimmed != "max" {
                if let Ok(bytes) = trimmed.parse::<u64>() {
                    return bytes;
                }
            }
        }
        if let Ok(raw) = std::fs::read_to_string("/sys/fs/cgroup/memory/memory.limit_in_bytes") {
            if let Ok(bytes) = raw.trim().parse::<u64>() {
                // cgroup v1 reports u64::MAX (or close to it) for "unlimited".
                if bytes < u64::MAX / 2 {
                    return bytes;
                }
            }
        }
        sys.total_memory()
    }

    /// Resolves the effective memory cap, in priority order (spec §4.11):
    /// explicit bytes, then a configured percent of container memory, then a
    /// 50% default of container memory, then 60% of the process heap limit
    /// (approximated here by system total, since Rust has no separate managed
    /// heap limit the way a GC'd runtime does).
    fn effective_cap_bytes(&self, sys: &System) -> u64 {
        if let Some(bytes) = self.config.memory_cap.explicit_bytes {
            return bytes;
        }
        let container = Self::container_memory_bytes(sys);
        if let Some(percent) = self.config.memory_cap.percent_of_container {
            return (container as f64 * percent) as u64;
        }
        if container > 0 {
            return (container as f64 * 0.5) as u64;
        }
        (sys.total_memory() as f64 * 0.6) as u64
    }

    fn run_pressure_check(&self, sys: &mut System) {
        sys.refresh_memory();
        let total = sys.total_memory();
        if total == 0 {
            return;
        }
        let usage_ratio = sys.used_memory() as f64 / total as f64;
        if usage_ratio >= self.config.heap_usage_threshold {
            self.halve_cache_bytes();
        }
    }

    fn halve_cache_bytes(&self) {
        let target = self.inner.current_bytes.load(Ordering::SeqCst) / 2;
        while self.inner.current_bytes.load(Ordering::SeqCst) > target {
            if !self.evict_one(EvictReason::Pressure) {
                break;
            }
        }
    }

    fn sweep_expired(&self) {
        let now = SystemTime::now();
        let expired: Vec<String> = {
            let meta = self.inner.meta.lock().unwrap();
            meta.iter().filter(|(_, m)| m.expires_at < now).map(|(k, _)| k.clone()).collect()
        };
        for key in expired {
            self.remove_entry(&key, EvictReason::Expired);
        }
    }

    fn remove_entry(&self, key: &str, reason: EvictReason) {
        let removed_bytes = {
            let mut entries = self.inner.entries.lock().unwrap();
            let mut meta = self.inner.meta.lock().unwrap();
            entries.remove(key);
            meta.remove(key).map(|m| m.size_bytes)
        };
        if let Some(bytes) = removed_bytes {
            self.inner.current_bytes.fetch_sub(bytes, Ordering::SeqCst);
            if let Some(hook) = &self.config.on_evict {
                hook(key, reason.as_str());
            }
        }
    }

    /// Evicts a single entry under the configured policy; returns `false` if
    /// the store is already empty.
    fn evict_one(&self, reason: EvictReason) -> bool {
        let victim = {
            let meta = self.inner.meta.lock().unwrap();
            meta.iter()
                .min_by_key(|(_, m)| match self.config.eviction_policy {
                    EvictionPolicy::Lru => m.last_access,
                    EvictionPolicy::Fifo => m.insert_order,
                })
                .map(|(k, _)| k.clone())
        };
        match victim {
            Some(key) => {
                self.remove_entry(&key, reason);
                true
            }
            None => false,
        }
    }

    /// Returns `(payload_bytes, compressed, raw_len)`. `raw_len` is always the
    /// uncompressed size, so callers can compute a compression ratio even
    /// when compression itself was skipped or failed.
    fn compress(&self, value: &serde_json::Value) -> Result<(Vec<u8>, bool, usize), RaffelError> {
        let raw = serde_json::to_vec(value)?;
        let raw_len = raw.len();
        let threshold = match self.config.compression_threshold_bytes {
            Some(t) => t,
            None => return Ok((raw, false, raw_len)),
        };
        if raw_len < threshold {
            return Ok((raw, false, raw_len));
        }
        use flate2::write::GzEncoder;
        use flate2::Compression;
        use std::io::Write;
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        // Compression failure is non-fatal (spec §4.11): fall back to the
        // uncompressed bytes rather than failing the `set`.
        match encoder.write_all(&raw).and_then(|_| encoder.finish()) {
            Ok(compressed) => Ok((compressed, true, raw_len)),
            Err(_) => Ok((raw, false, raw_len)),
        }
    }

    fn decompress(raw: &[u8]) -> Result<serde_json::Value, RaffelError> {
        use flate2::read::GzDecoder;
        use std::io::Read;
        let mut decoder = GzDecoder::new(raw);
        let mut out = Vec::new();
        decoder
            .read_to_end(&mut out)
            .map_err(|e| RaffelError::internal(format!("failed to decompress cache entry: {e}")))?;
        Ok(serde_json::from_slice(&out)?)
    }
}

#[async_trait]
impl CacheStore for MemoryCacheDriver {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, RaffelError> {
        let ordinal = self.inner.ordinal.fetch_add(1, Ordering::SeqCst);
        let mut meta = self.inner.meta.lock().unwrap();
        if let Some(m) = meta.get_mut(key) {
            m.last_access = ordinal;
        } else {
            return Ok(None);
        }
        drop(meta);

        let stored = {
            let entries = self.inner.entries.lock().unwrap();
            entries.get(key).cloned()
        };
        match stored {
            Some(cached) if cached.compressed => {
                let raw = hex_decode(cached.value["__raffel_gzip__"].as_str().unwrap_or(""));
                let value = Self::decompress(&raw)?;
                Ok(Some(CacheEntry { value, ..cached }))
            }
            other => Ok(other),
        }
    }

    async fn set(&self, key: &str, entry: CacheEntry) -> Result<(), RaffelError> {
        let (payload, compressed, raw_len) = self.compress(&entry.value)?;
        let stored_value = if compressed {
            serde_json::json!({ "__raffel_gzip__": hex_encode(&payload) })
        } else {
            entry.value.clone()
        };
        // Sized off `stored_value`, not the raw compressed bytes: the hex
        // encoding plus JSON-object wrapper is what's actually resident, and
        // roughly doubles the byte count of the underlying gzip payload.
        let size_bytes = serde_json::to_vec(&stored_value)?.len() as u64;

        if let Some(cap) = {
            let sys = System::new();
            Some(self.effective_cap_bytes(&sys))
        } {
            if size_bytes > cap {
                return Err(RaffelError::resource_exhausted(format!(
                    "cache entry for '{key}' ({size_bytes} bytes) exceeds the effective memory cap ({cap} bytes)"
                )));
            }
            while self.inner.current_bytes.load(Ordering::SeqCst) + size_bytes > cap {
                if !self.evict_one(EvictReason::Memory) {
                    break;
                }
            }
        }

        if let Some(max_size) = self.config.max_size {
            while self.inner.entries.lock().unwrap().len() >= max_size && !self.inner.entries.lock().unwrap().contains_key(key) {
                if !self.evict_one(EvictReason::Capacity) {
                    break;
                }
            }
        }

        let ordinal = self.inner.ordinal.fetch_add(1, Ordering::SeqCst);
        let previous_bytes = {
            let mut meta = self.inner.meta.lock().unwrap();
            let previous = meta.insert(
                key.to_string(),
                EntryMeta { last_access: ordinal, insert_order: ordinal, size_bytes, expires_at: entry.expires_at },
            );
            previous.map(|m| m.size_bytes).unwrap_or(0)
        };
        self.inner.entries.lock().unwrap().insert(
            key.to_string(),
            CacheEntry { value: stored_value, compressed, ..entry },
        );
        self.inner.current_bytes.fetch_sub(previous_bytes, Ordering::SeqCst);
        self.inner.current_bytes.fetch_add(size_bytes, Ordering::SeqCst);

        let mut stats = self.inner.stats.lock().unwrap();
        if compressed {
            stats.compressed_entries += 1;
        } else {
            stats.uncompressed_entries += 1;
        }
        stats.raw_bytes_total += raw_len as u64;
        stats.stored_bytes_total += size_bytes;

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), RaffelError> {
        self.remove_entry(key, EvictReason::Capacity);
        Ok(())
    }

    async fn clear(&self, prefix: Option<&str>) -> Result<(), RaffelError> {
        let keys: Vec<String> = {
            let entries = self.inner.entries.lock().unwrap();
            match prefix {
                Some(p) => entries.keys().filter(|k| k.starts_with(p)).cloned().collect(),
                None => entries.keys().cloned().collect(),
            }
        };
        for key in keys {
            self.remove_entry(&key, EvictReason::Capacity);
        }
        Ok(())
    }

    async fn has(&self, key: &str) -> Result<bool, RaffelError> {
        Ok(self.inner.entries.lock().unwrap().contains_key(key))
    }

    async fn keys(&self, pattern: Option<&str>) -> Result<Vec<String>, RaffelError> {
        let entries = self.inner.entries.lock().unwrap();
        Ok(match pattern {
            Some(p) => {
                let compiled = raffel_runtime_api::CompiledPattern::compile(p);
                entries.keys().filter(|k| compiled.matches(k)).cloned().collect()
            }
            None => entries.keys().cloned().collect(),
        })
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        write!(s, "{b:02x}").unwrap();
    }
    s
}

fn hex_decode(s: &str) -> Vec<u8> {
    (0..s.len())
        .step_by(2)
        .filter_map(|i| s.get(i..i + 2).and_then(|pair| u8::from_str_radix(pair, 16).ok()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(value: serde_json::Value, ttl: Duration) -> CacheEntry {
        let now = SystemTime::now();
        CacheEntry { value, created_at: now, expires_at: now + ttl, tags: Vec::new(), compressed: false }
    }

    #[tokio::test]
    async fn set_then_get_round_trips_the_value() {
        let driver = MemoryCacheDriver::new(MemoryCacheConfig::default());
        driver.set("k1", entry(serde_json::json!({"n": 1}), Duration::from_secs(60))).await.unwrap();
        let got = driver.get("k1").await.unwrap().unwrap();
        assert_eq!(got.value, serde_json::json!({"n": 1}));
    }

    #[tokio::test]
    async fn evicts_lru_entry_once_over_max_size() {
        let driver = MemoryCacheDriver::new(MemoryCacheConfig { max_size: Some(2), ..MemoryCacheConfig::default() });
        driver.set("a", entry(serde_json::json!(1), Duration::from_secs(60))).await.unwrap();
        driver.set("b", entry(serde_json::json!(2), Duration::from_secs(60))).await.unwrap();
        driver.get("a").await.unwrap();
        driver.set("c", entry(serde_json::json!(3), Duration::from_secs(60))).await.unwrap();

        assert!(driver.has("a").await.unwrap(), "a was just accessed, b should be evicted instead");
        assert!(!driver.has("b").await.unwrap());
        assert!(driver.has("c").await.unwrap());
    }

    #[tokio::test]
    async fn delete_removes_the_entry() {
        let driver = MemoryCacheDriver::new(MemoryCacheConfig::default());
        driver.set("k1", entry(serde_json::json!(1), Duration::from_secs(60))).await.unwrap();
        driver.delete("k1").await.unwrap();
        assert!(driver.get("k1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn clear_with_prefix_only_removes_matching_keys() {
        let driver = MemoryCacheDriver::new(MemoryCacheConfig::default());
        driver.set("users.1", entry(serde_json::json!(1), Duration::from_secs(60))).await.unwrap();
        driver.set("orders.1", entry(serde_json::json!(1), Duration::from_secs(60))).await.unwrap();
        driver.clear(Some("users.")).await.unwrap();
        assert!(!driver.has("users.1").await.unwrap());
        assert!(driver.has("orders.1").await.unwrap());
    }

    #[tokio::test]
    async fn compression_round_trips_large_values() {
        let big = serde_json::json!({"data": "x".repeat(4096)});
        let driver = MemoryCacheDriver::new(MemoryCacheConfig { compression_threshold_bytes: Some(128), ..MemoryCacheConfig::default() });
        driver.set("big", entry(big, Duration::from_secs(60))).await.unwrap();
        let got = driver.get("big").await.unwrap().unwrap();
        assert!(got.compressed);
        let stats = driver.stats();
        assert_eq!(stats.compressed_entries, 1);
    }

    #[test]
    fn container_memory_falls_back_to_system_total_outside_a_cgroup() {
        let sys = System::new();
        let bytes = MemoryCacheDriver::container_memory_bytes(&sys);
        assert!(bytes > 0 || sys.total_memory() == 0);
    }
}
