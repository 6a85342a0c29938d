/*
 * Copyright Raffel Contributors
 * SPDX-License-Identifier: Apache-2.0
 */

//! An in-process sliding-window [`RateLimitDriver`] (spec §4.8): per-key
//! timestamps of requests within the window, pruned lazily on each
//! `increment`. Drivers tracking counts across processes (Redis, a shared
//! database) implement the same trait; correctness of cross-process counts is
//! explicitly the driver's concern, not this interceptor's (spec §4.8).

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use raffel_types::RaffelError;

use raffel_runtime_api::{RateLimitDriver, WindowState};

#[derive(Default)]
struct Bucket {
    timestamps: VecDeque<SystemTime>,
}

/// Sliding-window rate limiting kept entirely in memory: fine for a single
/// process; multi-process deployments need a shared driver instead.
#[derive(Default)]
pub struct MemoryRateLimitDriver {
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl MemoryRateLimitDriver {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RateLimitDriver for MemoryRateLimitDriver {
    async fn increment(&self, key: &str, window: Duration) -> Result<WindowState, RaffelError> {
        let now = SystemTime::now();
        let mut buckets = self.buckets.lock().unwrap();
        let bucket = buckets.entry(key.to_string()).or_default();

        while let Some(&oldest) = bucket.timestamps.front() {
            if now.duration_since(oldest).unwrap_or_default() >= window {
                bucket.timestamps.pop_front();
            } else {
                break;
            }
        }

        bucket.timestamps.push_back(now);
        let count = bucket.timestamps.len() as u64;
        let reset_at = bucket.timestamps.front().copied().unwrap_or(now) + window;
        Ok(WindowState { count, reset_at })
    }

    async fn reset(&self, key: &str) -> Result<(), RaffelError> {
        self.buckets.lock().unwrap().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn count_increments_within_the_window() {
        let driver = MemoryRateLimitDriver::new();
        let window = Duration::from_secs(60);
        let a = driver.increment("k1", window).await.unwrap();
        let b = driver.increment("k1", window).await.unwrap();
        assert_eq!(a.count, 1);
        assert_eq!(b.count, 2);
    }

    #[tokio::test]
    async fn reset_clears_the_bucket() {
        let driver = MemoryRateLimitDriver::new();
        driver.increment("k1", Duration::from_secs(60)).await.unwrap();
        driver.reset("k1").await.unwrap();
        let state = driver.increment("k1", Duration::from_secs(60)).await.unwrap();
        assert_eq!(state.count, 1);
    }

    #[tokio::test]
    async fn distinct_keys_have_independent_windows() {
        let driver = MemoryRateLimitDriver::new();
        driver.increment("a", Duration::from_secs(60)).await.unwrap();
        driver.increment("a", Duration::from_secs(60)).await.unwrap();
        let b = driver.increment("b", Duration::from_secs(60)).await.unwrap();
        assert_eq!(b.count, 1);
    }
}
