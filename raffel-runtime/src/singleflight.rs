/*
 * Copyright Raffel Contributors
 * SPDX-License-Identifier: Apache-2.0
 */

//! The single-flight coalescing primitive shared by the cache interceptor's
//! miss path and the dedup interceptor (spec §4.7: "Concurrent misses for
//! the same key coalesce: only one `next()` runs ... This is an absolute
//! invariant even across the SWR boundary"; spec §4.9: "Identical to cache's
//! single-flight but without storage").
//!
//! Built on [`tokio::sync::OnceCell`] rather than a hand-rolled waiter list:
//! every concurrent caller for a given key supplies its own (unpolled, and
//! so side-effect-free until awaited) downstream future to
//! [`OnceCell::get_or_init`], but Tokio guarantees only the first caller's
//! future is ever actually polled to completion — the rest simply await the
//! shared result. This is lock-free across keys: [`DashMap`] shards
//! independently per key, so no lock is ever held across a `next()` call for
//! an unrelated fingerprint (spec §5).

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use raffel_types::{ErrorCode, RaffelError};
use tokio::sync::OnceCell;

/// A [`RaffelError`] stripped of its non-`Clone` `cause`, so it can be shared
/// across every waiter coalesced onto the same in-flight call.
#[derive(Debug, Clone)]
pub struct OutcomeError {
    pub code: ErrorCode,
    pub message: String,
    pub details: Option<serde_json::Value>,
    pub retry_after: Option<Duration>,
}

impl From<&RaffelError> for OutcomeError {
    fn from(err: &RaffelError) -> Self {
        Self {
            code: err.code,
            message: err.message.clone(),
            details: err.details.clone(),
            retry_after: err.retry_after,
        }
    }
}

impl From<OutcomeError> for RaffelError {
    fn from(err: OutcomeError) -> Self {
        let mut built = RaffelError::new(err.code, err.message);
        built.details = err.details;
        built.retry_after = err.retry_after;
        built
    }
}

pub type Outcome = Result<serde_json::Value, OutcomeError>;

/// Per-key in-flight coalescing table.
#[derive(Default)]
pub struct SingleFlight {
    inflight: DashMap<String, Arc<OnceCell<Outcome>>>,
}

impl SingleFlight {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Coalesces every concurrent caller sharing `key` onto a single
    /// execution of `task`. When `ttl` is set, a background timer evicts the
    /// in-flight entry after `ttl` even if `task` hasn't resolved, bounding
    /// memory if a downstream call hangs (spec §4.9: "Fingerprint TTL
    /// defaults to 30 s to bound memory if a call hangs") — a caller arriving
    /// after that eviction starts a fresh, independently-coalesced call
    /// rather than waiting on the stuck one forever.
    pub async fn coalesce<Fut>(self: &Arc<Self>, key: &str, ttl: Option<Duration>, task: Fut) -> Outcome
    where
        Fut: Future<Output = Outcome>,
    {
        let cell = self.inflight.entry(key.to_string()).or_insert_with(|| Arc::new(OnceCell::new())).clone();

        if let Some(ttl) = ttl {
            let this = self.clone();
            let key_owned = key.to_string();
            let cell_for_cleanup = cell.clone();
            tokio::spawn(async move {
                tokio::time::sleep(ttl).await;
                this.inflight.remove_if(&key_owned, |_, existing| Arc::ptr_eq(existing, &cell_for_cleanup));
            });
        }

        let outcome = cell.get_or_init(|| task).await.clone();
        self.inflight.remove_if(key, |_, existing| Arc::ptr_eq(existing, &cell));
        outcome
    }

    #[cfg(test)]
    pub fn inflight_count(&self) -> usize {
        self.inflight.len()
    }
}
