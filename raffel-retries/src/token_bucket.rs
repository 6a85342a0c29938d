/*
 * Copyright Raffel Contributors
 * SPDX-License-Identifier: Apache-2.0
 */

//! A retry budget shared across concurrent logical requests to the same
//! procedure (SPEC_FULL.md supplemented feature #1), grounded in
//! `aws-smithy-runtime::client::retries::token_bucket`. Off by default
//! (unlimited capacity) so it is invisible unless a caller opts in, and a
//! permit is only ever required starting from the *second* attempt — the
//! first attempt at a procedure is never budget-gated.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

const DEFAULT_CAPACITY: usize = 500;
const DEFAULT_RETRY_COST: u32 = 5;

/// Holding this permit reserves the retry's cost from the bucket; dropping it
/// (on request completion, success or final failure) returns nothing by
/// default — tokens regenerate only via [`TokenBucket::replenish`], invoked
/// by the retry interceptor after an attempt succeeds.
pub type RetryPermit = OwnedSemaphorePermit;

#[derive(Clone, Debug)]
pub struct TokenBucket {
    semaphore: Arc<Semaphore>,
    max_permits: usize,
    retry_cost: u32,
}

impl Default for TokenBucket {
    fn default() -> Self {
        Self::unlimited()
    }
}

impl TokenBucket {
    pub fn new(capacity: usize, retry_cost: u32) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            max_permits: capacity,
            retry_cost,
        }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_CAPACITY, DEFAULT_RETRY_COST)
    }

    /// A bucket with effectively unlimited capacity and zero retry cost: the
    /// default, making the budget feature a no-op unless configured.
    pub fn unlimited() -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(Semaphore::MAX_PERMITS)),
            max_permits: Semaphore::MAX_PERMITS,
            retry_cost: 0,
        }
    }

    /// Attempts to draw a permit for one retry attempt. Returns `None` when
    /// the budget is exhausted, meaning the retry interceptor should stop
    /// retrying and surface the last error instead.
    pub fn try_acquire(&self) -> Option<RetryPermit> {
        self.semaphore.clone().try_acquire_many_owned(self.retry_cost).ok()
    }

    /// Returns tokens to the bucket after a retried request eventually
    /// succeeds, up to `max_permits`.
    pub fn replenish(&self, amount: u32) {
        let available = self.semaphore.available_permits();
        if available >= self.max_permits {
            return;
        }
        let room = self.max_permits - available;
        self.semaphore.add_permits((amount as usize).min(room));
    }
}
