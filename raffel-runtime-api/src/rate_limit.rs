/*
 * Copyright Raffel Contributors
 * SPDX-License-Identifier: Apache-2.0
 */

//! The pluggable rate-limit driver contract (spec §4.8). "Drivers may be
//! memory, filesystem, or remote; correctness of rate counts across
//! processes is the driver's concern" — this crate only fixes the boundary.

use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use raffel_types::RaffelError;

/// Result of admitting one more request under `key`'s sliding window.
#[derive(Debug, Clone, Copy)]
pub struct WindowState {
    pub count: u64,
    pub reset_at: SystemTime,
}

#[async_trait]
pub trait RateLimitDriver: Send + Sync {
    /// Records one request under `key` and returns the updated window state.
    async fn increment(&self, key: &str, window: Duration) -> Result<WindowState, RaffelError>;

    /// Clears all recorded requests for `key`.
    async fn reset(&self, key: &str) -> Result<(), RaffelError>;
}
