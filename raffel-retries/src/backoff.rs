/*
 * Copyright Raffel Contributors
 * SPDX-License-Identifier: Apache-2.0
 */

//! Retry delay math (spec §4.6): linear, exponential, and decorrelated-jitter
//! backoff, all capped at `maxDelayMs` and nudged by `±25%` jitter except
//! `decorrelated`, which already randomizes.

use std::time::Duration;

/// `strategy ∈ {linear, exponential, decorrelated}` (spec §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffStrategy {
    Linear,
    Exponential,
    Decorrelated,
}

/// The retry delay inputs from spec §4.6, independent of the rest of the
/// retry interceptor's config (`maxAttempts`, `retryableCodes`, ...) so the
/// math can be unit tested without constructing an interceptor.
#[derive(Debug, Clone, Copy)]
pub struct BackoffConfig {
    pub strategy: BackoffStrategy,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub jitter: bool,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            strategy: BackoffStrategy::Exponential,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(20),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

/// Computes the delay before retry attempt `attempt` (1-indexed: the first
/// retry, i.e. the second overall attempt, is `attempt=1`). `previous_delay`
/// is only consulted by the `decorrelated` strategy.
///
/// `rand01` supplies a uniform `[0, 1)` sample; tests pass a deterministic
/// sequence instead of `fastrand` so recorded delays are reproducible (spec
/// §8 boundary scenario 4 asserts exact recorded delays).
pub fn compute_delay(config: &BackoffConfig, attempt: u32, previous_delay: Duration, rand01: impl FnOnce() -> f64) -> Duration {
    let base_ms = config.initial_delay.as_secs_f64() * 1000.0;
    let max_ms = config.max_delay.as_secs_f64() * 1000.0;

    let raw_ms = match config.strategy {
        BackoffStrategy::Linear => base_ms * attempt as f64,
        BackoffStrategy::Exponential => base_ms * config.multiplier.powi(attempt as i32 - 1),
        BackoffStrategy::Decorrelated => {
            let prev_ms = previous_delay.as_secs_f64() * 1000.0;
            let upper = (prev_ms * 3.0).min(max_ms).max(base_ms);
            base_ms + rand01() * (upper - base_ms)
        }
    };

    let capped_ms = raw_ms.min(max_ms);

    let jittered_ms = if config.jitter && config.strategy != BackoffStrategy::Decorrelated {
        let jitter_factor = 1.0 + (rand01() * 2.0 - 1.0) * 0.25;
        (capped_ms * jitter_factor).max(0.0)
    } else {
        capped_ms
    };

    Duration::from_secs_f64((jittered_ms / 1000.0).min(max_ms / 1000.0))
}

/// Parses an error's `Retry-After` value per spec §4.6: seconds or an
/// HTTP-date, used only when `respectRetryAfter` is enabled, capped at
/// `maxDelayMs`.
pub fn resolve_retry_after(retry_after: Duration, max_delay: Duration) -> Duration {
    retry_after.min(max_delay)
}
