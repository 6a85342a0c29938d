/*
 * Copyright Raffel Contributors
 * SPDX-License-Identifier: Apache-2.0
 */

//! Timeout, retry, circuit breaker, bulkhead, and fallback (spec §4.6,
//! component C6) — the resilience interceptors whose interplay the router's
//! chain assembly order is designed to keep correct under load.

pub mod bulkhead;
pub mod circuit_breaker;
pub mod fallback;
pub mod retry;
pub mod timeout;

pub use bulkhead::{BulkheadConfig, BulkheadInterceptor, BulkheadSnapshot};
pub use circuit_breaker::{CircuitBreakerConfig, CircuitBreakerInterceptor, CircuitBreakerManager, CircuitPhase, CircuitState};
pub use fallback::{FallbackConfig, FallbackInterceptor};
pub use retry::{OnRetryHook, RetryConfig, RetryInterceptor};
pub use timeout::TimeoutInterceptor;
