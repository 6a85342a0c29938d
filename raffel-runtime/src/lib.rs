/*
 * Copyright Raffel Contributors
 * SPDX-License-Identifier: Apache-2.0
 */

//! The Raffel router, pipeline combinators, and the resilience/cache/
//! rate-limit/dedup interceptors built on top of `raffel-runtime-api`'s
//! trait contracts (spec §4.4–§4.11, components C4–C9, C11).

pub mod cache;
pub mod combinators;
pub mod dedup;
pub mod event_delivery;
pub mod observability;
pub mod rate_limit;
pub mod resilience;
pub mod router;
pub mod singleflight;
pub mod stream;
pub mod validation;

pub use cache::{CacheAccess, CacheConfig, CacheInterceptor, EvictionPolicy, MemoryCacheConfig, MemoryCacheDriver, MemoryCacheStats};
pub use combinators::{Branch, Compose, Except, ForPattern, When};
pub use dedup::{DedupConfig, DedupInterceptor, DEFAULT_INFLIGHT_TTL};
pub use event_delivery::{EventDeliveryConfig, EventDeliveryDriver};
pub use observability::{LoggingInterceptor, RequestIdInterceptor, TracingSpanInterceptor};
pub use rate_limit::{MemoryRateLimitDriver, RateLimitConfig, RateLimitInterceptor, RateLimitRule};
pub use resilience::{
    BulkheadConfig, BulkheadInterceptor, BulkheadSnapshot, CircuitBreakerConfig, CircuitBreakerInterceptor, CircuitBreakerManager,
    CircuitPhase, CircuitState, FallbackConfig, FallbackInterceptor, OnRetryHook, RetryConfig, RetryInterceptor, TimeoutInterceptor,
};
pub use router::{Router, RouterBuilder};
pub use singleflight::SingleFlight;
pub use stream::StreamRegistry;
pub use validation::{NoopValidator, Validator};
