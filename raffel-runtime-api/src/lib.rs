/*
 * Copyright Raffel Contributors
 * SPDX-License-Identifier: Apache-2.0
 */

//! Traits and contracts shared by the router, the resilience interceptors,
//! and every pluggable driver: [`Interceptor`], [`Registry`],
//! [`cache::CacheStore`], [`rate_limit::RateLimitDriver`], and the
//! process-level configuration shapes in [`config`].

pub mod cache;
pub mod config;
pub mod interceptor;
pub mod rate_limit;
pub mod registry;

pub use cache::{CacheEntry, CacheStore};
pub use config::{CorsConfig, GlobalInterceptorConfig, RaffelEnv, RouterConfig, StartupOptions, TlsConfig};
pub use interceptor::{BoxFuture, FnInterceptor, Interceptor, InterceptorResult, Next, SharedInterceptor};
pub use rate_limit::{RateLimitDriver, WindowState};
pub use registry::{
    from_fn, from_fn_event, CompiledPattern, DeliverySemantics, EventHandler, FnEventHandler, FnProcedureHandler,
    HandlerDescriptor, HandlerKind, InMemoryRegistry, PatternCache, ProcedureHandler, Registry, StreamHandler,
};
