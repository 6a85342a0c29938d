/*
 * Copyright Raffel Contributors
 * SPDX-License-Identifier: Apache-2.0
 */

//! The Raffel façade: [`Registry`](raffel_runtime_api::Registry) construction,
//! default interceptor wiring, and the small adapter-boundary traits
//! (`Adapter`, `StartupOptions`) concrete protocol listeners implement
//! against (spec §1, §4.3, §4.4, §4.10, §6).
//!
//! This crate does not listen on a socket. It assembles the pieces every
//! deployment needs regardless of transport — a locked, write-once registry,
//! a router whose chain always starts with the request-id interceptor
//! followed by ambient tracing/logging — and then hands the assembled
//! [`raffel_runtime::Router`] to whatever [`Adapter`] the embedder supplies.

pub mod adapter;
pub mod builder;

pub use adapter::Adapter;
pub use builder::{Raffel, RaffelBuilder};

pub use raffel_runtime_api::{
    from_fn, from_fn_event, CompiledPattern, DeliverySemantics, EventHandler, GlobalInterceptorConfig, HandlerDescriptor,
    InMemoryRegistry, ProcedureHandler, RaffelEnv, Registry, RouterConfig, StartupOptions, StreamHandler,
};
pub use raffel_runtime::{EventDeliveryDriver, Router};
pub use raffel_types::{Envelope, EnvelopeType, ErrorCode, RaffelError};
