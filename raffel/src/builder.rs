/*
 * Copyright Raffel Contributors
 * SPDX-License-Identifier: Apache-2.0
 */

//! Registry construction and default interceptor wiring (spec §4.3, §4.4,
//! §4.10). [`RaffelBuilder`] assembles the chain the router will run in the
//! order spec §4.4 step 1-2 describes — request-id first (built into
//! [`Router`] itself), then the global interceptors registered here in
//! order — and hands the result to an [`Adapter`].

use std::sync::Arc;
use std::time::Duration;

use raffel_runtime::{EventDeliveryDriver, LoggingInterceptor, Router, RouterBuilder, TimeoutInterceptor, TracingSpanInterceptor};
use raffel_runtime_api::{
    GlobalInterceptorConfig, HandlerDescriptor, InMemoryRegistry, Registry, RouterConfig, SharedInterceptor, StartupOptions,
};
use raffel_types::RaffelError;

use crate::adapter::Adapter;

/// Default global interceptors every Raffel instance wires ahead of any
/// caller-supplied ones (spec §4.10: tracing spans and guaranteed-run
/// logging are ambient, not opt-in). `defaultTimeoutMs`, when configured,
/// becomes a global timeout wrapping every procedure (spec §4.6).
fn default_interceptors(config: &GlobalInterceptorConfig) -> Vec<SharedInterceptor> {
    let excluded: Vec<&str> = config.logging_excluded_procedures.iter().map(String::as_str).collect();
    let mut interceptors: Vec<SharedInterceptor> = vec![Arc::new(TracingSpanInterceptor), Arc::new(LoggingInterceptor::new(&excluded))];
    if let Some(ms) = config.default_timeout_ms {
        interceptors.push(Arc::new(TimeoutInterceptor::new(Duration::from_millis(ms))));
    }
    interceptors
}

/// Builds a [`Raffel`] instance: owns the registry, assembles the default
/// interceptor chain, and accepts caller-supplied global/pattern-scoped
/// interceptors and a validator before [`RaffelBuilder::build`] freezes
/// everything into a [`Router`] (spec §4.3, §4.4).
pub struct RaffelBuilder {
    registry: Arc<InMemoryRegistry>,
    router_builder: RouterBuilder,
    startup: StartupOptions,
}

impl RaffelBuilder {
    /// Starts from bare startup options; no interceptor defaults besides the
    /// ambient tracing/logging pair (spec §6: `defaultTimeoutMs` is an
    /// interceptor default, not a startup option, so it's left unset here).
    pub fn new(startup: StartupOptions) -> Self {
        Self::with_config(RouterConfig { startup, interceptors: GlobalInterceptorConfig::default() })
    }

    pub fn with_config(config: RouterConfig) -> Self {
        let registry: Arc<InMemoryRegistry> = Arc::new(InMemoryRegistry::new());
        let mut router_builder = RouterBuilder::new(registry.clone());
        for interceptor in default_interceptors(&config.interceptors) {
            router_builder = router_builder.with_global_interceptor(interceptor);
        }
        Self { registry, router_builder, startup: config.startup }
    }

    /// The registry backing this builder, for registering handlers directly
    /// against [`raffel_runtime_api::Registry`] when [`Self::register`]'s
    /// consuming-`self` style doesn't fit (e.g. registering from a loop).
    pub fn registry(&self) -> Arc<InMemoryRegistry> {
        self.registry.clone()
    }

    /// Registers a handler (spec §4.3: write-once per name, rejected once
    /// the router has called `start()`).
    pub fn register(self, descriptor: HandlerDescriptor) -> Result<Self, RaffelError> {
        self.registry.register(descriptor)?;
        Ok(self)
    }

    /// Adds a global interceptor after the defaults, in registration order
    /// (spec §4.4 step 2).
    pub fn with_global_interceptor(mut self, interceptor: SharedInterceptor) -> Self {
        self.router_builder = self.router_builder.with_global_interceptor(interceptor);
        self
    }

    /// Adds a pattern-scoped interceptor (spec §4.4 step 3).
    pub fn with_pattern_interceptor(mut self, pattern: &str, interceptor: SharedInterceptor) -> Self {
        self.router_builder = self.router_builder.with_pattern_interceptor(pattern, interceptor);
        self
    }

    pub fn with_validator(mut self, validator: Arc<dyn raffel_runtime::Validator>) -> Self {
        self.router_builder = self.router_builder.with_validator(validator);
        self
    }

    /// Freezes the interceptor chain into a [`Router`]. The registry stays
    /// open for registration until [`Raffel::serve`] calls `start()`.
    pub fn build(self) -> Raffel {
        Raffel { registry: self.registry, router: Arc::new(self.router_builder.build()), startup: self.startup }
    }
}

/// An assembled router plus the startup options an [`Adapter`] needs to bind
/// a listener (spec §6). This is the top-level handle most embedders hold.
pub struct Raffel {
    registry: Arc<InMemoryRegistry>,
    router: Arc<Router>,
    startup: StartupOptions,
}

impl Raffel {
    pub fn router(&self) -> Arc<Router> {
        self.router.clone()
    }

    pub fn registry(&self) -> Arc<InMemoryRegistry> {
        self.registry.clone()
    }

    pub fn startup_options(&self) -> &StartupOptions {
        &self.startup
    }

    /// Builds a driver for post-ack event delivery (spec §4.4 "Event
    /// delivery"), honoring each `kind=event` handler's registered
    /// [`raffel_runtime_api::DeliverySemantics`]. Adapters call this once
    /// and hold onto the result; it has no shared state with the router
    /// beyond the handle itself.
    pub fn event_delivery(&self) -> EventDeliveryDriver {
        EventDeliveryDriver::new(self.router.clone())
    }

    /// Locks the registry (spec §5) and hands the router to `adapter`,
    /// returning once the adapter's `serve` future resolves (typically on
    /// shutdown).
    pub async fn serve(&self, adapter: Arc<dyn Adapter>) -> Result<(), RaffelError> {
        self.router.start();
        tracing::info!(adapter = adapter.name(), port = self.startup.port, "starting adapter");
        adapter.serve(self.router.clone(), self.startup.clone()).await
    }
}
