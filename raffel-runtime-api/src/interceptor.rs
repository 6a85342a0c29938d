/*
 * Copyright Raffel Contributors
 * SPDX-License-Identifier: Apache-2.0
 */

//! The interceptor contract (spec §3, §4.4): middleware of signature
//! `(envelope, ctx, next) -> result` composed into a chain around each
//! handler. Modeled after the teacher's `Intercept` trait
//! (`aws-smithy-runtime-api::client::interceptors`), but collapsed to the
//! single onion-model hook Raffel's pipeline actually needs instead of the
//! teacher's twelve named lifecycle phases.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use raffel_types::{Envelope, RaffelError, RequestState};

pub type InterceptorResult = Result<Envelope, RaffelError>;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

type NextFn = dyn for<'a> Fn(Envelope, &'a mut RequestState) -> BoxFuture<'a, InterceptorResult> + Send + Sync;

/// The continuation passed to an interceptor: calling it runs the remainder
/// of the chain (the next interceptor, or ultimately the handler) and
/// returns its result.
///
/// Callable more than once and cheaply cloneable (it's an `Arc` under the
/// hood) because resilience interceptors — retry, circuit breaker — need to
/// invoke the downstream chain repeatedly for a single incoming envelope,
/// not just pass through it once.
pub struct Next {
    inner: Arc<NextFn>,
}

impl Next {
    pub fn new<F>(f: F) -> Self
    where
        F: for<'a> Fn(Envelope, &'a mut RequestState) -> BoxFuture<'a, InterceptorResult> + Send + Sync + 'static,
    {
        Self { inner: Arc::new(f) }
    }

    pub async fn call(&self, envelope: Envelope, state: &mut RequestState) -> InterceptorResult {
        (self.inner)(envelope, state).await
    }
}

impl Clone for Next {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

/// Middleware around a handler invocation (spec §3: `InterceptorChain`).
///
/// Implementors that only need to observe or transform the envelope without
/// branching can ignore `next` entirely; implementors that need to run code
/// both before and after the downstream call hold onto state across the
/// `.await` the same way any async function would.
#[async_trait]
pub trait Interceptor: Send + Sync {
    /// A stable name, used in error messages and tracing spans. Defaults to
    /// the Rust type name, which is adequate for most interceptors; resilience
    /// interceptors override it to include their procedure/pattern scope.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    async fn intercept(
        &self,
        envelope: Envelope,
        state: &mut RequestState,
        next: Next,
    ) -> InterceptorResult;
}

/// A reference-counted, dynamically dispatched interceptor, the unit stored
/// in a [`crate::registry::HandlerDescriptor`]'s interceptor lists and in the
/// router's global chain.
pub type SharedInterceptor = Arc<dyn Interceptor>;

/// Adapts a plain async closure of the interceptor's shape into a
/// [`SharedInterceptor`], for interceptors simple enough not to need their
/// own named type (mirrors `aws-smithy-runtime`'s closure-based test
/// interceptors).
pub struct FnInterceptor<F> {
    name: String,
    f: F,
}

impl<F> FnInterceptor<F> {
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self { name: name.into(), f }
    }
}

#[async_trait]
impl<F> Interceptor for FnInterceptor<F>
where
    F: for<'a> Fn(Envelope, &'a mut RequestState, Next) -> BoxFuture<'a, InterceptorResult> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn intercept(&self, envelope: Envelope, state: &mut RequestState, next: Next) -> InterceptorResult {
        (self.f)(envelope, state, next).await
    }
}
