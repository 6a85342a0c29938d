/*
 * Copyright Raffel Contributors
 * SPDX-License-Identifier: Apache-2.0
 */

//! Pipeline combinators (spec §4.5): `compose`, `when`, `forPattern`,
//! `except`, `branch`. Every combinator here is transparent — when its
//! wrapped interceptor chooses to pass through, the result returned is
//! exactly what `next()` returned, with no metadata mutation of its own.

use async_trait::async_trait;
use raffel_types::{Envelope, RequestState};

use raffel_runtime_api::{CompiledPattern, Interceptor, InterceptorResult, Next, SharedInterceptor};

/// `compose(i1, i2, ..)`: `i1` runs outermost, its `next` is `i2`'s
/// intercept call, and so on down to the combinator's own `next`, which runs
/// after the last interceptor in the list (spec §4.5).
pub struct Compose {
    interceptors: Vec<SharedInterceptor>,
}

impl Compose {
    pub fn new(interceptors: Vec<SharedInterceptor>) -> Self {
        Self { interceptors }
    }
}

#[async_trait]
impl Interceptor for Compose {
    fn name(&self) -> &str {
        "compose"
    }

    async fn intercept(&self, envelope: Envelope, state: &mut RequestState, next: Next) -> InterceptorResult {
        run_chain(self.interceptors.clone(), envelope, state, next).await
    }
}

/// Recursively threads `envelope`/`state` through `interceptors`, falling
/// back to `tail` once the list is exhausted. Takes an owned `Vec` (cheap —
/// its elements are `Arc`s) rather than a borrowed slice so the resulting
/// `Next` closures carry no borrowed lifetime and can be invoked more than
/// once, as retry and the circuit breaker need.
fn run_chain(
    interceptors: Vec<SharedInterceptor>,
    envelope: Envelope,
    state: &mut RequestState,
    tail: Next,
) -> raffel_runtime_api::BoxFuture<'_, InterceptorResult> {
    Box::pin(async move {
        let mut remaining = interceptors.into_iter();
        match remaining.next() {
            None => tail.call(envelope, state).await,
            Some(current) => {
                let rest: Vec<SharedInterceptor> = remaining.collect();
                let next = Next::new(move |envelope, state| run_chain(rest.clone(), envelope, state, tail.clone()));
                current.intercept(envelope, state, next).await
            }
        }
    })
}

/// `when(predicate, interceptor)`: runs `interceptor` only if
/// `predicate(envelope)` is true, otherwise passes straight through to
/// `next` (spec §4.5).
pub struct When<P> {
    predicate: P,
    interceptor: SharedInterceptor,
}

impl<P> When<P>
where
    P: Fn(&Envelope) -> bool + Send + Sync,
{
    pub fn new(predicate: P, interceptor: SharedInterceptor) -> Self {
        Self { predicate, interceptor }
    }
}

#[async_trait]
impl<P> Interceptor for When<P>
where
    P: Fn(&Envelope) -> bool + Send + Sync,
{
    fn name(&self) -> &str {
        "when"
    }

    async fn intercept(&self, envelope: Envelope, state: &mut RequestState, next: Next) -> InterceptorResult {
        if (self.predicate)(&envelope) {
            self.interceptor.intercept(envelope, state, next).await
        } else {
            next.call(envelope, state).await
        }
    }
}

/// `forPattern(pattern, interceptor)`: pattern-scoped version of `when`,
/// matching `envelope.procedure` against a compiled glob (spec §4.3, §4.5).
pub struct ForPattern {
    pattern: CompiledPattern,
    interceptor: SharedInterceptor,
}

impl ForPattern {
    pub fn new(pattern: CompiledPattern, interceptor: SharedInterceptor) -> Self {
        Self { pattern, interceptor }
    }
}

#[async_trait]
impl Interceptor for ForPattern {
    fn name(&self) -> &str {
        "for_pattern"
    }

    async fn intercept(&self, envelope: Envelope, state: &mut RequestState, next: Next) -> InterceptorResult {
        if self.pattern.matches(&envelope.procedure) {
            self.interceptor.intercept(envelope, state, next).await
        } else {
            next.call(envelope, state).await
        }
    }
}

/// `except(patterns, interceptor)`: inverse of `forPattern` — runs
/// `interceptor` for every procedure that matches none of `patterns` (spec
/// §4.5).
pub struct Except {
    patterns: Vec<CompiledPattern>,
    interceptor: SharedInterceptor,
}

impl Except {
    pub fn new(patterns: Vec<CompiledPattern>, interceptor: SharedInterceptor) -> Self {
        Self { patterns, interceptor }
    }
}

#[async_trait]
impl Interceptor for Except {
    fn name(&self) -> &str {
        "except"
    }

    async fn intercept(&self, envelope: Envelope, state: &mut RequestState, next: Next) -> InterceptorResult {
        let excluded = self.patterns.iter().any(|p| p.matches(&envelope.procedure));
        if excluded {
            next.call(envelope, state).await
        } else {
            self.interceptor.intercept(envelope, state, next).await
        }
    }
}

/// `branch(predicate, onTrue, onFalse?)`: selects one of two interceptors, or
/// passes through when `predicate` is false and no `onFalse` is given (spec
/// §4.5).
pub struct Branch<P> {
    predicate: P,
    on_true: SharedInterceptor,
    on_false: Option<SharedInterceptor>,
}

impl<P> Branch<P>
where
    P: Fn(&Envelope) -> bool + Send + Sync,
{
    pub fn new(predicate: P, on_true: SharedInterceptor, on_false: Option<SharedInterceptor>) -> Self {
        Self { predicate, on_true, on_false }
    }
}

#[async_trait]
impl<P> Interceptor for Branch<P>
where
    P: Fn(&Envelope) -> bool + Send + Sync,
{
    fn name(&self) -> &str {
        "branch"
    }

    async fn intercept(&self, envelope: Envelope, state: &mut RequestState, next: Next) -> InterceptorResult {
        if (self.predicate)(&envelope) {
            self.on_true.intercept(envelope, state, next).await
        } else if let Some(on_false) = &self.on_false {
            on_false.intercept(envelope, state, next).await
        } else {
            next.call(envelope, state).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use raffel_async::SharedTimeSource;
    use raffel_runtime_api::FnInterceptor;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn fresh_envelope(procedure: &str) -> Envelope {
        Envelope::new_request("0123456789abcdef", procedure, serde_json::json!({}), SharedTimeSource::default())
    }

    fn passthrough_next() -> Next {
        Next::new(|envelope, _state| Box::pin(async move { Ok(envelope) }))
    }

    #[tokio::test]
    async fn when_skips_the_interceptor_if_predicate_is_false() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let inner: SharedInterceptor = Arc::new(FnInterceptor::new("mark", move |envelope, state, next| {
            let calls = calls_clone.clone();
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                next.call(envelope, state).await
            })
        }));
        let combinator = When::new(|envelope: &Envelope| envelope.procedure == "users.get", inner);
        let mut state = RequestState::default();
        combinator
            .intercept(fresh_envelope("users.list"), &mut state, passthrough_next())
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn for_pattern_runs_only_on_matching_procedures() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let inner: SharedInterceptor = Arc::new(FnInterceptor::new("mark", move |envelope, state, next| {
            let calls = calls_clone.clone();
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                next.call(envelope, state).await
            })
        }));
        let combinator = ForPattern::new(CompiledPattern::compile("admin.**"), inner);
        let mut state = RequestState::default();
        combinator
            .intercept(fresh_envelope("admin.users.delete"), &mut state, passthrough_next())
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        combinator
            .intercept(fresh_envelope("users.get"), &mut state, passthrough_next())
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn compose_runs_interceptors_in_order() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let make = |label: &'static str, order: Arc<std::sync::Mutex<Vec<&'static str>>>| -> SharedInterceptor {
            Arc::new(FnInterceptor::new(label, move |envelope, state, next| {
                let order = order.clone();
                Box::pin(async move {
                    order.lock().unwrap().push(label);
                    next.call(envelope, state).await
                })
            }))
        };
        let compose = Compose::new(vec![make("first", order.clone()), make("second", order.clone())]);
        let mut state = RequestState::default();
        compose
            .intercept(fresh_envelope("users.get"), &mut state, passthrough_next())
            .await
            .unwrap();
        assert_eq!(*order.lock().unwrap(), vec!["first", "second"]);
    }
}
