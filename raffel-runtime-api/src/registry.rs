/*
 * Copyright Raffel Contributors
 * SPDX-License-Identifier: Apache-2.0
 */

//! The handler registry (spec §4.3): maps a dotted procedure name to a
//! [`HandlerDescriptor`], plus the glob pattern language pattern-scoped
//! interceptors match against.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};

use raffel_types::{Context, RaffelError};

use crate::interceptor::SharedInterceptor;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Delivery semantics for `kind=event` handlers (spec §4.4, §9 Open Questions:
/// exactly-once is per-envelope-id deduplication over a retention window, not
/// a stronger cross-process guarantee).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliverySemantics {
    AtMostOnce,
    AtLeastOnce { max_attempts: u32 },
    ExactlyOnce { retention: std::time::Duration },
}

/// A unary procedure handler: `(payload, ctx) -> result`.
pub trait ProcedureHandler: Send + Sync {
    fn call<'a>(
        &'a self,
        payload: serde_json::Value,
        ctx: &'a Context,
    ) -> BoxFuture<'a, Result<serde_json::Value, RaffelError>>;
}

/// Wraps a plain async closure as a [`ProcedureHandler`], so handlers don't
/// need a named type unless they carry their own state.
pub struct FnProcedureHandler<F> {
    f: F,
}

impl<F, Fut> ProcedureHandler for FnProcedureHandler<F>
where
    F: Fn(serde_json::Value, &Context) -> Fut + Send + Sync,
    Fut: Future<Output = Result<serde_json::Value, RaffelError>> + Send + 'static,
{
    fn call<'a>(&'a self, payload: serde_json::Value, ctx: &'a Context) -> BoxFuture<'a, Result<serde_json::Value, RaffelError>> {
        Box::pin((self.f)(payload, ctx))
    }
}

pub fn from_fn<F, Fut>(f: F) -> Arc<dyn ProcedureHandler>
where
    F: Fn(serde_json::Value, &Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<serde_json::Value, RaffelError>> + Send + 'static,
{
    Arc::new(FnProcedureHandler { f })
}

/// Wraps a plain async closure as an [`EventHandler`], the event-kind
/// counterpart to [`from_fn`] above.
pub struct FnEventHandler<F> {
    f: F,
}

impl<F, Fut> EventHandler for FnEventHandler<F>
where
    F: Fn(serde_json::Value, &Context) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), RaffelError>> + Send + 'static,
{
    fn handle<'a>(&'a self, payload: serde_json::Value, ctx: &'a Context) -> BoxFuture<'a, Result<(), RaffelError>> {
        Box::pin((self.f)(payload, ctx))
    }
}

pub fn from_fn_event<F, Fut>(f: F) -> Arc<dyn EventHandler>
where
    F: Fn(serde_json::Value, &Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), RaffelError>> + Send + 'static,
{
    Arc::new(FnEventHandler { f })
}

/// A handler that produces a lazy sequence of envelopes (spec §3, §9:
/// "Dynamic handler signatures -> tagged variants"). Modeled as a channel
/// producer rather than a custom `Stream` trait: the handler pushes
/// `stream:data` payloads onto the sender side and the router/adapter reads
/// them off the receiver, which keeps this crate from needing a streaming
/// combinator dependency the spec doesn't otherwise call for.
pub trait StreamHandler: Send + Sync {
    fn open<'a>(
        &'a self,
        payload: serde_json::Value,
        ctx: &'a Context,
        sink: tokio::sync::mpsc::Sender<Result<serde_json::Value, RaffelError>>,
    ) -> BoxFuture<'a, Result<(), RaffelError>>;
}

/// A fire-and-forget (or retried, per [`DeliverySemantics`]) handler.
pub trait EventHandler: Send + Sync {
    fn handle<'a>(&'a self, payload: serde_json::Value, ctx: &'a Context) -> BoxFuture<'a, Result<(), RaffelError>>;
}

/// The tagged union of handler kinds (spec §3 `HandlerDescriptor`, §9:
/// "Represent HandlerDescriptor as a tagged union; the router dispatches on
/// the tag").
pub enum HandlerKind {
    Procedure(Arc<dyn ProcedureHandler>),
    Stream(Arc<dyn StreamHandler>),
    Event(Arc<dyn EventHandler>, DeliverySemantics),
}

impl Clone for HandlerKind {
    fn clone(&self) -> Self {
        match self {
            HandlerKind::Procedure(h) => HandlerKind::Procedure(h.clone()),
            HandlerKind::Stream(h) => HandlerKind::Stream(h.clone()),
            HandlerKind::Event(h, sem) => HandlerKind::Event(h.clone(), *sem),
        }
    }
}

impl fmt::Debug for HandlerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandlerKind::Procedure(_) => write!(f, "HandlerKind::Procedure"),
            HandlerKind::Stream(_) => write!(f, "HandlerKind::Stream"),
            HandlerKind::Event(_, semantics) => write!(f, "HandlerKind::Event({semantics:?})"),
        }
    }
}

/// `{name, kind, handler, localInterceptors[], ...}` (spec §3). Immutable
/// after registration.
#[derive(Clone)]
pub struct HandlerDescriptor {
    pub name: String,
    pub kind: HandlerKind,
    pub local_interceptors: Vec<SharedInterceptor>,
    pub input_schema: Option<serde_json::Value>,
    pub output_schema: Option<serde_json::Value>,
}

impl HandlerDescriptor {
    pub fn procedure(name: impl Into<String>, handler: Arc<dyn ProcedureHandler>) -> Self {
        Self {
            name: name.into(),
            kind: HandlerKind::Procedure(handler),
            local_interceptors: Vec::new(),
            input_schema: None,
            output_schema: None,
        }
    }

    pub fn stream(name: impl Into<String>, handler: Arc<dyn StreamHandler>) -> Self {
        Self {
            name: name.into(),
            kind: HandlerKind::Stream(handler),
            local_interceptors: Vec::new(),
            input_schema: None,
            output_schema: None,
        }
    }

    pub fn event(name: impl Into<String>, handler: Arc<dyn EventHandler>, semantics: DeliverySemantics) -> Self {
        Self {
            name: name.into(),
            kind: HandlerKind::Event(handler, semantics),
            local_interceptors: Vec::new(),
            input_schema: None,
            output_schema: None,
        }
    }

    pub fn with_local_interceptor(mut self, interceptor: SharedInterceptor) -> Self {
        self.local_interceptors.push(interceptor);
        self
    }
}

/// A compiled glob pattern (spec §4.3: `*` matches a single dotted segment,
/// `**` matches any suffix). Compilation is memoized by [`PatternCache`]
/// keyed on the source string, so a pattern used by many interceptors is only
/// split into segments once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledPattern {
    segments: Vec<PatternSegment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PatternSegment {
    Literal(String),
    Single,
    DoubleWildcard,
}

impl CompiledPattern {
    pub fn compile(pattern: &str) -> Self {
        let segments = pattern
            .split('.')
            .map(|seg| match seg {
                "*" => PatternSegment::Single,
                "**" => PatternSegment::DoubleWildcard,
                literal => PatternSegment::Literal(literal.to_string()),
            })
            .collect();
        Self { segments }
    }

    pub fn matches(&self, name: &str) -> bool {
        let name_segments: Vec<&str> = name.split('.').collect();
        Self::match_segments(&self.segments, &name_segments)
    }

    fn match_segments(pattern: &[PatternSegment], name: &[&str]) -> bool {
        match pattern.split_first() {
            None => name.is_empty(),
            Some((PatternSegment::DoubleWildcard, _)) => true,
            Some((PatternSegment::Single, rest)) => !name.is_empty() && Self::match_segments(rest, &name[1..]),
            Some((PatternSegment::Literal(lit), rest)) => {
                !name.is_empty() && name[0] == lit && Self::match_segments(rest, &name[1..])
            }
        }
    }
}

/// Memoized pattern compilation cache, shared by pattern-scoped interceptor
/// combinators (spec §4.3: "Pattern compilation is memoized per pattern
/// string").
#[derive(Default)]
pub struct PatternCache {
    compiled: RwLock<HashMap<String, Arc<CompiledPattern>>>,
}

impl PatternCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn compile(&self, pattern: &str) -> Arc<CompiledPattern> {
        if let Some(existing) = self.compiled.read().unwrap().get(pattern) {
            return existing.clone();
        }
        let compiled = Arc::new(CompiledPattern::compile(pattern));
        self.compiled.write().unwrap().insert(pattern.to_string(), compiled.clone());
        compiled
    }
}

/// The handler registry contract (spec §4.3). `register` is write-once per
/// name; after the router calls `start()` no further registration is
/// permitted (spec §5: "Registry is write-once/read-many").
pub trait Registry: Send + Sync {
    fn register(&self, descriptor: HandlerDescriptor) -> Result<(), RaffelError>;
    fn lookup(&self, name: &str) -> Option<Arc<HandlerDescriptor>>;
    fn names(&self) -> Vec<String>;

    /// Called once by the router when it starts serving traffic. After this,
    /// `register` must fail every call (spec §5).
    fn lock(&self) {}

    fn is_locked(&self) -> bool {
        false
    }
}

/// In-process implementation of [`Registry`] backed by a read-write-locked
/// map, sufficient for the single-process core this crate covers (the spec's
/// out-of-scope boundary excludes distributed registry backends).
#[derive(Default)]
pub struct InMemoryRegistry {
    handlers: RwLock<HashMap<String, Arc<HandlerDescriptor>>>,
    locked: std::sync::atomic::AtomicBool,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prefixes every name in `sub` with `prefix + "."` and registers the
    /// results into `self` (spec §4.3 `mount(prefix, subRegistry)`).
    pub fn mount(&self, prefix: &str, sub: InMemoryRegistry) -> Result<(), RaffelError> {
        for (name, descriptor) in sub.handlers.into_inner().unwrap() {
            self.register(HandlerDescriptor {
                name: format!("{prefix}.{name}"),
                ..(*descriptor).clone()
            })?;
        }
        Ok(())
    }
}

impl Registry for InMemoryRegistry {
    fn register(&self, descriptor: HandlerDescriptor) -> Result<(), RaffelError> {
        if self.is_locked() {
            return Err(RaffelError::new(
                raffel_types::ErrorCode::Aborted,
                "registry is locked: registration after start() is not permitted",
            ));
        }
        let mut handlers = self.handlers.write().unwrap();
        if handlers.contains_key(&descriptor.name) {
            return Err(RaffelError::already_exists(format!(
                "procedure '{}' is already registered",
                descriptor.name
            )));
        }
        handlers.insert(descriptor.name.clone(), Arc::new(descriptor));
        Ok(())
    }

    fn lookup(&self, name: &str) -> Option<Arc<HandlerDescriptor>> {
        self.handlers.read().unwrap().get(name).cloned()
    }

    fn names(&self) -> Vec<String> {
        self.handlers.read().unwrap().keys().cloned().collect()
    }

    fn lock(&self) {
        self.locked.store(true, std::sync::atomic::Ordering::SeqCst);
    }

    fn is_locked(&self) -> bool {
        self.locked.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_wildcard_matches_exactly_one_segment() {
        let pattern = CompiledPattern::compile("users.*.get");
        assert!(pattern.matches("users.123.get"));
        assert!(!pattern.matches("users.123.456.get"));
    }

    #[test]
    fn double_wildcard_matches_any_suffix() {
        let pattern = CompiledPattern::compile("admin.**");
        assert!(pattern.matches("admin.users.delete"));
        assert!(pattern.matches("admin"));
        assert!(!pattern.matches("users.admin.delete"));
    }

    #[test]
    fn pattern_cache_returns_the_same_compiled_instance() {
        let cache = PatternCache::new();
        let a = cache.compile("users.*");
        let b = cache.compile("users.*");
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn registering_the_same_name_twice_fails_with_already_exists() {
        let registry = InMemoryRegistry::new();
        let handler = from_fn(|payload, _ctx| async move { Ok(payload) });
        registry
            .register(HandlerDescriptor::procedure("users.get", handler.clone()))
            .unwrap();
        let err = registry
            .register(HandlerDescriptor::procedure("users.get", handler))
            .unwrap_err();
        assert_eq!(err.code, raffel_types::ErrorCode::AlreadyExists);
    }

    #[test]
    fn lookup_returns_the_registered_descriptor() {
        let registry = InMemoryRegistry::new();
        let handler = from_fn(|payload, _ctx| async move { Ok(payload) });
        registry.register(HandlerDescriptor::procedure("users.get", handler)).unwrap();
        assert!(registry.lookup("users.get").is_some());
        assert!(registry.lookup("users.list").is_none());
    }

    #[test]
    fn mount_prefixes_every_name_in_the_sub_registry() {
        let sub = InMemoryRegistry::new();
        let handler = from_fn(|payload, _ctx| async move { Ok(payload) });
        sub.register(HandlerDescriptor::procedure("get", handler)).unwrap();

        let root = InMemoryRegistry::new();
        root.mount("users", sub).unwrap();
        assert!(root.lookup("users.get").is_some());
    }

    #[test]
    fn registration_fails_once_the_registry_is_locked() {
        let registry = InMemoryRegistry::new();
        registry.lock();
        let handler = from_fn(|payload, _ctx| async move { Ok(payload) });
        let err = registry.register(HandlerDescriptor::procedure("users.get", handler)).unwrap_err();
        assert_eq!(err.code, raffel_types::ErrorCode::Aborted);
    }
}
