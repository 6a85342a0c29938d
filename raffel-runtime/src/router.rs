/*
 * Copyright Raffel Contributors
 * SPDX-License-Identifier: Apache-2.0
 */

//! The router (spec §4.4): resolves a handler, assembles the effective
//! interceptor chain around it, executes it, and returns a response or error
//! envelope. Never lets an exception escape: a non-typed failure becomes
//! `INTERNAL` (spec §4.4, enforced by [`raffel_types::RaffelError`]'s
//! `From<BoxError>`).

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use raffel_types::{Envelope, EnvelopeType, ErrorCode, RaffelError, RequestState};

use raffel_runtime_api::{
    CompiledPattern, DeliverySemantics, HandlerDescriptor, HandlerKind, Interceptor, InterceptorResult, Next, Registry,
    SharedInterceptor,
};

use crate::combinators::Compose;
use crate::stream::StreamRegistry;
use crate::validation::{NoopValidator, Validator};

/// Builds a [`Router`]: the global interceptor chain (request-id always
/// first, per spec §4.4 step 1), pattern-scoped interceptors, and the
/// pluggable validator.
pub struct RouterBuilder {
    registry: Arc<dyn Registry>,
    global_interceptors: Vec<SharedInterceptor>,
    pattern_interceptors: Vec<(CompiledPattern, SharedInterceptor)>,
    validator: Arc<dyn Validator>,
}

impl RouterBuilder {
    pub fn new(registry: Arc<dyn Registry>) -> Self {
        Self {
            registry,
            global_interceptors: Vec::new(),
            pattern_interceptors: Vec::new(),
            validator: Arc::new(NoopValidator),
        }
    }

    /// Adds a global pre-registered interceptor, in registration order (spec
    /// §4.4 step 2).
    pub fn with_global_interceptor(mut self, interceptor: SharedInterceptor) -> Self {
        self.global_interceptors.push(interceptor);
        self
    }

    /// Adds a pattern-scoped interceptor (spec §4.4 step 3).
    pub fn with_pattern_interceptor(mut self, pattern: &str, interceptor: SharedInterceptor) -> Self {
        self.pattern_interceptors.push((CompiledPattern::compile(pattern), interceptor));
        self
    }

    pub fn with_validator(mut self, validator: Arc<dyn Validator>) -> Self {
        self.validator = validator;
        self
    }

    pub fn build(self) -> Router {
        Router {
            registry: self.registry,
            request_id_interceptor: Arc::new(crate::observability::RequestIdInterceptor),
            global_interceptors: self.global_interceptors,
            pattern_interceptors: self.pattern_interceptors,
            validator: self.validator,
            streams: Arc::new(StreamRegistry::new()),
            event_sequence: AtomicU32::new(0),
        }
    }
}

/// The router/dispatch engine (spec §4.4, component C4).
pub struct Router {
    registry: Arc<dyn Registry>,
    request_id_interceptor: SharedInterceptor,
    global_interceptors: Vec<SharedInterceptor>,
    pattern_interceptors: Vec<(CompiledPattern, SharedInterceptor)>,
    validator: Arc<dyn Validator>,
    streams: Arc<StreamRegistry>,
    event_sequence: AtomicU32,
}

impl Router {
    pub fn builder(registry: Arc<dyn Registry>) -> RouterBuilder {
        RouterBuilder::new(registry)
    }

    /// Locks the registry against further registration (spec §5:
    /// "Registry is write-once/read-many"). Call once before serving.
    pub fn start(&self) {
        self.registry.lock();
    }

    pub fn streams(&self) -> Arc<StreamRegistry> {
        self.streams.clone()
    }

    fn assemble_chain(&self, local_interceptors: &[SharedInterceptor], procedure: &str) -> Vec<SharedInterceptor> {
        let mut chain = Vec::with_capacity(
            1 + self.global_interceptors.len() + self.pattern_interceptors.len() + local_interceptors.len(),
        );
        chain.push(self.request_id_interceptor.clone());
        chain.extend(self.global_interceptors.iter().cloned());
        for (pattern, interceptor) in &self.pattern_interceptors {
            if pattern.matches(procedure) {
                chain.push(interceptor.clone());
            }
        }
        chain.extend(local_interceptors.iter().cloned());
        chain
    }

    /// Dispatches a `type=request` envelope against a procedure handler
    /// (spec §4.4). Always returns a `type=response` or `type=error`
    /// envelope; never propagates a `Result::Err`.
    pub async fn dispatch(&self, envelope: Envelope) -> Envelope {
        let procedure = envelope.procedure.clone();

        let descriptor = match self.registry.lookup(&procedure) {
            Some(descriptor) => descriptor,
            None => return envelope.error(&RaffelError::not_found(format!("no handler registered for '{procedure}'"))),
        };

        if !matches!(descriptor.kind, HandlerKind::Procedure(_)) {
            return envelope.error(&RaffelError::new(
                ErrorCode::InvalidArgument,
                format!("'{procedure}' is not a unary procedure"),
            ));
        }

        let chain = self.assemble_chain(&descriptor.local_interceptors, &procedure);
        let validator = self.validator.clone();
        let fallback = envelope.clone();

        let terminal = Next::new(move |envelope, _state| {
            Box::pin(invoke_procedure(descriptor.clone(), validator.clone(), envelope))
        });

        let mut state = RequestState::default();
        match Compose::new(chain).intercept(envelope, &mut state, terminal).await {
            Ok(response) => response,
            Err(err) => fallback.error(&err),
        }
    }

    /// Opens a stream (spec §4.4 "Initial: `stream:open`"). Returns the ack
    /// envelope plus the channel the caller should read `stream:data`
    /// payloads from. The router tracks the stream by envelope id until
    /// `close_stream` is called or its cancellation fires.
    pub async fn open_stream(
        &self,
        envelope: Envelope,
    ) -> Result<(Envelope, tokio::sync::mpsc::Receiver<Result<serde_json::Value, RaffelError>>), RaffelError> {
        let procedure = envelope.procedure.clone();
        let descriptor = self
            .registry
            .lookup(&procedure)
            .ok_or_else(|| RaffelError::not_found(format!("no handler registered for '{procedure}'")))?;

        let handler = match &descriptor.kind {
            HandlerKind::Stream(handler) => handler.clone(),
            _ => return Err(RaffelError::new(ErrorCode::InvalidArgument, format!("'{procedure}' is not a stream"))),
        };

        if envelope.context.deadline_has_passed() {
            return Err(RaffelError::deadline_exceeded("deadline exceeded before stream open"));
        }

        let cancellation = self.streams.open(envelope.id.clone(), envelope.context.cancellation.clone());
        let (tx, rx) = tokio::sync::mpsc::channel(64);
        let ctx = envelope.context.clone();
        let payload = envelope.payload.clone();
        let stream_id = envelope.id.clone();
        let streams = self.streams.clone();

        tokio::spawn(async move {
            let result = handler.open(payload, &ctx, tx).await;
            if let Err(err) = result {
                tracing::warn!(stream_id = %stream_id, error.code = %err.code, "stream handler exited with an error");
            }
            streams.remove(&stream_id);
        });

        let _ = &cancellation;
        let ack = Envelope {
            id: envelope.id.clone(),
            kind: EnvelopeType::StreamOpen,
            procedure: envelope.procedure.clone(),
            payload: serde_json::json!({"ack": true}),
            metadata: envelope.metadata.clone(),
            context: envelope.context.clone(),
        };
        Ok((ack, rx))
    }

    /// Closes a stream (spec §4.4 "Terminal: `stream:close` — idempotent").
    pub fn close_stream(&self, stream_id: &str) -> bool {
        let closed_now = self.streams.close(stream_id);
        self.streams.remove(stream_id);
        closed_now
    }

    /// Whether `stream:data` with `stream_id` should still be delivered.
    pub fn stream_accepts_data(&self, stream_id: &str) -> bool {
        self.streams.accepts_data(stream_id)
    }

    /// Dispatches a `kind=event` envelope (spec §4.4 "Event delivery"). The
    /// router acknowledges synchronously (this call returning `Ok(())` is the
    /// ack) and the caller is responsible for the configured delivery
    /// semantics; `raffel-runtime`'s dedicated event-delivery driver (backed
    /// by this same dispatch primitive) implements the retry/dedup loop for
    /// `at-least-once`/`exactly-once`.
    pub async fn dispatch_event(&self, envelope: Envelope) -> Result<(), RaffelError> {
        let procedure = envelope.procedure.clone();
        let descriptor = self
            .registry
            .lookup(&procedure)
            .ok_or_else(|| RaffelError::not_found(format!("no handler registered for '{procedure}'")))?;

        let handler = match &descriptor.kind {
            HandlerKind::Event(handler, _) => handler.clone(),
            _ => return Err(RaffelError::new(ErrorCode::InvalidArgument, format!("'{procedure}' is not an event"))),
        };

        self.event_sequence.fetch_add(1, Ordering::Relaxed);
        handler.handle(envelope.payload.clone(), &envelope.context).await
    }

    /// Looks up the [`DeliverySemantics`] an event procedure was registered
    /// with, so a delivery driver (`raffel_runtime::event_delivery`) can
    /// decide whether a failed `dispatch_event` call should be retried or
    /// deduplicated without the router itself owning that policy.
    pub fn event_semantics(&self, procedure: &str) -> Result<DeliverySemantics, RaffelError> {
        let descriptor = self
            .registry
            .lookup(procedure)
            .ok_or_else(|| RaffelError::not_found(format!("no handler registered for '{procedure}'")))?;
        match &descriptor.kind {
            HandlerKind::Event(_, semantics) => Ok(*semantics),
            _ => Err(RaffelError::new(ErrorCode::InvalidArgument, format!("'{procedure}' is not an event"))),
        }
    }
}

async fn invoke_procedure(
    descriptor: Arc<HandlerDescriptor>,
    validator: Arc<dyn Validator>,
    envelope: Envelope,
) -> InterceptorResult {
    if envelope.context.deadline_has_passed() {
        return Err(RaffelError::deadline_exceeded("deadline exceeded before handler invocation"));
    }
    if envelope.context.is_cancelled() {
        return Err(RaffelError::cancelled("request cancelled before handler invocation"));
    }

    let handler = match &descriptor.kind {
        HandlerKind::Procedure(handler) => handler.clone(),
        _ => return Err(RaffelError::internal("handler kind changed after dispatch; this is a router bug")),
    };

    validator.validate(&envelope.payload, descriptor.input_schema.as_ref())?;

    let result = handler.call(envelope.payload.clone(), &envelope.context).await?;

    validator.validate(&result, descriptor.output_schema.as_ref())?;

    Ok(envelope.respond(result))
}
