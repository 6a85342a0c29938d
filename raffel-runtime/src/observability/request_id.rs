/*
 * Copyright Raffel Contributors
 * SPDX-License-Identifier: Apache-2.0
 */

//! The request-id interceptor (spec §4.10): ensures every envelope carries
//! `metadata[x-request-id]`, propagating an incoming value or generating a
//! fresh one, and writes `ctx.tracing.span_id`. The correlated variant also
//! maintains `x-correlation-id` across related requests, used as `traceId`.

use async_trait::async_trait;
use raffel_types::{Envelope, RequestState};

use raffel_runtime_api::{Interceptor, InterceptorResult, Next};

fn generate_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Assigns or propagates `x-request-id` and `x-correlation-id`. Always the
/// outermost interceptor in the router's chain (spec §4.4 step 1).
pub struct RequestIdInterceptor;

#[async_trait]
impl Interceptor for RequestIdInterceptor {
    fn name(&self) -> &str {
        "request_id"
    }

    async fn intercept(&self, mut envelope: Envelope, state: &mut RequestState, next: Next) -> InterceptorResult {
        let request_id = envelope
            .metadata
            .get("x-request-id")
            .map(str::to_string)
            .unwrap_or_else(generate_id);
        envelope.metadata.insert("x-request-id", request_id.clone());
        envelope.context.tracing.span_id = Some(request_id.clone());

        let correlation_id = envelope
            .metadata
            .get("x-correlation-id")
            .map(str::to_string)
            .unwrap_or_else(|| request_id.clone());
        envelope.metadata.insert("x-correlation-id", correlation_id.clone());
        envelope.context.tracing.trace_id = Some(correlation_id);

        next.call(envelope, state).await
    }
}
