/*
 * Copyright Raffel Contributors
 * SPDX-License-Identifier: Apache-2.0
 */

//! Opens a `tracing::Span` named after `procedure` on entry, closes it on
//! exit with the error code (if any) recorded, and injects the span id into
//! the outgoing envelope metadata as `traceparent` (spec §4.10).

use async_trait::async_trait;
use raffel_types::{Envelope, RequestState};
use tracing::Instrument;

use raffel_runtime_api::{Interceptor, InterceptorResult, Next};

pub struct TracingSpanInterceptor;

#[async_trait]
impl Interceptor for TracingSpanInterceptor {
    fn name(&self) -> &str {
        "tracing_span"
    }

    async fn intercept(&self, envelope: Envelope, state: &mut RequestState, next: Next) -> InterceptorResult {
        let span = tracing::info_span!(
            "procedure",
            name = %envelope.procedure,
            request_id = %envelope.context.request_id,
            outcome = tracing::field::Empty,
            error_code = tracing::field::Empty,
        );
        let span_id = envelope.context.tracing.span_id.clone().unwrap_or_default();

        async move {
            let result = next.call(envelope, state).await;
            match &result {
                Ok(_) => tracing::Span::current().record("outcome", "ok"),
                Err(err) => {
                    tracing::Span::current().record("outcome", "error");
                    tracing::Span::current().record("error_code", tracing::field::display(&err.code));
                }
            };
            result.map(|mut response| {
                response.metadata.insert("traceparent", span_id);
                response
            })
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use raffel_async::SharedTimeSource;

    #[tokio::test]
    async fn injects_traceparent_into_the_response() {
        let interceptor = TracingSpanInterceptor;
        let mut state = RequestState::default();
        let envelope = Envelope::new_request("0123456789abcdef", "users.get", serde_json::json!({}), SharedTimeSource::default());
        let next = Next::new(|envelope, _state| Box::pin(async move { Ok(envelope.respond(serde_json::json!({}))) }));
        let result = interceptor.intercept(envelope, &mut state, next).await.unwrap();
        assert!(result.metadata.contains_key("traceparent"));
    }
}
