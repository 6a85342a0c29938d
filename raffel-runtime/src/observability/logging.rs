/*
 * Copyright Raffel Contributors
 * SPDX-License-Identifier: Apache-2.0
 */

//! The guaranteed-run logging interceptor (spec §4.10). Fires after the
//! downstream call, on both success and error, logging `{requestId,
//! procedure, type, durationMs, principal?, traceId?, spanId?, error?}` with
//! sensitive headers redacted first. Excluded procedure patterns skip
//! logging entirely.

use async_trait::async_trait;
use raffel_types::{is_sensitive_key, Envelope, EnvelopeType, RequestState};

use raffel_runtime_api::{CompiledPattern, Interceptor, InterceptorResult, Next};

pub struct LoggingInterceptor {
    excluded: Vec<CompiledPattern>,
}

impl LoggingInterceptor {
    pub fn new(excluded_procedures: &[&str]) -> Self {
        Self {
            excluded: excluded_procedures.iter().map(|p| CompiledPattern::compile(p)).collect(),
        }
    }
}

impl Default for LoggingInterceptor {
    fn default() -> Self {
        Self::new(&[])
    }
}

#[async_trait]
impl Interceptor for LoggingInterceptor {
    fn name(&self) -> &str {
        "logging"
    }

    async fn intercept(&self, envelope: Envelope, state: &mut RequestState, next: Next) -> InterceptorResult {
        if self.excluded.iter().any(|p| p.matches(&envelope.procedure)) {
            return next.call(envelope, state).await;
        }

        let request_id = envelope.context.request_id.clone();
        let procedure = envelope.procedure.clone();
        let trace_id = envelope.context.tracing.trace_id.clone();
        let span_id = envelope.context.tracing.span_id.clone();
        let principal = envelope.context.auth.as_ref().and_then(|a| a.principal.clone());
        let started = envelope.context.now();

        let result = next.call(envelope, state).await;

        let duration_ms = result
            .as_ref()
            .ok()
            .and_then(|r| r.context.now().duration_since(started).ok())
            .map(|d| d.as_millis())
            .unwrap_or_default();

        match &result {
            Ok(response) => {
                let redacted_headers: Vec<&str> = response
                    .metadata
                    .iter()
                    .filter(|(k, _)| is_sensitive_key(k))
                    .map(|(k, _)| k)
                    .collect();
                tracing::info!(
                    request_id = %request_id,
                    procedure = %procedure,
                    kind = ?response.kind,
                    duration_ms = duration_ms,
                    principal = principal.as_deref().unwrap_or(""),
                    trace_id = trace_id.as_deref().unwrap_or(""),
                    span_id = span_id.as_deref().unwrap_or(""),
                    redacted_header_count = redacted_headers.len(),
                    "request completed"
                );
            }
            Err(err) => {
                tracing::warn!(
                    request_id = %request_id,
                    procedure = %procedure,
                    kind = ?EnvelopeType::Error,
                    duration_ms = duration_ms,
                    principal = principal.as_deref().unwrap_or(""),
                    trace_id = trace_id.as_deref().unwrap_or(""),
                    span_id = span_id.as_deref().unwrap_or(""),
                    error.code = %err.code,
                    error.message = %err.message,
                    "request failed"
                );
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use raffel_async::SharedTimeSource;

    fn fresh_envelope(procedure: &str) -> Envelope {
        Envelope::new_request("0123456789abcdef", procedure, serde_json::json!({}), SharedTimeSource::default())
    }

    #[tokio::test]
    async fn excluded_procedures_are_not_logged_but_still_invoked() {
        let interceptor = LoggingInterceptor::new(&["health.*"]);
        let mut state = RequestState::default();
        let next = Next::new(|envelope, _state| Box::pin(async move { Ok(envelope.respond(serde_json::json!({}))) }));
        let result = interceptor.intercept(fresh_envelope("health.check"), &mut state, next).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn logging_runs_on_both_success_and_error() {
        let interceptor = LoggingInterceptor::default();
        let mut state = RequestState::default();

        let ok_next = Next::new(|envelope, _state| Box::pin(async move { Ok(envelope.respond(serde_json::json!({}))) }));
        assert!(interceptor.intercept(fresh_envelope("users.get"), &mut state, ok_next).await.is_ok());

        let err_next = Next::new(|_envelope, _state| Box::pin(async move { Err(raffel_types::RaffelError::internal("boom")) }));
        assert!(interceptor.intercept(fresh_envelope("users.get"), &mut state, err_next).await.is_err());
    }
}
