/*
 * Copyright Raffel Contributors
 * SPDX-License-Identifier: Apache-2.0
 */

//! Recovers from a downstream error with either a static response or a
//! handler-computed one (spec §4.6 Fallback). If the `when` predicate is
//! absent, every error is eligible; if it rejects, the original error is
//! re-thrown unchanged. The handler runs under the same cancellation signal
//! as the original request — it must observe it, not ignore it.

use async_trait::async_trait;
use raffel_types::{Context, Envelope, RaffelError, RequestState};

use raffel_runtime_api::{BoxFuture, Interceptor, InterceptorResult, Next};

/// The recovery value: either a fixed payload or a closure computed from the
/// context and the error that triggered the fallback.
pub enum FallbackResponse {
    Static(serde_json::Value),
    Handler(Box<dyn for<'a> Fn(&'a Context, &'a RaffelError) -> BoxFuture<'a, Result<serde_json::Value, RaffelError>> + Send + Sync>),
}

pub struct FallbackConfig {
    /// `when(error)`. `None` means every error is eligible (spec §4.6: "if
    /// `when(error)` returns true (or is absent)").
    pub when: Option<Box<dyn Fn(&RaffelError) -> bool + Send + Sync>>,
    pub response: FallbackResponse,
}

impl FallbackConfig {
    pub fn static_response(value: serde_json::Value) -> Self {
        Self { when: None, response: FallbackResponse::Static(value) }
    }
}

pub struct FallbackInterceptor {
    config: FallbackConfig,
}

impl FallbackInterceptor {
    pub fn new(config: FallbackConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Interceptor for FallbackInterceptor {
    fn name(&self) -> &str {
        "fallback"
    }

    async fn intercept(&self, envelope: Envelope, state: &mut RequestState, next: Next) -> InterceptorResult {
        let ctx = envelope.context.clone();
        let result = next.call(envelope, state).await;

        let err = match result {
            Ok(response) => return Ok(response),
            Err(err) => err,
        };

        let eligible = match &self.config.when {
            Some(predicate) => predicate(&err),
            None => true,
        };
        if !eligible {
            return Err(err);
        }

        match &self.config.response {
            FallbackResponse::Static(value) => Ok(build_response(&ctx, value.clone())),
            FallbackResponse::Handler(handler) => {
                let cancellation = ctx.cancellation.clone();
                tokio::select! {
                    result = handler(&ctx, &err) => result.map(|value| build_response(&ctx, value)),
                    _ = cancellation.cancelled() => Err(RaffelError::cancelled("fallback handler cancelled")),
                }
            }
        }
    }
}

fn build_response(ctx: &Context, payload: serde_json::Value) -> Envelope {
    Envelope {
        id: ctx.request_id.clone(),
        kind: raffel_types::EnvelopeType::Response,
        procedure: String::new(),
        payload,
        metadata: raffel_types::Metadata::new(),
        context: ctx.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use raffel_async::SharedTimeSource;

    fn fresh_envelope() -> Envelope {
        Envelope::new_request("0123456789abcdef", "flaky.op", serde_json::json!({}), SharedTimeSource::default())
    }

    fn failing_next() -> Next {
        Next::new(|_envelope, _state| Box::pin(async move { Err(RaffelError::unavailable("down")) }))
    }

    #[tokio::test]
    async fn returns_the_static_fallback_on_error() {
        let interceptor = FallbackInterceptor::new(FallbackConfig::static_response(serde_json::json!({"cached": true})));
        let mut state = RequestState::default();
        let result = interceptor.intercept(fresh_envelope(), &mut state, failing_next()).await.unwrap();
        assert_eq!(result.payload, serde_json::json!({"cached": true}));
    }

    #[tokio::test]
    async fn passes_through_success_untouched() {
        let interceptor = FallbackInterceptor::new(FallbackConfig::static_response(serde_json::json!({"cached": true})));
        let mut state = RequestState::default();
        let next = Next::new(|envelope, _state| Box::pin(async move { Ok(envelope.respond(serde_json::json!({"live": true}))) }));
        let result = interceptor.intercept(fresh_envelope(), &mut state, next).await.unwrap();
        assert_eq!(result.payload, serde_json::json!({"live": true}));
    }

    #[tokio::test]
    async fn rejecting_predicate_rethrows_the_original_error() {
        let config = FallbackConfig {
            when: Some(Box::new(|err| err.code == raffel_types::ErrorCode::RateLimited)),
            response: FallbackResponse::Static(serde_json::json!({})),
        };
        let interceptor = FallbackInterceptor::new(config);
        let mut state = RequestState::default();
        let result = interceptor.intercept(fresh_envelope(), &mut state, failing_next()).await;
        assert_eq!(result.unwrap_err().code, raffel_types::ErrorCode::Unavailable);
    }

    #[tokio::test]
    async fn handler_fallback_receives_the_triggering_error() {
        let config = FallbackConfig {
            when: None,
            response: FallbackResponse::Handler(Box::new(|_ctx, err| {
                let code = err.code.to_string();
                Box::pin(async move { Ok(serde_json::json!({"recovered_from": code})) })
            })),
        };
        let interceptor = FallbackInterceptor::new(config);
        let mut state = RequestState::default();
        let result = interceptor.intercept(fresh_envelope(), &mut state, failing_next()).await.unwrap();
        assert_eq!(result.payload["recovered_from"], "UNAVAILABLE");
    }
}
