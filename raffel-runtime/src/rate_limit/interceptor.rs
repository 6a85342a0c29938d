/*
 * Copyright Raffel Contributors
 * SPDX-License-Identifier: Apache-2.0
 */

//! The rate-limit interceptor (spec §4.8, component C8): a sliding window
//! admitted through a pluggable [`RateLimitDriver`], with per-pattern rule
//! overrides evaluated in declaration order (first match wins).

use std::time::Duration;

use async_trait::async_trait;
use raffel_types::{Envelope, RaffelError, RequestState};

use raffel_runtime_api::{CompiledPattern, Interceptor, InterceptorResult, Next, RateLimitDriver};

/// A per-pattern override of the global window/limit (spec §4.8
/// `{pattern, windowMs, maxRequests}`).
pub struct RateLimitRule {
    pub pattern: CompiledPattern,
    pub window: Duration,
    pub max_requests: u64,
}

pub struct RateLimitConfig {
    pub window: Duration,
    pub max_requests: u64,
    /// Evaluated in order; the first matching rule's window/limit replaces
    /// the global default (spec §4.8: "first match wins in declaration order").
    pub rules: Vec<RateLimitRule>,
    /// Overrides the default key (`auth.principal || metadata[x-forwarded-for]
    /// || ctx.requestId`).
    pub key_generator: Option<Box<dyn Fn(&Envelope) -> String + Send + Sync>>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self { window: Duration::from_secs(60), max_requests: 100, rules: Vec::new(), key_generator: None }
    }
}

pub struct RateLimitInterceptor {
    config: RateLimitConfig,
    driver: std::sync::Arc<dyn RateLimitDriver>,
}

impl RateLimitInterceptor {
    pub fn new(config: RateLimitConfig, driver: std::sync::Arc<dyn RateLimitDriver>) -> Self {
        Self { config, driver }
    }

    fn rule_for(&self, procedure: &str) -> (Duration, u64) {
        for rule in &self.config.rules {
            if rule.pattern.matches(procedure) {
                return (rule.window, rule.max_requests);
            }
        }
        (self.config.window, self.config.max_requests)
    }

    fn key_for(&self, envelope: &Envelope) -> String {
        if let Some(generator) = &self.config.key_generator {
            return generator(envelope);
        }
        envelope
            .context
            .auth
            .as_ref()
            .and_then(|auth| auth.principal.clone())
            .or_else(|| envelope.metadata.get("x-forwarded-for").map(str::to_string))
            .unwrap_or_else(|| envelope.context.request_id.clone())
    }
}

#[async_trait]
impl Interceptor for RateLimitInterceptor {
    fn name(&self) -> &str {
        "rate_limit"
    }

    async fn intercept(&self, envelope: Envelope, state: &mut RequestState, next: Next) -> InterceptorResult {
        let (window, max_requests) = self.rule_for(&envelope.procedure);
        let key = self.key_for(&envelope);

        let window_state = self.driver.increment(&key, window).await?;
        if window_state.count > max_requests {
            let now = envelope.context.now();
            let retry_after = window_state.reset_at.duration_since(now).unwrap_or_default();
            return Err(RaffelError::rate_limited(format!("rate limit exceeded for key '{key}'"), retry_after));
        }

        next.call(envelope, state).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit::memory::MemoryRateLimitDriver;
    use raffel_async::SharedTimeSource;
    use std::sync::Arc;

    fn fresh_envelope(procedure: &str) -> Envelope {
        Envelope::new_request("0123456789abcdef", procedure, serde_json::json!({}), SharedTimeSource::default())
    }

    fn passthrough_next() -> Next {
        Next::new(|envelope: Envelope, _state: &mut RequestState| Box::pin(async move { Ok(envelope.respond(serde_json::json!({}))) }))
    }

    #[tokio::test]
    async fn admits_requests_under_the_limit() {
        let driver = Arc::new(MemoryRateLimitDriver::new());
        let config = RateLimitConfig { max_requests: 2, ..RateLimitConfig::default() };
        let interceptor = RateLimitInterceptor::new(config, driver);
        let mut state = RequestState::default();

        interceptor.intercept(fresh_envelope("users.get"), &mut state, passthrough_next()).await.unwrap();
        interceptor.intercept(fresh_envelope("users.get"), &mut state, passthrough_next()).await.unwrap();
    }

    #[tokio::test]
    async fn rejects_once_the_limit_is_exceeded_with_retry_after() {
        let driver = Arc::new(MemoryRateLimitDriver::new());
        let config = RateLimitConfig { max_requests: 1, window: Duration::from_secs(30), ..RateLimitConfig::default() };
        let interceptor = RateLimitInterceptor::new(config, driver);
        let mut state = RequestState::default();

        interceptor.intercept(fresh_envelope("users.get"), &mut state, passthrough_next()).await.unwrap();
        let err = interceptor.intercept(fresh_envelope("users.get"), &mut state, passthrough_next()).await.unwrap_err();
        assert_eq!(err.code, raffel_types::ErrorCode::RateLimited);
        assert!(err.retry_after.is_some());
    }

    #[tokio::test]
    async fn a_matching_rule_overrides_the_global_limit() {
        let driver = Arc::new(MemoryRateLimitDriver::new());
        let config = RateLimitConfig {
            max_requests: 1000,
            rules: vec![RateLimitRule { pattern: CompiledPattern::compile("admin.**"), window: Duration::from_secs(60), max_requests: 1 }],
            ..RateLimitConfig::default()
        };
        let interceptor = RateLimitInterceptor::new(config, driver);
        let mut state = RequestState::default();

        interceptor.intercept(fresh_envelope("admin.users.delete"), &mut state, passthrough_next()).await.unwrap();
        let err = interceptor.intercept(fresh_envelope("admin.users.delete"), &mut state, passthrough_next()).await.unwrap_err();
        assert_eq!(err.code, raffel_types::ErrorCode::RateLimited);
    }

    #[tokio::test]
    async fn default_key_falls_back_to_the_forwarded_for_header_then_request_id() {
        let driver = Arc::new(MemoryRateLimitDriver::new());
        let config = RateLimitConfig { max_requests: 1, ..RateLimitConfig::default() };
        let interceptor = RateLimitInterceptor::new(config, driver);
        let mut state = RequestState::default();

        let mut a = fresh_envelope("users.get");
        a.metadata.insert("x-forwarded-for", "1.2.3.4");
        let mut b = fresh_envelope("users.get");
        b.metadata.insert("x-forwarded-for", "5.6.7.8");

        interceptor.intercept(a, &mut state, passthrough_next()).await.unwrap();
        interceptor.intercept(b, &mut state, passthrough_next()).await.unwrap();
    }
}
