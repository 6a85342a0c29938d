/*
 * Copyright Raffel Contributors
 * SPDX-License-Identifier: Apache-2.0
 */

//! The dedup interceptor (spec §4.9, component C9): identical coalescing to
//! the cache interceptor's miss path, but with no storage — concurrent
//! callers sharing a fingerprint receive the same result (or the same
//! error), and nothing survives past the in-flight call itself. The 30s
//! in-flight TTL bounds memory if a downstream call hangs (spec §4.9).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use raffel_types::{fingerprint, Envelope, RaffelError, RequestState};

use raffel_runtime_api::{CompiledPattern, Interceptor, InterceptorResult, Next};

use crate::singleflight::{OutcomeError, SingleFlight};

/// Default in-flight TTL (spec §4.9: "Fingerprint TTL defaults to 30 s").
pub const DEFAULT_INFLIGHT_TTL: Duration = Duration::from_secs(30);

pub struct DedupConfig {
    pub inflight_ttl: Duration,
    pub procedures: Vec<CompiledPattern>,
    pub exclude_procedures: Vec<CompiledPattern>,
    pub selected_headers: Vec<String>,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self { inflight_ttl: DEFAULT_INFLIGHT_TTL, procedures: Vec::new(), exclude_procedures: Vec::new(), selected_headers: Vec::new() }
    }
}

pub struct DedupInterceptor {
    config: DedupConfig,
    single_flight: Arc<SingleFlight>,
}

impl DedupInterceptor {
    pub fn new(config: DedupConfig) -> Self {
        Self { config, single_flight: SingleFlight::new() }
    }

    fn eligible(&self, procedure: &str) -> bool {
        let included = self.config.procedures.is_empty() || self.config.procedures.iter().any(|p| p.matches(procedure));
        let excluded = self.config.exclude_procedures.iter().any(|p| p.matches(procedure));
        included && !excluded
    }
}

#[async_trait]
impl Interceptor for DedupInterceptor {
    fn name(&self) -> &str {
        "dedup"
    }

    async fn intercept(&self, envelope: Envelope, state: &mut RequestState, next: Next) -> InterceptorResult {
        if !self.eligible(&envelope.procedure) {
            return next.call(envelope, state).await;
        }

        let headers: Vec<&str> = self.config.selected_headers.iter().map(String::as_str).collect();
        let key = fingerprint(&envelope.procedure, &envelope.payload, &envelope.metadata, &headers);
        let response_envelope = envelope.clone();
        let mut fresh_state = RequestState::default();

        let outcome = self
            .single_flight
            .coalesce(&key, Some(self.config.inflight_ttl), async move {
                next.call(envelope, &mut fresh_state).await.map(|response| response.payload).map_err(|err| OutcomeError::from(&err))
            })
            .await;

        outcome.map(|value| response_envelope.respond(value)).map_err(RaffelError::from)
    }
}
