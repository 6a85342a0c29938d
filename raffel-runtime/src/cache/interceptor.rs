/*
 * Copyright Raffel Contributors
 * SPDX-License-Identifier: Apache-2.0
 */

//! The cache interceptor (spec §4.7, component C7): fingerprinted response
//! caching with stale-while-revalidate and single-flight coalescing of
//! concurrent misses — an invariant that holds even across the SWR boundary,
//! so a foreground miss and a background revalidation for the same key never
//! run `next()` twice concurrently (they share [`crate::singleflight::SingleFlight`]).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use raffel_types::{fingerprint, Envelope, Metadata, RaffelError, RequestState};

use raffel_runtime_api::{CacheEntry, CacheStore, CompiledPattern, Interceptor, InterceptorResult, Next};

use crate::singleflight::{Outcome, OutcomeError, SingleFlight};

pub type KeyGenerator = Box<dyn Fn(&Envelope) -> String + Send + Sync>;

/// `{hit, stale}` fired on every lookup (spec §4.7 `onAccess`).
#[derive(Debug, Clone, Copy)]
pub struct CacheAccess {
    pub hit: bool,
    pub stale: bool,
}

pub struct CacheConfig {
    pub ttl: Duration,
    pub stale_while_revalidate: bool,
    pub stale_grace: Duration,
    /// Background revalidation's own timeout; defaults to `ttl` (spec §9
    /// REDESIGN FLAGS: "MUST be bounded by a dedicated timeout (default =
    /// original TTL)").
    pub revalidate_timeout: Option<Duration>,
    /// Include list; empty matches every procedure.
    pub procedures: Vec<CompiledPattern>,
    pub exclude_procedures: Vec<CompiledPattern>,
    pub selected_headers: Vec<String>,
    pub key_generator: Option<KeyGenerator>,
    pub on_access: Option<Box<dyn Fn(&str, CacheAccess) + Send + Sync>>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(60),
            stale_while_revalidate: false,
            stale_grace: Duration::from_secs(30),
            revalidate_timeout: None,
            procedures: Vec::new(),
            exclude_procedures: Vec::new(),
            selected_headers: Vec::new(),
            key_generator: None,
            on_access: None,
        }
    }
}

pub struct CacheInterceptor {
    config: CacheConfig,
    store: Arc<dyn CacheStore>,
    single_flight: Arc<SingleFlight>,
}

impl CacheInterceptor {
    pub fn new(config: CacheConfig, store: Arc<dyn CacheStore>) -> Self {
        Self { config, store, single_flight: SingleFlight::new() }
    }

    fn eligible(&self, procedure: &str) -> bool {
        let included = self.config.procedures.is_empty() || self.config.procedures.iter().any(|p| p.matches(procedure));
        let excluded = self.config.exclude_procedures.iter().any(|p| p.matches(procedure));
        included && !excluded
    }

    fn key_for(&self, envelope: &Envelope) -> String {
        match &self.config.key_generator {
            Some(generator) => generator(envelope),
            None => {
                let headers: Vec<&str> = self.config.selected_headers.iter().map(String::as_str).collect();
                fingerprint(&envelope.procedure, &envelope.payload, &envelope.metadata, &headers)
            }
        }
    }

    fn fire_access(&self, key: &str, access: CacheAccess) {
        if let Some(hook) = &self.config.on_access {
            hook(key, access);
        }
    }

    /// Runs `next()` for a real cache miss (or a stale-triggered revalidation),
    /// coalesced per key, storing a success and leaving an error uncached
    /// (spec §4.7 "If error, do not cache").
    async fn run_and_store(&self, key: String, envelope: Envelope, mut state: RequestState, next: Next) -> Outcome {
        let ttl = self.config.ttl;
        let store = self.store.clone();
        let key_for_store = key.clone();

        self.single_flight
            .coalesce(&key, None, async move {
                match next.call(envelope, &mut state).await {
                    Ok(response) => {
                        let now = std::time::SystemTime::now();
                        let set_result = store
                            .set(
                                &key_for_store,
                                CacheEntry {
                                    value: response.payload.clone(),
                                    created_at: now,
                                    expires_at: now + ttl,
                                    tags: Vec::new(),
                                    compressed: false,
                                },
                            )
                            .await;
                        if let Err(err) = set_result {
                            tracing::warn!(error.code = %err.code, "failed to store cache entry; response is still served");
                        }
                        Ok(response.payload)
                    }
                    Err(err) => Err(OutcomeError::from(&err)),
                }
            })
            .await
    }
}

#[async_trait]
impl Interceptor for CacheInterceptor {
    fn name(&self) -> &str {
        "cache"
    }

    async fn intercept(&self, envelope: Envelope, state: &mut RequestState, next: Next) -> InterceptorResult {
        if !self.eligible(&envelope.procedure) {
            return next.call(envelope, state).await;
        }

        let key = self.key_for(&envelope);
        let now = envelope.context.now();

        let cached = self.store.get(&key).await?;
        if let Some(entry) = &cached {
            if entry.expires_at > now {
                self.fire_access(&key, CacheAccess { hit: true, stale: false });
                return Ok(envelope.respond(entry.value.clone()));
            }

            let grace_deadline = entry.expires_at + self.config.stale_grace;
            if self.config.stale_while_revalidate && now <= grace_deadline {
                self.fire_access(&key, CacheAccess { hit: true, stale: true });
                self.spawn_revalidation(key.clone(), envelope.clone(), next.clone());
                return Ok(envelope.respond(entry.value.clone()));
            }
        }

        self.fire_access(&key, CacheAccess { hit: false, stale: false });
        let fresh_state = RequestState::default();
        let response_envelope = envelope.clone();
        let outcome = self.run_and_store(key, envelope, fresh_state, next).await;
        outcome_to_result(outcome, &response_envelope)
    }
}

impl CacheInterceptor {
    /// Background revalidation (spec §4.7, §9 REDESIGN FLAGS): runs detached
    /// from the triggering request's cancellation scope so the original
    /// caller's deadline can't tear down a refresh other waiters may be
    /// relying on, but bounded by its own timeout so a wedged downstream
    /// handler can't accumulate detached tasks forever.
    fn spawn_revalidation(&self, key: String, envelope: Envelope, next: Next) {
        let single_flight = self.single_flight.clone();
        let store = self.store.clone();
        let ttl = self.config.ttl;
        let timeout = self.config.revalidate_timeout.unwrap_or(ttl);

        tokio::spawn(async move {
            let revalidate_key = key.clone();
            let revalidate = async move {
                let mut fresh_state = RequestState::default();
                let store_key = revalidate_key.clone();
                single_flight
                    .coalesce(&revalidate_key, None, async move {
                        match next.call(envelope, &mut fresh_state).await {
                            Ok(response) => {
                                let now = std::time::SystemTime::now();
                                let _ = store
                                    .set(
                                        &store_key,
                                        CacheEntry {
                                            value: response.payload.clone(),
                                            created_at: now,
                                            expires_at: now + ttl,
                                            tags: Vec::new(),
                                            compressed: false,
                                        },
                                    )
                                    .await;
                                Ok(response.payload)
                            }
                            Err(err) => Err(OutcomeError::from(&err)),
                        }
                    })
                    .await
            };

            if tokio::time::timeout(timeout, revalidate).await.is_err() {
                tracing::warn!(cache_key = %key, "background cache revalidation timed out");
            }
        });
    }
}

fn outcome_to_result(outcome: Outcome, envelope: &Envelope) -> InterceptorResult {
    match outcome {
        Ok(value) => Ok(envelope.respond(value)),
        Err(err) => Err(RaffelError::from(err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::memory::{MemoryCacheConfig, MemoryCacheDriver};
    use raffel_async::SharedTimeSource;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fresh_envelope(procedure: &str) -> Envelope {
        Envelope::new_request("0123456789abcdef", procedure, serde_json::json!({"id": 1}), SharedTimeSource::default())
    }

    #[tokio::test]
    async fn miss_then_hit_serves_the_cached_value_without_a_second_call() {
        let store = MemoryCacheDriver::new(MemoryCacheConfig::default());
        let calls = Arc::new(AtomicU32::new(0));
        let interceptor = CacheInterceptor::new(CacheConfig::default(), store);

        let calls1 = calls.clone();
        let next = Next::new(move |envelope: Envelope, _state: &mut RequestState| {
            let calls1 = calls1.clone();
            Box::pin(async move {
                calls1.fetch_add(1, Ordering::SeqCst);
                Ok(envelope.respond(serde_json::json!({"n": 1})))
            })
        });

        let mut state = RequestState::default();
        interceptor.intercept(fresh_envelope("users.get"), &mut state, next.clone()).await.unwrap();
        interceptor.intercept(fresh_envelope("users.get"), &mut state, next).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_misses_coalesce_into_a_single_downstream_call() {
        let store = MemoryCacheDriver::new(MemoryCacheConfig::default());
        let calls = Arc::new(AtomicU32::new(0));
        let interceptor = Arc::new(CacheInterceptor::new(CacheConfig::default(), store));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let interceptor = interceptor.clone();
            let calls = calls.clone();
            let next = Next::new(move |envelope: Envelope, _state: &mut RequestState| {
                let calls = calls.clone();
                Box::pin(async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Ok(envelope.respond(serde_json::json!({"n": 1})))
                })
            });
            handles.push(tokio::spawn(async move {
                let mut state = RequestState::default();
                interceptor.intercept(fresh_envelope("users.get"), &mut state, next).await
            }));
        }

        for h in handles {
            let result = h.await.unwrap().unwrap();
            assert_eq!(result.payload, serde_json::json!({"n": 1}));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn errors_are_not_cached() {
        let store = MemoryCacheDriver::new(MemoryCacheConfig::default());
        let calls = Arc::new(AtomicU32::new(0));
        let interceptor = CacheInterceptor::new(CacheConfig::default(), store);

        let mut state = RequestState::default();
        for _ in 0..2 {
            let calls1 = calls.clone();
            let next = Next::new(move |_envelope: Envelope, _state: &mut RequestState| {
                let calls1 = calls1.clone();
                Box::pin(async move {
                    calls1.fetch_add(1, Ordering::SeqCst);
                    Err(RaffelError::unavailable("down"))
                })
            });
            interceptor.intercept(fresh_envelope("users.get"), &mut state, next).await.unwrap_err();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn excluded_procedures_bypass_the_cache_entirely() {
        let store = MemoryCacheDriver::new(MemoryCacheConfig::default());
        let calls = Arc::new(AtomicU32::new(0));
        let config = CacheConfig { exclude_procedures: vec![CompiledPattern::compile("users.get")], ..CacheConfig::default() };
        let interceptor = CacheInterceptor::new(config, store);

        let mut state = RequestState::default();
        for _ in 0..2 {
            let calls1 = calls.clone();
            let next = Next::new(move |envelope: Envelope, _state: &mut RequestState| {
                let calls1 = calls1.clone();
                Box::pin(async move {
                    calls1.fetch_add(1, Ordering::SeqCst);
                    Ok(envelope.respond(serde_json::json!({"n": 1})))
                })
            });
            interceptor.intercept(fresh_envelope("users.get"), &mut state, next).await.unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
