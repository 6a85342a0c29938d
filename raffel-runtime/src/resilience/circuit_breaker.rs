/*
 * Copyright Raffel Contributors
 * SPDX-License-Identifier: Apache-2.0
 */

//! Per-procedure circuit breaker (spec §4.6): `closed -> open -> half-open ->
//! closed | open`. One [`CircuitState`] instance per procedure name, owned by
//! a [`CircuitBreakerManager`] shared across every invocation of this
//! interceptor, never destroyed except at process shutdown.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use dashmap::DashMap;
use raffel_types::{Envelope, ErrorCode, RaffelError, RequestState};

use raffel_runtime_api::{Interceptor, InterceptorResult, Next};

/// `{state, failureCount, successCount, windowStart, openedAt}` (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitPhase {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitState {
    pub phase: CircuitPhase,
    pub failure_count: u32,
    pub success_count: u32,
    pub window_start: SystemTime,
    pub opened_at: Option<SystemTime>,
    /// Whether the single half-open probe call (spec §4.6 "Half-open: allow
    /// one call") is currently in flight. Guarded by the same `Mutex` as the
    /// rest of this state, so setting it true on admission and false on
    /// `record` is itself the compare-and-set: no concurrent caller can
    /// observe it false while a probe is outstanding.
    probe_in_flight: bool,
}

impl CircuitState {
    fn new(now: SystemTime) -> Self {
        Self {
            phase: CircuitPhase::Closed,
            failure_count: 0,
            success_count: 0,
            window_start: now,
            opened_at: None,
            probe_in_flight: false,
        }
    }
}

pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub window: Duration,
    pub reset_timeout: Duration,
    pub failure_codes: Vec<ErrorCode>,
    pub on_state_change: Option<Box<dyn Fn(&str, CircuitPhase) + Send + Sync>>,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            window: Duration::from_secs(30),
            reset_timeout: Duration::from_secs(30),
            failure_codes: ErrorCode::DEFAULT_FAILURE_COUNTED.to_vec(),
            on_state_change: None,
        }
    }
}

/// Owns one [`CircuitState`] per procedure name, linearizable per key (spec
/// §5: "circuit-breaker state transitions are linearizable per procedure").
#[derive(Default)]
pub struct CircuitBreakerManager {
    states: DashMap<String, Arc<Mutex<CircuitState>>>,
}

impl CircuitBreakerManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, procedure: &str, now: SystemTime) -> Arc<Mutex<CircuitState>> {
        self.states
            .entry(procedure.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(CircuitState::new(now))))
            .clone()
    }

    /// A typed snapshot of every tracked procedure's circuit state
    /// (SPEC_FULL.md supplemented feature #2; spec §4.6 requires `getStates()`
    /// as a generic map, this gives the same data without losing the type).
    pub fn for_all(&self) -> HashMap<String, CircuitState> {
        self.states
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().lock().unwrap().clone()))
            .collect()
    }

    pub fn reset_all(&self) {
        for entry in self.states.iter() {
            let mut state = entry.value().lock().unwrap();
            *state = CircuitState::new(state.window_start);
        }
    }

    pub fn force_state(&self, procedure: &str, phase: CircuitPhase, now: SystemTime) {
        let cell = self.entry(procedure, now);
        let mut state = cell.lock().unwrap();
        state.phase = phase;
        state.opened_at = if phase == CircuitPhase::Open { Some(now) } else { None };
        state.failure_count = 0;
        state.success_count = 0;
        state.probe_in_flight = false;
    }
}

pub struct CircuitBreakerInterceptor {
    config: CircuitBreakerConfig,
    manager: Arc<CircuitBreakerManager>,
}

impl CircuitBreakerInterceptor {
    pub fn new(config: CircuitBreakerConfig, manager: Arc<CircuitBreakerManager>) -> Self {
        Self { config, manager }
    }

    fn admit(&self, procedure: &str, now: SystemTime) -> Result<(), RaffelError> {
        let cell = self.manager.entry(procedure, now);
        let mut state = cell.lock().unwrap();

        match state.phase {
            CircuitPhase::Closed => {
                if now.duration_since(state.window_start).unwrap_or_default() >= self.config.window {
                    state.window_start = now;
                    state.failure_count = 0;
                }
                Ok(())
            }
            CircuitPhase::Open => {
                let opened_at = state.opened_at.unwrap_or(now);
                if now.duration_since(opened_at).unwrap_or_default() >= self.config.reset_timeout {
                    state.phase = CircuitPhase::HalfOpen;
                    state.success_count = 0;
                    // This admission *is* the probe call, so claim the slot
                    // before anyone else can observe `HalfOpen`.
                    state.probe_in_flight = true;
                    drop(state);
                    self.notify(procedure, CircuitPhase::HalfOpen);
                    Ok(())
                } else {
                    Err(RaffelError::unavailable("Circuit breaker is open"))
                }
            }
            // Half-open admits exactly one in-flight probe (spec §4.6: "allow
            // one call"); every other concurrent caller is short-circuited
            // until `record` clears the flag.
            CircuitPhase::HalfOpen => {
                if state.probe_in_flight {
                    Err(RaffelError::unavailable("Circuit breaker half-open probe already in flight"))
                } else {
                    state.probe_in_flight = true;
                    Ok(())
                }
            }
        }
    }

    fn record(&self, procedure: &str, now: SystemTime, outcome: &Result<Envelope, RaffelError>) {
        let cell = self.manager.entry(procedure, now);
        let mut state = cell.lock().unwrap();

        let counted_failure = match outcome {
            Ok(_) => false,
            Err(err) => self.config.failure_codes.contains(&err.code),
        };

        match state.phase {
            CircuitPhase::HalfOpen => {
                state.probe_in_flight = false;
                if counted_failure {
                    state.phase = CircuitPhase::Open;
                    state.opened_at = Some(now);
                    state.failure_count = 0;
                    state.success_count = 0;
                    drop(state);
                    self.notify(procedure, CircuitPhase::Open);
                } else {
                    state.success_count += 1;
                    if state.success_count >= self.config.success_threshold {
                        state.phase = CircuitPhase::Closed;
                        state.failure_count = 0;
                        state.success_count = 0;
                        state.window_start = now;
                        drop(state);
                        self.notify(procedure, CircuitPhase::Closed);
                    }
                }
            }
            CircuitPhase::Closed => {
                if counted_failure {
                    state.failure_count += 1;
                    if state.failure_count >= self.config.failure_threshold {
                        state.phase = CircuitPhase::Open;
                        state.opened_at = Some(now);
                        drop(state);
                        self.notify(procedure, CircuitPhase::Open);
                    }
                } else {
                    state.failure_count = 0;
                }
            }
            CircuitPhase::Open => {}
        }
    }

    fn notify(&self, procedure: &str, phase: CircuitPhase) {
        if let Some(hook) = &self.config.on_state_change {
            hook(procedure, phase);
        }
    }
}

#[async_trait]
impl Interceptor for CircuitBreakerInterceptor {
    fn name(&self) -> &str {
        "circuit_breaker"
    }

    async fn intercept(&self, envelope: Envelope, state: &mut RequestState, next: Next) -> InterceptorResult {
        let procedure = envelope.procedure.clone();
        let now = envelope.context.now();

        self.admit(&procedure, now)?;

        let result = next.call(envelope, state).await;
        self.record(&procedure, now, &result);
        result
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

    fn succeeding_next() -> Next {
        Next::new(|envelope, _state| Box::pin(async move { Ok(envelope.respond(serde_json::json!({}))) }))
    }

    #[tokio::test]
    async fn opens_after_failure_threshold_and_short_circuits() {
        let manager = Arc::new(CircuitBreakerManager::new());
        let config = CircuitBreakerConfig { failure_threshold: 3, ..CircuitBreakerConfig::default() };
        let interceptor = CircuitBreakerInterceptor::new(config, manager);
        let mut state = RequestState::default();

        for _ in 0..3 {
            let result = interceptor.intercept(fresh_envelope(), &mut state, failing_next()).await;
            assert!(result.is_err());
        }

        let result = interceptor.intercept(fresh_envelope(), &mut state, succeeding_next()).await.unwrap_err();
        assert_eq!(result.code, ErrorCode::Unavailable);
        assert_eq!(result.message, "Circuit breaker is open");
    }

    #[tokio::test]
    async fn half_open_failure_reopens_the_circuit() {
        let manager = Arc::new(CircuitBreakerManager::new());
        manager.force_state("flaky.op", CircuitPhase::HalfOpen, SystemTime::now());
        let config = CircuitBreakerConfig::default();
        let interceptor = CircuitBreakerInterceptor::new(config, manager.clone());
        let mut state = RequestState::default();

        interceptor.intercept(fresh_envelope(), &mut state, failing_next()).await.unwrap_err();
        let snapshot = manager.for_all();
        assert_eq!(snapshot.get("flaky.op").unwrap().phase, CircuitPhase::Open);
    }

    #[tokio::test]
    async fn half_open_success_threshold_closes_the_circuit() {
        let manager = Arc::new(CircuitBreakerManager::new());
        manager.force_state("flaky.op", CircuitPhase::HalfOpen, SystemTime::now());
        let config = CircuitBreakerConfig { success_threshold: 2, ..CircuitBreakerConfig::default() };
        let interceptor = CircuitBreakerInterceptor::new(config, manager.clone());
        let mut state = RequestState::default();

        interceptor.intercept(fresh_envelope(), &mut state, succeeding_next()).await.unwrap();
        interceptor.intercept(fresh_envelope(), &mut state, succeeding_next()).await.unwrap();

        let snapshot = manager.for_all();
        assert_eq!(snapshot.get("flaky.op").unwrap().phase, CircuitPhase::Closed);
    }

    #[test]
    fn reset_all_clears_every_tracked_procedure() {
        let manager = CircuitBreakerManager::new();
        manager.force_state("a.op", CircuitPhase::Open, SystemTime::now());
        manager.reset_all();
        assert_eq!(manager.for_all().get("a.op").unwrap().phase, CircuitPhase::Closed);
    }

    #[tokio::test]
    async fn half_open_admits_exactly_one_concurrent_probe() {
        use std::sync::atomic::{AtomicU32, Ordering};

        let manager = Arc::new(CircuitBreakerManager::new());
        manager.force_state("flaky.op", CircuitPhase::HalfOpen, SystemTime::now());
        let config = CircuitBreakerConfig::default();
        let interceptor = Arc::new(CircuitBreakerInterceptor::new(config, manager));

        let next_calls = Arc::new(AtomicU32::new(0));
        let mut handles = Vec::new();
        for _ in 0..5 {
            let interceptor = interceptor.clone();
            let next_calls = next_calls.clone();
            handles.push(tokio::spawn(async move {
                let mut state = RequestState::default();
                let next_calls = next_calls.clone();
                // Holds the admitted probe in flight long enough for every
                // other concurrently-spawned caller to reach `admit()` while
                // it is still outstanding.
                let next = Next::new(move |envelope, _state| {
                    let next_calls = next_calls.clone();
                    Box::pin(async move {
                        next_calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok(envelope.respond(serde_json::json!({})))
                    })
                });
                interceptor.intercept(fresh_envelope(), &mut state, next).await
            }));
        }

        let mut ok_count = 0;
        let mut err_count = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => ok_count += 1,
                Err(_) => err_count += 1,
            }
        }

        assert_eq!(next_calls.load(Ordering::SeqCst), 1, "only the single admitted probe should reach next()");
        assert_eq!(ok_count, 1);
        assert_eq!(err_count, 4);
    }
}
