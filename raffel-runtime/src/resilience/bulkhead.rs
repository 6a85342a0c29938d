/*
 * Copyright Raffel Contributors
 * SPDX-License-Identifier: Apache-2.0
 */

//! Bounds concurrent in-flight calls per procedure (spec §4.6): a concurrency
//! cap plus a bounded FIFO wait queue with a queue timeout. The occupied slot
//! is always released, on success or error, by relying on
//! [`tokio::sync::OwnedSemaphorePermit`]'s `Drop`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use raffel_types::{Envelope, RaffelError, RequestState};
use tokio::sync::Semaphore;

use raffel_runtime_api::{Interceptor, InterceptorResult, Next};

pub struct BulkheadConfig {
    pub max_concurrent: usize,
    pub max_queue: usize,
    pub queue_timeout: Duration,
    pub on_reject: Option<Box<dyn Fn(&str) + Send + Sync>>,
    pub on_queued: Option<Box<dyn Fn(&str) + Send + Sync>>,
    pub on_dequeued: Option<Box<dyn Fn(&str) + Send + Sync>>,
}

impl Default for BulkheadConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 10,
            max_queue: 0,
            queue_timeout: Duration::from_secs(5),
            on_reject: None,
            on_queued: None,
            on_dequeued: None,
        }
    }
}

struct Compartment {
    slots: Arc<Semaphore>,
    queued: Arc<tokio::sync::Semaphore>,
}

impl Compartment {
    fn new(config: &BulkheadConfig) -> Self {
        Self {
            slots: Arc::new(Semaphore::new(config.max_concurrent)),
            queued: Arc::new(Semaphore::new(config.max_queue)),
        }
    }
}

/// One [`Compartment`] per procedure name (spec §4.6 "per-procedure
/// variant"). A single, unkeyed bulkhead is just a manager with one entry
/// shared by every procedure that names it.
#[derive(Default)]
struct CompartmentTable {
    compartments: DashMap<String, Arc<Compartment>>,
}

impl CompartmentTable {
    fn entry(&self, key: &str, config: &BulkheadConfig) -> Arc<Compartment> {
        self.compartments.entry(key.to_string()).or_insert_with(|| Arc::new(Compartment::new(config))).clone()
    }
}

pub struct BulkheadInterceptor {
    config: BulkheadConfig,
    table: CompartmentTable,
    per_procedure: bool,
}

impl BulkheadInterceptor {
    /// A single shared compartment for every procedure the interceptor is
    /// attached to.
    pub fn shared(config: BulkheadConfig) -> Self {
        Self { config, table: CompartmentTable::default(), per_procedure: false }
    }

    /// One independent compartment per procedure name.
    pub fn per_procedure(config: BulkheadConfig) -> Self {
        Self { config, table: CompartmentTable::default(), per_procedure: true }
    }

    fn key_for<'a>(&self, procedure: &'a str) -> &'a str {
        if self.per_procedure {
            procedure
        } else {
            "__shared__"
        }
    }
}

#[async_trait]
impl Interceptor for BulkheadInterceptor {
    fn name(&self) -> &str {
        "bulkhead"
    }

    async fn intercept(&self, envelope: Envelope, state: &mut RequestState, next: Next) -> InterceptorResult {
        let procedure = envelope.procedure.clone();
        let key = self.key_for(&procedure).to_string();
        let compartment = self.table.entry(&key, &self.config);

        let slot = match Arc::clone(&compartment.slots).try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                if self.config.max_queue == 0 {
                    if let Some(hook) = &self.config.on_reject {
                        hook(&procedure);
                    }
                    return Err(RaffelError::resource_exhausted(format!(
                        "bulkhead for '{procedure}' is at capacity"
                    )));
                }

                let queue_ticket = match Arc::clone(&compartment.queued).try_acquire_owned() {
                    Ok(ticket) => ticket,
                    Err(_) => {
                        if let Some(hook) = &self.config.on_reject {
                            hook(&procedure);
                        }
                        return Err(RaffelError::resource_exhausted(format!(
                            "bulkhead queue for '{procedure}' is full"
                        )));
                    }
                };

                if let Some(hook) = &self.config.on_queued {
                    hook(&procedure);
                }

                let wait = tokio::time::timeout(self.config.queue_timeout, Arc::clone(&compartment.slots).acquire_owned()).await;
                drop(queue_ticket);

                match wait {
                    Ok(Ok(permit)) => {
                        if let Some(hook) = &self.config.on_dequeued {
                            hook(&procedure);
                        }
                        permit
                    }
                    Ok(Err(_)) => return Err(RaffelError::internal("bulkhead semaphore closed unexpectedly")),
                    Err(_) => {
                        if let Some(hook) = &self.config.on_reject {
                            hook(&procedure);
                        }
                        return Err(RaffelError::resource_exhausted(format!(
                            "timed out waiting for a bulkhead slot for '{procedure}'"
                        )));
                    }
                }
            }
        };

        let result = next.call(envelope, state).await;
        drop(slot);
        result
    }
}

/// A typed snapshot of available capacity, keyed by compartment (shared
/// bulkheads report a single `__shared__` entry).
pub struct BulkheadSnapshot {
    pub available_slots: HashMap<String, usize>,
}

impl BulkheadInterceptor {
    pub fn snapshot(&self) -> BulkheadSnapshot {
        let available_slots =
            self.table.compartments.iter().map(|entry| (entry.key().clone(), entry.value().slots.available_permits())).collect();
        BulkheadSnapshot { available_slots }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use raffel_async::SharedTimeSource;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fresh_envelope() -> Envelope {
        Envelope::new_request("0123456789abcdef", "busy.op", serde_json::json!({}), SharedTimeSource::default())
    }

    fn blocking_next(gate: Arc<tokio::sync::Notify>, calls: Arc<AtomicU32>) -> Next {
        Next::new(move |envelope, _state| {
            let gate = gate.clone();
            let calls = calls.clone();
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                gate.notified().await;
                Ok(envelope.respond(serde_json::json!({})))
            })
        })
    }

    #[tokio::test]
    async fn rejects_immediately_with_no_queue_once_full() {
        let interceptor = Arc::new(BulkheadInterceptor::shared(BulkheadConfig { max_concurrent: 1, max_queue: 0, ..BulkheadConfig::default() }));
        let mut state = RequestState::default();
        let gate = Arc::new(tokio::sync::Notify::new());
        let calls = Arc::new(AtomicU32::new(0));

        let interceptor_clone = interceptor.clone();
        let gate_clone = gate.clone();
        let calls_clone = calls.clone();
        let holder = tokio::spawn(async move {
            let mut state = RequestState::default();
            interceptor_clone.intercept(fresh_envelope(), &mut state, blocking_next(gate_clone, calls_clone)).await
        });

        tokio::task::yield_now().await;
        tokio::task::yield_now().await;

        let rejected = interceptor.intercept(fresh_envelope(), &mut state, blocking_next(gate.clone(), calls.clone())).await;
        assert!(rejected.is_err());

        gate.notify_one();
        holder.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn releases_the_slot_after_an_error() {
        let interceptor = BulkheadInterceptor::shared(BulkheadConfig { max_concurrent: 1, ..BulkheadConfig::default() });
        let mut state = RequestState::default();
        let failing = Next::new(|_envelope, _state| Box::pin(async move { Err(RaffelError::internal("boom")) }));
        interceptor.intercept(fresh_envelope(), &mut state, failing).await.unwrap_err();

        let succeeding = Next::new(|envelope, _state| Box::pin(async move { Ok(envelope.respond(serde_json::json!({}))) }));
        let result = interceptor.intercept(fresh_envelope(), &mut state, succeeding).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn per_procedure_compartments_do_not_share_capacity() {
        let interceptor = Arc::new(BulkheadInterceptor::per_procedure(BulkheadConfig {
            max_concurrent: 1,
            max_queue: 0,
            ..BulkheadConfig::default()
        }));

        let a = Envelope::new_request("aaaaaaaaaaaaaaaa", "a.op", serde_json::json!({}), SharedTimeSource::default());
        let b = Envelope::new_request("bbbbbbbbbbbbbbbb", "b.op", serde_json::json!({}), SharedTimeSource::default());

        let gate = Arc::new(tokio::sync::Notify::new());
        let calls = Arc::new(AtomicU32::new(0));

        let interceptor_clone = interceptor.clone();
        let gate_clone = gate.clone();
        let calls_clone = calls.clone();
        let holder = tokio::spawn(async move {
            let mut state = RequestState::default();
            interceptor_clone.intercept(a, &mut state, blocking_next(gate_clone, calls_clone)).await
        });

        tokio::task::yield_now().await;
        tokio::task::yield_now().await;

        let mut state = RequestState::default();
        let result_b = interceptor
            .intercept(b, &mut state, Next::new(|envelope, _state| Box::pin(async move { Ok(envelope.respond(serde_json::json!({}))) })))
            .await;
        assert!(result_b.is_ok(), "a.op's slot must not block b.op's independent compartment");

        gate.notify_one();
        holder.await.unwrap().unwrap();
    }
}
