/*
 * Copyright Raffel Contributors
 * SPDX-License-Identifier: Apache-2.0
 */

//! The event-delivery driver (spec §4.4 "Event delivery", §9 Open
//! Questions): the router acknowledges a `kind=event` dispatch
//! synchronously, and this driver owns what happens after that ack,
//! honoring the [`DeliverySemantics`] the handler was registered with.
//!
//! - `AtMostOnce` — fire-and-drop: a failure is logged and swallowed.
//! - `AtLeastOnce { max_attempts }` — retried with the same backoff math the
//!   retry interceptor uses (spec §4.6: "Retries observe the same backoff
//!   rules as §4.6").
//! - `ExactlyOnce { retention }` — deduplicated by envelope `id` over a
//!   configurable retention window (spec §9: "assume per-envelope-id
//!   deduplication ... rather than guess a stronger guarantee"), delivered
//!   at most once per id within that window.

use std::time::Duration;

use dashmap::DashMap;
use raffel_async::SharedAsyncSleep;
use raffel_retries::{compute_delay, BackoffConfig};
use raffel_types::{Envelope, ErrorCode, RaffelError};

use raffel_runtime_api::DeliverySemantics;

use crate::router::Router;

/// Backoff inputs for `AtLeastOnce` redelivery, independent of the router's
/// own retry interceptor (an event's redelivery is driven by this driver,
/// not by the request-path retry interceptor, since there's no caller
/// awaiting the event's response).
pub struct EventDeliveryConfig {
    pub backoff: BackoffConfig,
    pub retryable_codes: Vec<ErrorCode>,
}

impl Default for EventDeliveryConfig {
    fn default() -> Self {
        Self { backoff: BackoffConfig::default(), retryable_codes: ErrorCode::DEFAULT_RETRYABLE.to_vec() }
    }
}

struct SeenEntry {
    expires_at: std::time::Instant,
}

/// Drives post-ack event delivery for every `kind=event` handler registered
/// on a [`Router`]. One driver per router; cheap to construct.
pub struct EventDeliveryDriver {
    router: std::sync::Arc<Router>,
    config: EventDeliveryConfig,
    sleeper: SharedAsyncSleep,
    seen: DashMap<String, SeenEntry>,
}

impl EventDeliveryDriver {
    pub fn new(router: std::sync::Arc<Router>) -> Self {
        Self::with_config(router, EventDeliveryConfig::default())
    }

    pub fn with_config(router: std::sync::Arc<Router>, config: EventDeliveryConfig) -> Self {
        Self { router, config, sleeper: SharedAsyncSleep::default(), seen: DashMap::new() }
    }

    /// Delivers `envelope` to its registered event handler per that
    /// handler's [`DeliverySemantics`]. Always resolves (never leaves a
    /// dropped future): `AtMostOnce` failures are swallowed after logging,
    /// `AtLeastOnce` exhausts its attempts and returns the last error,
    /// `ExactlyOnce` returns `Ok(())` immediately for a duplicate id.
    pub async fn deliver(&self, envelope: Envelope) -> Result<(), RaffelError> {
        let semantics = self.router.event_semantics(&envelope.procedure)?;
        match semantics {
            DeliverySemantics::AtMostOnce => {
                if let Err(err) = self.router.dispatch_event(envelope.clone()).await {
                    tracing::warn!(
                        procedure = %envelope.procedure,
                        envelope_id = %envelope.id,
                        error.code = %err.code,
                        "at-most-once event handler failed; dropping"
                    );
                }
                Ok(())
            }
            DeliverySemantics::AtLeastOnce { max_attempts } => self.deliver_at_least_once(envelope, max_attempts).await,
            DeliverySemantics::ExactlyOnce { retention } => self.deliver_exactly_once(envelope, retention).await,
        }
    }

    async fn deliver_at_least_once(&self, envelope: Envelope, max_attempts: u32) -> Result<(), RaffelError> {
        let mut attempt: u32 = 1;
        let mut previous_delay = Duration::ZERO;

        loop {
            match self.router.dispatch_event(envelope.clone()).await {
                Ok(()) => return Ok(()),
                Err(err) => {
                    let retryable = err.is_retryable(&self.config.retryable_codes);
                    if attempt >= max_attempts || !retryable || envelope.context.is_cancelled() {
                        return Err(err);
                    }

                    let delay = compute_delay(&self.config.backoff, attempt, previous_delay, fastrand::f64);
                    tracing::debug!(
                        procedure = %envelope.procedure,
                        envelope_id = %envelope.id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "retrying at-least-once event delivery"
                    );

                    let cancellation = envelope.context.cancellation.clone();
                    tokio::select! {
                        _ = self.sleeper.sleep(delay) => {}
                        _ = cancellation.cancelled() => return Err(RaffelError::cancelled("event delivery cancelled while waiting to retry")),
                    }

                    previous_delay = delay;
                    attempt += 1;
                }
            }
        }
    }

    async fn deliver_exactly_once(&self, envelope: Envelope, retention: Duration) -> Result<(), RaffelError> {
        self.sweep_expired();

        let now = std::time::Instant::now();
        if let Some(entry) = self.seen.get(&envelope.id) {
            if entry.expires_at > now {
                tracing::debug!(envelope_id = %envelope.id, "duplicate event suppressed by exactly-once retention window");
                return Ok(());
            }
        }
        self.seen.insert(envelope.id.clone(), SeenEntry { expires_at: now + retention });

        self.router.dispatch_event(envelope).await
    }

    fn sweep_expired(&self) {
        let now = std::time::Instant::now();
        self.seen.retain(|_, entry| entry.expires_at > now);
    }

    /// Current retention-set size, for tests and introspection.
    pub fn tracked_ids(&self) -> usize {
        self.seen.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use raffel_async::SharedTimeSource;
    use raffel_runtime_api::{from_fn_event, EventHandler, HandlerDescriptor, InMemoryRegistry, Registry};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn envelope(id: &str, procedure: &str) -> Envelope {
        Envelope::new_request(id, procedure, serde_json::json!({}), SharedTimeSource::default())
    }

    fn router_with(name: &str, handler: Arc<dyn EventHandler>, semantics: DeliverySemantics) -> Arc<Router> {
        let registry = Arc::new(InMemoryRegistry::new());
        registry.register(HandlerDescriptor::event(name, handler, semantics)).unwrap();
        Arc::new(Router::builder(registry).build())
    }

    #[tokio::test(start_paused = true)]
    async fn at_least_once_retries_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();
        let handler = from_fn_event(move |_payload, _ctx| {
            let calls = calls_clone.clone();
            async move {
                let attempt = calls.fetch_add(1, Ordering::SeqCst);
                if attempt < 2 {
                    Err(RaffelError::unavailable("not yet"))
                } else {
                    Ok(())
                }
            }
        });
        let router = router_with("notify.send", handler, DeliverySemantics::AtLeastOnce { max_attempts: 5 });
        let driver = EventDeliveryDriver::with_config(
            router,
            EventDeliveryConfig {
                backoff: BackoffConfig {
                    strategy: raffel_retries::BackoffStrategy::Linear,
                    initial_delay: Duration::from_millis(1),
                    max_delay: Duration::from_millis(5),
                    multiplier: 1.0,
                    jitter: false,
                },
                ..EventDeliveryConfig::default()
            },
        );

        let result = driver.deliver(envelope("evt-1", "notify.send")).await;
        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn at_least_once_gives_up_after_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();
        let handler = from_fn_event(move |_payload, _ctx| {
            let calls = calls_clone.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(RaffelError::unavailable("still down"))
            }
        });
        let router = router_with("notify.send", handler, DeliverySemantics::AtLeastOnce { max_attempts: 2 });
        let driver = EventDeliveryDriver::new(router);

        let result = driver.deliver(envelope("evt-1", "notify.send")).await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn at_most_once_swallows_failures() {
        let handler = from_fn_event(|_payload, _ctx| async move { Err(RaffelError::internal("boom")) });
        let router = router_with("metrics.tick", handler, DeliverySemantics::AtMostOnce);
        let driver = EventDeliveryDriver::new(router);

        let result = driver.deliver(envelope("evt-1", "metrics.tick")).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn exactly_once_suppresses_duplicate_ids_within_retention() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();
        let handler = from_fn_event(move |_payload, _ctx| {
            let calls = calls_clone.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });
        let router = router_with(
            "orders.placed",
            handler,
            DeliverySemantics::ExactlyOnce { retention: Duration::from_secs(60) },
        );
        let driver = EventDeliveryDriver::new(router);

        driver.deliver(envelope("evt-dup", "orders.placed")).await.unwrap();
        driver.deliver(envelope("evt-dup", "orders.placed")).await.unwrap();
        driver.deliver(envelope("evt-dup", "orders.placed")).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(driver.tracked_ids(), 1);
    }

    #[tokio::test]
    async fn exactly_once_delivers_distinct_ids_independently() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();
        let handler = from_fn_event(move |_payload, _ctx| {
            let calls = calls_clone.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });
        let router = router_with(
            "orders.placed",
            handler,
            DeliverySemantics::ExactlyOnce { retention: Duration::from_secs(60) },
        );
        let driver = EventDeliveryDriver::new(router);

        driver.deliver(envelope("evt-1", "orders.placed")).await.unwrap();
        driver.deliver(envelope("evt-2", "orders.placed")).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
