/*
 * Copyright Raffel Contributors
 * SPDX-License-Identifier: Apache-2.0
 */

//! Retries the downstream call on a retryable error, per spec §4.6. Each
//! attempt after the first records `x-retry-attempt`/`x-retry-delay` on the
//! envelope metadata and, if a [`TokenBucket`] is configured, must draw a
//! permit before proceeding — the first attempt is never budget-gated.

use std::time::Duration;

use async_trait::async_trait;
use raffel_async::{CancellationReason, SharedAsyncSleep};
use raffel_retries::{compute_delay, resolve_retry_after, BackoffConfig, TokenBucket};
use raffel_types::{Envelope, ErrorCode, RaffelError, RequestState};

use raffel_runtime_api::{Interceptor, InterceptorResult, Next};

/// `onRetry(attempt, delay, error)`, invoked before sleeping (spec §4.6).
pub type OnRetryHook = dyn Fn(u32, Duration, &RaffelError) + Send + Sync;

pub struct RetryConfig {
    pub max_attempts: u32,
    pub backoff: BackoffConfig,
    pub retryable_codes: Vec<ErrorCode>,
    pub respect_retry_after: bool,
    pub should_retry: Option<Box<dyn Fn(&RaffelError) -> bool + Send + Sync>>,
    pub token_bucket: Option<TokenBucket>,
    pub on_retry: Option<Box<OnRetryHook>>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffConfig::default(),
            retryable_codes: ErrorCode::DEFAULT_RETRYABLE.to_vec(),
            respect_retry_after: true,
            should_retry: None,
            token_bucket: None,
            on_retry: None,
        }
    }
}

pub struct RetryInterceptor {
    config: RetryConfig,
    sleeper: SharedAsyncSleep,
}

impl RetryInterceptor {
    pub fn new(config: RetryConfig) -> Self {
        Self { config, sleeper: SharedAsyncSleep::default() }
    }

    pub fn with_sleeper(config: RetryConfig, sleeper: SharedAsyncSleep) -> Self {
        Self { config, sleeper }
    }

    fn is_retryable(&self, err: &RaffelError) -> bool {
        if !err.is_retryable(&self.config.retryable_codes) {
            return false;
        }
        match &self.config.should_retry {
            Some(predicate) => predicate(err),
            None => true,
        }
    }
}

#[async_trait]
impl Interceptor for RetryInterceptor {
    fn name(&self) -> &str {
        "retry"
    }

    async fn intercept(&self, envelope: Envelope, state: &mut RequestState, next: Next) -> InterceptorResult {
        let mut attempt: u32 = 1;
        let mut previous_delay = Duration::ZERO;
        let mut permit = None;
        let mut this_attempt = envelope.clone();

        loop {
            let result = next.call(this_attempt, state).await;

            let err = match result {
                Ok(response) => {
                    if let Some(bucket) = &self.config.token_bucket {
                        bucket.replenish(1);
                    }
                    return Ok(response);
                }
                Err(err) => err,
            };

            if attempt >= self.config.max_attempts || !self.is_retryable(&err) || envelope.context.is_cancelled() {
                return Err(err);
            }

            let delay = if self.config.respect_retry_after {
                match err.retry_after {
                    Some(retry_after) => resolve_retry_after(retry_after, self.config.backoff.max_delay),
                    None => compute_delay(&self.config.backoff, attempt, previous_delay, fastrand::f64),
                }
            } else {
                compute_delay(&self.config.backoff, attempt, previous_delay, fastrand::f64)
            };

            if let Some(deadline) = envelope.context.deadline {
                if envelope.context.now() + delay >= deadline {
                    return Err(err);
                }
            }

            if self.config.token_bucket.is_some() && permit.is_none() {
                match self.config.token_bucket.as_ref().unwrap().try_acquire() {
                    Some(p) => permit = Some(p),
                    None => return Err(err),
                }
            }

            if let Some(hook) = &self.config.on_retry {
                hook(attempt, delay, &err);
            }

            let cancellation = envelope.context.cancellation.clone();
            tokio::select! {
                _ = self.sleeper.sleep(delay) => {}
                _ = cancellation.cancelled() => {
                    return Err(RaffelError::cancelled("retry cancelled while waiting to retry"));
                }
            }

            previous_delay = delay;
            attempt += 1;
            this_attempt = stamp_retry_metadata(envelope.clone(), attempt, delay);
        }
    }
}

fn stamp_retry_metadata(mut envelope: Envelope, attempt: u32, delay: Duration) -> Envelope {
    envelope.metadata.insert("x-retry-attempt", attempt.to_string());
    envelope.metadata.insert("x-retry-delay", delay.as_millis().to_string());
    envelope
}

#[cfg(test)]
mod tests {
    use super::*;
    use raffel_async::SharedTimeSource;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fresh_envelope() -> Envelope {
        Envelope::new_request("0123456789abcdef", "flaky.op", serde_json::json!({}), SharedTimeSource::default())
    }

    fn no_delay_config(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            backoff: BackoffConfig {
                strategy: raffel_retries::BackoffStrategy::Linear,
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
                multiplier: 1.0,
                jitter: false,
            },
            ..RetryConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_success() {
        let interceptor = RetryInterceptor::new(no_delay_config(5));
        let mut state = RequestState::default();
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();
        let next = Next::new(move |envelope, _state| {
            let calls = calls_clone.clone();
            Box::pin(async move {
                let attempt = calls.fetch_add(1, Ordering::SeqCst);
                if attempt < 2 {
                    Err(RaffelError::unavailable("not yet"))
                } else {
                    Ok(envelope.respond(serde_json::json!({"ok": true})))
                }
            })
        });
        let result = interceptor.intercept(fresh_envelope(), &mut state, next).await;
        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn stops_after_max_attempts() {
        let interceptor = RetryInterceptor::new(no_delay_config(2));
        let mut state = RequestState::default();
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();
        let next = Next::new(move |_envelope, _state| {
            let calls = calls_clone.clone();
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(RaffelError::unavailable("still down"))
            })
        });
        let result = interceptor.intercept(fresh_envelope(), &mut state, next).await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn non_retryable_errors_stop_immediately() {
        let interceptor = RetryInterceptor::new(no_delay_config(5));
        let mut state = RequestState::default();
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();
        let next = Next::new(move |_envelope, _state| {
            let calls = calls_clone.clone();
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(RaffelError::new(ErrorCode::InvalidArgument, "bad input"))
            })
        });
        let result = interceptor.intercept(fresh_envelope(), &mut state, next).await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn stamp_retry_metadata_writes_numeric_strings() {
        let envelope = stamp_retry_metadata(fresh_envelope(), 2, Duration::from_millis(150));
        assert_eq!(envelope.metadata.get("x-retry-attempt"), Some("2"));
        assert_eq!(envelope.metadata.get("x-retry-delay"), Some("150"));
    }
}
