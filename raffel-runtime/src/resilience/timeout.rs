/*
 * Copyright Raffel Contributors
 * SPDX-License-Identifier: Apache-2.0
 */

//! Wraps the downstream call in a deadline (spec §4.6): fires at
//! `min(ctx.deadline, now+configuredMs)`, cancelling the scope and returning
//! `DEADLINE_EXCEEDED` if the handler hasn't finished by then. The tightened
//! deadline is written back to `envelope.context.deadline` so nested
//! interceptors (and the handler itself) see it.

use std::time::Duration;

use async_trait::async_trait;
use raffel_async::{CancellationReason, SharedAsyncSleep};
use raffel_types::{Envelope, RaffelError, RequestState};

use raffel_runtime_api::{Interceptor, InterceptorResult, Next};

pub struct TimeoutInterceptor {
    duration: Duration,
    sleeper: SharedAsyncSleep,
}

impl TimeoutInterceptor {
    pub fn new(duration: Duration) -> Self {
        Self { duration, sleeper: SharedAsyncSleep::default() }
    }

    pub fn with_sleeper(duration: Duration, sleeper: SharedAsyncSleep) -> Self {
        Self { duration, sleeper }
    }
}

#[async_trait]
impl Interceptor for TimeoutInterceptor {
    fn name(&self) -> &str {
        "timeout"
    }

    async fn intercept(&self, mut envelope: Envelope, state: &mut RequestState, next: Next) -> InterceptorResult {
        let now = envelope.context.now();
        let effective = envelope.context.effective_deadline(Some(self.duration));
        envelope.context.deadline = effective;

        let remaining = effective
            .and_then(|deadline| deadline.duration_since(now).ok())
            .unwrap_or(self.duration);

        let cancellation = envelope.context.cancellation.clone();
        let fallback = envelope.clone();

        tokio::select! {
            result = next.call(envelope, state) => result,
            _ = self.sleeper.sleep(remaining) => {
                cancellation.trigger(CancellationReason::Deadline);
                Err(RaffelError::deadline_exceeded(format!(
                    "procedure '{}' exceeded its {:?} timeout",
                    fallback.procedure, self.duration
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use raffel_async::SharedTimeSource;
    use raffel_types::ErrorCode;
    use std::time::Duration;

    fn fresh_envelope() -> Envelope {
        Envelope::new_request("0123456789abcdef", "slow.op", serde_json::json!({}), SharedTimeSource::default())
    }

    #[tokio::test(start_paused = true)]
    async fn fires_before_a_slow_handler_completes() {
        let interceptor = TimeoutInterceptor::new(Duration::from_millis(100));
        let mut state = RequestState::default();
        let next = Next::new(|envelope, _state| {
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok(envelope.respond(serde_json::json!({})))
            })
        });
        let result = interceptor.intercept(fresh_envelope(), &mut state, next).await;
        assert_eq!(result.unwrap_err().code, ErrorCode::DeadlineExceeded);
    }

    #[tokio::test(start_paused = true)]
    async fn lets_a_fast_handler_through() {
        let interceptor = TimeoutInterceptor::new(Duration::from_millis(100));
        let mut state = RequestState::default();
        let next = Next::new(|envelope, _state| Box::pin(async move { Ok(envelope.respond(serde_json::json!({}))) }));
        let result = interceptor.intercept(fresh_envelope(), &mut state, next).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn writes_the_tightened_deadline_back_onto_the_envelope() {
        let interceptor = TimeoutInterceptor::new(Duration::from_secs(5));
        let mut state = RequestState::default();
        let next = Next::new(|envelope, _state| Box::pin(async move { Ok(envelope) }));
        let result = interceptor.intercept(fresh_envelope(), &mut state, next).await.unwrap();
        assert!(result.context.deadline.is_some());
    }
}
