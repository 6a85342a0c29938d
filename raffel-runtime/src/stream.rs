/*
 * Copyright Raffel Contributors
 * SPDX-License-Identifier: Apache-2.0
 */

//! The stream envelope state machine (spec §4.4): `stream:open` registers a
//! stream, `stream:data` repeats in steady state, `stream:close` is
//! idempotent and terminal, and triggering cancellation forces a transition
//! to `stream:close`, surfacing `CANCELLED` to both sides exactly once.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use raffel_async::Cancellation;

struct StreamSession {
    cancellation: Cancellation,
    closed: AtomicBool,
}

/// Tracks every stream currently open on this router, keyed by envelope id.
#[derive(Default)]
pub struct StreamRegistry {
    sessions: DashMap<String, Arc<StreamSession>>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a newly opened stream, returning the [`Cancellation`]
    /// handlers should observe while producing `stream:data`.
    pub fn open(&self, id: impl Into<String>, cancellation: Cancellation) -> Cancellation {
        let session = Arc::new(StreamSession { cancellation: cancellation.clone(), closed: AtomicBool::new(false) });
        self.sessions.insert(id.into(), session);
        cancellation
    }

    /// Transitions `id` to `stream:close`. Idempotent: a second call is a
    /// no-op and returns `false`, so the caller knows not to emit a second
    /// close notification.
    pub fn close(&self, id: &str) -> bool {
        match self.sessions.get(id) {
            Some(session) => !session.closed.swap(true, Ordering::SeqCst),
            None => false,
        }
    }

    /// Whether `stream:data` for `id` should still be accepted: the stream
    /// must be known and not yet closed (spec: "any further `stream:data`
    /// with that id is silently dropped" once closed).
    pub fn accepts_data(&self, id: &str) -> bool {
        match self.sessions.get(id) {
            Some(session) => !session.closed.load(Ordering::SeqCst),
            None => false,
        }
    }

    /// Forces `id` to `stream:close`, triggering its cancellation exactly
    /// once (spec: "triggering `context.cancellation` forces transition to
    /// `stream:close` and surfaces `CANCELLED` to both sides exactly once").
    pub fn cancel(&self, id: &str, reason: raffel_async::CancellationReason) -> bool {
        let Some(session) = self.sessions.get(id) else { return false };
        let already_closed = session.closed.swap(true, Ordering::SeqCst);
        session.cancellation.trigger(reason);
        !already_closed
    }

    pub fn remove(&self, id: &str) {
        self.sessions.remove(id);
    }
}
