/*
 * Copyright Raffel Contributors
 * SPDX-License-Identifier: Apache-2.0
 */

use std::time::{Duration, SystemTime};

use raffel_async::{time::epoch_millis, Cancellation, SharedTimeSource};

use crate::extensions::Extensions;

/// Authentication/authorization state attached to a [`Context`] (spec §3).
/// Set exactly once, by whichever auth interceptor runs first in the chain.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct AuthContext {
    pub authenticated: bool,
    pub principal: Option<String>,
    pub claims: std::collections::HashMap<String, serde_json::Value>,
    pub roles: Vec<String>,
}

/// Distributed tracing identifiers (spec §3, §4.10).
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct TracingContext {
    pub trace_id: Option<String>,
    pub span_id: Option<String>,
    pub parent_span_id: Option<String>,
}

/// The per-request context associated with an [`crate::envelope::Envelope`]
/// (spec §3). Read-mostly: aside from the named slots (`auth`, `tracing`,
/// `extensions`), nothing mutates it after construction, and it is never
/// shared across requests — each retry attempt that needs its own deadline
/// gets a context built from the original by the router, not a shared one
/// mutated in place.
#[derive(Debug, Clone)]
pub struct Context {
    pub request_id: String,
    pub timestamp: SystemTime,
    pub deadline: Option<SystemTime>,
    pub cancellation: Cancellation,
    pub auth: Option<AuthContext>,
    pub tracing: TracingContext,
    time_source: SharedTimeSource,
}

impl Context {
    pub fn new(request_id: impl Into<String>, time_source: SharedTimeSource) -> Self {
        let now = time_source.now();
        Self {
            request_id: request_id.into(),
            timestamp: now,
            deadline: None,
            cancellation: Cancellation::new(),
            auth: None,
            tracing: TracingContext::default(),
            time_source,
        }
    }

    pub fn now(&self) -> SystemTime {
        self.time_source.now()
    }

    /// Computes `effectiveDeadline = min(ctx.deadline, now + configuredTimeout)`
    /// (spec §4.1). Returns `None` when neither bound is set.
    pub fn effective_deadline(&self, configured_timeout: Option<Duration>) -> Option<SystemTime> {
        let from_timeout = configured_timeout.map(|d| self.now() + d);
        match (self.deadline, from_timeout) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (None, None) => None,
        }
    }

    /// Whether `deadline` has already passed as of `now()`.
    pub fn deadline_has_passed(&self) -> bool {
        match self.deadline {
            Some(d) => self.now() >= d,
            None => false,
        }
    }

    pub fn deadline_epoch_millis(&self) -> Option<i64> {
        self.deadline.map(epoch_millis)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

/// Extension storage is split from [`Context`] itself so interceptors can
/// take `&mut Extensions` without needing `&mut Context` (and thus without
/// fighting the borrow checker against the immutable fields read by sibling
/// interceptors in the same chain).
#[derive(Debug, Default)]
pub struct RequestState {
    pub extensions: Extensions,
}
