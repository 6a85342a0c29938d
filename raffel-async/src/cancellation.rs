/*
 * Copyright Raffel Contributors
 * SPDX-License-Identifier: Apache-2.0
 */

//! The cancellation signal carried on every [`Context`](../../raffel-types/struct.Context.html).
//!
//! Per spec §4.1, `context.cancellation` may be triggered by client
//! disconnect, deadline expiry, parent context cancel, or explicit
//! `shutdown()`. Every interceptor that awaits external I/O must observe it
//! after resuming from a suspension point (spec §5).

use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Why a [`Cancellation`] was triggered. Recorded once at first trigger;
/// later triggers are no-ops (cancellation is one-way, spec §5: "Triggering
/// `ctx.cancellation` ... propagates to all awaiting operations").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancellationReason {
    Deadline,
    ClientDisconnect,
    ParentCancelled,
    Shutdown,
}

/// A one-shot, clonable, tree-shaped cancellation signal.
///
/// Cloning shares the same underlying signal; [`child`](Cancellation::child)
/// creates a token that is cancelled whenever its parent is (spec §5:
/// "parent context cancel"), but can also be cancelled independently without
/// affecting the parent.
#[derive(Debug, Clone)]
pub struct Cancellation {
    token: CancellationToken,
    reason: std::sync::Arc<Mutex<Option<CancellationReason>>>,
}

impl Cancellation {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            reason: std::sync::Arc::new(Mutex::new(None)),
        }
    }

    /// Derives a child signal: cancelling the child does not cancel the
    /// parent, but cancelling the parent cancels every child.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            reason: std::sync::Arc::new(Mutex::new(None)),
        }
    }

    pub fn trigger(&self, reason: CancellationReason) {
        let mut guard = self.reason.lock().unwrap();
        if guard.is_none() {
            *guard = Some(reason);
        }
        drop(guard);
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn reason(&self) -> Option<CancellationReason> {
        *self.reason.lock().unwrap()
    }

    /// Resolves once this signal (or an ancestor) is cancelled. Interceptors
    /// awaiting I/O should `tokio::select!` against this.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }
}

impl Default for Cancellation {
    fn default() -> Self {
        Self::new()
    }
}
