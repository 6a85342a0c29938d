/*
 * Copyright Raffel Contributors
 * SPDX-License-Identifier: Apache-2.0
 */

//! Time source abstraction, kept separate from [`crate::rt::sleep`] so that
//! deadline arithmetic (spec §4.1: `effectiveDeadline = min(ctx.deadline, now
//! + configuredTimeout)`) can be computed deterministically in tests.

use std::fmt::Debug;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

/// Trait with a `now()` function returning the current time.
pub trait TimeSource: Debug + Send + Sync {
    fn now(&self) -> SystemTime;
}

/// Time source delegating to `SystemTime::now()`.
#[derive(Debug, Default, Clone)]
pub struct SystemTimeSource;

impl SystemTimeSource {
    pub fn new() -> Self {
        SystemTimeSource
    }
}

impl TimeSource for SystemTimeSource {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// A manually-advanced time source for deterministic resilience tests (retry
/// backoff schedules, circuit breaker windows, cache TTL expiry) without real
/// sleeps.
#[derive(Debug, Clone)]
pub struct StaticTimeSource {
    now: Arc<Mutex<SystemTime>>,
}

impl StaticTimeSource {
    pub fn new(start: SystemTime) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += by;
    }
}

impl TimeSource for StaticTimeSource {
    fn now(&self) -> SystemTime {
        *self.now.lock().unwrap()
    }
}

/// Dynamic-dispatch handle for sharing a [`TimeSource`] across interceptors.
#[derive(Clone, Debug)]
pub struct SharedTimeSource(Arc<dyn TimeSource>);

impl SharedTimeSource {
    pub fn new(source: impl TimeSource + 'static) -> Self {
        Self(Arc::new(source))
    }
}

impl TimeSource for SharedTimeSource {
    fn now(&self) -> SystemTime {
        self.0.now()
    }
}

impl Default for SharedTimeSource {
    fn default() -> Self {
        Self::new(SystemTimeSource::new())
    }
}

/// Milliseconds since the Unix epoch, the unit used throughout the envelope
/// wire format for `x-deadline` (spec §4.1, §6).
pub fn epoch_millis(t: SystemTime) -> i64 {
    match t.duration_since(SystemTime::UNIX_EPOCH) {
        Ok(d) => d.as_millis() as i64,
        Err(e) => -(e.duration().as_millis() as i64),
    }
}

pub fn from_epoch_millis(ms: i64) -> SystemTime {
    if ms >= 0 {
        SystemTime::UNIX_EPOCH + Duration::from_millis(ms as u64)
    } else {
        SystemTime::UNIX_EPOCH - Duration::from_millis((-ms) as u64)
    }
}
