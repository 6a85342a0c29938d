/*
 * Copyright Raffel Contributors
 * SPDX-License-Identifier: Apache-2.0
 */

//! Provides an [`AsyncSleep`] trait that returns a future that sleeps for a
//! given duration, so resilience interceptors never call `tokio::time::sleep`
//! directly and can be driven deterministically in tests.

use std::fmt::{Debug, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

/// Async trait with a `sleep` function.
pub trait AsyncSleep: Debug + Send + Sync {
    fn sleep(&self, duration: Duration) -> Sleep;
}

impl<T> AsyncSleep for Arc<T>
where
    T: AsyncSleep + ?Sized,
{
    fn sleep(&self, duration: Duration) -> Sleep {
        T::sleep(self, duration)
    }
}

/// Wrapper type for a sharable [`AsyncSleep`].
#[derive(Clone, Debug)]
pub struct SharedAsyncSleep(Arc<dyn AsyncSleep>);

impl SharedAsyncSleep {
    pub fn new(sleep: impl AsyncSleep + 'static) -> Self {
        Self(Arc::new(sleep))
    }
}

impl AsyncSleep for SharedAsyncSleep {
    fn sleep(&self, duration: Duration) -> Sleep {
        self.0.sleep(duration)
    }
}

impl Default for SharedAsyncSleep {
    fn default() -> Self {
        Self::new(TokioSleep::new())
    }
}

/// Future returned by [`AsyncSleep::sleep`].
#[must_use]
pub struct Sleep(Pin<Box<dyn Future<Output = ()> + Send + 'static>>);

impl Debug for Sleep {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Sleep")
    }
}

impl Sleep {
    pub fn new(future: impl Future<Output = ()> + Send + 'static) -> Sleep {
        Sleep(Box::pin(future))
    }
}

impl Future for Sleep {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.0.as_mut().poll(cx)
    }
}

/// [`AsyncSleep`] implementation backed by the Tokio timer wheel.
#[derive(Debug, Default)]
pub struct TokioSleep;

impl TokioSleep {
    pub fn new() -> TokioSleep {
        Default::default()
    }
}

impl AsyncSleep for TokioSleep {
    fn sleep(&self, duration: Duration) -> Sleep {
        Sleep::new(tokio::time::sleep(duration))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn tokio_sleep_actually_waits() {
        let sleeper = TokioSleep::new();
        let start = tokio::time::Instant::now();
        sleeper.sleep(Duration::from_millis(50)).await;
        assert!(tokio::time::Instant::now() - start >= Duration::from_millis(50));
    }
}
