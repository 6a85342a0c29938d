/*
 * Copyright Raffel Contributors
 * SPDX-License-Identifier: Apache-2.0
 */

//! Async runtime agnostic abstractions for Raffel: time sources, sleep, and
//! the cancellation signal shared by every request [`Context`].

pub mod cancellation;
pub mod rt;
pub mod time;

pub use cancellation::{Cancellation, CancellationReason};
pub use rt::sleep::{AsyncSleep, SharedAsyncSleep, Sleep, TokioSleep};
pub use time::{SharedTimeSource, StaticTimeSource, SystemTimeSource, TimeSource};
