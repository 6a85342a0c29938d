/*
 * Copyright Raffel Contributors
 * SPDX-License-Identifier: Apache-2.0
 */

//! Retry backoff math and the optional retry-budget token bucket, kept
//! decoupled from the router so both can be unit tested in isolation.

pub mod backoff;
pub mod token_bucket;

pub use backoff::{compute_delay, resolve_retry_after, BackoffConfig, BackoffStrategy};
pub use token_bucket::{RetryPermit, TokenBucket};
