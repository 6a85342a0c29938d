/*
 * Copyright Raffel Contributors
 * SPDX-License-Identifier: Apache-2.0
 */

//! Sliding-window rate limiting (spec §4.8): the interceptor and its bundled
//! in-memory driver.

pub mod interceptor;
pub mod memory;

pub use interceptor::{RateLimitConfig, RateLimitInterceptor, RateLimitRule};
pub use memory::MemoryRateLimitDriver;
