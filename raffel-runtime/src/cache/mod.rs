/*
 * Copyright Raffel Contributors
 * SPDX-License-Identifier: Apache-2.0
 */

//! Response caching (spec §4.7, §4.11): the interceptor and its bundled
//! in-memory driver.

pub mod interceptor;
pub mod memory;

pub use interceptor::{CacheAccess, CacheConfig, CacheInterceptor, KeyGenerator};
pub use memory::{EvictionPolicy, MemoryCacheConfig, MemoryCacheDriver, MemoryCacheStats};
