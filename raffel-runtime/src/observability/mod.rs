/*
 * Copyright Raffel Contributors
 * SPDX-License-Identifier: Apache-2.0
 */

//! Request-ID propagation, structured logging, and tracing spans (spec §4.10).

pub mod logging;
pub mod request_id;
pub mod tracing_span;

pub use logging::LoggingInterceptor;
pub use request_id::RequestIdInterceptor;
pub use tracing_span::TracingSpanInterceptor;
