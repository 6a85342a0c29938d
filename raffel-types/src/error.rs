/*
 * Copyright Raffel Contributors
 * SPDX-License-Identifier: Apache-2.0
 */

use std::fmt;
use std::time::Duration;

/// The closed set of error codes a [`RaffelError`] may carry.
///
/// This set is intentionally closed: interceptors and handlers must map any
/// failure onto one of these variants before it crosses the router boundary.
/// See spec §4.2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidArgument,
    Unauthenticated,
    PermissionDenied,
    NotFound,
    AlreadyExists,
    ResourceExhausted,
    RateLimited,
    Aborted,
    DeadlineExceeded,
    Unavailable,
    Internal,
    Cancelled,
}

impl ErrorCode {
    /// The default set of codes considered retryable (spec §4.2).
    pub const DEFAULT_RETRYABLE: &'static [ErrorCode] = &[
        ErrorCode::Unavailable,
        ErrorCode::DeadlineExceeded,
        ErrorCode::ResourceExhausted,
        ErrorCode::Aborted,
        ErrorCode::Internal,
        ErrorCode::RateLimited,
    ];

    /// The default set of codes counted as failures by the circuit breaker (spec §4.2).
    pub const DEFAULT_FAILURE_COUNTED: &'static [ErrorCode] = &[
        ErrorCode::Unavailable,
        ErrorCode::DeadlineExceeded,
        ErrorCode::Internal,
    ];

    pub fn is_default_retryable(&self) -> bool {
        Self::DEFAULT_RETRYABLE.contains(self)
    }

    pub fn is_default_failure_counted(&self) -> bool {
        Self::DEFAULT_FAILURE_COUNTED.contains(self)
    }

    /// Maps a fixed HTTP status code to its `ErrorCode`, per spec §4.2. Returns
    /// `None` for any status outside the fixed mapping table (callers should
    /// fall back to `Internal` for 5xx and `Unavailable` otherwise).
    pub fn from_http_status(status: u16) -> Option<Self> {
        Some(match status {
            400 => ErrorCode::InvalidArgument,
            401 => ErrorCode::Unauthenticated,
            403 => ErrorCode::PermissionDenied,
            404 => ErrorCode::NotFound,
            409 => ErrorCode::AlreadyExists,
            429 => ErrorCode::RateLimited,
            500 => ErrorCode::Internal,
            503 => ErrorCode::Unavailable,
            504 => ErrorCode::DeadlineExceeded,
            _ => return None,
        })
    }

    /// The fixed HTTP status this code maps back to, per spec §4.2.
    pub fn to_http_status(self) -> u16 {
        match self {
            ErrorCode::InvalidArgument => 400,
            ErrorCode::Unauthenticated => 401,
            ErrorCode::PermissionDenied => 403,
            ErrorCode::NotFound => 404,
            ErrorCode::AlreadyExists => 409,
            ErrorCode::RateLimited => 429,
            ErrorCode::ResourceExhausted => 429,
            ErrorCode::Aborted => 409,
            ErrorCode::Cancelled => 499,
            ErrorCode::Internal => 500,
            ErrorCode::Unavailable => 503,
            ErrorCode::DeadlineExceeded => 504,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// The error type that flows through every interceptor and out of the router
/// as a `type: error` envelope (spec §4.2).
///
/// Interceptors either recover from a `RaffelError`, transform it (mapping a
/// native failure onto one of these), or let it propagate unchanged; only the
/// router performs the final translation into an error envelope (spec §7).
#[derive(Debug, thiserror::Error)]
#[error("{code}: {message}")]
pub struct RaffelError {
    pub code: ErrorCode,
    pub message: String,
    pub details: Option<serde_json::Value>,
    pub retry_after: Option<Duration>,
    #[source]
    pub cause: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl RaffelError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
            retry_after: None,
            cause: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }

    pub fn with_cause(mut self, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    pub fn deadline_exceeded(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::DeadlineExceeded, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unavailable, message)
    }

    pub fn resource_exhausted(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ResourceExhausted, message)
    }

    pub fn rate_limited(message: impl Into<String>, retry_after: Duration) -> Self {
        Self::new(ErrorCode::RateLimited, message).with_retry_after(retry_after)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Cancelled, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    pub fn already_exists(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::AlreadyExists, message)
    }

    pub fn is_retryable(&self, retryable_codes: &[ErrorCode]) -> bool {
        retryable_codes.contains(&self.code)
    }

    /// Serializable wire form: `{"code", "message", "details"?, "retryAfter"?}` (spec §6).
    pub fn to_wire(&self) -> serde_json::Value {
        let mut obj = serde_json::Map::new();
        obj.insert("code".into(), serde_json::Value::String(self.code.to_string()));
        obj.insert("message".into(), serde_json::Value::String(self.message.clone()));
        if let Some(details) = &self.details {
            obj.insert("details".into(), details.clone());
        }
        if let Some(retry_after) = self.retry_after {
            obj.insert(
                "retryAfter".into(),
                serde_json::Value::from(retry_after.as_secs_f64()),
            );
        }
        serde_json::Value::Object(obj)
    }
}

/// Any boxed error crossing an interceptor boundary before it has been
/// classified onto a [`RaffelError`], mirroring `aws-smithy-runtime-api`'s
/// `box_error::BoxError`.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A thrown value that doesn't carry a `RaffelError` becomes `Internal`
/// (spec §4.4: "The router MUST NOT let exceptions escape; a non-typed
/// thrown value becomes INTERNAL").
impl From<BoxError> for RaffelError {
    fn from(err: BoxError) -> Self {
        RaffelError::new(ErrorCode::Internal, err.to_string())
    }
}

impl From<std::io::Error> for RaffelError {
    fn from(err: std::io::Error) -> Self {
        RaffelError::internal(err.to_string())
    }
}

impl From<serde_json::Error> for RaffelError {
    fn from(err: serde_json::Error) -> Self {
        RaffelError::new(ErrorCode::InvalidArgument, err.to_string())
    }
}
