/*
 * Copyright Raffel Contributors
 * SPDX-License-Identifier: Apache-2.0
 */

//! Wire-level data model shared by every Raffel crate: the [`Envelope`]
//! carrier, [`Context`], [`RaffelError`], and the fingerprinting used by the
//! cache and dedup interceptors.

pub mod context;
pub mod envelope;
pub mod error;
pub mod extensions;
pub mod fingerprint;
pub mod metadata;

pub use context::{AuthContext, Context, RequestState, TracingContext};
pub use envelope::{Envelope, EnvelopeType, MIN_ID_LEN};
pub use error::{BoxError, ErrorCode, RaffelError};
pub use extensions::Extensions;
pub use fingerprint::{canonicalize, fingerprint};
pub use metadata::{is_sensitive_key, Metadata, SENSITIVE_METADATA_KEYS};
