/*
 * Copyright Raffel Contributors
 * SPDX-License-Identifier: Apache-2.0
 */

//! Input/output validation is explicitly pluggable (spec §1 Non-goals:
//! "providing a validation library"). The router only needs a narrow
//! capability: check a JSON value against an optional schema value and
//! produce an `INVALID_ARGUMENT` on failure.

use raffel_types::RaffelError;

pub trait Validator: Send + Sync {
    fn validate(&self, value: &serde_json::Value, schema: Option<&serde_json::Value>) -> Result<(), RaffelError>;
}

/// The default validator: accepts everything. Callers who want real schema
/// enforcement (JSON Schema, protobuf reflection, ...) provide their own
/// [`Validator`] to the router builder.
pub struct NoopValidator;

impl Validator for NoopValidator {
    fn validate(&self, _value: &serde_json::Value, _schema: Option<&serde_json::Value>) -> Result<(), RaffelError> {
        Ok(())
    }
}
