/*
 * Copyright Raffel Contributors
 * SPDX-License-Identifier: Apache-2.0
 */

use raffel_async::SharedTimeSource;

use crate::context::Context;
use crate::metadata::Metadata;

/// The envelope `type` field and the state machine it drives for streams
/// (spec §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeType {
    Request,
    Response,
    Error,
    Event,
    #[serde(rename = "stream:open")]
    StreamOpen,
    #[serde(rename = "stream:data")]
    StreamData,
    #[serde(rename = "stream:close")]
    StreamClose,
}

impl EnvelopeType {
    pub fn is_stream(&self) -> bool {
        matches!(
            self,
            EnvelopeType::StreamOpen | EnvelopeType::StreamData | EnvelopeType::StreamClose
        )
    }
}

/// Minimum entropy, in characters, an adapter-assigned envelope id must carry
/// (spec §4.1: "Producers set `id` (unique, ≥16 chars entropy)").
pub const MIN_ID_LEN: usize = 16;

/// The universal in-process request carrier (spec §3).
///
/// `id` is stable across retries of the same logical call: the router
/// constructs one `Envelope` per logical request and reuses its `id` for
/// every retry attempt, only varying `metadata["x-retry-attempt"]`.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub id: String,
    pub kind: EnvelopeType,
    pub procedure: String,
    pub payload: serde_json::Value,
    pub metadata: Metadata,
    pub context: Context,
}

impl Envelope {
    pub fn new_request(
        id: impl Into<String>,
        procedure: impl Into<String>,
        payload: serde_json::Value,
        time_source: SharedTimeSource,
    ) -> Self {
        let id = id.into();
        let context = Context::new(id.clone(), time_source);
        Self {
            id,
            kind: EnvelopeType::Request,
            procedure: procedure.into(),
            payload,
            metadata: Metadata::new(),
            context,
        }
    }

    /// Builds the `type=response` envelope returned on handler success
    /// (spec §4.4).
    pub fn respond(&self, payload: serde_json::Value) -> Envelope {
        Envelope {
            id: self.id.clone(),
            kind: EnvelopeType::Response,
            procedure: self.procedure.clone(),
            payload,
            metadata: self.metadata.clone(),
            context: self.context.clone(),
        }
    }

    /// Builds the `type=error` envelope returned on handler failure
    /// (spec §4.4): `payload={code,message,details?}`.
    pub fn error(&self, err: &crate::error::RaffelError) -> Envelope {
        Envelope {
            id: self.id.clone(),
            kind: EnvelopeType::Error,
            procedure: self.procedure.clone(),
            payload: err.to_wire(),
            metadata: self.metadata.clone(),
            context: self.context.clone(),
        }
    }

    pub fn has_min_entropy(&self) -> bool {
        self.id.len() >= MIN_ID_LEN
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn respond_preserves_id_and_procedure() {
        let ts = SharedTimeSource::default();
        let req = Envelope::new_request(
            "0123456789abcdef",
            "users.get",
            serde_json::json!({"id": 1}),
            ts,
        );
        let resp = req.respond(serde_json::json!({"name": "ok"}));
        assert_eq!(resp.id, req.id);
        assert_eq!(resp.procedure, req.procedure);
        assert_eq!(resp.kind, EnvelopeType::Response);
    }

    #[test]
    fn error_envelope_carries_wire_shape() {
        let ts = SharedTimeSource::default();
        let req = Envelope::new_request("0123456789abcdef", "users.get", serde_json::json!({}), ts);
        let err = crate::error::RaffelError::not_found("no such user");
        let resp = req.error(&err);
        assert_eq!(resp.kind, EnvelopeType::Error);
        assert_eq!(resp.payload["code"], "NOT_FOUND");
    }
}
