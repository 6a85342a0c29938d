/*
 * Copyright Raffel Contributors
 * SPDX-License-Identifier: Apache-2.0
 */

//! The adapter boundary (spec §1, §6): concrete wire-protocol listeners
//! (HTTP/WS/gRPC) are out of scope for this crate, but the contract they
//! implement against is fixed here. An adapter decodes a transport message
//! into a fully populated [`Envelope`](raffel_types::Envelope) (spec §4.1),
//! calls [`Router::dispatch`]/`open_stream`/`dispatch_event`, and encodes the
//! resulting envelope back onto the wire; it never sees a raw handler
//! exception (spec §7: "adapters see only Envelopes").

use std::sync::Arc;

use async_trait::async_trait;
use raffel_runtime::Router;
use raffel_runtime_api::StartupOptions;
use raffel_types::RaffelError;

/// What a protocol listener implements to be driven by a built [`crate::Raffel`]
/// (spec §6 "External Interfaces": HTTP/WebSocket/gRPC mappings are each an
/// `Adapter`, differing only in how they decode/encode envelopes over their
/// transport).
#[async_trait]
pub trait Adapter: Send + Sync {
    /// A stable name, used in startup logs.
    fn name(&self) -> &str;

    /// Binds and serves until the adapter decides to stop (typically on
    /// `ctx.cancellation` from a shutdown signal). The router handed in has
    /// already had [`Router::start`] called against it, so the registry is
    /// locked (spec §5: "Registry is write-once/read-many").
    async fn serve(&self, router: Arc<Router>, options: StartupOptions) -> Result<(), RaffelError>;
}
