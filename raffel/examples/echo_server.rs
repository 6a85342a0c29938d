/*
 * Copyright Raffel Contributors
 * SPDX-License-Identifier: Apache-2.0
 */

//! Wires a minimal `echo.ping` procedure through [`RaffelBuilder`] and drives
//! it with a toy in-process [`Adapter`] — standing in for the HTTP/WS/gRPC
//! listeners spec §6 describes but leaves out of scope. Run with
//! `RUST_LOG=debug cargo run -p raffel --example echo_server`.

use std::sync::Arc;

use async_trait::async_trait;
use raffel::{from_fn, Adapter, Envelope, HandlerDescriptor, RaffelBuilder, RaffelEnv, RaffelError, Router, StartupOptions};
use raffel_async::SharedTimeSource;
use tracing_subscriber::{prelude::*, EnvFilter};

/// Pretty-prints in development, switches to JSON in production (spec §6:
/// `NODE_ENV` toggles pretty vs JSON logging defaults, renamed `RAFFEL_ENV`).
fn setup_tracing() {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info")).unwrap();
    let registry = tracing_subscriber::registry().with(filter);
    if RaffelEnv::from_process_env().uses_json_logging() {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer().pretty()).init();
    }
}

/// Stands in for a real listener: dispatches one hardcoded request so the
/// example is runnable without opening a socket.
struct InProcessAdapter;

#[async_trait]
impl Adapter for InProcessAdapter {
    fn name(&self) -> &str {
        "in-process"
    }

    async fn serve(&self, router: Arc<Router>, _options: StartupOptions) -> Result<(), RaffelError> {
        let envelope = Envelope::new_request(
            "01ffeeaabbccddee",
            "echo.ping",
            serde_json::json!({"message": "hello"}),
            SharedTimeSource::default(),
        );
        let response = router.dispatch(envelope).await;
        tracing::info!(payload = ?response.payload, "echo.ping responded");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    setup_tracing();

    let startup: StartupOptions = serde_json::from_value(serde_json::json!({"port": 8080}))?;
    let raffel = RaffelBuilder::new(startup)
        .register(HandlerDescriptor::procedure("echo.ping", from_fn(|payload, _ctx| async move { Ok(payload) })))?
        .build();

    raffel.serve(Arc::new(InProcessAdapter)).await?;
    Ok(())
}
