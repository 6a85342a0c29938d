/*
 * Copyright Raffel Contributors
 * SPDX-License-Identifier: Apache-2.0
 */

//! Process-level configuration contracts (spec §6 `StartupOptions`). These
//! are boundary-contract data only: the adapters that would actually read
//! `port`/`tls`/`maxConnections` to bind a listener are out of scope, but the
//! shape is fixed here so an adapter crate can deserialize it directly.

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;

fn default_body_limit() -> u64 {
    1024 * 1024
}

fn default_heartbeat_ms() -> u64 {
    30_000
}

fn default_max_connections() -> u32 {
    10_000
}

/// CORS configuration, one of the optional `StartupOptions` fields.
#[derive(Debug, Clone, Deserialize)]
pub struct CorsConfig {
    #[serde(default)]
    pub allowed_origins: Vec<String>,
    #[serde(default)]
    pub allow_credentials: bool,
}

/// TLS configuration, one of the optional `StartupOptions` fields.
#[derive(Debug, Clone, Deserialize)]
pub struct TlsConfig {
    pub cert_path: String,
    pub key_path: String,
}

/// `{port, cors?, bodyLimit, trustProxy, streaming, heartbeatIntervalMs,
/// maxConnections, tls?}` (spec §6).
#[derive(Debug, Clone, Deserialize)]
pub struct StartupOptions {
    pub port: u16,
    #[serde(default)]
    pub cors: Option<CorsConfig>,
    #[serde(default = "default_body_limit")]
    pub body_limit: u64,
    #[serde(default)]
    pub trust_proxy: bool,
    #[serde(default)]
    pub streaming: bool,
    #[serde(default = "default_heartbeat_ms")]
    pub heartbeat_interval_ms: u64,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default)]
    pub tls: Option<TlsConfig>,
}

impl StartupOptions {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }
}

/// The `NODE_ENV`-style toggle, renamed `RaffelEnv`/`RAFFEL_ENV` for a Rust
/// process (spec §6: "Environment: `NODE_ENV` toggles pretty vs JSON logging
/// defaults").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RaffelEnv {
    Development,
    Production,
    Test,
}

impl RaffelEnv {
    /// Reads `RAFFEL_ENV` from the process environment, defaulting to
    /// `Development` when unset or unrecognized.
    pub fn from_process_env() -> Self {
        match std::env::var("RAFFEL_ENV").as_deref() {
            Ok("production") => RaffelEnv::Production,
            Ok("test") => RaffelEnv::Test,
            _ => RaffelEnv::Development,
        }
    }

    pub fn uses_json_logging(&self) -> bool {
        matches!(self, RaffelEnv::Production)
    }
}

/// Router-wide defaults applied before any per-procedure override (one
/// struct per resilience interceptor, consistent with how the teacher
/// configures `RetryConfig`/`TimeoutConfig`).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GlobalInterceptorConfig {
    #[serde(default)]
    pub default_timeout_ms: Option<u64>,
    #[serde(default)]
    pub logging_excluded_procedures: Vec<String>,
    #[serde(default)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// Top-level router configuration, combining the process-level startup
/// options with the interceptor defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct RouterConfig {
    pub startup: StartupOptions,
    #[serde(default)]
    pub interceptors: GlobalInterceptorConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn startup_options_deserialize_with_defaults() {
        let json = serde_json::json!({"port": 8080});
        let opts: StartupOptions = serde_json::from_value(json).unwrap();
        assert_eq!(opts.port, 8080);
        assert_eq!(opts.body_limit, default_body_limit());
        assert!(!opts.trust_proxy);
    }

    #[test]
    fn raffel_env_defaults_to_development_when_unset() {
        std::env::remove_var("RAFFEL_ENV");
        assert_eq!(RaffelEnv::from_process_env(), RaffelEnv::Development);
    }
}
