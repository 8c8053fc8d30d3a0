// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Configuration for a realtime session.
//!
//! # Example
//!
//! ```
//! use realtime_sync::SessionConfig;
//!
//! // Minimal config (local emulator defaults)
//! let config = SessionConfig::default();
//! assert_eq!(config.idle_timeout_ms, 60_000);
//!
//! // Production database
//! let config = SessionConfig {
//!     host: "my-db.example.com".into(),
//!     namespace: "my-db".into(),
//!     secure: true,
//!     ..Default::default()
//! };
//! assert_eq!(config.host_info().connection_url(None, None), "wss://my-db.example.com/.ws?ns=my-db&v=5");
//! ```

use std::time::Duration;

use serde::Deserialize;

use crate::resilience::RetryConfig;
use crate::transport::{HostInfo, TransportConfig};

/// Configuration for one session.
///
/// All fields except the host and namespace have defaults matching the
/// server's expectations.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Host (and optional port) of the database, e.g. "my-db.example.com"
    #[serde(default = "default_host")]
    pub host: String,

    /// Database namespace sent as `ns` in the connection URL
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Use `wss://` instead of `ws://`
    #[serde(default = "default_secure")]
    pub secure: bool,

    /// Close the connection after this long with nothing to do (default: 60s)
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,

    /// A connection that lasted this long resets the backoff (default: 30s)
    #[serde(default = "default_successful_connection_ms")]
    pub successful_connection_ms: u64,

    /// Consecutive credential rejections before backing off to the max delay
    #[serde(default = "default_invalid_auth_threshold")]
    pub invalid_auth_threshold: u32,

    /// Socket settings
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_keepalive_interval_ms")]
    pub keepalive_interval_ms: u64,
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,

    /// Reconnect backoff
    #[serde(default = "default_retry_min_delay_ms")]
    pub retry_min_delay_ms: u64,
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
    #[serde(default = "default_retry_exponent")]
    pub retry_exponent: f64,
    #[serde(default = "default_retry_jitter_factor")]
    pub retry_jitter_factor: f64,

    /// Version reported in the first-connection stats
    #[serde(default = "default_sdk_version")]
    pub sdk_version: String,
}

fn default_host() -> String { "localhost:9000".into() }
fn default_namespace() -> String { "default".into() }
fn default_secure() -> bool { false }
fn default_idle_timeout_ms() -> u64 { 60_000 }
fn default_successful_connection_ms() -> u64 { 30_000 }
fn default_invalid_auth_threshold() -> u32 { 3 }
fn default_connect_timeout_ms() -> u64 { 30_000 }
fn default_keepalive_interval_ms() -> u64 { 45_000 }
fn default_max_frame_size() -> usize { 16_384 }
fn default_retry_min_delay_ms() -> u64 { 1_000 }
fn default_retry_max_delay_ms() -> u64 { 30_000 }
fn default_retry_exponent() -> f64 { 1.3 }
fn default_retry_jitter_factor() -> f64 { 0.7 }
fn default_sdk_version() -> String { env!("CARGO_PKG_VERSION").into() }

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            namespace: default_namespace(),
            secure: default_secure(),
            idle_timeout_ms: default_idle_timeout_ms(),
            successful_connection_ms: default_successful_connection_ms(),
            invalid_auth_threshold: default_invalid_auth_threshold(),
            connect_timeout_ms: default_connect_timeout_ms(),
            keepalive_interval_ms: default_keepalive_interval_ms(),
            max_frame_size: default_max_frame_size(),
            retry_min_delay_ms: default_retry_min_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            retry_exponent: default_retry_exponent(),
            retry_jitter_factor: default_retry_jitter_factor(),
            sdk_version: default_sdk_version(),
        }
    }
}

impl SessionConfig {
    pub fn new(host: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            namespace: namespace.into(),
            secure: true,
            ..Default::default()
        }
    }

    pub fn host_info(&self) -> HostInfo {
        HostInfo::new(self.host.clone(), self.namespace.clone(), self.secure)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn successful_connection(&self) -> Duration {
        Duration::from_millis(self.successful_connection_ms)
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            initial_delay: Duration::from_millis(self.retry_min_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
            factor: self.retry_exponent,
            jitter_factor: self.retry_jitter_factor,
        }
    }

    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            keepalive_interval: Duration::from_millis(self.keepalive_interval_ms),
            max_frame_size: self.max_frame_size,
        }
    }
}
