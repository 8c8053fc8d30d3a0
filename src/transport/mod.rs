// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Transport seam between the connection layer and the socket.
//!
//! A [`Transport`] is a fire-and-forget handle for one socket. Events flow
//! the other way through a [`TransportListener`], so the session can run
//! as a single-threaded state machine that never blocks on I/O.
//!
//! ```text
//!  Connection ──send/close──► Transport ──frames──► server
//!      ▲                                              │
//!      └──── TransportEvent ◄── TransportListener ◄───┘
//! ```

pub mod frames;
pub mod websocket;

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::protocol::PROTOCOL_VERSION;

pub use websocket::{WebSocketTransport, WebSocketTransportFactory};

/// Handle for one open or opening socket.
pub trait Transport: Send {
    /// Queue a message for delivery. Dropped if the socket is gone.
    fn send(&mut self, message: Value);

    /// Close the socket. No `Closed` event is reported for a local close.
    fn close(&mut self);
}

/// What a transport reports back.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Opened,
    Message(Value),
    /// The socket went away without a local `close`.
    Closed { ever_connected: bool },
}

/// Receives events for one transport.
pub trait TransportListener: Send + Sync + 'static {
    fn on_event(&self, event: TransportEvent);
}

/// Opens transports for the session host.
pub trait TransportFactory: Send + Sync {
    fn open(&self, url: &str, listener: Arc<dyn TransportListener>) -> Box<dyn Transport>;
}

/// Timing and size limits for a socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    pub connect_timeout: Duration,
    pub keepalive_interval: Duration,
    pub max_frame_size: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            keepalive_interval: Duration::from_secs(45),
            max_frame_size: frames::MAX_FRAME_SIZE,
        }
    }
}

/// Where to connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostInfo {
    pub host: String,
    pub namespace: String,
    pub secure: bool,
}

impl HostInfo {
    pub fn new(host: impl Into<String>, namespace: impl Into<String>, secure: bool) -> Self {
        Self {
            host: host.into(),
            namespace: namespace.into(),
            secure,
        }
    }

    /// `wss://{host}/.ws?ns={ns}&v=5[&ls={last_session_id}]`
    ///
    /// `host_override` replaces the configured host, for a host the server
    /// redirected us to.
    pub fn connection_url(&self, host_override: Option<&str>, last_session_id: Option<&str>) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };
        let host = host_override.unwrap_or(&self.host);
        let mut url = format!(
            "{scheme}://{host}/.ws?ns={}&v={PROTOCOL_VERSION}",
            self.namespace
        );
        if let Some(session_id) = last_session_id {
            url.push_str("&ls=");
            url.push_str(session_id);
        }
        url
    }
}
