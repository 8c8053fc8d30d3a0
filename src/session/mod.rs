// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The persistent session.
//!
//! [`PersistentConnection`] keeps a logical session with the server alive
//! across any number of physical connections. It owns every outstanding
//! listen, write and on-disconnect operation, replays them after each
//! reconnect, and decides when to reconnect, back off or go idle.
//!
//! # Lifecycle
//!
//! ```text
//!              ┌──────────── reconnect timer ────────────┐
//!              │                                          ▼
//!        Disconnected ◄──── disconnect ──── ...      GettingToken
//!              ▲                                          │ token
//!              │                                          ▼
//!          Connected ◄── auth ok ── Authenticating ◄── Connecting
//!              ▲                                          │ handshake,
//!              └──────────── handshake, no token ─────────┘ with token
//! ```
//!
//! The session is a plain state machine: operations are method calls and
//! everything asynchronous (timers, token fetches, transport traffic) comes
//! back through [`PersistentConnection::handle_event`]. See
//! [`crate::runtime`] for the tokio driver.
//!
//! # Example
//!
//! ```rust,no_run
//! use realtime_sync::model::{Node, NodeHashProvider, Path};
//! use realtime_sync::runtime::{spawn_session, StaticTokenProvider};
//! use realtime_sync::session::{ListenQuerySpec, SessionDelegate, RangeMerge};
//! use realtime_sync::{RequestError, SessionConfig};
//! use serde_json::{json, Map, Value};
//! use std::sync::Arc;
//!
//! struct Printer;
//!
//! impl SessionDelegate for Printer {
//!     fn on_data_update(&mut self, path: &Path, data: Value, _merge: bool, _tag: Option<u64>) {
//!         println!("{path}: {data}");
//!     }
//!     fn on_range_merge_update(&mut self, _: &Path, _: Vec<RangeMerge>, _: Option<u64>) {}
//!     fn on_connect(&mut self) {}
//!     fn on_disconnect(&mut self) {}
//!     fn on_auth_status(&mut self, _ok: bool) {}
//!     fn on_server_info_update(&mut self, _: Map<String, Value>) {}
//! }
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), realtime_sync::SessionError> {
//! let config = SessionConfig::new("my-db.example.com", "my-db");
//! let session = spawn_session(config, Arc::new(StaticTokenProvider::anonymous()), Box::new(Printer));
//! session.initialize().await?;
//!
//! let query = ListenQuerySpec::default_at(Path::new("users/alice"));
//! let hash = NodeHashProvider::new(Node::empty());
//! session.listen(query, Box::new(hash), None, Box::new(|status: Result<(), RequestError>| println!("listen: {status:?}"))).await?;
//! session.put(Path::new("users/alice/online"), json!(true), None).await?;
//! session.shutdown().await
//! # }
//! ```

mod api;
mod dispatch;
mod host;
mod lifecycle;
#[cfg(test)]
mod test_support;
mod types;

pub use host::{SessionDelegate, SessionEvent, SessionHost, Timer, TimerId, TimerKind};
pub use types::{
    ListenCallback, ListenHashProvider, ListenQuerySpec, RangeMerge, RequestCallback, SessionState,
};

use std::collections::{BTreeMap, HashMap, HashSet};

use tracing::debug;

use crate::config::SessionConfig;
use crate::connection::Connection;
use crate::resilience::RetryHelper;
use crate::transport::HostInfo;
use types::{OutstandingDisconnect, OutstandingListen, OutstandingPut, PendingResponse};

/// Interrupt reason used by [`PersistentConnection::refresh_auth_token`].
pub const TOKEN_REFRESH_INTERRUPT_REASON: &str = "token_refresh";
/// Interrupt reason set while the session has nothing to do.
pub const IDLE_INTERRUPT_REASON: &str = "connection_idle";
/// Interrupt reason set by [`PersistentConnection::shutdown`].
pub const SHUTDOWN_INTERRUPT_REASON: &str = "shutdown";

/// Long-lived session state machine.
pub struct PersistentConnection {
    config: SessionConfig,
    host_info: HostInfo,
    host: Box<dyn SessionHost>,
    delegate: Box<dyn SessionDelegate>,

    state: SessionState,
    connection: Option<Connection>,
    next_connection_id: u64,
    cached_host: Option<String>,
    last_session_id: Option<String>,
    first_connection: bool,
    last_connection_established_at: Option<i64>,

    auth_token: Option<String>,
    force_auth_token_refresh: bool,
    pending_force_refresh: bool,
    current_token_attempt: u64,
    invalid_auth_token_count: u32,

    interrupt_reasons: HashSet<String>,
    retry: RetryHelper,
    idle_timer: Option<TimerId>,
    shut_down: bool,

    request_counter: u64,
    write_counter: u64,
    listen_counter: u64,
    listens: HashMap<ListenQuerySpec, OutstandingListen>,
    outstanding_puts: BTreeMap<u64, OutstandingPut>,
    on_disconnect_queue: Vec<OutstandingDisconnect>,
    request_callbacks: HashMap<u64, PendingResponse>,
    has_on_disconnects: bool,
}

impl PersistentConnection {
    pub fn new(
        config: SessionConfig,
        host: Box<dyn SessionHost>,
        delegate: Box<dyn SessionDelegate>,
    ) -> Self {
        let retry = RetryHelper::new(config.retry_config());
        let host_info = config.host_info();
        Self {
            config,
            host_info,
            host,
            delegate,
            state: SessionState::Disconnected,
            connection: None,
            next_connection_id: 0,
            cached_host: None,
            last_session_id: None,
            first_connection: true,
            last_connection_established_at: None,
            auth_token: None,
            force_auth_token_refresh: false,
            pending_force_refresh: false,
            current_token_attempt: 0,
            invalid_auth_token_count: 0,
            interrupt_reasons: HashSet::new(),
            retry,
            idle_timer: None,
            shut_down: false,
            request_counter: 0,
            write_counter: 0,
            listen_counter: 0,
            listens: HashMap::new(),
            outstanding_puts: BTreeMap::new(),
            on_disconnect_queue: Vec::new(),
            request_callbacks: HashMap::new(),
            has_on_disconnects: false,
        }
    }

    /// Feed one asynchronous result back into the session.
    pub fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Timer(timer) => self.on_timer(timer),
            SessionEvent::Token { attempt, result } => self.on_token_result(attempt, result),
            SessionEvent::Transport { connection_id, event } => {
                let signals = match self.connection.as_mut() {
                    Some(connection) if connection.id() == connection_id => {
                        connection.handle_transport_event(event)
                    }
                    _ => {
                        debug!(connection_id, "Ignoring event from a stale transport");
                        return;
                    }
                };
                for signal in signals {
                    self.on_connection_signal(signal);
                }
            }
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    pub fn is_interrupted(&self, reason: &str) -> bool {
        self.interrupt_reasons.contains(reason)
    }

    /// Host the next connection goes to, if the server redirected us.
    pub fn cached_host(&self) -> Option<&str> {
        self.cached_host.as_deref()
    }

    pub fn listen_count(&self) -> usize {
        self.listens.len()
    }

    pub fn outstanding_put_count(&self) -> usize {
        self.outstanding_puts.len()
    }

    pub fn queued_on_disconnect_count(&self) -> usize {
        self.on_disconnect_queue.len()
    }

    /// Undelayed base of the next reconnect backoff.
    pub fn retry_delay(&self) -> std::time::Duration {
        self.retry.current_delay()
    }

    /// Nothing registered, in flight or queued.
    pub fn is_idle(&self) -> bool {
        self.listens.is_empty()
            && self.request_callbacks.is_empty()
            && !self.has_on_disconnects
            && self.outstanding_puts.is_empty()
            && self.on_disconnect_queue.is_empty()
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            debug!(from = %self.state, to = %state, "Session state change");
            self.state = state;
            crate::metrics::set_session_state(&state.to_string());
        }
    }
}
