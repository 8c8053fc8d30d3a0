// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! One connection attempt on top of a transport.
//!
//! The connection owns the transport and speaks the outer envelope: it waits
//! for the server handshake, unwraps data messages and handles control
//! messages. It reports upward through [`ConnectionSignal`]s rather than
//! callbacks, so the session stays in charge of every state change.
//!
//! ```text
//! Connecting ──hello──► Connected
//!     │                     │
//!     └────── close ────────┴──► Disconnected (terminal, reported once)
//! ```

use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use crate::protocol::{
    CONTROL_HELLO, CONTROL_RESET, CONTROL_SHUTDOWN, HELLO_HOST, HELLO_SESSION_ID, HELLO_TIMESTAMP,
    MESSAGE_DATA, MESSAGE_TYPE, MESSAGE_TYPE_CONTROL, MESSAGE_TYPE_DATA,
};
use crate::transport::{Transport, TransportEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
}

/// Why a connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The server asked us to reconnect elsewhere.
    ServerReset,
    Other,
}

/// What the session needs to know about a connection.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionSignal {
    /// Handshake done.
    Ready { timestamp: i64, session_id: String },
    /// An unwrapped data message.
    Data(Map<String, Value>),
    /// Host to use for future connections.
    CacheHost(String),
    /// The server shut this client down.
    Kill(String),
    /// Terminal. Reported at most once per connection.
    Disconnected(DisconnectReason),
}

pub struct Connection {
    id: u64,
    state: ConnectionState,
    transport: Option<Box<dyn Transport>>,
}

impl Connection {
    pub fn open(id: u64, transport: Box<dyn Transport>) -> Self {
        debug!(connection_id = id, "Opening a connection");
        Self {
            id,
            state: ConnectionState::Connecting,
            transport: Some(transport),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Wrap a request in a data envelope and send it.
    pub fn send_request(&mut self, message: Value, sensitive: bool) {
        if self.state != ConnectionState::Connected {
            warn!(connection_id = self.id, state = ?self.state, "Tried to send on an unconnected connection");
            return;
        }
        if sensitive {
            debug!(connection_id = self.id, "Sending data (contents hidden)");
        } else {
            debug!(connection_id = self.id, %message, "Sending data");
        }
        if let Some(transport) = self.transport.as_mut() {
            transport.send(json!({ MESSAGE_TYPE: MESSAGE_TYPE_DATA, MESSAGE_DATA: message }));
        }
    }

    pub fn handle_transport_event(&mut self, event: TransportEvent) -> Vec<ConnectionSignal> {
        match event {
            TransportEvent::Opened => {
                debug!(connection_id = self.id, "Transport opened, waiting for handshake");
                Vec::new()
            }
            TransportEvent::Message(message) => self.on_message(message),
            TransportEvent::Closed { ever_connected } => {
                // Already gone, nothing to close.
                self.transport = None;
                if !ever_connected && self.state == ConnectionState::Connecting {
                    info!(connection_id = self.id, "Realtime connection failed");
                } else {
                    info!(connection_id = self.id, "Realtime connection lost");
                }
                self.close(DisconnectReason::Other).into_iter().collect()
            }
        }
    }

    /// Close the connection. Returns the disconnect signal the first time only.
    pub fn close(&mut self, reason: DisconnectReason) -> Option<ConnectionSignal> {
        if self.state == ConnectionState::Disconnected {
            return None;
        }
        debug!(connection_id = self.id, ?reason, "Closing realtime connection");
        self.state = ConnectionState::Disconnected;
        if let Some(mut transport) = self.transport.take() {
            transport.close();
        }
        Some(ConnectionSignal::Disconnected(reason))
    }

    fn on_message(&mut self, message: Value) -> Vec<ConnectionSignal> {
        let Value::Object(mut envelope) = message else {
            warn!(connection_id = self.id, "Server message is not an object");
            return self.close(DisconnectReason::Other).into_iter().collect();
        };
        let message_type = envelope
            .get(MESSAGE_TYPE)
            .and_then(Value::as_str)
            .map(str::to_owned);
        match message_type.as_deref() {
            Some(MESSAGE_TYPE_DATA) => match envelope.remove(MESSAGE_DATA) {
                Some(Value::Object(data)) => vec![ConnectionSignal::Data(data)],
                _ => {
                    warn!(connection_id = self.id, "Data message without a payload");
                    self.close(DisconnectReason::Other).into_iter().collect()
                }
            },
            Some(MESSAGE_TYPE_CONTROL) => match envelope.remove(MESSAGE_DATA) {
                Some(Value::Object(control)) => self.on_control(control),
                _ => {
                    warn!(connection_id = self.id, "Control message without a payload");
                    self.close(DisconnectReason::Other).into_iter().collect()
                }
            },
            Some(other) => {
                debug!(connection_id = self.id, message_type = other, "Ignoring unknown server message type");
                Vec::new()
            }
            None => {
                warn!(connection_id = self.id, "Failed to parse server message: missing message type");
                self.close(DisconnectReason::Other).into_iter().collect()
            }
        }
    }

    fn on_control(&mut self, control: Map<String, Value>) -> Vec<ConnectionSignal> {
        let payload = control.get(MESSAGE_DATA);
        match control.get(MESSAGE_TYPE).and_then(Value::as_str) {
            Some(CONTROL_HELLO) => match payload.and_then(Value::as_object) {
                Some(hello) => self.on_handshake(hello),
                None => {
                    warn!(connection_id = self.id, "Handshake without a payload");
                    self.close(DisconnectReason::Other).into_iter().collect()
                }
            },
            Some(CONTROL_RESET) => {
                let mut signals = Vec::new();
                match payload.and_then(Value::as_str) {
                    Some(host) => {
                        info!(connection_id = self.id, host, "Server asked us to reconnect to another host");
                        signals.push(ConnectionSignal::CacheHost(host.to_owned()));
                    }
                    None => warn!(connection_id = self.id, "Reset message without a host"),
                }
                signals.extend(self.close(DisconnectReason::ServerReset));
                signals
            }
            Some(CONTROL_SHUTDOWN) => {
                let reason = payload.and_then(Value::as_str).unwrap_or_default().to_owned();
                info!(connection_id = self.id, reason = %reason, "Connection shutdown command received, shutting down");
                let mut signals = vec![ConnectionSignal::Kill(reason)];
                signals.extend(self.close(DisconnectReason::Other));
                signals
            }
            other => {
                debug!(connection_id = self.id, control_type = ?other, "Ignoring unknown control message");
                Vec::new()
            }
        }
    }

    fn on_handshake(&mut self, hello: &Map<String, Value>) -> Vec<ConnectionSignal> {
        let timestamp = hello.get(HELLO_TIMESTAMP).and_then(Value::as_i64);
        let session_id = hello.get(HELLO_SESSION_ID).and_then(Value::as_str);
        let (Some(timestamp), Some(session_id)) = (timestamp, session_id) else {
            warn!(connection_id = self.id, "Malformed handshake");
            return self.close(DisconnectReason::Other).into_iter().collect();
        };
        let mut signals = Vec::new();
        if let Some(host) = hello.get(HELLO_HOST).and_then(Value::as_str) {
            signals.push(ConnectionSignal::CacheHost(host.to_owned()));
        }
        if self.state == ConnectionState::Connecting {
            debug!(connection_id = self.id, "Realtime connection established");
            self.state = ConnectionState::Connected;
            signals.push(ConnectionSignal::Ready {
                timestamp,
                session_id: session_id.to_owned(),
            });
        }
        signals
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Recorded {
        sent: Vec<Value>,
        closed: usize,
    }

    struct FakeTransport(Arc<Mutex<Recorded>>);

    impl Transport for FakeTransport {
        fn send(&mut self, message: Value) {
            self.0.lock().unwrap().sent.push(message);
        }
        fn close(&mut self) {
            self.0.lock().unwrap().closed += 1;
        }
    }

    fn connection() -> (Connection, Arc<Mutex<Recorded>>) {
        let recorded = Arc::new(Mutex::new(Recorded::default()));
        (Connection::open(1, Box::new(FakeTransport(recorded.clone()))), recorded)
    }

    fn hello() -> TransportEvent {
        TransportEvent::Message(json!({"t": "c", "d": {"t": "h", "d": {"ts": 1000, "h": "h1", "s": "sess"}}}))
    }

    #[test]
    fn test_handshake_makes_ready() {
        let (mut conn, _) = connection();
        let signals = conn.handle_transport_event(hello());
        assert_eq!(
            signals,
            vec![
                ConnectionSignal::CacheHost("h1".into()),
                ConnectionSignal::Ready { timestamp: 1000, session_id: "sess".into() },
            ]
        );
        assert_eq!(conn.state(), ConnectionState::Connected);

        // A second hello only refreshes the host.
        let signals = conn.handle_transport_event(hello());
        assert_eq!(signals, vec![ConnectionSignal::CacheHost("h1".into())]);
    }

    #[test]
    fn test_send_requires_connected() {
        let (mut conn, recorded) = connection();
        conn.send_request(json!({"r": 0}), false);
        assert!(recorded.lock().unwrap().sent.is_empty());
        conn.handle_transport_event(hello());
        conn.send_request(json!({"r": 0}), true);
        assert_eq!(recorded.lock().unwrap().sent, vec![json!({"t": "d", "d": {"r": 0}})]);
    }

    #[test]
    fn test_data_unwrapped() {
        let (mut conn, _) = connection();
        conn.handle_transport_event(hello());
        let signals = conn.handle_transport_event(TransportEvent::Message(json!({"t": "d", "d": {"r": 1}})));
        let mut expected = Map::new();
        expected.insert("r".into(), json!(1));
        assert_eq!(signals, vec![ConnectionSignal::Data(expected)]);
    }

    #[test]
    fn test_reset_caches_host_then_closes() {
        let (mut conn, recorded) = connection();
        let signals = conn.handle_transport_event(TransportEvent::Message(json!({"t": "c", "d": {"t": "r", "d": "h2"}})));
        assert_eq!(
            signals,
            vec![
                ConnectionSignal::CacheHost("h2".into()),
                ConnectionSignal::Disconnected(DisconnectReason::ServerReset),
            ]
        );
        assert_eq!(recorded.lock().unwrap().closed, 1);
    }

    #[test]
    fn test_shutdown_kills() {
        let (mut conn, _) = connection();
        let signals = conn.handle_transport_event(TransportEvent::Message(json!({"t": "c", "d": {"t": "s", "d": "bye"}})));
        assert_eq!(
            signals,
            vec![
                ConnectionSignal::Kill("bye".into()),
                ConnectionSignal::Disconnected(DisconnectReason::Other),
            ]
        );
    }

    #[test]
    fn test_close_reports_once() {
        let (mut conn, recorded) = connection();
        assert_eq!(
            conn.close(DisconnectReason::Other),
            Some(ConnectionSignal::Disconnected(DisconnectReason::Other))
        );
        assert_eq!(conn.close(DisconnectReason::Other), None);
        assert!(conn
            .handle_transport_event(TransportEvent::Closed { ever_connected: true })
            .is_empty());
        assert_eq!(recorded.lock().unwrap().closed, 1);
    }

    #[test]
    fn test_missing_type_closes() {
        let (mut conn, _) = connection();
        let signals = conn.handle_transport_event(TransportEvent::Message(json!({"d": {}})));
        assert_eq!(signals, vec![ConnectionSignal::Disconnected(DisconnectReason::Other)]);
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_unknown_type_ignored() {
        let (mut conn, _) = connection();
        assert!(conn.handle_transport_event(TransportEvent::Message(json!({"t": "x"}))).is_empty());
        assert_eq!(conn.state(), ConnectionState::Connecting);
    }

    #[test]
    fn test_transport_closed_disconnects_without_closing_transport() {
        let (mut conn, recorded) = connection();
        let signals = conn.handle_transport_event(TransportEvent::Closed { ever_connected: false });
        assert_eq!(signals, vec![ConnectionSignal::Disconnected(DisconnectReason::Other)]);
        assert_eq!(recorded.lock().unwrap().closed, 0);
    }
}
