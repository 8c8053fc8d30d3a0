// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Recording host and delegate for driving the session by hand.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Map, Value};

use super::{
    PersistentConnection, RangeMerge, SessionDelegate, SessionEvent, SessionHost, Timer, TimerId,
    TimerKind,
};
use crate::config::SessionConfig;
use crate::error::TokenError;
use crate::model::Path;
use crate::transport::{Transport, TransportEvent};

pub(crate) type Update = (String, Value, bool, Option<u64>);

#[derive(Default)]
pub(crate) struct Recorded {
    pub now: i64,
    next_timer: TimerId,
    pub timers: Vec<(TimerId, TimerKind, Duration)>,
    pub token_requests: Vec<(u64, bool)>,
    pub urls: Vec<String>,
    pub connection_ids: Vec<u64>,
    pub sent: Vec<(u64, Value)>,
    pub transport_closes: usize,
    pub updates: Vec<Update>,
    pub range_merges: Vec<(String, Vec<RangeMerge>, Option<u64>)>,
    pub auth_statuses: Vec<bool>,
    pub connects: usize,
    pub disconnects: usize,
    pub server_info: Vec<Map<String, Value>>,
}

#[derive(Clone, Default)]
pub(crate) struct Recorder(pub Arc<Mutex<Recorded>>);

struct FakeHost(Arc<Mutex<Recorded>>);
struct FakeDelegate(Arc<Mutex<Recorded>>);
struct FakeTransport {
    connection_id: u64,
    recorded: Arc<Mutex<Recorded>>,
}

impl SessionHost for FakeHost {
    fn now_millis(&self) -> i64 {
        self.0.lock().unwrap().now
    }

    fn schedule(&mut self, delay: Duration, kind: TimerKind) -> TimerId {
        let mut recorded = self.0.lock().unwrap();
        recorded.next_timer += 1;
        let id = recorded.next_timer;
        recorded.timers.push((id, kind, delay));
        id
    }

    fn cancel(&mut self, id: TimerId) {
        self.0.lock().unwrap().timers.retain(|(timer, _, _)| *timer != id);
    }

    fn request_token(&mut self, attempt: u64, force_refresh: bool) {
        self.0.lock().unwrap().token_requests.push((attempt, force_refresh));
    }

    fn open_transport(&mut self, connection_id: u64, url: &str) -> Box<dyn Transport> {
        let mut recorded = self.0.lock().unwrap();
        recorded.urls.push(url.to_owned());
        recorded.connection_ids.push(connection_id);
        Box::new(FakeTransport {
            connection_id,
            recorded: self.0.clone(),
        })
    }
}

impl Transport for FakeTransport {
    fn send(&mut self, message: Value) {
        self.recorded.lock().unwrap().sent.push((self.connection_id, message));
    }

    fn close(&mut self) {
        self.recorded.lock().unwrap().transport_closes += 1;
    }
}

impl SessionDelegate for FakeDelegate {
    fn on_data_update(&mut self, path: &Path, data: Value, is_merge: bool, tag: Option<u64>) {
        self.0.lock().unwrap().updates.push((path.to_string(), data, is_merge, tag));
    }

    fn on_range_merge_update(&mut self, path: &Path, merges: Vec<RangeMerge>, tag: Option<u64>) {
        self.0.lock().unwrap().range_merges.push((path.to_string(), merges, tag));
    }

    fn on_connect(&mut self) {
        self.0.lock().unwrap().connects += 1;
    }

    fn on_disconnect(&mut self) {
        self.0.lock().unwrap().disconnects += 1;
    }

    fn on_auth_status(&mut self, ok: bool) {
        self.0.lock().unwrap().auth_statuses.push(ok);
    }

    fn on_server_info_update(&mut self, updates: Map<String, Value>) {
        self.0.lock().unwrap().server_info.push(updates);
    }
}

pub(crate) fn test_config() -> SessionConfig {
    let mut config = SessionConfig::new("test.example.com", "ns");
    config.retry_jitter_factor = 0.0;
    config
}

pub(crate) fn new_session() -> (PersistentConnection, Recorder) {
    let recorder = Recorder::default();
    let session = PersistentConnection::new(
        test_config(),
        Box::new(FakeHost(recorder.0.clone())),
        Box::new(FakeDelegate(recorder.0.clone())),
    );
    (session, recorder)
}

/// A session that has completed its first handshake (and auth, with a token).
pub(crate) fn connected_session(token: Option<&str>) -> (PersistentConnection, Recorder) {
    let (mut session, recorder) = new_session();
    session.initialize().unwrap();
    recorder.connect(&mut session, token, "sess-1");
    (session, recorder)
}

impl Recorder {
    pub fn lock(&self) -> std::sync::MutexGuard<'_, Recorded> {
        self.0.lock().unwrap()
    }

    /// Run one full connection attempt from the pending reconnect timer.
    pub fn connect(&self, session: &mut PersistentConnection, token: Option<&str>, session_id: &str) {
        self.fire_reconnect(session);
        self.deliver_token(session, token);
        self.handshake(session, session_id);
        if token.is_some() {
            let number = self.last_sent()["r"].as_u64().unwrap();
            self.respond(session, number, json!({"s": "ok", "d": ""}));
        }
    }

    pub fn pending_timers(&self, kind: TimerKind) -> Vec<(TimerId, Duration)> {
        self.lock()
            .timers
            .iter()
            .filter(|(_, k, _)| *k == kind)
            .map(|(id, _, delay)| (*id, *delay))
            .collect()
    }

    pub fn fire(&self, session: &mut PersistentConnection, kind: TimerKind) {
        let (id, _) = *self
            .pending_timers(kind)
            .last()
            .unwrap_or_else(|| panic!("no pending {kind:?} timer"));
        self.lock().timers.retain(|(timer, _, _)| *timer != id);
        session.handle_event(SessionEvent::Timer(Timer { id, kind }));
    }

    pub fn fire_reconnect(&self, session: &mut PersistentConnection) {
        self.fire(session, TimerKind::Reconnect);
    }

    pub fn deliver_token(&self, session: &mut PersistentConnection, token: Option<&str>) {
        let attempt = self.token_requests().last().expect("no token requested").0;
        session.handle_event(SessionEvent::Token {
            attempt,
            result: Ok(token.map(str::to_owned)),
        });
    }

    pub fn fail_token(&self, session: &mut PersistentConnection) {
        let attempt = self.token_requests().last().expect("no token requested").0;
        session.handle_event(SessionEvent::Token {
            attempt,
            result: Err(TokenError("offline".into())),
        });
    }

    pub fn current_connection(&self) -> u64 {
        *self.lock().connection_ids.last().expect("no transport opened")
    }

    pub fn transport_event(&self, session: &mut PersistentConnection, event: TransportEvent) {
        let connection_id = self.current_connection();
        session.handle_event(SessionEvent::Transport { connection_id, event });
    }

    pub fn handshake(&self, session: &mut PersistentConnection, session_id: &str) {
        self.transport_event(session, TransportEvent::Opened);
        self.transport_event(
            session,
            TransportEvent::Message(json!({"t": "c", "d": {"t": "h", "d": {"ts": 5000, "h": "h1", "s": session_id}}})),
        );
    }

    pub fn push(&self, session: &mut PersistentConnection, message: Value) {
        self.transport_event(session, TransportEvent::Message(json!({"t": "d", "d": message})));
    }

    pub fn respond(&self, session: &mut PersistentConnection, number: u64, body: Value) {
        self.push(session, json!({"r": number, "b": body}));
    }

    pub fn drop_connection(&self, session: &mut PersistentConnection) {
        self.transport_event(session, TransportEvent::Closed { ever_connected: true });
    }

    /// Unwrapped requests sent on any connection.
    pub fn sent_requests(&self) -> Vec<Value> {
        self.lock().sent.iter().map(|(_, message)| message["d"].clone()).collect()
    }

    pub fn last_sent(&self) -> Value {
        self.sent_requests().last().cloned().expect("nothing sent")
    }

    pub fn sent_actions(&self) -> Vec<String> {
        self.sent_requests()
            .iter()
            .map(|request| request["a"].as_str().unwrap_or_default().to_owned())
            .collect()
    }

    pub fn token_requests(&self) -> Vec<(u64, bool)> {
        self.lock().token_requests.clone()
    }

    pub fn updates(&self) -> Vec<Update> {
        self.lock().updates.clone()
    }

    pub fn range_merges(&self) -> Vec<(String, Vec<RangeMerge>, Option<u64>)> {
        self.lock().range_merges.clone()
    }

    pub fn auth_statuses(&self) -> Vec<bool> {
        self.lock().auth_statuses.clone()
    }

    pub fn urls(&self) -> Vec<String> {
        self.lock().urls.clone()
    }
}
