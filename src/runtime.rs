// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Tokio driver for [`PersistentConnection`].
//!
//! The session runs on one task that owns it outright. Callers talk to it
//! through a cloneable [`SessionHandle`]; timers, token fetches and socket
//! events are funnelled back into the same task as [`SessionEvent`]s, so
//! session state is never shared or locked.
//!
//! ```text
//!  SessionHandle ──commands──┐
//!                            ▼
//!  timers ──────────────► session task ──► SessionDelegate
//!  token fetches ────────►     │
//!  transport events ─────►     └──► Transport (WebSocket)
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::AbortHandle;
use tracing::{debug, info};

use crate::config::SessionConfig;
use crate::error::{SessionError, TokenError};
use crate::metrics::TokenFetchTimer;
use crate::model::Path;
use crate::session::{
    ListenCallback, ListenHashProvider, ListenQuerySpec, PersistentConnection, RequestCallback,
    SessionDelegate, SessionEvent, SessionHost, SessionState, Timer, TimerId, TimerKind,
};
use crate::transport::{
    Transport, TransportEvent, TransportFactory, TransportListener, WebSocketTransportFactory,
};

/// Supplies credentials for each connection attempt.
#[async_trait]
pub trait AuthTokenProvider: Send + Sync {
    /// `Ok(None)` connects without credentials. `force_refresh` is set after
    /// the server rejected or revoked the previous token.
    async fn get_token(&self, force_refresh: bool) -> Result<Option<String>, TokenError>;
}

/// Always hands out the same token.
#[derive(Debug, Clone, Default)]
pub struct StaticTokenProvider {
    token: Option<String>,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
        }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AuthTokenProvider for StaticTokenProvider {
    async fn get_token(&self, _force_refresh: bool) -> Result<Option<String>, TokenError> {
        Ok(self.token.clone())
    }
}

type Command = Box<dyn FnOnce(&mut PersistentConnection) + Send>;

/// Cloneable handle to a running session task.
///
/// Every method waits for the session task to apply the operation.
/// Completion of the server round trip is reported through the callbacks.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<SessionState>,
}

impl SessionHandle {
    async fn call<T, F>(&self, op: F) -> Result<T, SessionError>
    where
        T: Send + 'static,
        F: FnOnce(&mut PersistentConnection) -> T + Send + 'static,
    {
        let (reply, response) = oneshot::channel();
        let command: Command = Box::new(move |session| {
            let _ = reply.send(op(session));
        });
        self.commands
            .send(command)
            .map_err(|_| SessionError::ChannelClosed)?;
        response.await.map_err(|_| SessionError::ChannelClosed)
    }

    /// Last state published by the session task.
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Watch state changes, e.g. to wait for `Connected`.
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    pub async fn initialize(&self) -> Result<(), SessionError> {
        self.call(|session| session.initialize()).await?
    }

    pub async fn listen(
        &self,
        query: ListenQuerySpec,
        hash_provider: Box<dyn ListenHashProvider>,
        tag: Option<u64>,
        callback: ListenCallback,
    ) -> Result<(), SessionError> {
        self.call(move |session| session.listen(query, hash_provider, tag, callback))
            .await?
    }

    pub async fn unlisten(&self, query: ListenQuerySpec) -> Result<(), SessionError> {
        self.call(move |session| session.unlisten(&query)).await?
    }

    pub async fn put(
        &self,
        path: Path,
        data: Value,
        callback: Option<RequestCallback>,
    ) -> Result<(), SessionError> {
        self.call(move |session| session.put(path, data, callback)).await?
    }

    pub async fn compare_and_put(
        &self,
        path: Path,
        data: Value,
        hash: String,
        callback: Option<RequestCallback>,
    ) -> Result<(), SessionError> {
        self.call(move |session| session.compare_and_put(path, data, hash, callback))
            .await?
    }

    pub async fn merge(
        &self,
        path: Path,
        data: Map<String, Value>,
        callback: Option<RequestCallback>,
    ) -> Result<(), SessionError> {
        self.call(move |session| session.merge(path, data, callback)).await?
    }

    pub async fn on_disconnect_put(
        &self,
        path: Path,
        data: Value,
        callback: Option<RequestCallback>,
    ) -> Result<(), SessionError> {
        self.call(move |session| session.on_disconnect_put(path, data, callback))
            .await?
    }

    pub async fn on_disconnect_merge(
        &self,
        path: Path,
        updates: Map<String, Value>,
        callback: Option<RequestCallback>,
    ) -> Result<(), SessionError> {
        self.call(move |session| session.on_disconnect_merge(path, updates, callback))
            .await?
    }

    pub async fn on_disconnect_cancel(
        &self,
        path: Path,
        callback: Option<RequestCallback>,
    ) -> Result<(), SessionError> {
        self.call(move |session| session.on_disconnect_cancel(path, callback))
            .await?
    }

    pub async fn purge_outstanding_writes(&self) -> Result<(), SessionError> {
        self.call(|session| session.purge_outstanding_writes()).await?
    }

    pub async fn interrupt(&self, reason: impl Into<String>) -> Result<(), SessionError> {
        let reason = reason.into();
        self.call(move |session| session.interrupt(&reason)).await?
    }

    pub async fn resume(&self, reason: impl Into<String>) -> Result<(), SessionError> {
        let reason = reason.into();
        self.call(move |session| session.resume(&reason)).await?
    }

    pub async fn is_interrupted(&self, reason: impl Into<String>) -> Result<bool, SessionError> {
        let reason = reason.into();
        self.call(move |session| session.is_interrupted(&reason)).await
    }

    pub async fn refresh_auth_token(&self) -> Result<(), SessionError> {
        self.call(|session| session.refresh_auth_token()).await?
    }

    pub async fn refresh_auth_token_with(&self, token: Option<String>) -> Result<(), SessionError> {
        self.call(move |session| session.refresh_auth_token_with(token))
            .await?
    }

    /// Shut the session down and stop its task. Idempotent.
    pub async fn shutdown(&self) -> Result<(), SessionError> {
        match self.call(|session| session.shutdown()).await {
            Ok(()) | Err(SessionError::ChannelClosed) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// Spawn a session that connects over WebSockets.
///
/// Must be called inside a tokio runtime. Call
/// [`SessionHandle::initialize`] to start connecting.
pub fn spawn_session(
    config: SessionConfig,
    tokens: Arc<dyn AuthTokenProvider>,
    delegate: Box<dyn SessionDelegate>,
) -> SessionHandle {
    let transports = Arc::new(WebSocketTransportFactory::new(config.transport_config()));
    spawn_session_with(config, tokens, delegate, transports)
}

/// Spawn a session on a custom transport.
pub fn spawn_session_with(
    config: SessionConfig,
    tokens: Arc<dyn AuthTokenProvider>,
    delegate: Box<dyn SessionDelegate>,
    transports: Arc<dyn TransportFactory>,
) -> SessionHandle {
    let (event_tx, events) = mpsc::unbounded_channel();
    let (commands, command_rx) = mpsc::unbounded_channel();
    let (state_tx, state) = watch::channel(SessionState::Disconnected);
    let host = TokioHost {
        events: event_tx,
        tokens,
        transports,
        timers: HashMap::new(),
        next_timer: 0,
    };
    info!(host = %config.host, namespace = %config.namespace, "Spawning realtime session");
    let session = PersistentConnection::new(config, Box::new(host), delegate);
    tokio::spawn(run(session, command_rx, events, state_tx));
    SessionHandle { commands, state }
}

async fn run(
    mut session: PersistentConnection,
    mut commands: mpsc::UnboundedReceiver<Command>,
    mut events: mpsc::UnboundedReceiver<SessionEvent>,
    state: watch::Sender<SessionState>,
) {
    loop {
        tokio::select! {
            // Events queued before a command are applied first.
            biased;
            Some(event) = events.recv() => session.handle_event(event),
            command = commands.recv() => match command {
                Some(command) => command(&mut session),
                // Every handle is gone.
                None => session.shutdown(),
            },
        }
        state.send_replace(session.state());
        if session.is_shut_down() {
            break;
        }
    }
    debug!("Session task stopped");
}

/// [`SessionHost`] backed by tokio tasks.
struct TokioHost {
    events: mpsc::UnboundedSender<SessionEvent>,
    tokens: Arc<dyn AuthTokenProvider>,
    transports: Arc<dyn TransportFactory>,
    timers: HashMap<TimerId, AbortHandle>,
    next_timer: TimerId,
}

impl SessionHost for TokioHost {
    fn now_millis(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as i64)
            .unwrap_or_default()
    }

    fn schedule(&mut self, delay: Duration, kind: TimerKind) -> TimerId {
        self.timers.retain(|_, handle| !handle.is_finished());
        self.next_timer += 1;
        let id = self.next_timer;
        let events = self.events.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(SessionEvent::Timer(Timer { id, kind }));
        });
        self.timers.insert(id, handle.abort_handle());
        id
    }

    fn cancel(&mut self, id: TimerId) {
        if let Some(handle) = self.timers.remove(&id) {
            handle.abort();
        }
    }

    fn request_token(&mut self, attempt: u64, force_refresh: bool) {
        let tokens = self.tokens.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            let mut timer = TokenFetchTimer::new();
            let result = tokens.get_token(force_refresh).await;
            if result.is_ok() {
                timer.succeeded();
            }
            drop(timer);
            let _ = events.send(SessionEvent::Token { attempt, result });
        });
    }

    fn open_transport(&mut self, connection_id: u64, url: &str) -> Box<dyn Transport> {
        let listener = Arc::new(EventForwarder {
            connection_id,
            events: self.events.clone(),
        });
        self.transports.open(url, listener)
    }
}

impl Drop for TokioHost {
    fn drop(&mut self) {
        for handle in self.timers.values() {
            handle.abort();
        }
    }
}

/// Tags transport events with their connection and queues them for the session.
struct EventForwarder {
    connection_id: u64,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl TransportListener for EventForwarder {
    fn on_event(&self, event: TransportEvent) {
        let _ = self.events.send(SessionEvent::Transport {
            connection_id: self.connection_id,
            event,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RequestError;
    use crate::session::RangeMerge;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    type Opened = (String, Arc<dyn TransportListener>);

    struct FakeFactory {
        opened: mpsc::UnboundedSender<Opened>,
        sent: mpsc::UnboundedSender<Value>,
    }

    struct FakeTransport(mpsc::UnboundedSender<Value>);

    impl Transport for FakeTransport {
        fn send(&mut self, message: Value) {
            let _ = self.0.send(message);
        }
        fn close(&mut self) {}
    }

    impl TransportFactory for FakeFactory {
        fn open(&self, url: &str, listener: Arc<dyn TransportListener>) -> Box<dyn Transport> {
            let _ = self.opened.send((url.to_owned(), listener));
            Box::new(FakeTransport(self.sent.clone()))
        }
    }

    #[derive(Default)]
    struct Updates(Arc<Mutex<Vec<(String, Value)>>>);

    impl SessionDelegate for Updates {
        fn on_data_update(&mut self, path: &Path, data: Value, _merge: bool, _tag: Option<u64>) {
            self.0.lock().unwrap().push((path.to_string(), data));
        }
        fn on_range_merge_update(&mut self, _: &Path, _: Vec<RangeMerge>, _: Option<u64>) {}
        fn on_connect(&mut self) {}
        fn on_disconnect(&mut self) {}
        fn on_auth_status(&mut self, _ok: bool) {}
        fn on_server_info_update(&mut self, _: Map<String, Value>) {}
    }

    /// Fails the first `failures` fetches.
    struct FlakyTokens {
        failures: AtomicU32,
    }

    #[async_trait]
    impl AuthTokenProvider for FlakyTokens {
        async fn get_token(&self, _force_refresh: bool) -> Result<Option<String>, TokenError> {
            let left = self.failures.load(Ordering::SeqCst);
            if left > 0 {
                self.failures.store(left - 1, Ordering::SeqCst);
                return Err(TokenError("not yet".into()));
            }
            Ok(None)
        }
    }

    struct Harness {
        handle: SessionHandle,
        opened: mpsc::UnboundedReceiver<Opened>,
        sent: mpsc::UnboundedReceiver<Value>,
        updates: Arc<Mutex<Vec<(String, Value)>>>,
    }

    fn start(tokens: Arc<dyn AuthTokenProvider>) -> Harness {
        let (opened_tx, opened) = mpsc::unbounded_channel();
        let (sent_tx, sent) = mpsc::unbounded_channel();
        let updates = Updates::default();
        let shared = updates.0.clone();
        let mut config = SessionConfig::new("db.example.com", "ns");
        config.retry_jitter_factor = 0.0;
        let handle = spawn_session_with(
            config,
            tokens,
            Box::new(updates),
            Arc::new(FakeFactory { opened: opened_tx, sent: sent_tx }),
        );
        Harness { handle, opened, sent, updates: shared }
    }

    async fn handshake(listener: &Arc<dyn TransportListener>, handle: &SessionHandle) {
        listener.on_event(TransportEvent::Opened);
        listener.on_event(TransportEvent::Message(
            json!({"t": "c", "d": {"t": "h", "d": {"ts": 1, "h": "db.example.com", "s": "s1"}}}),
        ));
        let mut state = handle.watch_state();
        state
            .wait_for(|state| *state == SessionState::Connected)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_round_trip_through_session_task() {
        let mut harness = start(Arc::new(StaticTokenProvider::anonymous()));
        harness.handle.initialize().await.unwrap();
        let (url, listener) = harness.opened.recv().await.unwrap();
        assert_eq!(url, "wss://db.example.com/.ws?ns=ns&v=5");
        handshake(&listener, &harness.handle).await;

        // First connection reports stats.
        let stats = harness.sent.recv().await.unwrap();
        assert_eq!(stats["d"]["a"], "s");

        let (done_tx, done_rx) = oneshot::channel::<Result<(), RequestError>>();
        harness
            .handle
            .put(
                Path::new("a/b"),
                json!(1),
                Some(Box::new(move |result| {
                    let _ = done_tx.send(result);
                })),
            )
            .await
            .unwrap();
        let put = harness.sent.recv().await.unwrap();
        assert_eq!(put["d"]["b"], json!({"p": "a/b", "d": 1}));

        let number = put["d"]["r"].clone();
        listener.on_event(TransportEvent::Message(json!({"t": "d", "d": {"r": number, "b": {"s": "ok", "d": ""}}})));
        assert_eq!(done_rx.await.unwrap(), Ok(()));

        listener.on_event(TransportEvent::Message(json!({"t": "d", "d": {"a": "d", "b": {"p": "x", "d": "hi"}}})));
        harness.handle.is_interrupted("sync").await.unwrap();
        assert_eq!(*harness.updates.lock().unwrap(), vec![("/x".to_string(), json!("hi"))]);

        harness.handle.shutdown().await.unwrap();
        assert_eq!(
            harness.handle.put(Path::new("a"), json!(1), None).await,
            Err(SessionError::ChannelClosed)
        );
        harness.handle.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_token_failures_retry_with_backoff() {
        let mut harness = start(Arc::new(FlakyTokens { failures: AtomicU32::new(2) }));
        let started = tokio::time::Instant::now();
        harness.handle.initialize().await.unwrap();
        let (_, listener) = harness.opened.recv().await.unwrap();
        // 0s, then 1s, then 1.3s.
        assert!(started.elapsed() >= Duration::from_millis(2300));
        handshake(&listener, &harness.handle).await;
        assert_eq!(harness.handle.state(), SessionState::Connected);
    }

    #[tokio::test]
    async fn test_dropped_handles_stop_the_task() {
        let harness = start(Arc::new(StaticTokenProvider::new("t")));
        let mut state = harness.handle.watch_state();
        drop(harness.handle);
        // The state sender closes once the task exits.
        let stopped = tokio::time::timeout(Duration::from_secs(5), async {
            while state.changed().await.is_ok() {}
        })
        .await;
        assert!(stopped.is_ok());
    }
}
