// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Connection lifecycle: reconnects, auth, state replay, idleness.

use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use super::types::PendingResponse;
use super::{PersistentConnection, SessionState, Timer, TimerKind, IDLE_INTERRUPT_REASON};
use crate::connection::{Connection, ConnectionSignal, DisconnectReason};
use crate::error::{RequestError, TokenError};
use crate::metrics;
use crate::protocol::{
    self, Action, GAuthToken, ServerResponse, INVALID_TOKEN, PERMISSION_DENIED, REQUEST_AUTHVAR,
    REQUEST_CREDENTIAL,
};

const SERVER_TIME_OFFSET: &str = "serverTimeOffset";

impl PersistentConnection {
    pub(super) fn should_reconnect(&self) -> bool {
        self.interrupt_reasons.is_empty()
    }

    /// Schedule the next connection attempt through the backoff helper.
    pub(super) fn try_schedule_reconnect(&mut self) {
        if !self.should_reconnect() {
            return;
        }
        debug_assert_eq!(
            self.state,
            SessionState::Disconnected,
            "not in disconnected state when scheduling a reconnect"
        );
        self.pending_force_refresh = std::mem::take(&mut self.force_auth_token_refresh);
        let delay = self.retry.next_delay();
        if let Some(previous) = self.retry.take_scheduled() {
            self.host.cancel(previous);
        }
        debug!(delay_ms = delay.as_millis() as u64, "Scheduling connection attempt");
        metrics::record_reconnect_delay(delay);
        let id = self.host.schedule(delay, TimerKind::Reconnect);
        self.retry.set_scheduled(id);
    }

    pub(super) fn cancel_retry(&mut self) {
        if let Some(id) = self.retry.cancel() {
            self.host.cancel(id);
        }
    }

    pub(super) fn on_timer(&mut self, timer: Timer) {
        match timer.kind {
            TimerKind::Reconnect => {
                if self.retry.scheduled() != Some(timer.id) {
                    debug!(timer_id = timer.id, "Ignoring stale reconnect timer");
                    return;
                }
                self.retry.take_scheduled();
                self.on_reconnect_timer();
            }
            TimerKind::IdleCheck => {
                if self.idle_timer != Some(timer.id) {
                    debug!(timer_id = timer.id, "Ignoring stale idle timer");
                    return;
                }
                self.idle_timer = None;
                self.on_idle_timer();
            }
        }
    }

    fn on_reconnect_timer(&mut self) {
        if !self.should_reconnect() || self.state != SessionState::Disconnected {
            debug!(state = %self.state, "Skipping reconnect");
            return;
        }
        self.set_state(SessionState::GettingToken);
        self.current_token_attempt += 1;
        let attempt = self.current_token_attempt;
        debug!(attempt, "Trying to fetch auth token");
        metrics::record_connection_attempt();
        self.host.request_token(attempt, self.pending_force_refresh);
    }

    pub(super) fn on_token_result(&mut self, attempt: u64, result: Result<Option<String>, TokenError>) {
        if attempt != self.current_token_attempt {
            debug!(attempt, "Ignoring token result, because this was not the latest attempt");
            return;
        }
        match result {
            Ok(token) => {
                if self.state == SessionState::GettingToken {
                    debug!("Successfully fetched token, opening connection");
                    self.open_network_connection(token);
                } else {
                    debug!(state = %self.state, "Not opening connection after token refresh, because connection was set to disconnected");
                }
            }
            Err(e) => {
                self.set_state(SessionState::Disconnected);
                warn!(error = %e, "Error fetching token");
                self.try_schedule_reconnect();
            }
        }
    }

    fn open_network_connection(&mut self, token: Option<String>) {
        if token.is_none() {
            self.delegate.on_auth_status(false);
        }
        self.auth_token = token;
        self.set_state(SessionState::Connecting);
        self.next_connection_id += 1;
        let id = self.next_connection_id;
        let url = self
            .host_info
            .connection_url(self.cached_host.as_deref(), self.last_session_id.as_deref());
        let transport = self.host.open_transport(id, &url);
        self.connection = Some(Connection::open(id, transport));
    }

    pub(super) fn on_connection_signal(&mut self, signal: ConnectionSignal) {
        match signal {
            ConnectionSignal::Ready { timestamp, session_id } => self.on_ready(timestamp, session_id),
            ConnectionSignal::Data(message) => self.on_data_message(message),
            ConnectionSignal::CacheHost(host) => {
                debug!(host = %host, "Caching host");
                self.cached_host = Some(host);
            }
            ConnectionSignal::Kill(reason) => {
                warn!(reason = %reason, "Realtime connection was forcefully killed by the server");
            }
            ConnectionSignal::Disconnected(reason) => {
                self.connection = None;
                self.on_disconnect(reason);
            }
        }
    }

    /// Close the live connection, if any, and run disconnect handling.
    pub(super) fn close_connection(&mut self, reason: DisconnectReason) {
        if let Some(mut connection) = self.connection.take() {
            if let Some(ConnectionSignal::Disconnected(reason)) = connection.close(reason) {
                self.on_disconnect(reason);
            }
        }
    }

    fn on_ready(&mut self, timestamp: i64, session_id: String) {
        info!("Realtime connection ready");
        metrics::record_connection_established();
        let now = self.host.now_millis();
        self.last_connection_established_at = Some(now);
        let mut updates = Map::new();
        updates.insert(SERVER_TIME_OFFSET.to_owned(), Value::from(timestamp - now));
        self.delegate.on_server_info_update(updates);

        if self.first_connection {
            self.send_connect_stats();
        }
        self.restore_auth();
        self.first_connection = false;
        self.last_session_id = Some(session_id);
        self.delegate.on_connect();
    }

    fn send_connect_stats(&mut self) {
        let mut counters = Map::new();
        counters.insert(protocol::sdk_stats_key(&self.config.sdk_version), Value::from(1));
        debug!("Sending first connection stats");
        self.send_action(Action::Stats, json!({ protocol::REQUEST_COUNTERS: counters }), PendingResponse::Stats);
    }

    fn restore_auth(&mut self) {
        if self.auth_token.is_none() {
            debug!("Not restoring auth because auth token is null");
            self.set_state(SessionState::Connected);
            self.restore_state();
        } else {
            debug!("Restoring auth");
            self.set_state(SessionState::Authenticating);
            self.send_auth(true);
        }
    }

    /// Send the current token. Plain tokens use `auth`, `gauth|` tokens use `gauth`.
    pub(super) fn send_auth(&mut self, restore_state: bool) {
        let Some(token) = self.auth_token.clone() else {
            return;
        };
        let (action, body) = match GAuthToken::parse(&token) {
            Some(gauth) => {
                let mut body = Map::new();
                body.insert(REQUEST_CREDENTIAL.into(), Value::String(gauth.token));
                if let Some(auth) = gauth.auth {
                    body.insert(REQUEST_AUTHVAR.into(), Value::Object(auth));
                }
                (Action::GAuth, Value::Object(body))
            }
            None => (Action::Auth, json!({ REQUEST_CREDENTIAL: token })),
        };
        self.send_sensitive(action, body, true, PendingResponse::Auth { restore_state });
    }

    pub(super) fn send_unauth(&mut self) {
        self.send_action(Action::Unauth, json!({}), PendingResponse::Unauth);
    }

    pub(super) fn on_auth_response(&mut self, restore_state: bool, response: ServerResponse) {
        if response.is_ok() {
            debug!("Authentication succeeded");
            self.set_state(SessionState::Connected);
            self.invalid_auth_token_count = 0;
            self.delegate.on_auth_status(true);
            if restore_state {
                self.restore_state();
            }
            return;
        }

        debug!(status = %response.status, reason = ?response.message(), "Authentication failed");
        metrics::record_auth_failure(&response.status);
        self.auth_token = None;
        self.force_auth_token_refresh = true;
        self.delegate.on_auth_status(false);
        if response.status == INVALID_TOKEN || response.status == PERMISSION_DENIED {
            self.invalid_auth_token_count += 1;
            if self.invalid_auth_token_count >= self.config.invalid_auth_threshold {
                self.retry.set_max_delay();
                warn!("Provided authentication credentials are invalid. This usually indicates your app was not initialized correctly. Check the database host and credentials you configured.");
            }
        }
        self.close_connection(DisconnectReason::Other);
    }

    /// Replay listens, writes and queued on-disconnects on a fresh connection.
    pub(super) fn restore_state(&mut self) {
        debug_assert_eq!(self.state, SessionState::Connected, "should be connected to restore state");

        debug!(count = self.listens.len(), "Restoring outstanding listens");
        let queries: Vec<_> = self.listens.keys().cloned().collect();
        for query in queries {
            self.send_listen(&query);
        }

        debug!(count = self.outstanding_puts.len(), "Restoring writes");
        let write_ids: Vec<u64> = self.outstanding_puts.keys().copied().collect();
        for write_id in write_ids {
            self.send_put(write_id);
        }

        for queued in std::mem::take(&mut self.on_disconnect_queue) {
            self.send_on_disconnect(queued.action, queued.path, queued.data, queued.callback);
        }

        self.do_idle_check();
    }

    fn on_disconnect(&mut self, reason: DisconnectReason) {
        debug!(?reason, "Got on disconnect");
        metrics::record_disconnect(match reason {
            DisconnectReason::ServerReset => "server_reset",
            DisconnectReason::Other => "other",
        });
        self.set_state(SessionState::Disconnected);
        self.connection = None;
        self.has_on_disconnects = false;
        self.request_callbacks.clear();
        self.cancel_idle_timer();
        self.cancel_sent_transactions();

        if self.should_reconnect() {
            let now = self.host.now_millis();
            let lasted_long_enough = self.last_connection_established_at.is_some_and(|at| {
                now.saturating_sub(at) >= self.config.successful_connection().as_millis() as i64
            });
            if reason == DisconnectReason::ServerReset || lasted_long_enough {
                self.retry.signal_success();
            }
            self.try_schedule_reconnect();
        }
        self.last_connection_established_at = None;
        self.delegate.on_disconnect();
    }

    /// Fail compare-and-set writes that may or may not have been applied.
    fn cancel_sent_transactions(&mut self) {
        let cancelled: Vec<u64> = self
            .outstanding_puts
            .iter()
            .filter(|(_, put)| put.sent && put.request.contains_key(protocol::REQUEST_DATA_HASH))
            .map(|(id, _)| *id)
            .collect();
        for write_id in cancelled {
            if let Some(put) = self.outstanding_puts.remove(&write_id) {
                debug!(write_id, "Cancelling sent transaction");
                if let Some(callback) = put.callback {
                    callback(Err(RequestError::new("disconnected", None)));
                }
            }
        }
        metrics::set_outstanding_writes(self.outstanding_puts.len());
    }

    pub(super) fn interrupt_internal(&mut self, reason: &str) {
        debug!(reason, "Connection interrupted");
        self.interrupt_reasons.insert(reason.to_owned());
        // Any token fetch in flight is now stale.
        self.current_token_attempt += 1;
        if self.connection.is_some() {
            self.close_connection(DisconnectReason::Other);
        } else {
            self.cancel_retry();
            self.set_state(SessionState::Disconnected);
        }
        self.retry.signal_success();
    }

    pub(super) fn resume_internal(&mut self, reason: &str) {
        debug!(reason, "Connection no longer interrupted");
        self.interrupt_reasons.remove(reason);
        if self.should_reconnect() && self.state == SessionState::Disconnected {
            self.try_schedule_reconnect();
        }
    }

    /// Re-arm the idle timer when idle, or lift the idle interrupt when not.
    pub(super) fn do_idle_check(&mut self) {
        if self.shut_down {
            return;
        }
        if self.is_idle() {
            self.cancel_idle_timer();
            let id = self.host.schedule(self.config.idle_timeout(), TimerKind::IdleCheck);
            self.idle_timer = Some(id);
        } else if self.is_interrupted(IDLE_INTERRUPT_REASON) {
            debug_assert!(!self.is_idle());
            self.resume_internal(IDLE_INTERRUPT_REASON);
        }
    }

    fn on_idle_timer(&mut self) {
        if self.is_idle() {
            debug!("Connection idle, interrupting");
            self.interrupt_internal(IDLE_INTERRUPT_REASON);
        } else {
            self.do_idle_check();
        }
    }

    pub(super) fn cancel_idle_timer(&mut self) {
        if let Some(id) = self.idle_timer.take() {
            self.host.cancel(id);
        }
    }
}
