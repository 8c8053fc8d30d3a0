// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for realtime sessions.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The embedding application is responsible for choosing the exporter (Prometheus, OTEL, etc.)
//!
//! # Metric Naming Convention
//! - `realtime_sync_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `action`: wire action code (`q`, `p`, `auth`, ...)
//! - `reason`: disconnect reason (`server_reset`, `other`)
//! - `status`: server status string

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

/// Record a connection attempt (token fetched, socket opening)
pub fn record_connection_attempt() {
    counter!("realtime_sync_connection_attempts_total").increment(1);
}

/// Record a completed handshake
pub fn record_connection_established() {
    counter!("realtime_sync_connections_established_total").increment(1);
}

/// Record a lost or closed connection
pub fn record_disconnect(reason: &str) {
    counter!(
        "realtime_sync_disconnects_total",
        "reason" => reason.to_string()
    )
    .increment(1);
}

/// Record a rejected credential
pub fn record_auth_failure(status: &str) {
    counter!(
        "realtime_sync_auth_failures_total",
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record a request sent to the server
pub fn record_request(action: &str) {
    counter!(
        "realtime_sync_requests_total",
        "action" => action.to_string()
    )
    .increment(1);
}

/// Record a server-initiated push
pub fn record_server_push(action: &str) {
    counter!(
        "realtime_sync_server_pushes_total",
        "action" => action.to_string()
    )
    .increment(1);
}

/// Record frames written for one outgoing message
pub fn record_frames_sent(count: usize) {
    counter!("realtime_sync_frames_sent_total").increment(count as u64);
}

/// Record one incoming frame
pub fn record_frame_received() {
    counter!("realtime_sync_frames_received_total").increment(1);
}

/// Record a keepalive frame
pub fn record_keepalive() {
    counter!("realtime_sync_keepalives_total").increment(1);
}

/// Record a scheduled reconnect delay
pub fn record_reconnect_delay(delay: Duration) {
    histogram!("realtime_sync_reconnect_delay_seconds").record(delay.as_secs_f64());
}

/// Set the number of writes awaiting acknowledgement
pub fn set_outstanding_writes(count: usize) {
    gauge!("realtime_sync_outstanding_writes").set(count as f64);
}

/// Set the number of registered listens
pub fn set_active_listens(count: usize) {
    gauge!("realtime_sync_active_listens").set(count as f64);
}

/// Record a session state transition
pub fn set_session_state(state: &str) {
    counter!(
        "realtime_sync_state_transitions_total",
        "state" => state.to_string()
    )
    .increment(1);
}

/// Record how long an auth token fetch took
pub fn record_token_fetch(duration: Duration, success: bool) {
    histogram!(
        "realtime_sync_token_fetch_seconds",
        "status" => if success { "success" } else { "error" }
    )
    .record(duration.as_secs_f64());
}

/// A timing guard that records token fetch latency on drop
pub struct TokenFetchTimer {
    start: Instant,
    success: bool,
}

impl TokenFetchTimer {
    /// Start a new timer, assumed failed until [`TokenFetchTimer::succeeded`] is called
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            success: false,
        }
    }

    pub fn succeeded(&mut self) {
        self.success = true;
    }
}

impl Default for TokenFetchTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TokenFetchTimer {
    fn drop(&mut self) {
        record_token_fetch(self.start.elapsed(), self.success);
    }
}
