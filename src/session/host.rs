// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Seams between the session state machine and the outside world.
//!
//! The session never sleeps, spawns or awaits. It asks a [`SessionHost`] to
//! schedule timers, fetch tokens and open transports, and the results come
//! back later as [`SessionEvent`]s. Upward notifications go to a
//! [`SessionDelegate`].

use std::time::Duration;

use serde_json::{Map, Value};

use super::types::RangeMerge;
use crate::error::TokenError;
use crate::model::Path;
use crate::transport::{Transport, TransportEvent};

pub type TimerId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Backoff before the next connection attempt.
    Reconnect,
    /// Idle check after a period with nothing to do.
    IdleCheck,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timer {
    pub id: TimerId,
    pub kind: TimerKind,
}

/// Everything that can wake the session up, besides direct calls.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Timer(Timer),
    /// Result of [`SessionHost::request_token`] for the given attempt.
    Token {
        attempt: u64,
        result: Result<Option<String>, TokenError>,
    },
    Transport {
        connection_id: u64,
        event: TransportEvent,
    },
}

/// Side effects the session delegates to its runtime.
pub trait SessionHost: Send {
    /// Wall clock in milliseconds since the Unix epoch.
    fn now_millis(&self) -> i64;

    /// Deliver `SessionEvent::Timer` after `delay`. Ids are never reused.
    fn schedule(&mut self, delay: Duration, kind: TimerKind) -> TimerId;

    /// Cancel a pending timer. Unknown or fired ids are ignored.
    fn cancel(&mut self, id: TimerId);

    /// Fetch an auth token and deliver `SessionEvent::Token` for `attempt`.
    fn request_token(&mut self, attempt: u64, force_refresh: bool);

    /// Open a transport whose events arrive tagged with `connection_id`.
    fn open_transport(&mut self, connection_id: u64, url: &str) -> Box<dyn Transport>;
}

/// Upward notifications from the session.
pub trait SessionDelegate: Send {
    fn on_data_update(&mut self, path: &Path, data: Value, is_merge: bool, tag: Option<u64>);

    fn on_range_merge_update(&mut self, path: &Path, merges: Vec<RangeMerge>, tag: Option<u64>);

    fn on_connect(&mut self);

    fn on_disconnect(&mut self);

    /// `false` whenever the session runs without valid credentials.
    fn on_auth_status(&mut self, ok: bool);

    /// Updates under `.info`, e.g. `serverTimeOffset`.
    fn on_server_info_update(&mut self, updates: Map<String, Value>);
}
