// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Wire vocabulary of the realtime protocol.
//!
//! Every message is a JSON object. The outer envelope distinguishes control
//! messages from data messages:
//!
//! ```text
//! {"t":"c","d":{"t":"h","d":{"ts":..,"h":"host","s":"session"}}}   handshake
//! {"t":"c","d":{"t":"r","d":"other-host"}}                         reset
//! {"t":"c","d":{"t":"s","d":"reason"}}                             shutdown
//! {"t":"d","d":{"r":7,"a":"p","b":{"p":"a/b","d":1}}}              request
//! {"t":"d","d":{"r":7,"b":{"s":"ok","d":""}}}                      response
//! {"t":"d","d":{"a":"d","b":{"p":"a/b","d":2}}}                    server push
//! ```

use serde_json::{json, Map, Value};

use crate::error::RequestError;

// Envelope
pub const MESSAGE_TYPE: &str = "t";
pub const MESSAGE_DATA: &str = "d";
pub const MESSAGE_TYPE_DATA: &str = "d";
pub const MESSAGE_TYPE_CONTROL: &str = "c";

// Control messages
pub const CONTROL_HELLO: &str = "h";
pub const CONTROL_RESET: &str = "r";
pub const CONTROL_SHUTDOWN: &str = "s";
pub const HELLO_TIMESTAMP: &str = "ts";
pub const HELLO_HOST: &str = "h";
pub const HELLO_SESSION_ID: &str = "s";

// Requests
pub const REQUEST_NUMBER: &str = "r";
pub const REQUEST_ACTION: &str = "a";
pub const REQUEST_PAYLOAD: &str = "b";
pub const REQUEST_PATH: &str = "p";
pub const REQUEST_DATA: &str = "d";
pub const REQUEST_DATA_HASH: &str = "h";
pub const REQUEST_QUERIES: &str = "q";
pub const REQUEST_TAG: &str = "t";
pub const REQUEST_COMPOUND_HASH: &str = "ch";
pub const REQUEST_COMPOUND_HASH_PATHS: &str = "ps";
pub const REQUEST_COMPOUND_HASH_HASHES: &str = "hs";
pub const REQUEST_CREDENTIAL: &str = "cred";
pub const REQUEST_AUTHVAR: &str = "authvar";
pub const REQUEST_COUNTERS: &str = "c";

// Responses
pub const RESPONSE_STATUS: &str = "s";
pub const RESPONSE_DATA: &str = "d";
pub const RESPONSE_WARNINGS: &str = "w";
pub const STATUS_OK: &str = "ok";

// Server pushes
pub const PUSH_DATA_UPDATE: &str = "d";
pub const PUSH_MERGE: &str = "m";
pub const PUSH_RANGE_MERGE: &str = "rm";
pub const PUSH_LISTEN_REVOKED: &str = "c";
pub const PUSH_AUTH_REVOKED: &str = "ac";
pub const PUSH_SECURITY_DEBUG: &str = "sd";
pub const PUSH_PATH: &str = "p";
pub const PUSH_DATA: &str = "d";
pub const PUSH_TAG: &str = "t";
pub const PUSH_RANGE_START: &str = "s";
pub const PUSH_RANGE_END: &str = "e";
pub const PUSH_RANGE_DATA: &str = "m";
pub const PUSH_AUTH_STATUS: &str = "s";
pub const PUSH_AUTH_REASON: &str = "d";
pub const PUSH_DEBUG_MESSAGE: &str = "msg";

/// Server error statuses that count toward the invalid-credential threshold.
pub const INVALID_TOKEN: &str = "invalid_token";
pub const PERMISSION_DENIED: &str = "permission_denied";

/// Listen response warning asking for an index in security rules.
pub const WARNING_NO_INDEX: &str = "no_index";

/// Protocol version sent in the connection URL.
pub const PROTOCOL_VERSION: &str = "5";

const GAUTH_PREFIX: &str = "gauth|";

/// Client request kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Listen,
    Unlisten,
    Put,
    Merge,
    OnDisconnectPut,
    OnDisconnectMerge,
    OnDisconnectCancel,
    Auth,
    GAuth,
    Unauth,
    Stats,
}

impl Action {
    pub fn code(self) -> &'static str {
        match self {
            Action::Listen => "q",
            Action::Unlisten => "n",
            Action::Put => "p",
            Action::Merge => "m",
            Action::OnDisconnectPut => "o",
            Action::OnDisconnectMerge => "om",
            Action::OnDisconnectCancel => "oc",
            Action::Auth => "auth",
            Action::GAuth => "gauth",
            Action::Unauth => "unauth",
            Action::Stats => "s",
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// `{"r": number, "a": action, "b": body}`
pub fn request_envelope(number: u64, action: Action, body: Value) -> Value {
    json!({
        REQUEST_NUMBER: number,
        REQUEST_ACTION: action.code(),
        REQUEST_PAYLOAD: body,
    })
}

/// Status and data of a response body.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerResponse {
    pub status: String,
    pub data: Option<Value>,
}

impl ServerResponse {
    pub fn from_body(body: Option<&Value>) -> Self {
        let body = body.and_then(Value::as_object);
        Self {
            status: body
                .and_then(|b| b.get(RESPONSE_STATUS))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned(),
            data: body.and_then(|b| b.get(RESPONSE_DATA)).cloned(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == STATUS_OK
    }

    /// Human-readable detail the server attached to a failure.
    pub fn message(&self) -> Option<String> {
        match &self.data {
            Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
            _ => None,
        }
    }

    pub fn into_result(self) -> Result<(), RequestError> {
        if self.is_ok() {
            Ok(())
        } else {
            let message = self.message();
            Err(RequestError::new(self.status, message))
        }
    }

    /// Warnings listed under `d.w`.
    pub fn warnings(&self) -> Vec<&str> {
        self.data
            .as_ref()
            .and_then(|d| d.get(RESPONSE_WARNINGS))
            .and_then(Value::as_array)
            .map(|w| w.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }
}

/// A `gauth|{"token": .., "auth": ..}` credential split into its parts.
#[derive(Debug, Clone, PartialEq)]
pub struct GAuthToken {
    pub token: String,
    pub auth: Option<Map<String, Value>>,
}

impl GAuthToken {
    pub fn parse(credential: &str) -> Option<Self> {
        let payload = credential.strip_prefix(GAUTH_PREFIX)?;
        let parsed: Value = serde_json::from_str(payload).ok()?;
        let token = parsed.get("token")?.as_str()?.to_owned();
        let auth = parsed.get("auth").and_then(Value::as_object).cloned();
        Some(Self { token, auth })
    }
}

/// Label sent in the first-connection stats counter.
pub fn sdk_stats_key(version: &str) -> String {
    format!("sdk.rust.{}", version.replace('.', "-"))
}
