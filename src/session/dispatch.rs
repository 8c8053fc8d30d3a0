// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Request encoding, response routing and server pushes.

use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use super::types::{OutstandingListen, PendingResponse, RangeMerge, RequestCallback};
use super::{ListenQuerySpec, PersistentConnection};
use crate::connection::DisconnectReason;
use crate::error::RequestError;
use crate::metrics;
use crate::model::Path;
use crate::protocol::{
    self, Action, ServerResponse, PERMISSION_DENIED, PUSH_AUTH_REASON, PUSH_AUTH_REVOKED,
    PUSH_AUTH_STATUS, PUSH_DATA, PUSH_DATA_UPDATE, PUSH_DEBUG_MESSAGE, PUSH_LISTEN_REVOKED,
    PUSH_MERGE, PUSH_PATH, PUSH_RANGE_DATA, PUSH_RANGE_END, PUSH_RANGE_MERGE, PUSH_RANGE_START,
    PUSH_SECURITY_DEBUG, PUSH_TAG, REQUEST_ACTION, REQUEST_COMPOUND_HASH,
    REQUEST_COMPOUND_HASH_HASHES, REQUEST_COMPOUND_HASH_PATHS, REQUEST_DATA, REQUEST_DATA_HASH,
    REQUEST_NUMBER, REQUEST_PATH, REQUEST_PAYLOAD, REQUEST_QUERIES, REQUEST_TAG, WARNING_NO_INDEX,
};

const SERVER_ERROR_KEY: &str = "error";
const QUERY_INDEX_KEY: &str = "i";

impl PersistentConnection {
    pub(super) fn send_action(&mut self, action: Action, body: Value, pending: PendingResponse) {
        self.send_sensitive(action, body, false, pending);
    }

    /// Number, envelope and send one request. Sensitive bodies stay out of the logs.
    pub(super) fn send_sensitive(
        &mut self,
        action: Action,
        body: Value,
        sensitive: bool,
        pending: PendingResponse,
    ) {
        let Some(connection) = self.connection.as_mut() else {
            debug!(%action, "No connection, dropping request");
            return;
        };
        let number = self.request_counter;
        self.request_counter += 1;
        connection.send_request(protocol::request_envelope(number, action, body), sensitive);
        self.request_callbacks.insert(number, pending);
        metrics::record_request(action.code());
    }

    pub(super) fn send_listen(&mut self, query: &ListenQuerySpec) {
        let Some(listen) = self.listens.get(query) else {
            return;
        };
        let mut request = Map::new();
        request.insert(REQUEST_PATH.into(), Value::String(query.path.wire_format()));
        if let Some(tag) = listen.tag {
            request.insert(REQUEST_QUERIES.into(), Value::Object(query.params.clone()));
            request.insert(REQUEST_TAG.into(), Value::from(tag));
        }
        let hashes = &listen.hash_provider;
        request.insert(REQUEST_DATA_HASH.into(), Value::String(hashes.simple_hash()));
        if hashes.should_include_compound_hash() {
            let compound = hashes.compound_hash();
            let posts: Vec<Value> = compound
                .posts()
                .iter()
                .map(|p| Value::String(p.wire_format()))
                .collect();
            request.insert(
                REQUEST_COMPOUND_HASH.into(),
                json!({
                    REQUEST_COMPOUND_HASH_HASHES: compound.hashes(),
                    REQUEST_COMPOUND_HASH_PATHS: posts,
                }),
            );
        }
        let listen_id = listen.id;
        debug!(path = %query.path, listen_id, "Listening");
        self.send_action(
            Action::Listen,
            Value::Object(request),
            PendingResponse::Listen { query: query.clone(), listen_id },
        );
    }

    pub(super) fn send_unlisten(&mut self, listen: &OutstandingListen) {
        let mut request = Map::new();
        request.insert(REQUEST_PATH.into(), Value::String(listen.query.path.wire_format()));
        if let Some(tag) = listen.tag {
            request.insert(REQUEST_QUERIES.into(), Value::Object(listen.query.params.clone()));
            request.insert(REQUEST_TAG.into(), Value::from(tag));
        }
        debug!(path = %listen.query.path, "Unlistening");
        self.send_action(Action::Unlisten, Value::Object(request), PendingResponse::Unlisten);
    }

    pub(super) fn send_put(&mut self, write_id: u64) {
        let Some(put) = self.outstanding_puts.get_mut(&write_id) else {
            return;
        };
        put.sent = true;
        let action = put.action;
        let request = Value::Object(put.request.clone());
        self.send_action(action, request, PendingResponse::Put { write_id });
    }

    pub(super) fn send_on_disconnect(
        &mut self,
        action: Action,
        path: Path,
        data: Value,
        callback: Option<RequestCallback>,
    ) {
        let body = json!({ REQUEST_PATH: path.wire_format(), REQUEST_DATA: data });
        debug!(%action, %path, "Sending on-disconnect operation");
        self.send_action(action, body, PendingResponse::OnDisconnect { action, path, callback });
    }

    pub(super) fn on_data_message(&mut self, mut message: Map<String, Value>) {
        if let Some(number) = message.get(REQUEST_NUMBER) {
            let Some(number) = number.as_u64() else {
                warn!(%number, "Response with a malformed request number");
                return;
            };
            match self.request_callbacks.remove(&number) {
                Some(pending) => {
                    let response = ServerResponse::from_body(message.get(REQUEST_PAYLOAD));
                    self.on_response(pending, response);
                }
                None => debug!(number, "Response for an unknown request"),
            }
            self.do_idle_check();
        } else if message.contains_key(SERVER_ERROR_KEY) {
            // Not actionable yet.
            debug!("Ignoring error message from server");
        } else if let Some(Value::String(action)) = message.remove(REQUEST_ACTION) {
            let body = match message.remove(REQUEST_PAYLOAD) {
                Some(Value::Object(body)) => body,
                _ => Map::new(),
            };
            self.on_data_push(&action, body);
        } else {
            debug!("Ignoring unknown message");
        }
    }

    fn on_response(&mut self, pending: PendingResponse, response: ServerResponse) {
        match pending {
            PendingResponse::Auth { restore_state } => self.on_auth_response(restore_state, response),
            PendingResponse::Unauth | PendingResponse::Unlisten => {}
            PendingResponse::Stats => {
                if !response.is_ok() {
                    debug!(status = %response.status, reason = ?response.message(), "Failed to send stats");
                }
            }
            PendingResponse::Listen { query, listen_id } => self.on_listen_response(query, listen_id, response),
            PendingResponse::Put { write_id } => {
                match self.outstanding_puts.remove(&write_id) {
                    Some(put) => {
                        metrics::set_outstanding_writes(self.outstanding_puts.len());
                        if let Some(callback) = put.callback {
                            callback(response.into_result());
                        }
                    }
                    None => debug!(write_id, "Ignoring on complete for put because it was removed already"),
                }
            }
            PendingResponse::OnDisconnect { action, path, callback } => {
                if !response.is_ok() {
                    debug!(%action, %path, status = %response.status, "On-disconnect operation failed");
                }
                if let Some(callback) = callback {
                    callback(response.into_result());
                }
            }
        }
    }

    fn on_listen_response(&mut self, query: ListenQuerySpec, listen_id: u64, response: ServerResponse) {
        if response.is_ok() && response.warnings().contains(&WARNING_NO_INDEX) {
            let index = query
                .params
                .get(QUERY_INDEX_KEY)
                .and_then(Value::as_str)
                .unwrap_or_default();
            warn!("{}", no_index_warning(index, &query.path));
        }

        let current = self.listens.get(&query).map(|listen| listen.id);
        if current != Some(listen_id) {
            debug!(path = %query.path, "Ignoring listen response for a replaced listen");
            return;
        }
        if response.is_ok() {
            if let Some(listen) = self.listens.get_mut(&query) {
                (listen.callback)(Ok(()));
            }
        } else if let Some(mut listen) = self.remove_listen(&query) {
            (listen.callback)(response.into_result());
        }
    }

    pub(super) fn remove_listen(&mut self, query: &ListenQuerySpec) -> Option<OutstandingListen> {
        let removed = self.listens.remove(query);
        metrics::set_active_listens(self.listens.len());
        self.do_idle_check();
        removed
    }

    fn on_data_push(&mut self, action: &str, body: Map<String, Value>) {
        debug!(action, "Handling server push");
        metrics::record_server_push(action);
        match action {
            PUSH_DATA_UPDATE | PUSH_MERGE => {
                let is_merge = action == PUSH_MERGE;
                let path = push_path(&body);
                let data = body.get(PUSH_DATA).cloned().unwrap_or(Value::Null);
                let tag = body.get(PUSH_TAG).and_then(Value::as_u64);
                if is_merge && data.as_object().is_some_and(Map::is_empty) {
                    debug!(%path, "Ignoring empty merge");
                } else {
                    self.delegate.on_data_update(&path, data, is_merge, tag);
                }
            }
            PUSH_RANGE_MERGE => {
                let path = push_path(&body);
                let tag = body.get(PUSH_TAG).and_then(Value::as_u64);
                let merges = range_merges(body.get(PUSH_DATA));
                if merges.is_empty() {
                    debug!(%path, "Ignoring empty range merge");
                } else {
                    self.delegate.on_range_merge_update(&path, merges, tag);
                }
            }
            PUSH_LISTEN_REVOKED => self.on_listen_revoked(&push_path(&body)),
            PUSH_AUTH_REVOKED => {
                let status = body.get(PUSH_AUTH_STATUS).and_then(Value::as_str).unwrap_or_default();
                let reason = body.get(PUSH_AUTH_REASON).and_then(Value::as_str).unwrap_or_default();
                self.on_auth_revoked(status, reason);
            }
            PUSH_SECURITY_DEBUG => {
                let message = body.get(PUSH_DEBUG_MESSAGE).and_then(Value::as_str).unwrap_or_default();
                info!(%message, "Security rules debug output");
            }
            other => debug!(action = other, "Unrecognized action from server"),
        }
    }

    fn on_listen_revoked(&mut self, path: &Path) {
        let revoked: Vec<ListenQuerySpec> = self
            .listens
            .keys()
            .filter(|query| &query.path == path)
            .cloned()
            .collect();
        for query in revoked {
            if let Some(mut listen) = self.remove_listen(&query) {
                debug!(path = %query.path, "Listen revoked by server");
                (listen.callback)(Err(RequestError::new(PERMISSION_DENIED, None)));
            }
        }
    }

    fn on_auth_revoked(&mut self, status: &str, reason: &str) {
        warn!(status, reason, "Auth token revoked");
        self.auth_token = None;
        self.force_auth_token_refresh = true;
        self.delegate.on_auth_status(false);
        self.close_connection(DisconnectReason::Other);
    }
}

fn push_path(body: &Map<String, Value>) -> Path {
    Path::new(body.get(PUSH_PATH).and_then(Value::as_str).unwrap_or_default())
}

fn range_merges(ranges: Option<&Value>) -> Vec<RangeMerge> {
    let Some(Value::Array(ranges)) = ranges else {
        return Vec::new();
    };
    ranges
        .iter()
        .filter_map(Value::as_object)
        .map(|range| RangeMerge {
            start: range.get(PUSH_RANGE_START).and_then(Value::as_str).map(Path::new),
            end: range.get(PUSH_RANGE_END).and_then(Value::as_str).map(Path::new),
            update: range.get(PUSH_RANGE_DATA).cloned().unwrap_or(Value::Null),
        })
        .collect()
}

/// Advice logged when the server filters a query without an index.
fn no_index_warning(index: &str, path: &Path) -> String {
    format!(
        "Using an unspecified index. Your data will be downloaded and filtered on the client. Consider adding '\".indexOn\": \"{}\"' at {} to your security rules for better performance",
        index,
        path.wire_format()
    )
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{connected_session, Recorder};
    use super::*;
    use crate::model::{Node, NodeHashProvider};
    use std::sync::{Arc, Mutex};

    fn status_recorder() -> (Arc<Mutex<Vec<Result<(), RequestError>>>>, Box<dyn FnMut(Result<(), RequestError>) + Send>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        (seen, Box::new(move |status| sink.lock().unwrap().push(status)))
    }

    #[test]
    fn test_listen_body_includes_tag_and_hash() {
        let (mut session, recorder) = connected_session(None);
        let params = json!({"i": "score", "l": 5}).as_object().unwrap().clone();
        let query = ListenQuerySpec::new(Path::new("scores"), params);
        let (_, callback) = status_recorder();
        session
            .listen(query, Box::new(NodeHashProvider::new(Node::empty())), Some(7), callback)
            .unwrap();

        let sent = recorder.last_sent();
        assert_eq!(sent["a"], "q");
        assert_eq!(sent["b"]["p"], "scores");
        assert_eq!(sent["b"]["t"], 7);
        assert_eq!(sent["b"]["q"], json!({"i": "score", "l": 5}));
        assert_eq!(sent["b"]["h"], "");
        assert!(sent["b"].get("ch").is_none());
    }

    #[test]
    fn test_listen_failure_removes_listen() {
        let (mut session, recorder) = connected_session(None);
        let query = ListenQuerySpec::default_at(Path::new("secret"));
        let (seen, callback) = status_recorder();
        session
            .listen(query, Box::new(NodeHashProvider::new(Node::empty())), None, callback)
            .unwrap();
        let number = recorder.last_sent()["r"].as_u64().unwrap();

        recorder.respond(&mut session, number, json!({"s": "permission_denied", "d": "no"}));
        assert_eq!(session.listen_count(), 0);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![Err(RequestError::new("permission_denied", Some("no".into())))]
        );
    }

    #[test]
    fn test_data_and_merge_pushes() {
        let (mut session, recorder) = connected_session(None);
        recorder.push(&mut session, json!({"a": "d", "b": {"p": "a/b", "d": 1, "t": 3}}));
        recorder.push(&mut session, json!({"a": "m", "b": {"p": "a", "d": {}}}));
        recorder.push(&mut session, json!({"a": "m", "b": {"p": "a", "d": {"x": 2}}}));
        assert_eq!(
            recorder.updates(),
            vec![
                ("/a/b".to_string(), json!(1), false, Some(3)),
                ("/a".to_string(), json!({"x": 2}), true, None),
            ]
        );
    }

    #[test]
    fn test_range_merge_push() {
        let (mut session, recorder) = connected_session(None);
        recorder.push(
            &mut session,
            json!({"a": "rm", "b": {"p": "list", "d": [{"s": "a", "m": {"b": 1}}, {"e": "z", "m": null}]}}),
        );
        let merges = recorder.range_merges();
        assert_eq!(merges.len(), 1);
        let (path, ranges, tag) = &merges[0];
        assert_eq!(path, "/list");
        assert_eq!(tag, &None);
        assert_eq!(
            ranges,
            &vec![
                RangeMerge { start: Some(Path::new("a")), end: None, update: json!({"b": 1}) },
                RangeMerge { start: None, end: Some(Path::new("z")), update: Value::Null },
            ]
        );
    }

    #[test]
    fn test_listen_revoked_push() {
        let (mut session, recorder) = connected_session(None);
        let (seen, callback) = status_recorder();
        let query = ListenQuerySpec::default_at(Path::new("rooms/1"));
        session
            .listen(query, Box::new(NodeHashProvider::new(Node::empty())), None, callback)
            .unwrap();
        recorder.push(&mut session, json!({"a": "c", "b": {"p": "rooms/1"}}));
        assert_eq!(session.listen_count(), 0);
        assert_eq!(*seen.lock().unwrap(), vec![Err(RequestError::new("permission_denied", None))]);
    }

    #[test]
    fn test_auth_revoked_push_forces_refresh() {
        let (mut session, recorder) = connected_session(Some("tok"));
        recorder.push(&mut session, json!({"a": "ac", "b": {"s": "expired_token", "d": "expired"}}));
        assert_eq!(session.state(), crate::session::SessionState::Disconnected);
        assert_eq!(recorder.auth_statuses().last(), Some(&false));
        // The next token request asks for a fresh token.
        recorder.fire_reconnect(&mut session);
        assert_eq!(recorder.token_requests().last(), Some(&(2, true)));
    }

    #[test]
    fn test_unknown_messages_ignored() {
        let (mut session, recorder) = connected_session(None);
        recorder.push(&mut session, json!({"error": "boom"}));
        recorder.push(&mut session, json!({"a": "zz", "b": {}}));
        recorder.push(&mut session, json!({"r": 999, "b": {"s": "ok"}}));
        assert_eq!(session.state(), crate::session::SessionState::Connected);
        assert!(recorder.updates().is_empty());
    }

    #[test]
    fn test_no_index_warning_uses_wire_path() {
        let message = no_index_warning("score", &Path::new("games/scores"));
        assert!(message.contains("'\".indexOn\": \"score\"' at games/scores to your"));
    }
}
