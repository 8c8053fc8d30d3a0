// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Public session operations.

use serde_json::{Map, Value};
use tracing::{debug, info};

use super::types::{OutstandingDisconnect, OutstandingListen, OutstandingPut};
use super::{
    ListenCallback, ListenHashProvider, ListenQuerySpec, PersistentConnection, RequestCallback,
    SessionState, SHUTDOWN_INTERRUPT_REASON, TOKEN_REFRESH_INTERRUPT_REASON,
};
use crate::error::{RequestError, SessionError};
use crate::metrics;
use crate::model::Path;
use crate::protocol::{Action, REQUEST_DATA, REQUEST_DATA_HASH, REQUEST_PATH};

const WRITE_CANCELED: &str = "write_canceled";

impl PersistentConnection {
    /// Start connecting. The first attempt is scheduled without delay.
    pub fn initialize(&mut self) -> Result<(), SessionError> {
        self.ensure_running()?;
        if self.state != SessionState::Disconnected {
            return Err(SessionError::InvalidState {
                operation: "initialize",
                state: self.state.to_string(),
            });
        }
        info!(host = %self.host_info.host, namespace = %self.host_info.namespace, "Initializing realtime session");
        self.try_schedule_reconnect();
        Ok(())
    }

    /// Tear everything down. Pending callbacks are dropped without firing.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        info!("Shutting down realtime session");
        self.interrupt_internal(SHUTDOWN_INTERRUPT_REASON);
        self.shut_down = true;
        self.cancel_idle_timer();
        self.cancel_retry();
        self.listens.clear();
        self.outstanding_puts.clear();
        self.on_disconnect_queue.clear();
        self.request_callbacks.clear();
        self.has_on_disconnects = false;
        metrics::set_active_listens(0);
        metrics::set_outstanding_writes(0);
    }

    /// Register a listen. It is sent now if connected, otherwise on the next connect.
    pub fn listen(
        &mut self,
        query: ListenQuerySpec,
        hash_provider: Box<dyn ListenHashProvider>,
        tag: Option<u64>,
        callback: ListenCallback,
    ) -> Result<(), SessionError> {
        self.ensure_running()?;
        if self.listens.contains_key(&query) {
            return Err(SessionError::DuplicateListen {
                path: query.path.to_string(),
            });
        }
        debug!(path = %query.path, ?tag, "Adding listen");
        let id = self.listen_counter;
        self.listen_counter += 1;
        self.listens.insert(
            query.clone(),
            OutstandingListen {
                id,
                query: query.clone(),
                tag,
                hash_provider,
                callback,
            },
        );
        metrics::set_active_listens(self.listens.len());
        if self.state == SessionState::Connected {
            self.send_listen(&query);
        }
        self.do_idle_check();
        Ok(())
    }

    /// Drop a listen. Unknown queries are ignored.
    pub fn unlisten(&mut self, query: &ListenQuerySpec) -> Result<(), SessionError> {
        self.ensure_running()?;
        debug!(path = %query.path, "Unlisten called");
        if let Some(listen) = self.remove_listen(query) {
            if self.state == SessionState::Connected {
                self.send_unlisten(&listen);
            }
        }
        self.do_idle_check();
        Ok(())
    }

    pub fn put(
        &mut self,
        path: Path,
        data: Value,
        callback: Option<RequestCallback>,
    ) -> Result<(), SessionError> {
        self.put_internal(Action::Put, path, data, None, callback)
    }

    /// Put that only applies if the current server data hashes to `hash`.
    pub fn compare_and_put(
        &mut self,
        path: Path,
        data: Value,
        hash: String,
        callback: Option<RequestCallback>,
    ) -> Result<(), SessionError> {
        self.put_internal(Action::Put, path, data, Some(hash), callback)
    }

    pub fn merge(
        &mut self,
        path: Path,
        data: Map<String, Value>,
        callback: Option<RequestCallback>,
    ) -> Result<(), SessionError> {
        self.put_internal(Action::Merge, path, Value::Object(data), None, callback)
    }

    fn put_internal(
        &mut self,
        action: Action,
        path: Path,
        data: Value,
        hash: Option<String>,
        callback: Option<RequestCallback>,
    ) -> Result<(), SessionError> {
        self.ensure_running()?;
        let mut request = Map::new();
        request.insert(REQUEST_PATH.into(), Value::String(path.wire_format()));
        request.insert(REQUEST_DATA.into(), data);
        if let Some(hash) = hash {
            request.insert(REQUEST_DATA_HASH.into(), Value::String(hash));
        }
        let write_id = self.write_counter;
        self.write_counter += 1;
        self.outstanding_puts.insert(
            write_id,
            OutstandingPut {
                action,
                request,
                callback,
                sent: false,
            },
        );
        metrics::set_outstanding_writes(self.outstanding_puts.len());
        if self.state == SessionState::Connected {
            self.send_put(write_id);
        } else {
            debug!(write_id, %path, "Wasn't connected, queueing write");
        }
        self.do_idle_check();
        Ok(())
    }

    pub fn on_disconnect_put(
        &mut self,
        path: Path,
        data: Value,
        callback: Option<RequestCallback>,
    ) -> Result<(), SessionError> {
        self.has_on_disconnects = true;
        self.on_disconnect_internal(Action::OnDisconnectPut, path, data, callback)
    }

    pub fn on_disconnect_merge(
        &mut self,
        path: Path,
        updates: Map<String, Value>,
        callback: Option<RequestCallback>,
    ) -> Result<(), SessionError> {
        self.has_on_disconnects = true;
        self.on_disconnect_internal(Action::OnDisconnectMerge, path, Value::Object(updates), callback)
    }

    /// Cancel on-disconnect operations at `path`.
    pub fn on_disconnect_cancel(
        &mut self,
        path: Path,
        callback: Option<RequestCallback>,
    ) -> Result<(), SessionError> {
        // Cancelling does not give the server anything new to do on disconnect.
        self.on_disconnect_internal(Action::OnDisconnectCancel, path, Value::Null, callback)
    }

    fn on_disconnect_internal(
        &mut self,
        action: Action,
        path: Path,
        data: Value,
        callback: Option<RequestCallback>,
    ) -> Result<(), SessionError> {
        self.ensure_running()?;
        if self.state == SessionState::Connected {
            self.send_on_disconnect(action, path, data, callback);
        } else {
            debug!(%action, %path, "Queueing on-disconnect operation until connected");
            self.on_disconnect_queue.push(OutstandingDisconnect {
                action,
                path,
                data,
                callback,
            });
        }
        self.do_idle_check();
        Ok(())
    }

    /// Fail every pending write and queued on-disconnect with `write_canceled`.
    pub fn purge_outstanding_writes(&mut self) -> Result<(), SessionError> {
        self.ensure_running()?;
        let puts = std::mem::take(&mut self.outstanding_puts);
        let queued = std::mem::take(&mut self.on_disconnect_queue);
        debug!(writes = puts.len(), on_disconnects = queued.len(), "Purging outstanding writes");
        let callbacks = puts
            .into_values()
            .filter_map(|put| put.callback)
            .chain(queued.into_iter().filter_map(|op| op.callback));
        for callback in callbacks {
            callback(Err(RequestError::new(WRITE_CANCELED, None)));
        }
        if self.state != SessionState::Connected {
            self.has_on_disconnects = false;
        }
        metrics::set_outstanding_writes(0);
        self.do_idle_check();
        Ok(())
    }

    /// Keep the session offline until every interrupt reason is resumed.
    pub fn interrupt(&mut self, reason: &str) -> Result<(), SessionError> {
        self.ensure_running()?;
        self.interrupt_internal(reason);
        Ok(())
    }

    pub fn resume(&mut self, reason: &str) -> Result<(), SessionError> {
        self.ensure_running()?;
        self.resume_internal(reason);
        Ok(())
    }

    /// Reconnect with a freshly fetched token.
    pub fn refresh_auth_token(&mut self) -> Result<(), SessionError> {
        self.ensure_running()?;
        debug!("Auth token refresh requested");
        self.interrupt_internal(TOKEN_REFRESH_INTERRUPT_REASON);
        self.resume_internal(TOKEN_REFRESH_INTERRUPT_REASON);
        Ok(())
    }

    /// Swap the credential on the live connection. `None` signs out.
    pub fn refresh_auth_token_with(&mut self, token: Option<String>) -> Result<(), SessionError> {
        self.ensure_running()?;
        debug!(has_token = token.is_some(), "Auth token refreshed");
        let signing_in = token.is_some();
        self.auth_token = token;
        if matches!(self.state, SessionState::Authenticating | SessionState::Connected) {
            if signing_in {
                self.send_auth(false);
            } else {
                self.send_unauth();
            }
        }
        Ok(())
    }

    fn ensure_running(&self) -> Result<(), SessionError> {
        if self.shut_down {
            Err(SessionError::ShutDown)
        } else {
            Ok(())
        }
    }
}
