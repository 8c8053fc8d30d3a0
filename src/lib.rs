// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! # Realtime Sync
//!
//! A realtime synchronization client for a hierarchical JSON data store.
//!
//! One logical session multiplexes listens, writes and on-disconnect
//! operations over a single WebSocket, and survives dropped connections,
//! token expiry and server-initiated resets.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Runtime (SessionHandle)                     │
//! │  • tokio task owning the session                           │
//! │  • timers, token fetches, transport events as messages     │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │               Session (PersistentConnection)                │
//! │  • reconnect with backoff, auth handshake                  │
//! │  • listens, writes, on-disconnects replayed on reconnect   │
//! │  • idle detection and interrupt reasons                    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Connection (per attempt)                  │
//! │  • hello / reset / shutdown control messages               │
//! │  • data envelope wrapping and unwrapping                   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Transport (WebSocket)                    │
//! │  • 16 KiB frame splitting and reassembly                   │
//! │  • keepalives and connect timeout                          │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Listens carry hashes of the client's cached data, computed by the
//! immutable tree in [`model`], so the server can skip resending data the
//! client already has.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use realtime_sync::model::Path;
//! use realtime_sync::runtime::{spawn_session, StaticTokenProvider};
//! use realtime_sync::session::{RangeMerge, SessionDelegate};
//! use realtime_sync::{RequestError, SessionConfig};
//! use serde_json::{json, Map, Value};
//! use std::sync::Arc;
//!
//! struct Log;
//!
//! impl SessionDelegate for Log {
//!     fn on_data_update(&mut self, path: &Path, data: Value, _: bool, _: Option<u64>) {
//!         println!("{path} = {data}");
//!     }
//!     fn on_range_merge_update(&mut self, _: &Path, _: Vec<RangeMerge>, _: Option<u64>) {}
//!     fn on_connect(&mut self) {}
//!     fn on_disconnect(&mut self) {}
//!     fn on_auth_status(&mut self, _: bool) {}
//!     fn on_server_info_update(&mut self, _: Map<String, Value>) {}
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = SessionConfig::new("my-db.example.com", "my-db");
//!     let session = spawn_session(config, Arc::new(StaticTokenProvider::anonymous()), Box::new(Log));
//!
//!     session.initialize().await.expect("Failed to start");
//!     session
//!         .put(Path::new("status/online"), json!(true), Some(Box::new(|result: Result<(), RequestError>| {
//!             println!("write finished: {result:?}");
//!         })))
//!         .await
//!         .expect("Session stopped");
//!
//!     session.shutdown().await.expect("Failed to shut down");
//! }
//! ```
//!
//! ## Features
//!
//! - **Persistent Sessions**: Outstanding operations survive reconnects
//! - **Backoff**: Jittered exponential reconnect delays, reset by healthy connections
//! - **Auth**: Plain and `gauth` tokens, forced refresh after rejection or revocation
//! - **Idle Detection**: Disconnects when nothing is listening or pending
//! - **Compound Hashes**: Range hashes let the server send only changed ranges
//!
//! ## Configuration
//!
//! See [`SessionConfig`] for all configuration options.
//!
//! ## Modules
//!
//! - [`session`]: The [`PersistentConnection`] state machine
//! - [`runtime`]: tokio driver and [`runtime::SessionHandle`]
//! - [`connection`]: Per-attempt control protocol
//! - [`transport`]: WebSocket transport and frame codec
//! - [`model`]: Keys, paths, nodes, indexes and hashing
//! - [`protocol`]: Wire vocabulary
//! - [`resilience`]: Reconnect backoff

pub mod config;
pub mod connection;
pub mod error;
pub mod metrics;
pub mod model;
pub mod protocol;
pub mod resilience;
pub mod runtime;
pub mod session;
pub mod transport;

pub use config::SessionConfig;
pub use error::{ModelError, RequestError, SessionError, TokenError, TransportError};
pub use resilience::retry::RetryConfig;
pub use runtime::{spawn_session, AuthTokenProvider, SessionHandle, StaticTokenProvider};
pub use session::{PersistentConnection, SessionDelegate, SessionState};
