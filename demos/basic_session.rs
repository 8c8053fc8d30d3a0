// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Basic realtime-sync usage example.
//!
//! Demonstrates:
//! 1. Spawning a session against a database host
//! 2. Listening at a path and printing pushed data
//! 3. Writing, merging and registering an on-disconnect write
//! 4. Watching session state changes
//! 5. Clean shutdown
//!
//! # Run
//!
//! ```bash
//! RUST_LOG=realtime_sync=debug cargo run --example basic_session -- my-db.example.com my-db
//! ```

use std::sync::Arc;
use std::time::Duration;

use realtime_sync::model::{Node, NodeHashProvider, Path};
use realtime_sync::session::{ListenQuerySpec, RangeMerge, SessionDelegate};
use realtime_sync::{spawn_session, RequestError, SessionConfig, SessionState, StaticTokenProvider};
use serde_json::{json, Map, Value};
use tracing_subscriber::EnvFilter;

struct Printer;

impl SessionDelegate for Printer {
    fn on_data_update(&mut self, path: &Path, data: Value, is_merge: bool, tag: Option<u64>) {
        let kind = if is_merge { "merge" } else { "set" };
        println!("   └─ {kind} {path} (tag {tag:?}) → {data}");
    }

    fn on_range_merge_update(&mut self, path: &Path, merges: Vec<RangeMerge>, _tag: Option<u64>) {
        println!("   └─ range merge {path}: {} ranges", merges.len());
    }

    fn on_connect(&mut self) {
        println!("   ✅ Connected");
    }

    fn on_disconnect(&mut self) {
        println!("   ⚠️  Disconnected");
    }

    fn on_auth_status(&mut self, ok: bool) {
        println!("   🔐 Auth ok: {ok}");
    }

    fn on_server_info_update(&mut self, updates: Map<String, Value>) {
        println!("   ⏱️  Server info: {}", Value::Object(updates));
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let mut args = std::env::args().skip(1);
    let host = args.next().unwrap_or_else(|| "localhost:9000".into());
    let namespace = args.next().unwrap_or_else(|| "default".into());

    // ─────────────────────────────────────────────────────────────────────────
    // 1. Configure and start the session
    // ─────────────────────────────────────────────────────────────────────────
    println!("📦 Connecting to {host} (namespace {namespace})...");
    let mut config = SessionConfig::new(host.clone(), namespace);
    config.secure = !host.starts_with("localhost");
    let session = spawn_session(config, Arc::new(StaticTokenProvider::anonymous()), Box::new(Printer));
    session.initialize().await?;

    let mut state = session.watch_state();
    tokio::spawn(async move {
        while state.changed().await.is_ok() {
            println!("   State: {}", *state.borrow());
        }
    });

    // ─────────────────────────────────────────────────────────────────────────
    // 2. Listen
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n👂 Listening at /demo...");
    let query = ListenQuerySpec::default_at(Path::new("demo"));
    session
        .listen(
            query.clone(),
            Box::new(NodeHashProvider::new(Node::empty())),
            None,
            Box::new(|status: Result<(), RequestError>| println!("   └─ listen status: {status:?}")),
        )
        .await?;

    // ─────────────────────────────────────────────────────────────────────────
    // 3. Write
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📝 Writing...");
    session
        .put(
            Path::new("demo/greeting"),
            json!("hello"),
            Some(Box::new(|result: Result<(), RequestError>| println!("   └─ put: {result:?}"))),
        )
        .await?;
    let mut counters = Map::new();
    counters.insert("visits".into(), json!(1));
    session
        .merge(
            Path::new("demo/stats"),
            counters,
            Some(Box::new(|result: Result<(), RequestError>| println!("   └─ merge: {result:?}"))),
        )
        .await?;
    session
        .on_disconnect_put(Path::new("demo/online"), json!(false), None)
        .await?;

    tokio::time::sleep(Duration::from_secs(5)).await;
    if session.state() != SessionState::Connected {
        println!("\n💡 Never connected; writes stay queued until the host is reachable.");
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 4. Clean shutdown
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🛑 Shutting down...");
    session.unlisten(query).await?;
    session.shutdown().await?;
    println!("   ✅ Shutdown complete! State: {}", session.state());

    Ok(())
}
