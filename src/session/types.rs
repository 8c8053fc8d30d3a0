// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Public and bookkeeping types for the session.

use std::hash::{Hash, Hasher};

use serde_json::{Map, Value};

use crate::error::RequestError;
use crate::model::{CompoundHash, NodeHashProvider, Path, QueryParams};
use crate::protocol::Action;

/// Session lifecycle state.
///
/// ```text
/// Disconnected → GettingToken → Connecting → [Authenticating] → Connected
///       ▲                                                           │
///       └──────────────────────── disconnect ──────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    GettingToken,
    Connecting,
    Authenticating,
    Connected,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::GettingToken => write!(f, "GettingToken"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Authenticating => write!(f, "Authenticating"),
            Self::Connected => write!(f, "Connected"),
        }
    }
}

/// Completion callback for writes and on-disconnect operations.
pub type RequestCallback = Box<dyn FnOnce(Result<(), RequestError>) + Send>;

/// Status callback for listens. May fire again if the server later revokes
/// the listen.
pub type ListenCallback = Box<dyn FnMut(Result<(), RequestError>) + Send>;

/// Identity of a listen: a path plus wire query parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenQuerySpec {
    pub path: Path,
    pub params: Map<String, Value>,
}

impl ListenQuerySpec {
    pub fn new(path: Path, params: Map<String, Value>) -> Self {
        Self { path, params }
    }

    /// Listen on everything at `path` under the default ordering.
    pub fn default_at(path: Path) -> Self {
        Self::new(path, Map::new())
    }

    pub fn from_query(path: Path, params: &QueryParams) -> Self {
        Self::new(path, params.wire_params())
    }

    pub fn is_default(&self) -> bool {
        self.params.is_empty()
    }
}

impl Hash for ListenQuerySpec {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.path.hash(state);
        hash_object(&self.params, state);
    }
}

/// Hash a JSON map independently of its iteration order.
fn hash_object<H: Hasher>(map: &Map<String, Value>, state: &mut H) {
    let mut keys: Vec<&String> = map.keys().collect();
    keys.sort_unstable();
    keys.len().hash(state);
    for key in keys {
        key.hash(state);
        hash_value(&map[key], state);
    }
}

fn hash_value<H: Hasher>(value: &Value, state: &mut H) {
    std::mem::discriminant(value).hash(state);
    match value {
        Value::Null => {}
        Value::Bool(b) => b.hash(state),
        Value::Number(n) => n.to_string().hash(state),
        Value::String(s) => s.hash(state),
        Value::Array(items) => {
            items.len().hash(state);
            for item in items {
                hash_value(item, state);
            }
        }
        Value::Object(map) => hash_object(map, state),
    }
}

/// Hash material the server uses to skip resending unchanged data.
pub trait ListenHashProvider: Send {
    fn simple_hash(&self) -> String;
    fn should_include_compound_hash(&self) -> bool;
    fn compound_hash(&self) -> CompoundHash;
}

impl ListenHashProvider for NodeHashProvider {
    fn simple_hash(&self) -> String {
        NodeHashProvider::simple_hash(self)
    }

    fn should_include_compound_hash(&self) -> bool {
        NodeHashProvider::should_include_compound_hash(self)
    }

    fn compound_hash(&self) -> CompoundHash {
        NodeHashProvider::compound_hash(self)
    }
}

/// One replacement range from a range-merge push.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeMerge {
    /// Exclusive start, `None` for unbounded.
    pub start: Option<Path>,
    /// Inclusive end, `None` for unbounded.
    pub end: Option<Path>,
    pub update: Value,
}

pub(super) struct OutstandingListen {
    pub(super) id: u64,
    pub(super) query: ListenQuerySpec,
    pub(super) tag: Option<u64>,
    pub(super) hash_provider: Box<dyn ListenHashProvider>,
    pub(super) callback: ListenCallback,
}

pub(super) struct OutstandingPut {
    pub(super) action: Action,
    pub(super) request: Map<String, Value>,
    pub(super) callback: Option<RequestCallback>,
    pub(super) sent: bool,
}

pub(super) struct OutstandingDisconnect {
    pub(super) action: Action,
    pub(super) path: Path,
    pub(super) data: Value,
    pub(super) callback: Option<RequestCallback>,
}

/// What to do with the response to a request number.
pub(super) enum PendingResponse {
    Auth { restore_state: bool },
    Unauth,
    Stats,
    Listen { query: ListenQuerySpec, listen_id: u64 },
    Unlisten,
    Put { write_id: u64 },
    OnDisconnect { action: Action, path: Path, callback: Option<RequestCallback> },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashSet;

    #[test]
    fn test_query_spec_identity() {
        let a = ListenQuerySpec::new(Path::new("a"), json!({"l": 5, "vf": "l"}).as_object().unwrap().clone());
        let b = ListenQuerySpec::new(Path::new("a"), json!({"vf": "l", "l": 5}).as_object().unwrap().clone());
        let c = ListenQuerySpec::default_at(Path::new("a"));
        let set: HashSet<_> = [a.clone(), b, c.clone()].into_iter().collect();
        assert_eq!(set.len(), 2);
        assert!(set.contains(&a));
        assert!(c.is_default());
    }

    #[test]
    fn test_query_spec_hash_ignores_key_order() {
        fn digest(spec: &ListenQuerySpec) -> u64 {
            let mut hasher = std::collections::hash_map::DefaultHasher::new();
            spec.hash(&mut hasher);
            hasher.finish()
        }
        let mut forward = Map::new();
        forward.insert("sp".into(), json!({"x": 1, "y": [1, "z"]}));
        forward.insert("i".into(), json!("score"));
        let mut backward = Map::new();
        backward.insert("i".into(), json!("score"));
        backward.insert("sp".into(), json!({"y": [1, "z"], "x": 1}));
        let a = ListenQuerySpec::new(Path::new("a"), forward);
        let b = ListenQuerySpec::new(Path::new("a"), backward.clone());
        assert_eq!(digest(&a), digest(&b));

        backward.insert("i".into(), json!("rank"));
        assert_ne!(digest(&a), digest(&ListenQuerySpec::new(Path::new("a"), backward)));
    }

    #[test]
    fn test_state_display() {
        assert_eq!(SessionState::GettingToken.to_string(), "GettingToken");
    }
}
