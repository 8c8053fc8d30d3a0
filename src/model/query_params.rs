// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Typed query constraints and their wire map.

use serde_json::{Map, Value};

use super::child_key::ChildKey;
use super::index::Index;
use super::node::Node;

/// Which end of the range a limit keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewFrom {
    Left,
    Right,
}

#[derive(Debug, Clone, PartialEq)]
struct Bound {
    value: Node,
    name: Option<ChildKey>,
}

/// Constraints for one listen, in builder style.
///
/// ```
/// use realtime_sync::model::{Index, Node, Path, QueryParams};
///
/// let params = QueryParams::new()
///     .order_by(Index::path(Path::new("score")).unwrap())
///     .start_at(Node::integer(10), None)
///     .limit_to_first(5);
/// let wire = params.wire_params();
/// assert_eq!(wire["i"], "score");
/// assert_eq!(wire["l"], 5);
/// assert_eq!(wire["vf"], "l");
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryParams {
    index: Index,
    start: Option<Bound>,
    end: Option<Bound>,
    limit: Option<u32>,
    view_from: Option<ViewFrom>,
}

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn order_by(mut self, index: Index) -> Self {
        self.index = index;
        self
    }

    pub fn start_at(mut self, value: Node, name: Option<ChildKey>) -> Self {
        self.start = Some(Bound { value, name });
        self
    }

    pub fn end_at(mut self, value: Node, name: Option<ChildKey>) -> Self {
        self.end = Some(Bound { value, name });
        self
    }

    pub fn limit_to_first(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self.view_from = Some(ViewFrom::Left);
        self
    }

    pub fn limit_to_last(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self.view_from = Some(ViewFrom::Right);
        self
    }

    pub fn index(&self) -> &Index {
        &self.index
    }

    pub fn limit(&self) -> Option<u32> {
        self.limit
    }

    /// No bounds and no limit: every child under the index is included.
    pub fn loads_all_data(&self) -> bool {
        self.start.is_none() && self.end.is_none() && self.limit.is_none()
    }

    /// Loads everything under the default ordering.
    pub fn is_default(&self) -> bool {
        self.loads_all_data() && self.index == Index::Priority
    }

    /// Direction a limit reads from. An unset direction reads from the
    /// left when a start bound exists, otherwise from the right.
    pub fn view_from(&self) -> ViewFrom {
        self.view_from.unwrap_or(if self.start.is_some() {
            ViewFrom::Left
        } else {
            ViewFrom::Right
        })
    }

    /// The map sent as `q` in listen requests. Empty for default queries.
    pub fn wire_params(&self) -> Map<String, Value> {
        let mut params = Map::new();
        if let Some(start) = &self.start {
            params.insert("sp".into(), start.value.to_json(false));
            if let Some(name) = &start.name {
                params.insert("sn".into(), Value::String(name.as_str().to_owned()));
            }
        }
        if let Some(end) = &self.end {
            params.insert("ep".into(), end.value.to_json(false));
            if let Some(name) = &end.name {
                params.insert("en".into(), Value::String(name.as_str().to_owned()));
            }
        }
        if let Some(limit) = self.limit {
            params.insert("l".into(), Value::from(limit));
            let view_from = match self.view_from() {
                ViewFrom::Left => "l",
                ViewFrom::Right => "r",
            };
            params.insert("vf".into(), Value::String(view_from.into()));
        }
        if self.index != Index::Priority {
            params.insert("i".into(), Value::String(self.index.query_definition()));
        }
        params
    }
}
