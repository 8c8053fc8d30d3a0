// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Immutable snapshot tree.
//!
//! A [`Node`] is a cheap `Arc` handle. Updates return a new tree that shares
//! every untouched subtree with the old one:
//!
//! ```text
//!        root                    root'
//!       /    \       set b/x    /    \
//!      a      b     ───────►   a      b'
//!            / \                     / \
//!           x   y                   x'  y
//! ```
//!
//! Invariants kept by every constructor:
//! - a children node never holds an empty child
//! - a children node with no children collapses to the empty node
//! - the empty node never carries a priority
//!
//! # Example
//!
//! ```
//! use realtime_sync::model::{Node, Path};
//! use serde_json::json;
//!
//! let node = Node::from_json(&json!({"a": 1, "b": {"c": "x"}})).unwrap();
//! assert_eq!(node.child(&Path::new("b/c")), Node::string("x"));
//!
//! let node = node.update_child(&Path::new("b/c"), Node::empty());
//! assert!(!node.has_child(&"b".into()));
//! ```

use std::cmp::Ordering;
use std::collections::btree_map;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, LazyLock, OnceLock};

use num_bigint::BigInt;
use num_traits::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::{Map, Number, Value};
use tracing::debug;

use super::child_key::{utf16_cmp, ChildKey};
use super::hash::{double_to_hash_string, sha1_base64, string_hash_v2, HashVersion};
use super::path::Path;
use super::priority::{compare_by_priority, is_valid_priority, parse_priority};
use crate::error::ModelError;

/// Payload of a node.
#[derive(Debug, Clone)]
pub enum NodeValue {
    Empty,
    String(String),
    Boolean(bool),
    Integer(i64),
    Float(f64),
    BigInteger(BigInt),
    BigDecimal(Decimal),
    /// A value the server fills in, e.g. `{".sv": "timestamp"}`.
    DeferredValue(Map<String, Value>),
    Children(BTreeMap<ChildKey, Node>),
    /// Sentinel that compares above every other node. Only used for index posts.
    Max,
}

impl NodeValue {
    fn is_number(&self) -> bool {
        matches!(
            self,
            NodeValue::Integer(_) | NodeValue::Float(_) | NodeValue::BigInteger(_) | NodeValue::BigDecimal(_)
        )
    }

    fn as_f64(&self) -> f64 {
        match self {
            NodeValue::Integer(v) => *v as f64,
            NodeValue::Float(v) => *v,
            NodeValue::BigInteger(v) => v.to_f64().unwrap_or(f64::NAN),
            NodeValue::BigDecimal(v) => v.to_f64().unwrap_or(f64::NAN),
            _ => f64::NAN,
        }
    }

    /// Leaf ordering bands: deferred < boolean < number < string.
    fn leaf_rank(&self) -> u8 {
        match self {
            NodeValue::DeferredValue(_) => 0,
            NodeValue::Boolean(_) => 1,
            NodeValue::String(_) => 3,
            _ => 2,
        }
    }
}

impl PartialEq for NodeValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (NodeValue::Empty, NodeValue::Empty) | (NodeValue::Max, NodeValue::Max) => true,
            (NodeValue::String(a), NodeValue::String(b)) => a == b,
            (NodeValue::Boolean(a), NodeValue::Boolean(b)) => a == b,
            (NodeValue::Integer(a), NodeValue::Integer(b)) => a == b,
            (NodeValue::Float(a), NodeValue::Float(b)) => a.to_bits() == b.to_bits(),
            (NodeValue::BigInteger(a), NodeValue::BigInteger(b)) => a == b,
            (NodeValue::BigDecimal(a), NodeValue::BigDecimal(b)) => a == b,
            (NodeValue::DeferredValue(a), NodeValue::DeferredValue(b)) => a == b,
            (NodeValue::Children(a), NodeValue::Children(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for NodeValue {}

struct NodeInner {
    value: NodeValue,
    priority: Option<Node>,
    hash: OnceLock<String>,
}

/// Shared handle to an immutable tree node.
#[derive(Clone)]
pub struct Node(Arc<NodeInner>);

static EMPTY: LazyLock<Node> = LazyLock::new(|| Node::from_parts(NodeValue::Empty, None));
static MAX_NODE: LazyLock<Node> = LazyLock::new(|| Node::from_parts(NodeValue::Max, None));
static NO_CHILDREN: BTreeMap<ChildKey, Node> = BTreeMap::new();

impl Node {
    fn from_parts(value: NodeValue, priority: Option<Node>) -> Node {
        let priority = match value {
            NodeValue::Empty | NodeValue::Max => None,
            _ => priority.filter(|p| !p.is_empty()),
        };
        Node(Arc::new(NodeInner {
            value,
            priority,
            hash: OnceLock::new(),
        }))
    }

    pub fn empty() -> Node {
        EMPTY.clone()
    }

    /// The sentinel that sorts after every node.
    pub fn max() -> Node {
        MAX_NODE.clone()
    }

    pub fn string(value: impl Into<String>) -> Node {
        Self::from_parts(NodeValue::String(value.into()), None)
    }

    pub fn boolean(value: bool) -> Node {
        Self::from_parts(NodeValue::Boolean(value), None)
    }

    pub fn integer(value: i64) -> Node {
        Self::from_parts(NodeValue::Integer(value), None)
    }

    pub fn float(value: f64) -> Node {
        Self::from_parts(NodeValue::Float(value), None)
    }

    pub fn big_integer(value: BigInt) -> Node {
        Self::from_parts(NodeValue::BigInteger(value), None)
    }

    pub fn big_decimal(value: Decimal) -> Node {
        Self::from_parts(NodeValue::BigDecimal(value), None)
    }

    pub fn deferred(value: Map<String, Value>) -> Node {
        Self::from_parts(NodeValue::DeferredValue(value), None)
    }

    /// Build a children node, dropping empty children.
    pub fn from_children(children: impl IntoIterator<Item = (ChildKey, Node)>) -> Node {
        let children: BTreeMap<ChildKey, Node> = children
            .into_iter()
            .filter(|(key, node)| !node.is_empty() && !key.is_priority())
            .collect();
        if children.is_empty() {
            return Self::empty();
        }
        Self::from_parts(NodeValue::Children(children), None)
    }

    pub fn value(&self) -> &NodeValue {
        &self.0.value
    }

    /// The priority node, empty when none is set.
    pub fn priority(&self) -> Node {
        self.0.priority.clone().unwrap_or_else(Self::empty)
    }

    pub fn is_empty(&self) -> bool {
        matches!(self.0.value, NodeValue::Empty)
    }

    pub fn is_max(&self) -> bool {
        matches!(self.0.value, NodeValue::Max)
    }

    pub fn is_leaf(&self) -> bool {
        !matches!(
            self.0.value,
            NodeValue::Empty | NodeValue::Children(_) | NodeValue::Max
        )
    }

    pub fn is_number(&self) -> bool {
        self.0.value.is_number()
    }

    pub fn child_count(&self) -> usize {
        match &self.0.value {
            NodeValue::Children(children) => children.len(),
            _ => 0,
        }
    }

    /// Children in key order. Leaves and the empty node have none.
    pub fn children(&self) -> btree_map::Iter<'_, ChildKey, Node> {
        match &self.0.value {
            NodeValue::Children(children) => children.iter(),
            _ => NO_CHILDREN.iter(),
        }
    }

    pub fn has_child(&self, key: &ChildKey) -> bool {
        !self.immediate_child(key).is_empty()
    }

    pub fn immediate_child(&self, key: &ChildKey) -> Node {
        if key.is_priority() {
            return self.priority();
        }
        match &self.0.value {
            NodeValue::Children(children) => children.get(key).cloned().unwrap_or_else(Self::empty),
            _ => Self::empty(),
        }
    }

    pub fn child(&self, path: &Path) -> Node {
        let mut current = self.clone();
        for key in path.iter() {
            current = current.immediate_child(key);
            if current.is_empty() {
                break;
            }
        }
        current
    }

    /// Same value with a new priority. The empty node stays empty, and a
    /// priority that is not empty, a number or a string clears it.
    pub fn update_priority(&self, priority: Node) -> Node {
        match self.0.value {
            NodeValue::Empty | NodeValue::Max => self.clone(),
            _ => {
                let priority = if is_valid_priority(&priority) {
                    Some(priority)
                } else {
                    debug!(?priority, "Ignoring invalid priority");
                    None
                };
                Self::from_parts(self.0.value.clone(), priority)
            }
        }
    }

    /// Attach `priority` without validation. Index posts use this to carry
    /// the MAX sentinel as a priority.
    pub(crate) fn with_sentinel_priority(&self, priority: Node) -> Node {
        Self::from_parts(self.0.value.clone(), Some(priority))
    }

    pub fn update_immediate_child(&self, key: &ChildKey, child: Node) -> Node {
        if key.is_priority() {
            return self.update_priority(child);
        }
        match &self.0.value {
            NodeValue::Max => self.clone(),
            NodeValue::Empty => {
                if child.is_empty() {
                    return self.clone();
                }
                Self::from_parts(NodeValue::Children(BTreeMap::from([(key.clone(), child)])), None)
            }
            NodeValue::Children(children) => {
                let mut children = children.clone();
                if child.is_empty() {
                    children.remove(key);
                } else {
                    children.insert(key.clone(), child);
                }
                if children.is_empty() {
                    return Self::empty();
                }
                Self::from_parts(NodeValue::Children(children), self.0.priority.clone())
            }
            _ => {
                if child.is_empty() {
                    return self.clone();
                }
                Self::from_parts(
                    NodeValue::Children(BTreeMap::from([(key.clone(), child)])),
                    self.0.priority.clone(),
                )
            }
        }
    }

    pub fn update_child(&self, path: &Path, node: Node) -> Node {
        let Some(front) = path.front() else {
            return node;
        };
        if front.is_priority() {
            // Anything below `.priority` addresses the priority itself.
            return self.update_priority(node);
        }
        if self.is_leaf() && node.is_empty() {
            return self.clone();
        }
        let child = self.immediate_child(front).update_child(&path.pop_front(), node);
        self.update_immediate_child(front, child)
    }

    /// Total order over nodes: empty < leaves < children < MAX.
    ///
    /// All children nodes compare equal to each other. Leaves order by type
    /// band first, then by value within the band.
    pub fn compare_to(&self, other: &Node) -> Ordering {
        use NodeValue::{Children, Empty, Max};
        match (&self.0.value, &other.0.value) {
            (Empty, Empty) | (Max, Max) | (Children(_), Children(_)) => Ordering::Equal,
            (Max, _) | (_, Empty) => Ordering::Greater,
            (_, Max) | (Empty, _) => Ordering::Less,
            (Children(_), _) => Ordering::Greater,
            (_, Children(_)) => Ordering::Less,
            (a, b) => compare_leaves(a, b),
        }
    }

    /// Base64 SHA-1 of the V1 representation, cached per node.
    pub fn hash(&self) -> &str {
        self.0.hash.get_or_init(|| {
            if self.is_empty() {
                return String::new();
            }
            let repr = self.hash_representation(HashVersion::V1);
            if repr.is_empty() {
                String::new()
            } else {
                sha1_base64(&repr)
            }
        })
    }

    /// Text that gets digested into [`Node::hash`].
    ///
    /// Children nodes only have a V1 representation.
    pub fn hash_representation(&self, version: HashVersion) -> String {
        let mut out = String::new();
        if matches!(self.0.value, NodeValue::Empty | NodeValue::Max) {
            return out;
        }
        if let Some(priority) = &self.0.priority {
            out.push_str("priority:");
            out.push_str(&priority.hash_representation(version));
            out.push(':');
        }
        match &self.0.value {
            NodeValue::String(value) => {
                out.push_str("string:");
                match version {
                    HashVersion::V1 => out.push_str(value),
                    HashVersion::V2 => out.push_str(&string_hash_v2(value)),
                }
            }
            NodeValue::Boolean(value) => {
                out.push_str("boolean:");
                out.push_str(if *value { "true" } else { "false" });
            }
            NodeValue::DeferredValue(value) => {
                out.push_str("deferredValue:");
                out.push_str(&deferred_repr(value));
            }
            NodeValue::Children(children) => {
                debug_assert_eq!(version, HashVersion::V1, "children nodes only hash as V1");
                let mut named: Vec<(&ChildKey, &Node)> = children.iter().collect();
                if named.iter().any(|(_, node)| node.0.priority.is_some()) {
                    named.sort_by(|a, b| compare_by_priority(a.0, a.1, b.0, b.1));
                }
                for (key, node) in named {
                    let hash = node.hash();
                    if !hash.is_empty() {
                        out.push(':');
                        out.push_str(key.as_str());
                        out.push(':');
                        out.push_str(hash);
                    }
                }
            }
            number => {
                out.push_str("number:");
                out.push_str(&double_to_hash_string(number.as_f64()));
            }
        }
        out
    }

    /// Build a node from plain JSON.
    ///
    /// Objects may carry `.priority` and `.value` keys. An object with a
    /// `.sv` key becomes a deferred leaf. Arrays become children keyed by
    /// index. Other keys starting with `.` are ignored.
    pub fn from_json(value: &Value) -> Result<Node, ModelError> {
        let mut value = value;
        let mut priority = Node::empty();
        if let Value::Object(map) = value {
            if let Some(raw) = map.get(".priority") {
                priority = parse_priority(raw)?;
            }
            if let Some(inner) = map.get(".value") {
                value = inner;
            }
        }
        let node = match value {
            Value::Null => return Ok(Node::empty()),
            Value::String(s) => Node::string(s.clone()),
            Value::Bool(b) => Node::boolean(*b),
            Value::Number(n) => number_node(n),
            Value::Object(map) if map.contains_key(".sv") => {
                let mut deferred = map.clone();
                deferred.remove(".priority");
                Node::deferred(deferred)
            }
            Value::Object(map) => {
                let mut children = BTreeMap::new();
                for (key, child) in map {
                    if key.starts_with('.') {
                        continue;
                    }
                    validate_key(key)?;
                    let child = Node::from_json(child)?;
                    if !child.is_empty() {
                        children.insert(ChildKey::new(key), child);
                    }
                }
                Node::from_children(children)
            }
            Value::Array(items) => {
                let mut children = BTreeMap::new();
                for (i, child) in items.iter().enumerate() {
                    let child = Node::from_json(child)?;
                    if !child.is_empty() {
                        children.insert(ChildKey::new(&i.to_string()), child);
                    }
                }
                Node::from_children(children)
            }
        };
        Ok(node.update_priority(priority))
    }

    /// Convert back to plain JSON.
    ///
    /// With `export` set, priorities are kept as `.priority` / `.value`
    /// wrappers. Without it, children keyed `0..n` with few gaps come back
    /// as an array.
    pub fn to_json(&self, export: bool) -> Value {
        match &self.0.value {
            NodeValue::Empty | NodeValue::Max => Value::Null,
            NodeValue::Children(children) => {
                let mut result = Map::new();
                let mut num_keys: i64 = 0;
                let mut max_key: i64 = 0;
                let mut all_integer_keys = true;
                for (key, node) in children {
                    let name = key.as_str();
                    result.insert(name.to_owned(), node.to_json(export));
                    num_keys += 1;
                    if all_integer_keys {
                        if name.len() > 1 && name.starts_with('0') {
                            all_integer_keys = false;
                        } else {
                            match key.int_value() {
                                Some(v) if v >= 0 => max_key = max_key.max(i64::from(v)),
                                _ => all_integer_keys = false,
                            }
                        }
                    }
                }
                if !export && all_integer_keys && max_key < 2 * num_keys {
                    return Value::Array(
                        (0..=max_key)
                            .map(|i| result.remove(&i.to_string()).unwrap_or(Value::Null))
                            .collect(),
                    );
                }
                if export {
                    if let Some(priority) = &self.0.priority {
                        result.insert(".priority".to_owned(), priority.to_json(false));
                    }
                }
                Value::Object(result)
            }
            leaf => {
                let value = leaf_json(leaf);
                match (&self.0.priority, export) {
                    (Some(priority), true) => {
                        let mut wrapped = Map::new();
                        wrapped.insert(".value".to_owned(), value);
                        wrapped.insert(".priority".to_owned(), priority.to_json(false));
                        Value::Object(wrapped)
                    }
                    _ => value,
                }
            }
        }
    }
}

fn validate_key(key: &str) -> Result<(), ModelError> {
    if key.is_empty() || key.contains('/') {
        return Err(ModelError::InvalidKey(key.to_owned()));
    }
    Ok(())
}

fn number_node(n: &Number) -> Node {
    if let Some(v) = n.as_i64() {
        Node::integer(v)
    } else if let Some(v) = n.as_u64() {
        Node::big_integer(BigInt::from(v))
    } else {
        Node::float(n.as_f64().unwrap_or(f64::NAN))
    }
}

fn leaf_json(value: &NodeValue) -> Value {
    match value {
        NodeValue::String(v) => Value::String(v.clone()),
        NodeValue::Boolean(v) => Value::Bool(*v),
        NodeValue::Integer(v) => Value::from(*v),
        NodeValue::BigInteger(v) => match (v.to_i64(), v.to_u64()) {
            (Some(i), _) => Value::from(i),
            (None, Some(u)) => Value::from(u),
            _ => Value::String(v.to_string()),
        },
        NodeValue::DeferredValue(v) => Value::Object(v.clone()),
        number => Number::from_f64(number.as_f64()).map_or(Value::Null, Value::Number),
    }
}

fn deferred_repr(value: &Map<String, Value>) -> String {
    let entries: Vec<String> = value
        .iter()
        .map(|(k, v)| match v {
            Value::String(s) => format!("{k}={s}"),
            other => format!("{k}={other}"),
        })
        .collect();
    format!("{{{}}}", entries.join(", "))
}

fn compare_leaves(a: &NodeValue, b: &NodeValue) -> Ordering {
    let (a_rank, b_rank) = (a.leaf_rank(), b.leaf_rank());
    if a_rank != b_rank {
        return a_rank.cmp(&b_rank);
    }
    match (a, b) {
        (NodeValue::String(x), NodeValue::String(y)) => utf16_cmp(x, y),
        (NodeValue::Boolean(x), NodeValue::Boolean(y)) => x.cmp(y),
        (NodeValue::DeferredValue(_), NodeValue::DeferredValue(_)) => Ordering::Equal,
        _ => compare_numbers(a, b),
    }
}

fn compare_numbers(a: &NodeValue, b: &NodeValue) -> Ordering {
    use NodeValue::{BigDecimal, BigInteger, Integer};
    match (a, b) {
        (Integer(x), Integer(y)) => x.cmp(y),
        (BigInteger(x), BigInteger(y)) => x.cmp(y),
        (Integer(x), BigInteger(y)) => BigInt::from(*x).cmp(y),
        (BigInteger(x), Integer(y)) => x.cmp(&BigInt::from(*y)),
        (BigDecimal(x), BigDecimal(y)) => x.cmp(y),
        (Integer(x), BigDecimal(y)) => Decimal::from(*x).cmp(y),
        (BigDecimal(x), Integer(y)) => x.cmp(&Decimal::from(*y)),
        _ => a.as_f64().total_cmp(&b.as_f64()),
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
            || (self.0.value == other.0.value && self.0.priority == other.0.priority)
    }
}

impl Eq for Node {}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0.priority {
            Some(priority) => f
                .debug_struct("Node")
                .field("value", &self.0.value)
                .field("priority", priority)
                .finish(),
            None => write!(f, "Node({:?})", self.0.value),
        }
    }
}

impl Default for Node {
    fn default() -> Self {
        Node::empty()
    }
}
