// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Orderings over the children of a node.
//!
//! Every index compares [`NamedNode`] posts and can build a post out of a
//! bound value, so query bounds and real children sort in one space:
//!
//! | Index      | Sort key                       | Tie-break |
//! |------------|--------------------------------|-----------|
//! | `Key`      | child key                      | -         |
//! | `Value`    | the child node                 | key       |
//! | `Priority` | the child's priority           | key       |
//! | `Path(p)`  | the child's descendant at `p`  | key       |

use std::cmp::Ordering;

use super::child_key::ChildKey;
use super::named_node::NamedNode;
use super::node::{Node, NodeValue};
use super::path::Path;
use super::priority::compare_by_priority;
use crate::error::ModelError;

const PRIORITY_POST_VALUE: &str = "[PRIORITY-POST]";

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub enum Index {
    Key,
    Value,
    #[default]
    Priority,
    Path(Path),
}

impl Index {
    /// Index by the value at a descendant path.
    pub fn path(path: Path) -> Result<Index, ModelError> {
        if path.is_empty() {
            return Err(ModelError::InvalidIndex("path index requires a non-empty path".into()));
        }
        if path.len() == 1 && path.front().is_some_and(ChildKey::is_priority) {
            return Err(ModelError::InvalidIndex(
                "can't create a path index on '.priority', use the priority index instead".into(),
            ));
        }
        Ok(Index::Path(path))
    }

    /// Parse the wire form produced by [`Index::query_definition`].
    pub fn from_query_definition(definition: &str) -> Result<Index, ModelError> {
        match definition {
            ".key" => Ok(Index::Key),
            ".value" => Ok(Index::Value),
            ".priority" => Ok(Index::Priority),
            other => Index::path(Path::new(other)),
        }
    }

    pub fn query_definition(&self) -> String {
        match self {
            Index::Key => ".key".to_owned(),
            Index::Value => ".value".to_owned(),
            Index::Priority => ".priority".to_owned(),
            Index::Path(path) => path.wire_format(),
        }
    }

    pub fn compare(&self, a: &NamedNode, b: &NamedNode) -> Ordering {
        match self {
            Index::Key => a.name.cmp(&b.name),
            Index::Value => a.node.compare_to(&b.node).then_with(|| a.name.cmp(&b.name)),
            Index::Priority => compare_by_priority(&a.name, &a.node, &b.name, &b.node),
            Index::Path(path) => a
                .node
                .child(path)
                .compare_to(&b.node.child(path))
                .then_with(|| a.name.cmp(&b.name)),
        }
    }

    pub fn compare_with_direction(&self, a: &NamedNode, b: &NamedNode, reverse: bool) -> Ordering {
        if reverse {
            self.compare(b, a)
        } else {
            self.compare(a, b)
        }
    }

    /// Whether a node has anything this index can sort on.
    pub fn is_defined_on(&self, node: &Node) -> bool {
        match self {
            Index::Key | Index::Value => true,
            Index::Priority => !node.priority().is_empty(),
            Index::Path(path) => !node.child(path).is_empty(),
        }
    }

    /// Whether replacing `old` with `new` moves the child under this index.
    pub fn indexed_value_changed(&self, old: &Node, new: &Node) -> bool {
        let old = NamedNode::new(ChildKey::MIN, old.clone());
        let new = NamedNode::new(ChildKey::MIN, new.clone());
        self.compare(&old, &new) != Ordering::Equal
    }

    /// Build a post that sorts where a child with the indexed value `value`
    /// and key `name` would.
    ///
    /// For the key index `value` is the key itself and must be a string leaf.
    pub fn make_post(&self, name: ChildKey, value: Node) -> NamedNode {
        match self {
            Index::Key => match value.value() {
                NodeValue::String(key) => NamedNode::new(ChildKey::new(key), Node::empty()),
                _ => NamedNode::new(name, Node::empty()),
            },
            Index::Value => NamedNode::new(name, value),
            Index::Priority => NamedNode::new(
                name,
                Node::string(PRIORITY_POST_VALUE).with_sentinel_priority(value),
            ),
            Index::Path(path) => NamedNode::new(name, Node::empty().update_child(path, value)),
        }
    }

    pub fn min_post(&self) -> NamedNode {
        NamedNode::min()
    }

    pub fn max_post(&self) -> NamedNode {
        match self {
            Index::Key | Index::Value => NamedNode::max(),
            Index::Priority | Index::Path(_) => self.make_post(ChildKey::MAX, Node::max()),
        }
    }
}
