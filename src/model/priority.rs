// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Priority parsing and validation.

use std::cmp::Ordering;

use serde_json::Value;

use super::child_key::ChildKey;
use super::node::{Node, NodeValue};
use crate::error::ModelError;

/// A priority must be empty, a number, a string or a deferred value, and may
/// not itself carry a priority.
pub fn is_valid_priority(priority: &Node) -> bool {
    priority.priority().is_empty()
        && (priority.is_empty()
            || priority.is_number()
            || matches!(priority.value(), NodeValue::String(_) | NodeValue::DeferredValue(_)))
}

/// Parse a raw JSON priority. Integers are promoted to floats.
pub fn parse_priority(value: &Value) -> Result<Node, ModelError> {
    let node = Node::from_json(value)?;
    let node = match node.value() {
        NodeValue::Integer(v) => Node::float(*v as f64),
        _ => node,
    };
    if !is_valid_priority(&node) {
        return Err(ModelError::InvalidPriority(value.to_string()));
    }
    Ok(node)
}

/// Priority order, ties broken by key.
pub fn compare_by_priority(a_key: &ChildKey, a: &Node, b_key: &ChildKey, b: &Node) -> Ordering {
    a.priority()
        .compare_to(&b.priority())
        .then_with(|| a_key.cmp(b_key))
}
