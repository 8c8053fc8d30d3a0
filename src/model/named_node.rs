// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use super::child_key::ChildKey;
use super::node::Node;

/// A child key paired with its node, the unit that indexes order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedNode {
    pub name: ChildKey,
    pub node: Node,
}

impl NamedNode {
    pub fn new(name: ChildKey, node: Node) -> Self {
        Self { name, node }
    }

    /// Below every post of every index.
    pub fn min() -> Self {
        Self::new(ChildKey::MIN, Node::empty())
    }

    /// Above every post of the key and value indexes.
    pub fn max() -> Self {
        Self::new(ChildKey::MAX, Node::max())
    }
}
