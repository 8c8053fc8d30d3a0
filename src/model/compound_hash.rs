// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Range hashes for large listens.
//!
//! A plain node hash tells the server "something differs". For big trees the
//! client also sends a compound hash: the tree is walked depth-first and cut
//! into ranges, each hashed separately, so the server can resend only the
//! ranges that changed.
//!
//! ```text
//! ("a":(number:...),"b":("c":(string:"x")   |  ,"d":(boolean:true)))
//! └───────────── range 0 ───────────────────┘  └──── range 1 ─────┘
//!   post[0] = /b/c                                post[1] = /d ... and a
//!                                                 trailing "" hash
//! ```
//!
//! `posts[i]` is the path of the last leaf in range `i`. `hashes` always has
//! one more entry than `posts`: the final empty string stands for the open
//! range after the last post.

use super::child_key::ChildKey;
use super::hash::{sha1_base64, string_hash_v2, HashVersion};
use super::node::{Node, NodeValue};
use super::path::Path;

const MIN_SPLIT_THRESHOLD: u64 = 512;
const COMPOUND_HASH_SIZE_THRESHOLD: u64 = 1024;

// Serialized-size weights.
const EMPTY_SIZE: u64 = 4;
const NUMBER_SIZE: u64 = 8;
const BOOLEAN_SIZE: u64 = 4;
const STRING_QUOTES: u64 = 2;
const LEAF_PRIORITY_OVERHEAD: u64 = 24;
const CHILD_OVERHEAD: u64 = 4;
const CHILDREN_PRIORITY_OVERHEAD: u64 = 12;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompoundHash {
    posts: Vec<Path>,
    hashes: Vec<String>,
}

impl CompoundHash {
    /// Split into ranges of roughly `sqrt(100 * size)` characters, at least 512.
    pub fn from_node(node: &Node) -> CompoundHash {
        let estimated = estimate_serialized_size(node);
        let threshold = MIN_SPLIT_THRESHOLD.max(((estimated * 100) as f64).sqrt().ceil() as u64);
        Self::with_split_threshold(node, threshold as usize)
    }

    /// Split whenever a range grows past `threshold` characters.
    pub fn with_split_threshold(node: &Node, threshold: usize) -> CompoundHash {
        if node.is_empty() {
            return CompoundHash {
                posts: Vec::new(),
                hashes: vec![String::new()],
            };
        }
        let mut builder = Builder::new(threshold);
        builder.process(node);
        builder.finish()
    }

    pub fn posts(&self) -> &[Path] {
        &self.posts
    }

    pub fn hashes(&self) -> &[String] {
        &self.hashes
    }
}

struct Builder {
    range: Option<String>,
    path: Vec<ChildKey>,
    depth: usize,
    last_level: usize,
    needs_comma: bool,
    posts: Vec<Path>,
    hashes: Vec<String>,
    threshold: usize,
}

impl Builder {
    fn new(threshold: usize) -> Self {
        Self {
            range: None,
            path: Vec::new(),
            depth: 0,
            last_level: 0,
            needs_comma: true,
            posts: Vec::new(),
            hashes: Vec::new(),
            threshold,
        }
    }

    fn current_path(&self, depth: usize) -> Path {
        Path::from_keys(self.path[..depth].iter().cloned())
    }

    fn process(&mut self, node: &Node) {
        match node.value() {
            NodeValue::Children(_) => {
                let priority = node.priority();
                let mut priority_pending = !priority.is_empty();
                for (key, child) in node.children() {
                    if priority_pending && *key > ChildKey::PRIORITY {
                        priority_pending = false;
                        self.visit_child(ChildKey::PRIORITY, &priority);
                    }
                    self.visit_child(key.clone(), child);
                }
                // A priority sorting after every child is never visited.
            }
            NodeValue::Empty | NodeValue::Max => {
                debug_assert!(false, "compound hash walked into an empty node");
            }
            _ => self.process_leaf(node),
        }
    }

    fn visit_child(&mut self, key: ChildKey, child: &Node) {
        self.start_child(key);
        self.process(child);
        self.end_child();
    }

    fn range(&mut self) -> &mut String {
        if self.range.is_none() {
            let mut range = String::from("(");
            for key in &self.path[..self.depth] {
                range.push_str(&string_hash_v2(key.as_str()));
                range.push_str(":(");
            }
            self.range = Some(range);
            self.needs_comma = false;
        }
        self.range.get_or_insert_with(String::new)
    }

    fn process_leaf(&mut self, leaf: &Node) {
        let repr = leaf.hash_representation(HashVersion::V2);
        self.range().push_str(&repr);
        self.last_level = self.depth;
        self.needs_comma = true;
        if self.should_split() {
            self.end_range();
        }
    }

    fn should_split(&self) -> bool {
        let length = self.range.as_ref().map_or(0, |range| range.encode_utf16().count());
        let on_priority = self.depth > 0 && self.path[self.depth - 1].is_priority();
        length > self.threshold && !on_priority
    }

    fn start_child(&mut self, key: ChildKey) {
        let needs_comma = self.range.is_some() && self.needs_comma;
        let encoded = string_hash_v2(key.as_str());
        let range = self.range();
        if needs_comma {
            range.push(',');
        }
        range.push_str(&encoded);
        range.push_str(":(");
        if self.depth == self.path.len() {
            self.path.push(key);
        } else {
            self.path[self.depth] = key;
        }
        self.depth += 1;
        self.needs_comma = false;
    }

    fn end_child(&mut self) {
        self.depth -= 1;
        if let Some(range) = self.range.as_mut() {
            range.push(')');
        }
        self.needs_comma = true;
    }

    fn end_range(&mut self) {
        let Some(mut range) = self.range.take() else {
            return;
        };
        for _ in 0..self.depth {
            range.push(')');
        }
        range.push(')');
        self.hashes.push(sha1_base64(&range));
        self.posts.push(self.current_path(self.last_level));
    }

    fn finish(mut self) -> CompoundHash {
        debug_assert_eq!(self.depth, 0, "finished hashing in the middle of a child");
        self.end_range();
        self.hashes.push(String::new());
        CompoundHash {
            posts: self.posts,
            hashes: self.hashes,
        }
    }
}

/// Rough size of a node serialized as JSON.
pub fn estimate_serialized_size(node: &Node) -> u64 {
    match node.value() {
        NodeValue::Empty | NodeValue::Max => EMPTY_SIZE,
        NodeValue::Children(children) => {
            let mut sum = 1;
            for (key, child) in children {
                sum += utf16_len(key.as_str()) + CHILD_OVERHEAD + estimate_serialized_size(child);
            }
            let priority = node.priority();
            if !priority.is_empty() {
                sum += CHILDREN_PRIORITY_OVERHEAD + estimate_leaf_size(&priority);
            }
            sum
        }
        _ => estimate_leaf_size(node),
    }
}

fn estimate_leaf_size(leaf: &Node) -> u64 {
    let value_size = match leaf.value() {
        NodeValue::String(s) => STRING_QUOTES + utf16_len(s),
        NodeValue::Boolean(_) => BOOLEAN_SIZE,
        NodeValue::DeferredValue(map) => serde_json::Value::Object(map.clone()).to_string().len() as u64,
        _ => NUMBER_SIZE,
    };
    let priority = leaf.priority();
    if priority.is_empty() {
        value_size
    } else {
        LEAF_PRIORITY_OVERHEAD + value_size + estimate_leaf_size(&priority)
    }
}

fn utf16_len(s: &str) -> u64 {
    s.encode_utf16().count() as u64
}

/// Number of leaves under a node.
pub fn node_count(node: &Node) -> usize {
    match node.value() {
        NodeValue::Empty | NodeValue::Max => 0,
        NodeValue::Children(children) => children.values().map(node_count).sum(),
        _ => 1,
    }
}

/// Hash material for listening on a locally cached node.
#[derive(Debug, Clone)]
pub struct NodeHashProvider {
    node: Node,
}

impl NodeHashProvider {
    pub fn new(node: Node) -> Self {
        Self { node }
    }

    pub fn simple_hash(&self) -> String {
        self.node.hash().to_owned()
    }

    /// Compound hashes only pay off for trees above ~1 KiB.
    pub fn should_include_compound_hash(&self) -> bool {
        estimate_serialized_size(&self.node) > COMPOUND_HASH_SIZE_THRESHOLD
    }

    pub fn compound_hash(&self) -> CompoundHash {
        CompoundHash::from_node(&self.node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn node(value: serde_json::Value) -> Node {
        Node::from_json(&value).unwrap()
    }

    #[test]
    fn test_empty_node() {
        let hash = CompoundHash::from_node(&Node::empty());
        assert!(hash.posts().is_empty());
        assert_eq!(hash.hashes(), [""]);
    }

    #[test]
    fn test_single_range() {
        let hash = CompoundHash::from_node(&node(json!({"a": 1, "b": "x"})));
        assert_eq!(hash.posts(), [Path::new("b")]);
        assert_eq!(hash.hashes(), ["S0C9uofeev2oaEPPFbZ7iMskq6U=", ""]);
    }

    #[test]
    fn test_leaf_root() {
        let hash = CompoundHash::from_node(&Node::string("x"));
        assert_eq!(hash.posts(), [Path::root()]);
        assert_eq!(hash.hashes(), ["k65y/3aOfaqqToNn7ICGIoXaKiI=", ""]);
    }

    #[test]
    fn test_split_every_leaf() {
        let hash = CompoundHash::with_split_threshold(&node(json!({"a": 1, "b": "x"})), 0);
        assert_eq!(hash.posts(), [Path::new("a"), Path::new("b")]);
        assert_eq!(
            hash.hashes(),
            ["0mM8iXxfqbj5xrSZeenGfylon9c=", "Vn9rtChX1PBBAMu/dDc3/2m5U+I=", ""]
        );
    }

    #[test]
    fn test_never_splits_on_priority_leaf() {
        let hash = CompoundHash::with_split_threshold(&node(json!({"a": 1, ".priority": "p"})), 0);
        assert_eq!(hash.posts(), [Path::new("a")]);
        assert_eq!(hash.hashes(), ["+I7Uh125vP3Tx6hHFZPcJ/msyyw=", ""]);
    }

    #[test]
    fn test_hashes_outnumber_posts_by_one() {
        let mut value = serde_json::Map::new();
        for i in 0..200 {
            value.insert(format!("key{i}"), json!({"name": format!("value number {i}"), "n": i}));
        }
        let big = node(serde_json::Value::Object(value));
        let hash = CompoundHash::from_node(&big);
        assert!(hash.posts().len() > 1);
        assert_eq!(hash.hashes().len(), hash.posts().len() + 1);
        assert_eq!(hash.hashes().last().map(String::as_str), Some(""));
    }

    #[test]
    fn test_size_estimates() {
        assert_eq!(estimate_serialized_size(&Node::empty()), 4);
        assert_eq!(estimate_serialized_size(&Node::string("abc")), 5);
        assert_eq!(estimate_serialized_size(&Node::integer(1)), 8);
        assert_eq!(estimate_serialized_size(&Node::boolean(true)), 4);
        assert_eq!(
            estimate_serialized_size(&Node::boolean(true).update_priority(Node::float(1.0))),
            24 + 4 + 8
        );
        // 1 + ("a" 1 + 4 + 8) + ("bb" 2 + 4 + 4) + 12 + (2 + 1)
        assert_eq!(
            estimate_serialized_size(&node(json!({"a": 1, "bb": true, ".priority": "p"}))),
            1 + 13 + 10 + 12 + 3
        );
        assert_eq!(node_count(&node(json!({"a": 1, "b": {"c": 2, "d": 3}}))), 3);
    }

    #[test]
    fn test_provider_threshold() {
        let small = NodeHashProvider::new(node(json!({"a": 1})));
        assert!(!small.should_include_compound_hash());
        let large = NodeHashProvider::new(Node::string("x".repeat(2000)));
        assert!(large.should_include_compound_hash());
        assert_eq!(large.simple_hash(), Node::string("x".repeat(2000)).hash());
    }

    #[test]
    fn test_priority_after_all_children_is_skipped() {
        let with_priority =
            CompoundHash::with_split_threshold(&node(json!({"-a": 1, ".priority": "p"})), 0);
        let without = CompoundHash::with_split_threshold(&node(json!({"-a": 1})), 0);
        assert_eq!(with_priority, without);
    }

    #[test]
    fn test_split_measures_utf16_length() {
        let wide = "\u{e9}".repeat(300);
        let tree = node(json!({"a": wide, "b": 1}));
        // 300 code units but 600 UTF-8 bytes: only a byte count would split after "a".
        let hash = CompoundHash::with_split_threshold(&tree, 400);
        assert_eq!(hash.posts(), [Path::new("b")]);
    }
}
