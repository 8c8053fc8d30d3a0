// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Immutable data model shared with the server.
//!
//! - [`ChildKey`] / [`Path`]: addressing, with server-compatible key order
//! - [`Node`]: persistent snapshot tree with cached hashes
//! - [`Index`]: orderings over children, used by [`QueryParams`]
//! - [`CompoundHash`]: range hashes sent with listens on large trees

pub mod child_key;
pub mod compound_hash;
pub mod hash;
pub mod index;
pub mod named_node;
pub mod node;
pub mod path;
pub mod priority;
pub mod query_params;

pub use child_key::ChildKey;
pub use compound_hash::{estimate_serialized_size, node_count, CompoundHash, NodeHashProvider};
pub use hash::HashVersion;
pub use index::Index;
pub use named_node::NamedNode;
pub use node::{Node, NodeValue};
pub use path::Path;
pub use priority::{is_valid_priority, parse_priority};
pub use query_params::{QueryParams, ViewFrom};
