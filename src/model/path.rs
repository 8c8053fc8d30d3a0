// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Slash-separated locations in the tree.

use std::fmt;

use super::child_key::ChildKey;

/// An ordered sequence of child keys from the root.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct Path {
    segments: Vec<ChildKey>,
}

impl Path {
    pub fn root() -> Self {
        Self::default()
    }

    /// Parse `"/a/b"`, `"a/b/"` or `""`. Empty segments are skipped.
    pub fn new(path: &str) -> Self {
        Self {
            segments: path
                .split('/')
                .filter(|s| !s.is_empty())
                .map(ChildKey::new)
                .collect(),
        }
    }

    pub fn from_keys(keys: impl IntoIterator<Item = ChildKey>) -> Self {
        Self {
            segments: keys.into_iter().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn front(&self) -> Option<&ChildKey> {
        self.segments.first()
    }

    pub fn back(&self) -> Option<&ChildKey> {
        self.segments.last()
    }

    /// Everything after the first segment.
    pub fn pop_front(&self) -> Path {
        Self {
            segments: self.segments.iter().skip(1).cloned().collect(),
        }
    }

    pub fn parent(&self) -> Option<Path> {
        if self.segments.is_empty() {
            return None;
        }
        Some(Self {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    pub fn child(&self, key: ChildKey) -> Path {
        let mut segments = self.segments.clone();
        segments.push(key);
        Self { segments }
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChildKey> {
        self.segments.iter()
    }

    /// Wire form: segments joined by `/` with no leading slash, `/` for root.
    pub fn wire_format(&self) -> String {
        if self.segments.is_empty() {
            return "/".to_owned();
        }
        self.segments
            .iter()
            .map(ChildKey::as_str)
            .collect::<Vec<_>>()
            .join("/")
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return f.write_str("/");
        }
        for segment in &self.segments {
            write!(f, "/{segment}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Path({self})")
    }
}

impl From<&str> for Path {
    fn from(path: &str) -> Self {
        Path::new(path)
    }
}
