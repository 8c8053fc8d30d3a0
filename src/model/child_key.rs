// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Child keys and their ordering.
//!
//! Keys sort in three bands:
//!
//! ```text
//! MIN  <  integer-like keys (numeric)  <  other keys (UTF-16 code units)  <  MAX
//! ```
//!
//! `.priority` is an ordinary string key for ordering purposes, it only
//! gets special treatment when a node is updated.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

const MIN_NAME: &str = "[MIN_NAME]";
const MAX_NAME: &str = "[MAX_NAME]";
const PRIORITY_NAME: &str = ".priority";

#[derive(Clone, PartialEq, Eq, Hash)]
enum KeyRepr {
    Min,
    Max,
    Priority,
    Integer { name: Arc<str>, value: i32 },
    Name(Arc<str>),
}

/// The name of one child of a node.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ChildKey(KeyRepr);

impl ChildKey {
    /// Sentinel below every real key.
    pub const MIN: ChildKey = ChildKey(KeyRepr::Min);
    /// Sentinel above every real key.
    pub const MAX: ChildKey = ChildKey(KeyRepr::Max);
    /// The `.priority` pseudo-child.
    pub const PRIORITY: ChildKey = ChildKey(KeyRepr::Priority);

    /// Build a key from its textual name.
    ///
    /// Names that look like 32-bit integers get numeric ordering.
    pub fn new(name: &str) -> Self {
        debug_assert!(!name.contains('/'), "child key `{name}` contains '/'");
        match name {
            MIN_NAME => Self::MIN,
            MAX_NAME => Self::MAX,
            PRIORITY_NAME => Self::PRIORITY,
            _ => match try_parse_int(name) {
                Some(value) => ChildKey(KeyRepr::Integer {
                    name: Arc::from(name),
                    value,
                }),
                None => ChildKey(KeyRepr::Name(Arc::from(name))),
            },
        }
    }

    pub fn as_str(&self) -> &str {
        match &self.0 {
            KeyRepr::Min => MIN_NAME,
            KeyRepr::Max => MAX_NAME,
            KeyRepr::Priority => PRIORITY_NAME,
            KeyRepr::Integer { name, .. } | KeyRepr::Name(name) => name,
        }
    }

    pub fn is_priority(&self) -> bool {
        matches!(self.0, KeyRepr::Priority)
    }

    pub fn is_min(&self) -> bool {
        matches!(self.0, KeyRepr::Min)
    }

    pub fn is_max(&self) -> bool {
        matches!(self.0, KeyRepr::Max)
    }

    /// The numeric value for integer-like keys.
    pub fn int_value(&self) -> Option<i32> {
        match self.0 {
            KeyRepr::Integer { value, .. } => Some(value),
            _ => None,
        }
    }
}

/// Parse a key as a 32-bit integer the way the server does.
///
/// Accepts an optional leading `-` followed by digits, at most 11 characters
/// in total. Leading zeros are allowed (`"007"` parses), values outside the
/// `i32` range do not.
pub fn try_parse_int(name: &str) -> Option<i32> {
    if name.is_empty() || name.len() > 11 {
        return None;
    }
    let (negative, digits) = match name.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, name),
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let mut number: i64 = 0;
    for b in digits.bytes() {
        number = number * 10 + i64::from(b - b'0');
    }
    if negative {
        number = -number;
    }
    i32::try_from(number).ok()
}

/// Compare two strings by UTF-16 code units.
pub(crate) fn utf16_cmp(a: &str, b: &str) -> Ordering {
    a.encode_utf16().cmp(b.encode_utf16())
}

impl Ord for ChildKey {
    fn cmp(&self, other: &Self) -> Ordering {
        match (&self.0, &other.0) {
            (KeyRepr::Min, KeyRepr::Min) | (KeyRepr::Max, KeyRepr::Max) => Ordering::Equal,
            (KeyRepr::Min, _) | (_, KeyRepr::Max) => Ordering::Less,
            (_, KeyRepr::Min) | (KeyRepr::Max, _) => Ordering::Greater,
            (
                KeyRepr::Integer { name: a_name, value: a },
                KeyRepr::Integer { name: b_name, value: b },
            ) => a
                .cmp(b)
                .then_with(|| a_name.len().cmp(&b_name.len()))
                .then_with(|| utf16_cmp(a_name, b_name)),
            (KeyRepr::Integer { .. }, _) => Ordering::Less,
            (_, KeyRepr::Integer { .. }) => Ordering::Greater,
            _ => utf16_cmp(self.as_str(), other.as_str()),
        }
    }
}

impl PartialOrd for ChildKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for ChildKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for ChildKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChildKey({:?})", self.as_str())
    }
}

impl From<&str> for ChildKey {
    fn from(name: &str) -> Self {
        ChildKey::new(name)
    }
}

impl From<String> for ChildKey {
    fn from(name: String) -> Self {
        ChildKey::new(&name)
    }
}
