// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Hash primitives shared by node hashing and compound hashing.
//!
//! The server recomputes the same digests on its side, so every byte of the
//! representation here is part of the protocol.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use sha1::{Digest, Sha1};

/// Which textual representation a leaf uses when hashed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashVersion {
    /// Plain representation, used by simple node hashes.
    V1,
    /// Quoted strings, used by compound hash ranges.
    V2,
}

/// SHA-1 of the UTF-8 bytes, base64 encoded with padding.
pub fn sha1_base64(input: &str) -> String {
    let digest = Sha1::digest(input.as_bytes());
    STANDARD.encode(digest)
}

/// Big-endian IEEE-754 bits as 16 lowercase hex digits.
///
/// Every NaN maps to the canonical quiet NaN so all of them hash alike.
pub fn double_to_hash_string(value: f64) -> String {
    let bits = if value.is_nan() {
        0x7ff8_0000_0000_0000_u64
    } else {
        value.to_bits()
    };
    format!("{bits:016x}")
}

/// Quote a string for the V2 representation, escaping `\` before `"`.
pub fn string_hash_v2(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}
