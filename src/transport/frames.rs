// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Message framing over WebSocket text frames.
//!
//! Messages longer than one frame are preceded by a frame holding only the
//! frame count:
//!
//! ```text
//! "3"  "{\"t\":\"d\",..."  "...."  "...}"
//! ```
//!
//! A bare `"0"` in either direction is a keepalive.

use serde_json::Value;

use crate::error::TransportError;

/// Largest text frame sent, in characters.
pub const MAX_FRAME_SIZE: usize = 16_384;

/// Frames announcing a count are never longer than this.
const MAX_COUNT_FRAME_LEN: usize = 6;

pub const KEEPALIVE_FRAME: &str = "0";

/// Split serialized text into frames of at most `max_frame` characters,
/// prefixed by a count frame when more than one is needed.
pub fn encode_frames(text: &str, max_frame: usize) -> Vec<String> {
    let max_frame = max_frame.max(1);
    let mut frames = Vec::new();
    let mut current = String::new();
    let mut count = 0;
    for c in text.chars() {
        if count == max_frame {
            frames.push(std::mem::take(&mut current));
            count = 0;
        }
        current.push(c);
        count += 1;
    }
    if !current.is_empty() || frames.is_empty() {
        frames.push(current);
    }
    if frames.len() > 1 {
        frames.insert(0, frames.len().to_string());
    }
    frames
}

/// Reassembles incoming frames into JSON messages.
#[derive(Debug, Default)]
pub struct FrameReader {
    remaining: usize,
    buffer: String,
}

impl FrameReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_buffering(&self) -> bool {
        self.remaining > 0
    }

    /// Feed one frame. Returns a message once all of its frames have arrived.
    pub fn push(&mut self, frame: &str) -> Result<Option<Value>, TransportError> {
        if !self.is_buffering() {
            if frame.chars().count() <= MAX_COUNT_FRAME_LEN {
                if let Ok(count) = frame.parse::<i64>() {
                    if count < 0 {
                        return Err(TransportError::InvalidFrameCount(count));
                    }
                    self.remaining = count as usize;
                    return Ok(None);
                }
            }
            self.remaining = 1;
        }
        self.buffer.push_str(frame);
        self.remaining -= 1;
        if self.remaining > 0 {
            return Ok(None);
        }
        let text = std::mem::take(&mut self.buffer);
        let message: Value = serde_json::from_str(&text)?;
        if !message.is_object() {
            return Err(TransportError::NotAnObject);
        }
        Ok(Some(message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_small_message_is_one_frame() {
        assert_eq!(encode_frames("{\"a\":1}", MAX_FRAME_SIZE), vec!["{\"a\":1}"]);
    }

    #[test]
    fn test_exact_multiple_has_no_trailing_frame() {
        let text = "x".repeat(20);
        let frames = encode_frames(&text, 10);
        assert_eq!(frames, vec!["2".to_owned(), "x".repeat(10), "x".repeat(10)]);
    }

    #[test]
    fn test_large_message_round_trip() {
        let message = json!({"t": "d", "d": {"b": "y".repeat(40_000)}});
        let frames = encode_frames(&message.to_string(), MAX_FRAME_SIZE);
        assert_eq!(frames[0], "3");
        let mut reader = FrameReader::new();
        let mut out = None;
        for frame in &frames {
            out = reader.push(frame).unwrap();
        }
        assert_eq!(out, Some(message));
        assert!(!reader.is_buffering());
    }

    #[test]
    fn test_multibyte_split_on_char_boundary() {
        let frames = encode_frames("ééé", 2);
        assert_eq!(frames, vec!["2", "éé", "é"]);
    }

    #[test]
    fn test_keepalive_ignored() {
        let mut reader = FrameReader::new();
        assert_eq!(reader.push("0").unwrap(), None);
        assert!(!reader.is_buffering());
        assert_eq!(reader.push("{\"t\":\"d\"}").unwrap(), Some(json!({"t": "d"})));
    }

    #[test]
    fn test_negative_count_is_rejected() {
        let mut reader = FrameReader::new();
        assert!(matches!(reader.push("-3"), Err(TransportError::InvalidFrameCount(-3))));
        assert!(!reader.is_buffering());
        assert_eq!(reader.push("{\"t\":\"d\"}").unwrap(), Some(json!({"t": "d"})));
    }

    #[test]
    fn test_buffered_frames_are_not_counts() {
        let mut reader = FrameReader::new();
        assert_eq!(reader.push("2").unwrap(), None);
        assert_eq!(reader.push("{\"n\":").unwrap(), None);
        assert_eq!(reader.push("12}").unwrap(), Some(json!({"n": 12})));
    }

    #[test]
    fn test_malformed_json_errors() {
        let mut reader = FrameReader::new();
        assert!(matches!(reader.push("{not json"), Err(TransportError::Json(_))));
        assert!(matches!(reader.push("[1,2,3,4,5,6]"), Err(TransportError::NotAnObject)));
    }
}
