//! Structured/text sink: sanitized, read-only UTF-8 view.
//!
//! UTF-8 is validated incrementally so a multi-byte character may straddle a
//! chunk boundary. Control characters other than tab, LF and CR are replaced
//! with U+FFFD before they reach the surface.

use std::ops::Range;

use zeroize::Zeroize;

use crate::buffer::SecureBuffer;
use crate::error::{RenderError, RenderResult};
use crate::sink::RenderSink;
use crate::surface::Layout;

const REPLACEMENT: &str = "\u{FFFD}";

pub(crate) struct TextSink {
    buffer: SecureBuffer,
    /// Incomplete trailing UTF-8 sequence from the previous chunk.
    carry: [u8; 4],
    carry_len: usize,
    consumed: u64,
    max_bytes: u64,
}

impl TextSink {
    pub(crate) fn new(max_bytes: u64) -> Self {
        Self {
            buffer: SecureBuffer::with_capacity(0),
            carry: [0u8; 4],
            carry_len: 0,
            consumed: 0,
            max_bytes,
        }
    }

    fn too_large(&self) -> RenderError {
        RenderError::TextLimit {
            limit: self.max_bytes,
        }
    }

    fn push_sanitized(&mut self, text: &str) {
        let mut run_start = 0;
        for (i, c) in text.char_indices() {
            if c.is_control() && !matches!(c, '\t' | '\n' | '\r') {
                self.buffer.extend_from_slice(text[run_start..i].as_bytes());
                self.buffer.extend_from_slice(REPLACEMENT.as_bytes());
                run_start = i + c.len_utf8();
            }
        }
        self.buffer.extend_from_slice(text[run_start..].as_bytes());
    }

    /// Validate and append `bytes`; an incomplete sequence at the end is
    /// carried into the next call.
    fn push_bytes(&mut self, bytes: &[u8]) -> RenderResult<()> {
        match std::str::from_utf8(bytes) {
            Ok(text) => {
                self.push_sanitized(text);
                Ok(())
            }
            Err(e) => {
                let valid = e.valid_up_to();
                // valid_up_to guarantees this prefix is UTF-8
                let text = std::str::from_utf8(&bytes[..valid])
                    .map_err(|err| RenderError::Malformed(err.to_string()))?;
                self.push_sanitized(text);

                match e.error_len() {
                    Some(_) => Err(self.invalid_at(valid)),
                    None => {
                        let tail = &bytes[valid..];
                        self.carry[..tail.len()].copy_from_slice(tail);
                        self.carry_len = tail.len();
                        Ok(())
                    }
                }
            }
        }
    }

    fn invalid_at(&self, offset: usize) -> RenderError {
        RenderError::Malformed(format!(
            "invalid UTF-8 at byte {}",
            self.consumed + offset as u64
        ))
    }

    /// Complete a carried sequence using the head of `chunk`. Returns how
    /// many bytes of `chunk` were used.
    fn complete_carry(&mut self, chunk: &[u8]) -> RenderResult<usize> {
        let width = utf8_width(self.carry[0]);
        if width == 0 {
            return Err(self.invalid_at(0));
        }
        let take = (width - self.carry_len).min(chunk.len());
        self.carry[self.carry_len..self.carry_len + take].copy_from_slice(&chunk[..take]);
        self.carry_len += take;

        if self.carry_len < width {
            return Ok(take);
        }

        let mut seq = self.carry;
        let len = self.carry_len;
        self.carry.zeroize();
        self.carry_len = 0;
        let result = match std::str::from_utf8(&seq[..len]) {
            Ok(s) => {
                self.push_sanitized(s);
                Ok(take)
            }
            Err(_) => Err(self.invalid_at(0)),
        };
        seq.zeroize();
        result
    }
}

/// Expected length of a UTF-8 sequence from its first byte; 0 if invalid.
fn utf8_width(first: u8) -> usize {
    match first {
        0x00..=0x7F => 1,
        0xC2..=0xDF => 2,
        0xE0..=0xEF => 3,
        0xF0..=0xF4 => 4,
        _ => 0,
    }
}

fn line_index(text: &[u8]) -> Vec<Range<usize>> {
    if text.is_empty() {
        return Vec::new();
    }
    let mut lines = Vec::new();
    let mut start = 0;
    for (i, &b) in text.iter().enumerate() {
        if b == b'\n' {
            lines.push(start..i);
            start = i + 1;
        }
    }
    if start < text.len() {
        lines.push(start..text.len());
    }
    lines
}

impl RenderSink for TextSink {
    fn begin(&mut self, size_hint: Option<u64>) -> RenderResult<()> {
        if let Some(len) = size_hint {
            if len > self.max_bytes {
                return Err(self.too_large());
            }
            let capacity = usize::try_from(len).map_err(|_| self.too_large())?;
            self.buffer = SecureBuffer::with_capacity(capacity);
        }
        Ok(())
    }

    fn write(&mut self, chunk: &[u8]) -> RenderResult<()> {
        if self.consumed + chunk.len() as u64 > self.max_bytes {
            return Err(self.too_large());
        }
        let mut rest = chunk;
        if self.carry_len > 0 {
            let used = self.complete_carry(rest)?;
            rest = &rest[used..];
            self.consumed += used as u64;
        }
        if !rest.is_empty() {
            self.push_bytes(rest)?;
            self.consumed += rest.len() as u64;
        }
        Ok(())
    }

    fn finish(mut self) -> RenderResult<(SecureBuffer, Layout)> {
        if self.carry_len > 0 {
            self.carry.zeroize();
            return Err(RenderError::Malformed(
                "truncated UTF-8 sequence at end of content".into(),
            ));
        }
        let lines = line_index(self.buffer.as_slice());
        let buffer = std::mem::replace(&mut self.buffer, SecureBuffer::with_capacity(0));
        Ok((buffer, Layout::Text { lines }))
    }
}

impl Drop for TextSink {
    fn drop(&mut self) {
        self.carry.zeroize();
    }
}
