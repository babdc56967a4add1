//! Audit marker embedded in export output.

use std::fmt;

const MARKER_CONTEXT: &str = "zkvault 2026-01 session marker";

/// Number of carrier bytes needed to hold a marker (one bit per byte).
pub const MARKER_BITS: usize = 64;

/// 64-bit value tying exported bytes back to the session that produced them.
///
/// Derived from the session id with BLAKE3 in key-derivation mode and
/// written into the least-significant bits of the first 64 bytes of export
/// output. Rendered content itself is never modified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionMarker(u64);

impl SessionMarker {
    pub fn from_session_id(session_id: &[u8]) -> Self {
        let derived = blake3::derive_key(MARKER_CONTEXT, session_id);
        let mut head = [0u8; 8];
        head.copy_from_slice(&derived[..8]);
        Self(u64::from_be_bytes(head))
    }

    pub fn value(self) -> u64 {
        self.0
    }

    /// Write the marker into the low bit of `carrier[0..64]`. Does nothing if
    /// the carrier is shorter than [`MARKER_BITS`].
    pub fn embed(self, carrier: &mut [u8]) {
        if carrier.len() < MARKER_BITS {
            return;
        }
        for (i, byte) in carrier[..MARKER_BITS].iter_mut().enumerate() {
            let bit = ((self.0 >> (MARKER_BITS - 1 - i)) & 1) as u8;
            *byte = (*byte & !1) | bit;
        }
    }

    /// Recover a marker from export output.
    pub fn extract(carrier: &[u8]) -> Option<Self> {
        if carrier.len() < MARKER_BITS {
            return None;
        }
        let value = carrier[..MARKER_BITS]
            .iter()
            .fold(0u64, |acc, byte| (acc << 1) | u64::from(byte & 1));
        Some(Self(value))
    }
}

impl fmt::Display for SessionMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}
