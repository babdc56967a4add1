//! Growable plaintext buffer that never leaves stale copies behind.

use rand::RngCore;
use zeroize::Zeroizing;

/// Byte buffer for rendered plaintext.
///
/// `Vec` growth copies into a new allocation and frees the old one without
/// clearing it. `SecureBuffer` grows by hand instead: the old allocation is
/// a `Zeroizing<Vec<u8>>` and is wiped (full capacity) as it drops.
pub(crate) struct SecureBuffer {
    bytes: Zeroizing<Vec<u8>>,
}

impl SecureBuffer {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            bytes: Zeroizing::new(Vec::with_capacity(capacity)),
        }
    }

    pub(crate) fn extend_from_slice(&mut self, data: &[u8]) {
        let needed = self.bytes.len() + data.len();
        if needed > self.bytes.capacity() {
            let capacity = needed.max(self.bytes.capacity() * 2);
            let mut grown = Zeroizing::new(Vec::with_capacity(capacity));
            grown.extend_from_slice(&self.bytes);
            self.bytes = grown;
        }
        self.bytes.extend_from_slice(data);
    }

    pub(crate) fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    pub(crate) fn len(&self) -> usize {
        self.bytes.len()
    }

    pub(crate) fn capacity(&self) -> usize {
        self.bytes.capacity()
    }

    /// Overwrite every byte with random data.
    pub(crate) fn scramble(&mut self) {
        rand::thread_rng().fill_bytes(&mut self.bytes[..]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_growth_preserves_content() {
        let mut buf = SecureBuffer::with_capacity(4);
        buf.extend_from_slice(b"abc");
        buf.extend_from_slice(b"defgh");
        buf.extend_from_slice(b"ijklmnopq");
        assert_eq!(buf.as_slice(), b"abcdefghijklmnopq");
        assert!(buf.capacity() >= buf.len());
    }

    #[test]
    fn test_reserved_capacity_is_not_reallocated() {
        let mut buf = SecureBuffer::with_capacity(64);
        let before = buf.as_slice().as_ptr();
        for _ in 0..8 {
            buf.extend_from_slice(&[1u8; 8]);
        }
        assert_eq!(buf.as_slice().as_ptr(), before);
    }

    #[test]
    fn test_scramble_replaces_content() {
        let mut buf = SecureBuffer::with_capacity(256);
        buf.extend_from_slice(&[0xA5; 256]);
        buf.scramble();
        assert_eq!(buf.len(), 256);
        assert!(buf.as_slice().iter().filter(|&&b| b == 0xA5).count() < 32);
    }
}
