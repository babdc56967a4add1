//! AEAD selection and in-place seal/open over both supported ciphers.
//!
//! Only authenticated modes exist here: ChaCha20-Poly1305 and AES-256-GCM,
//! both with 256-bit keys, 96-bit nonces, and 128-bit tags.

use std::fmt;
use std::str::FromStr;

use aes_gcm::Aes256Gcm;
use chacha20poly1305::{
    aead::{AeadInPlace, KeyInit},
    ChaCha20Poly1305,
};
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::error::{CryptoError, CryptoResult};
use crate::{KEY_SIZE, NONCE_SIZE, TAG_SIZE};

/// AEAD identifier recorded in wrapped keys, canaries, and stream headers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AeadAlgorithm {
    #[default]
    #[serde(rename = "chacha20-poly1305")]
    ChaCha20Poly1305,
    #[serde(rename = "aes-256-gcm")]
    Aes256Gcm,
}

impl AeadAlgorithm {
    /// One-byte wire identifier used in stream headers and AAD.
    pub fn id(self) -> u8 {
        match self {
            AeadAlgorithm::ChaCha20Poly1305 => 1,
            AeadAlgorithm::Aes256Gcm => 2,
        }
    }

    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            1 => Some(AeadAlgorithm::ChaCha20Poly1305),
            2 => Some(AeadAlgorithm::Aes256Gcm),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AeadAlgorithm::ChaCha20Poly1305 => "chacha20-poly1305",
            AeadAlgorithm::Aes256Gcm => "aes-256-gcm",
        }
    }
}

impl fmt::Display for AeadAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AeadAlgorithm {
    type Err = CryptoError;

    fn from_str(s: &str) -> CryptoResult<Self> {
        match s {
            "chacha20-poly1305" => Ok(AeadAlgorithm::ChaCha20Poly1305),
            "aes-256-gcm" => Ok(AeadAlgorithm::Aes256Gcm),
            other => Err(CryptoError::Format(format!("unsupported AEAD: {other:?}"))),
        }
    }
}

/// A keyed AEAD instance. Built per operation from a borrowed key so the
/// key schedule does not outlive the key slot that owns the key.
pub(crate) enum Cipher {
    ChaCha20Poly1305(ChaCha20Poly1305),
    Aes256Gcm(Aes256Gcm),
}

impl Cipher {
    pub(crate) fn new(algorithm: AeadAlgorithm, key: &[u8; KEY_SIZE]) -> Self {
        match algorithm {
            AeadAlgorithm::ChaCha20Poly1305 => {
                Cipher::ChaCha20Poly1305(ChaCha20Poly1305::new(key.into()))
            }
            AeadAlgorithm::Aes256Gcm => Cipher::Aes256Gcm(Aes256Gcm::new(key.into())),
        }
    }

    /// Encrypt `buffer` in place and return the detached tag.
    pub(crate) fn seal_in_place(
        &self,
        nonce: &[u8; NONCE_SIZE],
        aad: &[u8],
        buffer: &mut [u8],
    ) -> CryptoResult<[u8; TAG_SIZE]> {
        let tag = match self {
            Cipher::ChaCha20Poly1305(c) => c.encrypt_in_place_detached(nonce.into(), aad, buffer),
            Cipher::Aes256Gcm(c) => c.encrypt_in_place_detached(nonce.into(), aad, buffer),
        }
        .map_err(|_| CryptoError::Format("AEAD encryption failed".into()))?;

        let mut out = [0u8; TAG_SIZE];
        out.copy_from_slice(&tag);
        Ok(out)
    }

    /// Decrypt `buffer` in place, verifying `tag`.
    ///
    /// Fails closed: on a tag mismatch `buffer` is zeroed before returning,
    /// so no unauthenticated bytes survive (AES-GCM decrypts before it
    /// compares tags).
    pub(crate) fn open_in_place(
        &self,
        nonce: &[u8; NONCE_SIZE],
        aad: &[u8],
        buffer: &mut [u8],
        tag: &[u8; TAG_SIZE],
    ) -> CryptoResult<()> {
        let result = match self {
            Cipher::ChaCha20Poly1305(c) => {
                c.decrypt_in_place_detached(nonce.into(), aad, buffer, tag.into())
            }
            Cipher::Aes256Gcm(c) => c.decrypt_in_place_detached(nonce.into(), aad, buffer, tag.into()),
        };

        result.map_err(|_| {
            buffer.zeroize();
            CryptoError::Authentication
        })
    }
}
