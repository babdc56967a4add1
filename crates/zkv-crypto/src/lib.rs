//! zkv-crypto: client-side key management and streaming decryption for zkvault
//!
//! Key hierarchy:
//! ```text
//! Password ──KDF (Argon2id | PBKDF2-HMAC-SHA256)──▶ Master Key (256-bit, never persisted)
//!   ├── Wrap Key   (HKDF-SHA256, info="zkv/dek-wrap")  wraps per-document DEKs
//!   └── Canary Key (HKDF-SHA256, info="zkv/canary")    seals the password canary
//!
//! Data Encryption Key (per document, 256-bit random)
//!   └── Chunk AEAD: ChaCha20-Poly1305 | AES-256-GCM, 96-bit STREAM nonces,
//!       AAD = stream header
//! ```
//!
//! The server only ever sees KDF parameters, wrapped DEKs, the canary, and
//! ciphertext. Plaintext leaves [`DecryptSession`] one chunk at a time through
//! [`PlaintextChunk`], which borrows the session and scrubs itself on drop.

pub mod canary;
pub mod cipher;
pub mod encoding;
pub mod error;
pub mod kdf;
pub mod keys;
pub mod slot;
pub mod source;
pub mod stream;

pub use canary::{seal_default, verify, ValidationCanary, CANARY_PLAINTEXT};
pub use cipher::AeadAlgorithm;
pub use error::{CryptoError, CryptoResult};
pub use kdf::{derive_master_key, KdfAlgorithm, KdfParameters, MasterKey};
pub use keys::{generate_dek, unwrap_dek, wrap_dek, DataKey, WrappedDek};
pub use slot::SecretSlot;
pub use source::{CiphertextSource, ReaderSource};
pub use stream::{
    encrypt_stream, DecryptSession, PlaintextChunk, PlaintextSource, StreamEncryptor,
    StreamHeader, StreamState,
};

/// Size of every symmetric key in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of an AEAD nonce (96-bit)
pub const NONCE_SIZE: usize = 12;

/// Size of an AEAD authentication tag (128-bit)
pub const TAG_SIZE: usize = 16;

/// Fill `buf` from the operating system's CSPRNG.
pub(crate) fn fill_random(buf: &mut [u8]) -> CryptoResult<()> {
    use rand::RngCore;
    rand::rngs::OsRng
        .try_fill_bytes(buf)
        .map_err(|e| CryptoError::Random(e.to_string()))
}
