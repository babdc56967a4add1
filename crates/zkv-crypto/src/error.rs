use thiserror::Error;
use zkv_core::ZkvError;

pub type CryptoResult<T> = Result<T, CryptoError>;

#[derive(Debug, Error)]
pub enum CryptoError {
    /// Bad KDF parameters or a policy violation.
    #[error("key derivation error: {0}")]
    Kdf(String),

    /// An AEAD tag did not verify. Deliberately carries no detail: a wrong
    /// key and tampered ciphertext are indistinguishable.
    #[error("authentication failed")]
    Authentication,

    /// Malformed header, metadata, or stream framing.
    #[error("format error: {0}")]
    Format(String),

    #[error("secure random source unavailable: {0}")]
    Random(String),

    /// The key slot was torn down by the session guard.
    #[error("key material has been revoked")]
    Revoked,

    /// The stream failed earlier; it must be reopened from the start.
    #[error("decrypt session has failed and must be reopened")]
    StreamFailed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<CryptoError> for ZkvError {
    fn from(e: CryptoError) -> Self {
        match e {
            CryptoError::Kdf(msg) => ZkvError::Kdf(msg),
            CryptoError::Authentication => ZkvError::Authentication,
            CryptoError::Format(msg) => ZkvError::Format(msg),
            CryptoError::StreamFailed => {
                ZkvError::Format("decrypt session failed and must be reopened".into())
            }
            CryptoError::Revoked => ZkvError::SessionExpired,
            CryptoError::Random(msg) => {
                ZkvError::Other(anyhow::anyhow!("secure random source unavailable: {msg}"))
            }
            CryptoError::Io(err) => ZkvError::Io(err),
        }
    }
}
