use thiserror::Error;
use zkv_core::{DocumentSummary, ZkvError};
use zkv_crypto::CryptoError;

pub type RenderResult<T> = Result<T, RenderError>;

#[derive(Debug, Error)]
pub enum RenderError {
    /// The decrypted bytes are not valid for the declared content type.
    #[error("malformed content: {0}")]
    Malformed(String),

    #[error("content exceeds the {max_pages}-page ceiling")]
    PageLimit { max_pages: u32 },

    #[error("content exceeds the {limit}-byte text ceiling")]
    TextLimit { limit: u64 },

    #[error("unsupported content type: {0}")]
    Unsupported(String),

    #[error("render surface has been torn down")]
    TornDown,

    /// The plaintext source failed (decryption, revocation, I/O).
    #[error(transparent)]
    Source(#[from] CryptoError),
}

impl RenderError {
    /// Normalize into the user-facing taxonomy. Content failures become
    /// [`ZkvError::Render`] carrying `fallback`; source failures keep their
    /// cryptographic category; a torn-down surface means the session expired.
    pub fn into_zkv(self, fallback: DocumentSummary) -> ZkvError {
        match self {
            RenderError::Source(e) => e.into(),
            RenderError::TornDown => ZkvError::SessionExpired,
            other => ZkvError::Render {
                reason: other.to_string(),
                fallback: Box::new(fallback),
            },
        }
    }
}
