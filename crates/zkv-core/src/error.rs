use thiserror::Error;

use crate::types::DocumentSummary;

pub type ZkvResult<T> = Result<T, ZkvError>;

/// User-facing error categories.
///
/// Cryptographic failures are normalized before they reach this type: a bad
/// password, a wrong key, and a tampered tag all surface as
/// [`ZkvError::Authentication`].
#[derive(Debug, Error)]
pub enum ZkvError {
    #[error("key derivation error: {0}")]
    Kdf(String),

    #[error("incorrect password")]
    Authentication,

    #[error("document is corrupted or unsupported: {0}")]
    Format(String),

    /// Decryption succeeded but the content could not be rendered. The caller
    /// can fall back to the metadata-only view in `fallback`.
    #[error("render error: {reason}")]
    Render {
        reason: String,
        fallback: Box<DocumentSummary>,
    },

    #[error("session expired, please reopen")]
    SessionExpired,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ZkvError {
    /// Fatal errors halt the current operation; retrying will not help.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ZkvError::Kdf(_) | ZkvError::Format(_))
    }

    /// Errors the caller can recover from at the call site (retry the
    /// password, show the metadata view, re-authenticate).
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ZkvError::Authentication | ZkvError::Render { .. } | ZkvError::SessionExpired
        )
    }

    /// Metadata-only view to show when rendering failed.
    pub fn fallback(&self) -> Option<&DocumentSummary> {
        match self {
            ZkvError::Render { fallback, .. } => Some(fallback),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ContentClass, DocumentId};

    #[test]
    fn test_error_categories() {
        assert!(ZkvError::Kdf("weak".into()).is_fatal());
        assert!(ZkvError::Format("bad magic".into()).is_fatal());
        assert!(!ZkvError::Authentication.is_fatal());
        assert!(ZkvError::Authentication.is_recoverable());
        assert!(ZkvError::SessionExpired.is_recoverable());
        assert!(!ZkvError::Storage("down".into()).is_recoverable());
    }

    #[test]
    fn test_render_error_carries_fallback() {
        let summary = DocumentSummary {
            id: DocumentId::new("report-1").unwrap(),
            mime: "application/pdf".into(),
            plaintext_len: 1024,
            content_class: Some(ContentClass::Raster),
        };
        let err = ZkvError::Render {
            reason: "truncated page".into(),
            fallback: Box::new(summary),
        };

        assert!(err.is_recoverable());
        assert_eq!(err.fallback().unwrap().plaintext_len, 1024);
        assert_eq!(err.to_string(), "render error: truncated page");
    }

    #[test]
    fn test_authentication_message_is_generic() {
        assert_eq!(ZkvError::Authentication.to_string(), "incorrect password");
    }
}
