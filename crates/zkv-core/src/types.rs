use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{ZkvError, ZkvResult};

/// Maximum length of a document identifier.
pub const MAX_DOCUMENT_ID_LEN: usize = 128;

/// Identifier of a stored document.
///
/// Restricted to `[A-Za-z0-9._-]` so it can be used as a storage path
/// component without escaping.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DocumentId(String);

impl DocumentId {
    pub fn new(id: impl Into<String>) -> ZkvResult<Self> {
        let id = id.into();
        if id.is_empty() || id.len() > MAX_DOCUMENT_ID_LEN {
            return Err(ZkvError::Format(format!(
                "document id must be 1..={MAX_DOCUMENT_ID_LEN} characters"
            )));
        }
        if id.starts_with('.') {
            return Err(ZkvError::Format("document id must not start with '.'".into()));
        }
        if !id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        {
            return Err(ZkvError::Format(format!("invalid document id: {id:?}")));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for DocumentId {
    type Error = ZkvError;

    fn try_from(value: String) -> ZkvResult<Self> {
        Self::new(value)
    }
}

impl From<DocumentId> for String {
    fn from(id: DocumentId) -> Self {
        id.0
    }
}

/// How decrypted content is rendered. Resolved once from the declared MIME
/// type; each class maps to exactly one sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentClass {
    /// Images and paginated documents, painted onto a protected surface.
    Raster,
    /// Text-like content, held in a read-only sanitized view.
    Structured,
}

impl ContentClass {
    /// Resolve the content class for a MIME type. Parameters such as
    /// `; charset=utf-8` are ignored. Returns `None` for unsupported types.
    pub fn from_mime(mime: &str) -> Option<Self> {
        let essence = mime
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        match essence.as_str() {
            "application/pdf" => Some(ContentClass::Raster),
            s if s.starts_with("image/") => Some(ContentClass::Raster),
            "application/json" | "application/xml" | "application/xhtml+xml" => {
                Some(ContentClass::Structured)
            }
            s if s.starts_with("text/") => Some(ContentClass::Structured),
            _ => None,
        }
    }
}

impl fmt::Display for ContentClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContentClass::Raster => f.write_str("raster"),
            ContentClass::Structured => f.write_str("structured"),
        }
    }
}

/// Access level of a preview session; selects its TTL and hard ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessLevel {
    ViewOnly,
    FullAccess,
}

/// Non-secret description of a document, used for listings and as the
/// metadata-only fallback view when rendering fails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentSummary {
    pub id: DocumentId,
    pub mime: String,
    pub plaintext_len: u64,
    pub content_class: Option<ContentClass>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_id_validation() {
        assert!(DocumentId::new("report-2026.pdf").is_ok());
        assert!(DocumentId::new("a_b-c.1").is_ok());
        assert!(DocumentId::new("").is_err());
        assert!(DocumentId::new("../etc/passwd").is_err());
        assert!(DocumentId::new(".hidden").is_err());
        assert!(DocumentId::new("with space").is_err());
        assert!(DocumentId::new("x".repeat(MAX_DOCUMENT_ID_LEN + 1)).is_err());
    }

    #[test]
    fn test_document_id_serde_rejects_invalid() {
        let ok: DocumentId = parse_toml_id("\"doc-1\"").unwrap();
        assert_eq!(ok.as_str(), "doc-1");
        assert!(parse_toml_id("\"a/b\"").is_err());
    }

    fn parse_toml_id(quoted: &str) -> Result<DocumentId, toml::de::Error> {
        #[derive(Deserialize)]
        struct Wrapper {
            id: DocumentId,
        }
        toml::from_str::<Wrapper>(&format!("id = {quoted}")).map(|w| w.id)
    }

    #[test]
    fn test_content_class_from_mime() {
        assert_eq!(
            ContentClass::from_mime("application/pdf"),
            Some(ContentClass::Raster)
        );
        assert_eq!(ContentClass::from_mime("image/png"), Some(ContentClass::Raster));
        assert_eq!(
            ContentClass::from_mime("text/plain; charset=utf-8"),
            Some(ContentClass::Structured)
        );
        assert_eq!(
            ContentClass::from_mime("Text/HTML"),
            Some(ContentClass::Structured)
        );
        assert_eq!(
            ContentClass::from_mime("application/json"),
            Some(ContentClass::Structured)
        );
        assert_eq!(ContentClass::from_mime("application/octet-stream"), None);
        assert_eq!(ContentClass::from_mime(""), None);
    }
}
