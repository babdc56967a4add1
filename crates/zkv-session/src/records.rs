//! Server-visible, non-secret records.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use zkv_core::{ContentClass, DocumentId, DocumentSummary, ZkvError, ZkvResult};
use zkv_crypto::{
    unwrap_dek, CryptoError, CryptoResult, DataKey, KdfParameters, MasterKey, ValidationCanary,
    WrappedDek,
};

pub const VAULT_RECORD_VERSION: u32 = 1;
pub const DOCUMENT_METADATA_VERSION: u32 = 1;

/// Per-user record: how to derive the master key and how to check it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultRecord {
    pub version: u32,
    pub kdf: KdfParameters,
    pub canary: ValidationCanary,
    /// Unix seconds
    pub created_at: u64,
}

impl VaultRecord {
    pub fn new(kdf: KdfParameters, canary: ValidationCanary) -> Self {
        Self {
            version: VAULT_RECORD_VERSION,
            kdf,
            canary,
            created_at: now_unix(),
        }
    }

    pub(crate) fn check_version(&self) -> ZkvResult<()> {
        if self.version != VAULT_RECORD_VERSION {
            return Err(ZkvError::Format(format!(
                "unsupported vault record version {}",
                self.version
            )));
        }
        Ok(())
    }
}

/// Per-document record pointing at the ciphertext blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub version: u32,
    pub id: DocumentId,
    pub mime: String,
    pub wrapped_dek: WrappedDek,
    /// The DEK wrapped under the next master key while a password change
    /// is in flight. Promoted into `wrapped_dek` once the change commits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_dek: Option<WrappedDek>,
    pub ciphertext_locator: String,
    pub plaintext_len: u64,
    /// Unix seconds
    pub created_at: u64,
}

impl DocumentMetadata {
    pub fn new(
        id: DocumentId,
        mime: &str,
        wrapped_dek: WrappedDek,
        ciphertext_locator: String,
        plaintext_len: u64,
    ) -> Self {
        Self {
            version: DOCUMENT_METADATA_VERSION,
            id,
            mime: mime.to_string(),
            wrapped_dek,
            pending_dek: None,
            ciphertext_locator,
            plaintext_len,
            created_at: now_unix(),
        }
    }

    pub fn summary(&self) -> DocumentSummary {
        DocumentSummary {
            id: self.id.clone(),
            mime: self.mime.clone(),
            plaintext_len: self.plaintext_len,
            content_class: ContentClass::from_mime(&self.mime),
        }
    }

    /// Unwrap the DEK under `master`, trying the pending wrap when the
    /// primary one does not authenticate.
    pub fn unwrap_dek(&self, master: &MasterKey) -> CryptoResult<DataKey> {
        match unwrap_dek(master, &self.wrapped_dek) {
            Err(CryptoError::Authentication) => match &self.pending_dek {
                Some(pending) => unwrap_dek(master, pending),
                None => Err(CryptoError::Authentication),
            },
            other => other,
        }
    }

    pub(crate) fn check_version(&self) -> ZkvResult<()> {
        if self.version != DOCUMENT_METADATA_VERSION {
            return Err(ZkvError::Format(format!(
                "unsupported document metadata version {}",
                self.version
            )));
        }
        Ok(())
    }
}

pub(crate) fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
