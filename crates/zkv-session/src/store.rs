//! Document store over OpenDAL.
//!
//! Layout under the configured prefix:
//!
//! ```text
//! {prefix}/vault.json               VaultRecord
//! {prefix}/documents/{id}.json      DocumentMetadata
//! {prefix}/blobs/{id}               ciphertext stream
//! ```

use std::io;

use opendal::Operator;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;
use zkv_core::config::StorageConfig;
use zkv_core::{DocumentId, ZkvError, ZkvResult};
use zkv_crypto::CiphertextSource;

use crate::records::{DocumentMetadata, VaultRecord};

fn storage_error(key: &str, e: opendal::Error) -> ZkvError {
    if e.kind() == opendal::ErrorKind::NotFound {
        ZkvError::NotFound(key.to_string())
    } else {
        ZkvError::Storage(format!("{key}: {e}"))
    }
}

#[derive(Debug, Clone)]
pub struct DocumentStore {
    op: Operator,
    prefix: String,
}

impl DocumentStore {
    pub fn new(op: Operator, prefix: &str) -> Self {
        Self {
            op,
            prefix: prefix.trim_matches('/').to_string(),
        }
    }

    /// Build the operator for the `[storage]` config section.
    pub fn from_config(config: &StorageConfig) -> ZkvResult<Self> {
        let op = match config.backend.as_str() {
            "fs" => {
                let root = config.root.to_str().ok_or_else(|| {
                    ZkvError::Config(format!(
                        "storage.root is not valid UTF-8: {}",
                        config.root.display()
                    ))
                })?;
                // opendal 0.55: builders are consuming
                let builder = opendal::services::Fs::default().root(root);
                Operator::new(builder)
                    .map_err(|e| ZkvError::Storage(format!("creating fs operator: {e}")))?
                    .layer(opendal::layers::LoggingLayer::default())
                    .finish()
            }
            "memory" => Operator::new(opendal::services::Memory::default())
                .map_err(|e| ZkvError::Storage(format!("creating memory operator: {e}")))?
                .layer(opendal::layers::LoggingLayer::default())
                .finish(),
            other => {
                return Err(ZkvError::Config(format!(
                    "unsupported storage backend: {other:?}"
                )))
            }
        };
        Ok(Self::new(op, &config.prefix))
    }

    /// In-memory store, for tests and throwaway vaults.
    pub fn memory(prefix: &str) -> ZkvResult<Self> {
        let op = Operator::new(opendal::services::Memory::default())
            .map_err(|e| ZkvError::Storage(format!("creating memory operator: {e}")))?
            .finish();
        Ok(Self::new(op, prefix))
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn vault_key(&self) -> String {
        format!("{}/vault.json", self.prefix)
    }

    fn documents_dir(&self) -> String {
        format!("{}/documents/", self.prefix)
    }

    fn metadata_key(&self, id: &DocumentId) -> String {
        format!("{}/documents/{id}.json", self.prefix)
    }

    fn blobs_dir(&self) -> String {
        format!("{}/blobs/", self.prefix)
    }

    async fn read_json<T: DeserializeOwned>(&self, key: &str) -> ZkvResult<T> {
        let data = self
            .op
            .read(key)
            .await
            .map_err(|e| storage_error(key, e))?;
        serde_json::from_slice(&data.to_bytes())
            .map_err(|e| ZkvError::Format(format!("{key}: {e}")))
    }

    async fn write_json<T: Serialize>(&self, key: &str, value: &T) -> ZkvResult<()> {
        let json = serde_json::to_vec_pretty(value)
            .map_err(|e| ZkvError::Other(anyhow::anyhow!("serializing {key}: {e}")))?;
        self.op
            .write(key, json)
            .await
            .map_err(|e| storage_error(key, e))?;
        debug!(key, "record written");
        Ok(())
    }

    pub async fn vault_exists(&self) -> ZkvResult<bool> {
        let key = self.vault_key();
        self.op
            .exists(&key)
            .await
            .map_err(|e| storage_error(&key, e))
    }

    pub async fn load_vault(&self) -> ZkvResult<VaultRecord> {
        let record: VaultRecord = self.read_json(&self.vault_key()).await?;
        record.check_version()?;
        Ok(record)
    }

    pub async fn save_vault(&self, record: &VaultRecord) -> ZkvResult<()> {
        self.write_json(&self.vault_key(), record).await
    }

    pub async fn load_metadata(&self, id: &DocumentId) -> ZkvResult<DocumentMetadata> {
        let metadata: DocumentMetadata = self.read_json(&self.metadata_key(id)).await?;
        metadata.check_version()?;
        if &metadata.id != id {
            return Err(ZkvError::Format(format!(
                "metadata for {id} names document {}",
                metadata.id
            )));
        }
        Ok(metadata)
    }

    pub async fn save_metadata(&self, metadata: &DocumentMetadata) -> ZkvResult<()> {
        self.write_json(&self.metadata_key(&metadata.id), metadata)
            .await
    }

    /// All document records, sorted by id. An empty or missing documents
    /// directory yields an empty list.
    pub async fn list_metadata(&self) -> ZkvResult<Vec<DocumentMetadata>> {
        let dir = self.documents_dir();
        let entries = match self.op.list(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == opendal::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(storage_error(&dir, e)),
        };

        let mut records = Vec::new();
        for entry in entries {
            let Some(stem) = entry.name().strip_suffix(".json") else {
                continue;
            };
            let id = DocumentId::new(stem)?;
            records.push(self.load_metadata(&id).await?);
        }
        records.sort_by(|a, b| a.id.as_str().cmp(b.id.as_str()));
        Ok(records)
    }

    /// Upload a ciphertext stream and return its locator.
    pub async fn put_blob(&self, id: &DocumentId, ciphertext: Vec<u8>) -> ZkvResult<String> {
        let locator = format!("{}{id}", self.blobs_dir());
        let len = ciphertext.len();
        self.op
            .write(&locator, ciphertext)
            .await
            .map_err(|e| storage_error(&locator, e))?;
        debug!(locator = %locator, bytes = len, "ciphertext uploaded");
        Ok(locator)
    }

    /// Open a ciphertext blob as a sequential source.
    ///
    /// Locators come from server-supplied metadata, so only locators inside
    /// this store's blob directory are followed.
    pub async fn open_blob(&self, locator: &str) -> ZkvResult<OpendalSource> {
        let inside = locator
            .strip_prefix(&self.blobs_dir())
            .is_some_and(|name| !name.is_empty() && DocumentId::new(name).is_ok());
        if !inside {
            return Err(ZkvError::Format(format!(
                "ciphertext locator outside the blob store: {locator:?}"
            )));
        }

        let len = self
            .op
            .stat(locator)
            .await
            .map_err(|e| storage_error(locator, e))?
            .content_length();
        let reader = self
            .op
            .reader(locator)
            .await
            .map_err(|e| storage_error(locator, e))?;
        Ok(OpendalSource {
            reader,
            offset: 0,
            len,
        })
    }
}

/// Ciphertext source reading a stored blob in ranged windows, one window per
/// [`CiphertextSource::read`] call.
pub struct OpendalSource {
    reader: opendal::Reader,
    offset: u64,
    len: u64,
}

impl OpendalSource {
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl CiphertextSource for OpendalSource {
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() || self.offset >= self.len {
            return Ok(0);
        }
        let end = (self.offset + buf.len() as u64).min(self.len);
        let data = self
            .reader
            .read(self.offset..end)
            .await
            .map_err(io::Error::other)?
            .to_bytes();

        let n = data.len().min(buf.len());
        buf[..n].copy_from_slice(&data[..n]);
        self.offset += n as u64;
        Ok(n)
    }
}

impl std::fmt::Debug for OpendalSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpendalSource")
            .field("offset", &self.offset)
            .field("len", &self.len)
            .finish_non_exhaustive()
    }
}
