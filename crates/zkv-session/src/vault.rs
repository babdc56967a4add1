//! Vault operations exposed to the UI layer.
//!
//! A [`VaultSession`] owns the master key for one unlocked vault; there is
//! no global "current key". Every operation that needs the key borrows the
//! session. Previews are child sessions of the vault session, so locking
//! the vault (or its deadline passing) tears down every open preview.

use std::sync::Arc;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use zkv_core::config::ZkvConfig;
use zkv_core::{AccessLevel, DocumentId, DocumentSummary, ZkvError, ZkvResult};
use zkv_crypto::{
    derive_master_key, encrypt_stream, generate_dek, seal_default, wrap_dek,
    AeadAlgorithm, CryptoError, CryptoResult, DataKey, DecryptSession, KdfParameters, MasterKey,
    PlaintextChunk, PlaintextSource, SecretSlot, CANARY_PLAINTEXT,
};
use zkv_render::{
    consume, InteractionKind, InteractionVerdict, RenderError, RenderHandle, RenderOptions,
    SessionMarker, Viewport, ViewportVerdict,
};

use crate::guard::{SessionGuard, SessionId, SessionKind};
use crate::records::{DocumentMetadata, VaultRecord};
use crate::store::DocumentStore;

/// Run the password KDF off the async runtime.
async fn derive(password: &SecretString, params: &KdfParameters) -> ZkvResult<MasterKey> {
    let password = SecretString::from(password.expose_secret().to_owned());
    let params = params.clone();
    tokio::task::spawn_blocking(move || derive_master_key(&password, &params))
        .await
        .map_err(|e| ZkvError::Other(anyhow::anyhow!("KDF task failed: {e}")))?
        .map_err(ZkvError::from)
}

pub struct Vault {
    store: DocumentStore,
    guard: Arc<SessionGuard>,
    config: ZkvConfig,
}

impl Vault {
    pub fn new(store: DocumentStore, config: ZkvConfig) -> ZkvResult<Self> {
        config.validate()?;
        Ok(Self {
            store,
            guard: SessionGuard::new(config.session.clone()),
            config,
        })
    }

    pub fn guard(&self) -> &Arc<SessionGuard> {
        &self.guard
    }

    pub fn store(&self) -> &DocumentStore {
        &self.store
    }

    pub fn config(&self) -> &ZkvConfig {
        &self.config
    }

    fn aead(&self) -> ZkvResult<AeadAlgorithm> {
        self.config
            .stream
            .aead
            .parse()
            .map_err(|e: CryptoError| ZkvError::Config(e.to_string()))
    }

    fn start_session(&self, master: MasterKey) -> ZkvResult<VaultSession> {
        let id = self.guard.begin(SessionKind::Vault, None)?;
        let master = SecretSlot::new("master", master);
        self.guard.track(id, master.clone())?;
        info!(session = %id, "vault unlocked");
        Ok(VaultSession {
            id,
            master,
            guard: self.guard.clone(),
        })
    }

    /// Create a new vault: fresh KDF parameters from `[kdf]` and a canary
    /// sealed under the derived key. The vault is left unlocked.
    pub async fn initialize(&self, password: &SecretString) -> ZkvResult<VaultSession> {
        if self.store.vault_exists().await? {
            return Err(ZkvError::Config(format!(
                "a vault already exists under prefix {:?}",
                self.store.prefix()
            )));
        }

        let params = KdfParameters::from_config(&self.config.kdf)?;
        let master = derive(password, &params).await?;
        let canary = seal_default(&master, self.aead()?)?;
        self.store
            .save_vault(&VaultRecord::new(params, canary))
            .await?;
        info!(kdf = %self.config.kdf.algorithm, "vault initialized");

        self.start_session(master)
    }

    /// Derive the master key and validate it against the canary before it
    /// is used for anything else. A wrong password is
    /// [`ZkvError::Authentication`].
    pub async fn unlock_vault(&self, password: &SecretString) -> ZkvResult<VaultSession> {
        let record = self.store.load_vault().await?;
        let candidate = derive(password, &record.kdf).await?;

        if !record.canary.verify(&candidate, CANARY_PLAINTEXT) {
            warn!("unlock rejected: password did not validate");
            return Err(ZkvError::Authentication);
        }
        self.start_session(candidate)
    }

    /// Decrypt a document into a protected render surface.
    ///
    /// Unsupported or malformed content fails with [`ZkvError::Render`]
    /// carrying the metadata-only fallback view. A tampered document fails
    /// with [`ZkvError::Authentication`] and no plaintext is surfaced.
    pub async fn open_preview(
        &self,
        vault: &VaultSession,
        document: &DocumentId,
        access: AccessLevel,
    ) -> ZkvResult<Preview> {
        self.guard.check(vault.id)?;
        let metadata = self.store.load_metadata(document).await?;
        let summary = metadata.summary();
        if summary.content_class.is_none() {
            return Err(ZkvError::Render {
                reason: format!("unsupported content type: {}", metadata.mime),
                fallback: Box::new(summary),
            });
        }

        let dek = vault.master.with(|master| metadata.unwrap_dek(master))??;
        let id = self
            .guard
            .begin(SessionKind::Preview(access), Some(vault.id))?;

        match self.render(id, &metadata, dek).await {
            Ok(handle) => {
                info!(session = %id, document = %document, ?access, "preview opened");
                Ok(Preview {
                    guard: self.guard.clone(),
                    id,
                    access,
                    handle,
                    document: summary,
                })
            }
            Err(e) => {
                self.guard.end(id);
                warn!(document = %document, error = %e, "preview failed");
                Err(e)
            }
        }
    }

    async fn render(
        &self,
        id: SessionId,
        metadata: &DocumentMetadata,
        dek: DataKey,
    ) -> ZkvResult<RenderHandle> {
        let dek = SecretSlot::new("dek", dek);
        self.guard.track(id, dek.clone())?;

        let source = self.store.open_blob(&metadata.ciphertext_locator).await?;
        let session =
            DecryptSession::open(source, dek, self.config.stream.max_chunk_size).await?;
        if session.header().plaintext_len != metadata.plaintext_len {
            return Err(ZkvError::Format(format!(
                "stream length {} does not match metadata length {}",
                session.header().plaintext_len,
                metadata.plaintext_len
            )));
        }

        let mut chunks = GuardedChunks {
            guard: &self.guard,
            id,
            inner: session,
        };
        let handle = consume(
            &mut chunks,
            &metadata.mime,
            &RenderOptions::from(&self.config.render),
            SessionMarker::from_session_id(id.as_bytes()),
        )
        .await
        .map_err(|e| e.into_zkv(metadata.summary()))?;

        self.guard.track(id, handle.teardown_handle())?;
        Ok(handle)
    }

    /// Tear down a preview's surface and key material now.
    pub fn close_preview(&self, preview: Preview) {
        debug!(session = %preview.id, "closing preview");
        drop(preview);
    }

    /// Expire the vault session and every preview under it. The master key
    /// is destroyed before this returns.
    pub fn lock_vault(&self, vault: VaultSession) {
        self.guard.expire(vault.id);
        info!(session = %vault.id, "vault locked");
    }

    /// Encrypt and upload a document under a fresh DEK.
    pub async fn seal_document(
        &self,
        vault: &VaultSession,
        id: DocumentId,
        mime: &str,
        plaintext: &[u8],
    ) -> ZkvResult<DocumentSummary> {
        self.guard.check(vault.id)?;
        let algorithm = self.aead()?;

        let dek = generate_dek()?;
        let ciphertext = encrypt_stream(&dek, algorithm, self.config.stream.chunk_size, plaintext)?;
        let wrapped = vault
            .master
            .with(|master| wrap_dek(master, &dek, algorithm))??;
        drop(dek);

        let locator = self.store.put_blob(&id, ciphertext).await?;
        let metadata = DocumentMetadata::new(id, mime, wrapped, locator, plaintext.len() as u64);
        self.store.save_metadata(&metadata).await?;

        let summary = metadata.summary();
        if summary.content_class.is_none() {
            debug!(document = %summary.id, mime, "sealed a document with no preview sink");
        }
        info!(document = %summary.id, bytes = plaintext.len(), "document sealed");
        Ok(summary)
    }

    /// Re-key the vault: fresh KDF parameters and canary for `new`, and every
    /// DEK re-wrapped with a fresh nonce. `old` must validate.
    ///
    /// Each document record first gains a pending wrap under the new key
    /// beside its current one. Writing the vault record is the commit
    /// point; the pending wraps are promoted afterwards. Whichever record
    /// is stored when a change stops, its password opens every document.
    pub async fn change_password(
        &self,
        vault: &VaultSession,
        old: &SecretString,
        new: &SecretString,
    ) -> ZkvResult<()> {
        self.guard.check(vault.id)?;
        let record = self.store.load_vault().await?;
        let candidate = derive(old, &record.kdf).await?;
        let valid = record.canary.verify(&candidate, CANARY_PLAINTEXT);
        drop(candidate);
        if !valid {
            warn!("password change rejected: current password did not validate");
            return Err(ZkvError::Authentication);
        }

        let params = KdfParameters::from_config(&self.config.kdf)?;
        let next = SecretSlot::new("next-master", derive(new, &params).await?);
        self.guard.track(vault.id, next.clone())?;
        let algorithm = self.aead()?;
        let canary = next.with(|key| seal_default(key, algorithm))??;

        let originals = self.store.list_metadata().await?;
        let mut written = 0;
        let staged = async {
            let mut staged = Vec::with_capacity(originals.len());
            for original in &originals {
                let metadata = rewrap(vault, &next, original)?;
                self.guard.check(vault.id)?;
                self.store.save_metadata(&metadata).await?;
                written += 1;
                staged.push(metadata);
            }
            self.guard.check(vault.id)?;
            Ok::<_, ZkvError>(staged)
        }
        .await;
        let staged = match staged {
            Ok(staged) => staged,
            Err(e) => {
                next.revoke();
                self.restore(&originals[..written]).await;
                warn!(error = %e, "password change aborted before commit");
                return Err(e);
            }
        };

        // an ambiguous failure here may still have stored the record, so the
        // pending wraps stay in place
        if let Err(e) = self
            .store
            .save_vault(&VaultRecord::new(params, canary))
            .await
        {
            next.revoke();
            warn!(error = %e, "password change failed at commit");
            return Err(e);
        }
        vault.master.replace(next.take()?)?;

        let mut promoted = 0;
        for mut metadata in staged {
            if self.guard.check(vault.id).is_err() {
                break;
            }
            if let Some(pending) = metadata.pending_dek.take() {
                metadata.wrapped_dek = pending;
                match self.store.save_metadata(&metadata).await {
                    Ok(()) => promoted += 1,
                    Err(e) => {
                        warn!(document = %metadata.id, error = %e, "pending key wrap left in place")
                    }
                }
            }
        }
        info!(documents = written, promoted, "password changed");
        Ok(())
    }

    /// Put back document records rewritten by an aborted password change.
    async fn restore(&self, originals: &[DocumentMetadata]) {
        for original in originals {
            if let Err(e) = self.store.save_metadata(original).await {
                warn!(document = %original.id, error = %e, "could not restore document record");
            }
        }
    }

    /// Non-secret summaries of every stored document. Needs no key.
    pub async fn list_documents(&self) -> ZkvResult<Vec<DocumentSummary>> {
        Ok(self
            .store
            .list_metadata()
            .await?
            .iter()
            .map(DocumentMetadata::summary)
            .collect())
    }
}

impl std::fmt::Debug for Vault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vault")
            .field("store", &self.store)
            .field("guard", &self.guard)
            .finish_non_exhaustive()
    }
}

/// An unlocked vault. Holds the only handle to the master key; not `Clone`.
/// Dropping it locks the vault.
pub struct VaultSession {
    id: SessionId,
    master: Arc<SecretSlot<MasterKey>>,
    guard: Arc<SessionGuard>,
}

impl VaultSession {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn is_active(&self) -> bool {
        self.guard.check(self.id).is_ok()
    }

    pub fn expires_at(&self) -> ZkvResult<Instant> {
        Ok(self.guard.check(self.id)?)
    }

    pub fn extend(&self, by: Duration) -> ZkvResult<Instant> {
        Ok(self.guard.extend(self.id, by)?)
    }
}

impl Drop for VaultSession {
    fn drop(&mut self) {
        self.guard.end(self.id);
    }
}

impl std::fmt::Debug for VaultSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultSession")
            .field("id", &self.id)
            .field("master", &self.master)
            .finish()
    }
}

/// An open document preview.
///
/// Every accessor checks the session first; past its deadline the surface
/// has already been scrubbed and the call fails with
/// [`ZkvError::SessionExpired`]. Dropping the preview closes it.
pub struct Preview {
    guard: Arc<SessionGuard>,
    id: SessionId,
    access: AccessLevel,
    handle: RenderHandle,
    document: DocumentSummary,
}

impl Preview {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn access(&self) -> AccessLevel {
        self.access
    }

    pub fn document(&self) -> &DocumentSummary {
        &self.document
    }

    pub fn mime(&self) -> &str {
        self.handle.mime()
    }

    pub fn marker(&self) -> SessionMarker {
        self.handle.marker()
    }

    pub fn expires_at(&self) -> ZkvResult<Instant> {
        Ok(self.guard.check(self.id)?)
    }

    /// Extend the preview, up to its hard ceiling.
    pub fn extend(&self, by: Duration) -> ZkvResult<Instant> {
        Ok(self.guard.extend(self.id, by)?)
    }

    fn live(&self) -> ZkvResult<&RenderHandle> {
        self.guard.check(self.id)?;
        Ok(&self.handle)
    }

    fn render_error(&self, e: RenderError) -> ZkvError {
        e.into_zkv(self.document.clone())
    }

    pub fn with_bytes<R>(&self, f: impl FnOnce(&[u8]) -> R) -> ZkvResult<R> {
        self.live()?
            .with_bytes(f)
            .map_err(|e| self.render_error(e))
    }

    pub fn with_text<R>(&self, f: impl FnOnce(&str) -> R) -> ZkvResult<R> {
        self.live()?
            .with_text(f)
            .map_err(|e| self.render_error(e))
    }

    pub fn with_line<R>(&self, index: usize, f: impl FnOnce(&str) -> R) -> ZkvResult<R> {
        self.live()?
            .with_line(index, f)
            .map_err(|e| self.render_error(e))
    }

    pub fn with_page<R>(&self, index: usize, f: impl FnOnce(&[u8]) -> R) -> ZkvResult<R> {
        self.live()?
            .with_page(index, f)
            .map_err(|e| self.render_error(e))
    }

    pub fn page_count(&self) -> ZkvResult<usize> {
        self.live()?.page_count().map_err(|e| self.render_error(e))
    }

    /// Noise in place of the content; see [`RenderHandle::export`].
    pub fn export(&self) -> ZkvResult<Vec<u8>> {
        self.live()?.export().map_err(|e| self.render_error(e))
    }

    pub fn handle_interaction(&self, kind: InteractionKind) -> InteractionVerdict {
        self.handle.handle_interaction(kind)
    }

    /// Report window and viewport sizes; suspicious deltas close the preview.
    pub fn observe_viewport(&self, viewport: Viewport) -> ViewportVerdict {
        let verdict = self.handle.observe_viewport(viewport);
        if verdict == ViewportVerdict::TornDown {
            self.guard.expire(self.id);
        }
        verdict
    }

    pub fn is_live(&self) -> bool {
        self.guard.check(self.id).is_ok() && self.handle.is_live()
    }

    pub fn close(self) {
        drop(self);
    }
}

impl Drop for Preview {
    fn drop(&mut self) {
        self.guard.end(self.id);
    }
}

impl std::fmt::Debug for Preview {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Preview")
            .field("id", &self.id)
            .field("access", &self.access)
            .field("document", &self.document.id)
            .field("handle", &self.handle)
            .finish()
    }
}

/// Re-wrap a document's DEK under the current master key and add a pending
/// wrap under `next`.
fn rewrap(
    vault: &VaultSession,
    next: &SecretSlot<MasterKey>,
    original: &DocumentMetadata,
) -> ZkvResult<DocumentMetadata> {
    let algorithm = original.wrapped_dek.algorithm;
    let dek = vault.master.with(|master| original.unwrap_dek(master))??;
    let mut metadata = original.clone();
    metadata.wrapped_dek = vault
        .master
        .with(|master| wrap_dek(master, &dek, algorithm))??;
    metadata.pending_dek = Some(next.with(|key| wrap_dek(key, &dek, algorithm))??);
    Ok(metadata)
}

/// Plaintext source that re-checks the preview session before every pull,
/// so an expiry mid-render stops decryption at the next chunk boundary.
struct GuardedChunks<'a, P> {
    guard: &'a SessionGuard,
    id: SessionId,
    inner: P,
}

impl<P: PlaintextSource> PlaintextSource for GuardedChunks<'_, P> {
    fn size_hint(&self) -> Option<u64> {
        self.inner.size_hint()
    }

    async fn next_chunk(&mut self) -> CryptoResult<Option<PlaintextChunk<'_>>> {
        if self.guard.check(self.id).is_err() {
            return Err(CryptoError::Revoked);
        }
        self.inner.next_chunk().await
    }
}
