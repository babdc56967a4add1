//! Chunked AEAD stream: encryptor and pull-based decryptor.
//!
//! Stream format:
//! ```text
//! header (28 bytes, big-endian)
//!   magic "ZKVS" | version u8 | algorithm u8 | reserved u16 | chunk_size u32
//!   | plaintext_len u64 | nonce prefix (7 bytes) | reserved u8
//! header tag (16 bytes)       AEAD(empty), nonce flag 2
//! chunk 0 .. chunk N-1        ciphertext(min(chunk_size, remaining)) || tag(16)
//! ```
//!
//! Every AEAD call uses the header bytes as AAD and a nonce of
//! `prefix(7) || counter u32 || flag u8` (0 = chunk, 1 = final chunk,
//! 2 = header). Chunks cannot be reordered, dropped, or appended without a
//! tag failure, and the authenticated `plaintext_len` fixes the chunk count.

use std::future::Future;
use std::ops::Deref;
use std::sync::Arc;

use tracing::{debug, warn};
use zeroize::{Zeroize, Zeroizing};

use crate::cipher::{AeadAlgorithm, Cipher};
use crate::error::{CryptoError, CryptoResult};
use crate::keys::DataKey;
use crate::slot::SecretSlot;
use crate::source::{read_full, CiphertextSource};
use crate::{NONCE_SIZE, TAG_SIZE};

pub const STREAM_MAGIC: [u8; 4] = *b"ZKVS";
pub const STREAM_VERSION: u8 = 1;
pub const HEADER_LEN: usize = 28;
pub const NONCE_PREFIX_LEN: usize = 7;

const FLAG_CHUNK: u8 = 0;
const FLAG_FINAL: u8 = 1;
const FLAG_HEADER: u8 = 2;

/// Highest number of chunks a u32 counter can address.
const MAX_CHUNKS: u64 = u32::MAX as u64 + 1;

/// Parsed stream header. Non-secret.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamHeader {
    pub algorithm: AeadAlgorithm,
    pub chunk_size: u32,
    pub plaintext_len: u64,
    pub nonce_prefix: [u8; NONCE_PREFIX_LEN],
}

impl StreamHeader {
    pub fn chunk_count(&self) -> u64 {
        self.plaintext_len.div_ceil(u64::from(self.chunk_size))
    }

    /// Total size of the encoded stream, header and tags included.
    pub fn ciphertext_len(&self) -> u64 {
        (HEADER_LEN + TAG_SIZE) as u64 + self.plaintext_len + self.chunk_count() * TAG_SIZE as u64
    }

    /// Plaintext length of chunk `index`.
    fn chunk_len(&self, index: u64) -> usize {
        let start = index * u64::from(self.chunk_size);
        let remaining = self.plaintext_len.saturating_sub(start);
        remaining.min(u64::from(self.chunk_size)) as usize
    }

    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0..4].copy_from_slice(&STREAM_MAGIC);
        out[4] = STREAM_VERSION;
        out[5] = self.algorithm.id();
        // 6..8 reserved
        out[8..12].copy_from_slice(&self.chunk_size.to_be_bytes());
        out[12..20].copy_from_slice(&self.plaintext_len.to_be_bytes());
        out[20..27].copy_from_slice(&self.nonce_prefix);
        // 27 reserved
        out
    }

    /// Parse and validate header bytes. Authentication happens separately,
    /// against the header tag.
    pub fn parse(bytes: &[u8; HEADER_LEN], max_chunk_size: u32) -> CryptoResult<Self> {
        if bytes[0..4] != STREAM_MAGIC {
            return Err(CryptoError::Format("not a zkv stream (bad magic)".into()));
        }
        if bytes[4] != STREAM_VERSION {
            return Err(CryptoError::Format(format!(
                "unsupported stream version {}",
                bytes[4]
            )));
        }
        let algorithm = AeadAlgorithm::from_id(bytes[5]).ok_or_else(|| {
            CryptoError::Format(format!("unsupported stream algorithm id {}", bytes[5]))
        })?;
        if bytes[6] != 0 || bytes[7] != 0 || bytes[27] != 0 {
            return Err(CryptoError::Format("non-zero reserved header bytes".into()));
        }

        let chunk_size = u32::from_be_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
        if chunk_size == 0 || chunk_size > max_chunk_size {
            return Err(CryptoError::Format(format!(
                "chunk size {chunk_size} outside 1..={max_chunk_size}"
            )));
        }

        let mut len = [0u8; 8];
        len.copy_from_slice(&bytes[12..20]);
        let mut nonce_prefix = [0u8; NONCE_PREFIX_LEN];
        nonce_prefix.copy_from_slice(&bytes[20..27]);

        let header = Self {
            algorithm,
            chunk_size,
            plaintext_len: u64::from_be_bytes(len),
            nonce_prefix,
        };
        if header.chunk_count() > MAX_CHUNKS {
            return Err(CryptoError::Format("chunk counter overflow".into()));
        }
        Ok(header)
    }
}

fn stream_nonce(prefix: &[u8; NONCE_PREFIX_LEN], counter: u32, flag: u8) -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    nonce[..NONCE_PREFIX_LEN].copy_from_slice(prefix);
    nonce[NONCE_PREFIX_LEN..11].copy_from_slice(&counter.to_be_bytes());
    nonce[11] = flag;
    nonce
}

fn chunk_nonce(header: &StreamHeader, index: u64) -> CryptoResult<[u8; NONCE_SIZE]> {
    let counter = u32::try_from(index)
        .map_err(|_| CryptoError::Format("chunk counter overflow".into()))?;
    let flag = if index + 1 == header.chunk_count() {
        FLAG_FINAL
    } else {
        FLAG_CHUNK
    };
    Ok(stream_nonce(&header.nonce_prefix, counter, flag))
}

// ── Encryption ────────────────────────────────────────────────────────────

/// Seals a plaintext of known length into the chunked stream format.
pub struct StreamEncryptor {
    cipher: Cipher,
    header: StreamHeader,
    header_bytes: [u8; HEADER_LEN],
    header_tag: [u8; TAG_SIZE],
    next_index: u64,
}

impl StreamEncryptor {
    pub fn new(
        dek: &DataKey,
        algorithm: AeadAlgorithm,
        chunk_size: u32,
        plaintext_len: u64,
    ) -> CryptoResult<Self> {
        if chunk_size == 0 {
            return Err(CryptoError::Format("chunk size must be non-zero".into()));
        }

        let mut nonce_prefix = [0u8; NONCE_PREFIX_LEN];
        crate::fill_random(&mut nonce_prefix)?;

        let header = StreamHeader {
            algorithm,
            chunk_size,
            plaintext_len,
            nonce_prefix,
        };
        if header.chunk_count() > MAX_CHUNKS {
            return Err(CryptoError::Format("chunk counter overflow".into()));
        }

        let cipher = Cipher::new(algorithm, dek.as_bytes());
        let header_bytes = header.to_bytes();
        let header_tag = cipher.seal_in_place(
            &stream_nonce(&nonce_prefix, 0, FLAG_HEADER),
            &header_bytes,
            &mut [],
        )?;

        Ok(Self {
            cipher,
            header,
            header_bytes,
            header_tag,
            next_index: 0,
        })
    }

    pub fn stream_header(&self) -> &StreamHeader {
        &self.header
    }

    /// Encoded header followed by its tag; written before any chunk.
    pub fn header(&self) -> [u8; HEADER_LEN + TAG_SIZE] {
        let mut out = [0u8; HEADER_LEN + TAG_SIZE];
        out[..HEADER_LEN].copy_from_slice(&self.header_bytes);
        out[HEADER_LEN..].copy_from_slice(&self.header_tag);
        out
    }

    /// Seal the next chunk. `plaintext` must be exactly the expected length
    /// for this position (`chunk_size`, or the remainder for the final chunk).
    pub fn seal_chunk(&mut self, plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
        if self.is_finished() {
            return Err(CryptoError::Format("all chunks already sealed".into()));
        }
        let expected = self.header.chunk_len(self.next_index);
        if plaintext.len() != expected {
            return Err(CryptoError::Format(format!(
                "chunk {} must be {expected} bytes, got {}",
                self.next_index,
                plaintext.len()
            )));
        }

        let nonce = chunk_nonce(&self.header, self.next_index)?;
        let mut out = Vec::with_capacity(expected + TAG_SIZE);
        out.extend_from_slice(plaintext);
        let tag = self
            .cipher
            .seal_in_place(&nonce, &self.header_bytes, &mut out)?;
        out.extend_from_slice(&tag);

        self.next_index += 1;
        Ok(out)
    }

    pub fn is_finished(&self) -> bool {
        self.next_index == self.header.chunk_count()
    }
}

/// Encrypt a complete plaintext into a single stream buffer.
pub fn encrypt_stream(
    dek: &DataKey,
    algorithm: AeadAlgorithm,
    chunk_size: u32,
    plaintext: &[u8],
) -> CryptoResult<Vec<u8>> {
    let mut encryptor = StreamEncryptor::new(dek, algorithm, chunk_size, plaintext.len() as u64)?;

    let mut out = Vec::with_capacity(encryptor.stream_header().ciphertext_len() as usize);
    out.extend_from_slice(&encryptor.header());
    for chunk in plaintext.chunks(chunk_size as usize) {
        out.extend_from_slice(&encryptor.seal_chunk(chunk)?);
    }

    debug!(
        bytes = plaintext.len(),
        chunks = encryptor.stream_header().chunk_count(),
        algorithm = %algorithm,
        "stream encrypted"
    );
    Ok(out)
}

// ── Decryption ────────────────────────────────────────────────────────────

/// Lifecycle of a [`DecryptSession`]. A session that has not been opened
/// does not exist, so there is no idle variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Header verified, no chunk delivered yet.
    Opened,
    Streaming,
    /// Every chunk delivered and end of input confirmed.
    Exhausted,
    /// Stopped on an error; holds no key and no plaintext.
    Failed,
}

/// One chunk of plaintext, borrowed from the session's single buffer.
///
/// The session cannot produce another chunk while this value is alive, and
/// the bytes are zeroed when it drops.
pub struct PlaintextChunk<'a> {
    bytes: &'a mut [u8],
    index: u64,
    last: bool,
}

impl PlaintextChunk<'_> {
    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn is_last(&self) -> bool {
        self.last
    }
}

impl Deref for PlaintextChunk<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &*self.bytes
    }
}

impl Drop for PlaintextChunk<'_> {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for PlaintextChunk<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaintextChunk")
            .field("index", &self.index)
            .field("len", &self.bytes.len())
            .field("last", &self.last)
            .finish()
    }
}

/// A lazy, forward-only sequence of plaintext chunks.
pub trait PlaintextSource: Send {
    /// Total plaintext length, if known up front.
    fn size_hint(&self) -> Option<u64>;

    /// Produce the next chunk, or `None` at end of stream. Once `None` has
    /// been returned every later call returns `None` again.
    fn next_chunk(
        &mut self,
    ) -> impl Future<Output = CryptoResult<Option<PlaintextChunk<'_>>>> + Send;
}

/// Pull-based decryption of one ciphertext stream.
///
/// Holds at most one chunk of plaintext. The buffer is zeroed at the start
/// of every pull, when a chunk is dropped, on failure, and on drop. The DEK
/// lives in a [`SecretSlot`] shared with the session guard; it is revoked
/// when the stream ends, fails, or the session is dropped.
pub struct DecryptSession<S> {
    source: S,
    key: Option<Arc<SecretSlot<DataKey>>>,
    header: StreamHeader,
    header_bytes: [u8; HEADER_LEN],
    next_index: u64,
    state: StreamState,
    buffer: Zeroizing<Vec<u8>>,
    /// Set while a read is in flight; still set on entry means the previous
    /// call was cancelled mid-chunk.
    pending: bool,
}

impl<S: CiphertextSource> DecryptSession<S> {
    /// Read and authenticate the stream header.
    pub async fn open(
        mut source: S,
        key: Arc<SecretSlot<DataKey>>,
        max_chunk_size: u32,
    ) -> CryptoResult<Self> {
        let mut raw = [0u8; HEADER_LEN + TAG_SIZE];
        let filled = match read_full(&mut source, &mut raw).await {
            Ok(n) => n,
            Err(e) => {
                key.revoke();
                return Err(e.into());
            }
        };
        if filled < raw.len() {
            key.revoke();
            return Err(CryptoError::Format("truncated stream header".into()));
        }

        let mut header_bytes = [0u8; HEADER_LEN];
        header_bytes.copy_from_slice(&raw[..HEADER_LEN]);
        let mut tag = [0u8; TAG_SIZE];
        tag.copy_from_slice(&raw[HEADER_LEN..]);

        let header = match StreamHeader::parse(&header_bytes, max_chunk_size) {
            Ok(h) => h,
            Err(e) => {
                key.revoke();
                return Err(e);
            }
        };

        let nonce = stream_nonce(&header.nonce_prefix, 0, FLAG_HEADER);
        let verified = key
            .with(|k| {
                Cipher::new(header.algorithm, k.as_bytes()).open_in_place(
                    &nonce,
                    &header_bytes,
                    &mut [],
                    &tag,
                )
            })
            .and_then(|r| r);
        if let Err(e) = verified {
            key.revoke();
            return Err(e);
        }

        let capacity = header.plaintext_len.min(u64::from(header.chunk_size)) as usize + TAG_SIZE;
        debug!(
            chunks = header.chunk_count(),
            chunk_size = header.chunk_size,
            algorithm = %header.algorithm,
            "decrypt session opened"
        );

        Ok(Self {
            source,
            key: Some(key),
            header,
            header_bytes,
            next_index: 0,
            state: StreamState::Opened,
            buffer: Zeroizing::new(vec![0u8; capacity]),
            pending: false,
        })
    }

    pub fn header(&self) -> &StreamHeader {
        &self.header
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Number of chunks delivered so far.
    pub fn position(&self) -> u64 {
        self.next_index
    }

    /// True if the plaintext buffer holds no non-zero byte.
    pub fn is_scrubbed(&self) -> bool {
        self.buffer.iter().all(|&b| b == 0)
    }

    fn release_key(&mut self) {
        if let Some(key) = self.key.take() {
            key.revoke();
        }
    }

    fn fail(&mut self, err: CryptoError) -> CryptoError {
        self.buffer.as_mut_slice().zeroize();
        self.release_key();
        self.state = StreamState::Failed;
        self.pending = false;
        warn!(position = self.next_index, error = %err, "decrypt session failed");
        err
    }

    /// Read, authenticate, and decrypt chunk `index` into the buffer.
    async fn decrypt_next(&mut self, index: u64) -> CryptoResult<usize> {
        let nonce = chunk_nonce(&self.header, index)?;
        let len = self.header.chunk_len(index);

        self.pending = true;
        let filled = read_full(&mut self.source, &mut self.buffer[..len + TAG_SIZE]).await?;
        self.pending = false;
        if filled < len + TAG_SIZE {
            return Err(CryptoError::Format(format!("truncated stream at chunk {index}")));
        }

        let mut tag = [0u8; TAG_SIZE];
        tag.copy_from_slice(&self.buffer[len..len + TAG_SIZE]);
        self.buffer[len..len + TAG_SIZE].zeroize();

        let key = self.key.as_ref().ok_or(CryptoError::StreamFailed)?;
        let algorithm = self.header.algorithm;
        let aad = &self.header_bytes;
        let buf = &mut self.buffer[..len];
        key.with(|k| Cipher::new(algorithm, k.as_bytes()).open_in_place(&nonce, aad, buf, &tag))??;

        Ok(len)
    }

    /// Confirm nothing follows the final chunk.
    async fn finish(&mut self) -> CryptoResult<()> {
        let mut extra = [0u8; 1];
        self.pending = true;
        let n = self.source.read(&mut extra).await?;
        self.pending = false;
        if n != 0 {
            return Err(CryptoError::Format("trailing bytes after final chunk".into()));
        }
        Ok(())
    }
}

impl<S: CiphertextSource> PlaintextSource for DecryptSession<S> {
    fn size_hint(&self) -> Option<u64> {
        Some(self.header.plaintext_len)
    }

    async fn next_chunk(&mut self) -> CryptoResult<Option<PlaintextChunk<'_>>> {
        self.buffer.as_mut_slice().zeroize();

        if self.pending {
            return Err(self.fail(CryptoError::StreamFailed));
        }
        match self.state {
            StreamState::Failed => return Err(CryptoError::StreamFailed),
            StreamState::Exhausted => return Ok(None),
            StreamState::Opened | StreamState::Streaming => {}
        }

        let index = self.next_index;
        if index == self.header.chunk_count() {
            self.release_key();
            if let Err(e) = self.finish().await {
                return Err(self.fail(e));
            }
            self.state = StreamState::Exhausted;
            debug!(chunks = index, "decrypt session exhausted");
            return Ok(None);
        }

        let len = match self.decrypt_next(index).await {
            Ok(len) => len,
            Err(e) => return Err(self.fail(e)),
        };

        self.next_index += 1;
        self.state = StreamState::Streaming;
        let last = self.next_index == self.header.chunk_count();
        if last {
            self.release_key();
        }

        Ok(Some(PlaintextChunk {
            bytes: &mut self.buffer[..len],
            index,
            last,
        }))
    }
}

impl<S> Drop for DecryptSession<S> {
    fn drop(&mut self) {
        self.buffer.as_mut_slice().zeroize();
        if let Some(key) = self.key.take() {
            key.revoke();
        }
    }
}

impl<S> std::fmt::Debug for DecryptSession<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecryptSession")
            .field("header", &self.header)
            .field("position", &self.next_index)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::ReaderSource;
    use crate::KEY_SIZE;
    use proptest::prelude::*;
    use std::io::Cursor;

    const MAX_CHUNK: u32 = 1 << 20;

    fn dek() -> DataKey {
        DataKey::from_bytes([0x24; KEY_SIZE])
    }

    fn slot() -> Arc<SecretSlot<DataKey>> {
        SecretSlot::new("dek", dek())
    }

    async fn open(ct: Vec<u8>) -> CryptoResult<DecryptSession<ReaderSource<Cursor<Vec<u8>>>>> {
        DecryptSession::open(ReaderSource::new(Cursor::new(ct)), slot(), MAX_CHUNK).await
    }

    async fn decrypt_all<P: PlaintextSource>(session: &mut P) -> CryptoResult<Vec<u8>> {
        let mut out = Vec::new();
        while let Some(chunk) = session.next_chunk().await? {
            out.extend_from_slice(&chunk);
        }
        Ok(out)
    }

    fn plaintext(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[tokio::test]
    async fn test_roundtrip_both_algorithms() {
        for alg in [AeadAlgorithm::ChaCha20Poly1305, AeadAlgorithm::Aes256Gcm] {
            let data = plaintext(1000);
            let ct = encrypt_stream(&dek(), alg, 64, &data).unwrap();
            assert_eq!(ct.len(), HEADER_LEN + TAG_SIZE + 1000 + 16 * TAG_SIZE);

            let mut session = open(ct).await.unwrap();
            assert_eq!(session.header().algorithm, alg);
            assert_eq!(decrypt_all(&mut session).await.unwrap(), data);
            assert_eq!(session.state(), StreamState::Exhausted);
        }
    }

    #[tokio::test]
    async fn test_chunk_order_and_idempotent_end() {
        let data = plaintext(90);
        let ct = encrypt_stream(&dek(), AeadAlgorithm::default(), 30, &data).unwrap();
        let mut session = open(ct).await.unwrap();
        assert_eq!(session.state(), StreamState::Opened);

        for i in 0..3u64 {
            let chunk = session.next_chunk().await.unwrap().unwrap();
            assert_eq!(chunk.index(), i);
            assert_eq!(chunk.is_last(), i == 2);
            assert_eq!(&chunk[..], &data[i as usize * 30..(i as usize + 1) * 30]);
        }
        assert!(session.next_chunk().await.unwrap().is_none());
        assert!(session.next_chunk().await.unwrap().is_none());
        assert_eq!(session.state(), StreamState::Exhausted);
    }

    #[tokio::test]
    async fn test_empty_plaintext() {
        let ct = encrypt_stream(&dek(), AeadAlgorithm::default(), 16, b"").unwrap();
        assert_eq!(ct.len(), HEADER_LEN + TAG_SIZE);
        let mut session = open(ct).await.unwrap();
        assert!(session.next_chunk().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_chunk_scrubbed_on_drop() {
        let data = vec![0xC5u8; 48];
        let ct = encrypt_stream(&dek(), AeadAlgorithm::default(), 16, &data).unwrap();
        let mut session = open(ct).await.unwrap();

        {
            let chunk = session.next_chunk().await.unwrap().unwrap();
            assert!(chunk.iter().all(|&b| b == 0xC5));
        }
        assert!(session.is_scrubbed());
    }

    #[tokio::test]
    async fn test_key_released_after_final_chunk() {
        let key = slot();
        let ct = encrypt_stream(&dek(), AeadAlgorithm::default(), 16, &plaintext(20)).unwrap();
        let mut session =
            DecryptSession::open(ReaderSource::new(Cursor::new(ct)), key.clone(), MAX_CHUNK)
                .await
                .unwrap();

        drop(session.next_chunk().await.unwrap());
        assert!(!key.is_revoked());
        drop(session.next_chunk().await.unwrap());
        assert!(key.is_revoked(), "DEK must not outlive the last chunk");
    }

    #[tokio::test]
    async fn test_drop_revokes_key() {
        let key = slot();
        let ct = encrypt_stream(&dek(), AeadAlgorithm::default(), 16, &plaintext(64)).unwrap();
        let session =
            DecryptSession::open(ReaderSource::new(Cursor::new(ct)), key.clone(), MAX_CHUNK)
                .await
                .unwrap();
        drop(session);
        assert!(key.is_revoked());
    }

    #[tokio::test]
    async fn test_wrong_key_fails_at_header() {
        let ct = encrypt_stream(&dek(), AeadAlgorithm::default(), 16, &plaintext(64)).unwrap();
        let other = SecretSlot::new("dek", DataKey::from_bytes([0x25; KEY_SIZE]));
        let err = DecryptSession::open(ReaderSource::new(Cursor::new(ct)), other.clone(), MAX_CHUNK)
            .await
            .unwrap_err();
        assert!(matches!(err, CryptoError::Authentication));
        assert!(other.is_revoked());
    }

    #[tokio::test]
    async fn test_tampered_chunk_fails_closed() {
        let data = plaintext(90);
        let mut ct = encrypt_stream(&dek(), AeadAlgorithm::default(), 30, &data).unwrap();
        // flip a byte inside chunk 1
        let chunk1 = HEADER_LEN + TAG_SIZE + (30 + TAG_SIZE) + 5;
        ct[chunk1] ^= 0x40;

        let mut session = open(ct).await.unwrap();
        drop(session.next_chunk().await.unwrap().unwrap());
        let err = session.next_chunk().await.unwrap_err();
        assert!(matches!(err, CryptoError::Authentication));
        assert_eq!(session.state(), StreamState::Failed);
        assert!(session.is_scrubbed());

        assert!(matches!(
            session.next_chunk().await.unwrap_err(),
            CryptoError::StreamFailed
        ));
    }

    #[tokio::test]
    async fn test_swapped_chunks_rejected() {
        let data = plaintext(60);
        let ct = encrypt_stream(&dek(), AeadAlgorithm::default(), 20, &data).unwrap();
        let body = HEADER_LEN + TAG_SIZE;
        let frame = 20 + TAG_SIZE;

        let mut swapped = ct.clone();
        swapped[body..body + frame].copy_from_slice(&ct[body + frame..body + 2 * frame]);
        swapped[body + frame..body + 2 * frame].copy_from_slice(&ct[body..body + frame]);

        let mut session = open(swapped).await.unwrap();
        assert!(matches!(
            session.next_chunk().await.unwrap_err(),
            CryptoError::Authentication
        ));
    }

    #[tokio::test]
    async fn test_truncated_stream() {
        let ct = encrypt_stream(&dek(), AeadAlgorithm::default(), 30, &plaintext(90)).unwrap();

        let mut session = open(ct[..ct.len() - 10].to_vec()).await.unwrap();
        let err = decrypt_all(&mut session).await.unwrap_err();
        assert!(matches!(err, CryptoError::Format(_)));

        let err = open(ct[..HEADER_LEN].to_vec()).await.unwrap_err();
        assert!(matches!(err, CryptoError::Format(_)));
    }

    #[tokio::test]
    async fn test_trailing_bytes_rejected() {
        let mut ct = encrypt_stream(&dek(), AeadAlgorithm::default(), 30, &plaintext(60)).unwrap();
        ct.push(0);
        let mut session = open(ct).await.unwrap();
        let err = decrypt_all(&mut session).await.unwrap_err();
        assert!(matches!(err, CryptoError::Format(_)));
        assert_eq!(session.state(), StreamState::Failed);
    }

    #[tokio::test]
    async fn test_malformed_headers() {
        let ct = encrypt_stream(&dek(), AeadAlgorithm::default(), 4096, &plaintext(10)).unwrap();

        let mut bad_magic = ct.clone();
        bad_magic[0] = b'X';
        assert!(matches!(open(bad_magic).await.unwrap_err(), CryptoError::Format(_)));

        let mut bad_version = ct.clone();
        bad_version[4] = 9;
        assert!(matches!(open(bad_version).await.unwrap_err(), CryptoError::Format(_)));

        let mut bad_alg = ct.clone();
        bad_alg[5] = 0;
        assert!(matches!(open(bad_alg).await.unwrap_err(), CryptoError::Format(_)));

        let mut reserved = ct.clone();
        reserved[27] = 1;
        assert!(matches!(open(reserved).await.unwrap_err(), CryptoError::Format(_)));

        let err = DecryptSession::open(ReaderSource::new(Cursor::new(ct)), slot(), 1024)
            .await
            .unwrap_err();
        assert!(matches!(err, CryptoError::Format(_)), "chunk size above maximum");
    }

    #[tokio::test]
    async fn test_header_length_field_is_authenticated() {
        let mut ct = encrypt_stream(&dek(), AeadAlgorithm::default(), 30, &plaintext(90)).unwrap();
        // claim 60 bytes instead of 90
        ct[19] = 60;
        assert!(matches!(open(ct).await.unwrap_err(), CryptoError::Authentication));
    }

    #[tokio::test]
    async fn test_revoked_key_stops_stream() {
        let key = slot();
        let ct = encrypt_stream(&dek(), AeadAlgorithm::default(), 16, &plaintext(64)).unwrap();
        let mut session =
            DecryptSession::open(ReaderSource::new(Cursor::new(ct)), key.clone(), MAX_CHUNK)
                .await
                .unwrap();
        drop(session.next_chunk().await.unwrap());

        key.revoke();
        assert!(matches!(
            session.next_chunk().await.unwrap_err(),
            CryptoError::Revoked
        ));
        assert_eq!(session.state(), StreamState::Failed);
    }

    /// Serves `data` but parks forever once `stall_at` bytes have been read.
    struct StallingSource {
        data: Vec<u8>,
        pos: usize,
        stall_at: usize,
    }

    impl CiphertextSource for StallingSource {
        async fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.pos >= self.stall_at {
                std::future::pending::<()>().await;
            }
            let n = buf
                .len()
                .min(self.stall_at - self.pos)
                .min(self.data.len() - self.pos);
            buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }

    #[tokio::test]
    async fn test_cancelled_pull_fails_session() {
        let ct = encrypt_stream(&dek(), AeadAlgorithm::default(), 30, &plaintext(90)).unwrap();
        let stall_at = HEADER_LEN + TAG_SIZE + (30 + TAG_SIZE) + 10;
        let source = StallingSource {
            data: ct,
            pos: 0,
            stall_at,
        };
        let mut session = DecryptSession::open(source, slot(), MAX_CHUNK).await.unwrap();
        drop(session.next_chunk().await.unwrap().unwrap());

        assert!(tokio::time::timeout(
            std::time::Duration::from_millis(20),
            session.next_chunk(),
        )
        .await
        .is_err());

        assert!(matches!(
            session.next_chunk().await.unwrap_err(),
            CryptoError::StreamFailed
        ));
        assert!(session.is_scrubbed());
        assert_eq!(session.state(), StreamState::Failed);
    }

    #[test]
    fn test_encryptor_rejects_wrong_chunk_lengths() {
        let mut enc = StreamEncryptor::new(&dek(), AeadAlgorithm::default(), 10, 25).unwrap();
        assert_eq!(enc.stream_header().chunk_count(), 3);
        assert!(enc.seal_chunk(&[0u8; 9]).is_err());
        enc.seal_chunk(&[0u8; 10]).unwrap();
        enc.seal_chunk(&[0u8; 10]).unwrap();
        assert!(enc.seal_chunk(&[0u8; 10]).is_err());
        enc.seal_chunk(&[0u8; 5]).unwrap();
        assert!(enc.is_finished());
        assert!(enc.seal_chunk(&[]).is_err());

        assert!(StreamEncryptor::new(&dek(), AeadAlgorithm::default(), 0, 1).is_err());
    }

    #[test]
    fn test_nonce_prefix_is_random() {
        let a = StreamEncryptor::new(&dek(), AeadAlgorithm::default(), 10, 1).unwrap();
        let b = StreamEncryptor::new(&dek(), AeadAlgorithm::default(), 10, 1).unwrap();
        assert_ne!(a.stream_header().nonce_prefix, b.stream_header().nonce_prefix);
    }

    fn block_on<F: Future>(f: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap()
            .block_on(f)
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_roundtrip_any_chunking(len in 0usize..400, chunk_size in 1u32..80) {
            let data = plaintext(len);
            let ct = encrypt_stream(&dek(), AeadAlgorithm::default(), chunk_size, &data).unwrap();
            let out = block_on(async {
                let mut session = open(ct).await?;
                decrypt_all(&mut session).await
            }).unwrap();
            prop_assert_eq!(out, data);
        }

        #[test]
        fn prop_any_bit_flip_never_yields_plaintext(pos in 0usize..(HEADER_LEN + TAG_SIZE + 90 + 3 * TAG_SIZE), bit in 0u8..8) {
            let data = plaintext(90);
            let mut ct = encrypt_stream(&dek(), AeadAlgorithm::default(), 30, &data).unwrap();
            ct[pos] ^= 1 << bit;

            let result = block_on(async {
                let mut session = open(ct).await?;
                decrypt_all(&mut session).await
            });
            prop_assert!(result.is_err());
        }
    }
}
