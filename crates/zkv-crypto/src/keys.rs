//! Key hierarchy: master key → purpose subkeys, DEK generation, DEK wrapping

use hkdf::Hkdf;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, Zeroizing};

use crate::cipher::{AeadAlgorithm, Cipher};
use crate::encoding::b64_array;
use crate::error::{CryptoError, CryptoResult};
use crate::kdf::MasterKey;
use crate::{KEY_SIZE, NONCE_SIZE, TAG_SIZE};

/// Current version of the wrapped-DEK format.
pub const WRAPPED_DEK_VERSION: u32 = 1;

const DEK_WRAP_INFO: &[u8] = b"zkv/dek-wrap";
const CANARY_INFO: &[u8] = b"zkv/canary";

/// A per-document 256-bit data encryption key. Zeroized on drop.
///
/// Deliberately not `Clone`: a decrypt session takes ownership of the one
/// copy, so revoking that session's slot destroys the key.
pub struct DataKey {
    bytes: [u8; KEY_SIZE],
}

impl DataKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub(crate) fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for DataKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl PartialEq for DataKey {
    fn eq(&self, other: &Self) -> bool {
        self.bytes[..].ct_eq(&other.bytes[..]).into()
    }
}

impl Eq for DataKey {}

impl std::fmt::Debug for DataKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Generate a random 256-bit DEK from the OS CSPRNG.
pub fn generate_dek() -> CryptoResult<DataKey> {
    let mut bytes = [0u8; KEY_SIZE];
    crate::fill_random(&mut bytes)?;
    Ok(DataKey::from_bytes(bytes))
}

/// Subkey used to wrap DEKs.
pub(crate) fn derive_wrap_key(master: &MasterKey) -> CryptoResult<Zeroizing<[u8; KEY_SIZE]>> {
    hkdf_derive(master.as_bytes(), DEK_WRAP_INFO)
}

/// Subkey used to seal the password canary.
pub(crate) fn derive_canary_key(master: &MasterKey) -> CryptoResult<Zeroizing<[u8; KEY_SIZE]>> {
    hkdf_derive(master.as_bytes(), CANARY_INFO)
}

/// HKDF-SHA256 key derivation with a domain-specific info string.
fn hkdf_derive(ikm: &[u8; KEY_SIZE], info: &[u8]) -> CryptoResult<Zeroizing<[u8; KEY_SIZE]>> {
    let hkdf = Hkdf::<Sha256>::new(None, ikm);
    let mut okm = Zeroizing::new([0u8; KEY_SIZE]);
    hkdf.expand(info, &mut okm[..])
        .map_err(|e| CryptoError::Kdf(format!("HKDF expand failed: {e}")))?;
    Ok(okm)
}

/// A DEK encrypted under the master key's wrap subkey.
///
/// Safe to persist and to hand to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrappedDek {
    pub version: u32,
    pub algorithm: AeadAlgorithm,
    #[serde(with = "b64_array")]
    pub nonce: [u8; NONCE_SIZE],
    #[serde(with = "b64_array")]
    pub ciphertext: [u8; KEY_SIZE],
    #[serde(with = "b64_array")]
    pub tag: [u8; TAG_SIZE],
}

/// Associated data binding a wrapped DEK to its format version and AEAD.
fn wrap_aad(version: u32, algorithm: AeadAlgorithm) -> [u8; 12] {
    let mut aad = [0u8; 12];
    aad[..7].copy_from_slice(b"zkv/dek");
    aad[7..11].copy_from_slice(&version.to_be_bytes());
    aad[11] = algorithm.id();
    aad
}

/// Wrap (encrypt) a DEK under the master key with a fresh random nonce.
pub fn wrap_dek(
    master: &MasterKey,
    dek: &DataKey,
    algorithm: AeadAlgorithm,
) -> CryptoResult<WrappedDek> {
    let wrap_key = derive_wrap_key(master)?;
    let cipher = Cipher::new(algorithm, &wrap_key);

    let mut nonce = [0u8; NONCE_SIZE];
    crate::fill_random(&mut nonce)?;

    let mut ciphertext = *dek.as_bytes();
    let aad = wrap_aad(WRAPPED_DEK_VERSION, algorithm);
    let tag = match cipher.seal_in_place(&nonce, &aad, &mut ciphertext) {
        Ok(tag) => tag,
        Err(e) => {
            ciphertext.zeroize();
            return Err(e);
        }
    };

    Ok(WrappedDek {
        version: WRAPPED_DEK_VERSION,
        algorithm,
        nonce,
        ciphertext,
        tag,
    })
}

/// Unwrap (decrypt) a DEK.
///
/// A wrong master key and a tampered record both surface as
/// [`CryptoError::Authentication`]; no partial key is ever returned.
pub fn unwrap_dek(master: &MasterKey, wrapped: &WrappedDek) -> CryptoResult<DataKey> {
    if wrapped.version != WRAPPED_DEK_VERSION {
        return Err(CryptoError::Format(format!(
            "unsupported wrapped key version {}",
            wrapped.version
        )));
    }

    let wrap_key = derive_wrap_key(master)?;
    let cipher = Cipher::new(wrapped.algorithm, &wrap_key);

    let mut key_bytes = wrapped.ciphertext;
    let aad = wrap_aad(wrapped.version, wrapped.algorithm);
    // open_in_place zeroes key_bytes on failure
    cipher.open_in_place(&wrapped.nonce, &aad, &mut key_bytes, &wrapped.tag)?;

    Ok(DataKey::from_bytes(key_bytes))
}
