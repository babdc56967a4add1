//! Password validation canary.
//!
//! At vault creation a known plaintext is sealed under a subkey of the
//! master key and stored beside the KDF parameters. Unlocking derives a
//! candidate key and opens the canary: a wrong password fails here, before
//! any DEK unwrap is attempted.

use serde::{Deserialize, Serialize};
use subtle::{Choice, ConstantTimeEq};
use tracing::debug;
use zeroize::Zeroizing;

use crate::cipher::{AeadAlgorithm, Cipher};
use crate::encoding::{b64, b64_array};
use crate::error::CryptoResult;
use crate::kdf::MasterKey;
use crate::keys::derive_canary_key;
use crate::{NONCE_SIZE, TAG_SIZE};

/// Current version of the canary format.
pub const CANARY_VERSION: u32 = 1;

/// Plaintext sealed into new canaries.
pub const CANARY_PLAINTEXT: &[u8] = b"zkvault password canary v1";

/// A sealed known value used to validate a candidate master key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationCanary {
    pub version: u32,
    pub algorithm: AeadAlgorithm,
    #[serde(with = "b64_array")]
    pub nonce: [u8; NONCE_SIZE],
    #[serde(with = "b64")]
    pub ciphertext: Vec<u8>,
    #[serde(with = "b64_array")]
    pub tag: [u8; TAG_SIZE],
}

fn canary_aad(version: u32, algorithm: AeadAlgorithm) -> [u8; 15] {
    let mut aad = [0u8; 15];
    aad[..10].copy_from_slice(b"zkv/canary");
    aad[10..14].copy_from_slice(&version.to_be_bytes());
    aad[14] = algorithm.id();
    aad
}

impl ValidationCanary {
    /// Seal `expected` under the canary subkey of `master`.
    pub fn seal(
        master: &MasterKey,
        expected: &[u8],
        algorithm: AeadAlgorithm,
    ) -> CryptoResult<Self> {
        let key = derive_canary_key(master)?;
        let cipher = Cipher::new(algorithm, &key);

        let mut nonce = [0u8; NONCE_SIZE];
        crate::fill_random(&mut nonce)?;

        let mut ciphertext = expected.to_vec();
        let tag = cipher.seal_in_place(
            &nonce,
            &canary_aad(CANARY_VERSION, algorithm),
            &mut ciphertext,
        )?;

        Ok(Self {
            version: CANARY_VERSION,
            algorithm,
            nonce,
            ciphertext,
            tag,
        })
    }

    /// Check whether `candidate` is the key this canary was sealed with.
    ///
    /// Never errors: every failure (wrong key, tampering, unsupported
    /// version, length mismatch) is `false`. Decryption and comparison both
    /// always run so the outcome is not observable through timing.
    pub fn verify(&self, candidate: &MasterKey, expected: &[u8]) -> bool {
        let Ok(key) = derive_canary_key(candidate) else {
            return false;
        };
        let cipher = Cipher::new(self.algorithm, &key);

        let mut buffer = Zeroizing::new(self.ciphertext.clone());
        let opened = cipher
            .open_in_place(
                &self.nonce,
                &canary_aad(self.version, self.algorithm),
                &mut buffer,
                &self.tag,
            )
            .is_ok();

        // unequal lengths compare false
        let matches = buffer.as_slice().ct_eq(expected);
        let version_ok = Choice::from((self.version == CANARY_VERSION) as u8);
        let ok: bool = (Choice::from(opened as u8) & matches & version_ok).into();

        debug!(valid = ok, "canary checked");
        ok
    }
}

/// Free-function form of [`ValidationCanary::verify`].
pub fn verify(candidate: &MasterKey, canary: &ValidationCanary, expected: &[u8]) -> bool {
    canary.verify(candidate, expected)
}

/// Seal a canary with the default plaintext.
pub fn seal_default(master: &MasterKey, algorithm: AeadAlgorithm) -> CryptoResult<ValidationCanary> {
    ValidationCanary::seal(master, CANARY_PLAINTEXT, algorithm)
}
