//! Key derivation: password → master key
//!
//! Argon2id is the default; PBKDF2-HMAC-SHA256 is the fallback for runtimes
//! where Argon2id is unavailable. Parameters are non-secret and persisted
//! next to the wrapped keys; once a key has been derived against them they
//! are immutable (changing them means re-wrapping every DEK).

use std::num::NonZeroU32;

use argon2::{Algorithm, Argon2, Params, Version};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::debug;
use zeroize::Zeroize;
use zkv_core::config::KdfConfig;

use crate::encoding::b64;
use crate::error::{CryptoError, CryptoResult};
use crate::KEY_SIZE;

/// Current version of the persisted KDF parameter format.
pub const KDF_VERSION: u32 = 1;

/// Policy floor for PBKDF2-HMAC-SHA256 iterations.
pub const MIN_PBKDF2_ITERATIONS: u32 = 100_000;

/// Policy floor for Argon2id memory cost (19 MiB, in KiB).
pub const MIN_ARGON2_MEM_KIB: u32 = 19 * 1024;

pub const MIN_SALT_LEN: usize = 16;
pub const MAX_SALT_LEN: usize = 32;

/// A 256-bit master key derived from the user's password.
///
/// Never serialized and never cloned: the unlocked vault owns exactly one,
/// and document operations borrow it to unwrap their own DEK. Zeroized on
/// drop.
pub struct MasterKey {
    bytes: [u8; KEY_SIZE],
}

impl MasterKey {
    /// Construct from raw bytes. Intended for test vectors; production keys
    /// come from [`derive_master_key`].
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub(crate) fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for MasterKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// KDF algorithm and its cost parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KdfAlgorithm {
    Argon2id {
        /// Memory cost in KiB
        mem_cost_kib: u32,
        /// Time cost (passes)
        time_cost: u32,
        parallelism: u32,
    },
    Pbkdf2Sha256 { iterations: u32 },
}

impl KdfAlgorithm {
    /// Argon2id, time=3, memory=64 MiB, parallelism=4.
    pub fn recommended() -> Self {
        KdfAlgorithm::Argon2id {
            mem_cost_kib: 64 * 1024,
            time_cost: 3,
            parallelism: 4,
        }
    }

    /// PBKDF2-HMAC-SHA256 fallback at 600k iterations. Configured vaults
    /// take their count from `[kdf] pbkdf2_iterations` instead.
    pub fn fallback() -> Self {
        KdfAlgorithm::Pbkdf2Sha256 {
            iterations: 600_000,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            KdfAlgorithm::Argon2id { .. } => "argon2id",
            KdfAlgorithm::Pbkdf2Sha256 { .. } => "pbkdf2-sha256",
        }
    }
}

/// Persisted, non-secret KDF metadata for one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParameters {
    pub version: u32,
    pub algorithm: KdfAlgorithm,
    #[serde(with = "b64")]
    pub salt: Vec<u8>,
    /// Output length in bytes; always 32.
    pub output_len: usize,
}

impl KdfParameters {
    /// Parameters with an explicit salt (e.g. fixed test vectors).
    pub fn new(algorithm: KdfAlgorithm, salt: Vec<u8>) -> Self {
        Self {
            version: KDF_VERSION,
            algorithm,
            salt,
            output_len: KEY_SIZE,
        }
    }

    /// Fresh parameters with a random salt from the OS CSPRNG.
    ///
    /// Fails with [`CryptoError::Kdf`] if the parameters are below policy or
    /// the secure random source is unavailable.
    pub fn generate(algorithm: KdfAlgorithm, salt_len: usize) -> CryptoResult<Self> {
        if !(MIN_SALT_LEN..=MAX_SALT_LEN).contains(&salt_len) {
            return Err(CryptoError::Kdf(format!(
                "salt length {salt_len} outside {MIN_SALT_LEN}..={MAX_SALT_LEN}"
            )));
        }

        let mut salt = vec![0u8; salt_len];
        crate::fill_random(&mut salt).map_err(|e| CryptoError::Kdf(e.to_string()))?;

        let params = Self::new(algorithm, salt);
        params.check_policy()?;
        Ok(params)
    }

    /// Generate parameters from the `[kdf]` config section.
    pub fn from_config(config: &KdfConfig) -> CryptoResult<Self> {
        let algorithm = match config.algorithm.as_str() {
            "argon2id" => KdfAlgorithm::Argon2id {
                mem_cost_kib: config.argon2_mem_cost_kib,
                time_cost: config.argon2_time_cost,
                parallelism: config.argon2_parallelism,
            },
            "pbkdf2-sha256" => KdfAlgorithm::Pbkdf2Sha256 {
                iterations: config.pbkdf2_iterations,
            },
            other => {
                return Err(CryptoError::Kdf(format!(
                    "unknown KDF algorithm: {other:?}"
                )))
            }
        };
        Self::generate(algorithm, config.salt_len)
    }

    /// Reject parameters below the policy minimums.
    pub fn check_policy(&self) -> CryptoResult<()> {
        if self.version != KDF_VERSION {
            return Err(CryptoError::Kdf(format!(
                "unsupported KDF parameter version {}",
                self.version
            )));
        }
        if self.output_len != KEY_SIZE {
            return Err(CryptoError::Kdf(format!(
                "output length must be {KEY_SIZE} bytes, got {}",
                self.output_len
            )));
        }
        if !(MIN_SALT_LEN..=MAX_SALT_LEN).contains(&self.salt.len()) {
            return Err(CryptoError::Kdf(format!(
                "salt length {} outside {MIN_SALT_LEN}..={MAX_SALT_LEN}",
                self.salt.len()
            )));
        }

        match self.algorithm {
            KdfAlgorithm::Argon2id {
                mem_cost_kib,
                time_cost,
                parallelism,
            } => {
                if mem_cost_kib < MIN_ARGON2_MEM_KIB {
                    return Err(CryptoError::Kdf(format!(
                        "Argon2id memory {mem_cost_kib} KiB below policy minimum {MIN_ARGON2_MEM_KIB} KiB"
                    )));
                }
                if time_cost == 0 || parallelism == 0 {
                    return Err(CryptoError::Kdf(
                        "Argon2id time cost and parallelism must be non-zero".into(),
                    ));
                }
            }
            KdfAlgorithm::Pbkdf2Sha256 { iterations } => {
                if iterations < MIN_PBKDF2_ITERATIONS {
                    return Err(CryptoError::Kdf(format!(
                        "PBKDF2 iterations {iterations} below policy minimum {MIN_PBKDF2_ITERATIONS}"
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Derive the 256-bit master key from a password.
///
/// Deterministic for identical `(password, params)`. The password is only
/// read through [`ExposeSecret`] for the duration of the hash and is never
/// logged.
pub fn derive_master_key(
    password: &SecretString,
    params: &KdfParameters,
) -> CryptoResult<MasterKey> {
    params.check_policy()?;

    let mut key = [0u8; KEY_SIZE];
    match params.algorithm {
        KdfAlgorithm::Argon2id {
            mem_cost_kib,
            time_cost,
            parallelism,
        } => {
            let argon2_params = Params::new(mem_cost_kib, time_cost, parallelism, Some(KEY_SIZE))
                .map_err(|e| CryptoError::Kdf(format!("invalid Argon2id params: {e}")))?;

            Argon2::new(Algorithm::Argon2id, Version::V0x13, argon2_params)
                .hash_password_into(
                    password.expose_secret().as_bytes(),
                    &params.salt,
                    &mut key,
                )
                .map_err(|e| CryptoError::Kdf(format!("Argon2id KDF failed: {e}")))?;
        }
        KdfAlgorithm::Pbkdf2Sha256 { iterations } => {
            let iterations = NonZeroU32::new(iterations)
                .ok_or_else(|| CryptoError::Kdf("PBKDF2 iterations must be non-zero".into()))?;

            ring::pbkdf2::derive(
                ring::pbkdf2::PBKDF2_HMAC_SHA256,
                iterations,
                &params.salt,
                password.expose_secret().as_bytes(),
                &mut key,
            );
        }
    }

    debug!(algorithm = params.algorithm.name(), "master key derived");
    Ok(MasterKey::from_bytes(key))
}
