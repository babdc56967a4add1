use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{ZkvError, ZkvResult};
use crate::types::AccessLevel;

/// Top-level client configuration (loaded from config.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ZkvConfig {
    pub storage: StorageConfig,
    pub kdf: KdfConfig,
    pub stream: StreamConfig,
    pub render: RenderConfig,
    pub session: SessionConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Storage backend: "fs" or "memory"
    pub backend: String,
    /// Root directory for the "fs" backend
    pub root: PathBuf,
    /// Object prefix for vault metadata, document metadata, and blobs
    pub prefix: String,
}

/// Parameters used when generating a new KDF configuration (vault init or
/// password change). Existing vaults keep the parameters they were created
/// with.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KdfConfig {
    /// "argon2id" (default) or "pbkdf2-sha256" (fallback)
    pub algorithm: String,
    /// Argon2id memory cost in KiB (default: 65536 = 64 MiB)
    pub argon2_mem_cost_kib: u32,
    /// Argon2id time cost (iterations, default: 3)
    pub argon2_time_cost: u32,
    /// Argon2id parallelism (default: 4)
    pub argon2_parallelism: u32,
    /// PBKDF2-HMAC-SHA256 iterations (default: 600000)
    pub pbkdf2_iterations: u32,
    /// Salt length in bytes, 16..=32 (default: 16)
    pub salt_len: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Plaintext bytes per chunk when sealing documents (default: 64 KiB)
    pub chunk_size: u32,
    /// Largest chunk size accepted when opening a stream; bounds peak
    /// plaintext residency (default: 1 MiB)
    pub max_chunk_size: u32,
    /// AEAD for new documents: "chacha20-poly1305" or "aes-256-gcm"
    pub aead: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Page ceiling for raster content (default: 50)
    pub max_pages: u32,
    /// Bytes per raster page (default: 1 MiB)
    pub page_bytes: u32,
    /// Ceiling for text content (default: 16 MiB)
    pub max_text_bytes: u64,
    /// Viewport-to-window delta (px) treated as attached inspection tooling
    pub viewport_delta_threshold: u32,
    /// Embed the session marker into export output
    pub embed_marker: bool,
}

/// Session lifetimes in seconds. Each session starts with its TTL and may be
/// extended up to, never past, its hard ceiling measured from creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub view_only_ttl_secs: u64,
    pub view_only_ceiling_secs: u64,
    pub full_access_ttl_secs: u64,
    pub full_access_ceiling_secs: u64,
    /// Lifetime of an unlocked vault (the resident master key)
    pub vault_ttl_secs: u64,
    pub vault_ceiling_secs: u64,
    /// How often the background reaper checks for expired sessions
    pub reap_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: "fs".into(),
            root: PathBuf::from("~/.local/share/zkv"),
            prefix: "vault".into(),
        }
    }
}

impl Default for KdfConfig {
    fn default() -> Self {
        Self {
            algorithm: "argon2id".into(),
            argon2_mem_cost_kib: 65536,
            argon2_time_cost: 3,
            argon2_parallelism: 4,
            pbkdf2_iterations: 600_000,
            salt_len: 16,
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            chunk_size: 64 * 1024,
            max_chunk_size: 1024 * 1024,
            aead: "chacha20-poly1305".into(),
        }
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            max_pages: 50,
            page_bytes: 1024 * 1024,
            max_text_bytes: 16 * 1024 * 1024,
            viewport_delta_threshold: 160,
            embed_marker: true,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            view_only_ttl_secs: 600,
            view_only_ceiling_secs: 1200,
            full_access_ttl_secs: 1800,
            full_access_ceiling_secs: 3600,
            vault_ttl_secs: 1800,
            vault_ceiling_secs: 14400,
            reap_interval_secs: 5,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl SessionConfig {
    /// (ttl, hard ceiling) for a preview session.
    pub fn preview_limits(&self, access: AccessLevel) -> (Duration, Duration) {
        match access {
            AccessLevel::ViewOnly => (
                Duration::from_secs(self.view_only_ttl_secs),
                Duration::from_secs(self.view_only_ceiling_secs),
            ),
            AccessLevel::FullAccess => (
                Duration::from_secs(self.full_access_ttl_secs),
                Duration::from_secs(self.full_access_ceiling_secs),
            ),
        }
    }

    /// (ttl, hard ceiling) for an unlocked vault.
    pub fn vault_limits(&self) -> (Duration, Duration) {
        (
            Duration::from_secs(self.vault_ttl_secs),
            Duration::from_secs(self.vault_ceiling_secs),
        )
    }
}

impl ZkvConfig {
    /// Check cross-field consistency. KDF policy minimums are enforced when
    /// parameters are generated, not here.
    pub fn validate(&self) -> ZkvResult<()> {
        match self.storage.backend.as_str() {
            "fs" | "memory" => {}
            other => {
                return Err(ZkvError::Config(format!(
                    "storage.backend must be \"fs\" or \"memory\", got {other:?}"
                )))
            }
        }

        match self.kdf.algorithm.as_str() {
            "argon2id" | "pbkdf2-sha256" => {}
            other => {
                return Err(ZkvError::Config(format!(
                    "kdf.algorithm must be \"argon2id\" or \"pbkdf2-sha256\", got {other:?}"
                )))
            }
        }
        match self.stream.aead.as_str() {
            "chacha20-poly1305" | "aes-256-gcm" => {}
            other => {
                return Err(ZkvError::Config(format!(
                    "stream.aead must be \"chacha20-poly1305\" or \"aes-256-gcm\", got {other:?}"
                )))
            }
        }

        if self.stream.chunk_size == 0 {
            return Err(ZkvError::Config("stream.chunk_size must be non-zero".into()));
        }
        if self.stream.chunk_size > self.stream.max_chunk_size {
            return Err(ZkvError::Config(format!(
                "stream.chunk_size ({}) exceeds stream.max_chunk_size ({})",
                self.stream.chunk_size, self.stream.max_chunk_size
            )));
        }

        if self.render.max_pages == 0
            || self.render.page_bytes == 0
            || self.render.max_text_bytes == 0
        {
            return Err(ZkvError::Config(
                "render.max_pages, render.page_bytes and render.max_text_bytes must be non-zero"
                    .into(),
            ));
        }

        let s = &self.session;
        for (name, ttl, ceiling) in [
            ("view_only", s.view_only_ttl_secs, s.view_only_ceiling_secs),
            ("full_access", s.full_access_ttl_secs, s.full_access_ceiling_secs),
            ("vault", s.vault_ttl_secs, s.vault_ceiling_secs),
        ] {
            if ttl == 0 {
                return Err(ZkvError::Config(format!("session.{name}_ttl_secs must be non-zero")));
            }
            if ttl > ceiling {
                return Err(ZkvError::Config(format!(
                    "session.{name}_ttl_secs ({ttl}) exceeds its ceiling ({ceiling})"
                )));
            }
        }
        if s.reap_interval_secs == 0 {
            return Err(ZkvError::Config("session.reap_interval_secs must be non-zero".into()));
        }

        match self.log.format.as_str() {
            "json" | "text" => Ok(()),
            other => Err(ZkvError::Config(format!(
                "log.format must be \"json\" or \"text\", got {other:?}"
            ))),
        }
    }
}
