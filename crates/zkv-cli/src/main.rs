//! zkv: zkvault command-line client
//!
//! Commands:
//!   init                  - create a vault under the configured storage prefix
//!   seal <file>           - encrypt and upload a document
//!   preview <id>          - decrypt and display a document
//!   list                  - list stored documents (no password needed)
//!   passwd                - change the vault password and re-wrap every key
//!   config show           - display the active configuration

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use secrecy::{ExposeSecret, SecretString};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use zkv_core::config::ZkvConfig;
use zkv_core::{AccessLevel, ContentClass, DocumentId, ZkvError};
use zkv_session::{DocumentStore, Vault, VaultSession};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "zkv",
    version,
    about = "zkvault client",
    long_about = "zkv: seal and preview documents in a zero-knowledge vault"
)]
struct Cli {
    /// Path to config.toml
    #[arg(
        long,
        short = 'c',
        env = "ZKV_CONFIG",
        default_value = "~/.config/zkv/config.toml"
    )]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides [log] level
    #[arg(long, env = "ZKV_LOG")]
    log: Option<String>,

    /// Log format; overrides [log] format
    #[arg(long, env = "ZKV_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a new vault
    Init,

    /// Encrypt a local file and upload it
    Seal {
        /// Local file to seal
        file: PathBuf,
        /// Document id (default: the file name)
        #[arg(long)]
        id: Option<String>,
        /// MIME type (default: guessed from the extension)
        #[arg(long)]
        mime: Option<String>,
    },

    /// Decrypt and display a document
    Preview {
        /// Document id
        id: String,
        /// Open with the full-access session lifetime
        #[arg(long)]
        full_access: bool,
    },

    /// List stored documents
    List,

    /// Change the vault password
    Passwd,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = expand_tilde(&cli.config);
    let mut config = load_config(&config_path).await?;

    let level = cli.log.clone().unwrap_or_else(|| config.log.level.clone());
    let format = match cli.log_format {
        Some(format) => format,
        None if config.log.format == "json" => LogFormat::Json,
        None => LogFormat::Text,
    };
    init_logging(&level, &format);
    debug!(config = %config_path.display(), "zkv starting");

    config.storage.root = expand_tilde(&config.storage.root);
    config
        .validate()
        .with_context(|| format!("invalid config: {}", config_path.display()))?;

    match cli.command {
        Commands::Config { action: ConfigAction::Show } => cmd_config_show(&config, &config_path),
        Commands::Init => cmd_init(&config).await,
        Commands::Seal { file, id, mime } => {
            cmd_seal(&config, &file, id.as_deref(), mime.as_deref()).await
        }
        Commands::Preview { id, full_access } => cmd_preview(&config, &id, full_access).await,
        Commands::List => cmd_list(&config).await,
        Commands::Passwd => cmd_passwd(&config).await,
    }
}

// ── Config loading ────────────────────────────────────────────────────────────

async fn load_config(path: &Path) -> Result<ZkvConfig> {
    if path.exists() {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading config: {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("parsing config: {}", path.display()))
    } else {
        // logging is not up yet
        eprintln!(
            "warning: config file not found: {}  (using defaults)",
            path.display()
        );
        Ok(ZkvConfig::default())
    }
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

/// Expand `~` in path to the user's home directory
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/") {
        let home = std::env::var("HOME").unwrap_or_default();
        PathBuf::from(home).join(rest)
    } else {
        path.to_path_buf()
    }
}

// ── Vault plumbing ────────────────────────────────────────────────────────────

fn open_vault(config: &ZkvConfig) -> Result<Vault> {
    let store = DocumentStore::from_config(&config.storage).context("opening document store")?;
    let vault = Vault::new(store, config.clone())?;
    vault
        .guard()
        .spawn_reaper(Duration::from_secs(config.session.reap_interval_secs));
    Ok(vault)
}

fn prompt(label: &str) -> Result<SecretString> {
    let password =
        rpassword::prompt_password(label).with_context(|| format!("reading {label:?}"))?;
    Ok(SecretString::from(password))
}

/// Prompt twice and require both entries to match.
fn prompt_new(label: &str) -> Result<SecretString> {
    let first = prompt(label)?;
    let second = prompt("Confirm: ")?;
    if first.expose_secret() != second.expose_secret() {
        anyhow::bail!("passwords do not match");
    }
    if first.expose_secret().is_empty() {
        anyhow::bail!("password must not be empty");
    }
    Ok(first)
}

async fn unlock(vault: &Vault) -> Result<VaultSession> {
    let password = prompt("Vault password: ")?;
    match vault.unlock_vault(&password).await {
        Ok(session) => Ok(session),
        Err(ZkvError::NotFound(_)) => {
            anyhow::bail!("no vault here yet; create one with `zkv init`")
        }
        Err(e) => Err(e.into()),
    }
}

/// Guess a MIME type from the file extension.
fn guess_mime(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    let mime = match ext.as_str() {
        "pdf" => "application/pdf",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "txt" | "log" => "text/plain",
        "md" => "text/markdown",
        "csv" => "text/csv",
        "html" | "htm" => "text/html",
        "json" => "application/json",
        "xml" => "application/xml",
        _ => return None,
    };
    Some(mime)
}

// ── `zkv config show` ─────────────────────────────────────────────────────────

fn cmd_config_show(config: &ZkvConfig, config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!("# Configuration: defaults (no file at {})", config_path.display());
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}

// ── `zkv init` ────────────────────────────────────────────────────────────────

async fn cmd_init(config: &ZkvConfig) -> Result<()> {
    let vault = open_vault(config)?;
    let password = prompt_new("New vault password: ")?;
    let session = vault
        .initialize(&password)
        .await
        .context("initializing vault")?;
    vault.lock_vault(session);

    println!(
        "Vault created under {}/{} ({} key derivation)",
        config.storage.root.display(),
        vault.store().prefix(),
        config.kdf.algorithm
    );
    Ok(())
}

// ── `zkv seal` ────────────────────────────────────────────────────────────────

async fn cmd_seal(
    config: &ZkvConfig,
    file: &Path,
    id: Option<&str>,
    mime: Option<&str>,
) -> Result<()> {
    let mime = match mime.or_else(|| guess_mime(file)) {
        Some(mime) => mime,
        None => anyhow::bail!(
            "cannot guess the MIME type of {}; pass --mime",
            file.display()
        ),
    };
    let id = match id {
        Some(id) => id.to_string(),
        None => file
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .context("file has no name; pass --id")?,
    };
    let id = DocumentId::new(id)?;

    let plaintext = tokio::fs::read(file)
        .await
        .with_context(|| format!("reading {}", file.display()))?;

    let vault = open_vault(config)?;
    let session = unlock(&vault).await?;
    let summary = vault
        .seal_document(&session, id, mime, &plaintext)
        .await
        .context("sealing document")?;
    vault.lock_vault(session);

    info!(document = %summary.id, "sealed");
    println!(
        "Sealed {} as {} ({}, {} bytes)",
        file.display(),
        summary.id,
        summary.mime,
        summary.plaintext_len
    );
    if summary.content_class.is_none() {
        println!("  note: {} has no preview; it can be stored but not displayed", summary.mime);
    }
    Ok(())
}

// ── `zkv preview` ─────────────────────────────────────────────────────────────

async fn cmd_preview(config: &ZkvConfig, id: &str, full_access: bool) -> Result<()> {
    let id = DocumentId::new(id)?;
    let access = if full_access {
        AccessLevel::FullAccess
    } else {
        AccessLevel::ViewOnly
    };

    let vault = open_vault(config)?;
    let session = unlock(&vault).await?;
    let preview = match vault.open_preview(&session, &id, access).await {
        Ok(preview) => preview,
        Err(e) => {
            if let Some(summary) = e.fallback() {
                println!("{} could not be displayed: {e}", summary.id);
                println!("  type: {}", summary.mime);
                println!("  size: {} bytes", summary.plaintext_len);
                vault.lock_vault(session);
                return Ok(());
            }
            return Err(e.into());
        }
    };

    match preview.document().content_class {
        Some(ContentClass::Structured) => {
            let lines = preview.page_count()?;
            for index in 0..lines {
                preview.with_line(index, |line| println!("{line}"))?;
            }
        }
        Some(ContentClass::Raster) | None => {
            println!(
                "{} ({}): {} page(s), {} bytes",
                preview.document().id,
                preview.mime(),
                preview.page_count()?,
                preview.document().plaintext_len
            );
            println!("  raster content is not painted in a terminal");
        }
    }
    debug!(marker = %preview.marker(), "preview marker");

    vault.close_preview(preview);
    vault.lock_vault(session);
    Ok(())
}

// ── `zkv list` ────────────────────────────────────────────────────────────────

async fn cmd_list(config: &ZkvConfig) -> Result<()> {
    let vault = open_vault(config)?;
    let documents = vault.list_documents().await.context("listing documents")?;
    if documents.is_empty() {
        println!("No documents.");
        return Ok(());
    }

    println!("{:<40} {:<24} {:>12}  CLASS", "ID", "TYPE", "BYTES");
    for doc in documents {
        let class = doc
            .content_class
            .map(|c| c.to_string())
            .unwrap_or_else(|| "-".into());
        println!(
            "{:<40} {:<24} {:>12}  {class}",
            doc.id, doc.mime, doc.plaintext_len
        );
    }
    Ok(())
}

// ── `zkv passwd` ──────────────────────────────────────────────────────────────

async fn cmd_passwd(config: &ZkvConfig) -> Result<()> {
    let vault = open_vault(config)?;
    let old = prompt("Current password: ")?;
    let session = vault
        .unlock_vault(&old)
        .await
        .context("unlocking vault")?;
    let new = prompt_new("New password: ")?;

    vault
        .change_password(&session, &old, &new)
        .await
        .context("changing password")?;
    vault.lock_vault(session);

    println!("Password changed; every document key was re-wrapped.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guess_mime() {
        assert_eq!(guess_mime(Path::new("scan.PDF")), Some("application/pdf"));
        assert_eq!(guess_mime(Path::new("notes.md")), Some("text/markdown"));
        assert_eq!(guess_mime(Path::new("archive.tar.gz")), None);
        assert_eq!(guess_mime(Path::new("README")), None);
    }

    #[test]
    fn test_expand_tilde() {
        let home = std::env::var("HOME").unwrap_or_default();
        assert_eq!(
            expand_tilde(Path::new("~/.config/zkv/config.toml")),
            PathBuf::from(home).join(".config/zkv/config.toml")
        );
        assert_eq!(expand_tilde(Path::new("/etc/zkv")), PathBuf::from("/etc/zkv"));
    }

    #[test]
    fn test_cli_parses() {
        let cli = Cli::try_parse_from(["zkv", "preview", "q3-report", "--full-access"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Preview { ref id, full_access: true } if id == "q3-report"
        ));
    }

    #[tokio::test]
    async fn test_missing_config_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(&dir.path().join("absent.toml")).await.unwrap();
        assert_eq!(config.storage.backend, "fs");
    }
}
