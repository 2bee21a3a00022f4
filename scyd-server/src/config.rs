//! Server configuration.
//!
//! Process settings come from environment variables ([`Config`]); user
//! settings (directories, hooks, accounts) come from a TOML file
//! ([`UserConfig`]).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;
use strum::Display;
use tracing::warn;

/// Where the server is running. Controls the docker wrapper around the
/// downloader and whether cookies are marked `Secure`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    pub fn is_development(self) -> bool {
        self == Environment::Development
    }
}

/// Runtime configuration for scyd-server.
///
/// Every field has a sensible default so the server works out-of-the-box
/// without any environment variables set.
#[derive(Debug, Clone)]
pub struct Config {
    /// TCP address to bind (default: `"0.0.0.0:3000"`).
    pub bind_address: String,

    /// SQLite database URL (default: `"sqlite://scyd.db"`).
    pub database_url: String,

    /// Path of the TOML user configuration.
    pub config_path: PathBuf,

    /// `tracing` filter string, e.g. `"info"` or `"debug,tower_http=warn"`.
    pub log_level: String,

    /// When `true`, emit log records as newline-delimited JSON.
    pub log_json: bool,

    /// `development` unless `SCYD_ENV` is set to something non-empty.
    pub environment: Environment,

    /// Comma-separated CORS origins; wildcard when unset.
    pub cors_allowed_origins: Option<String>,

    /// Per-task event buffer before slow observers start skipping.
    pub event_buffer: usize,

    /// Lifetime of a login session.
    pub session_ttl: Duration,
}

impl Config {
    /// Build [`Config`] from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let environment = match lookup("SCYD_ENV") {
            Some(v) if !v.trim().is_empty() => Environment::Production,
            _ => Environment::Development,
        };
        Self {
            bind_address: env_or(&lookup, "SCYD_BIND", "0.0.0.0:3000"),
            database_url: env_or(&lookup, "SCYD_DATABASE_URL", "sqlite://scyd.db"),
            config_path: PathBuf::from(env_or(&lookup, "SCYD_CONFIG", "./config/config.toml")),
            log_level: env_or(&lookup, "SCYD_LOG", "info"),
            log_json: lookup("SCYD_LOG_JSON")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            environment,
            cors_allowed_origins: lookup("SCYD_CORS_ORIGINS").filter(|v| !v.trim().is_empty()),
            event_buffer: parse_env(&lookup, "SCYD_EVENT_BUFFER", scyd_core::DEFAULT_EVENT_BUFFER),
            session_ttl: Duration::from_secs(
                parse_env(&lookup, "SCYD_SESSION_TTL_HOURS", 24u64).saturating_mul(3600),
            ),
        }
    }
}

/// User-facing settings loaded from the TOML file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UserConfig {
    pub download_dir: PathBuf,
    pub output_dir: PathBuf,
    pub sort_after_download: bool,
    pub hooks: HooksConfig,
    pub users: BTreeMap<String, UserAccount>,
}

impl Default for UserConfig {
    fn default() -> Self {
        Self {
            download_dir: PathBuf::from("/downloads"),
            output_dir: PathBuf::from("/output"),
            sort_after_download: true,
            hooks: HooksConfig::default(),
            users: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HooksConfig {
    pub on_download_complete: Option<String>,
    pub on_error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserAccount {
    /// Argon2 PHC string, as printed by `scyd-server hash-password`.
    pub password_hash: String,
}

impl UserConfig {
    /// Read the TOML file at `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(text) => Self::parse(&text)
                .with_context(|| format!("invalid config file {}", path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "config file not found; using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(e).with_context(|| format!("failed to read {}", path.display())),
        }
    }

    pub fn parse(text: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Create the download and output directories if they do not exist.
    pub fn ensure_directories(&self) -> anyhow::Result<()> {
        for dir in [&self.download_dir, &self.output_dir] {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create directory {}", dir.display()))?;
        }
        Ok(())
    }
}

// ── private helpers ──────────────────────────────────────────────────────────

fn env_or(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: &str) -> String {
    lookup(key).unwrap_or_else(|| default.to_owned())
}

fn parse_env<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> T {
    lookup(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}
