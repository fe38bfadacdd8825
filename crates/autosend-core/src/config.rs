//! AutoSend configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{AutoSendError, Result};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AutoSendConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

impl AutoSendConfig {
    /// Load config from the default path (~/.autosend/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AutoSendError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| AutoSendError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the scheduler cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.scheduler.interval_secs == 0 {
            return Err(AutoSendError::Config(
                "scheduler.interval_secs must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    /// Overlay values from `AUTOSEND_*` environment variables.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("AUTOSEND_DELIVERY_URL").filter(|v| !v.is_empty()) {
            self.delivery.url = url;
        }
        if let Some(key) = lookup("AUTOSEND_DELIVERY_AUTH_KEY").filter(|v| !v.is_empty()) {
            self.delivery.auth_key = key;
        }
        if let Some(port) = lookup("AUTOSEND_PORT").and_then(|v| v.parse().ok()) {
            self.server.port = port;
        }
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the AutoSend home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".autosend")
    }
}

/// HTTP API listener.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String { "0.0.0.0".into() }
fn default_port() -> u16 { 8080 }

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// SQLite database location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String { "~/.autosend/autosend.db".into() }

impl DatabaseConfig {
    /// Path with `~` expanded. `:memory:` is passed through untouched.
    pub fn resolved_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.path).to_string())
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: default_db_path() }
    }
}

/// External delivery endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    #[serde(default = "default_delivery_url")]
    pub url: String,
    #[serde(default = "default_auth_header")]
    pub auth_header: String,
    #[serde(default)]
    pub auth_key: String,
    /// Per-call HTTP timeout.
    #[serde(default = "default_delivery_timeout")]
    pub timeout_secs: u64,
    /// Wait before retry `n` is `n * backoff_unit_ms`.
    #[serde(default = "default_backoff_unit")]
    pub backoff_unit_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_delivery_url() -> String { "http://localhost:9000/send".into() }
fn default_auth_header() -> String { "x-ins-auth-key".into() }
fn default_delivery_timeout() -> u64 { 30 }
fn default_backoff_unit() -> u64 { 5000 }
fn default_max_attempts() -> u32 { 3 }

impl DeliveryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn backoff_unit(&self) -> Duration {
        Duration::from_millis(self.backoff_unit_ms)
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            url: default_delivery_url(),
            auth_header: default_auth_header(),
            auth_key: String::new(),
            timeout_secs: default_delivery_timeout(),
            backoff_unit_ms: default_backoff_unit(),
            max_attempts: default_max_attempts(),
        }
    }
}

/// Dispatch scheduler tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_interval")]
    pub interval_secs: u64,
    /// Hard cap on messages fetched per tick.
    #[serde(default = "default_messages_per_interval")]
    pub messages_per_interval: u32,
    /// Messages whose retry count reached this value are never fetched again.
    #[serde(default = "default_max_retry_count")]
    pub max_retry_count: u32,
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,
    /// Start the scheduler at boot when the persisted state says it was active.
    #[serde(default)]
    pub resume_on_boot: bool,
}

fn default_interval() -> u64 { 120 }
fn default_messages_per_interval() -> u32 { 2 }
fn default_max_retry_count() -> u32 { 3 }
fn default_cache_ttl() -> u64 { 24 * 60 * 60 }

impl SchedulerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval(),
            messages_per_interval: default_messages_per_interval(),
            max_retry_count: default_max_retry_count(),
            cache_ttl_secs: default_cache_ttl(),
            resume_on_boot: false,
        }
    }
}
