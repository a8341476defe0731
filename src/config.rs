//! Exporter configuration: loaded once from YAML at startup.
//!
//! The loaded [`Config`] is an immutable snapshot. Components receive the
//! section they need at construction time; nothing reads it globally.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_PAGE_SIZE: u32 = 100;
pub const DEFAULT_REFRESH_TOKEN_HOURS: u64 = 3;
/// One year. IAM tokens expire long before this.
pub const MAX_REFRESH_TOKEN_HOURS: u64 = 24 * 365;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

/// Upstream endpoints, credentials and scrape tuning.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub endpoint: String,
    pub iam_endpoint: String,
    pub domain: String,
    pub username: String,
    pub password: String,
    pub refresh_token_hours: u64,
    pub page_size: u32,
    /// Skip TLS certificate verification toward the inventory endpoint.
    pub insecure_skip_verify: bool,
    /// Per-page request deadline.
    pub request_timeout_secs: u64,
    /// Upper bound on pages walked per scrape. 0 means unbounded.
    pub max_pages: u32,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            iam_endpoint: String::new(),
            domain: String::new(),
            username: String::new(),
            password: String::new(),
            refresh_token_hours: DEFAULT_REFRESH_TOKEN_HOURS,
            page_size: DEFAULT_PAGE_SIZE,
            insecure_skip_verify: false,
            request_timeout_secs: 30,
            max_pages: 10_000,
        }
    }
}

// Keep the password out of debug output.
impl std::fmt::Debug for ApiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiConfig")
            .field("endpoint", &self.endpoint)
            .field("iam_endpoint", &self.iam_endpoint)
            .field("domain", &self.domain)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("refresh_token_hours", &self.refresh_token_hours)
            .field("page_size", &self.page_size)
            .field("insecure_skip_verify", &self.insecure_skip_verify)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("max_pages", &self.max_pages)
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub dir: PathBuf,
    pub file: String,
    /// Megabytes before the log file is rotated.
    pub max_size: u64,
    /// Rotated files to keep. 0 keeps all.
    pub max_backups: usize,
    /// Days to keep rotated files. 0 disables age-based cleanup.
    pub max_age: u32,
    pub compress: bool,
    pub enable_file: bool,
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            dir: PathBuf::from("logs"),
            file: "ecs_exporter.log".into(),
            max_size: 100,
            max_backups: 0,
            max_age: 0,
            compress: false,
            enable_file: true,
            json: false,
        }
    }
}

impl ApiConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_token_hours.min(MAX_REFRESH_TOKEN_HOURS) * 3600)
    }
}

impl LogConfig {
    pub fn file_path(&self) -> PathBuf {
        self.dir.join(&self.file)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen: String,
    pub shutdown_grace_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:9100".into(),
            shutdown_grace_secs: 30,
        }
    }
}

impl ServerConfig {
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        self.listen
            .parse()
            .with_context(|| format!("invalid server.listen address '{}'", self.listen))
    }
}

impl Config {
    /// Read, parse, normalize and validate the config file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_yaml(&raw)
            .with_context(|| format!("invalid config file {}", path.display()))
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        let mut cfg: Config = serde_yaml::from_str(raw).context("failed to unmarshal config")?;
        cfg.normalize();
        cfg.validate()?;
        Ok(cfg)
    }

    fn normalize(&mut self) {
        if self.api.page_size == 0 {
            self.api.page_size = DEFAULT_PAGE_SIZE;
        }
        if self.api.refresh_token_hours == 0 {
            self.api.refresh_token_hours = DEFAULT_REFRESH_TOKEN_HOURS;
        }
    }

    fn validate(&self) -> Result<()> {
        let required = [
            ("api.endpoint", &self.api.endpoint),
            ("api.iam_endpoint", &self.api.iam_endpoint),
            ("api.domain", &self.api.domain),
            ("api.username", &self.api.username),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                bail!("{} must be set", name);
            }
        }
        if self.api.refresh_token_hours > MAX_REFRESH_TOKEN_HOURS {
            bail!(
                "api.refresh_token_hours must be at most {}, got {}",
                MAX_REFRESH_TOKEN_HOURS,
                self.api.refresh_token_hours
            );
        }
        self.server.listen_addr()?;
        Ok(())
    }
}
