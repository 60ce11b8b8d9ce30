use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("missing required env var: {0}")]
    MissingEnv(String),
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub subscan: SubscanConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
    #[serde(default)]
    pub poll: PollConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramConfig {
    /// Bot API token - loaded from env TELEGRAM_TOKEN
    #[serde(default)]
    pub token: String,
    /// Shared secret for the webhook header and admin routes -
    /// loaded from env WEBHOOK_SECRET
    #[serde(default)]
    pub webhook_secret: String,
    /// Bot API base URL (override for tests/proxies).
    #[serde(default = "default_bot_api_url")]
    pub api_url: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubscanConfig {
    /// API key - loaded from env SUBSCAN_API_KEY. Without it the Subscan
    /// provider is skipped and only Polkassembly is queried.
    #[serde(default)]
    pub api_key: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SourcesConfig {
    /// Subscan base URL (override for tests/proxies); unset means the
    /// per-network subscan.io host.
    #[serde(default)]
    pub subscan_url: Option<String>,
    /// Polkassembly base URL; unset means the per-network
    /// polkassembly.io host.
    #[serde(default)]
    pub polkassembly_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PollConfig {
    /// Seconds between scheduled notification passes.
    #[serde(default = "default_poll_interval")]
    pub interval_secs: u64,
    /// Timeout for a single provider/delivery HTTP call.
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,
    /// Soft deadline for one pass: after this no new target is started.
    #[serde(default = "default_pass_deadline")]
    pub pass_deadline_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DbConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_bot_api_url() -> String {
    "https://api.telegram.org".to_string()
}
fn default_poll_interval() -> u64 {
    60
}
fn default_fetch_timeout() -> u64 {
    10
}
fn default_pass_deadline() -> u64 {
    45
}
fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}
fn default_db_path() -> String {
    "refalert.db".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            webhook_secret: String::new(),
            api_url: default_bot_api_url(),
        }
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_poll_interval(),
            fetch_timeout_secs: default_fetch_timeout(),
            pass_deadline_secs: default_pass_deadline(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
        }
    }
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Config {
    /// Load config from a TOML file, then overlay environment variables for secrets.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;
        config.overlay_env();
        Ok(config)
    }

    /// Load a default config with env-only secrets (no file needed).
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.overlay_env();
        config
    }

    // Secrets never live in the config file.
    fn overlay_env(&mut self) {
        if let Ok(token) = std::env::var("TELEGRAM_TOKEN") {
            self.telegram.token = token;
        }
        if let Ok(secret) = std::env::var("WEBHOOK_SECRET") {
            self.telegram.webhook_secret = secret;
        }
        if let Ok(key) = std::env::var("SUBSCAN_API_KEY") {
            self.subscan.api_key = key;
        }
        if let Ok(path) = std::env::var("REFALERT_DB") {
            self.db.path = path;
        }
    }

    /// Fail startup early if the secrets the bot cannot run without are absent.
    pub fn require_secrets(&self) -> Result<(), ConfigError> {
        if self.telegram.token.is_empty() {
            return Err(ConfigError::MissingEnv("TELEGRAM_TOKEN".to_string()));
        }
        if self.telegram.webhook_secret.is_empty() {
            return Err(ConfigError::MissingEnv("WEBHOOK_SECRET".to_string()));
        }
        Ok(())
    }

    pub fn has_subscan_key(&self) -> bool {
        !self.subscan.api_key.is_empty()
    }
}
