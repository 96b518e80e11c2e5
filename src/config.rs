use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const TELEGRAM_HOST: &str = "api.telegram.org";
pub const TELEGRAM_IP: &str = "149.154.167.220";
pub const TELEGRAM_PORT: u16 = 443;

const TOKEN_ENV_VAR: &str = "TELEGRAM_BOT_TOKEN";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub schedule: Vec<ScheduleConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: String,
    /// Empty list lets everyone talk to the bot
    #[serde(default)]
    pub allowed_user_ids: Vec<i64>,
}

/// Connection and polling settings for [`crate::AsyncTelegram`]
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ClientConfig {
    #[serde(default = "default_host")]
    pub host: String,
    /// Dialed when the hostname cannot be reached
    #[serde(default = "default_fallback_ip")]
    pub fallback_ip: Option<String>,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Minimum time between two `getUpdates` polls
    #[serde(default = "default_update_interval_ms")]
    pub update_interval_ms: u64,
    /// How long to wait for a reply before resetting the connection
    #[serde(default = "default_server_timeout_ms")]
    pub server_timeout_ms: u64,
    #[serde(default = "default_upload_chunk_size")]
    pub upload_chunk_size: usize,
    /// PEM root certificate(s) to pin instead of the webpki roots
    #[serde(default)]
    pub ca_cert_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ScheduleConfig {
    /// Six-field cron expression (seconds first)
    pub cron: String,
    pub chat_id: i64,
    pub text: String,
}

fn default_host() -> String {
    TELEGRAM_HOST.to_string()
}

fn default_fallback_ip() -> Option<String> {
    Some(TELEGRAM_IP.to_string())
}

fn default_port() -> u16 {
    TELEGRAM_PORT
}

fn default_update_interval_ms() -> u64 {
    500
}

fn default_server_timeout_ms() -> u64 {
    10_000
}

fn default_upload_chunk_size() -> usize {
    4096
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            fallback_ip: default_fallback_ip(),
            port: default_port(),
            update_interval_ms: default_update_interval_ms(),
            server_timeout_ms: default_server_timeout_ms(),
            upload_chunk_size: default_upload_chunk_size(),
            ca_cert_path: None,
        }
    }
}

impl ClientConfig {
    pub fn update_interval(&self) -> Duration {
        Duration::from_millis(self.update_interval_ms)
    }

    pub fn server_timeout(&self) -> Duration {
        Duration::from_millis(self.server_timeout_ms)
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let mut config: Config =
            toml::from_str(content).context("Failed to parse config file")?;

        if config.telegram.bot_token.trim().is_empty() {
            config.telegram.bot_token = std::env::var(TOKEN_ENV_VAR)
                .map(|token| token.trim().to_string())
                .unwrap_or_default();
        }
        if config.telegram.bot_token.is_empty() {
            anyhow::bail!("telegram.bot_token or {} is required", TOKEN_ENV_VAR);
        }

        if config.client.upload_chunk_size == 0 {
            anyhow::bail!("client.upload_chunk_size must be greater than zero");
        }

        Ok(config)
    }

    /// Whether a user may talk to the bot
    pub fn is_allowed(&self, user_id: i64) -> bool {
        self.telegram.allowed_user_ids.is_empty()
            || self.telegram.allowed_user_ids.contains(&user_id)
    }
}
