use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub status: StatusConfig,
    #[serde(default)]
    pub polling: PollingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: String,
    #[serde(default = "default_telegram_api_url")]
    pub api_url: String,
    /// Update categories requested from getUpdates.
    #[serde(default = "default_allowed_updates")]
    pub allowed_updates: Vec<String>,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            api_url: default_telegram_api_url(),
            allowed_updates: default_allowed_updates(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StatusConfig {
    /// Address of the game server whose status is reported (e.g. "play.example.org")
    #[serde(default)]
    pub server_address: String,
    #[serde(default = "default_status_api_url")]
    pub api_url: String,
    #[serde(default = "default_status_command")]
    pub command: String,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            server_address: String::new(),
            api_url: default_status_api_url(),
            command: default_status_command(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PollingConfig {
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
        }
    }
}

fn default_telegram_api_url() -> String {
    "https://api.telegram.org".to_string()
}

fn default_allowed_updates() -> Vec<String> {
    vec!["message".to_string()]
}

fn default_status_api_url() -> String {
    "https://api.mcsrvstat.us/2".to_string()
}

fn default_status_command() -> String {
    "/check_status".to_string()
}

fn default_interval_ms() -> u64 {
    1000
}

impl Config {
    /// Idle delay between two polls.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.polling.interval_ms)
    }

    /// Load the config file (if present), apply `BOT_TOKEN` / `SERVER_IP`
    /// from the environment and validate the result.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            Self::from_toml_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Config::default()
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).context("Invalid TOML configuration")
    }

    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(token) = lookup("BOT_TOKEN").filter(|v| !v.is_empty()) {
            self.telegram.bot_token = token;
        }
        if let Some(address) = lookup("SERVER_IP").filter(|v| !v.is_empty()) {
            self.status.server_address = address;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.telegram.bot_token.trim().is_empty() {
            anyhow::bail!("BOT_TOKEN is not set (telegram.bot_token)");
        }
        if self.status.server_address.trim().is_empty() {
            anyhow::bail!("SERVER_IP is not set (status.server_address)");
        }
        Ok(())
    }
}
