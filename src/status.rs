use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::commands::CommandAction;
use crate::config::StatusConfig;

/// Status provider payload, e.g. https://api.mcsrvstat.us/2/<address>
#[derive(Debug, Clone, Deserialize)]
pub struct ServerStatus {
    pub online: bool,
    #[serde(default)]
    pub motd: Option<Motd>,
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub players: Option<Players>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Motd {
    pub clean: MotdText,
}

/// The provider sends either a single string or one entry per line.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MotdText {
    Line(String),
    Lines(Vec<String>),
}

impl MotdText {
    fn joined(&self) -> String {
        match self {
            MotdText::Line(line) => line.trim().to_string(),
            MotdText::Lines(lines) => lines
                .iter()
                .map(|l| l.trim())
                .filter(|l| !l.is_empty())
                .collect::<Vec<_>>()
                .join(" "),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Players {
    #[serde(default)]
    pub list: Vec<String>,
}

/// Backslash-escape the characters legacy Markdown treats as entity markers.
pub fn escape_markdown(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        if matches!(ch, '_' | '*' | '`' | '[') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

/// Render the chat reply for one status lookup. `address` labels servers
/// that report no MOTD or IP.
pub fn format_report(status: &ServerStatus, address: &str) -> String {
    let label = status
        .motd
        .as_ref()
        .map(|m| m.clean.joined())
        .filter(|l| !l.is_empty())
        .unwrap_or_else(|| address.to_string());
    let ip = status.ip.as_deref().unwrap_or(address);
    let online = if status.online { "✅" } else { "❌" };
    let players = match status.players.as_ref().map(|p| p.list.as_slice()) {
        Some(list) if !list.is_empty() => list
            .iter()
            .map(|name| escape_markdown(name))
            .collect::<Vec<_>>()
            .join(", "),
        _ => "none".to_string(),
    };

    format!(
        "Server {} @ {}:\n -online {}\n -players {}",
        escape_markdown(&label),
        escape_markdown(ip),
        online,
        players
    )
}

pub struct StatusClient {
    client: reqwest::Client,
    api_url: String,
}

impl StatusClient {
    pub fn new(api_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: api_url.trim_end_matches('/').to_string(),
        }
    }

    pub async fn fetch(&self, address: &str) -> Result<ServerStatus> {
        let url = format!("{}/{}", self.api_url, address);

        debug!("Querying server status: {}", url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to send status request")?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            anyhow::bail!("Status API error ({}): {}", status, error_body);
        }

        response
            .json()
            .await
            .context("Failed to parse status response")
    }
}

/// The `/check_status` command: look up the configured server and report.
pub struct StatusCommand {
    client: StatusClient,
    address: String,
}

impl StatusCommand {
    pub fn new(config: &StatusConfig) -> Self {
        Self {
            client: StatusClient::new(&config.api_url),
            address: config.server_address.clone(),
        }
    }
}

#[async_trait]
impl CommandAction for StatusCommand {
    async fn run(&self) -> Result<String> {
        let status = self.client.fetch(&self.address).await?;
        Ok(format_report(&status, &self.address))
    }
}
