use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::TelegramConfig;
use crate::platform::{ChatApi, OutgoingMessage, SentMessage};
use crate::update::{Message, RawUpdate};

const PARSE_MODE: &str = "Markdown";

/// Bot API response envelope.
/// https://core.telegram.org/bots/api#making-requests
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
    result: Option<T>,
}

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    #[serde(flatten)]
    message: &'a OutgoingMessage,
    parse_mode: &'static str,
}

#[derive(Debug, Serialize)]
struct EditMessageTextRequest<'a> {
    chat_id: i64,
    message_id: i64,
    text: &'a str,
    parse_mode: &'static str,
}

#[derive(Debug, Serialize)]
struct DeleteMessageRequest {
    chat_id: i64,
    message_id: i64,
}

impl From<Message> for SentMessage {
    fn from(message: Message) -> Self {
        Self {
            message_id: message.message_id,
            chat_id: message.chat.id,
        }
    }
}

/// Bot API client over plain HTTPS
pub struct TelegramClient {
    client: reqwest::Client,
    api_url: String,
    token: String,
    allowed_updates: Vec<String>,
}

impl TelegramClient {
    pub fn new(config: &TelegramConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: config.api_url.trim_end_matches('/').to_string(),
            token: config.bot_token.clone(),
            allowed_updates: config.allowed_updates.clone(),
        }
    }

    /// Carries the token: transport errors are stripped of their URL before they surface.
    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_url, self.token, method)
    }

    async fn post<B, T>(&self, method: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized + Sync,
        T: DeserializeOwned,
    {
        debug!("Calling Telegram {}", method);

        let response = self
            .client
            .post(self.method_url(method))
            .json(body)
            .send()
            .await
            .map_err(reqwest::Error::without_url)
            .with_context(|| format!("Failed to send {} request", method))?;

        decode(method, response).await
    }
}

/// Only a 200 carrying `ok: true` and a result counts as success.
async fn decode<T: DeserializeOwned>(method: &str, response: reqwest::Response) -> Result<T> {
    let status = response.status();
    if status != StatusCode::OK {
        let error_body = response.text().await.unwrap_or_default();
        anyhow::bail!("Telegram {} error ({}): {}", method, status, error_body);
    }

    let envelope: ApiResponse<T> = response
        .json()
        .await
        .map_err(reqwest::Error::without_url)
        .with_context(|| format!("Failed to parse {} response", method))?;

    if !envelope.ok {
        anyhow::bail!(
            "Telegram {} rejected: {}",
            method,
            envelope.description.unwrap_or_default()
        );
    }

    envelope
        .result
        .with_context(|| format!("Telegram {} returned no result", method))
}

#[async_trait]
impl ChatApi for TelegramClient {
    async fn get_updates(&self, offset: Option<i64>) -> Result<Vec<RawUpdate>> {
        let allowed_updates = serde_json::to_string(&self.allowed_updates)
            .context("Failed to encode allowed_updates")?;

        let mut request = self
            .client
            .get(self.method_url("getUpdates"))
            .query(&[("allowed_updates", allowed_updates.as_str())]);
        if let Some(offset) = offset {
            request = request.query(&[("offset", offset)]);
        }

        let response = request
            .send()
            .await
            .map_err(reqwest::Error::without_url)
            .context("Failed to send getUpdates request")?;

        decode("getUpdates", response).await
    }

    async fn send_message(&self, message: &OutgoingMessage) -> Result<SentMessage> {
        let request = SendMessageRequest {
            message,
            parse_mode: PARSE_MODE,
        };
        let sent: Message = self.post("sendMessage", &request).await?;
        Ok(sent.into())
    }

    async fn edit_message_text(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
    ) -> Result<SentMessage> {
        let request = EditMessageTextRequest {
            chat_id,
            message_id,
            text,
            parse_mode: PARSE_MODE,
        };
        let edited: Message = self.post("editMessageText", &request).await?;
        Ok(edited.into())
    }

    async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<()> {
        let request = DeleteMessageRequest {
            chat_id,
            message_id,
        };
        let _: bool = self.post("deleteMessage", &request).await?;
        Ok(())
    }
}
