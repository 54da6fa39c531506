pub mod telegram;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

use crate::update::RawUpdate;

/// A reply going out to a chat
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutgoingMessage {
    pub text: String,
    pub chat_id: i64,
    /// Sender of the update being answered
    #[serde(rename = "from", skip_serializing_if = "Option::is_none")]
    pub from_id: Option<i64>,
    /// Deliver without a notification sound
    pub disable_notification: bool,
}

/// The platform's record of a message the bot sent or edited
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SentMessage {
    pub message_id: i64,
    pub chat_id: i64,
}

/// Calls the dispatcher makes against the chat platform.
/// Every method is a single attempt; callers decide what a failure means.
#[async_trait]
pub trait ChatApi: Send + Sync {
    /// Fetch updates with an identifier >= `offset`, or everything pending when `None`.
    async fn get_updates(&self, offset: Option<i64>) -> Result<Vec<RawUpdate>>;

    async fn send_message(&self, message: &OutgoingMessage) -> Result<SentMessage>;

    async fn edit_message_text(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
    ) -> Result<SentMessage>;

    async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<()>;
}
