use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::commands::CommandRegistry;
use crate::platform::{ChatApi, OutgoingMessage};
use crate::update::{ParsedUpdate, RawUpdate};

/// Polls the chat platform, runs commands and answers in the originating chat.
///
/// Everything happens on the caller's task, one update at a time: the cursor
/// and the per-chat record of the last sent message need no locking.
pub struct BotLoop {
    api: Arc<dyn ChatApi>,
    commands: Arc<CommandRegistry>,
    poll_interval: Duration,
    /// Smallest update id not yet consumed; `None` fetches everything pending.
    cursor: Option<i64>,
    /// chat id -> id of the last message the bot sent or edited there
    last_messages: HashMap<i64, i64>,
}

impl BotLoop {
    pub fn new(
        api: Arc<dyn ChatApi>,
        commands: Arc<CommandRegistry>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            api,
            commands,
            poll_interval,
            cursor: None,
            last_messages: HashMap::new(),
        }
    }

    #[allow(dead_code)]
    pub fn cursor(&self) -> Option<i64> {
        self.cursor
    }

    #[allow(dead_code)]
    pub fn last_message(&self, chat_id: i64) -> Option<i64> {
        self.last_messages.get(&chat_id).copied()
    }

    /// Poll until `shutdown` turns true (or its sender goes away).
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        info!("Polling for updates every {:?}", self.poll_interval);

        loop {
            if *shutdown.borrow() {
                break;
            }

            let handled = self.poll_once().await;
            if handled > 0 {
                debug!("Handled {} update(s), next offset {:?}", handled, self.cursor);
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("Polling stopped");
    }

    /// One fetch/dispatch pass. Returns the number of updates consumed.
    pub async fn poll_once(&mut self) -> usize {
        let updates = self.fetch_updates().await;

        for raw in &updates {
            let update = ParsedUpdate::from(raw);
            debug!(
                "Update {} (message {:?}, edited: {}, text: {:?}, commands: {:?})",
                update.update_id, update.message_id, update.is_edited, update.text, update.commands
            );
            self.dispatch(&update).await;
            // No command is not a failure: the update is consumed either way.
            self.advance(update.update_id);
        }

        updates.len()
    }

    async fn fetch_updates(&self) -> Vec<RawUpdate> {
        match self.api.get_updates(self.cursor).await {
            Ok(updates) => updates,
            Err(e) => {
                warn!("Failed to fetch updates: {:#}", e);
                Vec::new()
            }
        }
    }

    fn advance(&mut self, update_id: i64) {
        let next = update_id + 1;
        if self.cursor.map_or(true, |cursor| next > cursor) {
            self.cursor = Some(next);
        }
    }

    /// Run every registered command in `update` and send each reply.
    pub async fn dispatch(&mut self, update: &ParsedUpdate) {
        if update.commands.is_empty() {
            return;
        }

        let Some(chat_id) = update.chat_id else {
            debug!("Update {} has commands but no chat", update.update_id);
            return;
        };

        for token in &update.commands {
            let Some(action) = self.commands.get(token).cloned() else {
                debug!("Ignoring unknown command {} in chat {}", token, chat_id);
                continue;
            };

            info!("Command {} from {:?} in chat {}", token, update.sender_id, chat_id);

            match action.run().await {
                Ok(reply) => {
                    self.send_message(reply, chat_id, update.sender_id, update.is_from_group)
                        .await
                }
                Err(e) => error!("Command {} failed: {:#}", token, e),
            }
        }
    }

    /// Best-effort send; a failure is logged and dropped.
    pub async fn send_message(
        &mut self,
        text: String,
        chat_id: i64,
        sender_id: Option<i64>,
        silent: bool,
    ) {
        let message = OutgoingMessage {
            text,
            chat_id,
            from_id: sender_id,
            disable_notification: silent,
        };

        match self.api.send_message(&message).await {
            Ok(sent) => {
                debug!("Sent message {} to chat {}", sent.message_id, sent.chat_id);
                self.last_messages.insert(chat_id, sent.message_id);
            }
            Err(e) => warn!("Failed to send message to chat {}: {:#}", chat_id, e),
        }
    }

    #[allow(dead_code)]
    pub async fn edit_message(&mut self, text: &str, message_id: i64, chat_id: i64) {
        match self.api.edit_message_text(chat_id, message_id, text).await {
            Ok(edited) => {
                self.last_messages.insert(chat_id, edited.message_id);
            }
            Err(e) => warn!(
                "Failed to edit message {} in chat {}: {:#}",
                message_id, chat_id, e
            ),
        }
    }

    #[allow(dead_code)]
    pub async fn delete_message(&mut self, message_id: i64, chat_id: i64) {
        match self.api.delete_message(chat_id, message_id).await {
            Ok(()) => {
                self.last_messages.remove(&chat_id);
            }
            Err(e) => warn!(
                "Failed to delete message {} in chat {}: {:#}",
                message_id, chat_id, e
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::tests::FixedReply;
    use crate::commands::CommandAction;
    use crate::platform::SentMessage;
    use anyhow::Result;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// In-memory platform: hands out queued batches and records every write.
    #[derive(Default)]
    struct FakeApi {
        batches: Mutex<VecDeque<Result<Vec<RawUpdate>>>>,
        offsets: Mutex<Vec<Option<i64>>>,
        sent: Mutex<Vec<OutgoingMessage>>,
        edits: Mutex<Vec<(i64, i64, String)>>,
        deletes: Mutex<Vec<(i64, i64)>>,
        fail_writes: bool,
        /// Flipped once the queue runs dry
        shutdown: Mutex<Option<watch::Sender<bool>>>,
    }

    impl FakeApi {
        fn with_batches(batches: Vec<Result<Vec<RawUpdate>>>) -> Self {
            Self {
                batches: Mutex::new(batches.into()),
                ..Default::default()
            }
        }

        fn sent(&self) -> Vec<OutgoingMessage> {
            self.sent.lock().unwrap().clone()
        }

        fn offsets(&self) -> Vec<Option<i64>> {
            self.offsets.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ChatApi for FakeApi {
        async fn get_updates(&self, offset: Option<i64>) -> Result<Vec<RawUpdate>> {
            self.offsets.lock().unwrap().push(offset);
            match self.batches.lock().unwrap().pop_front() {
                Some(batch) => batch,
                None => {
                    if let Some(tx) = self.shutdown.lock().unwrap().as_ref() {
                        let _ = tx.send(true);
                    }
                    Ok(Vec::new())
                }
            }
        }

        async fn send_message(&self, message: &OutgoingMessage) -> Result<SentMessage> {
            if self.fail_writes {
                anyhow::bail!("sendMessage error (500)");
            }
            let mut sent = self.sent.lock().unwrap();
            sent.push(message.clone());
            Ok(SentMessage {
                message_id: 100 + sent.len() as i64,
                chat_id: message.chat_id,
            })
        }

        async fn edit_message_text(
            &self,
            chat_id: i64,
            message_id: i64,
            text: &str,
        ) -> Result<SentMessage> {
            if self.fail_writes {
                anyhow::bail!("editMessageText error (400)");
            }
            self.edits
                .lock()
                .unwrap()
                .push((chat_id, message_id, text.to_string()));
            Ok(SentMessage {
                message_id,
                chat_id,
            })
        }

        async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<()> {
            if self.fail_writes {
                anyhow::bail!("deleteMessage error (400)");
            }
            self.deletes.lock().unwrap().push((chat_id, message_id));
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl CommandAction for Failing {
        async fn run(&self) -> Result<String> {
            anyhow::bail!("status provider returned garbage")
        }
    }

    fn text_update(update_id: i64, chat_id: i64, text: &str) -> RawUpdate {
        let entities: Vec<serde_json::Value> = if text.starts_with('/') {
            let length = text.split(' ').next().unwrap_or_default().len();
            vec![json!({"type": "bot_command", "offset": 0, "length": length})]
        } else {
            Vec::new()
        };
        serde_json::from_value(json!({
            "update_id": update_id,
            "message": {
                "message_id": update_id * 10,
                "from": {"id": 1001},
                "chat": {"id": chat_id, "type": "private"},
                "text": text,
                "entities": entities
            }
        }))
        .unwrap()
    }

    fn group_update(update_id: i64, chat_id: i64, text: &str) -> RawUpdate {
        serde_json::from_value(json!({
            "update_id": update_id,
            "message": {
                "message_id": 1,
                "from": {"id": 1001},
                "chat": {"id": chat_id, "type": "group"},
                "text": text,
                "entities": [{"type": "bot_command", "offset": 0, "length": text.len()}]
            },
            "my_chat_member": {"chat": {"id": chat_id}, "from": {"id": 1001}}
        }))
        .unwrap()
    }

    fn status_registry() -> Arc<CommandRegistry> {
        Arc::new(
            CommandRegistry::new()
                .with("/check_status", Arc::new(FixedReply("Server X online")))
                .with("/broken", Arc::new(Failing)),
        )
    }

    fn bot_with(api: &Arc<FakeApi>) -> BotLoop {
        BotLoop::new(api.clone(), status_registry(), Duration::ZERO)
    }

    #[tokio::test]
    async fn test_cursor_moves_past_last_update() {
        let api = Arc::new(FakeApi::with_batches(vec![Ok(vec![
            text_update(5, 1, "hello"),
            text_update(6, 1, "/unknown"),
            text_update(9, 1, "bye"),
        ])]));
        let mut bot = bot_with(&api);

        assert_eq!(bot.poll_once().await, 3);
        assert_eq!(bot.cursor(), Some(10));
        assert!(api.sent().is_empty());

        bot.poll_once().await;
        assert_eq!(api.offsets(), vec![None, Some(10)]);
    }

    #[tokio::test]
    async fn test_unknown_command_sends_nothing() {
        let api = Arc::new(FakeApi::with_batches(vec![Ok(vec![
            text_update(1, 1, "/weather"),
            text_update(2, 1, "/check_status@OtherBot"),
        ])]));
        let mut bot = BotLoop::new(
            api.clone(),
            Arc::new(CommandRegistry::new().with("/ping", Arc::new(FixedReply("pong")))),
            Duration::ZERO,
        );

        bot.poll_once().await;
        assert!(api.sent().is_empty());
        assert_eq!(bot.cursor(), Some(3));
    }

    #[tokio::test]
    async fn test_status_command_replies_once() {
        let api = Arc::new(FakeApi::with_batches(vec![Ok(vec![text_update(
            1,
            42,
            "/check_status",
        )])]));
        let mut bot = bot_with(&api);

        bot.poll_once().await;

        assert_eq!(
            api.sent(),
            vec![OutgoingMessage {
                text: "Server X online".to_string(),
                chat_id: 42,
                from_id: Some(1001),
                disable_notification: false,
            }]
        );
        assert_eq!(bot.last_message(42), Some(101));
    }

    #[tokio::test]
    async fn test_group_reply_is_silent() {
        let api = Arc::new(FakeApi::with_batches(vec![Ok(vec![group_update(
            1,
            -77,
            "/check_status",
        )])]));
        let mut bot = bot_with(&api);

        bot.poll_once().await;

        let sent = api.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].disable_notification);
        assert_eq!(sent[0].chat_id, -77);
    }

    #[tokio::test]
    async fn test_fetch_failure_keeps_cursor() {
        let api = Arc::new(FakeApi::with_batches(vec![
            Ok(vec![text_update(3, 1, "hi")]),
            Err(anyhow::anyhow!("getUpdates error (502)")),
            Ok(vec![text_update(4, 1, "/check_status")]),
        ]));
        let mut bot = bot_with(&api);

        assert_eq!(bot.poll_once().await, 1);
        assert_eq!(bot.poll_once().await, 0);
        assert_eq!(bot.cursor(), Some(4));
        assert_eq!(bot.poll_once().await, 1);

        assert_eq!(api.offsets(), vec![None, Some(4), Some(4)]);
        assert_eq!(api.sent().len(), 1);
        assert_eq!(bot.cursor(), Some(5));
    }

    #[tokio::test]
    async fn test_send_failure_is_swallowed() {
        let api = Arc::new(FakeApi {
            fail_writes: true,
            ..FakeApi::with_batches(vec![Ok(vec![text_update(1, 42, "/check_status")])])
        });
        let mut bot = bot_with(&api);

        bot.poll_once().await;

        assert_eq!(bot.last_message(42), None);
        assert_eq!(bot.cursor(), Some(2));
    }

    #[tokio::test]
    async fn test_failing_action_skips_reply() {
        let api = Arc::new(FakeApi::with_batches(vec![Ok(vec![
            text_update(1, 42, "/broken"),
            text_update(2, 42, "/check_status"),
        ])]));
        let mut bot = bot_with(&api);

        bot.poll_once().await;

        let sent = api.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].text, "Server X online");
        assert_eq!(bot.cursor(), Some(3));
    }

    #[tokio::test]
    async fn test_command_without_chat_is_dropped() {
        let api = Arc::new(FakeApi::default());
        let mut bot = bot_with(&api);

        let update = ParsedUpdate {
            update_id: 1,
            text: String::new(),
            commands: ["/check_status".to_string()].into(),
            chat_id: None,
            sender_id: None,
            message_id: None,
            is_edited: false,
            is_from_group: false,
        };
        bot.dispatch(&update).await;

        assert!(api.sent().is_empty());
    }

    #[tokio::test]
    async fn test_last_message_lifecycle() {
        let api = Arc::new(FakeApi::default());
        let mut bot = bot_with(&api);

        bot.send_message("first".to_string(), 7, None, false).await;
        assert_eq!(bot.last_message(7), Some(101));

        bot.edit_message("edited", 101, 7).await;
        assert_eq!(bot.last_message(7), Some(101));
        assert_eq!(
            api.edits.lock().unwrap().clone(),
            vec![(7, 101, "edited".to_string())]
        );

        bot.delete_message(101, 7).await;
        assert_eq!(bot.last_message(7), None);
        assert_eq!(api.deletes.lock().unwrap().clone(), vec![(7, 101)]);
    }

    #[tokio::test]
    async fn test_failed_delete_keeps_record() {
        let api = Arc::new(FakeApi::default());
        let mut bot = bot_with(&api);
        bot.send_message("first".to_string(), 7, None, false).await;

        let failing: Arc<dyn ChatApi> = Arc::new(FakeApi {
            fail_writes: true,
            ..Default::default()
        });
        bot.api = failing;
        bot.delete_message(101, 7).await;
        bot.edit_message("nope", 101, 7).await;

        assert_eq!(bot.last_message(7), Some(101));
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let (tx, rx) = watch::channel(false);
        let api = Arc::new(FakeApi::with_batches(vec![
            Ok(vec![text_update(1, 42, "/check_status")]),
            Ok(vec![text_update(2, 42, "hi"), text_update(3, 42, "/check_status")]),
        ]));
        *api.shutdown.lock().unwrap() = Some(tx);
        let mut bot = bot_with(&api);

        bot.run(rx).await;

        assert_eq!(api.sent().len(), 2);
        assert_eq!(bot.cursor(), Some(4));
        assert_eq!(api.offsets(), vec![None, Some(2), Some(4)]);
    }

    #[tokio::test]
    async fn test_run_returns_when_already_stopped() {
        let (tx, rx) = watch::channel(true);
        let api = Arc::new(FakeApi::default());
        let mut bot = bot_with(&api);

        bot.run(rx).await;
        drop(tx);

        assert!(api.offsets().is_empty());
    }
}
