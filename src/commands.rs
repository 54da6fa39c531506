use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

/// Something a chat command runs to produce its reply text
#[async_trait]
pub trait CommandAction: Send + Sync {
    async fn run(&self) -> Result<String>;
}

/// Immutable command -> action bindings, built once at startup
#[derive(Clone, Default)]
pub struct CommandRegistry {
    actions: HashMap<String, Arc<dyn CommandAction>>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `command` (including its leading `/`) to `action`
    pub fn with(mut self, command: impl Into<String>, action: Arc<dyn CommandAction>) -> Self {
        let command = command.into();
        info!("Registered command: {}", command);
        self.actions.insert(command, action);
        self
    }

    /// Find the action for a command token. `/cmd@SomeBot` (the form used in
    /// groups) resolves to `/cmd` when there is no exact binding.
    pub fn get(&self, token: &str) -> Option<&Arc<dyn CommandAction>> {
        self.actions.get(token).or_else(|| {
            let (command, _bot) = token.split_once('@')?;
            self.actions.get(command)
        })
    }

    pub fn list(&self) -> Vec<&str> {
        let mut commands: Vec<&str> = self.actions.keys().map(String::as_str).collect();
        commands.sort_unstable();
        commands
    }
}
