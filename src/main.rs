mod bot;
mod commands;
mod config;
mod platform;
mod status;
mod update;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::bot::BotLoop;
use crate::commands::CommandRegistry;
use crate::config::Config;
use crate::platform::telegram::TelegramClient;
use crate::status::StatusCommand;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,statusbot=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration; BOT_TOKEN and SERVER_IP come from the environment
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    info!("Loading configuration from: {}", config_path.display());
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    info!("Configuration loaded successfully");
    info!("  Server: {}", config.status.server_address);
    info!("  Status API: {}", config.status.api_url);
    info!("  Allowed updates: {:?}", config.telegram.allowed_updates);

    let commands = CommandRegistry::new().with(
        config.status.command.clone(),
        Arc::new(StatusCommand::new(&config.status)),
    );
    info!("  Commands: {:?}", commands.list());

    let api = Arc::new(TelegramClient::new(&config.telegram));
    let mut bot = BotLoop::new(api, Arc::new(commands), config.poll_interval());

    // Stop polling on Ctrl-C
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Shutdown requested");
        let _ = shutdown_tx.send(true);
    });

    info!("Bot is starting...");
    bot.run(shutdown_rx).await;

    Ok(())
}
