mod bot;
mod scheduler;

use std::path::PathBuf;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use async_telegram::http::mask_token;
use async_telegram::{AsyncTelegram, Config};

use crate::bot::AppState;
use crate::scheduler::NotificationScheduler;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,async_telegram=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    info!("Loading configuration from: {}", config_path.display());
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    info!("Configuration loaded successfully");
    info!("  Token: {}", mask_token(&config.telegram.bot_token));
    info!("  Host: {}:{}", config.client.host, config.client.port);
    info!("  Update interval: {} ms", config.client.update_interval_ms);
    info!("  Allowed users: {:?}", config.telegram.allowed_user_ids);
    info!("  Scheduled notifications: {}", config.schedule.len());

    let mut client =
        AsyncTelegram::new(&config.client).context("Failed to create Telegram client")?;
    client.set_token(config.telegram.bot_token.clone());
    client
        .begin()
        .await
        .context("Failed to reach the Telegram Bot API")?;

    // Cron jobs hand notifications to the polling loop
    let (tx, rx) = mpsc::unbounded_channel();
    let mut scheduler = NotificationScheduler::new(tx).await?;
    scheduler.schedule_all(&config.schedule).await?;
    scheduler.start().await?;

    info!("Bot is starting...");
    bot::run(client, AppState::new(config), rx).await?;

    scheduler.shutdown().await?;
    Ok(())
}
