mod commands;
mod config;
mod platform;
mod registry;
mod relay;
mod stats;
mod webhook;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::commands::Commands;
use crate::config::Config;
use crate::platform::telegram::{self, TelegramMessenger};
use crate::platform::Messenger;
use crate::registry::Registry;
use crate::relay::FanOut;
use crate::stats::{StatsClient, StatsSource};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,relaybot=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = Config::load(config_path.as_deref()).context("Failed to load configuration")?;

    info!("Configuration loaded successfully");
    info!("  Webhook address: {}", config.server.listen_addr);
    info!(
        "  Stats endpoint: {}",
        config.stats.as_ref().map_or("disabled", |s| s.url.as_str())
    );

    let bot = telegram::connect(&config.telegram.api_token).await?;
    let messenger: Arc<dyn Messenger> = Arc::new(TelegramMessenger::new(bot.clone()));

    let stats = match &config.stats {
        Some(stats_config) => {
            Some(Arc::new(StatsClient::new(stats_config)?) as Arc<dyn StatsSource>)
        }
        None => None,
    };

    let registry = Arc::new(Registry::new());
    let (relay_tx, relay_rx) = relay::channel();

    let listener = webhook::bind(&config.server.listen_addr).await?;

    let fanout = FanOut::new(registry.clone(), messenger.clone(), &config.relay);
    let commands = Arc::new(Commands::new(
        registry,
        messenger,
        stats,
        config.telegram.register_reply.clone(),
    ));

    let shutdown = async {
        tokio::signal::ctrl_c().await.ok();
    };

    info!("Bot is starting...");

    tokio::select! {
        result = webhook::serve(listener, relay_tx, shutdown) => {
            if let Err(e) = result {
                error!("{:#}", e);
                return Err(e);
            }
            info!("Webhook server stopped");
        }
        _ = fanout.run(relay_rx) => {
            info!("Fan-out loop stopped");
        }
        result = telegram::run(bot, commands, config.telegram.poll_timeout()) => {
            result?;
            info!("Telegram dispatcher stopped");
        }
    }

    Ok(())
}
