use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::platform::{IncomingUpdate, Messenger, OutgoingMessage};
use crate::registry::Registry;
use crate::stats::{StatsSource, StatsSummary};

const STATS_UNAVAILABLE: &str = "Couldn't fetch stats right now, please try again later.";
const STATS_DISABLED: &str = "Stats are not configured for this bot.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Register,
    Stats,
    Unrecognized,
}

impl Command {
    /// A command is the whole message, optionally suffixed with `@botname`.
    pub fn parse(text: &str) -> Self {
        let text = text.trim();
        if text.contains(char::is_whitespace) {
            return Command::Unrecognized;
        }
        let name = text.split_once('@').map_or(text, |(name, _)| name);
        match name {
            "/register" | "/start" => Command::Register,
            "/stats" => Command::Stats,
            _ => Command::Unrecognized,
        }
    }
}

/// Everything a command needs to act on
pub struct Commands {
    registry: Arc<Registry>,
    messenger: Arc<dyn Messenger>,
    stats: Option<Arc<dyn StatsSource>>,
    register_reply: String,
}

impl Commands {
    pub fn new(
        registry: Arc<Registry>,
        messenger: Arc<dyn Messenger>,
        stats: Option<Arc<dyn StatsSource>>,
        register_reply: String,
    ) -> Self {
        Self {
            registry,
            messenger,
            stats,
            register_reply,
        }
    }

    pub async fn handle_update(&self, update: IncomingUpdate) -> Result<()> {
        match update {
            IncomingUpdate::Message {
                chat_id,
                message_id,
                text,
            } => match Command::parse(&text) {
                Command::Register => self.register(chat_id, message_id).await,
                Command::Stats => self.stats(chat_id).await,
                Command::Unrecognized => {
                    debug!("Ignoring message in chat {}: {}", chat_id, text);
                    Ok(())
                }
            },
            IncomingUpdate::Callback { id, chat_id, data } => {
                self.callback(&id, chat_id, &data).await
            }
        }
    }

    async fn register(&self, chat_id: i64, message_id: i32) -> Result<()> {
        if self.registry.register(chat_id).await {
            info!(
                "Registered chat {} ({} recipient(s))",
                chat_id,
                self.registry.len().await
            );
        } else {
            debug!("Chat {} was already registered", chat_id);
        }

        self.messenger
            .send(OutgoingMessage::text(chat_id, self.register_reply.as_str()).reply_to(message_id))
            .await
    }

    async fn stats(&self, chat_id: i64) -> Result<()> {
        let Some(stats) = &self.stats else {
            return self
                .messenger
                .send(OutgoingMessage::text(chat_id, STATS_DISABLED))
                .await;
        };

        let reply = match stats.fetch_miners().await {
            Ok(miners) => {
                let summary = StatsSummary::from_miners(&miners);
                OutgoingMessage::text(chat_id, summary.headline()).with_buttons(summary.buttons)
            }
            Err(e) => {
                warn!("Stats fetch failed: {:#}", e);
                OutgoingMessage::text(chat_id, STATS_UNAVAILABLE)
            }
        };

        self.messenger.send(reply).await
    }

    async fn callback(&self, id: &str, chat_id: Option<i64>, data: &str) -> Result<()> {
        self.messenger.answer_callback(id, data).await?;

        match chat_id {
            Some(chat_id) => {
                self.messenger
                    .send(OutgoingMessage::text(chat_id, data))
                    .await
            }
            None => {
                debug!("Callback {} has no accessible chat, not echoing", id);
                Ok(())
            }
        }
    }
}
