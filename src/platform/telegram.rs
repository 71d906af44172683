use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{
    CallbackQueryId, InlineKeyboardButton, InlineKeyboardMarkup, MessageId, ReplyParameters,
};
use teloxide::update_listeners::Polling;
use tracing::{debug, error, info, warn};

use crate::commands::Commands;
use crate::platform::{IncomingUpdate, Messenger, OutgoingMessage};

/// Telegram implementation of the outbound side
#[derive(Clone)]
pub struct TelegramMessenger {
    bot: Bot,
}

impl TelegramMessenger {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

/// Telegram's `sendMessage` limit, counted in UTF-16 code units
const MAX_MESSAGE_UNITS: usize = 4096;

/// Split text into chunks of at most `max_units` UTF-16 code units,
/// preferring to break after a newline or space.
fn split_message(text: &str, max_units: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut rest = text;

    loop {
        let mut units = 0;
        let mut end = rest.len();
        for (i, c) in rest.char_indices() {
            units += c.len_utf16();
            if units > max_units {
                end = i;
                break;
            }
        }

        if end == rest.len() {
            chunks.push(rest.to_string());
            return chunks;
        }
        if end == 0 {
            end = rest.chars().next().map_or(rest.len(), char::len_utf8);
        }

        let actual_end = rest[..end]
            .rfind('\n')
            .or_else(|| rest[..end].rfind(' '))
            .map(|pos| pos + 1)
            .unwrap_or(end);

        chunks.push(rest[..actual_end].to_string());
        rest = &rest[actual_end..];
    }
}

#[async_trait]
impl Messenger for TelegramMessenger {
    async fn send(&self, message: OutgoingMessage) -> Result<()> {
        let chat_id = message.chat_id;
        let chunks = split_message(&message.text, MAX_MESSAGE_UNITS);
        let last = chunks.len() - 1;

        let mut markup = (!message.buttons.is_empty()).then(|| {
            InlineKeyboardMarkup::new(
                message
                    .buttons
                    .into_iter()
                    .map(|b| vec![InlineKeyboardButton::callback(b.label, b.data)]),
            )
        });

        // Reply threading goes on the first chunk, the keyboard on the last.
        for (i, chunk) in chunks.into_iter().enumerate() {
            let mut request = self.bot.send_message(ChatId(chat_id), chunk);

            if i == 0 {
                if let Some(reply_to) = message.reply_to {
                    request = request.reply_parameters(ReplyParameters::new(MessageId(reply_to)));
                }
            }
            if i == last {
                if let Some(markup) = markup.take() {
                    request = request.reply_markup(markup);
                }
            }

            request
                .await
                .with_context(|| format!("Failed to send message to chat {}", chat_id))?;
        }
        Ok(())
    }

    async fn answer_callback(&self, callback_id: &str, text: &str) -> Result<()> {
        self.bot
            .answer_callback_query(CallbackQueryId(callback_id.to_string()))
            .text(text)
            .await
            .context("Failed to answer callback query")?;
        Ok(())
    }
}

/// Check the token against Telegram before anything else starts.
pub async fn connect(token: &str) -> Result<Bot> {
    let bot = Bot::new(token);
    let me = bot
        .get_me()
        .await
        .context("Failed to authenticate with Telegram")?;
    info!("Authenticated as @{}", me.username());
    Ok(bot)
}

/// Long-poll Telegram and hand every update to the command dispatcher
pub async fn run(bot: Bot, commands: Arc<Commands>, poll_timeout: Duration) -> Result<()> {
    info!("Starting Telegram platform...");

    let handler = dptree::entry()
        .branch(Update::filter_message().endpoint(handle_message))
        .branch(Update::filter_callback_query().endpoint(handle_callback));

    let listener = Polling::builder(bot.clone()).timeout(poll_timeout).build();

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![commands])
        .default_handler(|upd| async move {
            warn!("Unhandled update: {:?}", upd.id);
        })
        .error_handler(LoggingErrorHandler::with_custom_text("telegram"))
        .build()
        .dispatch_with_listener(
            listener,
            LoggingErrorHandler::with_custom_text("telegram polling"),
        )
        .await;

    Ok(())
}

async fn handle_message(msg: Message, commands: Arc<Commands>) -> ResponseResult<()> {
    let text = match msg.text() {
        Some(t) => t.to_string(),
        None => return Ok(()),
    };

    debug!("Telegram message in chat {}: {}", msg.chat.id, text);

    dispatch(
        &commands,
        IncomingUpdate::Message {
            chat_id: msg.chat.id.0,
            message_id: msg.id.0,
            text,
        },
    )
    .await;
    Ok(())
}

async fn handle_callback(query: CallbackQuery, commands: Arc<Commands>) -> ResponseResult<()> {
    let data = query.data.clone().unwrap_or_default();

    debug!("Telegram callback {}: {}", query.id.0, data);

    dispatch(
        &commands,
        IncomingUpdate::Callback {
            id: query.id.0.clone(),
            chat_id: query.message.as_ref().map(|m| m.chat().id.0),
            data,
        },
    )
    .await;
    Ok(())
}

// Failures stay local to the update that caused them.
async fn dispatch(commands: &Commands, update: IncomingUpdate) {
    if let Err(e) = commands.handle_update(update).await {
        error!("Error handling update: {:#}", e);
    }
}
