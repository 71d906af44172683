pub mod telegram;

use anyhow::Result;
use async_trait::async_trait;

/// An update received from the chat platform
#[derive(Debug, Clone, PartialEq)]
pub enum IncomingUpdate {
    Message {
        chat_id: i64,
        message_id: i32,
        text: String,
    },
    /// Inline keyboard button press
    Callback {
        id: String,
        /// Absent when the originating message is no longer accessible
        chat_id: Option<i64>,
        data: String,
    },
}

/// Inline keyboard button carrying an opaque callback payload
#[derive(Debug, Clone, PartialEq)]
pub struct Button {
    pub label: String,
    pub data: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingMessage {
    pub chat_id: i64,
    pub text: String,
    pub reply_to: Option<i32>,
    /// Rendered one button per row
    pub buttons: Vec<Button>,
}

impl OutgoingMessage {
    pub fn text(chat_id: i64, text: impl Into<String>) -> Self {
        Self {
            chat_id,
            text: text.into(),
            reply_to: None,
            buttons: Vec::new(),
        }
    }

    pub fn reply_to(mut self, message_id: i32) -> Self {
        self.reply_to = Some(message_id);
        self
    }

    pub fn with_buttons(mut self, buttons: Vec<Button>) -> Self {
        self.buttons = buttons;
        self
    }
}

/// Outbound side of the chat platform
#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send(&self, message: OutgoingMessage) -> Result<()>;

    async fn answer_callback(&self, callback_id: &str, text: &str) -> Result<()>;
}
