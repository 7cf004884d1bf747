//! Telegram client using teloxide.

use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::ChatAction;
use tracing::{debug, warn};

use crate::chatbot::debounce::ChatTransport;

/// Telegram API client for one bot account.
pub struct TelegramClient {
    bot: Bot,
}

impl TelegramClient {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl ChatTransport for TelegramClient {
    async fn read_history(&self, chat_id: i64) -> Result<(), String> {
        // The Bot API exposes no read-receipt call; only user-account
        // transports can mark a dialog as read.
        debug!("No read receipt available for chat {}", chat_id);
        Ok(())
    }

    async fn send_typing(&self, chat_id: i64) -> Result<(), String> {
        self.bot
            .send_chat_action(ChatId(chat_id), ChatAction::Typing)
            .await
            .map(|_| ())
            .map_err(|e| {
                let msg = format!("Failed to send typing action: {e}");
                warn!("{}", msg);
                msg
            })
    }

    async fn send_message(&self, chat_id: i64, text: &str, notify: bool) -> Result<i64, String> {
        let mut request = self.bot.send_message(ChatId(chat_id), text);
        if !notify {
            request = request.disable_notification(true);
        }

        request.await.map(|msg| msg.id.0 as i64).map_err(|e| {
            let msg = format!("Failed to send: {e}");
            warn!("{}", msg);
            msg
        })
    }
}
