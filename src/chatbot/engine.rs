//! Persona engine - wires inbound private messages to the debounce scheduler.

use std::sync::Arc;

use tracing::{debug, error, info};

use crate::chatbot::database::Database;
use crate::chatbot::debounce::{ChatTransport, DebounceScheduler, ReplyGenerator, SchedulerConfig};

/// An inbound private message, already stripped to what the engine needs.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub chat_id: i64,
    pub user_id: i64,
    pub username: String,
    pub timestamp: String,
    pub text: String,
}

/// The persona engine.
///
/// Resolves the counterparty's persona label for every inbound message and
/// hands the message to the scheduler. The label store is the only state it
/// touches; everything timing-related lives in the scheduler.
pub struct PersonaEngine<G, T> {
    database: Arc<Database>,
    scheduler: DebounceScheduler<G, T>,
    transport: Arc<T>,
    owner_chat_id: Option<i64>,
}

impl<G: ReplyGenerator, T: ChatTransport> PersonaEngine<G, T> {
    pub fn new(
        config: SchedulerConfig,
        owner_chat_id: Option<i64>,
        database: Arc<Database>,
        generator: Arc<G>,
        transport: Arc<T>,
    ) -> Self {
        let scheduler = DebounceScheduler::new(config, generator, transport.clone());
        Self {
            database,
            scheduler,
            transport,
            owner_chat_id,
        }
    }

    /// Handle an incoming private message.
    pub async fn handle_message(&self, msg: ChatMessage) {
        if msg.text.trim().is_empty() {
            debug!("Dropping empty message from {}", msg.user_id);
            return;
        }

        info!(
            "📨 {} ({}) {}: \"{}\"",
            msg.username,
            msg.user_id,
            msg.timestamp,
            msg.text.chars().take(50).collect::<String>()
        );

        let label = self.database.resolve_label(msg.user_id);
        self.scheduler.on_message(msg.chat_id, msg.text, label).await;
    }

    /// Owner maintenance commands. Returns true when the message was
    /// consumed and must not reach the persona.
    ///
    /// `/label <user_id> <label>` re-labels a counterparty; the next flush
    /// for that conversation picks the new label up.
    pub async fn handle_command(&self, msg: &ChatMessage) -> bool {
        if Some(msg.chat_id) != self.owner_chat_id || !msg.text.starts_with('/') {
            return false;
        }

        let mut parts = msg.text.split_whitespace();
        match parts.next() {
            Some("/label") => {
                let reply = match (
                    parts.next().and_then(|s| s.parse::<i64>().ok()),
                    parts.next(),
                ) {
                    (Some(user_id), Some(label)) => {
                        self.database.set_label(user_id, label);
                        info!("Relabeled {} as '{}'", user_id, label);
                        format!("{user_id} → {label}")
                    }
                    _ => "usage: /label <user_id> <label>".to_string(),
                };
                if let Err(e) = self.transport.send_message(msg.chat_id, &reply, true).await {
                    error!("Failed to answer command: {}", e);
                }
                true
            }
            _ => false,
        }
    }

    /// Send a lifecycle notice to the owner chat. Best-effort.
    pub async fn notify_owner(&self, text: &str) {
        let Some(owner_chat_id) = self.owner_chat_id else {
            return;
        };

        info!("Notifying owner ({})", owner_chat_id);
        if let Err(e) = self.transport.send_message(owner_chat_id, text, true).await {
            error!("Failed to notify owner: {}", e);
        }
    }
}
