use std::time::Duration;

use teloxide::prelude::*;
use teloxide::types::ChatId;
use tokio::sync::mpsc;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;

/// Telegram message length cap.
const MAX_LOG_CHARS: usize = 4096;

/// Flush the INFO buffer at this size even between ticks.
const BUFFER_FLUSH_AT: usize = 30;

/// Log line routed by severity.
enum LogLine {
    /// WARN/ERROR - forwarded immediately, with notification.
    Urgent(String),
    /// INFO - buffered and forwarded in quiet batches.
    Routine(String),
}

/// Tracing layer that mirrors log lines into a Telegram chat.
pub struct TelegramLogLayer {
    tx: mpsc::UnboundedSender<LogLine>,
}

impl TelegramLogLayer {
    pub fn new(bot: Bot, chat_id: ChatId) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<LogLine>();

        tokio::spawn(async move {
            let mut buffer: Vec<String> = Vec::new();
            let mut interval = tokio::time::interval(Duration::from_secs(10));

            loop {
                tokio::select! {
                    line = rx.recv() => {
                        match line {
                            Some(LogLine::Urgent(text)) => {
                                deliver(&bot, chat_id, &text, true).await;
                            }
                            Some(LogLine::Routine(text)) => {
                                buffer.push(text);
                                if buffer.len() >= BUFFER_FLUSH_AT {
                                    flush(&bot, chat_id, &mut buffer).await;
                                }
                            }
                            None => break,
                        }
                    }
                    _ = interval.tick() => {
                        flush(&bot, chat_id, &mut buffer).await;
                    }
                }
            }
        });

        Self { tx }
    }
}

async fn deliver(bot: &Bot, chat_id: ChatId, text: &str, notify: bool) {
    let text = if text.chars().count() > MAX_LOG_CHARS {
        let truncated: String = text.chars().take(MAX_LOG_CHARS - 3).collect();
        format!("{}...", truncated)
    } else {
        text.to_string()
    };

    let mut request = bot.send_message(chat_id, &text);
    if !notify {
        request = request.disable_notification(true);
    }
    if let Err(e) = request.await {
        eprintln!("Failed to forward log to Telegram: {e}");
    }
}

async fn flush(bot: &Bot, chat_id: ChatId, buffer: &mut Vec<String>) {
    if buffer.is_empty() {
        return;
    }
    let combined = buffer.join("\n");
    buffer.clear();
    deliver(bot, chat_id, &combined, false).await;
}

struct MessageVisitor {
    message: String,
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        } else if self.message.is_empty() {
            self.message = format!("{} = {:?}", field.name(), value);
        } else {
            self.message
                .push_str(&format!(", {} = {:?}", field.name(), value));
        }
    }
}

impl<S: Subscriber> Layer<S> for TelegramLogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let level = *event.metadata().level();

        // DEBUG/TRACE stay local.
        if level > Level::INFO {
            return;
        }

        let mut visitor = MessageVisitor {
            message: String::new(),
        };
        event.record(&mut visitor);

        let line = match level {
            Level::ERROR => LogLine::Urgent(format!("❌ {}", visitor.message)),
            Level::WARN => LogLine::Urgent(format!("⚠️ {}", visitor.message)),
            _ => LogLine::Routine(visitor.message),
        };

        if self.tx.send(line).is_err() {
            eprintln!("Log channel closed, line dropped");
        }
    }
}
