//! Chatbot module - the live persona bot.

pub mod database;
pub mod debounce;
pub mod engine;
pub mod generator;
pub mod telegram;
pub mod warmup;

pub use database::{Account, Database};
pub use debounce::{ChatTransport, DebounceScheduler, DelayWindow, ReplyGenerator, SchedulerConfig};
pub use engine::{ChatMessage, PersonaEngine};
pub use generator::ModelClient;
pub use telegram::TelegramClient;
pub use warmup::WarmupPool;
