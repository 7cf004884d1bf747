use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use teloxide::types::ChatId;

use crate::chatbot::{DelayWindow, SchedulerConfig};

/// Errors that can occur when loading configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to read the config file.
    ReadFile { path: PathBuf, source: std::io::Error },
    /// Failed to parse JSON.
    ParseJson { path: PathBuf, source: serde_json::Error },
    /// Validation error.
    Validation(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadFile { path, source } => {
                write!(f, "failed to read config file '{}': {}", path.display(), source)
            }
            Self::ParseJson { path, source } => {
                write!(f, "failed to parse config file '{}': {}", path.display(), source)
            }
            Self::Validation(msg) => write!(f, "config validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ReadFile { source, .. } => Some(source),
            Self::ParseJson { source, .. } => Some(source),
            Self::Validation(_) => None,
        }
    }
}

#[derive(Deserialize)]
struct WarmupAccountFile {
    chat_id: i64,
    name: String,
    token: String,
}

#[derive(Deserialize)]
struct ConfigFile {
    telegram_bot_token: String,
    /// Chat that receives startup/shutdown notices.
    owner_chat_id: Option<i64>,
    /// Chat that receives forwarded log lines.
    log_chat_id: Option<i64>,
    /// Directory for state files (logs, database). Defaults to current directory.
    data_dir: Option<String>,
    /// Base URL of the OpenAI-compatible endpoint serving the persona model.
    generator_base_url: String,
    #[serde(default)]
    generator_api_key: String,
    #[serde(default = "default_generator_model")]
    generator_model: String,
    /// Window for the pause between a burst's first message and the reply.
    #[serde(default = "default_reply_delay_min")]
    reply_delay_min_secs: u64,
    #[serde(default = "default_reply_delay_max")]
    reply_delay_max_secs: u64,
    /// Window for the typing pause before the reply is sent.
    #[serde(default = "default_typing_delay_min")]
    typing_delay_min_secs: u64,
    #[serde(default = "default_typing_delay_max")]
    typing_delay_max_secs: u64,
    #[serde(default = "default_max_concurrent_flushes")]
    max_concurrent_flushes: usize,
    #[serde(default)]
    warmup_lines: Vec<String>,
    #[serde(default)]
    warmup_accounts: Vec<WarmupAccountFile>,
    #[serde(default = "default_warmup_interval_hours")]
    warmup_interval_hours: u64,
}

fn default_generator_model() -> String {
    "persona-ft".to_string()
}

fn default_reply_delay_min() -> u64 {
    10
}

fn default_reply_delay_max() -> u64 {
    70
}

fn default_typing_delay_min() -> u64 {
    5
}

fn default_typing_delay_max() -> u64 {
    15
}

fn default_max_concurrent_flushes() -> usize {
    8
}

fn default_warmup_interval_hours() -> u64 {
    24
}

/// A bot-controlled account taking part in warm-up chatter.
pub struct WarmupAccount {
    pub chat_id: i64,
    pub name: String,
    pub token: String,
}

pub struct Config {
    pub telegram_bot_token: String,
    pub owner_chat_id: Option<i64>,
    pub log_chat_id: Option<ChatId>,
    /// Directory for state files (logs, database).
    pub data_dir: PathBuf,
    pub generator_base_url: String,
    pub generator_api_key: String,
    pub generator_model: String,
    pub reply_delay_secs: (u64, u64),
    pub typing_delay_secs: (u64, u64),
    pub max_concurrent_flushes: usize,
    pub warmup_lines: Vec<String>,
    pub warmup_accounts: Vec<WarmupAccount>,
    pub warmup_interval: Duration,
}

/// Telegram tokens are formatted as {bot_id}:{secret} where bot_id is numeric.
fn validate_token(token: &str, what: &str) -> Result<(), ConfigError> {
    if token.is_empty() {
        return Err(ConfigError::Validation(format!("{what} is required")));
    }
    let parts: Vec<&str> = token.split(':').collect();
    if parts.len() != 2 || parts[0].parse::<u64>().is_err() || parts[1].is_empty() {
        return Err(ConfigError::Validation(format!(
            "{what} appears invalid (expected format: 123456789:ABCdefGHI...)"
        )));
    }
    Ok(())
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config_path = path.as_ref().to_path_buf();
        let content = std::fs::read_to_string(&config_path)
            .map_err(|e| ConfigError::ReadFile { path: config_path.clone(), source: e })?;
        let file: ConfigFile = serde_json::from_str(&content)
            .map_err(|e| ConfigError::ParseJson { path: config_path.clone(), source: e })?;

        validate_token(&file.telegram_bot_token, "telegram_bot_token")?;

        if file.generator_base_url.is_empty() {
            return Err(ConfigError::Validation("generator_base_url is required".into()));
        }
        if file.reply_delay_min_secs > file.reply_delay_max_secs {
            return Err(ConfigError::Validation("reply delay window is inverted".into()));
        }
        if file.reply_delay_max_secs == 0 {
            return Err(ConfigError::Validation("reply delay window must be non-zero".into()));
        }
        if file.typing_delay_min_secs > file.typing_delay_max_secs {
            return Err(ConfigError::Validation("typing delay window is inverted".into()));
        }
        if file.max_concurrent_flushes == 0 {
            return Err(ConfigError::Validation(
                "max_concurrent_flushes must be at least 1".into(),
            ));
        }

        let mut warmup_accounts = Vec::with_capacity(file.warmup_accounts.len());
        for account in file.warmup_accounts {
            if account.name.is_empty() {
                return Err(ConfigError::Validation("warmup account name is required".into()));
            }
            validate_token(&account.token, "warmup account token")?;
            warmup_accounts.push(WarmupAccount {
                chat_id: account.chat_id,
                name: account.name,
                token: account.token,
            });
        }
        if !warmup_accounts.is_empty() && file.warmup_lines.is_empty() {
            return Err(ConfigError::Validation(
                "warmup_lines must not be empty when warmup_accounts are configured".into(),
            ));
        }

        let data_dir = file
            .data_dir
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));

        Ok(Self {
            telegram_bot_token: file.telegram_bot_token,
            owner_chat_id: file.owner_chat_id,
            log_chat_id: file.log_chat_id.map(ChatId),
            data_dir,
            generator_base_url: file.generator_base_url,
            generator_api_key: file.generator_api_key,
            generator_model: file.generator_model,
            reply_delay_secs: (file.reply_delay_min_secs, file.reply_delay_max_secs),
            typing_delay_secs: (file.typing_delay_min_secs, file.typing_delay_max_secs),
            max_concurrent_flushes: file.max_concurrent_flushes,
            warmup_lines: file.warmup_lines,
            warmup_accounts,
            warmup_interval: Duration::from_secs(file.warmup_interval_hours * 3600),
        })
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            reply_delay: DelayWindow::from_secs(self.reply_delay_secs.0, self.reply_delay_secs.1),
            typing_delay: DelayWindow::from_secs(self.typing_delay_secs.0, self.typing_delay_secs.1),
            max_concurrent_flushes: self.max_concurrent_flushes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    fn assert_err<T>(result: Result<T, ConfigError>) -> ConfigError {
        match result {
            Ok(_) => panic!("expected error, got Ok"),
            Err(e) => e,
        }
    }

    #[test]
    fn test_valid_config() {
        let file = write_config(r#"{
            "telegram_bot_token": "123456789:ABCdefGHIjklMNOpqrsTUVwxyz",
            "generator_base_url": "http://localhost:8000"
        }"#);
        let config = Config::load(file.path()).expect("should load valid config");
        assert_eq!(config.generator_model, "persona-ft");
        assert_eq!(config.reply_delay_secs, (10, 70));
        assert_eq!(config.typing_delay_secs, (5, 15));
        assert_eq!(config.max_concurrent_flushes, 8);
        assert_eq!(config.warmup_interval, Duration::from_secs(86_400));
    }

    #[test]
    fn test_empty_token() {
        let file = write_config(r#"{
            "telegram_bot_token": "",
            "generator_base_url": "http://localhost:8000"
        }"#);
        let err = assert_err(Config::load(file.path()));
        assert!(matches!(err, ConfigError::Validation(_)));
        assert!(err.to_string().contains("telegram_bot_token"));
    }

    #[test]
    fn test_invalid_token_format_no_colon() {
        let file = write_config(r#"{
            "telegram_bot_token": "invalid_token_no_colon",
            "generator_base_url": "http://localhost:8000"
        }"#);
        let err = assert_err(Config::load(file.path()));
        assert!(matches!(err, ConfigError::Validation(_)));
        assert!(err.to_string().contains("invalid"));
    }

    #[test]
    fn test_invalid_token_format_non_numeric_id() {
        let file = write_config(r#"{
            "telegram_bot_token": "notanumber:ABCdef",
            "generator_base_url": "http://localhost:8000"
        }"#);
        let err = assert_err(Config::load(file.path()));
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_missing_generator_url() {
        let file = write_config(r#"{
            "telegram_bot_token": "123456789:ABCdef",
            "generator_base_url": ""
        }"#);
        let err = assert_err(Config::load(file.path()));
        assert!(err.to_string().contains("generator_base_url"));
    }

    #[test]
    fn test_inverted_reply_window() {
        let file = write_config(r#"{
            "telegram_bot_token": "123456789:ABCdef",
            "generator_base_url": "http://localhost:8000",
            "reply_delay_min_secs": 70,
            "reply_delay_max_secs": 10
        }"#);
        let err = assert_err(Config::load(file.path()));
        assert!(err.to_string().contains("inverted"));
    }

    #[test]
    fn test_zero_flush_cap() {
        let file = write_config(r#"{
            "telegram_bot_token": "123456789:ABCdef",
            "generator_base_url": "http://localhost:8000",
            "max_concurrent_flushes": 0
        }"#);
        let err = assert_err(Config::load(file.path()));
        assert!(err.to_string().contains("max_concurrent_flushes"));
    }

    #[test]
    fn test_warmup_account_with_bad_token() {
        let file = write_config(r#"{
            "telegram_bot_token": "123456789:ABCdef",
            "generator_base_url": "http://localhost:8000",
            "warmup_lines": ["hey"],
            "warmup_accounts": [
                { "chat_id": 100, "name": "alpha", "token": "nope" }
            ]
        }"#);
        let err = assert_err(Config::load(file.path()));
        assert!(err.to_string().contains("warmup account token"));
    }

    #[test]
    fn test_warmup_accounts_require_lines() {
        let file = write_config(r#"{
            "telegram_bot_token": "123456789:ABCdef",
            "generator_base_url": "http://localhost:8000",
            "warmup_accounts": [
                { "chat_id": 100, "name": "alpha", "token": "987654321:XYZabc" }
            ]
        }"#);
        let err = assert_err(Config::load(file.path()));
        assert!(err.to_string().contains("warmup_lines"));
    }

    #[test]
    fn test_file_not_found() {
        let err = assert_err(Config::load("/nonexistent/path/config.json"));
        assert!(matches!(err, ConfigError::ReadFile { .. }));
    }

    #[test]
    fn test_invalid_json() {
        let file = write_config("{ invalid json }");
        let err = assert_err(Config::load(file.path()));
        assert!(matches!(err, ConfigError::ParseJson { .. }));
    }
}
