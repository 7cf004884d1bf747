mod chatbot;
mod config;
mod telegram_log;

use std::collections::HashSet;
use std::sync::Arc;

use teloxide::prelude::*;
use teloxide::types::ChatKind;
use tracing::info;
use tracing_subscriber::prelude::*;

use chatbot::{Account, ChatMessage, Database, ModelClient, PersonaEngine, TelegramClient, WarmupPool};
use config::Config;

type Engine = PersonaEngine<ModelClient, TelegramClient>;

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "doppel.json".to_string());
    let config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    let bot = Bot::new(&config.telegram_bot_token);

    // Setup logging
    let log_dir = config.data_dir.join("logs");
    std::fs::create_dir_all(&log_dir).ok();
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("doppel.log"))
        .expect("Failed to open log file");
    let (non_blocking, _guard) = tracing_appender::non_blocking(log_file);

    let registry = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        );

    if let Some(log_chat_id) = config.log_chat_id {
        let tg_layer = telegram_log::TelegramLogLayer::new(bot.clone(), log_chat_id);
        registry.with(tg_layer).init();
    } else {
        registry.init();
    }

    info!("🚀 Starting doppel...");
    info!("Loaded config from {config_path}");
    info!(
        "Reply delay {}..{}s, typing delay {}..{}s",
        config.reply_delay_secs.0,
        config.reply_delay_secs.1,
        config.typing_delay_secs.0,
        config.typing_delay_secs.1
    );

    let database = Arc::new(Database::load_or_new(&config.data_dir.join("doppel.db")));
    let generator = Arc::new(ModelClient::new(
        config.generator_base_url.clone(),
        config.generator_api_key.clone(),
        config.generator_model.clone(),
    ));
    let transport = Arc::new(TelegramClient::new(bot.clone()));

    let engine = Arc::new(Engine::new(
        config.scheduler_config(),
        config.owner_chat_id,
        database.clone(),
        generator,
        transport,
    ));

    // Accounts dropped from the config are retired from the database too.
    let configured: HashSet<i64> = config.warmup_accounts.iter().map(|a| a.chat_id).collect();
    for account in database.all_accounts() {
        if !configured.contains(&account.chat_id) {
            info!("Retiring account {} ({})", account.name, account.chat_id);
            database.delete_account(account.chat_id);
        }
    }

    // Warm-up pool: one transport per bot-controlled account. Statuses
    // persisted in the database win over the config defaults.
    if config.warmup_accounts.len() >= 2 {
        let mut pool = WarmupPool::new(config.warmup_lines.clone());
        for account in &config.warmup_accounts {
            let status = database.account_status(account.chat_id).unwrap_or(0);
            database.upsert_account(account.chat_id, &account.name, status);
            let client = TelegramClient::new(Bot::new(&account.token));
            pool.add(
                Account {
                    chat_id: account.chat_id,
                    name: account.name.clone(),
                    status,
                },
                Arc::new(client),
            );
        }
        info!("Warm-up chatter enabled ({} accounts)", pool.len());
        chatbot::warmup::spawn_daily(Arc::new(pool), database.clone(), config.warmup_interval);
    } else {
        info!("Warm-up chatter disabled");
    }

    engine.notify_owner("back online").await;

    let handler = dptree::entry().branch(Update::filter_message().endpoint(handle_new_message));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![engine.clone()])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    engine.notify_owner("we are down").await;
}

async fn handle_new_message(msg: Message, engine: Arc<Engine>) -> ResponseResult<()> {
    // The persona only talks in private dialogs.
    if !matches!(msg.chat.kind, ChatKind::Private(_)) {
        return Ok(());
    }

    let user = match msg.from {
        Some(ref u) => u,
        None => return Ok(()),
    };

    let text = match msg.text() {
        Some(t) => t,
        None => return Ok(()),
    };

    let username = user
        .username
        .as_deref()
        .unwrap_or(&user.first_name)
        .to_string();

    let chat_msg = ChatMessage {
        chat_id: msg.chat.id.0,
        user_id: user.id.0 as i64,
        username,
        timestamp: msg.date.format("%Y-%m-%d %H:%M").to_string(),
        text: text.to_string(),
    };

    if engine.handle_command(&chat_msg).await {
        return Ok(());
    }

    engine.handle_message(chat_msg).await;
    Ok(())
}
