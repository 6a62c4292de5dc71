mod feed;

use std::sync::Arc;

use sqlx::SqlitePool;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use common::{Config, ConfigProvider};
use config_store::{ConfigStore, DefaultsProvider, EnvConfigProvider, SqliteConfigProvider};
use feed::{FileSignalFeed, SignalCheck};
use priority::NotificationGate;
use scheduler::{ScheduleFileConfig, SchedulerLoop};
use telegram_ctrl::{send_alert, start_bot, BotDeps};

#[tokio::main]
async fn main() {
    // ── Logging ──────────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // ── Config ────────────────────────────────────────────────────────────────
    let cfg = Config::from_env();
    let schedule_file = ScheduleFileConfig::load(&cfg.schedule_config_path)
        .unwrap_or_else(|e| panic!("Failed to load schedule config: {e}"));
    info!(
        mode = %schedule_file.mode,
        timezone = %schedule_file.timezone,
        priority_config = %cfg.priority_config_name,
        "SignalBot starting"
    );

    // ── Priority config chain: SQLite → env → defaults ────────────────────────
    let mut providers: Vec<Arc<dyn ConfigProvider>> = Vec::new();
    if let Some(url) = &cfg.database_url {
        match connect_db(url).await {
            Ok(db) => {
                info!("Database ready");
                providers.push(Arc::new(SqliteConfigProvider::new(db)));
            }
            Err(e) => warn!(error = %e, "Database unavailable, priority config will not persist"),
        }
    }
    providers.push(Arc::new(EnvConfigProvider::new()));
    providers.push(Arc::new(DefaultsProvider));

    let store = Arc::new(ConfigStore::new(providers));
    let gate = Arc::new(NotificationGate::new(store, cfg.priority_config_name.clone()));
    gate.reload().await;

    // ── Scheduler ─────────────────────────────────────────────────────────────
    let schedule = schedule_file
        .build_schedule()
        .unwrap_or_else(|e| panic!("Invalid schedule config: {e}"));
    let (alert_tx, mut alert_rx) = mpsc::channel::<String>(64);
    let check = SignalCheck::new(FileSignalFeed::new(&cfg.signals_path), gate.clone(), alert_tx);
    let scheduler = SchedulerLoop::new(schedule, Arc::new(check), schedule_file.loop_settings());

    // ── Alert forwarder (sends gated signals to Telegram) ─────────────────────
    let alert_bot = cfg.telegram_token.clone().map(teloxide::Bot::new);
    let chat_ids: Vec<teloxide::types::ChatId> = cfg
        .telegram_allowed_user_ids
        .iter()
        .map(|&id| teloxide::types::ChatId(id))
        .collect();
    tokio::spawn(async move {
        while let Some(msg) = alert_rx.recv().await {
            match &alert_bot {
                Some(bot) => send_alert(bot, &chat_ids, &msg).await,
                None => info!(alert = %msg, "Signal alert (Telegram not configured)"),
            }
        }
    });

    // ── Telegram C2 ───────────────────────────────────────────────────────────
    match cfg.telegram_token.clone() {
        Some(token) => {
            let bot_deps = BotDeps {
                scheduler: scheduler.clone(),
                gate: gate.clone(),
                allowed_user_ids: Arc::new(cfg.telegram_allowed_user_ids.clone()),
            };
            tokio::spawn(start_bot(token, bot_deps));
        }
        None => warn!("TELEGRAM_TOKEN not set, operator bot disabled"),
    }

    // ── Status API ────────────────────────────────────────────────────────────
    let api_state = api::AppState {
        scheduler: scheduler.clone(),
        gate: gate.clone(),
        dashboard_token: cfg.dashboard_token.clone(),
    };
    let port = cfg.dashboard_port;
    tokio::spawn(async move {
        if let Err(e) = api::serve(api_state, port).await {
            error!(error = %e, "Status API stopped");
        }
    });

    scheduler.start().await;

    info!("All subsystems started. Waiting for shutdown signal.");
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
    }
    scheduler.stop().await;
    info!("Shutdown signal received. Exiting.");
}

async fn connect_db(url: &str) -> common::Result<SqlitePool> {
    let db = SqlitePool::connect(url).await?;
    sqlx::migrate!("../../migrations").run(&db).await?;
    Ok(db)
}
