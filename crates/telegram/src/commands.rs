use std::sync::Arc;

use chrono::Utc;
use teloxide::{dispatching::UpdateHandler, prelude::*, utils::command::BotCommands};
use tracing::{info, warn};

use common::{DetectedSignal, PriorityConfig, PriorityLevel, SignalDescriptor};
use priority::{Mutation, NotificationGate};
use scheduler::{SchedulerLoop, SchedulerStatus};

type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Dependencies injected into every handler via `dptree`.
#[derive(Clone)]
pub struct BotDeps {
    pub scheduler: SchedulerLoop,
    pub gate: Arc<NotificationGate>,
    pub allowed_user_ids: Arc<Vec<i64>>,
}

/// Telegram bot commands exposed to the operator.
#[derive(BotCommands, Clone, Debug, PartialEq)]
#[command(rename_rule = "lowercase", description = "SignalBot commands:")]
pub enum Command {
    #[command(description = "Start the signal scheduler")]
    Start,
    #[command(description = "Stop the signal scheduler")]
    Stop,
    #[command(description = "Show scheduler status and upcoming runs")]
    Status,
    #[command(description = "Show the active priority config")]
    Priority,
    #[command(description = "Set the minimum level: CRITICAL, HIGH, MEDIUM, LOW or MINIMAL")]
    Level(String),
    #[command(description = "Add a VIP ticker")]
    VipAdd(String),
    #[command(description = "Remove a VIP ticker")]
    VipRemove(String),
    #[command(description = "Add a VIP timeframe")]
    VipTfAdd(String),
    #[command(description = "Remove a VIP timeframe")]
    VipTfRemove(String),
    #[command(description = "Reload the priority config from storage")]
    Reload,
    #[command(description = "Score a sample signal for a ticker")]
    Test(String),
}

/// Start the Telegram bot in long-polling mode.
pub async fn start_bot(token: String, deps: BotDeps) {
    let bot = Bot::new(token);
    let deps = Arc::new(deps);

    info!("Telegram bot starting (long-polling)");

    Dispatcher::builder(bot, schema())
        .dependencies(dptree::deps![deps])
        .build()
        .dispatch()
        .await;
}

fn schema() -> UpdateHandler<Box<dyn std::error::Error + Send + Sync>> {
    use dptree::case;

    let command_handler = teloxide::filter_command::<Command, _>()
        .branch(case![Command::Start].endpoint(handle_start))
        .branch(case![Command::Stop].endpoint(handle_stop))
        .branch(case![Command::Status].endpoint(handle_status))
        .branch(case![Command::Priority].endpoint(handle_priority))
        .branch(case![Command::Level(level)].endpoint(handle_level))
        .branch(case![Command::VipAdd(ticker)].endpoint(handle_vip_add))
        .branch(case![Command::VipRemove(ticker)].endpoint(handle_vip_remove))
        .branch(case![Command::VipTfAdd(timeframe)].endpoint(handle_vip_tf_add))
        .branch(case![Command::VipTfRemove(timeframe)].endpoint(handle_vip_tf_remove))
        .branch(case![Command::Reload].endpoint(handle_reload))
        .branch(case![Command::Test(ticker)].endpoint(handle_test));

    Update::filter_message()
        .filter_map(|msg: Message| msg.from().map(|u| u.id))
        .filter_async(auth_filter)
        .branch(command_handler)
}

/// Silently drop messages from users not in the allowed list.
async fn auth_filter(user_id: UserId, deps: Arc<BotDeps>) -> bool {
    let uid = user_id.0 as i64;
    let allowed = deps.allowed_user_ids.contains(&uid);
    if !allowed {
        warn!(user_id = uid, "Unauthorized Telegram access attempt");
    }
    allowed
}

async fn handle_start(bot: Bot, msg: Message, deps: Arc<BotDeps>) -> HandlerResult {
    let text = if deps.scheduler.start().await {
        "Scheduler started."
    } else {
        "Scheduler is already running."
    };
    bot.send_message(msg.chat.id, text).await?;
    Ok(())
}

async fn handle_stop(bot: Bot, msg: Message, deps: Arc<BotDeps>) -> HandlerResult {
    let text = if deps.scheduler.stop().await {
        "Scheduler stopped."
    } else {
        "Scheduler is already stopped."
    };
    bot.send_message(msg.chat.id, text).await?;
    Ok(())
}

async fn handle_status(bot: Bot, msg: Message, deps: Arc<BotDeps>) -> HandlerResult {
    let status = deps.scheduler.status().await;
    bot.send_message(msg.chat.id, render_status(&status)).await?;
    Ok(())
}

async fn handle_priority(bot: Bot, msg: Message, deps: Arc<BotDeps>) -> HandlerResult {
    let config = deps.gate.config().await;
    let source = deps.gate.config_source().await.unwrap_or_else(|| "defaults".into());
    bot.send_message(msg.chat.id, render_config(&config, &source)).await?;
    Ok(())
}

async fn handle_level(bot: Bot, msg: Message, deps: Arc<BotDeps>, level: String) -> HandlerResult {
    let text = match level.parse::<PriorityLevel>() {
        Ok(level) => {
            let m = deps.gate.set_min_level(level).await;
            format!("Minimum level set to {level}.{}", persisted_note(m))
        }
        Err(e) => format!("{e}. Valid levels: CRITICAL, HIGH, MEDIUM, LOW, MINIMAL"),
    };
    bot.send_message(msg.chat.id, text).await?;
    Ok(())
}

async fn handle_vip_add(bot: Bot, msg: Message, deps: Arc<BotDeps>, ticker: String) -> HandlerResult {
    let text = match non_empty(&ticker) {
        Some(t) => {
            let m = deps.gate.add_vip_ticker(t).await;
            mutation_reply(m, &format!("Added {} to VIP tickers", t.to_uppercase()), "already a VIP ticker")
        }
        None => "Usage: /vipadd TICKER".to_string(),
    };
    bot.send_message(msg.chat.id, text).await?;
    Ok(())
}

async fn handle_vip_remove(bot: Bot, msg: Message, deps: Arc<BotDeps>, ticker: String) -> HandlerResult {
    let text = match non_empty(&ticker) {
        Some(t) => {
            let m = deps.gate.remove_vip_ticker(t).await;
            mutation_reply(m, &format!("Removed {} from VIP tickers", t.to_uppercase()), "not a VIP ticker")
        }
        None => "Usage: /vipremove TICKER".to_string(),
    };
    bot.send_message(msg.chat.id, text).await?;
    Ok(())
}

async fn handle_vip_tf_add(bot: Bot, msg: Message, deps: Arc<BotDeps>, timeframe: String) -> HandlerResult {
    let text = match non_empty(&timeframe) {
        Some(tf) => {
            let m = deps.gate.add_vip_timeframe(tf).await;
            mutation_reply(m, &format!("Added {tf} to VIP timeframes"), "already a VIP timeframe")
        }
        None => "Usage: /viptfadd TIMEFRAME".to_string(),
    };
    bot.send_message(msg.chat.id, text).await?;
    Ok(())
}

async fn handle_vip_tf_remove(
    bot: Bot,
    msg: Message,
    deps: Arc<BotDeps>,
    timeframe: String,
) -> HandlerResult {
    let text = match non_empty(&timeframe) {
        Some(tf) => {
            let m = deps.gate.remove_vip_timeframe(tf).await;
            mutation_reply(m, &format!("Removed {tf} from VIP timeframes"), "not a VIP timeframe")
        }
        None => "Usage: /viptfremove TIMEFRAME".to_string(),
    };
    bot.send_message(msg.chat.id, text).await?;
    Ok(())
}

async fn handle_reload(bot: Bot, msg: Message, deps: Arc<BotDeps>) -> HandlerResult {
    let config = deps.gate.reload().await;
    let source = deps.gate.config_source().await.unwrap_or_else(|| "defaults".into());
    let text = format!("Reloaded.\n\n{}", render_config(&config, &source));
    bot.send_message(msg.chat.id, text).await?;
    Ok(())
}

async fn handle_test(bot: Bot, msg: Message, deps: Arc<BotDeps>, ticker: String) -> HandlerResult {
    let text = match non_empty(&ticker) {
        Some(t) => {
            let sample = sample_signal(t);
            let score = deps.gate.score(&sample).await;
            format!("Priority test: {} (1d)\n\n{}", sample.ticker, score.breakdown())
        }
        None => "Usage: /test TICKER".to_string(),
    };
    bot.send_message(msg.chat.id, text).await?;
    Ok(())
}

/// Send a proactive alert to all configured chat IDs.
pub async fn send_alert(bot: &Bot, chat_ids: &[ChatId], message: &str) {
    for &chat_id in chat_ids {
        if let Err(e) = bot.send_message(chat_id, message).await {
            warn!(chat_id = ?chat_id, error = %e, "Failed to send Telegram alert");
        }
    }
}

// ─── Rendering ────────────────────────────────────────────────────────────────

fn non_empty(arg: &str) -> Option<&str> {
    let arg = arg.trim();
    (!arg.is_empty()).then_some(arg)
}

/// A fresh strong Wave Trend buy on the daily chart.
fn sample_signal(ticker: &str) -> DetectedSignal {
    DetectedSignal::new(
        ticker.to_uppercase(),
        "1d",
        SignalDescriptor::new("WT Buy Signal", "Strong", "Wave Trend", Some(Utc::now())),
    )
}

fn persisted_note(m: Mutation) -> &'static str {
    if m.persisted {
        ""
    } else {
        " (not saved: config storage is unavailable)"
    }
}

fn mutation_reply(m: Mutation, done: &str, unchanged: &str) -> String {
    if m.changed {
        format!("{done}.{}", persisted_note(m))
    } else {
        format!("Nothing to do: {unchanged}.")
    }
}

fn render_config(config: &PriorityConfig, source: &str) -> String {
    let join = |items: &std::collections::BTreeSet<String>| {
        if items.is_empty() {
            "(none)".to_string()
        } else {
            items.iter().cloned().collect::<Vec<_>>().join(", ")
        }
    };
    let t = &config.thresholds;
    format!(
        "Priority config '{}' (from {source})\n\
         Minimum level: {}\n\
         Thresholds: CRITICAL {} / HIGH {} / MEDIUM {} / LOW {}\n\
         VIP tickers: {}\n\
         VIP timeframes: {}",
        config.name,
        config.min_level,
        t.critical,
        t.high,
        t.medium,
        t.low,
        join(&config.vip_tickers),
        join(&config.vip_timeframes),
    )
}

fn render_status(status: &SchedulerStatus) -> String {
    let tz: chrono_tz::Tz = status.timezone.parse().unwrap_or(chrono_tz::UTC);
    let mut text = format!(
        "SignalBot Status\n\
         Scheduler: {} ({})\n\
         Cycles: {}\n",
        status.state, status.mode, status.cycles_completed,
    );

    match (&status.next_run, &status.next_run_reason) {
        (Some(at), Some(reason)) => {
            let mins = status.seconds_until_next_run / 60;
            text.push_str(&format!(
                "Next run: {} ({reason}) in {mins} min\n",
                at.with_timezone(&tz).format("%a %H:%M %Z"),
            ));
        }
        _ => text.push_str("Next run: none scheduled\n"),
    }

    if !status.upcoming.is_empty() {
        text.push_str("\nUpcoming:\n");
        for run in &status.upcoming {
            let marker = if run.is_priority { "!" } else { "-" };
            text.push_str(&format!(
                "{marker} {} {}\n",
                run.at.with_timezone(&tz).format("%H:%M"),
                run.reason
            ));
        }
    }
    text
}
