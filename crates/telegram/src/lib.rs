pub mod commands;

pub use commands::{send_alert, start_bot, BotDeps, Command};
