use crate::DEFAULT_CONFIG_NAME;

/// Process settings loaded from environment variables at startup.
///
/// Only the dashboard token is required. Everything the priority engine needs
/// degrades instead: no `DATABASE_URL` means the config chain starts at the
/// environment, no Telegram token means no operator bot and no alerts.
#[derive(Debug, Clone)]
pub struct Config {
    // Telegram
    pub telegram_token: Option<String>,
    pub telegram_allowed_user_ids: Vec<i64>,

    // Dashboard
    pub dashboard_token: String,
    pub dashboard_port: u16,

    // Database
    pub database_url: Option<String>,

    // Scheduling / priority
    pub schedule_config_path: String,
    pub priority_config_name: String,

    // Detector output consumed each cycle
    pub signals_path: String,
}

impl Config {
    /// Load all configuration from environment variables.
    /// Loads `.env` if present. Panics on a missing or malformed required variable.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv(); // ignore error if .env not present

        let telegram_allowed_user_ids = optional_env("TELEGRAM_ALLOWED_USER_IDS")
            .map(|raw| {
                raw.split(',')
                    .filter(|s| !s.trim().is_empty())
                    .map(|s| {
                        s.trim().parse::<i64>().unwrap_or_else(|_| {
                            panic!(
                                "TELEGRAM_ALLOWED_USER_IDS contains non-numeric ID: '{}'",
                                s.trim()
                            )
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        Config {
            telegram_token: optional_env("TELEGRAM_TOKEN").filter(|t| !t.is_empty()),
            telegram_allowed_user_ids,
            dashboard_token: required_env("DASHBOARD_TOKEN"),
            dashboard_port: optional_env("DASHBOARD_PORT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(8080),
            database_url: optional_env("DATABASE_URL").filter(|u| !u.is_empty()),
            schedule_config_path: optional_env("SCHEDULE_CONFIG_PATH")
                .unwrap_or_else(|| "config/schedule.toml".to_string()),
            priority_config_name: optional_env("PRIORITY_CONFIG_NAME")
                .unwrap_or_else(|| DEFAULT_CONFIG_NAME.to_string()),
            signals_path: optional_env("SIGNALS_PATH")
                .unwrap_or_else(|| "data/signals.json".to_string()),
        }
    }
}

fn required_env(key: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| {
        panic!("Required environment variable '{key}' is not set. Check your .env file.")
    })
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}
