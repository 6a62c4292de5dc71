use std::collections::BTreeSet;

use async_trait::async_trait;
use sqlx::SqlitePool;
use tracing::{debug, info};

use common::{normalize_ticker, ConfigProvider, Error, PriorityConfig, PriorityLevel, Result, Thresholds};

/// `priority_config` row as stored. VIP lists are JSON arrays.
#[derive(Debug, sqlx::FromRow)]
struct PriorityConfigRow {
    config_name: String,
    min_priority_level: String,
    critical_threshold: i64,
    high_threshold: i64,
    medium_threshold: i64,
    low_threshold: i64,
    vip_tickers: String,
    vip_timeframes: String,
    is_active: bool,
}

impl PriorityConfigRow {
    fn into_config(self) -> Result<PriorityConfig> {
        let vip_tickers: Vec<String> = serde_json::from_str(&self.vip_tickers)?;
        let vip_timeframes: Vec<String> = serde_json::from_str(&self.vip_timeframes)?;
        Ok(PriorityConfig {
            min_level: self.min_priority_level.parse::<PriorityLevel>()?,
            thresholds: Thresholds {
                critical: threshold(&self.config_name, "critical_threshold", self.critical_threshold)?,
                high: threshold(&self.config_name, "high_threshold", self.high_threshold)?,
                medium: threshold(&self.config_name, "medium_threshold", self.medium_threshold)?,
                low: threshold(&self.config_name, "low_threshold", self.low_threshold)?,
            },
            // Rows may come from other tooling; lookups are upper-case.
            vip_tickers: vip_tickers.iter().map(|t| normalize_ticker(t)).collect::<BTreeSet<_>>(),
            vip_timeframes: vip_timeframes
                .iter()
                .map(|tf| tf.trim().to_string())
                .collect::<BTreeSet<_>>(),
            active: self.is_active,
            name: self.config_name,
        })
    }
}

fn threshold(config_name: &str, column: &str, value: i64) -> Result<i32> {
    i32::try_from(value)
        .map_err(|_| Error::Config(format!("{column} = {value} out of range in config '{config_name}'")))
}

/// Reads and upserts named configs in the `priority_config` table.
///
/// The table comes from `migrations/`; run them before handing the pool over.
#[derive(Clone)]
pub struct SqliteConfigProvider {
    db: SqlitePool,
}

impl SqliteConfigProvider {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Names of every stored config with their active flag, by name.
    pub async fn list(&self) -> Result<Vec<(String, bool)>> {
        let rows: Vec<(String, bool)> = sqlx::query_as(
            "SELECT config_name, is_active FROM priority_config ORDER BY config_name",
        )
        .fetch_all(&self.db)
        .await?;
        Ok(rows)
    }
}

#[async_trait]
impl ConfigProvider for SqliteConfigProvider {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn try_load(&self, config_name: &str) -> Result<Option<PriorityConfig>> {
        let row: Option<PriorityConfigRow> = sqlx::query_as(
            r#"
            SELECT config_name, min_priority_level, critical_threshold, high_threshold,
                   medium_threshold, low_threshold, vip_tickers, vip_timeframes, is_active
            FROM priority_config
            WHERE config_name = ?1 AND is_active = 1
            "#,
        )
        .bind(config_name)
        .fetch_optional(&self.db)
        .await?;

        match row {
            Some(row) => {
                debug!(config = config_name, "Loaded priority config row");
                row.into_config().map(Some)
            }
            None => Ok(None),
        }
    }

    async fn save(&self, config: &PriorityConfig) -> Result<()> {
        let tickers = serde_json::to_string(&config.vip_tickers)?;
        let timeframes = serde_json::to_string(&config.vip_timeframes)?;

        sqlx::query(
            r#"
            INSERT INTO priority_config
                (config_name, min_priority_level, critical_threshold, high_threshold,
                 medium_threshold, low_threshold, vip_tickers, vip_timeframes, is_active)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(config_name) DO UPDATE SET
                min_priority_level = excluded.min_priority_level,
                critical_threshold = excluded.critical_threshold,
                high_threshold     = excluded.high_threshold,
                medium_threshold   = excluded.medium_threshold,
                low_threshold      = excluded.low_threshold,
                vip_tickers        = excluded.vip_tickers,
                vip_timeframes     = excluded.vip_timeframes,
                is_active          = excluded.is_active,
                updated_at         = CURRENT_TIMESTAMP
            "#,
        )
        .bind(&config.name)
        .bind(config.min_level.as_str())
        .bind(config.thresholds.critical)
        .bind(config.thresholds.high)
        .bind(config.thresholds.medium)
        .bind(config.thresholds.low)
        .bind(tickers)
        .bind(timeframes)
        .bind(config.active)
        .execute(&self.db)
        .await?;

        info!(config = %config.name, "Priority config saved");
        Ok(())
    }

    fn is_writable(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn provider() -> SqliteConfigProvider {
        // One connection: every connection to :memory: is its own database.
        let db = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::migrate!("../../migrations").run(&db).await.unwrap();
        SqliteConfigProvider::new(db)
    }

    #[tokio::test]
    async fn missing_row_is_not_found() {
        let p = provider().await;
        assert!(p.try_load("default").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_then_load_keeps_sets() {
        let p = provider().await;
        let mut cfg = PriorityConfig::defaults("trading_hours");
        cfg.min_level = PriorityLevel::High;
        cfg.vip_tickers.insert("MSFT".into());

        p.save(&cfg).await.unwrap();
        let loaded = p.try_load("trading_hours").await.unwrap().unwrap();
        assert_eq!(loaded, cfg);
    }

    #[tokio::test]
    async fn save_upserts_by_name() {
        let p = provider().await;
        let mut cfg = PriorityConfig::default();
        p.save(&cfg).await.unwrap();

        cfg.thresholds.low = 25;
        cfg.vip_tickers.remove("TSLA");
        p.save(&cfg).await.unwrap();

        let loaded = p.try_load("default").await.unwrap().unwrap();
        assert_eq!(loaded.thresholds.low, 25);
        assert!(!loaded.is_vip_ticker("TSLA"));
        assert_eq!(p.list().await.unwrap(), vec![("default".to_string(), true)]);
    }

    #[tokio::test]
    async fn inactive_rows_are_skipped() {
        let p = provider().await;
        let mut cfg = PriorityConfig::defaults("after_hours");
        cfg.active = false;
        p.save(&cfg).await.unwrap();

        assert!(p.try_load("after_hours").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn corrupt_level_is_an_error() {
        let p = provider().await;
        p.save(&PriorityConfig::default()).await.unwrap();
        sqlx::query("UPDATE priority_config SET min_priority_level = 'URGENT'")
            .execute(&p.db)
            .await
            .unwrap();

        assert!(p.try_load("default").await.is_err());
    }

    #[tokio::test]
    async fn stored_tickers_are_upper_cased() {
        let p = provider().await;
        p.save(&PriorityConfig::default()).await.unwrap();
        sqlx::query("UPDATE priority_config SET vip_tickers = '[\"spy\", \" amd \"]'")
            .execute(&p.db)
            .await
            .unwrap();

        let loaded = p.try_load("default").await.unwrap().unwrap();
        assert!(loaded.is_vip_ticker("spy"));
        assert!(loaded.is_vip_ticker("SPY"));
        assert!(loaded.vip_tickers.contains("AMD"));
    }

    #[tokio::test]
    async fn out_of_range_threshold_is_a_config_error() {
        let p = provider().await;
        p.save(&PriorityConfig::default()).await.unwrap();
        sqlx::query("UPDATE priority_config SET critical_threshold = 4294967386")
            .execute(&p.db)
            .await
            .unwrap();

        let err = p.try_load("default").await.unwrap_err();
        assert!(matches!(err, Error::Config(_)), "{err}");
    }
}
