use std::collections::BTreeSet;

use async_trait::async_trait;
use tracing::{info, warn};

use common::{normalize_ticker, ConfigProvider, PriorityConfig, PriorityLevel, Result};

pub const CRITICAL_THRESHOLD_VAR: &str = "PRIORITY_CRITICAL_THRESHOLD";
pub const HIGH_THRESHOLD_VAR: &str = "PRIORITY_HIGH_THRESHOLD";
pub const MEDIUM_THRESHOLD_VAR: &str = "PRIORITY_MEDIUM_THRESHOLD";
pub const LOW_THRESHOLD_VAR: &str = "PRIORITY_LOW_THRESHOLD";
pub const MIN_LEVEL_VAR: &str = "MIN_PRIORITY_LEVEL";
pub const VIP_TICKERS_VAR: &str = "VIP_TICKERS";
pub const VIP_TIMEFRAMES_VAR: &str = "VIP_TIMEFRAMES";

const ALL_VARS: [&str; 7] = [
    CRITICAL_THRESHOLD_VAR,
    HIGH_THRESHOLD_VAR,
    MEDIUM_THRESHOLD_VAR,
    LOW_THRESHOLD_VAR,
    MIN_LEVEL_VAR,
    VIP_TICKERS_VAR,
    VIP_TIMEFRAMES_VAR,
];

type Lookup = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Builds a config from the `PRIORITY_*` / `VIP_*` environment variables.
///
/// Answers `None` when none of them is set. Any variable that is set
/// overrides the matching hard-coded default; unparseable values are logged
/// and the default is kept.
pub struct EnvConfigProvider {
    lookup: Lookup,
}

impl EnvConfigProvider {
    pub fn new() -> Self {
        Self::with_lookup(|key| std::env::var(key).ok())
    }

    /// Read variables through `lookup` instead of the process environment.
    pub fn with_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        Self {
            lookup: Box::new(lookup),
        }
    }

    fn var(&self, key: &str) -> Option<String> {
        (self.lookup)(key).filter(|v| !v.trim().is_empty())
    }

    fn threshold(&self, key: &str, default: i32) -> i32 {
        match self.var(key) {
            Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
                warn!(var = key, value = %raw, default, "Ignoring non-integer threshold");
                default
            }),
            None => default,
        }
    }

    fn list(&self, key: &str) -> Option<BTreeSet<String>> {
        self.var(key).map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
    }

    /// Build the config `name` from whatever variables are present.
    pub fn build(&self, name: &str) -> Option<PriorityConfig> {
        if !ALL_VARS.iter().any(|k| self.var(k).is_some()) {
            return None;
        }

        let mut cfg = PriorityConfig::defaults(name);
        let t = cfg.thresholds;
        cfg.thresholds.critical = self.threshold(CRITICAL_THRESHOLD_VAR, t.critical);
        cfg.thresholds.high = self.threshold(HIGH_THRESHOLD_VAR, t.high);
        cfg.thresholds.medium = self.threshold(MEDIUM_THRESHOLD_VAR, t.medium);
        cfg.thresholds.low = self.threshold(LOW_THRESHOLD_VAR, t.low);

        if let Some(raw) = self.var(MIN_LEVEL_VAR) {
            match raw.parse::<PriorityLevel>() {
                Ok(level) => cfg.min_level = level,
                Err(e) => warn!(error = %e, "Ignoring {MIN_LEVEL_VAR}, keeping MEDIUM"),
            }
        }
        if let Some(tickers) = self.list(VIP_TICKERS_VAR) {
            cfg.vip_tickers = tickers.iter().map(|t| normalize_ticker(t)).collect();
        }
        if let Some(timeframes) = self.list(VIP_TIMEFRAMES_VAR) {
            cfg.vip_timeframes = timeframes;
        }
        Some(cfg)
    }
}

impl Default for EnvConfigProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConfigProvider for EnvConfigProvider {
    fn name(&self) -> &str {
        "env"
    }

    async fn try_load(&self, config_name: &str) -> Result<Option<PriorityConfig>> {
        Ok(self.build(config_name))
    }
}

/// Final link of the chain: always answers with the compiled-in defaults.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultsProvider;

#[async_trait]
impl ConfigProvider for DefaultsProvider {
    fn name(&self) -> &str {
        "defaults"
    }

    async fn try_load(&self, config_name: &str) -> Result<Option<PriorityConfig>> {
        info!(config = config_name, "Using hard-coded priority defaults");
        Ok(Some(PriorityConfig::defaults(config_name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn provider(vars: &[(&str, &str)]) -> EnvConfigProvider {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        EnvConfigProvider::with_lookup(move |k| map.get(k).cloned())
    }

    #[test]
    fn no_variables_means_not_found() {
        assert!(provider(&[]).build("default").is_none());
    }

    #[test]
    fn present_variables_override_defaults() {
        let cfg = provider(&[
            (HIGH_THRESHOLD_VAR, "75"),
            (MIN_LEVEL_VAR, "high"),
            (VIP_TICKERS_VAR, "msft, amd,,"),
            (VIP_TIMEFRAMES_VAR, "1h,6h"),
        ])
        .build("trading_hours")
        .unwrap();

        assert_eq!(cfg.name, "trading_hours");
        assert_eq!(cfg.thresholds.high, 75);
        assert_eq!(cfg.thresholds.critical, 90);
        assert_eq!(cfg.min_level, PriorityLevel::High);
        assert_eq!(
            cfg.vip_tickers.iter().cloned().collect::<Vec<_>>(),
            vec!["AMD".to_string(), "MSFT".to_string()]
        );
        assert!(cfg.is_vip_timeframe("6h"));
        assert!(!cfg.is_vip_timeframe("1d"));
    }

    #[test]
    fn malformed_values_fall_back_per_field() {
        let cfg = provider(&[(LOW_THRESHOLD_VAR, "thirty"), (MIN_LEVEL_VAR, "URGENT")])
            .build("default")
            .unwrap();
        assert_eq!(cfg.thresholds.low, 30);
        assert_eq!(cfg.min_level, PriorityLevel::Medium);
    }

    #[tokio::test]
    async fn defaults_provider_always_answers() {
        let cfg = DefaultsProvider.try_load("after_hours").await.unwrap().unwrap();
        assert_eq!(cfg.name, "after_hours");
        assert_eq!(cfg.min_level, PriorityLevel::Medium);
        assert!(cfg.is_vip_ticker("NVDA"));
    }
}
