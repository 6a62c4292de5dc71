use std::path::Path;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::warn;

use common::{Error, Result, Timeframe};

use crate::clock::{TimeframeClock, DEFAULT_SETTLE_DELAY_MINUTES};
use crate::lifecycle::LoopSettings;
use crate::schedule::{FixedGrid, Schedule, ScheduleMode, TimeframeAligned};

pub const DEFAULT_TIMEZONE: &str = "America/New_York";

/// Schedule file (TOML).
///
/// Example `config/schedule.toml`:
/// ```toml
/// mode = "timeframe"
/// timezone = "America/New_York"
/// timeframes = ["1h", "3h", "6h", "1d"]
/// settle_delay_minutes = 2
///
/// [fixed_grid]
/// market_minutes = [2, 17, 32, 47]
/// after_hours_minutes = [2, 32]
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ScheduleFileConfig {
    pub mode: ScheduleMode,
    /// IANA timezone of the exchange.
    pub timezone: String,
    pub timeframes: Vec<String>,
    pub settle_delay_minutes: i64,
    /// Pause after a failed cycle.
    pub failure_cooldown_secs: u64,
    /// Upper bound on one check. 0 disables it.
    pub cycle_deadline_secs: u64,
    pub fixed_grid: FixedGridConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct FixedGridConfig {
    pub market_minutes: Vec<u32>,
    pub after_hours_minutes: Vec<u32>,
    pub priority_minutes: Vec<u32>,
}

impl Default for ScheduleFileConfig {
    fn default() -> Self {
        Self {
            mode: ScheduleMode::Timeframe,
            timezone: DEFAULT_TIMEZONE.to_string(),
            timeframes: ["1h", "3h", "6h", "1d"].map(String::from).to_vec(),
            settle_delay_minutes: DEFAULT_SETTLE_DELAY_MINUTES,
            failure_cooldown_secs: 60,
            cycle_deadline_secs: 600,
            fixed_grid: FixedGridConfig::default(),
        }
    }
}

impl Default for FixedGridConfig {
    fn default() -> Self {
        Self {
            market_minutes: vec![2, 17, 32, 47],
            after_hours_minutes: vec![2, 32],
            priority_minutes: vec![2, 32],
        }
    }
}

impl ScheduleFileConfig {
    /// Load from a TOML file. A missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(content) => Self::parse(&content)
                .map_err(|e| Error::Config(format!("schedule config at '{}': {e}", path.display()))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "Schedule config not found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        config.tz()?;
        if config.settle_delay_minutes < 0 {
            return Err(Error::Config("settle_delay_minutes must not be negative".into()));
        }
        Ok(config)
    }

    pub fn tz(&self) -> Result<Tz> {
        self.timezone
            .parse::<Tz>()
            .map_err(|e| Error::Config(format!("unknown timezone '{}': {e}", self.timezone)))
    }

    pub fn timeframes(&self) -> Vec<Timeframe> {
        self.timeframes.iter().map(|s| Timeframe::from(s.clone())).collect()
    }

    pub fn build_schedule(&self) -> Result<Arc<dyn Schedule>> {
        let tz = self.tz()?;
        let schedule: Arc<dyn Schedule> = match self.mode {
            ScheduleMode::Timeframe => Arc::new(TimeframeAligned::new(TimeframeClock::new(
                tz,
                self.timeframes(),
                Duration::minutes(self.settle_delay_minutes),
            ))),
            ScheduleMode::FixedGrid => Arc::new(FixedGrid::new(
                tz,
                self.fixed_grid.market_minutes.clone(),
                self.fixed_grid.after_hours_minutes.clone(),
                self.fixed_grid.priority_minutes.clone(),
            )),
        };
        Ok(schedule)
    }

    pub fn loop_settings(&self) -> LoopSettings {
        LoopSettings {
            failure_cooldown: StdDuration::from_secs(self.failure_cooldown_secs),
            cycle_deadline: (self.cycle_deadline_secs > 0)
                .then(|| StdDuration::from_secs(self.cycle_deadline_secs)),
            ..LoopSettings::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_all_defaults() {
        let cfg = ScheduleFileConfig::parse("").unwrap();
        assert_eq!(cfg, ScheduleFileConfig::default());
        assert_eq!(cfg.tz().unwrap(), chrono_tz::America::New_York);
    }

    #[test]
    fn parses_fixed_grid_mode() {
        let cfg = ScheduleFileConfig::parse(
            r#"
            mode = "fixed_grid"
            timezone = "Europe/London"
            cycle_deadline_secs = 0

            [fixed_grid]
            market_minutes = [5, 35]
            "#,
        )
        .unwrap();
        assert_eq!(cfg.mode, ScheduleMode::FixedGrid);
        assert_eq!(cfg.fixed_grid.market_minutes, vec![5, 35]);
        assert_eq!(cfg.fixed_grid.after_hours_minutes, vec![2, 32]);
        assert!(cfg.loop_settings().cycle_deadline.is_none());

        let schedule = cfg.build_schedule().unwrap();
        assert_eq!(schedule.mode(), ScheduleMode::FixedGrid);
        assert_eq!(schedule.timezone(), chrono_tz::Europe::London);
    }

    #[test]
    fn rejects_unknown_timezone() {
        let err = ScheduleFileConfig::parse(r#"timezone = "Mars/Olympus""#).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn rejects_bad_mode() {
        assert!(ScheduleFileConfig::parse(r#"mode = "hourly""#).is_err());
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let cfg = ScheduleFileConfig::load("/nonexistent/schedule.toml").unwrap();
        assert_eq!(cfg, ScheduleFileConfig::default());
    }

    #[test]
    fn loop_settings_carry_cooldown_and_deadline() {
        let cfg = ScheduleFileConfig::parse("failure_cooldown_secs = 5\ncycle_deadline_secs = 30").unwrap();
        let settings = cfg.loop_settings();
        assert_eq!(settings.failure_cooldown, StdDuration::from_secs(5));
        assert_eq!(settings.cycle_deadline, Some(StdDuration::from_secs(30)));
    }
}
