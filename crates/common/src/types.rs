use std::collections::BTreeSet;
use std::convert::Infallible;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::Error;

/// Tickers that get the VIP bonus when no stored or env config says otherwise.
pub const DEFAULT_VIP_TICKERS: &[&str] = &["SPY", "QQQ", "AAPL", "TSLA", "NVDA"];

/// Timeframes that get the VIP bonus when no stored or env config says otherwise.
pub const DEFAULT_VIP_TIMEFRAMES: &[&str] = &["1d", "4h"];

/// Config row selected when the caller does not name one.
pub const DEFAULT_CONFIG_NAME: &str = "default";

/// Candle timeframe a signal was detected on.
///
/// Unrecognized identifiers are kept verbatim in `Other` and are treated as
/// hourly by the scheduler clock.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Timeframe {
    OneHour,
    ThreeHour,
    FourHour,
    SixHour,
    Daily,
    Other(String),
}

impl Timeframe {
    pub fn as_str(&self) -> &str {
        match self {
            Timeframe::OneHour => "1h",
            Timeframe::ThreeHour => "3h",
            Timeframe::FourHour => "4h",
            Timeframe::SixHour => "6h",
            Timeframe::Daily => "1d",
            Timeframe::Other(s) => s,
        }
    }

    /// Length of one candle in hours. `Other` reports 1 (hourly fallback).
    pub fn period_hours(&self) -> u32 {
        match self {
            Timeframe::OneHour => 1,
            Timeframe::ThreeHour => 3,
            Timeframe::FourHour => 4,
            Timeframe::SixHour => 6,
            Timeframe::Daily => 24,
            Timeframe::Other(_) => 1,
        }
    }

    /// Human label used in schedule reasons.
    pub fn close_label(&self) -> String {
        match self {
            Timeframe::Daily => "Daily candle close".to_string(),
            other => format!("{} candle close", other.as_str()),
        }
    }
}

impl FromStr for Timeframe {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Ok(match s.to_lowercase().as_str() {
            "1h" => Timeframe::OneHour,
            "3h" => Timeframe::ThreeHour,
            "4h" => Timeframe::FourHour,
            "6h" => Timeframe::SixHour,
            "1d" => Timeframe::Daily,
            _ => Timeframe::Other(s.to_string()),
        })
    }
}

impl From<String> for Timeframe {
    fn from(s: String) -> Self {
        match s.parse() {
            Ok(tf) => tf,
            Err(never) => match never {},
        }
    }
}

impl From<Timeframe> for String {
    fn from(tf: Timeframe) -> Self {
        tf.as_str().to_string()
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Discrete importance bucket. Declaration order is the ranking order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PriorityLevel {
    Minimal,
    Low,
    Medium,
    High,
    Critical,
}

impl PriorityLevel {
    /// Highest first, the order operators read them in.
    pub const ALL: [PriorityLevel; 5] = [
        PriorityLevel::Critical,
        PriorityLevel::High,
        PriorityLevel::Medium,
        PriorityLevel::Low,
        PriorityLevel::Minimal,
    ];

    /// 1 (MINIMAL) through 5 (CRITICAL).
    pub fn rank(self) -> u8 {
        match self {
            PriorityLevel::Minimal => 1,
            PriorityLevel::Low => 2,
            PriorityLevel::Medium => 3,
            PriorityLevel::High => 4,
            PriorityLevel::Critical => 5,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PriorityLevel::Minimal => "MINIMAL",
            PriorityLevel::Low => "LOW",
            PriorityLevel::Medium => "MEDIUM",
            PriorityLevel::High => "HIGH",
            PriorityLevel::Critical => "CRITICAL",
        }
    }
}

impl FromStr for PriorityLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "MINIMAL" => Ok(PriorityLevel::Minimal),
            "LOW" => Ok(PriorityLevel::Low),
            "MEDIUM" => Ok(PriorityLevel::Medium),
            "HIGH" => Ok(PriorityLevel::High),
            "CRITICAL" => Ok(PriorityLevel::Critical),
            _ => Err(Error::InvalidLevel(s.to_string())),
        }
    }
}

impl std::fmt::Display for PriorityLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Score boundaries for each level. Each is inclusive of its own value; a
/// total below `low` is MINIMAL. The store owns the critical > high > medium
/// > low ordering, nothing here re-checks it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thresholds {
    pub critical: i32,
    pub high: i32,
    pub medium: i32,
    pub low: i32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            critical: 90,
            high: 70,
            medium: 50,
            low: 30,
        }
    }
}

impl Thresholds {
    pub fn level_for(&self, total: i32) -> PriorityLevel {
        if total >= self.critical {
            PriorityLevel::Critical
        } else if total >= self.high {
            PriorityLevel::High
        } else if total >= self.medium {
            PriorityLevel::Medium
        } else if total >= self.low {
            PriorityLevel::Low
        } else {
            PriorityLevel::Minimal
        }
    }
}

/// The working priority configuration: one row of `priority_config`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorityConfig {
    pub name: String,
    pub min_level: PriorityLevel,
    pub thresholds: Thresholds,
    /// Upper-cased ticker symbols.
    pub vip_tickers: BTreeSet<String>,
    pub vip_timeframes: BTreeSet<String>,
    pub active: bool,
}

impl PriorityConfig {
    /// Hard-coded defaults, the last link of the fallback chain.
    pub fn defaults(name: &str) -> Self {
        Self {
            name: name.to_string(),
            min_level: PriorityLevel::Medium,
            thresholds: Thresholds::default(),
            vip_tickers: DEFAULT_VIP_TICKERS.iter().map(|s| s.to_string()).collect(),
            vip_timeframes: DEFAULT_VIP_TIMEFRAMES.iter().map(|s| s.to_string()).collect(),
            active: true,
        }
    }

    pub fn is_vip_ticker(&self, ticker: &str) -> bool {
        self.vip_tickers.contains(&normalize_ticker(ticker))
    }

    pub fn is_vip_timeframe(&self, timeframe: &str) -> bool {
        self.vip_timeframes.contains(timeframe.trim())
    }
}

impl Default for PriorityConfig {
    fn default() -> Self {
        Self::defaults(DEFAULT_CONFIG_NAME)
    }
}

pub fn normalize_ticker(ticker: &str) -> String {
    ticker.trim().to_uppercase()
}

/// A detected signal as handed over by the external detector.
///
/// Every field has a default so that partial payloads still score: missing
/// text fields are empty and a missing or unreadable timestamp is `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SignalDescriptor {
    #[serde(rename = "type", default)]
    pub signal_type: String,
    #[serde(default)]
    pub strength: String,
    #[serde(default)]
    pub system: String,
    #[serde(
        default,
        alias = "date",
        deserialize_with = "lenient_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub observed_at: Option<DateTime<Utc>>,
}

impl SignalDescriptor {
    pub fn new(
        signal_type: impl Into<String>,
        strength: impl Into<String>,
        system: impl Into<String>,
        observed_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            signal_type: signal_type.into(),
            strength: strength.into(),
            system: system.into(),
            observed_at,
        }
    }
}

/// A signal together with where it was seen: the unit the gate scores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedSignal {
    pub ticker: String,
    pub timeframe: String,
    #[serde(flatten)]
    pub signal: SignalDescriptor,
}

impl DetectedSignal {
    pub fn new(ticker: impl Into<String>, timeframe: impl Into<String>, signal: SignalDescriptor) -> Self {
        Self {
            ticker: ticker.into(),
            timeframe: timeframe.into(),
            signal,
        }
    }
}

/// Parse the timestamp formats detectors emit: RFC 3339,
/// `YYYY-MM-DD HH:MM:SS` (naive, read as UTC) or a bare date, which is taken
/// as the 09:30 open of that day.
pub fn parse_signal_time(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(9, 30, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => parse_signal_time(&s),
        _ => None,
    })
}
