use chrono::{DateTime, Duration, Utc};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use common::{PriorityConfig, PriorityLevel, SignalDescriptor};

pub const BASE_SCORE: i32 = 10;
pub const VIP_TICKER_BONUS: i32 = 15;
pub const VIP_TIMEFRAME_BONUS: i32 = 10;
/// Points per urgency step.
pub const URGENCY_WEIGHT: i32 = 4;
/// System bonus when no entry of `SYSTEM_WEIGHTS` matches.
pub const DEFAULT_SYSTEM_BONUS: i32 = 5;

/// Exact (case-insensitive) strength names. Anything else scores 0.
pub const STRENGTH_WEIGHTS: &[(&str, i32)] = &[
    ("Very Strong", 25),
    ("Strong", 20),
    ("Moderate", 10),
    ("Weak", 5),
];

/// Substring match against the signal's system, first entry wins.
pub const SYSTEM_WEIGHTS: &[(&str, i32)] = &[
    ("Wave Trend", 20),
    ("RSI3M3+", 18),
    ("Divergence Detection", 16),
    ("Fast Money", 14),
    ("Trend Exhaustion", 12),
    ("RSI Trend Break", 10),
    ("Zero Line", 8),
];

/// Regexes over the signal type. The highest matching bonus is taken.
pub const SIGNAL_PATTERNS: &[(&str, i32)] = &[
    ("gold|extreme", 30),
    ("fast money", 25),
    ("divergence", 20),
    ("breakout|breakdown", 15),
    ("reversal", 12),
    ("cross", 8),
];

/// How fresh a signal is. Declaration order is the ranking order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Urgency {
    Ancient,
    Old,
    Moderate,
    Recent,
    Immediate,
}

impl Urgency {
    pub fn value(self) -> i32 {
        match self {
            Urgency::Ancient => 0,
            Urgency::Old => 1,
            Urgency::Moderate => 2,
            Urgency::Recent => 3,
            Urgency::Immediate => 4,
        }
    }

    /// Breakpoints are inclusive. A negative age (clock skew) counts as fresh.
    pub fn from_age(age: Duration) -> Self {
        if age <= Duration::minutes(15) {
            Urgency::Immediate
        } else if age <= Duration::hours(1) {
            Urgency::Recent
        } else if age <= Duration::hours(4) {
            Urgency::Moderate
        } else if age <= Duration::hours(24) {
            Urgency::Old
        } else {
            Urgency::Ancient
        }
    }

    /// No timestamp means ANCIENT.
    pub fn at(observed_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Self {
        observed_at
            .map(|t| Self::from_age(now - t))
            .unwrap_or(Urgency::Ancient)
    }
}

/// Per-factor breakdown of one scoring call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorityScore {
    pub base: i32,
    pub strength_bonus: i32,
    pub system_bonus: i32,
    pub ticker_bonus: i32,
    pub timeframe_bonus: i32,
    pub urgency_bonus: i32,
    pub pattern_bonus: i32,
    pub total: i32,
    pub level: PriorityLevel,
}

impl PriorityScore {
    /// Multi-line component listing for logs and operator replies.
    pub fn breakdown(&self) -> String {
        format!(
            "Base: {}\n\
             Strength: +{}\n\
             System: +{}\n\
             Ticker: +{}\n\
             Timeframe: +{}\n\
             Urgency: +{}\n\
             Pattern: +{}\n\
             Total: {} ({})",
            self.base,
            self.strength_bonus,
            self.system_bonus,
            self.ticker_bonus,
            self.timeframe_bonus,
            self.urgency_bonus,
            self.pattern_bonus,
            self.total,
            self.level,
        )
    }
}

impl std::fmt::Display for PriorityScore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.level, self.total)
    }
}

/// Turns a signal into an additive score and a level.
///
/// Pure over its inputs: the config and the clock reading are passed in, so
/// one scorer can be shared by every caller.
#[derive(Debug, Clone)]
pub struct PriorityScorer {
    patterns: Vec<(Regex, i32)>,
}

impl PriorityScorer {
    pub fn new() -> Self {
        let patterns = SIGNAL_PATTERNS
            .iter()
            .map(|(pattern, bonus)| {
                let re = RegexBuilder::new(pattern)
                    .case_insensitive(true)
                    .build()
                    .expect("built-in signal pattern must compile");
                (re, *bonus)
            })
            .collect();
        Self { patterns }
    }

    pub fn score(
        &self,
        signal: &SignalDescriptor,
        ticker: &str,
        timeframe: &str,
        config: &PriorityConfig,
        now: DateTime<Utc>,
    ) -> PriorityScore {
        let strength_bonus = strength_bonus(&signal.strength);
        let system_bonus = system_bonus(&signal.system);
        let ticker_bonus = if config.is_vip_ticker(ticker) { VIP_TICKER_BONUS } else { 0 };
        let timeframe_bonus = if config.is_vip_timeframe(timeframe) {
            VIP_TIMEFRAME_BONUS
        } else {
            0
        };
        let urgency_bonus = Urgency::at(signal.observed_at, now).value() * URGENCY_WEIGHT;
        let pattern_bonus = self.pattern_bonus(&signal.signal_type);

        let total = BASE_SCORE
            + strength_bonus
            + system_bonus
            + ticker_bonus
            + timeframe_bonus
            + urgency_bonus
            + pattern_bonus;

        PriorityScore {
            base: BASE_SCORE,
            strength_bonus,
            system_bonus,
            ticker_bonus,
            timeframe_bonus,
            urgency_bonus,
            pattern_bonus,
            total,
            level: config.thresholds.level_for(total),
        }
    }

    pub fn pattern_bonus(&self, signal_type: &str) -> i32 {
        self.patterns
            .iter()
            .filter(|(re, _)| re.is_match(signal_type))
            .map(|(_, bonus)| *bonus)
            .max()
            .unwrap_or(0)
    }
}

impl Default for PriorityScorer {
    fn default() -> Self {
        Self::new()
    }
}

pub fn strength_bonus(strength: &str) -> i32 {
    let strength = strength.trim();
    STRENGTH_WEIGHTS
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(strength))
        .map(|(_, w)| *w)
        .unwrap_or(0)
}

pub fn system_bonus(system: &str) -> i32 {
    let system = system.to_lowercase();
    SYSTEM_WEIGHTS
        .iter()
        .find(|(name, _)| system.contains(&name.to_lowercase()))
        .map(|(_, w)| *w)
        .unwrap_or(DEFAULT_SYSTEM_BONUS)
}

// ─── Tests ────────────────────────────────────────────────────────────────────
