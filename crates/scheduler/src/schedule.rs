use std::fmt;

use chrono::{DateTime, Datelike, Duration, Timelike, Utc, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use common::Timeframe;

use crate::clock::{floor_to_local_hour, TimeframeClock, MIN_HORIZON_HOURS};

/// Reason used when no specific label applies to an instant.
pub const FALLBACK_REASON: &str = "Scheduled check";

/// Wait reported by `time_until_next_run` when nothing is scheduled.
pub const FALLBACK_WAIT_MINUTES: i64 = 15;

/// Which schedule variant drives the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleMode {
    #[default]
    Timeframe,
    FixedGrid,
}

impl fmt::Display for ScheduleMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScheduleMode::Timeframe => write!(f, "timeframe"),
            ScheduleMode::FixedGrid => write!(f, "fixed_grid"),
        }
    }
}

/// One scheduled check. Recomputed on every decision, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AlertInstant {
    pub at: DateTime<Utc>,
    /// Timeframes whose candle closed just before `at`. Empty for fixed-grid runs.
    pub timeframes: Vec<Timeframe>,
    pub is_priority: bool,
    pub reason: String,
}

/// Contract shared by every schedule variant. The loop only sees this.
pub trait Schedule: Send + Sync {
    fn mode(&self) -> ScheduleMode;

    /// Exchange timezone the schedule is evaluated in.
    fn timezone(&self) -> Tz;

    /// Up to `count` runs strictly after `now`, ascending.
    fn upcoming(&self, now: DateTime<Utc>, count: usize) -> Vec<AlertInstant>;

    fn reason_for(&self, instant: DateTime<Utc>) -> String;

    fn is_priority(&self, instant: DateTime<Utc>) -> bool;

    /// Timeframes driving the schedule, for status output.
    fn timeframes(&self) -> Vec<Timeframe> {
        Vec::new()
    }

    fn settle_delay(&self) -> Duration {
        Duration::zero()
    }

    fn next_run(&self, now: DateTime<Utc>) -> Option<AlertInstant> {
        self.upcoming(now, 1).into_iter().next()
    }

    fn time_until_next_run(&self, now: DateTime<Utc>) -> Duration {
        self.next_run(now)
            .map(|run| run.at - now)
            .unwrap_or_else(|| Duration::minutes(FALLBACK_WAIT_MINUTES))
    }
}

// ─── Timeframe-aligned ──────────────────────────────────────────────────────

/// Runs a settle delay after every candle close of the configured timeframes.
#[derive(Debug, Clone)]
pub struct TimeframeAligned {
    clock: TimeframeClock,
}

impl TimeframeAligned {
    pub fn new(clock: TimeframeClock) -> Self {
        Self { clock }
    }

    pub fn clock(&self) -> &TimeframeClock {
        &self.clock
    }

    /// Timeframes whose close produced the run at `instant`.
    pub fn closing_for(&self, instant: DateTime<Utc>) -> Vec<Timeframe> {
        self.clock.closing_at(instant - self.clock.settle_delay())
    }

    fn alert_at(&self, at: DateTime<Utc>) -> AlertInstant {
        let timeframes = self.closing_for(at);
        AlertInstant {
            at,
            is_priority: priority_for(&timeframes),
            reason: reason_for(&timeframes),
            timeframes,
        }
    }
}

fn reason_for(closing: &[Timeframe]) -> String {
    if closing.is_empty() {
        return FALLBACK_REASON.to_string();
    }
    closing
        .iter()
        .map(Timeframe::close_label)
        .collect::<Vec<_>>()
        .join(" + ")
}

fn priority_for(closing: &[Timeframe]) -> bool {
    closing.len() > 1 || closing.contains(&Timeframe::Daily)
}

impl Schedule for TimeframeAligned {
    fn mode(&self) -> ScheduleMode {
        ScheduleMode::Timeframe
    }

    fn timezone(&self) -> Tz {
        self.clock.tz()
    }

    fn upcoming(&self, now: DateTime<Utc>, count: usize) -> Vec<AlertInstant> {
        self.clock
            .next_boundaries(now, MIN_HORIZON_HOURS)
            .into_iter()
            .take(count)
            .map(|at| self.alert_at(at))
            .collect()
    }

    fn reason_for(&self, instant: DateTime<Utc>) -> String {
        reason_for(&self.closing_for(instant))
    }

    fn is_priority(&self, instant: DateTime<Utc>) -> bool {
        priority_for(&self.closing_for(instant))
    }

    fn timeframes(&self) -> Vec<Timeframe> {
        self.clock.timeframes().to_vec()
    }

    fn settle_delay(&self) -> Duration {
        self.clock.settle_delay()
    }
}

// ─── Fixed grid ─────────────────────────────────────────────────────────────

/// Runs at fixed minutes past every hour, thinned outside market hours.
#[derive(Debug, Clone)]
pub struct FixedGrid {
    tz: Tz,
    market_minutes: Vec<u32>,
    after_hours_minutes: Vec<u32>,
    priority_minutes: Vec<u32>,
}

impl FixedGrid {
    /// Minutes outside `0..60` are dropped.
    pub fn new(
        tz: Tz,
        market_minutes: Vec<u32>,
        after_hours_minutes: Vec<u32>,
        priority_minutes: Vec<u32>,
    ) -> Self {
        Self {
            tz,
            market_minutes: normalize_minutes(market_minutes),
            after_hours_minutes: normalize_minutes(after_hours_minutes),
            priority_minutes: normalize_minutes(priority_minutes),
        }
    }

    /// Weekday between 09:30 inclusive and 16:00 exclusive, exchange time.
    pub fn is_market_hours(&self, instant: DateTime<Utc>) -> bool {
        let local = instant.with_timezone(&self.tz);
        if matches!(local.weekday(), Weekday::Sat | Weekday::Sun) {
            return false;
        }
        let minute_of_day = local.hour() * 60 + local.minute();
        (9 * 60 + 30..16 * 60).contains(&minute_of_day)
    }

    fn minutes_for_hour(&self, hour_start: DateTime<Utc>) -> &[u32] {
        if self.is_market_hours(hour_start) {
            &self.market_minutes
        } else {
            &self.after_hours_minutes
        }
    }

    fn alert_at(&self, at: DateTime<Utc>) -> AlertInstant {
        AlertInstant {
            at,
            timeframes: Vec::new(),
            is_priority: self.is_priority(at),
            reason: self.reason_for(at),
        }
    }
}

fn normalize_minutes(mut minutes: Vec<u32>) -> Vec<u32> {
    minutes.retain(|m| *m < 60);
    minutes.sort_unstable();
    minutes.dedup();
    minutes
}

impl Schedule for FixedGrid {
    fn mode(&self) -> ScheduleMode {
        ScheduleMode::FixedGrid
    }

    fn timezone(&self) -> Tz {
        self.tz
    }

    fn upcoming(&self, now: DateTime<Utc>, count: usize) -> Vec<AlertInstant> {
        let start = floor_to_local_hour(now, &self.tz);
        let mut runs = Vec::new();

        'scan: for offset in 0..=MIN_HORIZON_HOURS {
            let hour_start = start + Duration::hours(i64::from(offset));
            for minute in self.minutes_for_hour(hour_start) {
                let at = hour_start + Duration::minutes(i64::from(*minute));
                if at <= now {
                    continue;
                }
                if runs.len() == count {
                    break 'scan;
                }
                runs.push(self.alert_at(at));
            }
        }
        runs
    }

    fn reason_for(&self, instant: DateTime<Utc>) -> String {
        match instant.with_timezone(&self.tz).minute() {
            2 => "Hourly candle close (priority)",
            17 => "Mid-hour update",
            32 => "Half-hour candle close (priority)",
            47 => "Quarter-hour update",
            _ => FALLBACK_REASON,
        }
        .to_string()
    }

    fn is_priority(&self, instant: DateTime<Utc>) -> bool {
        let minute = instant.with_timezone(&self.tz).minute();
        self.priority_minutes.contains(&minute)
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
