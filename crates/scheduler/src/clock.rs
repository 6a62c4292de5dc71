//! Candle-close arithmetic. Pure functions of an instant and a timeframe.

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, TimeZone, Timelike, Utc};
use chrono_tz::Tz;

use common::Timeframe;

/// Local hour at which the daily candle closes (4:00 PM exchange time).
pub const DAILY_CLOSE_HOUR: u32 = 16;

/// Wait after a close before checking, so the price source can finalize the candle.
pub const DEFAULT_SETTLE_DELAY_MINUTES: i64 = 2;

/// Shortest forward scan. 25 hours always contains one daily close.
pub const MIN_HORIZON_HOURS: u32 = 25;

/// True when `instant` (in exchange-local time) is a close of `timeframe`.
///
/// Only exact hours count. Daily closes at `DAILY_CLOSE_HOUR`; periodic
/// timeframes close when the hour is a multiple of the period; unknown
/// timeframes close every hour.
pub fn is_close_boundary<Z: TimeZone>(instant: &DateTime<Z>, timeframe: &Timeframe) -> bool {
    if instant.minute() != 0 || instant.second() != 0 {
        return false;
    }
    let hour = instant.hour();
    match timeframe {
        Timeframe::Daily => hour == DAILY_CLOSE_HOUR,
        Timeframe::Other(_) => true,
        periodic => hour % periodic.period_hours() == 0,
    }
}

/// Start of the local hour containing `instant`.
pub fn floor_to_local_hour(instant: DateTime<Utc>, tz: &Tz) -> DateTime<Utc> {
    let local = instant.with_timezone(tz);
    instant
        - Duration::minutes(i64::from(local.minute()))
        - Duration::seconds(i64::from(local.second()))
        - Duration::nanoseconds(i64::from(local.nanosecond() % 1_000_000_000))
}

/// The configured timeframes evaluated in one exchange timezone.
#[derive(Debug, Clone)]
pub struct TimeframeClock {
    tz: Tz,
    timeframes: Vec<Timeframe>,
    settle_delay: Duration,
}

impl TimeframeClock {
    pub fn new(tz: Tz, timeframes: Vec<Timeframe>, settle_delay: Duration) -> Self {
        Self {
            tz,
            timeframes,
            settle_delay,
        }
    }

    pub fn tz(&self) -> Tz {
        self.tz
    }

    pub fn timeframes(&self) -> &[Timeframe] {
        &self.timeframes
    }

    pub fn settle_delay(&self) -> Duration {
        self.settle_delay
    }

    /// Configured timeframes whose candle closes exactly at `close`.
    pub fn closing_at(&self, close: DateTime<Utc>) -> Vec<Timeframe> {
        let local = close.with_timezone(&self.tz);
        self.timeframes
            .iter()
            .filter(|tf| is_close_boundary(&local, tf))
            .cloned()
            .collect()
    }

    /// Close instants plus the settle delay, strictly after `after`, ascending
    /// and de-duplicated. Scans at least `MIN_HORIZON_HOURS` hours.
    pub fn next_boundaries(&self, after: DateTime<Utc>, horizon_hours: u32) -> Vec<DateTime<Utc>> {
        let start = floor_to_local_hour(after, &self.tz);
        let horizon = horizon_hours.max(MIN_HORIZON_HOURS);

        let mut alerts = BTreeSet::new();
        for offset in 0..=horizon {
            let close = start + Duration::hours(i64::from(offset));
            let local = close.with_timezone(&self.tz);
            if self.timeframes.iter().any(|tf| is_close_boundary(&local, tf)) {
                let alert = close + self.settle_delay;
                if alert > after {
                    alerts.insert(alert);
                }
            }
        }
        alerts.into_iter().collect()
    }
}
