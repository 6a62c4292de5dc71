use chrono::{DateTime, Duration, TimeZone, Timelike, Utc};
use chrono_tz::America::New_York;
use proptest::prelude::*;

use common::Timeframe;
use scheduler::{Schedule, TimeframeAligned, TimeframeClock};

fn any_instant() -> impl Strategy<Value = DateTime<Utc>> {
    // 2020-01-01 .. 2030-01-01, second resolution.
    (1_577_836_800i64..1_893_456_000i64).prop_map(|s| Utc.timestamp_opt(s, 0).unwrap())
}

fn any_timeframes() -> impl Strategy<Value = Vec<Timeframe>> {
    prop::sample::subsequence(vec!["1h", "3h", "4h", "6h", "1d", "2wk"], 1..=6)
        .prop_map(|v| v.into_iter().map(|s| s.parse().unwrap()).collect())
}

proptest! {
    #[test]
    fn boundaries_are_future_sorted_and_unique(
        now in any_instant(),
        tfs in any_timeframes(),
        delay in 0i64..30,
    ) {
        let clock = TimeframeClock::new(New_York, tfs, Duration::minutes(delay));
        let runs = clock.next_boundaries(now, 25);

        prop_assert!(!runs.is_empty());
        prop_assert!(runs.iter().all(|r| *r > now));
        prop_assert!(runs.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn every_run_sits_on_a_close_plus_delay(
        now in any_instant(),
        tfs in any_timeframes(),
        delay in 0i64..30,
    ) {
        let clock = TimeframeClock::new(New_York, tfs, Duration::minutes(delay));
        for run in clock.next_boundaries(now, 25) {
            let close = (run - Duration::minutes(delay)).with_timezone(&New_York);
            prop_assert_eq!(close.minute(), 0);
            prop_assert_eq!(close.second(), 0);
            prop_assert!(!clock.closing_at(run - Duration::minutes(delay)).is_empty());
        }
    }

    #[test]
    fn daily_close_is_always_in_horizon(now in any_instant()) {
        let clock = TimeframeClock::new(New_York, vec![Timeframe::Daily], Duration::minutes(2));
        let runs = clock.next_boundaries(now, 25);
        prop_assert!(!runs.is_empty());
        // 25h days (DST fall-back) push the next close out to just under 26h.
        prop_assert!(runs[0] - now < Duration::hours(26));
    }

    #[test]
    fn next_run_is_the_first_boundary(now in any_instant(), tfs in any_timeframes()) {
        let clock = TimeframeClock::new(New_York, tfs, Duration::minutes(2));
        let first = clock.next_boundaries(now, 25)[0];
        let schedule = TimeframeAligned::new(clock);
        let run = schedule.next_run(now).unwrap();

        prop_assert_eq!(run.at, first);
        prop_assert!(!run.timeframes.is_empty());
        prop_assert_eq!(run.is_priority, schedule.is_priority(run.at));
        prop_assert_eq!(schedule.time_until_next_run(now), first - now);
    }
}
