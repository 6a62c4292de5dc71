use chrono::{Duration, TimeZone, Utc};
use proptest::prelude::*;

use common::{PriorityConfig, PriorityLevel, SignalDescriptor};
use priority::scorer::{strength_bonus, STRENGTH_WEIGHTS};
use priority::PriorityScorer;

fn strength() -> impl Strategy<Value = String> {
    prop_oneof![
        Just(String::new()),
        Just("Weak".to_string()),
        Just("Moderate".to_string()),
        Just("Strong".to_string()),
        Just("Very Strong".to_string()),
        ".{0,12}",
    ]
}

proptest! {
    /// Scoring is total: arbitrary text never panics and always lands on a level.
    #[test]
    fn scoring_never_panics_on_arbitrary_text(
        kind in ".{0,40}",
        strength in ".{0,20}",
        system in ".{0,30}",
        ticker in "[A-Za-z]{0,6}",
        timeframe in ".{0,4}",
        age_mins in -10_000i64..100_000i64,
    ) {
        let now = Utc.with_ymd_and_hms(2024, 6, 3, 16, 2, 0).unwrap();
        let sig = SignalDescriptor::new(kind, strength, system, Some(now - Duration::minutes(age_mins)));
        let score = PriorityScorer::new().score(&sig, &ticker, &timeframe, &PriorityConfig::default(), now);

        let sum = score.base + score.strength_bonus + score.system_bonus + score.ticker_bonus
            + score.timeframe_bonus + score.urgency_bonus + score.pattern_bonus;
        prop_assert_eq!(score.total, sum);
        prop_assert_eq!(score.level, PriorityConfig::default().thresholds.level_for(score.total));
    }

    /// Raising the strength never lowers the total, everything else equal.
    #[test]
    fn stronger_signal_never_scores_lower(
        weaker in strength(),
        kind in ".{0,20}",
        vip in any::<bool>(),
    ) {
        let now = Utc.with_ymd_and_hms(2024, 6, 3, 16, 2, 0).unwrap();
        let scorer = PriorityScorer::new();
        let ticker = if vip { "SPY" } else { "XYZ" };
        for (stronger, weight) in STRENGTH_WEIGHTS {
            if *weight < strength_bonus(&weaker) {
                continue;
            }
            let lo = scorer.score(&SignalDescriptor::new(kind.clone(), weaker.clone(), "Zero Line", None), ticker, "1h", &PriorityConfig::default(), now);
            let hi = scorer.score(&SignalDescriptor::new(kind.clone(), *stronger, "Zero Line", None), ticker, "1h", &PriorityConfig::default(), now);
            prop_assert!(hi.total >= lo.total);
            prop_assert!(hi.level >= lo.level);
        }
    }

    /// A fresher timestamp never lowers the total.
    #[test]
    fn fresher_signal_never_scores_lower(older in 0i64..5_000, delta in 0i64..5_000) {
        let now = Utc.with_ymd_and_hms(2024, 6, 3, 16, 2, 0).unwrap();
        let scorer = PriorityScorer::new();
        let cfg = PriorityConfig::default();
        let old = SignalDescriptor::new("Cross", "Weak", "Zero Line", Some(now - Duration::minutes(older + delta)));
        let fresh = SignalDescriptor::new("Cross", "Weak", "Zero Line", Some(now - Duration::minutes(older)));
        let a = scorer.score(&old, "XYZ", "1h", &cfg, now);
        let b = scorer.score(&fresh, "XYZ", "1h", &cfg, now);
        prop_assert!(b.total >= a.total);
    }

    /// Exactly hitting a threshold yields that threshold's level.
    #[test]
    fn thresholds_are_inclusive(low in 0i32..40, gap in 1i32..20) {
        let mut cfg = PriorityConfig::default();
        cfg.thresholds.low = low;
        cfg.thresholds.medium = low + gap;
        cfg.thresholds.high = low + 2 * gap;
        cfg.thresholds.critical = low + 3 * gap;
        let t = cfg.thresholds;
        prop_assert_eq!(t.level_for(t.critical), PriorityLevel::Critical);
        prop_assert_eq!(t.level_for(t.high), PriorityLevel::High);
        prop_assert_eq!(t.level_for(t.medium), PriorityLevel::Medium);
        prop_assert_eq!(t.level_for(t.low), PriorityLevel::Low);
        prop_assert_eq!(t.level_for(t.low - 1), PriorityLevel::Minimal);
    }
}
