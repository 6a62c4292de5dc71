use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use common::{normalize_ticker, DetectedSignal, PriorityConfig, PriorityLevel};
use config_store::ConfigStore;

use crate::scorer::{PriorityScore, PriorityScorer};

/// A detected signal with the score it received.
#[derive(Debug, Clone, Serialize)]
pub struct RankedSignal {
    pub detected: DetectedSignal,
    pub score: PriorityScore,
}

/// One batch split by the gate: `send` is ranked highest first, `skipped`
/// keeps input order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Triage {
    pub send: Vec<RankedSignal>,
    pub skipped: Vec<RankedSignal>,
}

/// Level histogram of a batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PrioritySummary {
    pub total: usize,
    pub counts: BTreeMap<PriorityLevel, usize>,
}

impl PrioritySummary {
    pub fn count(&self, level: PriorityLevel) -> usize {
        self.counts.get(&level).copied().unwrap_or(0)
    }

    /// Share of the batch at `level`, in percent with one decimal.
    pub fn percent(&self, level: PriorityLevel) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        let pct = self.count(level) as f64 * 100.0 / self.total as f64;
        (pct * 10.0).round() / 10.0
    }
}

/// One scored batch: what to send and how the levels were distributed.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Assessment {
    pub triage: Triage,
    pub summary: PrioritySummary,
}

/// Result of an admin edit: whether anything changed in memory and whether
/// the write-back to the store went through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mutation {
    pub changed: bool,
    pub persisted: bool,
}

/// Decides which signals are worth a notification.
///
/// Owns the working `PriorityConfig` for one named config. Every batch
/// operation reads the config once, by value, and scores the whole batch
/// against that snapshot; admin edits made meanwhile apply to the next batch.
/// Construct one per process and share it behind an `Arc`.
pub struct NotificationGate {
    scorer: PriorityScorer,
    store: Arc<ConfigStore>,
    config_name: String,
    working: RwLock<PriorityConfig>,
    /// Held across an edit and its save so stored writes land in edit order.
    edits: Mutex<()>,
}

impl NotificationGate {
    /// Starts on the hard-coded defaults; call `reload` to pull from the store.
    pub fn new(store: Arc<ConfigStore>, config_name: impl Into<String>) -> Self {
        let config_name = config_name.into();
        Self {
            scorer: PriorityScorer::new(),
            store,
            working: RwLock::new(PriorityConfig::defaults(&config_name)),
            edits: Mutex::new(()),
            config_name,
        }
    }

    pub fn config_name(&self) -> &str {
        &self.config_name
    }

    /// Replace the working config with whatever the store chain yields.
    pub async fn reload(&self) -> PriorityConfig {
        let loaded = self.store.load(&self.config_name).await;
        *self.working.write().await = loaded.clone();
        loaded
    }

    /// Snapshot of the working config.
    pub async fn config(&self) -> PriorityConfig {
        self.working.read().await.clone()
    }

    pub async fn config_source(&self) -> Option<String> {
        self.store.source().await
    }

    pub fn scorer(&self) -> &PriorityScorer {
        &self.scorer
    }

    pub async fn score(&self, detected: &DetectedSignal) -> PriorityScore {
        let config = self.config().await;
        self.score_with(&config, detected, Utc::now())
    }

    fn score_with(
        &self,
        config: &PriorityConfig,
        detected: &DetectedSignal,
        now: DateTime<Utc>,
    ) -> PriorityScore {
        self.scorer.score(
            &detected.signal,
            &detected.ticker,
            &detected.timeframe,
            config,
            now,
        )
    }

    /// Send iff the score's level is at or above the configured minimum.
    pub async fn should_send(&self, detected: &DetectedSignal) -> (bool, PriorityScore) {
        let config = self.config().await;
        let score = self.score_with(&config, detected, Utc::now());
        (score.level >= config.min_level, score)
    }

    /// Score and order by total, highest first. Equal totals keep their
    /// input order.
    pub async fn rank(&self, signals: Vec<DetectedSignal>) -> Vec<RankedSignal> {
        let config = self.config().await;
        rank_with(self.score_all(&config, signals, Utc::now()))
    }

    /// Signals at or above `min_level` (default: the configured minimum), in
    /// input order.
    pub async fn filter_by_priority(
        &self,
        signals: Vec<DetectedSignal>,
        min_level: Option<PriorityLevel>,
    ) -> Vec<RankedSignal> {
        let config = self.config().await;
        let min_level = min_level.unwrap_or(config.min_level);
        self.score_all(&config, signals, Utc::now())
            .into_iter()
            .filter(|r| r.score.level >= min_level)
            .collect()
    }

    /// Rank the batch and split it at the configured minimum level.
    pub async fn triage(&self, signals: Vec<DetectedSignal>) -> Triage {
        self.assess(signals).await.triage
    }

    pub async fn summary(&self, signals: Vec<DetectedSignal>) -> PrioritySummary {
        self.assess(signals).await.summary
    }

    /// Triage and summary of one batch, scored once against one config snapshot.
    pub async fn assess(&self, signals: Vec<DetectedSignal>) -> Assessment {
        let config = self.config().await;
        let scored = self.score_all(&config, signals, Utc::now());
        let summary = summarize(&scored);
        let (send, skipped): (Vec<_>, Vec<_>) = scored
            .into_iter()
            .partition(|r| r.score.level >= config.min_level);
        Assessment {
            triage: Triage {
                send: rank_with(send),
                skipped,
            },
            summary,
        }
    }

    fn score_all(
        &self,
        config: &PriorityConfig,
        signals: Vec<DetectedSignal>,
        now: DateTime<Utc>,
    ) -> Vec<RankedSignal> {
        signals
            .into_iter()
            .map(|detected| RankedSignal {
                score: self.score_with(config, &detected, now),
                detected,
            })
            .collect()
    }

    // ─── Admin edits ──────────────────────────────────────────────────────

    pub async fn set_min_level(&self, level: PriorityLevel) -> Mutation {
        self.mutate(|cfg| {
            let changed = cfg.min_level != level;
            cfg.min_level = level;
            changed
        })
        .await
    }

    pub async fn add_vip_ticker(&self, ticker: &str) -> Mutation {
        let ticker = normalize_ticker(ticker);
        self.mutate(|cfg| cfg.vip_tickers.insert(ticker)).await
    }

    pub async fn remove_vip_ticker(&self, ticker: &str) -> Mutation {
        let ticker = normalize_ticker(ticker);
        self.mutate(|cfg| cfg.vip_tickers.remove(&ticker)).await
    }

    pub async fn add_vip_timeframe(&self, timeframe: &str) -> Mutation {
        let timeframe = timeframe.trim().to_string();
        self.mutate(|cfg| cfg.vip_timeframes.insert(timeframe)).await
    }

    pub async fn remove_vip_timeframe(&self, timeframe: &str) -> Mutation {
        let timeframe = timeframe.trim();
        self.mutate(|cfg| cfg.vip_timeframes.remove(timeframe)).await
    }

    /// Apply `edit` in memory, then write the result back best-effort.
    async fn mutate<F>(&self, edit: F) -> Mutation
    where
        F: FnOnce(&mut PriorityConfig) -> bool,
    {
        let _edit = self.edits.lock().await;
        let snapshot = {
            let mut working = self.working.write().await;
            if !edit(&mut working) {
                return Mutation {
                    changed: false,
                    persisted: false,
                };
            }
            working.clone()
        };

        let persisted = match self.store.save(&snapshot).await {
            Ok(()) => {
                info!(config = %snapshot.name, "Priority config updated and saved");
                true
            }
            Err(e) => {
                warn!(config = %snapshot.name, error = %e, "Priority config updated in memory only");
                false
            }
        };
        Mutation {
            changed: true,
            persisted,
        }
    }
}

fn summarize(scored: &[RankedSignal]) -> PrioritySummary {
    let mut summary = PrioritySummary {
        total: scored.len(),
        counts: PriorityLevel::ALL.iter().map(|l| (*l, 0)).collect(),
    };
    for r in scored {
        *summary.counts.entry(r.score.level).or_default() += 1;
    }
    summary
}

fn rank_with(mut scored: Vec<RankedSignal>) -> Vec<RankedSignal> {
    // sort_by is stable: ties stay in input order.
    scored.sort_by(|a, b| b.score.total.cmp(&a.score.total));
    scored
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use common::{ConfigProvider, SignalDescriptor};
    use config_store::{DefaultsProvider, MemoryConfigProvider};

    fn detected(ticker: &str, timeframe: &str, kind: &str, strength: &str) -> DetectedSignal {
        DetectedSignal::new(
            ticker,
            timeframe,
            SignalDescriptor::new(kind, strength, "Wave Trend", None),
        )
    }

    async fn gate_with_memory() -> (NotificationGate, MemoryConfigProvider) {
        let db = MemoryConfigProvider::new();
        let store = Arc::new(ConfigStore::new(vec![
            Arc::new(db.clone()),
            Arc::new(DefaultsProvider),
        ]));
        let gate = NotificationGate::new(store, "default");
        gate.reload().await;
        (gate, db)
    }

    #[tokio::test]
    async fn should_send_compares_level_to_minimum() {
        let (gate, _db) = gate_with_memory().await;

        // 10 + 25 + 20 + 15 + 10 + 0 + 30 = 110 → CRITICAL
        let (send, score) = gate.should_send(&detected("SPY", "1d", "Gold Buy", "Very Strong")).await;
        assert!(send);
        assert_eq!(score.level, PriorityLevel::Critical);

        // 10 + 5 + 20 = 35 → LOW, below MEDIUM
        let (send, score) = gate.should_send(&detected("ZZZ", "1h", "Plain", "Weak")).await;
        assert!(!send);
        assert_eq!(score.level, PriorityLevel::Low);

        gate.set_min_level(PriorityLevel::Low).await;
        let (send, _) = gate.should_send(&detected("ZZZ", "1h", "Plain", "Weak")).await;
        assert!(send);
    }

    #[tokio::test]
    async fn rank_orders_by_total_and_keeps_ties_in_input_order() {
        let (gate, _db) = gate_with_memory().await;
        let batch = vec![
            detected("AAA", "1h", "Plain", "Weak"),
            detected("BBB", "1h", "Cross", "Weak"),
            detected("CCC", "1h", "Plain", "Weak"),
            detected("SPY", "1d", "Gold", "Strong"),
        ];

        let ranked = gate.rank(batch).await;
        let tickers: Vec<&str> = ranked.iter().map(|r| r.detected.ticker.as_str()).collect();
        assert_eq!(tickers, vec!["SPY", "BBB", "AAA", "CCC"]);
    }

    #[tokio::test]
    async fn triage_splits_at_minimum_level() {
        let (gate, _db) = gate_with_memory().await;
        let batch = vec![
            detected("AAA", "1h", "Plain", "Weak"),
            detected("QQQ", "1h", "Divergence", "Strong"),
            detected("SPY", "1d", "Gold", "Very Strong"),
        ];

        let triage = gate.triage(batch).await;
        let send: Vec<&str> = triage.send.iter().map(|r| r.detected.ticker.as_str()).collect();
        assert_eq!(send, vec!["SPY", "QQQ"]);
        assert_eq!(triage.skipped.len(), 1);
        assert_eq!(triage.skipped[0].detected.ticker, "AAA");
    }

    #[tokio::test]
    async fn filter_keeps_input_order() {
        let (gate, _db) = gate_with_memory().await;
        let batch = vec![
            detected("QQQ", "1h", "Divergence", "Strong"),
            detected("AAA", "1h", "Plain", "Weak"),
            detected("SPY", "1d", "Gold", "Very Strong"),
        ];

        let kept = gate.filter_by_priority(batch.clone(), None).await;
        let tickers: Vec<&str> = kept.iter().map(|r| r.detected.ticker.as_str()).collect();
        assert_eq!(tickers, vec!["QQQ", "SPY"]);

        let all = gate.filter_by_priority(batch, Some(PriorityLevel::Minimal)).await;
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn summary_counts_every_level() {
        let (gate, _db) = gate_with_memory().await;
        let batch = vec![
            detected("AAA", "1h", "Plain", "Weak"),
            detected("BBB", "1h", "Plain", "Weak"),
            detected("SPY", "1d", "Gold", "Very Strong"),
        ];

        let summary = gate.summary(batch).await;
        assert_eq!(summary.total, 3);
        assert_eq!(summary.count(PriorityLevel::Low), 2);
        assert_eq!(summary.count(PriorityLevel::Critical), 1);
        assert_eq!(summary.count(PriorityLevel::High), 0);
        assert_eq!(summary.percent(PriorityLevel::Low), 66.7);
        assert_eq!(summary.counts.len(), 5);
    }

    #[tokio::test]
    async fn admin_edits_write_back_to_store() {
        let (gate, db) = gate_with_memory().await;

        let m = gate.add_vip_ticker("amd").await;
        assert_eq!(m, Mutation { changed: true, persisted: true });
        assert!(db.get("default").await.unwrap().is_vip_ticker("AMD"));

        let m = gate.add_vip_ticker("AMD").await;
        assert!(!m.changed);

        let m = gate.remove_vip_timeframe("4h").await;
        assert!(m.changed && m.persisted);
        assert!(!gate.config().await.is_vip_timeframe("4h"));

        let m = gate.remove_vip_ticker("NOPE").await;
        assert!(!m.changed);
    }

    #[tokio::test]
    async fn edits_survive_store_outage_in_memory() {
        let (gate, db) = gate_with_memory().await;
        db.set_available(false);

        let m = gate.add_vip_timeframe("6h").await;
        assert_eq!(m, Mutation { changed: true, persisted: false });
        assert!(gate.config().await.is_vip_timeframe("6h"));
    }

    #[tokio::test]
    async fn reload_picks_up_stored_config() {
        let (gate, db) = gate_with_memory().await;
        let mut stored = PriorityConfig::default();
        stored.min_level = PriorityLevel::Critical;
        db.insert(stored).await;

        assert_eq!(gate.config().await.min_level, PriorityLevel::Medium);
        gate.reload().await;
        assert_eq!(gate.config().await.min_level, PriorityLevel::Critical);
        assert_eq!(gate.config_source().await.as_deref(), Some("memory"));
    }

    /// Memory-backed provider whose first save is slow.
    struct SlowFirstSave {
        inner: MemoryConfigProvider,
        saves: std::sync::atomic::AtomicUsize,
    }

    #[async_trait::async_trait]
    impl ConfigProvider for SlowFirstSave {
        fn name(&self) -> &str {
            "slow"
        }

        async fn try_load(&self, config_name: &str) -> common::Result<Option<PriorityConfig>> {
            self.inner.try_load(config_name).await
        }

        async fn save(&self, config: &PriorityConfig) -> common::Result<()> {
            if self.saves.fetch_add(1, std::sync::atomic::Ordering::SeqCst) == 0 {
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            }
            self.inner.save(config).await
        }

        fn is_writable(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn concurrent_edits_reach_the_store_in_order() {
        let db = MemoryConfigProvider::new();
        let store = Arc::new(ConfigStore::new(vec![Arc::new(SlowFirstSave {
            inner: db.clone(),
            saves: Default::default(),
        })]));
        let gate = NotificationGate::new(store, "default");

        let (a, b) = tokio::join!(gate.add_vip_ticker("AAA"), gate.add_vip_ticker("BBB"));
        assert!(a.persisted && b.persisted);

        let stored = db.get("default").await.unwrap();
        assert!(stored.is_vip_ticker("AAA"));
        assert!(stored.is_vip_ticker("BBB"));
        assert_eq!(stored, gate.config().await);
    }

    #[tokio::test]
    async fn assessment_counts_match_what_is_sent() {
        let (gate, _db) = gate_with_memory().await;
        let batch = vec![
            detected("AAA", "1h", "Plain", "Weak"),
            detected("QQQ", "1h", "Divergence", "Strong"),
            detected("SPY", "1d", "Gold", "Very Strong"),
        ];

        let report = gate.assess(batch).await;
        let sent_or_above: usize = PriorityLevel::ALL
            .iter()
            .filter(|l| **l >= PriorityLevel::Medium)
            .map(|l| report.summary.count(*l))
            .sum();
        assert_eq!(report.summary.total, 3);
        assert_eq!(report.triage.send.len(), sent_or_above);
        assert_eq!(report.triage.send.len() + report.triage.skipped.len(), 3);
    }
}
