use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use common::{DetectedSignal, PriorityLevel};
use priority::{Assessment, NotificationGate, RankedSignal};
use scheduler::{CycleCheck, CycleContext};

/// Latest detector output: a JSON array of signals, rewritten by the detector.
pub struct FileSignalFeed {
    path: PathBuf,
}

impl FileSignalFeed {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// A missing file means the detector has found nothing yet.
    pub async fn fetch(&self) -> anyhow::Result<Vec<DetectedSignal>> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No signal feed yet");
                return Ok(Vec::new());
            }
            Err(e) => {
                return Err(e).with_context(|| format!("reading signal feed {}", self.path.display()))
            }
        };
        if raw.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&raw).with_context(|| format!("parsing signal feed {}", self.path.display()))
    }
}

/// The per-cycle check: read the feed, gate it, queue alerts for what passes.
pub struct SignalCheck {
    feed: FileSignalFeed,
    gate: Arc<NotificationGate>,
    alerts: mpsc::Sender<String>,
}

impl SignalCheck {
    pub fn new(feed: FileSignalFeed, gate: Arc<NotificationGate>, alerts: mpsc::Sender<String>) -> Self {
        Self { feed, gate, alerts }
    }
}

#[async_trait]
impl CycleCheck for SignalCheck {
    async fn run(&self, ctx: &CycleContext) -> anyhow::Result<()> {
        let signals = self.feed.fetch().await?;
        let Assessment { triage, summary } = self.gate.assess(signals).await;

        info!(
            cycle = ctx.cycle,
            detected = summary.total,
            sent = triage.send.len(),
            skipped = triage.skipped.len(),
            critical = summary.count(PriorityLevel::Critical),
            high = summary.count(PriorityLevel::High),
            "Cycle triage"
        );

        for ranked in &triage.send {
            if self.alerts.send(format_alert(ranked, ctx)).await.is_err() {
                warn!(cycle = ctx.cycle, "Alert channel closed, dropping remaining alerts");
                break;
            }
        }
        Ok(())
    }
}

pub fn format_alert(ranked: &RankedSignal, ctx: &CycleContext) -> String {
    let d = &ranked.detected;
    let mut text = format!(
        "[{}] {} {}: {}",
        ranked.score, d.ticker, d.timeframe, d.signal.signal_type
    );
    if !d.signal.strength.is_empty() || !d.signal.system.is_empty() {
        text.push_str(&format!(" ({}, {})", d.signal.strength, d.signal.system));
    }
    text.push_str(&format!("\nCheck #{}: {}", ctx.cycle, ctx.reason));
    text
}
