use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{watch, Mutex, RwLock};
use tracing::{error, info, warn};

use common::{Error, Timeframe};

use crate::schedule::{AlertInstant, Schedule, ScheduleMode};

/// Runs logged when the loop starts.
const STARTUP_PREVIEW: usize = 8;
/// Runs included in a status snapshot.
const STATUS_PREVIEW: usize = 5;

/// Metadata handed to the check on every cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleContext {
    /// Starts at 1 on every `start`.
    pub cycle: u64,
    pub is_priority: bool,
    pub reason: String,
    pub scheduled_for: DateTime<Utc>,
}

/// The work performed on every scheduled run.
#[async_trait]
pub trait CycleCheck: Send + Sync {
    async fn run(&self, ctx: &CycleContext) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Copy)]
pub struct LoopSettings {
    pub failure_cooldown: Duration,
    /// `None` lets a check run for as long as it takes.
    pub cycle_deadline: Option<Duration>,
    /// Sleep used when the schedule has nothing upcoming.
    pub idle_retry: Duration,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            failure_cooldown: Duration::from_secs(60),
            cycle_deadline: Some(Duration::from_secs(600)),
            idle_retry: Duration::from_secs(15 * 60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerState {
    #[default]
    Stopped,
    Waiting,
    Executing,
}

impl fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulerState::Stopped => write!(f, "Stopped"),
            SchedulerState::Waiting => write!(f, "Waiting"),
            SchedulerState::Executing => write!(f, "Executing"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum CycleOutcome {
    Completed { cycle: u64, finished_at: DateTime<Utc> },
    Failed { cycle: u64, finished_at: DateTime<Utc>, error: String },
}

/// Read-only snapshot for dashboards and operator replies.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub current_time: DateTime<Utc>,
    pub timezone: String,
    pub mode: ScheduleMode,
    pub running: bool,
    pub state: SchedulerState,
    pub next_run: Option<DateTime<Utc>>,
    pub next_run_reason: Option<String>,
    pub seconds_until_next_run: i64,
    pub upcoming: Vec<AlertInstant>,
    pub timeframes: Vec<Timeframe>,
    pub settle_delay_minutes: i64,
    pub cycles_completed: u64,
    pub last_outcome: Option<CycleOutcome>,
}

#[derive(Default)]
struct Shared {
    state: SchedulerState,
    cycles_completed: u64,
    last_outcome: Option<CycleOutcome>,
    /// Bumped on every start so a superseded loop cannot write state.
    generation: u64,
    stop_tx: Option<watch::Sender<bool>>,
}

/// Sleeps until each scheduled run and invokes the check.
///
/// Cheap to clone; every clone controls the same loop. Checks never overlap:
/// a loop started while a stopped loop's check is still running waits for
/// that check before starting its own.
#[derive(Clone)]
pub struct SchedulerLoop {
    schedule: Arc<dyn Schedule>,
    check: Arc<dyn CycleCheck>,
    settings: LoopSettings,
    shared: Arc<RwLock<Shared>>,
    /// Held for the whole of a cycle's check.
    executing: Arc<Mutex<()>>,
    clock: fn() -> DateTime<Utc>,
}

impl SchedulerLoop {
    pub fn new(schedule: Arc<dyn Schedule>, check: Arc<dyn CycleCheck>, settings: LoopSettings) -> Self {
        Self {
            schedule,
            check,
            settings,
            shared: Arc::new(RwLock::new(Shared::default())),
            executing: Arc::new(Mutex::new(())),
            clock: Utc::now,
        }
    }

    /// Replace the wall clock used to pick and log runs.
    pub fn with_clock(mut self, clock: fn() -> DateTime<Utc>) -> Self {
        self.clock = clock;
        self
    }

    pub fn schedule(&self) -> &Arc<dyn Schedule> {
        &self.schedule
    }

    /// Launch the loop. Returns false (and only warns) if it is already running.
    pub async fn start(&self) -> bool {
        let (generation, stop_rx) = {
            let mut shared = self.shared.write().await;
            if shared.state != SchedulerState::Stopped {
                warn!("Scheduler already running");
                return false;
            }
            let (stop_tx, stop_rx) = watch::channel(false);
            shared.generation += 1;
            shared.state = SchedulerState::Waiting;
            shared.cycles_completed = 0;
            shared.last_outcome = None;
            shared.stop_tx = Some(stop_tx);
            (shared.generation, stop_rx)
        };

        self.log_upcoming();
        tokio::spawn(self.clone().run(generation, stop_rx));
        true
    }

    /// Cancel the pending wait. A check already in flight runs to completion.
    pub async fn stop(&self) -> bool {
        let mut shared = self.shared.write().await;
        if shared.state == SchedulerState::Stopped {
            warn!("Scheduler is not running");
            return false;
        }
        if let Some(tx) = shared.stop_tx.take() {
            let _ = tx.send(true);
        }
        shared.state = SchedulerState::Stopped;
        info!(cycles = shared.cycles_completed, "Scheduler stopped");
        true
    }

    pub async fn state(&self) -> SchedulerState {
        self.shared.read().await.state
    }

    pub async fn is_running(&self) -> bool {
        self.state().await != SchedulerState::Stopped
    }

    pub async fn status(&self) -> SchedulerStatus {
        let now = (self.clock)();
        let upcoming = self.schedule.upcoming(now, STATUS_PREVIEW);
        let shared = self.shared.read().await;

        SchedulerStatus {
            current_time: now,
            timezone: self.schedule.timezone().name().to_string(),
            mode: self.schedule.mode(),
            running: shared.state != SchedulerState::Stopped,
            state: shared.state,
            next_run: upcoming.first().map(|r| r.at),
            next_run_reason: upcoming.first().map(|r| r.reason.clone()),
            seconds_until_next_run: self.schedule.time_until_next_run(now).num_seconds(),
            timeframes: self.schedule.timeframes(),
            settle_delay_minutes: self.schedule.settle_delay().num_minutes(),
            cycles_completed: shared.cycles_completed,
            last_outcome: shared.last_outcome.clone(),
            upcoming,
        }
    }

    fn log_upcoming(&self) {
        let tz = self.schedule.timezone();
        let upcoming = self.schedule.upcoming((self.clock)(), STARTUP_PREVIEW);
        info!(
            mode = %self.schedule.mode(),
            timezone = tz.name(),
            "Scheduler started, next {} runs:",
            upcoming.len()
        );
        for run in &upcoming {
            info!(
                at = %run.at.with_timezone(&tz).format("%a %H:%M %Z"),
                priority = run.is_priority,
                reason = %run.reason,
                "  upcoming"
            );
        }
    }

    /// Apply `f` unless a newer loop has taken over.
    async fn update(&self, generation: u64, f: impl FnOnce(&mut Shared)) -> bool {
        let mut shared = self.shared.write().await;
        if shared.generation != generation {
            return false;
        }
        f(&mut shared);
        true
    }

    async fn run(self, generation: u64, mut stop_rx: watch::Receiver<bool>) {
        let tz = self.schedule.timezone();
        let mut cycle: u64 = 0;
        // A wall clock stepped back must not hand out the same run twice.
        let mut last_fired: Option<DateTime<Utc>> = None;

        loop {
            if *stop_rx.borrow() {
                break;
            }

            let now = (self.clock)();
            let from = last_fired.map_or(now, |fired| now.max(fired));
            let next = self.schedule.next_run(from);
            let wait = match &next {
                Some(run) => {
                    info!(
                        at = %run.at.with_timezone(&tz).format("%Y-%m-%d %H:%M:%S %Z"),
                        reason = %run.reason,
                        priority = run.is_priority,
                        wait_secs = (run.at - now).num_seconds(),
                        "Next run scheduled"
                    );
                    (run.at - now).to_std().unwrap_or_default()
                }
                None => {
                    warn!(retry_secs = self.settings.idle_retry.as_secs(), "Nothing scheduled, idling");
                    self.settings.idle_retry
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = stop_rx.changed() => {
                    info!("Scheduler wait cancelled");
                    break;
                }
            }

            if *stop_rx.borrow() {
                break;
            }
            let Some(run) = next else { continue };
            last_fired = Some(run.at);

            let executing = match self.executing.try_lock() {
                Ok(guard) => guard,
                Err(_) => {
                    info!("Previous check still running, waiting for it");
                    self.executing.lock().await
                }
            };

            let mut cancelled = false;
            let live = self
                .update(generation, |s| {
                    if s.state == SchedulerState::Stopped {
                        cancelled = true;
                    } else {
                        s.state = SchedulerState::Executing;
                    }
                })
                .await;
            if !live || cancelled {
                break;
            }
            cycle += 1;

            let ctx = CycleContext {
                cycle,
                is_priority: run.is_priority,
                reason: run.reason,
                scheduled_for: run.at,
            };
            info!(
                cycle,
                reason = %ctx.reason,
                priority = ctx.is_priority,
                "Starting signal check"
            );

            let result = self.execute(&ctx).await;
            let failed = result.is_err();
            let outcome = match result {
                Ok(()) => {
                    info!(cycle, "Signal check completed");
                    CycleOutcome::Completed {
                        cycle,
                        finished_at: (self.clock)(),
                    }
                }
                Err(e) => {
                    error!(
                        cycle,
                        error = %e,
                        cooldown_secs = self.settings.failure_cooldown.as_secs(),
                        "Signal check failed, cooling down"
                    );
                    CycleOutcome::Failed {
                        cycle,
                        finished_at: (self.clock)(),
                        error: format!("{e:#}"),
                    }
                }
            };

            let live = self
                .update(generation, |s| {
                    s.cycles_completed = cycle;
                    s.last_outcome = Some(outcome);
                    if s.state == SchedulerState::Executing {
                        s.state = SchedulerState::Waiting;
                    }
                })
                .await;
            drop(executing);
            if !live {
                break;
            }

            if failed {
                tokio::select! {
                    _ = tokio::time::sleep(self.settings.failure_cooldown) => {}
                    _ = stop_rx.changed() => break,
                }
            }
        }
    }

    async fn execute(&self, ctx: &CycleContext) -> anyhow::Result<()> {
        match self.settings.cycle_deadline {
            Some(limit) => match tokio::time::timeout(limit, self.check.run(ctx)).await {
                Ok(result) => result,
                Err(_) => Err(Error::CheckTimeout {
                    secs: limit.as_secs(),
                }
                .into()),
            },
            None => self.check.run(ctx).await,
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
