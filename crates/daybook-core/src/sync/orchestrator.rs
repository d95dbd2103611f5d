//! Sync orchestrator: scheduling, single-flight execution, backoff, and the
//! kill switch.
//!
//! All mutable engine state (run state, rerun flag, backoff windows) lives
//! in one `SyncOrchestrator` instance owned by the active session; trigger
//! sources only ever send messages, never execute a cycle themselves.
//!
//! States: `Idle -> Scheduled -> Running -> (Idle | Scheduled)`. A trigger
//! arriving while `Scheduled` resets the debounce timer; one arriving while
//! `Running` sets a rerun-once flag consumed right after the current run.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use super::error::{FailureClass, SyncError};
use super::notify::{Notification, NotificationSink, Severity};
use super::{pull, push, PhaseStats, SyncContext, SyncPhase};
use crate::google::GoogleClient;
use crate::storage::{Database, SyncSettings};

/// Why a run was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    LocalEdit,
    Periodic,
    Online,
    /// The embedding app returned to the foreground.
    Resumed,
    Manual,
    FullResync,
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    Idle,
    Scheduled,
    Running,
}

/// Exponential rate-limit suppression delay, doubling per repeated
/// violation, bounded by the configured floor and ceiling.
pub fn rate_limit_delay(streak: u32, floor_secs: u64, ceiling_secs: u64) -> Duration {
    let exp = streak.saturating_sub(1).min(30);
    let secs = floor_secs.saturating_mul(1u64 << exp).min(ceiling_secs);
    Duration::seconds(secs as i64)
}

/// Cycle-gating backoff windows.
#[derive(Debug, Default)]
pub struct BackoffState {
    auth_unavailable_until: Option<DateTime<Utc>>,
    rate_limited_until: Option<DateTime<Utc>>,
    rate_limit_streak: u32,
}

impl BackoffState {
    /// Open the fixed suppression window after a missing-credential error.
    pub fn note_credential_unavailable(&mut self, settings: &SyncSettings, now: DateTime<Utc>) {
        self.auth_unavailable_until =
            Some(now + Duration::seconds(settings.auth_backoff_secs as i64));
    }

    /// Escalate the rate-limit window. Each repeated violation doubles the
    /// delay up to the ceiling.
    pub fn note_rate_limited(&mut self, settings: &SyncSettings, now: DateTime<Utc>) {
        self.rate_limit_streak += 1;
        let delay = rate_limit_delay(
            self.rate_limit_streak,
            settings.rate_limit_floor_secs,
            settings.rate_limit_ceiling_secs,
        );
        self.rate_limited_until = Some(now + delay);
    }

    /// A cycle completed without tripping the rate limiter: reset the
    /// escalation back to its floor.
    pub fn note_clean_cycle(&mut self) {
        self.rate_limit_streak = 0;
    }

    pub fn rate_limit_streak(&self) -> u32 {
        self.rate_limit_streak
    }

    /// The instant until which cycles are suppressed, if any window is
    /// still open.
    pub fn suppressed_until(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        [self.auth_unavailable_until, self.rate_limited_until]
            .into_iter()
            .flatten()
            .filter(|t| *t > now)
            .max()
    }
}

#[derive(Debug, Clone)]
pub struct PhaseReport {
    pub phase: SyncPhase,
    pub stats: PhaseStats,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub started_at: String,
    pub full_resync: bool,
    pub phases: Vec<PhaseReport>,
    /// Set when the cycle stopped early on a cycle-aborting condition.
    pub aborted: Option<String>,
    /// Set when the cycle never ran (kill switch, backoff window).
    pub skipped: Option<String>,
}

/// Cloneable handle for trigger sources.
#[derive(Clone)]
pub struct SyncHandle {
    tx: mpsc::UnboundedSender<SyncTrigger>,
}

impl SyncHandle {
    pub fn request(&self, trigger: SyncTrigger) {
        let _ = self.tx.send(trigger);
    }

    /// Ask the run loop to shut down. Safe to call repeatedly.
    pub fn stop(&self) {
        let _ = self.tx.send(SyncTrigger::Shutdown);
    }
}

pub struct SyncOrchestrator {
    db: Database,
    client: GoogleClient,
    notifier: Arc<dyn NotificationSink>,
    settings: SyncSettings,
    user_id: String,
    state: OrchestratorState,
    backoff: BackoffState,
    last_report: Option<CycleReport>,
    tx: mpsc::UnboundedSender<SyncTrigger>,
    rx: mpsc::UnboundedReceiver<SyncTrigger>,
}

async fn run_phase(
    cx: &SyncContext<'_>,
    phase: SyncPhase,
    full_resync: bool,
) -> Result<PhaseStats, SyncError> {
    match phase {
        SyncPhase::PushEvents => push::push_events(cx).await,
        SyncPhase::PushTasks => push::push_tasks(cx).await,
        SyncPhase::PushItems => push::push_items(cx).await,
        SyncPhase::PullEvents => pull::pull_events(cx, full_resync).await,
        SyncPhase::PullTasks => pull::pull_tasks(cx, full_resync).await,
    }
}

impl SyncOrchestrator {
    pub fn new(
        db: Database,
        client: GoogleClient,
        notifier: Arc<dyn NotificationSink>,
        settings: SyncSettings,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let user_id = client.account();
        Self {
            db,
            client,
            notifier,
            settings,
            user_id,
            state: OrchestratorState::Idle,
            backoff: BackoffState::default(),
            last_report: None,
            tx,
            rx,
        }
    }

    pub fn handle(&self) -> SyncHandle {
        SyncHandle {
            tx: self.tx.clone(),
        }
    }

    pub fn state(&self) -> OrchestratorState {
        self.state
    }

    pub fn last_report(&self) -> Option<&CycleReport> {
        self.last_report.as_ref()
    }

    pub fn backoff(&self) -> &BackoffState {
        &self.backoff
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    /// Run one sync cycle. Phase failures are recorded in the report; only
    /// the three cycle-aborting conditions stop the remaining phases.
    pub async fn run_cycle(&mut self, full_resync: bool) -> Result<CycleReport, SyncError> {
        let mut report = CycleReport {
            started_at: Utc::now().to_rfc3339(),
            full_resync,
            ..Default::default()
        };

        if self.db.kill_switch()? {
            tracing::warn!("sync kill switch is set; skipping cycle");
            report.skipped = Some("kill switch".to_string());
            self.last_report = Some(report.clone());
            return Ok(report);
        }

        let now = Utc::now();
        if let Some(until) = self.backoff.suppressed_until(now) {
            tracing::info!(until = %until.to_rfc3339(), "sync suppressed by backoff window");
            report.skipped = Some(format!("backing off until {}", until.to_rfc3339()));
            self.last_report = Some(report.clone());
            return Ok(report);
        }

        self.state = OrchestratorState::Running;
        let cx = SyncContext {
            db: &self.db,
            client: &self.client,
            notifier: self.notifier.as_ref(),
            settings: &self.settings,
            user_id: self.user_id.clone(),
        };

        let mut consecutive_auth_failures = 0u32;
        let mut rate_limited = false;

        for phase in SyncPhase::ALL {
            let mut result = run_phase(&cx, phase, full_resync).await;
            if matches!(&result, Err(e) if e.is_store_auth()) {
                // One immediate retry before counting the failure.
                result = run_phase(&cx, phase, full_resync).await;
            }

            match result {
                Ok(stats) => {
                    consecutive_auth_failures = 0;
                    tracing::debug!(
                        phase = phase.as_str(),
                        pushed = stats.pushed,
                        pulled = stats.pulled,
                        failed = stats.failed,
                        "phase complete"
                    );
                    report.phases.push(PhaseReport {
                        phase,
                        stats,
                        error: None,
                    });
                }
                Err(e) => {
                    let class = e.class();
                    let is_store_auth = e.is_store_auth();
                    tracing::warn!(phase = phase.as_str(), error = %e, "phase failed");
                    report.phases.push(PhaseReport {
                        phase,
                        stats: PhaseStats::default(),
                        error: Some(e.to_string()),
                    });

                    match class {
                        FailureClass::CredentialUnavailable => {
                            self.backoff.note_credential_unavailable(&self.settings, now);
                            report.aborted = Some("credential unavailable".to_string());
                            break;
                        }
                        FailureClass::RateLimited => {
                            rate_limited = true;
                            self.backoff.note_rate_limited(&self.settings, now);
                            report.aborted = Some("rate limited".to_string());
                            break;
                        }
                        FailureClass::Fatal => {
                            cx.notifier.notify(Notification {
                                severity: Severity::Error,
                                title: "Sync failed".to_string(),
                                message: e.to_string(),
                                action: None,
                            });
                        }
                        FailureClass::Transient => {
                            if is_store_auth {
                                consecutive_auth_failures += 1;
                                if consecutive_auth_failures >= self.settings.local_auth_failure_cap
                                {
                                    report.aborted =
                                        Some("local store authorization failures".to_string());
                                    break;
                                }
                            } else {
                                consecutive_auth_failures = 0;
                            }
                        }
                    }
                }
            }
        }

        if report.aborted.is_none() && !rate_limited {
            self.backoff.note_clean_cycle();
        }

        self.state = OrchestratorState::Idle;
        self.last_report = Some(report.clone());
        Ok(report)
    }

    /// Run loop: periodic ticks plus coalesced triggers, single-flight.
    /// Returns when a shutdown is requested or every handle is dropped.
    pub async fn run_loop(&mut self) {
        let interval = std::time::Duration::from_secs(self.settings.interval_secs.max(1));
        let debounce = std::time::Duration::from_millis(self.settings.debounce_ms);
        let mut tick = tokio::time::interval(interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            // Idle: wait for a reason to run. The first tick fires
            // immediately, which doubles as the startup sync.
            let mut full_resync = false;
            tokio::select! {
                _ = tick.tick() => {}
                trigger = self.rx.recv() => match trigger {
                    None | Some(SyncTrigger::Shutdown) => break,
                    Some(SyncTrigger::FullResync) => full_resync = true,
                    Some(_) => {}
                }
            }

            // Scheduled: absorb further triggers until a quiet period.
            self.state = OrchestratorState::Scheduled;
            loop {
                match tokio::time::timeout(debounce, self.rx.recv()).await {
                    Ok(None) | Ok(Some(SyncTrigger::Shutdown)) => {
                        self.state = OrchestratorState::Idle;
                        return;
                    }
                    Ok(Some(SyncTrigger::FullResync)) => full_resync = true,
                    Ok(Some(_)) => {}
                    Err(_) => break,
                }
            }

            // Running: this loop is the only executor, so at most one cycle
            // is in flight per session.
            loop {
                if let Err(e) = self.run_cycle(full_resync).await {
                    tracing::error!(error = %e, "sync cycle failed");
                }
                full_resync = false;

                // Triggers that arrived while running request one more run.
                let mut rerun = false;
                let mut shutdown = false;
                while let Ok(trigger) = self.rx.try_recv() {
                    match trigger {
                        SyncTrigger::Shutdown => shutdown = true,
                        SyncTrigger::FullResync => {
                            rerun = true;
                            full_resync = true;
                        }
                        _ => rerun = true,
                    }
                }
                if shutdown {
                    self.state = OrchestratorState::Idle;
                    return;
                }
                if !rerun {
                    break;
                }
            }

            self.state = OrchestratorState::Idle;
            tick.reset();
        }
        self.state = OrchestratorState::Idle;
    }
}
