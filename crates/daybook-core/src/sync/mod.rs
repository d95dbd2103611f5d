//! Bidirectional Google synchronization engine.
//!
//! A cycle runs five phases in order: push-events, push-tasks, push-items,
//! pull-events, pull-tasks. Each phase is fault-isolated; only a missing
//! credential, a rate limit, or persistent local-store authorization
//! failure aborts the cycle. The orchestrator owns scheduling, backoff
//! windows, and the kill switch.

pub mod codec;
pub mod conflict;
pub mod cursor_store;
pub mod error;
pub mod link_store;
pub mod notify;
pub mod orchestrator;
pub mod pull;
pub mod push;

pub use cursor_store::Cursor;
pub use error::{FailureClass, SyncError};
pub use link_store::{retry_delay, Link, MAX_LINK_RETRIES, MAX_RETRIES_ERROR};
pub use notify::{
    LogNotificationSink, MemoryNotificationSink, Notification, NotificationAction,
    NotificationSink, Severity,
};
pub use orchestrator::{
    BackoffState, CycleReport, OrchestratorState, PhaseReport, SyncHandle, SyncOrchestrator,
    SyncTrigger,
};

use crate::google::GoogleClient;
use crate::storage::{Database, SyncSettings};

/// The five ordered phases of a sync cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    PushEvents,
    PushTasks,
    PushItems,
    PullEvents,
    PullTasks,
}

impl SyncPhase {
    pub const ALL: [SyncPhase; 5] = [
        SyncPhase::PushEvents,
        SyncPhase::PushTasks,
        SyncPhase::PushItems,
        SyncPhase::PullEvents,
        SyncPhase::PullTasks,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SyncPhase::PushEvents => "push-events",
            SyncPhase::PushTasks => "push-tasks",
            SyncPhase::PushItems => "push-items",
            SyncPhase::PullEvents => "pull-events",
            SyncPhase::PullTasks => "pull-tasks",
        }
    }
}

/// Per-phase outcome counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PhaseStats {
    pub pushed: u32,
    pub pulled: u32,
    pub deleted: u32,
    pub failed: u32,
    pub paused: u32,
    pub skipped: u32,
}

/// Shared read context handed to the pipelines for one cycle.
///
/// The pipelines re-read link state from the store as they go, so later
/// phases observe links written by earlier ones.
pub struct SyncContext<'a> {
    pub db: &'a Database,
    pub client: &'a GoogleClient,
    pub notifier: &'a dyn NotificationSink,
    pub settings: &'a SyncSettings,
    /// Account identity keying the cursor rows.
    pub user_id: String,
}
