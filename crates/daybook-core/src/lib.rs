//! # Daybook Core Library
//!
//! Core business logic for Daybook, a local-first notes/calendar/tasks app
//! that syncs bidirectionally with Google Calendar and Google Tasks. All
//! operations are available through the standalone CLI binary; any GUI is a
//! thin layer over this library.
//!
//! ## Architecture
//!
//! - **Storage**: SQLite local store (entities, links, cursors, kv) and
//!   TOML configuration
//! - **Google**: typed REST adapter for the Calendar v3 / Tasks v1 APIs
//!   plus the OAuth2 flow with keyring-backed tokens
//! - **Sync**: push/pull pipelines, last-writer-wins conflict resolution,
//!   and the orchestrator that schedules cycles, enforces single-flight
//!   execution, and manages backoff and the kill switch
//!
//! ## Key Components
//!
//! - [`storage::Database`]: local store persistence
//! - [`google::GoogleClient`]: remote client adapter
//! - [`sync::SyncOrchestrator`]: sync run loop and cycle execution

pub mod error;
pub mod google;
pub mod model;
pub mod storage;
pub mod sync;

pub use error::{ConfigError, CoreError, DatabaseError, OAuthError};
pub use model::{
    Attendee, EntityKind, EventRecord, EventStatus, ItemRecord, ItemTarget, ResourceKind,
    TaskRecord,
};
pub use storage::{Config, Database, SyncSettings};
