//! TOML-based application configuration.
//!
//! Stores sync engine tuning:
//! - Scheduling cadence (periodic interval, debounce)
//! - Pull lookback windows (routine and full-resync)
//! - Push batch bounds per entity kind
//! - Backoff knobs (auth window, rate-limit floor/ceiling, local-auth cap)
//! - Which calendars and task lists to sync
//!
//! Configuration is stored at `~/.config/daybook/config.toml`.

use serde::{Deserialize, Serialize};

use super::data_dir;
use crate::error::ConfigError;

/// Sync engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Seconds between periodic sync cycles.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Milliseconds a scheduled run waits for further triggers to coalesce.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Days of history refetched when a cursor is missing or invalid.
    #[serde(default = "default_pull_lookback_days")]
    pub pull_lookback_days: i64,
    /// Days of history refetched on an explicit full resync.
    #[serde(default = "default_full_resync_lookback_days")]
    pub full_resync_lookback_days: i64,
    #[serde(default = "default_push_batch_events")]
    pub push_batch_events: usize,
    #[serde(default = "default_push_batch_tasks")]
    pub push_batch_tasks: usize,
    #[serde(default = "default_push_batch_items")]
    pub push_batch_items: usize,
    /// Fixed suppression window after a missing-credential error.
    #[serde(default = "default_auth_backoff_secs")]
    pub auth_backoff_secs: u64,
    #[serde(default = "default_rate_limit_floor_secs")]
    pub rate_limit_floor_secs: u64,
    #[serde(default = "default_rate_limit_ceiling_secs")]
    pub rate_limit_ceiling_secs: u64,
    /// Consecutive local-store authorization failures that abort a cycle.
    #[serde(default = "default_local_auth_failure_cap")]
    pub local_auth_failure_cap: u32,
    /// Calendar ids pulled each cycle; events pushed without a link go to
    /// the first entry.
    #[serde(default = "default_calendar_ids")]
    pub calendar_ids: Vec<String>,
    /// Task list ids pulled each cycle; tasks pushed without a link go to
    /// the first entry.
    #[serde(default = "default_task_list_ids")]
    pub task_list_ids: Vec<String>,
}

/// Application configuration.
///
/// Serialized to/from TOML at `~/.config/daybook/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub sync: SyncSettings,
}

fn default_interval_secs() -> u64 {
    300
}
fn default_debounce_ms() -> u64 {
    2_000
}
fn default_pull_lookback_days() -> i64 {
    30
}
fn default_full_resync_lookback_days() -> i64 {
    365
}
fn default_push_batch_events() -> usize {
    25
}
fn default_push_batch_tasks() -> usize {
    50
}
fn default_push_batch_items() -> usize {
    50
}
fn default_auth_backoff_secs() -> u64 {
    900
}
fn default_rate_limit_floor_secs() -> u64 {
    60
}
fn default_rate_limit_ceiling_secs() -> u64 {
    3_600
}
fn default_local_auth_failure_cap() -> u32 {
    3
}
fn default_calendar_ids() -> Vec<String> {
    vec!["primary".to_string()]
}
fn default_task_list_ids() -> Vec<String> {
    vec!["@default".to_string()]
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            debounce_ms: default_debounce_ms(),
            pull_lookback_days: default_pull_lookback_days(),
            full_resync_lookback_days: default_full_resync_lookback_days(),
            push_batch_events: default_push_batch_events(),
            push_batch_tasks: default_push_batch_tasks(),
            push_batch_items: default_push_batch_items(),
            auth_backoff_secs: default_auth_backoff_secs(),
            rate_limit_floor_secs: default_rate_limit_floor_secs(),
            rate_limit_ceiling_secs: default_rate_limit_ceiling_secs(),
            local_auth_failure_cap: default_local_auth_failure_cap(),
            calendar_ids: default_calendar_ids(),
            task_list_ids: default_task_list_ids(),
        }
    }
}

impl Config {
    /// Load the configuration, falling back to defaults if the file does
    /// not exist yet.
    pub fn load() -> Result<Self, ConfigError> {
        let path = data_dir()
            .map_err(|e| ConfigError::LoadFailed {
                path: "~/.config/daybook".into(),
                message: e.to_string(),
            })?
            .join("config.toml");

        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(&path).map_err(|e| ConfigError::LoadFailed {
            path: path.clone(),
            message: e.to_string(),
        })?;
        toml::from_str(&raw).map_err(|e| ConfigError::ParseFailed(e.to_string()))
    }

    /// Persist the configuration to `config.toml`.
    pub fn save(&self) -> Result<(), ConfigError> {
        let path = data_dir()
            .map_err(|e| ConfigError::SaveFailed {
                path: "~/.config/daybook".into(),
                message: e.to_string(),
            })?
            .join("config.toml");

        let raw = toml::to_string_pretty(self).map_err(|e| ConfigError::ParseFailed(e.to_string()))?;
        std::fs::write(&path, raw).map_err(|e| ConfigError::SaveFailed {
            path,
            message: e.to_string(),
        })
    }
}
