//! Local entity records.
//!
//! Every syncable entity carries the same sync envelope: a stable local id,
//! an `updated_at` timestamp, a `deleted_at` tombstone, and an `is_unsynced`
//! dirty flag. Timestamps are RFC 3339 strings end to end; the conflict
//! resolver treats unparseable values explicitly rather than panicking on
//! them.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of local entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Event,
    Task,
    Item,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Event => "event",
            EntityKind::Task => "task",
            EntityKind::Item => "item",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "event" => Some(EntityKind::Event),
            "task" => Some(EntityKind::Task),
            "item" => Some(EntityKind::Item),
            _ => None,
        }
    }
}

/// Remote resource family on the Google side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Event,
    Task,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Event => "event",
            ResourceKind::Task => "task",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "event" => Some(ResourceKind::Event),
            "task" => Some(ResourceKind::Task),
            _ => None,
        }
    }
}

/// Where a scheduled item materializes on the remote side.
///
/// Items are the one entity kind that can sync as either resource family;
/// the selector is an explicit column, never inferred from payload contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemTarget {
    Event,
    Task,
}

impl ItemTarget {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemTarget::Event => "event",
            ItemTarget::Task => "task",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "event" => Some(ItemTarget::Event),
            "task" => Some(ItemTarget::Task),
            _ => None,
        }
    }

    pub fn resource(&self) -> ResourceKind {
        match self {
            ItemTarget::Event => ResourceKind::Event,
            ItemTarget::Task => ResourceKind::Task,
        }
    }
}

/// Calendar event status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Confirmed,
    Tentative,
    Cancelled,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Confirmed => "confirmed",
            EventStatus::Tentative => "tentative",
            EventStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "tentative" => EventStatus::Tentative,
            "cancelled" => EventStatus::Cancelled,
            _ => EventStatus::Confirmed,
        }
    }
}

/// Event attendee.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attendee {
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_status: Option<String>,
}

/// A local calendar event.
///
/// A recurring series is one master row (`rrule` set) plus zero or more
/// exception rows (`master_id` + `original_start_at` set). A cancelled
/// occurrence is stored as an exception row with `deleted_at` set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: String,
    pub calendar_id: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub location: Option<String>,
    /// RFC 3339 for timed events, `YYYY-MM-DD` for all-day events.
    pub start_at: Option<String>,
    pub end_at: Option<String>,
    pub all_day: bool,
    pub status: EventStatus,
    /// RRULE line for a recurring master.
    pub rrule: Option<String>,
    /// Local id of the master this exception belongs to.
    pub master_id: Option<String>,
    /// Original occurrence time this exception replaces.
    pub original_start_at: Option<String>,
    pub attendees: Vec<Attendee>,
    /// Reminder offsets in minutes before start.
    pub reminders: Vec<i64>,
    /// Remote id stored on the record itself, as a fallback when the Link
    /// row is missing.
    pub google_event_id: Option<String>,
    pub updated_at: String,
    pub deleted_at: Option<String>,
    pub is_unsynced: bool,
}

impl EventRecord {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            calendar_id: None,
            title: title.into(),
            description: None,
            location: None,
            start_at: None,
            end_at: None,
            all_day: false,
            status: EventStatus::Confirmed,
            rrule: None,
            master_id: None,
            original_start_at: None,
            attendees: Vec::new(),
            reminders: Vec::new(),
            google_event_id: None,
            updated_at: Utc::now().to_rfc3339(),
            deleted_at: None,
            is_unsynced: true,
        }
    }

    pub fn is_tombstoned(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Stamp a local edit: bump `updated_at` and set the dirty flag.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now().to_rfc3339();
        self.is_unsynced = true;
    }
}

/// A local task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: String,
    pub list_id: Option<String>,
    pub title: String,
    pub notes: Option<String>,
    pub due_at: Option<String>,
    pub completed_at: Option<String>,
    pub google_task_id: Option<String>,
    pub updated_at: String,
    pub deleted_at: Option<String>,
    pub is_unsynced: bool,
}

impl TaskRecord {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            list_id: None,
            title: title.into(),
            notes: None,
            due_at: None,
            completed_at: None,
            google_task_id: None,
            updated_at: Utc::now().to_rfc3339(),
            deleted_at: None,
            is_unsynced: true,
        }
    }

    pub fn is_tombstoned(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now().to_rfc3339();
        self.is_unsynced = true;
    }
}

/// A note-like item that can be scheduled onto the calendar or the task
/// list. `target` selects the resource family; both remote-id fallbacks are
/// kept because the target can change between syncs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemRecord {
    pub id: String,
    pub title: String,
    pub notes: Option<String>,
    pub start_at: Option<String>,
    pub end_at: Option<String>,
    pub due_at: Option<String>,
    pub target: Option<ItemTarget>,
    pub google_event_id: Option<String>,
    pub google_task_id: Option<String>,
    pub updated_at: String,
    pub deleted_at: Option<String>,
    pub is_unsynced: bool,
}

impl ItemRecord {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            title: title.into(),
            notes: None,
            start_at: None,
            end_at: None,
            due_at: None,
            target: None,
            google_event_id: None,
            google_task_id: None,
            updated_at: Utc::now().to_rfc3339(),
            deleted_at: None,
            is_unsynced: true,
        }
    }

    pub fn is_tombstoned(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now().to_rfc3339();
        self.is_unsynced = true;
    }
}
