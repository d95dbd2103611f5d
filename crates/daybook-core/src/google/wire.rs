//! Serde shapes for the Google Calendar v3 and Tasks v1 payloads.
//!
//! Responses are deserialized into these structs; request bodies are built
//! as `serde_json::Value` by the sync codec so optional fields can be
//! dropped entirely (Google rejects some explicit nulls).

use serde::{Deserialize, Serialize};

/// Start/end/originalStartTime of a calendar event. Exactly one of `date`
/// (all-day) or `date_time` is set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EventTime {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<String>,
}

impl EventTime {
    /// The timestamp regardless of all-day-ness.
    pub fn value(&self) -> Option<&str> {
        self.date_time.as_deref().or(self.date.as_deref())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GoogleAttendee {
    pub email: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub display_name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub response_status: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GoogleReminderOverride {
    pub method: String,
    pub minutes: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GoogleReminders {
    pub use_default: bool,
    pub overrides: Vec<GoogleReminderOverride>,
}

/// A calendar event as returned by the Events API.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GoogleEvent {
    pub id: String,
    pub status: String,
    pub etag: Option<String>,
    pub summary: String,
    pub description: String,
    pub location: String,
    pub start: Option<EventTime>,
    pub end: Option<EventTime>,
    pub recurrence: Vec<String>,
    /// Set on instances/exceptions of a recurring series.
    pub recurring_event_id: Option<String>,
    pub original_start_time: Option<EventTime>,
    pub attendees: Vec<GoogleAttendee>,
    pub reminders: Option<GoogleReminders>,
    /// RFC 3339 last-modification time.
    pub updated: String,
}

impl GoogleEvent {
    pub fn is_cancelled(&self) -> bool {
        self.status == "cancelled"
    }

    /// Whether this record is an instance/exception rather than a master.
    pub fn is_instance(&self) -> bool {
        self.recurring_event_id.is_some()
    }
}

/// One page of an events list response.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EventsPage {
    pub items: Vec<GoogleEvent>,
    pub next_page_token: Option<String>,
    pub next_sync_token: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CalendarListEntry {
    pub id: String,
    pub summary: String,
    pub primary: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CalendarListPage {
    pub items: Vec<CalendarListEntry>,
    pub next_page_token: Option<String>,
}

/// A task as returned by the Tasks API.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GoogleTask {
    pub id: String,
    pub etag: Option<String>,
    pub title: String,
    pub notes: String,
    /// "needsAction" or "completed".
    pub status: String,
    pub due: Option<String>,
    pub completed: Option<String>,
    /// RFC 3339 last-modification time.
    pub updated: String,
    pub deleted: bool,
    pub hidden: bool,
}

impl GoogleTask {
    pub fn is_completed(&self) -> bool {
        self.status == "completed"
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TasksPage {
    pub items: Vec<GoogleTask>,
    pub next_page_token: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TaskList {
    pub id: String,
    pub title: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TaskListsPage {
    pub items: Vec<TaskList>,
    pub next_page_token: Option<String>,
}
