//! Mapping between local records and Google wire payloads.
//!
//! Push bodies are built as `serde_json::Value` so absent optional fields
//! are dropped rather than sent as null. Every builder has a minimal
//! variant (title + time range only) used for the one retry after a 400:
//! optional fields are what usually trips provider-side validation.
//!
//! Pull application overwrites local fields from the remote representation
//! and adopts the provider's `updated` timestamp, making the provider the
//! timestamp authority for that write.

use serde_json::{json, Value};

use crate::google::wire::{EventTime, GoogleEvent, GoogleTask};
use crate::model::{Attendee, EventRecord, EventStatus, ItemRecord, TaskRecord};

fn event_time_json(value: &str, all_day: bool) -> Value {
    if all_day {
        json!({ "date": value })
    } else {
        json!({ "dateTime": value })
    }
}

fn set_time_fields(body: &mut Value, start: &Option<String>, end: &Option<String>, all_day: bool) {
    if let Some(start) = start {
        body["start"] = event_time_json(start, all_day);
    }
    if let Some(end) = end {
        body["end"] = event_time_json(end, all_day);
    }
}

// === Events: push ===

/// Full remote representation of a local event. `master_google_id` is the
/// remote id of the recurring master when `ev` is an exception.
pub fn event_payload(ev: &EventRecord, master_google_id: Option<&str>) -> Value {
    let mut body = json!({
        "summary": ev.title,
        "status": ev.status.as_str(),
    });
    set_time_fields(&mut body, &ev.start_at, &ev.end_at, ev.all_day);

    if let Some(ref description) = ev.description {
        body["description"] = json!(description);
    }
    if let Some(ref location) = ev.location {
        body["location"] = json!(location);
    }
    if let Some(ref rrule) = ev.rrule {
        let lines: Vec<&str> = rrule.lines().collect();
        body["recurrence"] = json!(lines);
    }
    if let Some(master_google_id) = master_google_id {
        body["recurringEventId"] = json!(master_google_id);
        if let Some(ref original) = ev.original_start_at {
            body["originalStartTime"] = event_time_json(original, ev.all_day);
        }
    }
    if !ev.attendees.is_empty() {
        let attendees: Vec<Value> = ev
            .attendees
            .iter()
            .map(|a| {
                let mut attendee = json!({ "email": a.email });
                if let Some(ref name) = a.name {
                    attendee["displayName"] = json!(name);
                }
                if let Some(ref status) = a.response_status {
                    attendee["responseStatus"] = json!(status);
                }
                attendee
            })
            .collect();
        body["attendees"] = json!(attendees);
    }
    if !ev.reminders.is_empty() {
        let overrides: Vec<Value> = ev
            .reminders
            .iter()
            .map(|minutes| json!({ "method": "popup", "minutes": minutes }))
            .collect();
        body["reminders"] = json!({ "useDefault": false, "overrides": overrides });
    }

    body
}

/// Reduced payload for the post-400 retry: drops everything optional.
pub fn minimal_event_payload(ev: &EventRecord) -> Value {
    let mut body = json!({ "summary": ev.title });
    set_time_fields(&mut body, &ev.start_at, &ev.end_at, ev.all_day);
    body
}

// === Events: pull ===

fn time_fields(time: &Option<EventTime>) -> (Option<String>, bool) {
    match time {
        Some(t) => (t.value().map(str::to_string), t.date.is_some()),
        None => (None, false),
    }
}

fn remote_title(summary: &str) -> String {
    if summary.is_empty() {
        "(No title)".to_string()
    } else {
        summary.to_string()
    }
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

/// Overwrite a local event from its remote representation and clear the
/// dirty flag.
pub fn apply_remote_event(ev: &mut EventRecord, g: &GoogleEvent) {
    let (start_at, all_day) = time_fields(&g.start);
    let (end_at, _) = time_fields(&g.end);

    ev.title = remote_title(&g.summary);
    ev.description = non_empty(&g.description);
    ev.location = non_empty(&g.location);
    ev.start_at = start_at;
    ev.end_at = end_at;
    ev.all_day = all_day;
    ev.status = EventStatus::parse(&g.status);
    ev.rrule = if g.recurrence.is_empty() {
        None
    } else {
        Some(g.recurrence.join("\n"))
    };
    if let Some(ref original) = g.original_start_time {
        ev.original_start_at = original.value().map(str::to_string);
    }
    ev.attendees = g
        .attendees
        .iter()
        .map(|a| Attendee {
            email: a.email.clone(),
            name: non_empty(&a.display_name),
            response_status: non_empty(&a.response_status),
        })
        .collect();
    ev.reminders = g
        .reminders
        .as_ref()
        .map(|r| r.overrides.iter().map(|o| o.minutes).collect())
        .unwrap_or_default();
    ev.google_event_id = Some(g.id.clone());
    if !g.updated.is_empty() {
        ev.updated_at = g.updated.clone();
    }
    ev.is_unsynced = false;
}

/// Build a brand-new local event from a remote one. `master_local_id` is
/// the local id of the recurring master when `g` is an exception.
pub fn event_from_remote(
    g: &GoogleEvent,
    calendar_id: &str,
    master_local_id: Option<String>,
) -> EventRecord {
    let mut ev = EventRecord::new(remote_title(&g.summary));
    ev.calendar_id = Some(calendar_id.to_string());
    ev.master_id = master_local_id;
    apply_remote_event(&mut ev, g);
    ev
}

// === Tasks: push ===

pub fn task_payload(task: &TaskRecord) -> Value {
    let status = if task.completed_at.is_some() {
        "completed"
    } else {
        "needsAction"
    };
    let mut body = json!({
        "title": task.title,
        "status": status,
    });
    if let Some(ref notes) = task.notes {
        body["notes"] = json!(notes);
    }
    if let Some(ref due) = task.due_at {
        body["due"] = json!(due);
    }
    if let Some(ref completed) = task.completed_at {
        body["completed"] = json!(completed);
    }
    body
}

pub fn minimal_task_payload(task: &TaskRecord) -> Value {
    let status = if task.completed_at.is_some() {
        "completed"
    } else {
        "needsAction"
    };
    json!({ "title": task.title, "status": status })
}

// === Tasks: pull ===

pub fn apply_remote_task(task: &mut TaskRecord, g: &GoogleTask) {
    task.title = remote_title(&g.title);
    task.notes = non_empty(&g.notes);
    task.due_at = g.due.clone();
    task.completed_at = if g.is_completed() {
        g.completed.clone().or_else(|| Some(g.updated.clone()))
    } else {
        None
    };
    task.google_task_id = Some(g.id.clone());
    if !g.updated.is_empty() {
        task.updated_at = g.updated.clone();
    }
    task.is_unsynced = false;
}

pub fn task_from_remote(g: &GoogleTask, list_id: &str) -> TaskRecord {
    let mut task = TaskRecord::new(remote_title(&g.title));
    task.list_id = Some(list_id.to_string());
    apply_remote_task(&mut task, g);
    task
}

// === Items ===

/// Remote event representation of a scheduled item.
pub fn item_event_payload(item: &ItemRecord) -> Value {
    let mut body = json!({ "summary": item.title });
    set_time_fields(&mut body, &item.start_at, &item.end_at, false);
    if let Some(ref notes) = item.notes {
        body["description"] = json!(notes);
    }
    body
}

pub fn minimal_item_event_payload(item: &ItemRecord) -> Value {
    let mut body = json!({ "summary": item.title });
    set_time_fields(&mut body, &item.start_at, &item.end_at, false);
    body
}

/// Remote task representation of a scheduled item.
pub fn item_task_payload(item: &ItemRecord) -> Value {
    let mut body = json!({ "title": item.title, "status": "needsAction" });
    if let Some(ref notes) = item.notes {
        body["notes"] = json!(notes);
    }
    if let Some(ref due) = item.due_at {
        body["due"] = json!(due);
    }
    body
}

pub fn minimal_item_task_payload(item: &ItemRecord) -> Value {
    json!({ "title": item.title, "status": "needsAction" })
}

pub fn apply_remote_event_to_item(item: &mut ItemRecord, g: &GoogleEvent) {
    let (start_at, _) = time_fields(&g.start);
    let (end_at, _) = time_fields(&g.end);
    item.title = remote_title(&g.summary);
    item.notes = non_empty(&g.description);
    item.start_at = start_at;
    item.end_at = end_at;
    item.google_event_id = Some(g.id.clone());
    if !g.updated.is_empty() {
        item.updated_at = g.updated.clone();
    }
    item.is_unsynced = false;
}

pub fn apply_remote_task_to_item(item: &mut ItemRecord, g: &GoogleTask) {
    item.title = remote_title(&g.title);
    item.notes = non_empty(&g.notes);
    item.due_at = g.due.clone();
    item.google_task_id = Some(g.id.clone());
    if !g.updated.is_empty() {
        item.updated_at = g.updated.clone();
    }
    item.is_unsynced = false;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timed_event() -> EventRecord {
        let mut ev = EventRecord::new("standup");
        ev.start_at = Some("2026-08-03T09:00:00+00:00".to_string());
        ev.end_at = Some("2026-08-03T09:15:00+00:00".to_string());
        ev.description = Some("daily".to_string());
        ev.reminders = vec![10];
        ev
    }

    #[test]
    fn test_event_payload_timed() {
        let body = event_payload(&timed_event(), None);
        assert_eq!(body["summary"], "standup");
        assert_eq!(body["start"]["dateTime"], "2026-08-03T09:00:00+00:00");
        assert!(body["start"].get("date").is_none());
        assert_eq!(body["reminders"]["useDefault"], false);
        assert_eq!(body["reminders"]["overrides"][0]["minutes"], 10);
        assert!(body.get("recurringEventId").is_none());
    }

    #[test]
    fn test_event_payload_all_day() {
        let mut ev = EventRecord::new("holiday");
        ev.all_day = true;
        ev.start_at = Some("2026-08-03".to_string());
        ev.end_at = Some("2026-08-04".to_string());
        let body = event_payload(&ev, None);
        assert_eq!(body["start"]["date"], "2026-08-03");
        assert!(body["start"].get("dateTime").is_none());
    }

    #[test]
    fn test_event_payload_exception_references_master() {
        let mut ev = timed_event();
        ev.master_id = Some("local-master".to_string());
        ev.original_start_at = Some("2026-08-01T09:00:00+00:00".to_string());
        let body = event_payload(&ev, Some("g-master"));
        assert_eq!(body["recurringEventId"], "g-master");
        assert_eq!(
            body["originalStartTime"]["dateTime"],
            "2026-08-01T09:00:00+00:00"
        );
    }

    #[test]
    fn test_minimal_payload_drops_optionals() {
        let body = minimal_event_payload(&timed_event());
        assert_eq!(body["summary"], "standup");
        assert!(body.get("description").is_none());
        assert!(body.get("reminders").is_none());
        assert!(body.get("status").is_none());
        assert!(body.get("start").is_some());
    }

    #[test]
    fn test_task_payload_status() {
        let mut task = TaskRecord::new("pay rent");
        let body = task_payload(&task);
        assert_eq!(body["status"], "needsAction");
        assert!(body.get("completed").is_none());

        task.completed_at = Some("2026-08-03T12:00:00+00:00".to_string());
        let body = task_payload(&task);
        assert_eq!(body["status"], "completed");
        assert_eq!(body["completed"], "2026-08-03T12:00:00+00:00");
    }

    #[test]
    fn test_apply_remote_event_overwrites_and_cleans() {
        let g: GoogleEvent = serde_json::from_str(
            r#"{"id":"g-1","status":"confirmed","summary":"renamed",
                "start":{"dateTime":"2026-08-03T10:00:00Z"},
                "end":{"dateTime":"2026-08-03T11:00:00Z"},
                "updated":"2026-08-03T10:30:00.000Z"}"#,
        )
        .unwrap();

        let mut ev = timed_event();
        apply_remote_event(&mut ev, &g);
        assert_eq!(ev.title, "renamed");
        assert_eq!(ev.description, None);
        assert_eq!(ev.start_at.as_deref(), Some("2026-08-03T10:00:00Z"));
        assert_eq!(ev.updated_at, "2026-08-03T10:30:00.000Z");
        assert_eq!(ev.google_event_id.as_deref(), Some("g-1"));
        assert!(!ev.is_unsynced);
        assert!(!ev.all_day);
    }

    #[test]
    fn test_apply_remote_event_all_day_detection() {
        let g: GoogleEvent = serde_json::from_str(
            r#"{"id":"g-2","status":"confirmed","summary":"offsite",
                "start":{"date":"2026-08-10"},"end":{"date":"2026-08-11"},
                "updated":"2026-08-03T00:00:00Z"}"#,
        )
        .unwrap();
        let mut ev = EventRecord::new("x");
        apply_remote_event(&mut ev, &g);
        assert!(ev.all_day);
        assert_eq!(ev.start_at.as_deref(), Some("2026-08-10"));
    }

    #[test]
    fn test_event_from_remote_links_master() {
        let g: GoogleEvent = serde_json::from_str(
            r#"{"id":"g-master_x","status":"confirmed","summary":"weekly",
                "recurringEventId":"g-master",
                "originalStartTime":{"dateTime":"2026-08-05T09:00:00Z"},
                "updated":"2026-08-03T00:00:00Z"}"#,
        )
        .unwrap();
        let ev = event_from_remote(&g, "primary", Some("local-master".to_string()));
        assert_eq!(ev.master_id.as_deref(), Some("local-master"));
        assert_eq!(ev.original_start_at.as_deref(), Some("2026-08-05T09:00:00Z"));
        assert_eq!(ev.calendar_id.as_deref(), Some("primary"));
        assert!(!ev.is_unsynced);
    }

    #[test]
    fn test_apply_remote_task_completion() {
        let g: GoogleTask = serde_json::from_str(
            r#"{"id":"t-1","title":"done thing","status":"completed",
                "completed":"2026-08-02T08:00:00.000Z",
                "updated":"2026-08-02T08:00:01.000Z"}"#,
        )
        .unwrap();
        let mut task = TaskRecord::new("thing");
        apply_remote_task(&mut task, &g);
        assert_eq!(task.completed_at.as_deref(), Some("2026-08-02T08:00:00.000Z"));
        assert_eq!(task.updated_at, "2026-08-02T08:00:01.000Z");
        assert!(!task.is_unsynced);
    }

    #[test]
    fn test_item_payloads() {
        let mut item = ItemRecord::new("write report");
        item.notes = Some("outline first".to_string());
        item.start_at = Some("2026-08-03T13:00:00+00:00".to_string());
        item.end_at = Some("2026-08-03T15:00:00+00:00".to_string());
        item.due_at = Some("2026-08-04T00:00:00.000Z".to_string());

        let as_event = item_event_payload(&item);
        assert_eq!(as_event["summary"], "write report");
        assert_eq!(as_event["description"], "outline first");

        let as_task = item_task_payload(&item);
        assert_eq!(as_task["title"], "write report");
        assert_eq!(as_task["due"], "2026-08-04T00:00:00.000Z");

        assert!(minimal_item_event_payload(&item).get("description").is_none());
        assert!(minimal_item_task_payload(&item).get("notes").is_none());
    }
}
