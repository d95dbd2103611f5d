//! Pull pipeline scenarios against a mocked Google API.

mod common;

use chrono::Utc;
use common::Harness;
use mockito::Matcher;
use serde_json::json;

use daybook_core::model::{EntityKind, EventRecord, ResourceKind, TaskRecord};
use daybook_core::sync::{pull, Cursor, Link};

const OLD_TS: &str = "2026-08-01T09:00:00+00:00";
const NEW_TS: &str = "2026-08-02T09:00:00+00:00";

fn events_page(items: serde_json::Value, sync_token: Option<&str>) -> String {
    let mut page = json!({ "items": items });
    if let Some(token) = sync_token {
        page["nextSyncToken"] = json!(token);
    }
    page.to_string()
}

fn remote_event(id: &str, summary: &str, updated: &str) -> serde_json::Value {
    json!({
        "id": id,
        "status": "confirmed",
        "summary": summary,
        "start": {"dateTime": "2026-08-03T09:00:00Z"},
        "end": {"dateTime": "2026-08-03T10:00:00Z"},
        "updated": updated,
    })
}

fn linked_event(harness: &Harness, google_id: &str, updated_at: &str, dirty: bool) -> EventRecord {
    let mut ev = EventRecord::new("local title");
    ev.google_event_id = Some(google_id.to_string());
    ev.updated_at = updated_at.to_string();
    ev.is_unsynced = dirty;
    harness.db.insert_event(&ev).unwrap();
    harness
        .db
        .upsert_link(&Link::new(
            &ev.id,
            EntityKind::Event,
            google_id,
            ResourceKind::Event,
            "primary",
        ))
        .unwrap();
    ev
}

#[tokio::test]
async fn test_pull_creates_local_event_and_link_together() {
    let mut server = mockito::Server::new_async().await;
    let harness = Harness::new(&server);

    let list = server
        .mock("GET", "/calendars/primary/events")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(events_page(
            json!([remote_event("g-1", "imported", NEW_TS)]),
            Some("tok-1"),
        ))
        .expect(1)
        .create_async()
        .await;
    // Tasks phase is not exercised here.

    let stats = pull::pull_events(&harness.cx(), false).await.unwrap();
    list.assert_async().await;

    assert_eq!(stats.pulled, 1);
    let ev = harness.db.find_event_by_google_id("g-1").unwrap().unwrap();
    assert_eq!(ev.title, "imported");
    assert!(!ev.is_unsynced);
    assert_eq!(ev.calendar_id.as_deref(), Some("primary"));

    let link = harness
        .db
        .find_link_by_google_id("g-1", ResourceKind::Event)
        .unwrap()
        .unwrap();
    assert_eq!(link.local_id, ev.id);

    let cursor = harness
        .db
        .get_cursor("tester", ResourceKind::Event, "primary")
        .unwrap()
        .unwrap();
    assert_eq!(cursor.sync_token.as_deref(), Some("tok-1"));
}

#[tokio::test]
async fn test_second_pull_uses_sync_token() {
    let mut server = mockito::Server::new_async().await;
    let harness = Harness::new(&server);
    harness
        .db
        .save_cursor(&Cursor {
            user_id: "tester".to_string(),
            resource: ResourceKind::Event,
            scope_id: "primary".to_string(),
            sync_token: Some("tok-1".to_string()),
            last_pulled_at: None,
        })
        .unwrap();

    let incremental = server
        .mock("GET", "/calendars/primary/events")
        .match_query(Matcher::UrlEncoded("syncToken".into(), "tok-1".into()))
        .with_status(200)
        .with_body(events_page(json!([]), Some("tok-2")))
        .expect(1)
        .create_async()
        .await;

    let stats = pull::pull_events(&harness.cx(), false).await.unwrap();
    incremental.assert_async().await;
    assert_eq!(stats.pulled, 0);

    let cursor = harness
        .db
        .get_cursor("tester", ResourceKind::Event, "primary")
        .unwrap()
        .unwrap();
    assert_eq!(cursor.sync_token.as_deref(), Some("tok-2"));
}

#[tokio::test]
async fn test_expired_sync_token_clears_cursor_and_refetches() {
    let mut server = mockito::Server::new_async().await;
    let harness = Harness::new(&server);
    harness
        .db
        .save_cursor(&Cursor {
            user_id: "tester".to_string(),
            resource: ResourceKind::Event,
            scope_id: "primary".to_string(),
            sync_token: Some("tok-stale".to_string()),
            last_pulled_at: None,
        })
        .unwrap();

    // Full-window refetch (updatedMin, no token) succeeds.
    let refetch = server
        .mock("GET", "/calendars/primary/events")
        .match_query(Matcher::Regex("updatedMin".to_string()))
        .with_status(200)
        .with_body(events_page(
            json!([remote_event("g-1", "refetched", NEW_TS)]),
            Some("tok-fresh"),
        ))
        .expect(1)
        .create_async()
        .await;
    // The stale-token request gets 410 GONE. Registered last: precedence.
    let stale = server
        .mock("GET", "/calendars/primary/events")
        .match_query(Matcher::UrlEncoded("syncToken".into(), "tok-stale".into()))
        .with_status(410)
        .with_body(json!({"error": {"code": 410, "message": "Sync token expired"}}).to_string())
        .expect(1)
        .create_async()
        .await;

    let stats = pull::pull_events(&harness.cx(), false).await.unwrap();
    stale.assert_async().await;
    refetch.assert_async().await;

    assert_eq!(stats.pulled, 1);
    let cursor = harness
        .db
        .get_cursor("tester", ResourceKind::Event, "primary")
        .unwrap()
        .unwrap();
    assert_eq!(cursor.sync_token.as_deref(), Some("tok-fresh"));
}

#[tokio::test]
async fn test_remote_wins_overwrites_and_notifies_on_lost_edit() {
    let mut server = mockito::Server::new_async().await;
    let harness = Harness::new(&server);
    // Dirty local record with an older timestamp than the remote one.
    let ev = linked_event(&harness, "g-1", OLD_TS, true);

    let list = server
        .mock("GET", "/calendars/primary/events")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(events_page(
            json!([remote_event("g-1", "renamed remotely", NEW_TS)]),
            Some("tok-1"),
        ))
        .create_async()
        .await;

    pull::pull_events(&harness.cx(), false).await.unwrap();
    list.assert_async().await;

    let back = harness.db.get_event(&ev.id).unwrap().unwrap();
    assert_eq!(back.title, "renamed remotely");
    assert_eq!(back.updated_at, NEW_TS);
    assert!(!back.is_unsynced);

    let notifications = harness.notifier.drain();
    assert_eq!(notifications.len(), 1);
    assert!(notifications[0].title.contains("overwritten"));
}

#[tokio::test]
async fn test_local_wins_marks_dirty_without_touching_fields() {
    let mut server = mockito::Server::new_async().await;
    let harness = Harness::new(&server);
    // Clean local record that is newer than the incoming remote version.
    let ev = linked_event(&harness, "g-1", NEW_TS, false);

    let list = server
        .mock("GET", "/calendars/primary/events")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(events_page(
            json!([remote_event("g-1", "older remote title", OLD_TS)]),
            Some("tok-1"),
        ))
        .create_async()
        .await;

    pull::pull_events(&harness.cx(), false).await.unwrap();
    list.assert_async().await;

    let back = harness.db.get_event(&ev.id).unwrap().unwrap();
    assert_eq!(back.title, "local title");
    assert_eq!(back.updated_at, NEW_TS);
    // A future push will re-assert the local version.
    assert!(back.is_unsynced);
    assert!(harness.notifier.drain().is_empty());
}

#[tokio::test]
async fn test_tie_heals_lingering_dirty_flag() {
    let mut server = mockito::Server::new_async().await;
    let harness = Harness::new(&server);
    let ev = linked_event(&harness, "g-1", NEW_TS, true);

    let list = server
        .mock("GET", "/calendars/primary/events")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(events_page(
            json!([remote_event("g-1", "whatever", NEW_TS)]),
            Some("tok-1"),
        ))
        .create_async()
        .await;

    pull::pull_events(&harness.cx(), false).await.unwrap();
    list.assert_async().await;

    let back = harness.db.get_event(&ev.id).unwrap().unwrap();
    // Healed: no endless re-push loop, fields untouched.
    assert!(!back.is_unsynced);
    assert_eq!(back.title, "local title");
}

#[tokio::test]
async fn test_anti_resurrection_ignores_remote_state() {
    let mut server = mockito::Server::new_async().await;
    let harness = Harness::new(&server);
    let mut ev = linked_event(&harness, "g-1", OLD_TS, false);
    ev.deleted_at = Some(Utc::now().to_rfc3339());
    harness.db.update_event(&ev).unwrap();

    let list = server
        .mock("GET", "/calendars/primary/events")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(events_page(
            json!([remote_event("g-1", "back from the dead", NEW_TS)]),
            Some("tok-1"),
        ))
        .create_async()
        .await;

    let stats = pull::pull_events(&harness.cx(), false).await.unwrap();
    list.assert_async().await;

    assert_eq!(stats.pulled, 0);
    let back = harness.db.get_event(&ev.id).unwrap().unwrap();
    assert!(back.deleted_at.is_some());
    assert_eq!(back.title, "local title");
    assert!(!back.is_unsynced);
}

#[tokio::test]
async fn test_remote_delete_tombstones_when_remote_newer() {
    let mut server = mockito::Server::new_async().await;
    let harness = Harness::new(&server);
    let ev = linked_event(&harness, "g-1", OLD_TS, false);

    let list = server
        .mock("GET", "/calendars/primary/events")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(events_page(
            json!([{
                "id": "g-1",
                "status": "cancelled",
                "updated": NEW_TS,
            }]),
            Some("tok-1"),
        ))
        .create_async()
        .await;

    pull::pull_events(&harness.cx(), false).await.unwrap();
    list.assert_async().await;

    let back = harness.db.get_event(&ev.id).unwrap().unwrap();
    assert!(back.deleted_at.is_some());
    assert!(!back.is_unsynced);
    assert!(harness
        .db
        .get_link(&ev.id, ResourceKind::Event, EntityKind::Event)
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_remote_delete_loses_to_newer_local_edit() {
    let mut server = mockito::Server::new_async().await;
    let harness = Harness::new(&server);
    let ev = linked_event(&harness, "g-1", NEW_TS, false);

    let list = server
        .mock("GET", "/calendars/primary/events")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(events_page(
            json!([{ "id": "g-1", "status": "cancelled", "updated": OLD_TS }]),
            Some("tok-1"),
        ))
        .create_async()
        .await;

    pull::pull_events(&harness.cx(), false).await.unwrap();
    list.assert_async().await;

    // The local record survives and will be re-asserted by the next push.
    let back = harness.db.get_event(&ev.id).unwrap().unwrap();
    assert!(back.deleted_at.is_none());
    assert!(back.is_unsynced);
}

#[tokio::test]
async fn test_cancelled_exception_materializes_deleted_instance() {
    let mut server = mockito::Server::new_async().await;
    let harness = Harness::new(&server);

    // Local master for the recurring series.
    let mut master = EventRecord::new("weekly");
    master.rrule = Some("RRULE:FREQ=WEEKLY".to_string());
    master.google_event_id = Some("g-master".to_string());
    master.is_unsynced = false;
    harness.db.insert_event(&master).unwrap();
    harness
        .db
        .upsert_link(&Link::new(
            &master.id,
            EntityKind::Event,
            "g-master",
            ResourceKind::Event,
            "primary",
        ))
        .unwrap();

    let list = server
        .mock("GET", "/calendars/primary/events")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(events_page(
            json!([{
                "id": "g-master_20260805",
                "status": "cancelled",
                "recurringEventId": "g-master",
                "originalStartTime": {"dateTime": "2026-08-05T09:00:00Z"},
                "updated": NEW_TS,
            }]),
            Some("tok-1"),
        ))
        .create_async()
        .await;

    let stats = pull::pull_events(&harness.cx(), false).await.unwrap();
    list.assert_async().await;
    assert_eq!(stats.pulled, 1);

    // The master is untouched; a concrete deleted-instance record exists.
    let master_back = harness.db.get_event(&master.id).unwrap().unwrap();
    assert!(master_back.deleted_at.is_none());

    let instance = harness
        .db
        .find_event_by_google_id("g-master_20260805")
        .unwrap()
        .unwrap();
    assert_eq!(instance.master_id.as_deref(), Some(master.id.as_str()));
    assert_eq!(
        instance.original_start_at.as_deref(),
        Some("2026-08-05T09:00:00Z")
    );
    assert!(instance.deleted_at.is_some());
    assert!(!instance.is_unsynced);
}

#[tokio::test]
async fn test_secondary_remote_id_lookup_covers_missing_link() {
    let mut server = mockito::Server::new_async().await;
    let harness = Harness::new(&server);

    // Record carries the remote id but the Link write was lost.
    let mut ev = EventRecord::new("local title");
    ev.google_event_id = Some("g-1".to_string());
    ev.updated_at = OLD_TS.to_string();
    ev.is_unsynced = false;
    harness.db.insert_event(&ev).unwrap();

    let list = server
        .mock("GET", "/calendars/primary/events")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(events_page(
            json!([remote_event("g-1", "recovered", NEW_TS)]),
            Some("tok-1"),
        ))
        .create_async()
        .await;

    let stats = pull::pull_events(&harness.cx(), false).await.unwrap();
    list.assert_async().await;
    assert_eq!(stats.pulled, 1);

    // No duplicate record; the Link was repaired.
    let back = harness.db.get_event(&ev.id).unwrap().unwrap();
    assert_eq!(back.title, "recovered");
    assert_eq!(harness.db.count_links().unwrap(), 1);
}

#[tokio::test]
async fn test_pull_tasks_applies_deletion_and_completion() {
    let mut server = mockito::Server::new_async().await;
    let harness = Harness::new(&server);

    let mut doomed = TaskRecord::new("doomed");
    doomed.google_task_id = Some("t-1".to_string());
    doomed.updated_at = OLD_TS.to_string();
    doomed.is_unsynced = false;
    harness.db.insert_task(&doomed).unwrap();
    harness
        .db
        .upsert_link(&Link::new(
            &doomed.id,
            EntityKind::Task,
            "t-1",
            ResourceKind::Task,
            "list-1",
        ))
        .unwrap();

    let mut finished = TaskRecord::new("finished");
    finished.google_task_id = Some("t-2".to_string());
    finished.updated_at = OLD_TS.to_string();
    finished.is_unsynced = false;
    harness.db.insert_task(&finished).unwrap();
    harness
        .db
        .upsert_link(&Link::new(
            &finished.id,
            EntityKind::Task,
            "t-2",
            ResourceKind::Task,
            "list-1",
        ))
        .unwrap();

    let list = server
        .mock("GET", "/lists/list-1/tasks")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(
            json!({
                "items": [
                    {"id": "t-1", "title": "doomed", "status": "needsAction",
                     "deleted": true, "updated": NEW_TS},
                    {"id": "t-2", "title": "finished", "status": "completed",
                     "completed": NEW_TS, "hidden": true, "updated": NEW_TS},
                ]
            })
            .to_string(),
        )
        .expect(1)
        .create_async()
        .await;

    let stats = pull::pull_tasks(&harness.cx(), false).await.unwrap();
    list.assert_async().await;
    assert_eq!(stats.pulled, 2);

    let doomed_back = harness.db.get_task(&doomed.id).unwrap().unwrap();
    assert!(doomed_back.deleted_at.is_some());
    assert!(harness
        .db
        .get_link(&doomed.id, ResourceKind::Task, EntityKind::Task)
        .unwrap()
        .is_none());

    let finished_back = harness.db.get_task(&finished.id).unwrap().unwrap();
    assert_eq!(finished_back.completed_at.as_deref(), Some(NEW_TS));
    assert!(!finished_back.is_unsynced);

    let cursor = harness
        .db
        .get_cursor("tester", ResourceKind::Task, "list-1")
        .unwrap()
        .unwrap();
    assert!(cursor.last_pulled_at.is_some());
}

#[tokio::test]
async fn test_pull_tasks_creates_new_local_task() {
    let mut server = mockito::Server::new_async().await;
    let harness = Harness::new(&server);

    let list = server
        .mock("GET", "/lists/list-1/tasks")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(
            json!({
                "items": [
                    {"id": "t-9", "title": "from phone", "status": "needsAction",
                     "due": "2026-08-09T00:00:00.000Z", "updated": NEW_TS},
                ]
            })
            .to_string(),
        )
        .create_async()
        .await;

    let stats = pull::pull_tasks(&harness.cx(), false).await.unwrap();
    list.assert_async().await;
    assert_eq!(stats.pulled, 1);

    let task = harness.db.find_task_by_google_id("t-9").unwrap().unwrap();
    assert_eq!(task.title, "from phone");
    assert_eq!(task.due_at.as_deref(), Some("2026-08-09T00:00:00.000Z"));
    assert_eq!(task.list_id.as_deref(), Some("list-1"));
    assert!(!task.is_unsynced);
    assert!(harness
        .db
        .find_link_by_google_id("t-9", ResourceKind::Task)
        .unwrap()
        .is_some());
}
