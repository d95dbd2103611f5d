//! Push pipeline scenarios against a mocked Google API.

mod common;

use chrono::Utc;
use common::Harness;
use serde_json::json;

use daybook_core::model::{EntityKind, EventRecord, ItemRecord, ItemTarget, ResourceKind, TaskRecord};
use daybook_core::sync::{push, Link, SyncError, MAX_LINK_RETRIES, MAX_RETRIES_ERROR};

fn remote_event_body(id: &str, summary: &str, updated: &str) -> String {
    json!({
        "id": id,
        "status": "confirmed",
        "summary": summary,
        "etag": "\"etag-1\"",
        "updated": updated,
    })
    .to_string()
}

fn dirty_event(harness: &Harness, title: &str) -> EventRecord {
    let mut ev = EventRecord::new(title);
    ev.start_at = Some("2026-08-03T09:00:00+00:00".to_string());
    ev.end_at = Some("2026-08-03T10:00:00+00:00".to_string());
    harness.db.insert_event(&ev).unwrap();
    ev
}

#[tokio::test]
async fn test_new_event_creates_once_and_links() {
    let mut server = mockito::Server::new_async().await;
    let harness = Harness::new(&server);
    let ev = dirty_event(&harness, "standup");

    let create = server
        .mock("POST", "/calendars/primary/events")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(remote_event_body("g-1", "standup", "2026-08-03T12:00:00.000Z"))
        .expect(1)
        .create_async()
        .await;

    let stats = push::push_events(&harness.cx()).await.unwrap();
    create.assert_async().await;

    assert_eq!(stats.pushed, 1);
    let link = harness
        .db
        .get_link(&ev.id, ResourceKind::Event, EntityKind::Event)
        .unwrap()
        .unwrap();
    assert_eq!(link.google_id, "g-1");
    assert_eq!(link.scope_id, "primary");

    let back = harness.db.get_event(&ev.id).unwrap().unwrap();
    assert!(!back.is_unsynced);
    // The provider becomes the timestamp authority for this write.
    assert_eq!(back.updated_at, "2026-08-03T12:00:00.000Z");
    assert_eq!(back.google_event_id.as_deref(), Some("g-1"));
}

#[tokio::test]
async fn test_patch_404_falls_back_to_create_and_relinks() {
    let mut server = mockito::Server::new_async().await;
    let harness = Harness::new(&server);
    let ev = dirty_event(&harness, "standup");
    harness
        .db
        .upsert_link(&Link::new(
            &ev.id,
            EntityKind::Event,
            "g-old",
            ResourceKind::Event,
            "primary",
        ))
        .unwrap();

    let patch = server
        .mock("PATCH", "/calendars/primary/events/g-old")
        .with_status(404)
        .with_body(json!({"error": {"code": 404, "message": "Not Found"}}).to_string())
        .expect(1)
        .create_async()
        .await;
    let create = server
        .mock("POST", "/calendars/primary/events")
        .with_status(200)
        .with_body(remote_event_body("g-new", "standup", "2026-08-03T12:00:00.000Z"))
        .expect(1)
        .create_async()
        .await;

    let stats = push::push_events(&harness.cx()).await.unwrap();
    patch.assert_async().await;
    create.assert_async().await;

    assert_eq!(stats.pushed, 1);
    let link = harness
        .db
        .get_link(&ev.id, ResourceKind::Event, EntityKind::Event)
        .unwrap()
        .unwrap();
    assert_eq!(link.google_id, "g-new");
    // The old remote id left no extra rows behind.
    assert_eq!(harness.db.count_links().unwrap(), 1);
}

#[tokio::test]
async fn test_400_retries_minimal_then_pauses() {
    let mut server = mockito::Server::new_async().await;
    let harness = Harness::new(&server);
    let ev = dirty_event(&harness, "standup");

    // Full payload and the minimal retry both rejected.
    let create = server
        .mock("POST", "/calendars/primary/events")
        .with_status(400)
        .with_body(json!({"error": {"code": 400, "message": "Bad Request"}}).to_string())
        .expect(2)
        .create_async()
        .await;

    let stats = push::push_events(&harness.cx()).await.unwrap();
    create.assert_async().await;

    assert_eq!(stats.paused, 1);
    // Dirty flag cleared: no automatic retry for a malformed record.
    let back = harness.db.get_event(&ev.id).unwrap().unwrap();
    assert!(!back.is_unsynced);
    assert!(harness
        .db
        .get_link(&ev.id, ResourceKind::Event, EntityKind::Event)
        .unwrap()
        .is_none());

    let notifications = harness.notifier.drain();
    assert_eq!(notifications.len(), 1);
    assert!(notifications[0].title.contains("needs attention"));
    assert!(notifications[0].action.is_some());
}

#[tokio::test]
async fn test_400_recovers_with_minimal_payload() {
    let mut server = mockito::Server::new_async().await;
    let harness = Harness::new(&server);
    let mut ev = dirty_event(&harness, "standup");
    ev.description = Some("weird field".to_string());
    harness.db.update_event(&ev).unwrap();

    // First create (with description) fails, minimal retry succeeds. The
    // body-specific mock is registered last so it takes precedence.
    let accept = server
        .mock("POST", "/calendars/primary/events")
        .with_status(200)
        .with_body(remote_event_body("g-1", "standup", "2026-08-03T12:00:00.000Z"))
        .expect(1)
        .create_async()
        .await;
    let reject = server
        .mock("POST", "/calendars/primary/events")
        .match_body(mockito::Matcher::Regex("weird field".to_string()))
        .with_status(400)
        .with_body(json!({"error": {"code": 400, "message": "Bad Request"}}).to_string())
        .expect(1)
        .create_async()
        .await;

    let stats = push::push_events(&harness.cx()).await.unwrap();
    reject.assert_async().await;
    accept.assert_async().await;
    assert_eq!(stats.pushed, 1);
}

#[tokio::test]
async fn test_tombstone_push_deletes_remote_and_link() {
    let mut server = mockito::Server::new_async().await;
    let harness = Harness::new(&server);
    let mut ev = dirty_event(&harness, "bygone");
    ev.deleted_at = Some(Utc::now().to_rfc3339());
    harness.db.update_event(&ev).unwrap();
    harness
        .db
        .upsert_link(&Link::new(
            &ev.id,
            EntityKind::Event,
            "g-1",
            ResourceKind::Event,
            "primary",
        ))
        .unwrap();

    // 410: the resource is already gone remotely, tolerated.
    let delete = server
        .mock("DELETE", "/calendars/primary/events/g-1")
        .with_status(410)
        .with_body(json!({"error": {"code": 410, "message": "Gone"}}).to_string())
        .expect(1)
        .create_async()
        .await;

    let stats = push::push_events(&harness.cx()).await.unwrap();
    delete.assert_async().await;

    assert_eq!(stats.deleted, 1);
    assert!(harness
        .db
        .get_link(&ev.id, ResourceKind::Event, EntityKind::Event)
        .unwrap()
        .is_none());
    let back = harness.db.get_event(&ev.id).unwrap().unwrap();
    assert!(!back.is_unsynced);
    assert!(back.deleted_at.is_some());
}

#[tokio::test]
async fn test_permanently_failed_link_is_skipped_without_network() {
    let mut server = mockito::Server::new_async().await;
    let harness = Harness::new(&server);
    let ev = dirty_event(&harness, "stuck");
    harness
        .db
        .upsert_link(&Link::new(
            &ev.id,
            EntityKind::Event,
            "g-1",
            ResourceKind::Event,
            "primary",
        ))
        .unwrap();
    for _ in 0..MAX_LINK_RETRIES {
        harness
            .db
            .record_link_failure(&ev.id, ResourceKind::Event, EntityKind::Event, "boom")
            .unwrap();
    }
    let link = harness
        .db
        .get_link(&ev.id, ResourceKind::Event, EntityKind::Event)
        .unwrap()
        .unwrap();
    assert_eq!(link.error.as_deref(), Some(MAX_RETRIES_ERROR));

    // No request of any kind is expected.
    let catch_all = server
        .mock("PATCH", mockito::Matcher::Any)
        .expect(0)
        .create_async()
        .await;
    let catch_all_post = server
        .mock("POST", mockito::Matcher::Any)
        .expect(0)
        .create_async()
        .await;

    let stats = push::push_events(&harness.cx()).await.unwrap();
    catch_all.assert_async().await;
    catch_all_post.assert_async().await;
    assert_eq!(stats.skipped, 1);
    assert_eq!(stats.pushed, 0);
}

#[tokio::test]
async fn test_rate_limit_aborts_and_annotates_link() {
    let mut server = mockito::Server::new_async().await;
    let harness = Harness::new(&server);
    let ev = dirty_event(&harness, "busy");
    harness
        .db
        .upsert_link(&Link::new(
            &ev.id,
            EntityKind::Event,
            "g-1",
            ResourceKind::Event,
            "primary",
        ))
        .unwrap();

    let patch = server
        .mock("PATCH", "/calendars/primary/events/g-1")
        .with_status(429)
        .with_body(json!({"error": {"code": 429, "message": "Too Many Requests"}}).to_string())
        .expect(1)
        .create_async()
        .await;

    let err = push::push_events(&harness.cx()).await.unwrap_err();
    patch.assert_async().await;
    assert!(matches!(err, SyncError::RateLimited));

    // The Link was annotated before the abort, without advancing the retry
    // count toward the permanent-failure cap.
    let link = harness
        .db
        .get_link(&ev.id, ResourceKind::Event, EntityKind::Event)
        .unwrap()
        .unwrap();
    assert_eq!(link.retry_count, 0);
    assert!(link.next_retry_at.is_some());
    assert!(link.error.is_some());
    assert_ne!(link.error.as_deref(), Some(MAX_RETRIES_ERROR));
}

#[tokio::test]
async fn test_new_task_creates_and_links() {
    let mut server = mockito::Server::new_async().await;
    let harness = Harness::new(&server);
    let mut task = TaskRecord::new("pay rent");
    task.due_at = Some("2026-08-05T00:00:00.000Z".to_string());
    harness.db.insert_task(&task).unwrap();

    let create = server
        .mock("POST", "/lists/list-1/tasks")
        .with_status(200)
        .with_body(
            json!({
                "id": "t-1",
                "title": "pay rent",
                "status": "needsAction",
                "updated": "2026-08-03T12:00:00.000Z",
            })
            .to_string(),
        )
        .expect(1)
        .create_async()
        .await;

    let stats = push::push_tasks(&harness.cx()).await.unwrap();
    create.assert_async().await;

    assert_eq!(stats.pushed, 1);
    let link = harness
        .db
        .get_link(&task.id, ResourceKind::Task, EntityKind::Task)
        .unwrap()
        .unwrap();
    assert_eq!(link.google_id, "t-1");
    assert_eq!(link.scope_id, "list-1");
    let back = harness.db.get_task(&task.id).unwrap().unwrap();
    assert!(!back.is_unsynced);
    assert_eq!(back.google_task_id.as_deref(), Some("t-1"));
}

#[tokio::test]
async fn test_item_target_switch_deletes_stale_remote_task() {
    let mut server = mockito::Server::new_async().await;
    let harness = Harness::new(&server);

    // Item previously synced as a task, now retargeted to the calendar.
    let mut item = ItemRecord::new("write report");
    item.target = Some(ItemTarget::Event);
    item.start_at = Some("2026-08-03T13:00:00+00:00".to_string());
    item.end_at = Some("2026-08-03T15:00:00+00:00".to_string());
    item.google_task_id = Some("t-old".to_string());
    harness.db.insert_item(&item).unwrap();
    harness
        .db
        .upsert_link(&Link::new(
            &item.id,
            EntityKind::Item,
            "t-old",
            ResourceKind::Task,
            "list-1",
        ))
        .unwrap();

    let delete_task = server
        .mock("DELETE", "/lists/list-1/tasks/t-old")
        .with_status(204)
        .expect(1)
        .create_async()
        .await;
    let create_event = server
        .mock("POST", "/calendars/primary/events")
        .with_status(200)
        .with_body(remote_event_body("g-item", "write report", "2026-08-03T13:05:00.000Z"))
        .expect(1)
        .create_async()
        .await;

    let stats = push::push_items(&harness.cx()).await.unwrap();
    delete_task.assert_async().await;
    create_event.assert_async().await;

    assert_eq!(stats.pushed, 1);
    assert!(harness
        .db
        .get_link(&item.id, ResourceKind::Task, EntityKind::Item)
        .unwrap()
        .is_none());
    let link = harness
        .db
        .get_link(&item.id, ResourceKind::Event, EntityKind::Item)
        .unwrap()
        .unwrap();
    assert_eq!(link.google_id, "g-item");

    let back = harness.db.get_item(&item.id).unwrap().unwrap();
    assert_eq!(back.google_task_id, None);
    assert_eq!(back.google_event_id.as_deref(), Some("g-item"));
    assert!(!back.is_unsynced);
}

#[tokio::test]
async fn test_exception_waits_for_unpushed_master() {
    let mut server = mockito::Server::new_async().await;
    let harness = Harness::new(&server);

    // A master that is not dirty and has no link (never pushed), plus a
    // dirty exception referencing it.
    let mut master = EventRecord::new("weekly");
    master.rrule = Some("RRULE:FREQ=WEEKLY".to_string());
    master.is_unsynced = false;
    harness.db.insert_event(&master).unwrap();

    let mut exception = dirty_event(&harness, "weekly (moved)");
    exception.master_id = Some(master.id.clone());
    exception.original_start_at = Some("2026-08-01T09:00:00+00:00".to_string());
    harness.db.update_event(&exception).unwrap();

    let catch_all = server
        .mock("POST", mockito::Matcher::Any)
        .expect(0)
        .create_async()
        .await;

    let stats = push::push_events(&harness.cx()).await.unwrap();
    catch_all.assert_async().await;
    assert_eq!(stats.skipped, 1);

    // The exception stays dirty for the next cycle.
    let back = harness.db.get_event(&exception.id).unwrap().unwrap();
    assert!(back.is_unsynced);
}
