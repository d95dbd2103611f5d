//! Push pipeline: reconcile dirty local entities against the remote side.
//!
//! For each dirty entity (bounded per cycle, masters before exceptions,
//! needs-initial-create first, newest first):
//!
//! 1. Tombstoned: best-effort remote delete (404/410 tolerated), drop the
//!    Link, clear the dirty flag.
//! 2. Linked: `patch`; on 404/410 fall back to `create` (remote vanished,
//!    recreate and re-link); on 400 retry once with a minimal payload.
//! 3. Unlinked: `create`; on 400 retry once with a minimal payload.
//! 4. Success: upsert the Link to the (possibly new) remote id, delete any
//!    stale Link rows for the entity, clear the dirty flag, and adopt the
//!    provider's `updated` timestamp.
//! 5. Failure: rate limits annotate the Link then abort the cycle; a 400
//!    that survives the minimal retry pauses the record and notifies the
//!    user; anything else increments the Link's retry counter.

use chrono::Utc;
use serde_json::Value;

use super::codec;
use super::error::{FailureClass, SyncError};
use super::link_store::{Link, MAX_LINK_RETRIES};
use super::notify::{Notification, NotificationAction, Severity};
use super::{PhaseStats, SyncContext};
use crate::google::wire::{GoogleEvent, GoogleTask};
use crate::model::{EntityKind, EventRecord, ItemRecord, ItemTarget, ResourceKind, TaskRecord};

/// Outcome of pushing one entity.
enum PushOutcome {
    Pushed,
    Deleted,
    /// Permanently malformed record: dirty flag cleared, user notified.
    Paused,
    /// Not attempted this cycle (retry-gated, or waiting on its master).
    Skipped,
}

fn pause_notification(kind: EntityKind, local_id: &str, title: &str) -> Notification {
    Notification {
        severity: Severity::Warning,
        title: "Sync paused — needs attention".to_string(),
        message: format!("\"{title}\" was rejected by Google and won't be retried automatically."),
        action: Some(NotificationAction::RetryEntity {
            kind,
            local_id: local_id.to_string(),
        }),
    }
}

fn hard_failure_notification(kind: EntityKind, local_id: &str, title: &str) -> Notification {
    Notification {
        severity: Severity::Error,
        title: "Sync failed repeatedly".to_string(),
        message: format!("\"{title}\" failed {MAX_LINK_RETRIES} times and is paused until retried manually."),
        action: Some(NotificationAction::RetryEntity {
            kind,
            local_id: local_id.to_string(),
        }),
    }
}

/// Record a per-entity failure: annotate the Link's retry state, notify on
/// the terminal attempt, and decide whether the cycle must abort.
fn note_failure(
    cx: &SyncContext<'_>,
    kind: EntityKind,
    resource: ResourceKind,
    local_id: &str,
    title: &str,
    err: &SyncError,
) -> Result<bool, SyncError> {
    match err.class() {
        // Missing credential is a cycle condition, not this entity's fault.
        FailureClass::CredentialUnavailable => Ok(true),
        // Rate limits annotate the Link before aborting, without counting
        // toward the permanent-failure cap.
        FailureClass::RateLimited => {
            cx.db
                .defer_link_retry(local_id, resource, kind, &err.to_string())?;
            Ok(true)
        }
        _ => {
            let count = cx
                .db
                .record_link_failure(local_id, resource, kind, &err.to_string())?;
            if count == Some(MAX_LINK_RETRIES) {
                cx.notifier
                    .notify(hard_failure_notification(kind, local_id, title));
            }
            Ok(false)
        }
    }
}

// === Events ===

async fn create_event_with_retry(
    cx: &SyncContext<'_>,
    calendar_id: &str,
    full: &Value,
    minimal: &Value,
) -> Result<Option<GoogleEvent>, SyncError> {
    match cx.client.create_event(calendar_id, full).await {
        Ok(remote) => Ok(Some(remote)),
        Err(e) if e.is_bad_request() => {
            match cx.client.create_event(calendar_id, minimal).await {
                Ok(remote) => Ok(Some(remote)),
                Err(e2) if e2.is_bad_request() => Ok(None),
                Err(e2) => Err(e2.into()),
            }
        }
        Err(e) => Err(e.into()),
    }
}

async fn reconcile_event(
    cx: &SyncContext<'_>,
    calendar_id: &str,
    link: Option<&Link>,
    full: &Value,
    minimal: &Value,
) -> Result<Option<GoogleEvent>, SyncError> {
    let Some(link) = link else {
        return create_event_with_retry(cx, calendar_id, full, minimal).await;
    };

    match cx.client.patch_event(calendar_id, &link.google_id, full).await {
        Ok(remote) => Ok(Some(remote)),
        // The remote resource vanished: recreate and re-link.
        Err(e) if e.is_not_found() => create_event_with_retry(cx, calendar_id, full, minimal).await,
        Err(e) if e.is_bad_request() => {
            match cx.client.patch_event(calendar_id, &link.google_id, minimal).await {
                Ok(remote) => Ok(Some(remote)),
                Err(e2) if e2.is_bad_request() => Ok(None),
                Err(e2) => Err(e2.into()),
            }
        }
        Err(e) => Err(e.into()),
    }
}

async fn delete_remote_event(
    cx: &SyncContext<'_>,
    calendar_id: &str,
    event_id: &str,
) -> Result<(), SyncError> {
    match cx.client.delete_event(calendar_id, event_id).await {
        Ok(()) => Ok(()),
        // Already gone remotely.
        Err(e) if e.is_not_found() => Ok(()),
        Err(e) => Err(e.into()),
    }
}

async fn push_one_event(
    cx: &SyncContext<'_>,
    ev: &EventRecord,
    link: Option<&Link>,
) -> Result<PushOutcome, SyncError> {
    if ev.is_tombstoned() {
        if let Some(link) = link {
            delete_remote_event(cx, &link.scope_id, &link.google_id).await?;
            cx.db
                .delete_link(&ev.id, ResourceKind::Event, EntityKind::Event)?;
        }
        let mut ev = ev.clone();
        ev.is_unsynced = false;
        cx.db.update_event(&ev)?;
        return Ok(PushOutcome::Deleted);
    }

    // Exceptions need their master's remote id; masters are ordered first,
    // so a miss means the master's own push failed this cycle.
    let master_google_id = match ev.master_id.as_deref() {
        Some(master_id) => {
            match cx
                .db
                .get_link(master_id, ResourceKind::Event, EntityKind::Event)?
            {
                Some(master_link) => Some(master_link.google_id),
                None => return Ok(PushOutcome::Skipped),
            }
        }
        None => None,
    };

    let calendar_id = link
        .map(|l| l.scope_id.clone())
        .or_else(|| ev.calendar_id.clone())
        .or_else(|| cx.settings.calendar_ids.first().cloned())
        .unwrap_or_else(|| "primary".to_string());

    let full = codec::event_payload(ev, master_google_id.as_deref());
    let minimal = codec::minimal_event_payload(ev);

    let Some(remote) = reconcile_event(cx, &calendar_id, link, &full, &minimal).await? else {
        // Locally malformed record: stop retrying automatically.
        let mut ev = ev.clone();
        ev.is_unsynced = false;
        cx.db.update_event(&ev)?;
        cx.notifier
            .notify(pause_notification(EntityKind::Event, &ev.id, &ev.title));
        return Ok(PushOutcome::Paused);
    };

    let mut updated = ev.clone();
    updated.google_event_id = Some(remote.id.clone());
    updated.calendar_id = Some(calendar_id.clone());
    if !remote.updated.is_empty() {
        updated.updated_at = remote.updated.clone();
    }
    updated.is_unsynced = false;
    cx.db.update_event(&updated)?;

    cx.db
        .delete_stale_links(&ev.id, ResourceKind::Event, &remote.id)?;
    let mut new_link = Link::new(
        &ev.id,
        EntityKind::Event,
        &remote.id,
        ResourceKind::Event,
        &calendar_id,
    );
    new_link.remote_etag = remote.etag.clone();
    new_link.remote_updated_at = (!remote.updated.is_empty()).then(|| remote.updated.clone());
    cx.db.upsert_link(&new_link)?;

    Ok(PushOutcome::Pushed)
}

/// Push dirty local events, masters before exceptions, unlinked first,
/// newest first, bounded by the configured batch size.
pub async fn push_events(cx: &SyncContext<'_>) -> Result<PhaseStats, SyncError> {
    let mut stats = PhaseStats::default();
    let now = Utc::now();

    let mut entries = Vec::new();
    for ev in cx.db.list_dirty_events()? {
        let link = cx
            .db
            .get_link(&ev.id, ResourceKind::Event, EntityKind::Event)?;
        entries.push((ev, link));
    }
    // Stable sort keeps the newest-first order within each group.
    entries.sort_by_key(|(ev, link)| (ev.master_id.is_some(), link.is_some()));
    entries.truncate(cx.settings.push_batch_events);

    for (ev, link) in entries {
        if link.as_ref().is_some_and(|l| l.is_retry_gated(now)) {
            stats.skipped += 1;
            continue;
        }
        match push_one_event(cx, &ev, link.as_ref()).await {
            Ok(PushOutcome::Pushed) => stats.pushed += 1,
            Ok(PushOutcome::Deleted) => stats.deleted += 1,
            Ok(PushOutcome::Paused) => stats.paused += 1,
            Ok(PushOutcome::Skipped) => stats.skipped += 1,
            Err(e) => {
                stats.failed += 1;
                if note_failure(cx, EntityKind::Event, ResourceKind::Event, &ev.id, &ev.title, &e)? {
                    return Err(e);
                }
                tracing::warn!(event = %ev.id, error = %e, "event push failed");
            }
        }
    }
    Ok(stats)
}

// === Tasks ===

async fn create_task_with_retry(
    cx: &SyncContext<'_>,
    list_id: &str,
    full: &Value,
    minimal: &Value,
) -> Result<Option<GoogleTask>, SyncError> {
    match cx.client.create_task(list_id, full).await {
        Ok(remote) => Ok(Some(remote)),
        Err(e) if e.is_bad_request() => match cx.client.create_task(list_id, minimal).await {
            Ok(remote) => Ok(Some(remote)),
            Err(e2) if e2.is_bad_request() => Ok(None),
            Err(e2) => Err(e2.into()),
        },
        Err(e) => Err(e.into()),
    }
}

async fn reconcile_task(
    cx: &SyncContext<'_>,
    list_id: &str,
    link: Option<&Link>,
    full: &Value,
    minimal: &Value,
) -> Result<Option<GoogleTask>, SyncError> {
    let Some(link) = link else {
        return create_task_with_retry(cx, list_id, full, minimal).await;
    };

    match cx.client.patch_task(list_id, &link.google_id, full).await {
        Ok(remote) => Ok(Some(remote)),
        Err(e) if e.is_not_found() => create_task_with_retry(cx, list_id, full, minimal).await,
        Err(e) if e.is_bad_request() => {
            match cx.client.patch_task(list_id, &link.google_id, minimal).await {
                Ok(remote) => Ok(Some(remote)),
                Err(e2) if e2.is_bad_request() => Ok(None),
                Err(e2) => Err(e2.into()),
            }
        }
        Err(e) => Err(e.into()),
    }
}

async fn delete_remote_task(
    cx: &SyncContext<'_>,
    list_id: &str,
    task_id: &str,
) -> Result<(), SyncError> {
    match cx.client.delete_task(list_id, task_id).await {
        Ok(()) => Ok(()),
        Err(e) if e.is_not_found() => Ok(()),
        Err(e) => Err(e.into()),
    }
}

async fn push_one_task(
    cx: &SyncContext<'_>,
    task: &TaskRecord,
    link: Option<&Link>,
) -> Result<PushOutcome, SyncError> {
    if task.is_tombstoned() {
        if let Some(link) = link {
            delete_remote_task(cx, &link.scope_id, &link.google_id).await?;
            cx.db
                .delete_link(&task.id, ResourceKind::Task, EntityKind::Task)?;
        }
        let mut task = task.clone();
        task.is_unsynced = false;
        cx.db.update_task(&task)?;
        return Ok(PushOutcome::Deleted);
    }

    let list_id = link
        .map(|l| l.scope_id.clone())
        .or_else(|| task.list_id.clone())
        .or_else(|| cx.settings.task_list_ids.first().cloned())
        .unwrap_or_else(|| "@default".to_string());

    let full = codec::task_payload(task);
    let minimal = codec::minimal_task_payload(task);

    let Some(remote) = reconcile_task(cx, &list_id, link, &full, &minimal).await? else {
        let mut task = task.clone();
        task.is_unsynced = false;
        cx.db.update_task(&task)?;
        cx.notifier
            .notify(pause_notification(EntityKind::Task, &task.id, &task.title));
        return Ok(PushOutcome::Paused);
    };

    let mut updated = task.clone();
    updated.google_task_id = Some(remote.id.clone());
    updated.list_id = Some(list_id.clone());
    if !remote.updated.is_empty() {
        updated.updated_at = remote.updated.clone();
    }
    updated.is_unsynced = false;
    cx.db.update_task(&updated)?;

    cx.db
        .delete_stale_links(&task.id, ResourceKind::Task, &remote.id)?;
    let mut new_link = Link::new(
        &task.id,
        EntityKind::Task,
        &remote.id,
        ResourceKind::Task,
        &list_id,
    );
    new_link.remote_etag = remote.etag.clone();
    new_link.remote_updated_at = (!remote.updated.is_empty()).then(|| remote.updated.clone());
    cx.db.upsert_link(&new_link)?;

    Ok(PushOutcome::Pushed)
}

pub async fn push_tasks(cx: &SyncContext<'_>) -> Result<PhaseStats, SyncError> {
    let mut stats = PhaseStats::default();
    let now = Utc::now();

    let mut entries = Vec::new();
    for task in cx.db.list_dirty_tasks()? {
        let link = cx
            .db
            .get_link(&task.id, ResourceKind::Task, EntityKind::Task)?;
        entries.push((task, link));
    }
    entries.sort_by_key(|(_, link)| link.is_some());
    entries.truncate(cx.settings.push_batch_tasks);

    for (task, link) in entries {
        if link.as_ref().is_some_and(|l| l.is_retry_gated(now)) {
            stats.skipped += 1;
            continue;
        }
        match push_one_task(cx, &task, link.as_ref()).await {
            Ok(PushOutcome::Pushed) => stats.pushed += 1,
            Ok(PushOutcome::Deleted) => stats.deleted += 1,
            Ok(PushOutcome::Paused) => stats.paused += 1,
            Ok(PushOutcome::Skipped) => stats.skipped += 1,
            Err(e) => {
                stats.failed += 1;
                if note_failure(cx, EntityKind::Task, ResourceKind::Task, &task.id, &task.title, &e)? {
                    return Err(e);
                }
                tracing::warn!(task = %task.id, error = %e, "task push failed");
            }
        }
    }
    Ok(stats)
}

// === Items ===

/// Delete an item's remote counterpart (and Link) for one resource family,
/// tolerating already-gone resources.
async fn unlink_item_resource(
    cx: &SyncContext<'_>,
    item: &mut ItemRecord,
    resource: ResourceKind,
) -> Result<(), SyncError> {
    let Some(link) = cx.db.get_link(&item.id, resource, EntityKind::Item)? else {
        return Ok(());
    };
    match resource {
        ResourceKind::Event => {
            delete_remote_event(cx, &link.scope_id, &link.google_id).await?;
            item.google_event_id = None;
        }
        ResourceKind::Task => {
            delete_remote_task(cx, &link.scope_id, &link.google_id).await?;
            item.google_task_id = None;
        }
    }
    cx.db.delete_link(&item.id, resource, EntityKind::Item)?;
    Ok(())
}

async fn push_one_item(
    cx: &SyncContext<'_>,
    item: &ItemRecord,
    link: Option<&Link>,
) -> Result<PushOutcome, SyncError> {
    let mut item = item.clone();

    // Tombstoned: nothing should remain remotely.
    if item.is_tombstoned() {
        unlink_item_resource(cx, &mut item, ResourceKind::Event).await?;
        unlink_item_resource(cx, &mut item, ResourceKind::Task).await?;
        item.is_unsynced = false;
        cx.db.update_item(&item)?;
        return Ok(PushOutcome::Deleted);
    }

    // Unscheduled: an item without a target keeps no remote counterpart.
    let Some(target) = item.target else {
        unlink_item_resource(cx, &mut item, ResourceKind::Event).await?;
        unlink_item_resource(cx, &mut item, ResourceKind::Task).await?;
        item.is_unsynced = false;
        cx.db.update_item(&item)?;
        return Ok(PushOutcome::Pushed);
    };

    // Target changed since the last sync: remove the stale counterpart
    // before pushing the new one.
    match target {
        ItemTarget::Event => unlink_item_resource(cx, &mut item, ResourceKind::Task).await?,
        ItemTarget::Task => unlink_item_resource(cx, &mut item, ResourceKind::Event).await?,
    }

    match target {
        ItemTarget::Event => {
            let calendar_id = link
                .filter(|l| l.resource == ResourceKind::Event)
                .map(|l| l.scope_id.clone())
                .or_else(|| cx.settings.calendar_ids.first().cloned())
                .unwrap_or_else(|| "primary".to_string());
            let full = codec::item_event_payload(&item);
            let minimal = codec::minimal_item_event_payload(&item);
            let link = link.filter(|l| l.resource == ResourceKind::Event);

            let Some(remote) = reconcile_event(cx, &calendar_id, link, &full, &minimal).await?
            else {
                item.is_unsynced = false;
                cx.db.update_item(&item)?;
                cx.notifier
                    .notify(pause_notification(EntityKind::Item, &item.id, &item.title));
                return Ok(PushOutcome::Paused);
            };

            item.google_event_id = Some(remote.id.clone());
            if !remote.updated.is_empty() {
                item.updated_at = remote.updated.clone();
            }
            item.is_unsynced = false;
            cx.db.update_item(&item)?;

            cx.db
                .delete_stale_links(&item.id, ResourceKind::Event, &remote.id)?;
            let mut new_link = Link::new(
                &item.id,
                EntityKind::Item,
                &remote.id,
                ResourceKind::Event,
                &calendar_id,
            );
            new_link.remote_etag = remote.etag.clone();
            new_link.remote_updated_at =
                (!remote.updated.is_empty()).then(|| remote.updated.clone());
            cx.db.upsert_link(&new_link)?;
        }
        ItemTarget::Task => {
            let list_id = link
                .filter(|l| l.resource == ResourceKind::Task)
                .map(|l| l.scope_id.clone())
                .or_else(|| cx.settings.task_list_ids.first().cloned())
                .unwrap_or_else(|| "@default".to_string());
            let full = codec::item_task_payload(&item);
            let minimal = codec::minimal_item_task_payload(&item);
            let link = link.filter(|l| l.resource == ResourceKind::Task);

            let Some(remote) = reconcile_task(cx, &list_id, link, &full, &minimal).await? else {
                item.is_unsynced = false;
                cx.db.update_item(&item)?;
                cx.notifier
                    .notify(pause_notification(EntityKind::Item, &item.id, &item.title));
                return Ok(PushOutcome::Paused);
            };

            item.google_task_id = Some(remote.id.clone());
            if !remote.updated.is_empty() {
                item.updated_at = remote.updated.clone();
            }
            item.is_unsynced = false;
            cx.db.update_item(&item)?;

            cx.db
                .delete_stale_links(&item.id, ResourceKind::Task, &remote.id)?;
            let mut new_link = Link::new(
                &item.id,
                EntityKind::Item,
                &remote.id,
                ResourceKind::Task,
                &list_id,
            );
            new_link.remote_etag = remote.etag.clone();
            new_link.remote_updated_at =
                (!remote.updated.is_empty()).then(|| remote.updated.clone());
            cx.db.upsert_link(&new_link)?;
        }
    }

    Ok(PushOutcome::Pushed)
}

pub async fn push_items(cx: &SyncContext<'_>) -> Result<PhaseStats, SyncError> {
    let mut stats = PhaseStats::default();
    let now = Utc::now();

    let mut entries = Vec::new();
    for item in cx.db.list_dirty_items()? {
        let resource = item.target.map(|t| t.resource()).unwrap_or(ResourceKind::Event);
        let link = cx.db.get_link(&item.id, resource, EntityKind::Item)?;
        entries.push((item, link));
    }
    entries.sort_by_key(|(_, link)| link.is_some());
    entries.truncate(cx.settings.push_batch_items);

    for (item, link) in entries {
        if link.as_ref().is_some_and(|l| l.is_retry_gated(now)) {
            stats.skipped += 1;
            continue;
        }
        let resource = item.target.map(|t| t.resource()).unwrap_or(ResourceKind::Event);
        match push_one_item(cx, &item, link.as_ref()).await {
            Ok(PushOutcome::Pushed) => stats.pushed += 1,
            Ok(PushOutcome::Deleted) => stats.deleted += 1,
            Ok(PushOutcome::Paused) => stats.paused += 1,
            Ok(PushOutcome::Skipped) => stats.skipped += 1,
            Err(e) => {
                stats.failed += 1;
                if note_failure(cx, EntityKind::Item, resource, &item.id, &item.title, &e)? {
                    return Err(e);
                }
                tracing::warn!(item = %item.id, error = %e, "item push failed");
            }
        }
    }
    Ok(stats)
}
