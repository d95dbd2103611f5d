//! Pull pipeline: apply remote deltas to the local store.
//!
//! Per scope (calendar or task list): fetch since the stored cursor; if the
//! provider reports the cursor invalid, clear it and refetch a bounded
//! lookback window. Events are split into masters and instances and the
//! masters are applied first, so exception records can resolve their
//! parent's local id through the Link Store.
//!
//! Per incoming record, in order: anti-resurrection check, remote-deleted
//! handling, conflict resolution (remote wins / local wins / tie-heal), and
//! the double-creation guard before a local create.

use chrono::{Duration, Utc};

use super::codec;
use super::conflict;
use super::cursor_store::Cursor;
use super::error::{FailureClass, SyncError};
use super::link_store::Link;
use super::notify::{Notification, Severity};
use super::{PhaseStats, SyncContext};
use crate::google::client::EventsQuery;
use crate::google::wire::{GoogleEvent, GoogleTask};
use crate::model::{EntityKind, EventRecord, EventStatus, ItemRecord, ResourceKind, TaskRecord};

fn overwritten_notification(title: &str) -> Notification {
    Notification {
        severity: Severity::Info,
        title: "Local edit overwritten".to_string(),
        message: format!("\"{title}\" had a pending local edit that was replaced by a newer remote version."),
        action: None,
    }
}

fn remote_deleted_at(updated: &str) -> String {
    if updated.is_empty() {
        Utc::now().to_rfc3339()
    } else {
        updated.to_string()
    }
}

fn lookback_start(cx: &SyncContext<'_>, full_resync: bool) -> String {
    let days = if full_resync {
        cx.settings.full_resync_lookback_days
    } else {
        cx.settings.pull_lookback_days
    };
    (Utc::now() - Duration::days(days)).to_rfc3339()
}

// === Events ===

/// Pull one calendar's deltas and apply them locally.
async fn pull_events_scope(
    cx: &SyncContext<'_>,
    scope: &str,
    full_resync: bool,
    stats: &mut PhaseStats,
) -> Result<(), SyncError> {
    let fetch_started_at = Utc::now().to_rfc3339();
    let cursor = cx.db.get_cursor(&cx.user_id, ResourceKind::Event, scope)?;

    // A full resync deliberately ignores the incremental token.
    let mut sync_token = if full_resync {
        None
    } else {
        cursor.and_then(|c| c.sync_token)
    };

    let mut records: Vec<GoogleEvent> = Vec::new();
    let mut next_sync_token: Option<String> = None;
    let mut page_token: Option<String> = None;

    loop {
        let query = EventsQuery {
            sync_token: sync_token.clone(),
            page_token: page_token.clone(),
            updated_min: if sync_token.is_none() {
                Some(lookback_start(cx, full_resync))
            } else {
                None
            },
        };

        match cx.client.list_events_page(scope, &query).await {
            Ok(page) => {
                records.extend(page.items);
                if page.next_sync_token.is_some() {
                    next_sync_token = page.next_sync_token;
                }
                match page.next_page_token {
                    Some(t) => page_token = Some(t),
                    None => break,
                }
            }
            Err(e) if sync_token.is_some() && e.is_sync_token_invalid() => {
                // Expired token: fall back to a bounded full refetch.
                tracing::info!(scope, "sync token expired, refetching window");
                cx.db.clear_cursor(&cx.user_id, ResourceKind::Event, scope)?;
                sync_token = None;
                page_token = None;
                next_sync_token = None;
                records.clear();
            }
            Err(e) => return Err(e.into()),
        }
    }

    // Two-pass: masters first so exceptions can resolve their parent.
    let (instances, masters): (Vec<_>, Vec<_>) =
        records.into_iter().partition(GoogleEvent::is_instance);

    for g in masters.iter().chain(instances.iter()) {
        match apply_remote_event_record(cx, scope, g) {
            Ok(true) => stats.pulled += 1,
            Ok(false) => stats.skipped += 1,
            Err(e) => match e.class() {
                FailureClass::CredentialUnavailable | FailureClass::RateLimited => return Err(e),
                _ => {
                    stats.failed += 1;
                    tracing::warn!(remote_id = %g.id, error = %e, "failed to apply remote event");
                }
            },
        }
    }

    cx.db.save_cursor(&Cursor {
        user_id: cx.user_id.clone(),
        resource: ResourceKind::Event,
        scope_id: scope.to_string(),
        sync_token: next_sync_token,
        last_pulled_at: Some(fetch_started_at),
    })?;
    Ok(())
}

/// Apply one remote event. Returns `Ok(false)` when the record was
/// deliberately skipped.
fn apply_remote_event_record(
    cx: &SyncContext<'_>,
    scope: &str,
    g: &GoogleEvent,
) -> Result<bool, SyncError> {
    if g.id.is_empty() {
        return Ok(false);
    }

    // Locate the local counterpart: by Link first, then by the remote id
    // stored on the record itself (covers a missing/failed Link write).
    if let Some(link) = cx.db.find_link_by_google_id(&g.id, ResourceKind::Event)? {
        if link.local_type == EntityKind::Item {
            if let Some(item) = cx.db.get_item(&link.local_id)? {
                return apply_event_to_existing_item(cx, scope, item, g);
            }
        } else if let Some(ev) = cx.db.get_event(&link.local_id)? {
            return apply_to_existing_event(cx, scope, ev, g, true);
        }
        // Dangling Link without a record; drop it and fall through to the
        // creation path.
        cx.db
            .delete_link(&link.local_id, ResourceKind::Event, link.local_type)?;
    }
    if let Some(ev) = cx.db.find_event_by_google_id(&g.id)? {
        return apply_to_existing_event(cx, scope, ev, g, false);
    }
    if let Some(item) = cx.db.find_item_by_google_event_id(&g.id)? {
        return apply_event_to_existing_item(cx, scope, item, g);
    }

    // No local counterpart.
    if g.is_cancelled() {
        let Some(master_remote_id) = g.recurring_event_id.as_deref() else {
            // Deletion of something never seen locally.
            return Ok(false);
        };
        // Materialize the cancelled occurrence as a concrete deleted
        // instance rather than touching the master.
        let Some(master_link) = cx
            .db
            .find_link_by_google_id(master_remote_id, ResourceKind::Event)?
        else {
            return Ok(false);
        };
        if cx.db.find_event_by_google_id(&g.id)?.is_some() {
            return Ok(false);
        }
        let mut ev = codec::event_from_remote(g, scope, Some(master_link.local_id.clone()));
        ev.status = EventStatus::Cancelled;
        ev.deleted_at = Some(remote_deleted_at(&g.updated));
        ev.is_unsynced = false;
        cx.db.insert_event(&ev)?;
        link_event(cx, scope, &ev.id, g)?;
        return Ok(true);
    }

    // Live create. An exception whose master is unknown cannot resolve its
    // parent reference and is picked up by a later cycle.
    let master_local_id = match g.recurring_event_id.as_deref() {
        Some(master_remote_id) => {
            match cx
                .db
                .find_link_by_google_id(master_remote_id, ResourceKind::Event)?
            {
                Some(master_link) => Some(master_link.local_id),
                None => return Ok(false),
            }
        }
        None => None,
    };

    // Guard against double-creation when a prior cycle created the record
    // but failed to persist the Link.
    if cx.db.find_event_by_google_id(&g.id)?.is_some() {
        return Ok(false);
    }

    let ev = codec::event_from_remote(g, scope, master_local_id);
    cx.db.insert_event(&ev)?;
    link_event(cx, scope, &ev.id, g)?;
    Ok(true)
}

fn link_event(cx: &SyncContext<'_>, scope: &str, local_id: &str, g: &GoogleEvent) -> Result<(), SyncError> {
    let mut link = Link::new(local_id, EntityKind::Event, &g.id, ResourceKind::Event, scope);
    link.remote_etag = g.etag.clone();
    link.remote_updated_at = (!g.updated.is_empty()).then(|| g.updated.clone());
    cx.db.upsert_link(&link)?;
    Ok(())
}

fn apply_to_existing_event(
    cx: &SyncContext<'_>,
    scope: &str,
    mut ev: EventRecord,
    g: &GoogleEvent,
    has_link: bool,
) -> Result<bool, SyncError> {
    // Anti-resurrection: a tombstoned record is never revived or modified
    // by a pull.
    if ev.is_tombstoned() {
        return Ok(false);
    }

    if g.is_cancelled() {
        if conflict::local_wins(&ev.updated_at, &g.updated) {
            // The local edit is newer: re-assert it on the next push.
            ev.is_unsynced = true;
            cx.db.update_event(&ev)?;
            return Ok(true);
        }
        ev.status = EventStatus::Cancelled;
        ev.deleted_at = Some(remote_deleted_at(&g.updated));
        ev.is_unsynced = false;
        cx.db.update_event(&ev)?;
        cx.db
            .delete_link(&ev.id, ResourceKind::Event, EntityKind::Event)?;
        return Ok(true);
    }

    if conflict::remote_wins(&ev.updated_at, &g.updated) {
        let was_dirty = ev.is_unsynced;
        let title = ev.title.clone();
        codec::apply_remote_event(&mut ev, g);
        cx.db.update_event(&ev)?;
        link_event(cx, scope, &ev.id, g)?;
        if was_dirty {
            cx.notifier.notify(overwritten_notification(&title));
        }
        return Ok(true);
    }

    if conflict::local_wins(&ev.updated_at, &g.updated) {
        if !ev.is_unsynced {
            ev.is_unsynced = true;
            cx.db.update_event(&ev)?;
        }
        if !has_link {
            link_event(cx, scope, &ev.id, g)?;
        }
        return Ok(true);
    }

    // Timestamps effectively equal: heal a lingering dirty flag so clock or
    // precision drift cannot cause an endless re-push loop.
    if ev.is_unsynced {
        ev.is_unsynced = false;
        if !g.updated.is_empty() {
            ev.updated_at = g.updated.clone();
        }
        cx.db.update_event(&ev)?;
    }
    if !has_link {
        link_event(cx, scope, &ev.id, g)?;
    }
    Ok(true)
}

fn apply_event_to_existing_item(
    cx: &SyncContext<'_>,
    scope: &str,
    mut item: ItemRecord,
    g: &GoogleEvent,
) -> Result<bool, SyncError> {
    if item.is_tombstoned() {
        return Ok(false);
    }

    if g.is_cancelled() {
        if conflict::local_wins(&item.updated_at, &g.updated) {
            item.is_unsynced = true;
            cx.db.update_item(&item)?;
            return Ok(true);
        }
        item.deleted_at = Some(remote_deleted_at(&g.updated));
        item.is_unsynced = false;
        cx.db.update_item(&item)?;
        cx.db
            .delete_link(&item.id, ResourceKind::Event, EntityKind::Item)?;
        return Ok(true);
    }

    if conflict::remote_wins(&item.updated_at, &g.updated) {
        let was_dirty = item.is_unsynced;
        let title = item.title.clone();
        codec::apply_remote_event_to_item(&mut item, g);
        cx.db.update_item(&item)?;
        let mut link = Link::new(&item.id, EntityKind::Item, &g.id, ResourceKind::Event, scope);
        link.remote_etag = g.etag.clone();
        link.remote_updated_at = (!g.updated.is_empty()).then(|| g.updated.clone());
        cx.db.upsert_link(&link)?;
        if was_dirty {
            cx.notifier.notify(overwritten_notification(&title));
        }
        return Ok(true);
    }

    if conflict::local_wins(&item.updated_at, &g.updated) {
        if !item.is_unsynced {
            item.is_unsynced = true;
            cx.db.update_item(&item)?;
        }
        return Ok(true);
    }

    if item.is_unsynced {
        item.is_unsynced = false;
        if !g.updated.is_empty() {
            item.updated_at = g.updated.clone();
        }
        cx.db.update_item(&item)?;
    }
    Ok(true)
}

pub async fn pull_events(
    cx: &SyncContext<'_>,
    full_resync: bool,
) -> Result<PhaseStats, SyncError> {
    let mut stats = PhaseStats::default();
    for scope in &cx.settings.calendar_ids {
        pull_events_scope(cx, scope, full_resync, &mut stats).await?;
    }
    Ok(stats)
}

// === Tasks ===

async fn pull_tasks_scope(
    cx: &SyncContext<'_>,
    scope: &str,
    full_resync: bool,
    stats: &mut PhaseStats,
) -> Result<(), SyncError> {
    let fetch_started_at = Utc::now().to_rfc3339();
    let cursor = cx.db.get_cursor(&cx.user_id, ResourceKind::Task, scope)?;

    let updated_min = if full_resync {
        lookback_start(cx, true)
    } else {
        cursor
            .and_then(|c| c.last_pulled_at)
            .unwrap_or_else(|| lookback_start(cx, false))
    };

    let records = cx
        .client
        .list_tasks_updated_since(scope, Some(&updated_min))
        .await?;

    for g in &records {
        match apply_remote_task_record(cx, scope, g) {
            Ok(true) => stats.pulled += 1,
            Ok(false) => stats.skipped += 1,
            Err(e) => match e.class() {
                FailureClass::CredentialUnavailable | FailureClass::RateLimited => return Err(e),
                _ => {
                    stats.failed += 1;
                    tracing::warn!(remote_id = %g.id, error = %e, "failed to apply remote task");
                }
            },
        }
    }

    cx.db.save_cursor(&Cursor {
        user_id: cx.user_id.clone(),
        resource: ResourceKind::Task,
        scope_id: scope.to_string(),
        sync_token: None,
        last_pulled_at: Some(fetch_started_at),
    })?;
    Ok(())
}

fn apply_remote_task_record(
    cx: &SyncContext<'_>,
    scope: &str,
    g: &GoogleTask,
) -> Result<bool, SyncError> {
    if g.id.is_empty() {
        return Ok(false);
    }

    if let Some(link) = cx.db.find_link_by_google_id(&g.id, ResourceKind::Task)? {
        if link.local_type == EntityKind::Item {
            if let Some(item) = cx.db.get_item(&link.local_id)? {
                return apply_task_to_existing_item(cx, scope, item, g);
            }
        } else if let Some(task) = cx.db.get_task(&link.local_id)? {
            return apply_to_existing_task(cx, scope, task, g, true);
        }
        cx.db
            .delete_link(&link.local_id, ResourceKind::Task, link.local_type)?;
    }
    if let Some(task) = cx.db.find_task_by_google_id(&g.id)? {
        return apply_to_existing_task(cx, scope, task, g, false);
    }
    if let Some(item) = cx.db.find_item_by_google_task_id(&g.id)? {
        return apply_task_to_existing_item(cx, scope, item, g);
    }

    if g.deleted {
        return Ok(false);
    }

    // Double-creation guard before the create+link pair.
    if cx.db.find_task_by_google_id(&g.id)?.is_some() {
        return Ok(false);
    }

    let task = codec::task_from_remote(g, scope);
    cx.db.insert_task(&task)?;
    link_task(cx, scope, &task.id, g)?;
    Ok(true)
}

fn link_task(cx: &SyncContext<'_>, scope: &str, local_id: &str, g: &GoogleTask) -> Result<(), SyncError> {
    let mut link = Link::new(local_id, EntityKind::Task, &g.id, ResourceKind::Task, scope);
    link.remote_etag = g.etag.clone();
    link.remote_updated_at = (!g.updated.is_empty()).then(|| g.updated.clone());
    cx.db.upsert_link(&link)?;
    Ok(())
}

fn apply_to_existing_task(
    cx: &SyncContext<'_>,
    scope: &str,
    mut task: TaskRecord,
    g: &GoogleTask,
    has_link: bool,
) -> Result<bool, SyncError> {
    if task.is_tombstoned() {
        return Ok(false);
    }

    if g.deleted {
        if conflict::local_wins(&task.updated_at, &g.updated) {
            task.is_unsynced = true;
            cx.db.update_task(&task)?;
            return Ok(true);
        }
        task.deleted_at = Some(remote_deleted_at(&g.updated));
        task.is_unsynced = false;
        cx.db.update_task(&task)?;
        cx.db
            .delete_link(&task.id, ResourceKind::Task, EntityKind::Task)?;
        return Ok(true);
    }

    if conflict::remote_wins(&task.updated_at, &g.updated) {
        let was_dirty = task.is_unsynced;
        let title = task.title.clone();
        codec::apply_remote_task(&mut task, g);
        cx.db.update_task(&task)?;
        link_task(cx, scope, &task.id, g)?;
        if was_dirty {
            cx.notifier.notify(overwritten_notification(&title));
        }
        return Ok(true);
    }

    if conflict::local_wins(&task.updated_at, &g.updated) {
        if !task.is_unsynced {
            task.is_unsynced = true;
            cx.db.update_task(&task)?;
        }
        if !has_link {
            link_task(cx, scope, &task.id, g)?;
        }
        return Ok(true);
    }

    if task.is_unsynced {
        task.is_unsynced = false;
        if !g.updated.is_empty() {
            task.updated_at = g.updated.clone();
        }
        cx.db.update_task(&task)?;
    }
    if !has_link {
        link_task(cx, scope, &task.id, g)?;
    }
    Ok(true)
}

fn apply_task_to_existing_item(
    cx: &SyncContext<'_>,
    scope: &str,
    mut item: ItemRecord,
    g: &GoogleTask,
) -> Result<bool, SyncError> {
    if item.is_tombstoned() {
        return Ok(false);
    }

    if g.deleted {
        if conflict::local_wins(&item.updated_at, &g.updated) {
            item.is_unsynced = true;
            cx.db.update_item(&item)?;
            return Ok(true);
        }
        item.deleted_at = Some(remote_deleted_at(&g.updated));
        item.is_unsynced = false;
        cx.db.update_item(&item)?;
        cx.db
            .delete_link(&item.id, ResourceKind::Task, EntityKind::Item)?;
        return Ok(true);
    }

    if conflict::remote_wins(&item.updated_at, &g.updated) {
        let was_dirty = item.is_unsynced;
        let title = item.title.clone();
        codec::apply_remote_task_to_item(&mut item, g);
        cx.db.update_item(&item)?;
        let mut link = Link::new(&item.id, EntityKind::Item, &g.id, ResourceKind::Task, scope);
        link.remote_etag = g.etag.clone();
        link.remote_updated_at = (!g.updated.is_empty()).then(|| g.updated.clone());
        cx.db.upsert_link(&link)?;
        if was_dirty {
            cx.notifier.notify(overwritten_notification(&title));
        }
        return Ok(true);
    }

    if conflict::local_wins(&item.updated_at, &g.updated) {
        if !item.is_unsynced {
            item.is_unsynced = true;
            cx.db.update_item(&item)?;
        }
        return Ok(true);
    }

    if item.is_unsynced {
        item.is_unsynced = false;
        if !g.updated.is_empty() {
            item.updated_at = g.updated.clone();
        }
        cx.db.update_item(&item)?;
    }
    Ok(true)
}

pub async fn pull_tasks(
    cx: &SyncContext<'_>,
    full_resync: bool,
) -> Result<PhaseStats, SyncError> {
    let mut stats = PhaseStats::default();
    for scope in &cx.settings.task_list_ids {
        pull_tasks_scope(cx, scope, full_resync, &mut stats).await?;
    }
    Ok(stats)
}
