//! Durable local↔remote identity links.
//!
//! A Link is the only object carrying cross-system identity. Uniqueness is
//! enforced twice at the storage layer: `(local_id, resource_type,
//! local_type)` keeps at most one live mapping per resource family, and
//! `(local_id, google_id)` can transiently conflict after a 404-triggered
//! recreation, which is resolved by deleting stale rows before inserting.
//!
//! Links also own per-resource retry state. A failed sync attempt never
//! deletes a Link; it only annotates `retry_count`/`next_retry_at`, and at
//! [`MAX_LINK_RETRIES`] the row is marked `max_retries_exceeded` and skipped
//! until manually cleared. Rate-limited attempts annotate the error and the
//! backoff gate without advancing the count: only per-entity failures count
//! toward the cap.

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, OptionalExtension};

use crate::error::DatabaseError;
use crate::model::{EntityKind, ResourceKind};
use crate::storage::Database;

/// Retries before a Link is marked permanently failed.
pub const MAX_LINK_RETRIES: u32 = 10;

/// Terminal error marker on a permanently failed Link.
pub const MAX_RETRIES_ERROR: &str = "max_retries_exceeded";

const RETRY_FLOOR_SECS: i64 = 60;
const RETRY_CEILING_SECS: i64 = 12 * 60 * 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub local_id: String,
    pub local_type: EntityKind,
    pub google_id: String,
    pub resource: ResourceKind,
    /// Calendar id or task-list id the remote resource lives in.
    pub scope_id: String,
    pub remote_etag: Option<String>,
    pub remote_updated_at: Option<String>,
    pub retry_count: u32,
    pub next_retry_at: Option<String>,
    pub error: Option<String>,
}

impl Link {
    pub fn new(
        local_id: impl Into<String>,
        local_type: EntityKind,
        google_id: impl Into<String>,
        resource: ResourceKind,
        scope_id: impl Into<String>,
    ) -> Self {
        Self {
            local_id: local_id.into(),
            local_type,
            google_id: google_id.into(),
            resource,
            scope_id: scope_id.into(),
            remote_etag: None,
            remote_updated_at: None,
            retry_count: 0,
            next_retry_at: None,
            error: None,
        }
    }

    /// Whether this Link should be skipped by the push pipeline right now:
    /// permanently failed, or inside its backoff window.
    pub fn is_retry_gated(&self, now: DateTime<Utc>) -> bool {
        if self.error.as_deref() == Some(MAX_RETRIES_ERROR) {
            return true;
        }
        match self.next_retry_at.as_deref() {
            Some(at) => match DateTime::parse_from_rfc3339(at) {
                Ok(at) => at.with_timezone(&Utc) > now,
                Err(_) => false,
            },
            None => false,
        }
    }
}

/// Exponential per-Link retry delay: floor 1 minute, ceiling 12 hours.
/// `retry_count` is the count after the failure being scheduled.
pub fn retry_delay(retry_count: u32) -> Duration {
    let exp = retry_count.saturating_sub(1).min(30);
    let secs = RETRY_FLOOR_SECS.saturating_mul(1i64 << exp);
    Duration::seconds(secs.min(RETRY_CEILING_SECS))
}

const LINK_COLUMNS: &str = "local_id, local_type, google_id, resource_type, scope_id, \
                            remote_etag, remote_updated_at, retry_count, next_retry_at, error";

fn row_to_link(row: &rusqlite::Row) -> Result<Link, rusqlite::Error> {
    let local_type_str: String = row.get(1)?;
    let resource_str: String = row.get(3)?;
    Ok(Link {
        local_id: row.get(0)?,
        local_type: EntityKind::parse(&local_type_str).unwrap_or(EntityKind::Item),
        google_id: row.get(2)?,
        resource: ResourceKind::parse(&resource_str).unwrap_or(ResourceKind::Event),
        scope_id: row.get(4)?,
        remote_etag: row.get(5)?,
        remote_updated_at: row.get(6)?,
        retry_count: row.get::<_, i64>(7)? as u32,
        next_retry_at: row.get(8)?,
        error: row.get(9)?,
    })
}

impl Database {
    /// Insert or replace the Link for `(local_id, resource, local_type)`,
    /// resetting its retry state. A conflict on the `(local_id, google_id)`
    /// constraint is resolved by deleting the stale rows and re-inserting.
    pub fn upsert_link(&self, link: &Link) -> Result<(), DatabaseError> {
        let insert = |db: &Database| -> Result<(), DatabaseError> {
            db.conn().execute(
                "INSERT INTO links (local_id, local_type, google_id, resource_type, scope_id,
                                    remote_etag, remote_updated_at, retry_count, next_retry_at, error)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, NULL, NULL)
                 ON CONFLICT(local_id, resource_type, local_type) DO UPDATE SET
                     google_id = excluded.google_id,
                     scope_id = excluded.scope_id,
                     remote_etag = excluded.remote_etag,
                     remote_updated_at = excluded.remote_updated_at,
                     retry_count = 0,
                     next_retry_at = NULL,
                     error = NULL",
                params![
                    link.local_id,
                    link.local_type.as_str(),
                    link.google_id,
                    link.resource.as_str(),
                    link.scope_id,
                    link.remote_etag,
                    link.remote_updated_at,
                ],
            )?;
            Ok(())
        };

        match insert(self) {
            Ok(()) => Ok(()),
            Err(DatabaseError::Constraint(_)) => {
                // Stale row from a previous identity of this entity.
                self.conn().execute(
                    "DELETE FROM links
                     WHERE (local_id = ?1 AND resource_type = ?2 AND local_type = ?3)
                        OR (local_id = ?1 AND google_id = ?4)",
                    params![
                        link.local_id,
                        link.resource.as_str(),
                        link.local_type.as_str(),
                        link.google_id,
                    ],
                )?;
                insert(self)
            }
            Err(e) => Err(e),
        }
    }

    pub fn get_link(
        &self,
        local_id: &str,
        resource: ResourceKind,
        local_type: EntityKind,
    ) -> Result<Option<Link>, DatabaseError> {
        let link = self
            .conn()
            .query_row(
                &format!(
                    "SELECT {LINK_COLUMNS} FROM links
                     WHERE local_id = ?1 AND resource_type = ?2 AND local_type = ?3"
                ),
                params![local_id, resource.as_str(), local_type.as_str()],
                row_to_link,
            )
            .optional()?;
        Ok(link)
    }

    pub fn find_link_by_google_id(
        &self,
        google_id: &str,
        resource: ResourceKind,
    ) -> Result<Option<Link>, DatabaseError> {
        let link = self
            .conn()
            .query_row(
                &format!(
                    "SELECT {LINK_COLUMNS} FROM links
                     WHERE google_id = ?1 AND resource_type = ?2"
                ),
                params![google_id, resource.as_str()],
                row_to_link,
            )
            .optional()?;
        Ok(link)
    }

    pub fn delete_link(
        &self,
        local_id: &str,
        resource: ResourceKind,
        local_type: EntityKind,
    ) -> Result<(), DatabaseError> {
        self.conn().execute(
            "DELETE FROM links WHERE local_id = ?1 AND resource_type = ?2 AND local_type = ?3",
            params![local_id, resource.as_str(), local_type.as_str()],
        )?;
        Ok(())
    }

    /// Remove any Link rows for this local entity and resource family that
    /// point at a different remote id than `keep_google_id`. Prevents
    /// duplicate mappings after a remote id change.
    pub fn delete_stale_links(
        &self,
        local_id: &str,
        resource: ResourceKind,
        keep_google_id: &str,
    ) -> Result<(), DatabaseError> {
        self.conn().execute(
            "DELETE FROM links
             WHERE local_id = ?1 AND resource_type = ?2 AND google_id != ?3",
            params![local_id, resource.as_str(), keep_google_id],
        )?;
        Ok(())
    }

    /// Annotate a failed sync attempt on an existing Link. Returns the new
    /// retry count, or `None` when the entity has no Link to annotate.
    pub fn record_link_failure(
        &self,
        local_id: &str,
        resource: ResourceKind,
        local_type: EntityKind,
        message: &str,
    ) -> Result<Option<u32>, DatabaseError> {
        let Some(link) = self.get_link(local_id, resource, local_type)? else {
            return Ok(None);
        };

        let retry_count = link.retry_count + 1;
        let next_retry_at = (Utc::now() + retry_delay(retry_count)).to_rfc3339();
        let error = if retry_count >= MAX_LINK_RETRIES {
            Some(MAX_RETRIES_ERROR)
        } else {
            None
        };

        self.conn().execute(
            "UPDATE links SET retry_count = ?4, next_retry_at = ?5, error = ?6
             WHERE local_id = ?1 AND resource_type = ?2 AND local_type = ?3",
            params![
                local_id,
                resource.as_str(),
                local_type.as_str(),
                retry_count,
                next_retry_at,
                error,
            ],
        )?;
        tracing::debug!(
            local_id,
            retry_count,
            terminal = error.is_some(),
            "sync attempt failed: {message}"
        );
        Ok(Some(retry_count))
    }

    /// Annotate a rate-limited attempt on an existing Link: record the
    /// error and push the next attempt out one backoff step. The retry
    /// count is left alone; only per-entity failures count toward the
    /// permanent-failure cap.
    pub fn defer_link_retry(
        &self,
        local_id: &str,
        resource: ResourceKind,
        local_type: EntityKind,
        message: &str,
    ) -> Result<(), DatabaseError> {
        let Some(link) = self.get_link(local_id, resource, local_type)? else {
            return Ok(());
        };
        let next_retry_at = (Utc::now() + retry_delay(link.retry_count + 1)).to_rfc3339();
        self.conn().execute(
            "UPDATE links SET next_retry_at = ?4, error = ?5
             WHERE local_id = ?1 AND resource_type = ?2 AND local_type = ?3",
            params![
                local_id,
                resource.as_str(),
                local_type.as_str(),
                next_retry_at,
                message,
            ],
        )?;
        tracing::debug!(local_id, "sync attempt deferred: {message}");
        Ok(())
    }

    /// Clear retry state for one entity's Links so the next cycle tries
    /// again (the manual-retry action).
    pub fn clear_link_retry_state(&self, local_id: &str) -> Result<(), DatabaseError> {
        self.conn().execute(
            "UPDATE links SET retry_count = 0, next_retry_at = NULL, error = NULL
             WHERE local_id = ?1",
            params![local_id],
        )?;
        Ok(())
    }

    /// Links marked permanently failed.
    pub fn list_failed_links(&self) -> Result<Vec<Link>, DatabaseError> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {LINK_COLUMNS} FROM links WHERE error = ?1"
        ))?;
        let rows = stmt.query_map(params![MAX_RETRIES_ERROR], row_to_link)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn count_links(&self) -> Result<usize, DatabaseError> {
        let n: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM links", [], |row| row.get(0))?;
        Ok(n as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link(local_id: &str, google_id: &str) -> Link {
        Link::new(
            local_id,
            EntityKind::Event,
            google_id,
            ResourceKind::Event,
            "primary",
        )
    }

    #[test]
    fn test_upsert_and_get() {
        let db = Database::open_memory().unwrap();
        let mut l = link("ev-1", "g-1");
        l.remote_etag = Some("\"etag-1\"".to_string());
        db.upsert_link(&l).unwrap();

        let back = db
            .get_link("ev-1", ResourceKind::Event, EntityKind::Event)
            .unwrap()
            .unwrap();
        assert_eq!(back.google_id, "g-1");
        assert_eq!(back.remote_etag.as_deref(), Some("\"etag-1\""));
        assert_eq!(back.retry_count, 0);
    }

    #[test]
    fn test_upsert_replaces_in_place_for_same_triple() {
        let db = Database::open_memory().unwrap();
        db.upsert_link(&link("ev-1", "g-1")).unwrap();
        db.upsert_link(&link("ev-1", "g-2")).unwrap();

        let back = db
            .get_link("ev-1", ResourceKind::Event, EntityKind::Event)
            .unwrap()
            .unwrap();
        assert_eq!(back.google_id, "g-2");
        assert_eq!(db.count_links().unwrap(), 1);
    }

    #[test]
    fn test_upsert_resolves_google_id_conflict() {
        let db = Database::open_memory().unwrap();
        // An item row already claims (ev-1, g-1)...
        db.upsert_link(&Link::new(
            "ev-1",
            EntityKind::Item,
            "g-1",
            ResourceKind::Task,
            "@default",
        ))
        .unwrap();
        // ...and an event upsert re-claims the same (local_id, google_id).
        db.upsert_link(&link("ev-1", "g-1")).unwrap();

        let back = db
            .get_link("ev-1", ResourceKind::Event, EntityKind::Event)
            .unwrap()
            .unwrap();
        assert_eq!(back.google_id, "g-1");
        assert_eq!(db.count_links().unwrap(), 1);
    }

    #[test]
    fn test_at_most_one_live_link_per_triple() {
        let db = Database::open_memory().unwrap();
        db.upsert_link(&link("ev-1", "g-1")).unwrap();
        db.upsert_link(&link("ev-1", "g-2")).unwrap();
        db.upsert_link(&link("ev-1", "g-3")).unwrap();

        let n: i64 = db
            .conn()
            .query_row(
                "SELECT COUNT(*) FROM links
                 WHERE local_id = 'ev-1' AND resource_type = 'event' AND local_type = 'event'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(n, 1);
    }

    #[test]
    fn test_delete_stale_links() {
        let db = Database::open_memory().unwrap();
        db.upsert_link(&link("ev-1", "g-old")).unwrap();
        db.delete_stale_links("ev-1", ResourceKind::Event, "g-new")
            .unwrap();
        assert!(db
            .get_link("ev-1", ResourceKind::Event, EntityKind::Event)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_failure_annotation_reaches_terminal_marker() {
        let db = Database::open_memory().unwrap();
        db.upsert_link(&link("ev-1", "g-1")).unwrap();

        for i in 1..=MAX_LINK_RETRIES {
            let count = db
                .record_link_failure("ev-1", ResourceKind::Event, EntityKind::Event, "boom")
                .unwrap();
            assert_eq!(count, Some(i));
        }

        let l = db
            .get_link("ev-1", ResourceKind::Event, EntityKind::Event)
            .unwrap()
            .unwrap();
        assert_eq!(l.retry_count, MAX_LINK_RETRIES);
        assert_eq!(l.error.as_deref(), Some(MAX_RETRIES_ERROR));
        assert!(l.is_retry_gated(Utc::now()));
        // The Link itself survives failure.
        assert_eq!(db.count_links().unwrap(), 1);
    }

    #[test]
    fn test_failure_without_link_is_noop() {
        let db = Database::open_memory().unwrap();
        let count = db
            .record_link_failure("ev-x", ResourceKind::Event, EntityKind::Event, "boom")
            .unwrap();
        assert_eq!(count, None);
    }

    #[test]
    fn test_defer_retry_leaves_count_untouched() {
        let db = Database::open_memory().unwrap();
        db.upsert_link(&link("ev-1", "g-1")).unwrap();
        db.defer_link_retry("ev-1", ResourceKind::Event, EntityKind::Event, "rate limited")
            .unwrap();

        let l = db
            .get_link("ev-1", ResourceKind::Event, EntityKind::Event)
            .unwrap()
            .unwrap();
        assert_eq!(l.retry_count, 0);
        assert_eq!(l.error.as_deref(), Some("rate limited"));
        assert!(l.is_retry_gated(Utc::now()));
        // Not a permanent failure: the gate lifts once the window passes.
        assert!(!l.is_retry_gated(Utc::now() + Duration::hours(1)));
        assert!(db.list_failed_links().unwrap().is_empty());
    }

    #[test]
    fn test_retry_gate_respects_backoff_window() {
        let mut l = link("ev-1", "g-1");
        l.retry_count = 1;
        l.next_retry_at = Some((Utc::now() + Duration::minutes(5)).to_rfc3339());
        assert!(l.is_retry_gated(Utc::now()));

        l.next_retry_at = Some((Utc::now() - Duration::minutes(5)).to_rfc3339());
        assert!(!l.is_retry_gated(Utc::now()));
    }

    #[test]
    fn test_clear_retry_state() {
        let db = Database::open_memory().unwrap();
        db.upsert_link(&link("ev-1", "g-1")).unwrap();
        for _ in 0..MAX_LINK_RETRIES {
            db.record_link_failure("ev-1", ResourceKind::Event, EntityKind::Event, "boom")
                .unwrap();
        }
        db.clear_link_retry_state("ev-1").unwrap();

        let l = db
            .get_link("ev-1", ResourceKind::Event, EntityKind::Event)
            .unwrap()
            .unwrap();
        assert_eq!(l.retry_count, 0);
        assert!(l.error.is_none());
        assert!(!l.is_retry_gated(Utc::now()));
    }

    #[test]
    fn test_retry_delay_floor_and_ceiling() {
        assert_eq!(retry_delay(1), Duration::seconds(60));
        assert_eq!(retry_delay(2), Duration::seconds(120));
        assert_eq!(retry_delay(20), Duration::seconds(RETRY_CEILING_SECS));
        // Far past the cap, still the ceiling (no overflow).
        assert_eq!(retry_delay(u32::MAX), Duration::seconds(RETRY_CEILING_SECS));
    }
}
