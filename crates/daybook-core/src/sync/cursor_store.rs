//! Durable incremental-sync cursors.
//!
//! One row per `(user, resource, scope)`. Events store the provider's
//! opaque `sync_token`; Tasks store a `last_pulled_at` watermark used as
//! `updatedMin`. A cursor reported invalid by the provider is cleared, which
//! forces the next pull into a bounded full-lookback refetch.

use rusqlite::{params, OptionalExtension};

use crate::error::DatabaseError;
use crate::model::ResourceKind;
use crate::storage::Database;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor {
    pub user_id: String,
    pub resource: ResourceKind,
    pub scope_id: String,
    pub sync_token: Option<String>,
    pub last_pulled_at: Option<String>,
}

impl Database {
    pub fn get_cursor(
        &self,
        user_id: &str,
        resource: ResourceKind,
        scope_id: &str,
    ) -> Result<Option<Cursor>, DatabaseError> {
        let cursor = self
            .conn()
            .query_row(
                "SELECT sync_token, last_pulled_at FROM cursors
                 WHERE user_id = ?1 AND resource_type = ?2 AND scope_id = ?3",
                params![user_id, resource.as_str(), scope_id],
                |row| {
                    Ok(Cursor {
                        user_id: user_id.to_string(),
                        resource,
                        scope_id: scope_id.to_string(),
                        sync_token: row.get(0)?,
                        last_pulled_at: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(cursor)
    }

    pub fn save_cursor(&self, cursor: &Cursor) -> Result<(), DatabaseError> {
        self.conn().execute(
            "INSERT INTO cursors (user_id, resource_type, scope_id, sync_token, last_pulled_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(user_id, resource_type, scope_id) DO UPDATE SET
                 sync_token = excluded.sync_token,
                 last_pulled_at = excluded.last_pulled_at",
            params![
                cursor.user_id,
                cursor.resource.as_str(),
                cursor.scope_id,
                cursor.sync_token,
                cursor.last_pulled_at,
            ],
        )?;
        Ok(())
    }

    /// Null out a cursor the provider reported as expired/invalid.
    pub fn clear_cursor(
        &self,
        user_id: &str,
        resource: ResourceKind,
        scope_id: &str,
    ) -> Result<(), DatabaseError> {
        self.conn().execute(
            "UPDATE cursors SET sync_token = NULL, last_pulled_at = NULL
             WHERE user_id = ?1 AND resource_type = ?2 AND scope_id = ?3",
            params![user_id, resource.as_str(), scope_id],
        )?;
        Ok(())
    }

    pub fn list_cursors(&self) -> Result<Vec<Cursor>, DatabaseError> {
        let mut stmt = self.conn().prepare(
            "SELECT user_id, resource_type, scope_id, sync_token, last_pulled_at FROM cursors",
        )?;
        let rows = stmt.query_map([], |row| {
            let resource_str: String = row.get(1)?;
            Ok(Cursor {
                user_id: row.get(0)?,
                resource: ResourceKind::parse(&resource_str).unwrap_or(ResourceKind::Event),
                scope_id: row.get(2)?,
                sync_token: row.get(3)?,
                last_pulled_at: row.get(4)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}
