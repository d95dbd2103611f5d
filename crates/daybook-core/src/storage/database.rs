//! SQLite-based local store.
//!
//! Holds the syncable entities (events, tasks, items), the link and cursor
//! tables owned by the sync engine, and a small key-value table for durable
//! flags such as the sync kill switch.
//!
//! All timestamps are RFC 3339 TEXT. Mutations are full-row writes of a
//! record the caller patched in memory, written through immediately.

use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

use super::data_dir;
use crate::error::DatabaseError;
use crate::model::{Attendee, EventRecord, EventStatus, ItemRecord, ItemTarget, TaskRecord};

/// Durable kill switch key in the `kv` table.
const KV_KILL_SWITCH: &str = "sync:kill_switch";

/// SQLite database for the local store.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Get a reference to the underlying SQLite connection.
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Open the database at `~/.config/daybook/daybook.db`.
    ///
    /// Creates the database file and schema if they don't exist.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open() -> Result<Self, DatabaseError> {
        let dir = data_dir().map_err(|e| DatabaseError::OpenFailed {
            path: "~/.config/daybook".into(),
            source: rusqlite::Error::InvalidPath(e.to_string().into()),
        })?;
        Self::open_at(dir.join("daybook.db"))
    }

    /// Open the database at an explicit path.
    pub fn open_at(path: impl AsRef<Path>) -> Result<Self, DatabaseError> {
        let path = path.as_ref();
        let conn = Connection::open(path).map_err(|e| DatabaseError::OpenFailed {
            path: path.to_path_buf(),
            source: e,
        })?;
        let db = Self { conn };
        db.migrate()?;
        Ok(db)
    }

    /// Open an in-memory database (for tests).
    pub fn open_memory() -> Result<Self, DatabaseError> {
        let conn = Connection::open_in_memory().map_err(|e| DatabaseError::OpenFailed {
            path: ":memory:".into(),
            source: e,
        })?;
        let db = Self { conn };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<(), DatabaseError> {
        self.conn
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS events (
                    id                 TEXT PRIMARY KEY,
                    calendar_id        TEXT,
                    title              TEXT NOT NULL,
                    description        TEXT,
                    location           TEXT,
                    start_at           TEXT,
                    end_at             TEXT,
                    all_day            INTEGER NOT NULL DEFAULT 0,
                    status             TEXT NOT NULL DEFAULT 'confirmed',
                    rrule              TEXT,
                    master_id          TEXT,
                    original_start_at  TEXT,
                    attendees          TEXT NOT NULL DEFAULT '[]',
                    reminders          TEXT NOT NULL DEFAULT '[]',
                    google_event_id    TEXT,
                    updated_at         TEXT NOT NULL,
                    deleted_at         TEXT,
                    is_unsynced        INTEGER NOT NULL DEFAULT 0
                );

                CREATE TABLE IF NOT EXISTS tasks (
                    id               TEXT PRIMARY KEY,
                    list_id          TEXT,
                    title            TEXT NOT NULL,
                    notes            TEXT,
                    due_at           TEXT,
                    completed_at     TEXT,
                    google_task_id   TEXT,
                    updated_at       TEXT NOT NULL,
                    deleted_at       TEXT,
                    is_unsynced      INTEGER NOT NULL DEFAULT 0
                );

                CREATE TABLE IF NOT EXISTS items (
                    id               TEXT PRIMARY KEY,
                    title            TEXT NOT NULL,
                    notes            TEXT,
                    start_at         TEXT,
                    end_at           TEXT,
                    due_at           TEXT,
                    target           TEXT,
                    google_event_id  TEXT,
                    google_task_id   TEXT,
                    updated_at       TEXT NOT NULL,
                    deleted_at       TEXT,
                    is_unsynced      INTEGER NOT NULL DEFAULT 0
                );

                CREATE TABLE IF NOT EXISTS links (
                    local_id           TEXT NOT NULL,
                    local_type         TEXT NOT NULL,
                    google_id          TEXT NOT NULL,
                    resource_type      TEXT NOT NULL,
                    scope_id           TEXT NOT NULL,
                    remote_etag        TEXT,
                    remote_updated_at  TEXT,
                    retry_count        INTEGER NOT NULL DEFAULT 0,
                    next_retry_at      TEXT,
                    error              TEXT,
                    UNIQUE (local_id, resource_type, local_type),
                    UNIQUE (local_id, google_id)
                );

                CREATE TABLE IF NOT EXISTS cursors (
                    user_id         TEXT NOT NULL,
                    resource_type   TEXT NOT NULL,
                    scope_id        TEXT NOT NULL,
                    sync_token      TEXT,
                    last_pulled_at  TEXT,
                    UNIQUE (user_id, resource_type, scope_id)
                );

                CREATE TABLE IF NOT EXISTS kv (
                    key   TEXT PRIMARY KEY,
                    value TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_events_dirty ON events(is_unsynced, updated_at);
                CREATE INDEX IF NOT EXISTS idx_events_google_id ON events(google_event_id);
                CREATE INDEX IF NOT EXISTS idx_tasks_dirty ON tasks(is_unsynced, updated_at);
                CREATE INDEX IF NOT EXISTS idx_tasks_google_id ON tasks(google_task_id);
                CREATE INDEX IF NOT EXISTS idx_items_dirty ON items(is_unsynced, updated_at);
                CREATE INDEX IF NOT EXISTS idx_links_google_id ON links(google_id, resource_type);",
            )
            .map_err(|e| DatabaseError::MigrationFailed(e.to_string()))?;
        Ok(())
    }

    // === Key-value store ===

    pub fn kv_get(&self, key: &str) -> Result<Option<String>, DatabaseError> {
        let value = self
            .conn
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    pub fn kv_set(&self, key: &str, value: &str) -> Result<(), DatabaseError> {
        self.conn.execute(
            "INSERT INTO kv (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn kv_delete(&self, key: &str) -> Result<(), DatabaseError> {
        self.conn
            .execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        Ok(())
    }

    /// Whether the durable sync kill switch is set.
    pub fn kill_switch(&self) -> Result<bool, DatabaseError> {
        Ok(self.kv_get(KV_KILL_SWITCH)?.as_deref() == Some("1"))
    }

    pub fn set_kill_switch(&self, enabled: bool) -> Result<(), DatabaseError> {
        if enabled {
            self.kv_set(KV_KILL_SWITCH, "1")
        } else {
            self.kv_delete(KV_KILL_SWITCH)
        }
    }

    // === Events ===

    pub fn insert_event(&self, ev: &EventRecord) -> Result<(), DatabaseError> {
        self.conn.execute(
            "INSERT INTO events (id, calendar_id, title, description, location, start_at, end_at,
                                 all_day, status, rrule, master_id, original_start_at, attendees,
                                 reminders, google_event_id, updated_at, deleted_at, is_unsynced)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
            params![
                ev.id,
                ev.calendar_id,
                ev.title,
                ev.description,
                ev.location,
                ev.start_at,
                ev.end_at,
                ev.all_day,
                ev.status.as_str(),
                ev.rrule,
                ev.master_id,
                ev.original_start_at,
                encode_attendees(&ev.attendees),
                encode_reminders(&ev.reminders),
                ev.google_event_id,
                ev.updated_at,
                ev.deleted_at,
                ev.is_unsynced,
            ],
        )?;
        Ok(())
    }

    pub fn update_event(&self, ev: &EventRecord) -> Result<(), DatabaseError> {
        self.conn.execute(
            "UPDATE events SET calendar_id = ?2, title = ?3, description = ?4, location = ?5,
                               start_at = ?6, end_at = ?7, all_day = ?8, status = ?9, rrule = ?10,
                               master_id = ?11, original_start_at = ?12, attendees = ?13,
                               reminders = ?14, google_event_id = ?15, updated_at = ?16,
                               deleted_at = ?17, is_unsynced = ?18
             WHERE id = ?1",
            params![
                ev.id,
                ev.calendar_id,
                ev.title,
                ev.description,
                ev.location,
                ev.start_at,
                ev.end_at,
                ev.all_day,
                ev.status.as_str(),
                ev.rrule,
                ev.master_id,
                ev.original_start_at,
                encode_attendees(&ev.attendees),
                encode_reminders(&ev.reminders),
                ev.google_event_id,
                ev.updated_at,
                ev.deleted_at,
                ev.is_unsynced,
            ],
        )?;
        Ok(())
    }

    pub fn get_event(&self, id: &str) -> Result<Option<EventRecord>, DatabaseError> {
        let ev = self
            .conn
            .query_row(
                &format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = ?1"),
                params![id],
                row_to_event,
            )
            .optional()?;
        Ok(ev)
    }

    pub fn find_event_by_google_id(&self, google_id: &str) -> Result<Option<EventRecord>, DatabaseError> {
        let ev = self
            .conn
            .query_row(
                &format!("SELECT {EVENT_COLUMNS} FROM events WHERE google_event_id = ?1"),
                params![google_id],
                row_to_event,
            )
            .optional()?;
        Ok(ev)
    }

    pub fn list_events(&self, include_deleted: bool) -> Result<Vec<EventRecord>, DatabaseError> {
        let sql = if include_deleted {
            format!("SELECT {EVENT_COLUMNS} FROM events ORDER BY updated_at DESC")
        } else {
            format!(
                "SELECT {EVENT_COLUMNS} FROM events WHERE deleted_at IS NULL ORDER BY updated_at DESC"
            )
        };
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], row_to_event)?;
        collect_rows(rows)
    }

    /// Dirty events, newest first. Tombstoned rows are included so deletes
    /// get pushed.
    pub fn list_dirty_events(&self) -> Result<Vec<EventRecord>, DatabaseError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE is_unsynced = 1 ORDER BY updated_at DESC"
        ))?;
        let rows = stmt.query_map([], row_to_event)?;
        collect_rows(rows)
    }

    // === Tasks ===

    pub fn insert_task(&self, task: &TaskRecord) -> Result<(), DatabaseError> {
        self.conn.execute(
            "INSERT INTO tasks (id, list_id, title, notes, due_at, completed_at, google_task_id,
                                updated_at, deleted_at, is_unsynced)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                task.id,
                task.list_id,
                task.title,
                task.notes,
                task.due_at,
                task.completed_at,
                task.google_task_id,
                task.updated_at,
                task.deleted_at,
                task.is_unsynced,
            ],
        )?;
        Ok(())
    }

    pub fn update_task(&self, task: &TaskRecord) -> Result<(), DatabaseError> {
        self.conn.execute(
            "UPDATE tasks SET list_id = ?2, title = ?3, notes = ?4, due_at = ?5, completed_at = ?6,
                              google_task_id = ?7, updated_at = ?8, deleted_at = ?9, is_unsynced = ?10
             WHERE id = ?1",
            params![
                task.id,
                task.list_id,
                task.title,
                task.notes,
                task.due_at,
                task.completed_at,
                task.google_task_id,
                task.updated_at,
                task.deleted_at,
                task.is_unsynced,
            ],
        )?;
        Ok(())
    }

    pub fn get_task(&self, id: &str) -> Result<Option<TaskRecord>, DatabaseError> {
        let task = self
            .conn
            .query_row(
                &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
                params![id],
                row_to_task,
            )
            .optional()?;
        Ok(task)
    }

    pub fn find_task_by_google_id(&self, google_id: &str) -> Result<Option<TaskRecord>, DatabaseError> {
        let task = self
            .conn
            .query_row(
                &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE google_task_id = ?1"),
                params![google_id],
                row_to_task,
            )
            .optional()?;
        Ok(task)
    }

    pub fn list_tasks(&self, include_deleted: bool) -> Result<Vec<TaskRecord>, DatabaseError> {
        let sql = if include_deleted {
            format!("SELECT {TASK_COLUMNS} FROM tasks ORDER BY updated_at DESC")
        } else {
            format!(
                "SELECT {TASK_COLUMNS} FROM tasks WHERE deleted_at IS NULL ORDER BY updated_at DESC"
            )
        };
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], row_to_task)?;
        collect_rows(rows)
    }

    pub fn list_dirty_tasks(&self) -> Result<Vec<TaskRecord>, DatabaseError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE is_unsynced = 1 ORDER BY updated_at DESC"
        ))?;
        let rows = stmt.query_map([], row_to_task)?;
        collect_rows(rows)
    }

    // === Items ===

    pub fn insert_item(&self, item: &ItemRecord) -> Result<(), DatabaseError> {
        self.conn.execute(
            "INSERT INTO items (id, title, notes, start_at, end_at, due_at, target,
                                google_event_id, google_task_id, updated_at, deleted_at, is_unsynced)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                item.id,
                item.title,
                item.notes,
                item.start_at,
                item.end_at,
                item.due_at,
                item.target.map(|t| t.as_str()),
                item.google_event_id,
                item.google_task_id,
                item.updated_at,
                item.deleted_at,
                item.is_unsynced,
            ],
        )?;
        Ok(())
    }

    pub fn update_item(&self, item: &ItemRecord) -> Result<(), DatabaseError> {
        self.conn.execute(
            "UPDATE items SET title = ?2, notes = ?3, start_at = ?4, end_at = ?5, due_at = ?6,
                              target = ?7, google_event_id = ?8, google_task_id = ?9,
                              updated_at = ?10, deleted_at = ?11, is_unsynced = ?12
             WHERE id = ?1",
            params![
                item.id,
                item.title,
                item.notes,
                item.start_at,
                item.end_at,
                item.due_at,
                item.target.map(|t| t.as_str()),
                item.google_event_id,
                item.google_task_id,
                item.updated_at,
                item.deleted_at,
                item.is_unsynced,
            ],
        )?;
        Ok(())
    }

    pub fn get_item(&self, id: &str) -> Result<Option<ItemRecord>, DatabaseError> {
        let item = self
            .conn
            .query_row(
                &format!("SELECT {ITEM_COLUMNS} FROM items WHERE id = ?1"),
                params![id],
                row_to_item,
            )
            .optional()?;
        Ok(item)
    }

    pub fn find_item_by_google_event_id(&self, google_id: &str) -> Result<Option<ItemRecord>, DatabaseError> {
        let item = self
            .conn
            .query_row(
                &format!("SELECT {ITEM_COLUMNS} FROM items WHERE google_event_id = ?1"),
                params![google_id],
                row_to_item,
            )
            .optional()?;
        Ok(item)
    }

    pub fn find_item_by_google_task_id(&self, google_id: &str) -> Result<Option<ItemRecord>, DatabaseError> {
        let item = self
            .conn
            .query_row(
                &format!("SELECT {ITEM_COLUMNS} FROM items WHERE google_task_id = ?1"),
                params![google_id],
                row_to_item,
            )
            .optional()?;
        Ok(item)
    }

    pub fn list_items(&self, include_deleted: bool) -> Result<Vec<ItemRecord>, DatabaseError> {
        let sql = if include_deleted {
            format!("SELECT {ITEM_COLUMNS} FROM items ORDER BY updated_at DESC")
        } else {
            format!(
                "SELECT {ITEM_COLUMNS} FROM items WHERE deleted_at IS NULL ORDER BY updated_at DESC"
            )
        };
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], row_to_item)?;
        collect_rows(rows)
    }

    pub fn list_dirty_items(&self) -> Result<Vec<ItemRecord>, DatabaseError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {ITEM_COLUMNS} FROM items WHERE is_unsynced = 1 ORDER BY updated_at DESC"
        ))?;
        let rows = stmt.query_map([], row_to_item)?;
        collect_rows(rows)
    }

    /// Count of dirty rows per table, for status reporting.
    pub fn dirty_counts(&self) -> Result<(usize, usize, usize), DatabaseError> {
        let count = |table: &str| -> Result<usize, rusqlite::Error> {
            self.conn.query_row(
                &format!("SELECT COUNT(*) FROM {table} WHERE is_unsynced = 1"),
                [],
                |row| row.get::<_, i64>(0).map(|n| n as usize),
            )
        };
        Ok((count("events")?, count("tasks")?, count("items")?))
    }
}

// === Row mapping ===

const EVENT_COLUMNS: &str = "id, calendar_id, title, description, location, start_at, end_at, \
                             all_day, status, rrule, master_id, original_start_at, attendees, \
                             reminders, google_event_id, updated_at, deleted_at, is_unsynced";

const TASK_COLUMNS: &str = "id, list_id, title, notes, due_at, completed_at, google_task_id, \
                            updated_at, deleted_at, is_unsynced";

const ITEM_COLUMNS: &str = "id, title, notes, start_at, end_at, due_at, target, google_event_id, \
                            google_task_id, updated_at, deleted_at, is_unsynced";

fn encode_attendees(attendees: &[Attendee]) -> String {
    serde_json::to_string(attendees).unwrap_or_else(|_| "[]".to_string())
}

fn encode_reminders(reminders: &[i64]) -> String {
    serde_json::to_string(reminders).unwrap_or_else(|_| "[]".to_string())
}

fn row_to_event(row: &rusqlite::Row) -> Result<EventRecord, rusqlite::Error> {
    let status_str: String = row.get(8)?;
    let attendees_json: String = row.get(12)?;
    let reminders_json: String = row.get(13)?;

    Ok(EventRecord {
        id: row.get(0)?,
        calendar_id: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        location: row.get(4)?,
        start_at: row.get(5)?,
        end_at: row.get(6)?,
        all_day: row.get(7)?,
        status: EventStatus::parse(&status_str),
        rrule: row.get(9)?,
        master_id: row.get(10)?,
        original_start_at: row.get(11)?,
        attendees: serde_json::from_str(&attendees_json).unwrap_or_default(),
        reminders: serde_json::from_str(&reminders_json).unwrap_or_default(),
        google_event_id: row.get(14)?,
        updated_at: row.get(15)?,
        deleted_at: row.get(16)?,
        is_unsynced: row.get(17)?,
    })
}

fn row_to_task(row: &rusqlite::Row) -> Result<TaskRecord, rusqlite::Error> {
    Ok(TaskRecord {
        id: row.get(0)?,
        list_id: row.get(1)?,
        title: row.get(2)?,
        notes: row.get(3)?,
        due_at: row.get(4)?,
        completed_at: row.get(5)?,
        google_task_id: row.get(6)?,
        updated_at: row.get(7)?,
        deleted_at: row.get(8)?,
        is_unsynced: row.get(9)?,
    })
}

fn row_to_item(row: &rusqlite::Row) -> Result<ItemRecord, rusqlite::Error> {
    let target_str: Option<String> = row.get(6)?;
    Ok(ItemRecord {
        id: row.get(0)?,
        title: row.get(1)?,
        notes: row.get(2)?,
        start_at: row.get(3)?,
        end_at: row.get(4)?,
        due_at: row.get(5)?,
        target: target_str.as_deref().and_then(ItemTarget::parse),
        google_event_id: row.get(7)?,
        google_task_id: row.get(8)?,
        updated_at: row.get(9)?,
        deleted_at: row.get(10)?,
        is_unsynced: row.get(11)?,
    })
}

fn collect_rows<T>(
    rows: impl Iterator<Item = Result<T, rusqlite::Error>>,
) -> Result<Vec<T>, DatabaseError> {
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_round_trip() {
        let db = Database::open_memory().unwrap();
        let mut ev = EventRecord::new("standup");
        ev.start_at = Some("2026-08-03T09:00:00+00:00".to_string());
        ev.end_at = Some("2026-08-03T09:15:00+00:00".to_string());
        ev.attendees.push(Attendee {
            email: "a@example.com".to_string(),
            name: Some("A".to_string()),
            response_status: None,
        });
        ev.reminders.push(10);
        db.insert_event(&ev).unwrap();

        let back = db.get_event(&ev.id).unwrap().unwrap();
        assert_eq!(back.title, "standup");
        assert_eq!(back.attendees.len(), 1);
        assert_eq!(back.reminders, vec![10]);
        assert!(back.is_unsynced);
    }

    #[test]
    fn test_open_at_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daybook.db");

        let ev = EventRecord::new("persisted");
        {
            let db = Database::open_at(&path).unwrap();
            db.insert_event(&ev).unwrap();
        }

        let db = Database::open_at(&path).unwrap();
        let back = db.get_event(&ev.id).unwrap().unwrap();
        assert_eq!(back.title, "persisted");
    }

    #[test]
    fn test_dirty_listing_includes_tombstones() {
        let db = Database::open_memory().unwrap();
        let mut ev = EventRecord::new("gone");
        ev.deleted_at = Some("2026-08-03T10:00:00+00:00".to_string());
        db.insert_event(&ev).unwrap();

        let dirty = db.list_dirty_events().unwrap();
        assert_eq!(dirty.len(), 1);

        let visible = db.list_events(false).unwrap();
        assert!(visible.is_empty());
    }

    #[test]
    fn test_find_by_google_id() {
        let db = Database::open_memory().unwrap();
        let mut task = TaskRecord::new("pay rent");
        task.google_task_id = Some("gtask-1".to_string());
        db.insert_task(&task).unwrap();

        let found = db.find_task_by_google_id("gtask-1").unwrap().unwrap();
        assert_eq!(found.id, task.id);
        assert!(db.find_task_by_google_id("missing").unwrap().is_none());
    }

    #[test]
    fn test_item_target_round_trip() {
        let db = Database::open_memory().unwrap();
        let mut item = ItemRecord::new("write report");
        item.target = Some(ItemTarget::Task);
        db.insert_item(&item).unwrap();

        let back = db.get_item(&item.id).unwrap().unwrap();
        assert_eq!(back.target, Some(ItemTarget::Task));

        let mut back = back;
        back.target = Some(ItemTarget::Event);
        db.update_item(&back).unwrap();
        assert_eq!(
            db.get_item(&item.id).unwrap().unwrap().target,
            Some(ItemTarget::Event)
        );
    }

    #[test]
    fn test_kill_switch() {
        let db = Database::open_memory().unwrap();
        assert!(!db.kill_switch().unwrap());
        db.set_kill_switch(true).unwrap();
        assert!(db.kill_switch().unwrap());
        db.set_kill_switch(false).unwrap();
        assert!(!db.kill_switch().unwrap());
    }

    #[test]
    fn test_dirty_counts() {
        let db = Database::open_memory().unwrap();
        db.insert_event(&EventRecord::new("a")).unwrap();
        let mut t = TaskRecord::new("b");
        t.is_unsynced = false;
        db.insert_task(&t).unwrap();
        db.insert_item(&ItemRecord::new("c")).unwrap();

        assert_eq!(db.dirty_counts().unwrap(), (1, 0, 1));
    }
}
