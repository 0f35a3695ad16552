//! SQLite-backed user record storage.
//!
//! One row per user:
//! - identity and last known username
//! - global minutes played
//! - goal cursors as a JSON object keyed by module id

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::warn;
use uuid::Uuid;

use super::backend::RecordBackend;
use super::data_dir;
use super::record::{merge_cursors, GoalCursor, UserRecord};
use crate::error::{CoreError, DatabaseError, Result};

/// SQLite database holding user records.
pub struct SqliteRecordBackend {
    conn: Mutex<Connection>,
}

impl SqliteRecordBackend {
    /// Open the database at `~/.config/playtime-rewarder/rewarder.db`.
    ///
    /// Creates the database file and schema if they don't exist.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open() -> Result<Self> {
        Self::open_at(&data_dir()?.join("rewarder.db"))
    }

    /// Open (or create) the database at `path`.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open_at(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(|source| DatabaseError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    /// Open an in-memory database.
    ///
    /// # Errors
    /// Returns an error if the schema cannot be created.
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<()> {
        self.conn()
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS user_records (
                    id             TEXT PRIMARY KEY,
                    username       TEXT NOT NULL DEFAULT '',
                    minutes_played INTEGER NOT NULL DEFAULT 0,
                    cursors        TEXT NOT NULL DEFAULT '{}',
                    updated_at     TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_user_records_username ON user_records(username);",
            )
            .map_err(|e| DatabaseError::MigrationFailed(e.to_string()))?;
        Ok(())
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Every stored record, ordered by playtime descending.
    ///
    /// Rows that fail to decode are skipped.
    pub fn list(&self) -> Result<Vec<UserRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, username, minutes_played, cursors, updated_at
             FROM user_records
             ORDER BY minutes_played DESC, username ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(RawRow {
                id: row.get(0)?,
                username: row.get(1)?,
                minutes_played: row.get(2)?,
                cursors: row.get(3)?,
                updated_at: row.get(4)?,
            })
        })?;

        let mut records = Vec::new();
        for row in rows {
            let raw = row?;
            match raw.decode() {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!(error = %e, "skipping undecodable user record"),
            }
        }
        Ok(records)
    }

    /// Look a record up by its last known username (case-insensitive).
    pub fn find_by_username(&self, username: &str) -> Result<Option<UserRecord>> {
        let raw = self
            .conn()
            .query_row(
                "SELECT id, username, minutes_played, cursors, updated_at
                 FROM user_records
                 WHERE username = ?1 COLLATE NOCASE
                 ORDER BY updated_at DESC
                 LIMIT 1",
                params![username],
                |row| {
                    Ok(RawRow {
                        id: row.get(0)?,
                        username: row.get(1)?,
                        minutes_played: row.get(2)?,
                        cursors: row.get(3)?,
                        updated_at: row.get(4)?,
                    })
                },
            )
            .optional()?;
        raw.map(RawRow::decode).transpose()
    }
}

impl RecordBackend for SqliteRecordBackend {
    fn load(&self, id: Uuid) -> Result<Option<UserRecord>> {
        let raw = self
            .conn()
            .query_row(
                "SELECT id, username, minutes_played, cursors, updated_at
                 FROM user_records WHERE id = ?1",
                params![id.to_string()],
                |row| {
                    Ok(RawRow {
                        id: row.get(0)?,
                        username: row.get(1)?,
                        minutes_played: row.get(2)?,
                        cursors: row.get(3)?,
                        updated_at: row.get(4)?,
                    })
                },
            )
            .optional()?;
        raw.map(RawRow::decode).transpose()
    }

    /// Upsert a record. The stored total and cursors only move forward, so
    /// a snapshot written after a newer one cannot undo its progress.
    fn save(&self, record: &UserRecord) -> Result<()> {
        let id = record.id.to_string();
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let mut cursors = record.cursors().clone();
        let stored: Option<String> = tx
            .query_row(
                "SELECT cursors FROM user_records WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(stored) = stored {
            match serde_json::from_str::<BTreeMap<String, GoalCursor>>(&stored) {
                Ok(stored) => merge_cursors(&mut cursors, &stored),
                Err(e) => warn!(user = %id, error = %e, "replacing unreadable stored cursors"),
            }
        }

        tx.execute(
            "INSERT INTO user_records (id, username, minutes_played, cursors, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET
                username = excluded.username,
                minutes_played = MAX(user_records.minutes_played, excluded.minutes_played),
                cursors = excluded.cursors,
                updated_at = excluded.updated_at",
            params![
                id,
                record.username,
                record.minutes_played(),
                serde_json::to_string(&cursors)?,
                record.updated_at.to_rfc3339(),
            ],
        )?;
        tx.commit()?;
        Ok(())
    }
}

struct RawRow {
    id: String,
    username: String,
    minutes_played: u32,
    cursors: String,
    updated_at: String,
}

impl RawRow {
    fn decode(self) -> Result<UserRecord> {
        let corrupt = |message: String| CoreError::Storage {
            user: self.id.clone(),
            message,
        };
        let id = Uuid::parse_str(&self.id).map_err(|e| corrupt(format!("bad id: {e}")))?;
        let cursors: BTreeMap<String, GoalCursor> = serde_json::from_str(&self.cursors)
            .map_err(|e| corrupt(format!("bad cursors: {e}")))?;
        let updated_at = DateTime::parse_from_rfc3339(&self.updated_at)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| corrupt(format!("bad timestamp: {e}")))?;
        Ok(UserRecord::from_parts(
            id,
            self.username.clone(),
            self.minutes_played,
            cursors,
            updated_at,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_user_loads_none() {
        let db = SqliteRecordBackend::open_memory().unwrap();
        assert!(db.load(Uuid::new_v4()).unwrap().is_none());
    }

    #[test]
    fn save_then_load_roundtrips() {
        let db = SqliteRecordBackend::open_memory().unwrap();
        let mut record = UserRecord::new(Uuid::new_v4(), "Steve");
        record.record_minutes(135);
        *record.cursor_entry("global-playtime-goals", GoalCursor::default) = GoalCursor::at(120);
        db.save(&record).unwrap();

        let loaded = db.load(record.id).unwrap().unwrap();
        assert_eq!(loaded.username, "Steve");
        assert_eq!(loaded.minutes_played(), 135);
        assert_eq!(loaded.last_collected("global-playtime-goals"), 120);
    }

    #[test]
    fn stored_minutes_never_decrease() {
        let db = SqliteRecordBackend::open_memory().unwrap();
        let id = Uuid::new_v4();
        let mut ahead = UserRecord::new(id, "Alex");
        ahead.record_minutes(300);
        db.save(&ahead).unwrap();

        let stale = UserRecord::new(id, "Alex");
        db.save(&stale).unwrap();
        assert_eq!(db.load(id).unwrap().unwrap().minutes_played(), 300);
    }

    #[test]
    fn stale_save_does_not_rewind_cursors() {
        let db = SqliteRecordBackend::open_memory().unwrap();
        let id = Uuid::new_v4();
        let mut newer = UserRecord::new(id, "Alex");
        newer.record_minutes(90);
        *newer.cursor_entry("global-playtime-goals", GoalCursor::default) = GoalCursor::at(90);
        *newer.cursor_entry("daily-playtime-goals", GoalCursor::default) = GoalCursor::at(90);

        let mut older = UserRecord::new(id, "Alex");
        older.record_minutes(60);
        *older.cursor_entry("global-playtime-goals", GoalCursor::default) = GoalCursor::at(60);

        db.save(&newer).unwrap();
        db.save(&older).unwrap();
        let loaded = db.load(id).unwrap().unwrap();
        assert_eq!(loaded.minutes_played(), 90);
        assert_eq!(loaded.last_collected("global-playtime-goals"), 90);
        assert_eq!(loaded.last_collected("daily-playtime-goals"), 90);
    }

    #[test]
    fn save_replaces_unreadable_cursor_column() {
        let db = SqliteRecordBackend::open_memory().unwrap();
        let id = Uuid::new_v4();
        db.conn()
            .execute(
                "INSERT INTO user_records (id, username, minutes_played, cursors, updated_at)
                 VALUES (?1, 'Steve', 10, 'not json', ?2)",
                params![id.to_string(), Utc::now().to_rfc3339()],
            )
            .unwrap();
        let mut record = UserRecord::new(id, "Steve");
        *record.cursor_entry("global-playtime-goals", GoalCursor::default) = GoalCursor::at(12);
        db.save(&record).unwrap();
        assert_eq!(db.load(id).unwrap().unwrap().last_collected("global-playtime-goals"), 12);
    }

    #[test]
    fn corrupt_cursor_column_is_an_error() {
        let db = SqliteRecordBackend::open_memory().unwrap();
        let id = Uuid::new_v4();
        db.conn()
            .execute(
                "INSERT INTO user_records (id, username, minutes_played, cursors, updated_at)
                 VALUES (?1, 'Steve', 10, 'not json', ?2)",
                params![id.to_string(), Utc::now().to_rfc3339()],
            )
            .unwrap();
        assert!(matches!(db.load(id), Err(CoreError::Storage { .. })));
        assert!(db.list().unwrap().is_empty());
    }

    #[test]
    fn file_database_persists_across_opens() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("rewarder.db");
        let id = Uuid::new_v4();
        {
            let db = SqliteRecordBackend::open_at(&path).unwrap();
            let mut record = UserRecord::new(id, "Notch");
            record.record_minutes(42);
            db.save(&record).unwrap();
        }
        let db = SqliteRecordBackend::open_at(&path).unwrap();
        assert_eq!(db.load(id).unwrap().unwrap().minutes_played(), 42);
        assert_eq!(
            db.find_by_username("notch").unwrap().map(|r| r.id),
            Some(id)
        );
    }
}
