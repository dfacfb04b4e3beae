use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Row already exists for user {user_id} and vendor {vendor_id}")]
    Conflict { user_id: String, vendor_id: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// A saved-vendor row as stored on disk
///
/// `vendor_id` and `vendor_data` are opaque JSON text; the core decides
/// what key and payload types go in there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedRow {
    pub id: String,
    pub user_id: String,
    pub vendor_id: String,
    pub vendor_data: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecentRow {
    pub vendor_id: String,
    pub vendor_data: Option<String>,
    pub viewed_at: DateTime<Utc>,
}

/// Embedded SQLite store
///
/// `saved_items` carries the same UNIQUE(user_id, vendor_id) rule as the
/// hosted table.
pub struct LocalStore {
    conn: Mutex<Connection>,
}

impl LocalStore {
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        if let Some(parent) = db_path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(db_path)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        // Initialize schema on first run
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS saved_items (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                vendor_id TEXT NOT NULL,
                vendor_data TEXT,
                created_at INTEGER NOT NULL,
                UNIQUE(user_id, vendor_id)
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS recently_viewed (
                user_id TEXT NOT NULL,
                vendor_id TEXT NOT NULL,
                vendor_data TEXT,
                viewed_at INTEGER NOT NULL,
                PRIMARY KEY(user_id, vendor_id)
            )",
            [],
        )?;

        Ok(())
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// All saved rows for a user, newest first
    ///
    /// Rows saved without display fields borrow them from the user's
    /// recently viewed entry for the same vendor, if there is one.
    pub fn select_saved(&self, user_id: &str) -> Result<Vec<SavedRow>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT s.id, s.user_id, s.vendor_id,
                    COALESCE(s.vendor_data, r.vendor_data), s.created_at
             FROM saved_items s
             LEFT JOIN recently_viewed r
                 ON r.user_id = s.user_id AND r.vendor_id = s.vendor_id
             WHERE s.user_id = ?1
             ORDER BY s.created_at DESC, s.rowid DESC",
        )?;

        let rows = stmt
            .query_map(params![user_id], |row| {
                Ok(SavedRow {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    vendor_id: row.get(2)?,
                    vendor_data: row.get(3)?,
                    created_at: from_millis(row.get(4)?),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        debug!("Loaded {} saved rows for {}", rows.len(), user_id);
        Ok(rows)
    }

    pub fn find_saved(&self, user_id: &str, vendor_id: &str) -> Result<Option<SavedRow>> {
        let conn = self.conn();
        let row = conn
            .query_row(
                "SELECT id, user_id, vendor_id, vendor_data, created_at
                 FROM saved_items WHERE user_id = ?1 AND vendor_id = ?2",
                params![user_id, vendor_id],
                |row| {
                    Ok(SavedRow {
                        id: row.get(0)?,
                        user_id: row.get(1)?,
                        vendor_id: row.get(2)?,
                        vendor_data: row.get(3)?,
                        created_at: from_millis(row.get(4)?),
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    /// Insert a saved row; a second row for the same pair is a conflict
    pub fn insert_saved(
        &self,
        user_id: &str,
        vendor_id: &str,
        vendor_data: Option<&str>,
    ) -> Result<SavedRow> {
        let row = SavedRow {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            vendor_id: vendor_id.to_string(),
            vendor_data: vendor_data.map(str::to_string),
            created_at: Utc::now(),
        };

        let result = self.conn().execute(
            "INSERT INTO saved_items (id, user_id, vendor_id, vendor_data, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                row.id,
                row.user_id,
                row.vendor_id,
                row.vendor_data,
                row.created_at.timestamp_millis()
            ],
        );

        match result {
            Ok(_) => Ok(row),
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                Err(StoreError::Conflict {
                    user_id: user_id.to_string(),
                    vendor_id: vendor_id.to_string(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Returns whether a row was actually removed
    pub fn delete_saved(&self, user_id: &str, vendor_id: &str) -> Result<bool> {
        let removed = self.conn().execute(
            "DELETE FROM saved_items WHERE user_id = ?1 AND vendor_id = ?2",
            params![user_id, vendor_id],
        )?;
        Ok(removed > 0)
    }

    /// Put a vendor at the front of the user's recently viewed list,
    /// dropping whatever falls off the end past `limit`
    pub fn record_view(
        &self,
        user_id: &str,
        vendor_id: &str,
        vendor_data: Option<&str>,
        limit: usize,
    ) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        // REPLACE re-inserts, so the rowid also moves to the front
        tx.execute(
            "INSERT OR REPLACE INTO recently_viewed (user_id, vendor_id, vendor_data, viewed_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![user_id, vendor_id, vendor_data, Utc::now().timestamp_millis()],
        )?;

        tx.execute(
            "DELETE FROM recently_viewed
             WHERE user_id = ?1 AND vendor_id NOT IN (
                 SELECT vendor_id FROM recently_viewed
                 WHERE user_id = ?1
                 ORDER BY viewed_at DESC, rowid DESC
                 LIMIT ?2
             )",
            params![user_id, limit as i64],
        )?;

        tx.commit()?;
        Ok(())
    }

    pub fn recent_views(&self, user_id: &str, limit: usize) -> Result<Vec<RecentRow>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT vendor_id, vendor_data, viewed_at
             FROM recently_viewed
             WHERE user_id = ?1
             ORDER BY viewed_at DESC, rowid DESC
             LIMIT ?2",
        )?;

        let rows = stmt
            .query_map(params![user_id, limit as i64], |row| {
                Ok(RecentRow {
                    vendor_id: row.get(0)?,
                    vendor_data: row.get(1)?,
                    viewed_at: from_millis(row.get(2)?),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn clear_recent(&self, user_id: &str) -> Result<usize> {
        let removed = self.conn().execute(
            "DELETE FROM recently_viewed WHERE user_id = ?1",
            params![user_id],
        )?;
        Ok(removed)
    }
}

fn from_millis(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or_else(Utc::now)
}
