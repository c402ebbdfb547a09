//! String-keyed persistent storage for encrypted blobs.
//!
//! The backend is deliberately dumb: opaque strings in, opaque strings out.
//! It is assumed to be readable by anyone with filesystem access, which is
//! why every value written through it is already encrypted.

use anyhow::{Context, Result};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::Mutex;

/// Key-value storage addressed by string keys.
///
/// Implementations must tolerate concurrent access from multiple threads.
pub trait StorageBackend: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn put(&self, key: &str, value: &str) -> Result<()>;
    fn delete(&self, key: &str) -> Result<()>;
}

/// SQLite-backed key-value store.
///
/// # Schema
/// ```sql
/// CREATE TABLE kv (
///     key TEXT PRIMARY KEY,
///     value TEXT NOT NULL
/// );
/// ```
///
/// # Thread Safety
/// - Connection is wrapped in Mutex for safe concurrent access
/// - SQLite itself is thread-safe with serialized mode
pub struct SqliteBackend {
    conn: Mutex<Connection>,
}

impl SqliteBackend {
    /// Creates or opens a store at the given path.
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path).context("Failed to open database")?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS kv (key TEXT PRIMARY KEY, value TEXT NOT NULL)",
            [],
        )
        .context("Failed to create kv table")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Opens an in-memory store (useful for tests).
    pub fn in_memory() -> Result<Self> {
        Self::open(":memory:")
    }
}

impl StorageBackend for SqliteBackend {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT value FROM kv WHERE key = ?1")
            .context("Failed to prepare query")?;

        let mut rows = stmt.query(params![key]).context("Failed to execute query")?;

        match rows.next().context("Failed to read row")? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    fn put(&self, key: &str, value: &str) -> Result<()> {
        self.conn
            .lock()
            .unwrap()
            .execute(
                r#"
                INSERT INTO kv (key, value) VALUES (?1, ?2)
                ON CONFLICT(key) DO UPDATE SET value = excluded.value
                "#,
                params![key, value],
            )
            .context("Failed to store value")?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.conn
            .lock()
            .unwrap()
            .execute("DELETE FROM kv WHERE key = ?1", params![key])
            .context("Failed to delete value")?;
        Ok(())
    }
}
