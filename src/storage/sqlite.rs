use crate::storage::backend::{KvBackend, KvError};
use anyhow::Context;
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// SQLite-backed key/value table used as the durable cache medium.
pub struct SqliteBackend {
    conn: Mutex<Connection>,
    max_bytes: Option<u64>,
}

impl SqliteBackend {
    pub fn open(path: &Path, max_bytes: Option<u64>) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create dir {}", parent.display()))?;
        }

        let conn = Connection::open(path).with_context(|| format!("open {}", path.display()))?;
        Self::from_connection(conn, max_bytes)
    }

    pub fn open_in_memory(max_bytes: Option<u64>) -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory().context("open in-memory sqlite")?;
        Self::from_connection(conn, max_bytes)
    }

    fn from_connection(conn: Connection, max_bytes: Option<u64>) -> anyhow::Result<Self> {
        conn.execute_batch(
            r#"
CREATE TABLE IF NOT EXISTS kv_cache (
  key TEXT PRIMARY KEY,
  value TEXT NOT NULL
);
"#,
        )
        .context("init schema")?;
        Ok(Self {
            conn: Mutex::new(conn),
            max_bytes,
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl KvBackend for SqliteBackend {
    fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        let conn = self.conn();
        let value = conn
            .query_row(
                "SELECT value FROM kv_cache WHERE key=?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), KvError> {
        let conn = self.conn();
        if let Some(max) = self.max_bytes {
            let used: i64 = conn.query_row(
                "SELECT COALESCE(SUM(length(CAST(value AS BLOB))), 0) FROM kv_cache WHERE key != ?1",
                params![key],
                |row| row.get(0),
            )?;
            if used as u64 + value.len() as u64 > max {
                return Err(KvError::QuotaExceeded);
            }
        }
        conn.execute(
            r#"
INSERT INTO kv_cache(key, value)
VALUES(?1, ?2)
ON CONFLICT(key) DO UPDATE SET
  value=excluded.value
"#,
            params![key, value],
        )?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), KvError> {
        self.conn()
            .execute("DELETE FROM kv_cache WHERE key=?1", params![key])?;
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, KvError> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT key FROM kv_cache")?;
        let keys = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("cache.sqlite3");
        {
            let db = SqliteBackend::open(&path, None).unwrap();
            db.set("a", "1").unwrap();
            db.set("a", "2").unwrap();
            db.set("b", "3").unwrap();
        }
        let db = SqliteBackend::open(&path, None).unwrap();
        assert_eq!(db.get("a").unwrap().as_deref(), Some("2"));
        let mut keys = db.keys().unwrap();
        keys.sort();
        assert_eq!(keys, vec!["a".to_string(), "b".to_string()]);
        db.delete("a").unwrap();
        assert_eq!(db.get("a").unwrap(), None);
    }

    #[test]
    fn test_quota() {
        let db = SqliteBackend::open_in_memory(Some(8)).unwrap();
        db.set("a", "12345").unwrap();
        assert!(matches!(db.set("b", "12345"), Err(KvError::QuotaExceeded)));
        // replacing a key does not count its old value
        db.set("a", "12345678").unwrap();
    }

    #[test]
    fn test_quota_counts_utf8_bytes() {
        let db = SqliteBackend::open_in_memory(Some(12)).unwrap();
        // four CJK chars, three bytes each
        db.set("a", "歌词歌词").unwrap();
        assert!(matches!(db.set("b", "歌词"), Err(KvError::QuotaExceeded)));
        assert_eq!(db.get("b").unwrap(), None);
    }
}
