//! Best-effort TTL cache on top of a persistent key/value backend.
//!
//! Every entry is stored as JSON `{ "data": ..., "expiry": <unix ms> }` under a
//! namespaced key. Reads never fail: an expired or unreadable entry is deleted
//! and reported as a miss. Writes never fail either: on quota pressure the
//! store prunes once and retries once, then gives up quietly.

pub mod backend;
pub mod sqlite;

pub use backend::{KvBackend, KvError, MemoryBackend};
pub use sqlite::SqliteBackend;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

const KEY_PREFIX: &str = "mb_cache:";

#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry {
    data: Value,
    expiry: i64,
}

#[derive(Clone)]
pub struct CacheStore {
    backend: Arc<dyn KvBackend>,
}

impl CacheStore {
    pub fn new(backend: Arc<dyn KvBackend>) -> Self {
        Self { backend }
    }

    /// A store on a fresh, unbounded in-memory backend.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()))
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.get_at(key, now_unix_ms())
    }

    pub fn put(&self, key: &str, value: &Value, ttl: Duration) {
        self.put_at(key, value, ttl, now_unix_ms())
    }

    pub fn get_at(&self, key: &str, now_ms: i64) -> Option<Value> {
        let full = storage_key(key);
        let raw = match self.backend.get(&full) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(key, error = %e, "cache read failed");
                return None;
            }
        };

        match serde_json::from_str::<CacheEntry>(&raw) {
            Ok(entry) if now_ms <= entry.expiry => {
                tracing::debug!(key, "cache hit");
                Some(entry.data)
            }
            Ok(_) => {
                tracing::debug!(key, "cache entry expired");
                self.remove(&full);
                None
            }
            Err(e) => {
                tracing::debug!(key, error = %e, "dropping unreadable cache entry");
                self.remove(&full);
                None
            }
        }
    }

    pub fn put_at(&self, key: &str, value: &Value, ttl: Duration, now_ms: i64) {
        let entry = CacheEntry {
            data: value.clone(),
            expiry: now_ms.saturating_add(ttl.as_millis().min(i64::MAX as u128) as i64),
        };
        let raw = match serde_json::to_string(&entry) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(key, error = %e, "cache entry not serializable");
                return;
            }
        };
        let full = storage_key(key);

        match self.backend.set(&full, &raw) {
            Ok(()) => {}
            Err(KvError::QuotaExceeded) => {
                let removed = self.prune_at(now_ms);
                tracing::debug!(key, removed, "cache quota hit, pruned");
                if let Err(e) = self.backend.set(&full, &raw) {
                    tracing::warn!(key, error = %e, "cache write dropped after prune");
                }
            }
            Err(e) => {
                tracing::warn!(key, error = %e, "cache write dropped");
            }
        }
    }

    /// Remove every expired or unparsable entry. Returns how many were removed.
    pub fn prune(&self) -> usize {
        self.prune_at(now_unix_ms())
    }

    pub fn prune_at(&self, now_ms: i64) -> usize {
        let keys = match self.backend.keys() {
            Ok(keys) => keys,
            Err(e) => {
                tracing::warn!(error = %e, "cache prune could not list keys");
                return 0;
            }
        };

        let mut removed = 0;
        for key in keys.iter().filter(|k| k.starts_with(KEY_PREFIX)) {
            let stale = match self.backend.get(key) {
                Ok(Some(raw)) => match serde_json::from_str::<CacheEntry>(&raw) {
                    Ok(entry) => now_ms > entry.expiry,
                    Err(_) => true,
                },
                Ok(None) => false,
                Err(_) => true,
            };
            if stale && self.backend.delete(key).is_ok() {
                removed += 1;
            }
        }
        removed
    }

    /// Drop every cache entry regardless of expiry.
    pub fn clear(&self) -> usize {
        let keys = self.backend.keys().unwrap_or_default();
        keys.iter()
            .filter(|k| k.starts_with(KEY_PREFIX))
            .filter(|k| self.backend.delete(k).is_ok())
            .count()
    }

    fn remove(&self, full_key: &str) {
        if let Err(e) = self.backend.delete(full_key) {
            tracing::warn!(key = full_key, error = %e, "cache delete failed");
        }
    }
}

fn storage_key(key: &str) -> String {
    format!("{KEY_PREFIX}{key}")
}

pub fn now_unix_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
