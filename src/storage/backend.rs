use std::collections::BTreeMap;
use std::sync::Mutex;

/// Failure modes of a persistent key/value capability.
#[derive(Debug, thiserror::Error)]
pub enum KvError {
    #[error("storage quota exceeded")]
    QuotaExceeded,
    #[error("storage backend: {0}")]
    Backend(String),
}

impl From<rusqlite::Error> for KvError {
    fn from(e: rusqlite::Error) -> Self {
        match e.sqlite_error_code() {
            Some(rusqlite::ErrorCode::DiskFull) => KvError::QuotaExceeded,
            _ => KvError::Backend(e.to_string()),
        }
    }
}

/// Durable, string-keyed storage the cache sits on.
///
/// Implementations must be cheap to call from async code; every method is
/// expected to complete without awaiting anything.
pub trait KvBackend: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, KvError>;
    fn set(&self, key: &str, value: &str) -> Result<(), KvError>;
    fn delete(&self, key: &str) -> Result<(), KvError>;
    /// Every key currently stored, in no particular order.
    fn keys(&self) -> Result<Vec<String>, KvError>;
}

/// In-process backend, optionally bounded by the total size of stored values.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: Mutex<BTreeMap<String, String>>,
    max_bytes: Option<usize>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// A backend that refuses writes once `max_bytes` of values are held.
    pub fn with_quota(max_bytes: usize) -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
            max_bytes: Some(max_bytes),
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, String>> {
        // A poisoned map is still a valid map.
        self.entries.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl KvBackend for MemoryBackend {
    fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        Ok(self.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), KvError> {
        let mut map = self.lock();
        if let Some(max) = self.max_bytes {
            let used: usize = map
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(_, v)| v.len())
                .sum();
            if used + value.len() > max {
                return Err(KvError::QuotaExceeded);
            }
        }
        map.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), KvError> {
        self.lock().remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, KvError> {
        Ok(self.lock().keys().cloned().collect())
    }
}
