//! Key/value persistence medium for the client-side store.
//!
//! Values are opaque strings (the store writes JSON). Every backend is
//! synchronous; the store treats any failure as non-fatal.

use rocksdb::{DB, Direction, IteratorMode, Options};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage quota exceeded writing {key}: {needed} bytes over limit {limit}")]
    QuotaExceeded { key: String, needed: usize, limit: usize },
    #[error("invalid storage key: {0:?}")]
    InvalidKey(String),
    #[error("storage backend error: {0}")]
    Backend(String),
}

pub type Result<T> = std::result::Result<T, StorageError>;

pub trait KeyValueStorage: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
    fn keys(&self) -> Result<Vec<String>>;

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .keys()?
            .into_iter()
            .filter(|key| key.starts_with(prefix))
            .collect())
    }
}

/// Map-backed storage with an optional byte quota, mirroring the browser's
/// per-origin storage limit.
#[derive(Default)]
pub struct InMemoryStorage {
    entries: Mutex<BTreeMap<String, String>>,
    quota_bytes: Option<usize>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(quota_bytes: usize) -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
            quota_bytes: Some(quota_bytes),
        }
    }

    fn entries(&self) -> MutexGuard<'_, BTreeMap<String, String>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn used_bytes(&self) -> usize {
        self.entries().iter().map(|(k, v)| k.len() + v.len()).sum()
    }
}

impl KeyValueStorage for InMemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut guard = self.entries();
        if let Some(limit) = self.quota_bytes {
            let others: usize = guard
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(k, v)| k.len() + v.len())
                .sum();
            let needed = others + key.len() + value.len();
            if needed > limit {
                return Err(StorageError::QuotaExceeded {
                    key: key.to_owned(),
                    needed,
                    limit,
                });
            }
        }
        guard.insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.entries().remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        Ok(self.entries().keys().cloned().collect())
    }
}

/// RocksDB-backed storage, one database per data directory. Keys and
/// values are stored as UTF-8 bytes.
pub struct RocksDbStorage {
    db: Arc<DB>,
}

impl RocksDbStorage {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut options = Options::default();
        options.create_if_missing(true);
        let db = DB::open(&options, path.as_ref()).map_err(backend)?;
        debug!(path = %path.as_ref().display(), "opened storage database");
        Ok(Self { db: Arc::new(db) })
    }
}

fn backend(err: rocksdb::Error) -> StorageError {
    StorageError::Backend(err.to_string())
}

fn utf8(raw: Vec<u8>) -> Result<String> {
    String::from_utf8(raw).map_err(|err| StorageError::Backend(err.to_string()))
}

impl KeyValueStorage for RocksDbStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        self.db.get(key.as_bytes()).map_err(backend)?.map(utf8).transpose()
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        if key.is_empty() {
            return Err(StorageError::InvalidKey(key.to_owned()));
        }
        self.db.put(key.as_bytes(), value.as_bytes()).map_err(backend)
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.db.delete(key.as_bytes()).map_err(backend)
    }

    fn keys(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        for item in self.db.iterator(IteratorMode::Start) {
            let (key, _) = item.map_err(backend)?;
            keys.push(utf8(key.to_vec())?);
        }
        Ok(keys)
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mode = IteratorMode::From(prefix.as_bytes(), Direction::Forward);
        for item in self.db.iterator(mode) {
            let (key, _) = item.map_err(backend)?;
            if !key.starts_with(prefix.as_bytes()) {
                break;
            }
            keys.push(utf8(key.to_vec())?);
        }
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_roundtrip_and_prefix() -> anyhow::Result<()> {
        let storage = InMemoryStorage::new();
        storage.set("itservices_customers", "[]")?;
        storage.set("itservices_vendors", "[]")?;
        storage.set("userSettings", "{}")?;

        assert_eq!(storage.get("itservices_customers")?.as_deref(), Some("[]"));
        assert_eq!(storage.keys_with_prefix("itservices_")?.len(), 2);

        storage.remove("itservices_vendors")?;
        assert_eq!(storage.get("itservices_vendors")?, None);
        Ok(())
    }

    #[test]
    fn quota_rejects_oversized_write() -> anyhow::Result<()> {
        let storage = InMemoryStorage::with_quota(16);
        storage.set("a", "12345")?;

        let err = storage.set("b", "0123456789abcdef");
        assert!(matches!(err, Err(StorageError::QuotaExceeded { .. })));
        assert_eq!(storage.get("b")?, None);

        // overwriting an existing key only counts the new value
        storage.set("a", "1234567890")?;
        Ok(())
    }

    #[test]
    fn rocksdb_persists_across_instances() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        {
            let storage = RocksDbStorage::open(dir.path())?;
            storage.set("itservices_customers", r#"[{"id":"c1"}]"#)?;
        }

        let reopened = RocksDbStorage::open(dir.path())?;
        assert_eq!(
            reopened.get("itservices_customers")?.as_deref(),
            Some(r#"[{"id":"c1"}]"#)
        );
        assert_eq!(reopened.keys()?, vec!["itservices_customers".to_owned()]);
        assert_eq!(reopened.get("missing")?, None);
        Ok(())
    }

    #[test]
    fn rocksdb_prefix_scan_and_remove() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let storage = RocksDbStorage::open(dir.path())?;
        storage.set("appState", "{}")?;
        storage.set("itservices_vendors", "[]")?;
        storage.set("itservices_customers", "[]")?;
        storage.set("userSettings", "{}")?;

        assert_eq!(
            storage.keys_with_prefix("itservices_")?,
            vec!["itservices_customers".to_owned(), "itservices_vendors".to_owned()]
        );

        storage.remove("itservices_vendors")?;
        storage.remove("itservices_vendors")?;
        assert_eq!(storage.get("itservices_vendors")?, None);
        assert_eq!(storage.keys_with_prefix("itservices_")?.len(), 1);
        assert!(matches!(storage.set("", "x"), Err(StorageError::InvalidKey(_))));
        Ok(())
    }
}
