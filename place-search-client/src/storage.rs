use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use crate::error::Error;

/// Durable string key-value storage consumed by the cache and the optimizer.
///
/// Implementations may be backed by genuinely async storage; in-process
/// implementations simply resolve immediately.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, Error>;
    async fn set(&self, key: &str, value: &str) -> Result<(), Error>;
    async fn remove(&self, key: &str) -> Result<(), Error>;
    async fn keys(&self) -> Result<Vec<String>, Error>;
    async fn count(&self) -> Result<usize, Error>;
}

/// In-process store. The default backing tier, and the test double.
#[derive(Debug, Default)]
pub struct MemoryKeyValueStore {
    entries: DashMap<String, String>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>, Error> {
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), Error> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), Error> {
        self.entries.remove(key);
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, Error> {
        Ok(self.entries.iter().map(|entry| entry.key().clone()).collect())
    }

    async fn count(&self) -> Result<usize, Error> {
        Ok(self.entries.len())
    }
}

/// File-backed store: one JSON object, rewritten on every mutation.
///
/// Survives process restarts, which is what keeps optimizer metrics and the
/// durable cache tier meaningful across runs.
pub struct JsonFileStore {
    path: PathBuf,
    entries: Mutex<HashMap<String, String>>,
}

impl JsonFileStore {
    /// Opens the store, loading any existing snapshot. A missing file starts
    /// empty; an unreadable or corrupt one is logged and treated as empty.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match std::fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<HashMap<String, String>>(&raw) {
                Ok(entries) => entries,
                Err(e) => {
                    log::warn!("discarding corrupt store file {}: {}", path.display(), e);
                    HashMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => {
                log::warn!("could not read store file {}: {}", path.display(), e);
                HashMap::new()
            }
        };

        Self {
            path,
            entries: Mutex::new(entries),
        }
    }

    fn persist(&self, entries: &HashMap<String, String>) -> Result<(), Error> {
        let raw = serde_json::to_string(entries).map_err(|e| Error::storage(e.to_string()))?;
        std::fs::write(&self.path, raw).map_err(|e| Error::storage(e.to_string()))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        // A poisoned lock only means another writer panicked mid-mutation;
        // the map itself is still a usable string map.
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl KeyValueStore for JsonFileStore {
    async fn get(&self, key: &str) -> Result<Option<String>, Error> {
        Ok(self.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), Error> {
        let mut entries = self.lock();
        entries.insert(key.to_string(), value.to_string());
        self.persist(&entries)
    }

    async fn remove(&self, key: &str) -> Result<(), Error> {
        let mut entries = self.lock();
        if entries.remove(key).is_some() {
            self.persist(&entries)?;
        }
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, Error> {
        Ok(self.lock().keys().cloned().collect())
    }

    async fn count(&self) -> Result<usize, Error> {
        Ok(self.lock().len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempdir::TempDir;

    #[tokio::test]
    async fn memory_store_round_trips() {
        let store = MemoryKeyValueStore::new();

        store.set("a", "1").await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), Some("1".to_string()));
        assert_eq!(store.count().await.unwrap(), 1);

        store.remove("a").await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), None);
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn file_store_survives_reopen() {
        let dir = TempDir::new("place-search-store").unwrap();
        let path = dir.path().join("kv.json");

        {
            let store = JsonFileStore::open(&path);
            store.set("geocode_abc", "{\"lat\":1.0}").await.unwrap();
        }

        let reopened = JsonFileStore::open(&path);
        assert_eq!(
            reopened.get("geocode_abc").await.unwrap(),
            Some("{\"lat\":1.0}".to_string())
        );
    }

    #[tokio::test]
    async fn corrupt_file_starts_empty() {
        let dir = TempDir::new("place-search-store").unwrap();
        let path = dir.path().join("kv.json");
        std::fs::write(&path, "not json at all").unwrap();

        let store = JsonFileStore::open(&path);
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn remove_of_absent_key_is_a_no_op() {
        let dir = TempDir::new("place-search-store").unwrap();
        let store = JsonFileStore::open(dir.path().join("kv.json"));
        store.remove("missing").await.unwrap();
        assert_eq!(store.count().await.unwrap(), 0);
    }
}
