//! Key-value persistence for provider health and preference state.
//!
//! The orchestrator stores small JSON blobs under fixed keys. Hosts plug in
//! whatever backing store they have; [`InMemoryStorage`] and
//! [`JsonFileStorage`] cover tests and simple deployments.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use log::{debug, warn};
use thiserror::Error;

/// Key holding the serialized provider health records.
pub const PROVIDER_HEALTH_KEY: &str = "market_feed.provider_health";

/// Key holding the persisted provider preference.
pub const PROVIDER_PREFERENCE_KEY: &str = "market_feed.provider_preference";

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Storage serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// String key-value store.
pub trait Storage: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// Process-local storage, lost on exit.
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    entries: Mutex<BTreeMap<String, String>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_entries(&self) -> MutexGuard<'_, BTreeMap<String, String>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Storage for InMemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.lock_entries().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.lock_entries()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.lock_entries().remove(key);
        Ok(())
    }
}

/// Storage backed by a single JSON object file.
///
/// Every write rewrites the whole file through a temporary sibling and a
/// rename, so a crash never leaves a half-written document behind.
#[derive(Debug)]
pub struct JsonFileStorage {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<BTreeMap<String, String>, StorageError> {
        match fs::read_to_string(&self.path) {
            Ok(contents) if contents.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(contents) => Ok(serde_json::from_str(&contents)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn write_all(&self, entries: &BTreeMap<String, String>) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(entries)?)?;
        fs::rename(&tmp, &self.path)?;
        debug!("Wrote {} keys to {}", entries.len(), self.path.display());
        Ok(())
    }

    fn with_lock<T>(
        &self,
        f: impl FnOnce() -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        let _guard = self.lock.lock().unwrap_or_else(|poisoned| {
            warn!("JSON storage mutex was poisoned, recovering");
            poisoned.into_inner()
        });
        f()
    }
}

impl Storage for JsonFileStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.with_lock(|| Ok(self.read_all()?.remove(key)))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.with_lock(|| {
            let mut entries = self.read_all()?;
            entries.insert(key.to_string(), value.to_string());
            self.write_all(&entries)
        })
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.with_lock(|| {
            let mut entries = self.read_all()?;
            if entries.remove(key).is_some() {
                self.write_all(&entries)?;
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_round_trip() {
        let storage = InMemoryStorage::new();
        assert_eq!(storage.get(PROVIDER_PREFERENCE_KEY).unwrap(), None);

        storage.set(PROVIDER_PREFERENCE_KEY, "\"ALPHA\"").unwrap();
        assert_eq!(
            storage.get(PROVIDER_PREFERENCE_KEY).unwrap().as_deref(),
            Some("\"ALPHA\"")
        );

        storage.remove(PROVIDER_PREFERENCE_KEY).unwrap();
        assert_eq!(storage.get(PROVIDER_PREFERENCE_KEY).unwrap(), None);
    }

    #[test]
    fn test_json_file_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("feed.json");

        let storage = JsonFileStorage::new(&path);
        storage.set(PROVIDER_HEALTH_KEY, "[]").unwrap();
        storage.set(PROVIDER_PREFERENCE_KEY, "\"auto\"").unwrap();
        drop(storage);

        let reopened = JsonFileStorage::new(&path);
        assert_eq!(
            reopened.get(PROVIDER_HEALTH_KEY).unwrap().as_deref(),
            Some("[]")
        );
        reopened.remove(PROVIDER_HEALTH_KEY).unwrap();
        assert_eq!(reopened.get(PROVIDER_HEALTH_KEY).unwrap(), None);
        assert!(reopened.get(PROVIDER_PREFERENCE_KEY).unwrap().is_some());
    }

    #[test]
    fn test_json_file_rejects_corrupt_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feed.json");
        fs::write(&path, "not json").unwrap();

        let storage = JsonFileStorage::new(&path);
        assert!(matches!(
            storage.get(PROVIDER_HEALTH_KEY),
            Err(StorageError::Serialization(_))
        ));
    }
}
