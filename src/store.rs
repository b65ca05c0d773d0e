//! Durable key-value storage for serialized cache blobs.
//!
//! Each cache persists its whole state as one opaque blob under a fixed
//! key; a blob is always read, mutated and written back as a unit.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::Result;

/// Persistent byte storage keyed by string, surviving process restarts.
pub trait KeyValueStore: Send + Sync {
    /// Returns the stored blob, or `None` if the key was never written
    /// or cannot be read.
    fn get_bytes(&self, key: &str) -> Option<Vec<u8>>;

    /// Stores the blob, replacing any previous value for the key.
    fn set_bytes(&self, key: &str, value: &[u8]) -> Result<()>;
}

/// File-backed store: one file per key under a data directory.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn path(&self, key: &str) -> PathBuf {
        // Keys are dotted identifiers like "stats.daily_cache"; keep the
        // file name flat.
        self.dir.join(format!("{}.json", key.replace('/', "_")))
    }
}

impl KeyValueStore for FileStore {
    fn get_bytes(&self, key: &str) -> Option<Vec<u8>> {
        fs::read(self.path(key)).ok()
    }

    fn set_bytes(&self, key: &str, value: &[u8]) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        fs::write(self.path(key), value)?;
        Ok(())
    }
}

/// In-memory store for tests and previews. Not durable.
#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get_bytes(&self, key: &str) -> Option<Vec<u8>> {
        self.values.lock().unwrap().get(key).cloned()
    }

    fn set_bytes(&self, key: &str, value: &[u8]) -> Result<()> {
        self.values
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn file_store_round_trip() {
        let temp = TempDir::new().unwrap();
        let store = FileStore::new(temp.path().to_path_buf());

        assert!(store.get_bytes("stats.daily_cache").is_none());

        store.set_bytes("stats.daily_cache", b"{\"a\":1}").unwrap();
        assert_eq!(
            store.get_bytes("stats.daily_cache").as_deref(),
            Some(b"{\"a\":1}".as_slice())
        );

        store.set_bytes("stats.daily_cache", b"{}").unwrap();
        assert_eq!(
            store.get_bytes("stats.daily_cache").as_deref(),
            Some(b"{}".as_slice())
        );
    }

    #[test]
    fn file_store_creates_missing_directory() {
        let temp = TempDir::new().unwrap();
        let store = FileStore::new(temp.path().join("nested").join("data"));

        store.set_bytes("products.today", b"x").unwrap();
        assert_eq!(store.get_bytes("products.today").as_deref(), Some(b"x".as_slice()));
    }

    #[test]
    fn memory_store_round_trip() {
        let store = MemoryStore::new();
        assert!(store.get_bytes("k").is_none());
        store.set_bytes("k", b"v").unwrap();
        assert_eq!(store.get_bytes("k").as_deref(), Some(b"v".as_slice()));
    }
}
