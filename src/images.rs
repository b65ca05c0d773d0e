//! Locally captured product photos, keyed by product time.
//!
//! When a photo is taken before the backend has confirmed the product,
//! it is held under a temporary locally generated time and later moved
//! to the server-assigned one.

use std::fs;
use std::path::PathBuf;

use anyhow::Result;
use tracing::warn;

/// Local photo storage with rename-based reconciliation.
pub trait ImageStore: Send + Sync {
    /// Reassigns the photo stored under `from` to `to`. The photo ceases
    /// to exist under its old key. Returns false when the source is
    /// missing or the move fails; never panics.
    fn move_resource(&self, from: i64, to: i64) -> bool;
}

/// File-backed photo store: one JPEG per key under a media directory.
pub struct FileImageStore {
    dir: PathBuf,
}

impl FileImageStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn path(&self, key: i64) -> PathBuf {
        self.dir.join(format!("{key}.jpg"))
    }

    /// Stores raw photo bytes under the given key.
    pub fn save(&self, key: i64, bytes: &[u8]) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        fs::write(self.path(key), bytes)?;
        Ok(())
    }

    pub fn exists(&self, key: i64) -> bool {
        self.path(key).exists()
    }
}

impl ImageStore for FileImageStore {
    fn move_resource(&self, from: i64, to: i64) -> bool {
        let source = self.path(from);
        if !source.exists() {
            return false;
        }
        match fs::rename(&source, self.path(to)) {
            Ok(()) => true,
            Err(e) => {
                warn!("failed to move photo {from} -> {to}: {e}");
                false
            }
        }
    }
}
