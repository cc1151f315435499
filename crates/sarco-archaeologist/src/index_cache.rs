//! Optional record of the last known key index.
//!
//! Replay alone decides which key index comes next. When a cache is
//! configured, a replayed index that disagrees with the cached one is
//! surfaced as [`ArchaeologistError::IndexDivergence`] instead of silently
//! rebinding keys.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use sarco_types::KeyIndex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ArchaeologistError, Result};

/// Storage for the next key index.
pub trait KeyIndexCache: Send + Sync {
    /// Last stored index, if any.
    fn load(&self) -> Result<Option<KeyIndex>>;

    /// Store an index. Implementations never lower the stored value.
    fn store(&self, next_key_index: KeyIndex) -> Result<()>;
}

/// Compare a replayed index with the cache and record it on agreement.
pub fn check_and_record(cache: &dyn KeyIndexCache, replayed: KeyIndex) -> Result<()> {
    match cache.load()? {
        Some(cached) if cached != replayed => {
            Err(ArchaeologistError::IndexDivergence { cached, replayed })
        }
        _ => cache.store(replayed),
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheFile {
    next_key_index: KeyIndex,
    updated_at: DateTime<Utc>,
}

/// JSON file holding the next key index.
#[derive(Debug)]
pub struct FileKeyIndexCache {
    path: PathBuf,
    last_written: Mutex<Option<KeyIndex>>,
}

impl FileKeyIndexCache {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            last_written: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl KeyIndexCache for FileKeyIndexCache {
    fn load(&self) -> Result<Option<KeyIndex>> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(ArchaeologistError::Cache(e.to_string())),
        };
        let file: CacheFile =
            serde_json::from_str(&raw).map_err(|e| ArchaeologistError::Cache(e.to_string()))?;
        Ok(Some(file.next_key_index))
    }

    fn store(&self, next_key_index: KeyIndex) -> Result<()> {
        let mut last_written = self.last_written.lock();
        if matches!(*last_written, Some(last) if last >= next_key_index) {
            return Ok(());
        }

        let file = CacheFile {
            next_key_index,
            updated_at: Utc::now(),
        };
        let json = serde_json::to_vec_pretty(&file)
            .map_err(|e| ArchaeologistError::Cache(e.to_string()))?;

        // Write then rename so a crash never leaves a truncated file
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, json).map_err(|e| ArchaeologistError::Cache(e.to_string()))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| ArchaeologistError::Cache(e.to_string()))?;

        debug!(path = %self.path.display(), next_key_index = %next_key_index, "Stored key index");
        *last_written = Some(next_key_index);
        Ok(())
    }
}

/// In-memory cache for tests and ephemeral agents.
#[derive(Debug, Default)]
pub struct InMemoryKeyIndexCache {
    value: Mutex<Option<KeyIndex>>,
}

impl InMemoryKeyIndexCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(next_key_index: KeyIndex) -> Self {
        Self {
            value: Mutex::new(Some(next_key_index)),
        }
    }
}

impl KeyIndexCache for InMemoryKeyIndexCache {
    fn load(&self) -> Result<Option<KeyIndex>> {
        Ok(*self.value.lock())
    }

    fn store(&self, next_key_index: KeyIndex) -> Result<()> {
        let mut value = self.value.lock();
        if value.map_or(true, |current| next_key_index > current) {
            *value = Some(next_key_index);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_cache_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileKeyIndexCache::new(dir.path().join("key_index.json"));

        assert_eq!(cache.load().unwrap(), None);
        cache.store(KeyIndex::new(4)).unwrap();
        assert_eq!(cache.load().unwrap(), Some(KeyIndex::new(4)));

        // A fresh handle on the same file sees the stored value
        let reopened = FileKeyIndexCache::new(cache.path());
        assert_eq!(reopened.load().unwrap(), Some(KeyIndex::new(4)));
    }

    #[test]
    fn test_file_cache_never_lowers() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileKeyIndexCache::new(dir.path().join("key_index.json"));

        cache.store(KeyIndex::new(6)).unwrap();
        cache.store(KeyIndex::new(5)).unwrap();
        assert_eq!(cache.load().unwrap(), Some(KeyIndex::new(6)));
    }

    #[test]
    fn test_file_cache_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("key_index.json");
        std::fs::write(&path, "not json").unwrap();

        let cache = FileKeyIndexCache::new(&path);
        assert!(matches!(cache.load(), Err(ArchaeologistError::Cache(_))));
    }

    #[test]
    fn test_check_and_record() {
        let cache = InMemoryKeyIndexCache::new();
        check_and_record(&cache, KeyIndex::new(3)).unwrap();
        assert_eq!(cache.load().unwrap(), Some(KeyIndex::new(3)));

        check_and_record(&cache, KeyIndex::new(3)).unwrap();

        let err = check_and_record(&cache, KeyIndex::new(2)).unwrap_err();
        assert!(matches!(
            err,
            ArchaeologistError::IndexDivergence { cached, replayed }
                if cached == KeyIndex::new(3) && replayed == KeyIndex::new(2)
        ));
    }
}
