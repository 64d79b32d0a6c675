//! Durable key/value storage for wizard snapshots.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result};

use crate::config::{Config, StorageBackend};

/// Backing store for persisted session envelopes, keyed by flow namespace
pub trait SessionStorage: Send + Sync {
    fn load(&self, key: &str) -> Result<Option<String>>;

    fn save(&self, key: &str, value: &str) -> Result<()>;

    fn remove(&self, key: &str) -> Result<()>;
}

/// Build the storage backend selected in config
pub fn from_config(config: &Config) -> Arc<dyn SessionStorage> {
    match config.storage.backend {
        StorageBackend::File => Arc::new(FileStorage::new(config.state_path())),
        StorageBackend::Memory => Arc::new(MemoryStorage::new()),
    }
}

/// One `<key>.json` file per flow under a state directory
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn file_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

impl SessionStorage for FileStorage {
    fn load(&self, key: &str) -> Result<Option<String>> {
        let path = self.file_for(key);
        if !path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read session file {}", path.display()))?;
        Ok(Some(contents))
    }

    fn save(&self, key: &str, value: &str) -> Result<()> {
        fs::create_dir_all(self.dir()).context("Failed to create state directory")?;
        let path = self.file_for(key);
        // atomic replace
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, value).context("Failed to write session file")?;
        fs::rename(&tmp, &path).context("Failed to replace session file")?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let path = self.file_for(key);
        if path.exists() {
            fs::remove_file(&path).context("Failed to remove session file")?;
        }
        Ok(())
    }
}

/// Process-local storage. Clones share the same map, so a clone survives a
/// simulated restart of the session that wrote it.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}

impl SessionStorage for MemoryStorage {
    fn load(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries().get(key).cloned())
    }

    fn save(&self, key: &str, value: &str) -> Result<()> {
        self.entries().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.entries().remove(key);
        Ok(())
    }
}
