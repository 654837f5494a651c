//! Key-value store backing the persistence mirror
//!
//! Values are opaque strings. `FileStore` keeps one file per key and writes
//! through a temporary file so a crash never leaves a truncated value.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::{CollectorError, CollectorResult};

/// Maximum key length
const MAX_KEY_LENGTH: usize = 128;

/// Synchronous string key-value store
pub trait KeyValueStore: Send + Sync {
    /// Read the value under `key`, `None` when unset
    fn get(&self, key: &str) -> CollectorResult<Option<String>>;

    /// Overwrite the value under `key`
    fn set(&self, key: &str, value: &str) -> CollectorResult<()>;

    /// Remove `key`; removing an unset key is not an error
    fn remove(&self, key: &str) -> CollectorResult<()>;
}

/// Validate a storage key
///
/// Keys become file names, so only `[A-Za-z0-9_-]` is accepted.
fn validate_key(key: &str) -> CollectorResult<()> {
    if key.is_empty() || key.len() > MAX_KEY_LENGTH {
        return Err(CollectorError::invalid_config(format!(
            "Storage key must be 1-{} characters",
            MAX_KEY_LENGTH
        )));
    }

    if !key
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(CollectorError::invalid_config(format!(
            "Invalid storage key: {}",
            key
        )));
    }

    Ok(())
}

/// Directory-backed store, one `<key>.json` file per key
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory the values live in
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> CollectorResult<PathBuf> {
        validate_key(key)?;
        Ok(self.dir.join(format!("{}.json", key)))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> CollectorResult<Option<String>> {
        match std::fs::read_to_string(self.path_for(key)?) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> CollectorResult<()> {
        let path = self.path_for(key)?;
        std::fs::create_dir_all(&self.dir)?;

        let tmp = self.dir.join(format!(".{}.json.tmp", key));
        std::fs::write(&tmp, value)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> CollectorResult<()> {
        match std::fs::remove_file(self.path_for(key)?) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory store for tests
///
/// Writes can be made to fail to exercise storage error paths.
#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
    failing: Mutex<bool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every `set` until `set_failing(false)`
    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock().unwrap() = failing;
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> CollectorResult<Option<String>> {
        Ok(self.values.lock().unwrap().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> CollectorResult<()> {
        if *self.failing.lock().unwrap() {
            return Err(std::io::Error::other("quota exceeded").into());
        }
        self.values
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> CollectorResult<()> {
        self.values.lock().unwrap().remove(key);
        Ok(())
    }
}
