use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::trace;

use super::{counter_value, Entry, Expiry, KeyValueStore, StoreError};
use crate::clock::{Clock, SystemClock};

/// TTL store keeping one file per key under a cache directory.
///
/// A key maps to `{dir}/{h[0..2]}/{h[2..4]}/{h}` where `h` is the hex SHA-256
/// of the key. Each file holds a 10-digit expiry timestamp followed by the JSON
/// payload; `9999999999` marks an entry that never expires.
#[derive(Debug, Clone)]
pub struct FileStore<C: Clock = SystemClock> {
    directory: PathBuf,
    clock: C,
}

impl FileStore<SystemClock> {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self::with_clock(directory, SystemClock)
    }
}

impl<C: Clock> FileStore<C> {
    pub fn with_clock(directory: impl Into<PathBuf>, clock: C) -> Self {
        Self { directory: directory.into(), clock }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn path(&self, key: &str) -> PathBuf {
        let hash = hex::encode(Sha256::digest(key.as_bytes()));
        self.directory.join(&hash[0..2]).join(&hash[2..4]).join(&hash)
    }

    /// Read the entry for `key`, deleting the file if it has expired.
    fn read(&self, key: &str) -> Result<Option<Entry>, StoreError> {
        let path = self.path(key);
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(StoreError::Io { path, source }),
        };
        let entry = Entry::decode(key, &contents)?;
        if entry.expires.is_expired(self.clock.now()) {
            self.forget(key)?;
            trace!(key, "evicted expired cache file");
            return Ok(None);
        }
        Ok(Some(entry))
    }

    fn write(&self, key: &str, entry: &Entry) -> Result<(), StoreError> {
        let path = self.path(key);
        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source| StoreError::Io { path, source }
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err(parent))?;
        }
        // Write then rename so a reader never sees a half-written entry.
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, entry.encode()).map_err(io_err(&tmp))?;
        fs::rename(&tmp, &path).map_err(io_err(&path))
    }
}

impl<C: Clock> KeyValueStore for FileStore<C> {
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        self.read(key)?.map(|entry| entry.value(key)).transpose()
    }

    fn put(&self, key: &str, value: Value, minutes: u64) -> Result<(), StoreError> {
        let entry = Entry::new(key, &value, Expiry::after_minutes(self.clock.now(), minutes))?;
        self.write(key, &entry)
    }

    fn forget(&self, key: &str) -> Result<bool, StoreError> {
        let path = self.path(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(source) => Err(StoreError::Io { path, source }),
        }
    }

    fn flush(&self) -> Result<(), StoreError> {
        let dir = match fs::read_dir(&self.directory) {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(source) => {
                return Err(StoreError::Io { path: self.directory.clone(), source })
            }
        };
        for item in dir {
            let item = item.map_err(|source| StoreError::Io {
                path: self.directory.clone(),
                source,
            })?;
            let path = item.path();
            if path.is_dir() {
                fs::remove_dir_all(&path).map_err(|source| StoreError::Io { path, source })?;
            }
        }
        Ok(())
    }

    fn increment(&self, key: &str, delta: i64) -> Result<i64, StoreError> {
        let (current, expires) = match self.read(key)? {
            Some(entry) => (counter_value(&entry.value(key)?), entry.expires),
            None => (0, Expiry::Forever),
        };
        let next = current.saturating_add(delta);
        self.write(key, &Entry::new(key, &Value::from(next), expires)?)?;
        Ok(next)
    }
}
