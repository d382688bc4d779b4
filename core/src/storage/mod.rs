//! Expiring key/value storage.
//!
//! # Design
//! `KeyValueStore` is the seam `ApiClient` persists cookies through. Values are
//! `serde_json::Value`s, serialized to text inside the store so that a damaged
//! payload is detected on read and reported as `StoreError::Corrupted` rather
//! than being mistaken for a miss.
//!
//! Expiry is an explicit `Expiry::{At, Forever}`. Reads evict entries that
//! have expired (`now >= at`) before reporting the miss; there is no
//! background sweeper.
//!
//! Two implementations ship with the crate: `MemoryStore` for a single process
//! and `FileStore`, which keeps one file per key so cookies survive restarts.

mod file;
mod memory;

use std::path::PathBuf;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

pub use file::FileStore;
pub use memory::MemoryStore;

/// Largest timestamp representable in the fixed-width on-disk prefix. Also the
/// on-disk spelling of `Expiry::Forever`.
pub const FOREVER_TIMESTAMP: u64 = 9_999_999_999;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cache entry \"{key}\" is corrupted: {reason}")]
    Corrupted { key: String, reason: String },

    #[error("failed to serialize cache entry \"{key}\": {source}")]
    Serialize {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("cache I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("operation \"{0}\" is not supported by this store")]
    Unsupported(&'static str),
}

/// When an entry stops being visible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    /// Unix timestamp in seconds. The entry is gone once `now >= at`.
    At(u64),
    Forever,
}

impl Expiry {
    /// Expiry for a TTL given in minutes; `0` means forever. Results that would
    /// not fit the on-disk format collapse to `Forever`.
    pub fn after_minutes(now: u64, minutes: u64) -> Self {
        if minutes == 0 {
            return Expiry::Forever;
        }
        match minutes.checked_mul(60).and_then(|secs| now.checked_add(secs)) {
            Some(at) if at < FOREVER_TIMESTAMP => Expiry::At(at),
            _ => Expiry::Forever,
        }
    }

    pub fn is_expired(self, now: u64) -> bool {
        match self {
            Expiry::At(at) => now >= at,
            Expiry::Forever => false,
        }
    }

    /// Time left before expiry; `None` for `Forever`.
    pub fn remaining(self, now: u64) -> Option<Duration> {
        match self {
            Expiry::At(at) => Some(Duration::from_secs(at.saturating_sub(now))),
            Expiry::Forever => None,
        }
    }

    fn timestamp(self) -> u64 {
        match self {
            Expiry::At(at) => at,
            Expiry::Forever => FOREVER_TIMESTAMP,
        }
    }

    fn from_timestamp(timestamp: u64) -> Self {
        if timestamp >= FOREVER_TIMESTAMP {
            Expiry::Forever
        } else {
            Expiry::At(timestamp)
        }
    }
}

/// A stored value with its expiry. The payload is JSON text.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Entry {
    expires: Expiry,
    payload: String,
}

impl Entry {
    const PREFIX_LEN: usize = 10;

    fn new(key: &str, value: &Value, expires: Expiry) -> Result<Self, StoreError> {
        let payload = serde_json::to_string(value).map_err(|source| StoreError::Serialize {
            key: key.to_string(),
            source,
        })?;
        Ok(Self { expires, payload })
    }

    fn value(&self, key: &str) -> Result<Value, StoreError> {
        serde_json::from_str(&self.payload).map_err(|e| StoreError::Corrupted {
            key: key.to_string(),
            reason: e.to_string(),
        })
    }

    /// `0000000000`-style expiry prefix followed by the payload.
    fn encode(&self) -> String {
        format!("{:010}{}", self.expires.timestamp(), self.payload)
    }

    fn decode(key: &str, contents: &str) -> Result<Self, StoreError> {
        let corrupted = |reason: &str| StoreError::Corrupted {
            key: key.to_string(),
            reason: reason.to_string(),
        };
        let prefix = contents
            .get(..Self::PREFIX_LEN)
            .ok_or_else(|| corrupted("missing expiry prefix"))?;
        if !prefix.bytes().all(|b| b.is_ascii_digit()) {
            return Err(corrupted("expiry prefix is not numeric"));
        }
        let timestamp: u64 = prefix.parse().map_err(|_| corrupted("expiry prefix is not numeric"))?;
        Ok(Self {
            expires: Expiry::from_timestamp(timestamp),
            payload: contents[Self::PREFIX_LEN..].to_string(),
        })
    }
}

/// Integer view of a stored value. Anything non-numeric counts as zero.
fn counter_value(value: &Value) -> i64 {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)).unwrap_or(0),
        Value::String(s) => s.trim().parse().unwrap_or(0),
        Value::Bool(b) => i64::from(*b),
        _ => 0,
    }
}

/// Expiring key/value storage used to persist cookies and memoize values.
pub trait KeyValueStore: Send + Sync {
    /// Stored value if present and unexpired. Expired entries are removed.
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;

    /// Store `value` for `minutes`; `0` stores it forever.
    fn put(&self, key: &str, value: Value, minutes: u64) -> Result<(), StoreError>;

    /// Remove `key`, reporting whether anything was there.
    fn forget(&self, key: &str) -> Result<bool, StoreError>;

    fn flush(&self) -> Result<(), StoreError>;

    fn get_or(&self, key: &str, default: Value) -> Result<Value, StoreError> {
        Ok(self.get(key)?.unwrap_or(default))
    }

    fn forever(&self, key: &str, value: Value) -> Result<(), StoreError> {
        self.put(key, value, 0)
    }

    /// Add `delta` to the integer stored under `key`, keeping its expiry.
    fn increment(&self, _key: &str, _delta: i64) -> Result<i64, StoreError> {
        Err(StoreError::Unsupported("increment"))
    }

    fn decrement(&self, key: &str, delta: i64) -> Result<i64, StoreError> {
        self.increment(key, delta.saturating_neg())
    }
}

impl dyn KeyValueStore {
    /// Read and deserialize a value. A value of the wrong shape is treated as
    /// corruption, not as a miss.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        match self.get(key)? {
            Some(value) => serde_json::from_value(value).map(Some).map_err(|e| {
                StoreError::Corrupted {
                    key: key.to_string(),
                    reason: e.to_string(),
                }
            }),
            None => Ok(None),
        }
    }

    pub fn forever_as<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let value = serde_json::to_value(value).map_err(|source| StoreError::Serialize {
            key: key.to_string(),
            source,
        })?;
        self.forever(key, value)
    }
}
