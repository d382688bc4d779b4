use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tracing::trace;

use super::{counter_value, Entry, Expiry, KeyValueStore, StoreError};
use crate::clock::{Clock, SystemClock};

/// In-process TTL store.
///
/// # Example
/// ```
/// use wiki_core::storage::{KeyValueStore, MemoryStore};
///
/// let store = MemoryStore::new();
/// store.put("answer", serde_json::json!(42), 10).unwrap();
/// assert_eq!(store.get("answer").unwrap(), Some(serde_json::json!(42)));
/// ```
#[derive(Debug)]
pub struct MemoryStore<C: Clock = SystemClock> {
    entries: Mutex<HashMap<String, Entry>>,
    clock: C,
}

impl MemoryStore<SystemClock> {
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl Default for MemoryStore<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> MemoryStore<C> {
    pub fn with_clock(clock: C) -> Self {
        Self { entries: Mutex::new(HashMap::new()), clock }
    }

    /// Number of entries held, including expired ones not yet evicted.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Time left for `key`, `None` for a miss or a forever entry.
    pub fn remaining(&self, key: &str) -> Option<std::time::Duration> {
        let now = self.clock.now();
        let mut entries = self.lock();
        live_entry(&mut entries, key, now).and_then(|entry| entry.expires.remaining(now))
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Look up `key`, evicting it if it has expired.
fn live_entry<'a>(
    entries: &'a mut HashMap<String, Entry>,
    key: &str,
    now: u64,
) -> Option<&'a Entry> {
    let expired = entries.get(key)?.expires.is_expired(now);
    if expired {
        entries.remove(key);
        trace!(key, "evicted expired cache entry");
        return None;
    }
    entries.get(key)
}

impl<C: Clock> KeyValueStore for MemoryStore<C> {
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let now = self.clock.now();
        let mut entries = self.lock();
        live_entry(&mut entries, key, now).map(|entry| entry.value(key)).transpose()
    }

    fn put(&self, key: &str, value: Value, minutes: u64) -> Result<(), StoreError> {
        let entry = Entry::new(key, &value, Expiry::after_minutes(self.clock.now(), minutes))?;
        self.lock().insert(key.to_string(), entry);
        Ok(())
    }

    fn forget(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.lock().remove(key).is_some())
    }

    fn flush(&self) -> Result<(), StoreError> {
        self.lock().clear();
        Ok(())
    }

    fn increment(&self, key: &str, delta: i64) -> Result<i64, StoreError> {
        let now = self.clock.now();
        let mut entries = self.lock();
        let (current, expires) = match live_entry(&mut entries, key, now) {
            Some(entry) => (counter_value(&entry.value(key)?), entry.expires),
            None => (0, Expiry::Forever),
        };
        let next = current.saturating_add(delta);
        entries.insert(key.to_string(), Entry::new(key, &Value::from(next), expires)?);
        Ok(next)
    }
}
