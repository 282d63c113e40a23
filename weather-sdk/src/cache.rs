//! Bounded, TTL-aware store of the latest record per location.
//!
//! Stale entries are not expired by timers. Every [`WeatherCache::put`] first
//! sweeps the whole map, then inserts only if the sweep left room. When the
//! cache is full of relevant entries, the new record is dropped instead of
//! evicting one of them.
//!
//! A closed cache is emptied and refuses every later insert.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};
use tracing::{debug, trace};

use crate::{
    clock::{Clock, SystemClock},
    model::WeatherData,
};

#[derive(Debug)]
pub struct WeatherCache {
    entries: DashMap<String, Arc<WeatherData>>,
    // Serializes sweep + capacity check + insert across writers.
    write_lock: Mutex<()>,
    closed: AtomicBool,
    capacity: usize,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl WeatherCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self::with_clock(capacity, ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(capacity: usize, ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::with_capacity(capacity),
            write_lock: Mutex::new(()),
            closed: AtomicBool::new(false),
            capacity,
            ttl,
            clock,
        }
    }

    /// Current time according to the cache's clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Plain lookup. Does not check relevance.
    pub fn get(&self, key: &str) -> Option<Arc<WeatherData>> {
        self.entries.get(key).map(|entry| Arc::clone(entry.value()))
    }

    /// Lookup that only returns the record if it is still relevant.
    ///
    /// The check happens while the entry is held, so a concurrent replace
    /// cannot slip between the lookup and the relevance decision.
    pub fn get_relevant(&self, key: &str) -> Option<Arc<WeatherData>> {
        let now = self.now();
        self.entries
            .get(key)
            .filter(|entry| entry.value().is_relevant_at(now, self.ttl))
            .map(|entry| Arc::clone(entry.value()))
    }

    pub fn is_relevant(&self, record: &WeatherData) -> bool {
        record.is_relevant_at(self.now(), self.ttl)
    }

    /// Sweep stale entries, then store `record` under `key` if there is room.
    ///
    /// Returns `false` when the record was dropped because the cache is full
    /// or closed.
    pub fn put(&self, key: &str, record: Arc<WeatherData>) -> bool {
        let _guard = self.write_lock.lock();

        if self.is_closed() {
            debug!(location = key, "cache closed, dropping record");
            return false;
        }

        self.sweep_locked();

        if self.entries.len() >= self.capacity {
            debug!(location = key, capacity = self.capacity, "cache full, dropping fresh record");
            return false;
        }

        self.entries.insert(key.to_string(), record);
        true
    }

    /// Remove every entry that is no longer relevant. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let _guard = self.write_lock.lock();
        self.sweep_locked()
    }

    fn sweep_locked(&self) -> usize {
        let now = self.now();
        let before = self.entries.len();

        self.entries.retain(|_, record| record.is_relevant_at(now, self.ttl));

        let removed = before - self.entries.len();
        if removed > 0 {
            trace!(removed, "swept stale cache entries");
        }
        removed
    }

    /// Snapshot of the keys currently stored.
    pub fn keys(&self) -> Vec<String> {
        self.entries.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Sorted snapshot of the keys whose records are no longer relevant.
    pub fn stale_keys(&self) -> Vec<String> {
        let now = self.now();
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| !entry.value().is_relevant_at(now, self.ttl))
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        keys
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        let _guard = self.write_lock.lock();
        self.entries.clear();
    }

    /// Empty the cache and refuse all further inserts.
    pub fn close(&self) {
        let _guard = self.write_lock.lock();
        self.closed.store(true, Ordering::Release);
        self.entries.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}
