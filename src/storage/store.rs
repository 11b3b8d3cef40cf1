//! The Live Store
//!
//! A concurrent map of string keys to string values, a FIFO eviction queue,
//! and a running memory-usage counter - the single source of truth for what
//! is currently resident in memory.
//!
//! ## Concurrency Model
//!
//! All three pieces of state live in one [`StoreInner`] behind a single
//! `RwLock`, so the mapping, the queue, and the usage counter are always read
//! and mutated atomically with respect to each other. Every public method
//! takes `&self` and holds the lock only for the in-memory work - no disk I/O
//! ever happens under this lock.
//!
//! ## Invariants
//!
//! - `memory_usage` equals the sum of `key.len() + value.len()` over all live
//!   entries.
//! - The eviction queue holds exactly the keys present in the mapping, each
//!   once, oldest insertion first. Overwriting a value does not move its key.

use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;

/// Accounting size of one entry: key bytes plus value bytes. Structural
/// overhead is not measured - the memory budget is expressed in payload
/// bytes.
#[inline]
pub fn entry_size(key: &str, value: &str) -> usize {
    key.len() + value.len()
}

/// Outcome of an insert, telling the engine which background worker to signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Pressure {
    /// Usage is below the limit; a debounced save is appropriate.
    Below,
    /// Usage reached or passed the limit; the eviction worker must run.
    Over,
}

/// The lock-guarded unit: mapping, queue, and accounting move together.
struct StoreInner {
    data: HashMap<String, String>,
    /// Insertion-ordered live keys, consulted only to pick eviction victims.
    queue: VecDeque<String>,
    memory_usage: usize,
    memory_limit: usize,
}

impl StoreInner {
    /// Insert or overwrite, maintaining the queue and the usage counter.
    /// An overwritten key keeps its original queue position.
    fn insert(&mut self, key: String, value: String) {
        let new_size = entry_size(&key, &value);
        match self.data.get(&key).map(|old| entry_size(&key, old)) {
            Some(old_size) => {
                self.memory_usage = self.memory_usage - old_size + new_size;
            }
            None => {
                self.queue.push_back(key.clone());
                self.memory_usage += new_size;
            }
        }
        self.data.insert(key, value);
    }
}

/// Thread-safe bounded store.
///
/// Designed to be wrapped in an `Arc` and shared between the caller-facing
/// engine and the two background workers.
pub struct Store {
    inner: RwLock<StoreInner>,
}

impl Store {
    /// Creates an empty store with the given memory limit in bytes.
    pub(crate) fn new(memory_limit: usize) -> Self {
        Self {
            inner: RwLock::new(StoreInner {
                data: HashMap::new(),
                queue: VecDeque::new(),
                memory_usage: 0,
                memory_limit,
            }),
        }
    }

    /// Inserts or overwrites an entry and reports whether the store is now
    /// at or over its memory limit.
    pub(crate) fn insert(&self, key: String, value: String) -> Pressure {
        let mut inner = self.inner.write().unwrap();
        inner.insert(key, value);
        if inner.memory_usage >= inner.memory_limit {
            Pressure::Over
        } else {
            Pressure::Below
        }
    }

    /// Returns a clone of the value for `key`, or `None` if absent.
    pub fn get(&self, key: &str) -> Option<String> {
        let inner = self.inner.read().unwrap();
        inner.data.get(key).cloned()
    }

    /// Removes an entry if present. Returns `true` if something was removed.
    pub(crate) fn remove(&self, key: &str) -> bool {
        let mut inner = self.inner.write().unwrap();
        match inner.data.remove(key) {
            Some(value) => {
                inner.memory_usage -= entry_size(key, &value);
                if let Some(pos) = inner.queue.iter().position(|k| k == key) {
                    inner.queue.remove(pos);
                }
                true
            }
            None => false,
        }
    }

    /// Clears the mapping and the queue and zeroes the usage counter.
    pub(crate) fn wipe(&self) {
        let mut inner = self.inner.write().unwrap();
        inner.data.clear();
        inner.queue.clear();
        inner.memory_usage = 0;
    }

    /// Returns a point-in-time copy of the live mapping.
    pub fn snapshot(&self) -> HashMap<String, String> {
        let inner = self.inner.read().unwrap();
        inner.data.clone()
    }

    /// Number of live entries.
    pub fn key_count(&self) -> usize {
        let inner = self.inner.read().unwrap();
        inner.data.len()
    }

    /// Current summed accounting size of live entries.
    pub fn memory_usage(&self) -> usize {
        let inner = self.inner.read().unwrap();
        inner.memory_usage
    }

    /// Current memory limit in bytes.
    pub fn memory_limit(&self) -> usize {
        let inner = self.inner.read().unwrap();
        inner.memory_limit
    }

    /// Updates the memory limit. Does not evict by itself - the next insert
    /// observes the new limit.
    pub(crate) fn set_memory_limit(&self, limit: usize) {
        let mut inner = self.inner.write().unwrap();
        inner.memory_limit = limit;
    }

    /// Removes the oldest entries until the freed bytes cover the overage,
    /// returning them in eviction order.
    ///
    /// Re-checks the pressure condition under the lock: a concurrent delete
    /// may already have resolved it, in which case the batch is empty. The
    /// mapping, queue, and usage counter are all updated under one lock
    /// acquisition.
    pub(crate) fn take_eviction_batch(&self) -> Vec<(String, String)> {
        let mut inner = self.inner.write().unwrap();
        if inner.memory_usage < inner.memory_limit {
            return Vec::new();
        }

        let bytes_to_free = inner.memory_usage - inner.memory_limit;
        let mut batch = Vec::new();
        let mut freed = 0;
        while freed < bytes_to_free {
            let Some(key) = inner.queue.pop_front() else {
                break;
            };
            if let Some(value) = inner.data.remove(&key) {
                freed += entry_size(&key, &value);
                batch.push((key, value));
            }
        }
        inner.memory_usage -= freed;
        batch
    }

    /// Drains every entry in queue order, leaving the store empty.
    /// Used by compaction's force-flush.
    pub(crate) fn drain_all(&self) -> Vec<(String, String)> {
        let mut inner = self.inner.write().unwrap();
        let keys: Vec<String> = inner.queue.drain(..).collect();
        let mut batch = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(value) = inner.data.remove(&key) {
                batch.push((key, value));
            }
        }
        inner.memory_usage = 0;
        batch
    }

    /// Folds loaded records into the store in the given order. A record for
    /// an existing key overwrites the value in place; a new key is appended
    /// to the queue. Every record contributes to the usage counter.
    pub(crate) fn absorb(&self, records: Vec<(String, String)>) {
        let mut inner = self.inner.write().unwrap();
        for (key, value) in records {
            inner.insert(key, value);
        }
    }

    /// Re-inserts records whose keys are not currently live, then recomputes
    /// the usage counter over the resulting mapping. Live entries win over
    /// their on-disk versions. Returns the recomputed usage.
    ///
    /// Used by compaction to make evicted entries reachable again.
    pub(crate) fn repopulate(&self, records: Vec<(String, String)>) -> usize {
        let mut inner = self.inner.write().unwrap();
        for (key, value) in records {
            if !inner.data.contains_key(&key) {
                inner.queue.push_back(key.clone());
                inner.data.insert(key, value);
            }
        }
        let usage: usize = inner.data.iter().map(|(k, v)| entry_size(k, v)).sum();
        inner.memory_usage = usage;
        usage
    }

    /// Current queue contents, oldest first.
    #[cfg(test)]
    fn queue_order(&self) -> Vec<String> {
        let inner = self.inner.read().unwrap();
        inner.queue.iter().cloned().collect()
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read().unwrap();
        f.debug_struct("Store")
            .field("entries", &inner.data.len())
            .field("memory_usage", &inner.memory_usage)
            .field("memory_limit", &inner.memory_limit)
            .finish()
    }
}
