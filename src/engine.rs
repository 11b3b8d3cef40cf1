//! The Storage Engine
//!
//! `Engine` ties the live store, the two persistence files, and the
//! background workers together behind the public operation set:
//! `set` / `get` / `delete` / `wipe` / `list`, the accounting accessors,
//! a forced synchronous `save`, and on-demand `compact_overflow`.
//!
//! ## Control Flow
//!
//! Callers mutate the store synchronously; each mutation fires a capacity-1
//! signal consumed asynchronously by the save worker or, when the memory
//! limit is reached, the eviction worker. Persistence is always asynchronous
//! relative to the caller - `set` and `delete` return before any disk I/O.
//!
//! ## Lifecycle
//!
//! [`Engine::open`] validates the configuration, restores the store from the
//! primary and overflow files (overflow wins on key collision), and only then
//! starts the workers. [`Engine::shutdown`] (also fired on drop) flips a
//! shared watch signal that both worker loops observe; in-flight file writes
//! are not interrupted.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::persist::FileSet;
use crate::storage::store::Pressure;
use crate::storage::workers::{evict_loop, save_loop};
use crate::storage::Store;

/// Clears the save trigger for the duration of a compaction and re-enables
/// it on every exit path, so an aborted compaction cannot leave the save
/// worker permanently disabled.
struct SaveGate<'a> {
    enabled: &'a AtomicBool,
}

impl<'a> SaveGate<'a> {
    fn hold(enabled: &'a AtomicBool) -> Self {
        enabled.store(false, Ordering::Release);
        Self { enabled }
    }
}

impl Drop for SaveGate<'_> {
    fn drop(&mut self) {
        self.enabled.store(true, Ordering::Release);
    }
}

/// An embedded, memory-bounded key-value engine with overflow persistence.
///
/// Designed to be wrapped in an `Arc` and shared across request handlers.
/// All operations take `&self`.
///
/// # Example
///
/// ```ignore
/// use spillkv::{Engine, EngineConfig};
///
/// #[tokio::main]
/// async fn main() -> spillkv::EngineResult<()> {
///     let engine = Engine::open(EngineConfig::new("data.db", "overflow.db", 64 << 20)).await?;
///
///     engine.set("name", "Alice");
///     assert_eq!(engine.get("name")?, "Alice");
///
///     engine.compact_overflow().await?;
///     Ok(())
/// }
/// ```
pub struct Engine {
    store: Arc<Store>,
    files: Arc<FileSet>,
    save_signal: mpsc::Sender<()>,
    evict_signal: mpsc::Sender<()>,
    /// Cleared while a compaction owns the primary file, so the save worker
    /// cannot be triggered into racing the compaction's rewrite.
    save_enabled: AtomicBool,
    shutdown: watch::Sender<bool>,
}

impl Engine {
    /// Opens an engine: validates the configuration, restores the store from
    /// both files, and starts the background workers.
    ///
    /// A missing file is an empty store, not an error; any other I/O or read
    /// failure is fatal to construction. Entries from the primary file are
    /// folded in first, in file order; overflow entries are folded in on top
    /// and win on key collision. Every restored entry is counted toward
    /// memory usage.
    pub async fn open(config: EngineConfig) -> EngineResult<Engine> {
        config.validate()?;

        let files = Arc::new(FileSet::new(
            config.primary_path.clone(),
            config.overflow_path.clone(),
        ));
        let store = Arc::new(Store::new(config.memory_limit));

        let primary = files.read_primary().await?;
        let overflow = files.read_overflow().await?;
        store.absorb(primary);
        store.absorb(overflow);
        info!(
            entries = store.key_count(),
            usage = store.memory_usage(),
            limit = store.memory_limit(),
            "store restored from disk"
        );

        let (save_signal, save_rx) = mpsc::channel(1);
        let (evict_signal, evict_rx) = mpsc::channel(1);
        let (shutdown, shutdown_rx) = watch::channel(false);

        tokio::spawn(save_loop(
            Arc::clone(&store),
            Arc::clone(&files),
            save_rx,
            shutdown_rx.clone(),
            config.save_debounce,
        ));
        tokio::spawn(evict_loop(
            Arc::clone(&store),
            Arc::clone(&files),
            evict_rx,
            shutdown_rx,
        ));

        Ok(Engine {
            store,
            files,
            save_signal,
            evict_signal,
            save_enabled: AtomicBool::new(true),
            shutdown,
        })
    }

    /// Inserts or overwrites an entry.
    ///
    /// An overwrite keeps the key's original position in the eviction queue.
    /// If the resulting memory usage reaches the limit, the eviction worker
    /// is signalled instead of the save worker.
    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        match self.store.insert(key.into(), value.into()) {
            Pressure::Over => self.signal_evict(),
            Pressure::Below => self.signal_save(),
        }
    }

    /// Returns the value for `key`, or [`EngineError::NotFound`] if it is not
    /// in the live store. Evicted entries stay unreachable until a compaction
    /// or restart folds them back in.
    pub fn get(&self, key: &str) -> EngineResult<String> {
        self.store.get(key).ok_or(EngineError::NotFound)
    }

    /// Removes an entry. A missing key is a no-op, not an error.
    pub fn delete(&self, key: &str) {
        if self.store.remove(key) {
            self.signal_save();
        }
    }

    /// Durably erases all data: clears the mapping, the eviction queue, and
    /// the usage counter synchronously, then signals a save. Distinct from
    /// the pressure-driven eviction, which moves entries to the overflow
    /// file instead of discarding them.
    pub fn wipe(&self) {
        self.store.wipe();
        self.signal_save();
        info!("store wiped");
    }

    /// Returns a point-in-time copy of the live mapping.
    pub fn list(&self) -> HashMap<String, String> {
        self.store.snapshot()
    }

    /// Current summed accounting size of live entries, in bytes.
    pub fn memory_usage(&self) -> usize {
        self.store.memory_usage()
    }

    /// Number of live entries.
    pub fn key_count(&self) -> usize {
        self.store.key_count()
    }

    /// Current memory limit in bytes.
    pub fn memory_limit(&self) -> usize {
        self.store.memory_limit()
    }

    /// Updates the memory limit. Takes effect on the next `set`; does not
    /// evict retroactively.
    pub fn set_memory_limit(&self, limit: usize) {
        self.store.set_memory_limit(limit);
    }

    /// Writes a snapshot of the live store to the primary file immediately,
    /// bypassing the debounced save worker.
    pub async fn save(&self) -> EngineResult<()> {
        let snapshot = self.store.snapshot();
        self.files.write_snapshot(&snapshot).await?;
        debug!(entries = snapshot.len(), "forced snapshot written");
        Ok(())
    }

    /// Folds the overflow file into the primary file and deletes it, making
    /// evicted entries reachable again.
    ///
    /// Phases:
    /// 1. Disable the save trigger for the duration.
    /// 2. Force-flush: if the store is still at or over its limit, drain it
    ///    entirely to the overflow file.
    /// 3. Read both files from disk, bypassing the live store.
    /// 4. Merge them; overflow entries win on key collision.
    /// 5. Rewrite the primary file with the merged result.
    /// 6. Fold the merged result back into the live store - entries written
    ///    concurrently keep their live values - and recompute memory usage
    ///    over the resulting mapping.
    /// 7. Delete the overflow file (a missing file is not a failure).
    ///
    /// An I/O failure in phases 1-5 aborts the operation and is returned to
    /// the caller; failures in phases 6-7 are logged only.
    pub async fn compact_overflow(&self) -> EngineResult<()> {
        info!("starting overflow compaction");
        let _gate = SaveGate::hold(&self.save_enabled);

        self.force_flush().await?;

        let overflow = self.files.read_overflow().await?;
        let primary = self.files.read_primary().await?;
        let merged = merge_records(primary, overflow);

        self.files.replace_primary(&merged).await?;

        let usage = self.store.repopulate(merged);
        debug!(usage, "memory usage recomputed from merged result");

        if let Err(e) = self.files.remove_overflow().await {
            warn!(error = %e, "failed to remove overflow file after compaction");
        }

        info!(
            entries = self.store.key_count(),
            usage = self.store.memory_usage(),
            "overflow compaction complete"
        );
        Ok(())
    }

    /// Signals the shutdown watch; both workers exit their wait loops.
    /// In-flight file writes are not interrupted.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
        info!("engine shutdown signalled");
    }

    /// Phase 2 of compaction: drain the whole store to the overflow file if
    /// it is still at or over the memory limit.
    ///
    /// Mirrors the eviction worker's append: once drained, the entries stay
    /// out of the store even if the append fails - the failure is surfaced
    /// to the compaction caller instead of a log line.
    async fn force_flush(&self) -> EngineResult<()> {
        if self.store.memory_usage() < self.store.memory_limit() {
            return Ok(());
        }

        let batch = self.store.drain_all();
        if batch.is_empty() {
            return Ok(());
        }
        warn!(
            entries = batch.len(),
            "store still over limit, force-flushing everything to overflow before compaction"
        );

        if let Err(e) = self.files.append_overflow(&batch).await {
            error!(
                error = %e,
                lost_entries = batch.len(),
                "force-flush append failed; drained entries were dropped"
            );
            return Err(e.into());
        }
        Ok(())
    }

    fn signal_save(&self) {
        if !self.save_enabled.load(Ordering::Acquire) {
            return;
        }
        // A full channel means a save is already pending; drop the trigger.
        let _ = self.save_signal.try_send(());
    }

    fn signal_evict(&self) {
        let _ = self.evict_signal.try_send(());
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
        debug!("engine dropped, workers signalled to stop");
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("store", &self.store)
            .field("files", &self.files)
            .finish()
    }
}

/// Merges two record lists, later records overwriting earlier ones in place.
/// The result keeps first-seen order with no duplicate keys.
fn merge_records(
    primary: Vec<(String, String)>,
    overflow: Vec<(String, String)>,
) -> Vec<(String, String)> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut merged: Vec<(String, String)> = Vec::with_capacity(primary.len() + overflow.len());
    for (key, value) in primary.into_iter().chain(overflow) {
        match index.get(&key) {
            Some(&i) => merged[i].1 = value,
            None => {
                index.insert(key.clone(), merged.len());
                merged.push((key, value));
            }
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn init_tracing() {
        use tracing_subscriber::EnvFilter;
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .try_init();
    }

    fn test_config(dir: &TempDir, memory_limit: usize) -> EngineConfig {
        EngineConfig::new(
            dir.path().join("data.db"),
            dir.path().join("overflow.db"),
            memory_limit,
        )
        .with_save_debounce(Duration::from_millis(20))
    }

    async fn open(dir: &TempDir, memory_limit: usize) -> Engine {
        init_tracing();
        Engine::open(test_config(dir, memory_limit)).await.unwrap()
    }

    /// Lets any already-debouncing save finish before the engine is dropped
    /// and its files are reopened.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(60)).await;
    }

    /// Polls `cond` for up to two seconds, yielding to the workers between
    /// checks.
    async fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
        for _ in 0..200 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("timed out waiting for: {what}");
    }

    #[tokio::test]
    async fn test_set_and_get() {
        let dir = TempDir::new().unwrap();
        let engine = open(&dir, 1024).await;

        engine.set("name", "Alice");
        assert_eq!(engine.get("name").unwrap(), "Alice");
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let dir = TempDir::new().unwrap();
        let engine = open(&dir, 1024).await;

        assert!(matches!(engine.get("unknown"), Err(EngineError::NotFound)));
    }

    #[tokio::test]
    async fn test_delete_then_get_is_not_found() {
        let dir = TempDir::new().unwrap();
        let engine = open(&dir, 1024).await;

        engine.set("name", "Alice");
        engine.delete("name");
        assert!(matches!(engine.get("name"), Err(EngineError::NotFound)));

        // Deleting again is a no-op, not an error.
        engine.delete("name");
    }

    #[tokio::test]
    async fn test_overwrite_returns_latest() {
        let dir = TempDir::new().unwrap();
        let engine = open(&dir, 1024).await;

        engine.set("key", "oldValue");
        engine.set("key", "newValue");
        assert_eq!(engine.get("key").unwrap(), "newValue");
        assert_eq!(engine.key_count(), 1);
    }

    #[tokio::test]
    async fn test_list_returns_point_in_time_copy() {
        let dir = TempDir::new().unwrap();
        let engine = open(&dir, 1024).await;

        engine.set("name", "Alice");
        engine.set("age", "25");

        let listed = engine.list();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed.get("name").map(String::as_str), Some("Alice"));
        assert_eq!(listed.get("age").map(String::as_str), Some("25"));
    }

    #[tokio::test]
    async fn test_memory_usage_tracking() {
        let dir = TempDir::new().unwrap();
        let engine = open(&dir, 1024).await;

        engine.set("small", "test");
        let initial = engine.memory_usage();
        assert_eq!(initial, "small".len() + "test".len());

        engine.set("big", "this is a much bigger value");
        assert!(engine.memory_usage() > initial);

        engine.delete("big");
        assert_eq!(engine.memory_usage(), initial);
    }

    #[tokio::test]
    async fn test_wipe_is_synchronous() {
        let dir = TempDir::new().unwrap();
        let engine = open(&dir, 1024).await;

        engine.set("name", "Alice");
        engine.set("city", "New York");
        engine.wipe();

        // No waiting on the save worker: the live state is already empty.
        assert_eq!(engine.key_count(), 0);
        assert_eq!(engine.memory_usage(), 0);
    }

    #[tokio::test]
    async fn test_save_round_trips_across_instances() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let engine = open(&dir, 1024).await;

        engine.set("a", "1");
        engine.set("b", "2");
        engine.save().await?;
        settle().await;
        drop(engine);

        let engine = open(&dir, 1024).await;
        assert_eq!(engine.get("a")?, "1");
        assert_eq!(engine.get("b")?, "2");
        Ok(())
    }

    #[tokio::test]
    async fn test_debounced_save_persists_mutations() {
        let dir = TempDir::new().unwrap();
        let engine = open(&dir, 1024).await;
        let primary = dir.path().join("data.db");

        engine.set("persistentKey", "PersistentData");
        wait_until("debounced save to write the primary file", || {
            std::fs::read_to_string(&primary)
                .map(|contents| contents.contains("persistentKey PersistentData"))
                .unwrap_or(false)
        })
        .await;

        engine.wipe();
        wait_until("save worker to persist the wipe", || {
            std::fs::read_to_string(&primary)
                .map(|contents| contents.is_empty())
                .unwrap_or(false)
        })
        .await;
    }

    #[tokio::test]
    async fn test_pressure_evicts_oldest_to_overflow() {
        let dir = TempDir::new().unwrap();
        let engine = open(&dir, 10).await;

        engine.set("k1", "value1"); // 8 bytes, below the limit of 10
        engine.set("k2", "value2"); // 16 bytes total, at/over the limit

        wait_until("eviction worker to evict k1", || engine.key_count() == 1).await;

        // Overage was 6; evicting k1 freed 8, so k2 stays resident.
        assert!(matches!(engine.get("k1"), Err(EngineError::NotFound)));
        assert_eq!(engine.get("k2").unwrap(), "value2");
        assert_eq!(engine.memory_usage(), 8);

        let overflow = std::fs::read_to_string(dir.path().join("overflow.db")).unwrap();
        assert_eq!(overflow, "k1 value1\n");
    }

    #[tokio::test]
    async fn test_eviction_keeps_recent_keys_recoverable() {
        let dir = TempDir::new().unwrap();
        let engine = open(&dir, 30).await;

        for i in 1..=6 {
            engine.set(format!("k{i}"), format!("value{i}"));
        }
        wait_until("eviction to bring usage under the limit", || {
            engine.memory_usage() < 30
        })
        .await;

        // Some keys remain resident, and everything evicted is on disk.
        assert!(engine.key_count() > 0);
        engine.save().await.unwrap();
        settle().await;
        drop(engine);

        let engine = open(&dir, 1024).await;
        for i in 1..=6 {
            assert_eq!(engine.get(&format!("k{i}")).unwrap(), format!("value{i}"));
        }
    }

    #[tokio::test]
    async fn test_reload_counts_every_entry() {
        let dir = TempDir::new().unwrap();
        let engine = open(&dir, 10).await;

        engine.set("k1", "value1");
        engine.set("k2", "value2");
        wait_until("eviction worker to evict k1", || engine.key_count() == 1).await;
        engine.save().await.unwrap();
        settle().await;
        drop(engine);

        // k2 loads from the primary file, k1 from the overflow file; both
        // must be counted toward memory usage.
        let engine = open(&dir, 1024).await;
        assert_eq!(engine.key_count(), 2);
        assert_eq!(engine.memory_usage(), 16);
    }

    #[tokio::test]
    async fn test_load_prefers_overflow_on_collision() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        tokio::fs::write(dir.path().join("data.db"), "dup old\nsolo1 a\n").await?;
        tokio::fs::write(dir.path().join("overflow.db"), "dup new\nsolo2 b\n").await?;

        let engine = open(&dir, 1024).await;
        assert_eq!(engine.get("dup")?, "new");
        assert_eq!(engine.get("solo1")?, "a");
        assert_eq!(engine.get("solo2")?, "b");
        assert_eq!(engine.key_count(), 3);
        Ok(())
    }

    #[tokio::test]
    async fn test_compaction_restores_evicted_keys() {
        let dir = TempDir::new().unwrap();
        let engine = open(&dir, 10).await;

        engine.set("k1", "value1");
        engine.set("k2", "value2");
        wait_until("eviction worker to evict k1", || engine.key_count() == 1).await;
        engine.save().await.unwrap();
        // Let the debounced save worker go idle so the rewrite below is the
        // last word on the primary file.
        settle().await;

        engine.compact_overflow().await.unwrap();

        // The overflow file is gone, its entries are back in the primary
        // file and in the live store, and usage covers the whole mapping.
        assert!(!dir.path().join("overflow.db").exists());
        assert_eq!(engine.get("k1").unwrap(), "value1");
        assert_eq!(engine.get("k2").unwrap(), "value2");
        assert_eq!(engine.memory_usage(), 16);

        let primary = std::fs::read_to_string(dir.path().join("data.db")).unwrap();
        assert!(primary.contains("k1 value1"));
        assert!(primary.contains("k2 value2"));
    }

    #[tokio::test]
    async fn test_compaction_force_flushes_when_over_limit() {
        let dir = TempDir::new().unwrap();
        let engine = open(&dir, 1024).await;

        engine.set("a", "1");
        engine.set("b", "2");
        // Shrink the limit without touching the store, leaving it over
        // budget when compaction starts.
        engine.set_memory_limit(1);

        engine.compact_overflow().await.unwrap();

        // Everything went through the overflow file and came back merged.
        assert!(!dir.path().join("overflow.db").exists());
        assert_eq!(engine.get("a").unwrap(), "1");
        assert_eq!(engine.get("b").unwrap(), "2");
        assert_eq!(engine.memory_usage(), 4);
    }

    #[tokio::test]
    async fn test_compaction_without_overflow_is_ok() {
        let dir = TempDir::new().unwrap();
        let engine = open(&dir, 1024).await;

        engine.set("a", "1");
        engine.save().await.unwrap();
        engine.compact_overflow().await.unwrap();

        assert_eq!(engine.get("a").unwrap(), "1");
        assert!(!dir.path().join("overflow.db").exists());
    }

    #[tokio::test]
    async fn test_open_rejects_invalid_config() {
        let dir = TempDir::new().unwrap();

        let zero_limit = test_config(&dir, 0);
        assert!(matches!(
            Engine::open(zero_limit).await,
            Err(EngineError::Validation(_))
        ));

        let empty_path = EngineConfig::new("", dir.path().join("overflow.db"), 1024);
        assert!(matches!(
            Engine::open(empty_path).await,
            Err(EngineError::Validation(_))
        ));
    }

    #[test]
    fn test_merge_records_overflow_wins() {
        let primary = vec![
            ("a".to_string(), "1".to_string()),
            ("b".to_string(), "2".to_string()),
        ];
        let overflow = vec![
            ("b".to_string(), "changed".to_string()),
            ("c".to_string(), "3".to_string()),
        ];

        let merged = merge_records(primary, overflow);
        assert_eq!(
            merged,
            vec![
                ("a".to_string(), "1".to_string()),
                ("b".to_string(), "changed".to_string()),
                ("c".to_string(), "3".to_string()),
            ]
        );
    }
}
