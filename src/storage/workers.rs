//! Background Save and Eviction Workers
//!
//! Two long-lived tokio tasks started at engine construction. Each consumes
//! a capacity-1 signal channel: a trigger arriving while a run is already
//! pending is dropped, so any burst of mutations collapses into one job.
//!
//! - The **save worker** waits out a debounce interval after each trigger,
//!   then writes a full snapshot of the store to the primary file.
//! - The **eviction worker** re-checks memory pressure on wake and, if the
//!   store is still at or over its limit, moves the oldest entries to the
//!   overflow file.
//!
//! Both loops exit when the shared shutdown signal flips. Write failures on
//! these paths are logged and never retried - the in-memory state stays
//! authoritative, and the next natural trigger attempts the write again.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, error, warn};

use crate::persist::FileSet;
use crate::storage::store::{entry_size, Store};

/// Save worker loop: signal -> debounce -> snapshot -> primary file.
pub(crate) async fn save_loop(
    store: Arc<Store>,
    files: Arc<FileSet>,
    mut signal: mpsc::Receiver<()>,
    mut shutdown: watch::Receiver<bool>,
    debounce: Duration,
) {
    loop {
        tokio::select! {
            received = signal.recv() => {
                if received.is_none() {
                    debug!("save signal channel closed");
                    return;
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    debug!("save worker received shutdown signal");
                    return;
                }
            }
        }

        // Absorb further triggers from the same burst into this one save.
        tokio::select! {
            _ = tokio::time::sleep(debounce) => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    debug!("save worker received shutdown signal during debounce");
                    return;
                }
            }
        }

        let snapshot = store.snapshot();
        match files.write_snapshot(&snapshot).await {
            Ok(()) => debug!(entries = snapshot.len(), "primary snapshot written"),
            Err(e) => error!(error = %e, "failed to write primary snapshot"),
        }
    }
}

/// Eviction worker loop: signal -> FIFO batch out of the store -> one
/// overflow append.
pub(crate) async fn evict_loop(
    store: Arc<Store>,
    files: Arc<FileSet>,
    mut signal: mpsc::Receiver<()>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            received = signal.recv() => {
                if received.is_none() {
                    debug!("eviction signal channel closed");
                    return;
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    debug!("eviction worker received shutdown signal");
                    return;
                }
            }
        }

        // The batch, the queue, and the usage counter all update under one
        // lock acquisition; the append below runs without the data lock.
        let batch = store.take_eviction_batch();
        if batch.is_empty() {
            // Pressure already resolved by a concurrent delete or wipe.
            continue;
        }

        let freed: usize = batch.iter().map(|(k, v)| entry_size(k, v)).sum();
        warn!(
            evicted = batch.len(),
            freed_bytes = freed,
            usage = store.memory_usage(),
            limit = store.memory_limit(),
            "memory limit reached, evicted oldest entries to overflow file"
        );

        if let Err(e) = files.append_overflow(&batch).await {
            error!(
                error = %e,
                lost_entries = batch.len(),
                lost_bytes = freed,
                "failed to append evicted entries to overflow file; evicted data was dropped"
            );
        }
    }
}
