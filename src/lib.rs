//! # spillkv - An Embedded, Memory-Bounded Key-Value Engine
//!
//! spillkv keeps string keys and values in a concurrent in-memory map under a
//! configurable memory budget, and spills to disk in two ways: a periodically
//! rewritten full snapshot (the *primary file*), and an append-only log of
//! entries evicted under memory pressure (the *overflow file*). A restart
//! merges both files back into memory, and an on-demand compaction folds the
//! overflow file into the primary file.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────────┐
//! │                              Engine                                │
//! │                                                                    │
//! │   set/get/delete/list ──► ┌──────────────────────────────────┐     │
//! │     (synchronous)         │              Store               │     │
//! │                           │  map + eviction queue + usage    │     │
//! │                           │       (one data lock)            │     │
//! │                           └───────┬──────────────┬───────────┘     │
//! │                                   │ cap-1 signal │ cap-1 signal    │
//! │                                   ▼              ▼                 │
//! │                           ┌──────────────┐ ┌─────────────────┐     │
//! │                           │ Save Worker  │ │ Eviction Worker │     │
//! │                           │ (debounced)  │ │ (FIFO batches)  │     │
//! │                           └──────┬───────┘ └────────┬────────┘     │
//! │                                  ▼                  ▼              │
//! │                           primary file        overflow file        │
//! │                                  ▲                  │              │
//! │                                  └── compaction ◄───┘              │
//! └────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use spillkv::{Engine, EngineConfig};
//!
//! #[tokio::main]
//! async fn main() -> spillkv::EngineResult<()> {
//!     let config = EngineConfig::new("data.db", "overflow.db", 64 * 1024 * 1024);
//!     let engine = Engine::open(config).await?;
//!
//!     engine.set("name", "Alice");
//!     assert_eq!(engine.get("name")?, "Alice");
//!
//!     // Force a snapshot now instead of waiting for the debounced worker.
//!     engine.save().await?;
//!
//!     // Fold evicted entries back into the primary file.
//!     engine.compact_overflow().await?;
//!
//!     engine.shutdown();
//!     Ok(())
//! }
//! ```
//!
//! ## Module Overview
//!
//! - [`engine`]: the public operation set, loader, and compactor
//! - [`storage`]: the bounded live store and the background workers
//! - [`persist`]: the primary/overflow files and their line format
//! - [`config`]: construction parameters
//! - [`error`]: the engine error taxonomy
//!
//! ## Design Highlights
//!
//! ### One lock for the live state
//!
//! The mapping, the insertion-order eviction queue, and the memory counter
//! are guarded by a single lock, so they can never disagree. A second lock
//! serializes file writes so a snapshot rewrite and an overflow append never
//! interleave.
//!
//! ### Coalescing triggers
//!
//! Mutations signal the workers through capacity-1 channels with non-blocking
//! sends: a burst of writes produces one pending save, not one per write, and
//! callers never block on persistence.
//!
//! ### FIFO eviction, not LRU
//!
//! When memory usage reaches the limit, the oldest-inserted entries are moved
//! to the overflow file until the overage is covered. Reads do not refresh a
//! key's position, and neither does overwriting its value.

pub mod config;
pub mod engine;
pub mod error;
pub mod persist;
pub mod storage;

// Re-export the public surface consumed by adapter layers
pub use config::{EngineConfig, DEFAULT_SAVE_DEBOUNCE};
pub use engine::Engine;
pub use error::{EngineError, EngineResult};

/// Version of spillkv
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
