//! Storage Module
//!
//! The in-memory side of the engine: the bounded live store and the two
//! background workers that drain it to disk.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                   Store                      │
//! │  ┌─────────────────────────────────────────┐ │
//! │  │ RwLock:  map + eviction queue + usage   │ │
//! │  └─────────────────────────────────────────┘ │
//! └──────────────┬────────────────┬──────────────┘
//!                │ cap-1 signal   │ cap-1 signal
//!                ▼                ▼
//!        ┌──────────────┐  ┌─────────────────┐
//!        │ Save Worker  │  │ Eviction Worker │
//!        │ (debounced)  │  │ (FIFO batches)  │
//!        └──────┬───────┘  └────────┬────────┘
//!               ▼                   ▼
//!         primary file        overflow file
//! ```
//!
//! The store's mapping, insertion-order queue, and memory counter are guarded
//! by a single lock so they can never drift apart. The workers block only on
//! their signal channels and the shared shutdown signal, never on the data
//! lock for long.

pub mod store;
pub(crate) mod workers;

pub use store::{entry_size, Store};
