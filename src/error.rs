//! Engine Error Types
//!
//! Every fallible engine operation returns [`EngineResult`]. The variants map
//! one-to-one onto the caller-facing failure classes:
//!
//! - [`EngineError::Validation`] - bad construction parameters, fatal to that call
//! - [`EngineError::NotFound`] - a read on an absent key, an expected outcome
//! - [`EngineError::Io`] - an I/O failure on a synchronous persistence path
//!   (initial load, forced save, compaction)
//!
//! I/O failures on the background paths (debounced save, eviction append) are
//! logged by the workers and never surface here - no caller is waiting on them.

use thiserror::Error;

/// Errors surfaced by the engine's synchronous call paths.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Invalid construction parameters (non-positive memory limit, empty path).
    #[error("invalid configuration: {0}")]
    Validation(String),

    /// The requested key is not present in the live store.
    ///
    /// A key evicted under memory pressure also reports `NotFound` until a
    /// compaction or restart folds it back in.
    #[error("key not found")]
    NotFound,

    /// An I/O failure while loading, saving, or compacting.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Returns `true` for the expected miss on a read of an absent key.
    pub fn is_not_found(&self) -> bool {
        matches!(self, EngineError::NotFound)
    }
}

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;
