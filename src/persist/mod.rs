//! Persistence Module
//!
//! On-disk backing for the engine: the primary snapshot file and the
//! append-only overflow file, plus the shared line-oriented record format.
//!
//! - The **primary file** holds a full snapshot of whatever the store held at
//!   the last successful save, rewritten wholesale each time.
//! - The **overflow file** holds entries evicted under memory pressure, and
//!   only grows until a compaction folds it into the primary file.

pub mod files;

pub use files::FileSet;
