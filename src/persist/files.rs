//! Primary Snapshot and Overflow Files
//!
//! Both persisted artifacts share one record format: UTF-8 text, one entry
//! per line, key and value separated by the first space. Values may contain
//! spaces and run to end of line; keys must not contain the separator.
//!
//! The primary file is rewritten wholesale on each save. The overflow file
//! only ever grows by appended eviction batches, until compaction deletes it.
//!
//! All writes go through one async mutex so a snapshot rewrite and an
//! overflow append can never interleave mid-write. Reads do not take that
//! lock - compaction reads both files while writers are quiesced, and the
//! loader runs before any writer exists.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::sync::Mutex;
use tracing::debug;

/// Separator between key and value in a persisted record.
const SEPARATOR: char = ' ';

/// The pair of on-disk files backing one engine instance.
pub struct FileSet {
    primary_path: PathBuf,
    overflow_path: PathBuf,
    /// Serializes every file write (snapshot rewrite, overflow append).
    write_lock: Mutex<()>,
}

impl FileSet {
    pub(crate) fn new(primary_path: PathBuf, overflow_path: PathBuf) -> Self {
        Self {
            primary_path,
            overflow_path,
            write_lock: Mutex::new(()),
        }
    }

    /// Path of the primary snapshot file.
    pub fn primary_path(&self) -> &Path {
        &self.primary_path
    }

    /// Path of the overflow file.
    pub fn overflow_path(&self) -> &Path {
        &self.overflow_path
    }

    /// Writes a full snapshot of the live mapping to the primary file,
    /// truncating prior contents.
    pub(crate) async fn write_snapshot(
        &self,
        entries: &HashMap<String, String>,
    ) -> std::io::Result<()> {
        let _guard = self.write_lock.lock().await;
        write_records(
            &self.primary_path,
            entries.iter().map(|(k, v)| (k.as_str(), v.as_str())),
            false,
        )
        .await
    }

    /// Replaces the primary file with an already-merged record list.
    /// Used by compaction.
    pub(crate) async fn replace_primary(
        &self,
        records: &[(String, String)],
    ) -> std::io::Result<()> {
        let _guard = self.write_lock.lock().await;
        write_records(
            &self.primary_path,
            records.iter().map(|(k, v)| (k.as_str(), v.as_str())),
            false,
        )
        .await
    }

    /// Appends an eviction batch to the overflow file, creating it if needed.
    pub(crate) async fn append_overflow(
        &self,
        records: &[(String, String)],
    ) -> std::io::Result<()> {
        let _guard = self.write_lock.lock().await;
        write_records(
            &self.overflow_path,
            records.iter().map(|(k, v)| (k.as_str(), v.as_str())),
            true,
        )
        .await
    }

    /// Reads the primary file in file order. A missing file is an empty list.
    pub(crate) async fn read_primary(&self) -> std::io::Result<Vec<(String, String)>> {
        read_records(&self.primary_path).await
    }

    /// Reads the overflow file in file order. A missing file is an empty list.
    pub(crate) async fn read_overflow(&self) -> std::io::Result<Vec<(String, String)>> {
        read_records(&self.overflow_path).await
    }

    /// Deletes the overflow file. A missing file is success.
    pub(crate) async fn remove_overflow(&self) -> std::io::Result<()> {
        match tokio::fs::remove_file(&self.overflow_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl std::fmt::Debug for FileSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileSet")
            .field("primary", &self.primary_path)
            .field("overflow", &self.overflow_path)
            .finish()
    }
}

/// Writes records as `<key> <value>` lines, either truncating or appending.
/// The file is synced before returning.
async fn write_records<'a>(
    path: &Path,
    records: impl Iterator<Item = (&'a str, &'a str)>,
    append: bool,
) -> std::io::Result<()> {
    let file = if append {
        OpenOptions::new().create(true).append(true).open(path).await?
    } else {
        File::create(path).await?
    };

    let mut writer = BufWriter::new(file);
    let mut written = 0;
    for (key, value) in records {
        writer
            .write_all(format!("{key}{SEPARATOR}{value}\n").as_bytes())
            .await?;
        written += 1;
    }
    writer.flush().await?;
    writer.into_inner().sync_all().await?;

    debug!(path = %path.display(), records = written, append, "records written");
    Ok(())
}

/// Reads `<key> <value>` lines in file order. Lines that do not split into a
/// non-empty key and a value on the first separator are skipped.
async fn read_records(path: &Path) -> std::io::Result<Vec<(String, String)>> {
    let file = match File::open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut lines = BufReader::new(file).lines();
    let mut records = Vec::new();
    let mut skipped = 0;
    while let Some(line) = lines.next_line().await? {
        match line.split_once(SEPARATOR) {
            Some((key, value)) if !key.is_empty() => {
                records.push((key.to_string(), value.to_string()));
            }
            _ => skipped += 1,
        }
    }

    if skipped > 0 {
        debug!(path = %path.display(), skipped, "skipped malformed records");
    }
    Ok(records)
}
