//! Append-only JSONL storage: the page record stream and the completion
//! ledger.
//!
//! Both files share one write discipline: a single mutex-guarded writer per
//! file, one JSON document per line, flushed before the lock is released.
//! Concurrent workers therefore never interleave partial lines, and write
//! order reflects completion-of-fetch order across workers, not traversal
//! order. Neither file is ever updated in place; deduplication and
//! compaction are downstream concerns.

mod ledger;

pub use ledger::{CompletionLedger, replay};

use std::path::{Path, PathBuf};

use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::sync::Mutex;

use floracrawl_shared::{FloraCrawlError, PageRecord, Result};

// ---------------------------------------------------------------------------
// RecordStore
// ---------------------------------------------------------------------------

/// Thread-safe append-only writer for the page record stream.
pub struct RecordStore {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl RecordStore {
    /// Open (or create) the record stream at `path` for appending.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| FloraCrawlError::io(parent, e))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(|e| FloraCrawlError::io(path, e))?;

        Ok(Self {
            path: path.to_path_buf(),
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    /// Append one record as a single JSONL line and flush it to the file.
    pub async fn append(&self, record: &PageRecord) -> Result<()> {
        let mut line = serde_json::to_string(record)
            .map_err(|e| FloraCrawlError::Storage(format!("record serialization: {e}")))?;
        line.push('\n');

        let mut writer = self.writer.lock().await;
        writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| FloraCrawlError::io(&self.path, e))?;
        writer
            .flush()
            .await
            .map_err(|e| FloraCrawlError::io(&self.path, e))?;
        Ok(())
    }

    /// Path of the underlying file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Count parseable record lines in a stream file. Missing file counts as
/// zero.
pub async fn record_count(path: &Path) -> Result<usize> {
    if !path.exists() {
        return Ok(0);
    }

    let file = File::open(path)
        .await
        .map_err(|e| FloraCrawlError::io(path, e))?;
    let mut lines = BufReader::new(file).lines();
    let mut count = 0;

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| FloraCrawlError::io(path, e))?
    {
        if serde_json::from_str::<PageRecord>(&line).is_ok() {
            count += 1;
        }
    }
    Ok(count)
}
