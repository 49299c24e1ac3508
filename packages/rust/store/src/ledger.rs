//! Event-sourced completion ledger.
//!
//! The ledger is an append-only JSONL file of [`CompletionEvent`]s plus an
//! in-memory materialized view of completed identifiers per rank. The view
//! is rebuilt by replaying the file at startup; during a run,
//! [`CompletionLedger::mark_completed`] writes the event to the file
//! *before* inserting into memory, so a crash between the two is healed by
//! the next replay. The completed set only ever grows.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use floracrawl_shared::{CompletionEvent, FloraCrawlError, Result, TaxonRank};

/// Thread-safe completion ledger: append-only event log + materialized
/// per-rank completed sets.
pub struct CompletionLedger {
    path: PathBuf,
    inner: Mutex<LedgerInner>,
}

struct LedgerInner {
    writer: BufWriter<File>,
    completed: HashMap<TaxonRank, HashSet<String>>,
}

impl CompletionLedger {
    /// Replay the ledger at `path` and open it for appending.
    ///
    /// This is the one-time full scan at process start; everything after it
    /// is in-memory membership plus appends.
    pub async fn load(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| FloraCrawlError::io(parent, e))?;
        }

        let completed = replay(path).await?;
        let total: usize = completed.values().map(HashSet::len).sum();
        debug!(path = %path.display(), events = total, "completion ledger replayed");

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(|e| FloraCrawlError::io(path, e))?;

        Ok(Self {
            path: path.to_path_buf(),
            inner: Mutex::new(LedgerInner {
                writer: BufWriter::new(file),
                completed,
            }),
        })
    }

    /// Pure in-memory membership test; no I/O.
    pub async fn is_completed(&self, rank: TaxonRank, identifier: &str) -> bool {
        let inner = self.inner.lock().await;
        inner
            .completed
            .get(&rank)
            .is_some_and(|set| set.contains(identifier))
    }

    /// Append one completion event and insert it into the in-memory view.
    ///
    /// The file write (and flush) strictly precedes the memory insert:
    /// durability is delegated entirely to the file.
    pub async fn mark_completed(&self, rank: TaxonRank, identifier: &str) -> Result<()> {
        let event = CompletionEvent::new(rank, identifier);
        let mut line = serde_json::to_string(&event)
            .map_err(|e| FloraCrawlError::Storage(format!("event serialization: {e}")))?;
        line.push('\n');

        let mut inner = self.inner.lock().await;
        inner
            .writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| FloraCrawlError::io(&self.path, e))?;
        inner
            .writer
            .flush()
            .await
            .map_err(|e| FloraCrawlError::io(&self.path, e))?;

        inner
            .completed
            .entry(rank)
            .or_default()
            .insert(identifier.to_string());
        Ok(())
    }

    /// Number of completed identifiers per rank.
    pub async fn completed_counts(&self) -> HashMap<TaxonRank, usize> {
        let inner = self.inner.lock().await;
        inner
            .completed
            .iter()
            .map(|(rank, set)| (*rank, set.len()))
            .collect()
    }

    /// Snapshot of the completed identifiers at one rank.
    pub async fn completed_for(&self, rank: TaxonRank) -> HashSet<String> {
        let inner = self.inner.lock().await;
        inner.completed.get(&rank).cloned().unwrap_or_default()
    }

    /// Path of the underlying file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Replay the event log at `path` into per-rank completed sets.
///
/// A missing file yields empty sets. Malformed lines — including a trailing
/// line truncated by a crash mid-write — are skipped with a warning; every
/// fully written event before them still counts.
pub async fn replay(path: &Path) -> Result<HashMap<TaxonRank, HashSet<String>>> {
    let mut completed: HashMap<TaxonRank, HashSet<String>> = HashMap::new();
    if !path.exists() {
        return Ok(completed);
    }

    let file = File::open(path)
        .await
        .map_err(|e| FloraCrawlError::io(path, e))?;
    let mut lines = BufReader::new(file).lines();
    let mut line_no = 0usize;

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| FloraCrawlError::io(path, e))?
    {
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<CompletionEvent>(&line) {
            Ok(event) => {
                completed
                    .entry(event.page_type)
                    .or_default()
                    .insert(event.identifier);
            }
            Err(e) => {
                warn!(path = %path.display(), line_no, error = %e, "skipping malformed ledger line");
            }
        }
    }

    Ok(completed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use uuid::Uuid;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("floracrawl_ledger_{name}_{}.jsonl", Uuid::now_v7()))
    }

    #[tokio::test]
    async fn mark_and_membership() {
        let path = temp_path("mark");
        let ledger = CompletionLedger::load(&path).await.expect("load");

        assert!(!ledger.is_completed(TaxonRank::Family, "family_1").await);
        ledger
            .mark_completed(TaxonRank::Family, "family_1")
            .await
            .expect("mark");
        assert!(ledger.is_completed(TaxonRank::Family, "family_1").await);

        // Identifiers are scoped per rank.
        assert!(!ledger.is_completed(TaxonRank::Genus, "family_1").await);
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn replay_reconstructs_memory_view() {
        let path = temp_path("replay");
        {
            let ledger = CompletionLedger::load(&path).await.expect("load");
            ledger
                .mark_completed(TaxonRank::Order, "order_1")
                .await
                .expect("mark");
            ledger
                .mark_completed(TaxonRank::Family, "family_1")
                .await
                .expect("mark");
            ledger
                .mark_completed(TaxonRank::Family, "family_2")
                .await
                .expect("mark");
        }

        let reloaded = CompletionLedger::load(&path).await.expect("reload");
        assert!(reloaded.is_completed(TaxonRank::Order, "order_1").await);
        assert!(reloaded.is_completed(TaxonRank::Family, "family_2").await);

        let counts = reloaded.completed_counts().await;
        assert_eq!(counts.get(&TaxonRank::Order), Some(&1));
        assert_eq!(counts.get(&TaxonRank::Family), Some(&2));
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn truncated_trailing_line_is_skipped() {
        let path = temp_path("truncated");
        {
            let ledger = CompletionLedger::load(&path).await.expect("load");
            ledger
                .mark_completed(TaxonRank::Genus, "genus_1")
                .await
                .expect("mark");
        }
        // Simulate a crash mid-append: a partial JSON document with no
        // closing brace and no newline.
        {
            let mut file = std::fs::OpenOptions::new()
                .append(true)
                .open(&path)
                .expect("open raw");
            file.write_all(b"{\"page_type\":\"genus\",\"identifier\":\"genus_2")
                .expect("write partial");
        }

        let reloaded = CompletionLedger::load(&path).await.expect("reload");
        assert!(reloaded.is_completed(TaxonRank::Genus, "genus_1").await);
        assert!(!reloaded.is_completed(TaxonRank::Genus, "genus_2").await);
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn completed_set_is_monotonic_across_runs() {
        let path = temp_path("monotonic");
        {
            let ledger = CompletionLedger::load(&path).await.expect("load");
            ledger
                .mark_completed(TaxonRank::Species, "sp_1")
                .await
                .expect("mark");
        }
        let before = replay(&path).await.expect("replay before");

        {
            let ledger = CompletionLedger::load(&path).await.expect("reload");
            // Marking again is harmless; the set is a union.
            ledger
                .mark_completed(TaxonRank::Species, "sp_1")
                .await
                .expect("re-mark");
            ledger
                .mark_completed(TaxonRank::Species, "sp_2")
                .await
                .expect("mark");
        }
        let after = replay(&path).await.expect("replay after");

        let before_set = before.get(&TaxonRank::Species).cloned().unwrap_or_default();
        let after_set = after.get(&TaxonRank::Species).cloned().unwrap_or_default();
        assert!(before_set.is_subset(&after_set));
        assert_eq!(after_set.len(), 2);
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn missing_file_replays_empty() {
        let path = temp_path("fresh");
        let sets = replay(&path).await.expect("replay");
        assert!(sets.is_empty());
    }
}
