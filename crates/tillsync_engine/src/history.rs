//! Append-only log of completed runs.

use crate::error::{EngineError, EngineResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use tillsync_protocol::SyncHistoryEntry;
use std::io::SeekFrom;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

/// Storage for [`SyncHistoryEntry`] values.
#[async_trait]
pub trait SyncHistoryStore: Send + Sync {
    /// Appends an entry.
    async fn append(&self, entry: SyncHistoryEntry) -> EngineResult<()>;

    /// Returns up to `count` entries, newest first.
    async fn recent(&self, count: usize) -> EngineResult<Vec<SyncHistoryEntry>>;

    /// Removes entries that started before `cutoff` and returns how many
    /// were removed.
    async fn prune_older_than(&self, cutoff: DateTime<Utc>) -> EngineResult<usize>;

    /// Most recent successful entry.
    async fn last_successful(&self) -> EngineResult<Option<SyncHistoryEntry>> {
        Ok(self
            .recent(usize::MAX)
            .await?
            .into_iter()
            .find(|entry| entry.success))
    }
}

/// History kept in memory.
#[derive(Debug, Default)]
pub struct MemoryHistory {
    entries: RwLock<Vec<SyncHistoryEntry>>,
}

impl MemoryHistory {
    /// Creates an empty history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true if no entries are stored.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[async_trait]
impl SyncHistoryStore for MemoryHistory {
    async fn append(&self, entry: SyncHistoryEntry) -> EngineResult<()> {
        self.entries.write().push(entry);
        Ok(())
    }

    async fn recent(&self, count: usize) -> EngineResult<Vec<SyncHistoryEntry>> {
        Ok(newest_first(self.entries.read().clone(), count))
    }

    async fn prune_older_than(&self, cutoff: DateTime<Utc>) -> EngineResult<usize> {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|entry| entry.started_at >= cutoff);
        Ok(before - entries.len())
    }
}

/// History kept as a JSON-lines file, one entry per line.
///
/// Appends open the file in append mode. Pruning rewrites the file through
/// a temporary file and a rename. Operations on one instance are
/// serialized.
#[derive(Debug)]
pub struct FileHistory {
    path: PathBuf,
    lock: tokio::sync::Mutex<()>,
}

impl FileHistory {
    /// Uses the log at `path`. The file is created on first append.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Returns the log path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self) -> EngineResult<Vec<SyncHistoryEntry>> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(history_error(&self.path, e)),
        };

        let mut entries = Vec::new();
        for (line_no, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    // A torn final line from a crash is skipped, not fatal.
                    tracing::warn!(path = %self.path.display(), line = line_no + 1, error = %e, "skipping unreadable history line");
                }
            }
        }
        Ok(entries)
    }
}

/// Returns true if the file at `path` is non-empty and does not end with a
/// newline.
async fn ends_mid_line(path: &Path) -> std::io::Result<bool> {
    let mut file = match tokio::fs::File::open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    };
    if file.metadata().await?.len() == 0 {
        return Ok(false);
    }
    file.seek(SeekFrom::End(-1)).await?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last).await?;
    Ok(last[0] != b'\n')
}

#[async_trait]
impl SyncHistoryStore for FileHistory {
    async fn append(&self, entry: SyncHistoryEntry) -> EngineResult<()> {
        let _guard = self.lock.lock().await;
        let mut line = serde_json::to_vec(&entry)?;
        line.push(b'\n');

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| history_error(&self.path, e))?;
            }
        }
        // Start on a fresh line after a torn tail.
        if ends_mid_line(&self.path)
            .await
            .map_err(|e| history_error(&self.path, e))?
        {
            line.insert(0, b'\n');
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| history_error(&self.path, e))?;
        file.write_all(&line)
            .await
            .map_err(|e| history_error(&self.path, e))?;
        file.flush().await.map_err(|e| history_error(&self.path, e))?;
        Ok(())
    }

    async fn recent(&self, count: usize) -> EngineResult<Vec<SyncHistoryEntry>> {
        let _guard = self.lock.lock().await;
        Ok(newest_first(self.read_all().await?, count))
    }

    async fn prune_older_than(&self, cutoff: DateTime<Utc>) -> EngineResult<usize> {
        let _guard = self.lock.lock().await;
        let entries = self.read_all().await?;
        let before = entries.len();
        let kept: Vec<_> = entries
            .into_iter()
            .filter(|entry| entry.started_at >= cutoff)
            .collect();
        let removed = before - kept.len();
        if removed == 0 {
            return Ok(0);
        }

        let mut text = Vec::new();
        for entry in &kept {
            text.extend(serde_json::to_vec(entry)?);
            text.push(b'\n');
        }
        let tmp = self.path.with_extension("jsonl.tmp");
        tokio::fs::write(&tmp, &text)
            .await
            .map_err(|e| history_error(&tmp, e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| history_error(&self.path, e))?;
        Ok(removed)
    }
}

fn newest_first(mut entries: Vec<SyncHistoryEntry>, count: usize) -> Vec<SyncHistoryEntry> {
    entries.sort_by(|a, b| b.started_at.cmp(&a.started_at));
    entries.truncate(count);
    entries
}

fn history_error(path: &Path, error: std::io::Error) -> EngineError {
    EngineError::History(format!("{}: {error}", path.display()))
}
