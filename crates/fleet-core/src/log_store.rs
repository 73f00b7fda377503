//! Generic append-only JSONL store.
//!
//! Backs Feed, Journal, Log, Commits, and (as a fallback) VM accounting.
//! Every line is a complete JSON record; malformed lines are skipped at
//! load time rather than failing startup, since a partially-written last
//! line is the expected shape of an unclean shutdown.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::warn;

use crate::atomic_io;
use crate::error::CoreResult;
use crate::ids;

/// A record a `LogStore` can append. Implementors fill in `id`/timestamp
/// only if the caller left them unset, mirroring the append-log's
/// "assign id and timestamp if not set" contract.
pub trait LogRecord: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    fn id(&self) -> &str;
    fn ensure_id_and_timestamp(&mut self);
}

struct Inner<T> {
    records: VecDeque<T>,
    max_in_memory: Option<usize>,
}

#[derive(Clone)]
pub struct LogStore<T> {
    path: PathBuf,
    inner: Arc<Mutex<Inner<T>>>,
}

impl<T: LogRecord> LogStore<T> {
    /// Load `path` line by line. A line that fails to parse is skipped
    /// silently — the store remains bootable over a partially-corrupted
    /// file. `max_in_memory` bounds the in-memory ring (disk still holds
    /// every record); pass `None` for stores that need full history
    /// in memory (e.g. Commits).
    pub async fn open(path: impl Into<PathBuf>, max_in_memory: Option<usize>) -> CoreResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut records = VecDeque::new();
        if let Ok(contents) = tokio::fs::read_to_string(&path).await {
            for line in contents.lines() {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<T>(line) {
                    Ok(record) => records.push_back(record),
                    Err(e) => warn!(path = %path.display(), error = %e, "skipping malformed log line"),
                }
            }
        }

        if let Some(cap) = max_in_memory {
            while records.len() > cap {
                records.pop_front();
            }
        }

        Ok(Self {
            path,
            inner: Arc::new(Mutex::new(Inner {
                records,
                max_in_memory,
            })),
        })
    }

    /// Append `record`, filling in id/timestamp if unset, to both the
    /// in-memory ring and the file (synchronously, before returning).
    pub async fn append(&self, mut record: T) -> CoreResult<T> {
        record.ensure_id_and_timestamp();
        let line = serde_json::to_string(&record)?;

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.flush().await?;

        let mut guard = self.inner.lock().await;
        guard.records.push_back(record.clone());
        if let Some(cap) = guard.max_in_memory {
            while guard.records.len() > cap {
                guard.records.pop_front();
            }
        }
        Ok(record)
    }

    /// Remove every record for which `predicate` returns true, then
    /// atomically rewrite the whole file to match. Used by stores that
    /// support deletion (e.g. revoking a commit entry).
    pub async fn delete(&self, predicate: impl Fn(&T) -> bool) -> CoreResult<bool> {
        let mut guard = self.inner.lock().await;
        let before = guard.records.len();
        guard.records.retain(|r| !predicate(r));
        let removed = guard.records.len() != before;

        if removed {
            let mut bytes = Vec::new();
            for record in guard.records.iter() {
                bytes.extend_from_slice(serde_json::to_string(record)?.as_bytes());
                bytes.push(b'\n');
            }
            atomic_io::atomic_write(&self.path, &bytes).await?;
        }
        Ok(removed)
    }

    pub async fn list(&self, filter: impl Fn(&T) -> bool) -> Vec<T> {
        let guard = self.inner.lock().await;
        guard.records.iter().filter(|r| filter(r)).cloned().collect()
    }

    pub async fn all(&self) -> Vec<T> {
        self.list(|_| true).await
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.records.len()
    }
}

/// Helper shared by `LogRecord` implementors: only fill in a field the
/// caller left at its zero value.
pub fn fill_if_empty(field: &mut String, make: impl FnOnce() -> String) {
    if field.is_empty() {
        *field = make();
    }
}

pub fn new_id_if_empty(field: &mut String) {
    fill_if_empty(field, ids::new_id)
}

pub fn now_if_empty(field: &mut String) {
    fill_if_empty(field, ids::now_iso)
}
