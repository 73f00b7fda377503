//! Generic durable whole-document map store.
//!
//! Backs every feature that keeps its state as a JSON object keyed by
//! primary key (board, reports, registry, skills, extensions, agent
//! manifests, share links). An in-memory `HashMap` is the source of truth
//! between flushes; writes are debounced and replaced atomically on disk.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::warn;

use crate::atomic_io::{self, RecoverOutcome};
use crate::error::CoreResult;

const FLUSH_DEBOUNCE: Duration = Duration::from_millis(100);

struct Inner<V> {
    map: HashMap<String, V>,
    flush_pending: bool,
}

/// A durable map store over entities of type `V`, keyed by `String` primary
/// key. Clone is cheap — it shares the underlying lock and path.
#[derive(Clone)]
pub struct MapStore<V> {
    path: PathBuf,
    inner: Arc<Mutex<Inner<V>>>,
}

impl<V> MapStore<V>
where
    V: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    /// Recover `path`, bulk-load its contents into memory, and return a
    /// store ready for use. Missing or unparseable files start empty —
    /// append-on-first-write still works because `path`'s parent is
    /// created lazily by `atomic_write`.
    pub async fn open(path: impl Into<PathBuf>) -> CoreResult<Self> {
        let path = path.into();
        let outcome = atomic_io::recover(&path, atomic_io::is_json).await?;
        if outcome == RecoverOutcome::Recovered {
            warn!(path = %path.display(), "recovered durable map store from .tmp sibling");
        }

        let map: HashMap<String, V> = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_default(),
            Err(_) => HashMap::new(),
        };

        Ok(Self {
            path,
            inner: Arc::new(Mutex::new(Inner {
                map,
                flush_pending: false,
            })),
        })
    }

    /// Apply `f` to the in-memory map and schedule a debounced flush.
    /// `f`'s return value is handed back to the caller so route handlers
    /// can read the entity they just created/mutated without a second
    /// lookup.
    pub async fn mutate<R>(&self, f: impl FnOnce(&mut HashMap<String, V>) -> R) -> R {
        let result = {
            let mut guard = self.inner.lock().await;
            f(&mut guard.map)
        };
        self.schedule_flush().await;
        result
    }

    /// Read-only snapshot access, for listings and single-entity reads.
    pub async fn with_map<R>(&self, f: impl FnOnce(&HashMap<String, V>) -> R) -> R {
        let guard = self.inner.lock().await;
        f(&guard.map)
    }

    pub async fn get(&self, key: &str) -> Option<V> {
        self.with_map(|m| m.get(key).cloned()).await
    }

    async fn schedule_flush(&self) {
        let mut guard = self.inner.lock().await;
        if guard.flush_pending {
            return;
        }
        guard.flush_pending = true;
        drop(guard);

        let store = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(FLUSH_DEBOUNCE).await;
            if let Err(e) = store.flush().await {
                warn!(error = %e, path = %store.path.display(), "debounced flush failed, will retry on next mutation");
            }
            store.inner.lock().await.flush_pending = false;
        });
    }

    /// Serialize and write the whole map immediately, cancelling the need
    /// for any in-flight debounce timer to do the same work. Used for
    /// graceful shutdown and test teardown.
    pub async fn flush(&self) -> CoreResult<()> {
        let bytes = {
            let guard = self.inner.lock().await;
            serde_json::to_vec_pretty(&guard.map)?
        };
        atomic_io::atomic_write(&self.path, &bytes).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::tempdir;

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    struct Widget {
        id: String,
        count: u32,
    }

    #[tokio::test]
    async fn open_on_missing_file_starts_empty() {
        let dir = tempdir().unwrap();
        let store: MapStore<Widget> = MapStore::open(dir.path().join("widgets.json")).await.unwrap();
        assert_eq!(store.with_map(|m| m.len()).await, 0);
    }

    #[tokio::test]
    async fn mutate_then_flush_then_reopen_roundtrips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("widgets.json");
        let store: MapStore<Widget> = MapStore::open(&path).await.unwrap();

        store
            .mutate(|m| {
                m.insert(
                    "w1".into(),
                    Widget {
                        id: "w1".into(),
                        count: 3,
                    },
                );
            })
            .await;
        store.flush().await.unwrap();

        let reopened: MapStore<Widget> = MapStore::open(&path).await.unwrap();
        let widget = reopened.get("w1").await.unwrap();
        assert_eq!(widget.count, 3);
    }

    #[tokio::test]
    async fn debounced_flush_eventually_persists() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("widgets.json");
        let store: MapStore<Widget> = MapStore::open(&path).await.unwrap();

        store
            .mutate(|m| {
                m.insert(
                    "w1".into(),
                    Widget {
                        id: "w1".into(),
                        count: 1,
                    },
                );
            })
            .await;

        tokio::time::sleep(Duration::from_millis(250)).await;
        let reopened: MapStore<Widget> = MapStore::open(&path).await.unwrap();
        assert!(reopened.get("w1").await.is_some());
    }

    #[tokio::test]
    async fn recovers_from_valid_tmp_sibling_on_open() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("widgets.json");
        let tmp = dir.path().join("widgets.json.tmp");
        tokio::fs::write(&tmp, br#"{"w1":{"id":"w1","count":9}}"#)
            .await
            .unwrap();

        let store: MapStore<Widget> = MapStore::open(&path).await.unwrap();
        assert_eq!(store.get("w1").await.unwrap().count, 9);
        assert!(!tmp.exists());
    }
}
