//! Commit ledger (VM snapshot records), unique by `commitId`.

use std::path::Path;

use fleet_core::log_store::LogStore;
use fleet_core::types::CommitEntry;
use fleet_core::{CoreError, CoreResult};

#[derive(Clone)]
pub struct CommitsStore {
    commits: LogStore<CommitEntry>,
}

impl CommitsStore {
    pub async fn open(path: impl AsRef<Path>) -> CoreResult<Self> {
        Ok(Self {
            commits: LogStore::open(path.as_ref().to_owned(), None).await?,
        })
    }

    pub async fn create(&self, mut entry: CommitEntry) -> CoreResult<CommitEntry> {
        let exists = self.commits.list(|c| c.commit_id == entry.commit_id).await;
        if !exists.is_empty() {
            return Err(CoreError::conflict(format!("commit {} already recorded", entry.commit_id)));
        }
        entry.id = String::new();
        self.commits.append(entry).await
    }

    pub async fn get(&self, id: &str) -> CoreResult<CommitEntry> {
        self.commits
            .list(|c| c.id == id)
            .await
            .into_iter()
            .next()
            .ok_or_else(|| CoreError::not_found(format!("commit {id} not found")))
    }

    pub async fn list(&self, vm_id: Option<&str>) -> Vec<CommitEntry> {
        let mut commits = self.commits.list(|c| vm_id.is_none_or(|v| c.vm_id == v)).await;
        commits.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        commits
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn entry(commit_id: &str, vm_id: &str) -> CommitEntry {
        CommitEntry {
            id: String::new(),
            commit_id: commit_id.into(),
            vm_id: vm_id.into(),
            timestamp: String::new(),
            label: None,
            agent: None,
            tags: None,
            metadata: None,
        }
    }

    #[tokio::test]
    async fn duplicate_commit_id_conflicts() {
        let dir = tempdir().unwrap();
        let store = CommitsStore::open(dir.path().join("commits.jsonl")).await.unwrap();
        store.create(entry("sha1", "vm1")).await.unwrap();
        assert!(store.create(entry("sha1", "vm1")).await.is_err());
    }

    #[tokio::test]
    async fn list_filters_by_vm() {
        let dir = tempdir().unwrap();
        let store = CommitsStore::open(dir.path().join("commits.jsonl")).await.unwrap();
        store.create(entry("sha1", "vm1")).await.unwrap();
        store.create(entry("sha2", "vm2")).await.unwrap();
        assert_eq!(store.list(Some("vm1")).await.len(), 1);
    }
}
