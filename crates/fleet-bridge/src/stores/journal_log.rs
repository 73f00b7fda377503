//! Journal and Log are both plain append-only text streams — same
//! schema, separate files, separate feature identity.

use std::path::Path;

use fleet_core::log_store::LogStore;
use fleet_core::types::TextEntry;
use fleet_core::{CoreError, CoreResult};

#[derive(Clone)]
pub struct TextStream {
    entries: LogStore<TextEntry>,
}

impl TextStream {
    pub async fn open(path: impl AsRef<Path>) -> CoreResult<Self> {
        Ok(Self {
            entries: LogStore::open(path.as_ref().to_owned(), None).await?,
        })
    }

    pub async fn append(&self, text: &str, author: Option<String>, agent: Option<String>, tags: Option<Vec<String>>) -> CoreResult<TextEntry> {
        let text = text.trim();
        if text.is_empty() {
            return Err(CoreError::validation("text must not be empty"));
        }
        let mut entry = TextEntry::new(text);
        entry.author = author;
        entry.agent = agent;
        entry.tags = tags;
        self.entries.append(entry).await
    }

    pub async fn list(&self, since: Option<&str>, limit: Option<usize>) -> Vec<TextEntry> {
        let mut entries = self
            .entries
            .list(|e| since.is_none_or(|s| e.timestamp.as_str() > s))
            .await;
        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        if let Some(limit) = limit {
            entries.truncate(limit);
        }
        entries
    }

    /// Plain-text rendering for the `/raw` endpoints: one entry per line.
    pub async fn raw(&self) -> String {
        self.entries
            .all()
            .await
            .into_iter()
            .map(|e| format!("[{}] {}", e.timestamp, e.text))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn append_rejects_blank_text() {
        let dir = tempdir().unwrap();
        let stream = TextStream::open(dir.path().join("journal.jsonl")).await.unwrap();
        assert!(stream.append("   ", None, None, None).await.is_err());
    }

    #[tokio::test]
    async fn raw_renders_one_line_per_entry() {
        let dir = tempdir().unwrap();
        let stream = TextStream::open(dir.path().join("journal.jsonl")).await.unwrap();
        stream.append("first", Some("alice".into()), None, None).await.unwrap();
        stream.append("second", Some("alice".into()), None, None).await.unwrap();
        assert_eq!(stream.raw().await.lines().count(), 2);
    }

    #[tokio::test]
    async fn list_sorts_newest_first() {
        let dir = tempdir().unwrap();
        let stream = TextStream::open(dir.path().join("journal.jsonl")).await.unwrap();
        stream.append("first", None, None, None).await.unwrap();
        stream.append("second", None, None, None).await.unwrap();
        let listed = stream.list(None, None).await;
        assert_eq!(listed[0].text, "second");
    }
}
