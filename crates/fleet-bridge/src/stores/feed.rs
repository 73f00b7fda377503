//! Feed: the agent activity stream. Every entry is durably appended and
//! published to subscribers; the in-memory ring (for listing) and the
//! event bus's own ring (for SSE replay) are sized independently.

use std::path::Path;

use fleet_core::log_store::LogStore;
use fleet_core::types::FeedEvent;
use fleet_core::CoreResult;

use crate::event_bus::EventBus;

const DEFAULT_FEED_RING_CAP: usize = 1000;

#[derive(Clone)]
pub struct FeedStore {
    log: LogStore<FeedEvent>,
    pub bus: EventBus<FeedEvent>,
}

impl FeedStore {
    pub async fn open(path: impl AsRef<Path>) -> CoreResult<Self> {
        Self::open_with_cap(path, DEFAULT_FEED_RING_CAP).await
    }

    pub async fn open_with_cap(path: impl AsRef<Path>, ring_cap: usize) -> CoreResult<Self> {
        Ok(Self {
            log: LogStore::open(path.as_ref().to_owned(), Some(ring_cap)).await?,
            bus: EventBus::new(ring_cap),
        })
    }

    pub async fn append(&self, event: FeedEvent) -> CoreResult<FeedEvent> {
        let stored = self.log.append(event).await?;
        self.bus.publish(stored.clone());
        Ok(stored)
    }

    pub async fn list(&self, agent: Option<&str>, limit: Option<usize>) -> Vec<FeedEvent> {
        let mut events = self.log.list(|e| agent.is_none_or(|a| e.agent == a)).await;
        events.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        if let Some(limit) = limit {
            events.truncate(limit);
        }
        events
    }

    pub async fn stats(&self) -> serde_json::Value {
        let events = self.log.all().await;
        let mut by_agent: std::collections::HashMap<String, u64> = std::collections::HashMap::new();
        for e in &events {
            *by_agent.entry(e.agent.clone()).or_insert(0) += 1;
        }
        serde_json::json!({ "total": events.len(), "byAgent": by_agent })
    }
}
