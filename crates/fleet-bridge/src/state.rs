//! Shared application state: one instance of every durable store, cloned
//! into each request via Axum's `State` extractor.

use std::sync::Arc;

use fleet_core::CoreResult;
use fleet_harness::api_keys::ApiKeyStore;

use crate::stores::board::BoardStore;
use crate::stores::commits::CommitsStore;
use crate::stores::config::ConfigStore;
use crate::stores::feed::FeedStore;
use crate::stores::journal_log::TextStream;
use crate::stores::registry::RegistryStore;
use crate::stores::reports::ReportsStore;
use crate::stores::skills::SkillsStore;
use crate::usage::UsageStore;

#[derive(Clone)]
pub struct AppState {
    pub board: BoardStore,
    pub reports: ReportsStore,
    pub registry: RegistryStore,
    pub skills: SkillsStore,
    pub journal: TextStream,
    pub log: TextStream,
    pub commits: CommitsStore,
    pub config: ConfigStore,
    pub feed: FeedStore,
    pub usage: Arc<UsageStore>,
    pub api_keys: Arc<ApiKeyStore>,
}

/// Where every store's backing file lives, relative to a data directory
/// that's overridable at process start.
pub struct DataLayout {
    pub dir: std::path::PathBuf,
}

impl DataLayout {
    pub fn new(dir: impl Into<std::path::PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self, name: &str) -> std::path::PathBuf {
        self.dir.join(name)
    }
}

impl AppState {
    pub async fn open(layout: &DataLayout) -> CoreResult<Self> {
        let board = BoardStore::open(layout.path("board.json")).await?;
        let reports = ReportsStore::open(layout.path("reports.json"), layout.path("share.db"), layout.path("access.jsonl")).await?;
        let registry = RegistryStore::open(layout.path("registry.json")).await?;
        let skills = SkillsStore::open(layout.path("skills.json"), layout.path("extensions.json"), layout.path("agent-manifests.json")).await?;
        let journal = TextStream::open(layout.path("journal.jsonl")).await?;
        let log = TextStream::open(layout.path("log.jsonl")).await?;
        let commits = CommitsStore::open(layout.path("commits.jsonl")).await?;
        let config = ConfigStore::open(layout.path("config.db")).await?;
        let feed = FeedStore::open(layout.path("feed.jsonl")).await?;

        let usage = UsageStore::open(layout.path("usage.db"))
            .await
            .map_err(|e| fleet_core::CoreError::Io(e.to_string()))?;
        let api_keys = ApiKeyStore::open(layout.path("api-keys.db"))
            .await
            .map_err(|e| fleet_core::CoreError::Io(e.to_string()))?;

        Ok(Self {
            board,
            reports,
            registry,
            skills,
            journal,
            log,
            commits,
            config,
            feed,
            usage: Arc::new(usage),
            api_keys: Arc::new(api_keys),
        })
    }

    /// Forces every whole-document store's debounced write now; the
    /// append-only log stores (feed, journal, log, commits) write
    /// synchronously on each append and need no flush call, and neither
    /// do the SQLite-backed stores (config, usage, api_keys, share links).
    pub async fn flush_all(&self) -> CoreResult<()> {
        self.board.flush().await?;
        self.reports.flush().await?;
        self.registry.flush().await?;
        self.skills.flush().await
    }
}
