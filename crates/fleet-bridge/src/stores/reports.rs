//! Reports and their public share links, plus per-visit access logging.
//!
//! Reports are a whole-document `MapStore` (infrequent writes, no
//! aggregate query need); share links are backed by `rusqlite` via
//! `tokio-rusqlite`, matching the API-key and usage stores — the
//! persisted file is an embedded-SQL database, not a JSON document.

use std::path::Path;
use std::sync::Arc;

use fleet_core::log_store::LogStore;
use fleet_core::map_store::MapStore;
use fleet_core::types::{AccessEntry, Report, ShareLink};
use fleet_core::{CoreError, CoreResult};
use rusqlite::OptionalExtension;
use tokio_rusqlite::Connection;

#[derive(Clone)]
pub struct ReportsStore {
    reports: MapStore<Report>,
    shares: Arc<Connection>,
    access_log: LogStore<AccessEntry>,
}

impl ReportsStore {
    pub async fn open(
        reports_path: impl AsRef<Path>,
        shares_path: impl AsRef<Path>,
        access_log_path: impl AsRef<Path>,
    ) -> CoreResult<Self> {
        let shares_path = shares_path.as_ref().to_owned();
        if let Some(parent) = shares_path.parent() {
            tokio::fs::create_dir_all(parent).await.ok();
        }
        let shares = Connection::open(shares_path).await.map_err(to_io)?;
        shares
            .call(|conn| {
                conn.execute_batch(
                    "CREATE TABLE IF NOT EXISTS share_links (
                        link_id TEXT PRIMARY KEY,
                        report_id TEXT NOT NULL,
                        created_by TEXT NOT NULL,
                        created_at TEXT NOT NULL,
                        expires_at TEXT,
                        revoked INTEGER NOT NULL DEFAULT 0,
                        label TEXT
                    )",
                )?;
                Ok(())
            })
            .await
            .map_err(to_io)?;

        Ok(Self {
            reports: MapStore::open(reports_path.as_ref().to_owned()).await?,
            shares: Arc::new(shares),
            access_log: LogStore::open(access_log_path.as_ref().to_owned(), None).await?,
        })
    }

    pub async fn create(&self, title: &str, author: &str, content: &str) -> CoreResult<Report> {
        let title = title.trim();
        if title.is_empty() {
            return Err(CoreError::validation("title must not be empty"));
        }
        let report = Report::new(title, author, content);
        self.reports.mutate(|m| m.insert(report.id.clone(), report.clone())).await;
        Ok(report)
    }

    pub async fn get(&self, id: &str) -> CoreResult<Report> {
        self.reports.get(id).await.ok_or_else(|| CoreError::not_found(format!("report {id} not found")))
    }

    pub async fn list(&self, tag: Option<&str>) -> Vec<Report> {
        let mut reports = self
            .reports
            .with_map(|m| {
                m.values()
                    .filter(|r| tag.is_none_or(|t| r.tags.iter().any(|x| x == t)))
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .await;
        reports.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        reports
    }

    pub async fn share(&self, report_id: &str, created_by: &str) -> CoreResult<ShareLink> {
        self.get(report_id).await?;
        let link = ShareLink::new(report_id, created_by);
        let l = link.clone();
        self.shares
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO share_links (link_id, report_id, created_by, created_at, expires_at, revoked, label)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    rusqlite::params![l.link_id, l.report_id, l.created_by, l.created_at, l.expires_at, l.revoked as i64, l.label],
                )?;
                Ok(())
            })
            .await
            .map_err(to_io)?;
        Ok(link)
    }

    pub async fn shares_for(&self, report_id: &str) -> CoreResult<Vec<ShareLink>> {
        let report_id = report_id.to_owned();
        self.shares
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT link_id, report_id, created_by, created_at, expires_at, revoked, label
                     FROM share_links WHERE report_id = ?1",
                )?;
                let rows = stmt.query_map(rusqlite::params![report_id], row_to_share)?.collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
            .map_err(to_io)
    }

    /// Resolve a public share link: `NotFound` for an unknown, revoked, or
    /// expired link, since a visitor has no standing to distinguish the two.
    pub async fn resolve_share(&self, link_id: &str) -> CoreResult<(ShareLink, Report)> {
        let link_id_owned = link_id.to_owned();
        let link = self
            .shares
            .call(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT link_id, report_id, created_by, created_at, expires_at, revoked, label
                         FROM share_links WHERE link_id = ?1",
                        rusqlite::params![link_id_owned],
                        row_to_share,
                    )
                    .optional()?)
            })
            .await
            .map_err(to_io)?
            .filter(|l: &ShareLink| l.is_valid())
            .ok_or_else(|| CoreError::not_found(format!("share link {link_id} not found")))?;
        let report = self.get(&link.report_id).await?;
        Ok((link, report))
    }

    pub async fn record_access(
        &self,
        link_id: &str,
        ip: Option<String>,
        user_agent: Option<String>,
        referrer: Option<String>,
    ) -> CoreResult<()> {
        self.access_log
            .append(AccessEntry {
                id: String::new(),
                link_id: link_id.to_string(),
                ip,
                user_agent,
                referrer,
                timestamp: String::new(),
            })
            .await?;
        Ok(())
    }

    pub async fn revoke_share(&self, link_id: &str) -> CoreResult<ShareLink> {
        let link_id_owned = link_id.to_owned();
        let affected = self
            .shares
            .call(move |conn| Ok(conn.execute("UPDATE share_links SET revoked = 1 WHERE link_id = ?1", rusqlite::params![link_id_owned])?))
            .await
            .map_err(to_io)?;
        if affected == 0 {
            return Err(CoreError::not_found(format!("share link {link_id} not found")));
        }
        let link_id_owned = link_id.to_owned();
        self.shares
            .call(move |conn| {
                Ok(conn.query_row(
                    "SELECT link_id, report_id, created_by, created_at, expires_at, revoked, label
                     FROM share_links WHERE link_id = ?1",
                    rusqlite::params![link_id_owned],
                    row_to_share,
                )?)
            })
            .await
            .map_err(to_io)
    }

    pub async fn flush(&self) -> CoreResult<()> {
        self.reports.flush().await
    }
}

fn row_to_share(row: &rusqlite::Row) -> rusqlite::Result<ShareLink> {
    let revoked: i64 = row.get(5)?;
    Ok(ShareLink {
        link_id: row.get(0)?,
        report_id: row.get(1)?,
        created_by: row.get(2)?,
        created_at: row.get(3)?,
        expires_at: row.get(4)?,
        revoked: revoked != 0,
        label: row.get(6)?,
    })
}

fn to_io(e: tokio_rusqlite::Error) -> CoreError {
    CoreError::Io(e.to_string())
}
