//! Usage analytics store: session and VM accounting with time-ranged
//! rollups and upsert-by-business-key semantics. Backed by the same
//! `rusqlite`-via-`tokio-rusqlite` pattern as the API-key store.

use std::path::Path;

use chrono::Utc;
use fleet_core::ids;
use fleet_core::types::{CostCounts, SessionRecord, TokenCounts, VmAccountingRecord};
use rusqlite::OptionalExtension;
use thiserror::Error;
use tokio_rusqlite::Connection;

#[derive(Debug, Error)]
pub enum UsageError {
    #[error("database error: {0}")]
    Database(String),
}

impl From<tokio_rusqlite::Error> for UsageError {
    fn from(e: tokio_rusqlite::Error) -> Self {
        UsageError::Database(e.to_string())
    }
}

pub struct UsageStore {
    conn: Connection,
}

#[derive(Debug, Default)]
pub struct SessionInput {
    pub session_id: String,
    pub agent: String,
    pub parent_agent: Option<String>,
    pub model: String,
    pub tokens: TokenCounts,
    pub cost: CostCounts,
    pub turns: u32,
    pub tool_calls: std::collections::HashMap<String, i64>,
    pub started_at: String,
    pub ended_at: Option<String>,
}

#[derive(Debug, Default)]
pub struct VmRecordInput {
    pub vm_id: String,
    pub role: String,
    pub agent: String,
    pub commit_id: Option<String>,
    pub created_at: String,
    pub destroyed_at: Option<String>,
}

#[derive(Debug, Default, serde::Serialize)]
pub struct UsageSummary {
    pub tokens: i64,
    pub cost: f64,
    pub sessions: i64,
    pub vms: i64,
    #[serde(rename = "byAgent")]
    pub by_agent: Vec<AgentUsage>,
}

#[derive(Debug, Default, serde::Serialize)]
pub struct AgentUsage {
    pub agent: String,
    pub tokens: i64,
    pub cost: f64,
    pub sessions: i64,
}

impl UsageStore {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, UsageError> {
        if let Some(parent) = path.as_ref().parent() {
            tokio::fs::create_dir_all(parent).await.ok();
        }
        let conn = Connection::open(path.as_ref().to_owned()).await?;
        conn.call(|conn| {
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS sessions (
                    id TEXT PRIMARY KEY,
                    session_id TEXT NOT NULL UNIQUE,
                    agent TEXT NOT NULL,
                    parent_agent TEXT,
                    model TEXT NOT NULL,
                    tokens_input INTEGER NOT NULL DEFAULT 0,
                    tokens_output INTEGER NOT NULL DEFAULT 0,
                    tokens_cache_read INTEGER NOT NULL DEFAULT 0,
                    tokens_cache_write INTEGER NOT NULL DEFAULT 0,
                    tokens_total INTEGER NOT NULL DEFAULT 0,
                    cost_input REAL NOT NULL DEFAULT 0,
                    cost_output REAL NOT NULL DEFAULT 0,
                    cost_cache_read REAL NOT NULL DEFAULT 0,
                    cost_cache_write REAL NOT NULL DEFAULT 0,
                    cost_total REAL NOT NULL DEFAULT 0,
                    turns INTEGER NOT NULL DEFAULT 0,
                    tool_calls TEXT NOT NULL DEFAULT '{}',
                    started_at TEXT NOT NULL,
                    ended_at TEXT,
                    recorded_at TEXT NOT NULL
                );
                CREATE TABLE IF NOT EXISTS vm_records (
                    id TEXT PRIMARY KEY,
                    vm_id TEXT NOT NULL,
                    role TEXT NOT NULL,
                    agent TEXT NOT NULL,
                    commit_id TEXT,
                    created_at TEXT NOT NULL,
                    destroyed_at TEXT,
                    recorded_at TEXT NOT NULL
                );",
            )?;
            Ok(())
        })
        .await?;
        Ok(Self { conn })
    }

    pub async fn record_session(&self, input: SessionInput) -> Result<SessionRecord, UsageError> {
        let id = ids::new_id();
        let recorded_at = ids::now_iso();
        self.insert_session(id, input, recorded_at).await
    }

    /// If a row with `session_id` already exists, UPDATE every mutable
    /// field and return it with the existing `id`; otherwise INSERT. The
    /// `id` is stable across repeated calls for the same `session_id`.
    pub async fn upsert_session(&self, input: SessionInput) -> Result<SessionRecord, UsageError> {
        let session_id = input.session_id.clone();
        let existing_id: Option<String> = self
            .conn
            .call(move |conn| {
                Ok(conn
                    .query_row("SELECT id FROM sessions WHERE session_id = ?1", rusqlite::params![session_id], |r| r.get(0))
                    .optional()?)
            })
            .await?;

        let recorded_at = ids::now_iso();
        match existing_id {
            Some(id) => self.update_session(id, input, recorded_at).await,
            None => self.insert_session(ids::new_id(), input, recorded_at).await,
        }
    }

    async fn insert_session(&self, id: String, input: SessionInput, recorded_at: String) -> Result<SessionRecord, UsageError> {
        let record = to_session_record(id, input, recorded_at);
        let r = record.clone();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO sessions (id, session_id, agent, parent_agent, model,
                        tokens_input, tokens_output, tokens_cache_read, tokens_cache_write, tokens_total,
                        cost_input, cost_output, cost_cache_read, cost_cache_write, cost_total,
                        turns, tool_calls, started_at, ended_at, recorded_at)
                     VALUES (?1,?2,?3,?4,?5, ?6,?7,?8,?9,?10, ?11,?12,?13,?14,?15, ?16,?17,?18,?19,?20)",
                    rusqlite::params![
                        r.id, r.session_id, r.agent, r.parent_agent, r.model,
                        r.tokens.input, r.tokens.output, r.tokens.cache_read, r.tokens.cache_write, r.tokens.total,
                        r.cost.input, r.cost.output, r.cost.cache_read, r.cost.cache_write, r.cost.total,
                        r.turns, serde_json::to_string(&r.tool_calls).unwrap_or_else(|_| "{}".into()),
                        r.started_at, r.ended_at, r.recorded_at,
                    ],
                )?;
                Ok(())
            })
            .await?;
        Ok(record)
    }

    async fn update_session(&self, id: String, input: SessionInput, recorded_at: String) -> Result<SessionRecord, UsageError> {
        let record = to_session_record(id, input, recorded_at);
        let r = record.clone();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE sessions SET agent=?2, parent_agent=?3, model=?4,
                        tokens_input=?5, tokens_output=?6, tokens_cache_read=?7, tokens_cache_write=?8, tokens_total=?9,
                        cost_input=?10, cost_output=?11, cost_cache_read=?12, cost_cache_write=?13, cost_total=?14,
                        turns=?15, tool_calls=?16, ended_at=?17, recorded_at=?18
                     WHERE id=?1",
                    rusqlite::params![
                        r.id, r.agent, r.parent_agent, r.model,
                        r.tokens.input, r.tokens.output, r.tokens.cache_read, r.tokens.cache_write, r.tokens.total,
                        r.cost.input, r.cost.output, r.cost.cache_read, r.cost.cache_write, r.cost.total,
                        r.turns, serde_json::to_string(&r.tool_calls).unwrap_or_else(|_| "{}".into()),
                        r.ended_at, r.recorded_at,
                    ],
                )?;
                Ok(())
            })
            .await?;
        Ok(record)
    }

    /// If `destroyed_at` is supplied and a prior record for `vm_id`
    /// exists, UPDATE its `destroyed_at`; otherwise INSERT a new row.
    pub async fn record_vm(&self, input: VmRecordInput) -> Result<VmAccountingRecord, UsageError> {
        if let Some(destroyed_at) = input.destroyed_at.clone() {
            let vm_id = input.vm_id.clone();
            let existing_id: Option<String> = self
                .conn
                .call(move |conn| {
                    Ok(conn
                        .query_row(
                            "SELECT id FROM vm_records WHERE vm_id = ?1 AND destroyed_at IS NULL ORDER BY created_at DESC LIMIT 1",
                            rusqlite::params![vm_id],
                            |r| r.get(0),
                        )
                        .optional()?)
                })
                .await?;

            if let Some(id) = existing_id {
                let recorded_at = ids::now_iso();
                let id2 = id.clone();
                let destroyed_at2 = destroyed_at.clone();
                let recorded_at2 = recorded_at.clone();
                self.conn
                    .call(move |conn| {
                        conn.execute(
                            "UPDATE vm_records SET destroyed_at=?2, recorded_at=?3 WHERE id=?1",
                            rusqlite::params![id2, destroyed_at2, recorded_at2],
                        )?;
                        Ok(())
                    })
                    .await?;
                return self.get_vm_record(&id).await;
            }
        }

        let id = ids::new_id();
        let recorded_at = ids::now_iso();
        let record = VmAccountingRecord {
            id: id.clone(),
            vm_id: input.vm_id,
            role: input.role,
            agent: input.agent,
            commit_id: input.commit_id,
            created_at: input.created_at,
            destroyed_at: input.destroyed_at,
            recorded_at,
        };
        let r = record.clone();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO vm_records (id, vm_id, role, agent, commit_id, created_at, destroyed_at, recorded_at)
                     VALUES (?1,?2,?3,?4,?5,?6,?7,?8)",
                    rusqlite::params![r.id, r.vm_id, r.role, r.agent, r.commit_id, r.created_at, r.destroyed_at, r.recorded_at],
                )?;
                Ok(())
            })
            .await?;
        Ok(record)
    }

    async fn get_vm_record(&self, id: &str) -> Result<VmAccountingRecord, UsageError> {
        let id = id.to_owned();
        let record = self
            .conn
            .call(move |conn| {
                Ok(conn.query_row(
                    "SELECT id, vm_id, role, agent, commit_id, created_at, destroyed_at, recorded_at
                     FROM vm_records WHERE id = ?1",
                    rusqlite::params![id],
                    row_to_vm_record,
                )?)
            })
            .await?;
        Ok(record)
    }

    /// `range` matches `/^\d+(h|d)$/`; anything else falls back to
    /// epoch-0 (all history).
    pub async fn summary(&self, range: &str) -> Result<UsageSummary, UsageError> {
        let cutoff = range_cutoff(range);

        let rows: Vec<(String, i64, f64)> = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare("SELECT agent, tokens_total, cost_total FROM sessions WHERE recorded_at >= ?1")?;
                let rows = stmt
                    .query_map(rusqlite::params![cutoff], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?, r.get::<_, f64>(2)?)))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;

        let session_count: i64 = rows.len() as i64;
        let vm_count: i64 = {
            let cutoff = cutoff.clone();
            self.conn
                .call(move |conn| Ok(conn.query_row("SELECT COUNT(*) FROM vm_records WHERE recorded_at >= ?1", rusqlite::params![cutoff], |r| r.get(0))?))
                .await?
        };

        let mut by_agent: std::collections::HashMap<String, AgentUsage> = std::collections::HashMap::new();
        let mut total_tokens = 0i64;
        let mut total_cost = 0f64;
        for (agent, tokens, cost) in rows {
            total_tokens += tokens;
            total_cost += cost;
            let entry = by_agent.entry(agent.clone()).or_insert_with(|| AgentUsage { agent, ..Default::default() });
            entry.tokens += tokens;
            entry.cost += cost;
            entry.sessions += 1;
        }

        let mut by_agent: Vec<AgentUsage> = by_agent.into_values().collect();
        by_agent.sort_by(|a, b| b.cost.partial_cmp(&a.cost).unwrap_or(std::cmp::Ordering::Equal));
        for a in &mut by_agent {
            a.cost = round2(a.cost);
        }

        Ok(UsageSummary {
            tokens: total_tokens,
            cost: round2(total_cost),
            sessions: session_count,
            vms: vm_count,
            by_agent,
        })
    }

    pub async fn list_sessions(&self, agent: Option<&str>, range: Option<&str>) -> Result<Vec<SessionRecord>, UsageError> {
        let cutoff = range.map(range_cutoff).unwrap_or_else(|| "0".into());
        let agent = agent.map(|s| s.to_string());
        let rows = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, session_id, agent, parent_agent, model,
                        tokens_input, tokens_output, tokens_cache_read, tokens_cache_write, tokens_total,
                        cost_input, cost_output, cost_cache_read, cost_cache_write, cost_total,
                        turns, tool_calls, started_at, ended_at, recorded_at
                     FROM sessions WHERE recorded_at >= ?1 AND (?2 IS NULL OR agent = ?2)
                     ORDER BY recorded_at DESC",
                )?;
                let rows = stmt
                    .query_map(rusqlite::params![cutoff, agent], row_to_session)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;
        Ok(rows)
    }

    /// Deduplicates by `vm_id`, keeping the most recent record.
    pub async fn list_vms(&self, role: Option<&str>, range: Option<&str>) -> Result<Vec<VmAccountingRecord>, UsageError> {
        let cutoff = range.map(range_cutoff).unwrap_or_else(|| "0".into());
        let role = role.map(|s| s.to_string());
        let rows = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, vm_id, role, agent, commit_id, created_at, destroyed_at, recorded_at
                     FROM vm_records WHERE recorded_at >= ?1 AND (?2 IS NULL OR role = ?2)
                     ORDER BY recorded_at DESC",
                )?;
                let rows = stmt
                    .query_map(rusqlite::params![cutoff, role], row_to_vm_record)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;

        let mut seen = std::collections::HashSet::new();
        Ok(rows.into_iter().filter(|r| seen.insert(r.vm_id.clone())).collect())
    }
}

fn to_session_record(id: String, input: SessionInput, recorded_at: String) -> SessionRecord {
    SessionRecord {
        id,
        session_id: input.session_id,
        agent: input.agent,
        parent_agent: input.parent_agent,
        model: input.model,
        tokens: input.tokens,
        cost: input.cost,
        turns: input.turns,
        tool_calls: input.tool_calls,
        started_at: input.started_at,
        ended_at: input.ended_at,
        recorded_at,
    }
}

fn row_to_session(row: &rusqlite::Row) -> rusqlite::Result<SessionRecord> {
    let tool_calls_json: String = row.get(16)?;
    Ok(SessionRecord {
        id: row.get(0)?,
        session_id: row.get(1)?,
        agent: row.get(2)?,
        parent_agent: row.get(3)?,
        model: row.get(4)?,
        tokens: TokenCounts {
            input: row.get(5)?,
            output: row.get(6)?,
            cache_read: row.get(7)?,
            cache_write: row.get(8)?,
            total: row.get(9)?,
        },
        cost: CostCounts {
            input: row.get(10)?,
            output: row.get(11)?,
            cache_read: row.get(12)?,
            cache_write: row.get(13)?,
            total: row.get(14)?,
        },
        turns: row.get::<_, i64>(15)? as u32,
        tool_calls: serde_json::from_str(&tool_calls_json).unwrap_or_default(),
        started_at: row.get(17)?,
        ended_at: row.get(18)?,
        recorded_at: row.get(19)?,
    })
}

fn row_to_vm_record(row: &rusqlite::Row) -> rusqlite::Result<VmAccountingRecord> {
    Ok(VmAccountingRecord {
        id: row.get(0)?,
        vm_id: row.get(1)?,
        role: row.get(2)?,
        agent: row.get(3)?,
        commit_id: row.get(4)?,
        created_at: row.get(5)?,
        destroyed_at: row.get(6)?,
        recorded_at: row.get(7)?,
    })
}

fn range_cutoff(range: &str) -> String {
    let digits: String = range.chars().take_while(|c| c.is_ascii_digit()).collect();
    let unit = range.chars().nth(digits.len());
    let cutoff = match (digits.parse::<i64>().ok(), unit) {
        (Some(n), Some('h')) => Utc::now() - chrono::Duration::hours(n),
        (Some(n), Some('d')) => Utc::now() - chrono::Duration::days(n),
        _ => return "0".to_string(),
    };
    cutoff.to_rfc3339()
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn session(session_id: &str, agent: &str, tokens: i64, cost: f64) -> SessionInput {
        SessionInput {
            session_id: session_id.into(),
            agent: agent.into(),
            parent_agent: None,
            model: "m1".into(),
            tokens: TokenCounts { total: tokens, ..Default::default() },
            cost: CostCounts { total: cost, ..Default::default() },
            turns: 1,
            tool_calls: Default::default(),
            started_at: ids::now_iso(),
            ended_at: None,
        }
    }

    #[tokio::test]
    async fn upsert_is_stable_across_calls() {
        let dir = tempdir().unwrap();
        let store = UsageStore::open(dir.path().join("usage.db")).await.unwrap();
        let first = store.upsert_session(session("s1", "a1", 10, 1.0)).await.unwrap();
        let second = store.upsert_session(session("s1", "a1", 50, 5.0)).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.tokens.total, 50);
    }

    #[tokio::test]
    async fn record_session_allocates_new_id_each_time() {
        let dir = tempdir().unwrap();
        let store = UsageStore::open(dir.path().join("usage.db")).await.unwrap();
        let a = store.record_session(session("s1", "a1", 10, 1.0)).await.unwrap();
        let b = store.record_session(session("s2", "a1", 10, 1.0)).await.unwrap();
        assert_ne!(a.id, b.id);
    }

    #[tokio::test]
    async fn summary_groups_by_agent_sorted_by_cost_descending() {
        let dir = tempdir().unwrap();
        let store = UsageStore::open(dir.path().join("usage.db")).await.unwrap();
        store.record_session(session("s1", "a1", 10, 1.0)).await.unwrap();
        store.record_session(session("s2", "a2", 10, 5.0)).await.unwrap();

        let summary = store.summary("30d").await.unwrap();
        assert_eq!(summary.sessions, 2);
        assert_eq!(summary.by_agent[0].agent, "a2");
    }

    #[tokio::test]
    async fn record_vm_updates_destroyed_at_on_existing_row() {
        let dir = tempdir().unwrap();
        let store = UsageStore::open(dir.path().join("usage.db")).await.unwrap();
        let created = store
            .record_vm(VmRecordInput {
                vm_id: "vm1".into(),
                role: "worker".into(),
                agent: "a1".into(),
                commit_id: None,
                created_at: ids::now_iso(),
                destroyed_at: None,
            })
            .await
            .unwrap();

        let destroyed = store
            .record_vm(VmRecordInput {
                vm_id: "vm1".into(),
                role: "worker".into(),
                agent: "a1".into(),
                commit_id: None,
                created_at: ids::now_iso(),
                destroyed_at: Some(ids::now_iso()),
            })
            .await
            .unwrap();

        assert_eq!(created.id, destroyed.id);
        assert!(destroyed.destroyed_at.is_some());
    }

    #[tokio::test]
    async fn list_vms_deduplicates_by_vm_id() {
        let dir = tempdir().unwrap();
        let store = UsageStore::open(dir.path().join("usage.db")).await.unwrap();
        store
            .record_vm(VmRecordInput {
                vm_id: "vm1".into(),
                role: "worker".into(),
                agent: "a1".into(),
                commit_id: None,
                created_at: ids::now_iso(),
                destroyed_at: None,
            })
            .await
            .unwrap();
        store
            .record_vm(VmRecordInput {
                vm_id: "vm1".into(),
                role: "worker".into(),
                agent: "a1".into(),
                commit_id: None,
                created_at: ids::now_iso(),
                destroyed_at: Some(ids::now_iso()),
            })
            .await
            .unwrap();

        let vms = store.list_vms(None, None).await.unwrap();
        assert_eq!(vms.len(), 1);
    }
}
