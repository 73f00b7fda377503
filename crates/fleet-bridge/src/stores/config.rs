//! Key-value configuration store with secret masking. Backed by `rusqlite`
//! via `tokio-rusqlite`, matching the API-key and usage stores — the
//! persisted file is an embedded-SQL database, not a JSON document.

use std::path::Path;
use std::sync::Arc;

use fleet_core::types::{ConfigEntry, ConfigEntryType};
use fleet_core::{CoreError, CoreResult};
use rusqlite::OptionalExtension;
use tokio_rusqlite::Connection;

#[derive(Clone)]
pub struct ConfigStore {
    conn: Arc<Connection>,
}

impl ConfigStore {
    pub async fn open(path: impl AsRef<Path>) -> CoreResult<Self> {
        if let Some(parent) = path.as_ref().parent() {
            tokio::fs::create_dir_all(parent).await.ok();
        }
        let conn = Connection::open(path.as_ref().to_owned()).await.map_err(to_io)?;
        conn.call(|conn| {
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS config (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL,
                    kind TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                )",
            )?;
            Ok(())
        })
        .await
        .map_err(to_io)?;
        Ok(Self { conn: Arc::new(conn) })
    }

    pub async fn set(&self, key: &str, value: &str, kind: ConfigEntryType) -> CoreResult<ConfigEntry> {
        let key = key.trim();
        if key.is_empty() {
            return Err(CoreError::validation("key must not be empty"));
        }
        let entry = ConfigEntry {
            key: key.to_string(),
            value: value.to_string(),
            kind,
            updated_at: fleet_core::ids::now_iso(),
        };
        let e = entry.clone();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO config (key, value, kind, updated_at) VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(key) DO UPDATE SET value = excluded.value, kind = excluded.kind, updated_at = excluded.updated_at",
                    rusqlite::params![e.key, e.value, kind_to_str(e.kind), e.updated_at],
                )?;
                Ok(())
            })
            .await
            .map_err(to_io)?;
        Ok(entry)
    }

    /// Masked view for ordinary reads — every caller except explicit
    /// reveal/environment export.
    pub async fn get_masked(&self, key: &str) -> CoreResult<ConfigEntry> {
        let mut entry = self.get_raw(key).await?;
        entry.value = entry.masked_value();
        Ok(entry)
    }

    pub async fn get_raw(&self, key: &str) -> CoreResult<ConfigEntry> {
        let key_owned = key.to_owned();
        let row = self
            .conn
            .call(move |conn| {
                Ok(conn
                    .query_row("SELECT key, value, kind, updated_at FROM config WHERE key = ?1", rusqlite::params![key_owned], row_to_entry)
                    .optional()?)
            })
            .await
            .map_err(to_io)?;
        row.ok_or_else(|| CoreError::not_found(format!("config key {key} not found")))
    }

    pub async fn list_masked(&self) -> CoreResult<Vec<ConfigEntry>> {
        let rows = self.all_entries().await?;
        Ok(rows
            .into_iter()
            .map(|mut e| {
                e.value = e.masked_value();
                e
            })
            .collect())
    }

    pub async fn delete(&self, key: &str) -> CoreResult<()> {
        let key_owned = key.to_owned();
        let affected = self
            .conn
            .call(move |conn| Ok(conn.execute("DELETE FROM config WHERE key = ?1", rusqlite::params![key_owned])?))
            .await
            .map_err(to_io)?;
        if affected > 0 {
            Ok(())
        } else {
            Err(CoreError::not_found(format!("config key {key} not found")))
        }
    }

    /// Unmasked export, intended for agent environment injection only.
    pub async fn export_env(&self) -> CoreResult<Vec<ConfigEntry>> {
        self.all_entries().await
    }

    async fn all_entries(&self) -> CoreResult<Vec<ConfigEntry>> {
        self.conn
            .call(|conn| {
                let mut stmt = conn.prepare("SELECT key, value, kind, updated_at FROM config ORDER BY key")?;
                let rows = stmt.query_map([], row_to_entry)?.collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
            .map_err(to_io)
    }
}

fn kind_to_str(kind: ConfigEntryType) -> &'static str {
    match kind {
        ConfigEntryType::Config => "config",
        ConfigEntryType::Secret => "secret",
    }
}

fn row_to_entry(row: &rusqlite::Row) -> rusqlite::Result<ConfigEntry> {
    let kind_str: String = row.get(2)?;
    let kind = match kind_str.as_str() {
        "secret" => ConfigEntryType::Secret,
        _ => ConfigEntryType::Config,
    };
    Ok(ConfigEntry {
        key: row.get(0)?,
        value: row.get(1)?,
        kind,
        updated_at: row.get(3)?,
    })
}

fn to_io(e: tokio_rusqlite::Error) -> CoreError {
    CoreError::Io(e.to_string())
}
