//! API-key store: hash-on-insert keys in a single SQLite table, lookup by
//! hash, revocation. Backed by `rusqlite` via `tokio-rusqlite` so every
//! call runs on the connection's dedicated background thread without
//! blocking the async request path.

use std::path::Path;

use fleet_core::ids;
use rand::RngCore;
use rusqlite::OptionalExtension;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio_rusqlite::Connection;

use fleet_core::types::PublicApiKey;

#[derive(Debug, Error)]
pub enum ApiKeyError {
    #[error("database error: {0}")]
    Database(String),
}

impl From<tokio_rusqlite::Error> for ApiKeyError {
    fn from(e: tokio_rusqlite::Error) -> Self {
        ApiKeyError::Database(e.to_string())
    }
}

pub struct ApiKeyStore {
    conn: Connection,
}

impl ApiKeyStore {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, ApiKeyError> {
        if let Some(parent) = path.as_ref().parent() {
            tokio::fs::create_dir_all(parent).await.ok();
        }
        let conn = Connection::open(path.as_ref().to_owned()).await?;
        conn.call(|conn| {
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS api_keys (
                    id TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    key_hash TEXT NOT NULL UNIQUE,
                    key_prefix TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    revoked_at TEXT,
                    scopes TEXT NOT NULL
                )",
            )?;
            Ok(())
        })
        .await?;
        Ok(Self { conn })
    }

    /// Generate a raw key, hash it, and insert a new row. The raw key is
    /// returned exactly once here — no subsequent call ever reveals it
    /// again.
    pub async fn create(
        &self,
        name: String,
        scopes: Vec<String>,
    ) -> Result<(PublicApiKey, String), ApiKeyError> {
        let mut random_bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut random_bytes);
        let raw_key = format!("vk_{}", hex::encode(random_bytes));
        let key_hash = hash_key(&raw_key);
        let key_prefix = raw_key.chars().take(7).collect::<String>();

        let id = ids::new_id();
        let created_at = ids::now_iso();
        let scopes_json = serde_json::to_string(&scopes).unwrap_or_else(|_| "[]".into());

        let public = PublicApiKey {
            id: id.clone(),
            name: name.clone(),
            key_prefix: key_prefix.clone(),
            created_at: created_at.clone(),
            revoked_at: None,
            scopes: scopes.clone(),
        };

        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO api_keys (id, name, key_hash, key_prefix, created_at, revoked_at, scopes)
                     VALUES (?1, ?2, ?3, ?4, ?5, NULL, ?6)",
                    rusqlite::params![id, name, key_hash, key_prefix, created_at, scopes_json],
                )?;
                Ok(())
            })
            .await?;

        Ok((public, raw_key))
    }

    /// Hash `raw` and look it up; `Ok(None)` iff no row exists or the row
    /// is revoked.
    pub async fn verify(&self, raw: &str) -> Result<Option<PublicApiKey>, ApiKeyError> {
        let key_hash = hash_key(raw);
        let row = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, name, key_prefix, created_at, revoked_at, scopes
                     FROM api_keys WHERE key_hash = ?1 AND revoked_at IS NULL",
                )?;
                let row = stmt
                    .query_row(rusqlite::params![key_hash], row_to_public_key)
                    .optional()?;
                Ok(row)
            })
            .await?;
        Ok(row)
    }

    pub async fn get(&self, id: &str) -> Result<Option<PublicApiKey>, ApiKeyError> {
        let id = id.to_owned();
        let row = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, name, key_prefix, created_at, revoked_at, scopes
                     FROM api_keys WHERE id = ?1",
                )?;
                let row = stmt.query_row(rusqlite::params![id], row_to_public_key).optional()?;
                Ok(row)
            })
            .await?;
        Ok(row)
    }

    pub async fn list(&self) -> Result<Vec<PublicApiKey>, ApiKeyError> {
        let rows = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, name, key_prefix, created_at, revoked_at, scopes
                     FROM api_keys ORDER BY created_at DESC",
                )?;
                let rows = stmt
                    .query_map([], row_to_public_key)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;
        Ok(rows)
    }

    /// Sets `revoked_at` only when currently null. Returns whether a row
    /// was affected.
    pub async fn revoke(&self, id: &str) -> Result<bool, ApiKeyError> {
        let id = id.to_owned();
        let now = ids::now_iso();
        let affected = self
            .conn
            .call(move |conn| {
                let n = conn.execute(
                    "UPDATE api_keys SET revoked_at = ?1 WHERE id = ?2 AND revoked_at IS NULL",
                    rusqlite::params![now, id],
                )?;
                Ok(n)
            })
            .await?;
        Ok(affected > 0)
    }
}

fn hash_key(raw: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    hex::encode(hasher.finalize())
}

fn row_to_public_key(row: &rusqlite::Row) -> rusqlite::Result<PublicApiKey> {
    let scopes_json: String = row.get(5)?;
    let scopes: Vec<String> = serde_json::from_str(&scopes_json).unwrap_or_default();
    Ok(PublicApiKey {
        id: row.get(0)?,
        name: row.get(1)?,
        key_prefix: row.get(2)?,
        created_at: row.get(3)?,
        revoked_at: row.get(4)?,
        scopes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_returns_raw_key_matching_format() {
        let dir = tempfile::tempdir().unwrap();
        let store = ApiKeyStore::open(dir.path().join("api-keys.db")).await.unwrap();
        let (public, raw) = store.create("ci-bot".into(), vec!["read".into()]).await.unwrap();

        assert!(raw.starts_with("vk_"));
        assert_eq!(raw.len(), 3 + 64);
        assert_eq!(public.key_prefix, raw.chars().take(7).collect::<String>());
    }

    #[tokio::test]
    async fn verify_succeeds_for_active_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = ApiKeyStore::open(dir.path().join("api-keys.db")).await.unwrap();
        let (public, raw) = store.create("ci-bot".into(), vec![]).await.unwrap();

        let verified = store.verify(&raw).await.unwrap().unwrap();
        assert_eq!(verified.id, public.id);
    }

    #[tokio::test]
    async fn verify_fails_for_unknown_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = ApiKeyStore::open(dir.path().join("api-keys.db")).await.unwrap();
        assert!(store.verify("vk_nonexistent").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn revoke_then_verify_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = ApiKeyStore::open(dir.path().join("api-keys.db")).await.unwrap();
        let (public, raw) = store.create("ci-bot".into(), vec![]).await.unwrap();

        let affected = store.revoke(&public.id).await.unwrap();
        assert!(affected);
        assert!(store.verify(&raw).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn double_revoke_reports_no_further_effect() {
        let dir = tempfile::tempdir().unwrap();
        let store = ApiKeyStore::open(dir.path().join("api-keys.db")).await.unwrap();
        let (public, _raw) = store.create("ci-bot".into(), vec![]).await.unwrap();

        assert!(store.revoke(&public.id).await.unwrap());
        assert!(!store.revoke(&public.id).await.unwrap());
    }

    #[tokio::test]
    async fn list_never_exposes_raw_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = ApiKeyStore::open(dir.path().join("api-keys.db")).await.unwrap();
        store.create("ci-bot".into(), vec![]).await.unwrap();

        let keys = store.list().await.unwrap();
        assert_eq!(keys.len(), 1);
        // PublicApiKey has no rawKey field at all -- this is a compile-time
        // guarantee as much as a runtime one.
        assert!(keys[0].revoked_at.is_none());
    }
}
