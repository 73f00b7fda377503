//! Crash-safe file I/O: write-to-temp-then-rename, and recovery of a
//! temp sibling left behind by a process that died mid-write.
//!
//! Grounded in the same crash-safety idiom as a PID lockfile's
//! create-new-or-detect-stale dance, generalized from "claim a path" to
//! "durably replace a path's contents".

use std::path::{Path, PathBuf};

use crate::error::CoreResult;

fn tmp_path(path: &Path) -> PathBuf {
    let mut s = path.as_os_str().to_owned();
    s.push(".tmp");
    PathBuf::from(s)
}

/// Write `bytes` to `path` atomically: ensure the parent directory exists,
/// write `path.tmp`, then rename over `path`. On POSIX the rename is an
/// atomic dirent swap within one filesystem, so a reader never observes a
/// partially-written file.
pub async fn atomic_write(path: &Path, bytes: &[u8]) -> CoreResult<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = tmp_path(path);
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoverOutcome {
    /// `path` exists and is valid; any stale `.tmp` sibling was dropped.
    Ok,
    /// `path` was missing or invalid but `.tmp` was valid; `.tmp` was
    /// promoted over `path`.
    Recovered,
    /// Neither `path` nor a valid `.tmp` existed.
    Empty,
}

/// Recover `path` during store initialization, called before the first
/// read. `validate` decides whether a candidate's bytes are well-formed
/// (the default notion is "parses as JSON", callers of the generic stores
/// pass their own schema check).
pub async fn recover(
    path: &Path,
    validate: impl Fn(&[u8]) -> bool,
) -> CoreResult<RecoverOutcome> {
    let tmp = tmp_path(path);

    let main_bytes = tokio::fs::read(path).await.ok();
    let main_valid = main_bytes.as_deref().is_some_and(&validate);

    if main_valid {
        if tokio::fs::try_exists(&tmp).await.unwrap_or(false) {
            let _ = tokio::fs::remove_file(&tmp).await;
        }
        return Ok(RecoverOutcome::Ok);
    }

    let tmp_bytes = tokio::fs::read(&tmp).await.ok();
    let tmp_valid = tmp_bytes.as_deref().is_some_and(&validate);

    if tmp_valid {
        tokio::fs::rename(&tmp, path).await?;
        return Ok(RecoverOutcome::Recovered);
    }

    if tokio::fs::try_exists(&tmp).await.unwrap_or(false) {
        let _ = tokio::fs::remove_file(&tmp).await;
    }
    Ok(RecoverOutcome::Empty)
}

pub fn is_json(bytes: &[u8]) -> bool {
    serde_json::from_slice::<serde_json::Value>(bytes).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn atomic_write_creates_parent_and_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/board.json");
        atomic_write(&path, b"{\"a\":1}").await.unwrap();
        let contents = tokio::fs::read(&path).await.unwrap();
        assert_eq!(contents, b"{\"a\":1}");
    }

    #[tokio::test]
    async fn atomic_write_leaves_no_tmp_sibling() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("board.json");
        atomic_write(&path, b"{}").await.unwrap();
        assert!(!tmp_path(&path).exists());
    }

    #[tokio::test]
    async fn recover_reports_ok_for_valid_main() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("board.json");
        tokio::fs::write(&path, b"{}").await.unwrap();
        let outcome = recover(&path, is_json).await.unwrap();
        assert_eq!(outcome, RecoverOutcome::Ok);
    }

    #[tokio::test]
    async fn recover_promotes_valid_tmp_over_missing_main() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("board.json");
        let tmp = tmp_path(&path);
        tokio::fs::write(&tmp, b"{\"tasks\":{}}").await.unwrap();

        let outcome = recover(&path, is_json).await.unwrap();
        assert_eq!(outcome, RecoverOutcome::Recovered);
        assert!(!tmp.exists());
        let contents = tokio::fs::read(&path).await.unwrap();
        assert_eq!(contents, b"{\"tasks\":{}}");
    }

    #[tokio::test]
    async fn recover_promotes_valid_tmp_over_corrupt_main() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("board.json");
        let tmp = tmp_path(&path);
        tokio::fs::write(&path, b"{not json").await.unwrap();
        tokio::fs::write(&tmp, b"{\"tasks\":{}}").await.unwrap();

        let outcome = recover(&path, is_json).await.unwrap();
        assert_eq!(outcome, RecoverOutcome::Recovered);
        let contents = tokio::fs::read(&path).await.unwrap();
        assert_eq!(contents, b"{\"tasks\":{}}");
    }

    #[tokio::test]
    async fn recover_reports_empty_when_nothing_valid() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("board.json");
        let outcome = recover(&path, is_json).await.unwrap();
        assert_eq!(outcome, RecoverOutcome::Empty);
    }

    #[tokio::test]
    async fn recover_drops_stale_tmp_when_main_is_valid() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("board.json");
        let tmp = tmp_path(&path);
        tokio::fs::write(&path, b"{}").await.unwrap();
        tokio::fs::write(&tmp, b"{stale").await.unwrap();

        recover(&path, is_json).await.unwrap();
        assert!(!tmp.exists());
    }
}
