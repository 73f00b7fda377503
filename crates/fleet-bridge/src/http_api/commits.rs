//! `/commits/*` — VM snapshot ledger.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use fleet_core::types::CommitEntry;
use serde::Deserialize;

use crate::api_error::ApiError;
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(list_commits).post(create_commit))
        .route("/{id}", get(get_commit))
        .with_state(state)
}

#[derive(Deserialize)]
pub struct ListQuery {
    #[serde(rename = "vmId")]
    vm_id: Option<String>,
}

async fn list_commits(State(state): State<AppState>, Query(q): Query<ListQuery>) -> Json<Vec<CommitEntry>> {
    Json(state.commits.list(q.vm_id.as_deref()).await)
}

#[derive(Deserialize)]
pub struct CreateCommit {
    #[serde(rename = "commitId")]
    commit_id: String,
    #[serde(rename = "vmId")]
    vm_id: String,
    label: Option<String>,
    agent: Option<String>,
    tags: Option<Vec<String>>,
    metadata: Option<serde_json::Value>,
}

async fn create_commit(State(state): State<AppState>, Json(body): Json<CreateCommit>) -> Result<impl IntoResponse, ApiError> {
    let entry = CommitEntry {
        id: String::new(),
        commit_id: body.commit_id,
        vm_id: body.vm_id,
        timestamp: String::new(),
        label: body.label,
        agent: body.agent,
        tags: body.tags,
        metadata: body.metadata,
    };
    let stored = state.commits.create(entry).await?;
    Ok((StatusCode::CREATED, Json(stored)))
}

async fn get_commit(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<CommitEntry>, ApiError> {
    Ok(Json(state.commits.get(&id).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tempfile::tempdir;
    use tower::ServiceExt;

    #[tokio::test]
    async fn create_then_list_filters_by_vm() {
        let dir = tempdir().unwrap();
        let state = AppState::open(&crate::state::DataLayout::new(dir.path())).await.unwrap();
        let app = router(state);

        let req = Request::builder()
            .method("POST")
            .uri("/")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"commitId":"sha1","vmId":"vm1"}"#))
            .unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);

        let req = Request::builder().uri("/?vmId=vm1").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let commits: Vec<CommitEntry> = serde_json::from_slice(&body).unwrap();
        assert_eq!(commits.len(), 1);
    }
}
