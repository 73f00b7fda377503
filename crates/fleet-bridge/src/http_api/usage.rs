//! `/usage/*` — session and VM accounting, plus time-ranged rollups.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use fleet_core::types::{CostCounts, SessionRecord, TokenCounts, VmAccountingRecord};
use serde::Deserialize;
use std::collections::HashMap;

use crate::api_error::ApiError;
use crate::state::AppState;
use crate::usage::{SessionInput, UsageSummary, VmRecordInput};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(summary))
        .route("/sessions", get(list_sessions).post(record_session))
        .route("/vms", get(list_vms).post(record_vm))
        .with_state(state)
}

#[derive(Deserialize)]
pub struct RangeQuery {
    #[serde(default = "default_range")]
    range: String,
}

fn default_range() -> String {
    "30d".to_string()
}

async fn summary(State(state): State<AppState>, Query(q): Query<RangeQuery>) -> Result<Json<UsageSummary>, ApiError> {
    Ok(Json(state.usage.summary(&q.range).await?))
}

#[derive(Deserialize)]
pub struct SessionListQuery {
    agent: Option<String>,
    range: Option<String>,
}

async fn list_sessions(State(state): State<AppState>, Query(q): Query<SessionListQuery>) -> Result<Json<Vec<SessionRecord>>, ApiError> {
    Ok(Json(state.usage.list_sessions(q.agent.as_deref(), q.range.as_deref()).await?))
}

#[derive(Deserialize)]
pub struct RecordSession {
    #[serde(rename = "sessionId")]
    session_id: String,
    agent: String,
    #[serde(rename = "parentAgent")]
    parent_agent: Option<String>,
    model: String,
    #[serde(default)]
    tokens: TokenCounts,
    #[serde(default)]
    cost: CostCounts,
    #[serde(default)]
    turns: u32,
    #[serde(rename = "toolCalls", default)]
    tool_calls: HashMap<String, i64>,
    #[serde(rename = "startedAt")]
    started_at: String,
    #[serde(rename = "endedAt")]
    ended_at: Option<String>,
}

async fn record_session(State(state): State<AppState>, Json(body): Json<RecordSession>) -> Result<impl IntoResponse, ApiError> {
    let record = state
        .usage
        .upsert_session(SessionInput {
            session_id: body.session_id,
            agent: body.agent,
            parent_agent: body.parent_agent,
            model: body.model,
            tokens: body.tokens,
            cost: body.cost,
            turns: body.turns,
            tool_calls: body.tool_calls,
            started_at: body.started_at,
            ended_at: body.ended_at,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(record)))
}

#[derive(Deserialize)]
pub struct VmListQuery {
    role: Option<String>,
    range: Option<String>,
}

async fn list_vms(State(state): State<AppState>, Query(q): Query<VmListQuery>) -> Result<Json<Vec<VmAccountingRecord>>, ApiError> {
    Ok(Json(state.usage.list_vms(q.role.as_deref(), q.range.as_deref()).await?))
}

#[derive(Deserialize)]
pub struct RecordVm {
    #[serde(rename = "vmId")]
    vm_id: String,
    role: String,
    agent: String,
    #[serde(rename = "commitId")]
    commit_id: Option<String>,
    #[serde(rename = "createdAt")]
    created_at: String,
    #[serde(rename = "destroyedAt")]
    destroyed_at: Option<String>,
}

async fn record_vm(State(state): State<AppState>, Json(body): Json<RecordVm>) -> Result<impl IntoResponse, ApiError> {
    let record = state
        .usage
        .record_vm(VmRecordInput {
            vm_id: body.vm_id,
            role: body.role,
            agent: body.agent,
            commit_id: body.commit_id,
            created_at: body.created_at,
            destroyed_at: body.destroyed_at,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(record)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tempfile::tempdir;
    use tower::ServiceExt;

    #[tokio::test]
    async fn record_session_then_summary_reports_totals() {
        let dir = tempdir().unwrap();
        let state = AppState::open(&crate::state::DataLayout::new(dir.path())).await.unwrap();
        let app = router(state);

        let req = Request::builder()
            .method("POST")
            .uri("/sessions")
            .header("content-type", "application/json")
            .body(Body::from(
                r#"{"sessionId":"s1","agent":"a1","model":"m1","tokens":{"total":10},"cost":{"total":1.0},"startedAt":"2026-01-01T00:00:00Z"}"#,
            ))
            .unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);

        let req = Request::builder().uri("/?range=30d").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let summary: UsageSummary = serde_json::from_slice(&body).unwrap();
        assert_eq!(summary.sessions, 1);
        assert_eq!(summary.tokens, 10);
    }
}
