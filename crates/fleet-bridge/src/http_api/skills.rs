//! `/skills/*` — the skill hub: items, extensions, agent manifests, the
//! sync protocol, and the change-event SSE tail.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use fleet_core::types::{AgentManifest, ChangeEvent, ChangeEventKind, SkillItem, SyncPlanEntry, VersionedRef};
use serde::Deserialize;

use crate::api_error::ApiError;
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/items", get(list_items).post(publish_item))
        .route("/items/{id}/enabled", post(set_item_enabled))
        .route("/extensions", get(list_extensions).post(publish_extension))
        .route("/extensions/{id}/enabled", post(set_extension_enabled))
        .route("/sync", post(sync))
        .route("/manifest/{agent_id}", get(manifest))
        .route("/stream", get(stream))
        .with_state(state)
}

async fn list_items(State(state): State<AppState>) -> Json<Vec<SkillItem>> {
    Json(state.skills.list(ChangeEventKind::Skill).await)
}

async fn list_extensions(State(state): State<AppState>) -> Json<Vec<SkillItem>> {
    Json(state.skills.list(ChangeEventKind::Extension).await)
}

#[derive(Deserialize)]
pub struct Publish {
    name: String,
    description: String,
    content: String,
    #[serde(rename = "publishedBy")]
    published_by: String,
}

async fn publish_item(State(state): State<AppState>, Json(body): Json<Publish>) -> Result<impl IntoResponse, ApiError> {
    publish(state, ChangeEventKind::Skill, body).await
}

async fn publish_extension(State(state): State<AppState>, Json(body): Json<Publish>) -> Result<impl IntoResponse, ApiError> {
    publish(state, ChangeEventKind::Extension, body).await
}

async fn publish(state: AppState, kind: ChangeEventKind, body: Publish) -> Result<impl IntoResponse, ApiError> {
    let item = state.skills.publish(kind, &body.name, &body.description, &body.content, &body.published_by).await?;
    Ok((StatusCode::CREATED, Json(item)))
}

#[derive(Deserialize)]
pub struct SetEnabled {
    enabled: bool,
}

async fn set_item_enabled(State(state): State<AppState>, Path(id): Path<String>, Json(body): Json<SetEnabled>) -> Result<Json<SkillItem>, ApiError> {
    Ok(Json(state.skills.set_enabled(ChangeEventKind::Skill, &id, body.enabled).await?))
}

async fn set_extension_enabled(State(state): State<AppState>, Path(id): Path<String>, Json(body): Json<SetEnabled>) -> Result<Json<SkillItem>, ApiError> {
    Ok(Json(state.skills.set_enabled(ChangeEventKind::Extension, &id, body.enabled).await?))
}

#[derive(Deserialize)]
pub struct SyncRequest {
    #[serde(rename = "agentId")]
    agent_id: String,
    #[serde(rename = "vmId")]
    vm_id: Option<String>,
    #[serde(default)]
    skills: Vec<VersionedRef>,
    #[serde(default)]
    extensions: Vec<VersionedRef>,
}

async fn sync(State(state): State<AppState>, Json(body): Json<SyncRequest>) -> Result<Json<Vec<SyncPlanEntry>>, ApiError> {
    let plan = state.skills.sync(&body.agent_id, body.vm_id.as_deref(), body.skills, body.extensions).await?;
    Ok(Json(plan))
}

async fn manifest(State(state): State<AppState>, Path(agent_id): Path<String>) -> Result<Json<AgentManifest>, ApiError> {
    state.skills.manifest(&agent_id).await.map(Json).ok_or_else(|| fleet_core::CoreError::not_found(format!("no manifest for {agent_id}")).into())
}

#[derive(Deserialize)]
pub struct StreamQuery {
    since: Option<String>,
}

async fn stream(State(state): State<AppState>, Query(q): Query<StreamQuery>) -> Sse<impl futures_util::Stream<Item = Result<axum::response::sse::Event, std::convert::Infallible>>> {
    let subscription = state.skills.changes.subscribe(|_: &ChangeEvent| true, q.since.as_deref());
    crate::sse::sse_response(subscription)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tempfile::tempdir;
    use tower::ServiceExt;

    #[tokio::test]
    async fn publish_then_sync_requests_install() {
        let dir = tempdir().unwrap();
        let state = AppState::open(&crate::state::DataLayout::new(dir.path())).await.unwrap();
        let app = router(state);

        let req = Request::builder()
            .method("POST")
            .uri("/items")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"name":"git","description":"d","content":"c","publishedBy":"ops"}"#))
            .unwrap();
        app.clone().oneshot(req).await.unwrap();

        let sync_req = Request::builder()
            .method("POST")
            .uri("/sync")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"agentId":"agent1","skills":[],"extensions":[]}"#))
            .unwrap();
        let resp = app.oneshot(sync_req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let plan: Vec<SyncPlanEntry> = serde_json::from_slice(&body).unwrap();
        assert_eq!(plan.len(), 1);
    }
}
