//! `/feed/*` — the agent activity stream: append, list, stats, and the
//! SSE tail.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use fleet_core::types::FeedEvent;
use serde::Deserialize;

use crate::api_error::ApiError;
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/events", get(list_events).post(append_event))
        .route("/stats", get(stats))
        .route("/stream", get(stream))
        .with_state(state)
}

#[derive(Deserialize)]
pub struct ListQuery {
    agent: Option<String>,
    limit: Option<usize>,
}

async fn list_events(State(state): State<AppState>, Query(q): Query<ListQuery>) -> Json<Vec<FeedEvent>> {
    Json(state.feed.list(q.agent.as_deref(), q.limit).await)
}

#[derive(Deserialize)]
pub struct AppendEvent {
    agent: String,
    kind: String,
    summary: String,
    #[serde(default)]
    detail: Option<String>,
    #[serde(default)]
    metadata: Option<serde_json::Value>,
}

async fn append_event(State(state): State<AppState>, Json(body): Json<AppendEvent>) -> Result<impl IntoResponse, ApiError> {
    let event = FeedEvent {
        id: String::new(),
        agent: body.agent,
        kind: body.kind,
        summary: body.summary,
        detail: body.detail,
        metadata: body.metadata,
        timestamp: String::new(),
    };
    let stored = state.feed.append(event).await?;
    Ok((StatusCode::CREATED, Json(stored)))
}

async fn stats(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(state.feed.stats().await)
}

#[derive(Deserialize)]
pub struct StreamQuery {
    agent: Option<String>,
    since: Option<String>,
}

async fn stream(State(state): State<AppState>, Query(q): Query<StreamQuery>) -> Sse<impl futures_util::Stream<Item = Result<axum::response::sse::Event, std::convert::Infallible>>> {
    let subscription = state.feed.bus.subscribe(
        move |e: &FeedEvent| q.agent.as_deref().is_none_or(|a| e.agent == a),
        q.since.as_deref(),
    );
    crate::sse::sse_response(subscription)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tempfile::tempdir;
    use tower::ServiceExt;

    async fn test_state() -> (tempfile::TempDir, AppState) {
        let dir = tempdir().unwrap();
        let state = AppState::open(&crate::state::DataLayout::new(dir.path())).await.unwrap();
        (dir, state)
    }

    #[tokio::test]
    async fn append_then_list_round_trips() {
        let (_dir, state) = test_state().await;
        let app = router(state);

        let req = Request::builder()
            .method("POST")
            .uri("/events")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"agent":"a1","kind":"note","summary":"hi"}"#))
            .unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);

        let list_req = Request::builder().uri("/events").body(Body::empty()).unwrap();
        let resp = app.oneshot(list_req).await.unwrap();
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let events: Vec<FeedEvent> = serde_json::from_slice(&body).unwrap();
        assert_eq!(events.len(), 1);
    }
}
