//! `/journal` and `/log` — identical text-stream handlers parameterized
//! over which [`TextStream`] field of [`AppState`] they read from, since
//! the two features share a schema but not an identity.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use fleet_core::types::TextEntry;
use serde::Deserialize;

use crate::api_error::ApiError;
use crate::state::AppState;
use crate::stores::journal_log::TextStream;

pub fn journal_router(state: AppState) -> Router {
    text_router(state, |s| s.journal.clone())
}

pub fn log_router(state: AppState) -> Router {
    text_router(state, |s| s.log.clone())
}

#[derive(Clone)]
struct TextState {
    stream: TextStream,
}

fn text_router(state: AppState, select: impl Fn(&AppState) -> TextStream) -> Router {
    let stream = select(&state);
    Router::new()
        .route("/", get(list_entries).post(append_entry))
        .route("/raw", get(raw))
        .with_state(TextState { stream })
}

#[derive(Deserialize)]
pub struct ListQuery {
    since: Option<String>,
    limit: Option<usize>,
}

async fn list_entries(State(state): State<TextState>, Query(q): Query<ListQuery>) -> Json<Vec<TextEntry>> {
    Json(state.stream.list(q.since.as_deref(), q.limit).await)
}

#[derive(Deserialize)]
pub struct AppendEntry {
    text: String,
    author: Option<String>,
    agent: Option<String>,
    #[serde(default)]
    tags: Option<Vec<String>>,
}

async fn append_entry(State(state): State<TextState>, Json(body): Json<AppendEntry>) -> Result<impl IntoResponse, ApiError> {
    let entry = state.stream.append(&body.text, body.author, body.agent, body.tags).await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

async fn raw(State(state): State<TextState>) -> impl IntoResponse {
    ([("Content-Type", "text/plain")], state.stream.raw().await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tempfile::tempdir;
    use tower::ServiceExt;

    #[tokio::test]
    async fn append_then_raw_renders_line() {
        let dir = tempdir().unwrap();
        let state = AppState::open(&crate::state::DataLayout::new(dir.path())).await.unwrap();
        let app = journal_router(state);

        let req = Request::builder()
            .method("POST")
            .uri("/")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"text":"hello"}"#))
            .unwrap();
        app.clone().oneshot(req).await.unwrap();

        let raw_req = Request::builder().uri("/raw").body(Body::empty()).unwrap();
        let resp = app.oneshot(raw_req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        assert!(String::from_utf8(body.to_vec()).unwrap().contains("hello"));
    }
}
