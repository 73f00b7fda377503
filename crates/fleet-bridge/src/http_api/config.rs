//! `/config/*` — key-value configuration, masked by default. `/config/env`
//! is the one unmasked read, reserved for agent environment injection.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use fleet_core::types::{ConfigEntry, ConfigEntryType};
use serde::Deserialize;

use crate::api_error::ApiError;
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(list_masked).post(set_entry))
        .route("/env", get(export_env))
        .route("/{key}", get(get_masked).delete(delete_entry))
        .with_state(state)
}

async fn list_masked(State(state): State<AppState>) -> Result<Json<Vec<ConfigEntry>>, ApiError> {
    Ok(Json(state.config.list_masked().await?))
}

#[derive(Deserialize)]
pub struct SetEntry {
    key: String,
    value: String,
    #[serde(default = "default_kind")]
    kind: ConfigEntryType,
}

fn default_kind() -> ConfigEntryType {
    ConfigEntryType::Config
}

async fn set_entry(State(state): State<AppState>, Json(body): Json<SetEntry>) -> Result<impl IntoResponse, ApiError> {
    let entry = state.config.set(&body.key, &body.value, body.kind).await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

async fn get_masked(State(state): State<AppState>, Path(key): Path<String>) -> Result<Json<ConfigEntry>, ApiError> {
    Ok(Json(state.config.get_masked(&key).await?))
}

async fn delete_entry(State(state): State<AppState>, Path(key): Path<String>) -> Result<StatusCode, ApiError> {
    state.config.delete(&key).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn export_env(State(state): State<AppState>) -> Result<Json<Vec<ConfigEntry>>, ApiError> {
    Ok(Json(state.config.export_env().await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tempfile::tempdir;
    use tower::ServiceExt;

    #[tokio::test]
    async fn set_then_masked_read_hides_secret() {
        let dir = tempdir().unwrap();
        let state = AppState::open(&crate::state::DataLayout::new(dir.path())).await.unwrap();
        let app = router(state);

        let req = Request::builder()
            .method("POST")
            .uri("/")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"key":"api_key","value":"sk_abcdefghijklmnop","kind":"secret"}"#))
            .unwrap();
        app.clone().oneshot(req).await.unwrap();

        let req = Request::builder().uri("/api_key").body(Body::empty()).unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let entry: ConfigEntry = serde_json::from_slice(&body).unwrap();
        assert_ne!(entry.value, "sk_abcdefghijklmnop");

        let req = Request::builder().uri("/env").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let entries: Vec<ConfigEntry> = serde_json::from_slice(&body).unwrap();
        assert_eq!(entries[0].value, "sk_abcdefghijklmnop");
    }

    #[tokio::test]
    async fn delete_missing_key_is_404() {
        let dir = tempdir().unwrap();
        let state = AppState::open(&crate::state::DataLayout::new(dir.path())).await.unwrap();
        let app = router(state);
        let req = Request::builder().method("DELETE").uri("/nope").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
