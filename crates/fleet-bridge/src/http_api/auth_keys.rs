//! `/auth/keys/*` — API-key issuance and revocation. The raw key is
//! returned exactly once, on creation; every other read exposes only
//! [`PublicApiKey`]'s masked fields.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use fleet_core::types::PublicApiKey;
use fleet_harness::api_keys::ApiKeyStore;
use serde::{Deserialize, Serialize};

use crate::api_error::ApiError;

pub fn router(api_keys: Arc<ApiKeyStore>) -> Router {
    Router::new()
        .route("/", get(list_keys).post(create_key))
        .route("/{id}", axum::routing::delete(revoke_key))
        .with_state(api_keys)
}

async fn list_keys(State(api_keys): State<Arc<ApiKeyStore>>) -> Result<Json<Vec<PublicApiKey>>, ApiError> {
    Ok(Json(api_keys.list().await?))
}

#[derive(Deserialize)]
pub struct CreateKey {
    name: String,
    #[serde(default)]
    scopes: Vec<String>,
}

#[derive(Serialize)]
struct CreatedKey {
    #[serde(flatten)]
    public: PublicApiKey,
    #[serde(rename = "rawKey")]
    raw_key: String,
}

async fn create_key(State(api_keys): State<Arc<ApiKeyStore>>, Json(body): Json<CreateKey>) -> Result<impl IntoResponse, ApiError> {
    let (public, raw_key) = api_keys.create(body.name, body.scopes).await?;
    Ok((StatusCode::CREATED, Json(CreatedKey { public, raw_key })))
}

#[derive(Serialize)]
struct RevokeResult {
    revoked: bool,
}

async fn revoke_key(State(api_keys): State<Arc<ApiKeyStore>>, Path(id): Path<String>) -> Result<Json<RevokeResult>, ApiError> {
    let revoked = api_keys.revoke(&id).await?;
    Ok(Json(RevokeResult { revoked }))
}
