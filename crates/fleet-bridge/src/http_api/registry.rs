//! `/registry/*` — VM inventory, heartbeats, and role-scoped discovery.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use fleet_core::types::{RegisteredVm, VmRole, VmStatus};
use serde::Deserialize;

use crate::api_error::ApiError;
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/vms", get(list_vms).post(register_vm))
        .route("/vms/{id}", get(get_vm))
        .route("/vms/{id}/heartbeat", post(heartbeat))
        .route("/vms/{id}/status", post(set_status))
        .route("/discover/{role}", get(discover))
        .with_state(state)
}

#[derive(Deserialize)]
pub struct ListQuery {
    status: Option<VmStatus>,
}

async fn list_vms(State(state): State<AppState>, Query(q): Query<ListQuery>) -> Json<Vec<RegisteredVm>> {
    Json(state.registry.list(q.status).await)
}

#[derive(Deserialize)]
pub struct RegisterVm {
    name: String,
    role: VmRole,
    address: String,
    #[serde(rename = "registeredBy")]
    registered_by: String,
}

async fn register_vm(State(state): State<AppState>, Json(body): Json<RegisterVm>) -> Result<impl IntoResponse, ApiError> {
    let vm = state.registry.register(&body.name, body.role, &body.address, &body.registered_by).await?;
    Ok((StatusCode::CREATED, Json(vm)))
}

async fn get_vm(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<RegisteredVm>, ApiError> {
    Ok(Json(state.registry.get(&id).await?))
}

async fn heartbeat(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<RegisteredVm>, ApiError> {
    Ok(Json(state.registry.heartbeat(&id).await?))
}

#[derive(Deserialize)]
pub struct SetStatus {
    status: VmStatus,
}

async fn set_status(State(state): State<AppState>, Path(id): Path<String>, Json(body): Json<SetStatus>) -> Result<Json<RegisteredVm>, ApiError> {
    Ok(Json(state.registry.set_status(&id, body.status).await?))
}

async fn discover(State(state): State<AppState>, Path(role): Path<VmRole>) -> Json<Vec<RegisteredVm>> {
    Json(state.registry.discover(role).await)
}
