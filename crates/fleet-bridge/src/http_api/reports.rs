//! `/reports/*` — authored reports, their public share links, and
//! per-visit access logging. The share-resolution and access-log routes
//! are split into [`public_router`] since they're the one unauthenticated
//! surface besides SMS ingress.

use axum::extract::{ConnectInfo, Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use fleet_core::types::Report;
use serde::Deserialize;
use std::net::SocketAddr;

use crate::api_error::ApiError;
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(list_reports).post(create_report))
        .route("/{id}", get(get_report))
        .route("/{id}/share", post(share))
        .route("/{id}/shares", get(shares_for))
        .with_state(state)
}

/// Mounted without the auth layer: a visitor with a valid link id needs no
/// credential to view a shared report or to have their visit recorded.
pub fn public_router(state: AppState) -> Router {
    Router::new()
        .route("/share/{link_id}", get(resolve_share))
        .route("/share/{link_id}/access", post(record_access))
        .with_state(state)
}

#[derive(Deserialize)]
pub struct ListQuery {
    tag: Option<String>,
}

async fn list_reports(State(state): State<AppState>, Query(q): Query<ListQuery>) -> Json<Vec<Report>> {
    Json(state.reports.list(q.tag.as_deref()).await)
}

#[derive(Deserialize)]
pub struct CreateReport {
    title: String,
    author: String,
    content: String,
}

async fn create_report(State(state): State<AppState>, Json(body): Json<CreateReport>) -> Result<impl IntoResponse, ApiError> {
    let report = state.reports.create(&body.title, &body.author, &body.content).await?;
    Ok((StatusCode::CREATED, Json(report)))
}

async fn get_report(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Report>, ApiError> {
    Ok(Json(state.reports.get(&id).await?))
}

#[derive(Deserialize)]
pub struct ShareBody {
    #[serde(rename = "createdBy")]
    created_by: String,
}

async fn share(State(state): State<AppState>, Path(id): Path<String>, Json(body): Json<ShareBody>) -> Result<impl IntoResponse, ApiError> {
    let link = state.reports.share(&id, &body.created_by).await?;
    Ok((StatusCode::CREATED, Json(link)))
}

async fn shares_for(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Vec<fleet_core::types::ShareLink>>, ApiError> {
    Ok(Json(state.reports.shares_for(&id).await?))
}

async fn resolve_share(State(state): State<AppState>, Path(link_id): Path<String>) -> Result<impl IntoResponse, ApiError> {
    let (_link, report) = state.reports.resolve_share(&link_id).await?;
    Ok(([("Content-Type", "text/html")], render_report_html(&report)))
}

fn render_report_html(report: &Report) -> String {
    format!(
        "<!doctype html><html><head><title>{}</title></head><body><h1>{}</h1><pre>{}</pre></body></html>",
        xml_escape(&report.title),
        xml_escape(&report.title),
        xml_escape(&report.content)
    )
}

fn xml_escape(input: &str) -> String {
    input.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

#[derive(Deserialize)]
pub struct AccessQuery {
    #[serde(rename = "userAgent")]
    user_agent: Option<String>,
    referrer: Option<String>,
}

async fn record_access(
    State(state): State<AppState>,
    Path(link_id): Path<String>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Query(q): Query<AccessQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let user_agent = q.user_agent.or_else(|| headers.get("user-agent").and_then(|v| v.to_str().ok()).map(str::to_string));
    state.reports.record_access(&link_id, Some(addr.ip().to_string()), user_agent, q.referrer).await?;
    Ok(StatusCode::OK)
}
