//! `/board/*` — tasks, notes, artifacts, and the review workflow.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use fleet_core::types::{Artifact, NoteType, Task, TaskStatus};
use serde::Deserialize;

use crate::api_error::ApiError;
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/tasks", get(list_tasks).post(create_task))
        .route("/tasks/{id}", get(get_task))
        .route("/tasks/{id}/notes", post(add_note))
        .route("/tasks/{id}/artifacts", post(add_artifact))
        .route("/tasks/{id}/bump", post(bump_score))
        .route("/tasks/{id}/review", post(submit_review))
        .route("/tasks/{id}/approve", post(approve))
        .route("/tasks/{id}/reject", post(reject))
        .route("/review", get(review_queue))
        .with_state(state)
}

#[derive(Deserialize)]
pub struct ListQuery {
    status: Option<TaskStatus>,
    assignee: Option<String>,
    tag: Option<String>,
}

async fn list_tasks(State(state): State<AppState>, Query(q): Query<ListQuery>) -> Json<Vec<Task>> {
    Json(state.board.list(q.status, q.assignee.as_deref(), q.tag.as_deref()).await)
}

#[derive(Deserialize)]
pub struct CreateTask {
    title: String,
    #[serde(rename = "createdBy")]
    created_by: String,
}

async fn create_task(State(state): State<AppState>, Json(body): Json<CreateTask>) -> Result<impl IntoResponse, ApiError> {
    let task = state.board.create(&body.title, &body.created_by).await?;
    Ok((StatusCode::CREATED, Json(task)))
}

async fn get_task(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Task>, ApiError> {
    Ok(Json(state.board.get(&id).await?))
}

#[derive(Deserialize)]
pub struct AddNote {
    author: String,
    content: String,
    #[serde(rename = "type", default = "default_note_type")]
    kind: NoteType,
}

fn default_note_type() -> NoteType {
    NoteType::Update
}

async fn add_note(State(state): State<AppState>, Path(id): Path<String>, Json(body): Json<AddNote>) -> Result<Json<Task>, ApiError> {
    Ok(Json(state.board.add_note(&id, &body.author, &body.content, body.kind).await?))
}

async fn add_artifact(State(state): State<AppState>, Path(id): Path<String>, Json(artifact): Json<Artifact>) -> Result<Json<Task>, ApiError> {
    Ok(Json(state.board.add_artifact(&id, artifact).await?))
}

#[derive(Deserialize)]
pub struct BumpScore {
    delta: f64,
}

async fn bump_score(State(state): State<AppState>, Path(id): Path<String>, Json(body): Json<BumpScore>) -> Result<Json<Task>, ApiError> {
    Ok(Json(state.board.bump_score(&id, body.delta).await?))
}

#[derive(Deserialize)]
pub struct SubmitReview {
    summary: String,
    #[serde(rename = "reviewedBy")]
    reviewed_by: String,
    #[serde(default)]
    artifacts: Vec<Artifact>,
}

async fn submit_review(State(state): State<AppState>, Path(id): Path<String>, Json(body): Json<SubmitReview>) -> Result<Json<Task>, ApiError> {
    Ok(Json(state.board.submit_for_review(&id, &body.summary, &body.reviewed_by, body.artifacts).await?))
}

#[derive(Deserialize)]
pub struct Approve {
    #[serde(rename = "approvedBy")]
    approved_by: String,
}

async fn approve(State(state): State<AppState>, Path(id): Path<String>, Json(body): Json<Approve>) -> Result<Json<Task>, ApiError> {
    Ok(Json(state.board.approve(&id, &body.approved_by).await?))
}

#[derive(Deserialize)]
pub struct Reject {
    #[serde(rename = "rejectedBy")]
    rejected_by: String,
    reason: String,
}

async fn reject(State(state): State<AppState>, Path(id): Path<String>, Json(body): Json<Reject>) -> Result<Json<Task>, ApiError> {
    Ok(Json(state.board.reject(&id, &body.rejected_by, &body.reason).await?))
}

async fn review_queue(State(state): State<AppState>) -> Json<Vec<Task>> {
    Json(state.board.review_queue().await)
}
