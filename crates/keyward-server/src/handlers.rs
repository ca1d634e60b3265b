use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use crate::{
    auth::DEFAULT_GENERATED_LENGTH,
    error::Result,
    extract::JsonBody,
    store::{KeyRecord, KeyStatus, SettingsPatch},
    AppState,
};

// ── Health ────────────────────────────────────────────────────────────────────

pub async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

// ── List ──────────────────────────────────────────────────────────────────────

pub async fn list_keys(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let keys = state.store.list()?;
    info!(count = keys.len(), "audit: key.list");
    Ok(Json(keys))
}

// ── Create ────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateRequest {
    pub count: u32,
    pub duration_days: Option<u32>,
    pub note: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateResponse {
    pub keys: Vec<KeyRecord>,
}

pub async fn create_keys(
    State(state): State<AppState>,
    JsonBody(body): JsonBody<CreateRequest>,
) -> Result<impl IntoResponse> {
    let keys = state
        .store
        .create(body.count, body.duration_days, body.note.as_deref())?;
    info!(
        count = keys.len(),
        duration_days = ?body.duration_days,
        "audit: key.create"
    );
    Ok((StatusCode::CREATED, Json(CreateResponse { keys })))
}

// ── Status ────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub status: String,
}

pub async fn set_key_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    JsonBody(body): JsonBody<StatusRequest>,
) -> Result<impl IntoResponse> {
    let status = KeyStatus::parse_settable(&body.status)?;
    let key = state.store.set_status(&id, status)?;
    info!(id = %id, %status, "audit: key.status");
    Ok(Json(json!({ "key": key })))
}

// ── Delete ────────────────────────────────────────────────────────────────────

pub async fn delete_key(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    state.store.delete(&id)?;
    info!(id = %id, "audit: key.delete");
    Ok(Json(json!({"deleted": true})))
}

// ── Validate ──────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ValidateRequest {
    pub key: String,
}

pub async fn validate_key(
    State(state): State<AppState>,
    JsonBody(body): JsonBody<ValidateRequest>,
) -> Result<impl IntoResponse> {
    let outcome = state.store.validate(&body.key)?;
    info!(valid = outcome.valid, reason = %outcome.message, "audit: key.validate");
    Ok(Json(outcome))
}

// ── Stats ─────────────────────────────────────────────────────────────────────

pub async fn stats(State(state): State<AppState>) -> Result<impl IntoResponse> {
    Ok(Json(state.store.stats()?))
}

// ── Settings ──────────────────────────────────────────────────────────────────

pub async fn get_settings(State(state): State<AppState>) -> Result<impl IntoResponse> {
    Ok(Json(state.store.settings()?))
}

pub async fn update_settings(
    State(state): State<AppState>,
    JsonBody(patch): JsonBody<SettingsPatch>,
) -> Result<impl IntoResponse> {
    let settings = state.store.update_settings(&patch)?;
    info!("audit: settings.update");
    Ok(Json(settings))
}

// ── Admin secret ──────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct RotateRequest {
    pub old_secret: String,
    pub new_secret: String,
}

pub async fn rotate_admin_secret(
    State(state): State<AppState>,
    JsonBody(body): JsonBody<RotateRequest>,
) -> Result<impl IntoResponse> {
    state.gate.rotate(&body.old_secret, &body.new_secret)?;
    Ok(Json(json!({"rotated": true})))
}

#[derive(Debug, Default, Deserialize)]
pub struct GenerateRequest {
    #[serde(default)]
    pub length: Option<usize>,
}

pub async fn generate_admin_secret(
    State(state): State<AppState>,
    body: Option<JsonBody<GenerateRequest>>,
) -> Result<impl IntoResponse> {
    let length = body
        .and_then(|JsonBody(body)| body.length)
        .unwrap_or(DEFAULT_GENERATED_LENGTH);
    let secret = state.gate.generate_and_rotate(length)?;
    Ok(Json(json!({ "admin_secret": secret.as_str() })))
}
