//! HTTP API: session CRUD, artifact reads, and the pipeline progress stream.

use std::convert::Infallible;
use std::str::FromStr;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{
        IntoResponse, Response,
        sse::{KeepAlive, Sse},
    },
    routing::{get, post},
};
use futures_util::stream;
use serde::Deserialize;
use serde_json::json;

use crate::errors::PipelineError;
use crate::pipeline::PipelineRunner;
use crate::session::Session;
use crate::stage::StageId;
use crate::store::DbHandle;

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub db: DbHandle,
    pub runner: PipelineRunner,
}

pub type SharedState = Arc<AppState>;

// ── Request payload types ─────────────────────────────────────────────

#[derive(Deserialize)]
pub struct CreateSessionRequest {
    pub title: String,
    pub transcript: String,
}

// ── Error handling ────────────────────────────────────────────────────

pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Forbidden(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(json!({"error": message}))).into_response()
    }
}

impl From<PipelineError> for ApiError {
    fn from(e: PipelineError) -> Self {
        match e {
            PipelineError::AccessDenied { .. } => ApiError::Forbidden(e.to_string()),
            PipelineError::SessionNotFound { .. } => ApiError::NotFound(e.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/health", get(health))
        .route("/api/sessions", get(list_sessions).post(create_session))
        .route("/api/sessions/{id}", get(get_session))
        .route("/api/sessions/{id}/artifacts", get(list_artifacts))
        .route("/api/sessions/{id}/artifacts/{stage}", get(get_artifact))
        .route("/api/sessions/{id}/pipeline", post(start_pipeline))
}

/// Caller identity for the access gate. Authentication itself happens
/// upstream; this layer only consumes the asserted identity.
fn identity_from(headers: &HeaderMap) -> String {
    headers
        .get("x-distill-user")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("anonymous")
        .to_string()
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

async fn create_session(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(req): Json<CreateSessionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.transcript.trim().is_empty() {
        return Err(ApiError::BadRequest("Transcript is empty".to_string()));
    }

    let session = Session::new(identity_from(&headers), req.title, req.transcript);
    let stored = session.clone();
    state
        .db
        .call(move |db| db.create_session(&stored))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    Ok((StatusCode::CREATED, Json(session)))
}

async fn list_sessions(
    State(state): State<SharedState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let owner = identity_from(&headers);
    let summaries = state
        .db
        .call(move |db| db.list_sessions(&owner))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(summaries))
}

async fn get_session(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let lookup = id.clone();
    let session = state
        .db
        .call(move |db| db.get_session(&lookup))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .ok_or_else(|| ApiError::NotFound(format!("Session {} not found", id)))?;
    Ok(Json(session))
}

async fn list_artifacts(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let artifacts = state
        .db
        .call(move |db| db.list_artifacts(&id))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(artifacts))
}

async fn get_artifact(
    State(state): State<SharedState>,
    Path((id, stage)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let stage = StageId::from_str(&stage).map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let lookup = id.clone();
    let artifact = state
        .db
        .call(move |db| db.get_artifact(&lookup, stage))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .ok_or_else(|| ApiError::NotFound(format!("No {} artifact for session {}", stage, id)))?;
    Ok(Json(artifact))
}

/// Start a pipeline run and stream its progress.
///
/// The gate is checked before the stream opens: a denial is a plain 403
/// with no events. Once the stream is open the run is fire-and-forget — a
/// client that disconnects does not stop it.
async fn start_pipeline(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let identity = identity_from(&headers);
    let rx = state.runner.start(&id, &identity).await.map_err(ApiError::from)?;

    let events = stream::unfold(rx, |mut rx| async move {
        let event = rx.recv().await?;
        Some((
            Ok::<_, Infallible>(super::sse::sse_event(&event)),
            rx,
        ))
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}
