//! HTTP handlers for the audit API
//!
//! Ingestion, used by job executors:
//! - POST /api/v1/audit/sessions               — open a session
//! - POST /api/v1/audit/sessions/:id/events    — submit one event
//! - POST /api/v1/audit/sessions/:id/complete  — finish a session
//!
//! Queries:
//! - GET /api/v1/audit/sessions              — a user's sessions, newest first
//! - GET /api/v1/audit/sessions/:id          — single session record
//! - GET /api/v1/audit/sessions/:id/report   — session, entries, and summary
//! - GET /api/v1/audit/jobs/:jobId/active    — live session for a job
//! - GET /health                             — store health

use super::AppState;
use crate::error::AuditError;
use crate::lifecycle::{JobOutcome, SessionRequest};
use crate::types::EventData;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

const DEFAULT_LIMIT: usize = 50;
const MAX_LIMIT: usize = 500;

/// Create the audit API router
pub fn api_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route(
            "/api/v1/audit/sessions",
            get(list_sessions).post(start_session),
        )
        .route("/api/v1/audit/sessions/:id", get(get_session))
        .route("/api/v1/audit/sessions/:id/events", post(submit_event))
        .route("/api/v1/audit/sessions/:id/complete", post(complete_session))
        .route("/api/v1/audit/sessions/:id/report", get(get_report))
        .route("/api/v1/audit/jobs/:job_id/active", get(active_for_job))
        .with_state(state)
}

// =============================================================================
// Query / Response types
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListSessionsQuery {
    user_id: Option<String>,
    limit: Option<usize>,
    offset: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartSessionBody {
    user_id: String,
    job_type: String,
    job_id: Option<String>,
    target_words: Option<u64>,
    input_words: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CompleteSessionBody {
    success: bool,
    final_output_preview: Option<String>,
    actual_words: Option<u64>,
    target_words: Option<u64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    store: String,
    active_sessions: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ActiveSessionResponse {
    session_id: Option<String>,
}

fn error_response(status: StatusCode, code: &str, message: impl Into<String>) -> Response {
    (
        status,
        Json(serde_json::json!({"error": {"code": code, "message": message.into()}})),
    )
        .into_response()
}

fn audit_error_response(err: AuditError) -> Response {
    let status = match err {
        AuditError::UnknownSession(_) => StatusCode::NOT_FOUND,
        AuditError::Config(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        tracing::error!(error = %err, "Audit request failed");
    }
    error_response(status, err.code(), err.to_string())
}

fn not_found(session_id: &str) -> Response {
    error_response(
        StatusCode::NOT_FOUND,
        "NOT_FOUND",
        format!("Audit session {} not found", session_id),
    )
}

// =============================================================================
// Handlers
// =============================================================================

/// GET /health
async fn health_check(State(state): State<AppState>) -> Response {
    let store = state.service.store();
    let healthy = store.health().await.unwrap_or(false);
    let body = HealthResponse {
        status: if healthy { "ok" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        store: store.name().to_string(),
        active_sessions: state.service.registry().len(),
    };
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body)).into_response()
}

/// POST /api/v1/audit/sessions
async fn start_session(
    State(state): State<AppState>,
    Json(body): Json<StartSessionBody>,
) -> Response {
    if body.user_id.is_empty() || body.job_type.is_empty() {
        return error_response(
            StatusCode::BAD_REQUEST,
            "INVALID_REQUEST",
            "userId and jobType are required",
        );
    }
    let request = SessionRequest {
        user_id: body.user_id,
        job_type: body.job_type,
        job_id: body.job_id,
        target_words: body.target_words,
        input_words: body.input_words,
    };

    match state.service.start_session(request).await {
        Ok(session_id) => (
            StatusCode::CREATED,
            Json(serde_json::json!({ "sessionId": session_id })),
        )
            .into_response(),
        Err(e) => audit_error_response(e),
    }
}

/// POST /api/v1/audit/sessions/:id/events
async fn submit_event(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(data): Json<EventData>,
) -> Response {
    match state.service.log_event(&id, data).await {
        Ok(entry) => (StatusCode::CREATED, Json(entry)).into_response(),
        Err(e) => audit_error_response(e),
    }
}

/// POST /api/v1/audit/sessions/:id/complete
///
/// Responds with the stored session record; repeating the call is harmless.
async fn complete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<CompleteSessionBody>,
) -> Response {
    let outcome = JobOutcome {
        success: body.success,
        final_output_preview: body.final_output_preview,
        actual_words: body.actual_words,
        target_words: body.target_words,
    };
    if let Err(e) = state.service.complete_session(&id, outcome).await {
        return audit_error_response(e);
    }

    match state.service.get_session(&id).await {
        Ok(Some(session)) => Json(session).into_response(),
        Ok(None) => not_found(&id),
        Err(e) => audit_error_response(e),
    }
}

/// GET /api/v1/audit/sessions
async fn list_sessions(
    State(state): State<AppState>,
    Query(params): Query<ListSessionsQuery>,
) -> Response {
    let Some(user_id) = params.user_id.filter(|u| !u.is_empty()) else {
        return error_response(
            StatusCode::BAD_REQUEST,
            "INVALID_REQUEST",
            "userId is required",
        );
    };
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);
    let offset = params.offset.unwrap_or(0);

    match state.service.list_sessions(&user_id, limit, offset).await {
        Ok(sessions) => Json(serde_json::json!({
            "sessions": sessions,
            "offset": offset,
            "limit": limit,
        }))
        .into_response(),
        Err(e) => audit_error_response(e),
    }
}

/// GET /api/v1/audit/sessions/:id
async fn get_session(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.service.get_session(&id).await {
        Ok(Some(session)) => Json(session).into_response(),
        Ok(None) => not_found(&id),
        Err(e) => audit_error_response(e),
    }
}

/// GET /api/v1/audit/sessions/:id/report
async fn get_report(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.service.get_report(&id).await {
        Ok(Some(report)) => Json(report).into_response(),
        Ok(None) => not_found(&id),
        Err(e) => audit_error_response(e),
    }
}

/// GET /api/v1/audit/jobs/:jobId/active
async fn active_for_job(State(state): State<AppState>, Path(job_id): Path<String>) -> Response {
    Json(ActiveSessionResponse {
        session_id: state.service.active_session_for_job(&job_id),
    })
    .into_response()
}
