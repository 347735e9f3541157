//! REST API handlers.
//!
//! Each handler calls into the [`Orchestrator`](cutover_orchestrator::Orchestrator)
//! and returns the `{success, data, error}` JSON envelope.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use tracing::warn;

use cutover_core::{ListenerKind, TargetGroupId};
use cutover_orchestrator::OrchestratorError;
use cutover_state::ApprovalDecision;

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

/// HTTP status for an orchestrator error.
pub fn status_for(err: &OrchestratorError) -> StatusCode {
    match err {
        OrchestratorError::NotFound(_) | OrchestratorError::UnknownService(_) => StatusCode::NOT_FOUND,
        OrchestratorError::Conflict { .. }
        | OrchestratorError::WrongState { .. }
        | OrchestratorError::DuplicateDecision(_) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn orchestrator_error(err: OrchestratorError) -> axum::response::Response {
    let status = status_for(&err);
    if status.is_server_error() {
        warn!(error = %err, "request failed");
    }
    error_response(&err.to_string(), status).into_response()
}

// ── Services ───────────────────────────────────────────────────

/// GET /api/v1/services
pub async fn list_services(State(state): State<ApiState>) -> impl IntoResponse {
    match state.orchestrator.statuses().await {
        Ok(statuses) => ApiResponse::ok(statuses).into_response(),
        Err(e) => orchestrator_error(e),
    }
}

/// GET /api/v1/services/:service
pub async fn get_service(
    State(state): State<ApiState>,
    Path(service): Path<String>,
) -> impl IntoResponse {
    match state.orchestrator.status(&service).await {
        Ok(status) => ApiResponse::ok(status).into_response(),
        Err(e) => orchestrator_error(e),
    }
}

/// Deployment request body.
#[derive(serde::Deserialize)]
pub struct SubmitRequest {
    pub image: String,
}

/// POST /api/v1/services/:service/deployments
pub async fn submit_deployment(
    State(state): State<ApiState>,
    Path(service): Path<String>,
    Json(req): Json<SubmitRequest>,
) -> impl IntoResponse {
    let image = req.image.trim();
    if image.is_empty() {
        return error_response("image must not be empty", StatusCode::BAD_REQUEST).into_response();
    }

    let id = match state.orchestrator.submit(&service, image).await {
        Ok(id) => id,
        Err(e) => return orchestrator_error(e),
    };
    match state.orchestrator.deployment(&id).await {
        Ok(record) => (StatusCode::CREATED, ApiResponse::ok(record)).into_response(),
        Err(e) => orchestrator_error(e),
    }
}

/// GET /api/v1/services/:service/history
pub async fn service_history(
    State(state): State<ApiState>,
    Path(service): Path<String>,
) -> impl IntoResponse {
    match state.orchestrator.history(&service) {
        Ok(records) => ApiResponse::ok(records).into_response(),
        Err(e) => orchestrator_error(e),
    }
}

// ── Deployments ────────────────────────────────────────────────

/// GET /api/v1/deployments/:id
pub async fn get_deployment(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.orchestrator.deployment(&id).await {
        Ok(record) => ApiResponse::ok(record).into_response(),
        Err(e) => orchestrator_error(e),
    }
}

/// Approval request body: `{"decision": "approve"}` or `{"decision": "reject"}`.
#[derive(serde::Deserialize)]
pub struct DecisionRequest {
    pub decision: ApprovalDecision,
}

/// POST /api/v1/deployments/:id/decision
pub async fn decide(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(req): Json<DecisionRequest>,
) -> impl IntoResponse {
    if let Err(e) = state.orchestrator.decide(&id, req.decision).await {
        return orchestrator_error(e);
    }
    ApiResponse::ok(serde_json::json!({
        "deployment": id,
        "decision": req.decision,
        "status": "recorded"
    }))
    .into_response()
}

/// POST /api/v1/deployments/:id/rollback
pub async fn rollback(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.orchestrator.rollback(&id).await {
        Ok(record) => (StatusCode::ACCEPTED, ApiResponse::ok(record)).into_response(),
        Err(e) => orchestrator_error(e),
    }
}

// ── Routing ────────────────────────────────────────────────────

#[derive(serde::Deserialize)]
pub struct RouteQuery {
    pub path: String,
}

#[derive(serde::Serialize)]
pub struct RouteView {
    pub listener: ListenerKind,
    pub path: String,
    /// `None` when no rule matches.
    pub target_group: Option<TargetGroupId>,
}

/// GET /api/v1/listeners/:listener/route?path=
pub async fn resolve_route(
    State(state): State<ApiState>,
    Path(listener): Path<String>,
    Query(query): Query<RouteQuery>,
) -> impl IntoResponse {
    let listener: ListenerKind = match listener.parse() {
        Ok(kind) => kind,
        Err(e) => return error_response(&e, StatusCode::BAD_REQUEST).into_response(),
    };
    if !query.path.starts_with('/') {
        return error_response("path must start with '/'", StatusCode::BAD_REQUEST).into_response();
    }

    let target_group = state.orchestrator.routing().route(listener, &query.path);
    ApiResponse::ok(RouteView {
        listener,
        path: query.path,
        target_group,
    })
    .into_response()
}

/// GET /healthz
pub async fn healthz() -> impl IntoResponse {
    ApiResponse::ok("ok")
}
