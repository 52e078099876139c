//! REST API handlers.
//!
//! Each handler calls one `Scheduler` operation and maps its outcome to a
//! status code. Caller mistakes become 400; store failures become 503 so
//! workers know to retry.

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::{debug, error, warn};

use simq_scheduler::{ClearRequest, PrepareRequest, SchedulerError, SubmitRequest};

use crate::ApiState;

/// Error body for consistent API format.
#[derive(serde::Serialize)]
struct ErrorBody {
    success: bool,
    error: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    retryable: bool,
}

fn error_response(msg: &str, status: StatusCode, retryable: bool) -> Response {
    (
        status,
        Json(ErrorBody {
            success: false,
            error: msg.to_string(),
            retryable,
        }),
    )
        .into_response()
}

fn rejection_response(rejection: JsonRejection) -> Response {
    debug!(error = %rejection, "malformed request body");
    error_response(&rejection.body_text(), StatusCode::BAD_REQUEST, false)
}

fn scheduler_error_response(e: SchedulerError) -> Response {
    if e.is_client_error() {
        warn!(error = %e, "request rejected");
        error_response(&e.to_string(), StatusCode::BAD_REQUEST, false)
    } else {
        error!(error = %e, "scheduler operation failed");
        error_response(&e.to_string(), StatusCode::SERVICE_UNAVAILABLE, e.is_retryable())
    }
}

/// POST /prepare
pub async fn prepare(
    State(state): State<ApiState>,
    payload: Result<Json<PrepareRequest>, JsonRejection>,
) -> Response {
    let Json(req) = match payload {
        Ok(json) => json,
        Err(rejection) => return rejection_response(rejection),
    };
    match state.scheduler.prepare(req) {
        Ok(outcome) => (StatusCode::CREATED, Json(outcome)).into_response(),
        Err(e) => scheduler_error_response(e),
    }
}

/// GET /get-params
pub async fn fetch_work(State(state): State<ApiState>) -> Response {
    match state.scheduler.fetch_work() {
        Ok(Some(unit)) => (StatusCode::OK, Json(unit)).into_response(),
        Ok(None) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => scheduler_error_response(e),
    }
}

/// POST /save-result
pub async fn submit_result(
    State(state): State<ApiState>,
    payload: Result<Json<SubmitRequest>, JsonRejection>,
) -> Response {
    let Json(req) = match payload {
        Ok(json) => json,
        Err(rejection) => return rejection_response(rejection),
    };
    match state.scheduler.submit_result(req) {
        Ok(_) => (StatusCode::CREATED, Json(serde_json::json!({ "success": true }))).into_response(),
        Err(e) => scheduler_error_response(e),
    }
}

/// POST /clear
pub async fn clear(
    State(state): State<ApiState>,
    payload: Result<Json<ClearRequest>, JsonRejection>,
) -> Response {
    let Json(req) = match payload {
        Ok(json) => json,
        Err(rejection) => return rejection_response(rejection),
    };
    match state.scheduler.clear(req) {
        Ok(deleted) => (StatusCode::CREATED, Json(deleted)).into_response(),
        Err(e) => scheduler_error_response(e),
    }
}

/// GET /status
pub async fn status(State(state): State<ApiState>) -> Response {
    match state.scheduler.status() {
        Ok(depth) => (StatusCode::OK, Json(depth)).into_response(),
        Err(e) => scheduler_error_response(e),
    }
}
