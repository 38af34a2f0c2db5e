// crates/flight-recorder-server/src/envelope.rs
// ============================================================================
// Module: Response Envelope
// Description: Uniform success/error response envelopes with request ids.
// Purpose: Wrap every API response in the recorder's envelope contract.
// Dependencies: axum, flight-recorder-core, serde_json, uuid
// ============================================================================

//! ## Overview
//! Every response carries `request_id`, `status`, and either `data` or
//! `error = {code, message, details, retryable}`. The request id echoes the
//! caller's `x-request-id` header or is minted fresh. Error codes map onto
//! HTTP status codes here; the core taxonomy stays transport-agnostic.

// ============================================================================
// SECTION: Imports
// ============================================================================

use axum::Json;
use axum::http::HeaderMap;
use axum::http::StatusCode;
use flight_recorder_core::ErrorCode;
use flight_recorder_core::RecorderError;
use serde_json::Value;
use serde_json::json;
use uuid::Uuid;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Header carrying a caller-supplied request identifier.
const REQUEST_ID_HEADER: &str = "x-request-id";

// ============================================================================
// SECTION: Request Id
// ============================================================================

/// Resolves the request identifier for a request.
#[must_use]
pub fn request_id_from(headers: &HeaderMap) -> String {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .map_or_else(|| Uuid::new_v4().to_string(), ToString::to_string)
}

// ============================================================================
// SECTION: Envelopes
// ============================================================================

/// Builds a success envelope.
#[must_use]
pub fn success_envelope(request_id: &str, data: Value) -> Value {
    json!({
        "request_id": request_id,
        "status": "success",
        "data": data,
        "error": Value::Null,
    })
}

/// Builds an error envelope.
#[must_use]
pub fn error_envelope(
    request_id: &str,
    code: ErrorCode,
    message: &str,
    details: Value,
    retryable: bool,
) -> Value {
    json!({
        "request_id": request_id,
        "status": "error",
        "data": Value::Null,
        "error": {
            "code": code.as_str(),
            "message": message,
            "details": details,
            "retryable": retryable,
        },
    })
}

// ============================================================================
// SECTION: Status Mapping
// ============================================================================

/// Maps an error code to its HTTP status.
#[must_use]
pub const fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::ValidationError => StatusCode::BAD_REQUEST,
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::Conflict => StatusCode::CONFLICT,
        ErrorCode::AuthRequired => StatusCode::UNAUTHORIZED,
        ErrorCode::AuthForbidden => StatusCode::FORBIDDEN,
        ErrorCode::DependencyUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Builds the full error response for a recorder error.
#[must_use]
pub fn error_response(request_id: &str, err: &RecorderError) -> (StatusCode, Json<Value>) {
    let code = err.code();
    (
        status_for(code),
        Json(error_envelope(
            request_id,
            code,
            &err.to_string(),
            err.details(),
            err.retryable(),
        )),
    )
}

/// Builds the full success response for a data payload.
#[must_use]
pub fn success_response(request_id: &str, data: Value) -> (StatusCode, Json<Value>) {
    (StatusCode::OK, Json(success_envelope(request_id, data)))
}
