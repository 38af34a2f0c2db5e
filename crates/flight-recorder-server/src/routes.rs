// crates/flight-recorder-server/src/routes.rs
// ============================================================================
// Module: API Routes
// Description: Route table and handlers for the recorder HTTP API.
// Purpose: Expose run, event, artifact, and replay operations under /api/v1.
// Dependencies: axum, flight-recorder-core, serde, serde_json
// ============================================================================

//! ## Overview
//! Handlers are thin: resolve the request id, enforce auth, translate wire
//! DTOs into core types, call the store or a runtime service, and wrap the
//! outcome in the response envelope. Every fallible branch flows through the
//! [`RecorderError`] taxonomy so wire codes and HTTP statuses stay aligned.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::Path;
use axum::extract::Query;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::StatusCode;
use axum::routing::get;
use axum::routing::post;
use flight_recorder_core::CanonicalEvent;
use flight_recorder_core::EventQuery;
use flight_recorder_core::EventRecord;
use flight_recorder_core::EventType;
use flight_recorder_core::IdempotencyKey;
use flight_recorder_core::NewReplaySession;
use flight_recorder_core::NewRun;
use flight_recorder_core::RecorderError;
use flight_recorder_core::RegisterArtifactRequest;
use flight_recorder_core::ReplayPreferences;
use flight_recorder_core::ReplaySessionId;
use flight_recorder_core::RunId;
use flight_recorder_core::RunQuery;
use flight_recorder_core::RunRecord;
use flight_recorder_core::RunStatus;
use flight_recorder_core::SourceType;
use flight_recorder_core::StepId;
use flight_recorder_core::UtcTimestamp;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;
use serde_json::json;

use crate::AppState;
use crate::auth::require_auth;
use crate::envelope::error_envelope;
use crate::envelope::error_response;
use crate::envelope::request_id_from;
use crate::envelope::success_response;

// ============================================================================
// SECTION: Router
// ============================================================================

/// Builds the full route table over the shared application state.
#[must_use]
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health/live", get(health_live))
        .route("/health/ready", get(health_ready))
        .route("/api/v1/runs", post(create_run).get(list_runs))
        .route("/api/v1/runs/{run_id}", get(get_run))
        .route("/api/v1/runs/{run_id}/events", post(ingest_event).get(list_events))
        .route("/api/v1/runs/{run_id}/finalize", post(finalize_run))
        .route("/api/v1/artifacts", post(register_artifact))
        .route("/api/v1/artifacts/{artifact_hash}", get(get_artifact))
        .route("/api/v1/replays", post(create_replay))
        .route("/api/v1/replays/{replay_session_id}", get(get_replay))
        .route("/api/v1/replays/{replay_session_id}/cancel", post(cancel_replay))
        .with_state(state)
}

// ============================================================================
// SECTION: Wire DTOs
// ============================================================================

/// Request body for run creation.
#[derive(Debug, Deserialize)]
struct CreateRunRequest {
    /// Application identifier tag.
    app_id: String,
    /// Deployment environment tag.
    environment: String,
    /// Provenance of the run.
    #[serde(default)]
    source_type: SourceType,
    /// Free-form tags.
    #[serde(default)]
    tags: Map<String, Value>,
    /// Retention class label.
    #[serde(default = "default_retention_class")]
    retention_class: String,
}

/// Returns the default retention class for run creation.
fn default_retention_class() -> String {
    flight_recorder_core::DEFAULT_RETENTION_CLASS.to_string()
}

/// Request body for event ingestion.
#[derive(Debug, Deserialize)]
struct IngestEventRequest {
    /// Caller-supplied idempotency key.
    idempotency_key: String,
    /// The canonical event submission.
    event: CanonicalEvent,
}

/// Request body for run finalization.
#[derive(Debug, Deserialize)]
struct FinalizeRunRequest {
    /// Terminal status to record (`success` or `failed`).
    final_status: String,
    /// Optional reference to the terminal event artifact.
    #[serde(default)]
    #[allow(dead_code, reason = "Accepted for wire compatibility; not consumed by the core.")]
    terminal_event_ref: Option<String>,
}

/// Request body for replay session creation.
#[derive(Debug, Deserialize)]
struct CreateReplayRequest {
    /// Run to replay.
    source_run_id: String,
    /// Optional fork step within the source run.
    #[serde(default)]
    fork_step_id: Option<String>,
    /// Operator override profile.
    #[serde(default)]
    override_profile: flight_recorder_core::ReplayOverrideProfile,
    /// Advisory replay preferences.
    #[serde(default)]
    #[allow(dead_code, reason = "Accepted for wire compatibility; not consumed by the core.")]
    replay_preferences: ReplayPreferences,
}

/// Query parameters for run listings.
#[derive(Debug, Deserialize)]
struct ListRunsParams {
    /// Filter by application identifier.
    #[serde(default)]
    app_id: Option<String>,
    /// Filter by environment.
    #[serde(default)]
    environment: Option<String>,
    /// Filter by run status.
    #[serde(default)]
    status: Option<String>,
    /// Inclusive RFC 3339 lower bound on `started_at`.
    #[serde(default)]
    from_utc: Option<String>,
    /// Inclusive RFC 3339 upper bound on `started_at`.
    #[serde(default)]
    to_utc: Option<String>,
    /// Filter by run provenance.
    #[serde(default)]
    source_type: Option<String>,
    /// Requested page size.
    #[serde(default)]
    page_size: Option<i64>,
    /// Cursor from the previous page.
    #[serde(default)]
    page_token: Option<String>,
}

/// Query parameters for event listings.
#[derive(Debug, Deserialize)]
struct ListEventsParams {
    /// Filter by event type.
    #[serde(default)]
    event_type: Option<String>,
    /// Filter by step.
    #[serde(default)]
    step_id: Option<String>,
    /// Inclusive lower bound on `sequence_no`.
    #[serde(default)]
    sequence_from: Option<i64>,
    /// Inclusive upper bound on `sequence_no`.
    #[serde(default)]
    sequence_to: Option<i64>,
    /// Requested page size.
    #[serde(default)]
    page_size: Option<i64>,
    /// Cursor from the previous page.
    #[serde(default)]
    page_token: Option<String>,
}

// ============================================================================
// SECTION: Wire Views
// ============================================================================

/// Run summary view returned by listings and detail routes.
#[derive(Debug, Serialize)]
struct RunSummaryView {
    /// Run identifier.
    run_id: String,
    /// Trace identifier.
    trace_id: String,
    /// Application identifier tag.
    app_id: String,
    /// Deployment environment tag.
    environment: String,
    /// Lifecycle status.
    status: &'static str,
    /// Provenance of the run.
    source_type: &'static str,
    /// Source run for replay-derived runs.
    source_run_id: Option<String>,
    /// Run start timestamp.
    started_at: UtcTimestamp,
    /// Run end timestamp.
    ended_at: Option<UtcTimestamp>,
    /// Retention class label.
    retention_class: String,
}

impl From<&RunRecord> for RunSummaryView {
    fn from(run: &RunRecord) -> Self {
        Self {
            run_id: run.run_id.as_str().to_string(),
            trace_id: run.trace_id.as_str().to_string(),
            app_id: run.app_id.clone(),
            environment: run.environment.clone(),
            status: run.status.as_str(),
            source_type: run.source_type.as_str(),
            source_run_id: run.source_run_id.as_ref().map(|id| id.as_str().to_string()),
            started_at: run.started_at,
            ended_at: run.ended_at,
            retention_class: run.retention_class.clone(),
        }
    }
}

/// Event view returned by listings.
#[derive(Debug, Serialize)]
struct EventView {
    /// Event identifier.
    event_id: String,
    /// Run the event belongs to.
    run_id: String,
    /// Step the event belongs to.
    step_id: String,
    /// Per-run sequence number.
    sequence_no: i64,
    /// Event type label.
    event_type: &'static str,
    /// Event timestamp.
    timestamp: UtcTimestamp,
    /// Determinism mode label.
    determinism_mode: &'static str,
    /// Redaction status label.
    redaction_status: &'static str,
    /// Structured payload.
    payload: Map<String, Value>,
}

impl From<&EventRecord> for EventView {
    fn from(event: &EventRecord) -> Self {
        Self {
            event_id: event.event_id.as_str().to_string(),
            run_id: event.run_id.as_str().to_string(),
            step_id: event.step_id.as_str().to_string(),
            sequence_no: event.sequence_no,
            event_type: event.event_type.as_str(),
            timestamp: event.timestamp,
            determinism_mode: event.determinism_mode.as_str(),
            redaction_status: event.redaction_status.as_str(),
            payload: event.payload.clone(),
        }
    }
}

// ============================================================================
// SECTION: Handler Helpers
// ============================================================================

/// Serializes a value into envelope data, mapping failures to internal
/// errors.
fn to_data<T: Serialize>(value: &T) -> Result<Value, RecorderError> {
    serde_json::to_value(value).map_err(|err| RecorderError::Internal(err.to_string()))
}

/// Parses an optional run status filter.
fn parse_status_filter(raw: Option<&str>) -> Result<Option<RunStatus>, RecorderError> {
    raw.map(|label| {
        RunStatus::parse(label).ok_or_else(|| {
            RecorderError::validation("Unknown run status", json!({ "status": label }))
        })
    })
    .transpose()
}

/// Parses an optional source type filter.
fn parse_source_filter(raw: Option<&str>) -> Result<Option<SourceType>, RecorderError> {
    raw.map(|label| {
        SourceType::parse(label).ok_or_else(|| {
            RecorderError::validation("Unknown source type", json!({ "source_type": label }))
        })
    })
    .transpose()
}

/// Parses an optional RFC 3339 timestamp parameter.
fn parse_timestamp(name: &str, raw: Option<&str>) -> Result<Option<UtcTimestamp>, RecorderError> {
    raw.map(|value| {
        UtcTimestamp::parse_rfc3339(value).map_err(|_| {
            RecorderError::validation(
                format!("{name} must be an RFC 3339 timestamp"),
                json!({ "parameter": name, "value": value }),
            )
        })
    })
    .transpose()
}

/// Parses an optional event type filter.
fn parse_event_type_filter(raw: Option<&str>) -> Result<Option<EventType>, RecorderError> {
    raw.map(|label| {
        EventType::parse(label).ok_or_else(|| {
            RecorderError::validation(
                format!("Unsupported event_type '{label}'"),
                json!({ "event_type": label }),
            )
        })
    })
    .transpose()
}

// ============================================================================
// SECTION: Health Handlers
// ============================================================================

/// Liveness probe.
async fn health_live() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Readiness probe touching the store.
async fn health_ready(State(state): State<Arc<AppState>>) -> (StatusCode, Json<Value>) {
    match state.store.ping() {
        Ok(()) => (StatusCode::OK, Json(json!({ "status": "ready" }))),
        Err(err) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(error_envelope(
                "health",
                err.code(),
                &err.to_string(),
                err.details(),
                err.retryable(),
            )),
        ),
    }
}

// ============================================================================
// SECTION: Run Handlers
// ============================================================================

/// Creates a run.
async fn create_run(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<CreateRunRequest>,
) -> (StatusCode, Json<Value>) {
    let request_id = request_id_from(&headers);
    let outcome = require_auth(&state.settings, &headers).and_then(|_actor| {
        let run = state.store.create_run(NewRun {
            app_id: body.app_id,
            environment: body.environment,
            source_type: body.source_type,
            source_run_id: None,
            tags: body.tags,
            retention_class: body.retention_class,
        })?;
        to_data(&json!({
            "run_id": run.run_id.as_str(),
            "trace_id": run.trace_id.as_str(),
            "status": run.status.as_str(),
        }))
    });
    respond(&request_id, outcome)
}

/// Lists runs with filters and pagination.
async fn list_runs(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<ListRunsParams>,
) -> (StatusCode, Json<Value>) {
    let request_id = request_id_from(&headers);
    let outcome = require_auth(&state.settings, &headers).and_then(|_actor| {
        let query = RunQuery {
            app_id: params.app_id,
            environment: params.environment,
            status: parse_status_filter(params.status.as_deref())?,
            source_type: parse_source_filter(params.source_type.as_deref())?,
            from_utc: parse_timestamp("from_utc", params.from_utc.as_deref())?,
            to_utc: parse_timestamp("to_utc", params.to_utc.as_deref())?,
            page_size: params.page_size,
            page_token: parse_timestamp("page_token", params.page_token.as_deref())?,
        };
        let page = state.store.list_runs(&query)?;
        let items: Vec<RunSummaryView> = page.items.iter().map(RunSummaryView::from).collect();
        to_data(&json!({
            "items": items,
            "next_page_token": page.next_page_token,
        }))
    });
    respond(&request_id, outcome)
}

/// Loads a run with per-type event counters.
async fn get_run(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(run_id): Path<String>,
) -> (StatusCode, Json<Value>) {
    let request_id = request_id_from(&headers);
    let outcome = require_auth(&state.settings, &headers).and_then(|_actor| {
        let detail = state.store.run_detail(&RunId::new(run_id))?;
        to_data(&json!({
            "run": RunSummaryView::from(&detail.run),
            "counters": detail.counters,
        }))
    });
    respond(&request_id, outcome)
}

/// Appends one event to a run.
async fn ingest_event(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(run_id): Path<String>,
    Json(body): Json<IngestEventRequest>,
) -> (StatusCode, Json<Value>) {
    let request_id = request_id_from(&headers);
    let outcome = require_auth(&state.settings, &headers).and_then(|_actor| {
        let outcome = state.store.ingest_event(
            &RunId::new(run_id),
            &IdempotencyKey::new(body.idempotency_key),
            body.event,
        )?;
        to_data(&json!({
            "event_id": outcome.event.event_id.as_str(),
            "accepted": outcome.accepted,
            "validation_warnings": outcome.warnings,
        }))
    });
    respond(&request_id, outcome)
}

/// Lists a run's events with filters and pagination.
async fn list_events(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(run_id): Path<String>,
    Query(params): Query<ListEventsParams>,
) -> (StatusCode, Json<Value>) {
    let request_id = request_id_from(&headers);
    let outcome = require_auth(&state.settings, &headers).and_then(|_actor| {
        let page_token = params
            .page_token
            .as_deref()
            .map(|raw| {
                raw.parse::<i64>().map_err(|_| {
                    RecorderError::validation(
                        "page_token must be a sequence number",
                        json!({ "page_token": raw }),
                    )
                })
            })
            .transpose()?;
        let query = EventQuery {
            event_type: parse_event_type_filter(params.event_type.as_deref())?,
            step_id: params.step_id.map(StepId::new),
            sequence_from: params.sequence_from,
            sequence_to: params.sequence_to,
            page_size: params.page_size,
            page_token,
        };
        let page = state.store.list_events(&RunId::new(run_id), &query)?;
        let items: Vec<EventView> = page.items.iter().map(EventView::from).collect();
        to_data(&json!({
            "items": items,
            "next_page_token": page.next_page_token,
        }))
    });
    respond(&request_id, outcome)
}

/// Forces a run into a terminal status.
async fn finalize_run(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(run_id): Path<String>,
    Json(body): Json<FinalizeRunRequest>,
) -> (StatusCode, Json<Value>) {
    let request_id = request_id_from(&headers);
    let outcome = require_auth(&state.settings, &headers).and_then(|_actor| {
        let Some(status) = RunStatus::parse(&body.final_status) else {
            return Err(RecorderError::validation(
                "final_status must be 'success' or 'failed'",
                json!({ "final_status": body.final_status }),
            ));
        };
        let run = state.store.finalize_run(&RunId::new(run_id), status)?;
        to_data(&json!({
            "run_id": run.run_id.as_str(),
            "status": run.status.as_str(),
        }))
    });
    respond(&request_id, outcome)
}

// ============================================================================
// SECTION: Artifact Handlers
// ============================================================================

/// Registers an artifact.
async fn register_artifact(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<RegisterArtifactRequest>,
) -> (StatusCode, Json<Value>) {
    let request_id = request_id_from(&headers);
    let outcome = require_auth(&state.settings, &headers).and_then(|_actor| {
        let response = state.artifacts.register_artifact(state.store.as_ref(), &body)?;
        to_data(&response)
    });
    respond(&request_id, outcome)
}

/// Loads artifact metadata by hash.
async fn get_artifact(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(artifact_hash): Path<String>,
) -> (StatusCode, Json<Value>) {
    let request_id = request_id_from(&headers);
    let outcome = require_auth(&state.settings, &headers).and_then(|_actor| {
        let hash = flight_recorder_core::ArtifactHash::new(artifact_hash);
        let Some(artifact) = state.store.get_artifact(&hash)? else {
            return Err(RecorderError::not_found(
                "Artifact not found",
                json!({ "artifact_hash": hash.as_str() }),
            ));
        };
        to_data(&json!({
            "artifact_hash": artifact.artifact_hash.as_str(),
            "artifact_type": artifact.artifact_type,
            "byte_size": artifact.byte_size,
            "mime_type": artifact.mime_type,
            "content_encoding": artifact.content_encoding,
            "redaction_profile": artifact.redaction_profile,
            "status": artifact.status.as_str(),
            "blocked_reason": artifact.blocked_reason,
            "storage_bucket": artifact.storage_bucket,
            "storage_object_key": artifact.storage_object_key,
        }))
    });
    respond(&request_id, outcome)
}

// ============================================================================
// SECTION: Replay Handlers
// ============================================================================

/// Creates a replay session.
async fn create_replay(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<CreateReplayRequest>,
) -> (StatusCode, Json<Value>) {
    let request_id = request_id_from(&headers);
    let outcome = require_auth(&state.settings, &headers).and_then(|actor| {
        let session = state.replay.create_session(
            NewReplaySession {
                source_run_id: RunId::new(body.source_run_id),
                fork_step_id: body.fork_step_id.map(StepId::new),
                override_profile: body.override_profile,
            },
            &actor,
        )?;
        to_data(&json!({
            "replay_session_id": session.replay_session_id.as_str(),
            "status": session.status.as_str(),
        }))
    });
    respond(&request_id, outcome)
}

/// Loads replay session status.
async fn get_replay(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(replay_session_id): Path<String>,
) -> (StatusCode, Json<Value>) {
    let request_id = request_id_from(&headers);
    let outcome = require_auth(&state.settings, &headers).and_then(|_actor| {
        let session = state.replay.get_session(&ReplaySessionId::new(replay_session_id))?;
        to_data(&json!({
            "replay_session_id": session.replay_session_id.as_str(),
            "status": session.status.as_str(),
            "derived_run_id": session.derived_run_id.as_ref().map(|id| id.as_str()),
            "reason_codes": session.reason_codes,
            "failure_reason_code": session.failure_reason_code,
        }))
    });
    respond(&request_id, outcome)
}

/// Requests cancellation of a replay session.
async fn cancel_replay(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(replay_session_id): Path<String>,
) -> (StatusCode, Json<Value>) {
    let request_id = request_id_from(&headers);
    let outcome = require_auth(&state.settings, &headers).and_then(|_actor| {
        let session = state.replay.cancel_session(&ReplaySessionId::new(replay_session_id))?;
        let cancelled_at = session.ended_at.unwrap_or_else(UtcTimestamp::now);
        to_data(&json!({
            "status": session.status.as_str(),
            "cancelled_at": cancelled_at,
        }))
    });
    respond(&request_id, outcome)
}

// ============================================================================
// SECTION: Response Assembly
// ============================================================================

/// Wraps a handler outcome in the response envelope.
fn respond(
    request_id: &str,
    outcome: Result<Value, RecorderError>,
) -> (StatusCode, Json<Value>) {
    match outcome {
        Ok(data) => success_response(request_id, data),
        Err(err) => error_response(request_id, &err),
    }
}
