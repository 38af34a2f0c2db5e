// crates/flight-recorder-server/tests/http_api.rs
// ============================================================================
// Module: HTTP API Tests
// Description: Envelope, auth, and route tests over an in-memory state.
// Purpose: Validate the wire contract without binding a socket.
// ============================================================================

//! ## Overview
//! Requests are driven through the router with `tower::ServiceExt::oneshot`
//! against an in-memory recorder store and a tempdir-backed artifact store.
//! Covered: the response envelope shape, bearer auth outcomes, the happy
//! ingestion path, sequence conflicts, idempotent replays of the same key,
//! and artifact registration with redaction.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only assertions and helpers are permitted."
)]

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::Request;
use axum::http::StatusCode;
use http_body_util::BodyExt;
use serde_json::Value;
use serde_json::json;
use tempfile::TempDir;
use tower::ServiceExt;

use flight_recorder_config::Settings;
use flight_recorder_core::ArtifactService;
use flight_recorder_core::ArtifactServiceConfig;
use flight_recorder_core::InMemoryRecorderStore;
use flight_recorder_core::NoopAuditSink;
use flight_recorder_core::RecorderStore;
use flight_recorder_core::RedactionEngine;
use flight_recorder_core::ReplayEngine;
use flight_recorder_object_store::LocalArtifactStore;
use flight_recorder_server::AppState;
use flight_recorder_server::build_router;

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Builds a router over in-memory state; the tempdir must outlive it.
fn test_router(auth_token: Option<&str>) -> (Router, TempDir) {
    let dir = TempDir::new().expect("temp dir");
    let mut settings = Settings::from_lookup(|_| None).expect("settings");
    if let Some(token) = auth_token {
        settings.auth_enabled = true;
        settings.auth_token = token.to_string();
    }

    let store: Arc<dyn RecorderStore> = Arc::new(InMemoryRecorderStore::new());
    let object_store = Arc::new(
        LocalArtifactStore::new(dir.path().to_path_buf(), "artifacts".to_string())
            .expect("object store"),
    );
    let artifacts = Arc::new(ArtifactService::new(
        object_store,
        RedactionEngine::new().expect("engine"),
        ArtifactServiceConfig {
            bucket: "artifacts".to_string(),
            block_on_failure: true,
        },
    ));
    let replay = Arc::new(ReplayEngine::new(Arc::clone(&store), Arc::new(NoopAuditSink)));

    let state = Arc::new(AppState {
        settings,
        store,
        artifacts,
        replay,
    });
    (build_router(state), dir)
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.expect("response");
    let status = response.status();
    let bytes = response.into_body().collect().await.expect("body").to_bytes();
    let value: Value = serde_json::from_slice(&bytes).expect("json body");
    (status, value)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("request")
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().method("GET").uri(uri).body(Body::empty()).expect("request")
}

async fn create_run(router: &Router) -> String {
    let (status, envelope) = send(
        router,
        post_json("/api/v1/runs", json!({ "app_id": "a", "environment": "t" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    envelope["data"]["run_id"].as_str().expect("run id").to_string()
}

fn started_event(run_id: &str, key: &str) -> Value {
    json!({
        "idempotency_key": key,
        "event": {
            "trace_id": "trace-1",
            "run_id": run_id,
            "step_id": "s0",
            "sequence_no": 0,
            "event_type": "run_started",
            "timestamp": "2026-02-11T00:00:00Z",
            "payload": {
                "app_id": "a",
                "environment": "t",
                "entrypoint_name": "main",
            },
        },
    })
}

fn completed_event(run_id: &str, key: &str, sequence_no: i64) -> Value {
    json!({
        "idempotency_key": key,
        "event": {
            "trace_id": "trace-1",
            "run_id": run_id,
            "step_id": "s1",
            "sequence_no": sequence_no,
            "event_type": "run_completed",
            "timestamp": "2026-02-11T00:00:01Z",
            "payload": {
                "status": "success",
                "total_steps": 1,
                "total_latency_ms": 10,
            },
        },
    })
}

// ============================================================================
// SECTION: Health and Envelope
// ============================================================================

#[tokio::test]
async fn health_endpoints_respond() {
    let (router, _dir) = test_router(None);
    let (status, body) = send(&router, get("/health/live")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], json!("ok"));

    let (status, body) = send(&router, get("/health/ready")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], json!("ready"));
}

#[tokio::test]
async fn envelopes_echo_the_request_id_header() {
    let (router, _dir) = test_router(None);
    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/runs")
        .header("content-type", "application/json")
        .header("x-request-id", "req-42")
        .body(Body::from(json!({ "app_id": "a", "environment": "t" }).to_string()))
        .expect("request");
    let (status, envelope) = send(&router, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(envelope["request_id"], json!("req-42"));
    assert_eq!(envelope["status"], json!("success"));
    assert_eq!(envelope["error"], Value::Null);
}

#[tokio::test]
async fn unknown_run_maps_to_not_found_envelope() {
    let (router, _dir) = test_router(None);
    let (status, envelope) = send(&router, get("/api/v1/runs/missing")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(envelope["status"], json!("error"));
    assert_eq!(envelope["error"]["code"], json!("NOT_FOUND"));
    assert_eq!(envelope["error"]["retryable"], json!(false));
}

// ============================================================================
// SECTION: Authentication
// ============================================================================

#[tokio::test]
async fn missing_bearer_token_is_unauthorized() {
    let (router, _dir) = test_router(Some("sekrit"));
    let (status, envelope) =
        send(&router, post_json("/api/v1/runs", json!({ "app_id": "a", "environment": "t" })))
            .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(envelope["error"]["code"], json!("AUTH_REQUIRED"));
}

#[tokio::test]
async fn wrong_bearer_token_is_forbidden() {
    let (router, _dir) = test_router(Some("sekrit"));
    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/runs")
        .header("content-type", "application/json")
        .header("authorization", "Bearer wrong")
        .body(Body::from(json!({ "app_id": "a", "environment": "t" }).to_string()))
        .expect("request");
    let (status, envelope) = send(&router, request).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(envelope["error"]["code"], json!("AUTH_FORBIDDEN"));
}

#[tokio::test]
async fn correct_bearer_token_is_accepted() {
    let (router, _dir) = test_router(Some("sekrit"));
    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/runs")
        .header("content-type", "application/json")
        .header("authorization", "Bearer sekrit")
        .body(Body::from(json!({ "app_id": "a", "environment": "t" }).to_string()))
        .expect("request");
    let (status, _envelope) = send(&router, request).await;
    assert_eq!(status, StatusCode::OK);
}

// ============================================================================
// SECTION: Run Lifecycle Over HTTP
// ============================================================================

#[tokio::test]
async fn happy_path_run_over_http() {
    let (router, _dir) = test_router(None);
    let run_id = create_run(&router).await;

    let uri = format!("/api/v1/runs/{run_id}/events");
    let (status, envelope) = send(&router, post_json(&uri, started_event(&run_id, "k0"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(envelope["data"]["accepted"], json!(true));

    let (status, envelope) =
        send(&router, post_json(&uri, completed_event(&run_id, "k1", 1))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(envelope["data"]["accepted"], json!(true));

    let (status, envelope) = send(&router, get(&format!("/api/v1/runs/{run_id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(envelope["data"]["run"]["status"], json!("success"));
    assert_eq!(envelope["data"]["counters"]["run_started"], json!(1));
    assert_eq!(envelope["data"]["counters"]["run_completed"], json!(1));
    assert_eq!(envelope["data"]["counters"]["total_events"], json!(2));
}

#[tokio::test]
async fn sequence_conflict_maps_to_conflict_envelope() {
    let (router, _dir) = test_router(None);
    let run_id = create_run(&router).await;
    let uri = format!("/api/v1/runs/{run_id}/events");
    send(&router, post_json(&uri, started_event(&run_id, "k0"))).await;
    send(&router, post_json(&uri, completed_event(&run_id, "k1", 1))).await;

    let (status, envelope) =
        send(&router, post_json(&uri, completed_event(&run_id, "k2", 1))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(envelope["error"]["code"], json!("CONFLICT"));
    assert_eq!(envelope["error"]["details"]["max_sequence_no"], json!(1));
    assert_eq!(envelope["error"]["details"]["received"], json!(1));
}

#[tokio::test]
async fn repeated_idempotency_key_returns_same_event() {
    let (router, _dir) = test_router(None);
    let run_id = create_run(&router).await;
    let uri = format!("/api/v1/runs/{run_id}/events");
    send(&router, post_json(&uri, started_event(&run_id, "k0"))).await;

    let (_, first) = send(&router, post_json(&uri, completed_event(&run_id, "k1", 1))).await;
    let (_, second) = send(&router, post_json(&uri, completed_event(&run_id, "k1", 1))).await;
    assert_eq!(first["data"]["event_id"], second["data"]["event_id"]);
    assert_eq!(first["data"]["accepted"], json!(true));
    assert_eq!(second["data"]["accepted"], json!(false));
}

#[tokio::test]
async fn tool_result_without_call_is_a_validation_error() {
    let (router, _dir) = test_router(None);
    let run_id = create_run(&router).await;
    let uri = format!("/api/v1/runs/{run_id}/events");
    send(&router, post_json(&uri, started_event(&run_id, "k0"))).await;

    let body = json!({
        "idempotency_key": "k1",
        "event": {
            "trace_id": "trace-1",
            "run_id": run_id,
            "step_id": "s7",
            "sequence_no": 1,
            "event_type": "tool_result",
            "timestamp": "2026-02-11T00:00:01Z",
            "payload": {
                "tool_name": "search",
                "status": "ok",
                "result_ref": "hash",
                "latency_ms": 5,
            },
        },
    });
    let (status, envelope) = send(&router, post_json(&uri, body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(envelope["error"]["code"], json!("VALIDATION_ERROR"));
    assert_eq!(envelope["error"]["details"]["step_id"], json!("s7"));
}

// ============================================================================
// SECTION: Artifacts Over HTTP
// ============================================================================

#[tokio::test]
async fn artifact_registration_redacts_and_reports_metadata() {
    let (router, _dir) = test_router(None);
    let body = json!({
        "artifact_type": "model_request",
        "byte_size": 44,
        "mime_type": "text/plain",
        "content_text": "email me at dev@example.com and secret=abcd",
    });
    let (status, envelope) = send(&router, post_json("/api/v1/artifacts", body)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(envelope["data"]["upload_required"], json!(false));
    let hash = envelope["data"]["artifact_hash"].as_str().expect("hash").to_string();

    let (status, envelope) = send(&router, get(&format!("/api/v1/artifacts/{hash}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(envelope["data"]["status"], json!("ready"));
    assert_eq!(
        envelope["data"]["storage_object_key"],
        json!(format!("{}/{hash}", &hash[.. 2]))
    );
}

// ============================================================================
// SECTION: Replays Over HTTP
// ============================================================================

#[tokio::test]
async fn replay_creation_requires_a_terminal_source() {
    let (router, _dir) = test_router(None);
    let run_id = create_run(&router).await;

    let (status, envelope) = send(
        &router,
        post_json("/api/v1/replays", json!({ "source_run_id": run_id })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(envelope["error"]["code"], json!("VALIDATION_ERROR"));
}

#[tokio::test]
async fn replay_session_is_created_pending() {
    let (router, _dir) = test_router(None);
    let run_id = create_run(&router).await;
    let uri = format!("/api/v1/runs/{run_id}/events");
    send(&router, post_json(&uri, started_event(&run_id, "k0"))).await;
    send(&router, post_json(&uri, completed_event(&run_id, "k1", 1))).await;

    let body = json!({
        "source_run_id": run_id,
        "fork_step_id": Value::Null,
        "override_profile": {
            "model_override": { "provider": "openai", "model_id": "gpt-4.1-mini" },
        },
    });
    let (status, envelope) = send(&router, post_json("/api/v1/replays", body)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(envelope["data"]["status"], json!("pending"));
    let session_id =
        envelope["data"]["replay_session_id"].as_str().expect("session id").to_string();

    let (status, envelope) =
        send(&router, get(&format!("/api/v1/replays/{session_id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(envelope["data"]["status"], json!("pending"));
    assert_eq!(envelope["data"]["derived_run_id"], Value::Null);

    let (status, envelope) = send(
        &router,
        post_json(&format!("/api/v1/replays/{session_id}/cancel"), json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(envelope["data"]["status"], json!("failed_execution"));
}
