// crates/flight-recorder-store-sqlite/tests/common/mod.rs
// ============================================================================
// Module: SQLite Store Test Helpers
// Description: Shared fixtures for store integration tests.
// Purpose: Build temp-backed stores and canonical event submissions.
// ============================================================================

//! ## Overview
//! Shared helpers: a tempdir-backed store factory and canonical event
//! builders with valid payloads per event type.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    dead_code,
    reason = "Test-only assertions and helpers are permitted; not every test \
              file uses every helper."
)]

use serde_json::json;
use tempfile::TempDir;

use flight_recorder_core::ActorType;
use flight_recorder_core::CanonicalEvent;
use flight_recorder_core::DeterminismMode;
use flight_recorder_core::EventType;
use flight_recorder_core::IdempotencyKey;
use flight_recorder_core::NewRun;
use flight_recorder_core::RecorderStore;
use flight_recorder_core::RedactionStatus;
use flight_recorder_core::RunRecord;
use flight_recorder_core::SourceType;
use flight_recorder_core::StepId;
use flight_recorder_core::UtcTimestamp;
use flight_recorder_store_sqlite::SqliteRecorderStore;
use flight_recorder_store_sqlite::SqliteStoreConfig;

/// Opens a store backed by a fresh temp directory.
///
/// The temp dir must outlive the store, so both are returned.
pub fn temp_store() -> (SqliteRecorderStore, TempDir) {
    let dir = TempDir::new().expect("temp dir");
    let config = SqliteStoreConfig::new(dir.path().join("recorder.db"));
    let store = SqliteRecorderStore::open(&config).expect("open store");
    (store, dir)
}

/// Creates a live run with default tags.
pub fn create_run(store: &SqliteRecorderStore) -> RunRecord {
    store
        .create_run(NewRun {
            app_id: "demo".to_string(),
            environment: "test".to_string(),
            source_type: SourceType::Live,
            source_run_id: None,
            tags: serde_json::Map::new(),
            retention_class: "dev_short".to_string(),
        })
        .expect("create run")
}

/// Builds a canonical event with a valid payload for its type.
pub fn event(
    run: &RunRecord,
    step: &str,
    sequence_no: i64,
    event_type: EventType,
) -> CanonicalEvent {
    let payload = match event_type {
        EventType::RunStarted => json!({
            "app_id": "demo",
            "environment": "test",
            "entrypoint_name": "main",
        }),
        EventType::ToolCalled => json!({
            "tool_name": "search",
            "tool_version": "1",
            "call_signature_hash": "sig",
            "args_ref": "args",
            "timeout_ms": 500,
        }),
        EventType::ToolResult => json!({
            "tool_name": "search",
            "status": "ok",
            "result_ref": "result",
            "latency_ms": 12,
        }),
        EventType::ModelCalled => json!({
            "provider": "openai",
            "model_id": "gpt-4o",
            "model_api_version": "v1",
            "temperature": 0.0,
            "top_p": 1.0,
            "max_tokens": 64,
            "request_ref": "req",
        }),
        EventType::ModelResult => json!({
            "provider": "openai",
            "model_id": "gpt-4o",
            "finish_reason": "stop",
            "token_usage": { "total": 9 },
            "response_ref": "resp",
            "latency_ms": 80,
        }),
        EventType::FinalOutput => json!({
            "output_ref": "out",
            "response_channel": "api",
        }),
        EventType::RunCompleted => json!({
            "status": "success",
            "total_steps": 1,
            "total_latency_ms": 100,
        }),
        EventType::RunFailed => json!({
            "status": "failed",
            "failed_step_id": step,
            "error_class": "Boom",
            "error_message_ref": "err",
        }),
        _ => json!({}),
    };
    CanonicalEvent {
        schema_version: "1.0.0".to_string(),
        trace_id: run.trace_id.clone(),
        run_id: run.run_id.clone(),
        step_id: StepId::new(step),
        parent_step_id: None,
        sequence_no,
        event_type: event_type.as_str().to_string(),
        timestamp: UtcTimestamp::now(),
        actor_type: ActorType::Sdk,
        determinism_mode: DeterminismMode::Live,
        artifact_refs: Vec::new(),
        redaction_status: RedactionStatus::NotRequired,
        payload: payload.as_object().cloned().unwrap_or_default(),
    }
}

/// Ingests an event, asserting acceptance.
pub fn ingest(store: &SqliteRecorderStore, run: &RunRecord, key: &str, event: CanonicalEvent) {
    let outcome =
        store.ingest_event(&run.run_id, &IdempotencyKey::new(key), event).expect("ingest");
    assert!(outcome.accepted, "event with key {key} was not accepted");
}
