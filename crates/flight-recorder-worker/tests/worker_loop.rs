// crates/flight-recorder-worker/tests/worker_loop.rs
// ============================================================================
// Module: Worker Integration Tests
// Description: End-to-end worker tests over a shared SQLite database.
// Purpose: Validate that a dispatcher built from settings claims and
//          executes replay jobs enqueued by session creation.
// ============================================================================

//! ## Overview
//! These tests mirror the production topology: one connection set seeds a
//! run and a replay session (as the server would), and a separately built
//! dispatcher claims the queued job and executes the replay through the
//! engine, coordinating only via the database.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only assertions and helpers are permitted."
)]

use std::sync::Arc;

use serde_json::json;
use tempfile::TempDir;

use flight_recorder_config::Settings;
use flight_recorder_core::ActorType;
use flight_recorder_core::AuditActor;
use flight_recorder_core::CanonicalEvent;
use flight_recorder_core::DeterminismMode;
use flight_recorder_core::EventType;
use flight_recorder_core::IdempotencyKey;
use flight_recorder_core::NewReplaySession;
use flight_recorder_core::NewRun;
use flight_recorder_core::NoopAuditSink;
use flight_recorder_core::RecorderStore;
use flight_recorder_core::ReplayEngine;
use flight_recorder_core::ReplayOverrideProfile;
use flight_recorder_core::RunRecord;
use flight_recorder_core::SourceType;
use flight_recorder_core::StepId;
use flight_recorder_core::UtcTimestamp;
use flight_recorder_store_sqlite::SqliteRecorderStore;
use flight_recorder_store_sqlite::SqliteStoreConfig;
use flight_recorder_worker::build_dispatcher;

// ============================================================================
// SECTION: Helpers
// ============================================================================

fn settings_for(dir: &TempDir) -> Settings {
    let db_path = dir.path().join("recorder.db");
    let url = format!("sqlite:{}", db_path.display());
    Settings::from_lookup(|name| match name {
        "DATABASE_URL" => Some(url.clone()),
        _ => None,
    })
    .expect("settings load")
}

fn seed_terminal_run(store: &SqliteRecorderStore) -> RunRecord {
    let run = store
        .create_run(NewRun {
            app_id: "demo".to_string(),
            environment: "test".to_string(),
            source_type: SourceType::Live,
            source_run_id: None,
            tags: serde_json::Map::new(),
            retention_class: "dev_short".to_string(),
        })
        .expect("create run");

    let started = CanonicalEvent {
        schema_version: "1.0.0".to_string(),
        trace_id: run.trace_id.clone(),
        run_id: run.run_id.clone(),
        step_id: StepId::new("s0"),
        parent_step_id: None,
        sequence_no: 0,
        event_type: EventType::RunStarted.as_str().to_string(),
        timestamp: UtcTimestamp::now(),
        actor_type: ActorType::Sdk,
        determinism_mode: DeterminismMode::Live,
        artifact_refs: Vec::new(),
        redaction_status: flight_recorder_core::RedactionStatus::NotRequired,
        payload: json!({
            "app_id": "demo",
            "environment": "test",
            "entrypoint_name": "main",
        })
        .as_object()
        .cloned()
        .unwrap_or_default(),
    };
    store
        .ingest_event(&run.run_id, &IdempotencyKey::new("k0"), started)
        .expect("ingest start");

    let completed = CanonicalEvent {
        schema_version: "1.0.0".to_string(),
        trace_id: run.trace_id.clone(),
        run_id: run.run_id.clone(),
        step_id: StepId::new("s1"),
        parent_step_id: None,
        sequence_no: 1,
        event_type: EventType::RunCompleted.as_str().to_string(),
        timestamp: UtcTimestamp::now(),
        actor_type: ActorType::Sdk,
        determinism_mode: DeterminismMode::Live,
        artifact_refs: Vec::new(),
        redaction_status: flight_recorder_core::RedactionStatus::NotRequired,
        payload: json!({
            "status": "success",
            "total_steps": 1,
            "total_latency_ms": 10,
        })
        .as_object()
        .cloned()
        .unwrap_or_default(),
    };
    store
        .ingest_event(&run.run_id, &IdempotencyKey::new("k1"), completed)
        .expect("ingest complete");
    run
}

// ============================================================================
// SECTION: End-to-End Execution
// ============================================================================

#[test]
fn dispatcher_executes_queued_replay_jobs() {
    let dir = TempDir::new().expect("temp dir");
    let settings = settings_for(&dir);

    let seed_store = Arc::new(
        SqliteRecorderStore::open(&SqliteStoreConfig::new(
            settings.sqlite_path().expect("path"),
        ))
        .expect("open store"),
    );
    let run = seed_terminal_run(&seed_store);

    let engine = ReplayEngine::new(
        Arc::clone(&seed_store) as Arc<dyn RecorderStore>,
        Arc::new(NoopAuditSink),
    );
    let session = engine
        .create_session(
            NewReplaySession {
                source_run_id: run.run_id.clone(),
                fork_step_id: None,
                override_profile: ReplayOverrideProfile::default(),
            },
            &AuditActor::system(),
        )
        .expect("create session");

    let dispatcher = build_dispatcher(&settings).expect("dispatcher");
    assert!(dispatcher.process_one().expect("process"));
    // Queue is drained after the single job.
    assert!(!dispatcher.process_one().expect("process again"));

    let finished = seed_store
        .get_replay_session(&session.replay_session_id)
        .expect("get")
        .expect("session");
    assert!(finished.status.is_completed());
    let derived_run_id = finished.derived_run_id.expect("derived run");
    let derived_events = seed_store.load_run_events(&derived_run_id).expect("events");
    assert_eq!(derived_events.len(), 2);
}

#[test]
fn dispatcher_records_failures_for_unknown_sessions() {
    let dir = TempDir::new().expect("temp dir");
    let settings = settings_for(&dir);
    let seed_store = Arc::new(
        SqliteRecorderStore::open(&SqliteStoreConfig::new(
            settings.sqlite_path().expect("path"),
        ))
        .expect("open store"),
    );

    let mut payload = serde_json::Map::new();
    payload.insert("replay_session_id".to_string(), json!("no-such-session"));
    let job = seed_store.enqueue_job("replay_execute", payload).expect("enqueue");

    let dispatcher = build_dispatcher(&settings).expect("dispatcher");
    assert!(dispatcher.process_one().expect("process"));

    // The job failed and was rescheduled with backoff, so it is not
    // immediately claimable.
    assert!(seed_store.fetch_next_job(None).expect("fetch").is_none());
    let _ = job;
}
