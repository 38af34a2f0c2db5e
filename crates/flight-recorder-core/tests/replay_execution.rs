// crates/flight-recorder-core/tests/replay_execution.rs
// ============================================================================
// Module: Replay Engine Tests
// Description: Replay lifecycle and classification tests over the in-memory
//              store.
// Purpose: Validate preflight failures, fork handling, override
//          classification, cancellation, and session status derivation.
// ============================================================================

//! ## Overview
//! These tests drive the replay engine end to end against
//! `InMemoryRecorderStore`: source runs are ingested through the normal
//! ingestion path, sessions are created and executed, and derived runs are
//! inspected for event counts, determinism modes, payload augmentation, and
//! reason codes.

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

use flight_recorder_core::ActorType;
use flight_recorder_core::CanonicalEvent;
use flight_recorder_core::DeterminismMode;
use flight_recorder_core::EventType;
use flight_recorder_core::IdempotencyKey;
use flight_recorder_core::InMemoryRecorderStore;
use flight_recorder_core::ModelOverride;
use flight_recorder_core::NewReplaySession;
use flight_recorder_core::NewRun;
use flight_recorder_core::NoopAuditSink;
use flight_recorder_core::RecorderError;
use flight_recorder_core::RecorderStore;
use flight_recorder_core::RedactionStatus;
use flight_recorder_core::ReplayEngine;
use flight_recorder_core::ReplayOverrideProfile;
use flight_recorder_core::ReplayStatus;
use flight_recorder_core::RunId;
use flight_recorder_core::RunRecord;
use flight_recorder_core::RunStatus;
use flight_recorder_core::SourceType;
use flight_recorder_core::StepId;
use flight_recorder_core::UtcTimestamp;
use flight_recorder_core::runtime::replay::FAILURE_ARTIFACT_MISSING;
use flight_recorder_core::runtime::replay::FAILURE_CANCEL_REQUESTED;
use flight_recorder_core::runtime::replay::FAILURE_SOURCE_RUN_EMPTY;
use flight_recorder_core::runtime::replay::REASON_CACHE_HIT;
use flight_recorder_core::runtime::replay::REASON_OPERATOR_OVERRIDE;
use flight_recorder_core::runtime::replay::REASON_SOURCE_OUTPUT_REUSED;

// ============================================================================
// SECTION: Helpers
// ============================================================================

fn engine_over(store: &Arc<InMemoryRecorderStore>) -> ReplayEngine {
    let dyn_store: Arc<dyn RecorderStore> = Arc::clone(store) as Arc<dyn RecorderStore>;
    ReplayEngine::new(dyn_store, Arc::new(NoopAuditSink))
}

fn new_run(store: &InMemoryRecorderStore) -> RunRecord {
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

fn event(run: &RunRecord, step: &str, sequence_no: i64, event_type: EventType) -> CanonicalEvent {
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

fn ingest(store: &InMemoryRecorderStore, run: &RunRecord, key: &str, event: CanonicalEvent) {
    let outcome = store
        .ingest_event(&run.run_id, &IdempotencyKey::new(key), event)
        .expect("ingest event");
    assert!(outcome.accepted);
}

/// Ingests a minimal terminal run: run_started then run_completed.
fn terminal_run(store: &InMemoryRecorderStore) -> RunRecord {
    let run = new_run(store);
    ingest(store, &run, &format!("{}-k0", run.run_id), event(&run, "s0", 0, EventType::RunStarted));
    ingest(
        store,
        &run,
        &format!("{}-k1", run.run_id),
        event(&run, "s1", 1, EventType::RunCompleted),
    );
    store.get_run(&run.run_id).expect("get run").expect("run exists")
}

fn session_for(
    engine: &ReplayEngine,
    run: &RunRecord,
    profile: ReplayOverrideProfile,
) -> flight_recorder_core::ReplaySessionRecord {
    engine
        .create_session(
            NewReplaySession {
                source_run_id: run.run_id.clone(),
                fork_step_id: None,
                override_profile: profile,
            },
            &flight_recorder_core::AuditActor::system(),
        )
        .expect("create session")
}

// ============================================================================
// SECTION: Session Creation
// ============================================================================

#[test]
fn create_session_rejects_unknown_source_run() {
    let store = Arc::new(InMemoryRecorderStore::new());
    let engine = engine_over(&store);
    let err = engine
        .create_session(
            NewReplaySession {
                source_run_id: RunId::new("missing"),
                fork_step_id: None,
                override_profile: ReplayOverrideProfile::default(),
            },
            &flight_recorder_core::AuditActor::system(),
        )
        .unwrap_err();
    assert!(matches!(err, RecorderError::NotFound { .. }));
}

#[test]
fn create_session_rejects_non_terminal_source() {
    let store = Arc::new(InMemoryRecorderStore::new());
    let engine = engine_over(&store);
    let run = new_run(&store);
    let err = engine
        .create_session(
            NewReplaySession {
                source_run_id: run.run_id,
                fork_step_id: None,
                override_profile: ReplayOverrideProfile::default(),
            },
            &flight_recorder_core::AuditActor::system(),
        )
        .unwrap_err();
    assert!(matches!(err, RecorderError::Validation { .. }));
}

#[test]
fn create_session_rejects_foreign_fork_step() {
    let store = Arc::new(InMemoryRecorderStore::new());
    let engine = engine_over(&store);
    let run = terminal_run(&store);
    let err = engine
        .create_session(
            NewReplaySession {
                source_run_id: run.run_id,
                fork_step_id: Some(StepId::new("not-in-run")),
                override_profile: ReplayOverrideProfile::default(),
            },
            &flight_recorder_core::AuditActor::system(),
        )
        .unwrap_err();
    assert!(matches!(err, RecorderError::Validation { .. }));
}

#[test]
fn session_creation_appends_an_audit_entry() {
    let store = Arc::new(InMemoryRecorderStore::new());
    let engine = engine_over(&store);
    let run = terminal_run(&store);

    let session = session_for(&engine, &run, ReplayOverrideProfile::default());
    let entries = store.audit_entries().expect("audit entries");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].action, "replay_created");
    assert_eq!(entries[0].target_type, "replay_session");
    assert_eq!(entries[0].target_id, session.replay_session_id.as_str());
}

#[test]
fn artifact_refs_link_events_to_artifacts() {
    let store = Arc::new(InMemoryRecorderStore::new());
    let run = new_run(&store);
    let hash = flight_recorder_core::ArtifactHash::new("ab".repeat(32));
    let mut started = event(&run, "s0", 0, EventType::RunStarted);
    started.artifact_refs.push(flight_recorder_core::ArtifactRefSpec {
        artifact_hash: hash.clone(),
        artifact_type: "model_request".to_string(),
        byte_size: 10,
        content_encoding: "identity".to_string(),
        mime_type: "application/json".to_string(),
        redaction_profile: "default".to_string(),
    });

    let outcome = store
        .ingest_event(&run.run_id, &IdempotencyKey::new("k0"), started)
        .expect("ingest");
    assert!(outcome.event.artifact_pending);

    let links = store.artifact_links_for(&outcome.event.event_id).expect("links");
    assert_eq!(links.len(), 1);
    assert_eq!(links[0].artifact_hash, hash);
    assert_eq!(links[0].reference_role, "model_request");
}

// ============================================================================
// SECTION: Execution Happy Paths
// ============================================================================

#[test]
fn replay_without_overrides_completes_exact() {
    let store = Arc::new(InMemoryRecorderStore::new());
    let engine = engine_over(&store);
    let run = terminal_run(&store);

    let session = session_for(&engine, &run, ReplayOverrideProfile::default());
    let finished = engine.execute(&session.replay_session_id).expect("execute");

    assert_eq!(finished.status, ReplayStatus::CompletedExact);
    assert_eq!(finished.reason_codes, vec![REASON_SOURCE_OUTPUT_REUSED.to_string()]);
    assert!(finished.failure_reason_code.is_none());

    let derived_run_id = finished.derived_run_id.expect("derived run id");
    let derived = store.get_run(&derived_run_id).expect("get").expect("derived run");
    assert_eq!(derived.source_type, SourceType::Replay);
    assert_eq!(derived.source_run_id, Some(run.run_id.clone()));
    assert_eq!(derived.status, RunStatus::Success);

    let events = store.load_run_events(&derived_run_id).expect("events");
    assert_eq!(events.len(), 2);
    for (index, derived_event) in events.iter().enumerate() {
        assert_eq!(derived_event.sequence_no, i64::try_from(index).expect("index"));
        assert_eq!(derived_event.actor_type, ActorType::ReplayEngine);
        assert_eq!(derived_event.determinism_mode, DeterminismMode::Exact);
        assert_eq!(
            derived_event.payload.get("source_run_id"),
            Some(&json!(run.run_id.as_str()))
        );
        assert_eq!(
            derived_event.payload.get("override_profile_id"),
            Some(&json!(session.replay_session_id.as_str()))
        );
        assert_eq!(
            derived_event.payload.get("replay_reason_code"),
            Some(&json!(REASON_SOURCE_OUTPUT_REUSED))
        );
    }
}

#[test]
fn replay_with_model_override_simulates_model_events() {
    let store = Arc::new(InMemoryRecorderStore::new());
    let engine = engine_over(&store);
    let run = new_run(&store);
    ingest(&store, &run, "k0", event(&run, "s0", 0, EventType::RunStarted));
    ingest(&store, &run, "k1", event(&run, "s1", 1, EventType::ModelCalled));
    ingest(&store, &run, "k2", event(&run, "s1", 2, EventType::ModelResult));
    ingest(&store, &run, "k3", event(&run, "s2", 3, EventType::RunCompleted));
    let run = store.get_run(&run.run_id).expect("get").expect("run");

    let profile = ReplayOverrideProfile {
        model_override: Some(ModelOverride {
            provider: Some("anthropic".to_string()),
            model_id: Some("claude-sonnet".to_string()),
        }),
        ..ReplayOverrideProfile::default()
    };
    let session = session_for(&engine, &run, profile);
    let finished = engine.execute(&session.replay_session_id).expect("execute");

    assert_eq!(finished.status, ReplayStatus::CompletedMixed);
    assert_eq!(
        finished.reason_codes,
        vec![
            REASON_OPERATOR_OVERRIDE.to_string(),
            REASON_SOURCE_OUTPUT_REUSED.to_string()
        ]
    );

    let derived_run_id = finished.derived_run_id.expect("derived run id");
    let events = store.load_run_events(&derived_run_id).expect("events");
    assert_eq!(events.len(), 4);

    let model_called =
        events.iter().find(|row| row.event_type == EventType::ModelCalled).expect("model event");
    assert_eq!(model_called.determinism_mode, DeterminismMode::Simulated);
    assert_eq!(model_called.payload.get("provider"), Some(&json!("anthropic")));
    assert_eq!(model_called.payload.get("model_id"), Some(&json!("claude-sonnet")));
}

#[test]
fn replay_without_override_caches_call_events() {
    let store = Arc::new(InMemoryRecorderStore::new());
    let engine = engine_over(&store);
    let run = new_run(&store);
    ingest(&store, &run, "k0", event(&run, "s0", 0, EventType::RunStarted));
    ingest(&store, &run, "k1", event(&run, "s1", 1, EventType::ToolCalled));
    ingest(&store, &run, "k2", event(&run, "s1", 2, EventType::ToolResult));
    ingest(&store, &run, "k3", event(&run, "s2", 3, EventType::RunCompleted));
    let run = store.get_run(&run.run_id).expect("get").expect("run");

    let session = session_for(&engine, &run, ReplayOverrideProfile::default());
    let finished = engine.execute(&session.replay_session_id).expect("execute");

    // run_started sits before the (default) fork, so exact and cached mix.
    assert_eq!(finished.status, ReplayStatus::CompletedMixed);
    assert!(finished.reason_codes.contains(&REASON_CACHE_HIT.to_string()));

    let derived_run_id = finished.derived_run_id.expect("derived run id");
    let events = store.load_run_events(&derived_run_id).expect("events");
    let tool_result =
        events.iter().find(|row| row.event_type == EventType::ToolResult).expect("tool result");
    assert_eq!(tool_result.determinism_mode, DeterminismMode::Cached);
}

#[test]
fn replay_remaps_steps_consistently() {
    let store = Arc::new(InMemoryRecorderStore::new());
    let engine = engine_over(&store);
    let run = new_run(&store);
    ingest(&store, &run, "k0", event(&run, "s0", 0, EventType::RunStarted));
    ingest(&store, &run, "k1", event(&run, "s1", 1, EventType::ToolCalled));
    ingest(&store, &run, "k2", event(&run, "s1", 2, EventType::ToolResult));
    ingest(&store, &run, "k3", event(&run, "s2", 3, EventType::RunCompleted));
    let run = store.get_run(&run.run_id).expect("get").expect("run");

    let session = session_for(&engine, &run, ReplayOverrideProfile::default());
    let finished = engine.execute(&session.replay_session_id).expect("execute");
    let derived_run_id = finished.derived_run_id.expect("derived run id");
    let events = store.load_run_events(&derived_run_id).expect("events");

    // Both tool events shared a source step, so they share a derived step.
    assert_eq!(events[1].step_id, events[2].step_id);
    assert_ne!(events[0].step_id, events[1].step_id);
    assert_ne!(events[1].step_id.as_str(), "s1");
}

#[test]
fn replay_of_failed_source_derives_failed_run() {
    let store = Arc::new(InMemoryRecorderStore::new());
    let engine = engine_over(&store);
    let run = new_run(&store);
    ingest(&store, &run, "k0", event(&run, "s0", 0, EventType::RunStarted));
    ingest(&store, &run, "k1", event(&run, "s1", 1, EventType::RunFailed));
    let run = store.get_run(&run.run_id).expect("get").expect("run");
    assert_eq!(run.status, RunStatus::Failed);

    let session = session_for(&engine, &run, ReplayOverrideProfile::default());
    let finished = engine.execute(&session.replay_session_id).expect("execute");

    // The session still completes; only the derived run carries the failure.
    assert!(finished.status.is_completed());
    let derived_run_id = finished.derived_run_id.expect("derived run id");
    let derived = store.get_run(&derived_run_id).expect("get").expect("derived run");
    assert_eq!(derived.status, RunStatus::Failed);
}

// ============================================================================
// SECTION: Fork Handling
// ============================================================================

#[test]
fn events_before_fork_are_exact() {
    let store = Arc::new(InMemoryRecorderStore::new());
    let engine = engine_over(&store);
    let run = new_run(&store);
    ingest(&store, &run, "k0", event(&run, "s0", 0, EventType::RunStarted));
    ingest(&store, &run, "k1", event(&run, "s1", 1, EventType::ToolCalled));
    ingest(&store, &run, "k2", event(&run, "s1", 2, EventType::ToolResult));
    ingest(&store, &run, "k3", event(&run, "s2", 3, EventType::RunCompleted));
    let run = store.get_run(&run.run_id).expect("get").expect("run");

    let session = engine
        .create_session(
            NewReplaySession {
                source_run_id: run.run_id.clone(),
                fork_step_id: Some(StepId::new("s2")),
                override_profile: ReplayOverrideProfile::default(),
            },
            &flight_recorder_core::AuditActor::system(),
        )
        .expect("create session");
    let finished = engine.execute(&session.replay_session_id).expect("execute");

    let derived_run_id = finished.derived_run_id.expect("derived run id");
    let events = store.load_run_events(&derived_run_id).expect("events");
    // Everything before the fork step reuses source output exactly.
    assert_eq!(events[0].determinism_mode, DeterminismMode::Exact);
    assert_eq!(events[1].determinism_mode, DeterminismMode::Exact);
    assert_eq!(events[2].determinism_mode, DeterminismMode::Exact);
    assert_eq!(events[3].determinism_mode, DeterminismMode::Exact);
    assert_eq!(finished.status, ReplayStatus::CompletedExact);
}

// ============================================================================
// SECTION: Preflight Failures
// ============================================================================

#[test]
fn empty_source_run_fails_validation() {
    let store = Arc::new(InMemoryRecorderStore::new());
    let engine = engine_over(&store);
    let run = new_run(&store);
    store.finalize_run(&run.run_id, RunStatus::Success).expect("finalize");

    let run = store.get_run(&run.run_id).expect("get").expect("run");
    let session = session_for(&engine, &run, ReplayOverrideProfile::default());
    let finished = engine.execute(&session.replay_session_id).expect("execute");

    assert_eq!(finished.status, ReplayStatus::FailedValidation);
    assert_eq!(finished.failure_reason_code.as_deref(), Some(FAILURE_SOURCE_RUN_EMPTY));
    assert!(finished.derived_run_id.is_none());
}

#[test]
fn pending_artifacts_fail_validation() {
    let store = Arc::new(InMemoryRecorderStore::new());
    let engine = engine_over(&store);
    let run = new_run(&store);
    let mut started = event(&run, "s0", 0, EventType::RunStarted);
    started.artifact_refs.push(flight_recorder_core::ArtifactRefSpec {
        artifact_hash: flight_recorder_core::ArtifactHash::new("ab".repeat(32)),
        artifact_type: "model_request".to_string(),
        byte_size: 10,
        content_encoding: "identity".to_string(),
        mime_type: "application/json".to_string(),
        redaction_profile: "default".to_string(),
    });
    ingest(&store, &run, "k0", started);
    ingest(&store, &run, "k1", event(&run, "s1", 1, EventType::RunCompleted));
    let run = store.get_run(&run.run_id).expect("get").expect("run");

    let session = session_for(&engine, &run, ReplayOverrideProfile::default());
    let finished = engine.execute(&session.replay_session_id).expect("execute");

    assert_eq!(finished.status, ReplayStatus::FailedValidation);
    assert_eq!(finished.failure_reason_code.as_deref(), Some(FAILURE_ARTIFACT_MISSING));
    assert_eq!(finished.reason_codes, vec![FAILURE_ARTIFACT_MISSING.to_string()]);
}

// ============================================================================
// SECTION: Cancellation and Idempotency
// ============================================================================

#[test]
fn cancelled_session_fails_execution() {
    let store = Arc::new(InMemoryRecorderStore::new());
    let engine = engine_over(&store);
    let run = terminal_run(&store);

    let session = session_for(&engine, &run, ReplayOverrideProfile::default());
    let cancelled = engine.cancel_session(&session.replay_session_id).expect("cancel");
    assert_eq!(cancelled.status, ReplayStatus::FailedExecution);
    assert_eq!(cancelled.failure_reason_code.as_deref(), Some(FAILURE_CANCEL_REQUESTED));

    // Execution after a terminal transition is an idempotent no-op.
    let finished = engine.execute(&session.replay_session_id).expect("execute");
    assert_eq!(finished.status, ReplayStatus::FailedExecution);
}

#[test]
fn repeated_replays_produce_identical_shapes() {
    let store = Arc::new(InMemoryRecorderStore::new());
    let engine = engine_over(&store);
    let run = terminal_run(&store);

    let first = session_for(&engine, &run, ReplayOverrideProfile::default());
    let second = session_for(&engine, &run, ReplayOverrideProfile::default());
    let first = engine.execute(&first.replay_session_id).expect("first");
    let second = engine.execute(&second.replay_session_id).expect("second");

    let first_events =
        store.load_run_events(&first.derived_run_id.clone().expect("run")).expect("events");
    let second_events =
        store.load_run_events(&second.derived_run_id.clone().expect("run")).expect("events");
    assert_eq!(first_events.len(), second_events.len());
    assert_eq!(first.reason_codes, second.reason_codes);
    assert_ne!(first.derived_run_id, second.derived_run_id);
}
