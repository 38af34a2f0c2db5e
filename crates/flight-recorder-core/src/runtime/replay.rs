// crates/flight-recorder-core/src/runtime/replay.rs
// ============================================================================
// Module: Flight Recorder Replay Engine
// Description: Deterministic replay of terminal runs into derived runs.
// Purpose: Walk a source run's events, classify each against the override
//          profile and fork point, and materialize a derived run.
// Dependencies: crate::{core, interfaces}, serde_json, uuid
// ============================================================================

//! ## Overview
//! A replay session is created against a terminal source run and executed
//! asynchronously by the worker. Execution walks the source events in
//! sequence order, derives a determinism mode and reason code for each, and
//! emits a remapped step and event into a fresh derived run. Events before
//! the fork point are reused exactly; override-matched events are simulated;
//! remaining call/result events are cached. Cancellation is observed between
//! events. Session status derives from the per-mode counts; the
//! `completed_cached` value is never produced (cached-only sessions complete
//! as `completed_mixed`).

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::Map;
use serde_json::Value;
use serde_json::json;

use crate::core::event::ActorType;
use crate::core::event::DeterminismMode;
use crate::core::event::EventType;
use crate::core::identifiers::EventId;
use crate::core::identifiers::IdempotencyKey;
use crate::core::identifiers::ReplaySessionId;
use crate::core::identifiers::StepId;
use crate::core::overrides::ReplayOverrideProfile;
use crate::core::record::EventRecord;
use crate::core::record::NewRun;
use crate::core::record::ReplaySessionRecord;
use crate::core::record::ReplayStatus;
use crate::core::record::RunStatus;
use crate::core::record::SourceType;
use crate::core::record::StepRecord;
use crate::core::time::UtcTimestamp;
use crate::interfaces::AuditActor;
use crate::interfaces::AuditEvent;
use crate::interfaces::AuditSink;
use crate::interfaces::NewReplaySession;
use crate::interfaces::RecorderError;
use crate::interfaces::RecorderStore;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Job type dispatched for replay execution.
pub const REPLAY_EXECUTE_JOB: &str = "replay_execute";

/// Job payload key carrying the session identifier.
pub const REPLAY_SESSION_PAYLOAD_KEY: &str = "replay_session_id";

/// Reason code for events reused byte-identically from the source.
pub const REASON_SOURCE_OUTPUT_REUSED: &str = "source_output_reused";
/// Reason code for events reconstructed from cached outputs.
pub const REASON_CACHE_HIT: &str = "cache_hit_signature_match";
/// Reason code for events substituted by operator overrides.
pub const REASON_OPERATOR_OVERRIDE: &str = "simulation_operator_override";

/// Failure reason for replays of runs without events.
pub const FAILURE_SOURCE_RUN_EMPTY: &str = "source_run_empty";
/// Failure reason for replays blocked on unuploaded artifacts.
pub const FAILURE_ARTIFACT_MISSING: &str = "artifact_missing";
/// Failure reason for cancelled replays.
pub const FAILURE_CANCEL_REQUESTED: &str = "cancel_requested";
/// Failure reason for source runs that lost their terminal status.
pub const FAILURE_SOURCE_RUN_NOT_TERMINAL: &str = "source_run_not_terminal";

// ============================================================================
// SECTION: Engine
// ============================================================================

/// Replay session lifecycle service and executor.
///
/// # Invariants
/// - Execution is single-threaded per session; the job queue guarantees at
///   most one worker holds a given session.
pub struct ReplayEngine {
    /// Durable persistence handle.
    store: Arc<dyn RecorderStore>,
    /// Observability sink for session lifecycle events.
    audit: Arc<dyn AuditSink>,
}

impl ReplayEngine {
    /// Builds a replay engine over a recorder store.
    #[must_use]
    pub fn new(store: Arc<dyn RecorderStore>, audit: Arc<dyn AuditSink>) -> Self {
        Self {
            store,
            audit,
        }
    }

    /// Creates a replay session and enqueues its execution job.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError::NotFound`] for unknown source runs and
    /// [`RecorderError::Validation`] for non-terminal sources or fork steps
    /// outside the source run.
    pub fn create_session(
        &self,
        request: NewReplaySession,
        actor: &AuditActor,
    ) -> Result<ReplaySessionRecord, RecorderError> {
        let Some(source_run) = self.store.get_run(&request.source_run_id)? else {
            return Err(RecorderError::not_found(
                "source_run_id not found",
                json!({ "source_run_id": request.source_run_id.as_str() }),
            ));
        };

        if !source_run.status.is_terminal() {
            return Err(RecorderError::validation(
                "Source run must be terminal before replay",
                json!({ "status": source_run.status.as_str() }),
            ));
        }

        if let Some(fork_step_id) = &request.fork_step_id
            && self.store.get_step(&request.source_run_id, fork_step_id)?.is_none()
        {
            return Err(RecorderError::validation(
                "fork_step_id is not part of source run",
                json!({ "fork_step_id": fork_step_id.as_str() }),
            ));
        }

        let session = ReplaySessionRecord {
            replay_session_id: ReplaySessionId::generate(),
            source_run_id: request.source_run_id,
            fork_step_id: request.fork_step_id,
            override_profile: request.override_profile,
            status: ReplayStatus::Pending,
            derived_run_id: None,
            failure_reason_code: None,
            reason_codes: Vec::new(),
            cancel_requested: false,
            started_at: UtcTimestamp::now(),
            ended_at: None,
        };

        let created = self.store.create_replay_session(session, actor)?;
        self.audit.emit(&AuditEvent::now(
            "replay_created",
            "replay_session",
            created.replay_session_id.as_str(),
            "ok",
            json!({ "source_run_id": created.source_run_id.as_str() }),
        ));
        Ok(created)
    }

    /// Loads a replay session, failing closed on unknown identifiers.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError::NotFound`] for unknown sessions.
    pub fn get_session(
        &self,
        session_id: &ReplaySessionId,
    ) -> Result<ReplaySessionRecord, RecorderError> {
        self.store.get_replay_session(session_id)?.ok_or_else(|| {
            RecorderError::not_found(
                "Replay session not found",
                json!({ "replay_session_id": session_id.as_str() }),
            )
        })
    }

    /// Requests cancellation of a replay session.
    ///
    /// Sessions still in `pending`/`running` transition immediately to
    /// `failed_execution`; an executing worker observes the flag at the next
    /// event boundary.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError::NotFound`] for unknown sessions.
    pub fn cancel_session(
        &self,
        session_id: &ReplaySessionId,
    ) -> Result<ReplaySessionRecord, RecorderError> {
        let cancelled = self.store.cancel_replay_session(session_id)?;
        self.audit.emit(&AuditEvent::now(
            "replay_cancelled",
            "replay_session",
            cancelled.replay_session_id.as_str(),
            "ok",
            json!({ "status": cancelled.status.as_str() }),
        ));
        Ok(cancelled)
    }

    /// Executes a replay session to completion.
    ///
    /// Idempotent: sessions already in a terminal status are returned
    /// unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError`] when the session is unknown or persistence
    /// fails; replay-level failures are recorded on the session instead.
    pub fn execute(
        &self,
        session_id: &ReplaySessionId,
    ) -> Result<ReplaySessionRecord, RecorderError> {
        let session = self.get_session(session_id)?;
        if !session.status.is_executable() {
            return Ok(session);
        }

        self.store.mark_replay_running(session_id)?;

        let Some(source_run) = self.store.get_run(&session.source_run_id)? else {
            return Err(RecorderError::not_found(
                "source run not found",
                json!({ "source_run_id": session.source_run_id.as_str() }),
            ));
        };
        if !source_run.status.is_terminal() {
            return self.store.fail_replay_session(
                session_id,
                ReplayStatus::FailedValidation,
                FAILURE_SOURCE_RUN_NOT_TERMINAL,
                &[],
            );
        }

        let source_events = self.store.load_run_events(&session.source_run_id)?;
        if source_events.is_empty() {
            return self.store.fail_replay_session(
                session_id,
                ReplayStatus::FailedValidation,
                FAILURE_SOURCE_RUN_EMPTY,
                &[],
            );
        }
        if source_events.iter().any(|event| event.artifact_pending) {
            return self.store.fail_replay_session(
                session_id,
                ReplayStatus::FailedValidation,
                FAILURE_ARTIFACT_MISSING,
                &[FAILURE_ARTIFACT_MISSING.to_string()],
            );
        }

        let mut tags = Map::new();
        tags.insert(
            REPLAY_SESSION_PAYLOAD_KEY.to_string(),
            Value::String(session.replay_session_id.as_str().to_string()),
        );
        let derived_run = self.store.create_run(NewRun {
            app_id: source_run.app_id.clone(),
            environment: source_run.environment.clone(),
            source_type: SourceType::Replay,
            source_run_id: Some(source_run.run_id.clone()),
            tags,
            retention_class: source_run.retention_class.clone(),
        })?;

        let fork_sequence = resolve_fork_sequence(&source_events, session.fork_step_id.as_ref());
        let step_map = remap_steps(&source_events);

        let mut reason_codes: Vec<&'static str> = Vec::with_capacity(source_events.len());
        let mut mode_counts: BTreeMap<DeterminismMode, usize> = BTreeMap::new();

        for (index, source_event) in source_events.iter().enumerate() {
            if self.store.is_replay_cancel_requested(session_id)? {
                return self.store.fail_replay_session(
                    session_id,
                    ReplayStatus::FailedExecution,
                    FAILURE_CANCEL_REQUESTED,
                    &[],
                );
            }

            let mut payload = source_event.payload.clone();
            payload.insert(
                "source_run_id".to_string(),
                Value::String(source_run.run_id.as_str().to_string()),
            );
            payload.insert(
                "fork_step_id".to_string(),
                session
                    .fork_step_id
                    .as_ref()
                    .map_or(Value::Null, |step| Value::String(step.as_str().to_string())),
            );
            payload.insert(
                "override_profile_id".to_string(),
                Value::String(session.replay_session_id.as_str().to_string()),
            );

            let (mode, reason_code) = classify_event(
                source_event,
                fork_sequence,
                &session.override_profile,
                &mut payload,
            );
            payload.insert(
                "replay_reason_code".to_string(),
                Value::String(reason_code.to_string()),
            );
            reason_codes.push(reason_code);
            *mode_counts.entry(mode).or_insert(0) += 1;

            let Some(new_step_id) = step_map.get(&source_event.step_id).cloned() else {
                return Err(RecorderError::Internal(format!(
                    "replay step mapping missing for step {}",
                    source_event.step_id.as_str()
                )));
            };
            let new_parent_step_id = source_event
                .parent_step_id
                .as_ref()
                .and_then(|parent| step_map.get(parent).cloned());

            let sequence_no = i64::try_from(index).unwrap_or(i64::MAX);
            self.store.insert_step_if_absent(StepRecord {
                step_id: new_step_id.clone(),
                run_id: derived_run.run_id.clone(),
                parent_step_id: new_parent_step_id.clone(),
                sequence_no,
                step_type: source_event.event_type,
                determinism_mode: mode,
                started_at: source_event.timestamp,
                ended_at: None,
            })?;

            let now = UtcTimestamp::now();
            self.store.insert_replay_event(EventRecord {
                event_id: EventId::generate(),
                run_id: derived_run.run_id.clone(),
                step_id: new_step_id,
                parent_step_id: new_parent_step_id,
                event_type: source_event.event_type,
                schema_version: source_event.schema_version.clone(),
                payload,
                redaction_status: source_event.redaction_status,
                idempotency_key: IdempotencyKey::for_replay(
                    &session.replay_session_id,
                    &source_event.event_id,
                ),
                sequence_no,
                timestamp: now,
                actor_type: ActorType::ReplayEngine,
                determinism_mode: mode,
                artifact_pending: false,
                created_at: now,
            })?;
        }

        let terminal_status = if source_run.status == RunStatus::Success {
            RunStatus::Success
        } else {
            RunStatus::Failed
        };
        self.store.finalize_run(&derived_run.run_id, terminal_status)?;

        let status = derive_session_status(&mode_counts);
        let unique_codes: BTreeSet<&'static str> = reason_codes.into_iter().collect();
        let sorted_codes: Vec<String> =
            unique_codes.into_iter().map(ToString::to_string).collect();

        self.store.complete_replay_session(
            session_id,
            status,
            &derived_run.run_id,
            &sorted_codes,
        )
    }
}

// ============================================================================
// SECTION: Fork and Step Mapping
// ============================================================================

/// Resolves the fork sequence for a session.
///
/// With a fork step, this is the sequence of the first source event in that
/// step; otherwise the first event's sequence, so every event sits at or
/// after the fork.
fn resolve_fork_sequence(source_events: &[EventRecord], fork_step_id: Option<&StepId>) -> i64 {
    let first_sequence = source_events.first().map_or(0, |event| event.sequence_no);
    let Some(fork_step_id) = fork_step_id else {
        return first_sequence;
    };
    source_events
        .iter()
        .find(|event| &event.step_id == fork_step_id)
        .map_or(first_sequence, |event| event.sequence_no)
}

/// Allocates a fresh step identifier per source step.
///
/// The mapping is stable within one replay session only.
fn remap_steps(source_events: &[EventRecord]) -> BTreeMap<StepId, StepId> {
    let mut step_map = BTreeMap::new();
    for event in source_events {
        step_map.entry(event.step_id.clone()).or_insert_with(StepId::generate);
    }
    step_map
}

// ============================================================================
// SECTION: Classification
// ============================================================================

/// Derives the determinism mode and reason code for one source event.
///
/// Rules apply in order; the first match wins. Override matches substitute
/// payload fields in place.
fn classify_event(
    source_event: &EventRecord,
    fork_sequence: i64,
    profile: &ReplayOverrideProfile,
    payload: &mut Map<String, Value>,
) -> (DeterminismMode, &'static str) {
    if source_event.sequence_no < fork_sequence {
        return (DeterminismMode::Exact, REASON_SOURCE_OUTPUT_REUSED);
    }

    let event_type = source_event.event_type;

    if event_type == EventType::PromptRendered
        && let Some(prompt) = &profile.prompt_override
    {
        if let Some(template_id) = &prompt.template_id {
            payload.insert(
                "prompt_template_id".to_string(),
                Value::String(template_id.clone()),
            );
        }
        if let Some(template_version) = &prompt.template_version {
            payload.insert(
                "prompt_template_version".to_string(),
                Value::String(template_version.clone()),
            );
        }
        if !prompt.variables.is_empty() {
            payload.insert(
                "prompt_variables_override".to_string(),
                Value::Object(prompt.variables.clone()),
            );
        }
        return (DeterminismMode::Simulated, REASON_OPERATOR_OVERRIDE);
    }

    if matches!(event_type, EventType::ModelCalled | EventType::ModelResult)
        && let Some(model) = &profile.model_override
    {
        if let Some(provider) = &model.provider {
            payload.insert("provider".to_string(), Value::String(provider.clone()));
        }
        if let Some(model_id) = &model.model_id {
            payload.insert("model_id".to_string(), Value::String(model_id.clone()));
        }
        return (DeterminismMode::Simulated, REASON_OPERATOR_OVERRIDE);
    }

    if event_type == EventType::RetrievalExecuted
        && let Some(retriever) = &profile.retriever_override
    {
        if let Some(top_k) = retriever.top_k {
            payload.insert("top_k".to_string(), Value::from(top_k));
        }
        if !retriever.filters.is_empty() {
            payload.insert("filters".to_string(), Value::Object(retriever.filters.clone()));
        }
        if let Some(embedding_profile) = &retriever.embedding_profile {
            payload.insert(
                "embedding_profile".to_string(),
                Value::String(embedding_profile.clone()),
            );
        }
        return (DeterminismMode::Simulated, REASON_OPERATOR_OVERRIDE);
    }

    if event_type == EventType::ToolResult
        && let Some(replacement) = profile.tool_simulation_overrides.get(&source_event.step_id)
    {
        payload.insert("result_ref".to_string(), Value::Object(replacement.clone()));
        return (DeterminismMode::Simulated, REASON_OPERATOR_OVERRIDE);
    }

    if matches!(
        event_type,
        EventType::ToolCalled
            | EventType::ToolResult
            | EventType::ModelCalled
            | EventType::ModelResult
            | EventType::RetrievalExecuted
    ) {
        return (DeterminismMode::Cached, REASON_CACHE_HIT);
    }

    (DeterminismMode::Exact, REASON_SOURCE_OUTPUT_REUSED)
}

// ============================================================================
// SECTION: Session Status Derivation
// ============================================================================

/// Derives the terminal session status from per-mode event counts.
///
/// Cached-only sessions map to `completed_mixed`; `completed_cached` is
/// deliberately never produced.
fn derive_session_status(mode_counts: &BTreeMap<DeterminismMode, usize>) -> ReplayStatus {
    let simulated = mode_counts.get(&DeterminismMode::Simulated).copied().unwrap_or(0);
    let cached = mode_counts.get(&DeterminismMode::Cached).copied().unwrap_or(0);
    let exact = mode_counts.get(&DeterminismMode::Exact).copied().unwrap_or(0);

    if simulated == 0 && cached == 0 && exact > 0 {
        return ReplayStatus::CompletedExact;
    }
    if simulated > 0 && (cached > 0 || exact > 0) {
        return ReplayStatus::CompletedMixed;
    }
    if simulated > 0 {
        return ReplayStatus::CompletedSimulated;
    }
    ReplayStatus::CompletedMixed
}
