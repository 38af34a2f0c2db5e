// crates/flight-recorder-core/src/runtime/memory.rs
// ============================================================================
// Module: Flight Recorder In-Memory Store
// Description: Reference RecorderStore implementation backed by process
//              memory.
// Purpose: Provide a dependency-free store for tests and embedded use.
// Dependencies: crate::{core, interfaces}, serde_json
// ============================================================================

//! ## Overview
//! The in-memory store implements the full [`RecorderStore`] contract with
//! the same observable semantics as the durable backends: idempotent ingest,
//! per-run monotonic sequencing, atomic job claims, and replay session
//! lifecycle transitions. A single mutex serializes all operations, which
//! trivially satisfies the per-run transaction requirement.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::sync::Mutex;

use serde_json::Map;
use serde_json::Value;
use serde_json::json;

use crate::core::event::CanonicalEvent;
use crate::core::identifiers::ArtifactHash;
use crate::core::identifiers::AuditId;
use crate::core::identifiers::EventId;
use crate::core::identifiers::IdempotencyKey;
use crate::core::identifiers::JobId;
use crate::core::identifiers::ReplaySessionId;
use crate::core::identifiers::RunId;
use crate::core::identifiers::StepId;
use crate::core::identifiers::TraceId;
use crate::core::record::ArtifactRecord;
use crate::core::record::ArtifactStatus;
use crate::core::record::AuditLogRecord;
use crate::core::record::DEFAULT_JOB_MAX_RETRIES;
use crate::core::record::EventArtifactRecord;
use crate::core::record::EventRecord;
use crate::core::record::JobRecord;
use crate::core::record::JobStatus;
use crate::core::record::NewRun;
use crate::core::record::ReplaySessionRecord;
use crate::core::record::ReplayStatus;
use crate::core::record::RunRecord;
use crate::core::record::RunStatus;
use crate::core::record::StepRecord;
use crate::core::time::UtcTimestamp;
use crate::core::validation::RunLedgerView;
use crate::core::validation::validate_event;
use crate::interfaces::AuditActor;
use crate::interfaces::EventPage;
use crate::interfaces::EventQuery;
use crate::interfaces::IngestOutcome;
use crate::interfaces::RecorderError;
use crate::interfaces::RecorderStore;
use crate::interfaces::RunDetail;
use crate::interfaces::RunPage;
use crate::interfaces::RunQuery;
use crate::runtime::replay::REPLAY_EXECUTE_JOB;
use crate::runtime::replay::REPLAY_SESSION_PAYLOAD_KEY;

// ============================================================================
// SECTION: State
// ============================================================================

/// Mutable store state behind the mutex.
#[derive(Debug, Default)]
struct MemoryState {
    /// Runs by identifier.
    runs: BTreeMap<RunId, RunRecord>,
    /// Steps by identifier.
    steps: BTreeMap<StepId, StepRecord>,
    /// Events in insertion order.
    events: Vec<EventRecord>,
    /// Artifacts by content hash.
    artifacts: BTreeMap<ArtifactHash, ArtifactRecord>,
    /// Event/artifact links.
    event_artifacts: Vec<EventArtifactRecord>,
    /// Replay sessions by identifier.
    sessions: BTreeMap<ReplaySessionId, ReplaySessionRecord>,
    /// Job queue rows in creation order.
    jobs: Vec<JobRecord>,
    /// Append-only audit log.
    audit_log: Vec<AuditLogRecord>,
    /// Next job row identifier.
    next_job_id: i64,
}

/// In-memory recorder store.
///
/// # Invariants
/// - All operations are serialized by one mutex; ingest atomicity follows.
#[derive(Debug, Default)]
pub struct InMemoryRecorderStore {
    /// Shared mutable state.
    state: Mutex<MemoryState>,
}

impl InMemoryRecorderStore {
    /// Builds an empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Locks the state, failing closed on poisoning.
    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryState>, RecorderError> {
        self.state.lock().map_err(|_| RecorderError::Internal("store mutex poisoned".to_string()))
    }

    /// Returns a snapshot of the audit log in append order.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError::Internal`] when the store mutex is poisoned.
    pub fn audit_entries(&self) -> Result<Vec<AuditLogRecord>, RecorderError> {
        Ok(self.lock()?.audit_log.clone())
    }

    /// Returns the artifact links recorded for an event.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError::Internal`] when the store mutex is poisoned.
    pub fn artifact_links_for(
        &self,
        event_id: &EventId,
    ) -> Result<Vec<EventArtifactRecord>, RecorderError> {
        Ok(self
            .lock()?
            .event_artifacts
            .iter()
            .filter(|link| &link.event_id == event_id)
            .cloned()
            .collect())
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Formats a timestamp as an RFC 3339 cursor.
fn cursor_for(timestamp: UtcTimestamp) -> Result<String, RecorderError> {
    timestamp.rfc3339().map_err(|err| RecorderError::Internal(err.to_string()))
}

/// Computes the retry backoff in seconds for a failed job.
fn retry_backoff_seconds(retries: i64) -> i64 {
    let exponent = retries.clamp(0, 6);
    1_i64 << exponent
}

/// Shifts a timestamp forward by whole seconds.
fn add_seconds(timestamp: UtcTimestamp, seconds: i64) -> Result<UtcTimestamp, RecorderError> {
    let millis = timestamp
        .unix_millis()
        .checked_add(seconds.saturating_mul(1_000))
        .ok_or_else(|| RecorderError::Internal("timestamp overflow".to_string()))?;
    UtcTimestamp::from_unix_millis(millis).map_err(|err| RecorderError::Internal(err.to_string()))
}

// ============================================================================
// SECTION: RecorderStore Implementation
// ============================================================================

impl RecorderStore for InMemoryRecorderStore {
    fn create_run(&self, new_run: NewRun) -> Result<RunRecord, RecorderError> {
        let mut state = self.lock()?;
        let run = RunRecord {
            run_id: RunId::generate(),
            trace_id: TraceId::generate(),
            app_id: new_run.app_id,
            environment: new_run.environment,
            status: RunStatus::Running,
            source_type: new_run.source_type,
            source_run_id: new_run.source_run_id,
            tags: new_run.tags,
            retention_class: new_run.retention_class,
            legal_hold: false,
            started_at: UtcTimestamp::now(),
            ended_at: None,
        };
        state.runs.insert(run.run_id.clone(), run.clone());
        Ok(run)
    }

    fn get_run(&self, run_id: &RunId) -> Result<Option<RunRecord>, RecorderError> {
        let state = self.lock()?;
        Ok(state.runs.get(run_id).cloned())
    }

    fn finalize_run(&self, run_id: &RunId, status: RunStatus) -> Result<RunRecord, RecorderError> {
        if !status.is_terminal() {
            return Err(RecorderError::validation(
                "final_status must be 'success' or 'failed'",
                json!({ "final_status": status.as_str() }),
            ));
        }
        let mut state = self.lock()?;
        let Some(run) = state.runs.get_mut(run_id) else {
            return Err(RecorderError::not_found(
                "Run not found",
                json!({ "run_id": run_id.as_str() }),
            ));
        };
        run.status = status;
        run.ended_at = Some(UtcTimestamp::now());
        Ok(run.clone())
    }

    fn ingest_event(
        &self,
        run_id: &RunId,
        idempotency_key: &IdempotencyKey,
        event: CanonicalEvent,
    ) -> Result<IngestOutcome, RecorderError> {
        let mut state = self.lock()?;

        if let Some(existing) =
            state.events.iter().find(|row| &row.idempotency_key == idempotency_key)
        {
            return Ok(IngestOutcome {
                event: existing.clone(),
                accepted: false,
                warnings: Vec::new(),
            });
        }

        let Some(run) = state.runs.get(run_id).cloned() else {
            return Err(RecorderError::not_found(
                "Run not found",
                json!({ "run_id": run_id.as_str() }),
            ));
        };

        let required_precedent = crate::core::event::EventType::parse(&event.event_type)
            .and_then(crate::core::event::EventType::required_precedent);
        let mut max_sequence_no: Option<i64> = None;
        let mut has_terminal_event = false;
        let mut causal_precedent_present = required_precedent.is_none();
        for row in state.events.iter().filter(|row| &row.run_id == run_id) {
            max_sequence_no =
                Some(max_sequence_no.map_or(row.sequence_no, |max| max.max(row.sequence_no)));
            has_terminal_event = has_terminal_event || row.event_type.is_terminal();
            if let Some(precedent) = required_precedent
                && row.event_type == precedent
                && row.step_id == event.step_id
                && row.sequence_no < event.sequence_no
            {
                causal_precedent_present = true;
            }
        }

        let ledger = RunLedgerView {
            max_sequence_no,
            has_terminal_event,
            causal_precedent_present,
        };
        let validated = validate_event(&run, &event, &ledger)?;

        match state.steps.entry(event.step_id.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(StepRecord {
                    step_id: event.step_id.clone(),
                    run_id: event.run_id.clone(),
                    parent_step_id: event.parent_step_id.clone(),
                    sequence_no: event.sequence_no,
                    step_type: validated.event_type,
                    determinism_mode: event.determinism_mode,
                    started_at: event.timestamp,
                    ended_at: None,
                });
            }
            Entry::Occupied(mut slot) => {
                let step = slot.get_mut();
                if event.sequence_no < step.sequence_no {
                    step.sequence_no = event.sequence_no;
                }
                step.ended_at = Some(event.timestamp);
                step.determinism_mode = event.determinism_mode;
            }
        }

        let now = UtcTimestamp::now();
        let mut record = EventRecord {
            event_id: EventId::generate(),
            run_id: event.run_id.clone(),
            step_id: event.step_id.clone(),
            parent_step_id: event.parent_step_id.clone(),
            event_type: validated.event_type,
            schema_version: event.schema_version.clone(),
            payload: event.payload.clone(),
            redaction_status: event.redaction_status,
            idempotency_key: idempotency_key.clone(),
            sequence_no: event.sequence_no,
            timestamp: event.timestamp,
            actor_type: event.actor_type,
            determinism_mode: event.determinism_mode,
            artifact_pending: false,
            created_at: now,
        };

        for artifact_ref in &event.artifact_refs {
            if !state.artifacts.contains_key(&artifact_ref.artifact_hash) {
                state.artifacts.insert(
                    artifact_ref.artifact_hash.clone(),
                    ArtifactRecord {
                        artifact_hash: artifact_ref.artifact_hash.clone(),
                        artifact_type: artifact_ref.artifact_type.clone(),
                        byte_size: artifact_ref.byte_size,
                        mime_type: artifact_ref.mime_type.clone(),
                        content_encoding: artifact_ref.content_encoding.clone(),
                        redaction_profile: artifact_ref.redaction_profile.clone(),
                        storage_bucket: "pending".to_string(),
                        storage_object_key: "pending".to_string(),
                        retention_class: run.retention_class.clone(),
                        status: ArtifactStatus::Pending,
                        hash_algorithm: crate::core::hashing::DEFAULT_HASH_ALGORITHM
                            .as_str()
                            .to_string(),
                        blocked_reason: None,
                        created_at: now,
                    },
                );
                record.artifact_pending = true;
            }
            state.event_artifacts.push(EventArtifactRecord {
                event_id: record.event_id.clone(),
                artifact_hash: artifact_ref.artifact_hash.clone(),
                reference_role: artifact_ref.artifact_type.clone(),
            });
        }

        state.events.push(record.clone());

        if validated.event_type.is_terminal()
            && let Some(run_row) = state.runs.get_mut(run_id)
        {
            run_row.status =
                if validated.event_type == crate::core::event::EventType::RunCompleted {
                    RunStatus::Success
                } else {
                    RunStatus::Failed
                };
            run_row.ended_at = Some(UtcTimestamp::now());
        }

        Ok(IngestOutcome {
            event: record,
            accepted: true,
            warnings: validated.warnings,
        })
    }

    fn list_runs(&self, query: &RunQuery) -> Result<RunPage, RecorderError> {
        let state = self.lock()?;
        let mut rows: Vec<RunRecord> = state
            .runs
            .values()
            .filter(|run| {
                query.app_id.as_ref().is_none_or(|app_id| &run.app_id == app_id)
                    && query
                        .environment
                        .as_ref()
                        .is_none_or(|environment| &run.environment == environment)
                    && query.status.is_none_or(|status| run.status == status)
                    && query
                        .source_type
                        .is_none_or(|source_type| run.source_type == source_type)
                    && query.from_utc.is_none_or(|from| run.started_at >= from)
                    && query.to_utc.is_none_or(|to| run.started_at <= to)
                    && query.page_token.is_none_or(|cursor| run.started_at < cursor)
            })
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.started_at.cmp(&a.started_at));

        let page_size = query.clamped_page_size();
        let limit = usize::try_from(page_size).unwrap_or(usize::MAX);
        rows.truncate(limit.saturating_add(1));

        let next_page_token = if rows.len() > limit {
            rows.truncate(limit);
            rows.last().map(|run| cursor_for(run.started_at)).transpose()?
        } else {
            None
        };

        Ok(RunPage {
            items: rows,
            next_page_token,
        })
    }

    fn list_events(
        &self,
        run_id: &RunId,
        query: &EventQuery,
    ) -> Result<EventPage, RecorderError> {
        let state = self.lock()?;
        let mut rows: Vec<EventRecord> = state
            .events
            .iter()
            .filter(|event| {
                &event.run_id == run_id
                    && query.event_type.is_none_or(|event_type| event.event_type == event_type)
                    && query.step_id.as_ref().is_none_or(|step_id| &event.step_id == step_id)
                    && query.sequence_from.is_none_or(|from| event.sequence_no >= from)
                    && query.sequence_to.is_none_or(|to| event.sequence_no <= to)
                    && query.page_token.is_none_or(|cursor| event.sequence_no > cursor)
            })
            .cloned()
            .collect();
        rows.sort_by_key(|event| event.sequence_no);

        let page_size = query.clamped_page_size();
        let limit = usize::try_from(page_size).unwrap_or(usize::MAX);
        rows.truncate(limit.saturating_add(1));

        let next_page_token = if rows.len() > limit {
            rows.truncate(limit);
            rows.last().map(|event| event.sequence_no.to_string())
        } else {
            None
        };

        Ok(EventPage {
            items: rows,
            next_page_token,
        })
    }

    fn run_detail(&self, run_id: &RunId) -> Result<RunDetail, RecorderError> {
        let state = self.lock()?;
        let Some(run) = state.runs.get(run_id).cloned() else {
            return Err(RecorderError::not_found(
                "Run not found",
                json!({ "run_id": run_id.as_str() }),
            ));
        };
        let mut counters: BTreeMap<String, i64> = BTreeMap::new();
        let mut total = 0_i64;
        for event in state.events.iter().filter(|event| &event.run_id == run_id) {
            *counters.entry(event.event_type.as_str().to_string()).or_insert(0) += 1;
            total += 1;
        }
        counters.insert("total_events".to_string(), total);
        Ok(RunDetail {
            run,
            counters,
        })
    }

    fn load_run_events(&self, run_id: &RunId) -> Result<Vec<EventRecord>, RecorderError> {
        let state = self.lock()?;
        let mut rows: Vec<EventRecord> =
            state.events.iter().filter(|event| &event.run_id == run_id).cloned().collect();
        rows.sort_by_key(|event| event.sequence_no);
        Ok(rows)
    }

    fn get_step(
        &self,
        run_id: &RunId,
        step_id: &StepId,
    ) -> Result<Option<StepRecord>, RecorderError> {
        let state = self.lock()?;
        Ok(state.steps.get(step_id).filter(|step| &step.run_id == run_id).cloned())
    }

    fn insert_step_if_absent(&self, step: StepRecord) -> Result<(), RecorderError> {
        let mut state = self.lock()?;
        state.steps.entry(step.step_id.clone()).or_insert(step);
        Ok(())
    }

    fn insert_replay_event(&self, event: EventRecord) -> Result<(), RecorderError> {
        let mut state = self.lock()?;
        if state.events.iter().any(|row| row.idempotency_key == event.idempotency_key) {
            return Err(RecorderError::conflict(
                "idempotency_key already recorded",
                json!({ "idempotency_key": event.idempotency_key.as_str() }),
            ));
        }
        state.events.push(event);
        Ok(())
    }

    fn get_artifact(&self, hash: &ArtifactHash) -> Result<Option<ArtifactRecord>, RecorderError> {
        let state = self.lock()?;
        Ok(state.artifacts.get(hash).cloned())
    }

    fn insert_artifact_if_absent(
        &self,
        artifact: ArtifactRecord,
    ) -> Result<ArtifactRecord, RecorderError> {
        let mut state = self.lock()?;
        let row =
            state.artifacts.entry(artifact.artifact_hash.clone()).or_insert(artifact).clone();
        Ok(row)
    }

    fn create_replay_session(
        &self,
        session: ReplaySessionRecord,
        actor: &AuditActor,
    ) -> Result<ReplaySessionRecord, RecorderError> {
        let mut state = self.lock()?;
        let now = UtcTimestamp::now();

        let mut payload = Map::new();
        payload.insert(
            REPLAY_SESSION_PAYLOAD_KEY.to_string(),
            Value::String(session.replay_session_id.as_str().to_string()),
        );
        let job_id = state.next_job_id + 1;
        state.next_job_id = job_id;
        state.jobs.push(JobRecord {
            job_id: JobId::new(job_id),
            job_type: REPLAY_EXECUTE_JOB.to_string(),
            payload,
            status: JobStatus::Pending,
            retries: 0,
            max_retries: DEFAULT_JOB_MAX_RETRIES,
            last_error: None,
            available_at: now,
            created_at: now,
            updated_at: now,
        });

        state.audit_log.push(AuditLogRecord {
            audit_id: AuditId::generate(),
            actor_id: actor.actor_id.clone(),
            actor_type: actor.actor_type.clone(),
            action: "replay_created".to_string(),
            target_type: "replay_session".to_string(),
            target_id: session.replay_session_id.as_str().to_string(),
            timestamp: now,
            details: json!({
                "source_run_id": session.source_run_id.as_str(),
                "fork_step_id": session.fork_step_id.as_ref().map(StepId::as_str),
            })
            .as_object()
            .cloned()
            .unwrap_or_default(),
        });

        state.sessions.insert(session.replay_session_id.clone(), session.clone());
        Ok(session)
    }

    fn get_replay_session(
        &self,
        session_id: &ReplaySessionId,
    ) -> Result<Option<ReplaySessionRecord>, RecorderError> {
        let state = self.lock()?;
        Ok(state.sessions.get(session_id).cloned())
    }

    fn cancel_replay_session(
        &self,
        session_id: &ReplaySessionId,
    ) -> Result<ReplaySessionRecord, RecorderError> {
        let mut state = self.lock()?;
        let Some(session) = state.sessions.get_mut(session_id) else {
            return Err(RecorderError::not_found(
                "Replay session not found",
                json!({ "replay_session_id": session_id.as_str() }),
            ));
        };
        session.cancel_requested = true;
        if session.status.is_executable() {
            session.status = ReplayStatus::FailedExecution;
            session.failure_reason_code =
                Some(crate::runtime::replay::FAILURE_CANCEL_REQUESTED.to_string());
            session.ended_at = Some(UtcTimestamp::now());
        }
        Ok(session.clone())
    }

    fn mark_replay_running(&self, session_id: &ReplaySessionId) -> Result<(), RecorderError> {
        let mut state = self.lock()?;
        if let Some(session) = state.sessions.get_mut(session_id) {
            session.status = ReplayStatus::Running;
        }
        Ok(())
    }

    fn is_replay_cancel_requested(
        &self,
        session_id: &ReplaySessionId,
    ) -> Result<bool, RecorderError> {
        let state = self.lock()?;
        state.sessions.get(session_id).map(|session| session.cancel_requested).ok_or_else(|| {
            RecorderError::not_found(
                "Replay session not found",
                json!({ "replay_session_id": session_id.as_str() }),
            )
        })
    }

    fn fail_replay_session(
        &self,
        session_id: &ReplaySessionId,
        status: ReplayStatus,
        failure_reason_code: &str,
        reason_codes: &[String],
    ) -> Result<ReplaySessionRecord, RecorderError> {
        let mut state = self.lock()?;
        let Some(session) = state.sessions.get_mut(session_id) else {
            return Err(RecorderError::not_found(
                "Replay session not found",
                json!({ "replay_session_id": session_id.as_str() }),
            ));
        };
        session.status = status;
        session.failure_reason_code = Some(failure_reason_code.to_string());
        session.reason_codes = reason_codes.to_vec();
        session.ended_at = Some(UtcTimestamp::now());
        Ok(session.clone())
    }

    fn complete_replay_session(
        &self,
        session_id: &ReplaySessionId,
        status: ReplayStatus,
        derived_run_id: &RunId,
        reason_codes: &[String],
    ) -> Result<ReplaySessionRecord, RecorderError> {
        let mut state = self.lock()?;
        let Some(session) = state.sessions.get_mut(session_id) else {
            return Err(RecorderError::not_found(
                "Replay session not found",
                json!({ "replay_session_id": session_id.as_str() }),
            ));
        };
        session.status = status;
        session.derived_run_id = Some(derived_run_id.clone());
        session.reason_codes = reason_codes.to_vec();
        session.failure_reason_code = None;
        session.ended_at = Some(UtcTimestamp::now());
        Ok(session.clone())
    }

    fn enqueue_job(
        &self,
        job_type: &str,
        payload: Map<String, Value>,
    ) -> Result<JobRecord, RecorderError> {
        let mut state = self.lock()?;
        let now = UtcTimestamp::now();
        let job_id = state.next_job_id + 1;
        state.next_job_id = job_id;
        let job = JobRecord {
            job_id: JobId::new(job_id),
            job_type: job_type.to_string(),
            payload,
            status: JobStatus::Pending,
            retries: 0,
            max_retries: DEFAULT_JOB_MAX_RETRIES,
            last_error: None,
            available_at: now,
            created_at: now,
            updated_at: now,
        };
        state.jobs.push(job.clone());
        Ok(job)
    }

    fn fetch_next_job(&self, job_type: Option<&str>) -> Result<Option<JobRecord>, RecorderError> {
        let mut state = self.lock()?;
        let now = UtcTimestamp::now();
        let candidate = state
            .jobs
            .iter_mut()
            .filter(|job| {
                job.status == JobStatus::Pending
                    && job.available_at <= now
                    && job_type.is_none_or(|wanted| job.job_type == wanted)
            })
            .min_by(|a, b| a.created_at.cmp(&b.created_at).then(a.job_id.cmp(&b.job_id)));
        let Some(job) = candidate else {
            return Ok(None);
        };
        job.status = JobStatus::Running;
        job.updated_at = now;
        Ok(Some(job.clone()))
    }

    fn mark_job_success(&self, job_id: JobId) -> Result<(), RecorderError> {
        let mut state = self.lock()?;
        if let Some(job) = state.jobs.iter_mut().find(|job| job.job_id == job_id) {
            job.status = JobStatus::Completed;
            job.updated_at = UtcTimestamp::now();
        }
        Ok(())
    }

    fn mark_job_failure(&self, job_id: JobId, error: &str) -> Result<JobRecord, RecorderError> {
        let mut state = self.lock()?;
        let Some(job) = state.jobs.iter_mut().find(|job| job.job_id == job_id) else {
            return Err(RecorderError::not_found(
                "Job not found",
                json!({ "job_id": job_id.get() }),
            ));
        };
        let now = UtcTimestamp::now();
        job.retries += 1;
        job.last_error = Some(error.to_string());
        job.updated_at = now;
        if job.retries >= job.max_retries {
            job.status = JobStatus::Failed;
        } else {
            job.status = JobStatus::Pending;
            job.available_at = add_seconds(now, retry_backoff_seconds(job.retries))?;
        }
        Ok(job.clone())
    }

    fn append_audit(&self, entry: AuditLogRecord) -> Result<(), RecorderError> {
        let mut state = self.lock()?;
        state.audit_log.push(entry);
        Ok(())
    }

    fn ping(&self) -> Result<(), RecorderError> {
        drop(self.lock()?);
        Ok(())
    }
}
