// crates/flight-recorder-core/src/interfaces/mod.rs
// ============================================================================
// Module: Flight Recorder Interfaces
// Description: Backend-agnostic interfaces for persistence, object storage,
//              and audit emission.
// Purpose: Define the contract surfaces used by the recorder runtime.
// Dependencies: crate::core, serde, serde_json, thiserror
// ============================================================================

//! ## Overview
//! Interfaces define how the recorder integrates with durable storage and
//! observability without embedding backend-specific details. Implementations
//! must be deterministic where the contract demands it (per-run ingest
//! serialization, atomic job claims) and fail closed on missing or invalid
//! data.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::io;
use std::io::Write;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;
use thiserror::Error;

use crate::core::event::CanonicalEvent;
use crate::core::event::EventType;
use crate::core::identifiers::ArtifactHash;
use crate::core::identifiers::IdempotencyKey;
use crate::core::identifiers::JobId;
use crate::core::identifiers::ReplaySessionId;
use crate::core::identifiers::RunId;
use crate::core::identifiers::StepId;
use crate::core::overrides::ReplayOverrideProfile;
use crate::core::record::ArtifactRecord;
use crate::core::record::AuditLogRecord;
use crate::core::record::EventRecord;
use crate::core::record::JobRecord;
use crate::core::record::NewRun;
use crate::core::record::ReplaySessionRecord;
use crate::core::record::ReplayStatus;
use crate::core::record::RunRecord;
use crate::core::record::RunStatus;
use crate::core::record::SourceType;
use crate::core::record::StepRecord;
use crate::core::time::UtcTimestamp;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default page size for run listings.
pub const DEFAULT_RUN_PAGE_SIZE: i64 = 50;
/// Maximum page size for run listings.
pub const MAX_RUN_PAGE_SIZE: i64 = 200;
/// Default page size for event listings.
pub const DEFAULT_EVENT_PAGE_SIZE: i64 = 200;
/// Maximum page size for event listings.
pub const MAX_EVENT_PAGE_SIZE: i64 = 500;

// ============================================================================
// SECTION: Error Taxonomy
// ============================================================================

/// Stable wire codes for recorder errors.
///
/// # Invariants
/// - Labels are stable; collaborators map them to transport status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Malformed request, missing fields, or unknown event type.
    ValidationError,
    /// Non-monotonic sequence or terminal-after-terminal append.
    Conflict,
    /// Unknown run, artifact, or replay session.
    NotFound,
    /// Missing bearer token.
    AuthRequired,
    /// Wrong bearer token.
    AuthForbidden,
    /// Database or artifact store unreachable.
    DependencyUnavailable,
    /// Unanticipated failure.
    InternalError,
}

impl ErrorCode {
    /// Returns the stable wire label for the code.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ValidationError => "VALIDATION_ERROR",
            Self::Conflict => "CONFLICT",
            Self::NotFound => "NOT_FOUND",
            Self::AuthRequired => "AUTH_REQUIRED",
            Self::AuthForbidden => "AUTH_FORBIDDEN",
            Self::DependencyUnavailable => "DEPENDENCY_UNAVAILABLE",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }
}

/// Recorder error taxonomy surfaced to collaborators.
///
/// # Invariants
/// - `details` payloads never embed raw artifact or payload bytes.
#[derive(Debug, Error)]
pub enum RecorderError {
    /// Request failed validation.
    #[error("{message}")]
    Validation {
        /// Human-readable failure description.
        message: String,
        /// Structured failure details.
        details: Value,
    },
    /// Request conflicts with recorded state.
    #[error("{message}")]
    Conflict {
        /// Human-readable failure description.
        message: String,
        /// Structured failure details.
        details: Value,
    },
    /// Referenced entity does not exist.
    #[error("{message}")]
    NotFound {
        /// Human-readable failure description.
        message: String,
        /// Structured failure details.
        details: Value,
    },
    /// Caller did not present credentials.
    #[error("{message}")]
    AuthRequired {
        /// Human-readable failure description.
        message: String,
    },
    /// Caller presented invalid credentials.
    #[error("{message}")]
    AuthForbidden {
        /// Human-readable failure description.
        message: String,
    },
    /// A backing dependency is unreachable; retryable.
    #[error("dependency unavailable: {0}")]
    Unavailable(String),
    /// Unanticipated internal failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl RecorderError {
    /// Builds a validation error.
    #[must_use]
    pub fn validation(message: impl Into<String>, details: Value) -> Self {
        Self::Validation {
            message: message.into(),
            details,
        }
    }

    /// Builds a conflict error.
    #[must_use]
    pub fn conflict(message: impl Into<String>, details: Value) -> Self {
        Self::Conflict {
            message: message.into(),
            details,
        }
    }

    /// Builds a not-found error.
    #[must_use]
    pub fn not_found(message: impl Into<String>, details: Value) -> Self {
        Self::NotFound {
            message: message.into(),
            details,
        }
    }

    /// Returns the stable wire code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Validation { .. } => ErrorCode::ValidationError,
            Self::Conflict { .. } => ErrorCode::Conflict,
            Self::NotFound { .. } => ErrorCode::NotFound,
            Self::AuthRequired { .. } => ErrorCode::AuthRequired,
            Self::AuthForbidden { .. } => ErrorCode::AuthForbidden,
            Self::Unavailable(_) => ErrorCode::DependencyUnavailable,
            Self::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Returns true when retrying the request may succeed.
    #[must_use]
    pub const fn retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }

    /// Returns the structured details payload, when present.
    #[must_use]
    pub fn details(&self) -> Value {
        match self {
            Self::Validation { details, .. }
            | Self::Conflict { details, .. }
            | Self::NotFound { details, .. } => details.clone(),
            _ => Value::Object(Map::new()),
        }
    }
}

// ============================================================================
// SECTION: Artifact Store
// ============================================================================

/// Location of a stored artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredArtifact {
    /// Storage bucket holding the bytes.
    pub bucket: String,
    /// Object key within the bucket (`hash[0:2]/hash`).
    pub object_key: String,
}

/// Artifact store errors.
///
/// # Invariants
/// - All variants are retryable I/O-class failures except `Invalid`.
#[derive(Debug, Error)]
pub enum ArtifactStoreError {
    /// Local I/O failure.
    #[error("artifact store io error: {0}")]
    Io(String),
    /// Remote backend failure.
    #[error("artifact store backend error: {0}")]
    Backend(String),
    /// Invalid configuration or input.
    #[error("artifact store invalid: {0}")]
    Invalid(String),
}

impl From<ArtifactStoreError> for RecorderError {
    fn from(error: ArtifactStoreError) -> Self {
        match error {
            ArtifactStoreError::Io(message) | ArtifactStoreError::Backend(message) => {
                Self::Unavailable(message)
            }
            ArtifactStoreError::Invalid(message) => Self::Internal(message),
        }
    }
}

/// Content-addressed blob sink.
///
/// # Invariants
/// - Writes are idempotent: identical bytes may be rewritten safely because
///   content is addressed by hash.
pub trait ArtifactStore: Send + Sync {
    /// Writes bytes under the derived key iff no object exists there yet.
    ///
    /// # Errors
    ///
    /// Returns [`ArtifactStoreError`] when the backend is unreachable.
    fn store(&self, hash: &ArtifactHash, bytes: &[u8]) -> Result<StoredArtifact, ArtifactStoreError>;

    /// Returns true when an object exists for the hash.
    ///
    /// # Errors
    ///
    /// Returns [`ArtifactStoreError`] when the backend is unreachable.
    fn exists(&self, hash: &ArtifactHash) -> Result<bool, ArtifactStoreError>;
}

// ============================================================================
// SECTION: Query Types
// ============================================================================

/// Filters and pagination for run listings.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RunQuery {
    /// Filter by application identifier.
    pub app_id: Option<String>,
    /// Filter by environment.
    pub environment: Option<String>,
    /// Filter by run status.
    pub status: Option<RunStatus>,
    /// Filter by run provenance.
    pub source_type: Option<SourceType>,
    /// Inclusive lower bound on `started_at`.
    pub from_utc: Option<UtcTimestamp>,
    /// Inclusive upper bound on `started_at`.
    pub to_utc: Option<UtcTimestamp>,
    /// Requested page size; clamped to `[1, MAX_RUN_PAGE_SIZE]`.
    pub page_size: Option<i64>,
    /// Exclusive `started_at` cursor from the previous page.
    pub page_token: Option<UtcTimestamp>,
}

impl RunQuery {
    /// Returns the effective page size after clamping.
    #[must_use]
    pub fn clamped_page_size(&self) -> i64 {
        self.page_size.unwrap_or(DEFAULT_RUN_PAGE_SIZE).clamp(1, MAX_RUN_PAGE_SIZE)
    }
}

/// One page of run listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunPage {
    /// Runs ordered by `started_at` descending.
    pub items: Vec<RunRecord>,
    /// Cursor for the next page, when more rows exist.
    pub next_page_token: Option<String>,
}

/// Filters and pagination for event listings.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EventQuery {
    /// Filter by event type.
    pub event_type: Option<EventType>,
    /// Filter by step.
    pub step_id: Option<StepId>,
    /// Inclusive lower bound on `sequence_no`.
    pub sequence_from: Option<i64>,
    /// Inclusive upper bound on `sequence_no`.
    pub sequence_to: Option<i64>,
    /// Requested page size; clamped to `[1, MAX_EVENT_PAGE_SIZE]`.
    pub page_size: Option<i64>,
    /// Exclusive `sequence_no` cursor from the previous page.
    pub page_token: Option<i64>,
}

impl EventQuery {
    /// Returns the effective page size after clamping.
    #[must_use]
    pub fn clamped_page_size(&self) -> i64 {
        self.page_size.unwrap_or(DEFAULT_EVENT_PAGE_SIZE).clamp(1, MAX_EVENT_PAGE_SIZE)
    }
}

/// One page of event listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventPage {
    /// Events ordered by `sequence_no` ascending.
    pub items: Vec<EventRecord>,
    /// Cursor for the next page, when more rows exist.
    pub next_page_token: Option<String>,
}

/// Run detail with per-type event counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunDetail {
    /// The run row.
    pub run: RunRecord,
    /// Count per observed event type, plus a `total_events` entry.
    pub counters: BTreeMap<String, i64>,
}

// ============================================================================
// SECTION: Ingestion Types
// ============================================================================

/// Outcome of one idempotent event append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestOutcome {
    /// The stored event row (new or previously recorded).
    pub event: EventRecord,
    /// False when the idempotency key matched an existing event.
    pub accepted: bool,
    /// Non-fatal validation warnings.
    pub warnings: Vec<String>,
}

// ============================================================================
// SECTION: Replay Types
// ============================================================================

/// Inputs for creating a replay session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewReplaySession {
    /// Run to replay; must be terminal.
    pub source_run_id: RunId,
    /// Optional fork step within the source run.
    #[serde(default)]
    pub fork_step_id: Option<StepId>,
    /// Operator override profile.
    #[serde(default)]
    pub override_profile: ReplayOverrideProfile,
}

/// Actor attribution for audited actions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditActor {
    /// Actor identifier.
    pub actor_id: String,
    /// Actor classification label.
    pub actor_type: String,
}

impl AuditActor {
    /// Returns the system actor used for internally triggered actions.
    #[must_use]
    pub fn system() -> Self {
        Self {
            actor_id: "system".to_string(),
            actor_type: "service".to_string(),
        }
    }
}

// ============================================================================
// SECTION: Recorder Store
// ============================================================================

/// Durable persistence contract for the recorder.
///
/// # Invariants
/// - `ingest_event` executes validation, step upsert, artifact placeholders,
///   and terminal transitions atomically, serialized per run.
/// - `fetch_next_job` transitions `pending -> running` atomically; at most
///   one worker observes a given job as claimable.
/// - `create_replay_session` persists the session, its execution job, and
///   the audit entry in one transaction.
pub trait RecorderStore: Send + Sync {
    /// Creates a run in `running` state.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError`] when persistence fails.
    fn create_run(&self, new_run: NewRun) -> Result<RunRecord, RecorderError>;

    /// Loads a run by identifier.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError`] when persistence fails.
    fn get_run(&self, run_id: &RunId) -> Result<Option<RunRecord>, RecorderError>;

    /// Forces a run into a terminal status.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError::NotFound`] for unknown runs and
    /// [`RecorderError::Validation`] for non-terminal target statuses.
    fn finalize_run(&self, run_id: &RunId, status: RunStatus) -> Result<RunRecord, RecorderError>;

    /// Appends one event idempotently.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError::Validation`] or [`RecorderError::Conflict`]
    /// per the validation rules, and [`RecorderError::NotFound`] for unknown
    /// runs.
    fn ingest_event(
        &self,
        run_id: &RunId,
        idempotency_key: &IdempotencyKey,
        event: CanonicalEvent,
    ) -> Result<IngestOutcome, RecorderError>;

    /// Lists runs with filters and cursor pagination.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError`] when persistence fails.
    fn list_runs(&self, query: &RunQuery) -> Result<RunPage, RecorderError>;

    /// Lists a run's events with filters and cursor pagination.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError`] when persistence fails.
    fn list_events(&self, run_id: &RunId, query: &EventQuery)
    -> Result<EventPage, RecorderError>;

    /// Loads a run with per-type event counters.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError::NotFound`] for unknown runs.
    fn run_detail(&self, run_id: &RunId) -> Result<RunDetail, RecorderError>;

    /// Loads every event of a run in `sequence_no` order.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError`] when persistence fails.
    fn load_run_events(&self, run_id: &RunId) -> Result<Vec<EventRecord>, RecorderError>;

    /// Loads a step scoped to a run.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError`] when persistence fails.
    fn get_step(
        &self,
        run_id: &RunId,
        step_id: &StepId,
    ) -> Result<Option<StepRecord>, RecorderError>;

    /// Inserts a step unless one with the same identifier exists.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError`] when persistence fails.
    fn insert_step_if_absent(&self, step: StepRecord) -> Result<(), RecorderError>;

    /// Inserts a replay-derived event without ingestion validation.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError`] when persistence fails.
    fn insert_replay_event(&self, event: EventRecord) -> Result<(), RecorderError>;

    /// Loads artifact metadata by hash.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError`] when persistence fails.
    fn get_artifact(&self, hash: &ArtifactHash) -> Result<Option<ArtifactRecord>, RecorderError>;

    /// Inserts an artifact row, returning the existing row on hash collision.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError`] when persistence fails.
    fn insert_artifact_if_absent(
        &self,
        artifact: ArtifactRecord,
    ) -> Result<ArtifactRecord, RecorderError>;

    /// Creates a replay session with its execution job and audit entry.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError`] when persistence fails.
    fn create_replay_session(
        &self,
        session: ReplaySessionRecord,
        actor: &AuditActor,
    ) -> Result<ReplaySessionRecord, RecorderError>;

    /// Loads a replay session by identifier.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError`] when persistence fails.
    fn get_replay_session(
        &self,
        session_id: &ReplaySessionId,
    ) -> Result<Option<ReplaySessionRecord>, RecorderError>;

    /// Requests cancellation of a replay session.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError::NotFound`] for unknown sessions.
    fn cancel_replay_session(
        &self,
        session_id: &ReplaySessionId,
    ) -> Result<ReplaySessionRecord, RecorderError>;

    /// Transitions a replay session to `running`.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError`] when persistence fails.
    fn mark_replay_running(&self, session_id: &ReplaySessionId) -> Result<(), RecorderError>;

    /// Reads the cancellation flag of a replay session.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError::NotFound`] for unknown sessions.
    fn is_replay_cancel_requested(
        &self,
        session_id: &ReplaySessionId,
    ) -> Result<bool, RecorderError>;

    /// Records a terminal failure on a replay session.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError`] when persistence fails.
    fn fail_replay_session(
        &self,
        session_id: &ReplaySessionId,
        status: ReplayStatus,
        failure_reason_code: &str,
        reason_codes: &[String],
    ) -> Result<ReplaySessionRecord, RecorderError>;

    /// Records a completed replay session with its derived run.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError`] when persistence fails.
    fn complete_replay_session(
        &self,
        session_id: &ReplaySessionId,
        status: ReplayStatus,
        derived_run_id: &RunId,
        reason_codes: &[String],
    ) -> Result<ReplaySessionRecord, RecorderError>;

    /// Enqueues a durable job.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError`] when persistence fails.
    fn enqueue_job(
        &self,
        job_type: &str,
        payload: Map<String, Value>,
    ) -> Result<JobRecord, RecorderError>;

    /// Claims the oldest eligible pending job, marking it running.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError`] when persistence fails.
    fn fetch_next_job(&self, job_type: Option<&str>) -> Result<Option<JobRecord>, RecorderError>;

    /// Marks a claimed job as completed.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError`] when persistence fails.
    fn mark_job_success(&self, job_id: JobId) -> Result<(), RecorderError>;

    /// Records a job failure, rescheduling with backoff or failing
    /// permanently at the retry limit.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError::NotFound`] for unknown jobs.
    fn mark_job_failure(&self, job_id: JobId, error: &str) -> Result<JobRecord, RecorderError>;

    /// Appends an audit log entry.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError`] when persistence fails.
    fn append_audit(&self, entry: AuditLogRecord) -> Result<(), RecorderError>;

    /// Probes the store for readiness.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError::Unavailable`] when the store is unreachable.
    fn ping(&self) -> Result<(), RecorderError>;
}

// ============================================================================
// SECTION: Audit Sink
// ============================================================================

/// Observability audit event emitted for actor-triggered and worker actions.
///
/// # Invariants
/// - `details` payloads never embed raw artifact or payload bytes.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    /// Event identifier label.
    pub event: &'static str,
    /// Event timestamp (milliseconds since epoch).
    pub timestamp_ms: i64,
    /// Target entity kind.
    pub target_type: &'static str,
    /// Target entity identifier.
    pub target_id: String,
    /// Outcome label (`ok` or `error`).
    pub outcome: &'static str,
    /// Structured event details.
    pub details: Value,
}

impl AuditEvent {
    /// Builds an audit event stamped with the current time.
    #[must_use]
    pub fn now(
        event: &'static str,
        target_type: &'static str,
        target_id: impl Into<String>,
        outcome: &'static str,
        details: Value,
    ) -> Self {
        Self {
            event,
            timestamp_ms: UtcTimestamp::now().unix_millis(),
            target_type,
            target_id: target_id.into(),
            outcome,
            details,
        }
    }
}

/// Sink for observability audit events.
pub trait AuditSink: Send + Sync {
    /// Emits one audit event. Emission failures are swallowed; audit output
    /// must never fail the audited operation.
    fn emit(&self, event: &AuditEvent);
}

/// Audit sink that writes JSON lines to stderr.
#[derive(Debug, Default)]
pub struct StderrAuditSink;

impl AuditSink for StderrAuditSink {
    fn emit(&self, event: &AuditEvent) {
        if let Ok(line) = serde_json::to_string(event) {
            let mut stderr = io::stderr().lock();
            let _ = writeln!(stderr, "{line}");
        }
    }
}

/// Audit sink that discards events.
#[derive(Debug, Default)]
pub struct NoopAuditSink;

impl AuditSink for NoopAuditSink {
    fn emit(&self, _event: &AuditEvent) {}
}
