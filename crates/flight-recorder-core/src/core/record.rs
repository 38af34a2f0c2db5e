// crates/flight-recorder-core/src/core/record.rs
// ============================================================================
// Module: Flight Recorder Persistent Records
// Description: Run, step, event, artifact, replay session, job, and audit
//              rows.
// Purpose: Capture the durable state of recorded and replayed executions.
// Dependencies: crate::core::{event, identifiers, overrides, time}, serde
// ============================================================================

//! ## Overview
//! Records mirror the durable tables one-to-one. Events are immutable after
//! insert; runs and steps mutate only through ingestion and finalize; replay
//! sessions transition once to a terminal status. Stores are responsible for
//! mapping these records onto their backing schema.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;

use crate::core::event::ActorType;
use crate::core::event::DeterminismMode;
use crate::core::event::EventType;
use crate::core::event::RedactionStatus;
use crate::core::identifiers::ArtifactHash;
use crate::core::identifiers::AuditId;
use crate::core::identifiers::EventId;
use crate::core::identifiers::IdempotencyKey;
use crate::core::identifiers::JobId;
use crate::core::identifiers::ReplaySessionId;
use crate::core::identifiers::RunId;
use crate::core::identifiers::StepId;
use crate::core::identifiers::TraceId;
use crate::core::overrides::ReplayOverrideProfile;
use crate::core::time::UtcTimestamp;

// ============================================================================
// SECTION: Defaults
// ============================================================================

/// Default retention class for new runs and artifacts.
pub const DEFAULT_RETENTION_CLASS: &str = "dev_short";

/// Default maximum retry count for queued jobs.
pub const DEFAULT_JOB_MAX_RETRIES: i64 = 5;

// ============================================================================
// SECTION: Run Records
// ============================================================================

/// Run lifecycle status.
///
/// # Invariants
/// - Transitions only `running -> {success, failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Run is open and accepting events.
    Running,
    /// Run completed successfully; terminal.
    Success,
    /// Run failed; terminal.
    Failed,
}

impl RunStatus {
    /// Returns the stable wire label for the run status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }

    /// Parses a wire label into a run status.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "running" => Some(Self::Running),
            "success" => Some(Self::Success),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Returns true when the status is terminal.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }
}

/// Provenance of a run.
///
/// # Invariants
/// - `Replay` runs always carry a `source_run_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    /// Captured from a live application.
    #[default]
    Live,
    /// Derived from a recorded run by the replay engine.
    Replay,
}

impl SourceType {
    /// Returns the stable wire label for the source type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Live => "live",
            Self::Replay => "replay",
        }
    }

    /// Parses a wire label into a source type.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "live" => Some(Self::Live),
            "replay" => Some(Self::Replay),
            _ => None,
        }
    }
}

/// Inputs for creating a run.
///
/// # Invariants
/// - `source_run_id` is set iff `source_type` is [`SourceType::Replay`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRun {
    /// Application identifier tag.
    pub app_id: String,
    /// Deployment environment tag.
    pub environment: String,
    /// Provenance of the run.
    #[serde(default)]
    pub source_type: SourceType,
    /// Source run for replay-derived runs.
    #[serde(default)]
    pub source_run_id: Option<RunId>,
    /// Free-form tags.
    #[serde(default)]
    pub tags: Map<String, Value>,
    /// Retention class label.
    #[serde(default = "default_retention_class")]
    pub retention_class: String,
}

/// Returns the default retention class.
fn default_retention_class() -> String {
    DEFAULT_RETENTION_CLASS.to_string()
}

/// One recorded execution.
///
/// # Invariants
/// - `ended_at` is set iff `status` is terminal.
/// - Never deleted by the core; retention is an external concern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    /// Run identifier.
    pub run_id: RunId,
    /// Trace identifier.
    pub trace_id: TraceId,
    /// Application identifier tag.
    pub app_id: String,
    /// Deployment environment tag.
    pub environment: String,
    /// Lifecycle status.
    pub status: RunStatus,
    /// Provenance of the run.
    pub source_type: SourceType,
    /// Source run for replay-derived runs.
    pub source_run_id: Option<RunId>,
    /// Free-form tags.
    pub tags: Map<String, Value>,
    /// Retention class label.
    pub retention_class: String,
    /// Legal hold flag; holds exclude the run from retention sweeps.
    pub legal_hold: bool,
    /// Run start timestamp.
    pub started_at: UtcTimestamp,
    /// Run end timestamp; set on terminal transition.
    pub ended_at: Option<UtcTimestamp>,
}

// ============================================================================
// SECTION: Step Records
// ============================================================================

/// Logical scope within a run.
///
/// # Invariants
/// - `(run_id, sequence_no)` is unique; `sequence_no` is the minimum event
///   sequence seen for the step.
/// - `parent_step_id`, when set, references a step in the same run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    /// Step identifier (globally unique).
    pub step_id: StepId,
    /// Run the step belongs to.
    pub run_id: RunId,
    /// Optional parent step.
    pub parent_step_id: Option<StepId>,
    /// Minimum event sequence observed for this step.
    pub sequence_no: i64,
    /// Event type that opened the step.
    pub step_type: EventType,
    /// Determinism mode of the latest event in the step.
    pub determinism_mode: DeterminismMode,
    /// Timestamp of the first event in the step.
    pub started_at: UtcTimestamp,
    /// Timestamp of the latest event in the step.
    pub ended_at: Option<UtcTimestamp>,
}

// ============================================================================
// SECTION: Event Records
// ============================================================================

/// The atomic append.
///
/// # Invariants
/// - Immutable after insert, except `artifact_pending`, which ingestion
///   resolves within the same transaction that creates the row.
/// - `(run_id, sequence_no)` is strictly increasing in insertion order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Event identifier.
    pub event_id: EventId,
    /// Run the event belongs to.
    pub run_id: RunId,
    /// Step the event belongs to.
    pub step_id: StepId,
    /// Optional parent step.
    pub parent_step_id: Option<StepId>,
    /// Validated event type.
    pub event_type: EventType,
    /// Payload schema version.
    pub schema_version: String,
    /// Structured event payload.
    pub payload: Map<String, Value>,
    /// Redaction outcome for the payload.
    pub redaction_status: RedactionStatus,
    /// Idempotency key; globally unique.
    pub idempotency_key: IdempotencyKey,
    /// Per-run monotonic sequence number.
    pub sequence_no: i64,
    /// Event timestamp supplied by the producer.
    pub timestamp: UtcTimestamp,
    /// Actor that produced the event.
    pub actor_type: ActorType,
    /// Determinism mode of the event.
    pub determinism_mode: DeterminismMode,
    /// True when a referenced artifact has not been uploaded yet.
    pub artifact_pending: bool,
    /// Row creation timestamp.
    pub created_at: UtcTimestamp,
}

// ============================================================================
// SECTION: Artifact Records
// ============================================================================

/// Artifact lifecycle status.
///
/// # Invariants
/// - Once `Ready` or `Blocked`, the bytes in object storage are immutable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactStatus {
    /// Registered without bytes; upload outstanding.
    Pending,
    /// Bytes persisted and readable.
    Ready,
    /// Bytes persisted but a field policy blocked content.
    Blocked,
    /// Redaction failed; bytes were not persisted.
    Failed,
}

impl ArtifactStatus {
    /// Returns the stable wire label for the artifact status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::Blocked => "blocked",
            Self::Failed => "failed",
        }
    }

    /// Parses a wire label into an artifact status.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "pending" => Some(Self::Pending),
            "ready" => Some(Self::Ready),
            "blocked" => Some(Self::Blocked),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Content-addressed blob metadata.
///
/// # Invariants
/// - `artifact_hash` is unique; `storage_object_key` is derived from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    /// Content hash; primary identity.
    pub artifact_hash: ArtifactHash,
    /// Artifact kind label.
    pub artifact_type: String,
    /// Size of the stored content in bytes.
    pub byte_size: i64,
    /// MIME type of the content.
    pub mime_type: String,
    /// Content encoding label.
    pub content_encoding: String,
    /// Redaction profile applied to the content.
    pub redaction_profile: String,
    /// Storage bucket holding the bytes.
    pub storage_bucket: String,
    /// Deterministic object key (`hash[0:2]/hash`).
    pub storage_object_key: String,
    /// Retention class label.
    pub retention_class: String,
    /// Lifecycle status.
    pub status: ArtifactStatus,
    /// Hash algorithm label (`sha256`).
    pub hash_algorithm: String,
    /// Reason content was blocked or redaction failed.
    pub blocked_reason: Option<String>,
    /// Row creation timestamp.
    pub created_at: UtcTimestamp,
}

/// Many-to-many link between events and artifacts.
///
/// # Invariants
/// - `(event_id, artifact_hash, reference_role)` is unique.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventArtifactRecord {
    /// Linked event.
    pub event_id: EventId,
    /// Linked artifact.
    pub artifact_hash: ArtifactHash,
    /// Role the artifact plays for the event (e.g. `model_request`).
    pub reference_role: String,
}

// ============================================================================
// SECTION: Replay Session Records
// ============================================================================

/// Replay session lifecycle status.
///
/// # Invariants
/// - Transitions once from `pending`/`running` to a terminal value.
/// - `CompletedCached` is representable but never derived; cached-only
///   sessions map to `CompletedMixed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplayStatus {
    /// Created, waiting for a worker.
    Pending,
    /// Claimed by a worker and executing.
    Running,
    /// Every derived event reused source output exactly.
    CompletedExact,
    /// Reserved cached-only completion value.
    CompletedCached,
    /// Every derived event was operator-simulated.
    CompletedSimulated,
    /// Derived events mixed determinism modes.
    CompletedMixed,
    /// Preflight validation failed.
    FailedValidation,
    /// Execution failed or was cancelled.
    FailedExecution,
}

impl ReplayStatus {
    /// Returns the stable wire label for the replay status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::CompletedExact => "completed_exact",
            Self::CompletedCached => "completed_cached",
            Self::CompletedSimulated => "completed_simulated",
            Self::CompletedMixed => "completed_mixed",
            Self::FailedValidation => "failed_validation",
            Self::FailedExecution => "failed_execution",
        }
    }

    /// Parses a wire label into a replay status.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "completed_exact" => Some(Self::CompletedExact),
            "completed_cached" => Some(Self::CompletedCached),
            "completed_simulated" => Some(Self::CompletedSimulated),
            "completed_mixed" => Some(Self::CompletedMixed),
            "failed_validation" => Some(Self::FailedValidation),
            "failed_execution" => Some(Self::FailedExecution),
            _ => None,
        }
    }

    /// Returns true when the session can still be executed.
    #[must_use]
    pub const fn is_executable(self) -> bool {
        matches!(self, Self::Pending | Self::Running)
    }

    /// Returns true for any `completed_*` value.
    #[must_use]
    pub const fn is_completed(self) -> bool {
        matches!(
            self,
            Self::CompletedExact
                | Self::CompletedCached
                | Self::CompletedSimulated
                | Self::CompletedMixed
        )
    }
}

/// One replay request and its outcome.
///
/// # Invariants
/// - `derived_run_id` is set iff `status` is a `completed_*` value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplaySessionRecord {
    /// Session identifier.
    pub replay_session_id: ReplaySessionId,
    /// Run being replayed.
    pub source_run_id: RunId,
    /// Step at which replay diverges; earlier events are reused exactly.
    pub fork_step_id: Option<StepId>,
    /// Operator override profile.
    pub override_profile: ReplayOverrideProfile,
    /// Lifecycle status.
    pub status: ReplayStatus,
    /// Derived run produced on completion.
    pub derived_run_id: Option<RunId>,
    /// Failure reason recorded on validation or execution failure.
    pub failure_reason_code: Option<String>,
    /// Sorted, de-duplicated per-event reason codes.
    pub reason_codes: Vec<String>,
    /// Operator cancellation flag.
    pub cancel_requested: bool,
    /// Session creation timestamp.
    pub started_at: UtcTimestamp,
    /// Session end timestamp; set on terminal transition.
    pub ended_at: Option<UtcTimestamp>,
}

// ============================================================================
// SECTION: Job Records
// ============================================================================

/// Durable job queue status.
///
/// # Invariants
/// - `pending -> running` transitions are atomic; at most one worker
///   observes a given claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Eligible for claiming once `available_at` passes.
    Pending,
    /// Claimed by a worker.
    Running,
    /// Finished successfully.
    Completed,
    /// Exhausted its retries.
    Failed,
}

impl JobStatus {
    /// Returns the stable wire label for the job status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Parses a wire label into a job status.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Durable queue row.
///
/// # Invariants
/// - Retry backoff grows as `2^min(retries, 6)` seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    /// Auto-increment row identifier.
    pub job_id: JobId,
    /// Job type label dispatched by workers.
    pub job_type: String,
    /// Structured job payload.
    pub payload: Map<String, Value>,
    /// Queue status.
    pub status: JobStatus,
    /// Failed attempt count.
    pub retries: i64,
    /// Maximum attempts before the job fails permanently.
    pub max_retries: i64,
    /// Message from the most recent failure.
    pub last_error: Option<String>,
    /// Earliest time the job may be claimed.
    pub available_at: UtcTimestamp,
    /// Row creation timestamp.
    pub created_at: UtcTimestamp,
    /// Last mutation timestamp.
    pub updated_at: UtcTimestamp,
}

// ============================================================================
// SECTION: Audit Records
// ============================================================================

/// Append-only record of an actor-triggered action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditLogRecord {
    /// Audit entry identifier.
    pub audit_id: AuditId,
    /// Actor that performed the action.
    pub actor_id: String,
    /// Actor classification label (e.g. `token`, `local`, `service`).
    pub actor_type: String,
    /// Action label (e.g. `replay_created`).
    pub action: String,
    /// Target entity kind.
    pub target_type: String,
    /// Target entity identifier.
    pub target_id: String,
    /// Action timestamp.
    pub timestamp: UtcTimestamp,
    /// Structured action details.
    pub details: Map<String, Value>,
}
