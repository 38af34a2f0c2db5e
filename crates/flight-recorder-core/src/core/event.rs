// crates/flight-recorder-core/src/core/event.rs
// ============================================================================
// Module: Flight Recorder Event Catalog
// Description: Canonical event types, payload requirements, and submission
//              records.
// Purpose: Define the authoritative event vocabulary and the append payload
//          accepted by ingestion.
// Dependencies: crate::core::{identifiers, time}, serde, serde_json
// ============================================================================

//! ## Overview
//! Every append carries a [`CanonicalEvent`]: a structured record with fixed
//! fields and a typed, per-event-type payload contract. The catalog here is
//! authoritative; ingestion rejects event types outside it and payloads
//! missing required fields. Submissions keep `event_type` as its raw wire
//! string so unknown types surface as validation errors rather than decode
//! failures; validated rows carry the typed [`EventType`].

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;

use crate::core::identifiers::ArtifactHash;
use crate::core::identifiers::RunId;
use crate::core::identifiers::StepId;
use crate::core::identifiers::TraceId;
use crate::core::time::UtcTimestamp;

// ============================================================================
// SECTION: Event Types
// ============================================================================

/// Canonical event types accepted by ingestion.
///
/// # Invariants
/// - Variants are stable for serialization and contract matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// Run lifecycle opened; must be the first event of every run.
    RunStarted,
    /// External input captured for the run.
    InputReceived,
    /// Prompt template rendered into a concrete prompt.
    PromptRendered,
    /// Retrieval query executed against a retriever.
    RetrievalExecuted,
    /// Tool invocation issued.
    ToolCalled,
    /// Tool invocation result observed.
    ToolResult,
    /// Model invocation issued.
    ModelCalled,
    /// Model invocation result observed.
    ModelResult,
    /// Validator verdict recorded.
    ValidatorDecision,
    /// Safety policy verdict recorded.
    SafetyDecision,
    /// Final output delivered to the caller.
    FinalOutput,
    /// Run finished successfully; terminal.
    RunCompleted,
    /// Run finished with a failure; terminal.
    RunFailed,
}

/// All canonical event types in declaration order.
pub const EVENT_TYPES: &[EventType] = &[
    EventType::RunStarted,
    EventType::InputReceived,
    EventType::PromptRendered,
    EventType::RetrievalExecuted,
    EventType::ToolCalled,
    EventType::ToolResult,
    EventType::ModelCalled,
    EventType::ModelResult,
    EventType::ValidatorDecision,
    EventType::SafetyDecision,
    EventType::FinalOutput,
    EventType::RunCompleted,
    EventType::RunFailed,
];

impl EventType {
    /// Returns the stable wire label for the event type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RunStarted => "run_started",
            Self::InputReceived => "input_received",
            Self::PromptRendered => "prompt_rendered",
            Self::RetrievalExecuted => "retrieval_executed",
            Self::ToolCalled => "tool_called",
            Self::ToolResult => "tool_result",
            Self::ModelCalled => "model_called",
            Self::ModelResult => "model_result",
            Self::ValidatorDecision => "validator_decision",
            Self::SafetyDecision => "safety_decision",
            Self::FinalOutput => "final_output",
            Self::RunCompleted => "run_completed",
            Self::RunFailed => "run_failed",
        }
    }

    /// Parses a wire label into an event type.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        EVENT_TYPES.iter().copied().find(|event_type| event_type.as_str() == label)
    }

    /// Returns the payload fields required for this event type.
    #[must_use]
    pub const fn required_payload_fields(self) -> &'static [&'static str] {
        match self {
            Self::RunStarted => &["app_id", "environment", "entrypoint_name"],
            Self::InputReceived => &["input_channels", "input_hash", "input_policy_labels"],
            Self::PromptRendered => &[
                "prompt_template_id",
                "prompt_template_version",
                "prompt_variables_ref",
                "rendered_prompt_ref",
            ],
            Self::RetrievalExecuted => &[
                "retriever_id",
                "retriever_version",
                "query_text_ref",
                "top_k",
                "filters",
                "candidate_count",
                "candidate_list_ref",
            ],
            Self::ToolCalled => {
                &["tool_name", "tool_version", "call_signature_hash", "args_ref", "timeout_ms"]
            }
            Self::ToolResult => &["tool_name", "status", "result_ref", "latency_ms"],
            Self::ModelCalled => &[
                "provider",
                "model_id",
                "model_api_version",
                "temperature",
                "top_p",
                "max_tokens",
                "request_ref",
            ],
            Self::ModelResult => &[
                "provider",
                "model_id",
                "finish_reason",
                "token_usage",
                "response_ref",
                "latency_ms",
            ],
            Self::ValidatorDecision => {
                &["validator_name", "validator_version", "decision", "reason_ref"]
            }
            Self::SafetyDecision => &["policy_name", "policy_version", "decision", "reason_ref"],
            Self::FinalOutput => &["output_ref", "response_channel"],
            Self::RunCompleted => &["status", "total_steps", "total_latency_ms"],
            Self::RunFailed => &["status", "failed_step_id", "error_class", "error_message_ref"],
        }
    }

    /// Returns true when the event terminates its run.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::RunCompleted | Self::RunFailed)
    }

    /// Returns the call event that must causally precede this event within
    /// the same step, when one is required.
    #[must_use]
    pub const fn required_precedent(self) -> Option<Self> {
        match self {
            Self::ToolResult => Some(Self::ToolCalled),
            Self::ModelResult => Some(Self::ModelCalled),
            _ => None,
        }
    }
}

// ============================================================================
// SECTION: Event Attribute Enums
// ============================================================================

/// Actor that produced an event.
///
/// # Invariants
/// - Variants are stable for serialization and contract matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ActorType {
    /// Instrumented application SDK.
    #[default]
    Sdk,
    /// Recorder backend itself.
    Backend,
    /// Replay engine emitting derived events.
    ReplayEngine,
}

impl ActorType {
    /// Returns the stable wire label for the actor type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sdk => "sdk",
            Self::Backend => "backend",
            Self::ReplayEngine => "replay_engine",
        }
    }

    /// Parses a wire label into an actor type.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "sdk" => Some(Self::Sdk),
            "backend" => Some(Self::Backend),
            "replay_engine" => Some(Self::ReplayEngine),
            _ => None,
        }
    }
}

/// Faithfulness class of an event relative to its origin.
///
/// # Invariants
/// - Variants are stable for serialization and contract matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeterminismMode {
    /// Originally captured from a live run.
    #[default]
    Live,
    /// Byte-identical reuse of the source output.
    Exact,
    /// Reconstructed from prior artifacts under signature match.
    Cached,
    /// Modified by an operator override.
    Simulated,
}

impl DeterminismMode {
    /// Returns the stable wire label for the determinism mode.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Live => "live",
            Self::Exact => "exact",
            Self::Cached => "cached",
            Self::Simulated => "simulated",
        }
    }

    /// Parses a wire label into a determinism mode.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "live" => Some(Self::Live),
            "exact" => Some(Self::Exact),
            "cached" => Some(Self::Cached),
            "simulated" => Some(Self::Simulated),
            _ => None,
        }
    }
}

/// Redaction outcome attached to events and artifacts.
///
/// # Invariants
/// - Variants are stable for serialization and contract matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RedactionStatus {
    /// No sensitive content was found.
    #[default]
    NotRequired,
    /// Sensitive content was masked or hashed.
    Redacted,
    /// A field policy blocked content from persistence.
    Blocked,
    /// The redaction pipeline itself failed.
    Failed,
}

impl RedactionStatus {
    /// Returns the stable wire label for the redaction status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotRequired => "not_required",
            Self::Redacted => "redacted",
            Self::Blocked => "blocked",
            Self::Failed => "failed",
        }
    }

    /// Parses a wire label into a redaction status.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "not_required" => Some(Self::NotRequired),
            "redacted" => Some(Self::Redacted),
            "blocked" => Some(Self::Blocked),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

// ============================================================================
// SECTION: Artifact References
// ============================================================================

/// Artifact reference attached to an event submission.
///
/// # Invariants
/// - `artifact_hash` may refer to an artifact that is not yet uploaded;
///   ingestion records a pending placeholder in that case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRefSpec {
    /// Content hash of the referenced artifact.
    pub artifact_hash: ArtifactHash,
    /// Artifact kind; doubles as the link's reference role.
    pub artifact_type: String,
    /// Size of the referenced content in bytes.
    pub byte_size: i64,
    /// Content encoding label.
    #[serde(default = "default_content_encoding")]
    pub content_encoding: String,
    /// MIME type of the referenced content.
    #[serde(default = "default_mime_type")]
    pub mime_type: String,
    /// Redaction profile applied to the content.
    #[serde(default = "default_redaction_profile")]
    pub redaction_profile: String,
}

/// Returns the default content encoding for artifact references.
fn default_content_encoding() -> String {
    "identity".to_string()
}

/// Returns the default MIME type for artifact references.
fn default_mime_type() -> String {
    "application/octet-stream".to_string()
}

/// Returns the default redaction profile for artifact references.
fn default_redaction_profile() -> String {
    "default".to_string()
}

// ============================================================================
// SECTION: Canonical Event
// ============================================================================

/// Canonical event submission accepted by ingestion.
///
/// # Invariants
/// - `event_type` is the raw wire string; membership in the catalog is a
///   validation concern, not a decode concern.
/// - `sequence_no` is non-negative after validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalEvent {
    /// Payload schema version (semver string).
    #[serde(default = "default_schema_version")]
    pub schema_version: String,
    /// Trace identifier correlating with external tracing.
    pub trace_id: TraceId,
    /// Run the event belongs to.
    pub run_id: RunId,
    /// Step the event belongs to; created implicitly on first reference.
    pub step_id: StepId,
    /// Optional parent step for nested scopes.
    #[serde(default)]
    pub parent_step_id: Option<StepId>,
    /// Per-run monotonic sequence number.
    pub sequence_no: i64,
    /// Raw event type label.
    pub event_type: String,
    /// Event timestamp supplied by the producer.
    pub timestamp: UtcTimestamp,
    /// Actor that produced the event.
    #[serde(default)]
    pub actor_type: ActorType,
    /// Determinism mode of the event.
    #[serde(default)]
    pub determinism_mode: DeterminismMode,
    /// Artifact references attached to the event.
    #[serde(default)]
    pub artifact_refs: Vec<ArtifactRefSpec>,
    /// Redaction outcome already applied to the payload.
    #[serde(default)]
    pub redaction_status: RedactionStatus,
    /// Structured event payload.
    #[serde(default)]
    pub payload: Map<String, Value>,
}

/// Returns the default payload schema version.
fn default_schema_version() -> String {
    "1.0.0".to_string()
}
