// crates/flight-recorder-core/src/core/mod.rs
// ============================================================================
// Module: Flight Recorder Core Types
// Description: Canonical event, record, redaction, and override structures.
// Purpose: Provide stable, serializable types for the recorder's canonical
//          event stream and durable state.
// Dependencies: regex, serde, serde_jcs, sha2, time, uuid
// ============================================================================

//! ## Overview
//! Core types define the canonical event catalog, the durable records for
//! runs, steps, events, artifacts, replay sessions, jobs, and audit entries,
//! and the deterministic building blocks (hashing, redaction, validation)
//! shared by every backend. These types are the canonical source of truth
//! for any derived API surfaces (HTTP or SDKs).

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod event;
pub mod hashing;
pub mod identifiers;
pub mod overrides;
pub mod record;
pub mod redaction;
pub mod time;
pub mod validation;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use event::ActorType;
pub use event::ArtifactRefSpec;
pub use event::CanonicalEvent;
pub use event::DeterminismMode;
pub use event::EVENT_TYPES;
pub use event::EventType;
pub use event::RedactionStatus;
pub use hashing::DEFAULT_HASH_ALGORITHM;
pub use hashing::HashAlgorithm;
pub use hashing::HashDigest;
pub use identifiers::ArtifactHash;
pub use identifiers::AuditId;
pub use identifiers::EventId;
pub use identifiers::IdempotencyKey;
pub use identifiers::JobId;
pub use identifiers::ReplaySessionId;
pub use identifiers::RunId;
pub use identifiers::StepId;
pub use identifiers::TraceId;
pub use overrides::ModelOverride;
pub use overrides::PromptOverride;
pub use overrides::ReplayOverrideProfile;
pub use overrides::ReplayPreferences;
pub use overrides::RetrieverOverride;
pub use record::ArtifactRecord;
pub use record::ArtifactStatus;
pub use record::AuditLogRecord;
pub use record::DEFAULT_JOB_MAX_RETRIES;
pub use record::DEFAULT_RETENTION_CLASS;
pub use record::EventArtifactRecord;
pub use record::EventRecord;
pub use record::JobRecord;
pub use record::JobStatus;
pub use record::NewRun;
pub use record::ReplaySessionRecord;
pub use record::ReplayStatus;
pub use record::RunRecord;
pub use record::RunStatus;
pub use record::SourceType;
pub use record::StepRecord;
pub use redaction::FieldPolicy;
pub use redaction::RedactionDecision;
pub use redaction::RedactionEngine;
pub use redaction::RedactionEngineError;
pub use redaction::RedactionOutcome;
pub use time::TimestampError;
pub use time::UtcTimestamp;
pub use validation::RunLedgerView;
pub use validation::SCHEMA_VERSION_WARNING;
pub use validation::ValidatedEvent;
pub use validation::validate_event;
