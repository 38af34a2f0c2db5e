// crates/flight-recorder-core/src/core/validation.rs
// ============================================================================
// Module: Flight Recorder Event Validation
// Description: Pure validation of event submissions against a run ledger
//              snapshot.
// Purpose: Enforce catalog membership, payload requirements, monotonic
//          sequencing, terminal-state rules, and causal preconditions.
// Dependencies: crate::core::{event, record}, crate::interfaces, serde_json
// ============================================================================

//! ## Overview
//! Validation is deterministic and performs no I/O. Stores gather a
//! [`RunLedgerView`] inside the ingest transaction and pass it here, so the
//! checks hold under concurrent writers exactly when the store serializes
//! ingestion per run. Checks run in a fixed order; the first failure aborts.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde_json::json;

use crate::core::event::CanonicalEvent;
use crate::core::event::EventType;
use crate::core::record::RunRecord;
use crate::interfaces::RecorderError;

// ============================================================================
// SECTION: Supported Schema Majors
// ============================================================================

/// Schema version majors accepted without a warning.
const SUPPORTED_SCHEMA_MAJORS: &[&str] = &["0", "1"];

/// Warning appended when the schema version major is unsupported.
pub const SCHEMA_VERSION_WARNING: &str = "schema_version_outside_supported_major";

// ============================================================================
// SECTION: Ledger View
// ============================================================================

/// Snapshot of a run's event ledger used by validation.
///
/// # Invariants
/// - Gathered inside the same transaction that inserts the event, so the
///   snapshot cannot go stale before the insert commits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunLedgerView {
    /// Maximum `sequence_no` currently recorded for the run.
    pub max_sequence_no: Option<i64>,
    /// True when the run already holds a terminal event.
    pub has_terminal_event: bool,
    /// True when a matching call event precedes the submission in the same
    /// step; stores set this to true for events without a required
    /// precedent.
    pub causal_precedent_present: bool,
}

impl RunLedgerView {
    /// Returns the view of an empty run.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            max_sequence_no: None,
            has_terminal_event: false,
            causal_precedent_present: true,
        }
    }
}

// ============================================================================
// SECTION: Outcome
// ============================================================================

/// Successful validation outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedEvent {
    /// Parsed event type.
    pub event_type: EventType,
    /// Non-fatal warnings to surface to the caller.
    pub warnings: Vec<String>,
}

// ============================================================================
// SECTION: Validation
// ============================================================================

/// Validates an event submission against the run and its ledger snapshot.
///
/// Check order: catalog membership, required payload fields, route match,
/// non-negative sequence, first-event / monotonic-sequence / terminal rules,
/// causal precedent, schema-version warning.
///
/// # Errors
///
/// Returns [`RecorderError::Validation`] or [`RecorderError::Conflict`] for
/// the first failed check.
pub fn validate_event(
    run: &RunRecord,
    event: &CanonicalEvent,
    ledger: &RunLedgerView,
) -> Result<ValidatedEvent, RecorderError> {
    let Some(event_type) = EventType::parse(&event.event_type) else {
        return Err(RecorderError::validation(
            format!("Unsupported event_type '{}'", event.event_type),
            json!({ "event_type": event.event_type }),
        ));
    };

    let mut missing: Vec<&str> = event_type
        .required_payload_fields()
        .iter()
        .copied()
        .filter(|field| !event.payload.contains_key(*field))
        .collect();
    if !missing.is_empty() {
        missing.sort_unstable();
        return Err(RecorderError::validation(
            "Missing required payload fields",
            json!({ "missing_fields": missing, "event_type": event_type.as_str() }),
        ));
    }

    if event.run_id != run.run_id {
        return Err(RecorderError::validation(
            "Event run_id does not match route run_id",
            json!({
                "event_run_id": event.run_id.as_str(),
                "route_run_id": run.run_id.as_str(),
            }),
        ));
    }

    if event.sequence_no < 0 {
        return Err(RecorderError::validation(
            "Event sequence_no must be non-negative",
            json!({ "sequence_no": event.sequence_no }),
        ));
    }

    match ledger.max_sequence_no {
        None => {
            if event_type != EventType::RunStarted {
                return Err(RecorderError::validation(
                    "First event in run must be run_started",
                    json!({ "event_type": event_type.as_str() }),
                ));
            }
        }
        Some(max_sequence) => {
            if event.sequence_no <= max_sequence {
                return Err(RecorderError::conflict(
                    "Event sequence_no must be monotonic and unique",
                    json!({
                        "max_sequence_no": max_sequence,
                        "received": event.sequence_no,
                    }),
                ));
            }
            if ledger.has_terminal_event {
                return Err(RecorderError::conflict(
                    "Run already has terminal event",
                    json!({ "run_id": run.run_id.as_str() }),
                ));
            }
        }
    }

    if let Some(precedent) = event_type.required_precedent()
        && !ledger.causal_precedent_present
    {
        return Err(RecorderError::validation(
            format!(
                "{} requires prior {} in the same step",
                event_type.as_str(),
                precedent.as_str()
            ),
            json!({ "step_id": event.step_id.as_str() }),
        ));
    }

    let mut warnings = Vec::new();
    let major = event.schema_version.split('.').next().unwrap_or("");
    if !SUPPORTED_SCHEMA_MAJORS.contains(&major) {
        warnings.push(SCHEMA_VERSION_WARNING.to_string());
    }

    Ok(ValidatedEvent {
        event_type,
        warnings,
    })
}
