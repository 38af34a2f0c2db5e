// crates/flight-recorder-core/src/core/overrides.rs
// ============================================================================
// Module: Flight Recorder Replay Overrides
// Description: Operator override profile applied during replay.
// Purpose: Direct the replay engine to substitute prompt, model, retriever,
//          or tool outputs.
// Dependencies: crate::core::identifiers, serde, serde_json
// ============================================================================

//! ## Overview
//! An override profile is a declarative document attached to a replay
//! session. Events matched by an override are re-emitted as `simulated`;
//! unmatched call/result events fall back to `cached`, and everything else
//! is reused exactly. Empty profiles are valid and produce no simulation.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;

use crate::core::event::DeterminismMode;
use crate::core::identifiers::StepId;

// ============================================================================
// SECTION: Override Components
// ============================================================================

/// Prompt substitution applied to `prompt_rendered` events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PromptOverride {
    /// Replacement template identifier.
    #[serde(default)]
    pub template_id: Option<String>,
    /// Replacement template version.
    #[serde(default)]
    pub template_version: Option<String>,
    /// Replacement template variables.
    #[serde(default)]
    pub variables: Map<String, Value>,
}

/// Model substitution applied to `model_called`/`model_result` events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ModelOverride {
    /// Replacement provider label.
    #[serde(default)]
    pub provider: Option<String>,
    /// Replacement model identifier.
    #[serde(default)]
    pub model_id: Option<String>,
}

/// Retriever substitution applied to `retrieval_executed` events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RetrieverOverride {
    /// Replacement candidate count.
    #[serde(default)]
    pub top_k: Option<i64>,
    /// Replacement retrieval filters.
    #[serde(default)]
    pub filters: Map<String, Value>,
    /// Replacement embedding profile label.
    #[serde(default)]
    pub embedding_profile: Option<String>,
}

/// Replay preferences declared by the operator.
///
/// # Invariants
/// - Preferences are advisory metadata; classification rules do not read
///   them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayPreferences {
    /// Determinism modes the operator prefers, most preferred first.
    #[serde(default = "default_preferred_modes")]
    pub preferred_modes: Vec<DeterminismMode>,
    /// Fail the session when any event would be simulated.
    #[serde(default)]
    pub fail_on_simulated: bool,
}

impl Default for ReplayPreferences {
    fn default() -> Self {
        Self {
            preferred_modes: default_preferred_modes(),
            fail_on_simulated: false,
        }
    }
}

/// Returns the default preferred determinism modes.
fn default_preferred_modes() -> Vec<DeterminismMode> {
    vec![DeterminismMode::Exact, DeterminismMode::Cached, DeterminismMode::Simulated]
}

// ============================================================================
// SECTION: Override Profile
// ============================================================================

/// Declarative override document for one replay session.
///
/// # Invariants
/// - `tool_simulation_overrides` is keyed by *source* step identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ReplayOverrideProfile {
    /// Prompt substitution, when present.
    #[serde(default)]
    pub prompt_override: Option<PromptOverride>,
    /// Model substitution, when present.
    #[serde(default)]
    pub model_override: Option<ModelOverride>,
    /// Retriever substitution, when present.
    #[serde(default)]
    pub retriever_override: Option<RetrieverOverride>,
    /// Replacement `result_ref` payloads per source tool step.
    #[serde(default)]
    pub tool_simulation_overrides: BTreeMap<StepId, Map<String, Value>>,
}

impl ReplayOverrideProfile {
    /// Returns true when the profile declares no substitutions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.prompt_override.is_none()
            && self.model_override.is_none()
            && self.retriever_override.is_none()
            && self.tool_simulation_overrides.is_empty()
    }
}
