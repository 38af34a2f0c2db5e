// crates/flight-recorder-core/src/core/redaction.rs
// ============================================================================
// Module: Flight Recorder Redaction Engine
// Description: Structural and text redaction of artifact payloads.
// Purpose: Transform payload bytes through field policies and text patterns
//          and classify the outcome.
// Dependencies: crate::core::{event, hashing}, regex, serde, serde_json
// ============================================================================

//! ## Overview
//! Redaction runs before hashing, so artifact identity is the hash of the
//! post-redaction bytes. JSON payloads are walked structurally: field
//! policies (`drop`, `hash_only`, `raw_allowed`) and the engine's
//! denylist/allowlist resolve per key, string values pass through the text
//! patterns, and containers recurse. Non-JSON payloads get the text patterns
//! over the whole decoded string. Any pipeline failure classifies as
//! `failed` and returns the original bytes unchanged.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::collections::BTreeSet;

use regex::Regex;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;
use thiserror::Error;

use crate::core::event::RedactionStatus;
use crate::core::hashing::DEFAULT_HASH_ALGORITHM;
use crate::core::hashing::HashError;
use crate::core::hashing::hash_canonical_json;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Email address pattern.
const EMAIL_PATTERN: &str = r"\b[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}\b";
/// US social security number pattern (`ddd-dd-dddd`).
const SSN_PATTERN: &str = r"\b\d{3}-\d{2}-\d{4}\b";
/// North-American phone pattern with optional `+1` and parenthesized area
/// code.
const PHONE_PATTERN: &str = r"\b(?:\+1[-. ]?)?\(?\d{3}\)?[-. ]?\d{3}[-. ]?\d{4}\b";
/// Secret assignment pattern (`api_key`/`secret`/`token`/`password` with
/// `:` or `=`).
const SECRET_PATTERN: &str = r"(?i)\b(api[_-]?key|secret|token|password)\s*[:=]\s*[^\s,;]+";

/// Blocked-field classification reason.
pub const POLICY_BLOCKED_REASON: &str = "policy_blocked_field";

/// Content type that triggers the structural JSON walk.
pub const JSON_CONTENT_TYPE: &str = "application/json";

// ============================================================================
// SECTION: Policies and Decisions
// ============================================================================

/// Per-field redaction policy supplied by callers.
///
/// # Invariants
/// - Variants are stable for serialization and contract matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldPolicy {
    /// Omit the field entirely.
    Drop,
    /// Replace the value with the hash of its canonical JSON.
    HashOnly,
    /// Keep the value; text patterns still apply to strings.
    RawAllowed,
}

/// Per-field decision recorded while walking a JSON payload.
///
/// # Invariants
/// - Variants are stable for serialization and contract matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RedactionDecision {
    /// Field was dropped by policy.
    Blocked,
    /// Field value was replaced by its hash.
    HashOnly,
    /// Field value was masked by a text pattern.
    Redacted,
}

// ============================================================================
// SECTION: Outcome
// ============================================================================

/// Result of one redaction pass.
///
/// # Invariants
/// - `status == Failed` implies `redacted_bytes` are the original bytes and
///   `blocked_reason` describes the failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedactionOutcome {
    /// Payload bytes after redaction.
    pub redacted_bytes: Vec<u8>,
    /// Outcome classification.
    pub status: RedactionStatus,
    /// Per-field decisions from the JSON walk (empty for non-JSON input).
    pub decisions: BTreeMap<String, RedactionDecision>,
    /// Block or failure reason, when present.
    pub blocked_reason: Option<String>,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Redaction engine construction errors.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error)]
pub enum RedactionEngineError {
    /// A text pattern failed to compile.
    #[error("invalid redaction pattern: {0}")]
    InvalidPattern(String),
}

// ============================================================================
// SECTION: Engine
// ============================================================================

/// Redaction engine with compiled text patterns and static field lists.
///
/// # Invariants
/// - Patterns apply in declaration order; replacements are literal.
/// - The denylist forces `drop`; the allowlist only fills in `raw_allowed`
///   when no explicit policy is present.
#[derive(Debug)]
pub struct RedactionEngine {
    /// Keys always dropped regardless of caller policy.
    denylist: BTreeSet<String>,
    /// Keys defaulted to `raw_allowed` when no policy is supplied.
    allowlist: BTreeSet<String>,
    /// Compiled text patterns with their literal replacements.
    patterns: Vec<(Regex, &'static str)>,
}

impl RedactionEngine {
    /// Builds an engine with empty field lists.
    ///
    /// # Errors
    ///
    /// Returns [`RedactionEngineError`] when a built-in pattern fails to
    /// compile.
    pub fn new() -> Result<Self, RedactionEngineError> {
        Self::with_field_lists(BTreeSet::new(), BTreeSet::new())
    }

    /// Builds an engine with explicit denylist and allowlist field names.
    ///
    /// # Errors
    ///
    /// Returns [`RedactionEngineError`] when a built-in pattern fails to
    /// compile.
    pub fn with_field_lists(
        denylist: BTreeSet<String>,
        allowlist: BTreeSet<String>,
    ) -> Result<Self, RedactionEngineError> {
        let specs: [(&str, &'static str); 4] = [
            (EMAIL_PATTERN, "[REDACTED_EMAIL]"),
            (SSN_PATTERN, "[REDACTED_SSN]"),
            (PHONE_PATTERN, "[REDACTED_PHONE]"),
            (SECRET_PATTERN, "[REDACTED_SECRET]"),
        ];
        let mut patterns = Vec::with_capacity(specs.len());
        for (pattern, replacement) in specs {
            let compiled = Regex::new(pattern)
                .map_err(|err| RedactionEngineError::InvalidPattern(err.to_string()))?;
            patterns.push((compiled, replacement));
        }
        Ok(Self {
            denylist,
            allowlist,
            patterns,
        })
    }

    /// Applies the text patterns to a string.
    ///
    /// Returns the redacted string and whether any replacement occurred.
    #[must_use]
    pub fn redact_text(&self, text: &str) -> (String, bool) {
        let mut current = text.to_string();
        let mut changed = false;
        for (pattern, replacement) in &self.patterns {
            match pattern.replace_all(&current, *replacement) {
                Cow::Borrowed(_) => {}
                Cow::Owned(updated) => {
                    changed = true;
                    current = updated;
                }
            }
        }
        (current, changed)
    }

    /// Transforms a byte payload and classifies the outcome.
    ///
    /// JSON payloads (`content_type == application/json`) are walked
    /// structurally; everything else is treated as text. Invalid UTF-8
    /// decodes with replacement characters.
    #[must_use]
    pub fn apply(
        &self,
        payload: &[u8],
        field_policies: &BTreeMap<String, FieldPolicy>,
        content_type: &str,
    ) -> RedactionOutcome {
        let decoded = String::from_utf8_lossy(payload);

        if content_type == JSON_CONTENT_TYPE {
            return self.apply_json_payload(payload, &decoded, field_policies);
        }

        let (redacted_text, changed) = self.redact_text(&decoded);
        let status = if changed { RedactionStatus::Redacted } else { RedactionStatus::NotRequired };
        RedactionOutcome {
            redacted_bytes: redacted_text.into_bytes(),
            status,
            decisions: BTreeMap::new(),
            blocked_reason: None,
        }
    }

    /// Walks a JSON payload through the policy pipeline.
    fn apply_json_payload(
        &self,
        original: &[u8],
        decoded: &str,
        field_policies: &BTreeMap<String, FieldPolicy>,
    ) -> RedactionOutcome {
        let parsed: Value = match serde_json::from_str(decoded) {
            Ok(value) => value,
            Err(err) => return failed_outcome(original, err.to_string()),
        };

        let mut decisions = BTreeMap::new();
        let redacted = match self.apply_json(&parsed, field_policies, &mut decisions) {
            Ok(value) => value,
            Err(err) => return failed_outcome(original, err.to_string()),
        };

        let encoded = match serde_json::to_vec(&redacted) {
            Ok(bytes) => bytes,
            Err(err) => return failed_outcome(original, err.to_string()),
        };

        let blocked =
            decisions.values().any(|decision| matches!(decision, RedactionDecision::Blocked));
        let (status, blocked_reason) = if blocked {
            (RedactionStatus::Blocked, Some(POLICY_BLOCKED_REASON.to_string()))
        } else if decisions.is_empty() {
            (RedactionStatus::NotRequired, None)
        } else {
            (RedactionStatus::Redacted, None)
        };

        RedactionOutcome {
            redacted_bytes: encoded,
            status,
            decisions,
            blocked_reason,
        }
    }

    /// Recursively applies field policies and text patterns to a JSON value.
    fn apply_json(
        &self,
        value: &Value,
        field_policies: &BTreeMap<String, FieldPolicy>,
        decisions: &mut BTreeMap<String, RedactionDecision>,
    ) -> Result<Value, HashError> {
        match value {
            Value::Object(object) => {
                let mut output = Map::new();
                for (key, entry) in object {
                    let policy = if self.denylist.contains(key) {
                        Some(FieldPolicy::Drop)
                    } else if self.allowlist.contains(key) && !field_policies.contains_key(key) {
                        Some(FieldPolicy::RawAllowed)
                    } else {
                        field_policies.get(key).copied()
                    };

                    match policy {
                        Some(FieldPolicy::Drop) => {
                            decisions.insert(key.clone(), RedactionDecision::Blocked);
                        }
                        Some(FieldPolicy::HashOnly) => {
                            decisions.insert(key.clone(), RedactionDecision::HashOnly);
                            let digest = hash_canonical_json(DEFAULT_HASH_ALGORITHM, entry)?;
                            output.insert(key.clone(), Value::String(digest.value));
                        }
                        Some(FieldPolicy::RawAllowed) | None => {
                            if let Value::String(text) = entry {
                                let (redacted, changed) = self.redact_text(text);
                                if changed {
                                    decisions.insert(key.clone(), RedactionDecision::Redacted);
                                }
                                output.insert(key.clone(), Value::String(redacted));
                            } else {
                                let nested = self.apply_json(entry, field_policies, decisions)?;
                                output.insert(key.clone(), nested);
                            }
                        }
                    }
                }
                Ok(Value::Object(output))
            }
            Value::Array(items) => {
                let mut output = Vec::with_capacity(items.len());
                for item in items {
                    output.push(self.apply_json(item, field_policies, decisions)?);
                }
                Ok(Value::Array(output))
            }
            other => Ok(other.clone()),
        }
    }
}

/// Builds a `failed` outcome that echoes the original bytes.
fn failed_outcome(original: &[u8], reason: String) -> RedactionOutcome {
    RedactionOutcome {
        redacted_bytes: original.to_vec(),
        status: RedactionStatus::Failed,
        decisions: BTreeMap::new(),
        blocked_reason: Some(reason),
    }
}
