// crates/flight-recorder-core/src/runtime/artifacts.rs
// ============================================================================
// Module: Flight Recorder Artifact Service
// Description: Content-addressed artifact registration pipeline.
// Purpose: Orchestrate decode, redaction, hashing, deduplication, and
//          persistence for artifact payloads.
// Dependencies: crate::{core, interfaces}, base64, serde, serde_json
// ============================================================================

//! ## Overview
//! Registration runs in two modes. Pre-registration records metadata for a
//! caller-hashed payload and answers whether an upload is still required.
//! Inline registration decodes the payload, redacts it, hashes the
//! post-redaction bytes, deduplicates against existing rows, and persists
//! the bytes to the artifact store. Redaction failures either block
//! persistence (recording a `failed` row under the hash of the original
//! bytes) or fall through and store the original bytes, depending on
//! configuration.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use serde::Deserialize;
use serde::Serialize;
use serde_json::json;

use crate::core::event::RedactionStatus;
use crate::core::hashing::DEFAULT_HASH_ALGORITHM;
use crate::core::hashing::hash_bytes;
use crate::core::identifiers::ArtifactHash;
use crate::core::record::ArtifactRecord;
use crate::core::record::ArtifactStatus;
use crate::core::record::DEFAULT_RETENTION_CLASS;
use crate::core::redaction::FieldPolicy;
use crate::core::redaction::RedactionEngine;
use crate::core::time::UtcTimestamp;
use crate::interfaces::ArtifactStore;
use crate::interfaces::RecorderError;
use crate::interfaces::RecorderStore;
use crate::interfaces::StoredArtifact;

// ============================================================================
// SECTION: Requests and Responses
// ============================================================================

/// Artifact registration request.
///
/// # Invariants
/// - Exactly one of `content_base64` / `content_text` is set for inline
///   registration; both absent means pre-registration via `content_hash`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterArtifactRequest {
    /// Artifact kind label.
    pub artifact_type: String,
    /// Caller-declared payload size in bytes.
    #[serde(default)]
    pub byte_size: i64,
    /// MIME type of the payload.
    #[serde(default = "default_mime_type")]
    pub mime_type: String,
    /// Redaction profile label.
    #[serde(default = "default_redaction_profile")]
    pub redaction_profile: String,
    /// Caller-computed content hash for pre-registration.
    #[serde(default)]
    pub content_hash: Option<ArtifactHash>,
    /// Inline payload as standard base64.
    #[serde(default)]
    pub content_base64: Option<String>,
    /// Inline payload as UTF-8 text.
    #[serde(default)]
    pub content_text: Option<String>,
    /// Retention class label.
    #[serde(default = "default_retention_class")]
    pub retention_class: String,
    /// Content encoding label.
    #[serde(default = "default_content_encoding")]
    pub content_encoding: String,
    /// Per-field redaction policies applied during the JSON walk.
    #[serde(default)]
    pub field_policies: BTreeMap<String, FieldPolicy>,
}

/// Returns the default MIME type for registration requests.
fn default_mime_type() -> String {
    "application/octet-stream".to_string()
}

/// Returns the default redaction profile for registration requests.
fn default_redaction_profile() -> String {
    "default".to_string()
}

/// Returns the default retention class for registration requests.
fn default_retention_class() -> String {
    DEFAULT_RETENTION_CLASS.to_string()
}

/// Returns the default content encoding for registration requests.
fn default_content_encoding() -> String {
    "identity".to_string()
}

/// Artifact registration response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterArtifactResponse {
    /// Content hash identifying the artifact.
    pub artifact_hash: ArtifactHash,
    /// True when the caller must still upload the bytes.
    pub upload_required: bool,
    /// Destination for the artifact bytes.
    pub upload_target: StoredArtifact,
}

// ============================================================================
// SECTION: Service Configuration
// ============================================================================

/// Artifact service configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactServiceConfig {
    /// Storage bucket advertised in upload targets.
    pub bucket: String,
    /// Refuse to persist bytes when redaction fails.
    pub block_on_failure: bool,
}

// ============================================================================
// SECTION: Service
// ============================================================================

/// Artifact registration service.
///
/// # Invariants
/// - Stored artifact identity is always the SHA-256 of the bytes actually
///   persisted.
pub struct ArtifactService {
    /// Blob sink for artifact bytes.
    object_store: Arc<dyn ArtifactStore>,
    /// Redaction engine applied to inline payloads.
    redaction: RedactionEngine,
    /// Service configuration.
    config: ArtifactServiceConfig,
}

impl ArtifactService {
    /// Builds an artifact service.
    #[must_use]
    pub fn new(
        object_store: Arc<dyn ArtifactStore>,
        redaction: RedactionEngine,
        config: ArtifactServiceConfig,
    ) -> Self {
        Self {
            object_store,
            redaction,
            config,
        }
    }

    /// Registers an artifact, deduplicating by content hash.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError::Validation`] when neither inline content nor
    /// `content_hash` is provided or the inline payload fails to decode, and
    /// [`RecorderError::Unavailable`] when a backend is unreachable.
    pub fn register_artifact(
        &self,
        store: &dyn RecorderStore,
        request: &RegisterArtifactRequest,
    ) -> Result<RegisterArtifactResponse, RecorderError> {
        let Some(payload) = decode_payload(request)? else {
            return self.preregister(store, request);
        };

        let outcome =
            self.redaction.apply(&payload, &request.field_policies, &request.mime_type);

        if outcome.status == RedactionStatus::Failed && self.config.block_on_failure {
            let digest = hash_bytes(DEFAULT_HASH_ALGORITHM, &payload);
            let artifact_hash = ArtifactHash::new(digest.value);
            let target = StoredArtifact {
                bucket: self.config.bucket.clone(),
                object_key: artifact_hash.object_key(),
            };
            if store.get_artifact(&artifact_hash)?.is_none() {
                store.insert_artifact_if_absent(self.artifact_row(
                    request,
                    &artifact_hash,
                    &target,
                    request.byte_size,
                    ArtifactStatus::Failed,
                    outcome.blocked_reason.clone(),
                ))?;
            }
            return Ok(RegisterArtifactResponse {
                artifact_hash,
                upload_required: false,
                upload_target: target,
            });
        }

        let digest = hash_bytes(DEFAULT_HASH_ALGORITHM, &outcome.redacted_bytes);
        let artifact_hash = ArtifactHash::new(digest.value);

        if let Some(existing) = store.get_artifact(&artifact_hash)? {
            return Ok(RegisterArtifactResponse {
                artifact_hash: existing.artifact_hash.clone(),
                upload_required: false,
                upload_target: StoredArtifact {
                    bucket: existing.storage_bucket,
                    object_key: existing.storage_object_key,
                },
            });
        }

        let stored = self.object_store.store(&artifact_hash, &outcome.redacted_bytes)?;
        let status = if outcome.status == RedactionStatus::Blocked {
            ArtifactStatus::Blocked
        } else {
            ArtifactStatus::Ready
        };
        let byte_size = i64::try_from(outcome.redacted_bytes.len()).unwrap_or(i64::MAX);
        store.insert_artifact_if_absent(self.artifact_row(
            request,
            &artifact_hash,
            &stored,
            byte_size,
            status,
            outcome.blocked_reason.clone(),
        ))?;

        Ok(RegisterArtifactResponse {
            artifact_hash,
            upload_required: false,
            upload_target: stored,
        })
    }

    /// Handles pre-registration by caller-supplied content hash.
    fn preregister(
        &self,
        store: &dyn RecorderStore,
        request: &RegisterArtifactRequest,
    ) -> Result<RegisterArtifactResponse, RecorderError> {
        let Some(content_hash) = request.content_hash.clone() else {
            return Err(RecorderError::validation(
                "content_hash is required when artifact payload is omitted",
                json!({}),
            ));
        };

        if let Some(existing) = store.get_artifact(&content_hash)? {
            return Ok(RegisterArtifactResponse {
                artifact_hash: existing.artifact_hash.clone(),
                upload_required: false,
                upload_target: StoredArtifact {
                    bucket: existing.storage_bucket,
                    object_key: existing.storage_object_key,
                },
            });
        }

        let target = StoredArtifact {
            bucket: self.config.bucket.clone(),
            object_key: content_hash.object_key(),
        };
        store.insert_artifact_if_absent(self.artifact_row(
            request,
            &content_hash,
            &target,
            request.byte_size,
            ArtifactStatus::Pending,
            None,
        ))?;

        Ok(RegisterArtifactResponse {
            artifact_hash: content_hash,
            upload_required: true,
            upload_target: target,
        })
    }

    /// Builds an artifact row from a registration request.
    fn artifact_row(
        &self,
        request: &RegisterArtifactRequest,
        artifact_hash: &ArtifactHash,
        target: &StoredArtifact,
        byte_size: i64,
        status: ArtifactStatus,
        blocked_reason: Option<String>,
    ) -> ArtifactRecord {
        ArtifactRecord {
            artifact_hash: artifact_hash.clone(),
            artifact_type: request.artifact_type.clone(),
            byte_size,
            mime_type: request.mime_type.clone(),
            content_encoding: request.content_encoding.clone(),
            redaction_profile: request.redaction_profile.clone(),
            storage_bucket: target.bucket.clone(),
            storage_object_key: target.object_key.clone(),
            retention_class: request.retention_class.clone(),
            status,
            hash_algorithm: DEFAULT_HASH_ALGORITHM.as_str().to_string(),
            blocked_reason,
            created_at: UtcTimestamp::now(),
        }
    }
}

// ============================================================================
// SECTION: Payload Decoding
// ============================================================================

/// Decodes the inline payload from a registration request.
///
/// Returns `None` when the request carries no inline content.
fn decode_payload(request: &RegisterArtifactRequest) -> Result<Option<Vec<u8>>, RecorderError> {
    if let Some(encoded) = request.content_base64.as_deref()
        && !encoded.is_empty()
    {
        let decoded = BASE64_STANDARD.decode(encoded).map_err(|err| {
            RecorderError::validation(
                "content_base64 is not valid base64",
                json!({ "decode_error": err.to_string() }),
            )
        })?;
        return Ok(Some(decoded));
    }
    if let Some(text) = request.content_text.as_deref() {
        return Ok(Some(text.as_bytes().to_vec()));
    }
    Ok(None)
}
