// crates/flight-recorder-core/tests/artifact_service.rs
// ============================================================================
// Module: Artifact Service Tests
// Description: Registration pipeline tests over in-memory stores.
// Purpose: Validate decode, redaction, hashing, deduplication, blocking,
//          and pre-registration semantics.
// ============================================================================

//! ## Overview
//! These tests drive the artifact service with an in-memory object store so
//! stored bytes can be inspected:
//! - Inline text is redacted before hashing and persistence
//! - Duplicate content deduplicates without a second write
//! - Pre-registration answers `upload_required` correctly
//! - Redaction failures block or fall through per configuration

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only assertions and helpers are permitted."
)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;

use flight_recorder_core::ArtifactHash;
use flight_recorder_core::ArtifactService;
use flight_recorder_core::ArtifactServiceConfig;
use flight_recorder_core::ArtifactStatus;
use flight_recorder_core::ArtifactStore;
use flight_recorder_core::ArtifactStoreError;
use flight_recorder_core::FieldPolicy;
use flight_recorder_core::InMemoryRecorderStore;
use flight_recorder_core::RecorderError;
use flight_recorder_core::RecorderStore;
use flight_recorder_core::RedactionEngine;
use flight_recorder_core::RegisterArtifactRequest;
use flight_recorder_core::StoredArtifact;
use flight_recorder_core::hashing::DEFAULT_HASH_ALGORITHM;
use flight_recorder_core::hashing::hash_bytes;

// ============================================================================
// SECTION: In-Memory Object Store
// ============================================================================

/// Object store capturing writes for inspection.
#[derive(Debug, Default)]
struct MemoryObjectStore {
    /// Stored objects keyed by object key.
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
    /// Number of store calls that actually wrote bytes.
    writes: Mutex<usize>,
}

impl MemoryObjectStore {
    fn bytes_for(&self, hash: &ArtifactHash) -> Option<Vec<u8>> {
        self.objects.lock().ok()?.get(&hash.object_key()).cloned()
    }

    fn write_count(&self) -> usize {
        self.writes.lock().map(|count| *count).unwrap_or(0)
    }
}

impl ArtifactStore for MemoryObjectStore {
    fn store(
        &self,
        hash: &ArtifactHash,
        bytes: &[u8],
    ) -> Result<StoredArtifact, ArtifactStoreError> {
        let mut objects = self
            .objects
            .lock()
            .map_err(|_| ArtifactStoreError::Io("poisoned".to_string()))?;
        if !objects.contains_key(&hash.object_key()) {
            objects.insert(hash.object_key(), bytes.to_vec());
            let mut writes = self
                .writes
                .lock()
                .map_err(|_| ArtifactStoreError::Io("poisoned".to_string()))?;
            *writes += 1;
        }
        Ok(StoredArtifact {
            bucket: "artifacts".to_string(),
            object_key: hash.object_key(),
        })
    }

    fn exists(&self, hash: &ArtifactHash) -> Result<bool, ArtifactStoreError> {
        Ok(self
            .objects
            .lock()
            .map_err(|_| ArtifactStoreError::Io("poisoned".to_string()))?
            .contains_key(&hash.object_key()))
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

fn service(
    block_on_failure: bool,
) -> (ArtifactService, Arc<MemoryObjectStore>, InMemoryRecorderStore) {
    let object_store = Arc::new(MemoryObjectStore::default());
    let service = ArtifactService::new(
        Arc::clone(&object_store) as Arc<dyn ArtifactStore>,
        RedactionEngine::new().expect("engine"),
        ArtifactServiceConfig {
            bucket: "artifacts".to_string(),
            block_on_failure,
        },
    );
    (service, object_store, InMemoryRecorderStore::new())
}

fn text_request(text: &str) -> RegisterArtifactRequest {
    RegisterArtifactRequest {
        artifact_type: "model_request".to_string(),
        byte_size: i64::try_from(text.len()).expect("size"),
        mime_type: "text/plain".to_string(),
        redaction_profile: "default".to_string(),
        content_hash: None,
        content_base64: None,
        content_text: Some(text.to_string()),
        retention_class: "dev_short".to_string(),
        content_encoding: "identity".to_string(),
        field_policies: BTreeMap::new(),
    }
}

// ============================================================================
// SECTION: Inline Registration
// ============================================================================

#[test]
fn inline_text_is_redacted_before_storage() {
    let (service, objects, store) = service(true);
    let response = service
        .register_artifact(&store, &text_request("email me at dev@example.com and secret=abcd"))
        .expect("register");

    assert!(!response.upload_required);
    let stored = objects.bytes_for(&response.artifact_hash).expect("bytes stored");
    let text = String::from_utf8(stored.clone()).expect("utf8");
    assert!(text.contains("[REDACTED_EMAIL]"));
    assert!(text.contains("[REDACTED_SECRET]"));
    assert!(!text.contains("dev@example.com"));

    // The hash is the hash of the post-redaction bytes.
    let digest = hash_bytes(DEFAULT_HASH_ALGORITHM, &stored);
    assert_eq!(response.artifact_hash.as_str(), digest.value);

    let row = store.get_artifact(&response.artifact_hash).expect("get").expect("row");
    assert_eq!(row.status, ArtifactStatus::Ready);
    assert_eq!(row.byte_size, i64::try_from(stored.len()).expect("size"));
}

#[test]
fn duplicate_content_deduplicates() {
    let (service, objects, store) = service(true);
    let first = service.register_artifact(&store, &text_request("same bytes")).expect("first");
    let second = service.register_artifact(&store, &text_request("same bytes")).expect("second");

    assert_eq!(first.artifact_hash, second.artifact_hash);
    assert!(!second.upload_required);
    assert_eq!(objects.write_count(), 1);
}

#[test]
fn object_key_layout_is_prefix_slash_hash() {
    let (service, _objects, store) = service(true);
    let response = service.register_artifact(&store, &text_request("layout")).expect("register");
    let hash = response.artifact_hash.as_str();
    assert_eq!(response.upload_target.object_key, format!("{}/{hash}", &hash[.. 2]));
    assert_eq!(response.upload_target.bucket, "artifacts");
}

#[test]
fn blocked_fields_persist_with_blocked_status() {
    let (service, objects, store) = service(true);
    let mut request = text_request(r#"{"notes":"internal","ok":1}"#);
    request.mime_type = "application/json".to_string();
    request.field_policies.insert("notes".to_string(), FieldPolicy::Drop);

    let response = service.register_artifact(&store, &request).expect("register");
    let row = store.get_artifact(&response.artifact_hash).expect("get").expect("row");
    assert_eq!(row.status, ArtifactStatus::Blocked);
    assert_eq!(row.blocked_reason.as_deref(), Some("policy_blocked_field"));

    let stored = objects.bytes_for(&response.artifact_hash).expect("bytes stored");
    assert!(!String::from_utf8(stored).expect("utf8").contains("internal"));
}

// ============================================================================
// SECTION: Redaction Failure Paths
// ============================================================================

#[test]
fn failed_redaction_blocks_persistence_when_configured() {
    let (service, objects, store) = service(true);
    let mut request = text_request("{not json");
    request.mime_type = "application/json".to_string();

    let response = service.register_artifact(&store, &request).expect("register");
    assert!(!response.upload_required);

    // Bytes are never persisted; only the failed metadata row exists.
    assert!(objects.bytes_for(&response.artifact_hash).is_none());
    let row = store.get_artifact(&response.artifact_hash).expect("get").expect("row");
    assert_eq!(row.status, ArtifactStatus::Failed);
    assert!(row.blocked_reason.is_some());

    // The failed row is keyed by the hash of the original bytes.
    let digest = hash_bytes(DEFAULT_HASH_ALGORITHM, b"{not json");
    assert_eq!(response.artifact_hash.as_str(), digest.value);
}

#[test]
fn failed_redaction_stores_original_bytes_when_not_blocking() {
    let (service, objects, store) = service(false);
    let mut request = text_request("{not json");
    request.mime_type = "application/json".to_string();

    let response = service.register_artifact(&store, &request).expect("register");
    let stored = objects.bytes_for(&response.artifact_hash).expect("bytes stored");
    assert_eq!(stored, b"{not json".to_vec());

    let digest = hash_bytes(DEFAULT_HASH_ALGORITHM, b"{not json");
    assert_eq!(response.artifact_hash.as_str(), digest.value);
    let row = store.get_artifact(&response.artifact_hash).expect("get").expect("row");
    assert_eq!(row.status, ArtifactStatus::Ready);
}

// ============================================================================
// SECTION: Pre-Registration
// ============================================================================

#[test]
fn preregistration_requires_a_hash() {
    let (service, _objects, store) = service(true);
    let mut request = text_request("ignored");
    request.content_text = None;
    let err = service.register_artifact(&store, &request).unwrap_err();
    assert!(matches!(err, RecorderError::Validation { .. }));
}

#[test]
fn preregistration_requests_upload_for_unknown_hashes() {
    let (service, objects, store) = service(true);
    let mut request = text_request("ignored");
    request.content_text = None;
    request.content_hash = Some(ArtifactHash::new("ab".repeat(32)));

    let response = service.register_artifact(&store, &request).expect("register");
    assert!(response.upload_required);
    assert_eq!(objects.write_count(), 0);
    let row = store.get_artifact(&response.artifact_hash).expect("get").expect("row");
    assert_eq!(row.status, ArtifactStatus::Pending);
}

#[test]
fn preregistration_of_known_hash_skips_upload() {
    let (service, _objects, store) = service(true);
    let first = service.register_artifact(&store, &text_request("known bytes")).expect("first");

    let mut request = text_request("ignored");
    request.content_text = None;
    request.content_hash = Some(first.artifact_hash.clone());
    let second = service.register_artifact(&store, &request).expect("second");

    assert!(!second.upload_required);
    assert_eq!(second.artifact_hash, first.artifact_hash);
}

// ============================================================================
// SECTION: Base64 Decoding
// ============================================================================

#[test]
fn base64_payloads_decode_before_redaction() {
    let (service, objects, store) = service(true);
    let mut request = text_request("ignored");
    request.content_text = None;
    request.content_base64 = Some("aGVsbG8gd29ybGQ=".to_string());

    let response = service.register_artifact(&store, &request).expect("register");
    let stored = objects.bytes_for(&response.artifact_hash).expect("bytes stored");
    assert_eq!(stored, b"hello world".to_vec());
}

#[test]
fn invalid_base64_fails_validation() {
    let (service, _objects, store) = service(true);
    let mut request = text_request("ignored");
    request.content_text = None;
    request.content_base64 = Some("!!!not-base64!!!".to_string());
    let err = service.register_artifact(&store, &request).unwrap_err();
    assert!(matches!(err, RecorderError::Validation { .. }));
}
