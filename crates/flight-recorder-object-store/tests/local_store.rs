// crates/flight-recorder-object-store/tests/local_store.rs
// ============================================================================
// Module: Local Artifact Store Tests
// Description: Filesystem backend tests for the content-addressed store.
// Purpose: Validate key layout, skip-if-present writes, and existence
//          probes.
// ============================================================================

//! ## Overview
//! Integration tests for the local backend:
//! - Objects land at `<base>/<hash[0:2]>/<hash>`
//! - Rewriting an existing hash leaves the original bytes intact
//! - Existence probes agree with the filesystem
//! - Concurrent writers of the same hash converge

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only assertions and helpers are permitted."
)]

use std::fs;
use std::sync::Arc;
use std::thread;

use tempfile::TempDir;

use flight_recorder_core::ArtifactHash;
use flight_recorder_core::ArtifactStore;
use flight_recorder_core::DEFAULT_HASH_ALGORITHM;
use flight_recorder_core::hashing::hash_bytes;
use flight_recorder_object_store::LocalArtifactStore;

// ============================================================================
// SECTION: Helpers
// ============================================================================

fn store_in(dir: &TempDir) -> LocalArtifactStore {
    LocalArtifactStore::new(dir.path().to_path_buf(), "artifacts".to_string())
        .expect("store builds")
}

fn hash_of(bytes: &[u8]) -> ArtifactHash {
    ArtifactHash::new(hash_bytes(DEFAULT_HASH_ALGORITHM, bytes).value)
}

// ============================================================================
// SECTION: Layout and Writes
// ============================================================================

#[test]
fn stores_bytes_under_prefix_slash_hash() {
    let dir = TempDir::new().expect("temp dir");
    let store = store_in(&dir);
    let bytes = b"artifact body";
    let hash = hash_of(bytes);

    let stored = store.store(&hash, bytes).expect("store");
    assert_eq!(stored.bucket, "artifacts");
    assert_eq!(stored.object_key, hash.object_key());

    let on_disk = fs::read(dir.path().join(&stored.object_key)).expect("read back");
    assert_eq!(on_disk, bytes.to_vec());
}

#[test]
fn existing_objects_are_not_rewritten() {
    let dir = TempDir::new().expect("temp dir");
    let store = store_in(&dir);
    let bytes = b"first write wins";
    let hash = hash_of(bytes);

    store.store(&hash, bytes).expect("first store");
    // A second store under the same hash is a no-op.
    store.store(&hash, b"different bytes").expect("second store");

    let on_disk = fs::read(dir.path().join(hash.object_key())).expect("read back");
    assert_eq!(on_disk, bytes.to_vec());
}

#[test]
fn exists_tracks_stored_hashes() {
    let dir = TempDir::new().expect("temp dir");
    let store = store_in(&dir);
    let bytes = b"probe me";
    let hash = hash_of(bytes);

    assert!(!store.exists(&hash).expect("probe before"));
    store.store(&hash, bytes).expect("store");
    assert!(store.exists(&hash).expect("probe after"));
    assert!(!store.exists(&hash_of(b"other")).expect("other probe"));
}

// ============================================================================
// SECTION: Concurrency
// ============================================================================

#[test]
fn concurrent_writers_of_identical_bytes_converge() {
    let dir = TempDir::new().expect("temp dir");
    let store = Arc::new(store_in(&dir));
    let bytes = b"shared content".to_vec();
    let hash = hash_of(&bytes);

    let mut handles = Vec::new();
    for _ in 0 .. 8 {
        let store = Arc::clone(&store);
        let bytes = bytes.clone();
        let hash = hash.clone();
        handles.push(thread::spawn(move || store.store(&hash, &bytes).map(|s| s.object_key)));
    }
    for handle in handles {
        let key = handle.join().expect("join").expect("store");
        assert_eq!(key, hash.object_key());
    }

    let on_disk = fs::read(dir.path().join(hash.object_key())).expect("read back");
    assert_eq!(on_disk, bytes);
}
