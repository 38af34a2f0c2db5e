// crates/flight-recorder-object-store/src/lib.rs
// ============================================================================
// Module: Flight Recorder Object Store Library
// Description: Content-addressed artifact store backends.
// Purpose: Provide local-filesystem and S3-compatible ArtifactStore
//          implementations selected from configuration.
// Dependencies: crate::{local, s3}, flight-recorder-config,
//               flight-recorder-core
// ============================================================================

//! ## Overview
//! Both backends implement the
//! [`ArtifactStore`](flight_recorder_core::ArtifactStore) contract: objects
//! live under the deterministic key `hash[0:2]/hash`, writes are
//! skip-if-present, and rewriting identical bytes is safe because content is
//! addressed by hash. Backend selection follows `ARTIFACT_STORE_MODE`.

// ============================================================================
// SECTION: Modules
// ============================================================================

mod local;
mod s3;

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use flight_recorder_config::ArtifactStoreMode;
use flight_recorder_config::Settings;
use flight_recorder_core::ArtifactStore;
use flight_recorder_core::ArtifactStoreError;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use local::LocalArtifactStore;
pub use s3::S3ArtifactStore;
pub use s3::S3StoreConfig;

// ============================================================================
// SECTION: Backend Selection
// ============================================================================

/// Builds the artifact store selected by the settings.
///
/// # Errors
///
/// Returns [`ArtifactStoreError`] when the backend cannot be initialized.
pub fn build_artifact_store(
    settings: &Settings,
) -> Result<Arc<dyn ArtifactStore>, ArtifactStoreError> {
    match settings.artifact_store_mode {
        ArtifactStoreMode::Local => Ok(Arc::new(LocalArtifactStore::new(
            settings.artifact_local_dir.clone(),
            settings.artifact_bucket.clone(),
        )?)),
        ArtifactStoreMode::S3 => Ok(Arc::new(S3ArtifactStore::new(&S3StoreConfig {
            bucket: settings.artifact_bucket.clone(),
            endpoint: settings.s3_endpoint.clone(),
            access_key: settings.s3_access_key.clone(),
            secret_key: settings.s3_secret_key.clone(),
            region: settings.s3_region.clone(),
        })?)),
    }
}
