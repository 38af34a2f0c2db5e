// crates/flight-recorder-server/src/lib.rs
// ============================================================================
// Module: Flight Recorder Server Library
// Description: HTTP surface over the recorder core.
// Purpose: Wire settings, stores, and runtime services into an axum app.
// Dependencies: axum, flight-recorder-config, flight-recorder-core,
//               flight-recorder-object-store, flight-recorder-store-sqlite
// ============================================================================

//! ## Overview
//! The server is a thin collaborator over the core: routes translate wire
//! DTOs, auth resolves the acting principal, and the envelope module keeps
//! the response contract uniform. All recorder semantics live in
//! `flight-recorder-core` and the stores.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod auth;
pub mod envelope;
pub mod routes;

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use flight_recorder_config::Settings;
use flight_recorder_core::ArtifactService;
use flight_recorder_core::ArtifactServiceConfig;
use flight_recorder_core::RecorderStore;
use flight_recorder_core::RedactionEngine;
use flight_recorder_core::ReplayEngine;
use flight_recorder_core::StderrAuditSink;
use flight_recorder_object_store::build_artifact_store;
use flight_recorder_store_sqlite::SqliteRecorderStore;
use flight_recorder_store_sqlite::SqliteStoreConfig;
use thiserror::Error;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use routes::build_router;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Server bootstrap errors.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Configuration failed validation.
    #[error("configuration error: {0}")]
    Config(String),
    /// A backing store failed to initialize.
    #[error("store initialization error: {0}")]
    Store(String),
}

// ============================================================================
// SECTION: Application State
// ============================================================================

/// Shared state handed to every handler.
pub struct AppState {
    /// Recorder settings.
    pub settings: Settings,
    /// Durable persistence handle.
    pub store: Arc<dyn RecorderStore>,
    /// Artifact registration service.
    pub artifacts: Arc<ArtifactService>,
    /// Replay session lifecycle service.
    pub replay: Arc<ReplayEngine>,
}

impl AppState {
    /// Builds the application state from settings.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError`] when a store or engine fails to initialize.
    pub fn from_settings(settings: Settings) -> Result<Self, ServerError> {
        let db_path =
            settings.sqlite_path().map_err(|err| ServerError::Config(err.to_string()))?;
        let store: Arc<dyn RecorderStore> = Arc::new(
            SqliteRecorderStore::open(&SqliteStoreConfig::new(db_path))
                .map_err(|err| ServerError::Store(err.to_string()))?,
        );
        let object_store =
            build_artifact_store(&settings).map_err(|err| ServerError::Store(err.to_string()))?;
        let redaction =
            RedactionEngine::new().map_err(|err| ServerError::Store(err.to_string()))?;
        let artifacts = Arc::new(ArtifactService::new(
            object_store,
            redaction,
            ArtifactServiceConfig {
                bucket: settings.artifact_bucket.clone(),
                block_on_failure: settings.redaction_block_on_failure,
            },
        ));
        let replay = Arc::new(ReplayEngine::new(
            Arc::clone(&store),
            Arc::new(StderrAuditSink),
        ));
        Ok(Self {
            settings,
            store,
            artifacts,
            replay,
        })
    }
}
