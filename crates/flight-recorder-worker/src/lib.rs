// crates/flight-recorder-worker/src/lib.rs
// ============================================================================
// Module: Flight Recorder Worker Library
// Description: Job handlers and dispatcher wiring for the worker process.
// Purpose: Execute replay sessions claimed from the durable queue.
// Dependencies: flight-recorder-config, flight-recorder-core,
//               flight-recorder-store-sqlite
// ============================================================================

//! ## Overview
//! The worker is a separate process coordinating with the server through
//! the database only. It polls the job queue, executes `replay_execute`
//! jobs through the replay engine, and records success or failure; the
//! store schedules retries with exponential backoff.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use flight_recorder_config::Settings;
use flight_recorder_core::JobDispatcher;
use flight_recorder_core::JobHandler;
use flight_recorder_core::JobRecord;
use flight_recorder_core::RecorderError;
use flight_recorder_core::RecorderStore;
use flight_recorder_core::REPLAY_EXECUTE_JOB;
use flight_recorder_core::REPLAY_SESSION_PAYLOAD_KEY;
use flight_recorder_core::ReplayEngine;
use flight_recorder_core::ReplaySessionId;
use flight_recorder_core::StderrAuditSink;
use flight_recorder_store_sqlite::SqliteRecorderStore;
use flight_recorder_store_sqlite::SqliteStoreConfig;
use serde_json::Value;
use serde_json::json;
use thiserror::Error;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Worker bootstrap errors.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// Configuration failed validation.
    #[error("configuration error: {0}")]
    Config(String),
    /// The store failed to initialize.
    #[error("store initialization error: {0}")]
    Store(String),
}

// ============================================================================
// SECTION: Replay Job Handler
// ============================================================================

/// Handler executing `replay_execute` jobs.
pub struct ReplayExecuteHandler {
    /// Replay engine driving session execution.
    engine: Arc<ReplayEngine>,
}

impl ReplayExecuteHandler {
    /// Builds a handler over a replay engine.
    #[must_use]
    pub fn new(engine: Arc<ReplayEngine>) -> Self {
        Self {
            engine,
        }
    }
}

impl JobHandler for ReplayExecuteHandler {
    fn job_type(&self) -> &'static str {
        REPLAY_EXECUTE_JOB
    }

    fn execute(&self, job: &JobRecord) -> Result<(), RecorderError> {
        let Some(Value::String(session_id)) = job.payload.get(REPLAY_SESSION_PAYLOAD_KEY) else {
            return Err(RecorderError::validation(
                "replay job payload is missing replay_session_id",
                json!({ "job_id": job.job_id.get() }),
            ));
        };
        self.engine.execute(&ReplaySessionId::new(session_id.clone()))?;
        Ok(())
    }
}

// ============================================================================
// SECTION: Dispatcher Wiring
// ============================================================================

/// Builds the worker dispatcher from settings.
///
/// # Errors
///
/// Returns [`WorkerError`] when the database cannot be opened.
pub fn build_dispatcher(settings: &Settings) -> Result<JobDispatcher, WorkerError> {
    let db_path = settings.sqlite_path().map_err(|err| WorkerError::Config(err.to_string()))?;
    let store: Arc<dyn RecorderStore> = Arc::new(
        SqliteRecorderStore::open(&SqliteStoreConfig::new(db_path))
            .map_err(|err| WorkerError::Store(err.to_string()))?,
    );
    let audit = Arc::new(StderrAuditSink);
    let engine = Arc::new(ReplayEngine::new(Arc::clone(&store), audit.clone()));
    let mut dispatcher = JobDispatcher::new(store, audit);
    dispatcher.register(Arc::new(ReplayExecuteHandler::new(engine)));
    Ok(dispatcher)
}
