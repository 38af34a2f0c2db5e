// crates/flight-recorder-core/src/runtime/worker.rs
// ============================================================================
// Module: Flight Recorder Job Dispatch
// Description: Durable job claiming, handler dispatch, and the poll loop.
// Purpose: Drive queued jobs (currently replay execution) with retry-aware
//          outcome recording.
// Dependencies: crate::{core, interfaces}, serde_json
// ============================================================================

//! ## Overview
//! The dispatcher claims the oldest eligible job, routes it to the handler
//! registered for its type, and records success or failure. Failures are
//! retried by the store with exponential backoff until the job's retry limit
//! is reached. Idle polls sleep for the configured interval, floored at
//! [`MIN_POLL_INTERVAL_MS`].

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde_json::json;

use crate::core::record::JobRecord;
use crate::interfaces::AuditEvent;
use crate::interfaces::AuditSink;
use crate::interfaces::RecorderError;
use crate::interfaces::RecorderStore;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Minimum idle poll interval in milliseconds.
pub const MIN_POLL_INTERVAL_MS: u64 = 100;

// ============================================================================
// SECTION: Job Handler
// ============================================================================

/// Executor for one job type.
pub trait JobHandler: Send + Sync {
    /// Returns the job type this handler executes.
    fn job_type(&self) -> &'static str;

    /// Executes one claimed job.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError`] when execution fails; the dispatcher records
    /// the failure and the store schedules a retry.
    fn execute(&self, job: &JobRecord) -> Result<(), RecorderError>;
}

// ============================================================================
// SECTION: Dispatcher
// ============================================================================

/// Job dispatcher polling the durable queue.
///
/// # Invariants
/// - Each claimed job is resolved exactly once per attempt: success or a
///   recorded failure.
pub struct JobDispatcher {
    /// Durable persistence handle.
    store: Arc<dyn RecorderStore>,
    /// Observability sink for job outcomes.
    audit: Arc<dyn AuditSink>,
    /// Handlers keyed by job type.
    handlers: BTreeMap<&'static str, Arc<dyn JobHandler>>,
}

impl JobDispatcher {
    /// Builds a dispatcher with no registered handlers.
    #[must_use]
    pub fn new(store: Arc<dyn RecorderStore>, audit: Arc<dyn AuditSink>) -> Self {
        Self {
            store,
            audit,
            handlers: BTreeMap::new(),
        }
    }

    /// Registers a handler; later registrations overwrite earlier ones.
    pub fn register(&mut self, handler: Arc<dyn JobHandler>) {
        self.handlers.insert(handler.job_type(), handler);
    }

    /// Claims and executes at most one job.
    ///
    /// Returns false when no job was eligible.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError`] when the queue itself is unreachable;
    /// handler failures are recorded on the job instead.
    pub fn process_one(&self) -> Result<bool, RecorderError> {
        let Some(job) = self.store.fetch_next_job(None)? else {
            return Ok(false);
        };

        let outcome = match self.handlers.get(job.job_type.as_str()) {
            Some(handler) => handler.execute(&job),
            None => Err(RecorderError::Internal(format!(
                "Unsupported job type: {}",
                job.job_type
            ))),
        };

        match outcome {
            Ok(()) => {
                self.store.mark_job_success(job.job_id)?;
                self.audit.emit(&AuditEvent::now(
                    "job_completed",
                    "job",
                    job.job_id.to_string(),
                    "ok",
                    json!({ "job_type": job.job_type }),
                ));
            }
            Err(err) => {
                let failed = self.store.mark_job_failure(job.job_id, &err.to_string())?;
                self.audit.emit(&AuditEvent::now(
                    "job_failed",
                    "job",
                    job.job_id.to_string(),
                    "error",
                    json!({
                        "job_type": job.job_type,
                        "retries": failed.retries,
                        "status": failed.status.as_str(),
                    }),
                ));
            }
        }
        Ok(true)
    }

    /// Polls the queue until the store becomes unreachable.
    ///
    /// Idle polls sleep `max(poll_interval_ms, MIN_POLL_INTERVAL_MS)`
    /// milliseconds.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError`] when the queue itself fails; this function
    /// does not return otherwise.
    pub fn run_forever(&self, poll_interval_ms: u64) -> Result<(), RecorderError> {
        let interval = Duration::from_millis(poll_interval_ms.max(MIN_POLL_INTERVAL_MS));
        loop {
            let handled = self.process_one()?;
            if !handled {
                thread::sleep(interval);
            }
        }
    }
}
