// crates/flight-recorder-core/src/runtime/mod.rs
// ============================================================================
// Module: Flight Recorder Runtime
// Description: Artifact registration, replay execution, job dispatch, and
//              the in-memory reference store.
// Purpose: Provide the deterministic services that operate over the
//          interface seams.
// Dependencies: crate::{core, interfaces}
// ============================================================================

//! ## Overview
//! Runtime services are backend-agnostic: they hold `Arc<dyn RecorderStore>`
//! and `Arc<dyn ArtifactStore>` handles and never perform I/O beyond those
//! seams. The in-memory store gives tests and embedders a complete
//! implementation without external dependencies.

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod artifacts;
pub mod memory;
pub mod replay;
pub mod worker;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use artifacts::ArtifactService;
pub use artifacts::ArtifactServiceConfig;
pub use artifacts::RegisterArtifactRequest;
pub use artifacts::RegisterArtifactResponse;
pub use memory::InMemoryRecorderStore;
pub use replay::FAILURE_ARTIFACT_MISSING;
pub use replay::FAILURE_CANCEL_REQUESTED;
pub use replay::FAILURE_SOURCE_RUN_EMPTY;
pub use replay::FAILURE_SOURCE_RUN_NOT_TERMINAL;
pub use replay::REASON_CACHE_HIT;
pub use replay::REASON_OPERATOR_OVERRIDE;
pub use replay::REASON_SOURCE_OUTPUT_REUSED;
pub use replay::REPLAY_EXECUTE_JOB;
pub use replay::REPLAY_SESSION_PAYLOAD_KEY;
pub use replay::ReplayEngine;
pub use worker::JobDispatcher;
pub use worker::JobHandler;
pub use worker::MIN_POLL_INTERVAL_MS;
