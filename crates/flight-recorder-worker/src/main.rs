// crates/flight-recorder-worker/src/main.rs
// ============================================================================
// Module: Flight Recorder Worker Binary
// Description: Process entrypoint for the job queue worker.
// Purpose: Load settings, wire the dispatcher, and poll until terminated.
// Dependencies: flight-recorder-config, flight-recorder-worker
// ============================================================================

//! ## Overview
//! The worker polls the durable job queue at the configured interval and
//! executes replay jobs. It exits only when the queue becomes unreachable;
//! process supervision handles restarts.

// ============================================================================
// SECTION: Imports
// ============================================================================

use flight_recorder_config::Settings;
use flight_recorder_worker::build_dispatcher;

// ============================================================================
// SECTION: Entrypoint
// ============================================================================

/// Runs the worker poll loop.
fn main() -> Result<(), Box<dyn std::error::Error>> {
    let settings = Settings::from_env()?;
    let dispatcher = build_dispatcher(&settings)?;
    dispatcher.run_forever(settings.worker_poll_interval_ms)?;
    Ok(())
}
