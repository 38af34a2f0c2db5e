// crates/flight-recorder-server/src/main.rs
// ============================================================================
// Module: Flight Recorder Server Binary
// Description: Process entrypoint for the recorder HTTP API.
// Purpose: Load settings, build the application state, and serve the router.
// Dependencies: flight-recorder-server, tokio
// ============================================================================

//! ## Overview
//! The binary reads settings from the environment, opens the SQLite store
//! and the configured artifact store, and serves the API until the process
//! is terminated.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use flight_recorder_config::Settings;
use flight_recorder_server::AppState;
use flight_recorder_server::build_router;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default listen address for the HTTP API.
const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8000";

// ============================================================================
// SECTION: Entrypoint
// ============================================================================

/// Serves the recorder API.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let settings = Settings::from_env()?;
    let state = Arc::new(AppState::from_settings(settings)?);
    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(DEFAULT_LISTEN_ADDR).await?;
    axum::serve(listener, router).await?;
    Ok(())
}
