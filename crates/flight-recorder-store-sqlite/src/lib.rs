// crates/flight-recorder-store-sqlite/src/lib.rs
// ============================================================================
// Module: Flight Recorder SQLite Store Library
// Description: Public API surface for the SQLite-backed recorder store.
// Purpose: Expose the durable store and its configuration.
// Dependencies: crate::store
// ============================================================================

//! ## Overview
//! This crate implements the durable
//! [`RecorderStore`](flight_recorder_core::RecorderStore) on SQLite. A
//! single guarded write connection serializes all mutations, which makes the
//! per-run ingest transaction requirement hold by construction; reads go
//! through a small pool of read-only connections under WAL.

// ============================================================================
// SECTION: Modules
// ============================================================================

mod store;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use store::SqliteJournalMode;
pub use store::SqliteRecorderStore;
pub use store::SqliteStoreConfig;
pub use store::SqliteStoreError;
pub use store::SqliteSyncMode;
