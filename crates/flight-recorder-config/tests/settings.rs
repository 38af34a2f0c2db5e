// crates/flight-recorder-config/tests/settings.rs
// ============================================================================
// Module: Settings Validation Tests
// Description: Environment parsing tests using injected lookups.
// Purpose: Validate defaults, boolean/integer parsing, fail-closed errors,
//          and database URL normalization.
// ============================================================================

//! ## Overview
//! Settings tests never mutate the process environment; every case injects
//! a lookup closure over a map, so the suite is safe under parallel test
//! execution.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only assertions and helpers are permitted."
)]

use std::collections::BTreeMap;
use std::path::PathBuf;

use flight_recorder_config::ArtifactStoreMode;
use flight_recorder_config::ConfigError;
use flight_recorder_config::MIN_WORKER_POLL_INTERVAL_MS;
use flight_recorder_config::Settings;

// ============================================================================
// SECTION: Helpers
// ============================================================================

fn settings_from(pairs: &[(&str, &str)]) -> Result<Settings, ConfigError> {
    let map: BTreeMap<String, String> =
        pairs.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect();
    Settings::from_lookup(|name| map.get(name).cloned())
}

// ============================================================================
// SECTION: Defaults
// ============================================================================

#[test]
fn defaults_apply_when_environment_is_empty() {
    let settings = settings_from(&[]).expect("defaults load");
    assert_eq!(settings.api_title, "LLM Flight Recorder API");
    assert_eq!(settings.database_url, "sqlite:///./flight_recorder.db");
    assert!(!settings.auth_enabled);
    assert_eq!(settings.artifact_store_mode, ArtifactStoreMode::Local);
    assert_eq!(settings.artifact_bucket, "artifacts");
    assert_eq!(settings.artifact_local_dir, PathBuf::from(".data/artifacts"));
    assert_eq!(settings.s3_region, "us-east-1");
    assert_eq!(settings.worker_poll_interval_ms, 1_000);
    assert!(settings.redaction_block_on_failure);
}

// ============================================================================
// SECTION: Boolean Parsing
// ============================================================================

#[test]
fn booleans_accept_common_truthy_spellings() {
    for value in ["1", "true", "YES", "On", " true "] {
        let settings = settings_from(&[("S3_SECURE", value)]).expect("parse");
        assert!(settings.s3_secure, "expected '{value}' to parse as true");
    }
    for value in ["0", "false", "off", "nope", ""] {
        let settings = settings_from(&[("S3_SECURE", value)]).expect("parse");
        assert!(!settings.s3_secure, "expected '{value}' to parse as false");
    }
}

#[test]
fn redaction_blocking_defaults_on_and_can_be_disabled() {
    let settings =
        settings_from(&[("REDACTION_BLOCK_ON_FAILURE", "false")]).expect("parse");
    assert!(!settings.redaction_block_on_failure);
}

// ============================================================================
// SECTION: Fail-Closed Validation
// ============================================================================

#[test]
fn unknown_store_mode_is_rejected() {
    let err = settings_from(&[("ARTIFACT_STORE_MODE", "gcs")]).unwrap_err();
    assert!(matches!(err, ConfigError::InvalidStoreMode(_)));
}

#[test]
fn store_mode_parses_case_insensitively() {
    let settings = settings_from(&[("ARTIFACT_STORE_MODE", "S3")]).expect("parse");
    assert_eq!(settings.artifact_store_mode, ArtifactStoreMode::S3);
}

#[test]
fn auth_enabled_requires_a_token() {
    let err = settings_from(&[("AUTH_ENABLED", "true")]).unwrap_err();
    assert_eq!(err, ConfigError::MissingAuthToken);

    let settings =
        settings_from(&[("AUTH_ENABLED", "true"), ("AUTH_TOKEN", "sekrit")]).expect("parse");
    assert!(settings.auth_enabled);
    assert_eq!(settings.auth_token, "sekrit");
}

#[test]
fn malformed_poll_interval_is_rejected() {
    let err = settings_from(&[("WORKER_POLL_INTERVAL_MS", "soon")]).unwrap_err();
    assert!(matches!(err, ConfigError::InvalidInteger { .. }));
}

#[test]
fn poll_interval_floors_at_minimum() {
    let settings = settings_from(&[("WORKER_POLL_INTERVAL_MS", "10")]).expect("parse");
    assert_eq!(settings.worker_poll_interval_ms, MIN_WORKER_POLL_INTERVAL_MS);
}

// ============================================================================
// SECTION: Database URL Normalization
// ============================================================================

#[test]
fn sqlite_url_prefixes_normalize_to_paths() {
    let cases = [
        ("sqlite:///./flight_recorder.db", "./flight_recorder.db"),
        ("sqlite:///var/data/recorder.db", "var/data/recorder.db"),
        ("sqlite:recorder.db", "recorder.db"),
        ("/var/data/recorder.db", "/var/data/recorder.db"),
    ];
    for (url, expected) in cases {
        let settings = settings_from(&[("DATABASE_URL", url)]).expect("parse");
        assert_eq!(settings.sqlite_path().expect("path"), PathBuf::from(expected));
    }
}

#[test]
fn non_sqlite_schemes_are_rejected() {
    let err = settings_from(&[("DATABASE_URL", "postgres://localhost/recorder")]).unwrap_err();
    assert!(matches!(err, ConfigError::UnsupportedDatabase(_)));
}

// ============================================================================
// SECTION: Optional S3 Settings
// ============================================================================

#[test]
fn empty_s3_values_resolve_to_none() {
    let settings = settings_from(&[("S3_ENDPOINT", ""), ("S3_ACCESS_KEY", "")]).expect("parse");
    assert!(settings.s3_endpoint.is_none());
    assert!(settings.s3_access_key.is_none());

    let settings = settings_from(&[
        ("S3_ENDPOINT", "http://localhost:9000"),
        ("S3_ACCESS_KEY", "minio"),
        ("S3_SECRET_KEY", "minio123"),
    ])
    .expect("parse");
    assert_eq!(settings.s3_endpoint.as_deref(), Some("http://localhost:9000"));
}
