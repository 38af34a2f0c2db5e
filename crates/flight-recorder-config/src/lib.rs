// crates/flight-recorder-config/src/lib.rs
// ============================================================================
// Module: Flight Recorder Configuration
// Description: Environment-derived settings with fail-closed validation.
// Purpose: Provide one typed settings surface for the server and worker
//          processes.
// Dependencies: serde, thiserror
// ============================================================================

//! ## Overview
//! Settings load from environment variables. Parsing is fail-closed:
//! unknown store modes, malformed integers, unsupported database URLs, and
//! auth enabled without a token are errors rather than silent defaults.
//! Lookups are injectable so tests never mutate process environment.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::env;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default API title.
const DEFAULT_API_TITLE: &str = "LLM Flight Recorder API";
/// Default API version label.
const DEFAULT_API_VERSION: &str = "0.1.0";
/// Default database URL.
const DEFAULT_DATABASE_URL: &str = "sqlite:///./flight_recorder.db";
/// Default artifact bucket name.
const DEFAULT_ARTIFACT_BUCKET: &str = "artifacts";
/// Default local artifact directory.
const DEFAULT_ARTIFACT_LOCAL_DIR: &str = ".data/artifacts";
/// Default S3 region.
const DEFAULT_S3_REGION: &str = "us-east-1";
/// Default worker poll interval in milliseconds.
const DEFAULT_WORKER_POLL_INTERVAL_MS: u64 = 1_000;
/// Minimum worker poll interval in milliseconds.
pub const MIN_WORKER_POLL_INTERVAL_MS: u64 = 100;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration errors.
///
/// # Invariants
/// - Messages name the offending variable; values are never echoed for
///   secret-bearing variables.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// Integer variable failed to parse.
    #[error("{name} must be an integer, got '{value}'")]
    InvalidInteger {
        /// Variable name.
        name: &'static str,
        /// Offending value.
        value: String,
    },
    /// Artifact store mode is not recognized.
    #[error("ARTIFACT_STORE_MODE must be 'local' or 's3', got '{0}'")]
    InvalidStoreMode(String),
    /// Database URL uses an unsupported scheme.
    #[error("DATABASE_URL must be a sqlite URL or a file path, got '{0}'")]
    UnsupportedDatabase(String),
    /// Auth enabled without a token configured.
    #[error("AUTH_TOKEN must be set when AUTH_ENABLED is true")]
    MissingAuthToken,
}

// ============================================================================
// SECTION: Artifact Store Mode
// ============================================================================

/// Artifact store backend selection.
///
/// # Invariants
/// - Values map 1:1 to `ARTIFACT_STORE_MODE` labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactStoreMode {
    /// Local filesystem directory tree.
    #[default]
    Local,
    /// S3-compatible object storage.
    S3,
}

impl ArtifactStoreMode {
    /// Returns the stable configuration label for the mode.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::S3 => "s3",
        }
    }

    /// Parses a configuration label into a mode (case-insensitive).
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "local" => Some(Self::Local),
            "s3" => Some(Self::S3),
            _ => None,
        }
    }
}

// ============================================================================
// SECTION: Settings
// ============================================================================

/// Typed recorder settings.
///
/// # Invariants
/// - `worker_poll_interval_ms` is already floored at
///   [`MIN_WORKER_POLL_INTERVAL_MS`].
/// - `auth_token` is non-empty whenever `auth_enabled` is true.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// API title advertised by the server.
    pub api_title: String,
    /// API version label advertised by the server.
    pub api_version: String,
    /// Raw database URL.
    pub database_url: String,
    /// Bearer auth enforcement flag.
    pub auth_enabled: bool,
    /// Bearer token accepted when auth is enabled.
    pub auth_token: String,
    /// Artifact bucket name.
    pub artifact_bucket: String,
    /// Artifact store backend selection.
    pub artifact_store_mode: ArtifactStoreMode,
    /// Base directory for the local artifact store.
    pub artifact_local_dir: PathBuf,
    /// Custom S3 endpoint URL, when set.
    pub s3_endpoint: Option<String>,
    /// Static S3 access key, when set.
    pub s3_access_key: Option<String>,
    /// Static S3 secret key, when set.
    pub s3_secret_key: Option<String>,
    /// S3 region.
    pub s3_region: String,
    /// Use TLS for S3 connections.
    pub s3_secure: bool,
    /// Worker idle poll interval in milliseconds.
    pub worker_poll_interval_ms: u64,
    /// Refuse to persist artifact bytes when redaction fails.
    pub redaction_block_on_failure: bool,
}

impl Settings {
    /// Loads settings from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a variable fails validation.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Loads settings from an injectable variable lookup.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a variable fails validation.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let string = |name: &str, default: &str| -> String {
            lookup(name).unwrap_or_else(|| default.to_string())
        };
        let optional = |name: &str| -> Option<String> { lookup(name).filter(|v| !v.is_empty()) };

        let auth_enabled = parse_bool(lookup("AUTH_ENABLED"), false);
        let auth_token = string("AUTH_TOKEN", "");
        if auth_enabled && auth_token.is_empty() {
            return Err(ConfigError::MissingAuthToken);
        }

        let store_mode_raw = string("ARTIFACT_STORE_MODE", ArtifactStoreMode::Local.as_str());
        let artifact_store_mode = ArtifactStoreMode::parse(&store_mode_raw)
            .ok_or_else(|| ConfigError::InvalidStoreMode(store_mode_raw.clone()))?;

        let poll_interval =
            parse_u64("WORKER_POLL_INTERVAL_MS", lookup("WORKER_POLL_INTERVAL_MS"))?
                .unwrap_or(DEFAULT_WORKER_POLL_INTERVAL_MS)
                .max(MIN_WORKER_POLL_INTERVAL_MS);

        let settings = Self {
            api_title: string("API_TITLE", DEFAULT_API_TITLE),
            api_version: string("API_VERSION", DEFAULT_API_VERSION),
            database_url: string("DATABASE_URL", DEFAULT_DATABASE_URL),
            auth_enabled,
            auth_token,
            artifact_bucket: string("ARTIFACT_BUCKET", DEFAULT_ARTIFACT_BUCKET),
            artifact_store_mode,
            artifact_local_dir: PathBuf::from(string(
                "ARTIFACT_LOCAL_DIR",
                DEFAULT_ARTIFACT_LOCAL_DIR,
            )),
            s3_endpoint: optional("S3_ENDPOINT"),
            s3_access_key: optional("S3_ACCESS_KEY"),
            s3_secret_key: optional("S3_SECRET_KEY"),
            s3_region: string("S3_REGION", DEFAULT_S3_REGION),
            s3_secure: parse_bool(lookup("S3_SECURE"), false),
            worker_poll_interval_ms: poll_interval,
            redaction_block_on_failure: parse_bool(lookup("REDACTION_BLOCK_ON_FAILURE"), true),
        };

        settings.sqlite_path()?;
        Ok(settings)
    }

    /// Resolves the SQLite database file path from `database_url`.
    ///
    /// Accepts `sqlite:///<path>`, `sqlite://<path>`, `sqlite:<path>`, or a
    /// bare filesystem path.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnsupportedDatabase`] for non-sqlite URL
    /// schemes.
    pub fn sqlite_path(&self) -> Result<PathBuf, ConfigError> {
        let url = self.database_url.as_str();
        if let Some(rest) = url.strip_prefix("sqlite:///") {
            return Ok(PathBuf::from(rest));
        }
        if let Some(rest) = url.strip_prefix("sqlite://") {
            return Ok(PathBuf::from(rest));
        }
        if let Some(rest) = url.strip_prefix("sqlite:") {
            return Ok(PathBuf::from(rest));
        }
        if url.contains("://") {
            return Err(ConfigError::UnsupportedDatabase(url.to_string()));
        }
        Ok(PathBuf::from(url))
    }
}

// ============================================================================
// SECTION: Parsing Helpers
// ============================================================================

/// Parses a boolean variable; `1`/`true`/`yes`/`on` (case-insensitive) are
/// true, any other present value is false.
fn parse_bool(value: Option<String>, default: bool) -> bool {
    match value {
        None => default,
        Some(raw) => matches!(raw.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
    }
}

/// Parses an integer variable, failing closed on malformed input.
fn parse_u64(name: &'static str, value: Option<String>) -> Result<Option<u64>, ConfigError> {
    match value {
        None => Ok(None),
        Some(raw) => raw.trim().parse::<u64>().map(Some).map_err(|_| {
            ConfigError::InvalidInteger {
                name,
                value: raw,
            }
        }),
    }
}
