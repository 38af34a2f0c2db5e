// crates/flight-recorder-store-sqlite/src/store.rs
// ============================================================================
// Module: SQLite Recorder Store
// Description: Durable RecorderStore backed by SQLite WAL.
// Purpose: Persist runs, steps, events, artifacts, replay sessions, jobs,
//          and audit entries with transactional ingestion.
// Dependencies: flight-recorder-core, rusqlite, serde, serde_json, thiserror
// ============================================================================

//! ## Overview
//! This module implements the durable [`RecorderStore`] on `SQLite`. All
//! mutations run on a single write connection guarded by a mutex, so the
//! per-run ingest transaction (idempotency check, ledger snapshot,
//! validation, step upsert, artifact placeholders, terminal transition) is
//! serialized by construction. Reads go through a round-robin pool of
//! read connections, which WAL keeps consistent under concurrent writes.
//! Job claims transition `pending -> running` inside a write transaction, so
//! at most one worker observes a given job.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use flight_recorder_core::ActorType;
use flight_recorder_core::ArtifactHash;
use flight_recorder_core::ArtifactRecord;
use flight_recorder_core::ArtifactStatus;
use flight_recorder_core::AuditActor;
use flight_recorder_core::AuditId;
use flight_recorder_core::AuditLogRecord;
use flight_recorder_core::CanonicalEvent;
use flight_recorder_core::DEFAULT_HASH_ALGORITHM;
use flight_recorder_core::DEFAULT_JOB_MAX_RETRIES;
use flight_recorder_core::DeterminismMode;
use flight_recorder_core::EventId;
use flight_recorder_core::EventPage;
use flight_recorder_core::EventQuery;
use flight_recorder_core::EventRecord;
use flight_recorder_core::EventType;
use flight_recorder_core::IdempotencyKey;
use flight_recorder_core::IngestOutcome;
use flight_recorder_core::JobId;
use flight_recorder_core::JobRecord;
use flight_recorder_core::JobStatus;
use flight_recorder_core::NewRun;
use flight_recorder_core::RecorderError;
use flight_recorder_core::RecorderStore;
use flight_recorder_core::RedactionStatus;
use flight_recorder_core::ReplayOverrideProfile;
use flight_recorder_core::ReplaySessionId;
use flight_recorder_core::ReplaySessionRecord;
use flight_recorder_core::ReplayStatus;
use flight_recorder_core::RunDetail;
use flight_recorder_core::RunId;
use flight_recorder_core::RunLedgerView;
use flight_recorder_core::RunPage;
use flight_recorder_core::RunQuery;
use flight_recorder_core::RunRecord;
use flight_recorder_core::RunStatus;
use flight_recorder_core::SourceType;
use flight_recorder_core::StepId;
use flight_recorder_core::StepRecord;
use flight_recorder_core::TraceId;
use flight_recorder_core::UtcTimestamp;
use flight_recorder_core::runtime::replay::FAILURE_CANCEL_REQUESTED;
use flight_recorder_core::runtime::replay::REPLAY_EXECUTE_JOB;
use flight_recorder_core::runtime::replay::REPLAY_SESSION_PAYLOAD_KEY;
use flight_recorder_core::validate_event;
use rusqlite::Connection;
use rusqlite::OptionalExtension;
use rusqlite::Transaction;
use rusqlite::params;
use rusqlite::params_from_iter;
use rusqlite::types::Value as SqlValue;
use serde::Deserialize;
use serde_json::Map;
use serde_json::Value;
use serde_json::json;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// `SQLite` schema version for the store.
const SCHEMA_VERSION: i64 = 1;
/// Default busy timeout (ms).
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
/// Default read connection pool size.
const DEFAULT_READ_POOL_SIZE: usize = 4;
/// Maximum job retry exponent for backoff derivation.
const MAX_BACKOFF_EXPONENT: i64 = 6;

/// Column list for run rows.
const RUN_COLUMNS: &str = "run_id, trace_id, app_id, environment, status, source_type, \
                           source_run_id, tags_json, retention_class, legal_hold, started_at, \
                           ended_at";
/// Column list for step rows.
const STEP_COLUMNS: &str =
    "step_id, run_id, parent_step_id, sequence_no, step_type, determinism_mode, started_at, \
     ended_at";
/// Column list for event rows.
const EVENT_COLUMNS: &str = "event_id, run_id, step_id, parent_step_id, event_type, \
                             schema_version, payload_json, redaction_status, idempotency_key, \
                             sequence_no, timestamp, actor_type, determinism_mode, \
                             artifact_pending, created_at";
/// Column list for artifact rows.
const ARTIFACT_COLUMNS: &str = "artifact_hash, artifact_type, byte_size, mime_type, \
                                content_encoding, redaction_profile, storage_bucket, \
                                storage_object_key, retention_class, status, hash_algorithm, \
                                blocked_reason, created_at";
/// Column list for replay session rows.
const SESSION_COLUMNS: &str = "replay_session_id, source_run_id, fork_step_id, \
                               override_profile_json, status, derived_run_id, \
                               failure_reason_code, reason_codes_json, cancel_requested, \
                               started_at, ended_at";
/// Column list for job rows.
const JOB_COLUMNS: &str = "job_id, job_type, payload_json, status, retries, max_retries, \
                           last_error, available_at, created_at, updated_at";

// ============================================================================
// SECTION: Config
// ============================================================================

/// `SQLite` journal mode configuration.
///
/// # Invariants
/// - Values map 1:1 to `SQLite` `journal_mode` pragma settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteJournalMode {
    /// WAL journal mode (recommended).
    #[default]
    Wal,
    /// Delete journal mode (legacy).
    Delete,
}

impl SqliteJournalMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Wal => "wal",
            Self::Delete => "delete",
        }
    }
}

/// `SQLite` sync mode configuration.
///
/// # Invariants
/// - Values map 1:1 to `SQLite` `synchronous` pragma settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteSyncMode {
    /// Full synchronous mode (safest).
    #[default]
    Full,
    /// Normal synchronous mode (balanced).
    Normal,
}

impl SqliteSyncMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Normal => "normal",
        }
    }
}

/// Configuration for the `SQLite` recorder store.
///
/// # Invariants
/// - `path` must resolve to a file path (not a directory).
/// - `busy_timeout_ms` is interpreted as milliseconds.
/// - `read_pool_size` must be greater than zero.
#[derive(Debug, Clone, Deserialize)]
pub struct SqliteStoreConfig {
    /// Path to the `SQLite` database file.
    pub path: PathBuf,
    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// `SQLite` journal mode.
    #[serde(default)]
    pub journal_mode: SqliteJournalMode,
    /// `SQLite` sync mode.
    #[serde(default)]
    pub sync_mode: SqliteSyncMode,
    /// Number of read-only connections used for read path isolation.
    #[serde(default = "default_read_pool_size")]
    pub read_pool_size: usize,
}

impl SqliteStoreConfig {
    /// Builds a configuration with defaults for the provided path.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            journal_mode: SqliteJournalMode::default(),
            sync_mode: SqliteSyncMode::default(),
            read_pool_size: DEFAULT_READ_POOL_SIZE,
        }
    }
}

/// Returns the default busy timeout for `SQLite` connections.
const fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

/// Returns the default read connection pool size.
const fn default_read_pool_size() -> usize {
    DEFAULT_READ_POOL_SIZE
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// `SQLite` store errors.
///
/// # Invariants
/// - Error messages avoid embedding raw payload bytes.
#[derive(Debug, Error, Clone)]
pub enum SqliteStoreError {
    /// Store I/O error.
    #[error("sqlite store io error: {0}")]
    Io(String),
    /// `SQLite` engine error.
    #[error("sqlite store db error: {0}")]
    Db(String),
    /// Store corruption or unparseable stored values.
    #[error("sqlite store corruption: {0}")]
    Corrupt(String),
    /// Store schema version mismatch.
    #[error("sqlite store version mismatch: {0}")]
    VersionMismatch(String),
    /// Invalid store configuration.
    #[error("sqlite store invalid data: {0}")]
    Invalid(String),
}

impl From<SqliteStoreError> for RecorderError {
    fn from(error: SqliteStoreError) -> Self {
        match error {
            SqliteStoreError::Io(message) | SqliteStoreError::Db(message) => {
                Self::Unavailable(message)
            }
            SqliteStoreError::Corrupt(message)
            | SqliteStoreError::VersionMismatch(message)
            | SqliteStoreError::Invalid(message) => Self::Internal(message),
        }
    }
}

/// Maps a rusqlite error to a retryable store error.
fn db_err(err: &rusqlite::Error) -> RecorderError {
    RecorderError::Unavailable(format!("sqlite store db error: {err}"))
}

/// Returns true when a rusqlite error is a uniqueness/constraint violation.
fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

/// Maps a corrupt stored value to an internal error.
fn corrupt(what: &str, value: &str) -> RecorderError {
    RecorderError::Internal(format!("sqlite store corruption: bad {what} '{value}'"))
}

// ============================================================================
// SECTION: Store
// ============================================================================

/// `SQLite`-backed recorder store with WAL support.
///
/// # Invariants
/// - All mutations are serialized through one guarded write connection.
/// - Reads use a round-robin pool of read connections.
#[derive(Clone)]
pub struct SqliteRecorderStore {
    /// Shared writer connection guarded by a mutex.
    write_connection: Arc<Mutex<Connection>>,
    /// Read connection pool used for read path isolation under WAL.
    read_connections: Arc<Vec<Mutex<Connection>>>,
    /// Round-robin cursor for read connection selection.
    read_cursor: Arc<AtomicUsize>,
}

impl SqliteRecorderStore {
    /// Opens a `SQLite`-backed recorder store.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the database cannot be opened or
    /// initialized.
    pub fn open(config: &SqliteStoreConfig) -> Result<Self, SqliteStoreError> {
        if config.read_pool_size == 0 {
            return Err(SqliteStoreError::Invalid(
                "read_pool_size must be greater than zero".to_string(),
            ));
        }
        ensure_parent_dir(&config.path)?;
        let mut write_connection = open_connection(config)?;
        initialize_schema(&mut write_connection)?;
        let mut read_connections = Vec::with_capacity(config.read_pool_size);
        for _ in 0 .. config.read_pool_size {
            read_connections.push(Mutex::new(open_connection(config)?));
        }
        Ok(Self {
            write_connection: Arc::new(Mutex::new(write_connection)),
            read_connections: Arc::new(read_connections),
            read_cursor: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Locks the write connection.
    fn write(&self) -> Result<MutexGuard<'_, Connection>, RecorderError> {
        self.write_connection
            .lock()
            .map_err(|_| RecorderError::Internal("sqlite write mutex poisoned".to_string()))
    }

    /// Locks the next read connection in round-robin order.
    fn read(&self) -> Result<MutexGuard<'_, Connection>, RecorderError> {
        let index = self.read_cursor.fetch_add(1, Ordering::Relaxed) % self.read_connections.len();
        self.read_connections
            .get(index)
            .ok_or_else(|| RecorderError::Internal("read pool index out of range".to_string()))?
            .lock()
            .map_err(|_| RecorderError::Internal("sqlite read mutex poisoned".to_string()))
    }
}

// ============================================================================
// SECTION: Connection Setup
// ============================================================================

/// Creates the parent directory of the database file when missing.
fn ensure_parent_dir(path: &Path) -> Result<(), SqliteStoreError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(|err| SqliteStoreError::Io(err.to_string()))?;
    }
    Ok(())
}

/// Opens a connection with the configured pragmas applied.
fn open_connection(config: &SqliteStoreConfig) -> Result<Connection, SqliteStoreError> {
    let connection =
        Connection::open(&config.path).map_err(|err| SqliteStoreError::Io(err.to_string()))?;
    apply_pragmas(&connection, config)?;
    Ok(connection)
}

/// Applies `SQLite` pragmas required for durability.
fn apply_pragmas(
    connection: &Connection,
    config: &SqliteStoreConfig,
) -> Result<(), SqliteStoreError> {
    connection
        .execute_batch("PRAGMA foreign_keys = ON;")
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    connection
        .execute_batch(&format!("PRAGMA journal_mode = {};", config.journal_mode.pragma_value()))
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    connection
        .execute_batch(&format!("PRAGMA synchronous = {};", config.sync_mode.pragma_value()))
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    connection
        .busy_timeout(std::time::Duration::from_millis(config.busy_timeout_ms))
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    Ok(())
}

/// Initializes the `SQLite` schema or validates the existing version.
fn initialize_schema(connection: &mut Connection) -> Result<(), SqliteStoreError> {
    let tx = connection.transaction().map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    tx.execute_batch("CREATE TABLE IF NOT EXISTS store_meta (version INTEGER NOT NULL);")
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    let version: Option<i64> = tx
        .query_row("SELECT version FROM store_meta LIMIT 1", params![], |row| row.get(0))
        .optional()
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    match version {
        None => {
            tx.execute("INSERT INTO store_meta (version) VALUES (?1)", params![SCHEMA_VERSION])
                .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
            tx.execute_batch(
                "CREATE TABLE IF NOT EXISTS runs (
                    run_id TEXT PRIMARY KEY,
                    trace_id TEXT NOT NULL,
                    app_id TEXT NOT NULL,
                    environment TEXT NOT NULL,
                    status TEXT NOT NULL,
                    source_type TEXT NOT NULL,
                    source_run_id TEXT,
                    tags_json TEXT NOT NULL,
                    retention_class TEXT NOT NULL,
                    legal_hold INTEGER NOT NULL DEFAULT 0,
                    started_at INTEGER NOT NULL,
                    ended_at INTEGER
                );
                CREATE INDEX IF NOT EXISTS idx_runs_started_at ON runs (started_at);
                CREATE INDEX IF NOT EXISTS idx_runs_app_id ON runs (app_id);
                CREATE INDEX IF NOT EXISTS idx_runs_status ON runs (status);
                CREATE TABLE IF NOT EXISTS steps (
                    step_id TEXT PRIMARY KEY,
                    run_id TEXT NOT NULL REFERENCES runs(run_id),
                    parent_step_id TEXT,
                    sequence_no INTEGER NOT NULL,
                    step_type TEXT NOT NULL,
                    determinism_mode TEXT NOT NULL,
                    started_at INTEGER NOT NULL,
                    ended_at INTEGER,
                    UNIQUE (run_id, sequence_no)
                );
                CREATE TABLE IF NOT EXISTS events (
                    event_id TEXT PRIMARY KEY,
                    run_id TEXT NOT NULL REFERENCES runs(run_id),
                    step_id TEXT NOT NULL REFERENCES steps(step_id),
                    parent_step_id TEXT,
                    event_type TEXT NOT NULL,
                    schema_version TEXT NOT NULL,
                    payload_json TEXT NOT NULL,
                    redaction_status TEXT NOT NULL,
                    idempotency_key TEXT NOT NULL UNIQUE,
                    sequence_no INTEGER NOT NULL,
                    timestamp INTEGER NOT NULL,
                    actor_type TEXT NOT NULL,
                    determinism_mode TEXT NOT NULL,
                    artifact_pending INTEGER NOT NULL DEFAULT 0,
                    created_at INTEGER NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_events_run_sequence
                    ON events (run_id, sequence_no);
                CREATE INDEX IF NOT EXISTS idx_events_event_type ON events (event_type);
                CREATE TABLE IF NOT EXISTS artifacts (
                    artifact_hash TEXT PRIMARY KEY,
                    artifact_type TEXT NOT NULL,
                    byte_size INTEGER NOT NULL,
                    mime_type TEXT NOT NULL,
                    content_encoding TEXT NOT NULL,
                    redaction_profile TEXT NOT NULL,
                    storage_bucket TEXT NOT NULL,
                    storage_object_key TEXT NOT NULL,
                    retention_class TEXT NOT NULL,
                    status TEXT NOT NULL,
                    hash_algorithm TEXT NOT NULL,
                    blocked_reason TEXT,
                    created_at INTEGER NOT NULL
                );
                CREATE TABLE IF NOT EXISTS event_artifacts (
                    event_id TEXT NOT NULL REFERENCES events(event_id),
                    artifact_hash TEXT NOT NULL REFERENCES artifacts(artifact_hash),
                    reference_role TEXT NOT NULL,
                    PRIMARY KEY (event_id, artifact_hash, reference_role)
                );
                CREATE TABLE IF NOT EXISTS replay_sessions (
                    replay_session_id TEXT PRIMARY KEY,
                    source_run_id TEXT NOT NULL REFERENCES runs(run_id),
                    fork_step_id TEXT,
                    override_profile_json TEXT NOT NULL,
                    status TEXT NOT NULL,
                    derived_run_id TEXT,
                    failure_reason_code TEXT,
                    reason_codes_json TEXT NOT NULL,
                    cancel_requested INTEGER NOT NULL DEFAULT 0,
                    started_at INTEGER NOT NULL,
                    ended_at INTEGER
                );
                CREATE INDEX IF NOT EXISTS idx_replay_sessions_source
                    ON replay_sessions (source_run_id);
                CREATE TABLE IF NOT EXISTS jobs (
                    job_id INTEGER PRIMARY KEY AUTOINCREMENT,
                    job_type TEXT NOT NULL,
                    payload_json TEXT NOT NULL,
                    status TEXT NOT NULL,
                    retries INTEGER NOT NULL DEFAULT 0,
                    max_retries INTEGER NOT NULL,
                    last_error TEXT,
                    available_at INTEGER NOT NULL,
                    created_at INTEGER NOT NULL,
                    updated_at INTEGER NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_jobs_claim
                    ON jobs (status, available_at, created_at);
                CREATE TABLE IF NOT EXISTS audit_log (
                    audit_id TEXT PRIMARY KEY,
                    actor_id TEXT NOT NULL,
                    actor_type TEXT NOT NULL,
                    action TEXT NOT NULL,
                    target_type TEXT NOT NULL,
                    target_id TEXT NOT NULL,
                    timestamp INTEGER NOT NULL,
                    details_json TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_audit_log_action ON audit_log (action);",
            )
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        }
        Some(value) if value == SCHEMA_VERSION => {}
        Some(value) => {
            return Err(SqliteStoreError::VersionMismatch(format!(
                "unsupported schema version: {value}"
            )));
        }
    }
    tx.commit().map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    Ok(())
}

// ============================================================================
// SECTION: Value Mapping Helpers
// ============================================================================

/// Serializes a JSON map column.
fn map_to_json(map: &Map<String, Value>) -> Result<String, RecorderError> {
    serde_json::to_string(map).map_err(|err| RecorderError::Internal(err.to_string()))
}

/// Parses a JSON map column.
fn json_to_map(raw: &str) -> Result<Map<String, Value>, RecorderError> {
    serde_json::from_str(raw).map_err(|_| corrupt("json object column", raw))
}

/// Parses a JSON string-array column.
fn json_to_string_vec(raw: &str) -> Result<Vec<String>, RecorderError> {
    serde_json::from_str(raw).map_err(|_| corrupt("json array column", raw))
}

/// Converts a stored millisecond value into a timestamp.
fn millis_to_ts(millis: i64) -> Result<UtcTimestamp, RecorderError> {
    UtcTimestamp::from_unix_millis(millis)
        .map_err(|_| corrupt("timestamp column", &millis.to_string()))
}

/// Converts an optional stored millisecond value into a timestamp.
fn opt_millis_to_ts(millis: Option<i64>) -> Result<Option<UtcTimestamp>, RecorderError> {
    millis.map(millis_to_ts).transpose()
}

/// Maps a run row into a record.
fn run_from_row(row: &rusqlite::Row<'_>) -> Result<RunRecord, RecorderError> {
    let status_raw: String = row.get(4).map_err(|err| db_err(&err))?;
    let source_type_raw: String = row.get(5).map_err(|err| db_err(&err))?;
    let tags_raw: String = row.get(7).map_err(|err| db_err(&err))?;
    Ok(RunRecord {
        run_id: RunId::new(row.get::<_, String>(0).map_err(|err| db_err(&err))?),
        trace_id: TraceId::new(row.get::<_, String>(1).map_err(|err| db_err(&err))?),
        app_id: row.get(2).map_err(|err| db_err(&err))?,
        environment: row.get(3).map_err(|err| db_err(&err))?,
        status: RunStatus::parse(&status_raw).ok_or_else(|| corrupt("run status", &status_raw))?,
        source_type: SourceType::parse(&source_type_raw)
            .ok_or_else(|| corrupt("source type", &source_type_raw))?,
        source_run_id: row
            .get::<_, Option<String>>(6)
            .map_err(|err| db_err(&err))?
            .map(RunId::new),
        tags: json_to_map(&tags_raw)?,
        retention_class: row.get(8).map_err(|err| db_err(&err))?,
        legal_hold: row.get(9).map_err(|err| db_err(&err))?,
        started_at: millis_to_ts(row.get(10).map_err(|err| db_err(&err))?)?,
        ended_at: opt_millis_to_ts(row.get(11).map_err(|err| db_err(&err))?)?,
    })
}

/// Maps a step row into a record.
fn step_from_row(row: &rusqlite::Row<'_>) -> Result<StepRecord, RecorderError> {
    let step_type_raw: String = row.get(4).map_err(|err| db_err(&err))?;
    let mode_raw: String = row.get(5).map_err(|err| db_err(&err))?;
    Ok(StepRecord {
        step_id: StepId::new(row.get::<_, String>(0).map_err(|err| db_err(&err))?),
        run_id: RunId::new(row.get::<_, String>(1).map_err(|err| db_err(&err))?),
        parent_step_id: row
            .get::<_, Option<String>>(2)
            .map_err(|err| db_err(&err))?
            .map(StepId::new),
        sequence_no: row.get(3).map_err(|err| db_err(&err))?,
        step_type: EventType::parse(&step_type_raw)
            .ok_or_else(|| corrupt("step type", &step_type_raw))?,
        determinism_mode: DeterminismMode::parse(&mode_raw)
            .ok_or_else(|| corrupt("determinism mode", &mode_raw))?,
        started_at: millis_to_ts(row.get(6).map_err(|err| db_err(&err))?)?,
        ended_at: opt_millis_to_ts(row.get(7).map_err(|err| db_err(&err))?)?,
    })
}

/// Maps an event row into a record.
fn event_from_row(row: &rusqlite::Row<'_>) -> Result<EventRecord, RecorderError> {
    let event_type_raw: String = row.get(4).map_err(|err| db_err(&err))?;
    let payload_raw: String = row.get(6).map_err(|err| db_err(&err))?;
    let redaction_raw: String = row.get(7).map_err(|err| db_err(&err))?;
    let actor_raw: String = row.get(11).map_err(|err| db_err(&err))?;
    let mode_raw: String = row.get(12).map_err(|err| db_err(&err))?;
    Ok(EventRecord {
        event_id: EventId::new(row.get::<_, String>(0).map_err(|err| db_err(&err))?),
        run_id: RunId::new(row.get::<_, String>(1).map_err(|err| db_err(&err))?),
        step_id: StepId::new(row.get::<_, String>(2).map_err(|err| db_err(&err))?),
        parent_step_id: row
            .get::<_, Option<String>>(3)
            .map_err(|err| db_err(&err))?
            .map(StepId::new),
        event_type: EventType::parse(&event_type_raw)
            .ok_or_else(|| corrupt("event type", &event_type_raw))?,
        schema_version: row.get(5).map_err(|err| db_err(&err))?,
        payload: json_to_map(&payload_raw)?,
        redaction_status: RedactionStatus::parse(&redaction_raw)
            .ok_or_else(|| corrupt("redaction status", &redaction_raw))?,
        idempotency_key: IdempotencyKey::new(
            row.get::<_, String>(8).map_err(|err| db_err(&err))?,
        ),
        sequence_no: row.get(9).map_err(|err| db_err(&err))?,
        timestamp: millis_to_ts(row.get(10).map_err(|err| db_err(&err))?)?,
        actor_type: ActorType::parse(&actor_raw)
            .ok_or_else(|| corrupt("actor type", &actor_raw))?,
        determinism_mode: DeterminismMode::parse(&mode_raw)
            .ok_or_else(|| corrupt("determinism mode", &mode_raw))?,
        artifact_pending: row.get(13).map_err(|err| db_err(&err))?,
        created_at: millis_to_ts(row.get(14).map_err(|err| db_err(&err))?)?,
    })
}

/// Maps an artifact row into a record.
fn artifact_from_row(row: &rusqlite::Row<'_>) -> Result<ArtifactRecord, RecorderError> {
    let status_raw: String = row.get(9).map_err(|err| db_err(&err))?;
    Ok(ArtifactRecord {
        artifact_hash: ArtifactHash::new(row.get::<_, String>(0).map_err(|err| db_err(&err))?),
        artifact_type: row.get(1).map_err(|err| db_err(&err))?,
        byte_size: row.get(2).map_err(|err| db_err(&err))?,
        mime_type: row.get(3).map_err(|err| db_err(&err))?,
        content_encoding: row.get(4).map_err(|err| db_err(&err))?,
        redaction_profile: row.get(5).map_err(|err| db_err(&err))?,
        storage_bucket: row.get(6).map_err(|err| db_err(&err))?,
        storage_object_key: row.get(7).map_err(|err| db_err(&err))?,
        retention_class: row.get(8).map_err(|err| db_err(&err))?,
        status: ArtifactStatus::parse(&status_raw)
            .ok_or_else(|| corrupt("artifact status", &status_raw))?,
        hash_algorithm: row.get(10).map_err(|err| db_err(&err))?,
        blocked_reason: row.get(11).map_err(|err| db_err(&err))?,
        created_at: millis_to_ts(row.get(12).map_err(|err| db_err(&err))?)?,
    })
}

/// Maps a replay session row into a record.
fn session_from_row(row: &rusqlite::Row<'_>) -> Result<ReplaySessionRecord, RecorderError> {
    let profile_raw: String = row.get(3).map_err(|err| db_err(&err))?;
    let status_raw: String = row.get(4).map_err(|err| db_err(&err))?;
    let codes_raw: String = row.get(7).map_err(|err| db_err(&err))?;
    let override_profile: ReplayOverrideProfile =
        serde_json::from_str(&profile_raw).map_err(|_| corrupt("override profile", &profile_raw))?;
    Ok(ReplaySessionRecord {
        replay_session_id: ReplaySessionId::new(
            row.get::<_, String>(0).map_err(|err| db_err(&err))?,
        ),
        source_run_id: RunId::new(row.get::<_, String>(1).map_err(|err| db_err(&err))?),
        fork_step_id: row
            .get::<_, Option<String>>(2)
            .map_err(|err| db_err(&err))?
            .map(StepId::new),
        override_profile,
        status: ReplayStatus::parse(&status_raw)
            .ok_or_else(|| corrupt("replay status", &status_raw))?,
        derived_run_id: row
            .get::<_, Option<String>>(5)
            .map_err(|err| db_err(&err))?
            .map(RunId::new),
        failure_reason_code: row.get(6).map_err(|err| db_err(&err))?,
        reason_codes: json_to_string_vec(&codes_raw)?,
        cancel_requested: row.get(8).map_err(|err| db_err(&err))?,
        started_at: millis_to_ts(row.get(9).map_err(|err| db_err(&err))?)?,
        ended_at: opt_millis_to_ts(row.get(10).map_err(|err| db_err(&err))?)?,
    })
}

/// Maps a job row into a record.
fn job_from_row(row: &rusqlite::Row<'_>) -> Result<JobRecord, RecorderError> {
    let payload_raw: String = row.get(2).map_err(|err| db_err(&err))?;
    let status_raw: String = row.get(3).map_err(|err| db_err(&err))?;
    Ok(JobRecord {
        job_id: JobId::new(row.get(0).map_err(|err| db_err(&err))?),
        job_type: row.get(1).map_err(|err| db_err(&err))?,
        payload: json_to_map(&payload_raw)?,
        status: JobStatus::parse(&status_raw)
            .ok_or_else(|| corrupt("job status", &status_raw))?,
        retries: row.get(4).map_err(|err| db_err(&err))?,
        max_retries: row.get(5).map_err(|err| db_err(&err))?,
        last_error: row.get(6).map_err(|err| db_err(&err))?,
        available_at: millis_to_ts(row.get(7).map_err(|err| db_err(&err))?)?,
        created_at: millis_to_ts(row.get(8).map_err(|err| db_err(&err))?)?,
        updated_at: millis_to_ts(row.get(9).map_err(|err| db_err(&err))?)?,
    })
}

// ============================================================================
// SECTION: Transaction Helpers
// ============================================================================

/// Loads a run row inside a transaction.
fn tx_get_run(tx: &Transaction<'_>, run_id: &RunId) -> Result<Option<RunRecord>, RecorderError> {
    tx.query_row(
        &format!("SELECT {RUN_COLUMNS} FROM runs WHERE run_id = ?1"),
        params![run_id.as_str()],
        |row| Ok(run_from_row(row)),
    )
    .optional()
    .map_err(|err| db_err(&err))?
    .transpose()
}

/// Loads an event by idempotency key inside a transaction.
fn tx_get_event_by_key(
    tx: &Transaction<'_>,
    key: &IdempotencyKey,
) -> Result<Option<EventRecord>, RecorderError> {
    tx.query_row(
        &format!("SELECT {EVENT_COLUMNS} FROM events WHERE idempotency_key = ?1"),
        params![key.as_str()],
        |row| Ok(event_from_row(row)),
    )
    .optional()
    .map_err(|err| db_err(&err))?
    .transpose()
}

/// Gathers the validation ledger snapshot for a run inside a transaction.
fn tx_ledger_view(
    tx: &Transaction<'_>,
    run_id: &RunId,
    event: &CanonicalEvent,
) -> Result<RunLedgerView, RecorderError> {
    let max_sequence_no: Option<i64> = tx
        .query_row(
            "SELECT MAX(sequence_no) FROM events WHERE run_id = ?1",
            params![run_id.as_str()],
            |row| row.get(0),
        )
        .map_err(|err| db_err(&err))?;

    let terminal_count: i64 = tx
        .query_row(
            "SELECT COUNT(*) FROM events WHERE run_id = ?1 AND event_type IN (?2, ?3)",
            params![
                run_id.as_str(),
                EventType::RunCompleted.as_str(),
                EventType::RunFailed.as_str()
            ],
            |row| row.get(0),
        )
        .map_err(|err| db_err(&err))?;

    let causal_precedent_present = match EventType::parse(&event.event_type)
        .and_then(EventType::required_precedent)
    {
        None => true,
        Some(precedent) => {
            let count: i64 = tx
                .query_row(
                    "SELECT COUNT(*) FROM events WHERE run_id = ?1 AND event_type = ?2 AND \
                     step_id = ?3 AND sequence_no < ?4",
                    params![
                        run_id.as_str(),
                        precedent.as_str(),
                        event.step_id.as_str(),
                        event.sequence_no
                    ],
                    |row| row.get(0),
                )
                .map_err(|err| db_err(&err))?;
            count > 0
        }
    };

    Ok(RunLedgerView {
        max_sequence_no,
        has_terminal_event: terminal_count > 0,
        causal_precedent_present,
    })
}

/// Upserts the step referenced by an event inside the ingest transaction.
fn tx_upsert_step(
    tx: &Transaction<'_>,
    event: &CanonicalEvent,
    step_type: EventType,
) -> Result<(), RecorderError> {
    let existing: Option<(i64,)> = tx
        .query_row(
            "SELECT sequence_no FROM steps WHERE step_id = ?1",
            params![event.step_id.as_str()],
            |row| Ok((row.get(0)?,)),
        )
        .optional()
        .map_err(|err| db_err(&err))?;

    match existing {
        None => {
            tx.execute(
                "INSERT INTO steps (step_id, run_id, parent_step_id, sequence_no, step_type, \
                 determinism_mode, started_at, ended_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, \
                 NULL)",
                params![
                    event.step_id.as_str(),
                    event.run_id.as_str(),
                    event.parent_step_id.as_ref().map(StepId::as_str),
                    event.sequence_no,
                    step_type.as_str(),
                    event.determinism_mode.as_str(),
                    event.timestamp.unix_millis()
                ],
            )
            .map_err(|err| db_err(&err))?;
        }
        Some((stored_sequence,)) => {
            let sequence = stored_sequence.min(event.sequence_no);
            tx.execute(
                "UPDATE steps SET sequence_no = ?2, ended_at = ?3, determinism_mode = ?4 WHERE \
                 step_id = ?1",
                params![
                    event.step_id.as_str(),
                    sequence,
                    event.timestamp.unix_millis(),
                    event.determinism_mode.as_str()
                ],
            )
            .map_err(|err| db_err(&err))?;
        }
    }
    Ok(())
}

/// Inserts an event row inside a transaction.
fn tx_insert_event(tx: &Transaction<'_>, record: &EventRecord) -> Result<(), RecorderError> {
    let payload_json = map_to_json(&record.payload)?;
    tx.execute(
        &format!(
            "INSERT INTO events ({EVENT_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, \
             ?10, ?11, ?12, ?13, ?14, ?15)"
        ),
        params![
            record.event_id.as_str(),
            record.run_id.as_str(),
            record.step_id.as_str(),
            record.parent_step_id.as_ref().map(StepId::as_str),
            record.event_type.as_str(),
            record.schema_version,
            payload_json,
            record.redaction_status.as_str(),
            record.idempotency_key.as_str(),
            record.sequence_no,
            record.timestamp.unix_millis(),
            record.actor_type.as_str(),
            record.determinism_mode.as_str(),
            record.artifact_pending,
            record.created_at.unix_millis()
        ],
    )
    .map_err(|err| {
        if is_constraint_violation(&err) {
            RecorderError::conflict(
                "idempotency_key already recorded",
                json!({ "idempotency_key": record.idempotency_key.as_str() }),
            )
        } else {
            db_err(&err)
        }
    })?;
    Ok(())
}

/// Inserts an artifact row inside a transaction unless one exists.
///
/// Returns true when a new row was inserted.
fn tx_insert_artifact_if_absent(
    tx: &Transaction<'_>,
    artifact: &ArtifactRecord,
) -> Result<bool, RecorderError> {
    let inserted = tx
        .execute(
            &format!(
                "INSERT OR IGNORE INTO artifacts ({ARTIFACT_COLUMNS}) VALUES (?1, ?2, ?3, ?4, \
                 ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"
            ),
            params![
                artifact.artifact_hash.as_str(),
                artifact.artifact_type,
                artifact.byte_size,
                artifact.mime_type,
                artifact.content_encoding,
                artifact.redaction_profile,
                artifact.storage_bucket,
                artifact.storage_object_key,
                artifact.retention_class,
                artifact.status.as_str(),
                artifact.hash_algorithm,
                artifact.blocked_reason,
                artifact.created_at.unix_millis()
            ],
        )
        .map_err(|err| db_err(&err))?;
    Ok(inserted > 0)
}

/// Inserts a job row inside a transaction.
fn tx_enqueue_job(
    tx: &Transaction<'_>,
    job_type: &str,
    payload: &Map<String, Value>,
    now: UtcTimestamp,
) -> Result<i64, RecorderError> {
    let payload_json = map_to_json(payload)?;
    tx.execute(
        "INSERT INTO jobs (job_type, payload_json, status, retries, max_retries, last_error, \
         available_at, created_at, updated_at) VALUES (?1, ?2, ?3, 0, ?4, NULL, ?5, ?5, ?5)",
        params![
            job_type,
            payload_json,
            JobStatus::Pending.as_str(),
            DEFAULT_JOB_MAX_RETRIES,
            now.unix_millis()
        ],
    )
    .map_err(|err| db_err(&err))?;
    Ok(tx.last_insert_rowid())
}

/// Inserts an audit row inside a transaction.
fn tx_append_audit(tx: &Transaction<'_>, entry: &AuditLogRecord) -> Result<(), RecorderError> {
    let details_json = map_to_json(&entry.details)?;
    tx.execute(
        "INSERT INTO audit_log (audit_id, actor_id, actor_type, action, target_type, target_id, \
         timestamp, details_json) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            entry.audit_id.as_str(),
            entry.actor_id,
            entry.actor_type,
            entry.action,
            entry.target_type,
            entry.target_id,
            entry.timestamp.unix_millis(),
            details_json
        ],
    )
    .map_err(|err| db_err(&err))?;
    Ok(())
}

/// Loads a replay session row inside a transaction.
fn tx_get_session(
    tx: &Transaction<'_>,
    session_id: &ReplaySessionId,
) -> Result<Option<ReplaySessionRecord>, RecorderError> {
    tx.query_row(
        &format!(
            "SELECT {SESSION_COLUMNS} FROM replay_sessions WHERE replay_session_id = ?1"
        ),
        params![session_id.as_str()],
        |row| Ok(session_from_row(row)),
    )
    .optional()
    .map_err(|err| db_err(&err))?
    .transpose()
}

/// Computes the retry backoff in seconds for a failed job.
fn retry_backoff_seconds(retries: i64) -> i64 {
    1_i64 << retries.clamp(0, MAX_BACKOFF_EXPONENT)
}

// ============================================================================
// SECTION: RecorderStore Implementation
// ============================================================================

impl RecorderStore for SqliteRecorderStore {
    fn create_run(&self, new_run: NewRun) -> Result<RunRecord, RecorderError> {
        let run = RunRecord {
            run_id: RunId::generate(),
            trace_id: TraceId::generate(),
            app_id: new_run.app_id,
            environment: new_run.environment,
            status: RunStatus::Running,
            source_type: new_run.source_type,
            source_run_id: new_run.source_run_id,
            tags: new_run.tags,
            retention_class: new_run.retention_class,
            legal_hold: false,
            started_at: UtcTimestamp::now(),
            ended_at: None,
        };
        let tags_json = map_to_json(&run.tags)?;
        let connection = self.write()?;
        connection
            .execute(
                &format!(
                    "INSERT INTO runs ({RUN_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, \
                     ?9, ?10, ?11, NULL)"
                ),
                params![
                    run.run_id.as_str(),
                    run.trace_id.as_str(),
                    run.app_id,
                    run.environment,
                    run.status.as_str(),
                    run.source_type.as_str(),
                    run.source_run_id.as_ref().map(RunId::as_str),
                    tags_json,
                    run.retention_class,
                    run.legal_hold,
                    run.started_at.unix_millis()
                ],
            )
            .map_err(|err| db_err(&err))?;
        Ok(run)
    }

    fn get_run(&self, run_id: &RunId) -> Result<Option<RunRecord>, RecorderError> {
        let connection = self.read()?;
        connection
            .query_row(
                &format!("SELECT {RUN_COLUMNS} FROM runs WHERE run_id = ?1"),
                params![run_id.as_str()],
                |row| Ok(run_from_row(row)),
            )
            .optional()
            .map_err(|err| db_err(&err))?
            .transpose()
    }

    fn finalize_run(&self, run_id: &RunId, status: RunStatus) -> Result<RunRecord, RecorderError> {
        if !status.is_terminal() {
            return Err(RecorderError::validation(
                "final_status must be 'success' or 'failed'",
                json!({ "final_status": status.as_str() }),
            ));
        }
        let mut connection = self.write()?;
        let tx = connection.transaction().map_err(|err| db_err(&err))?;
        let Some(mut run) = tx_get_run(&tx, run_id)? else {
            return Err(RecorderError::not_found(
                "Run not found",
                json!({ "run_id": run_id.as_str() }),
            ));
        };
        let ended_at = UtcTimestamp::now();
        tx.execute(
            "UPDATE runs SET status = ?2, ended_at = ?3 WHERE run_id = ?1",
            params![run_id.as_str(), status.as_str(), ended_at.unix_millis()],
        )
        .map_err(|err| db_err(&err))?;
        tx.commit().map_err(|err| db_err(&err))?;
        run.status = status;
        run.ended_at = Some(ended_at);
        Ok(run)
    }

    fn ingest_event(
        &self,
        run_id: &RunId,
        idempotency_key: &IdempotencyKey,
        event: CanonicalEvent,
    ) -> Result<IngestOutcome, RecorderError> {
        let mut connection = self.write()?;
        let tx = connection.transaction().map_err(|err| db_err(&err))?;

        if let Some(existing) = tx_get_event_by_key(&tx, idempotency_key)? {
            return Ok(IngestOutcome {
                event: existing,
                accepted: false,
                warnings: Vec::new(),
            });
        }

        let Some(run) = tx_get_run(&tx, run_id)? else {
            return Err(RecorderError::not_found(
                "Run not found",
                json!({ "run_id": run_id.as_str() }),
            ));
        };

        let ledger = tx_ledger_view(&tx, run_id, &event)?;
        let validated = validate_event(&run, &event, &ledger)?;

        tx_upsert_step(&tx, &event, validated.event_type)?;

        let now = UtcTimestamp::now();
        let mut record = EventRecord {
            event_id: EventId::generate(),
            run_id: event.run_id.clone(),
            step_id: event.step_id.clone(),
            parent_step_id: event.parent_step_id.clone(),
            event_type: validated.event_type,
            schema_version: event.schema_version.clone(),
            payload: event.payload.clone(),
            redaction_status: event.redaction_status,
            idempotency_key: idempotency_key.clone(),
            sequence_no: event.sequence_no,
            timestamp: event.timestamp,
            actor_type: event.actor_type,
            determinism_mode: event.determinism_mode,
            artifact_pending: false,
            created_at: now,
        };

        for artifact_ref in &event.artifact_refs {
            let placeholder = ArtifactRecord {
                artifact_hash: artifact_ref.artifact_hash.clone(),
                artifact_type: artifact_ref.artifact_type.clone(),
                byte_size: artifact_ref.byte_size,
                mime_type: artifact_ref.mime_type.clone(),
                content_encoding: artifact_ref.content_encoding.clone(),
                redaction_profile: artifact_ref.redaction_profile.clone(),
                storage_bucket: "pending".to_string(),
                storage_object_key: "pending".to_string(),
                retention_class: run.retention_class.clone(),
                status: ArtifactStatus::Pending,
                hash_algorithm: DEFAULT_HASH_ALGORITHM.as_str().to_string(),
                blocked_reason: None,
                created_at: now,
            };
            if tx_insert_artifact_if_absent(&tx, &placeholder)? {
                record.artifact_pending = true;
            }
        }

        tx_insert_event(&tx, &record)?;

        for artifact_ref in &event.artifact_refs {
            tx.execute(
                "INSERT OR IGNORE INTO event_artifacts (event_id, artifact_hash, \
                 reference_role) VALUES (?1, ?2, ?3)",
                params![
                    record.event_id.as_str(),
                    artifact_ref.artifact_hash.as_str(),
                    artifact_ref.artifact_type
                ],
            )
            .map_err(|err| db_err(&err))?;
        }

        if validated.event_type.is_terminal() {
            let run_status = if validated.event_type == EventType::RunCompleted {
                RunStatus::Success
            } else {
                RunStatus::Failed
            };
            tx.execute(
                "UPDATE runs SET status = ?2, ended_at = ?3 WHERE run_id = ?1",
                params![
                    run_id.as_str(),
                    run_status.as_str(),
                    UtcTimestamp::now().unix_millis()
                ],
            )
            .map_err(|err| db_err(&err))?;
        }

        tx.commit().map_err(|err| db_err(&err))?;
        Ok(IngestOutcome {
            event: record,
            accepted: true,
            warnings: validated.warnings,
        })
    }

    fn list_runs(&self, query: &RunQuery) -> Result<RunPage, RecorderError> {
        let mut sql = format!("SELECT {RUN_COLUMNS} FROM runs");
        let mut clauses: Vec<&str> = Vec::new();
        let mut values: Vec<SqlValue> = Vec::new();

        if let Some(app_id) = &query.app_id {
            clauses.push("app_id = ?");
            values.push(SqlValue::Text(app_id.clone()));
        }
        if let Some(environment) = &query.environment {
            clauses.push("environment = ?");
            values.push(SqlValue::Text(environment.clone()));
        }
        if let Some(status) = query.status {
            clauses.push("status = ?");
            values.push(SqlValue::Text(status.as_str().to_string()));
        }
        if let Some(source_type) = query.source_type {
            clauses.push("source_type = ?");
            values.push(SqlValue::Text(source_type.as_str().to_string()));
        }
        if let Some(from_utc) = query.from_utc {
            clauses.push("started_at >= ?");
            values.push(SqlValue::Integer(from_utc.unix_millis()));
        }
        if let Some(to_utc) = query.to_utc {
            clauses.push("started_at <= ?");
            values.push(SqlValue::Integer(to_utc.unix_millis()));
        }
        if let Some(cursor) = query.page_token {
            clauses.push("started_at < ?");
            values.push(SqlValue::Integer(cursor.unix_millis()));
        }

        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        let page_size = query.clamped_page_size();
        sql.push_str(" ORDER BY started_at DESC LIMIT ?");
        values.push(SqlValue::Integer(page_size.saturating_add(1)));

        let connection = self.read()?;
        let mut statement = connection.prepare(&sql).map_err(|err| db_err(&err))?;
        let mapped = statement
            .query_map(params_from_iter(values), |row| Ok(run_from_row(row)))
            .map_err(|err| db_err(&err))?;
        let mut items = Vec::new();
        for row in mapped {
            items.push(row.map_err(|err| db_err(&err))??);
        }

        let limit = usize::try_from(page_size).unwrap_or(usize::MAX);
        let next_page_token = if items.len() > limit {
            items.truncate(limit);
            items
                .last()
                .map(|run| {
                    run.started_at
                        .rfc3339()
                        .map_err(|err| RecorderError::Internal(err.to_string()))
                })
                .transpose()?
        } else {
            None
        };

        Ok(RunPage {
            items,
            next_page_token,
        })
    }

    fn list_events(
        &self,
        run_id: &RunId,
        query: &EventQuery,
    ) -> Result<EventPage, RecorderError> {
        let mut sql = format!("SELECT {EVENT_COLUMNS} FROM events WHERE run_id = ?");
        let mut values: Vec<SqlValue> = vec![SqlValue::Text(run_id.as_str().to_string())];

        if let Some(event_type) = query.event_type {
            sql.push_str(" AND event_type = ?");
            values.push(SqlValue::Text(event_type.as_str().to_string()));
        }
        if let Some(step_id) = &query.step_id {
            sql.push_str(" AND step_id = ?");
            values.push(SqlValue::Text(step_id.as_str().to_string()));
        }
        if let Some(sequence_from) = query.sequence_from {
            sql.push_str(" AND sequence_no >= ?");
            values.push(SqlValue::Integer(sequence_from));
        }
        if let Some(sequence_to) = query.sequence_to {
            sql.push_str(" AND sequence_no <= ?");
            values.push(SqlValue::Integer(sequence_to));
        }
        if let Some(cursor) = query.page_token {
            sql.push_str(" AND sequence_no > ?");
            values.push(SqlValue::Integer(cursor));
        }

        let page_size = query.clamped_page_size();
        sql.push_str(" ORDER BY sequence_no ASC LIMIT ?");
        values.push(SqlValue::Integer(page_size.saturating_add(1)));

        let connection = self.read()?;
        let mut statement = connection.prepare(&sql).map_err(|err| db_err(&err))?;
        let mapped = statement
            .query_map(params_from_iter(values), |row| Ok(event_from_row(row)))
            .map_err(|err| db_err(&err))?;
        let mut items = Vec::new();
        for row in mapped {
            items.push(row.map_err(|err| db_err(&err))??);
        }

        let limit = usize::try_from(page_size).unwrap_or(usize::MAX);
        let next_page_token = if items.len() > limit {
            items.truncate(limit);
            items.last().map(|event| event.sequence_no.to_string())
        } else {
            None
        };

        Ok(EventPage {
            items,
            next_page_token,
        })
    }

    fn run_detail(&self, run_id: &RunId) -> Result<RunDetail, RecorderError> {
        let Some(run) = self.get_run(run_id)? else {
            return Err(RecorderError::not_found(
                "Run not found",
                json!({ "run_id": run_id.as_str() }),
            ));
        };
        let connection = self.read()?;
        let mut statement = connection
            .prepare(
                "SELECT event_type, COUNT(*) FROM events WHERE run_id = ?1 GROUP BY event_type",
            )
            .map_err(|err| db_err(&err))?;
        let mapped = statement
            .query_map(params![run_id.as_str()], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })
            .map_err(|err| db_err(&err))?;
        let mut counters = std::collections::BTreeMap::new();
        let mut total = 0_i64;
        for row in mapped {
            let (event_type, count) = row.map_err(|err| db_err(&err))?;
            total += count;
            counters.insert(event_type, count);
        }
        counters.insert("total_events".to_string(), total);
        Ok(RunDetail {
            run,
            counters,
        })
    }

    fn load_run_events(&self, run_id: &RunId) -> Result<Vec<EventRecord>, RecorderError> {
        let connection = self.read()?;
        let mut statement = connection
            .prepare(&format!(
                "SELECT {EVENT_COLUMNS} FROM events WHERE run_id = ?1 ORDER BY sequence_no ASC"
            ))
            .map_err(|err| db_err(&err))?;
        let mapped = statement
            .query_map(params![run_id.as_str()], |row| Ok(event_from_row(row)))
            .map_err(|err| db_err(&err))?;
        let mut items = Vec::new();
        for row in mapped {
            items.push(row.map_err(|err| db_err(&err))??);
        }
        Ok(items)
    }

    fn get_step(
        &self,
        run_id: &RunId,
        step_id: &StepId,
    ) -> Result<Option<StepRecord>, RecorderError> {
        let connection = self.read()?;
        connection
            .query_row(
                &format!(
                    "SELECT {STEP_COLUMNS} FROM steps WHERE run_id = ?1 AND step_id = ?2"
                ),
                params![run_id.as_str(), step_id.as_str()],
                |row| Ok(step_from_row(row)),
            )
            .optional()
            .map_err(|err| db_err(&err))?
            .transpose()
    }

    fn insert_step_if_absent(&self, step: StepRecord) -> Result<(), RecorderError> {
        let connection = self.write()?;
        connection
            .execute(
                &format!(
                    "INSERT OR IGNORE INTO steps ({STEP_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, \
                     ?6, ?7, ?8)"
                ),
                params![
                    step.step_id.as_str(),
                    step.run_id.as_str(),
                    step.parent_step_id.as_ref().map(StepId::as_str),
                    step.sequence_no,
                    step.step_type.as_str(),
                    step.determinism_mode.as_str(),
                    step.started_at.unix_millis(),
                    step.ended_at.map(|ts| ts.unix_millis())
                ],
            )
            .map_err(|err| db_err(&err))?;
        Ok(())
    }

    fn insert_replay_event(&self, event: EventRecord) -> Result<(), RecorderError> {
        let mut connection = self.write()?;
        let tx = connection.transaction().map_err(|err| db_err(&err))?;
        tx_insert_event(&tx, &event)?;
        tx.commit().map_err(|err| db_err(&err))?;
        Ok(())
    }

    fn get_artifact(&self, hash: &ArtifactHash) -> Result<Option<ArtifactRecord>, RecorderError> {
        let connection = self.read()?;
        connection
            .query_row(
                &format!("SELECT {ARTIFACT_COLUMNS} FROM artifacts WHERE artifact_hash = ?1"),
                params![hash.as_str()],
                |row| Ok(artifact_from_row(row)),
            )
            .optional()
            .map_err(|err| db_err(&err))?
            .transpose()
    }

    fn insert_artifact_if_absent(
        &self,
        artifact: ArtifactRecord,
    ) -> Result<ArtifactRecord, RecorderError> {
        let mut connection = self.write()?;
        let tx = connection.transaction().map_err(|err| db_err(&err))?;
        tx_insert_artifact_if_absent(&tx, &artifact)?;
        let stored = tx
            .query_row(
                &format!("SELECT {ARTIFACT_COLUMNS} FROM artifacts WHERE artifact_hash = ?1"),
                params![artifact.artifact_hash.as_str()],
                |row| Ok(artifact_from_row(row)),
            )
            .map_err(|err| db_err(&err))??;
        tx.commit().map_err(|err| db_err(&err))?;
        Ok(stored)
    }

    fn create_replay_session(
        &self,
        session: ReplaySessionRecord,
        actor: &AuditActor,
    ) -> Result<ReplaySessionRecord, RecorderError> {
        let profile_json = serde_json::to_string(&session.override_profile)
            .map_err(|err| RecorderError::Internal(err.to_string()))?;
        let codes_json = serde_json::to_string(&session.reason_codes)
            .map_err(|err| RecorderError::Internal(err.to_string()))?;

        let mut connection = self.write()?;
        let tx = connection.transaction().map_err(|err| db_err(&err))?;
        tx.execute(
            &format!(
                "INSERT INTO replay_sessions ({SESSION_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, \
                 ?6, ?7, ?8, ?9, ?10, ?11)"
            ),
            params![
                session.replay_session_id.as_str(),
                session.source_run_id.as_str(),
                session.fork_step_id.as_ref().map(StepId::as_str),
                profile_json,
                session.status.as_str(),
                session.derived_run_id.as_ref().map(RunId::as_str),
                session.failure_reason_code,
                codes_json,
                session.cancel_requested,
                session.started_at.unix_millis(),
                session.ended_at.map(|ts| ts.unix_millis())
            ],
        )
        .map_err(|err| db_err(&err))?;

        let now = UtcTimestamp::now();
        let mut payload = Map::new();
        payload.insert(
            REPLAY_SESSION_PAYLOAD_KEY.to_string(),
            Value::String(session.replay_session_id.as_str().to_string()),
        );
        tx_enqueue_job(&tx, REPLAY_EXECUTE_JOB, &payload, now)?;

        let details = json!({
            "source_run_id": session.source_run_id.as_str(),
            "fork_step_id": session.fork_step_id.as_ref().map(StepId::as_str),
        });
        tx_append_audit(
            &tx,
            &AuditLogRecord {
                audit_id: AuditId::generate(),
                actor_id: actor.actor_id.clone(),
                actor_type: actor.actor_type.clone(),
                action: "replay_created".to_string(),
                target_type: "replay_session".to_string(),
                target_id: session.replay_session_id.as_str().to_string(),
                timestamp: now,
                details: details.as_object().cloned().unwrap_or_default(),
            },
        )?;

        tx.commit().map_err(|err| db_err(&err))?;
        Ok(session)
    }

    fn get_replay_session(
        &self,
        session_id: &ReplaySessionId,
    ) -> Result<Option<ReplaySessionRecord>, RecorderError> {
        let connection = self.read()?;
        connection
            .query_row(
                &format!(
                    "SELECT {SESSION_COLUMNS} FROM replay_sessions WHERE replay_session_id = ?1"
                ),
                params![session_id.as_str()],
                |row| Ok(session_from_row(row)),
            )
            .optional()
            .map_err(|err| db_err(&err))?
            .transpose()
    }

    fn cancel_replay_session(
        &self,
        session_id: &ReplaySessionId,
    ) -> Result<ReplaySessionRecord, RecorderError> {
        let mut connection = self.write()?;
        let tx = connection.transaction().map_err(|err| db_err(&err))?;
        let Some(session) = tx_get_session(&tx, session_id)? else {
            return Err(RecorderError::not_found(
                "Replay session not found",
                json!({ "replay_session_id": session_id.as_str() }),
            ));
        };
        if session.status.is_executable() {
            tx.execute(
                "UPDATE replay_sessions SET cancel_requested = 1, status = ?2, \
                 failure_reason_code = ?3, ended_at = ?4 WHERE replay_session_id = ?1",
                params![
                    session_id.as_str(),
                    ReplayStatus::FailedExecution.as_str(),
                    FAILURE_CANCEL_REQUESTED,
                    UtcTimestamp::now().unix_millis()
                ],
            )
            .map_err(|err| db_err(&err))?;
        } else {
            tx.execute(
                "UPDATE replay_sessions SET cancel_requested = 1 WHERE replay_session_id = ?1",
                params![session_id.as_str()],
            )
            .map_err(|err| db_err(&err))?;
        }
        let updated = tx_get_session(&tx, session_id)?.ok_or_else(|| {
            RecorderError::Internal("replay session vanished during cancel".to_string())
        })?;
        tx.commit().map_err(|err| db_err(&err))?;
        Ok(updated)
    }

    fn mark_replay_running(&self, session_id: &ReplaySessionId) -> Result<(), RecorderError> {
        let connection = self.write()?;
        connection
            .execute(
                "UPDATE replay_sessions SET status = ?2 WHERE replay_session_id = ?1",
                params![session_id.as_str(), ReplayStatus::Running.as_str()],
            )
            .map_err(|err| db_err(&err))?;
        Ok(())
    }

    fn is_replay_cancel_requested(
        &self,
        session_id: &ReplaySessionId,
    ) -> Result<bool, RecorderError> {
        let connection = self.read()?;
        connection
            .query_row(
                "SELECT cancel_requested FROM replay_sessions WHERE replay_session_id = ?1",
                params![session_id.as_str()],
                |row| row.get::<_, bool>(0),
            )
            .optional()
            .map_err(|err| db_err(&err))?
            .ok_or_else(|| {
                RecorderError::not_found(
                    "Replay session not found",
                    json!({ "replay_session_id": session_id.as_str() }),
                )
            })
    }

    fn fail_replay_session(
        &self,
        session_id: &ReplaySessionId,
        status: ReplayStatus,
        failure_reason_code: &str,
        reason_codes: &[String],
    ) -> Result<ReplaySessionRecord, RecorderError> {
        let codes_json = serde_json::to_string(reason_codes)
            .map_err(|err| RecorderError::Internal(err.to_string()))?;
        let mut connection = self.write()?;
        let tx = connection.transaction().map_err(|err| db_err(&err))?;
        tx.execute(
            "UPDATE replay_sessions SET status = ?2, failure_reason_code = ?3, \
             reason_codes_json = ?4, ended_at = ?5 WHERE replay_session_id = ?1",
            params![
                session_id.as_str(),
                status.as_str(),
                failure_reason_code,
                codes_json,
                UtcTimestamp::now().unix_millis()
            ],
        )
        .map_err(|err| db_err(&err))?;
        let updated = tx_get_session(&tx, session_id)?.ok_or_else(|| {
            RecorderError::not_found(
                "Replay session not found",
                json!({ "replay_session_id": session_id.as_str() }),
            )
        })?;
        tx.commit().map_err(|err| db_err(&err))?;
        Ok(updated)
    }

    fn complete_replay_session(
        &self,
        session_id: &ReplaySessionId,
        status: ReplayStatus,
        derived_run_id: &RunId,
        reason_codes: &[String],
    ) -> Result<ReplaySessionRecord, RecorderError> {
        let codes_json = serde_json::to_string(reason_codes)
            .map_err(|err| RecorderError::Internal(err.to_string()))?;
        let mut connection = self.write()?;
        let tx = connection.transaction().map_err(|err| db_err(&err))?;
        tx.execute(
            "UPDATE replay_sessions SET status = ?2, derived_run_id = ?3, reason_codes_json = \
             ?4, failure_reason_code = NULL, ended_at = ?5 WHERE replay_session_id = ?1",
            params![
                session_id.as_str(),
                status.as_str(),
                derived_run_id.as_str(),
                codes_json,
                UtcTimestamp::now().unix_millis()
            ],
        )
        .map_err(|err| db_err(&err))?;
        let updated = tx_get_session(&tx, session_id)?.ok_or_else(|| {
            RecorderError::not_found(
                "Replay session not found",
                json!({ "replay_session_id": session_id.as_str() }),
            )
        })?;
        tx.commit().map_err(|err| db_err(&err))?;
        Ok(updated)
    }

    fn enqueue_job(
        &self,
        job_type: &str,
        payload: Map<String, Value>,
    ) -> Result<JobRecord, RecorderError> {
        let mut connection = self.write()?;
        let tx = connection.transaction().map_err(|err| db_err(&err))?;
        let now = UtcTimestamp::now();
        let job_id = tx_enqueue_job(&tx, job_type, &payload, now)?;
        let job = tx
            .query_row(
                &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE job_id = ?1"),
                params![job_id],
                |row| Ok(job_from_row(row)),
            )
            .map_err(|err| db_err(&err))??;
        tx.commit().map_err(|err| db_err(&err))?;
        Ok(job)
    }

    fn fetch_next_job(&self, job_type: Option<&str>) -> Result<Option<JobRecord>, RecorderError> {
        let mut connection = self.write()?;
        let tx = connection.transaction().map_err(|err| db_err(&err))?;
        let now = UtcTimestamp::now();

        let mut sql = format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE status = ? AND available_at <= ?"
        );
        let mut values: Vec<SqlValue> = vec![
            SqlValue::Text(JobStatus::Pending.as_str().to_string()),
            SqlValue::Integer(now.unix_millis()),
        ];
        if let Some(wanted) = job_type {
            sql.push_str(" AND job_type = ?");
            values.push(SqlValue::Text(wanted.to_string()));
        }
        sql.push_str(" ORDER BY created_at ASC, job_id ASC LIMIT 1");

        let claimed = {
            let mut statement = tx.prepare(&sql).map_err(|err| db_err(&err))?;
            statement
                .query_row(params_from_iter(values), |row| Ok(job_from_row(row)))
                .optional()
                .map_err(|err| db_err(&err))?
                .transpose()?
        };
        let Some(mut job) = claimed else {
            return Ok(None);
        };

        tx.execute(
            "UPDATE jobs SET status = ?2, updated_at = ?3 WHERE job_id = ?1",
            params![job.job_id.get(), JobStatus::Running.as_str(), now.unix_millis()],
        )
        .map_err(|err| db_err(&err))?;
        tx.commit().map_err(|err| db_err(&err))?;

        job.status = JobStatus::Running;
        job.updated_at = now;
        Ok(Some(job))
    }

    fn mark_job_success(&self, job_id: JobId) -> Result<(), RecorderError> {
        let connection = self.write()?;
        connection
            .execute(
                "UPDATE jobs SET status = ?2, updated_at = ?3 WHERE job_id = ?1",
                params![
                    job_id.get(),
                    JobStatus::Completed.as_str(),
                    UtcTimestamp::now().unix_millis()
                ],
            )
            .map_err(|err| db_err(&err))?;
        Ok(())
    }

    fn mark_job_failure(&self, job_id: JobId, error: &str) -> Result<JobRecord, RecorderError> {
        let mut connection = self.write()?;
        let tx = connection.transaction().map_err(|err| db_err(&err))?;
        let job = tx
            .query_row(
                &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE job_id = ?1"),
                params![job_id.get()],
                |row| Ok(job_from_row(row)),
            )
            .optional()
            .map_err(|err| db_err(&err))?
            .transpose()?;
        let Some(job) = job else {
            return Err(RecorderError::not_found(
                "Job not found",
                json!({ "job_id": job_id.get() }),
            ));
        };

        let now = UtcTimestamp::now();
        let retries = job.retries + 1;
        if retries >= job.max_retries {
            tx.execute(
                "UPDATE jobs SET status = ?2, retries = ?3, last_error = ?4, updated_at = ?5 \
                 WHERE job_id = ?1",
                params![
                    job_id.get(),
                    JobStatus::Failed.as_str(),
                    retries,
                    error,
                    now.unix_millis()
                ],
            )
            .map_err(|err| db_err(&err))?;
        } else {
            let available_at = now
                .unix_millis()
                .saturating_add(retry_backoff_seconds(retries).saturating_mul(1_000));
            tx.execute(
                "UPDATE jobs SET status = ?2, retries = ?3, last_error = ?4, available_at = ?5, \
                 updated_at = ?6 WHERE job_id = ?1",
                params![
                    job_id.get(),
                    JobStatus::Pending.as_str(),
                    retries,
                    error,
                    available_at,
                    now.unix_millis()
                ],
            )
            .map_err(|err| db_err(&err))?;
        }

        let updated = tx
            .query_row(
                &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE job_id = ?1"),
                params![job_id.get()],
                |row| Ok(job_from_row(row)),
            )
            .map_err(|err| db_err(&err))??;
        tx.commit().map_err(|err| db_err(&err))?;
        Ok(updated)
    }

    fn append_audit(&self, entry: AuditLogRecord) -> Result<(), RecorderError> {
        let mut connection = self.write()?;
        let tx = connection.transaction().map_err(|err| db_err(&err))?;
        tx_append_audit(&tx, &entry)?;
        tx.commit().map_err(|err| db_err(&err))?;
        Ok(())
    }

    fn ping(&self) -> Result<(), RecorderError> {
        let connection = self.read()?;
        connection
            .query_row("SELECT 1", params![], |row| row.get::<_, i64>(0))
            .map_err(|err| db_err(&err))?;
        Ok(())
    }
}
