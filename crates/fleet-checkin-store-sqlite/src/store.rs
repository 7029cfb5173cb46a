// crates/fleet-checkin-store-sqlite/src/store.rs
// ============================================================================
// Module: SQLite Check-in Store
// Description: Durable check-in ledger and version catalog backed by SQLite.
// Purpose: Persist clusters, check-ins, and versions with integrity checks.
// Dependencies: fleet-checkin-core, rusqlite, serde, thiserror
// ============================================================================

//! ## Overview
//! This module implements [`CheckinStore`] and [`VersionStore`] on `SQLite`.
//! Every write runs in one `IMMEDIATE` transaction that is rolled back on any
//! failure. Payloads are stored verbatim with a digest that is verified
//! on every read. Filter queries are rendered from the shared core predicate,
//! and latest-version batches are resolved with a window function per chunk
//! of (component, train) pairs.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;
use std::fmt::Write as _;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use fleet_checkin_core::CheckinRecord;
use fleet_checkin_core::CheckinStore;
use fleet_checkin_core::Clock;
use fleet_checkin_core::ClusterId;
use fleet_checkin_core::ClusterRecord;
use fleet_checkin_core::ComponentName;
use fleet_checkin_core::ComponentVersion;
use fleet_checkin_core::DEFAULT_MAX_PAYLOAD_BYTES;
use fleet_checkin_core::EncodedPayload;
use fleet_checkin_core::NoopAuditSink;
use fleet_checkin_core::PayloadDigest;
use fleet_checkin_core::SequencedVersion;
use fleet_checkin_core::StoreAuditEvent;
use fleet_checkin_core::StoreAuditSink;
use fleet_checkin_core::StoreError;
use fleet_checkin_core::StoreOperation;
use fleet_checkin_core::SystemClock;
use fleet_checkin_core::TimeFilter;
use fleet_checkin_core::Timestamp;
use fleet_checkin_core::ToPredicate;
use fleet_checkin_core::Train;
use fleet_checkin_core::TrainKey;
use fleet_checkin_core::UpsertOutcome;
use fleet_checkin_core::VersionKey;
use fleet_checkin_core::VersionStore;
use fleet_checkin_core::VersionSubmission;
use fleet_checkin_core::decode_payload;
use fleet_checkin_core::distinct_pairs;
use fleet_checkin_core::encode_payload;
use fleet_checkin_core::resolve_latest;
use fleet_checkin_core::validate_identifier;
use fleet_checkin_core::validate_payload_size;
use rusqlite::Connection;
use rusqlite::ErrorCode;
use rusqlite::OpenFlags;
use rusqlite::OptionalExtension;
use rusqlite::Transaction;
use rusqlite::TransactionBehavior;
use rusqlite::ffi;
use rusqlite::params;
use rusqlite::params_from_iter;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// `SQLite` schema version for the store.
const SCHEMA_VERSION: i64 = 1;
/// Default busy timeout (ms).
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
/// Default number of pooled connections.
const DEFAULT_POOL_SIZE: usize = 4;
/// Maximum number of pooled connections.
pub const MAX_POOL_SIZE: usize = 64;
/// Maximum length of a single path component.
const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
const MAX_TOTAL_PATH_LENGTH: usize = 4096;
/// Maximum (component, train) pairs bound in one latest-version statement.
pub const LATEST_BATCH_CHUNK: usize = 256;

// ============================================================================
// SECTION: Config
// ============================================================================

/// `SQLite` journal mode configuration.
///
/// # Invariants
/// - Values map 1:1 to `SQLite` `journal_mode` pragma settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteStoreMode {
    /// WAL journal mode (recommended).
    #[default]
    Wal,
    /// Delete journal mode (legacy).
    Delete,
}

impl SqliteStoreMode {
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

/// Create-or-update primitive used by upserts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum UpsertStrategy {
    /// Single `INSERT .. ON CONFLICT DO UPDATE` statement.
    #[default]
    Atomic,
    /// Count existing rows, then insert or update; a unique violation on
    /// insert is applied as an update.
    CountThenWrite,
}

/// Configuration for the `SQLite` check-in store.
///
/// # Invariants
/// - `path` must resolve to a file path (not a directory).
/// - `busy_timeout_ms` is interpreted as milliseconds.
/// - `pool_size` is in `1..=MAX_POOL_SIZE`.
/// - `max_payload_bytes` is greater than zero.
#[derive(Debug, Clone, Deserialize)]
pub struct SqliteStoreConfig {
    /// Path to the `SQLite` database file.
    pub path: PathBuf,
    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// `SQLite` journal mode.
    #[serde(default)]
    pub journal_mode: SqliteStoreMode,
    /// `SQLite` sync mode.
    #[serde(default)]
    pub sync_mode: SqliteSyncMode,
    /// Create-or-update primitive.
    #[serde(default)]
    pub upsert_strategy: UpsertStrategy,
    /// Number of pooled connections.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    /// Maximum encoded payload size in bytes.
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: usize,
}

impl SqliteStoreConfig {
    /// Creates a configuration with defaults for everything but the path.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            journal_mode: SqliteStoreMode::default(),
            sync_mode: SqliteSyncMode::default(),
            upsert_strategy: UpsertStrategy::default(),
            pool_size: DEFAULT_POOL_SIZE,
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
        }
    }
}

/// Returns the default busy timeout for `SQLite` connections.
const fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

/// Returns the default connection pool size.
const fn default_pool_size() -> usize {
    DEFAULT_POOL_SIZE
}

/// Returns the default payload size limit.
const fn default_max_payload_bytes() -> usize {
    DEFAULT_MAX_PAYLOAD_BYTES
}

/// Validates runtime limits in the store configuration.
fn validate_limits(config: &SqliteStoreConfig) -> Result<(), SqliteStoreError> {
    if config.pool_size == 0 || config.pool_size > MAX_POOL_SIZE {
        return Err(SqliteStoreError::Invalid(format!(
            "pool_size out of range: {} (max {MAX_POOL_SIZE})",
            config.pool_size
        )));
    }
    if config.max_payload_bytes == 0 {
        return Err(SqliteStoreError::Invalid(
            "max_payload_bytes must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// `SQLite` store errors.
///
/// # Invariants
/// - Error messages avoid embedding raw payloads.
#[derive(Debug, Error, Clone)]
pub enum SqliteStoreError {
    /// Transient I/O error (busy or locked database).
    #[error("sqlite store io error: {0}")]
    Io(String),
    /// `SQLite` engine error.
    #[error("sqlite store db error: {0}")]
    Db(String),
    /// Store corruption or hash mismatch.
    #[error("sqlite store corruption: {0}")]
    Corrupt(String),
    /// Store schema version mismatch.
    #[error("sqlite store version mismatch: {0}")]
    VersionMismatch(String),
    /// Invalid input or configuration.
    #[error("sqlite store invalid data: {0}")]
    Invalid(String),
    /// Requested row does not exist.
    #[error("sqlite store not found: {0}")]
    NotFound(String),
    /// A write affected an unexpected number of rows.
    #[error("sqlite store consistency violation: {0}")]
    ConsistencyViolation(String),
    /// Rollback or commit failed after `error`.
    #[error("sqlite store transaction failed: {error}{}", rollback_suffix(.rollback.as_deref()))]
    Transaction {
        /// Original failure.
        error: String,
        /// Cleanup failure.
        rollback: Option<String>,
    },
    /// Store payload exceeded configured size limits.
    #[error("sqlite store payload too large: {actual_bytes} bytes (max {max_bytes})")]
    TooLarge {
        /// Maximum allowed bytes.
        max_bytes: usize,
        /// Actual payload size in bytes.
        actual_bytes: usize,
    },
}

impl From<SqliteStoreError> for StoreError {
    fn from(error: SqliteStoreError) -> Self {
        match error {
            SqliteStoreError::Io(message) => Self::Io(message),
            SqliteStoreError::Db(message) => Self::Store(message),
            SqliteStoreError::Corrupt(message) => Self::Corrupt(message),
            SqliteStoreError::VersionMismatch(message) => Self::VersionMismatch(message),
            SqliteStoreError::Invalid(message) => Self::Invalid(message),
            SqliteStoreError::NotFound(message) => Self::NotFound(message),
            SqliteStoreError::ConsistencyViolation(message) => Self::ConsistencyViolation(message),
            SqliteStoreError::Transaction {
                error,
                rollback,
            } => Self::Transaction {
                error,
                rollback,
            },
            SqliteStoreError::TooLarge {
                max_bytes,
                actual_bytes,
            } => Self::TooLarge {
                max_bytes,
                actual_bytes,
            },
        }
    }
}

/// Maps engine errors, classifying busy and locked databases as transient.
fn map_db_error(err: &rusqlite::Error) -> SqliteStoreError {
    match err {
        rusqlite::Error::SqliteFailure(failure, _)
            if matches!(failure.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) =>
        {
            SqliteStoreError::Io(err.to_string())
        }
        _ => SqliteStoreError::Db(err.to_string()),
    }
}

/// Returns true when the engine rejected a write on a unique or primary key
/// constraint. Other constraint failures (NOT NULL, CHECK) are not matched.
fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE
                || failure.extended_code == ffi::SQLITE_CONSTRAINT_PRIMARYKEY
    )
}

// ============================================================================
// SECTION: Store
// ============================================================================

/// `SQLite`-backed check-in ledger and version catalog.
///
/// # Invariants
/// - Every write runs inside one `IMMEDIATE` transaction.
/// - Payload reads verify stored digests before decoding.
/// - Each pooled connection is used by one caller at a time.
#[derive(Clone)]
pub struct SqliteCheckinStore {
    /// Store configuration.
    config: SqliteStoreConfig,
    /// Connection pool; each connection is guarded by its own mutex.
    connections: Arc<Vec<Mutex<Connection>>>,
    /// Round-robin cursor for connection selection.
    cursor: Arc<AtomicUsize>,
    /// Source of the upsert check-in instant.
    clock: Arc<dyn Clock>,
    /// Audit sink for writes.
    audit: Arc<dyn StoreAuditSink>,
}

impl fmt::Debug for SqliteCheckinStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteCheckinStore").field("config", &self.config).finish_non_exhaustive()
    }
}

impl SqliteCheckinStore {
    /// Opens (or creates) the store.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the path or limits are invalid, the
    /// database cannot be opened, or its schema version is unsupported.
    pub fn new(config: SqliteStoreConfig) -> Result<Self, SqliteStoreError> {
        validate_store_path(&config.path)?;
        ensure_parent_dir(&config.path)?;
        validate_limits(&config)?;
        let mut first = open_connection(&config)?;
        initialize_schema(&mut first)?;
        let mut connections = Vec::with_capacity(config.pool_size);
        connections.push(Mutex::new(first));
        for _ in 1 .. config.pool_size {
            connections.push(Mutex::new(open_connection(&config)?));
        }
        Ok(Self {
            config,
            connections: Arc::new(connections),
            cursor: Arc::new(AtomicUsize::new(0)),
            clock: Arc::new(SystemClock),
            audit: Arc::new(NoopAuditSink),
        })
    }

    /// Replaces the clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replaces the audit sink.
    #[must_use]
    pub fn with_audit_sink(mut self, audit: Arc<dyn StoreAuditSink>) -> Self {
        self.audit = audit;
        self
    }

    /// Returns the store configuration.
    #[must_use]
    pub const fn config(&self) -> &SqliteStoreConfig {
        &self.config
    }

    /// Locks the next pooled connection.
    fn connection(&self) -> Result<MutexGuard<'_, Connection>, SqliteStoreError> {
        let len = self.connections.len().max(1);
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % len;
        self.connections
            .get(index)
            .ok_or_else(|| SqliteStoreError::Io("sqlite connection pool is empty".to_string()))?
            .lock()
            .map_err(|_| SqliteStoreError::Io("sqlite connection mutex poisoned".to_string()))
    }

    /// Runs `operation` in an `IMMEDIATE` transaction on a pooled connection.
    fn write<T>(
        &self,
        operation: impl FnOnce(&Transaction<'_>) -> Result<T, SqliteStoreError>,
    ) -> Result<T, SqliteStoreError> {
        let mut guard = self.connection()?;
        run_in_transaction(&mut guard, operation)
    }

    /// Verifies the store can execute a simple SQL statement.
    fn check_connection(&self) -> Result<(), SqliteStoreError> {
        let guard = self.connection()?;
        guard.query_row("SELECT 1", [], |row| row.get::<_, i64>(0)).map_err(|err| map_db_error(&err))?;
        Ok(())
    }

    /// Encodes a payload and enforces the size limit.
    fn encode(&self, payload: &Value) -> Result<EncodedPayload, SqliteStoreError> {
        let encoded =
            encode_payload(payload).map_err(|err| SqliteStoreError::Invalid(err.to_string()))?;
        validate_payload_size(encoded.bytes.len(), self.config.max_payload_bytes).map_err(|_| {
            SqliteStoreError::TooLarge {
                max_bytes: self.config.max_payload_bytes,
                actual_bytes: encoded.bytes.len(),
            }
        })?;
        Ok(encoded)
    }

    /// Records the outcome of a write and converts the error type.
    fn audited<T>(
        &self,
        operation: StoreOperation,
        key: &str,
        payload: &PayloadDigest,
        result: Result<(T, UpsertOutcome), SqliteStoreError>,
    ) -> Result<T, StoreError> {
        match result {
            Ok((value, outcome)) => {
                self.audit.record(
                    &StoreAuditEvent::write(operation, key, outcome.as_str())
                        .with_detail(payload.to_string()),
                );
                Ok(value)
            }
            Err(err) => {
                self.audit.record(&StoreAuditEvent::failure(operation, key, err.to_string()));
                Err(err.into())
            }
        }
    }
}

// ============================================================================
// SECTION: Check-in Store
// ============================================================================

impl CheckinStore for SqliteCheckinStore {
    fn upsert_cluster(&self, cluster_id: &ClusterId, payload: &Value) -> Result<ClusterRecord, StoreError> {
        validate_identifier("cluster_id", cluster_id.as_str())?;
        let encoded = self.encode(payload)?;
        let created_at = self.clock.now();
        let strategy = self.config.upsert_strategy;
        let result = self.write(|tx| {
            insert_checkin(tx, cluster_id, created_at, &encoded)?;
            let existing = match strategy {
                UpsertStrategy::Atomic => None,
                UpsertStrategy::CountThenWrite => Some(count_clusters(tx, cluster_id)?),
            };
            let outcome = write_cluster(tx, strategy, existing, cluster_id, &encoded)?;
            let record = read_cluster(tx, cluster_id)?.ok_or_else(|| {
                SqliteStoreError::ConsistencyViolation(format!(
                    "cluster {cluster_id} missing after upsert"
                ))
            })?;
            Ok((record, outcome))
        });
        self.audited(StoreOperation::UpsertCluster, cluster_id.as_str(), &encoded.canonical, result)
    }

    fn check_in(
        &self,
        cluster_id: &ClusterId,
        created_at: Timestamp,
        payload: &Value,
    ) -> Result<CheckinRecord, StoreError> {
        validate_identifier("cluster_id", cluster_id.as_str())?;
        let encoded = self.encode(payload)?;
        let result = self.write(|tx| {
            insert_checkin(tx, cluster_id, created_at, &encoded)?;
            Ok((
                CheckinRecord {
                    cluster_id: cluster_id.clone(),
                    created_at,
                    payload: payload.clone(),
                },
                UpsertOutcome::Created,
            ))
        });
        self.audited(StoreOperation::CheckIn, cluster_id.as_str(), &encoded.canonical, result)
    }

    fn get_cluster(&self, cluster_id: &ClusterId) -> Result<ClusterRecord, StoreError> {
        let guard = self.connection()?;
        read_cluster(&guard, cluster_id)?
            .ok_or_else(|| StoreError::NotFound(format!("cluster {cluster_id}")))
    }

    fn list_checkins(&self, cluster_id: &ClusterId) -> Result<Vec<CheckinRecord>, StoreError> {
        let guard = self.connection()?;
        let mut stmt = guard
            .prepare_cached(
                "SELECT created_at, payload_json, payload_hash, hash_algorithm FROM checkins \
                 WHERE cluster_id = ?1 ORDER BY created_at, id",
            )
            .map_err(|err| map_db_error(&err))?;
        let rows = stmt
            .query_map(params![cluster_id.as_str()], |row| {
                Ok((row.get::<_, i64>(0)?, map_payload_row(row, 1)?))
            })
            .map_err(|err| map_db_error(&err))?;
        let mut records = Vec::new();
        for row in rows {
            let (created_at, payload) = row.map_err(|err| map_db_error(&err))?;
            records.push(CheckinRecord {
                cluster_id: cluster_id.clone(),
                created_at: Timestamp::from_unix_nanos(created_at),
                payload: payload.decode()?,
            });
        }
        Ok(records)
    }

    fn query_clusters(&self, filter: &TimeFilter) -> Result<Vec<ClusterRecord>, StoreError> {
        let predicate = filter.predicate();
        let sql = format!(
            "SELECT c.cluster_id, c.payload_json, c.payload_hash, c.hash_algorithm FROM clusters c \
             JOIN ({}) matched ON matched.cluster_id = c.cluster_id ORDER BY c.cluster_id",
            predicate.matching_clusters_sql()
        );
        let guard = self.connection()?;
        let mut stmt = guard.prepare_cached(&sql).map_err(|err| map_db_error(&err))?;
        let rows = stmt
            .query_map(params_from_iter(predicate.sql_params()), |row| {
                Ok((row.get::<_, String>(0)?, map_payload_row(row, 1)?))
            })
            .map_err(|err| map_db_error(&err))?;
        let mut records = Vec::new();
        for row in rows {
            let (cluster_id, payload) = row.map_err(|err| map_db_error(&err))?;
            records.push(ClusterRecord {
                cluster_id: ClusterId::new(cluster_id),
                payload: payload.decode()?,
            });
        }
        Ok(records)
    }

    fn readiness(&self) -> Result<(), StoreError> {
        self.check_connection().map_err(StoreError::from)
    }
}

// ============================================================================
// SECTION: Version Store
// ============================================================================

impl VersionStore for SqliteCheckinStore {
    fn upsert_version(&self, submission: &VersionSubmission) -> Result<ComponentVersion, StoreError> {
        let version = submission.parse()?;
        validate_identifier("component", version.component.as_str())?;
        validate_identifier("train", version.train.as_str())?;
        validate_identifier("version", version.version.as_str())?;
        let encoded = self.encode(&version.payload)?;
        let key = version.key();
        let strategy = self.config.upsert_strategy;
        let result = self.write(|tx| {
            let existing = match strategy {
                UpsertStrategy::Atomic => None,
                UpsertStrategy::CountThenWrite => Some(count_versions(tx, &key)?),
            };
            let outcome = write_version(tx, strategy, existing, &version, &encoded)?;
            let stored = read_version(tx, &key)?.ok_or_else(|| {
                SqliteStoreError::ConsistencyViolation(format!("version {key} missing after upsert"))
            })?;
            Ok((stored.version, outcome))
        });
        self.audited(StoreOperation::UpsertVersion, &key.to_string(), &encoded.canonical, result)
    }

    fn get_version(&self, key: &VersionKey) -> Result<ComponentVersion, StoreError> {
        let guard = self.connection()?;
        read_version(&guard, key)?
            .map(|stored| stored.version)
            .ok_or_else(|| StoreError::NotFound(format!("version {key}")))
    }

    fn get_latest_version(
        &self,
        train: &Train,
        component: &ComponentName,
    ) -> Result<ComponentVersion, StoreError> {
        let guard = self.connection()?;
        let row = guard
            .query_row(
                "SELECT id, component, train, version, released_at, payload_json, payload_hash, \
                 hash_algorithm FROM versions WHERE component = ?1 AND train = ?2 ORDER BY \
                 released_at DESC, id DESC LIMIT 1",
                params![component.as_str(), train.as_str()],
                map_version_row,
            )
            .optional()
            .map_err(|err| map_db_error(&err))?;
        match row {
            Some(row) => Ok(row.decode()?.version),
            None => Err(StoreError::NotFound(format!("latest version of {component}/{train}"))),
        }
    }

    fn get_latest_versions(&self, pairs: &[TrainKey]) -> Result<Vec<ComponentVersion>, StoreError> {
        let requested = distinct_pairs(pairs);
        if requested.is_empty() {
            return Ok(Vec::new());
        }
        let guard = self.connection()?;
        let mut candidates = Vec::with_capacity(requested.len());
        for chunk in requested.chunks(LATEST_BATCH_CHUNK) {
            let sql = latest_versions_sql(chunk.len());
            let mut stmt = guard.prepare_cached(&sql).map_err(|err| map_db_error(&err))?;
            let bound =
                chunk.iter().flat_map(|pair| [pair.component.as_str(), pair.train.as_str()]);
            let rows = stmt
                .query_map(params_from_iter(bound), map_version_row)
                .map_err(|err| map_db_error(&err))?;
            for row in rows {
                candidates.push(row.map_err(|err| map_db_error(&err))?.decode()?);
            }
        }
        Ok(resolve_latest(&requested, candidates))
    }

    fn readiness(&self) -> Result<(), StoreError> {
        self.check_connection().map_err(StoreError::from)
    }
}

// ============================================================================
// SECTION: Transactions
// ============================================================================

/// Runs `operation` inside an `IMMEDIATE` transaction.
///
/// Errors from `operation` are returned unchanged after a successful
/// rollback. A failed rollback or commit yields
/// [`SqliteStoreError::Transaction`].
fn run_in_transaction<T>(
    connection: &mut Connection,
    operation: impl FnOnce(&Transaction<'_>) -> Result<T, SqliteStoreError>,
) -> Result<T, SqliteStoreError> {
    let tx = connection
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(|err| map_db_error(&err))?;
    match operation(&tx) {
        Ok(value) => match tx.commit() {
            Ok(()) => Ok(value),
            Err(err) => Err(match map_db_error(&err) {
                SqliteStoreError::Io(message) => SqliteStoreError::Io(message),
                _ => SqliteStoreError::Transaction {
                    error: format!("commit failed: {err}"),
                    rollback: None,
                },
            }),
        },
        Err(error) => match tx.rollback() {
            Ok(()) => Err(error),
            Err(rollback) => Err(SqliteStoreError::Transaction {
                error: error.to_string(),
                rollback: Some(rollback.to_string()),
            }),
        },
    }
}

/// Formats the optional cleanup failure of a transaction error.
fn rollback_suffix(rollback: Option<&str>) -> String {
    rollback.map(|detail| format!(" (rollback failed: {detail})")).unwrap_or_default()
}

/// Fails unless a write affected exactly one row.
fn expect_single_row(affected: usize, what: &str) -> Result<(), SqliteStoreError> {
    match affected {
        1 => Ok(()),
        0 => Err(SqliteStoreError::ConsistencyViolation(format!("{what} affected no rows"))),
        count => Err(SqliteStoreError::ConsistencyViolation(format!(
            "{what} affected {count} rows"
        ))),
    }
}

// ============================================================================
// SECTION: Cluster Rows
// ============================================================================

/// Appends one check-in row.
fn insert_checkin(
    tx: &Transaction<'_>,
    cluster_id: &ClusterId,
    created_at: Timestamp,
    encoded: &EncodedPayload,
) -> Result<(), SqliteStoreError> {
    let affected = tx
        .prepare_cached(
            "INSERT INTO checkins (cluster_id, created_at, payload_json, payload_hash, \
             hash_algorithm) VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .and_then(|mut stmt| {
            stmt.execute(params![
                cluster_id.as_str(),
                created_at.unix_nanos(),
                encoded.bytes,
                encoded.digest.value,
                encoded.digest.algorithm.label(),
            ])
        })
        .map_err(|err| map_db_error(&err))?;
    expect_single_row(affected, "check-in insert")
}

/// Counts cluster rows for `cluster_id`.
fn count_clusters(tx: &Transaction<'_>, cluster_id: &ClusterId) -> Result<i64, SqliteStoreError> {
    tx.query_row(
        "SELECT COUNT(*) FROM clusters WHERE cluster_id = ?1",
        params![cluster_id.as_str()],
        |row| row.get(0),
    )
    .map_err(|err| map_db_error(&err))
}

/// Creates or replaces the cluster row.
///
/// `existing` is the row count observed by count-then-write; it may be stale,
/// in which case a unique violation on insert is applied as an update.
fn write_cluster(
    tx: &Transaction<'_>,
    strategy: UpsertStrategy,
    existing: Option<i64>,
    cluster_id: &ClusterId,
    encoded: &EncodedPayload,
) -> Result<UpsertOutcome, SqliteStoreError> {
    let id = cluster_id.as_str();
    let hash = encoded.digest.value.as_str();
    let algorithm = encoded.digest.algorithm.label();
    if strategy == UpsertStrategy::Atomic {
        let revision: i64 = tx
            .query_row(
                "INSERT INTO clusters (cluster_id, payload_json, payload_hash, hash_algorithm) \
                 VALUES (?1, ?2, ?3, ?4) ON CONFLICT(cluster_id) DO UPDATE SET payload_json = \
                 excluded.payload_json, payload_hash = excluded.payload_hash, hash_algorithm = \
                 excluded.hash_algorithm, revision = clusters.revision + 1 RETURNING revision",
                params![id, encoded.bytes, hash, algorithm],
                |row| row.get(0),
            )
            .map_err(|err| map_db_error(&err))?;
        return Ok(if revision == 1 { UpsertOutcome::Created } else { UpsertOutcome::Updated });
    }
    let update = |tx: &Transaction<'_>| -> Result<(), SqliteStoreError> {
        let affected = tx
            .execute(
                "UPDATE clusters SET payload_json = ?2, payload_hash = ?3, hash_algorithm = ?4, \
                 revision = revision + 1 WHERE cluster_id = ?1",
                params![id, encoded.bytes, hash, algorithm],
            )
            .map_err(|err| map_db_error(&err))?;
        expect_single_row(affected, "cluster update")
    };
    match existing.unwrap_or(0) {
        0 => {
            let inserted = tx.execute(
                "INSERT INTO clusters (cluster_id, payload_json, payload_hash, hash_algorithm) \
                 VALUES (?1, ?2, ?3, ?4)",
                params![id, encoded.bytes, hash, algorithm],
            );
            match inserted {
                Ok(affected) => {
                    expect_single_row(affected, "cluster insert")?;
                    Ok(UpsertOutcome::Created)
                }
                Err(err) if is_unique_violation(&err) => {
                    update(tx)?;
                    Ok(UpsertOutcome::RecoveredAsUpdate)
                }
                Err(err) => Err(map_db_error(&err)),
            }
        }
        1 => {
            update(tx)?;
            Ok(UpsertOutcome::Updated)
        }
        count => Err(SqliteStoreError::ConsistencyViolation(format!(
            "cluster {cluster_id} has {count} rows"
        ))),
    }
}

/// Loads and verifies a cluster row.
fn read_cluster(
    connection: &Connection,
    cluster_id: &ClusterId,
) -> Result<Option<ClusterRecord>, SqliteStoreError> {
    let row = connection
        .query_row(
            "SELECT payload_json, payload_hash, hash_algorithm FROM clusters WHERE cluster_id = ?1",
            params![cluster_id.as_str()],
            |row| map_payload_row(row, 0),
        )
        .optional()
        .map_err(|err| map_db_error(&err))?;
    row.map(|payload| {
        Ok(ClusterRecord {
            cluster_id: cluster_id.clone(),
            payload: payload.decode()?,
        })
    })
    .transpose()
}

// ============================================================================
// SECTION: Version Rows
// ============================================================================

/// Counts version rows for `key`.
fn count_versions(tx: &Transaction<'_>, key: &VersionKey) -> Result<i64, SqliteStoreError> {
    tx.query_row(
        "SELECT COUNT(*) FROM versions WHERE component = ?1 AND train = ?2 AND version = ?3",
        params![key.component.as_str(), key.train.as_str(), key.version.as_str()],
        |row| row.get(0),
    )
    .map_err(|err| map_db_error(&err))
}

/// Creates or replaces a version row, keeping its insertion id on update.
fn write_version(
    tx: &Transaction<'_>,
    strategy: UpsertStrategy,
    existing: Option<i64>,
    version: &ComponentVersion,
    encoded: &EncodedPayload,
) -> Result<UpsertOutcome, SqliteStoreError> {
    let component = version.component.as_str();
    let train = version.train.as_str();
    let name = version.version.as_str();
    let released_at = version.released_at.unix_nanos();
    let hash = encoded.digest.value.as_str();
    let algorithm = encoded.digest.algorithm.label();
    if strategy == UpsertStrategy::Atomic {
        let revision: i64 = tx
            .query_row(
                "INSERT INTO versions (component, train, version, released_at, payload_json, \
                 payload_hash, hash_algorithm) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) \
                 ON CONFLICT(component, train, version) DO UPDATE SET released_at = \
                 excluded.released_at, payload_json = excluded.payload_json, payload_hash = \
                 excluded.payload_hash, hash_algorithm = excluded.hash_algorithm, revision = \
                 versions.revision + 1 RETURNING revision",
                params![component, train, name, released_at, encoded.bytes, hash, algorithm],
                |row| row.get(0),
            )
            .map_err(|err| map_db_error(&err))?;
        return Ok(if revision == 1 { UpsertOutcome::Created } else { UpsertOutcome::Updated });
    }
    let update = |tx: &Transaction<'_>| -> Result<(), SqliteStoreError> {
        let affected = tx
            .execute(
                "UPDATE versions SET released_at = ?4, payload_json = ?5, payload_hash = ?6, \
                 hash_algorithm = ?7, revision = revision + 1 WHERE component = ?1 AND train = \
                 ?2 AND version = ?3",
                params![component, train, name, released_at, encoded.bytes, hash, algorithm],
            )
            .map_err(|err| map_db_error(&err))?;
        expect_single_row(affected, "version update")
    };
    match existing.unwrap_or(0) {
        0 => {
            let inserted = tx.execute(
                "INSERT INTO versions (component, train, version, released_at, payload_json, \
                 payload_hash, hash_algorithm) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![component, train, name, released_at, encoded.bytes, hash, algorithm],
            );
            match inserted {
                Ok(affected) => {
                    expect_single_row(affected, "version insert")?;
                    Ok(UpsertOutcome::Created)
                }
                Err(err) if is_unique_violation(&err) => {
                    update(tx)?;
                    Ok(UpsertOutcome::RecoveredAsUpdate)
                }
                Err(err) => Err(map_db_error(&err)),
            }
        }
        1 => {
            update(tx)?;
            Ok(UpsertOutcome::Updated)
        }
        count => Err(SqliteStoreError::ConsistencyViolation(format!(
            "version {} has {count} rows",
            version.key()
        ))),
    }
}

/// Loads and verifies a version row.
fn read_version(
    connection: &Connection,
    key: &VersionKey,
) -> Result<Option<SequencedVersion>, SqliteStoreError> {
    let row = connection
        .query_row(
            "SELECT id, component, train, version, released_at, payload_json, payload_hash, \
             hash_algorithm FROM versions WHERE component = ?1 AND train = ?2 AND version = ?3",
            params![key.component.as_str(), key.train.as_str(), key.version.as_str()],
            map_version_row,
        )
        .optional()
        .map_err(|err| map_db_error(&err))?;
    row.map(VersionRow::decode).transpose()
}

/// Renders the latest-version statement for `pairs` bound (component, train)
/// parameter pairs.
fn latest_versions_sql(pairs: usize) -> String {
    let mut values = String::new();
    for index in 0 .. pairs {
        if index > 0 {
            values.push_str(", ");
        }
        let _ = write!(values, "(?{}, ?{})", index * 2 + 1, index * 2 + 2);
    }
    format!(
        "WITH requested(component, train) AS (VALUES {values}), ranked AS (SELECT v.id, \
         v.component, v.train, v.version, v.released_at, v.payload_json, v.payload_hash, \
         v.hash_algorithm, ROW_NUMBER() OVER (PARTITION BY v.component, v.train ORDER BY \
         v.released_at DESC, v.id DESC) AS row_rank FROM versions v JOIN requested r ON \
         r.component = v.component AND r.train = v.train) SELECT id, component, train, version, \
         released_at, payload_json, payload_hash, hash_algorithm FROM ranked WHERE row_rank = 1"
    )
}

// ============================================================================
// SECTION: Row Mapping
// ============================================================================

/// Stored payload columns prior to verification.
struct PayloadRow {
    /// Canonical JSON bytes.
    bytes: Vec<u8>,
    /// Stored digest.
    hash: String,
    /// Stored digest algorithm label.
    algorithm: String,
}

impl PayloadRow {
    /// Verifies the digest and decodes the payload.
    fn decode(self) -> Result<Value, SqliteStoreError> {
        decode_payload(&self.bytes, &self.algorithm, &self.hash)
            .map_err(|err| SqliteStoreError::Corrupt(err.to_string()))
    }
}

/// Maps three payload columns starting at `offset`.
fn map_payload_row(row: &rusqlite::Row<'_>, offset: usize) -> rusqlite::Result<PayloadRow> {
    Ok(PayloadRow {
        bytes: row.get(offset)?,
        hash: row.get(offset + 1)?,
        algorithm: row.get(offset + 2)?,
    })
}

/// Stored version columns prior to verification.
struct VersionRow {
    /// Insertion id.
    id: i64,
    /// Component name.
    component: String,
    /// Release train.
    train: String,
    /// Version string.
    version: String,
    /// Release instant (unix nanoseconds).
    released_at: i64,
    /// Payload columns.
    payload: PayloadRow,
}

impl VersionRow {
    /// Verifies the payload and builds the domain object.
    fn decode(self) -> Result<SequencedVersion, SqliteStoreError> {
        Ok(SequencedVersion {
            sequence: self.id,
            version: ComponentVersion {
                component: self.component.into(),
                train: self.train.into(),
                version: self.version.into(),
                released_at: Timestamp::from_unix_nanos(self.released_at),
                payload: self.payload.decode()?,
            },
        })
    }
}

/// Maps a `SQLite` row into a version row.
fn map_version_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<VersionRow> {
    Ok(VersionRow {
        id: row.get(0)?,
        component: row.get(1)?,
        train: row.get(2)?,
        version: row.get(3)?,
        released_at: row.get(4)?,
        payload: map_payload_row(row, 5)?,
    })
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Ensures the parent directory for the store exists.
fn ensure_parent_dir(path: &Path) -> Result<(), SqliteStoreError> {
    let Some(parent) = path.parent() else {
        return Err(SqliteStoreError::Io("store path missing parent directory".to_string()));
    };
    if parent.as_os_str().is_empty() {
        return Ok(());
    }
    std::fs::create_dir_all(parent).map_err(|err| SqliteStoreError::Io(err.to_string()))
}

/// Validates store paths for safety limits.
fn validate_store_path(path: &Path) -> Result<(), SqliteStoreError> {
    if path.as_os_str().is_empty() {
        return Err(SqliteStoreError::Invalid("store path must not be empty".to_string()));
    }
    let path_string = path.display().to_string();
    if path_string.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(SqliteStoreError::Invalid("store path exceeds length limit".to_string()));
    }
    for component in path.components() {
        let name = component.as_os_str().to_string_lossy();
        if name.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(SqliteStoreError::Invalid(
                "store path contains an overlong component".to_string(),
            ));
        }
    }
    if path.is_dir() {
        return Err(SqliteStoreError::Invalid(
            "store path must be a file, not a directory".to_string(),
        ));
    }
    Ok(())
}

/// Opens an `SQLite` connection with secure defaults.
fn open_connection(config: &SqliteStoreConfig) -> Result<Connection, SqliteStoreError> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
    let connection = Connection::open_with_flags(&config.path, flags)
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    apply_pragmas(&connection, config)?;
    Ok(connection)
}

/// Applies `SQLite` pragmas required for durability.
fn apply_pragmas(
    connection: &Connection,
    config: &SqliteStoreConfig,
) -> Result<(), SqliteStoreError> {
    connection
        .busy_timeout(std::time::Duration::from_millis(config.busy_timeout_ms))
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    connection
        .execute_batch(&format!("PRAGMA journal_mode = {};", config.journal_mode.pragma_value()))
        .map_err(|err| map_db_error(&err))?;
    connection
        .execute_batch(&format!("PRAGMA synchronous = {};", config.sync_mode.pragma_value()))
        .map_err(|err| map_db_error(&err))?;
    Ok(())
}

/// Initializes the `SQLite` schema or validates existing version.
fn initialize_schema(connection: &mut Connection) -> Result<(), SqliteStoreError> {
    run_in_transaction(connection, |tx| {
        tx.execute_batch("CREATE TABLE IF NOT EXISTS store_meta (version INTEGER NOT NULL);")
            .map_err(|err| map_db_error(&err))?;
        let version: Option<i64> = tx
            .query_row("SELECT version FROM store_meta LIMIT 1", params![], |row| row.get(0))
            .optional()
            .map_err(|err| map_db_error(&err))?;
        match version {
            None => {
                tx.execute("INSERT INTO store_meta (version) VALUES (?1)", params![SCHEMA_VERSION])
                    .map_err(|err| map_db_error(&err))?;
                tx.execute_batch(
                    "CREATE TABLE IF NOT EXISTS clusters (
                        cluster_id TEXT NOT NULL PRIMARY KEY,
                        payload_json BLOB NOT NULL,
                        payload_hash TEXT NOT NULL,
                        hash_algorithm TEXT NOT NULL,
                        revision INTEGER NOT NULL DEFAULT 1
                    );
                    CREATE TABLE IF NOT EXISTS checkins (
                        id INTEGER PRIMARY KEY AUTOINCREMENT,
                        cluster_id TEXT NOT NULL,
                        created_at INTEGER NOT NULL,
                        payload_json BLOB NOT NULL,
                        payload_hash TEXT NOT NULL,
                        hash_algorithm TEXT NOT NULL
                    );
                    CREATE INDEX IF NOT EXISTS idx_checkins_cluster
                        ON checkins (cluster_id, created_at);
                    CREATE TABLE IF NOT EXISTS versions (
                        id INTEGER PRIMARY KEY AUTOINCREMENT,
                        component TEXT NOT NULL,
                        train TEXT NOT NULL,
                        version TEXT NOT NULL,
                        released_at INTEGER NOT NULL,
                        payload_json BLOB NOT NULL,
                        payload_hash TEXT NOT NULL,
                        hash_algorithm TEXT NOT NULL,
                        revision INTEGER NOT NULL DEFAULT 1,
                        UNIQUE (component, train, version)
                    );
                    CREATE INDEX IF NOT EXISTS idx_versions_train
                        ON versions (component, train, released_at DESC, id DESC);",
                )
                .map_err(|err| map_db_error(&err))?;
            }
            Some(value) if value == SCHEMA_VERSION => {}
            Some(value) => {
                return Err(SqliteStoreError::VersionMismatch(format!(
                    "unsupported schema version: {value}"
                )));
            }
        }
        Ok(())
    })
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(
        clippy::panic,
        clippy::unwrap_used,
        clippy::expect_used,
        reason = "Test-only assertions are permitted."
    )]

    use fleet_checkin_core::ClusterId;
    use fleet_checkin_core::UpsertOutcome;
    use fleet_checkin_core::encode_payload;
    use rusqlite::Connection;
    use serde_json::json;

    use super::UpsertStrategy;
    use super::initialize_schema;
    use super::read_cluster;
    use super::run_in_transaction;
    use super::write_cluster;

    #[test]
    fn stale_zero_count_recovers_as_update() {
        let mut connection = Connection::open_in_memory().unwrap();
        initialize_schema(&mut connection).unwrap();
        let cluster_id = ClusterId::new("cluster-a");
        let first = encode_payload(&json!({"nodes": 1})).unwrap();
        let second = encode_payload(&json!({"nodes": 2})).unwrap();

        let created = run_in_transaction(&mut connection, |tx| {
            write_cluster(tx, UpsertStrategy::CountThenWrite, Some(0), &cluster_id, &first)
        })
        .unwrap();
        assert_eq!(created, UpsertOutcome::Created);

        // A concurrent writer inserted the row after this writer counted zero.
        let recovered = run_in_transaction(&mut connection, |tx| {
            write_cluster(tx, UpsertStrategy::CountThenWrite, Some(0), &cluster_id, &second)
        })
        .unwrap();
        assert_eq!(recovered, UpsertOutcome::RecoveredAsUpdate);

        let record = read_cluster(&connection, &cluster_id).unwrap().unwrap();
        assert_eq!(record.payload, json!({"nodes": 2}));
        let rows: i64 =
            connection.query_row("SELECT COUNT(*) FROM clusters", [], |row| row.get(0)).unwrap();
        assert_eq!(rows, 1);
    }

    #[test]
    fn atomic_strategy_reports_created_then_updated() {
        let mut connection = Connection::open_in_memory().unwrap();
        initialize_schema(&mut connection).unwrap();
        let cluster_id = ClusterId::new("cluster-a");
        let payload = encode_payload(&json!({})).unwrap();
        let outcomes: Vec<UpsertOutcome> = (0 .. 2)
            .map(|_| {
                run_in_transaction(&mut connection, |tx| {
                    write_cluster(tx, UpsertStrategy::Atomic, None, &cluster_id, &payload)
                })
                .unwrap()
            })
            .collect();
        assert_eq!(outcomes, vec![UpsertOutcome::Created, UpsertOutcome::Updated]);
    }

    #[test]
    fn failed_operation_rolls_back_earlier_writes() {
        let mut connection = Connection::open_in_memory().unwrap();
        initialize_schema(&mut connection).unwrap();
        let cluster_id = ClusterId::new("cluster-a");
        let payload = encode_payload(&json!({})).unwrap();
        let result: Result<(), super::SqliteStoreError> = run_in_transaction(&mut connection, |tx| {
            super::insert_checkin(
                tx,
                &cluster_id,
                fleet_checkin_core::Timestamp::UNIX_EPOCH,
                &payload,
            )?;
            Err(super::SqliteStoreError::ConsistencyViolation("forced".to_string()))
        });
        assert!(matches!(result, Err(super::SqliteStoreError::ConsistencyViolation(_))));
        let rows: i64 =
            connection.query_row("SELECT COUNT(*) FROM checkins", [], |row| row.get(0)).unwrap();
        assert_eq!(rows, 0);
    }

    #[test]
    fn failed_rollback_surfaces_both_causes() {
        let mut connection = Connection::open_in_memory().unwrap();
        initialize_schema(&mut connection).unwrap();
        let result: Result<(), super::SqliteStoreError> = run_in_transaction(&mut connection, |tx| {
            tx.execute_batch("COMMIT").unwrap();
            Err(super::SqliteStoreError::ConsistencyViolation("forced".to_string()))
        });
        let Err(err) = result else {
            panic!("expected transaction failure");
        };
        let message = err.to_string();
        match err {
            super::SqliteStoreError::Transaction {
                error,
                rollback,
            } => {
                assert!(error.contains("forced"));
                assert!(rollback.is_some());
            }
            _ => panic!("expected composed transaction error"),
        }
        assert!(message.contains("forced"));
        assert!(message.contains("rollback failed:"));
        let store_error: fleet_checkin_core::StoreError = super::SqliteStoreError::Transaction {
            error: "forced".to_string(),
            rollback: Some("no transaction is active".to_string()),
        }
        .into();
        assert!(store_error.to_string().contains("rollback failed: no transaction is active"));
    }

    #[test]
    fn only_key_conflicts_count_as_unique_violations() {
        let mut connection = Connection::open_in_memory().unwrap();
        initialize_schema(&mut connection).unwrap();
        let insert = "INSERT INTO clusters (cluster_id, payload_json, payload_hash, hash_algorithm) \
                      VALUES (?1, ?2, 'h', 'sha256')";
        connection.execute(insert, rusqlite::params!["cluster-a", b"{}".to_vec()]).unwrap();
        let duplicate =
            connection.execute(insert, rusqlite::params!["cluster-a", b"{}".to_vec()]).unwrap_err();
        assert!(super::is_unique_violation(&duplicate));
        let missing_payload = connection
            .execute(insert, rusqlite::params!["cluster-b", Option::<Vec<u8>>::None])
            .unwrap_err();
        assert!(!super::is_unique_violation(&missing_payload));
    }
}
