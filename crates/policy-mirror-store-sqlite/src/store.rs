// crates/policy-mirror-store-sqlite/src/store.rs
// ============================================================================
// Module: SQLite Object Store
// Description: Durable ObjectBackend backed by SQLite with an event journal.
// Purpose: Persist rule objects and serve watches across processes.
// Dependencies: policy-mirror-core, rusqlite, serde, serde_json, thiserror, time, tracing
// ============================================================================

//! ## Overview
//! This module implements [`ObjectBackend`] using `SQLite`. Objects live in one
//! table keyed by `(kind, namespace, name)` with their canonical label set
//! stored alongside for exact-match scope queries. Every write runs in an
//! immediate transaction that bumps a store-wide revision and appends one row
//! to an event journal holding the object before and after the write.
//!
//! Watches take a snapshot and the current revision in one read transaction,
//! then a dedicated thread polls the journal past that revision. Because the
//! journal lives in the database file, watches observe writes made by other
//! processes sharing the file. Journal rows older than the configured
//! retention are compacted; a watch that falls behind compaction fails with
//! [`StoreError::Expired`].
//! Security posture: database contents are untrusted and decoded fail-closed.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use policy_mirror_core::Clock;
use policy_mirror_core::FieldSelector;
use policy_mirror_core::Labels;
use policy_mirror_core::ObjectBackend;
use policy_mirror_core::ObjectList;
use policy_mirror_core::RawObject;
use policy_mirror_core::ResourceVersion;
use policy_mirror_core::Scope;
use policy_mirror_core::StoreError;
use policy_mirror_core::SystemClock;
use policy_mirror_core::WatchEvent;
use policy_mirror_core::WatchSender;
use policy_mirror_core::WatchStream;
use policy_mirror_core::classify_change;
use policy_mirror_core::watch_channel;
use rusqlite::Connection;
use rusqlite::ErrorCode;
use rusqlite::OpenFlags;
use rusqlite::OptionalExtension;
use rusqlite::TransactionBehavior;
use rusqlite::params;
use serde::Deserialize;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::debug;
use tracing::error;
use tracing::warn;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// `SQLite` schema version for the store.
const SCHEMA_VERSION: i64 = 1;
/// Default busy timeout (ms).
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
/// Default watch poll interval (ms).
const DEFAULT_WATCH_POLL_INTERVAL_MS: u64 = 200;
/// Default number of journal entries kept behind the head revision.
const DEFAULT_JOURNAL_RETENTION: u64 = 10_000;
/// Smallest accepted watch poll interval (ms).
pub const MIN_WATCH_POLL_INTERVAL_MS: u64 = 10;
/// Largest accepted watch poll interval (ms).
pub const MAX_WATCH_POLL_INTERVAL_MS: u64 = 60_000;
/// Maximum length of a single path component.
const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
const MAX_TOTAL_PATH_LENGTH: usize = 4096;

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

/// Configuration for the `SQLite` object store.
///
/// # Invariants
/// - `path` must resolve to a file path (not a directory).
/// - `watch_poll_interval_ms` lies within
///   [`MIN_WATCH_POLL_INTERVAL_MS`]..=[`MAX_WATCH_POLL_INTERVAL_MS`].
/// - `journal_retention` is greater than zero.
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
    /// Interval between watch journal polls in milliseconds.
    #[serde(default = "default_watch_poll_interval_ms")]
    pub watch_poll_interval_ms: u64,
    /// Number of journal entries kept behind the head revision.
    #[serde(default = "default_journal_retention")]
    pub journal_retention: u64,
}

impl SqliteStoreConfig {
    /// Returns a configuration for `path` with default settings.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            journal_mode: SqliteStoreMode::default(),
            sync_mode: SqliteSyncMode::default(),
            watch_poll_interval_ms: DEFAULT_WATCH_POLL_INTERVAL_MS,
            journal_retention: DEFAULT_JOURNAL_RETENTION,
        }
    }

    /// Validates numeric settings.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError::Invalid`] for out-of-range values.
    pub fn validate(&self) -> Result<(), SqliteStoreError> {
        if !(MIN_WATCH_POLL_INTERVAL_MS ..= MAX_WATCH_POLL_INTERVAL_MS).contains(&self.watch_poll_interval_ms) {
            return Err(SqliteStoreError::Invalid(format!(
                "watch_poll_interval_ms must be between {MIN_WATCH_POLL_INTERVAL_MS} and \
                 {MAX_WATCH_POLL_INTERVAL_MS}"
            )));
        }
        if self.journal_retention == 0 {
            return Err(SqliteStoreError::Invalid("journal_retention must be greater than zero".to_string()));
        }
        if i64::try_from(self.journal_retention).is_err() {
            return Err(SqliteStoreError::Invalid("journal_retention is too large".to_string()));
        }
        Ok(())
    }
}

/// Returns the default busy timeout in milliseconds.
const fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

/// Returns the default watch poll interval in milliseconds.
const fn default_watch_poll_interval_ms() -> u64 {
    DEFAULT_WATCH_POLL_INTERVAL_MS
}

/// Returns the default journal retention.
const fn default_journal_retention() -> u64 {
    DEFAULT_JOURNAL_RETENTION
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// `SQLite` store errors.
///
/// # Invariants
/// - Error messages avoid embedding object payloads.
#[derive(Debug, Error, Clone)]
pub enum SqliteStoreError {
    /// Store I/O error.
    #[error("sqlite store io error: {0}")]
    Io(String),
    /// `SQLite` engine error.
    #[error("sqlite store db error: {0}")]
    Db(String),
    /// Store corruption or undecodable rows.
    #[error("sqlite store corruption: {0}")]
    Corrupt(String),
    /// Store schema version mismatch.
    #[error("sqlite store version mismatch: {0}")]
    VersionMismatch(String),
    /// Invalid configuration or request.
    #[error("sqlite store invalid data: {0}")]
    Invalid(String),
}

impl From<SqliteStoreError> for StoreError {
    fn from(error: SqliteStoreError) -> Self {
        match error {
            SqliteStoreError::Io(message) | SqliteStoreError::Db(message) => Self::Transport(message),
            SqliteStoreError::Corrupt(message) | SqliteStoreError::VersionMismatch(message) => {
                Self::Corrupt(message)
            }
            SqliteStoreError::Invalid(message) => Self::Invalid(message),
        }
    }
}

/// Maps a `rusqlite` error into a store error.
fn db_error(err: &rusqlite::Error) -> SqliteStoreError {
    if let rusqlite::Error::SqliteFailure(failure, _) = err
        && matches!(failure.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
    {
        return SqliteStoreError::Db(format!("database busy: {err}"));
    }
    SqliteStoreError::Db(err.to_string())
}

// ============================================================================
// SECTION: Store
// ============================================================================

/// `SQLite`-backed object store.
#[derive(Clone)]
pub struct SqliteObjectStore {
    /// Store configuration.
    config: SqliteStoreConfig,
    /// Connection used for reads and writes.
    connection: Arc<Mutex<Connection>>,
    /// Timestamp source.
    clock: Arc<dyn Clock>,
}

impl SqliteObjectStore {
    /// Opens a store stamped by the system clock.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the database cannot be opened or
    /// initialized.
    pub fn new(config: SqliteStoreConfig) -> Result<Self, SqliteStoreError> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Opens a store stamped by `clock`.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the database cannot be opened or
    /// initialized.
    pub fn with_clock(config: SqliteStoreConfig, clock: Arc<dyn Clock>) -> Result<Self, SqliteStoreError> {
        config.validate()?;
        validate_store_path(&config.path)?;
        ensure_parent_dir(&config.path)?;
        let mut connection = open_connection(&config)?;
        initialize_schema(&mut connection)?;
        Ok(Self {
            config,
            connection: Arc::new(Mutex::new(connection)),
            clock,
        })
    }

    /// Returns the store configuration.
    #[must_use]
    pub const fn config(&self) -> &SqliteStoreConfig {
        &self.config
    }

    /// Returns the current store revision.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the revision cannot be read.
    pub fn revision(&self) -> Result<u64, SqliteStoreError> {
        let guard = self.lock()?;
        Ok(read_meta(&guard)?.revision)
    }

    /// Acquires the connection lock.
    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, SqliteStoreError> {
        self.connection.lock().map_err(|_| SqliteStoreError::Io("sqlite connection mutex poisoned".to_string()))
    }

    /// Runs `op` in an immediate transaction and journals its writes.
    fn write<T>(&self, op: impl FnOnce(&mut WriteTx<'_>) -> Result<T, StoreError>) -> Result<T, StoreError> {
        let mut guard = self.lock()?;
        let tx = guard.transaction_with_behavior(TransactionBehavior::Immediate).map_err(|err| db_error(&err))?;
        let base = read_meta(&tx)?.revision;
        let mut write = WriteTx {
            connection: &tx,
            revision: base,
            now: self.clock.now(),
        };
        let result = op(&mut write)?;
        let head = write.revision;
        if head != base {
            tx.execute("UPDATE store_meta SET revision = ?1", params![to_sql_int(head)?])
                .map_err(|err| db_error(&err))?;
            compact_journal(&tx, head, self.config.journal_retention)?;
        }
        tx.commit().map_err(|err| db_error(&err))?;
        Ok(result)
    }
}

impl ObjectBackend for SqliteObjectStore {
    fn create(&self, object: RawObject) -> Result<RawObject, StoreError> {
        validate_address(&object)?;
        self.write(|write| {
            let address = Address::of(&object);
            if write.load(&address)?.is_some() {
                return Err(StoreError::AlreadyExists(address.to_string()));
            }
            let mut stored = object;
            stored.metadata.creation_timestamp = Some(write.now);
            stored.metadata.deletion_timestamp = None;
            stored.metadata.resource_version = Some(write.next_revision());
            write.store(&stored)?;
            write.record(&address, None, Some(&stored))?;
            Ok(stored)
        })
    }

    fn get(&self, kind: &str, namespace: &str, name: &str) -> Result<RawObject, StoreError> {
        let guard = self.lock()?;
        let address = Address::new(kind, namespace, name);
        load_object(&guard, &address)?.ok_or_else(|| StoreError::NotFound(address.to_string()))
    }

    fn list(&self, kind: &str, scope: &Scope) -> Result<ObjectList<RawObject>, StoreError> {
        let mut guard = self.lock()?;
        let tx = guard.transaction().map_err(|err| db_error(&err))?;
        let items = load_scoped(&tx, kind, scope)?;
        let revision = read_meta(&tx)?.revision;
        tx.commit().map_err(|err| db_error(&err))?;
        Ok(ObjectList {
            items,
            revision: Some(ResourceVersion::new(revision)),
        })
    }

    fn update(&self, object: RawObject) -> Result<RawObject, StoreError> {
        validate_address(&object)?;
        self.write(|write| {
            let address = Address::of(&object);
            let Some(existing) = write.load(&address)? else {
                return Err(StoreError::NotFound(address.to_string()));
            };
            if let Some(expected) = object.metadata.resource_version
                && Some(expected) != existing.metadata.resource_version
            {
                return Err(StoreError::Conflict(format!("{address} is at a newer version than {expected}")));
            }
            let mut stored = object;
            stored.metadata.creation_timestamp = existing.metadata.creation_timestamp;
            stored.metadata.deletion_timestamp = existing.metadata.deletion_timestamp;
            stored.metadata.resource_version = Some(write.next_revision());
            if stored.metadata.is_deleting() && stored.metadata.finalizers.is_empty() {
                write.remove(&address)?;
                write.record(&address, Some(&existing), None)?;
                return Ok(stored);
            }
            write.store(&stored)?;
            write.record(&address, Some(&existing), Some(&stored))?;
            Ok(stored)
        })
    }

    fn delete(&self, kind: &str, namespace: &str, name: &str) -> Result<(), StoreError> {
        let address = Address::new(kind, namespace, name);
        self.write(|write| write.delete(&address))
    }

    fn delete_collection(&self, kind: &str, scope: &Scope, selector: &FieldSelector) -> Result<usize, StoreError> {
        self.write(|write| {
            let matching: Vec<RawObject> = load_scoped(write.connection, kind, scope)?
                .into_iter()
                .filter(|object| !object.metadata.is_deleting() && selector.matches(object))
                .collect();
            for object in &matching {
                write.delete(&Address::of(object))?;
            }
            Ok(matching.len())
        })
    }

    fn watch(&self, kind: &str, scope: &Scope) -> Result<WatchStream, StoreError> {
        let mut connection = open_connection(&self.config)?;
        let tx = connection.transaction().map_err(|err| db_error(&err))?;
        let snapshot = load_scoped(&tx, kind, scope)?;
        let cursor = read_meta(&tx)?.revision;
        tx.commit().map_err(|err| db_error(&err))?;

        let (sender, stream) = watch_channel();
        for object in snapshot {
            sender.send(Ok(WatchEvent::Added {
                object,
                initial: true,
            }));
        }
        sender.send(Ok(WatchEvent::SnapshotComplete));

        let worker = WatchWorker {
            connection,
            sender,
            kind: kind.to_string(),
            scope: scope.clone(),
            cursor,
            poll_interval: Duration::from_millis(self.config.watch_poll_interval_ms),
        };
        thread::Builder::new()
            .name("policy-mirror-sqlite-watch".to_string())
            .spawn(move || worker.run())
            .map_err(|err| SqliteStoreError::Io(format!("failed to spawn watch thread: {err}")))?;
        debug!(kind, scope = %scope, revision = cursor, "sqlite watch opened");
        Ok(stream)
    }
}

// ============================================================================
// SECTION: Write Transactions
// ============================================================================

/// Object address within the store.
struct Address {
    /// Kind name.
    kind: String,
    /// Namespace.
    namespace: String,
    /// Object name.
    name: String,
}

impl Address {
    /// Builds an address from its parts.
    fn new(kind: &str, namespace: &str, name: &str) -> Self {
        Self {
            kind: kind.to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    /// Returns the address of `object`.
    fn of(object: &RawObject) -> Self {
        Self::new(&object.kind, &object.metadata.namespace, &object.metadata.name)
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
    }
}

/// Write scope inside one immediate transaction.
struct WriteTx<'a> {
    /// Transaction connection.
    connection: &'a Connection,
    /// Latest revision assigned in this transaction.
    revision: u64,
    /// Timestamp applied to writes in this transaction.
    now: OffsetDateTime,
}

impl WriteTx<'_> {
    /// Assigns the next revision.
    const fn next_revision(&mut self) -> ResourceVersion {
        self.revision += 1;
        ResourceVersion::new(self.revision)
    }

    /// Loads an object by address.
    fn load(&self, address: &Address) -> Result<Option<RawObject>, SqliteStoreError> {
        load_object(self.connection, address)
    }

    /// Inserts or replaces an object row.
    fn store(&self, object: &RawObject) -> Result<(), SqliteStoreError> {
        let object_json = encode_object(object)?;
        let labels_json = labels_json(&object.metadata.labels)?;
        let version = object.metadata.resource_version.map_or(0, ResourceVersion::get);
        self.connection
            .execute(
                "INSERT OR REPLACE INTO objects (kind, namespace, name, labels_json, object_json, resource_version)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    object.kind,
                    object.metadata.namespace,
                    object.metadata.name,
                    labels_json,
                    object_json,
                    to_sql_int(version)?
                ],
            )
            .map_err(|err| db_error(&err))?;
        Ok(())
    }

    /// Removes an object row.
    fn remove(&self, address: &Address) -> Result<(), SqliteStoreError> {
        self.connection
            .execute(
                "DELETE FROM objects WHERE kind = ?1 AND namespace = ?2 AND name = ?3",
                params![address.kind, address.namespace, address.name],
            )
            .map_err(|err| db_error(&err))?;
        Ok(())
    }

    /// Appends a journal entry at the current revision.
    fn record(
        &self,
        address: &Address,
        old: Option<&RawObject>,
        new: Option<&RawObject>,
    ) -> Result<(), SqliteStoreError> {
        let old_json = old.map(encode_object).transpose()?;
        let new_json = new.map(encode_object).transpose()?;
        self.connection
            .execute(
                "INSERT INTO object_events (revision, kind, namespace, old_json, new_json, recorded_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    to_sql_int(self.revision)?,
                    address.kind,
                    address.namespace,
                    old_json,
                    new_json,
                    unix_millis(self.now)
                ],
            )
            .map_err(|err| db_error(&err))?;
        Ok(())
    }

    /// Deletes an object, marking it instead when finalizers remain.
    fn delete(&mut self, address: &Address) -> Result<(), StoreError> {
        let Some(existing) = self.load(address)? else {
            return Err(StoreError::NotFound(address.to_string()));
        };
        if existing.metadata.finalizers.is_empty() {
            self.next_revision();
            self.remove(address)?;
            self.record(address, Some(&existing), None)?;
            return Ok(());
        }
        if existing.metadata.is_deleting() {
            return Ok(());
        }
        let mut marked = existing.clone();
        marked.metadata.deletion_timestamp = Some(self.now);
        marked.metadata.resource_version = Some(self.next_revision());
        self.store(&marked)?;
        self.record(address, Some(&existing), Some(&marked))?;
        Ok(())
    }
}

// ============================================================================
// SECTION: Watch Worker
// ============================================================================

/// Journal poller feeding one watch stream.
struct WatchWorker {
    /// Dedicated connection.
    connection: Connection,
    /// Delivery channel.
    sender: WatchSender,
    /// Watched kind.
    kind: String,
    /// Watched scope.
    scope: Scope,
    /// Last revision delivered.
    cursor: u64,
    /// Delay between polls.
    poll_interval: Duration,
}

impl WatchWorker {
    /// Polls until the consumer goes away or an error ends the watch.
    fn run(mut self) {
        loop {
            thread::sleep(self.poll_interval);
            if self.sender.is_closed() {
                debug!(kind = %self.kind, scope = %self.scope, "sqlite watch closed by consumer");
                return;
            }
            if let Err(err) = self.poll() {
                warn!(kind = %self.kind, scope = %self.scope, error = %err, "sqlite watch failed");
                self.sender.send(Err(err));
                return;
            }
        }
    }

    /// Delivers journal entries past the cursor.
    fn poll(&mut self) -> Result<(), StoreError> {
        let tx = self.connection.transaction().map_err(|err| db_error(&err))?;
        let meta = read_meta(&tx)?;
        if self.cursor < meta.compacted_through {
            return Err(StoreError::Expired(format!(
                "watch at revision {} fell behind journal compaction at {}",
                self.cursor, meta.compacted_through
            )));
        }
        let mut changes = Vec::new();
        {
            let mut statement = tx
                .prepare(
                    "SELECT old_json, new_json FROM object_events
                     WHERE kind = ?1 AND namespace = ?2 AND revision > ?3 AND revision <= ?4
                     ORDER BY revision",
                )
                .map_err(|err| db_error(&err))?;
            let rows = statement
                .query_map(
                    params![self.kind, self.scope.namespace, to_sql_int(self.cursor)?, to_sql_int(meta.revision)?],
                    |row| Ok((row.get::<_, Option<String>>(0)?, row.get::<_, Option<String>>(1)?)),
                )
                .map_err(|err| db_error(&err))?;
            for row in rows {
                let (old_json, new_json) = row.map_err(|err| db_error(&err))?;
                let old = old_json.as_deref().and_then(decode_journal_side);
                let new = new_json.as_deref().and_then(decode_journal_side);
                changes.push((old, new));
            }
        }
        tx.commit().map_err(|err| db_error(&err))?;
        for (old, new) in changes {
            if let Some(event) = classify_change(&self.scope, old.as_ref(), new.as_ref())
                && !self.sender.send(Ok(event))
            {
                return Ok(());
            }
        }
        self.cursor = meta.revision;
        Ok(())
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Store-wide counters.
struct StoreMeta {
    /// Head revision.
    revision: u64,
    /// Highest revision removed from the journal.
    compacted_through: u64,
}

/// Ensures the parent directory exists for the store path.
fn ensure_parent_dir(path: &Path) -> Result<(), SqliteStoreError> {
    let Some(parent) = path.parent() else {
        return Err(SqliteStoreError::Io("store path missing parent directory".to_string()));
    };
    if parent.as_os_str().is_empty() {
        return Ok(());
    }
    std::fs::create_dir_all(parent).map_err(|err| SqliteStoreError::Io(err.to_string()))
}

/// Validates store path limits and rejects directories.
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
            return Err(SqliteStoreError::Invalid("store path contains an overlong component".to_string()));
        }
    }
    if path.exists() && path.is_dir() {
        return Err(SqliteStoreError::Invalid("store path must be a file, not a directory".to_string()));
    }
    Ok(())
}

/// Opens a connection and applies pragmas.
fn open_connection(config: &SqliteStoreConfig) -> Result<Connection, SqliteStoreError> {
    let flags =
        OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
    let connection = Connection::open_with_flags(&config.path, flags).map_err(|err| db_error(&err))?;
    apply_pragmas(&connection, config)?;
    Ok(connection)
}

/// Applies journal, sync, and busy-timeout settings.
fn apply_pragmas(connection: &Connection, config: &SqliteStoreConfig) -> Result<(), SqliteStoreError> {
    connection
        .busy_timeout(Duration::from_millis(config.busy_timeout_ms))
        .map_err(|err| db_error(&err))?;
    connection
        .execute_batch(&format!("PRAGMA journal_mode = {};", config.journal_mode.pragma_value()))
        .map_err(|err| db_error(&err))?;
    connection
        .execute_batch(&format!("PRAGMA synchronous = {};", config.sync_mode.pragma_value()))
        .map_err(|err| db_error(&err))?;
    Ok(())
}

/// Creates tables on first open and checks the schema version.
fn initialize_schema(connection: &mut Connection) -> Result<(), SqliteStoreError> {
    let tx = connection.transaction_with_behavior(TransactionBehavior::Immediate).map_err(|err| db_error(&err))?;
    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS store_meta (
            version INTEGER NOT NULL,
            revision INTEGER NOT NULL,
            compacted_through INTEGER NOT NULL
        );",
    )
    .map_err(|err| db_error(&err))?;
    let version: Option<i64> = tx
        .query_row("SELECT version FROM store_meta LIMIT 1", params![], |row| row.get(0))
        .optional()
        .map_err(|err| db_error(&err))?;
    match version {
        None => {
            tx.execute(
                "INSERT INTO store_meta (version, revision, compacted_through) VALUES (?1, 0, 0)",
                params![SCHEMA_VERSION],
            )
            .map_err(|err| db_error(&err))?;
            tx.execute_batch(
                "CREATE TABLE IF NOT EXISTS objects (
                    kind TEXT NOT NULL,
                    namespace TEXT NOT NULL,
                    name TEXT NOT NULL,
                    labels_json TEXT NOT NULL,
                    object_json TEXT NOT NULL,
                    resource_version INTEGER NOT NULL,
                    PRIMARY KEY (kind, namespace, name)
                );
                CREATE INDEX IF NOT EXISTS idx_objects_scope
                    ON objects (kind, namespace, labels_json);
                CREATE TABLE IF NOT EXISTS object_events (
                    revision INTEGER PRIMARY KEY,
                    kind TEXT NOT NULL,
                    namespace TEXT NOT NULL,
                    old_json TEXT,
                    new_json TEXT,
                    recorded_at INTEGER NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_object_events_scope
                    ON object_events (kind, namespace, revision);",
            )
            .map_err(|err| db_error(&err))?;
        }
        Some(value) if value == SCHEMA_VERSION => {}
        Some(value) => {
            return Err(SqliteStoreError::VersionMismatch(format!("unsupported schema version: {value}")));
        }
    }
    tx.commit().map_err(|err| db_error(&err))?;
    Ok(())
}

/// Reads the store counters.
fn read_meta(connection: &Connection) -> Result<StoreMeta, SqliteStoreError> {
    let (revision, compacted_through): (i64, i64) = connection
        .query_row("SELECT revision, compacted_through FROM store_meta LIMIT 1", params![], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })
        .map_err(|err| db_error(&err))?;
    Ok(StoreMeta {
        revision: from_sql_int(revision)?,
        compacted_through: from_sql_int(compacted_through)?,
    })
}

/// Drops journal entries older than the retention window.
fn compact_journal(connection: &Connection, head: u64, retention: u64) -> Result<(), SqliteStoreError> {
    let Some(floor) = head.checked_sub(retention).filter(|floor| *floor > 0) else {
        return Ok(());
    };
    let floor = to_sql_int(floor)?;
    connection
        .execute("DELETE FROM object_events WHERE revision <= ?1", params![floor])
        .map_err(|err| db_error(&err))?;
    connection
        .execute("UPDATE store_meta SET compacted_through = MAX(compacted_through, ?1)", params![floor])
        .map_err(|err| db_error(&err))?;
    Ok(())
}

/// Loads one object by address.
fn load_object(connection: &Connection, address: &Address) -> Result<Option<RawObject>, SqliteStoreError> {
    let json: Option<String> = connection
        .query_row(
            "SELECT object_json FROM objects WHERE kind = ?1 AND namespace = ?2 AND name = ?3",
            params![address.kind, address.namespace, address.name],
            |row| row.get(0),
        )
        .optional()
        .map_err(|err| db_error(&err))?;
    json.as_deref().map(decode_object).transpose()
}

/// Loads every object of `kind` whose namespace and label set equal the scope's.
fn load_scoped(connection: &Connection, kind: &str, scope: &Scope) -> Result<Vec<RawObject>, SqliteStoreError> {
    let labels = labels_json(&scope.labels)?;
    let mut statement = connection
        .prepare(
            "SELECT object_json FROM objects
             WHERE kind = ?1 AND namespace = ?2 AND labels_json = ?3
             ORDER BY name",
        )
        .map_err(|err| db_error(&err))?;
    let rows = statement
        .query_map(params![kind, scope.namespace, labels], |row| row.get::<_, String>(0))
        .map_err(|err| db_error(&err))?;
    let mut objects = Vec::new();
    for row in rows {
        let json = row.map_err(|err| db_error(&err))?;
        objects.push(decode_object(&json)?);
    }
    Ok(objects)
}

/// Rejects objects missing an address component.
fn validate_address(object: &RawObject) -> Result<(), StoreError> {
    if object.kind.is_empty() || object.metadata.namespace.is_empty() || object.metadata.name.is_empty() {
        return Err(StoreError::Invalid("object kind, namespace, and name must be non-empty".to_string()));
    }
    Ok(())
}

/// Serializes an object row payload.
fn encode_object(object: &RawObject) -> Result<String, SqliteStoreError> {
    serde_json::to_string(object).map_err(|err| SqliteStoreError::Invalid(format!("object encode failed: {err}")))
}

/// Decodes one side of a journal entry, logging and dropping corrupt rows.
fn decode_journal_side(json: &str) -> Option<RawObject> {
    match decode_object(json) {
        Ok(object) => Some(object),
        Err(err) => {
            error!(error = %err, "skipping corrupt journal entry");
            None
        }
    }
}

/// Decodes an object row payload.
fn decode_object(json: &str) -> Result<RawObject, SqliteStoreError> {
    serde_json::from_str(json).map_err(|err| SqliteStoreError::Corrupt(format!("object decode failed: {err}")))
}

/// Serializes a label set in canonical (sorted) form.
fn labels_json(labels: &Labels) -> Result<String, SqliteStoreError> {
    serde_json::to_string(labels).map_err(|err| SqliteStoreError::Invalid(format!("labels encode failed: {err}")))
}

/// Converts a counter to an `SQLite` integer.
fn to_sql_int(value: u64) -> Result<i64, SqliteStoreError> {
    i64::try_from(value).map_err(|_| SqliteStoreError::Invalid(format!("counter {value} exceeds sqlite range")))
}

/// Converts an `SQLite` integer to a counter.
fn from_sql_int(value: i64) -> Result<u64, SqliteStoreError> {
    u64::try_from(value).map_err(|_| SqliteStoreError::Corrupt(format!("negative counter {value}")))
}

/// Returns unix milliseconds for a timestamp.
fn unix_millis(at: OffsetDateTime) -> i64 {
    i64::try_from(at.unix_timestamp_nanos() / 1_000_000).unwrap_or(i64::MAX)
}
