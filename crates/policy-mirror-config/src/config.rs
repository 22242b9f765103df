// crates/policy-mirror-config/src/config.rs
// ============================================================================
// Module: Policy Mirror Configuration
// Description: Configuration loading and validation for policy-mirror.
// Purpose: Provide strict, fail-closed config parsing with hard limits.
// Dependencies: policy-mirror-core, policy-mirror-store-sqlite, serde, toml
// ============================================================================

//! ## Overview
//! Configuration is loaded from a TOML file with strict size and path limits.
//! Missing or invalid configuration fails closed. Every section has defaults,
//! so an empty file yields an in-memory store mirroring the unlabeled
//! `default` scope.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::env;
use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use policy_mirror_core::DEFAULT_NAMESPACE;
use policy_mirror_core::Labels;
use policy_mirror_core::Scope;
use policy_mirror_core::SynchronizerConfig;
use policy_mirror_store_sqlite::MAX_WATCH_POLL_INTERVAL_MS;
use policy_mirror_store_sqlite::MIN_WATCH_POLL_INTERVAL_MS;
use policy_mirror_store_sqlite::SqliteStoreConfig;
use policy_mirror_store_sqlite::SqliteStoreMode;
use policy_mirror_store_sqlite::SqliteSyncMode;
use serde::Deserialize;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default configuration filename when no path is specified.
const DEFAULT_CONFIG_NAME: &str = "policy-mirror.toml";
/// Environment variable used to override the config path.
pub const CONFIG_ENV_VAR: &str = "POLICY_MIRROR_CONFIG";
/// Maximum configuration file size in bytes.
pub(crate) const MAX_CONFIG_FILE_SIZE: usize = 1024 * 1024;
/// Maximum length of a single path component.
pub(crate) const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
pub(crate) const MAX_TOTAL_PATH_LENGTH: usize = 4096;
/// Maximum namespace length.
pub(crate) const MAX_NAMESPACE_LENGTH: usize = 253;
/// Maximum label key length.
pub(crate) const MAX_LABEL_KEY_LENGTH: usize = 253;
/// Maximum label value length.
pub(crate) const MAX_LABEL_VALUE_LENGTH: usize = 63;
/// Minimum sync timeout in milliseconds.
pub(crate) const MIN_SYNC_TIMEOUT_MS: u64 = 100;
/// Maximum sync timeout in milliseconds.
pub(crate) const MAX_SYNC_TIMEOUT_MS: u64 = 600_000;

// ============================================================================
// SECTION: Root Config
// ============================================================================

/// Top-level policy-mirror configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MirrorConfig {
    /// Namespace and label set to operate on.
    #[serde(default)]
    pub scope: ScopeConfig,
    /// Object store backend.
    #[serde(default)]
    pub store: StoreConfig,
    /// Synchronizer settings.
    #[serde(default)]
    pub sync: SyncConfig,
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl MirrorConfig {
    /// Loads configuration from disk using the default resolution rules.
    ///
    /// The path is taken from `path`, then the `POLICY_MIRROR_CONFIG`
    /// environment variable, then `policy-mirror.toml` in the working
    /// directory.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when loading or validation fails.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let resolved = resolve_path(path)?;
        validate_path(&resolved)?;
        let bytes = fs::read(&resolved).map_err(|err| ConfigError::Io(err.to_string()))?;
        if bytes.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::Invalid("config file exceeds size limit".to_string()));
        }
        let content =
            std::str::from_utf8(&bytes).map_err(|_| ConfigError::Invalid("config file must be utf-8".to_string()))?;
        Self::from_toml(content)
    }

    /// Parses and validates configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when parsing or validation fails.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration for internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.scope.validate()?;
        self.store.validate()?;
        self.sync.validate()?;
        Ok(())
    }
}

// ============================================================================
// SECTION: Scope
// ============================================================================

/// Namespace and label set configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ScopeConfig {
    /// Namespace holding rule objects.
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Exact label set stamped on and required of rule objects.
    #[serde(default)]
    pub labels: Labels,
}

impl Default for ScopeConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            labels: Labels::new(),
        }
    }
}

impl ScopeConfig {
    /// Returns the runtime scope.
    #[must_use]
    pub fn to_scope(&self) -> Scope {
        Scope::new(self.namespace.clone()).with_labels(self.labels.clone())
    }

    /// Validates namespace and label limits.
    fn validate(&self) -> Result<(), ConfigError> {
        validate_namespace(&self.namespace)?;
        validate_labels(&self.labels)
    }
}

/// Validates a namespace string.
///
/// # Errors
///
/// Returns [`ConfigError::Invalid`] when the namespace is empty, too long,
/// or carries surrounding whitespace.
pub fn validate_namespace(namespace: &str) -> Result<(), ConfigError> {
    if namespace.trim().is_empty() {
        return Err(ConfigError::Invalid("scope.namespace must be non-empty".to_string()));
    }
    if namespace.trim() != namespace {
        return Err(ConfigError::Invalid("scope.namespace must not have surrounding whitespace".to_string()));
    }
    if namespace.len() > MAX_NAMESPACE_LENGTH {
        return Err(ConfigError::Invalid("scope.namespace exceeds max length".to_string()));
    }
    Ok(())
}

/// Validates a label set.
///
/// # Errors
///
/// Returns [`ConfigError::Invalid`] when a key or value is empty or too long.
pub fn validate_labels(labels: &Labels) -> Result<(), ConfigError> {
    for (key, value) in labels {
        if key.trim().is_empty() {
            return Err(ConfigError::Invalid("label keys must be non-empty".to_string()));
        }
        if key.len() > MAX_LABEL_KEY_LENGTH {
            return Err(ConfigError::Invalid(format!("label key {key} exceeds max length")));
        }
        if value.trim().is_empty() {
            return Err(ConfigError::Invalid(format!("label {key} must have a non-empty value")));
        }
        if value.len() > MAX_LABEL_VALUE_LENGTH {
            return Err(ConfigError::Invalid(format!("label {key} value exceeds max length")));
        }
    }
    Ok(())
}

// ============================================================================
// SECTION: Store
// ============================================================================

/// Object store backend type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StoreType {
    /// Use the in-memory store (process-local).
    #[default]
    Memory,
    /// Use the `SQLite`-backed durable store.
    Sqlite,
}

/// Object store configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Store backend type.
    #[serde(rename = "type", default)]
    pub store_type: StoreType,
    /// `SQLite` database path when using the sqlite backend.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Busy timeout in milliseconds.
    #[serde(default = "default_store_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// `SQLite` journal mode.
    #[serde(default)]
    pub journal_mode: SqliteStoreMode,
    /// `SQLite` synchronous mode.
    #[serde(default)]
    pub sync_mode: SqliteSyncMode,
    /// Interval between watch journal polls in milliseconds.
    #[serde(default = "default_watch_poll_interval_ms")]
    pub watch_poll_interval_ms: u64,
    /// Number of journal entries kept behind the head revision.
    #[serde(default = "default_journal_retention")]
    pub journal_retention: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            store_type: StoreType::default(),
            path: None,
            busy_timeout_ms: default_store_busy_timeout_ms(),
            journal_mode: SqliteStoreMode::default(),
            sync_mode: SqliteSyncMode::default(),
            watch_poll_interval_ms: default_watch_poll_interval_ms(),
            journal_retention: default_journal_retention(),
        }
    }
}

impl StoreConfig {
    /// Returns the `SQLite` store settings, or `None` for the memory backend.
    #[must_use]
    pub fn sqlite_config(&self) -> Option<SqliteStoreConfig> {
        if self.store_type != StoreType::Sqlite {
            return None;
        }
        let path = self.path.clone()?;
        Some(SqliteStoreConfig {
            path,
            busy_timeout_ms: self.busy_timeout_ms,
            journal_mode: self.journal_mode,
            sync_mode: self.sync_mode,
            watch_poll_interval_ms: self.watch_poll_interval_ms,
            journal_retention: self.journal_retention,
        })
    }

    /// Validates store configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        match self.store_type {
            StoreType::Memory => {
                if self.path.is_some() {
                    return Err(ConfigError::Invalid("memory store must not set path".to_string()));
                }
                Ok(())
            }
            StoreType::Sqlite => {
                let path = self
                    .path
                    .as_ref()
                    .ok_or_else(|| ConfigError::Invalid("sqlite store requires path".to_string()))?;
                validate_store_path(path)?;
                if !(MIN_WATCH_POLL_INTERVAL_MS ..= MAX_WATCH_POLL_INTERVAL_MS).contains(&self.watch_poll_interval_ms)
                {
                    return Err(ConfigError::Invalid(format!(
                        "store.watch_poll_interval_ms must be between {MIN_WATCH_POLL_INTERVAL_MS} and \
                         {MAX_WATCH_POLL_INTERVAL_MS}"
                    )));
                }
                if self.journal_retention == 0 {
                    return Err(ConfigError::Invalid("store.journal_retention must be greater than zero".to_string()));
                }
                Ok(())
            }
        }
    }
}

// ============================================================================
// SECTION: Sync
// ============================================================================

/// Synchronizer configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// Initial snapshot barrier timeout in milliseconds.
    #[serde(default = "default_sync_timeout_ms")]
    pub sync_timeout_ms: u64,
    /// Leaves engine auto-save and auto-notify untouched when set.
    #[serde(default)]
    pub skip_disable_auto: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            sync_timeout_ms: default_sync_timeout_ms(),
            skip_disable_auto: false,
        }
    }
}

impl SyncConfig {
    /// Returns the runtime synchronizer configuration.
    #[must_use]
    pub const fn to_synchronizer_config(&self) -> SynchronizerConfig {
        SynchronizerConfig {
            sync_timeout: Duration::from_millis(self.sync_timeout_ms),
            skip_disable_auto: self.skip_disable_auto,
        }
    }

    /// Validates the sync timeout range.
    fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_SYNC_TIMEOUT_MS ..= MAX_SYNC_TIMEOUT_MS).contains(&self.sync_timeout_ms) {
            return Err(ConfigError::Invalid(format!(
                "sync.sync_timeout_ms must be between {MIN_SYNC_TIMEOUT_MS} and {MAX_SYNC_TIMEOUT_MS}"
            )));
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Logging
// ============================================================================

/// Log verbosity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    /// Trace level.
    Trace,
    /// Debug level.
    Debug,
    /// Info level.
    #[default]
    Info,
    /// Warn level.
    Warn,
    /// Error level.
    Error,
}

impl LogLevel {
    /// Returns the filter directive for this level.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct LoggingConfig {
    /// Default verbosity; `RUST_LOG` takes precedence when set.
    #[serde(default)]
    pub level: LogLevel,
    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration loading or validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O failure while reading configuration.
    #[error("config io error: {0}")]
    Io(String),
    /// TOML parsing error.
    #[error("config parse error: {0}")]
    Parse(String),
    /// Invalid configuration data.
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Returns the default namespace.
fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

/// Returns the default busy timeout in milliseconds.
pub(crate) const fn default_store_busy_timeout_ms() -> u64 {
    5_000
}

/// Returns the default watch poll interval in milliseconds.
pub(crate) const fn default_watch_poll_interval_ms() -> u64 {
    200
}

/// Returns the default journal retention.
pub(crate) const fn default_journal_retention() -> u64 {
    10_000
}

/// Returns the default sync timeout in milliseconds.
pub(crate) const fn default_sync_timeout_ms() -> u64 {
    30_000
}

/// Resolves the config path from CLI or environment defaults.
fn resolve_path(path: Option<&Path>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = path {
        return Ok(path.to_path_buf());
    }
    if let Ok(env_path) = env::var(CONFIG_ENV_VAR) {
        if env_path.len() > MAX_TOTAL_PATH_LENGTH {
            return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
        }
        return Ok(PathBuf::from(env_path));
    }
    Ok(PathBuf::from(DEFAULT_CONFIG_NAME))
}

/// Validates the resolved path against security limits.
fn validate_path(path: &Path) -> Result<(), ConfigError> {
    let text = path.to_string_lossy();
    if text.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
    }
    for component in path.components() {
        let value = component.as_os_str().to_string_lossy();
        if value.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(ConfigError::Invalid("config path component too long".to_string()));
        }
    }
    Ok(())
}

/// Validates the store path string.
fn validate_store_path(path: &Path) -> Result<(), ConfigError> {
    let text = path.to_string_lossy();
    if text.trim().is_empty() {
        return Err(ConfigError::Invalid("store path must be non-empty".to_string()));
    }
    if text.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid("store path exceeds max length".to_string()));
    }
    for component in path.components() {
        let value = component.as_os_str().to_string_lossy();
        if value.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(ConfigError::Invalid("store path component too long".to_string()));
        }
    }
    Ok(())
}

// ============================================================================
// SECTION: Tests
// ============================================================================
