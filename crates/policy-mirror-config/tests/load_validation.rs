//! Config load and section validation tests for policy-mirror-config.
// crates/policy-mirror-config/tests/load_validation.rs
// =============================================================================
// Module: Config Load Validation Tests
// Description: Validate config loading guards and section rules.
// Purpose: Ensure config input handling is strict and fail-closed.
// =============================================================================

use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use policy_mirror_config::ConfigError;
use policy_mirror_config::LogFormat;
use policy_mirror_config::LogLevel;
use policy_mirror_config::MirrorConfig;
use policy_mirror_config::StoreType;
use policy_mirror_store_sqlite::SqliteStoreMode;
use tempfile::NamedTempFile;

type TestResult = Result<(), String>;

fn assert_invalid(result: Result<MirrorConfig, ConfigError>, needle: &str) -> TestResult {
    match result {
        Err(error) => {
            let message = error.to_string();
            if message.contains(needle) {
                Ok(())
            } else {
                Err(format!("error {message} did not contain {needle}"))
            }
        }
        Ok(_) => Err("expected invalid config".to_string()),
    }
}

fn ensure(condition: bool, message: &str) -> TestResult {
    if condition { Ok(()) } else { Err(message.to_string()) }
}

// ============================================================================
// SECTION: Load Guards
// ============================================================================

#[test]
fn load_rejects_path_too_long() -> TestResult {
    let long_path = "a/".repeat(2_500);
    assert_invalid(MirrorConfig::load(Some(Path::new(&long_path))), "config path exceeds max length")
}

#[test]
fn load_rejects_path_component_too_long() -> TestResult {
    let long_component = "a".repeat(300);
    assert_invalid(MirrorConfig::load(Some(Path::new(&long_component))), "config path component too long")
}

#[test]
fn load_rejects_oversized_file() -> TestResult {
    let mut file = NamedTempFile::new().map_err(|err| err.to_string())?;
    let payload = vec![b'#'; 1_048_577];
    file.write_all(&payload).map_err(|err| err.to_string())?;
    assert_invalid(MirrorConfig::load(Some(file.path())), "config file exceeds size limit")
}

#[test]
fn load_rejects_non_utf8_file() -> TestResult {
    let mut file = NamedTempFile::new().map_err(|err| err.to_string())?;
    file.write_all(&[0xFF, 0xFE, 0xFF]).map_err(|err| err.to_string())?;
    assert_invalid(MirrorConfig::load(Some(file.path())), "config file must be utf-8")
}

#[test]
fn load_reports_missing_file_as_io() -> TestResult {
    let dir = tempfile::tempdir().map_err(|err| err.to_string())?;
    let missing = dir.path().join("absent.toml");
    match MirrorConfig::load(Some(&missing)) {
        Err(ConfigError::Io(_)) => Ok(()),
        other => Err(format!("expected io error, got {}", other.map_or_else(|err| err.to_string(), |_| "ok".into()))),
    }
}

#[test]
fn load_rejects_malformed_toml() -> TestResult {
    let mut file = NamedTempFile::new().map_err(|err| err.to_string())?;
    file.write_all(b"[scope\nnamespace = ").map_err(|err| err.to_string())?;
    assert_invalid(MirrorConfig::load(Some(file.path())), "config parse error")
}

// ============================================================================
// SECTION: Sections
// ============================================================================

#[test]
fn empty_config_uses_defaults() -> TestResult {
    let config = MirrorConfig::from_toml("").map_err(|err| err.to_string())?;
    let scope = config.scope.to_scope();
    ensure(scope.namespace == "default", "default namespace")?;
    ensure(scope.labels.is_empty(), "no default labels")?;
    ensure(config.store.store_type == StoreType::Memory, "memory store by default")?;
    ensure(config.store.sqlite_config().is_none(), "memory store has no sqlite config")?;
    let sync = config.sync.to_synchronizer_config();
    ensure(sync.sync_timeout == Duration::from_secs(30), "default sync timeout")?;
    ensure(!sync.skip_disable_auto, "auto disabled by default")?;
    ensure(config.logging.level == LogLevel::Info, "info logging by default")?;
    ensure(config.logging.format == LogFormat::Text, "text logging by default")
}

#[test]
fn full_config_round_trips_into_runtime_settings() -> TestResult {
    let config = MirrorConfig::from_toml(
        r#"
[scope]
namespace = "authz"
labels = { tenant = "a", app = "web" }

[store]
type = "sqlite"
path = "data/rules.db"
journal_mode = "delete"
watch_poll_interval_ms = 50
journal_retention = 500

[sync]
sync_timeout_ms = 2000
skip_disable_auto = true

[logging]
level = "debug"
format = "json"
"#,
    )
    .map_err(|err| err.to_string())?;
    let scope = config.scope.to_scope();
    ensure(scope.namespace == "authz", "namespace")?;
    ensure(scope.labels.get("tenant").map(String::as_str) == Some("a"), "tenant label")?;
    let sqlite = config.store.sqlite_config().ok_or("sqlite config expected")?;
    ensure(sqlite.path == PathBuf::from("data/rules.db"), "sqlite path")?;
    ensure(sqlite.journal_mode == SqliteStoreMode::Delete, "journal mode")?;
    ensure(sqlite.watch_poll_interval_ms == 50, "poll interval")?;
    ensure(sqlite.journal_retention == 500, "retention")?;
    let sync = config.sync.to_synchronizer_config();
    ensure(sync.sync_timeout == Duration::from_secs(2), "sync timeout")?;
    ensure(sync.skip_disable_auto, "skip disable auto")?;
    ensure(config.logging.level.as_str() == "debug", "debug level")?;
    ensure(config.logging.format == LogFormat::Json, "json format")
}

#[test]
fn sqlite_store_requires_path() -> TestResult {
    assert_invalid(MirrorConfig::from_toml("[store]\ntype = \"sqlite\"\n"), "sqlite store requires path")
}

#[test]
fn memory_store_rejects_path() -> TestResult {
    assert_invalid(MirrorConfig::from_toml("[store]\npath = \"rules.db\"\n"), "memory store must not set path")
}

#[test]
fn poll_interval_out_of_range_is_rejected() -> TestResult {
    assert_invalid(
        MirrorConfig::from_toml("[store]\ntype = \"sqlite\"\npath = \"r.db\"\nwatch_poll_interval_ms = 5\n"),
        "watch_poll_interval_ms",
    )
}

#[test]
fn zero_journal_retention_is_rejected() -> TestResult {
    assert_invalid(
        MirrorConfig::from_toml("[store]\ntype = \"sqlite\"\npath = \"r.db\"\njournal_retention = 0\n"),
        "journal_retention",
    )
}

#[test]
fn sync_timeout_bounds_are_enforced() -> TestResult {
    assert_invalid(MirrorConfig::from_toml("[sync]\nsync_timeout_ms = 99\n"), "sync_timeout_ms")?;
    assert_invalid(MirrorConfig::from_toml("[sync]\nsync_timeout_ms = 600001\n"), "sync_timeout_ms")?;
    MirrorConfig::from_toml("[sync]\nsync_timeout_ms = 100\n").map_err(|err| err.to_string())?;
    Ok(())
}

#[test]
fn blank_namespace_is_rejected() -> TestResult {
    assert_invalid(MirrorConfig::from_toml("[scope]\nnamespace = \" \"\n"), "scope.namespace must be non-empty")
}

#[test]
fn empty_label_value_is_rejected() -> TestResult {
    assert_invalid(
        MirrorConfig::from_toml("[scope]\nlabels = { tenant = \"\" }\n"),
        "label tenant must have a non-empty value",
    )
}

#[test]
fn overlong_label_value_is_rejected() -> TestResult {
    let toml = format!("[scope]\nlabels = {{ tenant = \"{}\" }}\n", "v".repeat(64));
    assert_invalid(MirrorConfig::from_toml(&toml), "value exceeds max length")
}

#[test]
fn unknown_log_level_fails_parse() -> TestResult {
    assert_invalid(MirrorConfig::from_toml("[logging]\nlevel = \"loud\"\n"), "config parse error")
}
