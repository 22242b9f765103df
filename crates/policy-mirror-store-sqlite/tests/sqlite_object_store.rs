// crates/policy-mirror-store-sqlite/tests/sqlite_object_store.rs
// ============================================================================
// Module: SQLite Object Store Tests
// Description: Persistence, journal watches, and mirror integration.
// Purpose: Validate the durable backend matches the in-memory semantics.
// ============================================================================

//! ## Overview
//! Exercises [`SqliteObjectStore`] against temporary database files.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only assertions and helpers are permitted."
)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use policy_mirror_core::FieldSelector;
use policy_mirror_core::KindRegistry;
use policy_mirror_core::MemoryPolicyEngine;
use policy_mirror_core::ObjectBackend;
use policy_mirror_core::ObjectMeta;
use policy_mirror_core::PolicyAdapter;
use policy_mirror_core::RULE_API_VERSION;
use policy_mirror_core::RULE_KIND;
use policy_mirror_core::RawObject;
use policy_mirror_core::RuleAdapter;
use policy_mirror_core::RuleSet;
use policy_mirror_core::Scope;
use policy_mirror_core::StoreError;
use policy_mirror_core::Synchronizer;
use policy_mirror_core::SynchronizerConfig;
use policy_mirror_core::WatchEvent;
use policy_mirror_core::WatchStream;
use policy_mirror_store_sqlite::SqliteObjectStore;
use policy_mirror_store_sqlite::SqliteStoreConfig;
use policy_mirror_store_sqlite::SqliteStoreError;
use serde_json::json;

// ============================================================================
// SECTION: Helpers
// ============================================================================

const EVENT_WAIT: Duration = Duration::from_secs(5);

fn config(path: &Path) -> SqliteStoreConfig {
    let mut config = SqliteStoreConfig::new(path);
    config.watch_poll_interval_ms = 20;
    config
}

fn open(path: &Path) -> SqliteObjectStore {
    SqliteObjectStore::new(config(path)).unwrap()
}

fn rule_object(name: &str, scope: &Scope, v0: &str) -> RawObject {
    RawObject {
        api_version: RULE_API_VERSION.to_string(),
        kind: RULE_KIND.to_string(),
        metadata: ObjectMeta::new(name, scope.namespace.clone(), scope.labels.clone()),
        spec: json!({ "ptype": "p", "v0": v0, "v1": "data1", "v2": "read" }),
    }
}

fn rule(values: &[&str]) -> Vec<String> {
    values.iter().map(ToString::to_string).collect()
}

async fn next_event(stream: &mut WatchStream) -> Result<WatchEvent<RawObject>, StoreError> {
    tokio::time::timeout(EVENT_WAIT, stream.next()).await.expect("watch event timed out").expect("watch ended")
}

async fn drain_snapshot(stream: &mut WatchStream) -> usize {
    let mut initial = 0;
    loop {
        match next_event(stream).await.unwrap() {
            WatchEvent::Added {
                initial: true, ..
            } => initial += 1,
            WatchEvent::SnapshotComplete => return initial,
            other => panic!("unexpected snapshot event: {other:?}"),
        }
    }
}

async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + EVENT_WAIT;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

// ============================================================================
// SECTION: Storage
// ============================================================================

#[test]
fn crud_round_trip_with_versions() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(&dir.path().join("store.db"));
    let scope = Scope::default();

    let created = store.create(rule_object("a", &scope, "alice")).unwrap();
    assert!(created.metadata.creation_timestamp.is_some());
    assert!(matches!(store.create(rule_object("a", &scope, "alice")), Err(StoreError::AlreadyExists(_))));

    let mut changed = created.clone();
    changed.spec = json!({ "ptype": "p", "v0": "alice", "v1": "data2" });
    let updated = store.update(changed).unwrap();
    assert!(updated.metadata.resource_version > created.metadata.resource_version);
    assert_eq!(updated.metadata.creation_timestamp, created.metadata.creation_timestamp);
    assert!(matches!(store.update(created), Err(StoreError::Conflict(_))));

    let fetched = store.get(RULE_KIND, "default", "a").unwrap();
    assert_eq!(fetched.field_value("spec.v1").as_deref(), Some("data2"));

    store.delete(RULE_KIND, "default", "a").unwrap();
    assert!(matches!(store.get(RULE_KIND, "default", "a"), Err(StoreError::NotFound(_))));
    assert!(matches!(store.delete(RULE_KIND, "default", "a"), Err(StoreError::NotFound(_))));
}

#[test]
fn objects_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("store.db");
    let scope = Scope::new("team").with_label("tenant", "a");
    {
        let store = open(&path);
        store.create(rule_object("a", &scope, "alice")).unwrap();
        store.create(rule_object("b", &scope, "bob")).unwrap();
    }
    let store = open(&path);
    let list = store.list(RULE_KIND, &scope).unwrap();
    assert_eq!(list.items.len(), 2);
    assert_eq!(store.revision().unwrap(), 2);
    assert!(store.list(RULE_KIND, &Scope::new("team")).unwrap().items.is_empty());
}

#[test]
fn directory_path_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let result = SqliteObjectStore::new(SqliteStoreConfig::new(dir.path()));
    assert!(matches!(result, Err(SqliteStoreError::Invalid(_))));
}

#[test]
fn out_of_range_poll_interval_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = SqliteStoreConfig::new(dir.path().join("store.db"));
    config.watch_poll_interval_ms = 1;
    assert!(matches!(SqliteObjectStore::new(config), Err(SqliteStoreError::Invalid(_))));
}

#[test]
fn schema_version_mismatch_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.db");
    drop(open(&path));
    let connection = rusqlite::Connection::open(&path).unwrap();
    connection.execute("UPDATE store_meta SET version = 99", ()).unwrap();
    drop(connection);

    let result = SqliteObjectStore::new(config(&path));
    assert!(matches!(result, Err(SqliteStoreError::VersionMismatch(_))));
}

#[test]
fn delete_collection_honors_scope_and_selector() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(&dir.path().join("store.db"));
    let scope = Scope::default();
    let other = Scope::default().with_label("tenant", "b");
    store.create(rule_object("a", &scope, "alice")).unwrap();
    store.create(rule_object("b", &scope, "bob")).unwrap();
    store.create(rule_object("c", &other, "alice")).unwrap();

    let selector = FieldSelector::new().with("spec.v0", "alice");
    assert_eq!(store.delete_collection(RULE_KIND, &scope, &selector).unwrap(), 1);
    assert_eq!(store.list(RULE_KIND, &scope).unwrap().items.len(), 1);
    assert_eq!(store.list(RULE_KIND, &other).unwrap().items.len(), 1);
}

#[test]
fn finalizers_turn_delete_into_a_mark() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(&dir.path().join("store.db"));
    let scope = Scope::default();
    let mut object = rule_object("a", &scope, "alice");
    object.metadata.finalizers = vec!["policy-mirror.dev/hold".to_string()];
    store.create(object).unwrap();

    store.delete(RULE_KIND, "default", "a").unwrap();
    let marked = store.get(RULE_KIND, "default", "a").unwrap();
    assert!(marked.metadata.is_deleting());
    store.delete(RULE_KIND, "default", "a").unwrap();

    let mut released = marked;
    released.metadata.finalizers.clear();
    store.update(released).unwrap();
    assert!(matches!(store.get(RULE_KIND, "default", "a"), Err(StoreError::NotFound(_))));
}

#[test]
fn delete_collection_skips_objects_already_marked() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(&dir.path().join("store.db"));
    let scope = Scope::default();
    let mut held = rule_object("a", &scope, "alice");
    held.metadata.finalizers = vec!["policy-mirror.dev/hold".to_string()];
    store.create(held).unwrap();
    store.create(rule_object("b", &scope, "alice")).unwrap();

    let selector = FieldSelector::new().with("spec.v0", "alice");
    assert_eq!(store.delete_collection(RULE_KIND, &scope, &selector).unwrap(), 2);
    assert_eq!(store.delete_collection(RULE_KIND, &scope, &selector).unwrap(), 0);
    assert!(store.get(RULE_KIND, "default", "a").unwrap().metadata.is_deleting());
}

// ============================================================================
// SECTION: Watches
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn watch_sees_writes_from_another_instance() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.db");
    let watcher = open(&path);
    let writer = open(&path);
    let scope = Scope::default();
    writer.create(rule_object("a", &scope, "alice")).unwrap();

    let mut stream = watcher.watch(RULE_KIND, &scope).unwrap();
    assert_eq!(drain_snapshot(&mut stream).await, 1);

    writer.create(rule_object("b", &scope, "bob")).unwrap();
    writer.create(rule_object("x", &scope.clone().with_label("tenant", "b"), "carol")).unwrap();
    writer.delete(RULE_KIND, "default", "a").unwrap();

    match next_event(&mut stream).await.unwrap() {
        WatchEvent::Added {
            object,
            initial: false,
        } => assert_eq!(object.metadata.name, "b"),
        other => panic!("expected live add, got {other:?}"),
    }
    match next_event(&mut stream).await.unwrap() {
        WatchEvent::Deleted {
            object,
        } => assert_eq!(object.metadata.name, "a"),
        other => panic!("expected delete, got {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn watch_skips_corrupt_journal_rows() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.db");
    let mut settings = SqliteStoreConfig::new(&path);
    settings.watch_poll_interval_ms = 1000;
    let watcher = SqliteObjectStore::new(settings).unwrap();
    let writer = open(&path);
    let scope = Scope::default();
    let mut stream = watcher.watch(RULE_KIND, &scope).unwrap();
    assert_eq!(drain_snapshot(&mut stream).await, 0);

    writer.create(rule_object("a", &scope, "alice")).unwrap();
    let connection = rusqlite::Connection::open(&path).unwrap();
    let tampered = connection
        .execute("UPDATE object_events SET new_json = '{' WHERE new_json LIKE '%\"name\":\"a\"%'", ())
        .unwrap();
    assert_eq!(tampered, 1);
    writer.create(rule_object("b", &scope, "bob")).unwrap();

    match next_event(&mut stream).await.unwrap() {
        WatchEvent::Added {
            object,
            initial: false,
        } => assert_eq!(object.metadata.name, "b"),
        other => panic!("expected live add, got {other:?}"),
    }
    writer.create(rule_object("c", &scope, "carol")).unwrap();
    match next_event(&mut stream).await.unwrap() {
        WatchEvent::Added {
            object, ..
        } => assert_eq!(object.metadata.name, "c"),
        other => panic!("expected live add, got {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn watch_behind_compaction_expires() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.db");
    let mut settings = SqliteStoreConfig::new(&path);
    settings.watch_poll_interval_ms = 300;
    settings.journal_retention = 2;
    let store = SqliteObjectStore::new(settings).unwrap();
    let scope = Scope::default();

    let mut stream = store.watch(RULE_KIND, &scope).unwrap();
    assert_eq!(drain_snapshot(&mut stream).await, 0);
    for index in 0 .. 5 {
        store.create(rule_object(&format!("r{index}"), &scope, "alice")).unwrap();
    }

    assert!(matches!(next_event(&mut stream).await, Err(StoreError::Expired(_))));
}

// ============================================================================
// SECTION: Mirror Integration
// ============================================================================

#[test]
fn adapter_save_and_load_through_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let backend: Arc<dyn ObjectBackend> = Arc::new(open(&dir.path().join("store.db")));
    let adapter = RuleAdapter::new(backend, &KindRegistry::with_rules(), Scope::default()).unwrap();

    let mut rules = RuleSet::new();
    rules.load_policy_line(&["p", "alice", "data1", "read"]);
    rules.load_policy_line(&["g", "alice", "admin"]);
    adapter.save_policy(&rules).unwrap();
    adapter.remove_filtered_policy("p", "p", 0, &rule(&["alice"])).unwrap();

    let mut loaded = RuleSet::new();
    adapter.load_policy(&mut loaded).unwrap();
    assert_eq!(loaded.len(), 1);
    assert!(loaded.contains("g", "g", &rule(&["alice", "admin"])));
}

#[tokio::test(flavor = "multi_thread")]
async fn synchronizer_mirrors_a_peer_process() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.db");
    let registry = KindRegistry::with_rules();
    let peer = RuleAdapter::new(Arc::new(open(&path)), &registry, Scope::default()).unwrap();
    peer.add_policy("p", "p", &rule(&["alice", "data1", "read"])).unwrap();

    let engine = Arc::new(MemoryPolicyEngine::new());
    let config = SynchronizerConfig {
        sync_timeout: Duration::from_secs(5),
        skip_disable_auto: false,
    };
    let mut synchronizer = Synchronizer::new(config, Arc::new(open(&path)), &registry, engine.clone());
    synchronizer.start(Scope::default()).await.unwrap();
    assert!(engine.has_policy(&rule(&["alice", "data1", "read"])).unwrap());

    peer.add_policy("p", "p", &rule(&["bob", "data2", "write"])).unwrap();
    assert!(eventually(|| engine.has_policy(&rule(&["bob", "data2", "write"])).unwrap()).await);
    peer.remove_policy("p", "p", &rule(&["alice", "data1", "read"])).unwrap();
    assert!(eventually(|| !engine.has_policy(&rule(&["alice", "data1", "read"])).unwrap()).await);

    synchronizer.stop();
    synchronizer.join().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn synchronizer_skips_undecodable_rules_from_a_peer() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.db");
    let registry = KindRegistry::with_rules();
    let raw_peer = open(&path);
    let peer = RuleAdapter::new(Arc::new(open(&path)), &registry, Scope::default()).unwrap();
    let mut garbage = rule_object("bad-snapshot", &Scope::default(), "alice");
    garbage.spec = json!({ "ptype": 5 });
    raw_peer.create(garbage.clone()).unwrap();
    peer.add_policy("p", "p", &rule(&["alice", "data1", "read"])).unwrap();

    let engine = Arc::new(MemoryPolicyEngine::new());
    let config = SynchronizerConfig {
        sync_timeout: Duration::from_secs(5),
        skip_disable_auto: false,
    };
    let mut synchronizer = Synchronizer::new(config, Arc::new(open(&path)), &registry, engine.clone());
    synchronizer.start(Scope::default()).await.unwrap();
    assert!(engine.has_policy(&rule(&["alice", "data1", "read"])).unwrap());

    garbage.metadata.name = "bad-live".to_string();
    raw_peer.create(garbage).unwrap();
    peer.add_policy("p", "p", &rule(&["bob", "data2", "write"])).unwrap();
    assert!(eventually(|| engine.has_policy(&rule(&["bob", "data2", "write"])).unwrap()).await);
    assert!(!synchronizer.is_finished());

    synchronizer.stop();
    synchronizer.join().await.unwrap();
}
