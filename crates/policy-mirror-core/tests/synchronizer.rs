// crates/policy-mirror-core/tests/synchronizer.rs
// ============================================================================
// Module: Synchronizer Tests
// Description: Lifecycle, barrier, and convergence behavior of the mirror.
// Purpose: Validate that watch events reach the engine without write-back.
// ============================================================================

//! ## Overview
//! Drives [`Synchronizer`] against [`InMemoryObjectStore`] and stub backends
//! that stall or fail the watch feed.

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

use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use policy_mirror_core::FieldSelector;
use policy_mirror_core::InMemoryObjectStore;
use policy_mirror_core::KindRegistry;
use policy_mirror_core::MemoryPolicyEngine;
use policy_mirror_core::ObjectBackend;
use policy_mirror_core::ObjectList;
use policy_mirror_core::ObjectMeta;
use policy_mirror_core::PolicyEngine;
use policy_mirror_core::RULE_API_VERSION;
use policy_mirror_core::RULE_KIND;
use policy_mirror_core::RawObject;
use policy_mirror_core::RuleAdapter;
use policy_mirror_core::RuleEventHandler;
use policy_mirror_core::RuleObject;
use policy_mirror_core::RuleRecord;
use policy_mirror_core::Scope;
use policy_mirror_core::StoreError;
use policy_mirror_core::SyncError;
use policy_mirror_core::SyncState;
use policy_mirror_core::Synchronizer;
use policy_mirror_core::SynchronizerConfig;
use policy_mirror_core::WatchEvent;
use policy_mirror_core::WatchSender;
use policy_mirror_core::WatchStream;
use policy_mirror_core::watch_channel;
use serde_json::json;

// ============================================================================
// SECTION: Helpers
// ============================================================================

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const POLL_WINDOW: Duration = Duration::from_secs(3);

fn rule(values: &[&str]) -> Vec<String> {
    values.iter().map(ToString::to_string).collect()
}

fn config() -> SynchronizerConfig {
    SynchronizerConfig {
        sync_timeout: Duration::from_secs(5),
        skip_disable_auto: false,
    }
}

fn synchronizer_for(backend: Arc<dyn ObjectBackend>, engine: Arc<MemoryPolicyEngine>) -> Synchronizer {
    Synchronizer::new(config(), backend, &KindRegistry::with_rules(), engine)
}

fn undecodable_rule(name: &str) -> RawObject {
    let scope = Scope::default();
    RawObject {
        api_version: RULE_API_VERSION.to_string(),
        kind: RULE_KIND.to_string(),
        metadata: ObjectMeta::new(name, scope.namespace, scope.labels),
        spec: json!({ "ptype": 5 }),
    }
}

async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + POLL_WINDOW;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// Backend whose watch is controlled by the test.
#[derive(Default)]
struct ScriptedWatch {
    inner: InMemoryObjectStore,
    senders: Mutex<Vec<WatchSender>>,
    refuse: bool,
}

impl ScriptedWatch {
    fn refusing() -> Self {
        Self {
            refuse: true,
            ..Self::default()
        }
    }

    fn sender(&self) -> WatchSender {
        self.senders.lock().unwrap()[0].clone()
    }
}

impl ObjectBackend for ScriptedWatch {
    fn create(&self, object: RawObject) -> Result<RawObject, StoreError> {
        self.inner.create(object)
    }

    fn get(&self, kind: &str, namespace: &str, name: &str) -> Result<RawObject, StoreError> {
        self.inner.get(kind, namespace, name)
    }

    fn list(&self, kind: &str, scope: &Scope) -> Result<ObjectList<RawObject>, StoreError> {
        self.inner.list(kind, scope)
    }

    fn update(&self, object: RawObject) -> Result<RawObject, StoreError> {
        self.inner.update(object)
    }

    fn delete(&self, kind: &str, namespace: &str, name: &str) -> Result<(), StoreError> {
        self.inner.delete(kind, namespace, name)
    }

    fn delete_collection(&self, kind: &str, scope: &Scope, selector: &FieldSelector) -> Result<usize, StoreError> {
        self.inner.delete_collection(kind, scope, selector)
    }

    fn watch(&self, _kind: &str, _scope: &Scope) -> Result<WatchStream, StoreError> {
        if self.refuse {
            return Err(StoreError::Transport("watch refused".to_string()));
        }
        let (sender, stream) = watch_channel();
        self.senders.lock().unwrap().push(sender);
        Ok(stream)
    }
}

/// Handler recording event kinds in arrival order.
#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<String>>,
}

impl RuleEventHandler for Recorder {
    fn on_add(&self, _engine: &dyn PolicyEngine, object: &RuleObject, initial: bool) {
        self.events.lock().unwrap().push(format!("add:{}:{initial}", object.spec.v0));
    }

    fn on_update(&self, _engine: &dyn PolicyEngine, old: &RuleObject, new: &RuleObject) {
        self.events.lock().unwrap().push(format!("update:{}:{}", old.spec.v0, new.spec.v0));
    }

    fn on_delete(&self, _engine: &dyn PolicyEngine, object: &RuleObject) {
        self.events.lock().unwrap().push(format!("delete:{}", object.spec.v0));
    }
}

// ============================================================================
// SECTION: Lifecycle
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn start_returns_after_initial_snapshot_is_applied() {
    let backend = Arc::new(InMemoryObjectStore::new());
    let writer = RuleAdapter::new(backend.clone(), &KindRegistry::with_rules(), Scope::default()).unwrap();
    writer.add_one("p", &rule(&["alice", "data1", "read"])).unwrap();
    writer.add_one("g", &rule(&["alice", "admin"])).unwrap();

    let engine = Arc::new(MemoryPolicyEngine::new());
    let mut sync = synchronizer_for(backend, engine.clone());
    assert_eq!(sync.state(), SyncState::Created);

    sync.start(Scope::default()).await.unwrap();

    assert_eq!(sync.state(), SyncState::Synced);
    assert!(engine.has_policy(&rule(&["alice", "data1", "read"])).unwrap());
    assert!(engine.has_named_policy("g", &rule(&["alice", "admin"])).unwrap());
    sync.stop();
}

#[tokio::test(flavor = "multi_thread")]
async fn construction_disables_engine_write_back() {
    let engine = Arc::new(MemoryPolicyEngine::new());
    let _sync = synchronizer_for(Arc::new(InMemoryObjectStore::new()), engine.clone());
    assert!(!engine.is_auto_save_enabled());
    assert!(!engine.is_auto_notify_enabled());

    let kept = Arc::new(MemoryPolicyEngine::new());
    let _sync = Synchronizer::new(
        SynchronizerConfig {
            skip_disable_auto: true,
            ..config()
        },
        Arc::new(InMemoryObjectStore::new()),
        &KindRegistry::with_rules(),
        kept.clone(),
    );
    assert!(kept.is_auto_save_enabled());
    assert!(kept.is_auto_notify_enabled());
}

#[tokio::test(flavor = "multi_thread")]
async fn stop_is_idempotent_and_terminal() {
    let engine = Arc::new(MemoryPolicyEngine::new());
    let mut never_started = synchronizer_for(Arc::new(InMemoryObjectStore::new()), engine.clone());
    never_started.stop();
    never_started.stop();
    assert_eq!(never_started.state(), SyncState::Stopped);
    assert!(matches!(
        never_started.start(Scope::default()).await,
        Err(SyncError::InvalidState(SyncState::Stopped))
    ));

    let mut sync = synchronizer_for(Arc::new(InMemoryObjectStore::new()), engine);
    sync.start(Scope::default()).await.unwrap();
    sync.stop();
    sync.stop();
    sync.join().await.unwrap();
    assert_eq!(sync.state(), SyncState::Stopped);
    assert!(matches!(sync.start(Scope::default()).await, Err(SyncError::InvalidState(SyncState::Stopped))));
}

#[tokio::test(flavor = "multi_thread")]
async fn second_start_is_rejected() {
    let engine = Arc::new(MemoryPolicyEngine::new());
    let mut sync = synchronizer_for(Arc::new(InMemoryObjectStore::new()), engine);
    sync.start(Scope::default()).await.unwrap();
    assert!(matches!(sync.start(Scope::default()).await, Err(SyncError::InvalidState(SyncState::Synced))));
}

#[tokio::test(flavor = "multi_thread")]
async fn state_changes_are_published() {
    let engine = Arc::new(MemoryPolicyEngine::new());
    let mut sync = synchronizer_for(Arc::new(InMemoryObjectStore::new()), engine);
    let mut states = sync.subscribe_state();
    sync.start(Scope::default()).await.unwrap();
    assert_eq!(*states.borrow_and_update(), SyncState::Synced);

    sync.stop();
    states.changed().await.unwrap();
    assert_eq!(*states.borrow(), SyncState::Stopped);
}

// ============================================================================
// SECTION: Start Failures
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn refused_watch_fails_start_and_stops() {
    let engine = Arc::new(MemoryPolicyEngine::new());
    let mut sync = synchronizer_for(Arc::new(ScriptedWatch::refusing()), engine);
    let err = sync.start(Scope::default()).await.unwrap_err();
    assert!(matches!(err, SyncError::Watch(StoreError::Transport(_))));
    assert_eq!(sync.state(), SyncState::Stopped);
}

#[tokio::test(flavor = "multi_thread")]
async fn stalled_snapshot_times_out() {
    let engine = Arc::new(MemoryPolicyEngine::new());
    let mut sync = Synchronizer::new(
        SynchronizerConfig {
            sync_timeout: Duration::from_millis(200),
            skip_disable_auto: false,
        },
        Arc::new(ScriptedWatch::default()),
        &KindRegistry::with_rules(),
        engine,
    );
    let err = sync.start(Scope::default()).await.unwrap_err();
    assert!(matches!(err, SyncError::BarrierTimeout(200)));
    assert_eq!(sync.state(), SyncState::Stopped);
}

#[tokio::test(flavor = "multi_thread")]
async fn cancel_unblocks_a_pending_barrier() {
    let engine = Arc::new(MemoryPolicyEngine::new());
    let mut sync = synchronizer_for(Arc::new(ScriptedWatch::default()), engine);
    let token = sync.cancellation_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        token.cancel();
    });

    let err = tokio::time::timeout(Duration::from_secs(2), sync.start(Scope::default())).await.unwrap().unwrap_err();

    assert!(matches!(err, SyncError::Canceled));
    assert_eq!(sync.state(), SyncState::Stopped);
}

#[tokio::test(flavor = "multi_thread")]
async fn feed_error_before_snapshot_surfaces_from_start() {
    let backend = Arc::new(ScriptedWatch::default());
    let engine = Arc::new(MemoryPolicyEngine::new());
    let mut sync = synchronizer_for(backend.clone(), engine);
    let feeder = backend.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        feeder.sender().send(Err(StoreError::Expired("compacted".to_string())));
    });

    let err = sync.start(Scope::default()).await.unwrap_err();

    assert!(matches!(err, SyncError::Watch(StoreError::Expired(_))));
}

// ============================================================================
// SECTION: Live Events
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn peer_writes_converge_into_engine() {
    let backend = Arc::new(InMemoryObjectStore::new());
    let scope = Scope::default().with_label("tenant", "a");
    let writer = RuleAdapter::new(backend.clone(), &KindRegistry::with_rules(), scope.clone()).unwrap();
    let engine = Arc::new(MemoryPolicyEngine::new());
    let mut sync = synchronizer_for(backend.clone(), engine.clone());
    sync.start(scope).await.unwrap();

    writer.add_one("p", &rule(&["alice", "data1", "read"])).unwrap();
    writer.add_one("p", &rule(&["bob", "data2", "write"])).unwrap();
    assert!(eventually(|| engine.named_policy("p").unwrap().len() == 2).await);

    writer.remove_filtered("p", 0, &rule(&["alice"])).unwrap();
    assert!(eventually(|| !engine.has_policy(&rule(&["alice", "data1", "read"])).unwrap()).await);
    assert!(engine.has_policy(&rule(&["bob", "data2", "write"])).unwrap());

    writer.remove_one("p", &rule(&["bob", "data2", "write"])).unwrap();
    assert!(eventually(|| engine.named_policy("p").unwrap().is_empty()).await);
}

#[tokio::test(flavor = "multi_thread")]
async fn other_label_sets_do_not_reach_the_engine() {
    let backend = Arc::new(InMemoryObjectStore::new());
    let other = RuleAdapter::new(
        backend.clone(),
        &KindRegistry::with_rules(),
        Scope::default().with_label("tenant", "b"),
    )
    .unwrap();
    let own = RuleAdapter::new(
        backend.clone(),
        &KindRegistry::with_rules(),
        Scope::default().with_label("tenant", "a"),
    )
    .unwrap();
    let engine = Arc::new(MemoryPolicyEngine::new());
    let mut sync = synchronizer_for(backend.clone(), engine.clone());
    sync.start(Scope::default().with_label("tenant", "a")).await.unwrap();

    other.add_one("p", &rule(&["mallory", "data1", "read"])).unwrap();
    own.add_one("p", &rule(&["alice", "data1", "read"])).unwrap();

    assert!(eventually(|| engine.has_policy(&rule(&["alice", "data1", "read"])).unwrap()).await);
    assert_eq!(engine.named_policy("p").unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn relabeled_object_updates_and_leaves_the_mirror() {
    let backend = Arc::new(InMemoryObjectStore::new());
    let writer = RuleAdapter::new(backend.clone(), &KindRegistry::with_rules(), Scope::default()).unwrap();
    let tuple = rule(&["alice", "data1", "read"]);
    writer.add_one("p", &tuple).unwrap();
    let engine = Arc::new(MemoryPolicyEngine::new());
    let mut sync = synchronizer_for(backend.clone(), engine.clone());
    sync.start(Scope::default()).await.unwrap();

    let name = RuleRecord::project("p", &tuple).canonical_key();
    let mut object = backend.get(RULE_KIND, "default", &name).unwrap();
    object.spec["v2"] = "write".into();
    let object = backend.update(object).unwrap();
    assert!(eventually(|| engine.has_policy(&rule(&["alice", "data1", "write"])).unwrap()).await);
    assert!(!engine.has_policy(&tuple).unwrap());

    let mut moved = object;
    moved.metadata.labels.insert("tenant".to_string(), "b".to_string());
    backend.update(moved).unwrap();
    assert!(eventually(|| engine.named_policy("p").unwrap().is_empty()).await);
}

#[tokio::test(flavor = "multi_thread")]
async fn soft_delete_removes_rule_before_purge() {
    let backend = Arc::new(InMemoryObjectStore::new());
    let writer = RuleAdapter::new(backend.clone(), &KindRegistry::with_rules(), Scope::default()).unwrap();
    let tuple = rule(&["alice", "data1", "read"]);
    writer.add_one("p", &tuple).unwrap();
    let name = RuleRecord::project("p", &tuple).canonical_key();
    let mut object = backend.get(RULE_KIND, "default", &name).unwrap();
    object.metadata.finalizers.push("policy-mirror.dev/hold".to_string());
    backend.update(object).unwrap();

    let engine = Arc::new(MemoryPolicyEngine::new());
    let mut sync = synchronizer_for(backend.clone(), engine.clone());
    sync.start(Scope::default()).await.unwrap();
    assert!(engine.has_policy(&tuple).unwrap());

    writer.remove_one("p", &tuple).unwrap();
    assert!(eventually(|| !engine.has_policy(&tuple).unwrap()).await);

    let mut marked = backend.get(RULE_KIND, "default", &name).unwrap();
    assert!(marked.metadata.is_deleting());
    marked.metadata.finalizers.clear();
    backend.update(marked).unwrap();
    assert!(eventually(|| backend.get(RULE_KIND, "default", &name).is_err()).await);
    assert!(!engine.has_policy(&tuple).unwrap());
}

#[tokio::test(flavor = "multi_thread")]
async fn marked_objects_in_snapshot_are_skipped() {
    let backend = Arc::new(InMemoryObjectStore::new());
    let writer = RuleAdapter::new(backend.clone(), &KindRegistry::with_rules(), Scope::default()).unwrap();
    let tuple = rule(&["alice", "data1", "read"]);
    writer.add_one("p", &tuple).unwrap();
    let name = RuleRecord::project("p", &tuple).canonical_key();
    let mut object = backend.get(RULE_KIND, "default", &name).unwrap();
    object.metadata.finalizers.push("policy-mirror.dev/hold".to_string());
    backend.update(object).unwrap();
    backend.delete(RULE_KIND, "default", &name).unwrap();

    let engine = Arc::new(MemoryPolicyEngine::new());
    let mut sync = synchronizer_for(backend, engine.clone());
    sync.start(Scope::default()).await.unwrap();

    assert!(!engine.has_policy(&tuple).unwrap());
}

#[tokio::test(flavor = "multi_thread")]
async fn undecodable_objects_are_skipped_without_ending_the_feed() {
    let backend = Arc::new(InMemoryObjectStore::new());
    let writer = RuleAdapter::new(backend.clone(), &KindRegistry::with_rules(), Scope::default()).unwrap();
    backend.create(undecodable_rule("bad-snapshot")).unwrap();
    writer.add_one("p", &rule(&["alice", "data1", "read"])).unwrap();

    let engine = Arc::new(MemoryPolicyEngine::new());
    let mut sync = synchronizer_for(backend.clone(), engine.clone());
    sync.start(Scope::default()).await.unwrap();
    assert!(engine.has_policy(&rule(&["alice", "data1", "read"])).unwrap());

    backend.create(undecodable_rule("bad-live")).unwrap();
    writer.add_one("p", &rule(&["bob", "data2", "write"])).unwrap();

    assert!(eventually(|| engine.has_policy(&rule(&["bob", "data2", "write"])).unwrap()).await);
    assert_eq!(sync.state(), SyncState::Synced);
    assert!(!sync.is_finished());
}

#[tokio::test(flavor = "multi_thread")]
async fn rule_rewritten_into_an_undecodable_shape_leaves_the_mirror() {
    let backend = Arc::new(InMemoryObjectStore::new());
    let writer = RuleAdapter::new(backend.clone(), &KindRegistry::with_rules(), Scope::default()).unwrap();
    let tuple = rule(&["alice", "data1", "read"]);
    writer.add_one("p", &tuple).unwrap();
    let engine = Arc::new(MemoryPolicyEngine::new());
    let mut sync = synchronizer_for(backend.clone(), engine.clone());
    sync.start(Scope::default()).await.unwrap();

    let name = RuleRecord::project("p", &tuple).canonical_key();
    let mut object = backend.get(RULE_KIND, "default", &name).unwrap();
    object.spec = json!({ "ptype": 5 });
    backend.update(object).unwrap();

    assert!(eventually(|| !engine.has_policy(&tuple).unwrap()).await);
    assert_eq!(sync.state(), SyncState::Synced);
}

#[tokio::test(flavor = "multi_thread")]
async fn custom_handler_sees_events_in_order() {
    let backend = Arc::new(InMemoryObjectStore::new());
    let writer = RuleAdapter::new(backend.clone(), &KindRegistry::with_rules(), Scope::default()).unwrap();
    writer.add_one("p", &rule(&["alice"])).unwrap();
    let recorder = Arc::new(Recorder::default());
    let mut sync = synchronizer_for(backend.clone(), Arc::new(MemoryPolicyEngine::new())).with_handler(recorder.clone());
    sync.start(Scope::default()).await.unwrap();

    writer.add_one("p", &rule(&["bob"])).unwrap();
    writer.remove_one("p", &rule(&["alice"])).unwrap();

    assert!(eventually(|| recorder.events.lock().unwrap().len() == 3).await);
    assert_eq!(
        *recorder.events.lock().unwrap(),
        vec!["add:alice:true".to_string(), "add:bob:false".to_string(), "delete:alice".to_string()]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn feed_failure_after_sync_ends_the_task() {
    let backend = Arc::new(ScriptedWatch::default());
    let engine = Arc::new(MemoryPolicyEngine::new());
    let mut sync = synchronizer_for(backend.clone(), engine);
    let feeder = backend.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        feeder.sender().send(Ok(WatchEvent::SnapshotComplete));
    });
    sync.start(Scope::default()).await.unwrap();

    backend.sender().send(Err(StoreError::Transport("connection lost".to_string())));

    let joined = tokio::time::timeout(Duration::from_secs(2), sync.join()).await.unwrap();
    assert!(matches!(joined, Err(SyncError::Watch(StoreError::Transport(_)))));
    assert_eq!(sync.state(), SyncState::Stopped);
}
