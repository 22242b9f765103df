// crates/policy-mirror-core/src/runtime/memory.rs
// ============================================================================
// Module: Policy Mirror In-Memory Object Store
// Description: Watchable object store kept entirely in process memory.
// Purpose: Provide a deterministic backend for tests and single-process use.
// Dependencies: crate::core, crate::interfaces
// ============================================================================

//! ## Overview
//! [`InMemoryObjectStore`] implements [`ObjectBackend`] over a mutex-guarded
//! map. Objects and watch registrations share one lock, so a new watch takes
//! its snapshot and registers for changes atomically: no write can fall
//! between the two. Clones share state, which lets several adapters and
//! synchronizers in one process observe each other.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;

use crate::core::Clock;
use crate::core::FieldSelector;
use crate::core::ObjectList;
use crate::core::RawObject;
use crate::core::ResourceVersion;
use crate::core::Scope;
use crate::core::SystemClock;
use crate::interfaces::ObjectBackend;
use crate::interfaces::StoreError;
use crate::interfaces::WatchEvent;
use crate::interfaces::WatchSender;
use crate::interfaces::WatchStream;
use crate::interfaces::classify_change;
use crate::interfaces::watch_channel;

// ============================================================================
// SECTION: State
// ============================================================================

/// Object address: kind, namespace, name.
type ObjectKey = (String, String, String);

/// Registered watch.
struct MemoryWatcher {
    /// Watched kind.
    kind: String,
    /// Watched scope.
    scope: Scope,
    /// Delivery channel.
    sender: WatchSender,
}

/// Store contents guarded by one mutex.
#[derive(Default)]
struct MemoryState {
    /// Last assigned revision.
    revision: u64,
    /// Stored objects.
    objects: BTreeMap<ObjectKey, RawObject>,
    /// Live watches.
    watchers: Vec<MemoryWatcher>,
}

impl MemoryState {
    /// Assigns the next revision.
    const fn next_revision(&mut self) -> ResourceVersion {
        self.revision += 1;
        ResourceVersion::new(self.revision)
    }

    /// Delivers a change to matching watches and drops closed ones.
    fn notify(&mut self, old: Option<&RawObject>, new: Option<&RawObject>) {
        let Some(kind) = new.or(old).map(|object| object.kind.clone()) else {
            return;
        };
        self.watchers.retain(|watcher| {
            if watcher.kind != kind {
                return !watcher.sender.is_closed();
            }
            match classify_change(&watcher.scope, old, new) {
                Some(event) => watcher.sender.send(Ok(event)),
                None => !watcher.sender.is_closed(),
            }
        });
    }

    /// Deletes one stored object, marking it instead when finalizers remain.
    fn delete_object(&mut self, key: &ObjectKey, clock: &dyn Clock) -> Result<(), StoreError> {
        let Some(existing) = self.objects.get(key).cloned() else {
            return Err(StoreError::NotFound(format!("{}/{}/{}", key.0, key.1, key.2)));
        };
        if existing.metadata.finalizers.is_empty() {
            self.next_revision();
            self.objects.remove(key);
            self.notify(Some(&existing), None);
            return Ok(());
        }
        if existing.metadata.is_deleting() {
            return Ok(());
        }
        let mut marked = existing.clone();
        marked.metadata.deletion_timestamp = Some(clock.now());
        marked.metadata.resource_version = Some(self.next_revision());
        self.objects.insert(key.clone(), marked.clone());
        self.notify(Some(&existing), Some(&marked));
        Ok(())
    }
}

// ============================================================================
// SECTION: In-Memory Store
// ============================================================================

/// In-memory object store for tests and single-process deployments.
#[derive(Clone)]
pub struct InMemoryObjectStore {
    /// Shared store state.
    state: Arc<Mutex<MemoryState>>,
    /// Timestamp source.
    clock: Arc<dyn Clock>,
}

impl Default for InMemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryObjectStore {
    /// Creates an empty store stamped by the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Creates an empty store stamped by `clock`.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState::default())),
            clock,
        }
    }

    /// Returns the number of live watches.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the store mutex is poisoned.
    pub fn watcher_count(&self) -> Result<usize, StoreError> {
        let mut state = self.lock()?;
        state.watchers.retain(|watcher| !watcher.sender.is_closed());
        Ok(state.watchers.len())
    }

    /// Acquires the state lock.
    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, StoreError> {
        self.state.lock().map_err(|_| StoreError::Transport("in-memory object store mutex poisoned".to_string()))
    }
}

/// Builds the map key for an object.
fn key_of(object: &RawObject) -> ObjectKey {
    (object.kind.clone(), object.metadata.namespace.clone(), object.metadata.name.clone())
}

/// Rejects objects missing an address component.
fn validate_address(object: &RawObject) -> Result<(), StoreError> {
    if object.kind.is_empty() || object.metadata.namespace.is_empty() || object.metadata.name.is_empty() {
        return Err(StoreError::Invalid("object kind, namespace, and name must be non-empty".to_string()));
    }
    Ok(())
}

impl ObjectBackend for InMemoryObjectStore {
    fn create(&self, object: RawObject) -> Result<RawObject, StoreError> {
        validate_address(&object)?;
        let mut state = self.lock()?;
        let key = key_of(&object);
        if state.objects.contains_key(&key) {
            return Err(StoreError::AlreadyExists(format!("{}/{}/{}", key.0, key.1, key.2)));
        }
        let mut stored = object;
        stored.metadata.creation_timestamp = Some(self.clock.now());
        stored.metadata.deletion_timestamp = None;
        stored.metadata.resource_version = Some(state.next_revision());
        state.objects.insert(key, stored.clone());
        state.notify(None, Some(&stored));
        Ok(stored)
    }

    fn get(&self, kind: &str, namespace: &str, name: &str) -> Result<RawObject, StoreError> {
        let state = self.lock()?;
        let key = (kind.to_string(), namespace.to_string(), name.to_string());
        state
            .objects
            .get(&key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("{kind}/{namespace}/{name}")))
    }

    fn list(&self, kind: &str, scope: &Scope) -> Result<ObjectList<RawObject>, StoreError> {
        let state = self.lock()?;
        let items = state
            .objects
            .values()
            .filter(|object| object.kind == kind && scope.contains(&object.metadata))
            .cloned()
            .collect();
        Ok(ObjectList {
            items,
            revision: Some(ResourceVersion::new(state.revision)),
        })
    }

    fn update(&self, object: RawObject) -> Result<RawObject, StoreError> {
        validate_address(&object)?;
        let mut state = self.lock()?;
        let key = key_of(&object);
        let Some(existing) = state.objects.get(&key).cloned() else {
            return Err(StoreError::NotFound(format!("{}/{}/{}", key.0, key.1, key.2)));
        };
        if let Some(expected) = object.metadata.resource_version
            && Some(expected) != existing.metadata.resource_version
        {
            return Err(StoreError::Conflict(format!(
                "{}/{}/{} is at a newer version than {expected}",
                key.0, key.1, key.2
            )));
        }
        let mut stored = object;
        stored.metadata.creation_timestamp = existing.metadata.creation_timestamp;
        stored.metadata.deletion_timestamp = existing.metadata.deletion_timestamp;
        stored.metadata.resource_version = Some(state.next_revision());
        if stored.metadata.is_deleting() && stored.metadata.finalizers.is_empty() {
            state.objects.remove(&key);
            state.notify(Some(&existing), None);
            return Ok(stored);
        }
        state.objects.insert(key, stored.clone());
        state.notify(Some(&existing), Some(&stored));
        Ok(stored)
    }

    fn delete(&self, kind: &str, namespace: &str, name: &str) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        let key = (kind.to_string(), namespace.to_string(), name.to_string());
        state.delete_object(&key, self.clock.as_ref())
    }

    fn delete_collection(&self, kind: &str, scope: &Scope, selector: &FieldSelector) -> Result<usize, StoreError> {
        let mut state = self.lock()?;
        let keys: Vec<ObjectKey> = state
            .objects
            .iter()
            .filter(|(_, object)| {
                object.kind == kind
                    && !object.metadata.is_deleting()
                    && scope.contains(&object.metadata)
                    && selector.matches(object)
            })
            .map(|(key, _)| key.clone())
            .collect();
        for key in &keys {
            state.delete_object(key, self.clock.as_ref())?;
        }
        Ok(keys.len())
    }

    fn watch(&self, kind: &str, scope: &Scope) -> Result<WatchStream, StoreError> {
        let mut state = self.lock()?;
        let (sender, stream) = watch_channel();
        for object in state.objects.values() {
            if object.kind == kind && scope.contains(&object.metadata) {
                sender.send(Ok(WatchEvent::Added {
                    object: object.clone(),
                    initial: true,
                }));
            }
        }
        sender.send(Ok(WatchEvent::SnapshotComplete));
        state.watchers.push(MemoryWatcher {
            kind: kind.to_string(),
            scope: scope.clone(),
            sender,
        });
        Ok(stream)
    }
}
