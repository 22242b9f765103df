// crates/policy-mirror-core/src/interfaces/mod.rs
// ============================================================================
// Module: Policy Mirror Interfaces
// Description: Backend-agnostic store, watch, engine, and adapter contracts.
// Purpose: Define the seams between object stores, adapters, and engines.
// Dependencies: thiserror, tokio, crate::core
// ============================================================================

//! ## Overview
//! Object stores implement [`ObjectBackend`]: create, get, list, update,
//! delete, delete-collection, and watch over kind-agnostic [`RawObject`]
//! envelopes. Watches deliver [`WatchEvent`] values through a
//! [`WatchStream`]: the initial listing as `Added { initial: true }` events,
//! one [`WatchEvent::SnapshotComplete`] marker, then live changes.
//!
//! Policy engines implement [`PolicyEngine`], the self-mutation surface a
//! synchronizer drives, and consume a [`PolicyAdapter`] for persistence.

// ============================================================================
// SECTION: Imports
// ============================================================================

use thiserror::Error;
use tokio::sync::mpsc;

use crate::core::FieldSelector;
use crate::core::ObjectList;
use crate::core::RawObject;
use crate::core::RuleSet;
use crate::core::Scope;

// ============================================================================
// SECTION: Store Errors
// ============================================================================

/// Object store errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Requested object does not exist.
    #[error("object store not found: {0}")]
    NotFound(String),
    /// Object with the same name already exists.
    #[error("object store already exists: {0}")]
    AlreadyExists(String),
    /// Write raced with another writer.
    #[error("object store conflict: {0}")]
    Conflict(String),
    /// Request or stored data is invalid.
    #[error("object store invalid data: {0}")]
    Invalid(String),
    /// Store is unreachable or failed to execute the request.
    #[error("object store transport error: {0}")]
    Transport(String),
    /// Stored data is corrupted or fails integrity checks.
    #[error("object store corruption: {0}")]
    Corrupt(String),
    /// Watch can no longer be resumed from its position.
    #[error("object store watch expired: {0}")]
    Expired(String),
}

impl StoreError {
    /// Returns true for [`StoreError::NotFound`].
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Returns true for [`StoreError::AlreadyExists`].
    #[must_use]
    pub const fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists(_))
    }
}

// ============================================================================
// SECTION: Watch Events
// ============================================================================

/// Lifecycle event observed by a watch.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent<T> {
    /// Object entered the scope.
    Added {
        /// Object snapshot.
        object: T,
        /// True when delivered as part of the initial listing.
        initial: bool,
    },
    /// Object in scope changed.
    Modified {
        /// Snapshot before the change.
        old: T,
        /// Snapshot after the change.
        new: T,
    },
    /// Object left the scope or was purged.
    Deleted {
        /// Last known snapshot.
        object: T,
    },
    /// Initial listing fully delivered.
    SnapshotComplete,
}

/// Classifies a store change as seen by a watch on `scope`.
///
/// `old` is the object before the write and `new` after; `None` means the
/// object did not exist on that side. Objects moving into the scope surface
/// as additions and objects moving out as deletions.
#[must_use]
pub fn classify_change(
    scope: &Scope,
    old: Option<&RawObject>,
    new: Option<&RawObject>,
) -> Option<WatchEvent<RawObject>> {
    let old = old.filter(|object| scope.contains(&object.metadata));
    let new = new.filter(|object| scope.contains(&object.metadata));
    match (old, new) {
        (None, None) => None,
        (None, Some(new)) => Some(WatchEvent::Added {
            object: new.clone(),
            initial: false,
        }),
        (Some(old), None) => Some(WatchEvent::Deleted {
            object: old.clone(),
        }),
        (Some(old), Some(new)) => Some(WatchEvent::Modified {
            old: old.clone(),
            new: new.clone(),
        }),
    }
}

// ============================================================================
// SECTION: Watch Streams
// ============================================================================

/// Item delivered by a watch stream. An error item is terminal.
pub type WatchItem = Result<WatchEvent<RawObject>, StoreError>;

/// Producer half of a watch, held by the backend.
#[derive(Debug, Clone)]
pub struct WatchSender {
    /// Channel to the consumer.
    sender: mpsc::UnboundedSender<WatchItem>,
}

impl WatchSender {
    /// Delivers an item. Returns false when the consumer has gone away.
    pub fn send(&self, item: WatchItem) -> bool {
        self.sender.send(item).is_ok()
    }

    /// Returns true when the consumer has gone away.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Consumer half of a watch.
///
/// Dropping the stream ends the watch; backends stop delivering once they
/// observe the closed channel.
#[derive(Debug)]
pub struct WatchStream {
    /// Channel from the backend.
    receiver: mpsc::UnboundedReceiver<WatchItem>,
}

impl WatchStream {
    /// Waits for the next item. Returns `None` once the backend is done.
    pub async fn next(&mut self) -> Option<WatchItem> {
        self.receiver.recv().await
    }

    /// Returns the next item if one is already queued.
    pub fn try_next(&mut self) -> Option<WatchItem> {
        self.receiver.try_recv().ok()
    }
}

/// Creates a connected watch sender and stream.
#[must_use]
pub fn watch_channel() -> (WatchSender, WatchStream) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (
        WatchSender {
            sender,
        },
        WatchStream {
            receiver,
        },
    )
}

// ============================================================================
// SECTION: Object Backend
// ============================================================================

/// Capability interface of a declarative object store.
///
/// Implementations guarantee per-object atomicity for create, update, and
/// delete. Objects are addressed by `(kind, namespace, name)`.
pub trait ObjectBackend: Send + Sync {
    /// Creates an object and returns it with store-assigned metadata.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::AlreadyExists`] when the name is taken.
    fn create(&self, object: RawObject) -> Result<RawObject, StoreError>;

    /// Fetches one object.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when the object does not exist.
    fn get(&self, kind: &str, namespace: &str, name: &str) -> Result<RawObject, StoreError>;

    /// Lists objects of `kind` in `scope`, including soft-deleted ones.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the store cannot be read.
    fn list(&self, kind: &str, scope: &Scope) -> Result<ObjectList<RawObject>, StoreError>;

    /// Replaces an object. A set resource version must match the stored one.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] or [`StoreError::Conflict`].
    fn update(&self, object: RawObject) -> Result<RawObject, StoreError>;

    /// Deletes one object. Objects with finalizers are only marked.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when the object does not exist.
    fn delete(&self, kind: &str, namespace: &str, name: &str) -> Result<(), StoreError>;

    /// Deletes every object of `kind` in `scope` matching `selector` as one
    /// request. Returns the number of objects affected.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the store rejects the request.
    fn delete_collection(&self, kind: &str, scope: &Scope, selector: &FieldSelector) -> Result<usize, StoreError>;

    /// Opens a watch on objects of `kind` in `scope`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the watch cannot be established.
    fn watch(&self, kind: &str, scope: &Scope) -> Result<WatchStream, StoreError>;
}

// ============================================================================
// SECTION: Policy Engine
// ============================================================================

/// Policy engine errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// Section is not defined by the engine's model.
    #[error("policy engine unknown section: {0}")]
    UnknownSection(String),
    /// Rule is malformed.
    #[error("policy engine invalid rule: {0}")]
    InvalidRule(String),
    /// Persisting a mutation through the adapter failed.
    #[error("policy engine persistence error: {0}")]
    Persist(String),
    /// Engine state is unavailable.
    #[error("policy engine state error: {0}")]
    State(String),
}

/// Self-mutation surface of an in-memory policy engine.
///
/// Self-mutations change in-memory rules without invoking the engine's own
/// persistence or change notification.
pub trait PolicyEngine: Send + Sync {
    /// Adds a rule. Returns false when it was already present.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] when the rule cannot be applied.
    fn self_add_policy(&self, section: &str, ptype: &str, rule: &[String]) -> Result<bool, EngineError>;

    /// Replaces `old_rule` with `new_rule`. Returns false when `old_rule` was absent.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] when the rule cannot be applied.
    fn self_update_policy(
        &self,
        section: &str,
        ptype: &str,
        old_rule: &[String],
        new_rule: &[String],
    ) -> Result<bool, EngineError>;

    /// Removes a rule. Returns false when it was absent.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] when the rule cannot be applied.
    fn self_remove_policy(&self, section: &str, ptype: &str, rule: &[String]) -> Result<bool, EngineError>;

    /// Enables or disables persistence of caller mutations.
    fn enable_auto_save(&self, enabled: bool);

    /// Enables or disables change notification of caller mutations.
    fn enable_auto_notify_watcher(&self, enabled: bool);
}

// ============================================================================
// SECTION: Policy Adapter
// ============================================================================

/// Adapter errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdapterError {
    /// Request failed validation before reaching the store.
    #[error("policy adapter validation error: {0}")]
    Validation(String),
    /// Store request failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Persistence contract an engine calls into.
pub trait PolicyAdapter: Send + Sync {
    /// Loads every stored rule into `rules` in replay order.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError`] when the store cannot be read.
    fn load_policy(&self, rules: &mut RuleSet) -> Result<(), AdapterError>;

    /// Replaces the stored rules with `rules`.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError`] at the first failed store call.
    fn save_policy(&self, rules: &RuleSet) -> Result<(), AdapterError>;

    /// Stores one rule.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError`] when the store call fails.
    fn add_policy(&self, section: &str, ptype: &str, rule: &[String]) -> Result<(), AdapterError>;

    /// Stores several rules in order.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError`] at the first failed store call.
    fn add_policies(&self, section: &str, ptype: &str, rules: &[Vec<String>]) -> Result<(), AdapterError>;

    /// Removes one rule.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError`] when the store call fails.
    fn remove_policy(&self, section: &str, ptype: &str, rule: &[String]) -> Result<(), AdapterError>;

    /// Removes several rules in order.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError`] at the first failed store call.
    fn remove_policies(&self, section: &str, ptype: &str, rules: &[Vec<String>]) -> Result<(), AdapterError>;

    /// Removes rules matching `field_values` from `field_index` on.
    ///
    /// A `field_index` of `-1` removes every rule of `ptype`.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::Validation`] for an empty filter or an
    /// out-of-range index.
    fn remove_filtered_policy(
        &self,
        section: &str,
        ptype: &str,
        field_index: i32,
        field_values: &[String],
    ) -> Result<(), AdapterError>;
}
