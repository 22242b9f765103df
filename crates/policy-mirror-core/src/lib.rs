// crates/policy-mirror-core/src/lib.rs
// ============================================================================
// Module: Policy Mirror Core Library
// Description: Public API surface for the policy mirror core.
// Purpose: Expose rule records, store interfaces, and runtime components.
// Dependencies: crate::{core, interfaces, runtime}
// ============================================================================

//! ## Overview
//! Policy mirror persists authorization rules as named objects in a
//! watchable, label-scoped object store and keeps in-memory policy engines
//! synchronized with that store. The core is backend-agnostic: stores plug in
//! through [`ObjectBackend`] and engines through [`PolicyEngine`].

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod core;
pub mod interfaces;
pub mod runtime;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use core::*;

pub use interfaces::AdapterError;
pub use interfaces::EngineError;
pub use interfaces::ObjectBackend;
pub use interfaces::PolicyAdapter;
pub use interfaces::PolicyEngine;
pub use interfaces::StoreError;
pub use interfaces::WatchEvent;
pub use interfaces::WatchItem;
pub use interfaces::WatchSender;
pub use interfaces::WatchStream;
pub use interfaces::classify_change;
pub use interfaces::watch_channel;
pub use runtime::DEFAULT_SYNC_TIMEOUT;
pub use runtime::EngineMirror;
pub use runtime::InMemoryObjectStore;
pub use runtime::KindInfo;
pub use runtime::KindRegistry;
pub use runtime::MemoryPolicyEngine;
pub use runtime::PTYPE_ONLY_FIELD_INDEX;
pub use runtime::PolicyChangeListener;
pub use runtime::RuleAdapter;
pub use runtime::RuleEventHandler;
pub use runtime::StoreClient;
pub use runtime::SyncError;
pub use runtime::SyncState;
pub use runtime::Synchronizer;
pub use runtime::SynchronizerConfig;
pub use runtime::TypedWatch;
