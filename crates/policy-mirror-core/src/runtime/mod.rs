// crates/policy-mirror-core/src/runtime/mod.rs
// ============================================================================
// Module: Policy Mirror Runtime
// Description: Store client, adapter, synchronizer, and reference backends.
// Purpose: Connect policy engines to watchable object stores.
// Dependencies: crate::{core, interfaces}, tokio, tokio-util, tracing
// ============================================================================

//! ## Overview
//! Runtime modules implement the write path (engine to [`RuleAdapter`] to
//! [`StoreClient`] to backend) and the read path (backend watch to
//! [`Synchronizer`] to engine). Both paths project rules through the same
//! [`crate::core::RuleRecord`] codec.

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod adapter;
pub mod client;
pub mod engine;
pub mod memory;
pub mod registry;
pub mod synchronizer;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use adapter::PTYPE_ONLY_FIELD_INDEX;
pub use adapter::RuleAdapter;
pub use adapter::filter_selector;
pub use client::StoreClient;
pub use client::TypedWatch;
pub use engine::MemoryPolicyEngine;
pub use engine::PolicyChangeListener;
pub use memory::InMemoryObjectStore;
pub use registry::KindInfo;
pub use registry::KindRegistry;
pub use synchronizer::DEFAULT_SYNC_TIMEOUT;
pub use synchronizer::EngineMirror;
pub use synchronizer::RuleEventHandler;
pub use synchronizer::SyncError;
pub use synchronizer::SyncState;
pub use synchronizer::Synchronizer;
pub use synchronizer::SynchronizerConfig;
