// crates/policy-mirror-store-sqlite/src/lib.rs
// ============================================================================
// Module: Policy Mirror SQLite Store Library
// Description: Public API surface for the SQLite object backend.
// Purpose: Expose the durable, watchable object store and its configuration.
// Dependencies: crate::store
// ============================================================================

//! ## Overview
//! This crate provides [`SqliteObjectStore`], an
//! [`policy_mirror_core::ObjectBackend`] persisting objects in `SQLite` and
//! serving watches from an append-only event journal. Several processes can
//! share one database file and observe each other's writes.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod store;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use store::MAX_WATCH_POLL_INTERVAL_MS;
pub use store::MIN_WATCH_POLL_INTERVAL_MS;
pub use store::SqliteObjectStore;
pub use store::SqliteStoreConfig;
pub use store::SqliteStoreError;
pub use store::SqliteStoreMode;
pub use store::SqliteSyncMode;
