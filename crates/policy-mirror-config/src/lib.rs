// crates/policy-mirror-config/src/lib.rs
// ============================================================================
// Module: Policy Mirror Config Library
// Description: Configuration model and validation for policy-mirror.toml.
// Purpose: Single source of truth for configuration semantics.
// Dependencies: policy-mirror-core, policy-mirror-store-sqlite, serde, toml
// ============================================================================

//! ## Overview
//! `policy-mirror-config` defines the configuration model shared by the
//! `policy-mirror` binary and embedders. Validation is strict and fails
//! closed.
//!
//! Security posture: config inputs are untrusted.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod config;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use config::*;
