// crates/policy-mirror-cli/src/lib.rs
// ============================================================================
// Module: Policy Mirror CLI Library
// Description: Shared helpers for the policy-mirror command-line interface.
// Purpose: Provide reusable conversion and logging components for the binary and tests.
// Dependencies: policy-mirror-core, reqwest, serde_yaml, tracing-subscriber, url
// ============================================================================

//! ## Overview
//! This library houses the rule file conversion pipeline and logging setup.
//! The binary entry point (`src/main.rs`) wires these helpers to the
//! configured store.
//!
//! Security posture: CLI inputs are untrusted and must be validated.

// ============================================================================
// SECTION: Modules
// ============================================================================

/// Rule file parsing and rule document rendering.
pub mod convert;
/// Tracing subscriber setup.
pub mod logging;
