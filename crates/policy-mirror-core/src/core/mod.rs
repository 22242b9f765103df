// crates/policy-mirror-core/src/core/mod.rs
// ============================================================================
// Module: Policy Mirror Core Types
// Description: Rule records, object model, scopes, and rule sets.
// Purpose: Provide stable, serializable types shared by stores and engines.
// Dependencies: serde, serde_json, sha2, time
// ============================================================================

//! ## Overview
//! Core types define how a policy rule is projected into a fixed-width record,
//! how that record is wrapped in a named store object, and how scopes select
//! the objects a process owns. These types carry no I/O.

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod clock;
pub mod hashing;
pub mod object;
pub mod record;
pub mod ruleset;
pub mod scope;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use hashing::hash_hex;
pub use object::Labels;
pub use object::ObjectKind;
pub use object::ObjectList;
pub use object::ObjectMeta;
pub use object::RULE_API_VERSION;
pub use object::RULE_KIND;
pub use object::RawObject;
pub use object::ResourceVersion;
pub use object::RuleObject;
pub use record::FIELD_SEPARATOR;
pub use record::PolicyParams;
pub use record::RULE_FIELD_COUNT;
pub use record::RULE_KEY_PREFIX;
pub use record::RuleRecord;
pub use record::section_for_ptype;
pub use record::trim_fields;
pub use ruleset::RuleSet;
pub use scope::DEFAULT_NAMESPACE;
pub use scope::FieldSelector;
pub use scope::Scope;
pub use clock::Clock;
pub use clock::ManualClock;
pub use clock::SystemClock;
