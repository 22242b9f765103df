// crates/policy-mirror-core/src/core/object.rs
// ============================================================================
// Module: Policy Mirror Object Model
// Description: Store object envelopes, metadata, and the rule object kind.
// Purpose: Describe named, namespaced, labeled objects independent of backend.
// Dependencies: serde, serde_json, time, crate::core::record
// ============================================================================

//! ## Overview
//! Stores exchange [`RawObject`] envelopes: an API version, a kind, metadata,
//! and a JSON spec. Typed callers work with an [`ObjectKind`] implementation
//! such as [`RuleObject`], which fixes the spec type and supplies the
//! factories a generic store client needs.
//!
//! Metadata fields managed by the store (creation timestamp, resource version,
//! deletion marker) are omitted from serialized documents when unset, so a
//! freshly built object renders as a minimal document.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use time::OffsetDateTime;

use crate::core::record::RuleRecord;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// API version of rule objects.
pub const RULE_API_VERSION: &str = "policy-mirror.dev/v1alpha1";

/// Kind name of rule objects.
pub const RULE_KIND: &str = "Rule";

/// Object labels keyed by label name.
pub type Labels = BTreeMap<String, String>;

// ============================================================================
// SECTION: Resource Version
// ============================================================================

/// Store-assigned version token.
///
/// # Invariants
/// - Tokens never decrease within one store; every write receives a larger one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceVersion(u64);

impl ResourceVersion {
    /// Wraps a raw version value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw version value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ResourceVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// SECTION: Metadata
// ============================================================================

/// Object metadata shared by every kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    /// Object name, unique per kind and namespace.
    pub name: String,
    /// Owning namespace.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    /// Object labels.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: Labels,
    /// Creation time assigned by the store.
    #[serde(default, skip_serializing_if = "Option::is_none", with = "time::serde::rfc3339::option")]
    pub creation_timestamp: Option<OffsetDateTime>,
    /// Version token assigned by the store on every write.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<ResourceVersion>,
    /// Soft-delete marker set when deletion waits on finalizers.
    #[serde(default, skip_serializing_if = "Option::is_none", with = "time::serde::rfc3339::option")]
    pub deletion_timestamp: Option<OffsetDateTime>,
    /// Finalizers that must clear before a marked object is purged.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub finalizers: Vec<String>,
}

impl ObjectMeta {
    /// Builds metadata for a new object.
    #[must_use]
    pub fn new(name: impl Into<String>, namespace: impl Into<String>, labels: Labels) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            labels,
            ..Self::default()
        }
    }

    /// Returns true when the object carries a soft-delete marker.
    #[must_use]
    pub const fn is_deleting(&self) -> bool {
        self.deletion_timestamp.is_some()
    }
}

// ============================================================================
// SECTION: Raw Objects
// ============================================================================

/// Kind-agnostic object envelope exchanged with backends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawObject {
    /// API version string.
    pub api_version: String,
    /// Kind name.
    pub kind: String,
    /// Object metadata.
    pub metadata: ObjectMeta,
    /// Kind-specific payload.
    #[serde(default)]
    pub spec: Value,
}

impl RawObject {
    /// Returns the value of a selectable field path.
    ///
    /// Supports `metadata.name`, `metadata.namespace`, and `spec.<field>` for
    /// string-valued spec fields. Absent spec fields read as empty.
    #[must_use]
    pub fn field_value(&self, path: &str) -> Option<String> {
        match path {
            "metadata.name" => Some(self.metadata.name.clone()),
            "metadata.namespace" => Some(self.metadata.namespace.clone()),
            _ => {
                let key = path.strip_prefix("spec.")?;
                match self.spec.get(key) {
                    Some(Value::String(value)) => Some(value.clone()),
                    Some(_) => None,
                    None => Some(String::new()),
                }
            }
        }
    }
}

// ============================================================================
// SECTION: Object Kinds
// ============================================================================

/// Typed object kind understood by the generic store client.
pub trait ObjectKind: Clone + Send + Sync + 'static {
    /// Spec payload type.
    type Spec: Serialize + DeserializeOwned + Clone + Send + Sync;

    /// API version string for this kind.
    const API_VERSION: &'static str;
    /// Kind name.
    const KIND: &'static str;
    /// Spec field paths usable in field selectors.
    const SELECTABLE_FIELDS: &'static [&'static str];

    /// Builds an object from metadata and spec.
    fn from_parts(metadata: ObjectMeta, spec: Self::Spec) -> Self;

    /// Returns object metadata.
    fn metadata(&self) -> &ObjectMeta;

    /// Returns mutable object metadata.
    fn metadata_mut(&mut self) -> &mut ObjectMeta;

    /// Returns the spec payload.
    fn spec(&self) -> &Self::Spec;
}

/// Typed list result with the store revision it was read at.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectList<T> {
    /// Listed objects in backend order.
    pub items: Vec<T>,
    /// Store revision observed by the listing.
    pub revision: Option<ResourceVersion>,
}

impl<T> ObjectList<T> {
    /// Returns an empty list.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            items: Vec::new(),
            revision: None,
        }
    }
}

impl<T> Default for ObjectList<T> {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// SECTION: Rule Objects
// ============================================================================

/// Stored envelope holding one rule record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleObject {
    /// Object metadata.
    pub metadata: ObjectMeta,
    /// Rule payload.
    pub spec: RuleRecord,
}

impl RuleObject {
    /// Builds an unsaved rule object named by the record's canonical key.
    #[must_use]
    pub fn for_record(record: RuleRecord, namespace: impl Into<String>, labels: Labels) -> Self {
        let metadata = ObjectMeta::new(record.canonical_key(), namespace, labels);
        Self {
            metadata,
            spec: record,
        }
    }
}

impl ObjectKind for RuleObject {
    type Spec = RuleRecord;

    const API_VERSION: &'static str = RULE_API_VERSION;
    const KIND: &'static str = RULE_KIND;
    const SELECTABLE_FIELDS: &'static [&'static str] =
        &["spec.ptype", "spec.v0", "spec.v1", "spec.v2", "spec.v3", "spec.v4", "spec.v5"];

    fn from_parts(metadata: ObjectMeta, spec: Self::Spec) -> Self {
        Self {
            metadata,
            spec,
        }
    }

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }

    fn spec(&self) -> &Self::Spec {
        &self.spec
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "Test-only assertions are permitted.")]

    use serde_json::json;

    use super::ObjectMeta;
    use super::RawObject;

    #[test]
    fn unset_store_fields_are_omitted() {
        let meta = ObjectMeta::new("rule-abc", "", super::Labels::new());
        let value = serde_json::to_value(&meta).unwrap();
        assert_eq!(value, json!({ "name": "rule-abc" }));
    }

    #[test]
    fn spec_field_paths_resolve() {
        let object = RawObject {
            api_version: super::RULE_API_VERSION.to_string(),
            kind: super::RULE_KIND.to_string(),
            metadata: ObjectMeta::new("rule-abc", "default", super::Labels::new()),
            spec: json!({ "ptype": "p", "v0": "alice" }),
        };
        assert_eq!(object.field_value("spec.v0").as_deref(), Some("alice"));
        assert_eq!(object.field_value("spec.v3").as_deref(), Some(""));
        assert_eq!(object.field_value("metadata.namespace").as_deref(), Some("default"));
        assert_eq!(object.field_value("status.phase"), None);
    }
}
