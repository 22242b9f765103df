// crates/policy-mirror-core/src/core/scope.rs
// ============================================================================
// Module: Policy Mirror Scopes
// Description: Namespace and label-set scopes plus field selectors.
// Purpose: Define the isolation boundary between independent rule sets.
// Dependencies: serde, crate::core::object
// ============================================================================

//! ## Overview
//! A [`Scope`] pairs a namespace with a label set. An object belongs to a
//! scope when its namespace matches and its label set is exactly the scope's
//! label set. Exact equality makes scopes with different label sets disjoint,
//! including the empty label set versus any non-empty one.
//!
//! A [`FieldSelector`] is a conjunction of `field = value` terms evaluated
//! against [`RawObject::field_value`].

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;
use serde::Serialize;

use crate::core::object::Labels;
use crate::core::object::ObjectMeta;
use crate::core::object::RawObject;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Namespace used when none is configured.
pub const DEFAULT_NAMESPACE: &str = "default";

// ============================================================================
// SECTION: Scope
// ============================================================================

/// Namespace and label set owned by one adapter/synchronizer pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Scope {
    /// Namespace the scope lives in.
    pub namespace: String,
    /// Exact label set of member objects.
    #[serde(default)]
    pub labels: Labels,
}

impl Scope {
    /// Builds an unlabeled scope in `namespace`.
    #[must_use]
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            labels: Labels::new(),
        }
    }

    /// Adds one label to the scope.
    #[must_use]
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Replaces the scope's label set.
    #[must_use]
    pub fn with_labels(mut self, labels: Labels) -> Self {
        self.labels = labels;
        self
    }

    /// Returns true when the object described by `metadata` is in this scope.
    #[must_use]
    pub fn contains(&self, metadata: &ObjectMeta) -> bool {
        metadata.namespace == self.namespace && metadata.labels == self.labels
    }
}

impl Default for Scope {
    fn default() -> Self {
        Self::new(DEFAULT_NAMESPACE)
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.namespace)?;
        if !self.labels.is_empty() {
            let rendered: Vec<String> =
                self.labels.iter().map(|(key, value)| format!("{key}={value}")).collect();
            write!(f, "[{}]", rendered.join(","))?;
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Field Selector
// ============================================================================

/// Conjunction of exact-match field terms.
///
/// # Invariants
/// - An empty selector matches every object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldSelector {
    /// Required values keyed by field path.
    terms: BTreeMap<String, String>,
}

impl FieldSelector {
    /// Returns an empty selector.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            terms: BTreeMap::new(),
        }
    }

    /// Adds a term requiring `field` to equal `value`.
    #[must_use]
    pub fn with(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(field, value);
        self
    }

    /// Adds or replaces a term.
    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<String>) {
        self.terms.insert(field.into(), value.into());
    }

    /// Returns true when no terms are present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// Iterates terms in field order.
    pub fn terms(&self) -> impl Iterator<Item = (&str, &str)> {
        self.terms.iter().map(|(field, value)| (field.as_str(), value.as_str()))
    }

    /// Returns true when every term matches the object.
    #[must_use]
    pub fn matches(&self, object: &RawObject) -> bool {
        self.terms
            .iter()
            .all(|(field, value)| object.field_value(field).is_some_and(|actual| &actual == value))
    }
}

impl fmt::Display for FieldSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> =
            self.terms.iter().map(|(field, value)| format!("{field}={value}")).collect();
        f.write_str(&rendered.join(","))
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
