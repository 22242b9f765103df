// crates/policy-mirror-core/src/runtime/registry.rs
// ============================================================================
// Module: Policy Mirror Kind Registry
// Description: Explicit registry of object kinds known to a process.
// Purpose: Resolve kind descriptors without process-wide globals.
// Dependencies: crate::core, crate::interfaces
// ============================================================================

//! ## Overview
//! A [`KindRegistry`] is built once at startup and passed to every
//! [`crate::runtime::StoreClient`] constructor. It records each kind's API
//! version and selectable field paths, which clients use to stamp outgoing
//! objects, reject foreign ones, and validate field selectors.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use crate::core::FieldSelector;
use crate::core::ObjectKind;
use crate::core::RuleObject;
use crate::interfaces::StoreError;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Metadata field paths selectable on every kind.
const METADATA_FIELDS: [&str; 2] = ["metadata.name", "metadata.namespace"];

// ============================================================================
// SECTION: Kind Descriptors
// ============================================================================

/// Descriptor for one registered kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KindInfo {
    /// API version string.
    pub api_version: &'static str,
    /// Kind name.
    pub kind: &'static str,
    /// Spec field paths usable in field selectors.
    pub selectable_fields: &'static [&'static str],
}

impl KindInfo {
    /// Returns the descriptor for `K`.
    #[must_use]
    pub const fn of<K: ObjectKind>() -> Self {
        Self {
            api_version: K::API_VERSION,
            kind: K::KIND,
            selectable_fields: K::SELECTABLE_FIELDS,
        }
    }

    /// Checks that every selector term names a selectable field.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Invalid`] naming the first unknown field.
    pub fn validate_selector(&self, selector: &FieldSelector) -> Result<(), StoreError> {
        for (field, _) in selector.terms() {
            if !METADATA_FIELDS.contains(&field) && !self.selectable_fields.contains(&field) {
                return Err(StoreError::Invalid(format!(
                    "field {field} is not selectable on kind {}",
                    self.kind
                )));
            }
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Registry
// ============================================================================

/// Kinds known to this process keyed by kind name.
#[derive(Debug, Clone, Default)]
pub struct KindRegistry {
    /// Registered descriptors.
    kinds: BTreeMap<&'static str, KindInfo>,
}

impl KindRegistry {
    /// Returns an empty registry.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            kinds: BTreeMap::new(),
        }
    }

    /// Returns a registry holding the rule kind.
    #[must_use]
    pub fn with_rules() -> Self {
        Self::new().with_kind::<RuleObject>()
    }

    /// Registers `K` and returns the registry.
    #[must_use]
    pub fn with_kind<K: ObjectKind>(mut self) -> Self {
        self.register::<K>();
        self
    }

    /// Registers `K`, replacing any earlier descriptor of the same kind name.
    pub fn register<K: ObjectKind>(&mut self) {
        self.kinds.insert(K::KIND, KindInfo::of::<K>());
    }

    /// Looks up a kind by name.
    #[must_use]
    pub fn lookup(&self, kind: &str) -> Option<&KindInfo> {
        self.kinds.get(kind)
    }

    /// Resolves the descriptor registered for `K`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Invalid`] when `K` is not registered or was
    /// registered with a different API version.
    pub fn resolve<K: ObjectKind>(&self) -> Result<KindInfo, StoreError> {
        match self.kinds.get(K::KIND) {
            Some(info) if info.api_version == K::API_VERSION => Ok(*info),
            Some(info) => Err(StoreError::Invalid(format!(
                "kind {} registered as {} not {}",
                K::KIND,
                info.api_version,
                K::API_VERSION
            ))),
            None => Err(StoreError::Invalid(format!("kind {} is not registered", K::KIND))),
        }
    }

    /// Returns the number of registered kinds.
    #[must_use]
    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    /// Returns true when no kinds are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::KindRegistry;
    use crate::core::FieldSelector;
    use crate::core::RuleObject;

    #[test]
    fn unregistered_kind_fails_to_resolve() {
        assert!(KindRegistry::new().resolve::<RuleObject>().is_err());
        assert!(KindRegistry::with_rules().resolve::<RuleObject>().is_ok());
    }

    #[test]
    fn selector_fields_are_validated() {
        let info = KindRegistry::with_rules().resolve::<RuleObject>();
        let Ok(info) = info else {
            unreachable!("rule kind is registered");
        };
        assert!(info.validate_selector(&FieldSelector::new().with("spec.v1", "data1")).is_ok());
        assert!(info.validate_selector(&FieldSelector::new().with("metadata.name", "x")).is_ok());
        assert!(info.validate_selector(&FieldSelector::new().with("spec.owner", "x")).is_err());
    }
}
