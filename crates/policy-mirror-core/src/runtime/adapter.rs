// crates/policy-mirror-core/src/runtime/adapter.rs
// ============================================================================
// Module: Policy Mirror Rule Adapter
// Description: Engine persistence contract over a scope-bound store client.
// Purpose: Map rule tuples to content-addressed store objects and back.
// Dependencies: tracing, crate::core, crate::interfaces, crate::runtime::client
// ============================================================================

//! ## Overview
//! [`RuleAdapter`] stores each rule as one [`RuleObject`] named by its
//! canonical key. Creates and deletes are idempotent. Loading skips objects
//! carrying a soft-delete marker and replays the rest in creation order, ties
//! broken by resource version, so engine state is reproducible across
//! restarts regardless of the backend's listing order.
//!
//! Bulk operations run sequentially and stop at the first failure; already
//! applied writes are not rolled back. Saving clears the scope before
//! recreating the rule set and is not atomic.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::time::Instant;

use tracing::debug;
use tracing::info;

use crate::core::FieldSelector;
use crate::core::RULE_FIELD_COUNT;
use crate::core::RuleObject;
use crate::core::RuleRecord;
use crate::core::RuleSet;
use crate::core::Scope;
use crate::interfaces::AdapterError;
use crate::interfaces::ObjectBackend;
use crate::interfaces::PolicyAdapter;
use crate::runtime::client::StoreClient;
use crate::runtime::registry::KindRegistry;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Field index meaning "match on rule-type only".
pub const PTYPE_ONLY_FIELD_INDEX: i32 = -1;

// ============================================================================
// SECTION: Adapter
// ============================================================================

/// Rule persistence over a scope-bound store client.
///
/// Object names derive from the rule tuple alone, so label sets sharing a
/// namespace share one name space: storing a rule already held by another
/// label set fails with [`crate::interfaces::StoreError::Conflict`], and
/// [`RuleAdapter::save_all`] stops at that rule. Use separate namespaces
/// when independent rule sets may contain identical rules.
#[derive(Clone)]
pub struct RuleAdapter {
    /// Client for rule objects in the adapter's scope.
    client: StoreClient<RuleObject>,
}

impl RuleAdapter {
    /// Creates an adapter for `scope`.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::Store`] when the rule kind is not registered or
    /// the scope is invalid.
    pub fn new(backend: Arc<dyn ObjectBackend>, registry: &KindRegistry, scope: Scope) -> Result<Self, AdapterError> {
        let client = StoreClient::new(backend, registry, scope)?;
        Ok(Self {
            client,
        })
    }

    /// Returns the adapter's scope.
    #[must_use]
    pub const fn scope(&self) -> &Scope {
        self.client.scope()
    }

    /// Lists live rules in replay order.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::Store`] when listing or decoding fails.
    pub fn load_all(&self) -> Result<Vec<RuleRecord>, AdapterError> {
        let started = Instant::now();
        let mut objects: Vec<RuleObject> =
            self.client.list()?.items.into_iter().filter(|object| !object.metadata.is_deleting()).collect();
        objects.sort_by(|left, right| {
            left.metadata
                .creation_timestamp
                .cmp(&right.metadata.creation_timestamp)
                .then_with(|| left.metadata.resource_version.cmp(&right.metadata.resource_version))
        });
        let records: Vec<RuleRecord> = objects.into_iter().map(|object| object.spec).collect();
        info!(
            scope = %self.scope(),
            count = records.len(),
            elapsed_ms = elapsed_millis(started),
            "loaded rules"
        );
        Ok(records)
    }

    /// Replaces every stored rule in scope with `rules`.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::Store`] at the first failed store call.
    pub fn save_all(&self, rules: &RuleSet) -> Result<(), AdapterError> {
        let started = Instant::now();
        let cleared = self.clear()?;
        let mut written = 0_usize;
        for (_, ptype, rule) in rules.iter() {
            self.create_record(RuleRecord::project(ptype, rule))?;
            written += 1;
        }
        info!(
            scope = %self.scope(),
            cleared,
            written,
            elapsed_ms = elapsed_millis(started),
            "saved rules"
        );
        Ok(())
    }

    /// Deletes every stored rule in scope. Returns the number removed.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::Store`] when the store rejects the request.
    pub fn clear(&self) -> Result<usize, AdapterError> {
        Ok(self.client.delete_all()?)
    }

    /// Stores one rule.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError`] when the rule is too wide or the store call fails.
    pub fn add_one(&self, ptype: &str, rule: &[String]) -> Result<(), AdapterError> {
        self.create_record(encode(ptype, rule)?)
    }

    /// Stores several rules in order, stopping at the first failure.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError`] from the first failed rule.
    pub fn add_many(&self, ptype: &str, rules: &[Vec<String>]) -> Result<(), AdapterError> {
        for rule in rules {
            self.add_one(ptype, rule)?;
        }
        Ok(())
    }

    /// Removes one rule. An absent rule is success.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError`] when the rule is too wide or the store call fails.
    pub fn remove_one(&self, ptype: &str, rule: &[String]) -> Result<(), AdapterError> {
        let record = encode(ptype, rule)?;
        let key = record.canonical_key();
        debug!(scope = %self.scope(), key = %key, ptype, "removing rule");
        self.client.delete_by_name(&key)?;
        Ok(())
    }

    /// Removes several rules in order, stopping at the first failure.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError`] from the first failed rule.
    pub fn remove_many(&self, ptype: &str, rules: &[Vec<String>]) -> Result<(), AdapterError> {
        for rule in rules {
            self.remove_one(ptype, rule)?;
        }
        Ok(())
    }

    /// Removes every rule whose values from `field_index` on equal
    /// `field_values`, in one store request. Empty values are wildcards.
    ///
    /// [`PTYPE_ONLY_FIELD_INDEX`] removes every rule of `ptype`.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::Validation`] when every filter value is empty,
    /// when the index is negative other than the sentinel, or when the window
    /// covers no stored field.
    pub fn remove_filtered(&self, ptype: &str, field_index: i32, field_values: &[String]) -> Result<usize, AdapterError> {
        let selector = filter_selector(ptype, field_index, field_values)?;
        let started = Instant::now();
        let removed = self.client.delete_matching(&selector)?;
        info!(
            scope = %self.scope(),
            selector = %selector,
            removed,
            elapsed_ms = elapsed_millis(started),
            "removed filtered rules"
        );
        Ok(removed)
    }

    /// Creates the object for one record.
    fn create_record(&self, record: RuleRecord) -> Result<(), AdapterError> {
        let key = record.canonical_key();
        debug!(scope = %self.scope(), key = %key, ptype = %record.ptype, "adding rule");
        let object = self.client.new_object(key, record);
        self.client.create(&object)?;
        Ok(())
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Projects a rule into a record, rejecting rules wider than the record.
fn encode(ptype: &str, rule: &[String]) -> Result<RuleRecord, AdapterError> {
    if ptype.is_empty() {
        return Err(AdapterError::Validation("ptype must be non-empty".to_string()));
    }
    if rule.len() > RULE_FIELD_COUNT {
        return Err(AdapterError::Validation(format!(
            "rule has {} values; at most {RULE_FIELD_COUNT} are stored",
            rule.len()
        )));
    }
    Ok(RuleRecord::project(ptype, rule))
}

/// Builds the field selector for a filtered removal.
///
/// # Errors
///
/// Returns [`AdapterError::Validation`] for rejected filters.
pub fn filter_selector(ptype: &str, field_index: i32, field_values: &[String]) -> Result<FieldSelector, AdapterError> {
    if ptype.is_empty() {
        return Err(AdapterError::Validation("ptype must be non-empty".to_string()));
    }
    let selector = FieldSelector::new().with("spec.ptype", ptype);
    if field_index == PTYPE_ONLY_FIELD_INDEX {
        return Ok(selector);
    }
    if field_values.iter().all(String::is_empty) {
        return Err(AdapterError::Validation("the query field cannot all be empty strings".to_string()));
    }
    let start = usize::try_from(field_index)
        .map_err(|_| AdapterError::Validation(format!("field index {field_index} must be -1 or non-negative")))?;
    let mut pattern = RuleRecord::project(ptype, &[] as &[String]);
    let mut constrained = false;
    for (offset, value) in field_values.iter().enumerate() {
        if pattern.set_field(start + offset, value) && !value.is_empty() {
            constrained = true;
        }
    }
    if !constrained {
        return Err(AdapterError::Validation(format!(
            "field index {field_index} leaves every non-empty value outside the {RULE_FIELD_COUNT} stored fields"
        )));
    }
    let mut selector = selector;
    for (index, value) in pattern.fields().iter().enumerate() {
        if !value.is_empty() {
            selector.insert(format!("spec.v{index}"), *value);
        }
    }
    Ok(selector)
}

/// Returns whole milliseconds elapsed since `started`.
fn elapsed_millis(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

// ============================================================================
// SECTION: Persistence Contract
// ============================================================================

impl PolicyAdapter for RuleAdapter {
    fn load_policy(&self, rules: &mut RuleSet) -> Result<(), AdapterError> {
        for record in self.load_all()? {
            rules.load_policy_line(&record.policy_line());
        }
        Ok(())
    }

    fn save_policy(&self, rules: &RuleSet) -> Result<(), AdapterError> {
        self.save_all(rules)
    }

    fn add_policy(&self, _section: &str, ptype: &str, rule: &[String]) -> Result<(), AdapterError> {
        self.add_one(ptype, rule)
    }

    fn add_policies(&self, _section: &str, ptype: &str, rules: &[Vec<String>]) -> Result<(), AdapterError> {
        self.add_many(ptype, rules)
    }

    fn remove_policy(&self, _section: &str, ptype: &str, rule: &[String]) -> Result<(), AdapterError> {
        self.remove_one(ptype, rule)
    }

    fn remove_policies(&self, _section: &str, ptype: &str, rules: &[Vec<String>]) -> Result<(), AdapterError> {
        self.remove_many(ptype, rules)
    }

    fn remove_filtered_policy(
        &self,
        _section: &str,
        ptype: &str,
        field_index: i32,
        field_values: &[String],
    ) -> Result<(), AdapterError> {
        self.remove_filtered(ptype, field_index, field_values).map(|_| ())
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
