// crates/policy-mirror-core/src/runtime/engine.rs
// ============================================================================
// Module: Policy Mirror Memory Engine
// Description: In-memory rule engine with optional adapter persistence.
// Purpose: Host mirrored rule sets and exercise the engine contract.
// Dependencies: tracing, crate::core, crate::interfaces
// ============================================================================

//! ## Overview
//! [`MemoryPolicyEngine`] keeps rules in a [`RuleSet`] behind a read/write
//! lock. Caller mutations (`add_policy`, `remove_policy`, ...) persist
//! through the configured [`PolicyAdapter`] first when auto-save is enabled
//! and only touch memory once the store accepted the change. Self-mutations
//! from [`PolicyEngine`] never persist and never notify.
//!
//! The engine understands two sections: `p` for policy rules and `g` for
//! role grouping rules.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::sync::RwLock;
use std::sync::RwLockReadGuard;
use std::sync::RwLockWriteGuard;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use tracing::debug;

use crate::core::RuleSet;
use crate::core::section_for_ptype;
use crate::interfaces::EngineError;
use crate::interfaces::PolicyAdapter;
use crate::interfaces::PolicyEngine;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Sections defined by the engine model.
const SECTIONS: [&str; 2] = ["p", "g"];

// ============================================================================
// SECTION: Change Listener
// ============================================================================

/// Receives a signal after each persisted caller mutation.
pub trait PolicyChangeListener: Send + Sync {
    /// Called after the rule set changed through a caller mutation.
    fn policy_changed(&self);
}

// ============================================================================
// SECTION: Engine
// ============================================================================

/// In-memory policy engine.
pub struct MemoryPolicyEngine {
    /// Current rules.
    rules: RwLock<RuleSet>,
    /// Persist caller mutations through the adapter.
    auto_save: AtomicBool,
    /// Signal the listener after caller mutations.
    auto_notify: AtomicBool,
    /// Persistence backend, when configured.
    adapter: Option<Arc<dyn PolicyAdapter>>,
    /// Change listener, when configured.
    listener: Option<Arc<dyn PolicyChangeListener>>,
}

impl Default for MemoryPolicyEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryPolicyEngine {
    /// Creates an empty engine without persistence.
    #[must_use]
    pub fn new() -> Self {
        Self {
            rules: RwLock::new(RuleSet::new()),
            auto_save: AtomicBool::new(true),
            auto_notify: AtomicBool::new(true),
            adapter: None,
            listener: None,
        }
    }

    /// Creates an engine persisting through `adapter` and loads its rules.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Persist`] when the initial load fails.
    pub fn with_adapter(adapter: Arc<dyn PolicyAdapter>) -> Result<Self, EngineError> {
        let engine = Self {
            adapter: Some(adapter),
            ..Self::new()
        };
        engine.load_policy()?;
        Ok(engine)
    }

    /// Sets the change listener.
    #[must_use]
    pub fn with_listener(mut self, listener: Arc<dyn PolicyChangeListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Replaces in-memory rules with the adapter's stored rules.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Persist`] when loading fails; rules are left
    /// unchanged in that case.
    pub fn load_policy(&self) -> Result<(), EngineError> {
        let Some(adapter) = &self.adapter else {
            return Ok(());
        };
        let mut loaded = RuleSet::new();
        adapter.load_policy(&mut loaded).map_err(|err| EngineError::Persist(err.to_string()))?;
        *self.write()? = loaded;
        Ok(())
    }

    /// Writes the in-memory rules to the adapter, replacing stored rules.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Persist`] when saving fails.
    pub fn save_policy(&self) -> Result<(), EngineError> {
        let Some(adapter) = &self.adapter else {
            return Ok(());
        };
        let snapshot = self.snapshot()?;
        adapter.save_policy(&snapshot).map_err(|err| EngineError::Persist(err.to_string()))?;
        self.notify();
        Ok(())
    }

    /// Adds a `p` rule. Returns false when it was already present.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] when persistence fails.
    pub fn add_policy(&self, rule: &[String]) -> Result<bool, EngineError> {
        self.add_named_policy("p", rule)
    }

    /// Adds a `g` rule. Returns false when it was already present.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] when persistence fails.
    pub fn add_grouping_policy(&self, rule: &[String]) -> Result<bool, EngineError> {
        self.add_named_policy("g", rule)
    }

    /// Adds a rule of `ptype`. Returns false when it was already present.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] when the rule is invalid or persistence fails.
    pub fn add_named_policy(&self, ptype: &str, rule: &[String]) -> Result<bool, EngineError> {
        let section = checked_section(ptype, rule)?;
        if self.read()?.contains(&section, ptype, rule) {
            return Ok(false);
        }
        if let Some(adapter) = self.persisting_adapter() {
            adapter.add_policy(&section, ptype, rule).map_err(|err| EngineError::Persist(err.to_string()))?;
        }
        let added = self.write()?.add(&section, ptype, rule.to_vec());
        self.notify();
        Ok(added)
    }

    /// Removes a `p` rule. Returns false when it was absent.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] when persistence fails.
    pub fn remove_policy(&self, rule: &[String]) -> Result<bool, EngineError> {
        self.remove_named_policy("p", rule)
    }

    /// Removes a rule of `ptype`. Returns false when it was absent.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] when the rule is invalid or persistence fails.
    pub fn remove_named_policy(&self, ptype: &str, rule: &[String]) -> Result<bool, EngineError> {
        let section = checked_section(ptype, rule)?;
        if !self.read()?.contains(&section, ptype, rule) {
            return Ok(false);
        }
        if let Some(adapter) = self.persisting_adapter() {
            adapter.remove_policy(&section, ptype, rule).map_err(|err| EngineError::Persist(err.to_string()))?;
        }
        let removed = self.write()?.remove(&section, ptype, rule);
        self.notify();
        Ok(removed)
    }

    /// Removes `ptype` rules whose values from `field_index` on match
    /// `field_values`. Empty filter values match anything.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] when persistence fails.
    pub fn remove_filtered_named_policy(
        &self,
        ptype: &str,
        field_index: usize,
        field_values: &[String],
    ) -> Result<bool, EngineError> {
        let section = checked_section(ptype, &[])?;
        if let Some(adapter) = self.persisting_adapter() {
            let index = i32::try_from(field_index)
                .map_err(|_| EngineError::InvalidRule(format!("field index {field_index} out of range")))?;
            adapter
                .remove_filtered_policy(&section, ptype, index, field_values)
                .map_err(|err| EngineError::Persist(err.to_string()))?;
        }
        let removed = self.write()?.remove_filtered(&section, ptype, field_index, field_values);
        self.notify();
        Ok(!removed.is_empty())
    }

    /// Returns true when the `p` rule is present.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::State`] when the rule lock is poisoned.
    pub fn has_policy(&self, rule: &[String]) -> Result<bool, EngineError> {
        self.has_named_policy("p", rule)
    }

    /// Returns true when the rule of `ptype` is present.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::State`] when the rule lock is poisoned.
    pub fn has_named_policy(&self, ptype: &str, rule: &[String]) -> Result<bool, EngineError> {
        Ok(self.read()?.contains(&section_for_ptype(ptype), ptype, rule))
    }

    /// Returns the rules of `ptype` in insertion order.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::State`] when the rule lock is poisoned.
    pub fn named_policy(&self, ptype: &str) -> Result<Vec<Vec<String>>, EngineError> {
        Ok(self.read()?.rules(&section_for_ptype(ptype), ptype).to_vec())
    }

    /// Returns a copy of every rule.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::State`] when the rule lock is poisoned.
    pub fn snapshot(&self) -> Result<RuleSet, EngineError> {
        Ok(self.read()?.clone())
    }

    /// Returns true when caller mutations persist through the adapter.
    #[must_use]
    pub fn is_auto_save_enabled(&self) -> bool {
        self.auto_save.load(Ordering::SeqCst)
    }

    /// Returns true when caller mutations signal the listener.
    #[must_use]
    pub fn is_auto_notify_enabled(&self) -> bool {
        self.auto_notify.load(Ordering::SeqCst)
    }

    /// Returns the adapter when auto-save is enabled.
    fn persisting_adapter(&self) -> Option<&Arc<dyn PolicyAdapter>> {
        self.adapter.as_ref().filter(|_| self.is_auto_save_enabled())
    }

    /// Signals the listener when auto-notify is enabled.
    fn notify(&self) {
        if let Some(listener) = &self.listener
            && self.is_auto_notify_enabled()
        {
            listener.policy_changed();
        }
    }

    /// Acquires the rule set for reading.
    fn read(&self) -> Result<RwLockReadGuard<'_, RuleSet>, EngineError> {
        self.rules.read().map_err(|_| EngineError::State("rule set lock poisoned".to_string()))
    }

    /// Acquires the rule set for writing.
    fn write(&self) -> Result<RwLockWriteGuard<'_, RuleSet>, EngineError> {
        self.rules.write().map_err(|_| EngineError::State("rule set lock poisoned".to_string()))
    }
}

/// Validates a rule-type and returns its section.
fn checked_section(ptype: &str, rule: &[String]) -> Result<String, EngineError> {
    let section = section_for_ptype(ptype);
    if !SECTIONS.contains(&section.as_str()) {
        return Err(EngineError::UnknownSection(format!("{ptype} maps to section '{section}'")));
    }
    if rule.len() > crate::core::RULE_FIELD_COUNT {
        return Err(EngineError::InvalidRule(format!(
            "rule has {} values; at most {} are stored",
            rule.len(),
            crate::core::RULE_FIELD_COUNT
        )));
    }
    Ok(section)
}

// ============================================================================
// SECTION: Engine Contract
// ============================================================================

impl PolicyEngine for MemoryPolicyEngine {
    fn self_add_policy(&self, section: &str, ptype: &str, rule: &[String]) -> Result<bool, EngineError> {
        if !SECTIONS.contains(&section) {
            return Err(EngineError::UnknownSection(section.to_string()));
        }
        let added = self.write()?.add(section, ptype, rule.to_vec());
        debug!(section, ptype, added, "self add policy");
        Ok(added)
    }

    fn self_update_policy(
        &self,
        section: &str,
        ptype: &str,
        old_rule: &[String],
        new_rule: &[String],
    ) -> Result<bool, EngineError> {
        if !SECTIONS.contains(&section) {
            return Err(EngineError::UnknownSection(section.to_string()));
        }
        let updated = self.write()?.replace(section, ptype, old_rule, new_rule.to_vec());
        debug!(section, ptype, updated, "self update policy");
        Ok(updated)
    }

    fn self_remove_policy(&self, section: &str, ptype: &str, rule: &[String]) -> Result<bool, EngineError> {
        if !SECTIONS.contains(&section) {
            return Err(EngineError::UnknownSection(section.to_string()));
        }
        let removed = self.write()?.remove(section, ptype, rule);
        debug!(section, ptype, removed, "self remove policy");
        Ok(removed)
    }

    fn enable_auto_save(&self, enabled: bool) {
        self.auto_save.store(enabled, Ordering::SeqCst);
    }

    fn enable_auto_notify_watcher(&self, enabled: bool) {
        self.auto_notify.store(enabled, Ordering::SeqCst);
    }
}
