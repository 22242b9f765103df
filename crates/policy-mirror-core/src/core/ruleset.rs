// crates/policy-mirror-core/src/core/ruleset.rs
// ============================================================================
// Module: Policy Mirror Rule Sets
// Description: Section/rule-type indexed collections of rule tuples.
// Purpose: Carry engine rule state between engines and adapters.
// Dependencies: crate::core::record
// ============================================================================

//! ## Overview
//! A [`RuleSet`] maps `section -> ptype -> [rule]`. Within one rule-type,
//! rules keep insertion order and are unique. Iteration over sections and
//! rule-types is ordered by name.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use crate::core::record::section_for_ptype;

// ============================================================================
// SECTION: Rule Set
// ============================================================================

/// Rules of one rule-type in insertion order.
type RuleList = Vec<Vec<String>>;

/// Policy rules grouped by section and rule-type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleSet {
    /// Rules keyed by section, then rule-type.
    sections: BTreeMap<String, BTreeMap<String, RuleList>>,
}

impl RuleSet {
    /// Returns an empty rule set.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            sections: BTreeMap::new(),
        }
    }

    /// Loads one policy line: `ptype` followed by rule values.
    ///
    /// The section is derived from the first character of `ptype`. Empty
    /// lines and lines with an empty `ptype` are ignored. Returns true when a
    /// new rule was inserted.
    pub fn load_policy_line<S: AsRef<str>>(&mut self, line: &[S]) -> bool {
        let Some((ptype, values)) = line.split_first() else {
            return false;
        };
        let ptype = ptype.as_ref();
        if ptype.is_empty() {
            return false;
        }
        let rule = values.iter().map(|value| value.as_ref().to_string()).collect();
        self.add(&section_for_ptype(ptype), ptype, rule)
    }

    /// Inserts a rule. Returns false when it was already present.
    pub fn add(&mut self, section: &str, ptype: &str, rule: Vec<String>) -> bool {
        let rules = self
            .sections
            .entry(section.to_string())
            .or_default()
            .entry(ptype.to_string())
            .or_default();
        if rules.contains(&rule) {
            return false;
        }
        rules.push(rule);
        true
    }

    /// Removes a rule. Returns false when it was absent.
    pub fn remove(&mut self, section: &str, ptype: &str, rule: &[String]) -> bool {
        let Some(rules) = self.rules_mut(section, ptype) else {
            return false;
        };
        let before = rules.len();
        rules.retain(|existing| existing.as_slice() != rule);
        before != rules.len()
    }

    /// Replaces `old` with `new` in place.
    ///
    /// Returns false when `old` is absent. When `new` is already present the
    /// old rule is dropped so the set stays duplicate-free.
    pub fn replace(&mut self, section: &str, ptype: &str, old: &[String], new: Vec<String>) -> bool {
        let Some(rules) = self.rules_mut(section, ptype) else {
            return false;
        };
        let Some(position) = rules.iter().position(|existing| existing.as_slice() == old) else {
            return false;
        };
        if old != new.as_slice() && rules.contains(&new) {
            rules.remove(position);
        } else {
            rules[position] = new;
        }
        true
    }

    /// Removes rules whose values starting at `field_index` equal
    /// `field_values`. Empty filter values match anything.
    ///
    /// Returns the removed rules.
    pub fn remove_filtered(
        &mut self,
        section: &str,
        ptype: &str,
        field_index: usize,
        field_values: &[String],
    ) -> Vec<Vec<String>> {
        let Some(rules) = self.rules_mut(section, ptype) else {
            return Vec::new();
        };
        let (removed, kept): (RuleList, RuleList) = rules.drain(..).partition(|rule| {
            field_values.iter().enumerate().all(|(offset, value)| {
                value.is_empty() || rule.get(field_index + offset).is_some_and(|field| field == value)
            })
        });
        *rules = kept;
        removed
    }

    /// Returns true when the rule is present.
    #[must_use]
    pub fn contains(&self, section: &str, ptype: &str, rule: &[String]) -> bool {
        self.rules(section, ptype).iter().any(|existing| existing.as_slice() == rule)
    }

    /// Returns rules of one rule-type in insertion order.
    #[must_use]
    pub fn rules(&self, section: &str, ptype: &str) -> &[Vec<String>] {
        self.sections
            .get(section)
            .and_then(|types| types.get(ptype))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Iterates every rule as `(section, ptype, rule)`.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, &[String])> {
        self.sections.iter().flat_map(|(section, types)| {
            types.iter().flat_map(move |(ptype, rules)| {
                rules.iter().map(move |rule| (section.as_str(), ptype.as_str(), rule.as_slice()))
            })
        })
    }

    /// Returns the number of rules across all sections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sections.values().flat_map(BTreeMap::values).map(Vec::len).sum()
    }

    /// Returns true when no rules are present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes every rule.
    pub fn clear(&mut self) {
        self.sections.clear();
    }

    /// Returns the mutable rule list for a rule-type, if present.
    fn rules_mut(&mut self, section: &str, ptype: &str) -> Option<&mut RuleList> {
        self.sections.get_mut(section).and_then(|types| types.get_mut(ptype))
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
