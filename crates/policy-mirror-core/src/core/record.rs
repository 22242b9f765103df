// crates/policy-mirror-core/src/core/record.rs
// ============================================================================
// Module: Policy Mirror Rule Records
// Description: Fixed-width rule records and canonical key derivation.
// Purpose: Share one projection between the load path and the watch path.
// Dependencies: serde, crate::core::hashing
// ============================================================================

//! ## Overview
//! A policy rule is a rule-type (`ptype`) plus a variable-length tuple of
//! positional values. Stores persist it as a fixed-width [`RuleRecord`] with
//! six value slots. Projection into the record pads or truncates by index;
//! projection back out drops trailing empty slots only, so interior empty
//! positions keep their positional meaning.
//!
//! Every stored rule object is named by [`RuleRecord::canonical_key`], which
//! makes creation idempotent and lets deletes address an object directly.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::core::hashing::hash_hex;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Number of positional value slots in a record.
pub const RULE_FIELD_COUNT: usize = 6;

/// Prefix applied to every canonical key.
pub const RULE_KEY_PREFIX: &str = "rule-";

/// Separator joining record fields before hashing (ASCII unit separator).
pub const FIELD_SEPARATOR: char = '\u{1f}';

// ============================================================================
// SECTION: Rule Record
// ============================================================================

/// Fixed-width stored form of one policy rule.
///
/// # Invariants
/// - `ptype` is required for a meaningful rule; an empty `ptype` projects to
///   an empty rule and is ignored by engines.
/// - Slots beyond the last non-empty one carry no meaning.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RuleRecord {
    /// Rule type, such as `p` or `g`.
    pub ptype: String,
    /// Positional value 0.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub v0: String,
    /// Positional value 1.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub v1: String,
    /// Positional value 2.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub v2: String,
    /// Positional value 3.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub v3: String,
    /// Positional value 4.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub v4: String,
    /// Positional value 5.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub v5: String,
}

impl RuleRecord {
    /// Projects a rule-type and positional values into a record.
    ///
    /// Values are placed by index; values past the sixth slot are dropped.
    #[must_use]
    pub fn project<S: AsRef<str>>(ptype: impl Into<String>, values: &[S]) -> Self {
        let mut record = Self {
            ptype: ptype.into(),
            ..Self::default()
        };
        for (index, value) in values.iter().take(RULE_FIELD_COUNT).enumerate() {
            record.set_field(index, value.as_ref());
        }
        record
    }

    /// Returns the six value slots in positional order.
    #[must_use]
    pub fn fields(&self) -> [&str; RULE_FIELD_COUNT] {
        [&self.v0, &self.v1, &self.v2, &self.v3, &self.v4, &self.v5]
    }

    /// Returns the value slot at `index`, if the index is in range.
    #[must_use]
    pub fn field(&self, index: usize) -> Option<&str> {
        self.fields().get(index).copied()
    }

    /// Sets the value slot at `index`. Returns false when out of range.
    pub fn set_field(&mut self, index: usize, value: &str) -> bool {
        let slot = match index {
            0 => &mut self.v0,
            1 => &mut self.v1,
            2 => &mut self.v2,
            3 => &mut self.v3,
            4 => &mut self.v4,
            5 => &mut self.v5,
            _ => return false,
        };
        value.clone_into(slot);
        true
    }

    /// Returns the engine-facing rule tuple with trailing empty slots dropped.
    #[must_use]
    pub fn rule(&self) -> Vec<String> {
        trim_fields(&self.fields())
    }

    /// Returns the full policy line: `ptype` followed by the trimmed rule.
    ///
    /// An empty `ptype` with no values yields an empty line.
    #[must_use]
    pub fn policy_line(&self) -> Vec<String> {
        let [v0, v1, v2, v3, v4, v5] = self.fields();
        trim_fields(&[self.ptype.as_str(), v0, v1, v2, v3, v4, v5])
    }

    /// Derives the content-addressed object name for this record.
    ///
    /// The name is [`RULE_KEY_PREFIX`] followed by the SHA-256 hex digest of
    /// `ptype` and all six slots joined with [`FIELD_SEPARATOR`].
    #[must_use]
    pub fn canonical_key(&self) -> String {
        let mut joined = self.ptype.clone();
        for field in self.fields() {
            joined.push(FIELD_SEPARATOR);
            joined.push_str(field);
        }
        format!("{RULE_KEY_PREFIX}{}", hash_hex(joined.as_bytes()))
    }

    /// Splits the record into engine call parameters.
    #[must_use]
    pub fn policy_params(&self) -> PolicyParams {
        if self.ptype.is_empty() {
            return PolicyParams::default();
        }
        PolicyParams {
            section: section_for_ptype(&self.ptype),
            ptype: self.ptype.clone(),
            rule: self.rule(),
        }
    }
}

// ============================================================================
// SECTION: Policy Parameters
// ============================================================================

/// Section, rule-type, and rule tuple handed to engine self-mutation calls.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicyParams {
    /// Engine section derived from the rule-type.
    pub section: String,
    /// Rule type.
    pub ptype: String,
    /// Trimmed rule tuple.
    pub rule: Vec<String>,
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Drops trailing empty strings and returns the remaining prefix.
#[must_use]
pub fn trim_fields<S: AsRef<str>>(fields: &[S]) -> Vec<String> {
    let end = fields.iter().rposition(|field| !field.as_ref().is_empty()).map_or(0, |index| index + 1);
    fields[.. end].iter().map(|field| field.as_ref().to_string()).collect()
}

/// Returns the engine section for a rule-type: its first character.
#[must_use]
pub fn section_for_ptype(ptype: &str) -> String {
    ptype.chars().next().map(String::from).unwrap_or_default()
}

// ============================================================================
// SECTION: Tests
// ============================================================================
