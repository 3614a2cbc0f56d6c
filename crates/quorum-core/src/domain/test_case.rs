//! Test case definitions.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A single household scenario with optional expected outputs.
///
/// Immutable once built: the builder methods consume `self`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TestCase {
    /// Name, unique within a suite. Also the sampling key.
    pub name: String,

    /// Input variable name -> value (numbers, filing status strings, ...).
    pub inputs: BTreeMap<String, serde_json::Value>,

    /// Output variable name -> expected dollar amount.
    pub expected: BTreeMap<String, f64>,

    /// Statute citation the expectation was derived from.
    pub citation: Option<String>,
}

impl TestCase {
    /// Create a test case with no inputs or expectations.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inputs: BTreeMap::new(),
            expected: BTreeMap::new(),
            citation: None,
        }
    }

    /// Add an input value.
    pub fn with_input(mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.inputs.insert(name.into(), value.into());
        self
    }

    /// Add an expected output value.
    pub fn with_expected(mut self, variable: impl Into<String>, value: f64) -> Self {
        self.expected.insert(variable.into(), value);
        self
    }

    /// Attach a statute citation.
    pub fn with_citation(mut self, citation: impl Into<String>) -> Self {
        self.citation = Some(citation.into());
        self
    }

    /// Expected value for exactly `variable`, if any.
    pub fn expected_for(&self, variable: &str) -> Option<f64> {
        self.expected.get(variable).copied()
    }
}
