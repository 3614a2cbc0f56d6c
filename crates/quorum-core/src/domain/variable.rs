//! Variable mappings: which variables can be validated, by whom, and with
//! what inputs.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::error::{QuorumError, Result};

/// Validation settings for one encoded variable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VariableMapping {
    pub name: String,

    /// Statute reference, e.g. "26 USC § 32".
    pub statute: String,

    /// Inputs the encoding needs; used by failure diagnosis.
    #[serde(default)]
    pub required_inputs: Vec<String>,

    /// Per-variable dollar tolerance; falls back to the engine default.
    #[serde(default)]
    pub tolerance: Option<f64>,

    /// Adapter ids allowed to validate this variable. Empty means every
    /// configured adapter that supports it.
    #[serde(default)]
    pub validators: Vec<String>,
}

impl VariableMapping {
    pub fn new(name: impl Into<String>, statute: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            statute: statute.into(),
            required_inputs: Vec::new(),
            tolerance: None,
            validators: Vec::new(),
        }
    }

    pub fn with_required_inputs<I, S>(mut self, inputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_inputs = inputs.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = Some(tolerance);
        self
    }

    pub fn with_validators<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.validators = ids.into_iter().map(Into::into).collect();
        self
    }

    /// Check the mapping against the set of configured adapter ids.
    pub fn check(&self, adapter_ids: &[&str]) -> Result<()> {
        if let Some(tol) = self.tolerance {
            if !tol.is_finite() || tol < 0.0 {
                return Err(QuorumError::MalformedMapping {
                    variable: self.name.clone(),
                    reason: format!("tolerance must be a non-negative number, got {tol}"),
                });
            }
        }
        if let Some(missing) = self
            .validators
            .iter()
            .find(|id| !adapter_ids.contains(&id.as_str()))
        {
            return Err(QuorumError::MalformedMapping {
                variable: self.name.clone(),
                reason: format!("validator {missing} is not configured"),
            });
        }
        Ok(())
    }

    /// Whether `adapter_id` may validate this variable.
    pub fn allows(&self, adapter_id: &str) -> bool {
        self.validators.is_empty() || self.validators.iter().any(|v| v == adapter_id)
    }
}

/// The configured set of validatable variables.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct VariableRegistry {
    mappings: BTreeMap<String, VariableMapping>,
}

impl VariableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a mapping.
    pub fn with_mapping(mut self, mapping: VariableMapping) -> Self {
        self.insert(mapping);
        self
    }

    pub fn insert(&mut self, mapping: VariableMapping) {
        self.mappings.insert(mapping.name.clone(), mapping);
    }

    /// Look up a mapping, failing with `UnknownVariable`.
    pub fn get(&self, variable: &str) -> Result<&VariableMapping> {
        self.mappings
            .get(variable)
            .ok_or_else(|| QuorumError::UnknownVariable(variable.to_string()))
    }

    pub fn variables(&self) -> impl Iterator<Item = &str> {
        self.mappings.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }
}
