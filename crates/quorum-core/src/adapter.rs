//! Validator adapter capability.
//!
//! An adapter wraps one external calculator. The core only needs the
//! [`ValidatorAdapter::query`] shape; the network or library calls behind it
//! live outside this crate.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Authority level of a validator, used to weight its vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeightClass {
    Primary,
    Reference,
    Supplementary,
}

impl WeightClass {
    /// Multiplier applied to this validator's match contribution.
    pub fn multiplier(self) -> f64 {
        match self {
            WeightClass::Primary => 2.0,
            WeightClass::Reference => 1.0,
            WeightClass::Supplementary => 0.5,
        }
    }
}

impl std::fmt::Display for WeightClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WeightClass::Primary => "primary",
            WeightClass::Reference => "reference",
            WeightClass::Supplementary => "supplementary",
        };
        f.write_str(s)
    }
}

/// What a single adapter query produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", content = "value")]
pub enum AdapterOutcome {
    /// Computed dollar amount.
    Value(f64),
    /// The calculator could not be reached or does not cover the case.
    Unavailable(String),
    /// The calculator ran but failed.
    ComputationError(String),
}

/// Capability interface for one external calculator.
#[async_trait]
pub trait ValidatorAdapter: Send + Sync {
    /// Stable identifier, unique within an engine.
    fn id(&self) -> &str;

    fn weight_class(&self) -> WeightClass;

    /// Whether this calculator models `variable` at all. Unsupported
    /// variables are skipped, not counted as abstentions.
    fn supports(&self, variable: &str) -> bool;

    async fn query(
        &self,
        variable: &str,
        inputs: &BTreeMap<String, serde_json::Value>,
        year: i32,
    ) -> AdapterOutcome;
}

/// Adapter with canned responses keyed by (variable, inputs).
///
/// Useful wherever responses must be frozen: replaying recorded calculator
/// output, or tests.
#[derive(Debug, Clone)]
pub struct FrozenAdapter {
    id: String,
    weight_class: WeightClass,
    responses: HashMap<(String, String), AdapterOutcome>,
    fallback: Option<AdapterOutcome>,
    delay: Option<Duration>,
}

fn inputs_key(inputs: &BTreeMap<String, serde_json::Value>) -> String {
    // BTreeMap serialises in key order, so equal maps give equal keys.
    serde_json::to_string(inputs).unwrap_or_default()
}

impl FrozenAdapter {
    pub fn new(id: impl Into<String>, weight_class: WeightClass) -> Self {
        Self {
            id: id.into(),
            weight_class,
            responses: HashMap::new(),
            fallback: None,
            delay: None,
        }
    }

    /// Respond to `variable` queried with `inputs` with `outcome`.
    pub fn respond(
        mut self,
        variable: impl Into<String>,
        inputs: &BTreeMap<String, serde_json::Value>,
        outcome: AdapterOutcome,
    ) -> Self {
        self.responses
            .insert((variable.into(), inputs_key(inputs)), outcome);
        self
    }

    /// Respond with `outcome` to anything without a specific response.
    pub fn otherwise(mut self, outcome: AdapterOutcome) -> Self {
        self.fallback = Some(outcome);
        self
    }

    /// Sleep before answering (simulates a slow calculator).
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait]
impl ValidatorAdapter for FrozenAdapter {
    fn id(&self) -> &str {
        &self.id
    }

    fn weight_class(&self) -> WeightClass {
        self.weight_class
    }

    fn supports(&self, variable: &str) -> bool {
        self.fallback.is_some() || self.responses.keys().any(|(v, _)| v == variable)
    }

    async fn query(
        &self,
        variable: &str,
        inputs: &BTreeMap<String, serde_json::Value>,
        _year: i32,
    ) -> AdapterOutcome {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.responses
            .get(&(variable.to_string(), inputs_key(inputs)))
            .or(self.fallback.as_ref())
            .cloned()
            .unwrap_or_else(|| AdapterOutcome::Unavailable(format!("no response for {variable}")))
    }
}
