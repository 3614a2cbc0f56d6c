use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::consensus::{ConsensusLevel, DetailedValidation};
use crate::domain::TestCase;

/// What the encoding toolchain is known to provide.
///
/// Unknown (`None`) sets disable the rules that depend on them rather than
/// counting everything as missing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncodingEnvironment {
    /// Input variables defined in the encoder's schema.
    pub known_schema: Option<BTreeSet<String>>,
    /// Parameter names available per tax year.
    pub parameters: BTreeMap<i32, BTreeSet<String>>,
    /// Parameters each output variable needs.
    pub required_parameters: BTreeMap<String, Vec<String>>,
    /// Primitives the DSL can express.
    pub dsl_capabilities: Option<BTreeSet<String>>,
    /// Primitives each output variable needs.
    pub required_primitives: BTreeMap<String, Vec<String>>,
    /// External annotations flagging a test case as suspect, by case name.
    pub test_case_flags: BTreeMap<String, Vec<String>>,
}

/// Everything the diagnosis cascade looks at for one failed validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureContext {
    pub variable: String,
    pub test_case: String,
    pub year: i32,
    pub level: ConsensusLevel,
    pub tolerance: f64,
    /// Values of the validators that responded.
    pub validator_values: BTreeMap<String, f64>,
    /// Expected outputs of the test case.
    pub expected: BTreeMap<String, f64>,
    pub required_inputs: Vec<String>,
    pub known_schema: Option<BTreeSet<String>>,
    pub required_parameters: Vec<String>,
    /// Parameters known for `year`; `None` if the year is not covered.
    pub known_parameters: Option<BTreeSet<String>>,
    pub required_primitives: Vec<String>,
    pub dsl_capabilities: Option<BTreeSet<String>>,
    pub error_messages: Vec<String>,
    pub test_case_flags: Vec<String>,
}

impl FailureContext {
    pub fn new(
        variable: impl Into<String>,
        test_case: impl Into<String>,
        year: i32,
        level: ConsensusLevel,
        tolerance: f64,
    ) -> Self {
        Self {
            variable: variable.into(),
            test_case: test_case.into(),
            year,
            level,
            tolerance,
            validator_values: BTreeMap::new(),
            expected: BTreeMap::new(),
            required_inputs: Vec::new(),
            known_schema: None,
            required_parameters: Vec::new(),
            known_parameters: None,
            required_primitives: Vec::new(),
            dsl_capabilities: None,
            error_messages: Vec::new(),
            test_case_flags: Vec::new(),
        }
    }

    pub fn from_validation(detail: &DetailedValidation, test_case: &TestCase) -> Self {
        let result = &detail.result;
        let mut ctx = Self::new(
            result.variable.clone(),
            test_case.name.clone(),
            result.year,
            result.level,
            result.tolerance,
        );
        ctx.validator_values = detail
            .validators
            .iter()
            .filter_map(|v| v.value().map(|value| (v.validator_id.clone(), value)))
            .collect();
        ctx.expected = test_case.expected.clone();
        ctx
    }

    /// Fill the toolchain facts relevant to this variable and year.
    pub fn with_environment(mut self, env: &EncodingEnvironment) -> Self {
        self.known_schema = env.known_schema.clone();
        self.known_parameters = env.parameters.get(&self.year).cloned();
        self.required_parameters = env
            .required_parameters
            .get(&self.variable)
            .cloned()
            .unwrap_or_default();
        self.dsl_capabilities = env.dsl_capabilities.clone();
        self.required_primitives = env
            .required_primitives
            .get(&self.variable)
            .cloned()
            .unwrap_or_default();
        self.test_case_flags = env
            .test_case_flags
            .get(&self.test_case)
            .cloned()
            .unwrap_or_default();
        self
    }

    pub fn with_required_inputs<I, S>(mut self, inputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_inputs = inputs.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_validator_value(mut self, validator_id: impl Into<String>, value: f64) -> Self {
        self.validator_values.insert(validator_id.into(), value);
        self
    }

    pub fn with_expected(mut self, variable: impl Into<String>, value: f64) -> Self {
        self.expected.insert(variable.into(), value);
        self
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_messages.push(message.into());
        self
    }

    pub fn with_flag(mut self, flag: impl Into<String>) -> Self {
        self.test_case_flags.push(flag.into());
        self
    }

    /// Required names absent from a known set. Empty if the set is unknown.
    pub(crate) fn missing<'a>(
        required: &'a [String],
        known: Option<&BTreeSet<String>>,
    ) -> Vec<&'a str> {
        match known {
            Some(known) => required
                .iter()
                .filter(|name| !known.contains(*name))
                .map(String::as_str)
                .collect(),
            None => Vec::new(),
        }
    }
}
