use serde::{Deserialize, Serialize};

use super::context::FailureContext;
use crate::obs;

/// The layer of the encoding stack a failure is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosisLayer {
    /// An external calculator is wrong.
    Validator,
    /// An input variable is missing from the encoder schema.
    VariableSchema,
    /// A threshold or rate is missing for the year.
    Parameters,
    /// The DSL cannot express the computation.
    DslCore,
    /// The expected value itself is suspect.
    TestCase,
    /// The encoding (prompt, instructions) is at fault.
    Plugin,
}

impl DiagnosisLayer {
    pub fn as_str(self) -> &'static str {
        match self {
            DiagnosisLayer::Validator => "validator",
            DiagnosisLayer::VariableSchema => "variable_schema",
            DiagnosisLayer::Parameters => "parameters",
            DiagnosisLayer::DslCore => "dsl_core",
            DiagnosisLayer::TestCase => "test_case",
            DiagnosisLayer::Plugin => "plugin",
        }
    }
}

impl std::fmt::Display for DiagnosisLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureDiagnosis {
    pub layer: DiagnosisLayer,
    pub confidence: f64,
    /// Name of the rule that fired.
    pub rule: String,
    pub explanation: String,
    pub evidence: Vec<String>,
    /// Layers of later rules that also fired, in cascade order.
    pub alternative_layers: Vec<DiagnosisLayer>,
}

/// What a rule saw when it fired.
#[derive(Debug, Clone, PartialEq)]
pub struct Finding {
    pub explanation: String,
    pub evidence: Vec<String>,
}

impl Finding {
    fn new(explanation: impl Into<String>, evidence: Vec<String>) -> Self {
        Self {
            explanation: explanation.into(),
            evidence,
        }
    }
}

/// One entry in the ranked cascade.
#[derive(Debug, Clone, Copy)]
pub struct DiagnosisRule {
    pub name: &'static str,
    pub layer: DiagnosisLayer,
    pub confidence: f64,
    pub check: fn(&FailureContext) -> Option<Finding>,
}

const UNKNOWN_VARIABLE_PATTERNS: &[&str] = &[
    "variable not found",
    "unknown variable",
    "undefined variable",
    "no such variable",
];

const MISSING_PARAMETER_PATTERNS: &[&str] = &[
    "parameter not found",
    "missing parameter",
    "no parameter",
];

const UNSUPPORTED_PATTERNS: &[&str] = &["unsupported syntax", "unsupported operation", "cannot express"];

const PARSE_ERROR_PATTERNS: &[&str] = &["syntax error", "parse error"];

/// Variable-name fragments for computations the DSL is known to handle badly.
pub const DSL_LIMITATIONS: &[&str] = &[
    "phase_out_cliff",
    "married_filing_separately_different_rules",
    "state_specific_override",
    "prior_year",
    "recapture",
];

const IMPLAUSIBLE_MAGNITUDE: f64 = 9.0e9;

fn first_error_matching<'a>(ctx: &'a FailureContext, patterns: &[&str]) -> Option<&'a str> {
    ctx.error_messages
        .iter()
        .find(|m| {
            let lower = m.to_lowercase();
            patterns.iter().any(|p| lower.contains(p))
        })
        .map(String::as_str)
}

/// Pull the name following `keyword` out of an error message, e.g.
/// `variable 'earned_income'` gives `earned_income`.
pub fn extract_name(keyword: &str, message: &str) -> Option<String> {
    let pattern = format!(r#"(?i){}\s+['"]?(\w+)['"]?"#, regex::escape(keyword));
    let re = regex::Regex::new(&pattern).ok()?;
    let name = re
        .captures_iter(message)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str())
        .find(|name| !matches!(name.to_lowercase().as_str(), "not" | "found" | "is"))
        .map(str::to_string);
    name
}

fn validators_disagree(ctx: &FailureContext) -> Option<Finding> {
    // A consensus the encoder is measured against clears the validators.
    if ctx.level.is_agreement() {
        return None;
    }
    let values: Vec<f64> = ctx.validator_values.values().copied().collect();
    if values.len() < 2 {
        return None;
    }
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if max - min <= ctx.tolerance {
        return None;
    }
    let evidence = ctx
        .validator_values
        .iter()
        .map(|(id, v)| format!("{id}: {v:.2}"))
        .chain(std::iter::once(format!(
            "spread {:.2} exceeds tolerance {:.2}",
            max - min,
            ctx.tolerance
        )))
        .collect();
    Some(Finding::new(
        format!("validators disagree: {min:.2} vs {max:.2}"),
        evidence,
    ))
}

fn missing_schema_input(ctx: &FailureContext) -> Option<Finding> {
    let missing = FailureContext::missing(&ctx.required_inputs, ctx.known_schema.as_ref());
    if missing.is_empty() {
        return None;
    }
    Some(Finding::new(
        format!("input variable(s) not in schema: {}", missing.join(", ")),
        missing.iter().map(|m| format!("required input {m} is undefined")).collect(),
    ))
}

fn unknown_variable_error(ctx: &FailureContext) -> Option<Finding> {
    let message = first_error_matching(ctx, UNKNOWN_VARIABLE_PATTERNS)?;
    let name = extract_name("variable", message).unwrap_or_else(|| "unknown".to_string());
    Some(Finding::new(
        format!("missing input variable: {name}"),
        vec![message.to_string()],
    ))
}

fn missing_parameter(ctx: &FailureContext) -> Option<Finding> {
    if ctx.required_parameters.is_empty() {
        return None;
    }
    let missing: Vec<&str> = match &ctx.known_parameters {
        Some(known) => FailureContext::missing(&ctx.required_parameters, Some(known)),
        // Nothing at all is known for the year.
        None => ctx.required_parameters.iter().map(String::as_str).collect(),
    };
    if missing.is_empty() {
        return None;
    }
    Some(Finding::new(
        format!("parameter(s) missing for {}: {}", ctx.year, missing.join(", ")),
        missing.iter().map(|p| format!("{p} undefined for {}", ctx.year)).collect(),
    ))
}

fn missing_parameter_error(ctx: &FailureContext) -> Option<Finding> {
    let message = first_error_matching(ctx, MISSING_PARAMETER_PATTERNS)?;
    let name = extract_name("parameter", message).unwrap_or_else(|| "unknown".to_string());
    Some(Finding::new(
        format!("missing parameter: {name}"),
        vec![message.to_string()],
    ))
}

fn unsupported_syntax_error(ctx: &FailureContext) -> Option<Finding> {
    let message = first_error_matching(ctx, UNSUPPORTED_PATTERNS)?;
    Some(Finding::new(
        "DSL reports the construct is unsupported",
        vec![message.to_string()],
    ))
}

fn dsl_parse_error(ctx: &FailureContext) -> Option<Finding> {
    let message = first_error_matching(ctx, PARSE_ERROR_PATTERNS)?;
    Some(Finding::new("DSL syntax error", vec![message.to_string()]))
}

fn missing_primitive(ctx: &FailureContext) -> Option<Finding> {
    let missing =
        FailureContext::missing(&ctx.required_primitives, ctx.dsl_capabilities.as_ref());
    if missing.is_empty() {
        return None;
    }
    Some(Finding::new(
        format!("DSL lacks primitive(s): {}", missing.join(", ")),
        missing.iter().map(|p| format!("primitive {p} unavailable")).collect(),
    ))
}

fn known_limitation(ctx: &FailureContext) -> Option<Finding> {
    let lower = ctx.variable.to_lowercase();
    let limitation = DSL_LIMITATIONS.iter().find(|l| lower.contains(*l))?;
    Some(Finding::new(
        format!("variable involves known DSL limitation: {limitation}"),
        vec![format!("variable name contains '{limitation}'")],
    ))
}

fn flagged_test_case(ctx: &FailureContext) -> Option<Finding> {
    if ctx.test_case_flags.is_empty() {
        return None;
    }
    Some(Finding::new(
        format!("test case {} is flagged against its citation", ctx.test_case),
        ctx.test_case_flags.clone(),
    ))
}

fn negative_expected(ctx: &FailureContext) -> Option<Finding> {
    let (name, value) = ctx.expected.iter().find(|(_, v)| **v < 0.0)?;
    Some(Finding::new(
        format!("negative expected value for {name}: {value}"),
        vec!["negative value in expected output".to_string()],
    ))
}

fn implausible_expected(ctx: &FailureContext) -> Option<Finding> {
    let (name, value) = ctx
        .expected
        .iter()
        .find(|(_, v)| v.abs() >= IMPLAUSIBLE_MAGNITUDE)?;
    Some(Finding::new(
        format!("implausibly large expected value for {name}: {value}"),
        vec!["unrealistically large value".to_string()],
    ))
}

fn rule(
    name: &'static str,
    layer: DiagnosisLayer,
    confidence: f64,
    check: fn(&FailureContext) -> Option<Finding>,
) -> DiagnosisRule {
    DiagnosisRule {
        name,
        layer,
        confidence,
        check,
    }
}

/// The standard cascade, most likely cause first.
pub fn standard_rules() -> Vec<DiagnosisRule> {
    use DiagnosisLayer::*;
    vec![
        rule("validators_disagree", Validator, 0.7, validators_disagree),
        rule("missing_schema_input", VariableSchema, 0.9, missing_schema_input),
        rule("unknown_variable_error", VariableSchema, 0.9, unknown_variable_error),
        rule("missing_parameter", Parameters, 0.9, missing_parameter),
        rule("missing_parameter_error", Parameters, 0.9, missing_parameter_error),
        rule("unsupported_syntax_error", DslCore, 1.0, unsupported_syntax_error),
        rule("dsl_parse_error", DslCore, 0.8, dsl_parse_error),
        rule("missing_primitive", DslCore, 0.8, missing_primitive),
        rule("known_limitation", DslCore, 0.6, known_limitation),
        rule("flagged_test_case", TestCase, 0.8, flagged_test_case),
        rule("negative_expected", TestCase, 0.6, negative_expected),
        rule("implausible_expected", TestCase, 0.5, implausible_expected),
    ]
}

/// Ordered predicate cascade: the first rule that fires picks the layer.
#[derive(Debug, Clone)]
pub struct DiagnosisClassifier {
    rules: Vec<DiagnosisRule>,
    default_confidence: f64,
}

impl Default for DiagnosisClassifier {
    fn default() -> Self {
        Self::standard()
    }
}

impl DiagnosisClassifier {
    pub fn new(rules: Vec<DiagnosisRule>, default_confidence: f64) -> Self {
        Self {
            rules,
            default_confidence,
        }
    }

    pub fn standard() -> Self {
        Self::new(standard_rules(), 0.4)
    }

    pub fn rules(&self) -> &[DiagnosisRule] {
        &self.rules
    }

    pub fn diagnose(&self, ctx: &FailureContext) -> FailureDiagnosis {
        let mut fired = self
            .rules
            .iter()
            .filter_map(|rule| (rule.check)(ctx).map(|finding| (rule, finding)));

        let diagnosis = match fired.next() {
            Some((rule, finding)) => {
                let mut alternative_layers = Vec::new();
                for (later, _) in fired {
                    if later.layer != rule.layer && !alternative_layers.contains(&later.layer) {
                        alternative_layers.push(later.layer);
                    }
                }
                FailureDiagnosis {
                    layer: rule.layer,
                    confidence: rule.confidence,
                    rule: rule.name.to_string(),
                    explanation: finding.explanation,
                    evidence: finding.evidence,
                    alternative_layers,
                }
            }
            None => FailureDiagnosis {
                layer: DiagnosisLayer::Plugin,
                confidence: self.default_confidence,
                rule: "default".to_string(),
                explanation: "no structural cause found; the encoding itself is suspect"
                    .to_string(),
                evidence: ctx
                    .validator_values
                    .iter()
                    .map(|(id, v)| format!("{id}: {v:.2}"))
                    .collect(),
                alternative_layers: Vec::new(),
            },
        };

        obs::emit_diagnosis_assigned(
            &ctx.variable,
            diagnosis.layer.as_str(),
            diagnosis.confidence,
            &diagnosis.rule,
        );
        diagnosis
    }
}
