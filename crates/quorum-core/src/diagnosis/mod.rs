//! Failure diagnosis: which layer of the encoding stack caused a failed
//! validation.
//!
//! The cascade is an explicit ranked list of [`DiagnosisRule`]s so the
//! ordering can be read and each predicate tested on its own.

mod context;
mod rules;

pub use context::{EncodingEnvironment, FailureContext};
pub use rules::{
    extract_name, standard_rules, DiagnosisClassifier, DiagnosisLayer, DiagnosisRule,
    FailureDiagnosis, Finding, DSL_LIMITATIONS,
};
