//! Issue drafts for validators suspected of upstream bugs.
//!
//! Only the grouping lives here; filing against an external tracker is the
//! caller's business.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::engine::PotentialBug;
use crate::adapter::WeightClass;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueDraft {
    pub validator_id: String,
    pub weight_class: WeightClass,
    pub title: String,
    pub body: String,
    pub bugs: Vec<PotentialBug>,
}

/// Keep bugs whose confidence meets `confidence_threshold` and group them
/// into one draft per validator, ordered by validator id.
pub fn file_issues(bugs: &[PotentialBug], confidence_threshold: f64) -> Vec<IssueDraft> {
    let mut grouped: BTreeMap<&str, Vec<&PotentialBug>> = BTreeMap::new();
    for bug in bugs.iter().filter(|b| b.confidence >= confidence_threshold) {
        grouped.entry(bug.validator_id.as_str()).or_default().push(bug);
    }

    grouped
        .into_iter()
        .map(|(validator_id, bugs)| {
            let weight_class = bugs[0].weight_class;
            let title = format!(
                "{validator_id}: {} case(s) disagree with statute-derived expectations",
                bugs.len()
            );
            let mut body = String::new();
            for bug in &bugs {
                body.push_str(&format!(
                    "- {} / {} ({}): expected {:.2}, got {:.2} (delta {:+.2}, confidence {:.2})",
                    bug.test_case, bug.variable, bug.year, bug.expected, bug.actual, bug.delta,
                    bug.confidence
                ));
                if let Some(citation) = &bug.citation {
                    body.push_str(&format!(" [{citation}]"));
                }
                body.push('\n');
            }
            IssueDraft {
                validator_id: validator_id.to_string(),
                weight_class,
                title,
                body,
                bugs: bugs.into_iter().cloned().collect(),
            }
        })
        .collect()
}
