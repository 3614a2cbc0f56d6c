//! Regression detection between two encoder versions.

use std::collections::BTreeMap;

use quorum_ledger::{LedgerEntry, LedgerRecord};
use serde::{Deserialize, Serialize};

/// Match-rate drop that counts as a regression by default.
pub const DEFAULT_REGRESSION_THRESHOLD: f64 = 0.05;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Regression {
    pub variable: String,
    pub old_rate: f64,
    pub new_rate: f64,
}

impl Regression {
    pub fn rate_drop(&self) -> f64 {
        self.old_rate - self.new_rate
    }
}

/// Variables whose match rate fell by more than `threshold` from `old` to
/// `new`. Variables present in only one map are ignored.
pub fn detect_regressions(
    old: &BTreeMap<String, f64>,
    new: &BTreeMap<String, f64>,
    threshold: f64,
) -> Vec<Regression> {
    new.iter()
        .filter_map(|(variable, &new_rate)| {
            let &old_rate = old.get(variable)?;
            (old_rate - new_rate > threshold).then(|| Regression {
                variable: variable.clone(),
                old_rate,
                new_rate,
            })
        })
        .collect()
}

/// Latest match rate per variable for each encoder version, from the
/// encoding attempts in `entries`.
pub fn match_rates_by_version<'a>(
    entries: impl IntoIterator<Item = &'a LedgerEntry>,
) -> BTreeMap<String, BTreeMap<String, f64>> {
    let mut rates: BTreeMap<String, BTreeMap<String, (chrono::DateTime<chrono::Utc>, f64)>> =
        BTreeMap::new();
    for entry in entries {
        if let LedgerRecord::EncodingAttempt(a) = &entry.record {
            let per_var = rates.entry(a.plugin_version.clone()).or_default();
            let slot = per_var
                .entry(a.variable.clone())
                .or_insert((a.timestamp, a.match_rate));
            if a.timestamp >= slot.0 {
                *slot = (a.timestamp, a.match_rate);
            }
        }
    }
    rates
        .into_iter()
        .map(|(version, vars)| {
            (
                version,
                vars.into_iter().map(|(var, (_, rate))| (var, rate)).collect(),
            )
        })
        .collect()
}
