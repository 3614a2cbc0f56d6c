//! Bandit selection across competing encoder versions.

mod arm;
mod regression;
mod selector;

pub use arm::Arm;
pub use regression::{
    detect_regressions, match_rates_by_version, Regression, DEFAULT_REGRESSION_THRESHOLD,
};
pub use selector::{BanditSelector, BanditStatistics, SelectionStrategy};
