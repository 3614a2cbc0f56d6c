//! Multi-validator consensus: fan-out, level classification, reward.

mod engine;
mod issues;
mod level;
mod reward;

pub use engine::{
    Abstention, ConsensusConfig, ConsensusEngine, ConsensusResult, DetailedValidation,
    PotentialBug, ValidatorOutcome, ValidatorResult,
};
pub use issues::{file_issues, IssueDraft};
pub use level::{classify, ClassifyParams, ConsensusLevel, Response};
pub use reward::{confidence_score, match_bonus, matches_expected, reward_signal};
