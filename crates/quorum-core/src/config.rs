//! Runtime configuration.
//!
//! Defaults suit a local run; `QUORUM_*` environment variables override
//! individual fields and a JSON file can replace the whole set.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::bandit::SelectionStrategy;
use crate::calibration::CalibrationConfig;
use crate::consensus::ConsensusConfig;
use crate::domain::{QuorumError, Result};
use crate::sampling::SamplingSchedule;
use crate::telemetry::LogFormat;

pub const ENV_TOLERANCE: &str = "QUORUM_TOLERANCE";
pub const ENV_ADAPTER_TIMEOUT_MS: &str = "QUORUM_ADAPTER_TIMEOUT_MS";
pub const ENV_STRATEGY: &str = "QUORUM_STRATEGY";
pub const ENV_SEED: &str = "QUORUM_SEED";
pub const ENV_LEDGER_PATH: &str = "QUORUM_LEDGER_PATH";
pub const ENV_LOG_FORMAT: &str = "QUORUM_LOG_FORMAT";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuorumConfig {
    pub consensus: ConsensusConfig,
    pub sampling: SamplingSchedule,
    pub calibration: CalibrationConfig,
    pub strategy: SelectionStrategy,
    /// Seed for bandit draws and case sampling.
    pub seed: u64,
    pub ledger_path: PathBuf,
    /// Match rate at or above which an encoding attempt counts as a success.
    pub success_match_rate: f64,
    pub log_format: LogFormat,
}

impl Default for QuorumConfig {
    fn default() -> Self {
        Self {
            consensus: ConsensusConfig::default(),
            sampling: SamplingSchedule::default(),
            calibration: CalibrationConfig::default(),
            strategy: SelectionStrategy::default(),
            seed: 0,
            ledger_path: PathBuf::from("quorum-ledger.jsonl"),
            success_match_rate: 0.99,
            log_format: LogFormat::default(),
        }
    }
}

fn parse<T: FromStr>(name: &str, raw: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| QuorumError::InvalidConfig(format!("{name}={raw:?}: {e}")))
}

impl QuorumConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from defaults plus whatever `lookup` returns for the
    /// `QUORUM_*` keys.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(raw) = lookup(ENV_TOLERANCE) {
            config.consensus.tolerance = parse(ENV_TOLERANCE, &raw)?;
        }
        if let Some(raw) = lookup(ENV_ADAPTER_TIMEOUT_MS) {
            config.consensus.adapter_timeout_ms = parse(ENV_ADAPTER_TIMEOUT_MS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_STRATEGY) {
            config.strategy = raw.parse()?;
        }
        if let Some(raw) = lookup(ENV_SEED) {
            config.seed = parse(ENV_SEED, &raw)?;
        }
        if let Some(raw) = lookup(ENV_LEDGER_PATH) {
            config.ledger_path = PathBuf::from(raw);
        }
        if let Some(raw) = lookup(ENV_LOG_FORMAT) {
            config.log_format = raw.parse()?;
        }
        config.check()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = std::fs::read(path.as_ref())?;
        let config: Self = serde_json::from_slice(&bytes)?;
        config.check()?;
        Ok(config)
    }

    pub fn check(&self) -> Result<()> {
        self.consensus.check()?;
        self.sampling.check()?;
        self.calibration.check()?;
        if !(0.0..=1.0).contains(&self.success_match_rate) {
            return Err(QuorumError::InvalidConfig(format!(
                "success match rate must be within [0, 1], got {}",
                self.success_match_rate
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let c = QuorumConfig::default();
        assert_eq!(c.consensus.tolerance, 15.0);
        assert_eq!(c.consensus.adapter_timeout_ms, 30_000);
        assert_eq!(c.consensus.upstream_bug_confidence, 0.90);
        assert_eq!(c.strategy, SelectionStrategy::Thompson);
        assert_eq!(c.success_match_rate, 0.99);
        assert!(c.check().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let c = QuorumConfig::from_lookup(lookup(&[
            (ENV_TOLERANCE, "1.5"),
            (ENV_ADAPTER_TIMEOUT_MS, "250"),
            (ENV_STRATEGY, "exploit"),
            (ENV_SEED, "42"),
            (ENV_LEDGER_PATH, "/tmp/q.jsonl"),
            (ENV_LOG_FORMAT, "json"),
        ]))
        .unwrap();
        assert_eq!(c.consensus.tolerance, 1.5);
        assert_eq!(c.consensus.adapter_timeout_ms, 250);
        assert_eq!(c.strategy, SelectionStrategy::Exploit);
        assert_eq!(c.seed, 42);
        assert_eq!(c.ledger_path, PathBuf::from("/tmp/q.jsonl"));
        assert_eq!(c.log_format, LogFormat::Json);
    }

    #[test]
    fn test_malformed_env_is_invalid_config() {
        let err = QuorumConfig::from_lookup(lookup(&[(ENV_SEED, "many")])).unwrap_err();
        assert!(matches!(err, QuorumError::InvalidConfig(_)));

        let err = QuorumConfig::from_lookup(lookup(&[(ENV_TOLERANCE, "-3")])).unwrap_err();
        assert!(err.is_configuration());

        let err = QuorumConfig::from_lookup(lookup(&[(ENV_STRATEGY, "ucb")])).unwrap_err();
        assert!(matches!(err, QuorumError::UnknownStrategy(_)));
    }

    #[test]
    fn test_from_json_file_partial() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"strategy": "latest", "consensus": {{"tolerance": 1.0}}}}"#
        )
        .unwrap();
        let c = QuorumConfig::from_json_file(file.path()).unwrap();
        assert_eq!(c.strategy, SelectionStrategy::Latest);
        assert_eq!(c.consensus.tolerance, 1.0);
        assert_eq!(c.consensus.adapter_timeout_ms, 30_000);
        assert_eq!(c.seed, 0);
    }
}
