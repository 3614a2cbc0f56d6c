//! quorumd - inspect and plan from a quorum event log
//!
//! ## Commands
//!
//! - `report`: arm statistics, calibration by KPI and version regressions
//! - `select`: which encoder version the bandit would try next
//! - `plan`: which variables to validate next
//! - `config`: print the effective configuration

use std::collections::BTreeSet;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use quorum_core::config::ENV_LEDGER_PATH;
use quorum_core::metrics::METRICS;
use quorum_core::telemetry::init_tracing;
use quorum_core::{
    detect_regressions, match_rates_by_version, BanditSelector, BanditStatistics,
    CalibrationSummary, CalibrationTracker, EventLog, JsonlEventLog, LedgerEntry, LedgerRecord,
    LogFormat, QuorumConfig, Regression, SamplingController, SelectionStrategy,
    DEFAULT_REGRESSION_THRESHOLD,
};
use serde::Serialize;
use tracing::{info, warn, Level};

#[derive(Parser)]
#[command(name = "quorumd")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Inspect a quorum validation ledger", long_about = None)]
struct Cli {
    /// JSON config file; QUORUM_* variables apply when absent
    #[arg(short, long, global = true, env = "QUORUM_CONFIG")]
    config: Option<PathBuf>,

    /// Event log path (overrides the configured one)
    #[arg(short, long, global = true, env = ENV_LEDGER_PATH)]
    ledger: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Summarise arms, calibration and regressions
    Report {
        /// Match-rate drop that counts as a regression
        #[arg(long, default_value_t = DEFAULT_REGRESSION_THRESHOLD)]
        threshold: f64,
    },

    /// Show the encoder version the bandit would pick
    Select {
        /// thompson, exploit, explore or latest (default: configured)
        #[arg(short, long)]
        strategy: Option<SelectionStrategy>,
    },

    /// Choose variables to validate next
    Plan {
        /// Candidate variables
        #[arg(required = true)]
        variables: Vec<String>,
    },

    /// Print the effective configuration as JSON
    Config,
}

#[derive(Serialize)]
struct Report {
    entries: usize,
    bandit: BanditStatistics,
    calibration: Vec<CalibrationSummary>,
    regressions: Vec<VersionRegression>,
}

#[derive(Serialize)]
struct VersionRegression {
    from: String,
    to: String,
    regressions: Vec<Regression>,
}

fn load_config(cli: &Cli) -> Result<QuorumConfig> {
    let mut config = match &cli.config {
        Some(path) => QuorumConfig::from_json_file(path)
            .with_context(|| format!("reading config {}", path.display()))?,
        None => QuorumConfig::from_env().context("reading QUORUM_* environment")?,
    };
    if let Some(path) = &cli.ledger {
        config.ledger_path = path.clone();
    }
    config.check()?;
    Ok(config)
}

async fn read_ledger(config: &QuorumConfig) -> Result<Vec<LedgerEntry>> {
    // Opening creates the file; reads must not leave one behind.
    let exists = tokio::fs::try_exists(&config.ledger_path)
        .await
        .with_context(|| format!("checking ledger {}", config.ledger_path.display()))?;
    if !exists {
        bail!("ledger {} does not exist", config.ledger_path.display());
    }
    let log = JsonlEventLog::open(&config.ledger_path)
        .await
        .with_context(|| format!("opening ledger {}", config.ledger_path.display()))?;
    let entries = log.read_all().await?;
    info!(
        path = %config.ledger_path.display(),
        entries = entries.len(),
        "ledger loaded"
    );
    Ok(entries)
}

/// Versions in the order their first attempt was logged.
fn versions_in_order(entries: &[LedgerEntry]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    entries
        .iter()
        .filter_map(|e| match &e.record {
            LedgerRecord::EncodingAttempt(a) => Some(a.plugin_version.clone()),
            _ => None,
        })
        .filter(|v| seen.insert(v.clone()))
        .collect()
}

fn build_report(config: &QuorumConfig, entries: &[LedgerEntry], threshold: f64) -> Result<Report> {
    let bandit = BanditSelector::with_seed(config.seed);
    bandit.replay(entries);
    let tracker = CalibrationTracker::replay(config.calibration.clone(), entries)?;

    let rates = match_rates_by_version(entries);
    let versions = versions_in_order(entries);
    let regressions = versions
        .windows(2)
        .filter_map(|pair| {
            let (old, new) = (rates.get(&pair[0])?, rates.get(&pair[1])?);
            let found = detect_regressions(old, new, threshold);
            (!found.is_empty()).then(|| VersionRegression {
                from: pair[0].clone(),
                to: pair[1].clone(),
                regressions: found,
            })
        })
        .collect();

    Ok(Report {
        entries: entries.len(),
        bandit: bandit.statistics(),
        calibration: tracker.summary_by_kpi().into_values().collect(),
        regressions,
    })
}

fn print_json(value: &impl Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let format = if cli.json { LogFormat::Json } else { config.log_format };
    init_tracing(format, level);

    match &cli.command {
        Commands::Report { threshold } => {
            let entries = read_ledger(&config).await?;
            let report = build_report(&config, &entries, *threshold)?;
            for r in &report.regressions {
                for reg in &r.regressions {
                    warn!(
                        from = %r.from,
                        to = %r.to,
                        variable = %reg.variable,
                        old_rate = reg.old_rate,
                        new_rate = reg.new_rate,
                        "match rate regressed"
                    );
                }
            }
            print_json(&report)?;
        }
        Commands::Select { strategy } => {
            let entries = read_ledger(&config).await?;
            let bandit = BanditSelector::with_seed(config.seed);
            bandit.replay(&entries);
            let version = bandit.select(strategy.unwrap_or(config.strategy))?;
            println!("{version}");
        }
        Commands::Plan { variables } => {
            let entries = read_ledger(&config).await?;
            let tested: BTreeSet<String> = entries
                .iter()
                .filter_map(|e| match &e.record {
                    LedgerRecord::EncodingAttempt(a) => Some(a.variable.clone()),
                    _ => None,
                })
                .collect();
            let sampler = SamplingController::new(config.sampling.clone(), config.seed)?;
            let plan = sampler.plan(variables, &tested, tested.len() as u64);
            info!(reason = %plan.reason, selected = plan.selected.len(), "plan ready");
            print_json(&plan)?;
        }
        Commands::Config => print_json(&config)?,
    }

    METRICS.flush();
    Ok(())
}
