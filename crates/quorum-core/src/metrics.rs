//! Process-wide atomic counters.
//!
//! Counters are bumped silently at the call site. [`Metrics::flush`] emits
//! the current values as one `tracing::info!` event, e.g. at the end of a
//! validation round.

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

pub struct Metrics {
    validations: AtomicU64,
    abstentions: AtomicU64,
    upstream_bugs: AtomicU64,
    outcomes_recorded: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            validations: AtomicU64::new(0),
            abstentions: AtomicU64::new(0),
            upstream_bugs: AtomicU64::new(0),
            outcomes_recorded: AtomicU64::new(0),
        }
    }

    /// One completed `validate()` call.
    pub fn inc_validations(&self) {
        self.validations.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "validations", "counter incremented");
    }

    /// One adapter that did not produce a value.
    pub fn inc_abstentions(&self) {
        self.abstentions.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "abstentions", "counter incremented");
    }

    /// Potential upstream bug records produced.
    pub fn add_upstream_bugs(&self, n: u64) {
        self.upstream_bugs.fetch_add(n, Ordering::Relaxed);
        tracing::trace!(metric = "upstream_bugs", n, "counter incremented");
    }

    /// One bandit outcome applied to an arm.
    pub fn inc_outcomes_recorded(&self) {
        self.outcomes_recorded.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "outcomes_recorded", "counter incremented");
    }

    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            validations = self.validations(),
            abstentions = self.abstentions(),
            upstream_bugs = self.upstream_bugs(),
            outcomes_recorded = self.outcomes_recorded(),
        );
    }

    pub fn validations(&self) -> u64 {
        self.validations.load(Ordering::Relaxed)
    }

    pub fn abstentions(&self) -> u64 {
        self.abstentions.load(Ordering::Relaxed)
    }

    pub fn upstream_bugs(&self) -> u64 {
        self.upstream_bugs.load(Ordering::Relaxed)
    }

    pub fn outcomes_recorded(&self) -> u64 {
        self.outcomes_recorded.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.validations.store(0, Ordering::Relaxed);
        self.abstentions.store(0, Ordering::Relaxed);
        self.upstream_bugs.store(0, Ordering::Relaxed);
        self.outcomes_recorded.store(0, Ordering::Relaxed);
    }
}
