//! Per-arm counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

const FAILURE_MASK: u64 = 0xFFFF_FFFF;

/// Snapshot of one encoder version's record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Arm {
    pub id: String,
    pub successes: u32,
    pub failures: u32,
}

impl Arm {
    pub fn attempts(&self) -> u64 {
        u64::from(self.successes) + u64::from(self.failures)
    }

    /// `successes / attempts`, or 0.0 for an untried arm.
    pub fn success_rate(&self) -> f64 {
        match self.attempts() {
            0 => 0.0,
            n => f64::from(self.successes) / n as f64,
        }
    }
}

/// Live counters for one arm.
///
/// Successes and failures share one `AtomicU64` (successes in the high
/// half) so an outcome is a single indivisible update and a snapshot never
/// sees half of one.
#[derive(Debug)]
pub(crate) struct ArmState {
    pub(crate) id: String,
    counts: AtomicU64,
}

fn unpack(bits: u64) -> (u32, u32) {
    ((bits >> 32) as u32, (bits & FAILURE_MASK) as u32)
}

impl ArmState {
    pub(crate) fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            counts: AtomicU64::new(0),
        }
    }

    /// Apply one outcome; returns the counts after it, or `None` when the
    /// counter it would move is already at `u32::MAX`.
    pub(crate) fn record(&self, success: bool) -> Option<(u32, u32)> {
        let step = |bits: u64| {
            let (s, f) = unpack(bits);
            let (s, f) = if success {
                (s.checked_add(1)?, f)
            } else {
                (s, f.checked_add(1)?)
            };
            Some((u64::from(s) << 32) | u64::from(f))
        };
        let previous = self
            .counts
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, step)
            .ok()?;
        step(previous).map(unpack)
    }

    #[cfg(test)]
    pub(crate) fn set_counts(&self, successes: u32, failures: u32) {
        self.counts.store(
            (u64::from(successes) << 32) | u64::from(failures),
            Ordering::Release,
        );
    }

    pub(crate) fn snapshot(&self) -> Arm {
        let (successes, failures) = unpack(self.counts.load(Ordering::Acquire));
        Arm {
            id: self.id.clone(),
            successes,
            failures,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_record_and_snapshot() {
        let arm = ArmState::new("v1");
        assert_eq!(arm.record(true), Some((1, 0)));
        assert_eq!(arm.record(false), Some((1, 1)));
        assert_eq!(arm.record(true), Some((2, 1)));
        let snap = arm.snapshot();
        assert_eq!(snap.attempts(), 3);
        assert!((snap.success_rate() - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_full_counter_rejects_the_outcome() {
        let arm = ArmState::new("v1");
        arm.set_counts(u32::MAX, 3);
        assert_eq!(arm.record(true), None);
        assert_eq!(arm.snapshot().successes, u32::MAX);
        assert_eq!(arm.snapshot().failures, 3);
        // The other counter still moves.
        assert_eq!(arm.record(false), Some((u32::MAX, 4)));
    }

    #[test]
    fn test_untried_rate_is_zero() {
        assert_eq!(ArmState::new("v1").snapshot().success_rate(), 0.0);
    }

    #[test]
    fn test_concurrent_records_are_not_lost() {
        let arm = Arc::new(ArmState::new("v1"));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let arm = Arc::clone(&arm);
                std::thread::spawn(move || {
                    for i in 0..1000 {
                        arm.record((i + t) % 2 == 0);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let snap = arm.snapshot();
        assert_eq!(snap.attempts(), 8000);
        assert_eq!(snap.successes, 4000);
    }
}
