// src/backoff/mod.rs

//! Escalating cool-down for identifiers that repeatedly blow their quota.
//!
//! The tracker is deliberately independent of the limiter's window state:
//! calling code records a violation when it observes a rejected decision,
//! and applies the returned penalty on top of the window's own retry-after.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;
use tracing::debug;

use crate::storage::now_millis;

/// Hard ceiling on any computed penalty.
pub const MAX_PENALTY: Duration = Duration::from_secs(60 * 60);

/// Penalties reset after this many base windows without a violation.
const IDLE_RESET_FACTOR: u64 = 10;

#[derive(Debug, Clone, Copy)]
struct ViolationRecord {
    count: u32,
    last_violation: u64,
    idle_deadline: u64,
}

/// Bounded in-memory ledger of repeat offenders.
#[derive(Debug, Default)]
pub struct ViolationTracker {
    records: RwLock<HashMap<String, ViolationRecord>>,
}

impl ViolationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one violation for `identifier` and returns the penalty: the
    /// Nth consecutive violation costs `base_window * 2^(N-1)`, capped at
    /// [`MAX_PENALTY`]. An identifier quiet for more than ten base windows
    /// starts over at the base penalty.
    pub fn record_violation(&self, identifier: &str, base_window: Duration) -> Duration {
        self.record_violation_at(identifier, base_window, now_millis())
    }

    pub(crate) fn record_violation_at(
        &self,
        identifier: &str,
        base_window: Duration,
        now: u64,
    ) -> Duration {
        let base_ms = (base_window.as_millis() as u64).max(1);
        let idle_ms = base_ms.saturating_mul(IDLE_RESET_FACTOR);

        let mut records = self.records.write().unwrap();
        let record = records
            .entry(identifier.to_string())
            .or_insert(ViolationRecord {
                count: 0,
                last_violation: 0,
                idle_deadline: 0,
            });

        if record.count > 0 && now.saturating_sub(record.last_violation) > idle_ms {
            debug!(identifier, "violation history expired, starting over");
            record.count = 0;
        }

        record.count += 1;
        record.last_violation = now;
        record.idle_deadline = now.saturating_add(idle_ms);

        penalty_for(base_ms, record.count)
    }

    pub fn violation_count(&self, identifier: &str) -> u32 {
        self.records
            .read()
            .unwrap()
            .get(identifier)
            .map_or(0, |record| record.count)
    }

    /// Clears the identifier's history.
    pub fn forgive(&self, identifier: &str) {
        self.records.write().unwrap().remove(identifier);
    }

    /// Number of identifiers with live violation history.
    pub fn tracked(&self) -> usize {
        self.records.read().unwrap().len()
    }

    /// Drops records past their idle deadline. Driven by the controller's
    /// periodic cleanup task.
    pub fn sweep(&self) {
        let now = now_millis();
        self.records
            .write()
            .unwrap()
            .retain(|_, record| record.idle_deadline > now);
    }
}

fn penalty_for(base_ms: u64, violations: u32) -> Duration {
    let max_ms = MAX_PENALTY.as_millis() as u64;
    // Shift saturates well past the cap, so the min() below always holds.
    let shift = violations.saturating_sub(1).min(63);
    let penalty_ms = base_ms.saturating_mul(1u64 << shift);
    Duration::from_millis(penalty_ms.min(max_ms))
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: Duration = Duration::from_millis(1_000);

    #[test]
    fn penalties_double_per_violation() {
        let tracker = ViolationTracker::new();

        assert_eq!(
            tracker.record_violation_at("203.0.113.7", BASE, 1_000),
            Duration::from_millis(1_000)
        );
        assert_eq!(
            tracker.record_violation_at("203.0.113.7", BASE, 1_100),
            Duration::from_millis(2_000)
        );
        assert_eq!(
            tracker.record_violation_at("203.0.113.7", BASE, 1_200),
            Duration::from_millis(4_000)
        );
        assert_eq!(
            tracker.record_violation_at("203.0.113.7", BASE, 1_300),
            Duration::from_millis(8_000)
        );
        assert_eq!(tracker.violation_count("203.0.113.7"), 4);
    }

    #[test]
    fn penalty_never_exceeds_one_hour() {
        let tracker = ViolationTracker::new();
        let base = Duration::from_secs(30 * 60);

        assert_eq!(
            tracker.record_violation_at("offender", base, 1_000),
            Duration::from_secs(30 * 60)
        );
        assert_eq!(
            tracker.record_violation_at("offender", base, 1_100),
            MAX_PENALTY
        );
        // Would be 2h uncapped
        assert_eq!(
            tracker.record_violation_at("offender", base, 1_200),
            MAX_PENALTY
        );

        // Stays capped no matter how long the streak gets
        let mut now = 1_300;
        for _ in 0..80 {
            assert!(tracker.record_violation_at("offender", base, now) <= MAX_PENALTY);
            now += 100;
        }
    }

    #[test]
    fn history_resets_after_ten_idle_windows() {
        let tracker = ViolationTracker::new();

        tracker.record_violation_at("client", BASE, 1_000);
        tracker.record_violation_at("client", BASE, 2_000);
        assert_eq!(tracker.violation_count("client"), 2);

        // 10 * base elapsed exactly: not yet expired
        assert_eq!(
            tracker.record_violation_at("client", BASE, 12_000),
            Duration::from_millis(4_000)
        );

        // More than 10 * base since the last violation: back to base
        assert_eq!(
            tracker.record_violation_at("client", BASE, 23_000),
            Duration::from_millis(1_000)
        );
        assert_eq!(tracker.violation_count("client"), 1);
    }

    #[test]
    fn forgive_clears_history() {
        let tracker = ViolationTracker::new();

        tracker.record_violation_at("client", BASE, 1_000);
        tracker.record_violation_at("client", BASE, 1_100);
        tracker.forgive("client");

        assert_eq!(tracker.violation_count("client"), 0);
        assert_eq!(
            tracker.record_violation_at("client", BASE, 1_200),
            Duration::from_millis(1_000)
        );
    }

    #[test]
    fn identifiers_escalate_independently() {
        let tracker = ViolationTracker::new();

        tracker.record_violation_at("a", BASE, 1_000);
        tracker.record_violation_at("a", BASE, 1_100);
        assert_eq!(
            tracker.record_violation_at("b", BASE, 1_200),
            Duration::from_millis(1_000)
        );
        assert_eq!(tracker.violation_count("a"), 2);
        assert_eq!(tracker.violation_count("b"), 1);
        assert_eq!(tracker.tracked(), 2);
    }

    #[test]
    fn sweep_drops_idle_records_only() {
        let tracker = ViolationTracker::new();

        // Idle deadline is now + 10s for this base
        tracker.record_violation_at("stale", BASE, 1_000);
        tracker.record_violation_at("fresh", BASE, now_millis());

        tracker.sweep();
        assert_eq!(tracker.violation_count("stale"), 0);
        assert_eq!(tracker.violation_count("fresh"), 1);
        assert_eq!(tracker.tracked(), 1);
    }
}
