//! Hourly hard constraint.
//!
//! A process-local, best-effort counter of rate-limited reflex executions
//! per (owner, wall-clock hour). Reads and increments are atomic per key;
//! the map is never persisted, so restarts reset every bucket. On
//! multi-instance deployments each instance enforces its own quota.

use chrono::{DateTime, Timelike, Utc};
use dashmap::DashMap;

/// Behaviors exempt from the hourly ceiling.
pub fn is_exempt(behavior: &str) -> bool {
    behavior == "audit" || behavior == "keepalive"
}

/// Per-(owner, hour) execution counter with a fixed ceiling.
pub struct HourlyConstraint {
    counts: DashMap<(String, i64), u32>,
    limit: u32,
}

impl HourlyConstraint {
    pub fn new(limit: u32) -> Self {
        Self { counts: DashMap::new(), limit }
    }

    fn bucket(now: DateTime<Utc>) -> i64 {
        now.timestamp() - i64::from(now.minute()) * 60 - i64::from(now.second())
    }

    /// Would one more rate-limited execution exceed the ceiling?
    pub fn would_block(&self, owner: &str, now: DateTime<Utc>) -> bool {
        let key = (owner.to_string(), Self::bucket(now));
        self.counts.get(&key).map(|c| *c >= self.limit).unwrap_or(false)
    }

    /// Record one rate-limited execution.
    pub fn record(&self, owner: &str, now: DateTime<Utc>) {
        let bucket = Self::bucket(now);
        *self.counts.entry((owner.to_string(), bucket)).or_insert(0) += 1;
        // Stale buckets pile up slowly (one per owner per hour); prune them
        // opportunistically on write.
        if self.counts.len() > 1024 {
            self.counts.retain(|(_, b), _| *b == bucket);
        }
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn blocks_after_limit_in_same_hour() {
        let constraint = HourlyConstraint::new(3);
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 10, 15, 0).unwrap();
        for _ in 0..3 {
            assert!(!constraint.would_block("bob", now));
            constraint.record("bob", now);
        }
        assert!(constraint.would_block("bob", now));
        // A different owner is unaffected.
        assert!(!constraint.would_block("alice", now));
    }

    #[test]
    fn next_hour_resets_the_bucket() {
        let constraint = HourlyConstraint::new(1);
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 10, 59, 59).unwrap();
        constraint.record("bob", now);
        assert!(constraint.would_block("bob", now));
        let next_hour = Utc.with_ymd_and_hms(2026, 3, 1, 11, 0, 0).unwrap();
        assert!(!constraint.would_block("bob", next_hour));
    }

    #[test]
    fn audit_and_keepalive_are_exempt() {
        assert!(is_exempt("audit"));
        assert!(is_exempt("keepalive"));
        assert!(!is_exempt("phatic"));
    }
}
