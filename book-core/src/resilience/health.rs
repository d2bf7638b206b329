//! Cross-session staleness supervision.
//!
//! Unlike [`GapDetector`](super::gap_detector::GapDetector), which lives inside a
//! single adapter/session, `HealthSupervisor` is driven once per heartbeat by
//! [`crate::aggregator::Aggregator`] and walks every session in the registry. A
//! session whose `last_update_at` has fallen behind `threshold` is reported so the
//! caller can tear it down and recreate it, mirroring `check_uptime()` in the
//! reference feed client this system replaces.

use super::stale_data::{self, Freshness, DEFAULT_STALENESS_THRESHOLD};
use chrono::{DateTime, Utc};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaleSession<K> {
    pub key: K,
    pub last_update_at: DateTime<Utc>,
}

/// Evaluates staleness across a batch of sessions on every heartbeat tick.
#[derive(Debug, Clone)]
pub struct HealthSupervisor {
    threshold: Duration,
}

impl HealthSupervisor {
    pub fn new(threshold: Duration) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    /// Returns the freshness of a single session against `now`.
    pub fn check(&self, last_update_at: DateTime<Utc>, now: DateTime<Utc>) -> Freshness {
        stale_data::freshness(last_update_at, now, self.threshold)
    }

    /// Scans `sessions` and returns the keys of every session that has gone stale.
    /// Callers are expected to `destroy()` then `create()` each one, matching the
    /// teardown/recreation cycle a session's own staleness check triggers.
    pub fn sweep<'a, K, I>(&self, sessions: I, now: DateTime<Utc>) -> Vec<StaleSession<K>>
    where
        K: 'a + Clone,
        I: IntoIterator<Item = (&'a K, DateTime<Utc>)>,
    {
        sessions
            .into_iter()
            .filter_map(|(key, last_update_at)| {
                if stale_data::is_stale(last_update_at, now, self.threshold) {
                    Some(StaleSession {
                        key: key.clone(),
                        last_update_at,
                    })
                } else {
                    None
                }
            })
            .collect()
    }
}

impl Default for HealthSupervisor {
    fn default() -> Self {
        Self::new(DEFAULT_STALENESS_THRESHOLD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[test]
    fn fresh_session_not_reported() {
        let supervisor = HealthSupervisor::new(Duration::from_secs(10));
        let now = Utc::now();
        let last_update_at = now - ChronoDuration::seconds(2);
        assert_eq!(supervisor.check(last_update_at, now), Freshness::Fresh);
        assert!(supervisor
            .sweep(vec![(&"cb-BTC-USD", last_update_at)], now)
            .is_empty());
    }

    #[test]
    fn stale_session_is_reported_with_key() {
        let supervisor = HealthSupervisor::new(Duration::from_secs(10));
        let now = Utc::now();
        let last_update_at = now - ChronoDuration::seconds(30);
        let stale = supervisor.sweep(vec![(&"cb-BTC-USD", last_update_at)], now);
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].key, "cb-BTC-USD");
        assert_eq!(stale[0].last_update_at, last_update_at);
    }

    #[test]
    fn sweep_only_reports_stale_entries_from_a_mixed_batch() {
        let supervisor = HealthSupervisor::new(Duration::from_secs(10));
        let now = Utc::now();
        let fresh = now - ChronoDuration::seconds(1);
        let stale = now - ChronoDuration::seconds(20);
        let result = supervisor.sweep(vec![(&"fresh", fresh), (&"stale", stale)], now);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].key, "stale");
    }
}
