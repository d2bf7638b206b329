//! Staleness detection for book sessions.
//!
//! A session's `last_update_at` is stamped with the event time of the most recently
//! applied diff. [`HealthSupervisor`](super::health::HealthSupervisor) compares that
//! timestamp against the current time on every heartbeat; this module holds the small,
//! independently testable pieces of that check.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::time::Duration;

/// Default staleness threshold: a session that hasn't applied a diff in this long is
/// considered stale and torn down/recreated by the supervisor.
pub const DEFAULT_STALENESS_THRESHOLD: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Fresh,
    Stale,
}

/// `true` when `now - last_update_at` exceeds `threshold`.
pub fn is_stale(last_update_at: DateTime<Utc>, now: DateTime<Utc>, threshold: Duration) -> bool {
    let threshold = ChronoDuration::from_std(threshold).unwrap_or(ChronoDuration::seconds(i64::MAX));
    now.signed_duration_since(last_update_at) > threshold
}

pub fn freshness(last_update_at: DateTime<Utc>, now: DateTime<Utc>, threshold: Duration) -> Freshness {
    if is_stale(last_update_at, now, threshold) {
        Freshness::Stale
    } else {
        Freshness::Fresh
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_within_threshold() {
        let now = Utc::now();
        let last_update_at = now - ChronoDuration::seconds(5);
        assert!(!is_stale(last_update_at, now, Duration::from_secs(10)));
    }

    #[test]
    fn stale_beyond_threshold() {
        let now = Utc::now();
        let last_update_at = now - ChronoDuration::seconds(11);
        assert!(is_stale(last_update_at, now, Duration::from_secs(10)));
    }

    #[test]
    fn exactly_at_threshold_is_not_yet_stale() {
        let now = Utc::now();
        let last_update_at = now - ChronoDuration::seconds(10);
        assert!(!is_stale(last_update_at, now, Duration::from_secs(10)));
    }

    #[test]
    fn freshness_reports_stale_variant() {
        let now = Utc::now();
        let last_update_at = now - ChronoDuration::seconds(30);
        assert_eq!(
            freshness(last_update_at, now, Duration::from_secs(10)),
            Freshness::Stale
        );
    }
}
