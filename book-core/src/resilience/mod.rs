//! Resilience patterns used by feed adapters and sessions.
//!
//! - Exponential backoff for reconnects
//! - Sequence gap detection
//! - Event-time staleness checks, swept across sessions by [`HealthSupervisor`]

pub mod backoff;
pub mod gap_detector;
pub mod health;
pub mod stale_data;

pub use backoff::{BackoffConfig, ExponentialBackoff};
pub use gap_detector::GapDetector;
pub use health::{HealthSupervisor, StaleSession};
pub use stale_data::{freshness, is_stale, Freshness, DEFAULT_STALENESS_THRESHOLD};
