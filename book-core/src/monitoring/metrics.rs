//! Prometheus metric definitions for the aggregator process.

use crate::book_event::SessionState;
use crate::registry::SessionRegistry;
use anyhow::{Context, Result};
use prometheus::{GaugeVec, IntCounterVec, IntGaugeVec, Opts, Registry};

/// Metrics describing the health of every tracked session.
pub struct SessionMetrics {
    /// Current `SessionState` per (exchange, symbol), one gauge value per known state.
    pub session_state: IntGaugeVec,
    /// Seconds since the session last applied a diff.
    pub staleness_seconds: GaugeVec,
    /// Depth of each session's staging queue.
    pub queue_depth: IntGaugeVec,
    /// Messages dropped by the bounded staging queue under overflow.
    pub queue_drops_total: IntCounterVec,
    /// Resync/recreate cycles triggered by gap detection or staleness.
    pub resyncs_total: IntCounterVec,
}

impl SessionMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let session_state = IntGaugeVec::new(
            Opts::new("book_session_state", "Current session state (1 = active)"),
            &["exchange", "symbol", "state"],
        )?;
        let staleness_seconds = GaugeVec::new(
            Opts::new(
                "book_session_staleness_seconds",
                "Seconds since the session last applied a diff",
            ),
            &["exchange", "symbol"],
        )?;
        let queue_depth = IntGaugeVec::new(
            Opts::new("book_session_queue_depth", "Staging queue depth"),
            &["exchange", "symbol"],
        )?;
        let queue_drops_total = IntCounterVec::new(
            Opts::new(
                "book_session_queue_drops_total",
                "Events dropped by the bounded staging queue",
            ),
            &["exchange", "symbol"],
        )?;
        let resyncs_total = IntCounterVec::new(
            Opts::new(
                "book_session_resyncs_total",
                "Session teardown/recreate cycles",
            ),
            &["exchange", "symbol", "reason"],
        )?;

        registry.register(Box::new(session_state.clone()))?;
        registry.register(Box::new(staleness_seconds.clone()))?;
        registry.register(Box::new(queue_depth.clone()))?;
        registry.register(Box::new(queue_drops_total.clone()))?;
        registry.register(Box::new(resyncs_total.clone()))?;

        Ok(Self {
            session_state,
            staleness_seconds,
            queue_depth,
            queue_drops_total,
            resyncs_total,
        })
    }
}

/// Top-level metrics registry for the process.
pub struct MetricsRegistry {
    registry: Registry,
    sessions: SessionMetrics,
}

impl MetricsRegistry {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();
        let sessions = SessionMetrics::new(&registry).context("registering session metrics")?;
        Ok(Self { registry, sessions })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn sessions(&self) -> &SessionMetrics {
        &self.sessions
    }

    /// Refreshes every session gauge from a live snapshot. Intended to run once
    /// per aggregator emission tick, from the binary entry point rather than from
    /// [`crate::aggregator::Aggregator`] itself, so the `metrics-server` feature
    /// stays opt-in without touching the core emit loop.
    pub fn update_from_registry(&self, registry: &SessionRegistry) {
        let now = chrono::Utc::now();
        for (key, state) in registry.state_snapshot() {
            for candidate in ALL_SESSION_STATES {
                let value = if candidate == state { 1 } else { 0 };
                self.sessions
                    .session_state
                    .with_label_values(&[&key.exchange_id, &key.symbol, candidate.as_label()])
                    .set(value);
            }
        }

        for (key, last_update_at) in registry.heartbeat_snapshot() {
            let staleness = (now - last_update_at).num_milliseconds().max(0) as f64 / 1000.0;
            self.sessions
                .staleness_seconds
                .with_label_values(&[&key.exchange_id, &key.symbol])
                .set(staleness);
        }

        for (key, queue_len, dropped_count) in registry.queue_metrics() {
            self.sessions
                .queue_depth
                .with_label_values(&[&key.exchange_id, &key.symbol])
                .set(queue_len as i64);
            let counter = self
                .sessions
                .queue_drops_total
                .with_label_values(&[&key.exchange_id, &key.symbol]);
            let already_counted = counter.get() as u64;
            if dropped_count > already_counted {
                counter.inc_by(dropped_count - already_counted);
            }
        }
    }
}

const ALL_SESSION_STATES: [SessionState; 6] = [
    SessionState::Initializing,
    SessionState::Snapshotting,
    SessionState::Live,
    SessionState::Degraded,
    SessionState::Resyncing,
    SessionState::Destroyed,
];

impl SessionState {
    fn as_label(self) -> &'static str {
        match self {
            SessionState::Initializing => "initializing",
            SessionState::Snapshotting => "snapshotting",
            SessionState::Live => "live",
            SessionState::Degraded => "degraded",
            SessionState::Resyncing => "resyncing",
            SessionState::Destroyed => "destroyed",
        }
    }
}
