//! Thread-safe registry of live sessions, keyed by exchange and symbol.

use crate::session::{BookSession, SessionHandle};
use dashmap::DashMap;
use std::sync::Arc;

/// Identifies one session across the registry and in emitted documents/metrics.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionKey {
    pub exchange_id: String,
    pub symbol: String,
}

impl SessionKey {
    pub fn new(exchange_id: impl Into<String>, symbol: impl Into<String>) -> Self {
        Self {
            exchange_id: exchange_id.into(),
            symbol: symbol.into(),
        }
    }
}

/// Tracks every running [`BookSession`], concurrently readable by the aggregator's
/// emission loop and writable by whatever recreates a session after it goes stale.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<SessionKey, BookSession>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: SessionKey, session: BookSession) {
        self.sessions.insert(key, session);
    }

    /// Removes and shuts a session down cooperatively. No-op if absent.
    pub fn remove(&self, key: &SessionKey) {
        if let Some((_, session)) = self.sessions.remove(key) {
            session.shutdown();
        }
    }

    pub fn handle(&self, key: &SessionKey) -> Option<Arc<SessionHandle>> {
        self.sessions.get(key).map(|s| s.handle().clone())
    }

    /// Snapshots `(key, last_update_at)` for every session, for
    /// [`crate::resilience::health::HealthSupervisor::sweep`].
    pub fn heartbeat_snapshot(&self) -> Vec<(SessionKey, chrono::DateTime<chrono::Utc>)> {
        self.sessions
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().handle().last_update_at()))
            .collect()
    }

    pub fn keys(&self) -> Vec<SessionKey> {
        self.sessions.iter().map(|e| e.key().clone()).collect()
    }

    /// Snapshots `(key, state)` for every session, so the aggregator can react to
    /// `Degraded` sessions the same heartbeat tick that finds them.
    pub fn state_snapshot(&self) -> Vec<(SessionKey, crate::book_event::SessionState)> {
        self.sessions
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().handle().state()))
            .collect()
    }

    /// Snapshots `(key, queue_len, dropped_count)` for metrics.
    pub fn queue_metrics(&self) -> Vec<(SessionKey, usize, u64)> {
        self.sessions
            .iter()
            .map(|entry| {
                let session = entry.value();
                (
                    entry.key().clone(),
                    session.queue_len(),
                    session.handle().dropped_count(),
                )
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
