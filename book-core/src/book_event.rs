//! Wire-normalized types shared by every [`crate::feed::FeedAdapter`] and consumed
//! by [`crate::session::BookSession`].

use crate::errors::AdapterErrorKind;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Which side of the book a price level belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Bid,
    Ask,
}

/// A single price/size pair. `size == Decimal::ZERO` means "delete this level".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: Decimal,
    pub size: Decimal,
}

impl PriceLevel {
    pub fn new(price: Decimal, size: Decimal) -> Self {
        Self { price, size }
    }

    pub fn is_delete(&self) -> bool {
        self.size.is_zero()
    }
}

/// A normalized event produced by a [`crate::feed::FeedAdapter`] and consumed by a
/// [`crate::session::BookSession`]'s worker thread.
#[derive(Debug, Clone, PartialEq)]
pub enum BookEvent {
    /// A full point-in-time view of the book, used to (re)initialize it.
    Snapshot {
        snapshot_id: u64,
        bids: Vec<PriceLevel>,
        asks: Vec<PriceLevel>,
    },
    /// An incremental update covering the inclusive range `[first_id, last_id]`.
    Diff {
        first_id: u64,
        last_id: u64,
        event_time: DateTime<Utc>,
        symbol: String,
        changes: Vec<(Side, PriceLevel)>,
    },
    /// A liveness signal carrying no book mutation.
    Heartbeat { event_time: DateTime<Utc> },
    /// A transport or protocol-level error surfaced by the adapter.
    AdapterError { kind: AdapterErrorKind },
}

/// State machine governing a single [`crate::session::BookSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Initializing,
    Snapshotting,
    Live,
    Degraded,
    Resyncing,
    Destroyed,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Destroyed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn zero_size_level_is_delete() {
        let level = PriceLevel::new(dec!(100.0), dec!(0));
        assert!(level.is_delete());
    }

    #[test]
    fn nonzero_size_level_is_not_delete() {
        let level = PriceLevel::new(dec!(100.0), dec!(1.5));
        assert!(!level.is_delete());
    }

    #[test]
    fn destroyed_state_is_terminal() {
        assert!(SessionState::Destroyed.is_terminal());
        assert!(!SessionState::Live.is_terminal());
    }
}
