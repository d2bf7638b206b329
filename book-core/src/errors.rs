//! Error taxonomy for the order book maintainer.
//!
//! Each layer gets its own error enum with a hand-written `Display` and
//! `std::error::Error` implementation, and `From` conversions bridge adjacent
//! layers. `anyhow` is reserved for the process boundary (config loading, binary
//! entry points) where context accumulates across layers but callers never need to
//! match on a specific variant.

use std::fmt;

/// Errors surfaced by a [`crate::feed::FeedAdapter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterErrorKind {
    /// The underlying transport (websocket/REST) disconnected.
    TransportDisconnect {
        reason: String,
    },
    /// A diff's `first_id` did not follow the previous diff's `last_id`.
    SequenceGap {
        expected_first_id: u64,
        actual_first_id: u64,
    },
    /// The snapshot could not be reconciled against the buffered diff stream.
    SnapshotReconcileFail {
        snapshot_id: u64,
        first_buffered_id: u64,
    },
    /// A message referenced a symbol other than the one this adapter is tracking.
    SymbolMismatch {
        expected: String,
        actual: String,
    },
    /// The wire payload could not be parsed into the normalized contract.
    MalformedMessage {
        detail: String,
    },
}

impl fmt::Display for AdapterErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdapterErrorKind::TransportDisconnect { reason } => {
                write!(f, "transport disconnected: {}", reason)
            }
            AdapterErrorKind::SequenceGap {
                expected_first_id,
                actual_first_id,
            } => write!(
                f,
                "sequence gap: expected first_id {}, got {}",
                expected_first_id, actual_first_id
            ),
            AdapterErrorKind::SnapshotReconcileFail {
                snapshot_id,
                first_buffered_id,
            } => write!(
                f,
                "snapshot {} could not be reconciled with first buffered diff {}",
                snapshot_id, first_buffered_id
            ),
            AdapterErrorKind::SymbolMismatch { expected, actual } => {
                write!(f, "symbol mismatch: expected {}, got {}", expected, actual)
            }
            AdapterErrorKind::MalformedMessage { detail } => {
                write!(f, "malformed message: {}", detail)
            }
        }
    }
}

impl std::error::Error for AdapterErrorKind {}

/// Errors a [`crate::session::BookSession`] can encounter while applying events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Propagated from the adapter.
    Adapter(AdapterErrorKind),
    /// The worker thread's queue disconnected unexpectedly.
    QueueDisconnected,
    /// A post-apply check found the book crossed (`best_bid >= best_ask`).
    CrossBook {
        best_bid: String,
        best_ask: String,
    },
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::Adapter(e) => write!(f, "adapter error: {}", e),
            SessionError::QueueDisconnected => write!(f, "session staging queue disconnected"),
            SessionError::CrossBook { best_bid, best_ask } => {
                write!(f, "book crossed: best_bid {} >= best_ask {}", best_bid, best_ask)
            }
        }
    }
}

impl std::error::Error for SessionError {}

impl From<AdapterErrorKind> for SessionError {
    fn from(e: AdapterErrorKind) -> Self {
        SessionError::Adapter(e)
    }
}

/// Errors surfaced by a [`crate::sink::Sink`] implementation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkErrorKind {
    Unavailable { reason: String },
    Serialization { reason: String },
}

impl fmt::Display for SinkErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SinkErrorKind::Unavailable { reason } => write!(f, "sink unavailable: {}", reason),
            SinkErrorKind::Serialization { reason } => {
                write!(f, "failed to serialize document: {}", reason)
            }
        }
    }
}

impl std::error::Error for SinkErrorKind {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adapter_error_display_includes_ids() {
        let err = AdapterErrorKind::SequenceGap {
            expected_first_id: 42,
            actual_first_id: 50,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("42"));
        assert!(msg.contains("50"));
    }

    #[test]
    fn session_error_from_adapter_error() {
        let adapter_err = AdapterErrorKind::TransportDisconnect {
            reason: "reset by peer".into(),
        };
        let session_err: SessionError = adapter_err.into();
        match session_err {
            SessionError::Adapter(_) => {}
            _ => panic!("expected Adapter variant"),
        }
    }

    #[test]
    fn cross_book_display_names_both_prices() {
        let err = SessionError::CrossBook {
            best_bid: "100.5".into(),
            best_ask: "100.0".into(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("100.5"));
        assert!(msg.contains("100.0"));
    }
}
