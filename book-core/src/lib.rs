//! book-core — multi-exchange L2 order book maintainer.
//!
//! Reconciles an initial REST/websocket snapshot with a streamed diff feed per
//! exchange/symbol pair, keeps the resulting ladders safe under producer/consumer
//! concurrency, watches each session's freshness, and periodically bucketizes and
//! emits depth snapshots to a [`sink::Sink`].
//!
//! ## Modules
//! - [`book_event`]: wire-normalized events and the session state machine's variants.
//! - [`orderbook`]: the ordered price ladder and depth bucketization.
//! - [`feed`]: per-exchange adapters (Coinbase-style, Binance-style).
//! - [`session`]: the per-(exchange, symbol) reconciliation state machine and worker.
//! - [`registry`]: the concurrently-readable table of live sessions.
//! - [`resilience`]: backoff, gap detection, and staleness supervision.
//! - [`aggregator`]: the ~1Hz emit/sweep heartbeat loop and document schema.
//! - [`sink`]: destinations for emitted documents.
//! - [`config`]: runtime configuration loading and validation.
//! - [`errors`]: the per-layer error taxonomy.
//! - [`utils`]: logging initialization.
//! - [`monitoring`]: optional Prometheus metrics endpoint (`metrics-server` feature).

pub mod aggregator;
pub mod book_event;
pub mod config;
pub mod errors;
pub mod feed;
pub mod orderbook;
pub mod registry;
pub mod resilience;
pub mod session;
pub mod sink;
pub mod utils;

#[cfg(feature = "metrics-server")]
pub mod monitoring;

pub use aggregator::{Aggregator, ResyncReason};
pub use book_event::{BookEvent, PriceLevel, Side, SessionState};
pub use config::Config;
pub use orderbook::{DepthBucketizer, OrderedBook};
pub use registry::{SessionKey, SessionRegistry};
pub use sink::Sink;

/// Generates a fresh 6-hex-character session id, stamped once per process onto every
/// emitted document's `m.s` field. The only process-wide mutable-ish state this crate
/// owns; everything else lives inside a session or the registry.
pub fn new_session_id() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let bytes: [u8; 3] = rng.gen();
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_is_six_hex_chars() {
        let id = new_session_id();
        assert_eq!(id.len(), 6);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
