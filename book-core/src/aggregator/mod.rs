//! Fixed-interval depth emission across every tracked session.
//!
//! Grounded in `global_order_book.py`'s main loop: assemble one document per
//! exchange/symbol, insert it into the sink, sweep every session for staleness,
//! then sleep for the remainder of the configured interval. "Remainder of the
//! interval" (rather than a fixed sleep) is a deliberate generalization of the
//! original's `time.sleep(0.8)` — hardcoding the 0.2s budget the comment describes
//! would make the loop drift once the tracked session count grows past what the
//! original's fixed Coinbase/Binance/Binance.US set required.

pub mod document;

pub use document::{BandMap, DocumentMeta, EmittedDocument, SessionRecord, DOCUMENT_VERSION};

use crate::orderbook::depth::DepthBucketizer;
use crate::registry::{SessionKey, SessionRegistry};
use crate::resilience::health::HealthSupervisor;
use crate::sink::Sink;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Why a session was torn down for recreation this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResyncReason {
    /// `last_update_at` exceeded the staleness threshold the supervisor enforces.
    Stale,
    /// The session's own worker marked itself `Degraded` (e.g. a sequence gap).
    Degraded,
}

impl ResyncReason {
    pub fn as_label(self) -> &'static str {
        match self {
            ResyncReason::Stale => "stale",
            ResyncReason::Degraded => "degraded",
        }
    }
}

pub struct Aggregator {
    registry: Arc<SessionRegistry>,
    sink: Arc<dyn Sink>,
    bucketizer: DepthBucketizer,
    supervisor: HealthSupervisor,
    emit_interval: Duration,
    session_id: String,
    /// Invoked with the key and reason of every session torn down this tick.
    /// Recreating it means picking the right [`crate::feed::FeedAdapter`] again,
    /// which only the binary entry point that built the registry knows how to do.
    on_stale: Box<dyn Fn(SessionKey, ResyncReason) + Send + Sync>,
}

impl Aggregator {
    pub fn new(
        registry: Arc<SessionRegistry>,
        sink: Arc<dyn Sink>,
        bucketizer: DepthBucketizer,
        supervisor: HealthSupervisor,
        emit_interval: Duration,
        session_id: impl Into<String>,
        on_stale: impl Fn(SessionKey, ResyncReason) + Send + Sync + 'static,
    ) -> Self {
        Self {
            registry,
            sink,
            bucketizer,
            supervisor,
            emit_interval,
            session_id: session_id.into(),
            on_stale: Box::new(on_stale),
        }
    }

    /// Runs the ~1Hz emit/sweep loop until `should_stop` returns `true`. Intended to
    /// be driven from the process's main thread, with graceful shutdown wired to a
    /// `ctrlc` handler flipping an `AtomicBool`.
    pub fn run(&self, should_stop: impl Fn() -> bool) {
        let mut tick_count = 0u64;
        while !should_stop() {
            let tick_start = Instant::now();

            self.emit_once();
            for (key, reason) in self.sweep_stale_sessions() {
                (self.on_stale)(key, reason);
            }

            tick_count += 1;
            let elapsed = tick_start.elapsed();
            if elapsed < self.emit_interval {
                std::thread::sleep(self.emit_interval - elapsed);
            } else {
                warn!(
                    tick_count,
                    elapsed_ms = elapsed.as_millis() as u64,
                    interval_ms = self.emit_interval.as_millis() as u64,
                    "emission tick overran its interval, next tick starts immediately"
                );
            }
        }
    }

    fn emit_once(&self) {
        let document = self.build_document();
        if let Err(e) = self.sink.insert(&document) {
            warn!(error = %e, "sink failed to accept document");
        }
    }

    fn build_document(&self) -> EmittedDocument {
        let mut exchanges: BTreeMap<String, BTreeMap<String, SessionRecord>> = BTreeMap::new();

        for key in self.registry.keys() {
            let Some(handle) = self.registry.handle(&key) else {
                continue;
            };
            let record = handle.with_book(|book| {
                let best_bid = book.best_bid();
                let best_ask = book.best_ask();
                let bid_bands = best_bid
                    .map(|(top, _)| self.bucketizer.bucketize_bids(top, book.iter_bids_from_top()))
                    .unwrap_or_default();
                let ask_bands = best_ask
                    .map(|(top, _)| self.bucketizer.bucketize_asks(top, book.iter_asks_from_top()))
                    .unwrap_or_default();
                SessionRecord {
                    u: handle.last_update_at(),
                    b: best_bid.map(|(p, _)| p),
                    a: best_ask.map(|(p, _)| p),
                    bd: BandMap::bids(bid_bands),
                    ad: BandMap::asks(ask_bands),
                }
            });

            exchanges
                .entry(key.exchange_id.clone())
                .or_default()
                .insert(base_symbol(&key.symbol), record);
        }

        EmittedDocument {
            m: DocumentMeta::new(self.session_id.clone()),
            t: Utc::now(),
            exchanges,
        }
    }

    /// Tears down and drops every session that needs a supervisor reset this tick:
    /// either its `last_update_at` has gone stale, or its own worker already
    /// requested one by marking itself `Degraded` (a sequence gap on a
    /// Binance-style feed — see [`crate::session::BookSession`]). The registry
    /// owner (the binary entry point) is responsible for recreating each returned
    /// key, since only it knows which [`crate::feed::FeedAdapter`] to restart.
    fn sweep_stale_sessions(&self) -> Vec<(SessionKey, ResyncReason)> {
        let now = Utc::now();
        let heartbeats = self.registry.heartbeat_snapshot();
        let stale = self
            .supervisor
            .sweep(heartbeats.iter().map(|(k, t)| (k, *t)), now);

        let mut recreate: Vec<(SessionKey, ResyncReason)> = stale
            .into_iter()
            .map(|entry| {
                info!(
                    exchange = %entry.key.exchange_id,
                    symbol = %entry.key.symbol,
                    last_update_at = %entry.last_update_at,
                    "session stale, tearing down for recreation"
                );
                (entry.key, ResyncReason::Stale)
            })
            .collect();

        for (key, state) in self.registry.state_snapshot() {
            if state == crate::book_event::SessionState::Degraded
                && !recreate.iter().any(|(k, _)| *k == key)
            {
                info!(
                    exchange = %key.exchange_id,
                    symbol = %key.symbol,
                    "session degraded, tearing down for recreation"
                );
                recreate.push((key, ResyncReason::Degraded));
            }
        }

        for (key, _) in &recreate {
            self.registry.remove(key);
        }
        recreate
    }
}

/// Maps a wire trading pair like `"BTC-USD"`/`"BTCUSDT"` to the base-currency key
/// the document uses (`"BTC"`), taking the symbol up to its first separator or
/// quote-currency boundary.
fn base_symbol(symbol: &str) -> String {
    if let Some((base, _)) = symbol.split_once('-') {
        return base.to_string();
    }
    for quote in ["USDT", "USDC", "USD", "BTC", "EUR"] {
        if symbol.len() > quote.len() && symbol.ends_with(quote) {
            return symbol[..symbol.len() - quote.len()].to_string();
        }
    }
    symbol.to_string()
}
