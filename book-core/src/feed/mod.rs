//! Exchange feed adapters.
//!
//! An adapter owns the transport (websocket + REST) for one exchange and is the
//! *producer* half of a session: [`FeedAdapter::start`] spawns a dedicated thread
//! that normalizes wire messages into [`BookEvent`]s and pushes them onto the
//! session's staging queue. [`crate::session::BookSession`] is the single consumer.
//!
//! The two reconciliation styles exchanges use in practice are captured as separate
//! adapters rather than a single parameterized one, since the buffering behavior
//! they need differs structurally, not just by a config flag.

pub mod binance;
pub mod coinbase;

use crate::book_event::BookEvent;
use crate::errors::SessionError;
use crossbeam_channel::Sender;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

pub use binance::BinanceAdapter;
pub use coinbase::CoinbaseAdapter;

/// A running adapter's producer thread, returned by [`FeedAdapter::start`].
pub struct AdapterHandle {
    stop: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl AdapterHandle {
    /// Wraps a producer thread's stop flag and join handle. Public so that a
    /// [`FeedAdapter`] implementation outside this crate can return one from
    /// [`FeedAdapter::start`] without reaching into adapter internals.
    pub fn new(stop: Arc<AtomicBool>, join: JoinHandle<()>) -> Self {
        Self {
            stop,
            join: Some(join),
        }
    }

    /// Signals the producer thread to stop and waits for it to exit. Mirrors the
    /// "stop producer, then drain" half of a session's shutdown sequence; the
    /// sentinel push and worker join are the session's responsibility.
    pub fn stop(mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl Drop for AdapterHandle {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

/// Transport for a single exchange/symbol feed.
pub trait FeedAdapter: Send + Sync {
    /// Short identifier used in logs and metrics, e.g. `"coinbase"`.
    fn exchange_id(&self) -> &str;

    /// Begins streaming normalized events for `symbol` onto `tx` from a dedicated
    /// thread. Returns a handle the caller uses to stop that thread.
    fn start(&self, symbol: String, tx: Sender<BookEvent>) -> Result<AdapterHandle, SessionError>;
}
