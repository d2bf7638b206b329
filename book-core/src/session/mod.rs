//! A single exchange/symbol's order book lifecycle.
//!
//! `BookSession` owns one [`OrderedBook`] behind a lock, a bounded staging queue fed
//! by a [`FeedAdapter`], and the single worker thread that is the queue's only
//! consumer. The producer/consumer split and the shutdown protocol (stop producer,
//! drain the queue, push a sentinel, join the worker) are grounded directly in
//! `cbpro_level2_order_book.py`'s `create()`/`destroy()`. Sequence reconciliation
//! (stale-drop, gap detection, symbol mismatch) is grounded in that file's `worker()`
//! and in `binance_level2_order_book.py`'s `worker()`, which perform exactly this
//! bookkeeping on the consumer side rather than inside the adapter.

use crate::book_event::{BookEvent, PriceLevel, Side, SessionState};
use crate::config::ExchangeKind;
use crate::errors::{AdapterErrorKind, SessionError};
use crate::feed::{AdapterHandle, FeedAdapter};
use crate::orderbook::OrderedBook;
use chrono::{DateTime, Utc};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Pushed by [`BookSession::shutdown`] to wake a worker blocked on an empty queue.
enum StagedEvent {
    Book(BookEvent),
    Exit,
}

/// Shared, lock-protected state a session's worker mutates and the aggregator reads.
pub struct SessionHandle {
    book: RwLock<OrderedBook>,
    state: RwLock<SessionState>,
    last_update_at: RwLock<DateTime<Utc>>,
    dropped: AtomicU64,
}

impl SessionHandle {
    fn new() -> Self {
        Self {
            book: RwLock::new(OrderedBook::new()),
            state: RwLock::new(SessionState::Initializing),
            last_update_at: RwLock::new(Utc::now()),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    pub fn last_update_at(&self) -> DateTime<Utc> {
        *self.last_update_at.read()
    }

    /// Cumulative count of events the bridge thread dropped because the staging
    /// queue was full. Monotonic for the session's lifetime.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Runs `f` with the book locked for the duration of a single read pass. No I/O
    /// or allocation-heavy work should happen inside `f`.
    pub fn with_book<R>(&self, f: impl FnOnce(&OrderedBook) -> R) -> R {
        f(&self.book.read())
    }

    fn set_state(&self, state: SessionState) {
        *self.state.write() = state;
    }
}

/// A live session: one exchange/symbol pair, its adapter, and its worker thread.
pub struct BookSession {
    handle: Arc<SessionHandle>,
    adapter_handle: Option<AdapterHandle>,
    bridge: Option<JoinHandle<()>>,
    staging_tx: Sender<StagedEvent>,
    worker: Option<JoinHandle<()>>,
    exchange_id: String,
    symbol: String,
}

impl BookSession {
    /// Starts a fresh session: spins up the adapter's producer thread and this
    /// session's own consumer thread, wired together by a bounded staging queue.
    /// `style` decides whether a sequence gap is fatal (Binance-style) or tolerated
    /// (Coinbase-style, whose transport already guarantees in-order delivery).
    pub fn start(
        adapter: Arc<dyn FeedAdapter>,
        exchange_id: impl Into<String>,
        symbol: impl Into<String>,
        style: ExchangeKind,
        queue_capacity: usize,
    ) -> Result<Self, SessionError> {
        let exchange_id = exchange_id.into();
        let symbol = symbol.into();
        let handle = Arc::new(SessionHandle::new());

        let (adapter_tx, adapter_rx) = crossbeam_channel::bounded(queue_capacity);
        let (staging_tx, staging_rx) = crossbeam_channel::bounded::<StagedEvent>(queue_capacity);

        let adapter_handle = adapter.start(symbol.clone(), adapter_tx)?;

        let bridge_rx = adapter_rx;
        let bridge_tx = staging_tx.clone();
        let bridge_handle = handle.clone();
        let bridge_exchange = exchange_id.clone();
        let bridge_symbol = symbol.clone();
        let bridge_join = std::thread::Builder::new()
            .name(format!("bridge-{exchange_id}-{symbol}"))
            .spawn(move || {
                for event in bridge_rx {
                    if bridge_tx.try_send(StagedEvent::Book(event)).is_err() {
                        let dropped = bridge_handle.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                        if dropped == 1 || dropped % 1000 == 0 {
                            warn!(
                                exchange = %bridge_exchange,
                                symbol = %bridge_symbol,
                                dropped,
                                "staging queue full, dropping oldest-arriving event"
                            );
                        }
                    }
                }
            })
            .map_err(|_| SessionError::QueueDisconnected)?;

        let worker_handle = handle.clone();
        let worker_exchange = exchange_id.clone();
        let worker_symbol = symbol.clone();
        let worker = std::thread::Builder::new()
            .name(format!("worker-{exchange_id}-{symbol}"))
            .spawn(move || {
                run_worker(worker_handle, staging_rx, worker_exchange, worker_symbol, style)
            })
            .map_err(|_| SessionError::QueueDisconnected)?;

        Ok(Self {
            handle,
            adapter_handle: Some(adapter_handle),
            bridge: Some(bridge_join),
            staging_tx,
            worker: Some(worker),
            exchange_id,
            symbol,
        })
    }

    pub fn handle(&self) -> &Arc<SessionHandle> {
        &self.handle
    }

    pub fn exchange_id(&self) -> &str {
        &self.exchange_id
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Number of events currently buffered in the staging queue, for metrics.
    pub fn queue_len(&self) -> usize {
        self.staging_tx.len()
    }

    /// Cooperative shutdown: stop the producer, join the bridge thread so every
    /// event it already forwarded lands in the staging queue, then push a sentinel
    /// so the worker's blocking recv wakes up, and join it last.
    pub fn shutdown(mut self) {
        if let Some(adapter_handle) = self.adapter_handle.take() {
            adapter_handle.stop();
        }
        if let Some(bridge) = self.bridge.take() {
            let _ = bridge.join();
        }
        let _ = self.staging_tx.send(StagedEvent::Exit);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for BookSession {
    fn drop(&mut self) {
        if let Some(adapter_handle) = self.adapter_handle.take() {
            adapter_handle.stop();
        }
        if let Some(bridge) = self.bridge.take() {
            let _ = bridge.join();
        }
        let _ = self.staging_tx.send(StagedEvent::Exit);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

/// Per-worker reconciliation bookkeeping. Lives entirely on the worker's stack since
/// only the single consumer thread ever reads or advances it — the aggregator only
/// ever sees the ladder and state through [`SessionHandle`].
struct Reconciler {
    exchange_id: String,
    symbol: String,
    style: ExchangeKind,
    prev_last_id: Option<u64>,
}

impl Reconciler {
    fn apply(&mut self, handle: &Arc<SessionHandle>, event: BookEvent) {
        match event {
            BookEvent::Snapshot { snapshot_id, bids, asks } => {
                handle.book.write().load_snapshot(
                    bids.into_iter().map(level_tuple),
                    asks.into_iter().map(level_tuple),
                );
                self.prev_last_id = Some(snapshot_id);
                *handle.last_update_at.write() = Utc::now();
                handle.set_state(SessionState::Live);
                debug!(
                    exchange = %self.exchange_id,
                    symbol = %self.symbol,
                    snapshot_id,
                    "snapshot applied"
                );
            }
            BookEvent::Diff {
                first_id,
                last_id,
                event_time,
                symbol,
                changes,
            } => self.apply_diff(handle, first_id, last_id, event_time, symbol, changes),
            BookEvent::Heartbeat { event_time } => {
                *handle.last_update_at.write() = event_time;
            }
            BookEvent::AdapterError { kind } => match kind {
                // The adapter's own run_loop already buffers diffs and retries the
                // snapshot fetch with backoff; forcing Degraded here would just make
                // the aggregator tear down and recreate a session that's already
                // self-healing.
                AdapterErrorKind::SnapshotReconcileFail { .. }
                    if handle.state() == SessionState::Snapshotting =>
                {
                    warn!(
                        exchange = %self.exchange_id,
                        symbol = %self.symbol,
                        error = %kind,
                        "snapshot reconciliation failed while still snapshotting, adapter is retrying"
                    );
                }
                kind => {
                    error!(
                        exchange = %self.exchange_id,
                        symbol = %self.symbol,
                        error = %kind,
                        "adapter error, marking session degraded"
                    );
                    handle.set_state(SessionState::Degraded);
                }
            },
        }
    }

    fn apply_diff(
        &mut self,
        handle: &Arc<SessionHandle>,
        first_id: u64,
        last_id: u64,
        event_time: DateTime<Utc>,
        symbol: String,
        changes: Vec<(Side, PriceLevel)>,
    ) {
        // A session already Degraded stays untouched by further diffs; only a fresh
        // Snapshot (handled above, unconditionally) can bring it back.
        if handle.state() == SessionState::Degraded {
            debug!(
                exchange = %self.exchange_id,
                symbol = %self.symbol,
                "dropping diff while session is degraded, awaiting resync"
            );
            return;
        }

        if symbol != self.symbol {
            warn!(
                exchange = %self.exchange_id,
                expected_symbol = %self.symbol,
                actual_symbol = %symbol,
                "symbol mismatch in diff, dropping"
            );
            return;
        }

        if let Some(prev) = self.prev_last_id {
            if last_id <= prev {
                debug!(
                    exchange = %self.exchange_id,
                    symbol = %self.symbol,
                    last_id,
                    prev_last_id = prev,
                    "dropping stale diff"
                );
                return;
            }

            if first_id != prev + 1 {
                if self.style == ExchangeKind::BinanceLike {
                    let gap = AdapterErrorKind::SequenceGap {
                        expected_first_id: prev + 1,
                        actual_first_id: first_id,
                    };
                    warn!(
                        exchange = %self.exchange_id,
                        symbol = %self.symbol,
                        error = %gap,
                        "sequence gap detected, marking session degraded for resync"
                    );
                    handle.set_state(SessionState::Degraded);
                    return;
                }
                // Coinbase-style transport guarantees gap-free delivery; a mismatch
                // here can only be our own synthetic counter, not a real drop, so we
                // apply the diff instead of treating it as fatal.
            }
        }

        {
            let mut book = handle.book.write();
            for (side, level) in changes {
                match side {
                    Side::Bid => book.upsert_bid(level.price, level.size),
                    Side::Ask => book.upsert_ask(level.price, level.size),
                }
            }
        }
        self.prev_last_id = Some(last_id);
        *handle.last_update_at.write() = event_time;
        handle.set_state(SessionState::Live);

        let crossed = handle.with_book(|b| {
            if b.is_crossed() {
                Some((b.best_bid(), b.best_ask()))
            } else {
                None
            }
        });
        if let Some((Some((bid, _)), Some((ask, _)))) = crossed {
            let err = SessionError::CrossBook {
                best_bid: bid.to_string(),
                best_ask: ask.to_string(),
            };
            warn!(
                exchange = %self.exchange_id,
                symbol = %self.symbol,
                error = %err,
                "book crossed after applying diff"
            );
        }
    }
}

fn run_worker(
    handle: Arc<SessionHandle>,
    rx: Receiver<StagedEvent>,
    exchange_id: String,
    symbol: String,
    style: ExchangeKind,
) {
    handle.set_state(SessionState::Snapshotting);
    let mut reconciler = Reconciler {
        exchange_id: exchange_id.clone(),
        symbol: symbol.clone(),
        style,
        prev_last_id: None,
    };

    loop {
        match rx.recv_timeout(Duration::from_secs(1)) {
            Ok(StagedEvent::Exit) => {
                info!(exchange = %exchange_id, %symbol, "worker received exit sentinel");
                break;
            }
            Ok(StagedEvent::Book(event)) => {
                reconciler.apply(&handle, event);
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                warn!(exchange = %exchange_id, %symbol, "staging queue disconnected");
                break;
            }
        }
    }

    handle.set_state(SessionState::Destroyed);
}

fn level_tuple(level: PriceLevel) -> (rust_decimal::Decimal, rust_decimal::Decimal) {
    (level.price, level.size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn reconciler(style: ExchangeKind) -> Reconciler {
        Reconciler {
            exchange_id: "test".to_string(),
            symbol: "BTC-USD".to_string(),
            style,
            prev_last_id: None,
        }
    }

    #[test]
    fn snapshot_then_diff_lands_in_live_state() {
        let handle = Arc::new(SessionHandle::new());
        let mut r = reconciler(ExchangeKind::CoinbaseLike);
        r.apply(
            &handle,
            BookEvent::Snapshot {
                snapshot_id: 1,
                bids: vec![PriceLevel::new(dec!(100.0), dec!(1.0))],
                asks: vec![PriceLevel::new(dec!(101.0), dec!(1.0))],
            },
        );
        assert_eq!(handle.state(), SessionState::Live);
        assert_eq!(handle.with_book(|b| b.best_bid()), Some((dec!(100.0), dec!(1.0))));
    }

    #[test]
    fn adapter_error_marks_session_degraded() {
        let handle = Arc::new(SessionHandle::new());
        let mut r = reconciler(ExchangeKind::CoinbaseLike);
        r.apply(
            &handle,
            BookEvent::AdapterError {
                kind: AdapterErrorKind::TransportDisconnect {
                    reason: "reset".into(),
                },
            },
        );
        assert_eq!(handle.state(), SessionState::Degraded);
    }

    #[test]
    fn snapshot_reconcile_fail_while_snapshotting_stays_in_snapshotting() {
        let handle = Arc::new(SessionHandle::new());
        handle.set_state(SessionState::Snapshotting);
        let mut r = reconciler(ExchangeKind::BinanceLike);
        r.apply(
            &handle,
            BookEvent::AdapterError {
                kind: AdapterErrorKind::SnapshotReconcileFail {
                    snapshot_id: 10,
                    first_buffered_id: 20,
                },
            },
        );
        assert_eq!(handle.state(), SessionState::Snapshotting);
    }

    #[test]
    fn snapshot_reconcile_fail_once_live_still_degrades() {
        let handle = Arc::new(SessionHandle::new());
        let mut r = reconciler(ExchangeKind::BinanceLike);
        r.apply(
            &handle,
            BookEvent::Snapshot {
                snapshot_id: 1,
                bids: vec![PriceLevel::new(dec!(100.0), dec!(1.0))],
                asks: vec![],
            },
        );
        r.apply(
            &handle,
            BookEvent::AdapterError {
                kind: AdapterErrorKind::SnapshotReconcileFail {
                    snapshot_id: 10,
                    first_buffered_id: 20,
                },
            },
        );
        assert_eq!(handle.state(), SessionState::Degraded);
    }

    #[test]
    fn delete_level_via_diff_removes_price() {
        let handle = Arc::new(SessionHandle::new());
        let mut r = reconciler(ExchangeKind::CoinbaseLike);
        r.apply(
            &handle,
            BookEvent::Snapshot {
                snapshot_id: 1,
                bids: vec![PriceLevel::new(dec!(100.0), dec!(1.0))],
                asks: vec![],
            },
        );
        r.apply(
            &handle,
            BookEvent::Diff {
                first_id: 2,
                last_id: 2,
                event_time: Utc::now(),
                symbol: "BTC-USD".to_string(),
                changes: vec![(Side::Bid, PriceLevel::new(dec!(100.0), dec!(0)))],
            },
        );
        assert_eq!(handle.with_book(|b| b.bid_depth()), 0);
    }

    #[test]
    fn stale_diff_is_dropped() {
        let handle = Arc::new(SessionHandle::new());
        let mut r = reconciler(ExchangeKind::BinanceLike);
        r.apply(
            &handle,
            BookEvent::Snapshot {
                snapshot_id: 10,
                bids: vec![PriceLevel::new(dec!(100.0), dec!(1.0))],
                asks: vec![],
            },
        );
        r.apply(
            &handle,
            BookEvent::Diff {
                first_id: 5,
                last_id: 9,
                event_time: Utc::now(),
                symbol: "BTC-USD".to_string(),
                changes: vec![(Side::Bid, PriceLevel::new(dec!(100.0), dec!(5.0)))],
            },
        );
        // Stale diff dropped: size at 100.0 unchanged.
        assert_eq!(handle.with_book(|b| b.best_bid()), Some((dec!(100.0), dec!(1.0))));
        assert_eq!(r.prev_last_id, Some(10));
    }

    #[test]
    fn exact_resync_applies_and_advances() {
        let handle = Arc::new(SessionHandle::new());
        let mut r = reconciler(ExchangeKind::BinanceLike);
        r.apply(
            &handle,
            BookEvent::Snapshot {
                snapshot_id: 10,
                bids: vec![],
                asks: vec![],
            },
        );
        r.apply(
            &handle,
            BookEvent::Diff {
                first_id: 11,
                last_id: 12,
                event_time: Utc::now(),
                symbol: "BTC-USD".to_string(),
                changes: vec![(Side::Bid, PriceLevel::new(dec!(100.0), dec!(2.0)))],
            },
        );
        assert_eq!(r.prev_last_id, Some(12));
        assert_eq!(handle.state(), SessionState::Live);
    }

    #[test]
    fn gap_in_binance_style_session_marks_degraded_without_mutating() {
        let handle = Arc::new(SessionHandle::new());
        let mut r = reconciler(ExchangeKind::BinanceLike);
        r.apply(
            &handle,
            BookEvent::Snapshot {
                snapshot_id: 12,
                bids: vec![PriceLevel::new(dec!(100.0), dec!(1.0))],
                asks: vec![],
            },
        );
        r.apply(
            &handle,
            BookEvent::Diff {
                first_id: 14,
                last_id: 14,
                event_time: Utc::now(),
                symbol: "BTC-USD".to_string(),
                changes: vec![(Side::Bid, PriceLevel::new(dec!(100.0), dec!(9.0)))],
            },
        );
        assert_eq!(handle.state(), SessionState::Degraded);
        // Book left untouched — a gap means we don't trust this diff's effect.
        assert_eq!(handle.with_book(|b| b.best_bid()), Some((dec!(100.0), dec!(1.0))));
    }

    #[test]
    fn gap_in_coinbase_style_session_applies_anyway() {
        let handle = Arc::new(SessionHandle::new());
        let mut r = reconciler(ExchangeKind::CoinbaseLike);
        r.apply(
            &handle,
            BookEvent::Snapshot {
                snapshot_id: 0,
                bids: vec![PriceLevel::new(dec!(100.0), dec!(1.0))],
                asks: vec![],
            },
        );
        r.apply(
            &handle,
            BookEvent::Diff {
                first_id: 99,
                last_id: 99,
                event_time: Utc::now(),
                symbol: "BTC-USD".to_string(),
                changes: vec![(Side::Bid, PriceLevel::new(dec!(100.0), dec!(9.0)))],
            },
        );
        assert_eq!(handle.state(), SessionState::Live);
        assert_eq!(handle.with_book(|b| b.best_bid()), Some((dec!(100.0), dec!(9.0))));
    }

    #[test]
    fn symbol_mismatch_drops_diff() {
        let handle = Arc::new(SessionHandle::new());
        let mut r = reconciler(ExchangeKind::CoinbaseLike);
        r.apply(
            &handle,
            BookEvent::Snapshot {
                snapshot_id: 0,
                bids: vec![PriceLevel::new(dec!(100.0), dec!(1.0))],
                asks: vec![],
            },
        );
        r.apply(
            &handle,
            BookEvent::Diff {
                first_id: 1,
                last_id: 1,
                event_time: Utc::now(),
                symbol: "ETH-USD".to_string(),
                changes: vec![(Side::Bid, PriceLevel::new(dec!(100.0), dec!(9.0)))],
            },
        );
        assert_eq!(handle.with_book(|b| b.best_bid()), Some((dec!(100.0), dec!(1.0))));
    }

    #[test]
    fn degraded_session_ignores_further_diffs_until_resnapshot() {
        let handle = Arc::new(SessionHandle::new());
        let mut r = reconciler(ExchangeKind::BinanceLike);
        r.apply(
            &handle,
            BookEvent::Snapshot {
                snapshot_id: 12,
                bids: vec![PriceLevel::new(dec!(100.0), dec!(1.0))],
                asks: vec![],
            },
        );
        r.apply(
            &handle,
            BookEvent::Diff {
                first_id: 14,
                last_id: 14,
                event_time: Utc::now(),
                symbol: "BTC-USD".to_string(),
                changes: vec![(Side::Bid, PriceLevel::new(dec!(100.0), dec!(9.0)))],
            },
        );
        assert_eq!(handle.state(), SessionState::Degraded);

        r.apply(
            &handle,
            BookEvent::Diff {
                first_id: 15,
                last_id: 15,
                event_time: Utc::now(),
                symbol: "BTC-USD".to_string(),
                changes: vec![(Side::Bid, PriceLevel::new(dec!(200.0), dec!(3.0)))],
            },
        );
        assert_eq!(handle.state(), SessionState::Degraded);
        assert_eq!(handle.with_book(|b| b.best_bid()), Some((dec!(100.0), dec!(1.0))));

        r.apply(
            &handle,
            BookEvent::Snapshot {
                snapshot_id: 20,
                bids: vec![PriceLevel::new(dec!(150.0), dec!(4.0))],
                asks: vec![],
            },
        );
        assert_eq!(handle.state(), SessionState::Live);
        assert_eq!(handle.with_book(|b| b.best_bid()), Some((dec!(150.0), dec!(4.0))));
    }
}
