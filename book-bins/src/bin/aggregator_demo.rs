//! No-network demo: drives the same [`Aggregator`] pipeline as `book-aggregator`
//! against a synthetic random-walk feed instead of a real exchange, for local
//! experimentation without credentials or connectivity.

use anyhow::{Context, Result};
use book_bins::common::{self, Cli};
use book_core::book_event::{BookEvent, PriceLevel, Side};
use book_core::config::ExchangeKind;
use book_core::errors::SessionError;
use book_core::feed::{AdapterHandle, FeedAdapter};
use book_core::orderbook::DepthBucketizer;
use book_core::registry::{SessionKey, SessionRegistry};
use book_core::resilience::health::HealthSupervisor;
use book_core::session::BookSession;
use book_core::sink::StdoutSink;
use book_core::Aggregator;
use chrono::Utc;
use clap::Parser;
use crossbeam_channel::Sender;
use rand::Rng;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Generates an initial snapshot, then a steady stream of small random-walk
/// diffs, with no real transport behind it. `style` is honored the same way a
/// real adapter's would be: a `BinanceLike` demo session occasionally emits a
/// deliberate sequence gap so the staleness/gap-recovery path in
/// [`book_core::session::BookSession`] has something to react to even without a
/// live exchange.
struct SyntheticAdapter {
    exchange_id: String,
    style: ExchangeKind,
}

impl SyntheticAdapter {
    fn new(exchange_id: impl Into<String>, style: ExchangeKind) -> Self {
        Self {
            exchange_id: exchange_id.into(),
            style,
        }
    }
}

impl FeedAdapter for SyntheticAdapter {
    fn exchange_id(&self) -> &str {
        &self.exchange_id
    }

    fn start(&self, symbol: String, tx: Sender<BookEvent>) -> Result<AdapterHandle, SessionError> {
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = stop.clone();
        let exchange_id = self.exchange_id.clone();
        let style = self.style;

        let join = std::thread::Builder::new()
            .name(format!("synthetic-{exchange_id}-{symbol}"))
            .spawn(move || {
                let mut rng = rand::thread_rng();
                let mut mid = dec!(100.00);
                let mut seq: u64 = 1;

                if tx
                    .send(BookEvent::Snapshot {
                        snapshot_id: seq,
                        bids: synth_side(mid, Decimal::NEGATIVE_ONE, &mut rng),
                        asks: synth_side(mid, Decimal::ONE, &mut rng),
                    })
                    .is_err()
                {
                    return;
                }

                loop {
                    if thread_stop.load(Ordering::Relaxed) {
                        return;
                    }
                    std::thread::sleep(Duration::from_millis(250));

                    let drift = Decimal::new(rng.gen_range(-20..=20), 2);
                    mid += drift;

                    let next_seq = seq + 1;
                    // Once in a while, skip a sequence number on the Binance-style demo
                    // session to exercise the gap-detected -> Degraded -> recreate path.
                    let simulate_gap =
                        style == ExchangeKind::BinanceLike && rng.gen_ratio(1, 40);
                    let first_id = if simulate_gap { next_seq + 1 } else { next_seq };

                    let changes = vec![
                        (Side::Bid, PriceLevel::new(mid - dec!(0.50), synth_size(&mut rng))),
                        (Side::Ask, PriceLevel::new(mid + dec!(0.50), synth_size(&mut rng))),
                    ];

                    if tx
                        .send(BookEvent::Diff {
                            first_id,
                            last_id: first_id,
                            event_time: Utc::now(),
                            symbol: symbol.clone(),
                            changes,
                        })
                        .is_err()
                    {
                        return;
                    }
                    seq = first_id;
                }
            })
            .expect("spawn synthetic adapter thread");

        Ok(AdapterHandle::new(stop, join))
    }
}

fn synth_side(mid: Decimal, direction: Decimal, rng: &mut impl Rng) -> Vec<PriceLevel> {
    (1..=5i64)
        .map(|i| {
            let offset = Decimal::new(i * 25, 2) * direction;
            PriceLevel::new(mid + offset, synth_size(rng))
        })
        .collect()
}

fn synth_size(rng: &mut impl Rng) -> Decimal {
    Decimal::new(rng.gen_range(10..500), 2)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    common::init_logging(cli.log_level.as_deref().unwrap_or("info"), cli.json_logs)?;

    let registry = Arc::new(SessionRegistry::new());
    let demo_sessions = [
        ("demo-coinbase", "BTC-USD", ExchangeKind::CoinbaseLike),
        ("demo-binance", "ETH-USDT", ExchangeKind::BinanceLike),
    ];

    for (exchange_id, symbol, style) in demo_sessions {
        let adapter: Arc<dyn FeedAdapter> = Arc::new(SyntheticAdapter::new(exchange_id, style));
        let session = BookSession::start(adapter, exchange_id, symbol, style, 256)
            .with_context(|| format!("starting demo session {exchange_id}/{symbol}"))?;
        registry.insert(SessionKey::new(exchange_id, symbol), session);
    }

    let should_stop = Arc::new(AtomicBool::new(false));
    {
        let should_stop = should_stop.clone();
        ctrlc::set_handler(move || should_stop.store(true, Ordering::SeqCst))
            .context("installing signal handler")?;
    }

    let registry_for_stale = registry.clone();
    let aggregator = Aggregator::new(
        registry.clone(),
        Arc::new(StdoutSink),
        DepthBucketizer::with_default_bands(),
        HealthSupervisor::new(Duration::from_secs(10)),
        Duration::from_secs(1),
        book_core::new_session_id(),
        move |key, reason| {
            tracing::info!(
                exchange = %key.exchange_id,
                symbol = %key.symbol,
                reason = reason.as_label(),
                "recreating demo session"
            );
            let Some((exchange_id, symbol, style)) = demo_sessions
                .iter()
                .find(|(id, sym, _)| *id == key.exchange_id && *sym == key.symbol)
            else {
                return;
            };
            let adapter: Arc<dyn FeedAdapter> = Arc::new(SyntheticAdapter::new(*exchange_id, *style));
            match BookSession::start(adapter, *exchange_id, *symbol, *style, 256) {
                Ok(session) => registry_for_stale.insert(key, session),
                Err(e) => tracing::error!(error = %e, "failed to recreate demo session"),
            }
        },
    );

    tracing::info!("running synthetic demo feed, press Ctrl-C to stop");
    aggregator.run(|| should_stop.load(Ordering::SeqCst));
    Ok(())
}
