//! Coinbase-style adapter.
//!
//! Grounded in `cbpro_level2_order_book.py`: the `level2` websocket channel
//! guarantees sequential delivery, so unlike [`crate::feed::binance`] there is no
//! buffer-then-reconcile step. The first message for a subscription is a `snapshot`,
//! every message after is an `l2update`, and a `product_id` mismatch is logged and
//! dropped rather than treated as fatal.

use super::{AdapterHandle, FeedAdapter};
use crate::book_event::{BookEvent, PriceLevel, Side};
use crate::errors::{AdapterErrorKind, SessionError};
use crate::resilience::backoff::{BackoffConfig, ExponentialBackoff};
use chrono::{DateTime, Utc};
use crossbeam_channel::Sender;
use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

pub struct CoinbaseAdapter {
    exchange_id: String,
    ws_url: String,
}

impl CoinbaseAdapter {
    pub fn new(exchange_id: impl Into<String>, ws_url: impl Into<String>) -> Self {
        Self {
            exchange_id: exchange_id.into(),
            ws_url: ws_url.into(),
        }
    }
}

impl FeedAdapter for CoinbaseAdapter {
    fn exchange_id(&self) -> &str {
        &self.exchange_id
    }

    fn start(&self, symbol: String, tx: Sender<BookEvent>) -> Result<AdapterHandle, SessionError> {
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = stop.clone();
        let ws_url = self.ws_url.clone();
        let exchange_id = self.exchange_id.clone();

        let join = thread::Builder::new()
            .name(format!("feed-{exchange_id}-{symbol}"))
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(e) => {
                        warn!(exchange = %exchange_id, %symbol, error = %e, "failed to start adapter runtime");
                        return;
                    }
                };
                runtime.block_on(run_loop(ws_url, symbol, tx, thread_stop));
            })
            .map_err(|e| {
                SessionError::from(AdapterErrorKind::TransportDisconnect {
                    reason: format!("failed to spawn adapter thread: {e}"),
                })
            })?;

        Ok(AdapterHandle::new(stop, join))
    }
}

async fn run_loop(ws_url: String, symbol: String, tx: Sender<BookEvent>, stop: Arc<AtomicBool>) {
    let mut backoff = ExponentialBackoff::with_config(BackoffConfig::unlimited());

    while !stop.load(Ordering::Relaxed) {
        match run_once(&ws_url, &symbol, &tx, &stop).await {
            Ok(()) => break,
            Err(kind) => {
                warn!(%symbol, error = %kind, "coinbase adapter disconnected, reconnecting");
                if tx.send(BookEvent::AdapterError { kind }).is_err() {
                    break;
                }
                if let Some(delay) = backoff.next_delay() {
                    tokio::time::sleep(delay).await;
                } else {
                    break;
                }
            }
        }
    }
}

async fn run_once(
    ws_url: &str,
    symbol: &str,
    tx: &Sender<BookEvent>,
    stop: &Arc<AtomicBool>,
) -> Result<(), AdapterErrorKind> {
    let (mut ws, _) = tokio_tungstenite::connect_async(ws_url)
        .await
        .map_err(|e| AdapterErrorKind::TransportDisconnect {
            reason: e.to_string(),
        })?;

    let subscribe = serde_json::json!({
        "type": "subscribe",
        "product_ids": [symbol],
        "channels": ["level2"],
    });
    ws.send(Message::Text(subscribe.to_string()))
        .await
        .map_err(|e| AdapterErrorKind::TransportDisconnect {
            reason: e.to_string(),
        })?;

    info!(%symbol, "coinbase adapter subscribed to level2 channel");

    // Coinbase's level2 channel carries no sequence id of its own; this transport
    // guarantees gap-free delivery, so a synthetic monotonic counter is enough to
    // give every re-tagged Diff the first_id/last_id fields the session expects.
    let mut seq: u64 = 0;

    while !stop.load(Ordering::Relaxed) {
        let next = tokio::time::timeout(std::time::Duration::from_millis(500), ws.next()).await;
        let msg = match next {
            Ok(Some(Ok(msg))) => msg,
            Ok(Some(Err(e))) => {
                return Err(AdapterErrorKind::TransportDisconnect {
                    reason: e.to_string(),
                })
            }
            Ok(None) => {
                return Err(AdapterErrorKind::TransportDisconnect {
                    reason: "websocket stream ended".to_string(),
                })
            }
            Err(_) => continue, // poll timeout, re-check stop flag
        };

        let text = match msg {
            Message::Text(t) => t,
            Message::Close(_) => {
                return Err(AdapterErrorKind::TransportDisconnect {
                    reason: "server sent close frame".to_string(),
                })
            }
            _ => continue,
        };

        match parse_message(&text, symbol, &mut seq) {
            Ok(Some(event)) => {
                if tx.send(event).is_err() {
                    return Ok(());
                }
            }
            Ok(None) => {}
            Err(kind) => {
                debug!(%symbol, error = %kind, "dropping malformed coinbase message");
            }
        }
    }

    Ok(())
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum WireMessage {
    #[serde(rename = "subscriptions")]
    Subscriptions,
    #[serde(rename = "snapshot")]
    Snapshot {
        product_id: String,
        bids: Vec<[String; 2]>,
        asks: Vec<[String; 2]>,
    },
    #[serde(rename = "l2update")]
    L2Update {
        product_id: String,
        time: DateTime<Utc>,
        changes: Vec<(String, String, String)>,
    },
    #[serde(rename = "error")]
    Error { message: String },
}

/// Parses one wire message into a [`BookEvent`], re-tagging `l2update`s with a
/// synthetic monotonic id out of `seq` since Coinbase's level2 channel has no
/// sequence number of its own. `seq` is bumped once per applied `l2update`; the
/// snapshot that precedes them stamps the counter's starting value instead.
fn parse_message(
    text: &str,
    expected_symbol: &str,
    seq: &mut u64,
) -> Result<Option<BookEvent>, AdapterErrorKind> {
    let wire: WireMessage =
        serde_json::from_str(text).map_err(|e| AdapterErrorKind::MalformedMessage {
            detail: e.to_string(),
        })?;

    match wire {
        WireMessage::Subscriptions => Ok(None),
        WireMessage::Error { message } => Err(AdapterErrorKind::MalformedMessage { detail: message }),
        WireMessage::Snapshot {
            product_id,
            bids,
            asks,
        } => {
            if product_id != expected_symbol {
                return Err(AdapterErrorKind::SymbolMismatch {
                    expected: expected_symbol.to_string(),
                    actual: product_id,
                });
            }
            Ok(Some(BookEvent::Snapshot {
                snapshot_id: *seq,
                bids: parse_levels(&bids)?,
                asks: parse_levels(&asks)?,
            }))
        }
        WireMessage::L2Update {
            product_id,
            time,
            changes,
        } => {
            if product_id != expected_symbol {
                return Err(AdapterErrorKind::SymbolMismatch {
                    expected: expected_symbol.to_string(),
                    actual: product_id,
                });
            }
            let mut parsed = Vec::with_capacity(changes.len());
            for (side, price, size) in changes {
                let side = match side.as_str() {
                    "buy" => Side::Bid,
                    "sell" => Side::Ask,
                    other => {
                        return Err(AdapterErrorKind::MalformedMessage {
                            detail: format!("unknown change side '{other}'"),
                        })
                    }
                };
                let price = parse_decimal(&price)?;
                let size = parse_decimal(&size)?;
                parsed.push((side, PriceLevel::new(price, size)));
            }
            *seq += 1;
            Ok(Some(BookEvent::Diff {
                first_id: *seq,
                last_id: *seq,
                event_time: time,
                symbol: product_id,
                changes: parsed,
            }))
        }
    }
}

fn parse_levels(raw: &[[String; 2]]) -> Result<Vec<PriceLevel>, AdapterErrorKind> {
    raw.iter()
        .map(|[price, size]| Ok(PriceLevel::new(parse_decimal(price)?, parse_decimal(size)?)))
        .collect()
}

fn parse_decimal(raw: &str) -> Result<Decimal, AdapterErrorKind> {
    raw.parse::<Decimal>()
        .map_err(|e| AdapterErrorKind::MalformedMessage {
            detail: format!("invalid decimal '{raw}': {e}"),
        })
}
