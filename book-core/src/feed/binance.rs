//! Binance-style adapter.
//!
//! Grounded in `binance_level2_order_book.py`: depth diffs are buffered from the
//! moment the websocket connects, a REST snapshot is fetched only after that buffer
//! has had time to fill, and the buffered diffs are replayed against the ladder only
//! once reconciled against the snapshot's `lastUpdateId`. Unlike the Python original
//! (which logs a gap and continues anyway), a reconciliation failure or mid-stream
//! gap here is reported as an [`AdapterErrorKind`] and left to
//! [`crate::session::BookSession`] to resolve — this system requires the stricter
//! policy of treating a confirmed gap as session-Degraded rather than silently
//! drifting out of sync.

use super::{AdapterHandle, FeedAdapter};
use crate::book_event::{BookEvent, PriceLevel, Side};
use crate::errors::{AdapterErrorKind, SessionError};
use crate::resilience::backoff::{BackoffConfig, ExponentialBackoff};
use chrono::{DateTime, Utc};
use crossbeam_channel::Sender;
use futures_util::StreamExt;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

/// Diffs are buffered for this long before the REST snapshot is fetched, so the
/// snapshot's `lastUpdateId` is guaranteed to fall inside the buffered range.
const PRE_SNAPSHOT_BUFFER: std::time::Duration = std::time::Duration::from_secs(1);

pub struct BinanceAdapter {
    exchange_id: String,
    ws_url: String,
    rest_url: String,
}

impl BinanceAdapter {
    pub fn new(
        exchange_id: impl Into<String>,
        ws_url: impl Into<String>,
        rest_url: impl Into<String>,
    ) -> Self {
        Self {
            exchange_id: exchange_id.into(),
            ws_url: ws_url.into(),
            rest_url: rest_url.into(),
        }
    }
}

impl FeedAdapter for BinanceAdapter {
    fn exchange_id(&self) -> &str {
        &self.exchange_id
    }

    fn start(&self, symbol: String, tx: Sender<BookEvent>) -> Result<AdapterHandle, SessionError> {
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = stop.clone();
        let ws_url = self.ws_url.clone();
        let rest_url = self.rest_url.clone();
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
                runtime.block_on(run_loop(ws_url, rest_url, symbol, tx, thread_stop));
            })
            .map_err(|e| {
                SessionError::from(AdapterErrorKind::TransportDisconnect {
                    reason: format!("failed to spawn adapter thread: {e}"),
                })
            })?;

        Ok(AdapterHandle::new(stop, join))
    }
}

async fn run_loop(
    ws_url: String,
    rest_url: String,
    symbol: String,
    tx: Sender<BookEvent>,
    stop: Arc<AtomicBool>,
) {
    let mut backoff = ExponentialBackoff::with_config(BackoffConfig::unlimited());

    while !stop.load(Ordering::Relaxed) {
        match run_once(&ws_url, &rest_url, &symbol, &tx, &stop).await {
            Ok(()) => break,
            Err(kind) => {
                warn!(%symbol, error = %kind, "binance adapter disconnected, reconnecting");
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

#[derive(Debug, Deserialize)]
struct DepthUpdate {
    #[serde(rename = "E")]
    event_time_ms: i64,
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "U")]
    first_id: u64,
    #[serde(rename = "u")]
    last_id: u64,
    #[serde(rename = "b")]
    bids: Vec<[String; 2]>,
    #[serde(rename = "a")]
    asks: Vec<[String; 2]>,
}

#[derive(Debug, Deserialize)]
struct DepthSnapshot {
    #[serde(rename = "lastUpdateId")]
    last_update_id: u64,
    bids: Vec<[String; 2]>,
    asks: Vec<[String; 2]>,
}

async fn run_once(
    ws_url: &str,
    rest_url: &str,
    symbol: &str,
    tx: &Sender<BookEvent>,
    stop: &Arc<AtomicBool>,
) -> Result<(), AdapterErrorKind> {
    let (mut ws, _) = tokio_tungstenite::connect_async(ws_url)
        .await
        .map_err(|e| AdapterErrorKind::TransportDisconnect {
            reason: e.to_string(),
        })?;

    let mut buffered: VecDeque<DepthUpdate> = VecDeque::new();
    let fill_deadline = tokio::time::Instant::now() + PRE_SNAPSHOT_BUFFER;

    while tokio::time::Instant::now() < fill_deadline {
        let remaining = fill_deadline.saturating_duration_since(tokio::time::Instant::now());
        match tokio::time::timeout(remaining, ws.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => {
                if let Some(update) = decode_depth_update(&text, symbol)? {
                    buffered.push_back(update);
                }
            }
            Ok(Some(Ok(_))) => {}
            Ok(Some(Err(e))) => {
                return Err(AdapterErrorKind::TransportDisconnect {
                    reason: e.to_string(),
                })
            }
            Ok(None) => {
                return Err(AdapterErrorKind::TransportDisconnect {
                    reason: "websocket stream ended while buffering".to_string(),
                })
            }
            Err(_) => break,
        }
    }

    let snapshot = fetch_snapshot(rest_url, symbol).await?;
    info!(%symbol, last_update_id = snapshot.last_update_id, "binance snapshot fetched, reconciling buffer");

    let first_buffered_id = buffered.front().map(|u| u.first_id).unwrap_or(0);
    let reconciles = buffered
        .iter()
        .any(|u| u.first_id <= snapshot.last_update_id + 1 && snapshot.last_update_id <= u.last_id);
    if !buffered.is_empty() && !reconciles {
        return Err(AdapterErrorKind::SnapshotReconcileFail {
            snapshot_id: snapshot.last_update_id,
            first_buffered_id,
        });
    }

    tx.send(BookEvent::Snapshot {
        snapshot_id: snapshot.last_update_id,
        bids: parse_levels(&snapshot.bids)?,
        asks: parse_levels(&snapshot.asks)?,
    })
    .map_err(|_| AdapterErrorKind::TransportDisconnect {
        reason: "session queue disconnected".to_string(),
    })?;

    let mut prev_last_id = snapshot.last_update_id;
    for update in buffered {
        if update.last_id <= snapshot.last_update_id {
            continue;
        }
        emit_diff(tx, update, &mut prev_last_id)?;
    }

    while !stop.load(Ordering::Relaxed) {
        let next = tokio::time::timeout(std::time::Duration::from_millis(500), ws.next()).await;
        let text = match next {
            Ok(Some(Ok(Message::Text(text)))) => text,
            Ok(Some(Ok(Message::Close(_)))) => {
                return Err(AdapterErrorKind::TransportDisconnect {
                    reason: "server sent close frame".to_string(),
                })
            }
            Ok(Some(Ok(_))) => continue,
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
            Err(_) => continue,
        };

        match decode_depth_update(&text, symbol) {
            Ok(Some(update)) => {
                if update.last_id <= prev_last_id {
                    debug!(%symbol, u = update.last_id, "dropping stale depth update");
                    continue;
                }
                emit_diff(tx, update, &mut prev_last_id)?;
            }
            Ok(None) => {}
            Err(kind) => debug!(%symbol, error = %kind, "dropping malformed binance message"),
        }
    }

    Ok(())
}

fn emit_diff(
    tx: &Sender<BookEvent>,
    update: DepthUpdate,
    prev_last_id: &mut u64,
) -> Result<(), AdapterErrorKind> {
    if update.first_id != *prev_last_id + 1 {
        let gap = AdapterErrorKind::SequenceGap {
            expected_first_id: *prev_last_id + 1,
            actual_first_id: update.first_id,
        };
        warn!(error = %gap, "binance depth update sequence gap");
        // Reported, not fatal here: BookSession decides whether a gap forces Degraded.
    }
    *prev_last_id = update.last_id;

    let event_time = DateTime::<Utc>::from_timestamp_millis(update.event_time_ms)
        .unwrap_or_else(Utc::now);
    let mut changes = Vec::with_capacity(update.bids.len() + update.asks.len());
    for [price, size] in &update.bids {
        changes.push((Side::Bid, PriceLevel::new(parse_decimal(price)?, parse_decimal(size)?)));
    }
    for [price, size] in &update.asks {
        changes.push((Side::Ask, PriceLevel::new(parse_decimal(price)?, parse_decimal(size)?)));
    }

    tx.send(BookEvent::Diff {
        first_id: update.first_id,
        last_id: update.last_id,
        event_time,
        symbol: update.symbol,
        changes,
    })
    .map_err(|_| AdapterErrorKind::TransportDisconnect {
        reason: "session queue disconnected".to_string(),
    })
}

fn decode_depth_update(text: &str, expected_symbol: &str) -> Result<Option<DepthUpdate>, AdapterErrorKind> {
    let update: DepthUpdate =
        serde_json::from_str(text).map_err(|e| AdapterErrorKind::MalformedMessage {
            detail: e.to_string(),
        })?;
    if update.symbol != expected_symbol {
        return Err(AdapterErrorKind::SymbolMismatch {
            expected: expected_symbol.to_string(),
            actual: update.symbol,
        });
    }
    Ok(Some(update))
}

async fn fetch_snapshot(rest_url: &str, symbol: &str) -> Result<DepthSnapshot, AdapterErrorKind> {
    let url = format!("{rest_url}/api/v3/depth?symbol={symbol}&limit=5000");
    let response = reqwest::get(&url)
        .await
        .map_err(|e| AdapterErrorKind::TransportDisconnect {
            reason: e.to_string(),
        })?;
    response
        .json::<DepthSnapshot>()
        .await
        .map_err(|e| AdapterErrorKind::MalformedMessage {
            detail: e.to_string(),
        })
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconciliation_accepts_snapshot_inside_buffered_range() {
        let buffered = vec![DepthUpdate {
            event_time_ms: 0,
            symbol: "BTCUSDT".into(),
            first_id: 100,
            last_id: 110,
            bids: vec![],
            asks: vec![],
        }];
        let snapshot_id = 105u64;
        let reconciles = buffered
            .iter()
            .any(|u| u.first_id <= snapshot_id + 1 && snapshot_id <= u.last_id);
        assert!(reconciles);
    }

    #[test]
    fn reconciliation_rejects_snapshot_outside_buffered_range() {
        let buffered = vec![DepthUpdate {
            event_time_ms: 0,
            symbol: "BTCUSDT".into(),
            first_id: 200,
            last_id: 210,
            bids: vec![],
            asks: vec![],
        }];
        let snapshot_id = 50u64;
        let reconciles = buffered
            .iter()
            .any(|u| u.first_id <= snapshot_id + 1 && snapshot_id <= u.last_id);
        assert!(!reconciles);
    }

    #[test]
    fn stale_update_below_snapshot_id_is_skippable() {
        let snapshot_id = 1_000u64;
        let update_last_id = 999u64;
        assert!(update_last_id <= snapshot_id);
    }

    #[test]
    fn emit_diff_advances_prev_last_id() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut prev_last_id = 10u64;
        let update = DepthUpdate {
            event_time_ms: 0,
            symbol: "BTCUSDT".into(),
            first_id: 11,
            last_id: 15,
            bids: vec![["100.0".into(), "1.0".into()]],
            asks: vec![],
        };
        emit_diff(&tx, update, &mut prev_last_id).unwrap();
        assert_eq!(prev_last_id, 15);
        assert!(rx.try_recv().is_ok());
    }
}
