use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

use rust_decimal::Decimal;

/// Top-level process configuration, loaded from TOML and overridable by `BOOK_*`
/// environment variables (`__` separates nested fields, e.g.
/// `BOOK_SINK__KIND=stdout`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// One entry per exchange/symbol pair to track.
    pub exchanges: Vec<ExchangeConfig>,

    /// How often the aggregator emits a depth document, in milliseconds.
    #[serde(default = "default_emit_interval_ms")]
    pub emit_interval_ms: u64,

    /// A session idle this long (no applied diff) is torn down and recreated.
    #[serde(default = "default_staleness_threshold_ms")]
    pub staleness_threshold_ms: u64,

    /// Bounded capacity of each session's producer/consumer staging queue.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Ascending percentage offsets defining the ten depth bands, e.g. `[0, 0.02, ..., 0.20]`.
    /// Must have exactly 11 entries starting at 0.
    #[serde(default = "default_depth_bands")]
    pub depth_bands: Vec<Decimal>,

    #[serde(default)]
    pub sink: SinkConfig,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub json_logs: bool,

    /// Address the Prometheus `/metrics` endpoint listens on. `None` disables it.
    #[serde(default)]
    pub metrics_listen_addr: Option<SocketAddr>,
}

/// One tracked exchange/symbol feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeConfig {
    /// Short identifier used in documents and logs, e.g. "coinbase".
    pub id: String,

    /// Which reconciliation style this exchange's feed uses.
    pub kind: ExchangeKind,

    /// REST/websocket base endpoint.
    pub endpoint: String,

    /// Trading pairs to subscribe to, e.g. `["BTC-USD", "ETH-USD"]`.
    pub pairs: Vec<String>,
}

/// The two reconciliation styles a [`crate::feed::FeedAdapter`] may implement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExchangeKind {
    /// Transport guarantees sequential, gap-free delivery; no buffering needed.
    CoinbaseLike,
    /// Diffs must be buffered until a snapshot arrives and is reconciled against
    /// `first_id`/`last_id`.
    BinanceLike,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    pub kind: SinkKind,
    /// Destination for file-backed sinks; ignored by `stdout`.
    #[serde(default)]
    pub path: Option<std::path::PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkKind {
    Stdout,
    JsonLines,
}

fn default_emit_interval_ms() -> u64 {
    1_000
}

fn default_staleness_threshold_ms() -> u64 {
    10_000
}

fn default_queue_capacity() -> usize {
    4_096
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_depth_bands() -> Vec<Decimal> {
    crate::orderbook::depth::default_depth_bands()
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            kind: SinkKind::Stdout,
            path: None,
        }
    }
}
