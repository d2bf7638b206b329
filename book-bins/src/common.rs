//! Shared CLI parsing and process setup for the aggregator binaries.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// CLI arguments shared by `book-aggregator` and `book-aggregator-demo`.
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "config/default.toml")]
    pub config: String,

    /// Overrides the configured log level (trace/debug/info/warn/error).
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// Emit logs as JSON lines instead of the default human-readable format.
    #[arg(long)]
    pub json_logs: bool,
}

/// Initializes the global tracing subscriber. `RUST_LOG` takes precedence over
/// `level` if set, matching the convention `tracing-subscriber`'s `EnvFilter`
/// itself documents.
pub fn init_logging(level: &str, json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;

    if json {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_target(false))
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_target(false))
            .with(filter)
            .init();
    }

    Ok(())
}

/// Derives a REST base URL from a websocket endpoint by convention
/// (`wss://` -> `https://`, `ws://` -> `http://`), for exchanges whose
/// configuration carries a single `endpoint` field but whose adapter needs both
/// a streaming and a REST base (only [`book_core::feed::BinanceAdapter`] today).
pub fn derive_rest_url(ws_url: &str) -> String {
    if let Some(rest) = ws_url.strip_prefix("wss://") {
        format!("https://{rest}")
    } else if let Some(rest) = ws_url.strip_prefix("ws://") {
        format!("http://{rest}")
    } else {
        ws_url.to_string()
    }
}
