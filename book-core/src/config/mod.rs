//! Runtime configuration.
//!
//! Settings are applied in order (later overrides earlier):
//!
//! 1. **Defaults** - the `#[serde(default = ...)]` values on [`types::Config`]
//! 2. **TOML file** - passed to [`Config::load`]
//! 3. **Environment variables** - `BOOK_` prefix (e.g. `BOOK_EMIT_INTERVAL_MS=1500`,
//!    `BOOK_SINK__KIND=json_lines`; double underscore separates nested fields)
//!
//! ### Example
//!
//! ```toml
//! emit_interval_ms = 1000
//! staleness_threshold_ms = 10000
//!
//! [[exchanges]]
//! id = "coinbase"
//! kind = "coinbase_like"
//! endpoint = "wss://ws-feed.exchange.com"
//! pairs = ["BTC-USD", "ETH-USD"]
//!
//! [sink]
//! kind = "stdout"
//! ```

pub mod types;

pub use types::*;

use anyhow::{bail, Context, Result};
use std::path::Path;

impl Config {
    /// Load configuration from a TOML file, then apply `BOOK_`-prefixed environment
    /// variable overrides, then validate.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;

        let mut value: toml::Value =
            toml::from_str(&raw).with_context(|| format!("parsing config file {}", path.display()))?;

        apply_env_overrides(&mut value, "BOOK")?;

        let config: Config = value
            .try_into()
            .context("deserializing configuration")?;

        config.validate()?;
        Ok(config)
    }

    /// Load from the conventional default location.
    pub fn load_default() -> Result<Self> {
        Self::load("config/default.toml")
    }

    pub fn validate(&self) -> Result<()> {
        if self.exchanges.is_empty() {
            bail!("at least one [[exchanges]] entry is required");
        }

        for exchange in &self.exchanges {
            if exchange.id.trim().is_empty() {
                bail!("exchange id must not be empty");
            }
            if exchange.pairs.is_empty() {
                bail!("exchange '{}' must list at least one pair", exchange.id);
            }
            if exchange.endpoint.trim().is_empty() {
                bail!("exchange '{}' must have a non-empty endpoint", exchange.id);
            }
        }

        if self.emit_interval_ms == 0 {
            bail!("emit_interval_ms must be positive");
        }

        if self.staleness_threshold_ms == 0 {
            bail!("staleness_threshold_ms must be positive");
        }

        if self.queue_capacity == 0 {
            bail!("queue_capacity must be positive");
        }

        if self.depth_bands.len() != crate::orderbook::depth::NUM_BANDS + 1 {
            bail!(
                "depth_bands must have exactly {} ascending entries",
                crate::orderbook::depth::NUM_BANDS + 1
            );
        }
        if !self.depth_bands.windows(2).all(|w| w[0] < w[1]) {
            bail!("depth_bands must be strictly ascending");
        }
        if self.depth_bands[0] != rust_decimal::Decimal::ZERO {
            bail!("depth_bands must start at 0");
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.log_level.as_str()) {
            bail!(
                "invalid log level '{}', must be one of: {:?}",
                self.log_level,
                valid_log_levels
            );
        }

        Ok(())
    }
}

/// Applies `BOOK_FOO__BAR=baz`-style overrides onto a parsed TOML document in place.
/// Each `__`-separated segment after the prefix descends one level into a table;
/// the final segment's value is parsed as TOML so numbers/bools/strings round-trip.
fn apply_env_overrides(value: &mut toml::Value, prefix: &str) -> Result<()> {
    let dotted_prefix = format!("{prefix}_");
    for (key, raw) in std::env::vars() {
        let Some(rest) = key.strip_prefix(&dotted_prefix) else {
            continue;
        };
        let path: Vec<String> = rest.split("__").map(|s| s.to_lowercase()).collect();
        if path.iter().any(|segment| segment.is_empty()) {
            continue;
        }
        set_nested(value, &path, &raw)
            .with_context(|| format!("applying environment override {key}"))?;
    }
    Ok(())
}

fn set_nested(root: &mut toml::Value, path: &[String], raw: &str) -> Result<()> {
    let parsed = parse_env_value(raw);
    let mut cursor = root;
    for segment in &path[..path.len() - 1] {
        if !matches!(cursor, toml::Value::Table(_)) {
            *cursor = toml::Value::Table(Default::default());
        }
        let table = cursor.as_table_mut().expect("just ensured table above");
        cursor = table
            .entry(segment.clone())
            .or_insert_with(|| toml::Value::Table(Default::default()));
    }
    let last = path.last().expect("path is non-empty");
    if !matches!(cursor, toml::Value::Table(_)) {
        *cursor = toml::Value::Table(Default::default());
    }
    cursor
        .as_table_mut()
        .expect("just ensured table above")
        .insert(last.clone(), parsed);
    Ok(())
}

/// Parses a raw environment variable string as a TOML scalar, falling back to a
/// plain string when it isn't valid TOML on its own (e.g. an endpoint URL).
fn parse_env_value(raw: &str) -> toml::Value {
    if let Ok(b) = raw.parse::<bool>() {
        return toml::Value::Boolean(b);
    }
    if let Ok(i) = raw.parse::<i64>() {
        return toml::Value::Integer(i);
    }
    if let Ok(f) = raw.parse::<f64>() {
        return toml::Value::Float(f);
    }
    toml::Value::String(raw.to_string())
}
