//! Real daemon: loads configuration, connects one adapter per configured
//! exchange/pair, and runs the emit/sweep loop until interrupted.

use anyhow::{Context, Result};
use book_bins::common::{self, Cli};
use book_core::config::{Config, ExchangeConfig, ExchangeKind, SinkKind};
use book_core::feed::{BinanceAdapter, CoinbaseAdapter, FeedAdapter};
use book_core::orderbook::DepthBucketizer;
use book_core::registry::{SessionKey, SessionRegistry};
use book_core::resilience::health::HealthSupervisor;
use book_core::session::BookSession;
use book_core::sink::{JsonLinesSink, Sink, StdoutSink};
use book_core::Aggregator;
use clap::Parser;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = Config::load(&cli.config)
        .with_context(|| format!("loading config from {}", cli.config))?;
    if let Some(level) = &cli.log_level {
        config.log_level = level.clone();
    }
    if cli.json_logs {
        config.json_logs = true;
    }
    common::init_logging(&config.log_level, config.json_logs)?;

    let exchanges: HashMap<String, ExchangeConfig> = config
        .exchanges
        .iter()
        .cloned()
        .map(|e| (e.id.clone(), e))
        .collect();

    let registry = Arc::new(SessionRegistry::new());
    for exchange in &config.exchanges {
        for pair in &exchange.pairs {
            spawn_session(&registry, exchange, pair, config.queue_capacity)?;
        }
    }

    let sink = build_sink(&config)?;

    let should_stop = Arc::new(AtomicBool::new(false));
    {
        let should_stop = should_stop.clone();
        ctrlc::set_handler(move || {
            tracing::info!("shutdown signal received");
            should_stop.store(true, Ordering::SeqCst);
        })
        .context("installing signal handler")?;
    }

    #[cfg(feature = "metrics-server")]
    let metrics_registry = build_metrics_registry(&config, registry.clone(), should_stop.clone())?;

    let registry_for_stale = registry.clone();
    let queue_capacity = config.queue_capacity;
    #[cfg(feature = "metrics-server")]
    let metrics_for_resync = metrics_registry.clone();
    let aggregator = Aggregator::new(
        registry.clone(),
        sink,
        DepthBucketizer::new(config.depth_bands.clone()),
        HealthSupervisor::new(Duration::from_millis(config.staleness_threshold_ms)),
        Duration::from_millis(config.emit_interval_ms),
        book_core::new_session_id(),
        move |key, reason| {
            #[cfg(feature = "metrics-server")]
            if let Some(metrics) = &metrics_for_resync {
                metrics
                    .sessions()
                    .resyncs_total
                    .with_label_values(&[&key.exchange_id, &key.symbol, reason.as_label()])
                    .inc();
            }
            #[cfg(not(feature = "metrics-server"))]
            let _ = reason;

            let Some(exchange) = exchanges.get(&key.exchange_id) else {
                tracing::warn!(
                    exchange = %key.exchange_id,
                    "stale session names an unknown exchange, not recreating"
                );
                return;
            };
            if let Err(e) = spawn_session(&registry_for_stale, exchange, &key.symbol, queue_capacity) {
                tracing::error!(
                    exchange = %key.exchange_id,
                    symbol = %key.symbol,
                    error = %e,
                    "failed to recreate session"
                );
            }
        },
    );

    aggregator.run(|| should_stop.load(Ordering::SeqCst));
    tracing::info!("aggregator stopped, draining sessions");
    Ok(())
}

/// Builds the adapter for `exchange` and starts a session tracking `pair`,
/// inserting it into `registry`. Used both at startup and to recreate a
/// session the aggregator has torn down for staleness or a gap.
fn spawn_session(
    registry: &SessionRegistry,
    exchange: &ExchangeConfig,
    pair: &str,
    queue_capacity: usize,
) -> Result<()> {
    let adapter: Arc<dyn FeedAdapter> = match exchange.kind {
        ExchangeKind::CoinbaseLike => Arc::new(CoinbaseAdapter::new(
            exchange.id.clone(),
            exchange.endpoint.clone(),
        )),
        ExchangeKind::BinanceLike => {
            let rest_url = common::derive_rest_url(&exchange.endpoint);
            Arc::new(BinanceAdapter::new(
                exchange.id.clone(),
                exchange.endpoint.clone(),
                rest_url,
            ))
        }
    };

    let session = BookSession::start(
        adapter,
        exchange.id.clone(),
        pair.to_string(),
        exchange.kind,
        queue_capacity,
    )?;
    registry.insert(SessionKey::new(exchange.id.clone(), pair.to_string()), session);
    tracing::info!(exchange = %exchange.id, symbol = %pair, "session started");
    Ok(())
}

fn build_sink(config: &Config) -> Result<Arc<dyn Sink>> {
    match config.sink.kind {
        SinkKind::Stdout => Ok(Arc::new(StdoutSink)),
        SinkKind::JsonLines => {
            let path = config
                .sink
                .path
                .clone()
                .context("sink.path is required when sink.kind = \"json_lines\"")?;
            Ok(Arc::new(JsonLinesSink::open(path)?))
        }
    }
}

/// Builds the Prometheus metrics registry, starts its `/metrics` HTTP endpoint,
/// and spawns a thread that refreshes its gauges from the session registry once
/// per emit interval, if `metrics_listen_addr` is configured. Returns the
/// registry so callers (the `on_stale` recreation path) can increment counters
/// it owns, such as `resyncs_total`.
#[cfg(feature = "metrics-server")]
fn build_metrics_registry(
    config: &Config,
    registry: Arc<SessionRegistry>,
    should_stop: Arc<AtomicBool>,
) -> Result<Option<Arc<book_core::monitoring::MetricsRegistry>>> {
    use book_core::monitoring::{MetricsRegistry, MetricsServer, MetricsServerConfig};

    let Some(addr) = config.metrics_listen_addr else {
        return Ok(None);
    };

    let metrics_registry = Arc::new(MetricsRegistry::new().context("building metrics registry")?);

    let server_registry = metrics_registry.clone();
    std::thread::Builder::new()
        .name("metrics-server".to_string())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    tracing::error!(error = %e, "failed to start metrics server runtime");
                    return;
                }
            };
            let server = MetricsServer::new(
                MetricsServerConfig {
                    listen_addr: addr,
                    metrics_path: "/metrics".to_string(),
                },
                server_registry,
            );
            if let Err(e) = runtime.block_on(server.serve()) {
                tracing::error!(error = %e, "metrics server exited");
            }
        })
        .context("spawning metrics server thread")?;

    let emit_interval = Duration::from_millis(config.emit_interval_ms);
    let updater_registry = metrics_registry.clone();
    std::thread::Builder::new()
        .name("metrics-updater".to_string())
        .spawn(move || {
            while !should_stop.load(Ordering::SeqCst) {
                updater_registry.update_from_registry(&registry);
                std::thread::sleep(emit_interval);
            }
        })
        .context("spawning metrics updater thread")?;

    Ok(Some(metrics_registry))
}
