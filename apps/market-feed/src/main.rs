//! Market Feed Binary
//!
//! Streams bars from Alpaca, aggregates them and logs indicator snapshots.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin market-feed
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `ALPACA_KEY`: Alpaca API key
//! - `ALPACA_SECRET`: Alpaca API secret
//!
//! ## Optional
//! - `ALPACA_FEED`: "iex" | "sip" (default: iex)
//! - `ALPACA_MODE`: "production" | "sandbox" | "test" (default: production)
//! - `ALPACA_STREAM_URL`: full stream URL override (port defaults to 8765)
//! - `MARKET_FEED_SYMBOLS`: comma-separated symbols (default: all)
//! - `MARKET_FEED_BAR_MINUTES`: incoming bar size (default: 1)
//! - `MARKET_FEED_AGGREGATE_MINUTES`: aggregated bar size (default: 5)
//! - `MARKET_FEED_INDICATORS`: e.g. `EMA:period=20;ATR:period=14`
//! - `MARKET_FEED_GAP_POLICY`: "halt" | "restart" (default: restart)
//! - `MARKET_FEED_HEARTBEAT_INTERVAL_SECS` / `MARKET_FEED_HEARTBEAT_TIMEOUT_SECS`
//! - `MARKET_FEED_RECONNECT_DELAY_MS` / `MARKET_FEED_RECONNECT_DELAY_MAX_SECS` /
//!   `MARKET_FEED_RECONNECT_MULTIPLIER`
//! - `MARKET_FEED_METRICS_PORT`: Prometheus port, 0 disables (default: 9090)
//! - `RUST_LOG`: Log filter (default: market_feed=info)
//! - `LOG_FORMAT`: "json" for JSON lines

use std::time::Duration;

use anyhow::Context;
use market_feed::infrastructure::telemetry;
use market_feed::{AppConfig, Bar, MarketDataPipeline, MarketFeed, PipelineError, init_metrics};
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    load_dotenv();

    let telemetry_guard = telemetry::init();
    tracing::info!(
        service = telemetry_guard.service_name(),
        version = env!("CARGO_PKG_VERSION"),
        "Starting market feed"
    );

    let config = AppConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    let _metrics_handle = init_metrics(config.metrics_port).context("metrics setup failed")?;

    let mut pipeline =
        MarketDataPipeline::new(config.pipeline.clone()).context("invalid pipeline config")?;
    let _snapshots = pipeline.connect_snapshot_handler(|snapshot| {
        tracing::info!(
            symbol = %snapshot.symbol,
            timestamp = %snapshot.timestamp,
            close = snapshot.close,
            indicators = ?snapshot.indicators,
            "Indicator snapshot"
        );
    });

    let shutdown_token = CancellationToken::new();

    let (bar_tx, mut bar_rx) = mpsc::unbounded_channel::<Bar>();
    let mut feed = MarketFeed::new(config.feed.clone()).with_cancellation(&shutdown_token);
    let _bars = feed.connect_handler(move |bar| {
        if bar_tx.send(bar.clone()).is_err() {
            tracing::debug!(symbol = bar.symbol(), "Bar receiver closed");
        }
    });
    feed.subscribe(config.symbols.clone());
    feed.start().context("failed to start feed")?;

    let signal_token = shutdown_token.clone();
    tokio::spawn(async move {
        await_shutdown(signal_token).await;
    });

    loop {
        tokio::select! {
            () = shutdown_token.cancelled() => break,
            bar = bar_rx.recv() => {
                let Some(bar) = bar else { break };
                process_bar(&mut pipeline, &bar);
            }
        }
    }

    feed.stop();
    if tokio::time::timeout(SHUTDOWN_TIMEOUT, feed.join())
        .await
        .is_err()
    {
        tracing::warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "Feed did not stop in time"
        );
    }

    tracing::info!("Market feed stopped");
    Ok(())
}

/// Feed one bar through the pipeline, logging failures.
fn process_bar(pipeline: &mut MarketDataPipeline, bar: &Bar) {
    match pipeline.on_bar(bar) {
        Ok(_) => {}
        Err(PipelineError::Aggregation(e)) if e.is_sequencing() => {
            tracing::error!(symbol = bar.symbol(), error = %e, "Bar sequence broken");
        }
        Err(e) => {
            tracing::error!(symbol = bar.symbol(), error = %e, "Pipeline rejected bar");
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &AppConfig) {
    tracing::info!(
        feed = %config.feed.feed,
        mode = ?config.feed.mode,
        symbols = ?config.symbols,
        aggregate_secs = config.pipeline.aggregate_duration.num_seconds(),
        gap_policy = %config.pipeline.gap_policy,
        metrics_port = config.metrics_port,
        "Configuration loaded"
    );
    match config.feed.endpoint() {
        Ok(endpoint) => tracing::debug!(url = %endpoint, "Stream endpoint"),
        Err(e) => tracing::warn!(error = %e, "Stream endpoint invalid"),
    }
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Ctrl+C handler failed");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "SIGTERM handler failed");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();
}
