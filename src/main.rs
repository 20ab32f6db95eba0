// =============================================================================
// kline-sma — Main Entry Point
// =============================================================================
//
// Warms a Simple Moving Average on historical Binance candles, then follows
// the live kline stream and prints the average every time a candle closes.
// =============================================================================

use anyhow::Context;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use kline_sma::binance::BinanceClient;
use kline_sma::feed::IndicatorFeed;
use kline_sma::indicators::SimpleMovingAverage;
use kline_sma::market_data::{self, StreamEvent};
use kline_sma::runtime_config::{RuntimeConfig, DEFAULT_CONFIG_PATH, ENV_CONFIG_PATH};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config_path =
        std::env::var(ENV_CONFIG_PATH).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let mut config = RuntimeConfig::load(&config_path).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        RuntimeConfig::default()
    });
    config.apply_overrides(|key| std::env::var(key).ok());
    config.validate().context("invalid configuration")?;

    info!(
        symbol = %config.symbol,
        interval = %config.interval,
        sma_period = config.sma_period,
        warmup_limit = config.warmup_limit,
        "Configured market"
    );

    // ── 2. Indicator ─────────────────────────────────────────────────────
    let sma = SimpleMovingAverage::new(config.sma_period)?;
    let label = format!("MA({})", sma.period());
    let mut feed = IndicatorFeed::new(sma);

    // ── 3. Warm-up from REST history ─────────────────────────────────────
    let client = BinanceClient::new(&config.rest_base_url)?;
    let history = match client
        .get_klines(&config.symbol, &config.interval, config.warmup_limit)
        .await
    {
        Ok(candles) => candles,
        Err(e) => {
            error!(error = %e, "Failed to fetch historical klines");
            return Err(e);
        }
    };

    feed.warm_up(&history);
    match history.iter().rev().find(|c| c.is_closed) {
        Some(last) => {
            let open_time = last
                .open_time_utc()
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| last.open_time.to_string());
            info!(open_time = %open_time, "Last warm-up candle");
        }
        None => warn!("No closed candles in history; indicator starts cold"),
    }

    // ── 4. Live kline stream ─────────────────────────────────────────────
    let (tx, mut rx) = mpsc::channel(config.channel_capacity);
    let stream = match market_data::spawn_kline_feed(config.stream_config(), tx).await {
        Ok(handle) => handle,
        Err(e) => {
            error!(error = %e, "Failed to subscribe to kline stream");
            return Err(e);
        }
    };

    // ── 5. Event loop (single consumer owns the indicator) ───────────────
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            event = rx.recv() => {
                let Some(event) = event else {
                    warn!("Kline feed stopped");
                    break;
                };
                match event {
                    StreamEvent::Kline(candle) => {
                        if let Some(reading) = feed.on_candle(&candle) {
                            println!("{}", reading.render(&label, config.display_precision));
                        }
                    }
                    StreamEvent::ConnectionLost { error } => {
                        warn!(error = %error, "Connection lost");
                    }
                    StreamEvent::ConnectionRestored => info!("Connection restored"),
                    StreamEvent::ConnectionClosed => warn!("Connection closed"),
                }
            }
            res = &mut shutdown => {
                if let Err(e) = res {
                    error!(error = %e, "Failed to listen for shutdown signal");
                }
                info!("Shutting down");
                break;
            }
        }
    }

    stream.abort();
    Ok(())
}
