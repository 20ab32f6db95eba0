use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ---------------------------------------------------------------------------
// Data types
// ---------------------------------------------------------------------------

/// A single OHLCV candle, from either the REST history or the kline stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: i64,
    pub close_time: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    /// `true` once the candle's interval has elapsed and its values are final.
    pub is_closed: bool,
}

impl Candle {
    /// Open time as a UTC timestamp, `None` if out of chrono's range.
    pub fn open_time_utc(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.open_time)
    }
}

/// Everything the kline feed reports to its consumer, in delivery order.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Kline(Candle),
    /// The connection failed with an error; a reconnect is pending.
    ConnectionLost { error: String },
    /// A reconnect succeeded after a loss or close.
    ConnectionRestored,
    /// The server ended the stream cleanly; a reconnect is pending.
    ConnectionClosed,
}

/// Connection parameters for one (symbol, interval) kline stream.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub ws_base_url: String,
    pub symbol: String,
    pub interval: String,
    pub reconnect_delay: Duration,
}

impl StreamConfig {
    pub fn url(&self) -> String {
        kline_stream_url(&self.ws_base_url, &self.symbol, &self.interval)
    }
}

// ---------------------------------------------------------------------------
// URL + message parsing
// ---------------------------------------------------------------------------

/// Build the single-stream URL, e.g. `wss://.../ws/btcusdt@kline_1m`.
pub fn kline_stream_url(base: &str, symbol: &str, interval: &str) -> String {
    let lower = symbol.to_lowercase();
    format!("{}/{lower}@kline_{interval}", base.trim_end_matches('/'))
}

/// Parse a kline event.
///
/// Accepts the single-stream payload and the combined-stream envelope:
/// ```json
/// { "e": "kline", "s": "BTCUSDT", "k": { ... } }
/// { "stream": "btcusdt@kline_1m", "data": { "e": "kline", "s": "BTCUSDT", "k": { ... } } }
/// ```
pub fn parse_kline_message(text: &str) -> Result<Candle> {
    let root: serde_json::Value =
        serde_json::from_str(text).context("failed to parse kline JSON")?;

    let data = if root.get("data").is_some() {
        &root["data"]
    } else {
        &root
    };

    let k = data.get("k").context("missing field k")?;

    let open_time = k["t"].as_i64().context("missing field k.t")?;
    let close_time = k["T"].as_i64().context("missing field k.T")?;

    let open = parse_decimal(&k["o"], "k.o")?;
    let high = parse_decimal(&k["h"], "k.h")?;
    let low = parse_decimal(&k["l"], "k.l")?;
    let close = parse_decimal(&k["c"], "k.c")?;
    let volume = parse_decimal(&k["v"], "k.v")?;

    let is_closed = k["x"].as_bool().context("missing field k.x")?;

    Ok(Candle {
        open_time,
        close_time,
        open,
        high,
        low,
        close,
        volume,
        is_closed,
    })
}

/// Binance sends prices as JSON strings; plain numbers are accepted too.
pub(crate) fn parse_decimal(val: &serde_json::Value, name: &str) -> Result<Decimal> {
    match val {
        serde_json::Value::String(s) => Decimal::from_str(s)
            .with_context(|| format!("failed to parse {name} as decimal: {s}")),
        serde_json::Value::Number(n) => {
            let raw = n.to_string();
            Decimal::from_str(&raw)
                .or_else(|_| Decimal::from_scientific(&raw))
                .with_context(|| format!("field {name} is not a valid decimal: {n}"))
        }
        _ => anyhow::bail!("field {name} has unexpected JSON type"),
    }
}

// ---------------------------------------------------------------------------
// Kline WebSocket feed
// ---------------------------------------------------------------------------

enum PumpExit {
    /// Server closed the stream.
    Closed,
    /// Nobody is listening any more.
    ReceiverGone,
}

async fn connect(url: &str) -> Result<WsStream> {
    let (ws_stream, _response) = connect_async(url)
        .await
        .with_context(|| format!("failed to connect to kline WebSocket at {url}"))?;
    Ok(ws_stream)
}

/// Forward kline events from `ws` into `tx` until the connection ends.
async fn pump(mut ws: WsStream, tx: &mpsc::Sender<StreamEvent>) -> Result<PumpExit> {
    while let Some(msg) = ws.next().await {
        match msg.context("kline WebSocket read error")? {
            Message::Text(text) => match parse_kline_message(&text) {
                Ok(candle) => {
                    debug!(
                        open_time = candle.open_time,
                        close = %candle.close,
                        closed = candle.is_closed,
                        "candle update"
                    );
                    if tx.send(StreamEvent::Kline(candle)).await.is_err() {
                        return Ok(PumpExit::ReceiverGone);
                    }
                }
                Err(e) => {
                    warn!(error = %e, "failed to parse kline message");
                }
            },
            Message::Close(frame) => {
                debug!(?frame, "kline WebSocket close frame received");
                return Ok(PumpExit::Closed);
            }
            // Ping / Pong / Binary frames carry no klines; tungstenite
            // answers pings on its own.
            _ => {}
        }
    }
    Ok(PumpExit::Closed)
}

/// Open the kline stream and hand it to a background task that forwards
/// every event into `tx`.
///
/// The first connection is made before returning so that the caller can
/// report an unreachable endpoint and give up.  After that the task
/// reconnects on its own: each drop is reported as
/// [`StreamEvent::ConnectionClosed`] or [`StreamEvent::ConnectionLost`], and
/// each successful reconnect as [`StreamEvent::ConnectionRestored`].  The task
/// exits once the receiving side of `tx` is dropped.
pub async fn spawn_kline_feed(
    config: StreamConfig,
    tx: mpsc::Sender<StreamEvent>,
) -> Result<JoinHandle<()>> {
    let url = config.url();
    info!(url = %url, symbol = %config.symbol, interval = %config.interval, "connecting to kline WebSocket");

    let ws = connect(&url).await?;
    info!(symbol = %config.symbol, interval = %config.interval, "kline WebSocket connected");

    Ok(tokio::spawn(supervise(url, config.reconnect_delay, ws, tx)))
}

async fn supervise(
    url: String,
    reconnect_delay: Duration,
    mut ws: WsStream,
    tx: mpsc::Sender<StreamEvent>,
) {
    loop {
        let dropped = match pump(ws, &tx).await {
            Ok(PumpExit::ReceiverGone) => {
                debug!("kline event receiver dropped, stopping feed");
                return;
            }
            Ok(PumpExit::Closed) => {
                warn!(url = %url, "kline WebSocket stream ended");
                StreamEvent::ConnectionClosed
            }
            Err(e) => {
                error!(url = %url, error = %e, "kline WebSocket error");
                StreamEvent::ConnectionLost {
                    error: format!("{e:#}"),
                }
            }
        };
        if tx.send(dropped).await.is_err() {
            return;
        }

        ws = loop {
            tokio::time::sleep(reconnect_delay).await;
            if tx.is_closed() {
                return;
            }
            match connect(&url).await {
                Ok(ws) => break ws,
                Err(e) => {
                    warn!(
                        error = %e,
                        retry_in_ms = reconnect_delay.as_millis() as u64,
                        "kline reconnect failed"
                    );
                }
            }
        };

        info!(url = %url, "kline WebSocket reconnected");
        if tx.send(StreamEvent::ConnectionRestored).await.is_err() {
            return;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
