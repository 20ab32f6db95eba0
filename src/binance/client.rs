// =============================================================================
// Binance REST API Client — public market data
// =============================================================================
//
// Only unauthenticated endpoints are used, so no API key or request signing is
// involved.  Every request carries a 10 s timeout.
// =============================================================================

use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use tracing::{debug, instrument, warn};

use crate::market_data::kline_stream::parse_decimal;
use crate::market_data::Candle;

/// Number of leading fields a kline row must carry (openTime .. closeTime).
const KLINE_MIN_FIELDS: usize = 7;

/// Binance REST API client for public market-data endpoints.
#[derive(Clone)]
pub struct BinanceClient {
    base_url: String,
    client: reqwest::Client,
}

impl BinanceClient {
    // -------------------------------------------------------------------------
    // Construction
    // -------------------------------------------------------------------------

    /// Create a client against `base_url` (e.g. `https://api.binance.com`).
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .context("failed to build reqwest client")?;

        debug!(base_url = %base_url, "BinanceClient initialised");

        Ok(Self { base_url, client })
    }

    /// Current UNIX timestamp in milliseconds.
    pub fn timestamp_ms() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0)
    }

    // -------------------------------------------------------------------------
    // Public market data
    // -------------------------------------------------------------------------

    /// GET /api/v3/klines (public — no signature required).
    ///
    /// Returns candles oldest-first.  The newest row is normally the candle
    /// still in progress; it comes back with `is_closed == false`.
    #[instrument(skip(self), name = "binance::get_klines")]
    pub async fn get_klines(
        &self,
        symbol: &str,
        interval: &str,
        limit: u32,
    ) -> Result<Vec<Candle>> {
        let url = format!(
            "{}/api/v3/klines?symbol={}&interval={}&limit={}",
            self.base_url, symbol, interval, limit
        );

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .context("GET /api/v3/klines request failed")?;

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .context("failed to parse klines response")?;

        if !status.is_success() {
            anyhow::bail!(
                "Binance GET /api/v3/klines returned {}: {}",
                status,
                body
            );
        }

        let candles = parse_klines(&body, Self::timestamp_ms())?;

        debug!(symbol, interval, count = candles.len(), "klines fetched");
        Ok(candles)
    }
}

/// Parse Binance's array-of-arrays kline response.
///
/// Array indices:
///   [0] openTime, [1] open, [2] high, [3] low, [4] close, [5] volume,
///   [6] closeTime, [7..] quote volume, trade count, taker volumes
///
/// A row counts as closed when its close time is before `now_ms`, except the
/// newest row: it may have been built while its candle was still open, so it
/// is always left unfinished and the live stream delivers its final version.
pub fn parse_klines(body: &serde_json::Value, now_ms: i64) -> Result<Vec<Candle>> {
    let raw = body
        .as_array()
        .context("klines response is not an array")?;

    let mut candles = Vec::with_capacity(raw.len());

    for entry in raw {
        let arr = entry
            .as_array()
            .context("kline entry is not an array")?;

        if arr.len() < KLINE_MIN_FIELDS {
            warn!("skipping malformed kline entry with {} elements", arr.len());
            continue;
        }

        let open_time = arr[0].as_i64().context("kline openTime is not an integer")?;
        let open = parse_decimal(&arr[1], "open")?;
        let high = parse_decimal(&arr[2], "high")?;
        let low = parse_decimal(&arr[3], "low")?;
        let close = parse_decimal(&arr[4], "close")?;
        let volume = parse_decimal(&arr[5], "volume")?;
        let close_time = arr[6].as_i64().context("kline closeTime is not an integer")?;

        candles.push(Candle {
            open_time,
            close_time,
            open,
            high,
            low,
            close,
            volume,
            is_closed: close_time < now_ms,
        });
    }

    if let Some(newest) = candles.last_mut() {
        newest.is_closed = false;
    }

    Ok(candles)
}

impl std::fmt::Debug for BinanceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinanceClient")
            .field("base_url", &self.base_url)
            .finish()
    }
}
