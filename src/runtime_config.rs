// =============================================================================
// Runtime Configuration — what to watch and how to average it
// =============================================================================
//
// Every tunable lives here and is handed to the composition root in `main`.
// All fields carry `#[serde(default = ...)]` so a partial JSON file (or none
// at all) still yields a complete configuration.  Environment variables
// override the file.
//
// Persistence uses an atomic tmp + rename pattern to prevent corruption on
// crash.
//
// =============================================================================

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::market_data::StreamConfig;

/// Kline intervals accepted by Binance spot.
pub const SUPPORTED_INTERVALS: &[&str] = &[
    "1s", "1m", "3m", "5m", "15m", "30m", "1h", "2h", "4h", "6h", "8h", "12h", "1d", "3d",
    "1w", "1M",
];

/// Upper bound Binance enforces on `limit` for GET /api/v3/klines.
pub const MAX_KLINE_LIMIT: u32 = 1000;

pub const ENV_CONFIG_PATH: &str = "KSMA_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "ksma_config.json";

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_symbol() -> String {
    "BTCUSDT".to_string()
}

fn default_interval() -> String {
    "1m".to_string()
}

fn default_sma_period() -> usize {
    5
}

fn default_warmup_limit() -> u32 {
    MAX_KLINE_LIMIT
}

fn default_display_precision() -> u32 {
    2
}

fn default_rest_base_url() -> String {
    "https://api.binance.com".to_string()
}

fn default_ws_base_url() -> String {
    "wss://stream.binance.com:9443/ws".to_string()
}

fn default_reconnect_delay_secs() -> u64 {
    5
}

fn default_channel_capacity() -> usize {
    256
}

// =============================================================================
// RuntimeConfig
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    // --- Market -------------------------------------------------------------

    /// Spot symbol, upper-case (e.g. "BTCUSDT").
    #[serde(default = "default_symbol")]
    pub symbol: String,

    /// Kline interval, one of [`SUPPORTED_INTERVALS`].
    #[serde(default = "default_interval")]
    pub interval: String,

    // --- Indicator ----------------------------------------------------------

    /// SMA window length.  Must be greater than 1; checked when the indicator
    /// is built.
    #[serde(default = "default_sma_period")]
    pub sma_period: usize,

    /// Number of historical candles requested to warm the indicator up.
    #[serde(default = "default_warmup_limit")]
    pub warmup_limit: u32,

    /// Decimal places used when printing the average.
    #[serde(default = "default_display_precision")]
    pub display_precision: u32,

    // --- Endpoints ----------------------------------------------------------

    #[serde(default = "default_rest_base_url")]
    pub rest_base_url: String,

    #[serde(default = "default_ws_base_url")]
    pub ws_base_url: String,

    /// Pause between kline stream reconnect attempts.
    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,

    /// Capacity of the channel between the kline stream and the indicator.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            symbol: default_symbol(),
            interval: default_interval(),
            sma_period: default_sma_period(),
            warmup_limit: default_warmup_limit(),
            display_precision: default_display_precision(),
            rest_base_url: default_rest_base_url(),
            ws_base_url: default_ws_base_url(),
            reconnect_delay_secs: default_reconnect_delay_secs(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read runtime config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse runtime config from {}", path.display()))?;

        info!(
            path = %path.display(),
            symbol = %config.symbol,
            interval = %config.interval,
            sma_period = config.sma_period,
            "runtime config loaded"
        );

        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise runtime config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "runtime config saved (atomic)");
        Ok(())
    }

    /// Apply `KSMA_*` overrides read through `lookup` (normally
    /// `std::env::var(..).ok()`).  Numeric values that fail to parse are
    /// ignored with a warning.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(symbol) = lookup("KSMA_SYMBOL") {
            let symbol = symbol.trim().to_uppercase();
            if !symbol.is_empty() {
                self.symbol = symbol;
            }
        }
        if let Some(interval) = lookup("KSMA_INTERVAL") {
            let interval = interval.trim();
            if !interval.is_empty() {
                self.interval = interval.to_string();
            }
        }
        override_number(&lookup, "KSMA_PERIOD", &mut self.sma_period);
        override_number(&lookup, "KSMA_WARMUP_LIMIT", &mut self.warmup_limit);
        override_number(&lookup, "KSMA_PRECISION", &mut self.display_precision);
    }

    /// Check everything that can be checked without touching the network.
    pub fn validate(&self) -> Result<()> {
        if self.symbol.trim().is_empty() {
            anyhow::bail!("symbol must not be empty");
        }
        if !SUPPORTED_INTERVALS.contains(&self.interval.as_str()) {
            anyhow::bail!(
                "unsupported kline interval {:?} (expected one of {})",
                self.interval,
                SUPPORTED_INTERVALS.join(", ")
            );
        }
        if self.warmup_limit == 0 || self.warmup_limit > MAX_KLINE_LIMIT {
            anyhow::bail!(
                "warmup_limit must be between 1 and {MAX_KLINE_LIMIT}, got {}",
                self.warmup_limit
            );
        }
        if self.channel_capacity == 0 {
            anyhow::bail!("channel_capacity must be greater than 0");
        }
        if self.reconnect_delay_secs == 0 {
            anyhow::bail!("reconnect_delay_secs must be at least 1");
        }
        Ok(())
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    pub fn stream_config(&self) -> StreamConfig {
        StreamConfig {
            ws_base_url: self.ws_base_url.clone(),
            symbol: self.symbol.clone(),
            interval: self.interval.clone(),
            reconnect_delay: self.reconnect_delay(),
        }
    }
}

fn override_number<F, T>(lookup: &F, key: &str, slot: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    if let Some(raw) = lookup(key) {
        match raw.trim().parse::<T>() {
            Ok(v) => *slot = v,
            Err(_) => warn!(key, value = %raw, "ignoring unparsable override"),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn default_config_has_expected_values() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.symbol, "BTCUSDT");
        assert_eq!(cfg.interval, "1m");
        assert_eq!(cfg.sma_period, 5);
        assert_eq!(cfg.warmup_limit, 1000);
        assert_eq!(cfg.display_precision, 2);
        assert_eq!(cfg.reconnect_delay(), Duration::from_secs(5));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let cfg: RuntimeConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg, RuntimeConfig::default());
    }

    #[test]
    fn deserialise_partial_json_fills_defaults() {
        let json = r#"{ "symbol": "ETHUSDT", "sma_period": 20 }"#;
        let cfg: RuntimeConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.symbol, "ETHUSDT");
        assert_eq!(cfg.sma_period, 20);
        assert_eq!(cfg.interval, "1m");
        assert_eq!(cfg.warmup_limit, 1000);
    }

    #[test]
    fn negative_period_does_not_deserialise() {
        let json = r#"{ "sma_period": -3 }"#;
        assert!(serde_json::from_str::<RuntimeConfig>(json).is_err());
    }

    #[test]
    fn save_then_load() {
        let dir = std::env::temp_dir().join(format!("ksma-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.json");

        let mut cfg = RuntimeConfig::default();
        cfg.symbol = "SOLUSDT".into();
        cfg.interval = "15m".into();
        cfg.save(&path).unwrap();

        let loaded = RuntimeConfig::load(&path).unwrap();
        assert_eq!(loaded, cfg);
        assert!(!path.with_extension("json.tmp").exists());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn load_missing_file_errors() {
        let path = std::env::temp_dir().join("ksma-definitely-missing.json");
        assert!(RuntimeConfig::load(path).is_err());
    }

    #[test]
    fn overrides_replace_file_values() {
        let mut cfg = RuntimeConfig::default();
        cfg.apply_overrides(env(&[
            ("KSMA_SYMBOL", " ethusdt "),
            ("KSMA_INTERVAL", "5m"),
            ("KSMA_PERIOD", "21"),
            ("KSMA_WARMUP_LIMIT", "500"),
            ("KSMA_PRECISION", "4"),
        ]));
        assert_eq!(cfg.symbol, "ETHUSDT");
        assert_eq!(cfg.interval, "5m");
        assert_eq!(cfg.sma_period, 21);
        assert_eq!(cfg.warmup_limit, 500);
        assert_eq!(cfg.display_precision, 4);
    }

    #[test]
    fn bad_numeric_override_is_ignored() {
        let mut cfg = RuntimeConfig::default();
        cfg.apply_overrides(env(&[("KSMA_PERIOD", "five"), ("KSMA_SYMBOL", "  ")]));
        assert_eq!(cfg.sma_period, 5);
        assert_eq!(cfg.symbol, "BTCUSDT");
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut cfg = RuntimeConfig::default();
        cfg.interval = "7m".into();
        assert!(cfg.validate().is_err());

        let mut cfg = RuntimeConfig::default();
        cfg.warmup_limit = 0;
        assert!(cfg.validate().is_err());
        cfg.warmup_limit = 1001;
        assert!(cfg.validate().is_err());

        let mut cfg = RuntimeConfig::default();
        cfg.symbol = String::new();
        assert!(cfg.validate().is_err());

        let mut cfg = RuntimeConfig::default();
        cfg.channel_capacity = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = RuntimeConfig::default();
        cfg.reconnect_delay_secs = 0;
        assert!(cfg.validate().is_err());
        cfg.reconnect_delay_secs = 1;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn stream_config_carries_market_and_delay() {
        let mut cfg = RuntimeConfig::default();
        cfg.reconnect_delay_secs = 2;
        let sc = cfg.stream_config();
        assert_eq!(sc.url(), "wss://stream.binance.com:9443/ws/btcusdt@kline_1m");
        assert_eq!(sc.reconnect_delay, Duration::from_secs(2));
    }
}
