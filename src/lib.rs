// =============================================================================
// kline-sma — streaming indicators over Binance klines
// =============================================================================
//
// `indicators` holds the indicator contract and its implementations; the
// remaining modules are the exchange plumbing the binary wires together.
// =============================================================================

pub mod binance;
pub mod feed;
pub mod indicators;
pub mod market_data;
pub mod runtime_config;
