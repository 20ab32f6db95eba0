pub mod kline_stream;

// Re-export the stream types for convenient access (e.g. `use crate::market_data::Candle`).
pub use kline_stream::{spawn_kline_feed, Candle, StreamConfig, StreamEvent};
