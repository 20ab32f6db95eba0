// =============================================================================
// Indicator Feed — candles in, indicator readings out
// =============================================================================
//
// Owns one indicator and feeds it close prices: first the historical batch
// (outputs discarded), then every final live candle in delivery order.
// Unfinished candles never reach the indicator, and a candle at or before the
// last one already fed is dropped so that the history and the live stream can
// overlap without double counting.
// =============================================================================

use rust_decimal::{Decimal, RoundingStrategy};
use tracing::{debug, info};

use crate::indicators::Indicator;
use crate::market_data::Candle;

/// One indicator output, tagged with the candle that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorReading {
    pub open_time: i64,
    pub close: Decimal,
    pub value: Decimal,
    /// `false` while the indicator is still warming up, in which case `value`
    /// is the indicator's placeholder rather than a real output.
    pub ready: bool,
}

impl IndicatorReading {
    /// Format as `Time: <open time> | <label>: <value>`, rounding the value
    /// half away from zero to `precision` places.
    pub fn render(&self, label: &str, precision: u32) -> String {
        let value = self
            .value
            .round_dp_with_strategy(precision, RoundingStrategy::MidpointAwayFromZero);
        let time = match chrono::DateTime::from_timestamp_millis(self.open_time) {
            Some(ts) => ts.format("%Y-%m-%d %H:%M:%S").to_string(),
            None => self.open_time.to_string(),
        };
        format!("Time: {time} | {label}: {value:.precision$}", precision = precision as usize)
    }
}

/// Single-consumer driver for a decimal indicator.
pub struct IndicatorFeed<I> {
    indicator: I,
    last_open_time: Option<i64>,
}

impl<I> IndicatorFeed<I>
where
    I: Indicator<Input = Decimal, Output = Decimal>,
{
    pub fn new(indicator: I) -> Self {
        Self {
            indicator,
            last_open_time: None,
        }
    }

    pub fn indicator(&self) -> &I {
        &self.indicator
    }

    /// Open time of the most recent candle fed to the indicator.
    pub fn last_open_time(&self) -> Option<i64> {
        self.last_open_time
    }

    /// Push a historical batch through the indicator, skipping unfinished
    /// candles.  Returns how many candles were fed.
    pub fn warm_up(&mut self, candles: &[Candle]) -> usize {
        let mut fed = 0;
        for candle in candles {
            if self.accept(candle) {
                self.indicator.compute_next_value(candle.close);
                fed += 1;
            }
        }

        info!(
            fed,
            skipped = candles.len() - fed,
            ready = self.indicator.is_ready(),
            phase = %self.indicator.phase(),
            "indicator warm-up complete"
        );
        fed
    }

    /// Feed one live candle.  Returns `None` if the candle is still open or
    /// was already seen.
    pub fn on_candle(&mut self, candle: &Candle) -> Option<IndicatorReading> {
        if !self.accept(candle) {
            return None;
        }

        let value = self.indicator.compute_next_value(candle.close);
        Some(IndicatorReading {
            open_time: candle.open_time,
            close: candle.close,
            value,
            ready: self.indicator.is_ready(),
        })
    }

    /// Reset the indicator and forget the last seen candle.
    pub fn reset(&mut self) {
        self.indicator.reset();
        self.last_open_time = None;
    }

    fn accept(&mut self, candle: &Candle) -> bool {
        if !candle.is_closed {
            return false;
        }
        if let Some(last) = self.last_open_time {
            if candle.open_time <= last {
                debug!(
                    open_time = candle.open_time,
                    last_open_time = last,
                    "dropping candle already fed"
                );
                return false;
            }
        }
        self.last_open_time = Some(candle.open_time);
        true
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::binance::client::parse_klines;
    use crate::indicators::SimpleMovingAverage;
    use std::str::FromStr;

    fn candle(minute: i64, close: i64, is_closed: bool) -> Candle {
        let open_time = minute * 60_000;
        let close = Decimal::from(close);
        Candle {
            open_time,
            close_time: open_time + 59_999,
            open: close,
            high: close,
            low: close,
            close,
            volume: Decimal::ONE,
            is_closed,
        }
    }

    fn sma_feed(period: usize) -> IndicatorFeed<SimpleMovingAverage> {
        IndicatorFeed::new(SimpleMovingAverage::new(period).unwrap())
    }

    #[test]
    fn warm_up_skips_unfinished_tail() {
        let mut feed = sma_feed(3);
        let history = vec![
            candle(0, 1, true),
            candle(1, 2, true),
            candle(2, 3, true),
            candle(3, 99, false),
        ];
        assert_eq!(feed.warm_up(&history), 3);
        assert!(feed.indicator().is_ready());
        assert_eq!(feed.indicator().source(), vec![Decimal::from(1), Decimal::from(2), Decimal::from(3)]);
        assert_eq!(feed.last_open_time(), Some(2 * 60_000));
    }

    #[test]
    fn live_candles_continue_after_warm_up() {
        let mut feed = sma_feed(3);
        feed.warm_up(&[candle(0, 1, true), candle(1, 2, true), candle(2, 3, true)]);

        // In-progress update: ignored.
        assert!(feed.on_candle(&candle(3, 50, false)).is_none());

        let reading = feed.on_candle(&candle(3, 4, true)).unwrap();
        assert!(reading.ready);
        assert_eq!(reading.value, Decimal::from(3));
        assert_eq!(reading.close, Decimal::from(4));
        assert_eq!(reading.open_time, 3 * 60_000);
    }

    #[test]
    fn overlapping_candles_are_not_double_counted() {
        let mut feed = sma_feed(2);
        feed.warm_up(&[candle(0, 10, true), candle(1, 20, true)]);

        assert!(feed.on_candle(&candle(1, 20, true)).is_none());
        assert!(feed.on_candle(&candle(0, 10, true)).is_none());
        assert_eq!(feed.on_candle(&candle(2, 30, true)).unwrap().value, Decimal::from(25));
    }

    #[test]
    fn history_fetched_across_a_close_keeps_final_candle() {
        // Rows built while minute 1 was still open, parsed just after it
        // closed: the partial 99 must not reach the indicator.
        let body = serde_json::json!([
            [0, "10", "10", "10", "10", "1", 59_999],
            [60_000, "99", "99", "99", "99", "1", 119_999],
        ]);
        let history = parse_klines(&body, 120_050).unwrap();

        let mut feed = sma_feed(2);
        assert_eq!(feed.warm_up(&history), 1);
        assert_eq!(feed.indicator().source(), vec![Decimal::from(10)]);

        let reading = feed.on_candle(&candle(1, 100, true)).unwrap();
        assert!(reading.ready);
        assert_eq!(reading.value, Decimal::from(55));
        assert_eq!(feed.indicator().source(), vec![Decimal::from(10), Decimal::from(100)]);
    }

    #[test]
    fn non_final_update_of_fed_candle_is_ignored() {
        let mut feed = sma_feed(2);
        feed.warm_up(&[candle(0, 10, true), candle(1, 20, true)]);

        assert!(feed.on_candle(&candle(1, 70, false)).is_none());
        assert_eq!(feed.indicator().source(), vec![Decimal::from(10), Decimal::from(20)]);
        assert_eq!(feed.last_open_time(), Some(60_000));

        // A non-final update of the next candle does not advance the cursor.
        assert!(feed.on_candle(&candle(2, 70, false)).is_none());
        assert_eq!(feed.last_open_time(), Some(60_000));
        assert_eq!(feed.on_candle(&candle(2, 30, true)).unwrap().value, Decimal::from(25));
    }

    #[test]
    fn readings_during_warm_up_are_flagged() {
        let mut feed = sma_feed(3);
        let r1 = feed.on_candle(&candle(0, 5, true)).unwrap();
        let r2 = feed.on_candle(&candle(1, 5, true)).unwrap();
        let r3 = feed.on_candle(&candle(2, 5, true)).unwrap();
        assert!(!r1.ready && !r2.ready);
        assert_eq!(r1.value, Decimal::ZERO);
        assert!(r3.ready);
        assert_eq!(r3.value, Decimal::from(5));
    }

    #[test]
    fn reset_forgets_history() {
        let mut feed = sma_feed(2);
        feed.warm_up(&[candle(0, 1, true), candle(1, 3, true)]);
        feed.reset();
        assert!(!feed.indicator().is_ready());
        assert_eq!(feed.last_open_time(), None);
        // Earlier candles are accepted again.
        assert!(feed.on_candle(&candle(0, 1, true)).is_some());
    }

    #[test]
    fn render_rounds_half_away_from_zero() {
        let reading = IndicatorReading {
            open_time: 1_700_000_040_000,
            close: Decimal::from(1),
            value: Decimal::from_str("37020.125").unwrap(),
            ready: true,
        };
        assert_eq!(
            reading.render("MA(5)", 2),
            "Time: 2023-11-14 22:14:00 | MA(5): 37020.13"
        );
    }

    #[test]
    fn render_pads_to_precision() {
        let reading = IndicatorReading {
            open_time: 0,
            close: Decimal::from(1),
            value: Decimal::from(12),
            ready: true,
        };
        assert_eq!(reading.render("MA(5)", 2), "Time: 1970-01-01 00:00:00 | MA(5): 12.00");
        assert_eq!(reading.render("MA(5)", 4), "Time: 1970-01-01 00:00:00 | MA(5): 12.0000");
    }
}
