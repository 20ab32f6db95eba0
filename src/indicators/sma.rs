// =============================================================================
// Simple Moving Average (SMA)
// =============================================================================
//
// Arithmetic mean of the most recent `period` inputs:
//   SMA_t = (x_{t-period+1} + ... + x_t) / period
//
// While the window is still filling, the output is the sentinel zero.  A
// legitimate average can also be zero, so callers that need to tell the two
// apart must check `is_ready()`.
//
// All arithmetic is done in `Decimal`, so repeated updates never drift.  No
// rounding is applied here; rounding for display is the caller's job.
// =============================================================================

use std::collections::VecDeque;

use rust_decimal::Decimal;

use super::{Indicator, IndicatorError};

/// Rolling arithmetic mean over a fixed-size FIFO window.
#[derive(Debug, Clone)]
pub struct SimpleMovingAverage {
    period: usize,
    window: VecDeque<Decimal>,
}

impl SimpleMovingAverage {
    /// Create an SMA over `period` inputs.
    ///
    /// # Errors
    /// `period <= 1` is rejected: a period of one is the identity and zero
    /// has no meaning.
    pub fn new(period: usize) -> Result<Self, IndicatorError> {
        if period <= 1 {
            return Err(IndicatorError::InvalidConfiguration {
                indicator: "SMA",
                period,
                reason: "the period must be greater than 1",
            });
        }

        Ok(Self {
            period,
            // One extra slot: the window briefly holds period + 1 values
            // between the push and the eviction.
            window: VecDeque::with_capacity(period + 1),
        })
    }

    pub fn period(&self) -> usize {
        self.period
    }

    /// Mean of the window.  The exact `sum / count` is used whenever the sum
    /// fits in a `Decimal`; otherwise each term is divided first and the
    /// partial means are added with saturation.
    fn mean(&self) -> Decimal {
        let count = Decimal::from(self.window.len());
        let exact = self
            .window
            .iter()
            .try_fold(Decimal::ZERO, |acc, v| acc.checked_add(*v))
            .and_then(|sum| sum.checked_div(count));

        match exact {
            Some(mean) => mean,
            None => self
                .window
                .iter()
                .fold(Decimal::ZERO, |acc, v| acc.saturating_add(*v / count)),
        }
    }
}

impl Indicator for SimpleMovingAverage {
    type Input = Decimal;
    type Output = Decimal;

    fn is_ready(&self) -> bool {
        self.window.len() == self.period
    }

    fn source(&self) -> Vec<Decimal> {
        self.window.iter().copied().collect()
    }

    fn compute_next_value(&mut self, input: Decimal) -> Decimal {
        self.window.push_back(input);
        if self.window.len() > self.period {
            self.window.pop_front();
        }

        if self.window.len() < self.period {
            return Decimal::ZERO;
        }

        self.mean()
    }

    fn reset(&mut self) {
        self.window.clear();
    }
}
