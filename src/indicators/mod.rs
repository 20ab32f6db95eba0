// =============================================================================
// Streaming Indicators
// =============================================================================
//
// An indicator consumes one input at a time and produces one output per
// input.  Implementations keep their own bounded window of recent inputs and
// report readiness once that window is full.
//
// Indicators are plain mutable values: every mutation goes through `&mut self`
// and nothing inside them is synchronised.  Sharing one across tasks or threads
// requires an external lock (or, as the application does, a single consumer
// task that owns the indicator outright).
// =============================================================================

pub mod sma;

pub use sma::SimpleMovingAverage;

use thiserror::Error;

/// Errors raised while constructing an indicator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IndicatorError {
    #[error("invalid {indicator} configuration (period = {period}): {reason}")]
    InvalidConfiguration {
        indicator: &'static str,
        period: usize,
        reason: &'static str,
    },
}

/// Warm-up state of a windowed indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndicatorPhase {
    /// Fewer inputs than the period have been observed.
    Warming,
    /// The window is full; each input replaces the oldest one.
    Warm,
}

impl std::fmt::Display for IndicatorPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Warming => write!(f, "Warming"),
            Self::Warm => write!(f, "Warm"),
        }
    }
}

/// A streaming single-input / single-output transform.
///
/// `compute_next_value` must be called for every input, including during
/// warm-up, because it is the only way the window advances.  Outputs produced
/// before [`is_ready`](Indicator::is_ready) returns `true` are implementation
/// defined and are normally discarded by the caller.
pub trait Indicator {
    type Input: Clone;
    type Output;

    /// `true` once enough inputs have been observed to fill the window.
    fn is_ready(&self) -> bool;

    /// Snapshot of the current window, oldest first.  Mutating the returned
    /// vector has no effect on the indicator.
    fn source(&self) -> Vec<Self::Input>;

    /// Push one input through the indicator and return the new output.
    fn compute_next_value(&mut self, input: Self::Input) -> Self::Output;

    /// Drop every buffered input, returning to the initial unready state.
    fn reset(&mut self);

    /// `Warm` once [`is_ready`](Indicator::is_ready) holds, `Warming` before.
    fn phase(&self) -> IndicatorPhase {
        if self.is_ready() {
            IndicatorPhase::Warm
        } else {
            IndicatorPhase::Warming
        }
    }
}
