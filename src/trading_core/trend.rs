//! Moving-average trend filter
//!
//! Recomputed from the raw closes every tick; nothing is carried between calls.

use serde::{Deserialize, Serialize};

/// Trend reading for one tick
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrendState {
    /// Simple mean of the last `window` closes
    pub sma: f64,
    /// Latest close strictly above the mean
    pub uptrend: bool,
}

/// Simple moving average of the last `window` closes
pub fn sma(closes: &[f64], window: usize) -> Option<f64> {
    if window == 0 || closes.len() < window {
        return None;
    }
    let tail = &closes[closes.len() - window..];
    Some(tail.iter().sum::<f64>() / window as f64)
}

/// Evaluate the trend. `None` when fewer than `window` closes are available
/// or the window holds a non-finite close.
pub fn evaluate(closes: &[f64], window: usize) -> Option<TrendState> {
    let sma = sma(closes, window).filter(|m| m.is_finite())?;
    let last = *closes.last()?;
    Some(TrendState {
        sma,
        uptrend: last > sma,
    })
}

/// Latest close strictly above the mean of the last `window` closes
pub fn is_uptrend(closes: &[f64], window: usize) -> Option<bool> {
    evaluate(closes, window).map(|t| t.uptrend)
}
