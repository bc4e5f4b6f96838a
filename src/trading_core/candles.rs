//! Bar and candle types for the signal engine
//!
//! A [`Bar`] is what the market-data source hands over. A [`Candle`] is a bar
//! stamped by the orchestrator with its per-tick sequence index.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Raised when a bar carries a field that is not a usable number
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum CandleError {
    #[error("{field} is not a finite number ({value})")]
    NonFinite { field: &'static str, value: f64 },
}

/// Unstamped OHLC bar from the market-data source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

impl Bar {
    pub fn new(timestamp: DateTime<Utc>, open: f64, high: f64, low: f64, close: f64) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
        }
    }
}

/// OHLC candle with the sequence index assigned for the tick it was seen on
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub sequence_index: i64,
    pub timestamp: DateTime<Utc>,
}

impl Candle {
    pub fn from_bar(bar: &Bar, sequence_index: i64) -> Self {
        Self {
            open: bar.open,
            high: bar.high,
            low: bar.low,
            close: bar.close,
            sequence_index,
            timestamp: bar.timestamp,
        }
    }

    /// Returns `(low, high)` if both ends of the range are usable
    pub fn range(&self) -> Result<(f64, f64), CandleError> {
        let low = finite("low", self.low)?;
        let high = finite("high", self.high)?;
        Ok((low, high))
    }

    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    pub fn body(&self) -> f64 {
        (self.close - self.open).abs()
    }

    pub fn upper_wick(&self) -> f64 {
        self.high - self.open.max(self.close)
    }

    pub fn lower_wick(&self) -> f64 {
        self.open.min(self.close) - self.low
    }

    /// Checks every OHLC field
    pub fn validate(&self) -> Result<(), CandleError> {
        finite("open", self.open)?;
        finite("high", self.high)?;
        finite("low", self.low)?;
        finite("close", self.close)?;
        Ok(())
    }
}

fn finite(field: &'static str, value: f64) -> Result<f64, CandleError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(CandleError::NonFinite { field, value })
    }
}
