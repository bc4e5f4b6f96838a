//! Fair Value Gap tracking
//!
//! A gap is the untraded interval between candle 1 and candle 3 of a
//! three-candle window:
//! - Bullish: candle1.high < candle3.low, zone [candle1.high, candle3.low]
//! - Bearish: candle1.low > candle3.high, zone [candle3.high, candle1.low]
//!
//! Open gaps live until they are submerged by a later candle, consumed by a
//! trade, or grow older than the configured maximum age.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::candles::{Candle, CandleError};

/// Absolute tolerance used when comparing gap bounds for deduplication
pub const GAP_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GapKind {
    Bullish,
    Bearish,
}

impl std::fmt::Display for GapKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GapKind::Bullish => write!(f, "Bullish"),
            GapKind::Bearish => write!(f, "Bearish"),
        }
    }
}

/// An open fair value gap
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gap {
    pub kind: GapKind,
    pub low: f64,
    pub high: f64,
    /// Ticks survived since creation
    pub age: u32,
    /// Sequence index of candle 1
    pub origin_index_low: i64,
    /// Sequence index of candle 3
    pub origin_index_high: i64,
}

impl Gap {
    pub fn width(&self) -> f64 {
        self.high - self.low
    }

    /// Same kind and tolerance-equal bounds
    pub fn same_zone(&self, other: &Gap) -> bool {
        self.kind == other.kind
            && (self.low - other.low).abs() < GAP_TOLERANCE
            && (self.high - other.high).abs() < GAP_TOLERANCE
    }

    /// Candle range overlaps the zone. Malformed candles never touch.
    pub fn is_touched_by(&self, candle: &Candle) -> bool {
        if candle.validate().is_err() {
            return false;
        }
        match candle.range() {
            Ok((low, high)) => low <= self.high && high >= self.low,
            Err(_) => false,
        }
    }

    /// Candle range sits entirely within the zone bounds
    pub fn is_submerged_by(&self, candle: &Candle) -> bool {
        if candle.validate().is_err() {
            return false;
        }
        match candle.range() {
            Ok((low, high)) => high <= self.high && low >= self.low,
            Err(_) => false,
        }
    }
}

/// Detect a gap from the first and third candle of a window.
///
/// Every OHLC field of both candles must be finite. Width must be strictly greater than `min_gap_size`; zero-width or inverted
/// zones are never produced.
pub fn detect(first: &Candle, third: &Candle, min_gap_size: f64) -> Result<Option<Gap>, CandleError> {
    first.validate()?;
    third.validate()?;
    let (c1_low, c1_high) = first.range()?;
    let (c3_low, c3_high) = third.range()?;
    let floor = min_gap_size.max(0.0);

    if c1_high < c3_low && c3_low - c1_high > floor {
        return Ok(Some(Gap {
            kind: GapKind::Bullish,
            low: c1_high,
            high: c3_low,
            age: 0,
            origin_index_low: first.sequence_index,
            origin_index_high: third.sequence_index,
        }));
    }

    if c1_low > c3_high && c1_low - c3_high > floor {
        return Ok(Some(Gap {
            kind: GapKind::Bearish,
            low: c3_high,
            high: c1_low,
            age: 0,
            origin_index_low: first.sequence_index,
            origin_index_high: third.sequence_index,
        }));
    }

    Ok(None)
}

/// Remove every gap submerged by `latest`
pub fn invalidate(gaps: &mut Vec<Gap>, latest: &Candle) -> Vec<Gap> {
    let (removed, kept): (Vec<Gap>, Vec<Gap>) =
        gaps.drain(..).partition(|g| g.is_submerged_by(latest));
    *gaps = kept;
    removed
}

/// Increment every gap's age and remove those older than `max_age`
pub fn age_and_expire(gaps: &mut Vec<Gap>, max_age: u32) -> Vec<Gap> {
    for gap in gaps.iter_mut() {
        gap.age += 1;
    }
    let (removed, kept): (Vec<Gap>, Vec<Gap>) = gaps.drain(..).partition(|g| g.age > max_age);
    *gaps = kept;
    removed
}

/// Owns the open bullish and bearish gap lists, in creation order
#[derive(Debug, Clone, Default)]
pub struct GapTracker {
    bullish: Vec<Gap>,
    bearish: Vec<Gap>,
    min_gap_size: f64,
    max_age: u32,
}

impl GapTracker {
    pub fn new(min_gap_size: f64, max_age: u32) -> Self {
        Self {
            bullish: Vec::new(),
            bearish: Vec::new(),
            min_gap_size,
            max_age,
        }
    }

    pub fn bullish(&self) -> &[Gap] {
        &self.bullish
    }

    pub fn bearish(&self) -> &[Gap] {
        &self.bearish
    }

    pub fn len(&self) -> usize {
        self.bullish.len() + self.bearish.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn list_mut(&mut self, kind: GapKind) -> &mut Vec<Gap> {
        match kind {
            GapKind::Bullish => &mut self.bullish,
            GapKind::Bearish => &mut self.bearish,
        }
    }

    fn list(&self, kind: GapKind) -> &[Gap] {
        match kind {
            GapKind::Bullish => &self.bullish,
            GapKind::Bearish => &self.bearish,
        }
    }

    /// Append a gap unless an open one of the same kind has the same bounds
    pub fn insert(&mut self, gap: Gap) -> bool {
        let list = self.list_mut(gap.kind);
        if list.iter().any(|existing| existing.same_zone(&gap)) {
            debug!("Duplicate {} FVG {:.2}-{:.2} ignored", gap.kind, gap.low, gap.high);
            return false;
        }
        info!(
            "DETECTED {} FVG: {:.2} - {:.2} (width {:.2}, candle {} to {})",
            gap.kind,
            gap.low,
            gap.high,
            gap.width(),
            gap.origin_index_low,
            gap.origin_index_high
        );
        list.push(gap);
        true
    }

    /// Detect from the last three candles of `window` and record the gap if new.
    ///
    /// A malformed candle skips detection for this tick.
    pub fn scan_window(&mut self, window: &[Candle]) -> Option<Gap> {
        if window.len() < 3 {
            return None;
        }
        let first = &window[window.len() - 3];
        let third = &window[window.len() - 1];

        match detect(first, third, self.min_gap_size) {
            Ok(Some(gap)) => {
                if self.insert(gap.clone()) {
                    Some(gap)
                } else {
                    None
                }
            }
            Ok(None) => None,
            Err(e) => {
                warn!("Skipping FVG detection due to malformed candle data: {}", e);
                None
            }
        }
    }

    /// Drop every gap submerged by `latest`
    pub fn invalidate(&mut self, latest: &Candle) -> Vec<Gap> {
        let mut removed = invalidate(&mut self.bullish, latest);
        removed.extend(invalidate(&mut self.bearish, latest));
        for gap in &removed {
            info!("{} FVG fully submerged and removed: {:.2} - {:.2}", gap.kind, gap.low, gap.high);
        }
        removed
    }

    /// Age every open gap by one tick and expire the stale ones
    pub fn age_and_expire(&mut self) -> Vec<Gap> {
        let mut removed = age_and_expire(&mut self.bullish, self.max_age);
        removed.extend(age_and_expire(&mut self.bearish, self.max_age));
        for gap in &removed {
            info!("Removing aged {} FVG: {:.2}-{:.2}", gap.kind, gap.low, gap.high);
        }
        removed
    }

    /// Earliest-created gap of `kind` touched by `candle`
    pub fn first_touched(&self, kind: GapKind, candle: &Candle) -> Option<Gap> {
        self.list(kind).iter().find(|g| g.is_touched_by(candle)).cloned()
    }

    /// Remove the open gap matching `gap`'s zone
    pub fn consume(&mut self, gap: &Gap) -> bool {
        let list = self.list_mut(gap.kind);
        match list.iter().position(|g| g.same_zone(gap)) {
            Some(idx) => {
                list.remove(idx);
                true
            }
            None => false,
        }
    }
}
