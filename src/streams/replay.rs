//! Historical bar loading for paper trading and backtests
//!
//! CSV with a header row: `timestamp,open,high,low,close`. Extra columns such
//! as volume are ignored.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::Deserialize;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use tracing::info;

use crate::trading_core::candles::Bar;

#[derive(Debug, Deserialize)]
struct CsvRow {
    #[serde(alias = "datetime", alias = "date", alias = "time")]
    timestamp: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
}

/// Load bars from a CSV file, oldest first
pub fn load_bars(path: &Path) -> Result<Vec<Bar>> {
    let file = File::open(path).with_context(|| format!("Failed to open bars file: {:?}", path))?;
    let bars = read_bars(BufReader::new(file))
        .with_context(|| format!("Failed to load bars from {:?}", path))?;
    info!("Loaded {} bars from {:?}", bars.len(), path);
    Ok(bars)
}

pub fn read_bars<R: Read>(reader: R) -> Result<Vec<Bar>> {
    let mut csv_reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);

    let mut bars = Vec::new();
    for (line, result) in csv_reader.deserialize().enumerate() {
        let row: CsvRow = result.with_context(|| format!("Failed to parse CSV row {}", line + 1))?;
        let timestamp = parse_timestamp(&row.timestamp)
            .with_context(|| format!("Failed to parse timestamp: {}", row.timestamp))?;
        bars.push(Bar::new(timestamp, row.open, row.high, row.low, row.close));
    }

    bars.sort_by_key(|b| b.timestamp);
    Ok(bars)
}

/// RFC 3339, `YYYY-MM-DD HH:MM:SS` (UTC) or a bare date
fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    if let Ok(ts) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Ok(ts.and_utc());
    }
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")?;
    date.and_hms_opt(0, 0, 0)
        .map(|ts| ts.and_utc())
        .context("Invalid midnight for date")
}
