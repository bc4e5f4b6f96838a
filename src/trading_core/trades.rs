//! Trade log and run summary

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use tracing::info;

use crate::types::TradeExecuted;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// Build the record for one fill
pub fn trade_record(
    at: DateTime<Utc>,
    symbol: &str,
    side: Side,
    quantity: u32,
    price: f64,
    pl: Option<f64>,
) -> TradeExecuted {
    TradeExecuted {
        datetime: at.format("%Y-%m-%d %H:%M:%S").to_string(),
        symbol: symbol.to_string(),
        side: side.to_string(),
        quantity,
        price,
        total: quantity as f64 * price,
        pl,
    }
}

const HEADER: [&str; 7] = ["Datetime", "Symbol", "Side", "Quantity", "Price", "Total", "P/L"];

/// Appends one CSV row per fill
pub struct TradeLogger {
    writer: csv::Writer<Box<dyn Write + Send + Sync>>,
}

impl TradeLogger {
    /// Open `path` for appending, writing the header if the file is new or empty
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open trade log: {:?}", path))?;
        let is_empty = file.metadata()?.len() == 0;

        let mut logger = Self::from_writer(Box::new(file));
        if is_empty {
            logger.write_header()?;
        }
        info!("Trade logger initialized - logging to {:?}", path);
        Ok(logger)
    }

    /// Log into any writer; no header is written
    pub fn from_writer(writer: Box<dyn Write + Send + Sync>) -> Self {
        Self {
            writer: csv::WriterBuilder::new().has_headers(false).from_writer(writer),
        }
    }

    pub fn write_header(&mut self) -> Result<()> {
        self.writer.write_record(HEADER)?;
        self.writer.flush()?;
        Ok(())
    }

    pub fn log(&mut self, trade: &TradeExecuted) -> Result<()> {
        let quantity = trade.quantity.to_string();
        let price = format!("{:.2}", trade.price);
        let total = format!("{:.2}", trade.total);
        let pl = trade.pl.map(|pl| format!("{:.2}", pl)).unwrap_or_default();
        self.writer.write_record([
            trade.datetime.as_str(),
            trade.symbol.as_str(),
            trade.side.as_str(),
            quantity.as_str(),
            price.as_str(),
            total.as_str(),
            pl.as_str(),
        ])?;
        self.writer.flush()?;
        Ok(())
    }
}

/// End-of-run statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TradingSummary {
    pub fills: usize,
    pub round_trips: usize,
    pub wins: usize,
    pub losses: usize,
    pub realized_pl: f64,
    pub final_portfolio_value: f64,
    pub halted: bool,
}

impl TradingSummary {
    pub fn from_trades(trades: &[TradeExecuted], final_portfolio_value: f64, halted: bool) -> Self {
        let closed: Vec<f64> = trades.iter().filter_map(|t| t.pl).collect();
        Self {
            fills: trades.len(),
            round_trips: closed.len(),
            wins: closed.iter().filter(|pl| **pl > 0.0).count(),
            losses: closed.iter().filter(|pl| **pl < 0.0).count(),
            realized_pl: closed.iter().sum(),
            final_portfolio_value,
            halted,
        }
    }

    pub fn win_rate(&self) -> f64 {
        if self.round_trips == 0 {
            0.0
        } else {
            self.wins as f64 / self.round_trips as f64
        }
    }
}

impl std::fmt::Display for TradingSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Portfolio: ${:.2} | Realized P/L: ${:.2} | Round trips: {} | WR: {:.1}%{}",
            self.final_portfolio_value,
            self.realized_pl,
            self.round_trips,
            self.win_rate() * 100.0,
            if self.halted { " | HALTED" } else { "" }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::{Arc, Mutex};

    /// Writer that lets the test read back what was logged
    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_csv_rows() {
        let buf = SharedBuf::default();
        let mut logger = TradeLogger::from_writer(Box::new(buf.clone()));
        logger.write_header().unwrap();

        let at = Utc.with_ymd_and_hms(2025, 1, 2, 14, 45, 0).unwrap();
        logger.log(&trade_record(at, "SPY", Side::Buy, 3, 101.0, None)).unwrap();
        logger
            .log(&trade_record(at, "SPY", Side::Sell, 3, 99.555, Some(-4.335)))
            .unwrap();

        let text = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "Datetime,Symbol,Side,Quantity,Price,Total,P/L");
        assert_eq!(lines[1], "2025-01-02 14:45:00,SPY,BUY,3,101.00,303.00,");
        assert!(lines[2].starts_with("2025-01-02 14:45:00,SPY,SELL,3,99."));
        assert!(lines[2].ends_with(",-4.33") || lines[2].ends_with(",-4.34"));
    }

    #[test]
    fn test_summary() {
        let at = Utc.with_ymd_and_hms(2025, 1, 2, 14, 45, 0).unwrap();
        let trades = vec![
            trade_record(at, "SPY", Side::Buy, 1, 100.0, None),
            trade_record(at, "SPY", Side::Sell, 1, 110.0, Some(10.0)),
            trade_record(at, "SPY", Side::Buy, 1, 100.0, None),
            trade_record(at, "SPY", Side::Sell, 1, 95.0, Some(-5.0)),
        ];
        let summary = TradingSummary::from_trades(&trades, 10_005.0, false);
        assert_eq!(summary.fills, 4);
        assert_eq!(summary.round_trips, 2);
        assert_eq!(summary.wins, 1);
        assert_eq!(summary.losses, 1);
        assert_eq!(summary.realized_pl, 5.0);
        assert_eq!(summary.win_rate(), 0.5);
        assert!(summary.to_string().contains("WR: 50.0%"));
    }
}
