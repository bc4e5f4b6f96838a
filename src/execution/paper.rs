//! Simulated broker over a replayed bar series
//!
//! Every `recent_bars` call reveals one more bar, so one tick consumes one
//! bar. Orders fill immediately at the latest revealed close.

use anyhow::{bail, Result};
use async_trait::async_trait;
use tracing::{debug, info};

use super::{Executor, Position};
use crate::trading_core::candles::Bar;
use crate::trading_core::trades::Side;

#[derive(Debug)]
pub struct PaperBroker {
    symbol: String,
    bars: Vec<Bar>,
    /// Number of bars revealed so far
    cursor: usize,
    cash: f64,
    quantity: u32,
    avg_entry_price: f64,
}

impl PaperBroker {
    pub fn new(symbol: &str, bars: Vec<Bar>, starting_cash: f64) -> Self {
        Self {
            symbol: symbol.to_string(),
            bars,
            cursor: 0,
            cash: starting_cash,
            quantity: 0,
            avg_entry_price: 0.0,
        }
    }

    /// Reveal the first `count` bars up front so the first fetch already has history
    pub fn preload(mut self, count: usize) -> Self {
        self.cursor = count.min(self.bars.len());
        self
    }

    pub fn quantity(&self) -> u32 {
        self.quantity
    }

    fn last_price(&self) -> Option<f64> {
        self.cursor
            .checked_sub(1)
            .and_then(|i| self.bars.get(i))
            .map(|b| b.close)
    }

    /// Latest revealed close that is a usable price
    fn mark_price(&self) -> Option<f64> {
        self.bars[..self.cursor]
            .iter()
            .rev()
            .map(|b| b.close)
            .find(|c| c.is_finite() && *c > 0.0)
    }

    fn fill_price(&self) -> Result<f64> {
        match self.last_price() {
            Some(price) if price.is_finite() && price > 0.0 => Ok(price),
            Some(price) => bail!("No usable price to fill at ({})", price),
            None => bail!("No market data revealed yet"),
        }
    }

    fn check_symbol(&self, symbol: &str) -> Result<()> {
        if symbol != self.symbol {
            bail!("Paper broker only trades {}, got {}", self.symbol, symbol);
        }
        Ok(())
    }
}

#[async_trait]
impl Executor for PaperBroker {
    async fn submit_market_order(&mut self, symbol: &str, quantity: u32, side: Side) -> Result<()> {
        self.check_symbol(symbol)?;
        let price = self.fill_price()?;
        let notional = quantity as f64 * price;

        match side {
            Side::Buy => {
                if notional > self.cash {
                    bail!(
                        "Insufficient cash: need {:.2}, have {:.2}",
                        notional,
                        self.cash
                    );
                }
                let held = self.quantity as f64 * self.avg_entry_price;
                self.quantity += quantity;
                self.avg_entry_price = (held + notional) / self.quantity as f64;
                self.cash -= notional;
            }
            Side::Sell => {
                if quantity > self.quantity {
                    bail!("Cannot sell {} {}, holding {}", quantity, symbol, self.quantity);
                }
                self.quantity -= quantity;
                self.cash += notional;
                if self.quantity == 0 {
                    self.avg_entry_price = 0.0;
                }
            }
        }

        info!("PAPER FILL: {} {} {} @ {:.2}", side, quantity, symbol, price);
        Ok(())
    }

    async fn position(&self, symbol: &str) -> Result<Option<Position>> {
        self.check_symbol(symbol)?;
        if self.quantity == 0 {
            return Ok(None);
        }
        Ok(Some(Position {
            symbol: self.symbol.clone(),
            quantity: self.quantity,
            avg_entry_price: self.avg_entry_price,
        }))
    }

    async fn portfolio_value(&self) -> Result<f64> {
        let mark = self.mark_price().unwrap_or(self.avg_entry_price);
        Ok(self.cash + self.quantity as f64 * mark)
    }

    async fn cash(&self) -> Result<f64> {
        Ok(self.cash)
    }

    async fn liquidate_all(&mut self) -> Result<()> {
        if self.quantity > 0 {
            let symbol = self.symbol.clone();
            let quantity = self.quantity;
            self.submit_market_order(&symbol, quantity, Side::Sell).await?;
        }
        Ok(())
    }

    async fn recent_bars(&mut self, symbol: &str, count: usize) -> Result<Vec<Bar>> {
        self.check_symbol(symbol)?;
        if self.cursor < self.bars.len() {
            self.cursor += 1;
        }
        let start = self.cursor.saturating_sub(count);
        debug!("Revealed {}/{} bars", self.cursor, self.bars.len());
        Ok(self.bars[start..self.cursor].to_vec())
    }

    fn is_exhausted(&self) -> bool {
        self.cursor >= self.bars.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn bars(closes: &[f64]) -> Vec<Bar> {
        closes
            .iter()
            .map(|c| Bar::new(Utc::now(), *c, c + 1.0, c - 1.0, *c))
            .collect()
    }

    #[tokio::test]
    async fn test_reveals_one_bar_per_fetch() {
        let mut broker = PaperBroker::new("SPY", bars(&[10.0, 11.0, 12.0, 13.0]), 1000.0).preload(2);

        let window = broker.recent_bars("SPY", 2).await.unwrap();
        assert_eq!(window.len(), 2);
        assert_eq!(window[1].close, 12.0);
        assert!(!broker.is_exhausted());

        let window = broker.recent_bars("SPY", 30).await.unwrap();
        assert_eq!(window.len(), 4);
        assert!(broker.is_exhausted());
    }

    #[tokio::test]
    async fn test_round_trip_cash() {
        let mut broker = PaperBroker::new("SPY", bars(&[10.0, 20.0]), 1000.0);
        broker.recent_bars("SPY", 1).await.unwrap();

        broker.submit_market_order("SPY", 10, Side::Buy).await.unwrap();
        assert_eq!(broker.cash().await.unwrap(), 900.0);
        let pos = broker.position("SPY").await.unwrap().unwrap();
        assert_eq!(pos.quantity, 10);
        assert_eq!(pos.avg_entry_price, 10.0);

        broker.recent_bars("SPY", 1).await.unwrap();
        assert_eq!(broker.portfolio_value().await.unwrap(), 1100.0);

        broker.liquidate_all().await.unwrap();
        assert!(broker.position("SPY").await.unwrap().is_none());
        assert_eq!(broker.cash().await.unwrap(), 1100.0);
    }

    #[tokio::test]
    async fn test_marks_at_last_usable_close() {
        let mut broker = PaperBroker::new("SPY", bars(&[10.0, f64::NAN]), 1000.0);
        broker.recent_bars("SPY", 1).await.unwrap();
        broker.submit_market_order("SPY", 10, Side::Buy).await.unwrap();

        broker.recent_bars("SPY", 2).await.unwrap();
        assert_eq!(broker.portfolio_value().await.unwrap(), 1000.0);
        // Fills still need the latest close
        assert!(broker.submit_market_order("SPY", 10, Side::Sell).await.is_err());
    }

    #[tokio::test]
    async fn test_rejects_bad_orders() {
        let mut broker = PaperBroker::new("SPY", bars(&[10.0]), 50.0);
        assert!(broker.submit_market_order("SPY", 1, Side::Buy).await.is_err());

        broker.recent_bars("SPY", 1).await.unwrap();
        let err = broker.submit_market_order("SPY", 10, Side::Buy).await.unwrap_err();
        assert!(err.to_string().contains("Insufficient cash"));
        assert!(broker.submit_market_order("SPY", 1, Side::Sell).await.is_err());
        assert!(broker.submit_market_order("QQQ", 1, Side::Buy).await.is_err());
    }
}
