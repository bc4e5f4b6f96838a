//! Execution backends
//!
//! The orchestrator only talks to the [`Executor`] capability set. The paper
//! broker in [`paper`] replays a bar series and fills at the latest close; a
//! live broker adapter implements the same trait.

mod paper;

pub use paper::PaperBroker;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::trading_core::candles::Bar;
use crate::trading_core::trades::Side;

/// Open position for one symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub quantity: u32,
    pub avg_entry_price: f64,
}

/// Broker + market-data capabilities the engine depends on
#[async_trait]
pub trait Executor: Send + Sync {
    /// Submit a market order
    async fn submit_market_order(&mut self, symbol: &str, quantity: u32, side: Side) -> Result<()>;

    /// Current position for `symbol`, `None` when flat
    async fn position(&self, symbol: &str) -> Result<Option<Position>>;

    /// Cash plus marked-to-market positions
    async fn portfolio_value(&self) -> Result<f64>;

    /// Cash available for new entries
    async fn cash(&self) -> Result<f64>;

    /// Close every open position at market
    async fn liquidate_all(&mut self) -> Result<()>;

    /// Most recent `count` bars, oldest first
    async fn recent_bars(&mut self, symbol: &str, count: usize) -> Result<Vec<Bar>>;

    /// True once the data source has nothing more to deliver
    fn is_exhausted(&self) -> bool {
        false
    }
}
