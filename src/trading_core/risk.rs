//! Hard risk limits
//!
//! Both checks force an exit without asking for confirmation. Emergency
//! drawdown additionally halts trading for the rest of the run.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::execution::Position;

/// Portfolio value fell more than `max_drawdown_pct` below the high-water mark
pub fn check_emergency(
    position: Option<&Position>,
    portfolio_value: f64,
    high_water_mark: f64,
    max_drawdown_pct: f64,
) -> bool {
    position.is_some_and(|p| p.quantity > 0)
        && portfolio_value < high_water_mark * (1.0 - max_drawdown_pct)
}

/// Last price at or below the stop computed from the recorded entry price
pub fn check_stop_loss(
    position: Option<&Position>,
    entry_price: Option<f64>,
    last_price: f64,
    stop_loss_pct: f64,
) -> bool {
    match (position, entry_price) {
        (Some(p), Some(entry)) if p.quantity > 0 => last_price <= entry * (1.0 - stop_loss_pct),
        _ => false,
    }
}

/// Risk bookkeeping owned by the orchestrator
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RiskState {
    /// Highest portfolio value seen since the position opened
    pub max_equity: Option<f64>,
    /// Fill price of the open position
    pub entry_price: Option<f64>,
}

impl RiskState {
    /// Seed the high-water mark if it is unset; returns the current mark
    pub fn observe(&mut self, portfolio_value: f64) -> f64 {
        *self.max_equity.get_or_insert(portfolio_value)
    }

    /// Ratchet the high-water mark upward
    pub fn ratchet(&mut self, portfolio_value: f64) {
        let mark = self.max_equity.map_or(portfolio_value, |m| m.max(portfolio_value));
        if Some(mark) != self.max_equity {
            debug!("High-water mark raised to {:.2}", mark);
        }
        self.max_equity = Some(mark);
    }

    /// Record a fresh entry fill
    pub fn open(&mut self, entry_price: f64, portfolio_value: f64) {
        self.entry_price = Some(entry_price);
        self.ratchet(portfolio_value);
    }

    /// Forget the closed position
    pub fn close(&mut self) {
        self.entry_price = None;
        self.max_equity = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position(quantity: u32) -> Position {
        Position {
            symbol: "SPY".to_string(),
            quantity,
            avg_entry_price: 100.0,
        }
    }

    #[test]
    fn test_emergency_requires_position() {
        assert!(!check_emergency(None, 80.0, 100.0, 0.1));
        assert!(check_emergency(Some(&position(5)), 89.9, 100.0, 0.1));
        assert!(!check_emergency(Some(&position(5)), 90.5, 100.0, 0.1));
        assert!(!check_emergency(Some(&position(0)), 50.0, 100.0, 0.1));
    }

    #[test]
    fn test_stop_loss() {
        let pos = position(10);
        assert!(check_stop_loss(Some(&pos), Some(100.0), 97.99, 0.02));
        assert!(check_stop_loss(Some(&pos), Some(100.0), 97.0, 0.02));
        assert!(!check_stop_loss(Some(&pos), Some(100.0), 98.5, 0.02));
        assert!(!check_stop_loss(Some(&pos), None, 50.0, 0.02));
        assert!(!check_stop_loss(None, Some(100.0), 50.0, 0.02));
    }

    #[test]
    fn test_high_water_mark_only_rises() {
        let mut risk = RiskState::default();
        assert_eq!(risk.observe(1000.0), 1000.0);
        assert_eq!(risk.observe(1200.0), 1000.0);

        risk.ratchet(1100.0);
        assert_eq!(risk.max_equity, Some(1100.0));
        risk.ratchet(900.0);
        assert_eq!(risk.max_equity, Some(1100.0));

        risk.open(50.0, 1150.0);
        assert_eq!(risk.entry_price, Some(50.0));
        assert_eq!(risk.max_equity, Some(1150.0));

        risk.close();
        assert_eq!(risk.entry_price, None);
        assert_eq!(risk.max_equity, None);
    }
}
