//! Configuration for the signal engine

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// What happens to a touched gap when its entry/exit is not confirmed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeclinePolicy {
    /// Keep the gap so a later tick can match it again
    Retain,
    /// Drop the gap together with the declined attempt
    Discard,
}

impl Default for DeclinePolicy {
    fn default() -> Self {
        Self::Retain
    }
}

/// Configuration for the trading orchestrator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Symbol to trade
    pub symbol: String,

    /// Fraction of available cash committed per entry
    pub cash_at_risk: f64,

    /// Stop loss as a fraction below the entry price
    pub stop_loss_pct: f64,

    /// Maximum fractional drop from the high-water mark before halting
    pub max_drawdown_pct: f64,

    /// Number of closes in the trend mean
    pub trend_window: usize,

    /// Ticks a gap may survive before it is expired
    pub max_fvg_age: u32,

    /// Gaps must be strictly wider than this
    pub min_gap_size: f64,

    /// Bars requested from the data source each tick
    pub history_bars: usize,

    /// Ask the operator before entering
    pub require_entry_confirmation: bool,

    /// Ask the operator before exiting on a bearish gap
    pub require_exit_confirmation: bool,

    /// Keep trading after a stop-loss exit without asking
    pub auto_continue_after_exit: bool,

    /// Milliseconds to wait for a confirmation before denying
    pub confirmation_timeout_ms: u64,

    /// Seconds between ticks in paced mode
    pub tick_interval_secs: u64,

    /// Gap handling after a declined entry/exit
    pub decline_policy: DeclinePolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            symbol: "SPY".to_string(),
            cash_at_risk: 0.5,
            stop_loss_pct: 0.02,
            max_drawdown_pct: 0.15,
            trend_window: 20,
            max_fvg_age: 8,
            min_gap_size: 0.0,
            history_bars: 30,
            require_entry_confirmation: true,
            require_exit_confirmation: true,
            auto_continue_after_exit: false,
            confirmation_timeout_ms: 60_000,
            tick_interval_secs: 15 * 60, // 15-minute bars
            decline_policy: DeclinePolicy::Retain,
        }
    }
}

impl EngineConfig {
    /// Unattended daily-bar backtest: nobody is there to confirm
    pub fn backtest() -> Self {
        Self {
            max_drawdown_pct: 0.10,
            history_bars: 25,
            require_entry_confirmation: false,
            require_exit_confirmation: false,
            auto_continue_after_exit: true,
            tick_interval_secs: 24 * 60 * 60,
            ..Default::default()
        }
    }

    /// Load from a JSON file; missing fields fall back to defaults
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.trend_window > 0, "trend_window must be positive");
        anyhow::ensure!(
            self.history_bars >= 3,
            "history_bars must cover the 3-candle gap window"
        );
        anyhow::ensure!(
            self.cash_at_risk > 0.0 && self.cash_at_risk <= 1.0,
            "cash_at_risk must be in (0, 1]"
        );
        anyhow::ensure!(
            (0.0..1.0).contains(&self.stop_loss_pct),
            "stop_loss_pct must be in [0, 1)"
        );
        anyhow::ensure!(
            (0.0..1.0).contains(&self.max_drawdown_pct),
            "max_drawdown_pct must be in [0, 1)"
        );
        anyhow::ensure!(self.tick_interval_secs > 0, "tick_interval_secs must be positive");
        Ok(())
    }

    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_millis(self.confirmation_timeout_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }
}

/// Shares to buy: `cash * cash_at_risk / price`, rounded, at least one
pub fn position_size(cash: f64, cash_at_risk: f64, price: f64) -> u32 {
    let raw = (cash * cash_at_risk / price).round();
    if raw.is_finite() {
        raw.max(1.0) as u32
    } else {
        1
    }
}
