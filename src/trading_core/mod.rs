//! Trading Core - FVG signal engine
//!
//! This module contains the strategy components:
//! - Candle stamping and validation
//! - Fair value gap detection, invalidation and aging
//! - Trend filter (simple moving average)
//! - Drawdown and stop-loss risk checks
//! - Operator confirmation with timeout
//! - Observer fan-out
//! - Per-tick orchestration

pub mod bus;
pub mod candles;
pub mod config;
pub mod confirmation;
pub mod gaps;
pub mod orchestrator;
pub mod risk;
pub mod trades;
pub mod trend;

// Re-export commonly used types
pub use bus::{SignalBus, Subscription};
pub use candles::{Bar, Candle, CandleError};
pub use config::{position_size, DeclinePolicy, EngineConfig};
pub use confirmation::{ConfirmationGate, ConfirmationOutcome, ControlCommand};
pub use gaps::{Gap, GapKind, GapTracker};
pub use orchestrator::{EngineState, TickOutcome, TradingOrchestrator};
pub use risk::RiskState;
pub use trades::{Side, TradeLogger, TradingSummary};
pub use trend::TrendState;
