// Library crate - exports the signal engine, execution backends and transport

pub mod execution;
pub mod streams;
pub mod trading_core;
pub mod types;

// Re-export commonly used types
pub use execution::{Executor, PaperBroker, Position};
pub use trading_core::{EngineConfig, SignalBus, TradingOrchestrator};
pub use types::*;
