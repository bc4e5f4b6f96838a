//! Trading Orchestrator
//!
//! Sequences the gap tracker, trend filter, risk checks and confirmation gate
//! once per tick and turns accepted decisions into executor orders. Ticks run
//! strictly one after another; the only suspension point inside a tick is the
//! confirmation wait.
//!
//! The orchestrator exclusively owns the gap lists and risk bookkeeping.
//! Observers only ever see published snapshots.

use anyhow::Result;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::bus::SignalBus;
use super::candles::Candle;
use super::config::{position_size, DeclinePolicy, EngineConfig};
use super::confirmation::{ConfirmationGate, ConfirmationOutcome, ControlCommand};
use super::gaps::{Gap, GapKind, GapTracker};
use super::risk::{check_emergency, check_stop_loss, RiskState};
use super::trades::{trade_record, Side, TradeLogger, TradingSummary};
use super::trend;
use crate::execution::{Executor, Position};
use crate::types::{ClientMessage, GapSnapshot, RequestKind, TradeExecuted, WsMessage};

/// Engine lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// No position, nothing pending
    Idle,
    /// Evaluating gaps against the trend
    Scanning,
    PendingEntryConfirm,
    PositionOpen,
    PendingExitConfirm,
    /// Forced close after the stop was hit
    StopLossExit,
    /// Emergency drawdown; terminal for the run
    Halted,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineState::Idle => write!(f, "idle"),
            EngineState::Scanning => write!(f, "scanning"),
            EngineState::PendingEntryConfirm => write!(f, "pending_entry_confirm"),
            EngineState::PositionOpen => write!(f, "position_open"),
            EngineState::PendingExitConfirm => write!(f, "pending_exit_confirm"),
            EngineState::StopLossExit => write!(f, "stop_loss_exit"),
            EngineState::Halted => write!(f, "halted"),
        }
    }
}

/// What a single tick did
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    Paused,
    Halted,
    /// Fewer than three bars available
    InsufficientData,
    /// Not enough closes for the trend mean yet
    WarmingUp,
    /// Current candle has a non-finite field; no detection or orders
    MalformedCandle,
    EmergencyExit,
    StopLossExit { continue_trading: bool },
    Entered { gap: Gap, quantity: u32, price: f64 },
    EntryDeclined { gap: Gap, outcome: ConfirmationOutcome },
    Exited { gap: Gap, quantity: u32, price: f64, pl: f64 },
    ExitDeclined { gap: Gap, outcome: ConfirmationOutcome },
    NoAction,
}

pub struct TradingOrchestrator<E: Executor> {
    config: EngineConfig,
    executor: E,
    gaps: GapTracker,
    risk: RiskState,
    gate: ConfirmationGate,
    bus: SignalBus,
    logger: Option<TradeLogger>,
    trades: Vec<TradeExecuted>,
    state: EngineState,
    trading_enabled: bool,
    candle_counter: i64,
}

impl<E: Executor> TradingOrchestrator<E> {
    pub fn new(
        config: EngineConfig,
        executor: E,
        bus: SignalBus,
        inbox: mpsc::UnboundedReceiver<ClientMessage>,
    ) -> Self {
        Self {
            gaps: GapTracker::new(config.min_gap_size, config.max_fvg_age),
            gate: ConfirmationGate::new(bus.clone(), inbox),
            config,
            executor,
            risk: RiskState::default(),
            bus,
            logger: None,
            trades: Vec::new(),
            state: EngineState::Idle,
            trading_enabled: true,
            candle_counter: 0,
        }
    }

    pub fn with_trade_logger(mut self, logger: TradeLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn trading_enabled(&self) -> bool {
        self.trading_enabled
    }

    pub fn gaps(&self) -> &GapTracker {
        &self.gaps
    }

    pub fn risk(&self) -> &RiskState {
        &self.risk
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    pub fn bus(&self) -> &SignalBus {
        &self.bus
    }

    pub fn trades(&self) -> &[TradeExecuted] {
        &self.trades
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run one trading iteration
    pub async fn tick(&mut self) -> Result<TickOutcome> {
        if let Some(command) = self.gate.next_control() {
            self.apply_control(command);
        }
        if self.state == EngineState::Halted {
            debug!("Halted, ignoring tick");
            return Ok(TickOutcome::Halted);
        }
        if !self.trading_enabled {
            info!("Trading paused");
            return Ok(TickOutcome::Paused);
        }

        let symbol = self.config.symbol.clone();
        let bars = self
            .executor
            .recent_bars(&symbol, self.config.history_bars)
            .await?;
        if bars.len() < 3 {
            debug!("Only {} bars available, skipping tick", bars.len());
            return Ok(TickOutcome::InsufficientData);
        }

        self.candle_counter += 1;
        let newest = bars.len() as i64 - 1;
        let candles: Vec<Candle> = bars
            .iter()
            .enumerate()
            .map(|(i, bar)| Candle::from_bar(bar, self.candle_counter - (newest - i as i64)))
            .collect();
        let current = candles[candles.len() - 1];
        let last_price = current.close;

        info!(
            "Candle {}: O {:.2} H {:.2} L {:.2} C {:.2} | {} body {:.2} wicks {:.2}/{:.2}",
            current.sequence_index,
            current.open,
            current.high,
            current.low,
            current.close,
            if current.is_bullish() { "BULLISH" } else { "BEARISH" },
            current.body(),
            current.upper_wick(),
            current.lower_wick()
        );
        self.bus.publish(WsMessage::CandleUpdate {
            time: current.timestamp.format("%H:%M:%S").to_string(),
            open: current.open,
            high: current.high,
            low: current.low,
            close: current.close,
            sequence_index: current.sequence_index,
        });

        let position = self.executor.position(&symbol).await?;
        let portfolio_value = self.executor.portfolio_value().await?;
        let high_water_mark = if portfolio_value.is_finite() {
            self.bus.publish(WsMessage::PortfolioUpdate {
                value: portfolio_value,
            });
            Some(self.risk.observe(portfolio_value))
        } else {
            warn!("Executor reported unusable portfolio value {}", portfolio_value);
            None
        };
        self.publish_position(position.as_ref().map_or(0, |p| p.quantity));

        // Nothing may be priced off a malformed candle
        if let Err(e) = current.validate() {
            warn!(
                "Candle {} malformed ({}), skipping detection and orders",
                current.sequence_index, e
            );
            self.gaps.age_and_expire();
            self.publish_gaps();
            return Ok(TickOutcome::MalformedCandle);
        }

        if let Some(open) = position.as_ref() {
            if let Some(high_water_mark) = high_water_mark {
                if check_emergency(
                    Some(open),
                    portfolio_value,
                    high_water_mark,
                    self.config.max_drawdown_pct,
                ) {
                    warn!(
                        "EMERGENCY: max drawdown breached | Portfolio ${:.2} vs HWM ${:.2}",
                        portfolio_value, high_water_mark
                    );
                    self.emergency_exit(open, &current).await?;
                    return Ok(TickOutcome::EmergencyExit);
                }
            }

            if check_stop_loss(
                Some(open),
                self.risk.entry_price,
                last_price,
                self.config.stop_loss_pct,
            ) {
                warn!("STOP LOSS at ${:.2}", last_price);
                let continue_trading = self.stop_loss_exit(open, &current).await?;
                return Ok(TickOutcome::StopLossExit { continue_trading });
            }

            if high_water_mark.is_some() {
                self.risk.ratchet(portfolio_value);
            }
        }

        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        if closes.len() < self.config.trend_window {
            debug!(
                "{} closes, need {} for trend",
                closes.len(),
                self.config.trend_window
            );
            return Ok(TickOutcome::WarmingUp);
        }
        let trend = trend::evaluate(&closes, self.config.trend_window);
        match trend {
            Some(trend) => {
                self.bus.publish(WsMessage::SmaUpdate { value: trend.sma });
            }
            None => warn!("Trend window holds a non-finite close, no entries this tick"),
        }

        self.gaps.scan_window(&candles);
        self.gaps.invalidate(&current);
        self.publish_gaps();

        let outcome = match position {
            None => {
                self.set_state(EngineState::Scanning);
                if trend.is_some_and(|t| t.uptrend) {
                    self.try_entry(&current).await?
                } else {
                    TickOutcome::NoAction
                }
            }
            Some(open) => {
                self.set_state(EngineState::PositionOpen);
                self.try_exit(&open, &current).await?
            }
        };

        self.gaps.age_and_expire();
        Ok(outcome)
    }

    fn apply_control(&mut self, command: ControlCommand) {
        match command {
            ControlCommand::ToggleTrading { enabled } => {
                if self.state == EngineState::Halted {
                    warn!("Trading halted for this run, ignoring toggle");
                    return;
                }
                let enabled = enabled.unwrap_or(self.trading_enabled);
                if enabled != self.trading_enabled {
                    info!("Trading {}", if enabled { "resumed" } else { "paused" });
                }
                self.set_trading_enabled(enabled);
            }
        }
    }

    async fn try_entry(&mut self, candle: &Candle) -> Result<TickOutcome> {
        let Some(gap) = self.gaps.first_touched(GapKind::Bullish, candle) else {
            return Ok(TickOutcome::NoAction);
        };

        let price = candle.close;
        let cash = self.executor.cash().await?;
        let quantity = position_size(cash, self.config.cash_at_risk, price);
        info!(
            "ENTRY SIGNAL: bullish FVG {:.2}-{:.2} touched | {} @ {:.2}",
            gap.low, gap.high, quantity, price
        );

        let outcome = if self.config.require_entry_confirmation {
            self.set_state(EngineState::PendingEntryConfirm);
            let signal = WsMessage::EntrySignal {
                symbol: self.config.symbol.clone(),
                price,
                quantity,
            };
            self.gate
                .request(RequestKind::Entry, signal, self.config.confirmation_timeout())
                .await
        } else {
            ConfirmationOutcome::Confirmed
        };

        if !outcome.is_confirmed() {
            info!("Entry not confirmed ({:?})", outcome);
            self.decline(&gap);
            self.set_state(EngineState::Scanning);
            return Ok(TickOutcome::EntryDeclined { gap, outcome });
        }

        let symbol = self.config.symbol.clone();
        self.executor
            .submit_market_order(&symbol, quantity, Side::Buy)
            .await?;
        let portfolio_value = self.executor.portfolio_value().await?;
        self.risk.open(price, portfolio_value);
        self.gaps.consume(&gap);

        info!("BUY {} {} @ {:.2}", quantity, symbol, price);
        self.record_trade(candle, Side::Buy, quantity, price, None);
        self.publish_position(quantity);
        self.publish_gaps();
        self.set_state(EngineState::PositionOpen);

        Ok(TickOutcome::Entered {
            gap,
            quantity,
            price,
        })
    }

    async fn try_exit(&mut self, position: &Position, candle: &Candle) -> Result<TickOutcome> {
        let Some(gap) = self.gaps.first_touched(GapKind::Bearish, candle) else {
            return Ok(TickOutcome::NoAction);
        };

        let price = candle.close;
        let quantity = position.quantity;
        let entry = self.entry_price(position);
        let pl = (price - entry) * quantity as f64;
        let pl_pct = if entry > 0.0 {
            (price - entry) / entry * 100.0
        } else {
            0.0
        };
        info!(
            "EXIT SIGNAL: bearish FVG {:.2}-{:.2} touched | P&L ${:.2} ({:.2}%)",
            gap.low, gap.high, pl, pl_pct
        );

        let outcome = if self.config.require_exit_confirmation {
            self.set_state(EngineState::PendingExitConfirm);
            let signal = WsMessage::ExitSignal {
                symbol: self.config.symbol.clone(),
                price,
                quantity,
                pl,
                pl_pct,
            };
            self.gate
                .request(RequestKind::Exit, signal, self.config.confirmation_timeout())
                .await
        } else {
            ConfirmationOutcome::Confirmed
        };

        if !outcome.is_confirmed() {
            info!("Exit not confirmed ({:?}), holding", outcome);
            self.decline(&gap);
            self.set_state(EngineState::PositionOpen);
            return Ok(TickOutcome::ExitDeclined { gap, outcome });
        }

        let symbol = self.config.symbol.clone();
        self.executor
            .submit_market_order(&symbol, quantity, Side::Sell)
            .await?;
        self.gaps.consume(&gap);

        info!("SELL {} {} @ {:.2} | P&L ${:.2}", quantity, symbol, price, pl);
        self.record_trade(candle, Side::Sell, quantity, price, Some(pl));
        self.risk.close();
        self.publish_position(0);
        self.publish_gaps();
        self.set_state(EngineState::Scanning);

        Ok(TickOutcome::Exited {
            gap,
            quantity,
            price,
            pl,
        })
    }

    /// Liquidate and latch the run into `Halted`
    async fn emergency_exit(&mut self, position: &Position, candle: &Candle) -> Result<()> {
        self.set_trading_enabled(false);
        self.set_state(EngineState::Halted);

        self.executor.liquidate_all().await?;

        let price = candle.close;
        let pl = (price - self.entry_price(position)) * position.quantity as f64;
        error!(
            "EMERGENCY LIQUIDATION: {} {} @ {:.2} | P&L ${:.2} | trading halted",
            position.quantity, position.symbol, price, pl
        );
        self.record_trade(candle, Side::Sell, position.quantity, price, Some(pl));
        self.risk.close();
        self.publish_position(0);
        Ok(())
    }

    /// Close at the stop; returns whether trading continues
    async fn stop_loss_exit(&mut self, position: &Position, candle: &Candle) -> Result<bool> {
        self.set_state(EngineState::StopLossExit);

        let symbol = self.config.symbol.clone();
        let price = candle.close;
        let quantity = position.quantity;
        self.executor
            .submit_market_order(&symbol, quantity, Side::Sell)
            .await?;

        let pl = (price - self.entry_price(position)) * quantity as f64;
        info!("STOP LOSS SELL {} {} @ {:.2} | P&L ${:.2}", quantity, symbol, price, pl);
        self.record_trade(candle, Side::Sell, quantity, price, Some(pl));
        self.risk.close();
        self.publish_position(0);

        if self.config.auto_continue_after_exit {
            self.set_state(EngineState::Scanning);
            return Ok(true);
        }

        let signal = WsMessage::ContinueSignal {
            symbol,
            reason: format!("Stop loss hit at {:.2}", price),
        };
        let outcome = self
            .gate
            .request(RequestKind::Continue, signal, self.config.confirmation_timeout())
            .await;

        if outcome.is_confirmed() {
            self.set_state(EngineState::Scanning);
            Ok(true)
        } else {
            info!("Not continuing after stop loss ({:?}), pausing", outcome);
            self.set_trading_enabled(false);
            self.set_state(EngineState::Idle);
            Ok(false)
        }
    }

    fn decline(&mut self, gap: &Gap) {
        if self.config.decline_policy == DeclinePolicy::Discard {
            debug!("Discarding declined {} FVG {:.2}-{:.2}", gap.kind, gap.low, gap.high);
            self.gaps.consume(gap);
            self.publish_gaps();
        }
    }

    fn entry_price(&self, position: &Position) -> f64 {
        self.risk.entry_price.unwrap_or(position.avg_entry_price)
    }

    fn record_trade(
        &mut self,
        candle: &Candle,
        side: Side,
        quantity: u32,
        price: f64,
        pl: Option<f64>,
    ) {
        let trade = trade_record(candle.timestamp, &self.config.symbol, side, quantity, price, pl);
        if let Some(logger) = self.logger.as_mut() {
            if let Err(e) = logger.log(&trade) {
                warn!("Failed to write trade log: {:#}", e);
            }
        }
        self.trades.push(trade.clone());
        self.bus.publish(WsMessage::TradeExecuted(trade));
    }

    fn publish_position(&self, quantity: u32) {
        self.bus.publish(WsMessage::PositionUpdate {
            quantity,
            entry_price: self.risk.entry_price,
        });
    }

    fn publish_gaps(&self) {
        self.bus.publish(WsMessage::FvgUpdate {
            bullish: self.gaps.bullish().iter().map(GapSnapshot::from).collect(),
            bearish: self.gaps.bearish().iter().map(GapSnapshot::from).collect(),
        });
    }

    fn set_state(&mut self, state: EngineState) {
        if self.state != state {
            debug!("STATE: {} -> {}", self.state, state);
            self.state = state;
            self.publish_state();
        }
    }

    fn set_trading_enabled(&mut self, enabled: bool) {
        if self.trading_enabled != enabled {
            self.trading_enabled = enabled;
            self.publish_state();
        }
    }

    fn publish_state(&self) {
        self.bus.publish(WsMessage::TradingState {
            state: self.state.to_string(),
            trading_enabled: self.trading_enabled,
        });
    }

    /// Paced loop: one tick per configured interval until the data source is
    /// exhausted or the run halts
    pub async fn run(&mut self) -> Result<TradingSummary> {
        let period = self.config.tick_interval();
        info!("Starting {} engine, tick every {:?}", self.config.symbol, period);

        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            if self.step().await {
                break;
            }
        }

        self.summary().await
    }

    /// Back-to-back ticks with no pacing, for backtests
    pub async fn run_to_completion(&mut self) -> Result<TradingSummary> {
        while !self.step().await {}
        self.summary().await
    }

    /// One tick with error logging; returns true when the run should stop
    async fn step(&mut self) -> bool {
        match self.tick().await {
            Ok(outcome) => debug!("Tick {}: {:?}", self.candle_counter, outcome),
            Err(e) => error!("Tick failed: {:#}", e),
        }

        if self.state == EngineState::Halted {
            warn!("Engine halted, stopping run");
            return true;
        }
        if self.executor.is_exhausted() {
            info!("Market data exhausted after {} candles", self.candle_counter);
            return true;
        }
        false
    }

    pub async fn summary(&self) -> Result<TradingSummary> {
        let portfolio_value = self.executor.portfolio_value().await?;
        Ok(TradingSummary::from_trades(
            &self.trades,
            portfolio_value,
            self.state == EngineState::Halted,
        ))
    }
}
