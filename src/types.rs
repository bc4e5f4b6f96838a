use serde::{Deserialize, Serialize};

use crate::trading_core::gaps::Gap;

/// One open gap as shown to observers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GapSnapshot {
    pub low: f64,
    pub high: f64,
    pub age: u32,
    pub candle1_index: i64,
    pub candle3_index: i64,
}

impl From<&Gap> for GapSnapshot {
    fn from(gap: &Gap) -> Self {
        Self {
            low: gap.low,
            high: gap.high,
            age: gap.age,
            candle1_index: gap.origin_index_low,
            candle3_index: gap.origin_index_high,
        }
    }
}

/// Persisted/broadcast record of a single fill
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeExecuted {
    pub datetime: String,
    pub symbol: String,
    pub side: String,
    pub quantity: u32,
    pub price: f64,
    pub total: f64,
    /// Realized P/L, absent on entries
    pub pl: Option<f64>,
}

/// Engine → observer events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum WsMessage {
    CandleUpdate {
        time: String,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        #[serde(rename = "index")]
        sequence_index: i64,
    },
    FvgUpdate {
        bullish: Vec<GapSnapshot>,
        bearish: Vec<GapSnapshot>,
    },
    SmaUpdate {
        value: f64,
    },
    PortfolioUpdate {
        value: f64,
    },
    PositionUpdate {
        quantity: u32,
        entry_price: Option<f64>,
    },
    EntrySignal {
        symbol: String,
        price: f64,
        quantity: u32,
    },
    ExitSignal {
        symbol: String,
        price: f64,
        quantity: u32,
        pl: f64,
        pl_pct: f64,
    },
    ContinueSignal {
        symbol: String,
        reason: String,
    },
    SignalTimeout {},
    TradeExecuted(TradeExecuted),
    TradingState {
        state: String,
        trading_enabled: bool,
    },
}

impl WsMessage {
    /// Wire tag, used for logging
    pub fn tag(&self) -> &'static str {
        match self {
            WsMessage::CandleUpdate { .. } => "candle_update",
            WsMessage::FvgUpdate { .. } => "fvg_update",
            WsMessage::SmaUpdate { .. } => "sma_update",
            WsMessage::PortfolioUpdate { .. } => "portfolio_update",
            WsMessage::PositionUpdate { .. } => "position_update",
            WsMessage::EntrySignal { .. } => "entry_signal",
            WsMessage::ExitSignal { .. } => "exit_signal",
            WsMessage::ContinueSignal { .. } => "continue_signal",
            WsMessage::SignalTimeout {} => "signal_timeout",
            WsMessage::TradeExecuted(_) => "trade_executed",
            WsMessage::TradingState { .. } => "trading_state",
        }
    }
}

/// Kind of decision a confirmation request asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    Entry,
    Exit,
    /// Keep trading after a stop-loss exit
    Continue,
}

impl std::fmt::Display for RequestKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestKind::Entry => write!(f, "entry"),
            RequestKind::Exit => write!(f, "exit"),
            RequestKind::Continue => write!(f, "continue"),
        }
    }
}

/// Observer → engine messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ClientMessage {
    TradeConfirmation {
        #[serde(default)]
        confirmed: bool,
        /// When present the response only resolves a request of this kind
        #[serde(default)]
        kind: Option<RequestKind>,
    },
    ToggleTrading {
        #[serde(default)]
        enabled: Option<bool>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_outbound_shape() {
        let msg = WsMessage::CandleUpdate {
            time: "09:30:00".to_string(),
            open: 1.0,
            high: 2.0,
            low: 0.5,
            close: 1.5,
            sequence_index: 12,
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "candle_update");
        assert_eq!(value["payload"]["index"], 12);

        let timeout = serde_json::to_value(WsMessage::SignalTimeout {}).unwrap();
        assert_eq!(timeout, json!({"type": "signal_timeout", "payload": {}}));
    }

    #[test]
    fn test_entry_trade_has_null_pl() {
        let msg = WsMessage::TradeExecuted(TradeExecuted {
            datetime: "2025-01-02 09:45:00".to_string(),
            symbol: "SPY".to_string(),
            side: "BUY".to_string(),
            quantity: 3,
            price: 101.0,
            total: 303.0,
            pl: None,
        });
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "trade_executed");
        assert!(value["payload"]["pl"].is_null());
    }

    #[test]
    fn test_inbound_parsing() {
        let msg: ClientMessage = serde_json::from_str(
            r#"{"type":"trade_confirmation","payload":{"confirmed":true}}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            ClientMessage::TradeConfirmation { confirmed: true, kind: None }
        );

        // Missing field defaults to a denial
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"trade_confirmation","payload":{"kind":"exit"}}"#)
                .unwrap();
        assert_eq!(
            msg,
            ClientMessage::TradeConfirmation { confirmed: false, kind: Some(RequestKind::Exit) }
        );

        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"toggle_trading","payload":{"enabled":false}}"#)
                .unwrap();
        assert_eq!(msg, ClientMessage::ToggleTrading { enabled: Some(false) });

        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"bogus","payload":{}}"#).is_err());
    }
}
