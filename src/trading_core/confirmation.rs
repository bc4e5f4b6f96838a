//! Operator confirmation with default-deny timeout
//!
//! The gate owns the inbound message queue. A request publishes its signal on
//! the bus and then waits on the queue until a matching `trade_confirmation`
//! arrives or the deadline passes. Control messages that arrive while waiting
//! are parked and handed back to the orchestrator afterwards; confirmations
//! with no matching outstanding request are dropped.
//!
//! Request lifecycle: Open -> Confirmed | Denied | TimedOut. No retries.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::bus::SignalBus;
use crate::types::{ClientMessage, RequestKind, WsMessage};

/// Terminal result of one request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationOutcome {
    Confirmed,
    Denied,
    TimedOut,
}

impl ConfirmationOutcome {
    pub fn is_confirmed(self) -> bool {
        self == ConfirmationOutcome::Confirmed
    }
}

/// Inbound control command for the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    /// `None` keeps the current setting
    ToggleTrading { enabled: Option<bool> },
}

/// The one outstanding request
#[derive(Debug, Clone)]
pub struct ConfirmationRequest {
    pub id: Uuid,
    pub kind: RequestKind,
    pub signal: WsMessage,
    pub deadline: Instant,
}

impl ConfirmationRequest {
    fn accepts(&self, kind: Option<RequestKind>) -> bool {
        kind.map_or(true, |k| k == self.kind)
    }
}

pub struct ConfirmationGate {
    inbox: mpsc::UnboundedReceiver<ClientMessage>,
    parked: VecDeque<ClientMessage>,
    bus: SignalBus,
}

impl ConfirmationGate {
    pub fn new(bus: SignalBus, inbox: mpsc::UnboundedReceiver<ClientMessage>) -> Self {
        Self {
            inbox,
            parked: VecDeque::new(),
            bus,
        }
    }

    /// Create a gate together with the sender the transport pushes into
    pub fn channel(bus: SignalBus) -> (mpsc::UnboundedSender<ClientMessage>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self::new(bus, rx))
    }

    /// Pop at most one pending control command. Stale confirmations found on
    /// the way are dropped.
    pub fn next_control(&mut self) -> Option<ControlCommand> {
        loop {
            let msg = match self.parked.pop_front() {
                Some(msg) => msg,
                None => self.inbox.try_recv().ok()?,
            };
            match msg {
                ClientMessage::ToggleTrading { enabled } => {
                    return Some(ControlCommand::ToggleTrading { enabled });
                }
                ClientMessage::TradeConfirmation { confirmed, .. } => {
                    debug!("Ignoring confirmation ({}) with no outstanding request", confirmed);
                }
            }
        }
    }

    /// Drop confirmations queued before a request exists, parking control messages
    fn discard_stale(&mut self) {
        while let Ok(msg) = self.inbox.try_recv() {
            match msg {
                ClientMessage::TradeConfirmation { confirmed, .. } => {
                    debug!("Discarding stale confirmation ({})", confirmed);
                }
                other => self.parked.push_back(other),
            }
        }
    }

    /// Publish `signal` and wait up to `timeout` for a decision.
    ///
    /// Only the tick loop is suspended here; the transport keeps accepting
    /// messages into the queue.
    pub async fn request(
        &mut self,
        kind: RequestKind,
        signal: WsMessage,
        timeout: Duration,
    ) -> ConfirmationOutcome {
        self.discard_stale();

        let request = ConfirmationRequest {
            id: Uuid::new_v4(),
            kind,
            signal,
            deadline: Instant::now() + timeout,
        };

        info!(
            "Awaiting {} confirmation (request {}, timeout {:?})",
            kind, request.id, timeout
        );
        self.bus.publish(request.signal.clone());

        loop {
            match tokio::time::timeout_at(request.deadline, self.inbox.recv()).await {
                Ok(Some(ClientMessage::TradeConfirmation { confirmed, kind: reply_kind })) => {
                    if !request.accepts(reply_kind) {
                        debug!(
                            "Ignoring {:?} confirmation while {} request {} is open",
                            reply_kind, kind, request.id
                        );
                        continue;
                    }
                    let outcome = if confirmed {
                        ConfirmationOutcome::Confirmed
                    } else {
                        ConfirmationOutcome::Denied
                    };
                    info!("{} request {} resolved: {:?}", kind, request.id, outcome);
                    return outcome;
                }
                Ok(Some(other)) => self.parked.push_back(other),
                Ok(None) => {
                    // Transport is gone; nobody can answer before the deadline
                    tokio::time::sleep_until(request.deadline).await;
                    break;
                }
                Err(_) => break,
            }
        }

        warn!("{} confirmation timeout (request {})", kind, request.id);
        self.bus.publish(WsMessage::SignalTimeout {});
        ConfirmationOutcome::TimedOut
    }
}
