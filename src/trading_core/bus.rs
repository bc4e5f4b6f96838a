//! Fan-out broadcaster for engine state
//!
//! Observers register a bounded queue. `publish` snapshots the registry under
//! a short read lock and then delivers with `try_send`, so a slow or vanished
//! observer never stalls the engine or other observers. Closed observers are
//! pruned on the next publish. There is no replay buffer.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::types::WsMessage;

const OBSERVER_CAPACITY: usize = 256;

/// Receiving end handed to an observer
pub struct Subscription {
    pub id: Uuid,
    pub rx: mpsc::Receiver<WsMessage>,
}

/// Clone-able handle to the shared observer registry
#[derive(Clone, Default)]
pub struct SignalBus {
    observers: Arc<RwLock<HashMap<Uuid, mpsc::Sender<WsMessage>>>>,
}

impl SignalBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new observer
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::channel(OBSERVER_CAPACITY);
        let id = Uuid::new_v4();
        match self.observers.write() {
            Ok(mut observers) => {
                observers.insert(id, tx);
                debug!("Observer {} subscribed ({} total)", id, observers.len());
            }
            Err(poisoned) => {
                poisoned.into_inner().insert(id, tx);
            }
        }
        Subscription { id, rx }
    }

    /// Remove an observer; unknown ids are ignored
    pub fn unsubscribe(&self, id: Uuid) {
        let removed = match self.observers.write() {
            Ok(mut observers) => observers.remove(&id).is_some(),
            Err(poisoned) => poisoned.into_inner().remove(&id).is_some(),
        };
        if removed {
            debug!("Observer {} unsubscribed", id);
        }
    }

    pub fn observer_count(&self) -> usize {
        match self.observers.read() {
            Ok(observers) => observers.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    /// Deliver `event` to every observer; returns how many accepted it
    pub fn publish(&self, event: WsMessage) -> usize {
        let snapshot: Vec<(Uuid, mpsc::Sender<WsMessage>)> = match self.observers.read() {
            Ok(observers) => observers.iter().map(|(id, tx)| (*id, tx.clone())).collect(),
            Err(poisoned) => poisoned
                .into_inner()
                .iter()
                .map(|(id, tx)| (*id, tx.clone()))
                .collect(),
        };

        let mut delivered = 0;
        let mut closed = Vec::new();
        for (id, tx) in snapshot {
            match tx.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!("Observer {} lagging, dropped {}", id, event.tag());
                }
                Err(TrySendError::Closed(_)) => closed.push(id),
            }
        }

        for id in closed {
            debug!("Observer {} gone, pruning", id);
            self.unsubscribe(id);
        }

        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fan_out_to_all_observers() {
        let bus = SignalBus::new();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        assert_eq!(bus.publish(WsMessage::SmaUpdate { value: 1.5 }), 2);
        assert_eq!(a.rx.recv().await.unwrap(), WsMessage::SmaUpdate { value: 1.5 });
        assert_eq!(b.rx.recv().await.unwrap(), WsMessage::SmaUpdate { value: 1.5 });
    }

    #[tokio::test]
    async fn test_no_observers_is_fine() {
        let bus = SignalBus::new();
        assert_eq!(bus.publish(WsMessage::SignalTimeout {}), 0);
    }

    #[tokio::test]
    async fn test_dead_observer_isolated() {
        let bus = SignalBus::new();
        let dead = bus.subscribe();
        let mut alive = bus.subscribe();
        drop(dead.rx);

        assert_eq!(bus.publish(WsMessage::PortfolioUpdate { value: 10.0 }), 1);
        assert_eq!(bus.observer_count(), 1);
        assert!(alive.rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_lagging_observer_does_not_block() {
        let bus = SignalBus::new();
        let _stuck = bus.subscribe();
        let mut reader = bus.subscribe();

        for i in 0..(OBSERVER_CAPACITY + 10) {
            bus.publish(WsMessage::SmaUpdate { value: i as f64 });
            reader.rx.recv().await.unwrap();
        }
        // Full observer is kept, just skipped
        assert_eq!(bus.observer_count(), 2);
    }

    #[tokio::test]
    async fn test_late_subscriber_sees_no_history() {
        let bus = SignalBus::new();
        bus.publish(WsMessage::SmaUpdate { value: 1.0 });
        let mut late = bus.subscribe();
        assert!(late.rx.try_recv().is_err());

        bus.unsubscribe(late.id);
        assert_eq!(bus.publish(WsMessage::SmaUpdate { value: 2.0 }), 0);
    }

    #[test]
    fn test_concurrent_subscribe_and_publish() {
        let bus = SignalBus::new();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let bus = bus.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        let sub = bus.subscribe();
                        bus.publish(WsMessage::SignalTimeout {});
                        bus.unsubscribe(sub.id);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(bus.observer_count(), 0);
    }
}
