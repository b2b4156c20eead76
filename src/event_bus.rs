//! Broadcast channel for market transitions.
//!
//! Resources and actors publish a [`MarketEvent`] for every state change.
//! Nothing in the claim protocol reads these events; they exist for
//! observers and tests. Publishing without subscribers is a no-op.

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::trace;

use crate::types::{ActorId, ResourceId};

#[derive(Debug, Clone, PartialEq, strum::Display)]
pub enum MarketEventKind {
    ResourceCreated {
        resource_id: ResourceId,
    },
    ResourceOccupied {
        resource_id: ResourceId,
        actor_id: ActorId,
    },
    ResourceVacated {
        resource_id: ResourceId,
        previous: Option<ActorId>,
    },
    /// The resource task ended; its record and address are gone.
    ResourceRetired {
        resource_id: ResourceId,
    },
    ClaimRejected {
        resource_id: ResourceId,
        actor_id: ActorId,
        holder: ActorId,
    },
    ActorStarted {
        actor_id: ActorId,
    },
    ActorSwitched {
        actor_id: ActorId,
        from: ResourceId,
        to: ResourceId,
    },
    ActorExited {
        actor_id: ActorId,
        released: Option<ResourceId>,
    },
    ActorStopped {
        actor_id: ActorId,
        released: Option<ResourceId>,
    },
}

#[derive(Debug, Clone)]
pub struct MarketEvent {
    pub kind: MarketEventKind,
    pub timestamp: DateTime<Utc>,
}

impl From<MarketEventKind> for MarketEvent {
    fn from(kind: MarketEventKind) -> Self {
        Self {
            kind,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug)]
pub struct EventBus {
    event_sender: broadcast::Sender<MarketEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (event_sender, _) = broadcast::channel(capacity);
        Self { event_sender }
    }

    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver::new(self.event_sender.subscribe())
    }

    /// Returns the number of subscribers the event reached.
    pub fn publish(&self, kind: MarketEventKind) -> usize {
        let event = MarketEvent::from(kind);
        match self.event_sender.send(event) {
            Ok(delivered) => delivered,
            Err(broadcast::error::SendError(event)) => {
                trace!(event = %event.kind, "No subscribers for market event");
                0
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.event_sender.receiver_count()
    }
}

pub struct EventReceiver {
    receiver: broadcast::Receiver<MarketEvent>,
}

impl EventReceiver {
    fn new(receiver: broadcast::Receiver<MarketEvent>) -> Self {
        Self { receiver }
    }

    /// Receive the next event. A lagging receiver skips what it missed and
    /// keeps going from the oldest event still buffered.
    pub async fn recv(&mut self) -> Option<MarketEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "Event receiver lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Drain everything currently buffered without waiting.
    pub fn drain(&mut self) -> Vec<MarketEvent> {
        let mut events = vec![];
        loop {
            match self.receiver.try_recv() {
                Ok(event) => events.push(event),
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "Event receiver lagged");
                }
                Err(_) => break,
            }
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_basic_publish_subscribe() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        let delivered = bus.publish(MarketEventKind::ResourceCreated {
            resource_id: ResourceId::from("r1"),
        });
        assert_eq!(delivered, 1);

        let received = rx.recv().await.unwrap();
        assert_eq!(
            received.kind,
            MarketEventKind::ResourceCreated {
                resource_id: ResourceId::from("r1")
            }
        );
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let bus = EventBus::new(4);
        let delivered = bus.publish(MarketEventKind::ActorStarted {
            actor_id: ActorId::from("a1"),
        });
        assert_eq!(delivered, 0);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let bus = EventBus::new(16);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.publish(MarketEventKind::ActorStarted {
            actor_id: ActorId::from("a1"),
        });

        assert_eq!(rx1.recv().await.unwrap().kind.to_string(), "ActorStarted");
        assert_eq!(rx2.recv().await.unwrap().kind.to_string(), "ActorStarted");
    }

    #[tokio::test]
    async fn test_lagged_receiver_keeps_latest() {
        let bus = EventBus::new(2);
        let mut rx = bus.subscribe();
        for i in 0..5 {
            bus.publish(MarketEventKind::ResourceCreated {
                resource_id: ResourceId::from(format!("r{}", i)),
            });
        }
        let drained = rx.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(
            drained[1].kind,
            MarketEventKind::ResourceCreated {
                resource_id: ResourceId::from("r4")
            }
        );
    }
}
