//! Outbound event bus for external collaborators
//!
//! Evolution/attribution, council, and chain integrations subscribe here.
//! Delivery is best-effort fan-out; a lagging subscriber never blocks the
//! core.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::types::{EpochShardReport, FillRecord, Tier};

/// Narrow message contract crossing the collaborator boundary.
/// No executable code, only data.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ArenaEvent {
    /// Every committed fill, for the attribution feed
    Fill(FillRecord),
    /// Epoch-end handoff to the evolution collaborator
    EpochReport(EpochShardReport),
    /// Promotion handoff to the chain collaborator
    Promotion {
        agent_id: String,
        epoch: u64,
        tier: Tier,
    },
    CouncilOpened { epoch: u64 },
    CouncilClosed { epoch: u64 },
}

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ArenaEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Fire-and-forget: an event with no subscribers is simply dropped
    pub fn publish(&self, event: ArenaEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ArenaEvent> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish(ArenaEvent::Promotion {
            agent_id: "a1".to_string(),
            epoch: 3,
            tier: Tier::Ascendant,
        });

        match rx.recv().await.unwrap() {
            ArenaEvent::Promotion { agent_id, epoch, tier } => {
                assert_eq!(agent_id, "a1");
                assert_eq!(epoch, 3);
                assert_eq!(tier, Tier::Ascendant);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn publish_without_subscribers_is_silent() {
        let bus = EventBus::new(4);
        bus.publish(ArenaEvent::CouncilOpened { epoch: 1 });
    }
}
