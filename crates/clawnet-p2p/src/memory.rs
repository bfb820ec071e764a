//! In-memory transport for tests: every joined peer sees every publish from
//! the others, mirroring a fully-meshed gossipsub network.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use clawnet_core::error::ClawError;

use crate::gossip::{Gossip, GossipMessage};

#[derive(Default)]
pub struct MemoryHub {
    peers: Mutex<Vec<(String, mpsc::Sender<GossipMessage>)>>,
}

impl MemoryHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Join the hub as `peer_id`. Returns the publish handle and the inbound
    /// message stream for that peer.
    pub fn join(
        self: &Arc<Self>,
        peer_id: impl Into<String>,
    ) -> (Arc<MemoryGossip>, mpsc::Receiver<GossipMessage>) {
        let peer_id = peer_id.into();
        let (tx, rx) = mpsc::channel(256);
        self.peers
            .lock()
            .expect("hub lock poisoned")
            .push((peer_id.clone(), tx));
        let gossip = Arc::new(MemoryGossip { hub: Arc::clone(self), peer_id });
        (gossip, rx)
    }

    fn broadcast(&self, from: &str, message: GossipMessage) {
        let peers = self.peers.lock().expect("hub lock poisoned");
        for (peer_id, tx) in peers.iter() {
            // Gossipsub does not loop messages back to the publisher.
            if peer_id != from {
                let _ = tx.try_send(message.clone());
            }
        }
    }
}

pub struct MemoryGossip {
    hub: Arc<MemoryHub>,
    peer_id: String,
}

#[async_trait]
impl Gossip for MemoryGossip {
    fn local_peer_id(&self) -> String {
        self.peer_id.clone()
    }

    async fn publish(&self, topic: &str, data: Vec<u8>) -> Result<(), ClawError> {
        self.hub.broadcast(
            &self.peer_id,
            GossipMessage {
                topic: topic.to_string(),
                data,
                source: Some(self.peer_id.clone()),
            },
        );
        Ok(())
    }

    async fn dial(&self, _addr: &str) -> Result<(), ClawError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publishes_reach_other_peers_only() {
        let hub = MemoryHub::new();
        let (alice, mut alice_rx) = hub.join("alice");
        let (_bob, mut bob_rx) = hub.join("bob");

        alice.publish("/clawnet/1.0.0/events", b"hello".to_vec()).await.unwrap();

        let got = bob_rx.recv().await.unwrap();
        assert_eq!(got.data, b"hello");
        assert_eq!(got.source.as_deref(), Some("alice"));
        assert!(alice_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn publish_to_empty_hub_is_allowed() {
        let hub = MemoryHub::new();
        let (solo, _rx) = hub.join("solo");
        solo.publish("/clawnet/1.0.0/events", b"queued".to_vec()).await.unwrap();
    }
}
