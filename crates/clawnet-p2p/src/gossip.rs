//! The transport capability the engine is written against.
//!
//! The concrete libp2p swarm is injected at node composition; tests use the
//! in-memory hub. Inbound traffic arrives over a channel rather than a
//! callback so subscription handlers are plain cancellable tasks.

use async_trait::async_trait;

use clawnet_core::error::ClawError;

/// One message received from a gossip topic.
#[derive(Clone, Debug)]
pub struct GossipMessage {
    pub topic: String,
    pub data: Vec<u8>,
    /// libp2p peer id of the propagating peer, when known.
    pub source: Option<String>,
}

/// Publish-side capabilities the engine needs from the transport.
#[async_trait]
pub trait Gossip: Send + Sync {
    /// base58 libp2p peer id (distinct from the node's ClawNet DID).
    fn local_peer_id(&self) -> String;

    /// Publish to a topic. Publishing to zero subscribers is not an error;
    /// the message simply reaches the next subscriber set.
    async fn publish(&self, topic: &str, data: Vec<u8>) -> Result<(), ClawError>;

    /// Dial a peer multiaddress.
    async fn dial(&self, addr: &str) -> Result<(), ClawError>;
}
