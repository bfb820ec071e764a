use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use libp2p::{
    autonat, dcutr, gossipsub, identify, kad, noise, ping, relay, tcp, yamux,
    swarm::SwarmEvent,
    Multiaddr, PeerId, Swarm,
};
use libp2p_swarm::NetworkBehaviour;
use sha2::{Digest, Sha256};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use clawnet_core::constants::{TOPIC_EVENTS, TOPIC_MARKETS, TOPIC_REQUESTS, TOPIC_RESPONSES};
use clawnet_core::error::ClawError;

use crate::config::P2pConfig;
use crate::gossip::{Gossip, GossipMessage};

/// Combined libp2p network behaviour for ClawNet.
///
/// The `#[derive(NetworkBehaviour)]` macro auto-generates a
/// `ClawBehaviourEvent` enum with one variant per field.
#[derive(NetworkBehaviour)]
pub struct ClawBehaviour {
    pub gossipsub: gossipsub::Behaviour,
    pub kademlia: kad::Behaviour<kad::store::MemoryStore>,
    pub identify: identify::Behaviour,
    pub ping: ping::Behaviour,
    pub relay: relay::client::Behaviour,
    pub dcutr: dcutr::Behaviour,
    pub autonat: autonat::Behaviour,
}

enum NetworkCommand {
    Publish { topic: String, data: Vec<u8> },
    Dial { addr: Multiaddr },
}

/// Publish/dial half of the transport, injected into the engine as
/// `Arc<dyn Gossip>`.
pub struct P2pGossip {
    command_tx: mpsc::Sender<NetworkCommand>,
    local_peer_id: PeerId,
}

#[async_trait]
impl Gossip for P2pGossip {
    fn local_peer_id(&self) -> String {
        self.local_peer_id.to_string()
    }

    async fn publish(&self, topic: &str, data: Vec<u8>) -> Result<(), ClawError> {
        self.command_tx
            .send(NetworkCommand::Publish { topic: topic.to_string(), data })
            .await
            .map_err(|_| ClawError::Cancelled)
    }

    async fn dial(&self, addr: &str) -> Result<(), ClawError> {
        let addr: Multiaddr = addr
            .parse()
            .map_err(|_| ClawError::Serialization(format!("invalid multiaddr: {addr}")))?;
        self.command_tx
            .send(NetworkCommand::Dial { addr })
            .await
            .map_err(|_| ClawError::Cancelled)
    }
}

/// Application-facing handle returned from `P2pNetwork::new()`.
pub struct P2pHandle {
    /// Publish/dial capability.
    pub gossip: Arc<P2pGossip>,
    /// Messages arriving from any subscribed topic.
    pub inbound_rx: mpsc::Receiver<GossipMessage>,
    /// Resolves with the first ready listen address.
    pub ready_rx: oneshot::Receiver<String>,
    /// Local libp2p peer identity.
    pub local_peer_id: PeerId,
}

/// Owns the libp2p Swarm. Pass to `tokio::spawn(network.run(shutdown))`.
pub struct P2pNetwork {
    swarm: Swarm<ClawBehaviour>,
    command_rx: mpsc::Receiver<NetworkCommand>,
    inbound_tx: mpsc::Sender<GossipMessage>,
    ready_tx: Option<oneshot::Sender<String>>,
}

impl P2pNetwork {
    /// Build the swarm, subscribe to the protocol topics, and start
    /// listening. Returns `(P2pNetwork, P2pHandle)`.
    pub fn new(
        config: &P2pConfig,
    ) -> Result<(Self, P2pHandle), Box<dyn std::error::Error + Send + Sync>> {
        let protocol_version = config.protocol_version.clone();

        let mut swarm = libp2p::SwarmBuilder::with_new_identity()
            .with_tokio()
            .with_tcp(
                tcp::Config::default(),
                noise::Config::new,
                yamux::Config::default,
            )?
            .with_relay_client(noise::Config::new, yamux::Config::default)?
            .with_behaviour(|key: &libp2p::identity::Keypair, relay_client| {
                // Content-addressed message ids: identical envelope bytes
                // dedup across the mesh regardless of publisher.
                let message_id_fn = |msg: &gossipsub::Message| {
                    gossipsub::MessageId::from(hex::encode(Sha256::digest(&msg.data)))
                };

                let gossipsub_config = gossipsub::ConfigBuilder::default()
                    .heartbeat_interval(Duration::from_secs(1))
                    .validation_mode(gossipsub::ValidationMode::Strict)
                    .message_id_fn(message_id_fn)
                    .build()
                    .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;

                let gossipsub = gossipsub::Behaviour::new(
                    gossipsub::MessageAuthenticity::Signed(key.clone()),
                    gossipsub_config,
                )
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;

                let local_peer_id = key.public().to_peer_id();
                let store = kad::store::MemoryStore::new(local_peer_id);
                let kademlia = kad::Behaviour::new(local_peer_id, store);

                let identify = identify::Behaviour::new(identify::Config::new(
                    protocol_version.clone(),
                    key.public(),
                ));

                let ping = ping::Behaviour::default();
                let dcutr = dcutr::Behaviour::new(local_peer_id);
                let autonat = autonat::Behaviour::new(local_peer_id, autonat::Config::default());

                Ok(ClawBehaviour {
                    gossipsub,
                    kademlia,
                    identify,
                    ping,
                    relay: relay_client,
                    dcutr,
                    autonat,
                })
            })?
            .build();

        for topic in [TOPIC_EVENTS, TOPIC_MARKETS, TOPIC_REQUESTS, TOPIC_RESPONSES] {
            swarm
                .behaviour_mut()
                .gossipsub
                .subscribe(&gossipsub::IdentTopic::new(topic))?;
        }

        for addr_str in &config.listen_addrs {
            let listen_addr: Multiaddr = addr_str.parse()?;
            swarm.listen_on(listen_addr)?;
        }

        let mut bootstrapping = false;
        for addr_str in &config.bootstrap_peers {
            if let Ok(addr) = addr_str.parse::<Multiaddr>() {
                if let Some(libp2p::multiaddr::Protocol::P2p(peer_id)) = addr.iter().last() {
                    swarm.behaviour_mut().kademlia.add_address(&peer_id, addr.clone());
                    bootstrapping = true;
                    debug!(peer = %peer_id, "added bootstrap peer");
                }
            }
        }
        if bootstrapping {
            if let Err(e) = swarm.behaviour_mut().kademlia.bootstrap() {
                warn!(error = %e, "kademlia bootstrap failed");
            }
        }

        let local_peer_id = *swarm.local_peer_id();
        let (command_tx, command_rx) = mpsc::channel(256);
        let (inbound_tx, inbound_rx) = mpsc::channel(256);
        let (ready_tx, ready_rx) = oneshot::channel();

        let network = P2pNetwork {
            swarm,
            command_rx,
            inbound_tx,
            ready_tx: Some(ready_tx),
        };
        let handle = P2pHandle {
            gossip: Arc::new(P2pGossip { command_tx, local_peer_id }),
            inbound_rx,
            ready_rx,
            local_peer_id,
        };

        Ok((network, handle))
    }

    /// Drive the P2P event loop until `shutdown` flips to true.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                Some(command) = self.command_rx.recv() => {
                    self.handle_command(command);
                }

                event = self.swarm.select_next_some() => {
                    self.handle_event(event).await;
                }

                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("P2P network stopping");
                        return;
                    }
                }
            }
        }
    }

    fn handle_command(&mut self, command: NetworkCommand) {
        match command {
            NetworkCommand::Publish { topic, data } => {
                let topic = gossipsub::IdentTopic::new(topic);
                match self.swarm.behaviour_mut().gossipsub.publish(topic, data) {
                    Ok(_) => {}
                    // Zero subscribers is an allowed state, not a failure.
                    Err(gossipsub::PublishError::InsufficientPeers) => {
                        debug!("published with no peers subscribed");
                    }
                    Err(e) => warn!(error = %e, "gossipsub publish failed"),
                }
            }
            NetworkCommand::Dial { addr } => {
                if let Err(e) = self.swarm.dial(addr.clone()) {
                    warn!(addr = %addr, error = %e, "dial failed");
                }
            }
        }
    }

    async fn handle_event(&mut self, event: SwarmEvent<ClawBehaviourEvent>) {
        match event {
            SwarmEvent::NewListenAddr { address, .. } => {
                info!(addr = %address, "P2P listening on");
                if let Some(tx) = self.ready_tx.take() {
                    let _ = tx.send(address.to_string());
                }
            }
            SwarmEvent::Behaviour(ClawBehaviourEvent::Gossipsub(gossipsub::Event::Message {
                propagation_source,
                message,
                ..
            })) => {
                let inbound = GossipMessage {
                    topic: message.topic.as_str().to_string(),
                    data: message.data,
                    source: message
                        .source
                        .or(Some(propagation_source))
                        .map(|p| p.to_string()),
                };
                let _ = self.inbound_tx.send(inbound).await;
            }
            SwarmEvent::Behaviour(ClawBehaviourEvent::Identify(identify::Event::Received {
                peer_id,
                info,
                ..
            })) => {
                for addr in info.listen_addrs {
                    self.swarm.behaviour_mut().kademlia.add_address(&peer_id, addr);
                }
            }
            SwarmEvent::Behaviour(ClawBehaviourEvent::Autonat(autonat::Event::StatusChanged {
                new,
                ..
            })) => {
                debug!(status = ?new, "NAT status changed");
            }
            SwarmEvent::ConnectionEstablished { peer_id, .. } => {
                debug!(peer = %peer_id, "connection established");
            }
            SwarmEvent::ConnectionClosed { peer_id, .. } => {
                debug!(peer = %peer_id, "connection closed");
            }
            _ => {}
        }
    }
}
