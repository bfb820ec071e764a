//! clawnet-p2p
//!
//! libp2p networking layer for ClawNet nodes.
//!
//! GossipSub carries event envelopes and sync RPCs on the protocol topics,
//! with SHA-256 content-addressed message ids for mesh-wide deduplication.
//! Kademlia handles peer discovery and bootstrap; identify and ping maintain
//! connection metadata; relay + DCUtR provide hole punching and AutoNAT
//! detects reachability. The engine sees only the `Gossip` trait.

pub mod config;
pub mod gossip;
pub mod memory;
pub mod network;

pub use config::P2pConfig;
pub use gossip::{Gossip, GossipMessage};
pub use memory::{MemoryGossip, MemoryHub};
pub use network::{P2pGossip, P2pHandle, P2pNetwork};
