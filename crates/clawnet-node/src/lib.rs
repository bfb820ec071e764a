//! clawnet-node
//!
//! Full-node composition for ClawNet: wires the event store, state engine,
//! libp2p transport, sync service, and snapshot scheduler, and exposes the
//! daemon lifecycle plus the publish API.

pub mod config;
pub mod node;

pub use config::{parse_sybil_policy, FileConfig, NodeConfig};
pub use node::Node;
