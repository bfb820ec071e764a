//! clawnet-sync
//!
//! Pull-based synchronization over the gossip topics: Sybil-ticketed range
//! and snapshot request/response flows, gossip ingest with gap-triggered
//! catch-up, and snapshot bootstrap.

pub mod message;
pub mod range;
pub mod service;
pub mod snapshot_sync;
pub mod ticket;

pub use message::{request_id, SyncRequest, SyncResponse};
pub use range::{apply_range, serve_range, RangeOutcome};
pub use service::{SyncConfig, SyncService};
pub use snapshot_sync::adopt_snapshot;
pub use ticket::{verify_ticket, NoStakeOracle, StakeOracle, SybilPolicy, Ticket};
