//! clawnet-store
//!
//! Ordered key-value storage (memory + sled) and the append-only event
//! store: hash/issuer/resource indices, per-issuer causal chains, resource
//! concurrency guards, atomic per-event batches, schema migrations.

pub mod event_store;
pub mod kv;
pub mod migrate;

pub use event_store::{EventStore, IssuerHead, StagedAppend};
pub use kv::{BatchOp, Kv, MemoryKv, SledKv};
pub use migrate::{run_migrations, schema_version, CURRENT_SCHEMA_VERSION};
