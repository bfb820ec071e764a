//! clawnet-state
//!
//! Derived state for the event log: the pure wallet/escrow reducer, the
//! engine that dry-runs it before every store commit, snapshot persistence
//! and scheduling, and amount-tiered confirmation tracking.

pub mod engine;
pub mod finality;
pub mod reducer;
pub mod scheduler;
pub mod snapshot;

pub use engine::{replay, EventEngine};
pub use finality::{confirmations_required, ConfirmationEvent, ConfirmationTracker};
pub use reducer::{
    apply, apply_in_place, AccountBalances, EscrowRecord, EscrowStatus, LockedBalances,
    WalletState,
};
pub use scheduler::{SnapshotPolicy, SnapshotScheduler};
pub use snapshot::{create_snapshot, Snapshot, SnapshotSignature, SnapshotStore};
