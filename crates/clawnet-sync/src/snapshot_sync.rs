//! Snapshot sync: bootstrap a node from a counter-signed snapshot plus the
//! post-snapshot event tail.

use std::sync::Arc;

use tracing::info;

use clawnet_core::error::ClawError;
use clawnet_state::{EventEngine, Snapshot};
use clawnet_store::EventStore;

/// Adopt a fetched snapshot over the local store.
///
/// Checks, in order: the snapshot carries enough valid distinct signatures;
/// its `at` event is present locally (when it is not there yet, `Ok(None)`
/// tells the caller to retry after more range syncing); and the tail
/// replays through the reducer without diverging.
/// The returned engine is seeded with the snapshot state plus the tail.
pub fn adopt_snapshot(
    store: Arc<EventStore>,
    snapshot: &Snapshot,
    min_signatures: usize,
) -> Result<Option<EventEngine>, ClawError> {
    snapshot.check_eligible(min_signatures)?;

    let Some(at_seq) = store.event_seq(&snapshot.at)? else {
        return Ok(None);
    };

    // Tail replay doubles as the divergence check: any reducer rejection
    // means the snapshot state and the log disagree.
    let engine = EventEngine::open_at(store, snapshot.state.clone(), at_seq + 1)?;
    info!(at = %snapshot.at, tail = engine.applied_seq() - (at_seq + 1), "snapshot adopted");
    Ok(Some(engine))
}
