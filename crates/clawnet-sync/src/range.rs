//! Range sync: serving and applying windows of a single issuer's chain.

use tracing::debug;

use clawnet_core::envelope::Envelope;
use clawnet_core::error::ClawError;
use clawnet_core::types::{Did, Nonce};
use clawnet_state::EventEngine;
use clawnet_store::EventStore;

/// Responder side: events for `issuer` from `from_nonce`, bounded by the
/// optional `to_nonce` and by `chunk` (whichever is smaller).
pub fn serve_range(
    store: &EventStore,
    issuer: &Did,
    from_nonce: Nonce,
    to_nonce: Option<Nonce>,
    chunk: usize,
) -> Result<Vec<Envelope>, ClawError> {
    let limit = match to_nonce {
        Some(hi) if hi < from_nonce => return Ok(Vec::new()),
        Some(hi) => chunk.min((hi - from_nonce + 1) as usize),
        None => chunk,
    };
    store.range_by_issuer(issuer, from_nonce, limit)
}

/// What happened while applying a range response.
#[derive(Debug, Default)]
pub struct RangeOutcome {
    pub applied: usize,
    pub duplicates: usize,
    /// First hard failure, if any; later events in the window are skipped
    /// since they depend on the failed one.
    pub error: Option<ClawError>,
}

/// Requester side: fold received events into the engine in order.
pub fn apply_range(engine: &mut EventEngine, events: Vec<Envelope>) -> RangeOutcome {
    let mut outcome = RangeOutcome::default();
    for envelope in events {
        match engine.append_event(envelope) {
            Ok(true) => outcome.applied += 1,
            Ok(false) => outcome.duplicates += 1,
            Err(e) => {
                debug!(error = %e, "range application stopped");
                outcome.error = Some(e);
                break;
            }
        }
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use clawnet_crypto::{sign_envelope, Keypair};
    use clawnet_store::MemoryKv;
    use serde_json::json;
    use std::sync::Arc;

    fn chain(kp: &Keypair, store: &EventStore, count: u64) {
        let mut prev = None;
        for nonce in 1..=count {
            let mut env = Envelope::build(
                kp.did.clone(),
                "wallet.mint",
                json!({"to": kp.address, "amount": "10"}),
                nonce,
                1_700_000_000_000,
                prev,
            )
            .unwrap();
            sign_envelope(&mut env, kp).unwrap();
            prev = Some(env.require_hash().unwrap());
            store.append(env).unwrap();
        }
    }

    #[test]
    fn serve_respects_bounds_and_chunk() {
        let store = EventStore::new(Arc::new(MemoryKv::new()));
        let kp = Keypair::generate();
        chain(&kp, &store, 10);

        let window = serve_range(&store, &kp.did, 3, Some(5), 256).unwrap();
        assert_eq!(window.iter().map(|e| e.nonce).collect::<Vec<_>>(), vec![3, 4, 5]);

        let chunked = serve_range(&store, &kp.did, 1, None, 4).unwrap();
        assert_eq!(chunked.len(), 4);

        assert!(serve_range(&store, &kp.did, 7, Some(3), 256).unwrap().is_empty());
    }

    #[test]
    fn apply_folds_a_remote_chain() {
        let source = EventStore::new(Arc::new(MemoryKv::new()));
        let kp = Keypair::generate();
        chain(&kp, &source, 6);

        let mut engine =
            EventEngine::open(Arc::new(EventStore::new(Arc::new(MemoryKv::new())))).unwrap();
        let events = serve_range(&source, &kp.did, 1, None, 256).unwrap();
        let outcome = apply_range(&mut engine, events);

        assert_eq!(outcome.applied, 6);
        assert!(outcome.error.is_none());
        assert_eq!(engine.store().log_length().unwrap(), 6);
    }

    #[test]
    fn apply_stops_at_a_gap() {
        let source = EventStore::new(Arc::new(MemoryKv::new()));
        let kp = Keypair::generate();
        chain(&kp, &source, 6);

        let mut engine =
            EventEngine::open(Arc::new(EventStore::new(Arc::new(MemoryKv::new())))).unwrap();
        // Window starting past nonce 1 cannot apply to an empty chain.
        let events = serve_range(&source, &kp.did, 3, None, 256).unwrap();
        let outcome = apply_range(&mut engine, events);

        assert_eq!(outcome.applied, 0);
        assert!(matches!(outcome.error, Some(ClawError::NonceGap { .. })));
        assert_eq!(engine.store().log_length().unwrap(), 0);
    }
}
