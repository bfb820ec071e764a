//! The event engine: store + reducer, the single writer for a node.
//!
//! `append_event` stages the store write (all causal checks), dry-runs the
//! reducer on a copy of the state, and only then commits. A rejected
//! transition leaves both the store and the materialized state untouched.

use std::sync::Arc;

use tracing::info;

use clawnet_core::envelope::Envelope;
use clawnet_core::error::ClawError;
use clawnet_core::types::EventHash;
use clawnet_store::EventStore;

use crate::reducer::{apply_in_place, WalletState};

pub struct EventEngine {
    store: Arc<EventStore>,
    state: WalletState,
    /// Sequence number the materialized state has been folded up to.
    applied_seq: u64,
}

impl EventEngine {
    /// Open an engine over a store, replaying the full log to rebuild state.
    pub fn open(store: Arc<EventStore>) -> Result<Self, ClawError> {
        let state = replay(&store, WalletState::default(), 0)?;
        let applied_seq = store.log_length()?;
        if applied_seq > 0 {
            info!(events = applied_seq, "state rebuilt from log");
        }
        Ok(Self { store, state, applied_seq })
    }

    /// Open an engine seeded from a snapshot state, replaying only the tail
    /// after `from_seq`.
    pub fn open_at(
        store: Arc<EventStore>,
        state: WalletState,
        from_seq: u64,
    ) -> Result<Self, ClawError> {
        let state = replay(&store, state, from_seq)?;
        let applied_seq = store.log_length()?;
        Ok(Self { store, state, applied_seq })
    }

    /// Validate and persist one envelope.
    ///
    /// Returns `Ok(false)` for an already-known event (silently absorbed per
    /// the duplicate policy), `Ok(true)` for a fresh append. Causal and
    /// transition failures propagate without touching anything.
    pub fn append_event(&mut self, envelope: Envelope) -> Result<bool, ClawError> {
        let Some(staged) = self.store.stage(envelope)? else {
            return Ok(false);
        };

        // Identity events embedding a capability credential must carry a
        // valid proof whose subject mirrors the payload.
        clawnet_vc::check_identity_event(staged.envelope())
            .map_err(|e| ClawError::InvalidTransition(e.to_string()))?;

        // Reducer dry-run on a scratch copy before anything is written.
        let mut next = self.state.clone();
        apply_in_place(&mut next, staged.envelope())?;

        let seq = staged.seq();
        self.store.commit(staged)?;
        self.state = next;
        self.applied_seq = seq + 1;
        Ok(true)
    }

    /// Decode wire bytes and append.
    pub fn append_bytes(&mut self, bytes: &[u8]) -> Result<bool, ClawError> {
        self.append_event(Envelope::decode(bytes)?)
    }

    pub fn state(&self) -> &WalletState {
        &self.state
    }

    pub fn store(&self) -> &Arc<EventStore> {
        &self.store
    }

    pub fn applied_seq(&self) -> u64 {
        self.applied_seq
    }

    /// Hash of the most recently appended event, if any.
    pub fn head_hash(&self) -> Result<Option<EventHash>, ClawError> {
        let len = self.store.log_length()?;
        if len == 0 {
            return Ok(None);
        }
        match self.store.get_by_seq(len - 1)? {
            Some(env) => Ok(Some(env.require_hash()?)),
            None => Ok(None),
        }
    }
}

/// Fold the log from `from_seq` onward into `state`.
pub fn replay(
    store: &EventStore,
    mut state: WalletState,
    from_seq: u64,
) -> Result<WalletState, ClawError> {
    const CHUNK: usize = 512;
    let mut seq = from_seq;
    loop {
        let events = store.scan_log(seq, CHUNK)?;
        if events.is_empty() {
            return Ok(state);
        }
        seq += events.len() as u64;
        for envelope in &events {
            apply_in_place(&mut state, envelope)?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clawnet_core::types::Amount;
    use clawnet_crypto::{sign_envelope, Keypair};
    use clawnet_store::{EventStore, MemoryKv};
    use serde_json::json;

    fn engine() -> EventEngine {
        EventEngine::open(Arc::new(EventStore::new(Arc::new(MemoryKv::new())))).unwrap()
    }

    fn signed(
        kp: &Keypair,
        event_type: &str,
        payload: serde_json::Value,
        nonce: u64,
        prev: Option<EventHash>,
    ) -> Envelope {
        let mut env =
            Envelope::build(kp.did.clone(), event_type, payload, nonce, 1_700_000_000_000, prev)
                .unwrap();
        sign_envelope(&mut env, kp).unwrap();
        env
    }

    #[test]
    fn mint_transfer_end_to_end() {
        let mut engine = engine();
        let a = Keypair::generate();
        let b = Keypair::generate();

        let mint = signed(&a, "wallet.mint", json!({"to": a.address, "amount": "100"}), 1, None);
        let mint_hash = mint.require_hash().unwrap();
        assert!(engine.append_event(mint).unwrap());

        let transfer = signed(
            &a,
            "wallet.transfer",
            json!({"to": b.address, "amount": "30", "fee": "1"}),
            2,
            Some(mint_hash),
        );
        assert!(engine.append_event(transfer).unwrap());

        assert_eq!(engine.state().account(&a.address).available, Amount::from_u64(69));
        assert_eq!(engine.state().account(&b.address).available, Amount::from_u64(30));
        assert_eq!(engine.applied_seq(), 2);
    }

    #[test]
    fn invalid_transition_blocks_the_append() {
        let mut engine = engine();
        let a = Keypair::generate();
        let b = Keypair::generate();

        // No mint: transferring from an empty account must fail...
        let transfer =
            signed(&a, "wallet.transfer", json!({"to": b.address, "amount": "5"}), 1, None);
        let err = engine.append_event(transfer).unwrap_err();
        assert!(matches!(err, ClawError::InvalidTransition(_)));

        // ...and leave neither a store entry nor a state change behind.
        assert_eq!(engine.store().log_length().unwrap(), 0);
        assert_eq!(engine.state(), &WalletState::default());
        // The issuer chain is also unused: nonce 1 is still available.
        let mint = signed(&a, "wallet.mint", json!({"to": a.address, "amount": "1"}), 1, None);
        assert!(engine.append_event(mint).unwrap());
    }

    #[test]
    fn duplicate_append_is_absorbed() {
        let mut engine = engine();
        let a = Keypair::generate();
        let mint = signed(&a, "wallet.mint", json!({"to": a.address, "amount": "100"}), 1, None);

        assert!(engine.append_event(mint.clone()).unwrap());
        assert!(!engine.append_event(mint).unwrap());
        assert_eq!(engine.store().log_length().unwrap(), 1);
        assert_eq!(engine.state().account(&a.address).available, Amount::from_u64(100));
    }

    #[test]
    fn double_spend_via_nonce_reuse_rejected() {
        let mut engine = engine();
        let a = Keypair::generate();
        let b = Keypair::generate();
        let c = Keypair::generate();

        let mint = signed(&a, "wallet.mint", json!({"to": a.address, "amount": "100"}), 1, None);
        assert!(engine.append_event(mint).unwrap());
        let t1 = signed(&a, "wallet.transfer", json!({"to": b.address, "amount": "30", "fee": "1"}), 2, None);
        assert!(engine.append_event(t1).unwrap());

        // Second spend of nonce 2 — a conflicting branch of A's chain.
        let t2 = signed(&a, "wallet.transfer", json!({"to": c.address, "amount": "60"}), 2, None);
        let err = engine.append_event(t2).unwrap_err();
        assert!(matches!(err, ClawError::NonceGap { .. }));
        assert_eq!(engine.store().log_length().unwrap(), 2);
    }

    #[test]
    fn identity_events_carry_verified_credentials() {
        let mut engine = engine();
        let kp = Keypair::generate();

        let mut credential = clawnet_vc::Credential::capability(
            kp.did.clone(),
            json!({"id": kp.did, "name": "translation", "pricing": {"per_call": "5"}}),
            "2026-08-01T00:00:00Z".into(),
        );
        clawnet_vc::sign_credential(&mut credential, &kp, "2026-08-01T00:00:00Z".into()).unwrap();

        // Subject mirrors the payload: accepted (and a no-op for balances).
        let register = signed(
            &kp,
            "identity.register",
            json!({
                "id": kp.did,
                "name": "translation",
                "pricing": {"per_call": "5"},
                "credential": credential,
            }),
            1,
            None,
        );
        assert!(engine.append_event(register).unwrap());
        assert_eq!(engine.state(), &WalletState::default());

        // Payload contradicting the credential subject: rejected pre-commit.
        let other = Keypair::generate();
        let mut credential2 = clawnet_vc::Credential::capability(
            other.did.clone(),
            json!({"id": other.did, "name": "honest-name", "pricing": {"per_call": "1"}}),
            "2026-08-01T00:00:00Z".into(),
        );
        clawnet_vc::sign_credential(&mut credential2, &other, "2026-08-01T00:00:00Z".into())
            .unwrap();
        let forged = signed(
            &other,
            "identity.register",
            json!({
                "id": other.did,
                "name": "impersonation",
                "pricing": {"per_call": "1"},
                "credential": credential2,
            }),
            1,
            None,
        );
        let err = engine.append_event(forged).unwrap_err();
        assert!(matches!(err, ClawError::InvalidTransition(_)));
        assert_eq!(engine.store().log_length().unwrap(), 1);
    }

    #[test]
    fn independent_issuers_commute() {
        // Any interleaving that respects per-issuer causality must reach
        // the same final state.
        let a = Keypair::generate();
        let b = Keypair::generate();

        let chain = |kp: &Keypair| {
            let mint = signed(kp, "wallet.mint", json!({"to": kp.address, "amount": "100"}), 1, None);
            let transfer = signed(
                kp,
                "wallet.transfer",
                json!({"to": Keypair::generate().address, "amount": "10", "fee": "2"}),
                2,
                Some(mint.require_hash().unwrap()),
            );
            [mint, transfer]
        };
        let [a1, a2] = chain(&a);
        let [b1, b2] = chain(&b);

        let orders: [[&Envelope; 4]; 3] = [
            [&a1, &a2, &b1, &b2],
            [&b1, &b2, &a1, &a2],
            [&a1, &b1, &b2, &a2],
        ];
        let mut states = Vec::new();
        for order in orders {
            let mut engine = engine();
            for env in order {
                assert!(engine.append_event(env.clone()).unwrap());
            }
            states.push(engine.state().clone());
        }
        assert_eq!(states[0], states[1]);
        assert_eq!(states[0], states[2]);
    }

    #[test]
    fn reopening_replays_to_the_same_state() {
        let kv = Arc::new(MemoryKv::new());
        let store = Arc::new(EventStore::new(kv));
        let mut engine = EventEngine::open(Arc::clone(&store)).unwrap();

        let a = Keypair::generate();
        let b = Keypair::generate();
        let mint = signed(&a, "wallet.mint", json!({"to": a.address, "amount": "100"}), 1, None);
        assert!(engine.append_event(mint).unwrap());
        let transfer =
            signed(&a, "wallet.transfer", json!({"to": b.address, "amount": "40"}), 2, None);
        assert!(engine.append_event(transfer).unwrap());
        let expected = engine.state().clone();

        let reopened = EventEngine::open(store).unwrap();
        assert_eq!(reopened.state(), &expected);
        assert_eq!(reopened.applied_seq(), 2);
    }
}
