//! Amount-tiered confirmation tracking.
//!
//! ClawNet has no global consensus; a payee instead waits for confirmations
//! (snapshot counter-signatures or explicit acks) from distinct peers. Small
//! amounts settle on fewer confirmations than large ones.

use std::collections::{HashMap, HashSet};

use clawnet_core::constants::{FINALITY_MAX_CONFIRMATIONS, FINALITY_TIERS};
use clawnet_core::types::{Amount, Did, EventHash};

/// Confirmations required before an amount is treated as final:
/// ≤ 100 → 3, ≤ 1000 → 5, larger → 7.
pub fn confirmations_required(amount: &Amount) -> u32 {
    if let Some(v) = amount.to_u64() {
        for (bound, confirmations) in FINALITY_TIERS {
            if v <= bound {
                return confirmations;
            }
        }
    }
    FINALITY_MAX_CONFIRMATIONS
}

/// Outcome of recording one confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmationEvent {
    pub event: EventHash,
    pub confirmations: u32,
    pub is_final: bool,
}

/// Counts distinct confirming signers per event hash until the tiered
/// threshold is met, then drops the tracking entry.
#[derive(Default)]
pub struct ConfirmationTracker {
    pending: HashMap<EventHash, HashSet<Did>>,
}

impl ConfirmationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a confirmation from `signer`. Duplicate signers are ignored
    /// (returns `None`).
    pub fn record(
        &mut self,
        event: EventHash,
        signer: Did,
        amount: &Amount,
    ) -> Option<ConfirmationEvent> {
        let signers = self.pending.entry(event).or_default();
        if !signers.insert(signer) {
            return None;
        }
        let confirmations = signers.len() as u32;
        let is_final = confirmations >= confirmations_required(amount);
        if is_final {
            self.pending.remove(&event);
        }
        Some(ConfirmationEvent { event, confirmations, is_final })
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clawnet_crypto::Keypair;

    #[test]
    fn tiers_match_amount_bands() {
        assert_eq!(confirmations_required(&Amount::from_u64(1)), 3);
        assert_eq!(confirmations_required(&Amount::from_u64(100)), 3);
        assert_eq!(confirmations_required(&Amount::from_u64(101)), 5);
        assert_eq!(confirmations_required(&Amount::from_u64(1_000)), 5);
        assert_eq!(confirmations_required(&Amount::from_u64(1_001)), 7);
        // Amounts beyond u64 are by definition in the top tier.
        let huge: Amount = "340282366920938463463374607431768211456".parse().unwrap();
        assert_eq!(confirmations_required(&huge), 7);
    }

    #[test]
    fn small_amount_finalizes_at_three() {
        let mut tracker = ConfirmationTracker::new();
        let event = EventHash::from_bytes([5u8; 32]);
        let amount = Amount::from_u64(50);

        for expected in 1..=2u32 {
            let e = tracker
                .record(event, Keypair::generate().did, &amount)
                .unwrap();
            assert_eq!(e.confirmations, expected);
            assert!(!e.is_final);
        }
        let last = tracker
            .record(event, Keypair::generate().did, &amount)
            .unwrap();
        assert!(last.is_final);
        assert_eq!(tracker.pending_count(), 0);
    }

    #[test]
    fn duplicate_signer_ignored() {
        let mut tracker = ConfirmationTracker::new();
        let event = EventHash::from_bytes([6u8; 32]);
        let signer = Keypair::generate().did;
        let amount = Amount::from_u64(10);

        assert!(tracker.record(event, signer.clone(), &amount).is_some());
        assert!(tracker.record(event, signer, &amount).is_none());
    }
}
