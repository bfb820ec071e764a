//! Deterministic fold of envelopes into wallet and escrow state.
//!
//! The reducer is pure: same events in the same per-issuer order always
//! yield the same state. Unrecognized event types leave state untouched so
//! newer peers can gossip types this build does not reduce yet. Underflow
//! anywhere is `InvalidTransition`; the engine dry-runs the reducer before
//! committing an event, so no invalid transition ever reaches the store.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use clawnet_core::envelope::Envelope;
use clawnet_core::error::ClawError;
use clawnet_core::payload::{
    EscrowCreatePayload, EscrowDisputePayload, EscrowFundPayload, EscrowRefundPayload,
    EscrowReleasePayload, MintPayload, ReleaseRule, TransferPayload, TYPE_ESCROW_CREATE,
    TYPE_ESCROW_DISPUTE, TYPE_ESCROW_FUND, TYPE_ESCROW_REFUND, TYPE_ESCROW_RELEASE, TYPE_MINT,
    TYPE_TRANSFER,
};
use clawnet_core::types::{Address, Amount, Did, Timestamp};
use clawnet_crypto::address_from_did;

// ── State model ──────────────────────────────────────────────────────────────

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct LockedBalances {
    pub escrow: Amount,
    pub governance: Amount,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct AccountBalances {
    pub available: Amount,
    pub pending: Amount,
    pub locked: LockedBalances,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EscrowStatus {
    Pending,
    Funded,
    Releasing,
    Released,
    Refunded,
    Disputed,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EscrowRecord {
    pub depositor: Address,
    pub beneficiary: Address,
    pub balance: Amount,
    pub status: EscrowStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<Timestamp>,
    #[serde(default)]
    pub release_rules: Vec<ReleaseRule>,
}

/// Derived state: wallet balances per address, escrow records per id.
/// BTreeMaps keep serialization order stable for snapshot byte-equality.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct WalletState {
    pub accounts: BTreeMap<Address, AccountBalances>,
    pub escrows: BTreeMap<String, EscrowRecord>,
}

impl WalletState {
    pub fn account(&self, address: &Address) -> AccountBalances {
        self.accounts.get(address).cloned().unwrap_or_default()
    }

    pub fn escrow(&self, id: &str) -> Option<&EscrowRecord> {
        self.escrows.get(id)
    }
}

// ── Reducer ──────────────────────────────────────────────────────────────────

/// Pure fold step: `apply(state, envelope) → state`.
pub fn apply(state: &WalletState, envelope: &Envelope) -> Result<WalletState, ClawError> {
    let mut next = state.clone();
    apply_in_place(&mut next, envelope)?;
    Ok(next)
}

/// In-place variant used for log replay; on error the state may be partially
/// modified and must be discarded.
pub fn apply_in_place(state: &mut WalletState, envelope: &Envelope) -> Result<(), ClawError> {
    match envelope.event_type.as_str() {
        TYPE_MINT => {
            let p: MintPayload = decode_payload(envelope)?;
            credit_available(state, &p.to, &p.amount);
        }
        TYPE_TRANSFER => {
            let p: TransferPayload = decode_payload(envelope)?;
            let sender = issuer_address(&envelope.issuer)?;
            let total = &p.amount + &p.fee;
            debit_available(state, &sender, &total)?;
            // Fees are burnt: nothing is credited beyond `amount`.
            credit_available(state, &p.to, &p.amount);
        }
        TYPE_ESCROW_CREATE => {
            let p: EscrowCreatePayload = decode_payload(envelope)?;
            if state.escrows.contains_key(&p.escrow_id) {
                return Err(ClawError::InvalidTransition(format!(
                    "escrow {} already exists",
                    p.escrow_id
                )));
            }
            state.escrows.insert(
                p.escrow_id,
                EscrowRecord {
                    depositor: p.depositor,
                    beneficiary: p.beneficiary,
                    balance: Amount::zero(),
                    status: EscrowStatus::Pending,
                    expires_at: p.expires_at,
                    release_rules: p.release_rules,
                },
            );
        }
        TYPE_ESCROW_FUND => {
            let p: EscrowFundPayload = decode_payload(envelope)?;
            let issuer = issuer_address(&envelope.issuer)?;
            let record = escrow_mut(state, &p.escrow_id)?;
            if !matches!(record.status, EscrowStatus::Pending | EscrowStatus::Funded) {
                return Err(invalid_status("fund", &p.escrow_id, record.status));
            }
            if issuer != record.depositor {
                return Err(ClawError::InvalidTransition(format!(
                    "only the depositor may fund escrow {}",
                    p.escrow_id
                )));
            }
            let depositor = record.depositor.clone();
            record.balance = &record.balance + &p.amount;
            record.status = EscrowStatus::Funded;
            move_available_to_escrow(state, &depositor, &p.amount)?;
        }
        TYPE_ESCROW_RELEASE => {
            let p: EscrowReleasePayload = decode_payload(envelope)?;
            let issuer = issuer_address(&envelope.issuer)?;
            let record = escrow_mut(state, &p.escrow_id)?;
            if !matches!(record.status, EscrowStatus::Funded | EscrowStatus::Releasing) {
                return Err(invalid_status("release", &p.escrow_id, record.status));
            }
            require_party(&issuer, record, "release", &p.escrow_id)?;
            if !record.release_rules.iter().any(|r| r.id == p.rule_id) {
                return Err(ClawError::InvalidTransition(format!(
                    "escrow {} has no release rule {}",
                    p.escrow_id, p.rule_id
                )));
            }
            let remaining = record.balance.checked_sub(&p.amount).ok_or_else(|| {
                ClawError::InvalidTransition(format!(
                    "release exceeds balance of escrow {}",
                    p.escrow_id
                ))
            })?;
            record.balance = remaining.clone();
            record.status = if remaining.is_zero() {
                EscrowStatus::Released
            } else {
                EscrowStatus::Releasing
            };
            let depositor = record.depositor.clone();
            let beneficiary = record.beneficiary.clone();
            debit_locked_escrow(state, &depositor, &p.amount)?;
            credit_available(state, &beneficiary, &p.amount);
        }
        TYPE_ESCROW_REFUND => {
            let p: EscrowRefundPayload = decode_payload(envelope)?;
            let issuer = issuer_address(&envelope.issuer)?;
            let record = escrow_mut(state, &p.escrow_id)?;
            if !matches!(record.status, EscrowStatus::Funded | EscrowStatus::Releasing) {
                return Err(invalid_status("refund", &p.escrow_id, record.status));
            }
            require_party(&issuer, record, "refund", &p.escrow_id)?;
            let remaining = record.balance.checked_sub(&p.amount).ok_or_else(|| {
                ClawError::InvalidTransition(format!(
                    "refund exceeds balance of escrow {}",
                    p.escrow_id
                ))
            })?;
            record.balance = remaining.clone();
            if remaining.is_zero() {
                record.status = EscrowStatus::Refunded;
            }
            let depositor = record.depositor.clone();
            debit_locked_escrow(state, &depositor, &p.amount)?;
            credit_available(state, &depositor, &p.amount);
        }
        TYPE_ESCROW_DISPUTE => {
            let p: EscrowDisputePayload = decode_payload(envelope)?;
            let issuer = issuer_address(&envelope.issuer)?;
            let record = escrow_mut(state, &p.escrow_id)?;
            if !matches!(record.status, EscrowStatus::Funded | EscrowStatus::Releasing) {
                return Err(invalid_status("dispute", &p.escrow_id, record.status));
            }
            require_party(&issuer, record, "dispute", &p.escrow_id)?;
            record.status = EscrowStatus::Disputed;
        }
        // Declared but not reduced: wallet.stake, wallet.unstake,
        // wallet.governance.*, identity.*, market.*, contract.* — accepted
        // (signature and causal checks happen upstream) with state unchanged.
        _ => {}
    }
    Ok(())
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn decode_payload<T: serde::de::DeserializeOwned>(envelope: &Envelope) -> Result<T, ClawError> {
    serde_json::from_value(envelope.payload.clone()).map_err(|e| {
        ClawError::Serialization(format!("{} payload: {e}", envelope.event_type))
    })
}

fn issuer_address(issuer: &Did) -> Result<Address, ClawError> {
    address_from_did(issuer)
}

fn escrow_mut<'a>(
    state: &'a mut WalletState,
    id: &str,
) -> Result<&'a mut EscrowRecord, ClawError> {
    state
        .escrows
        .get_mut(id)
        .ok_or_else(|| ClawError::InvalidTransition(format!("unknown escrow {id}")))
}

fn require_party(
    issuer: &Address,
    record: &EscrowRecord,
    action: &str,
    id: &str,
) -> Result<(), ClawError> {
    if issuer != &record.depositor && issuer != &record.beneficiary {
        return Err(ClawError::InvalidTransition(format!(
            "{action} on escrow {id} must come from a party to it"
        )));
    }
    Ok(())
}

fn invalid_status(action: &str, id: &str, status: EscrowStatus) -> ClawError {
    ClawError::InvalidTransition(format!("cannot {action} escrow {id} in status {status:?}"))
}

fn credit_available(state: &mut WalletState, address: &Address, amount: &Amount) {
    let account = state.accounts.entry(address.clone()).or_default();
    account.available = &account.available + amount;
}

fn debit_available(
    state: &mut WalletState,
    address: &Address,
    amount: &Amount,
) -> Result<(), ClawError> {
    let account = state
        .accounts
        .get_mut(address)
        .ok_or_else(|| ClawError::InvalidTransition(format!("no balance at {address}")))?;
    account.available = account.available.checked_sub(amount).ok_or_else(|| {
        ClawError::InvalidTransition(format!("insufficient available balance at {address}"))
    })?;
    Ok(())
}

fn move_available_to_escrow(
    state: &mut WalletState,
    address: &Address,
    amount: &Amount,
) -> Result<(), ClawError> {
    debit_available(state, address, amount)?;
    let account = state.accounts.entry(address.clone()).or_default();
    account.locked.escrow = &account.locked.escrow + amount;
    Ok(())
}

fn debit_locked_escrow(
    state: &mut WalletState,
    address: &Address,
    amount: &Amount,
) -> Result<(), ClawError> {
    let account = state
        .accounts
        .get_mut(address)
        .ok_or_else(|| ClawError::InvalidTransition(format!("no balance at {address}")))?;
    account.locked.escrow = account.locked.escrow.checked_sub(amount).ok_or_else(|| {
        ClawError::InvalidTransition(format!("insufficient escrow lock at {address}"))
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clawnet_crypto::{sign_envelope, Keypair};
    use serde_json::json;

    fn event(kp: &Keypair, event_type: &str, payload: serde_json::Value, nonce: u64) -> Envelope {
        let mut env =
            Envelope::build(kp.did.clone(), event_type, payload, nonce, 1_700_000_000_000, None)
                .unwrap();
        sign_envelope(&mut env, kp).unwrap();
        env
    }

    fn amount(v: u64) -> Amount {
        Amount::from_u64(v)
    }

    #[test]
    fn mint_and_transfer() {
        let a = Keypair::generate();
        let b = Keypair::generate();
        let mut state = WalletState::default();

        apply_in_place(
            &mut state,
            &event(&a, TYPE_MINT, json!({"to": a.address, "amount": "100"}), 1),
        )
        .unwrap();
        apply_in_place(
            &mut state,
            &event(
                &a,
                TYPE_TRANSFER,
                json!({"to": b.address, "amount": "30", "fee": "1"}),
                2,
            ),
        )
        .unwrap();

        assert_eq!(state.account(&a.address).available, amount(69));
        assert_eq!(state.account(&b.address).available, amount(30));
    }

    #[test]
    fn transfer_underflow_is_invalid() {
        let a = Keypair::generate();
        let b = Keypair::generate();
        let mut state = WalletState::default();
        apply_in_place(
            &mut state,
            &event(&a, TYPE_MINT, json!({"to": a.address, "amount": "10"}), 1),
        )
        .unwrap();

        let err = apply(
            &state,
            &event(&a, TYPE_TRANSFER, json!({"to": b.address, "amount": "10", "fee": "1"}), 2),
        )
        .unwrap_err();
        assert!(matches!(err, ClawError::InvalidTransition(_)));
        // `apply` is pure: the original state is untouched.
        assert_eq!(state.account(&a.address).available, amount(10));
    }

    fn escrow_setup(a: &Keypair, b: &Keypair, funded: u64) -> WalletState {
        let mut state = WalletState::default();
        apply_in_place(
            &mut state,
            &event(a, TYPE_MINT, json!({"to": a.address, "amount": "1000"}), 1),
        )
        .unwrap();
        apply_in_place(
            &mut state,
            &event(
                a,
                TYPE_ESCROW_CREATE,
                json!({
                    "escrowId": "e1",
                    "depositor": a.address,
                    "beneficiary": b.address,
                    "releaseRules": [{"id": "rule-1"}],
                }),
                2,
            ),
        )
        .unwrap();
        apply_in_place(
            &mut state,
            &event(
                a,
                TYPE_ESCROW_FUND,
                json!({
                    "escrowId": "e1",
                    "amount": funded.to_string(),
                    "resourcePrev": clawnet_core::types::EventHash::from_bytes([1; 32]).to_hex(),
                }),
                3,
            ),
        )
        .unwrap();
        state
    }

    #[test]
    fn escrow_happy_path_releases_fully() {
        let a = Keypair::generate();
        let b = Keypair::generate();
        let mut state = escrow_setup(&a, &b, 50);
        assert_eq!(state.escrow("e1").unwrap().status, EscrowStatus::Funded);
        assert_eq!(state.account(&a.address).locked.escrow, amount(50));

        apply_in_place(
            &mut state,
            &event(
                &b,
                TYPE_ESCROW_RELEASE,
                json!({
                    "escrowId": "e1", "amount": "50", "ruleId": "rule-1",
                    "resourcePrev": clawnet_core::types::EventHash::from_bytes([2; 32]).to_hex(),
                }),
                1,
            ),
        )
        .unwrap();

        let record = state.escrow("e1").unwrap();
        assert_eq!(record.status, EscrowStatus::Released);
        assert!(record.balance.is_zero());
        assert_eq!(state.account(&a.address).locked.escrow, amount(0));
        assert_eq!(state.account(&b.address).available, amount(50));
    }

    #[test]
    fn partial_release_then_refund() {
        let a = Keypair::generate();
        let b = Keypair::generate();
        let mut state = escrow_setup(&a, &b, 80);
        let guard = clawnet_core::types::EventHash::from_bytes([2; 32]).to_hex();

        apply_in_place(
            &mut state,
            &event(
                &b,
                TYPE_ESCROW_RELEASE,
                json!({"escrowId": "e1", "amount": "30", "ruleId": "rule-1", "resourcePrev": guard}),
                1,
            ),
        )
        .unwrap();
        assert_eq!(state.escrow("e1").unwrap().status, EscrowStatus::Releasing);

        apply_in_place(
            &mut state,
            &event(
                &a,
                TYPE_ESCROW_REFUND,
                json!({"escrowId": "e1", "amount": "50", "resourcePrev": guard}),
                4,
            ),
        )
        .unwrap();

        let record = state.escrow("e1").unwrap();
        assert_eq!(record.status, EscrowStatus::Refunded);
        assert!(record.balance.is_zero());
        // 1000 minted − 80 funded + 50 refunded = 970 available.
        assert_eq!(state.account(&a.address).available, amount(970));
        assert_eq!(state.account(&a.address).locked.escrow, amount(0));
        assert_eq!(state.account(&b.address).available, amount(30));
    }

    #[test]
    fn dispute_freezes_escrow() {
        let a = Keypair::generate();
        let b = Keypair::generate();
        let mut state = escrow_setup(&a, &b, 40);
        let guard = clawnet_core::types::EventHash::from_bytes([2; 32]).to_hex();

        apply_in_place(
            &mut state,
            &event(
                &b,
                TYPE_ESCROW_DISPUTE,
                json!({"escrowId": "e1", "reason": "undelivered", "resourcePrev": guard}),
                1,
            ),
        )
        .unwrap();
        assert_eq!(state.escrow("e1").unwrap().status, EscrowStatus::Disputed);

        // A disputed escrow accepts no further releases.
        let err = apply(
            &state,
            &event(
                &b,
                TYPE_ESCROW_RELEASE,
                json!({"escrowId": "e1", "amount": "40", "ruleId": "rule-1", "resourcePrev": guard}),
                2,
            ),
        )
        .unwrap_err();
        assert!(matches!(err, ClawError::InvalidTransition(_)));
    }

    #[test]
    fn release_requires_known_rule() {
        let a = Keypair::generate();
        let b = Keypair::generate();
        let state = escrow_setup(&a, &b, 50);
        let guard = clawnet_core::types::EventHash::from_bytes([2; 32]).to_hex();

        let err = apply(
            &state,
            &event(
                &b,
                TYPE_ESCROW_RELEASE,
                json!({"escrowId": "e1", "amount": "50", "ruleId": "rule-9", "resourcePrev": guard}),
                1,
            ),
        )
        .unwrap_err();
        assert!(matches!(err, ClawError::InvalidTransition(_)));
    }

    #[test]
    fn fund_must_come_from_depositor() {
        let a = Keypair::generate();
        let b = Keypair::generate();
        let mut state = WalletState::default();
        apply_in_place(
            &mut state,
            &event(&b, TYPE_MINT, json!({"to": b.address, "amount": "100"}), 1),
        )
        .unwrap();
        apply_in_place(
            &mut state,
            &event(
                &a,
                TYPE_ESCROW_CREATE,
                json!({"escrowId": "e2", "depositor": a.address, "beneficiary": b.address}),
                1,
            ),
        )
        .unwrap();

        let err = apply(
            &state,
            &event(
                &b,
                TYPE_ESCROW_FUND,
                json!({
                    "escrowId": "e2", "amount": "10",
                    "resourcePrev": clawnet_core::types::EventHash::from_bytes([1; 32]).to_hex(),
                }),
                2,
            ),
        )
        .unwrap_err();
        assert!(matches!(err, ClawError::InvalidTransition(_)));
    }

    #[test]
    fn supply_is_conserved_minus_burnt_fees() {
        let a = Keypair::generate();
        let b = Keypair::generate();
        let mut state = escrow_setup(&a, &b, 80);
        let guard = clawnet_core::types::EventHash::from_bytes([2; 32]).to_hex();
        apply_in_place(
            &mut state,
            &event(
                &b,
                TYPE_ESCROW_RELEASE,
                json!({"escrowId": "e1", "amount": "30", "ruleId": "rule-1", "resourcePrev": guard}),
                1,
            ),
        )
        .unwrap();
        apply_in_place(
            &mut state,
            &event(
                &a,
                TYPE_TRANSFER,
                json!({"to": b.address, "amount": "100", "fee": "7"}),
                4,
            ),
        )
        .unwrap();

        // 1000 minted, 7 burnt as fees; everything else is somewhere in
        // available or locked balances.
        let mut total = Amount::zero();
        for account in state.accounts.values() {
            total = &total + &account.available;
            total = &total + &account.pending;
            total = &total + &account.locked.escrow;
            total = &total + &account.locked.governance;
        }
        assert_eq!(total, amount(1000 - 7));
    }

    #[test]
    fn unknown_types_are_no_ops() {
        let a = Keypair::generate();
        let state = WalletState::default();
        for t in ["wallet.stake", "wallet.unstake", "wallet.governance.vote", "contract.propose"] {
            let next = apply(&state, &event(&a, t, json!({"amount": "5"}), 1)).unwrap();
            assert_eq!(next, state);
        }
    }
}
