//! Typed payload schemas and the resource-guard mapping.
//!
//! A resource is a disjoint state unit (escrow, DID document, market
//! listing, contract). Mutating events for an existing resource must carry
//! `payload.resourcePrev` equal to the hash of the latest accepted event for
//! that resource; creation events omit it or set it to null.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::error::ClawError;
use crate::types::{Address, Amount, EventHash, Timestamp};

// ── Event type names ─────────────────────────────────────────────────────────

pub const TYPE_MINT: &str = "wallet.mint";
pub const TYPE_TRANSFER: &str = "wallet.transfer";
pub const TYPE_ESCROW_CREATE: &str = "wallet.escrow.create";
pub const TYPE_ESCROW_FUND: &str = "wallet.escrow.fund";
pub const TYPE_ESCROW_RELEASE: &str = "wallet.escrow.release";
pub const TYPE_ESCROW_REFUND: &str = "wallet.escrow.refund";
pub const TYPE_ESCROW_DISPUTE: &str = "wallet.escrow.dispute";
pub const TYPE_IDENTITY_REGISTER: &str = "identity.register";
pub const TYPE_IDENTITY_UPDATE: &str = "identity.update";
pub const TYPE_LISTING_CREATE: &str = "market.listing.create";
pub const TYPE_LISTING_UPDATE: &str = "market.listing.update";

// ── Wallet payloads ──────────────────────────────────────────────────────────

/// `wallet.mint` — credit `available` of `to`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MintPayload {
    pub to: Address,
    pub amount: Amount,
}

/// `wallet.transfer` — debit issuer's address by `amount + fee`, credit
/// `to` by `amount`. The fee is burnt.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TransferPayload {
    pub to: Address,
    pub amount: Amount,
    #[serde(default)]
    pub fee: Amount,
}

// ── Escrow payloads ──────────────────────────────────────────────────────────

/// A named release rule; releases must reference one by id.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseRule {
    pub id: String,
}

/// `wallet.escrow.create` — register a pending escrow between two addresses.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EscrowCreatePayload {
    pub escrow_id: String,
    pub depositor: Address,
    pub beneficiary: Address,
    #[serde(default)]
    pub release_rules: Vec<ReleaseRule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<Timestamp>,
}

/// `wallet.escrow.fund` — move `amount` from the depositor's `available`
/// into `locked.escrow`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EscrowFundPayload {
    pub escrow_id: String,
    pub amount: Amount,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_prev: Option<EventHash>,
}

/// `wallet.escrow.release` — pay `amount` of the escrow balance to the
/// beneficiary under a named release rule.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EscrowReleasePayload {
    pub escrow_id: String,
    pub amount: Amount,
    pub rule_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_prev: Option<EventHash>,
}

/// `wallet.escrow.refund` — return `amount` of the escrow balance to the
/// depositor's `available`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EscrowRefundPayload {
    pub escrow_id: String,
    pub amount: Amount,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_prev: Option<EventHash>,
}

/// `wallet.escrow.dispute` — freeze the escrow in `disputed`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EscrowDisputePayload {
    pub escrow_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_prev: Option<EventHash>,
}

// ── Resource guards ──────────────────────────────────────────────────────────

/// The kinds of disjoint state units serialized per-resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Escrow,
    Did,
    Listing,
    Contract,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Escrow => "escrow",
            ResourceKind::Did => "did",
            ResourceKind::Listing => "listing",
            ResourceKind::Contract => "contract",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What an envelope claims about the resource it touches.
#[derive(Clone, Debug, PartialEq)]
pub struct ResourceRef {
    pub kind: ResourceKind,
    pub id: String,
    /// Guard value: hash of the last accepted event for this resource.
    /// `None` only for creation events.
    pub prev: Option<EventHash>,
    /// True when this event creates the resource.
    pub create: bool,
}

/// Extract the resource reference for an event type + payload, or `None`
/// for events that touch no resource (mint, transfer, stake, governance…).
///
/// Mutations of an existing resource must carry `resourcePrev`; a missing
/// guard is reported as a conflict on that resource.
pub fn resource_ref(event_type: &str, payload: &Value) -> Result<Option<ResourceRef>, ClawError> {
    let (kind, id_field, create) = match event_type {
        TYPE_ESCROW_CREATE => (ResourceKind::Escrow, "escrowId", true),
        TYPE_ESCROW_FUND | TYPE_ESCROW_RELEASE | TYPE_ESCROW_REFUND | TYPE_ESCROW_DISPUTE => {
            (ResourceKind::Escrow, "escrowId", false)
        }
        TYPE_IDENTITY_REGISTER => (ResourceKind::Did, "id", true),
        TYPE_IDENTITY_UPDATE => (ResourceKind::Did, "id", false),
        TYPE_LISTING_CREATE => (ResourceKind::Listing, "listingId", true),
        TYPE_LISTING_UPDATE => (ResourceKind::Listing, "listingId", false),
        t if t.starts_with("contract.") => {
            let create = t.ends_with(".create");
            (ResourceKind::Contract, "contractId", create)
        }
        _ => return Ok(None),
    };

    let id = payload
        .get(id_field)
        .and_then(Value::as_str)
        .ok_or_else(|| {
            ClawError::Serialization(format!("{event_type} payload missing {id_field}"))
        })?
        .to_string();

    let prev = match payload.get("resourcePrev") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(EventHash::from_hex(s)?),
        Some(_) => {
            return Err(ClawError::Serialization(
                "resourcePrev must be a hash string or null".into(),
            ))
        }
    };

    if !create && prev.is_none() {
        return Err(ClawError::ResourceConflict {
            kind: kind.as_str().into(),
            id,
        });
    }

    Ok(Some(ResourceRef { kind, id, prev, create }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn transfer_payload_round_trip() {
        let v = json!({"to": Address::from_public_key(&[1u8; 32]), "amount": "30", "fee": "1"});
        let p: TransferPayload = serde_json::from_value(v.clone()).unwrap();
        assert_eq!(p.amount, Amount::from_u64(30));
        assert_eq!(serde_json::to_value(&p).unwrap(), v);
    }

    #[test]
    fn transfer_fee_defaults_to_zero() {
        let v = json!({"to": Address::from_public_key(&[1u8; 32]), "amount": "30"});
        let p: TransferPayload = serde_json::from_value(v).unwrap();
        assert!(p.fee.is_zero());
    }

    #[test]
    fn escrow_create_has_no_guard() {
        let r = resource_ref(TYPE_ESCROW_CREATE, &json!({"escrowId": "e1"}))
            .unwrap()
            .unwrap();
        assert_eq!(r.kind, ResourceKind::Escrow);
        assert!(r.create);
        assert!(r.prev.is_none());
    }

    #[test]
    fn escrow_mutation_requires_guard() {
        let err = resource_ref(TYPE_ESCROW_FUND, &json!({"escrowId": "e1", "amount": "50"}))
            .unwrap_err();
        assert!(matches!(err, ClawError::ResourceConflict { .. }));

        let prev = EventHash::from_bytes([3u8; 32]);
        let r = resource_ref(
            TYPE_ESCROW_FUND,
            &json!({"escrowId": "e1", "amount": "50", "resourcePrev": prev.to_hex()}),
        )
        .unwrap()
        .unwrap();
        assert_eq!(r.prev, Some(prev));
        assert!(!r.create);
    }

    #[test]
    fn plain_wallet_events_touch_no_resource() {
        assert!(resource_ref(TYPE_MINT, &json!({"to": "x", "amount": "1"}))
            .unwrap()
            .is_none());
        assert!(resource_ref("wallet.stake", &json!({"amount": "1"}))
            .unwrap()
            .is_none());
    }
}
