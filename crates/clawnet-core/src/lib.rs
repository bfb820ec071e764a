pub mod canonical;
pub mod constants;
pub mod envelope;
pub mod error;
pub mod payload;
pub mod types;

pub use canonical::{canonical_bytes, canonical_string};
pub use constants::*;
pub use envelope::{is_valid_event_type, Envelope};
pub use error::ClawError;
pub use payload::{
    resource_ref, EscrowCreatePayload, EscrowDisputePayload, EscrowFundPayload,
    EscrowRefundPayload, EscrowReleasePayload, MintPayload, ReleaseRule, ResourceKind,
    ResourceRef, TransferPayload,
};
pub use types::{Address, Amount, Did, EventHash, Nonce, Timestamp};
