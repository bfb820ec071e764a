//! Sync RPC wire messages.
//!
//! Requests and responses ride the shared `/clawnet/1.0.0/requests` and
//! `/clawnet/1.0.0/responses` gossip topics as canonical-JSON objects with a
//! leading `kind` field. Because the topics are shared, each request carries
//! a random `id` and the requester's peer id; responses echo both.

use rand::RngCore;
use serde::{Deserialize, Serialize};

use clawnet_core::canonical::canonical_bytes;
use clawnet_core::envelope::Envelope;
use clawnet_core::error::ClawError;
use clawnet_core::types::{Did, Nonce};
use clawnet_state::Snapshot;

use crate::ticket::Ticket;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SyncRequest {
    /// Pull a window of one issuer's chain.
    Range {
        id: String,
        requester: String,
        issuer: Did,
        #[serde(rename = "fromNonce")]
        from_nonce: Nonce,
        #[serde(rename = "toNonce", default, skip_serializing_if = "Option::is_none")]
        to_nonce: Option<Nonce>,
        ticket: Ticket,
    },
    /// Pull the responder's latest eligible snapshot.
    Snapshot {
        id: String,
        requester: String,
        ticket: Ticket,
    },
}

impl SyncRequest {
    pub fn id(&self) -> &str {
        match self {
            SyncRequest::Range { id, .. } | SyncRequest::Snapshot { id, .. } => id,
        }
    }

    pub fn requester(&self) -> &str {
        match self {
            SyncRequest::Range { requester, .. } | SyncRequest::Snapshot { requester, .. } => {
                requester
            }
        }
    }

    pub fn ticket(&self) -> &Ticket {
        match self {
            SyncRequest::Range { ticket, .. } | SyncRequest::Snapshot { ticket, .. } => ticket,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, ClawError> {
        encode_canonical(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ClawError> {
        serde_json::from_slice(bytes).map_err(|e| ClawError::Serialization(e.to_string()))
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SyncResponse {
    /// Range reply: envelopes in nonce order, bounded by the chunk size.
    Events {
        id: String,
        requester: String,
        events: Vec<Envelope>,
    },
    /// Snapshot reply: the snapshot with its counter-signatures attached.
    Snapshot {
        id: String,
        requester: String,
        snapshot: Snapshot,
    },
}

impl SyncResponse {
    pub fn id(&self) -> &str {
        match self {
            SyncResponse::Events { id, .. } | SyncResponse::Snapshot { id, .. } => id,
        }
    }

    pub fn requester(&self) -> &str {
        match self {
            SyncResponse::Events { requester, .. } | SyncResponse::Snapshot { requester, .. } => {
                requester
            }
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, ClawError> {
        encode_canonical(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ClawError> {
        serde_json::from_slice(bytes).map_err(|e| ClawError::Serialization(e.to_string()))
    }
}

fn encode_canonical<T: Serialize>(value: &T) -> Result<Vec<u8>, ClawError> {
    let json = serde_json::to_value(value).map_err(|e| ClawError::Serialization(e.to_string()))?;
    canonical_bytes(&json)
}

/// Random correlation id for a fresh request.
pub fn request_id() -> String {
    let mut bytes = [0u8; 8];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}
