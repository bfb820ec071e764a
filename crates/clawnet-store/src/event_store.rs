//! Append-only event store.
//!
//! Key layout inside one ordered keyspace (single batch = atomic append):
//!
//!   seq/<u64-be>                         → canonical envelope bytes
//!   hash/<hex>                           → u64-be sequence
//!   issuer/<did>/<u64-be nonce>          → hex hash
//!   resource/<kind>/<id>/<u64-be seq>    → hex hash
//!   head/issuer/<did>                    → bincode IssuerHead
//!   head/resource/<kind>/<id>            → hex hash
//!   meta/logLength                       → u64-be
//!
//! Appends run in two phases: `stage` performs every check (signature, hash
//! integrity, duplicate drop, nonce/prev chain, resource guard) and builds
//! the batch; `commit` applies it. The engine dry-runs the state reducer
//! between the two, so an invalid transition never reaches the keyspace.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use clawnet_core::envelope::Envelope;
use clawnet_core::error::ClawError;
use clawnet_core::payload::{resource_ref, ResourceKind, ResourceRef};
use clawnet_core::types::{Did, EventHash, Nonce};
use clawnet_crypto::verify_envelope;

use crate::kv::{BatchOp, Kv};

const META_LOG_LENGTH: &[u8] = b"meta/logLength";

/// Latest accepted event for one issuer.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct IssuerHead {
    pub nonce: Nonce,
    pub hash: EventHash,
}

/// A fully validated append, ready to commit.
pub struct StagedAppend {
    envelope: Envelope,
    hash: EventHash,
    seq: u64,
    ops: Vec<BatchOp>,
}

impl StagedAppend {
    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    pub fn hash(&self) -> EventHash {
        self.hash
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }
}

pub struct EventStore {
    kv: Arc<dyn Kv>,
}

impl EventStore {
    pub fn new(kv: Arc<dyn Kv>) -> Self {
        Self { kv }
    }

    pub fn kv(&self) -> &Arc<dyn Kv> {
        &self.kv
    }

    // ── Append pipeline ──────────────────────────────────────────────────────

    /// Validate an envelope against the chain heads and build the atomic
    /// batch for it. Returns `Ok(None)` for an already-known hash (the one
    /// silently absorbed failure); every other rejection is surfaced.
    pub fn stage(&self, envelope: Envelope) -> Result<Option<StagedAppend>, ClawError> {
        verify_envelope(&envelope)?;
        let hash = envelope.require_hash()?;

        // Idempotent duplicate suppression.
        if self.kv.get(&key_hash(&hash))?.is_some() {
            debug!(hash = %hash, "duplicate event dropped");
            return Ok(None);
        }

        // Per-issuer causal chain: dense nonces, prev = head hash.
        let issuer = &envelope.issuer;
        let head = self.issuer_head(issuer)?;
        let expected_nonce = head.as_ref().map(|h| h.nonce + 1).unwrap_or(1);
        if envelope.nonce != expected_nonce {
            return Err(ClawError::NonceGap {
                issuer: issuer.to_string(),
                expected: expected_nonce,
                got: envelope.nonce,
            });
        }
        if let Some(claimed) = envelope.prev {
            match &head {
                Some(h) if h.hash == claimed => {}
                _ => {
                    return Err(ClawError::PrevMismatch {
                        issuer: issuer.to_string(),
                        head: head
                            .as_ref()
                            .map(|h| h.hash.to_hex())
                            .unwrap_or_else(|| "none".into()),
                        claimed: claimed.to_hex(),
                    })
                }
            }
        }

        // Resource concurrency guard.
        let resource = resource_ref(&envelope.event_type, &envelope.payload)?;
        if let Some(r) = &resource {
            let resource_head = self.resource_head(r.kind, &r.id)?;
            let consistent = if r.create {
                resource_head.is_none() && r.prev.is_none()
            } else {
                resource_head.is_some() && r.prev == resource_head
            };
            if !consistent {
                return Err(ClawError::ResourceConflict {
                    kind: r.kind.as_str().into(),
                    id: r.id.clone(),
                });
            }
        }

        let seq = self.log_length()?;
        let ops = self.build_ops(&envelope, &hash, seq, resource.as_ref())?;
        Ok(Some(StagedAppend { envelope, hash, seq, ops }))
    }

    /// Apply a staged append atomically.
    pub fn commit(&self, staged: StagedAppend) -> Result<EventHash, ClawError> {
        self.kv.batch(staged.ops)?;
        debug!(hash = %staged.hash, seq = staged.seq, "event appended");
        Ok(staged.hash)
    }

    /// Stage + commit without a reducer dry-run. Returns `false` for
    /// duplicates, `true` for a fresh append.
    pub fn append(&self, envelope: Envelope) -> Result<bool, ClawError> {
        match self.stage(envelope)? {
            Some(staged) => {
                self.commit(staged)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn build_ops(
        &self,
        envelope: &Envelope,
        hash: &EventHash,
        seq: u64,
        resource: Option<&ResourceRef>,
    ) -> Result<Vec<BatchOp>, ClawError> {
        let bytes = envelope.encode()?;
        let head = IssuerHead { nonce: envelope.nonce, hash: *hash };
        let head_bytes =
            bincode::serialize(&head).map_err(|e| ClawError::Serialization(e.to_string()))?;

        let mut ops = vec![
            BatchOp::Put { key: key_seq(seq), value: bytes },
            BatchOp::Put { key: key_hash(hash), value: seq.to_be_bytes().to_vec() },
            BatchOp::Put {
                key: key_issuer(&envelope.issuer, envelope.nonce),
                value: hash.to_hex().into_bytes(),
            },
            BatchOp::Put { key: key_head_issuer(&envelope.issuer), value: head_bytes },
            BatchOp::Put {
                key: META_LOG_LENGTH.to_vec(),
                value: (seq + 1).to_be_bytes().to_vec(),
            },
        ];
        if let Some(r) = resource {
            ops.push(BatchOp::Put {
                key: key_resource(r.kind, &r.id, seq),
                value: hash.to_hex().into_bytes(),
            });
            ops.push(BatchOp::Put {
                key: key_head_resource(r.kind, &r.id),
                value: hash.to_hex().into_bytes(),
            });
        }
        Ok(ops)
    }

    // ── Reads ────────────────────────────────────────────────────────────────

    /// Number of events in the log (also the next sequence number).
    pub fn log_length(&self) -> Result<u64, ClawError> {
        match self.kv.get(META_LOG_LENGTH)? {
            Some(bytes) => decode_u64(&bytes),
            None => Ok(0),
        }
    }

    /// Sequence number for a content hash, if the event is stored.
    pub fn event_seq(&self, hash: &EventHash) -> Result<Option<u64>, ClawError> {
        match self.kv.get(&key_hash(hash))? {
            Some(bytes) => Ok(Some(decode_u64(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn contains(&self, hash: &EventHash) -> Result<bool, ClawError> {
        Ok(self.kv.get(&key_hash(hash))?.is_some())
    }

    pub fn get_by_seq(&self, seq: u64) -> Result<Option<Envelope>, ClawError> {
        match self.kv.get(&key_seq(seq))? {
            Some(bytes) => Ok(Some(Envelope::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn get_by_hash(&self, hash: &EventHash) -> Result<Option<Envelope>, ClawError> {
        match self.event_seq(hash)? {
            Some(seq) => self.get_by_seq(seq),
            None => Ok(None),
        }
    }

    /// Events in log order starting at `from_seq`, at most `limit`.
    pub fn scan_log(&self, from_seq: u64, limit: usize) -> Result<Vec<Envelope>, ClawError> {
        let start = key_seq(from_seq);
        let entries = self.kv.range(b"seq/", Some(&start), None, Some(limit))?;
        entries
            .into_iter()
            .map(|(_, bytes)| Envelope::decode(&bytes))
            .collect()
    }

    /// An issuer's events ordered by nonce, starting at `from_nonce`.
    pub fn range_by_issuer(
        &self,
        issuer: &Did,
        from_nonce: Nonce,
        limit: usize,
    ) -> Result<Vec<Envelope>, ClawError> {
        let prefix = issuer_prefix(issuer);
        let start = key_issuer(issuer, from_nonce);
        let entries = self.kv.range(&prefix, Some(&start), None, Some(limit))?;
        self.resolve_hash_values(entries)
    }

    /// Full mutation history of one resource, in log order.
    pub fn range_by_resource(
        &self,
        kind: ResourceKind,
        id: &str,
    ) -> Result<Vec<Envelope>, ClawError> {
        let prefix = resource_prefix(kind, id);
        let entries = self.kv.range(&prefix, None, None, None)?;
        self.resolve_hash_values(entries)
    }

    /// Every issuer with at least one accepted event, with its head.
    pub fn issuers(&self) -> Result<Vec<(Did, IssuerHead)>, ClawError> {
        let prefix = b"head/issuer/";
        let entries = self.kv.range(prefix, None, None, None)?;
        let mut out = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            let did_str = String::from_utf8(key[prefix.len()..].to_vec())
                .map_err(|e| ClawError::Serialization(e.to_string()))?;
            let head: IssuerHead = bincode::deserialize(&value)
                .map_err(|e| ClawError::Serialization(e.to_string()))?;
            out.push((Did::new(did_str)?, head));
        }
        Ok(out)
    }

    pub fn issuer_head(&self, issuer: &Did) -> Result<Option<IssuerHead>, ClawError> {
        match self.kv.get(&key_head_issuer(issuer))? {
            Some(bytes) => bincode::deserialize(&bytes)
                .map(Some)
                .map_err(|e| ClawError::Serialization(e.to_string())),
            None => Ok(None),
        }
    }

    pub fn resource_head(
        &self,
        kind: ResourceKind,
        id: &str,
    ) -> Result<Option<EventHash>, ClawError> {
        match self.kv.get(&key_head_resource(kind, id))? {
            Some(bytes) => {
                let hex = String::from_utf8(bytes)
                    .map_err(|e| ClawError::Serialization(e.to_string()))?;
                Ok(Some(EventHash::from_hex(&hex)?))
            }
            None => Ok(None),
        }
    }

    pub fn flush(&self) -> Result<(), ClawError> {
        self.kv.flush()
    }

    fn resolve_hash_values(
        &self,
        entries: Vec<(Vec<u8>, Vec<u8>)>,
    ) -> Result<Vec<Envelope>, ClawError> {
        let mut out = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            let hex = String::from_utf8(value)
                .map_err(|e| ClawError::Serialization(e.to_string()))?;
            let hash = EventHash::from_hex(&hex)?;
            let envelope = self.get_by_hash(&hash)?.ok_or_else(|| {
                ClawError::StoreIo(format!(
                    "index entry {} points at missing event {hash}",
                    String::from_utf8_lossy(&key)
                ))
            })?;
            out.push(envelope);
        }
        Ok(out)
    }
}

// ── Key builders ─────────────────────────────────────────────────────────────

fn key_seq(seq: u64) -> Vec<u8> {
    let mut key = b"seq/".to_vec();
    key.extend_from_slice(&seq.to_be_bytes());
    key
}

fn key_hash(hash: &EventHash) -> Vec<u8> {
    format!("hash/{}", hash.to_hex()).into_bytes()
}

fn issuer_prefix(issuer: &Did) -> Vec<u8> {
    format!("issuer/{issuer}/").into_bytes()
}

fn key_issuer(issuer: &Did, nonce: Nonce) -> Vec<u8> {
    let mut key = issuer_prefix(issuer);
    key.extend_from_slice(&nonce.to_be_bytes());
    key
}

fn resource_prefix(kind: ResourceKind, id: &str) -> Vec<u8> {
    format!("resource/{kind}/{id}/").into_bytes()
}

fn key_resource(kind: ResourceKind, id: &str, seq: u64) -> Vec<u8> {
    let mut key = resource_prefix(kind, id);
    key.extend_from_slice(&seq.to_be_bytes());
    key
}

fn key_head_issuer(issuer: &Did) -> Vec<u8> {
    format!("head/issuer/{issuer}").into_bytes()
}

fn key_head_resource(kind: ResourceKind, id: &str) -> Vec<u8> {
    format!("head/resource/{kind}/{id}").into_bytes()
}

fn decode_u64(bytes: &[u8]) -> Result<u64, ClawError> {
    let arr: [u8; 8] = bytes
        .try_into()
        .map_err(|_| ClawError::Serialization("u64 record has wrong length".into()))?;
    Ok(u64::from_be_bytes(arr))
}
