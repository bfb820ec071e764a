use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::canonical::canonical_bytes;
use crate::constants::{ENVELOPE_VERSION, EVENT_SIGNING_DOMAIN};
use crate::error::ClawError;
use crate::types::{Did, EventHash, Nonce, Timestamp};

// ── Envelope ─────────────────────────────────────────────────────────────────

/// The signed, content-addressed event object gossiped between nodes.
///
/// `hash` is SHA-256 of the canonical (JCS) bytes of the envelope with `sig`
/// and `hash` removed; `sig` is a base58btc Ed25519 signature over the
/// domain-prefixed digest of those same bytes. Once signed, an envelope is
/// immutable.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    /// Schema version. Currently always 1.
    pub v: u32,

    /// Dotted event type, e.g. `wallet.transfer`.
    #[serde(rename = "type")]
    pub event_type: String,

    /// DID of the signing issuer.
    pub issuer: Did,

    /// Creation time, milliseconds since epoch.
    pub ts: Timestamp,

    /// Per-issuer sequence number, starting at 1.
    pub nonce: Nonce,

    /// Type-specific payload object.
    pub payload: Value,

    /// Hash of the issuer's previous event (per-issuer causal chain).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prev: Option<EventHash>,

    /// base58btc Ed25519 signature. Absent until signed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sig: Option<String>,

    /// Hex SHA-256 content address. Absent until signed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<EventHash>,
}

impl Envelope {
    /// Assemble an unsigned envelope.
    ///
    /// Validates the event type grammar, `nonce >= 1`, and that the payload
    /// is a JSON object. `sig` and `hash` stay empty until [`sign`ing]
    /// happens in clawnet-crypto.
    pub fn build(
        issuer: Did,
        event_type: impl Into<String>,
        payload: Value,
        nonce: Nonce,
        ts: Timestamp,
        prev: Option<EventHash>,
    ) -> Result<Self, ClawError> {
        let event_type = event_type.into();
        if !is_valid_event_type(&event_type) {
            return Err(ClawError::InvalidEventType(event_type));
        }
        if nonce < 1 {
            return Err(ClawError::InvalidNonce(nonce));
        }
        if !payload.is_object() {
            return Err(ClawError::PayloadNotObject);
        }
        Ok(Self {
            v: ENVELOPE_VERSION,
            event_type,
            issuer,
            ts,
            nonce,
            payload,
            prev,
            sig: None,
            hash: None,
        })
    }

    /// The envelope as a JSON value with `sig` and `hash` stripped, the
    /// form that gets canonicalized for hashing and signing.
    pub fn content_value(&self) -> Result<Value, ClawError> {
        let mut value =
            serde_json::to_value(self).map_err(|e| ClawError::Serialization(e.to_string()))?;
        if let Some(obj) = value.as_object_mut() {
            obj.remove("sig");
            obj.remove("hash");
        }
        Ok(value)
    }

    /// Content address: `SHA256(JCS(envelope \ {sig, hash}))`.
    pub fn content_hash(&self) -> Result<EventHash, ClawError> {
        let bytes = canonical_bytes(&self.content_value()?)?;
        Ok(EventHash(Sha256::digest(&bytes).into()))
    }

    /// The 32-byte message an issuer signs:
    /// `SHA256("clawtoken:event:v1:" ‖ JCS(envelope \ {sig, hash}))`.
    pub fn signing_bytes(&self) -> Result<[u8; 32], ClawError> {
        let bytes = canonical_bytes(&self.content_value()?)?;
        let mut hasher = Sha256::new();
        hasher.update(EVENT_SIGNING_DOMAIN);
        hasher.update(&bytes);
        Ok(hasher.finalize().into())
    }

    /// Canonical wire bytes of the full (signed) envelope.
    pub fn encode(&self) -> Result<Vec<u8>, ClawError> {
        let value =
            serde_json::to_value(self).map_err(|e| ClawError::Serialization(e.to_string()))?;
        canonical_bytes(&value)
    }

    /// Parse an envelope from wire bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, ClawError> {
        serde_json::from_slice(bytes).map_err(|e| ClawError::Serialization(e.to_string()))
    }

    /// True once both `sig` and `hash` are present.
    pub fn is_signed(&self) -> bool {
        self.sig.is_some() && self.hash.is_some()
    }

    /// The content address of a signed envelope.
    pub fn require_hash(&self) -> Result<EventHash, ClawError> {
        self.hash.ok_or(ClawError::Unsigned)
    }

    /// Structural integrity check: the embedded `hash` must equal the
    /// recomputed content hash. Signature verification is layered on top in
    /// clawnet-crypto.
    pub fn check_hash(&self) -> Result<EventHash, ClawError> {
        let embedded = self.require_hash()?;
        let computed = self.content_hash()?;
        if embedded != computed {
            return Err(ClawError::HashMismatch {
                expected: computed.to_hex(),
                got: embedded.to_hex(),
            });
        }
        Ok(embedded)
    }
}

/// Event type grammar: `^[a-z][a-z0-9]*(\.[a-z0-9]+)+$` — at least two
/// dot-separated lowercase alphanumeric segments, the first starting with a
/// letter.
pub fn is_valid_event_type(s: &str) -> bool {
    let mut segments = s.split('.');
    let first = match segments.next() {
        Some(seg) => seg,
        None => return false,
    };
    let mut first_chars = first.chars();
    match first_chars.next() {
        Some(c) if c.is_ascii_lowercase() => {}
        _ => return false,
    }
    if !first_chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()) {
        return false;
    }
    let mut rest = 0;
    for seg in segments {
        if seg.is_empty() || !seg.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()) {
            return false;
        }
        rest += 1;
    }
    rest >= 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_did() -> Did {
        Did::new("did:claw:z6MkhaXgBZDvotDkL5257faiztiGiC2QtKLGpbnnEGta2doK").unwrap()
    }

    #[test]
    fn event_type_grammar() {
        assert!(is_valid_event_type("wallet.transfer"));
        assert!(is_valid_event_type("wallet.escrow.create"));
        assert!(is_valid_event_type("a1.b2"));
        assert!(!is_valid_event_type("wallet"));
        assert!(!is_valid_event_type("Wallet.transfer"));
        assert!(!is_valid_event_type("1wallet.transfer"));
        assert!(!is_valid_event_type("wallet..transfer"));
        assert!(!is_valid_event_type("wallet.transfer."));
        assert!(!is_valid_event_type(".transfer"));
    }

    #[test]
    fn build_rejects_bad_inputs() {
        let did = test_did();
        assert!(matches!(
            Envelope::build(did.clone(), "wallet.mint", json!({}), 0, 0, None),
            Err(ClawError::InvalidNonce(0))
        ));
        assert!(matches!(
            Envelope::build(did.clone(), "wallet.mint", json!([1]), 1, 0, None),
            Err(ClawError::PayloadNotObject)
        ));
        assert!(matches!(
            Envelope::build(did, "notdotted", json!({}), 1, 0, None),
            Err(ClawError::InvalidEventType(_))
        ));
    }

    #[test]
    fn content_hash_excludes_sig_and_hash() {
        let mut env = Envelope::build(
            test_did(),
            "wallet.mint",
            json!({"to": "clawX", "amount": "5"}),
            1,
            1_700_000_000_000,
            None,
        )
        .unwrap();
        let h1 = env.content_hash().unwrap();
        env.sig = Some("zsig".into());
        env.hash = Some(h1);
        let h2 = env.content_hash().unwrap();
        assert_eq!(h1, h2);
    }

    #[test]
    fn wire_round_trip_preserves_hash() {
        let mut env = Envelope::build(
            test_did(),
            "wallet.transfer",
            json!({"to": "clawY", "amount": "30", "fee": "1"}),
            2,
            1_700_000_000_123,
            Some(EventHash::from_bytes([9u8; 32])),
        )
        .unwrap();
        env.hash = Some(env.content_hash().unwrap());
        env.sig = Some("zAAAA".into());

        let bytes = env.encode().unwrap();
        let parsed = Envelope::decode(&bytes).unwrap();
        assert_eq!(parsed, env);
        assert_eq!(parsed.content_hash().unwrap(), env.content_hash().unwrap());
    }

    #[test]
    fn check_hash_detects_tampering() {
        let mut env = Envelope::build(
            test_did(),
            "wallet.mint",
            json!({"to": "clawX", "amount": "100"}),
            1,
            0,
            None,
        )
        .unwrap();
        env.hash = Some(env.content_hash().unwrap());
        env.payload = json!({"to": "clawX", "amount": "999"});
        assert!(matches!(env.check_hash(), Err(ClawError::HashMismatch { .. })));
    }
}
