//! Snapshots: a replayable summary of derived state at a specific envelope
//! hash, counter-signed by nodes that validated it themselves.
//!
//! On disk: one canonical-JSON file per snapshot under `<dataDir>/snapshots/`,
//! named `<at>.json`. Canonical bytes keep snapshot serialization byte-equal
//! across nodes, which bootstrap comparison relies on.

use std::fs;
use std::path::{Path, PathBuf};

use ed25519_dalek::{Signature, Verifier};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use clawnet_core::canonical::canonical_bytes;
use clawnet_core::constants::SNAPSHOT_SIGNING_DOMAIN;
use clawnet_core::error::ClawError;
use clawnet_core::types::{Did, EventHash, Timestamp};
use clawnet_crypto::{public_key_from_did, Keypair};
use clawnet_store::EventStore;

use crate::engine::replay;
use crate::reducer::WalletState;

/// One counter-signature over the snapshot content.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SnapshotSignature {
    pub signer: Did,
    pub sig: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Snapshot {
    /// Hash of the last event folded into `state`.
    pub at: EventHash,
    #[serde(rename = "createdAt")]
    pub created_at: Timestamp,
    pub state: WalletState,
    #[serde(default)]
    pub signatures: Vec<SnapshotSignature>,
}

impl Snapshot {
    /// `SHA256("clawtoken:snapshot:v1:" ‖ JCS(snapshot \ signatures))`.
    fn signing_bytes(&self) -> Result<[u8; 32], ClawError> {
        let mut value = serde_json::to_value(self)
            .map_err(|e| ClawError::Serialization(e.to_string()))?;
        if let Some(obj) = value.as_object_mut() {
            obj.remove("signatures");
        }
        let bytes = canonical_bytes(&value)?;
        let mut hasher = Sha256::new();
        hasher.update(SNAPSHOT_SIGNING_DOMAIN);
        hasher.update(&bytes);
        Ok(hasher.finalize().into())
    }

    /// Counter-sign. Callers must have validated the snapshot themselves
    /// (replayed the log and compared) before vouching for it.
    pub fn sign(&mut self, keypair: &Keypair) -> Result<(), ClawError> {
        if self.signatures.iter().any(|s| s.signer == keypair.did) {
            return Ok(());
        }
        let message = self.signing_bytes()?;
        let sig = keypair.sign(&message);
        self.signatures.push(SnapshotSignature {
            signer: keypair.did.clone(),
            sig: bs58::encode(sig.to_bytes()).into_string(),
        });
        Ok(())
    }

    /// Count of valid signatures from distinct signers.
    pub fn valid_signature_count(&self) -> Result<usize, ClawError> {
        let message = self.signing_bytes()?;
        let mut seen = std::collections::HashSet::new();
        let mut count = 0usize;
        for entry in &self.signatures {
            if !seen.insert(entry.signer.clone()) {
                continue;
            }
            let Ok(pk) = public_key_from_did(&entry.signer) else {
                continue;
            };
            let Ok(sig_bytes) = bs58::decode(&entry.sig).into_vec() else {
                continue;
            };
            let Ok(sig_arr) = <[u8; 64]>::try_from(sig_bytes) else {
                continue;
            };
            if pk.verify(&message, &Signature::from_bytes(&sig_arr)).is_ok() {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Bootstrap eligibility: at least `min` valid distinct signatures.
    pub fn check_eligible(&self, min: usize) -> Result<(), ClawError> {
        let got = self.valid_signature_count()?;
        if got < min {
            return Err(ClawError::SnapshotInsufficientSignatures { need: min, got });
        }
        Ok(())
    }

    /// Canonical file bytes.
    pub fn encode(&self) -> Result<Vec<u8>, ClawError> {
        let value = serde_json::to_value(self)
            .map_err(|e| ClawError::Serialization(e.to_string()))?;
        canonical_bytes(&value)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ClawError> {
        serde_json::from_slice(bytes).map_err(|e| ClawError::Serialization(e.to_string()))
    }
}

/// Replay the full log through the reducer and package the result.
/// `None` when the log is empty: nothing to summarize yet.
pub fn create_snapshot(
    store: &EventStore,
    now: Timestamp,
) -> Result<Option<Snapshot>, ClawError> {
    let len = store.log_length()?;
    if len == 0 {
        return Ok(None);
    }
    let head = store
        .get_by_seq(len - 1)?
        .ok_or_else(|| ClawError::StoreIo("log head missing".into()))?;
    let state = replay(store, WalletState::default(), 0)?;
    Ok(Some(Snapshot {
        at: head.require_hash()?,
        created_at: now,
        state,
        signatures: Vec::new(),
    }))
}

// ── On-disk store ────────────────────────────────────────────────────────────

pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, ClawError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| ClawError::StoreIo(e.to_string()))?;
        Ok(Self { dir })
    }

    /// Persist atomically: write to a temp file, then rename into place.
    pub fn save(&self, snapshot: &Snapshot) -> Result<(), ClawError> {
        let bytes = snapshot.encode()?;
        let path = self.path_for(&snapshot.at);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, &bytes).map_err(|e| ClawError::StoreIo(e.to_string()))?;
        fs::rename(&tmp, &path).map_err(|e| ClawError::StoreIo(e.to_string()))?;
        Ok(())
    }

    pub fn load(&self, at: &EventHash) -> Result<Option<Snapshot>, ClawError> {
        let path = self.path_for(at);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&path).map_err(|e| ClawError::StoreIo(e.to_string()))?;
        Ok(Some(Snapshot::decode(&bytes)?))
    }

    /// The most recently created snapshot on disk, if any.
    pub fn latest(&self) -> Result<Option<Snapshot>, ClawError> {
        let mut latest: Option<Snapshot> = None;
        for entry in fs::read_dir(&self.dir).map_err(|e| ClawError::StoreIo(e.to_string()))? {
            let path = entry.map_err(|e| ClawError::StoreIo(e.to_string()))?.path();
            if path.extension().map_or(true, |e| e != "json") {
                continue;
            }
            let bytes = fs::read(&path).map_err(|e| ClawError::StoreIo(e.to_string()))?;
            let snapshot = Snapshot::decode(&bytes)?;
            if latest
                .as_ref()
                .map_or(true, |s| snapshot.created_at > s.created_at)
            {
                latest = Some(snapshot);
            }
        }
        Ok(latest)
    }

    fn path_for(&self, at: &EventHash) -> PathBuf {
        self.dir.join(format!("{}.json", at.to_hex()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clawnet_crypto::sign_envelope;
    use clawnet_store::MemoryKv;
    use serde_json::json;
    use std::sync::Arc;

    fn populated_store() -> (Arc<EventStore>, Keypair) {
        let store = Arc::new(EventStore::new(Arc::new(MemoryKv::new())));
        let kp = Keypair::generate();
        for nonce in 1..=3u64 {
            let mut env = clawnet_core::envelope::Envelope::build(
                kp.did.clone(),
                "wallet.mint",
                json!({"to": kp.address, "amount": "10"}),
                nonce,
                1_700_000_000_000 + nonce as i64,
                None,
            )
            .unwrap();
            sign_envelope(&mut env, &kp).unwrap();
            store.append(env).unwrap();
        }
        (store, kp)
    }

    #[test]
    fn snapshot_replays_log_and_points_at_head() {
        let (store, kp) = populated_store();
        let snapshot = create_snapshot(&store, 1_700_000_100_000).unwrap().unwrap();
        assert_eq!(
            snapshot.state.account(&kp.address).available,
            clawnet_core::types::Amount::from_u64(30)
        );
        let head = store.get_by_seq(2).unwrap().unwrap();
        assert_eq!(snapshot.at, head.require_hash().unwrap());
    }

    #[test]
    fn empty_log_yields_no_snapshot() {
        let store = EventStore::new(Arc::new(MemoryKv::new()));
        assert!(create_snapshot(&store, 0).unwrap().is_none());
    }

    #[test]
    fn signatures_count_distinct_valid_signers() {
        let (store, _) = populated_store();
        let mut snapshot = create_snapshot(&store, 1).unwrap().unwrap();

        let s1 = Keypair::generate();
        let s2 = Keypair::generate();
        snapshot.sign(&s1).unwrap();
        snapshot.sign(&s1).unwrap(); // signing twice is a no-op
        snapshot.sign(&s2).unwrap();
        assert_eq!(snapshot.valid_signature_count().unwrap(), 2);

        assert!(matches!(
            snapshot.check_eligible(3),
            Err(ClawError::SnapshotInsufficientSignatures { need: 3, got: 2 })
        ));
        snapshot.sign(&Keypair::generate()).unwrap();
        snapshot.check_eligible(3).unwrap();
    }

    #[test]
    fn tampered_state_invalidates_signatures() {
        let (store, kp) = populated_store();
        let mut snapshot = create_snapshot(&store, 1).unwrap().unwrap();
        snapshot.sign(&Keypair::generate()).unwrap();

        snapshot
            .state
            .accounts
            .get_mut(&kp.address)
            .unwrap()
            .available = clawnet_core::types::Amount::from_u64(1_000_000);
        assert_eq!(snapshot.valid_signature_count().unwrap(), 0);
    }

    #[test]
    fn disk_round_trip_is_byte_stable() {
        let (store, _) = populated_store();
        let dir = tempfile::tempdir().unwrap();
        let snapshots = SnapshotStore::open(dir.path()).unwrap();

        let mut snapshot = create_snapshot(&store, 42).unwrap().unwrap();
        snapshot.sign(&Keypair::generate()).unwrap();
        snapshots.save(&snapshot).unwrap();

        let loaded = snapshots.load(&snapshot.at).unwrap().unwrap();
        assert_eq!(loaded, snapshot);
        assert_eq!(loaded.encode().unwrap(), snapshot.encode().unwrap());
        assert_eq!(snapshots.latest().unwrap().unwrap(), snapshot);
    }
}
