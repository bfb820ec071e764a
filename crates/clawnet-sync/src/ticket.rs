//! Sybil-resistance tickets for sync requests.
//!
//! A ticket is a time-bounded authorization checked by responders under the
//! node's configured policy. Invalid or expired tickets are dropped without
//! a reply so a forged request can never amplify traffic.

use async_trait::async_trait;
use ed25519_dalek::{Signature, Verifier};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};

use clawnet_core::canonical::canonical_bytes;
use clawnet_core::constants::TICKET_SIGNING_DOMAIN;
use clawnet_core::error::ClawError;
use clawnet_core::types::{Amount, Did, Timestamp};
use clawnet_crypto::{mine_ticket, public_key_from_did, verify_ticket_pow, Keypair};

/// Responder-side policy. A single value per node.
#[derive(Clone, Debug, PartialEq)]
pub enum SybilPolicy {
    /// Answer anyone.
    None,
    /// Answer only requests originating from these libp2p peer ids.
    Allowlist(Vec<String>),
    /// Require a proof-of-work ticket of at least `min_difficulty` bits.
    Pow { min_difficulty: u8, ttl_ms: u64 },
    /// Require a stake proof attested by the injected oracle.
    Stake { ttl_ms: u64 },
}

/// The ticket attached to a sync request.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Ticket {
    /// No work attached; sufficient under `none` and `allowlist` policies.
    None,
    /// `SHA256(peerId ‖ nonce ‖ expiresAt)` has ≥ `difficulty` zero bits.
    Pow {
        nonce: u64,
        difficulty: u8,
        #[serde(rename = "expiresAt")]
        expires_at: Timestamp,
    },
    /// `{stakeAmount, expiresAt}` signed by a staked key.
    Stake {
        #[serde(rename = "stakeAmount")]
        stake_amount: Amount,
        #[serde(rename = "expiresAt")]
        expires_at: Timestamp,
        signer: Did,
        sig: String,
    },
}

/// Attests whether a key holds at least the stake threshold. The concrete
/// oracle (on-chain mirror, static table…) is injected at composition.
#[async_trait]
pub trait StakeOracle: Send + Sync {
    async fn attests(&self, signer: &Did, stake: &Amount) -> bool;
}

/// Oracle that attests nothing; the default under non-stake policies.
pub struct NoStakeOracle;

#[async_trait]
impl StakeOracle for NoStakeOracle {
    async fn attests(&self, _signer: &Did, _stake: &Amount) -> bool {
        false
    }
}

fn stake_signing_bytes(stake_amount: &Amount, expires_at: Timestamp) -> Result<[u8; 32], ClawError> {
    let value = json!({
        "stakeAmount": stake_amount,
        "expiresAt": expires_at,
    });
    let bytes = canonical_bytes(&value)?;
    let mut hasher = Sha256::new();
    hasher.update(TICKET_SIGNING_DOMAIN);
    hasher.update(&bytes);
    Ok(hasher.finalize().into())
}

impl Ticket {
    /// Mine a PoW ticket for `peer_id` valid until `now_ms + ttl_ms`.
    pub fn mine_pow(peer_id: &str, difficulty: u8, now_ms: Timestamp, ttl_ms: u64) -> Self {
        let expires_at = now_ms + ttl_ms as i64;
        let nonce = mine_ticket(peer_id, expires_at, difficulty);
        Ticket::Pow { nonce, difficulty, expires_at }
    }

    /// Sign a stake proof valid until `now_ms + ttl_ms`.
    pub fn sign_stake(
        keypair: &Keypair,
        stake_amount: Amount,
        now_ms: Timestamp,
        ttl_ms: u64,
    ) -> Result<Self, ClawError> {
        let expires_at = now_ms + ttl_ms as i64;
        let message = stake_signing_bytes(&stake_amount, expires_at)?;
        let sig = keypair.sign(&message);
        Ok(Ticket::Stake {
            stake_amount,
            expires_at,
            signer: keypair.did.clone(),
            sig: bs58::encode(sig.to_bytes()).into_string(),
        })
    }
}

/// Responder-side ticket check. `requester` is the peer id the request
/// claims to originate from (PoW tickets are bound to it).
pub async fn verify_ticket(
    policy: &SybilPolicy,
    requester: &str,
    ticket: &Ticket,
    now_ms: Timestamp,
    oracle: &dyn StakeOracle,
) -> Result<(), ClawError> {
    match policy {
        SybilPolicy::None => Ok(()),

        SybilPolicy::Allowlist(peers) => {
            if peers.iter().any(|p| p == requester) {
                Ok(())
            } else {
                Err(ClawError::TicketInvalid(format!(
                    "peer {requester} not in allowlist"
                )))
            }
        }

        SybilPolicy::Pow { min_difficulty, ttl_ms } => {
            let Ticket::Pow { nonce, difficulty, expires_at } = ticket else {
                return Err(ClawError::TicketInvalid("pow ticket required".into()));
            };
            if *expires_at <= now_ms {
                return Err(ClawError::TicketExpired);
            }
            if *expires_at > now_ms + *ttl_ms as i64 {
                return Err(ClawError::TicketInvalid("expiry beyond ticket TTL".into()));
            }
            if difficulty < min_difficulty {
                return Err(ClawError::TicketInvalid(format!(
                    "difficulty {difficulty} below minimum {min_difficulty}"
                )));
            }
            if !verify_ticket_pow(requester, *nonce, *expires_at, *difficulty) {
                return Err(ClawError::TicketInvalid("pow target not met".into()));
            }
            Ok(())
        }

        SybilPolicy::Stake { ttl_ms } => {
            let Ticket::Stake { stake_amount, expires_at, signer, sig } = ticket else {
                return Err(ClawError::TicketInvalid("stake proof required".into()));
            };
            if *expires_at <= now_ms {
                return Err(ClawError::TicketExpired);
            }
            if *expires_at > now_ms + *ttl_ms as i64 {
                return Err(ClawError::TicketInvalid("expiry beyond proof TTL".into()));
            }
            let message = stake_signing_bytes(stake_amount, *expires_at)?;
            let sig_bytes = bs58::decode(sig)
                .into_vec()
                .map_err(|_| ClawError::TicketInvalid("malformed stake signature".into()))?;
            let sig_arr: [u8; 64] = sig_bytes
                .try_into()
                .map_err(|_| ClawError::TicketInvalid("malformed stake signature".into()))?;
            let pk = public_key_from_did(signer)?;
            pk.verify(&message, &Signature::from_bytes(&sig_arr))
                .map_err(|_| ClawError::TicketInvalid("stake signature check failed".into()))?;
            if !oracle.attests(signer, stake_amount).await {
                return Err(ClawError::TicketInvalid(format!(
                    "oracle does not attest stake for {signer}"
                )));
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedOracle(bool);

    #[async_trait]
    impl StakeOracle for FixedOracle {
        async fn attests(&self, _signer: &Did, _stake: &Amount) -> bool {
            self.0
        }
    }

    const NOW: Timestamp = 1_700_000_000_000;

    #[tokio::test]
    async fn none_policy_accepts_anything() {
        verify_ticket(&SybilPolicy::None, "anybody", &Ticket::None, NOW, &NoStakeOracle)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn allowlist_checks_requester() {
        let policy = SybilPolicy::Allowlist(vec!["peerA".into()]);
        verify_ticket(&policy, "peerA", &Ticket::None, NOW, &NoStakeOracle)
            .await
            .unwrap();
        assert!(matches!(
            verify_ticket(&policy, "peerB", &Ticket::None, NOW, &NoStakeOracle).await,
            Err(ClawError::TicketInvalid(_))
        ));
    }

    #[tokio::test]
    async fn pow_ticket_lifecycle() {
        let policy = SybilPolicy::Pow { min_difficulty: 8, ttl_ms: 60_000 };
        let ticket = Ticket::mine_pow("peerA", 8, NOW, 60_000);

        verify_ticket(&policy, "peerA", &ticket, NOW, &NoStakeOracle)
            .await
            .unwrap();

        // Bound to the mining peer.
        assert!(matches!(
            verify_ticket(&policy, "peerB", &ticket, NOW, &NoStakeOracle).await,
            Err(ClawError::TicketInvalid(_))
        ));

        // Expired after its TTL window.
        assert!(matches!(
            verify_ticket(&policy, "peerA", &ticket, NOW + 61_000, &NoStakeOracle).await,
            Err(ClawError::TicketExpired)
        ));
    }

    #[tokio::test]
    async fn pow_difficulty_floor_enforced() {
        let policy = SybilPolicy::Pow { min_difficulty: 16, ttl_ms: 60_000 };
        let weak = Ticket::mine_pow("peerA", 8, NOW, 60_000);
        assert!(matches!(
            verify_ticket(&policy, "peerA", &weak, NOW, &NoStakeOracle).await,
            Err(ClawError::TicketInvalid(_))
        ));
    }

    #[tokio::test]
    async fn stake_proof_requires_oracle_attestation() {
        let policy = SybilPolicy::Stake { ttl_ms: 300_000 };
        let kp = Keypair::generate();
        let ticket = Ticket::sign_stake(&kp, Amount::from_u64(5_000), NOW, 300_000).unwrap();

        verify_ticket(&policy, "peerA", &ticket, NOW, &FixedOracle(true))
            .await
            .unwrap();
        assert!(matches!(
            verify_ticket(&policy, "peerA", &ticket, NOW, &FixedOracle(false)).await,
            Err(ClawError::TicketInvalid(_))
        ));
    }

    #[tokio::test]
    async fn tampered_stake_amount_fails_signature() {
        let policy = SybilPolicy::Stake { ttl_ms: 300_000 };
        let kp = Keypair::generate();
        let mut ticket = Ticket::sign_stake(&kp, Amount::from_u64(5_000), NOW, 300_000).unwrap();
        if let Ticket::Stake { stake_amount, .. } = &mut ticket {
            *stake_amount = Amount::from_u64(5_000_000);
        }
        assert!(matches!(
            verify_ticket(&policy, "peerA", &ticket, NOW, &FixedOracle(true)).await,
            Err(ClawError::TicketInvalid(_))
        ));
    }

    #[tokio::test]
    async fn wrong_ticket_kind_rejected() {
        let policy = SybilPolicy::Pow { min_difficulty: 8, ttl_ms: 60_000 };
        assert!(matches!(
            verify_ticket(&policy, "peerA", &Ticket::None, NOW, &NoStakeOracle).await,
            Err(ClawError::TicketInvalid(_))
        ));
    }
}
