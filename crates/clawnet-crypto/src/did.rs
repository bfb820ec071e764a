//! DID codec: `did:claw:<multibase-base58btc(ed25519-pk)>`.

use ed25519_dalek::VerifyingKey;
use multibase::Base;

use clawnet_core::constants::DID_PREFIX;
use clawnet_core::error::ClawError;
use clawnet_core::types::{Address, Did};

/// Derive the DID for an Ed25519 public key.
pub fn did_from_public_key(pk: &VerifyingKey) -> Did {
    let encoded = multibase::encode(Base::Base58Btc, pk.as_bytes());
    Did::new(format!("{DID_PREFIX}{encoded}"))
        .expect("multibase base58btc output is always a valid DID suffix")
}

/// Recover the Ed25519 public key embedded in a DID.
pub fn public_key_from_did(did: &Did) -> Result<VerifyingKey, ClawError> {
    let (_, bytes) = multibase::decode(did.method_specific_id())
        .map_err(|_| ClawError::MalformedDid(did.to_string()))?;
    let arr: [u8; 32] = bytes
        .try_into()
        .map_err(|_| ClawError::MalformedDid(did.to_string()))?;
    VerifyingKey::from_bytes(&arr).map_err(|_| ClawError::MalformedDid(did.to_string()))
}

/// The wallet address controlled by a DID (same underlying key).
pub fn address_from_did(did: &Did) -> Result<Address, ClawError> {
    let pk = public_key_from_did(did)?;
    Ok(Address::from_public_key(pk.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keypair::Keypair;

    #[test]
    fn did_round_trip() {
        let kp = Keypair::generate();
        let pk = public_key_from_did(&kp.did).unwrap();
        assert_eq!(&pk, kp.verifying_key());
    }

    #[test]
    fn did_and_address_share_a_key() {
        let kp = Keypair::generate();
        assert_eq!(address_from_did(&kp.did).unwrap(), kp.address);
    }

    #[test]
    fn truncated_did_rejected() {
        let kp = Keypair::generate();
        let s = kp.did.to_string();
        let truncated = Did::new(s[..s.len() - 4].to_string()).unwrap();
        assert!(matches!(
            public_key_from_did(&truncated),
            Err(ClawError::MalformedDid(_))
        ));
    }
}
