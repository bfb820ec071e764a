use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use zeroize::Zeroizing;

use clawnet_core::types::{Address, Did};

use crate::did::did_from_public_key;

/// A ClawNet identity: Ed25519 keys with the derived DID and wallet address.
///
/// The secret key is held in a `Zeroizing` buffer to wipe memory on drop.
pub struct Keypair {
    pub did: Did,
    pub address: Address,
    verifying_key: VerifyingKey,
    secret_key: Zeroizing<[u8; 32]>,
}

impl Keypair {
    /// Generate a fresh Ed25519 keypair.
    pub fn generate() -> Self {
        let signing = SigningKey::generate(&mut OsRng);
        Self::from_signing_key(signing)
    }

    /// Restore a keypair from raw secret-key bytes (e.g. from the keystore).
    pub fn from_secret_bytes(bytes: &[u8; 32]) -> Self {
        Self::from_signing_key(SigningKey::from_bytes(bytes))
    }

    fn from_signing_key(signing: SigningKey) -> Self {
        let verifying_key = signing.verifying_key();
        let did = did_from_public_key(&verifying_key);
        let address = Address::from_public_key(verifying_key.as_bytes());
        Self {
            did,
            address,
            verifying_key,
            secret_key: Zeroizing::new(signing.to_bytes()),
        }
    }

    /// Sign a message with this keypair's secret key.
    pub fn sign(&self, message: &[u8]) -> Signature {
        SigningKey::from_bytes(&self.secret_key).sign(message)
    }

    pub fn verifying_key(&self) -> &VerifyingKey {
        &self.verifying_key
    }

    /// Raw secret-key bytes, for keystore encryption only.
    pub fn secret_bytes(&self) -> &[u8; 32] {
        &self.secret_key
    }
}

impl std::fmt::Debug for Keypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Keypair {{ did: {} }}", self.did)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::Verifier;

    #[test]
    fn restored_keypair_matches() {
        let kp = Keypair::generate();
        let restored = Keypair::from_secret_bytes(kp.secret_bytes());
        assert_eq!(kp.did, restored.did);
        assert_eq!(kp.address, restored.address);
    }

    #[test]
    fn signatures_verify() {
        let kp = Keypair::generate();
        let sig = kp.sign(b"autonomous agents trade here");
        assert!(kp
            .verifying_key()
            .verify(b"autonomous agents trade here", &sig)
            .is_ok());
        assert!(kp.verifying_key().verify(b"tampered", &sig).is_err());
    }
}
