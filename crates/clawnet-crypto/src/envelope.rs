//! Envelope signing and verification.
//!
//! The signed message is `SHA256("clawtoken:event:v1:" ‖ JCS(envelope \
//! {sig, hash}))`; the domain prefix keeps event signatures from being
//! replayed as credential proofs.

use ed25519_dalek::{Signature, Verifier};

use clawnet_core::envelope::Envelope;
use clawnet_core::error::ClawError;

use crate::did::public_key_from_did;
use crate::keypair::Keypair;

/// Compute `hash` and `sig` for an unsigned envelope.
///
/// Both fields must be absent; a signed envelope is immutable.
pub fn sign_envelope(envelope: &mut Envelope, keypair: &Keypair) -> Result<(), ClawError> {
    if envelope.sig.is_some() || envelope.hash.is_some() {
        return Err(ClawError::AlreadySigned);
    }
    let hash = envelope.content_hash()?;
    let message = envelope.signing_bytes()?;
    let sig = keypair.sign(&message);
    envelope.hash = Some(hash);
    envelope.sig = Some(bs58::encode(sig.to_bytes()).into_string());
    Ok(())
}

/// Full envelope verification: recomputed content hash matches the embedded
/// `hash`, and `sig` verifies against the issuer's DID key.
pub fn verify_envelope(envelope: &Envelope) -> Result<(), ClawError> {
    envelope.check_hash()?;

    let sig_b58 = envelope.sig.as_deref().ok_or(ClawError::Unsigned)?;
    let sig_bytes = bs58::decode(sig_b58)
        .into_vec()
        .map_err(|_| ClawError::BadSignature)?;
    let sig_arr: [u8; 64] = sig_bytes.try_into().map_err(|_| ClawError::BadSignature)?;
    let sig = Signature::from_bytes(&sig_arr);

    let pk = public_key_from_did(&envelope.issuer)?;
    let message = envelope.signing_bytes()?;
    pk.verify(&message, &sig).map_err(|_| ClawError::BadSignature)
}
