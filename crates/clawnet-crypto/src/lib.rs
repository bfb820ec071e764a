//! clawnet-crypto
//!
//! Ed25519 identity primitives for ClawNet: keypairs, DID and address
//! derivation, envelope signing/verification, the proof-of-work primitive
//! behind sync tickets, and the encrypted on-disk keystore.

pub mod did;
pub mod envelope;
pub mod keypair;
pub mod keystore;
pub mod pow;

pub use did::{address_from_did, did_from_public_key, public_key_from_did};
pub use envelope::{sign_envelope, verify_envelope};
pub use keypair::Keypair;
pub use keystore::{Keystore, KeystoreError};
pub use pow::{mine_ticket, ticket_hash, verify_ticket_pow};
