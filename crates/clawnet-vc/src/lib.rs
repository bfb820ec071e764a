//! clawnet-vc
//!
//! Capability credentials for agent identities. A credential is a signed
//! JSON object whose `proof.proofValue` covers
//! `SHA256("clawtoken:vc:v1:" ‖ JCS(credential \ proof))` with the issuer's
//! Ed25519 key; identity events embed credentials whose subject fields must
//! mirror the event payload.

use ed25519_dalek::{Signature, Verifier};
use multibase::Base;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;

use clawnet_core::canonical::canonical_bytes;
use clawnet_core::constants::VC_SIGNING_DOMAIN;
use clawnet_core::envelope::Envelope;
use clawnet_core::error::ClawError;
use clawnet_core::payload::{TYPE_IDENTITY_REGISTER, TYPE_IDENTITY_UPDATE};
use clawnet_core::types::Did;
use clawnet_crypto::{public_key_from_did, Keypair};

pub const PROOF_TYPE: &str = "Ed25519Signature2020";
pub const PROOF_PURPOSE: &str = "assertionMethod";
pub const CAPABILITY_TYPE: &str = "CapabilityCredential";
pub const DEFAULT_CONTEXT: &str = "https://www.w3.org/2018/credentials/v1";

/// Subject fields a capability credential must carry, and which identity
/// events must mirror.
const CAPABILITY_SUBJECT_FIELDS: [&str; 3] = ["id", "name", "pricing"];

#[derive(Debug, Error)]
pub enum VcError {
    #[error("credential carries no proof")]
    MissingProof,

    #[error("credential already carries a proof")]
    AlreadyProven,

    #[error("unsupported proof type: {0}")]
    WrongProofType(String),

    #[error("unsupported proof purpose: {0}")]
    WrongPurpose(String),

    #[error("verification method {method} does not belong to issuer {issuer}")]
    ForeignMethod { method: String, issuer: String },

    #[error("proof signature invalid")]
    BadProof,

    #[error("not a capability credential")]
    NotCapability,

    #[error("capability subject missing field: {0}")]
    MissingSubjectField(&'static str),

    #[error("credential subject field {0} does not match event payload")]
    SubjectMismatch(String),

    #[error(transparent)]
    Core(#[from] ClawError),
}

// ── Credential model ─────────────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Proof {
    #[serde(rename = "type")]
    pub proof_type: String,
    pub created: String,
    #[serde(rename = "verificationMethod")]
    pub verification_method: String,
    #[serde(rename = "proofPurpose")]
    pub proof_purpose: String,
    #[serde(rename = "proofValue")]
    pub proof_value: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Credential {
    #[serde(rename = "@context")]
    pub context: Vec<String>,
    #[serde(rename = "type")]
    pub types: Vec<String>,
    pub issuer: Did,
    #[serde(rename = "issuanceDate")]
    pub issuance_date: String,
    #[serde(rename = "credentialSubject")]
    pub credential_subject: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proof: Option<Proof>,
}

impl Credential {
    /// Assemble an unproven capability credential for `subject`.
    pub fn capability(issuer: Did, subject: Value, issuance_date: String) -> Self {
        Self {
            context: vec![DEFAULT_CONTEXT.to_string()],
            types: vec!["VerifiableCredential".to_string(), CAPABILITY_TYPE.to_string()],
            issuer,
            issuance_date,
            credential_subject: subject,
            proof: None,
        }
    }

    /// The credential as JSON with `proof` stripped — the signed form.
    fn unproven_value(&self) -> Result<Value, VcError> {
        let mut value = serde_json::to_value(self)
            .map_err(|e| ClawError::Serialization(e.to_string()))?;
        if let Some(obj) = value.as_object_mut() {
            obj.remove("proof");
        }
        Ok(value)
    }

    /// `SHA256("clawtoken:vc:v1:" ‖ JCS(credential \ proof))`.
    fn signing_bytes(&self) -> Result<[u8; 32], VcError> {
        let bytes = canonical_bytes(&self.unproven_value()?)?;
        let mut hasher = Sha256::new();
        hasher.update(VC_SIGNING_DOMAIN);
        hasher.update(&bytes);
        Ok(hasher.finalize().into())
    }
}

// ── Sign / verify ────────────────────────────────────────────────────────────

/// Attach an `Ed25519Signature2020` proof. The credential must be unproven
/// and the keypair must control the issuer DID.
pub fn sign_credential(
    credential: &mut Credential,
    keypair: &Keypair,
    created: String,
) -> Result<(), VcError> {
    if credential.proof.is_some() {
        return Err(VcError::AlreadyProven);
    }
    let message = credential.signing_bytes()?;
    let sig = keypair.sign(&message);
    credential.proof = Some(Proof {
        proof_type: PROOF_TYPE.to_string(),
        created,
        verification_method: format!("{}#key-1", credential.issuer),
        proof_purpose: PROOF_PURPOSE.to_string(),
        proof_value: multibase::encode(Base::Base58Btc, sig.to_bytes()),
    });
    Ok(())
}

/// Check the proof: type, purpose, issuer-scoped verification method, and
/// the signature over the canonical-minus-proof bytes.
pub fn verify_credential(credential: &Credential) -> Result<(), VcError> {
    let proof = credential.proof.as_ref().ok_or(VcError::MissingProof)?;

    if proof.proof_type != PROOF_TYPE {
        return Err(VcError::WrongProofType(proof.proof_type.clone()));
    }
    if proof.proof_purpose != PROOF_PURPOSE {
        return Err(VcError::WrongPurpose(proof.proof_purpose.clone()));
    }
    let issuer = credential.issuer.to_string();
    if !proof
        .verification_method
        .starts_with(&format!("{issuer}#"))
    {
        return Err(VcError::ForeignMethod {
            method: proof.verification_method.clone(),
            issuer,
        });
    }

    let (_, sig_bytes) =
        multibase::decode(&proof.proof_value).map_err(|_| VcError::BadProof)?;
    let sig_arr: [u8; 64] = sig_bytes.try_into().map_err(|_| VcError::BadProof)?;
    let sig = Signature::from_bytes(&sig_arr);

    let pk = public_key_from_did(&credential.issuer).map_err(VcError::Core)?;
    let message = credential.signing_bytes()?;
    pk.verify(&message, &sig).map_err(|_| VcError::BadProof)
}

/// Capability credentials additionally require the `CapabilityCredential`
/// type and the `id`, `name`, `pricing` subject fields.
pub fn verify_capability(credential: &Credential) -> Result<(), VcError> {
    verify_credential(credential)?;
    if !credential.types.iter().any(|t| t == CAPABILITY_TYPE) {
        return Err(VcError::NotCapability);
    }
    for field in CAPABILITY_SUBJECT_FIELDS {
        if credential.credential_subject.get(field).is_none() {
            return Err(VcError::MissingSubjectField(field));
        }
    }
    Ok(())
}

// ── Identity-event embedding ─────────────────────────────────────────────────

/// Identity events that embed a capability credential must agree with it:
/// every subject field must equal the payload field of the same name.
/// Events without an embedded credential pass unchanged.
pub fn check_identity_event(envelope: &Envelope) -> Result<(), VcError> {
    if envelope.event_type != TYPE_IDENTITY_REGISTER && envelope.event_type != TYPE_IDENTITY_UPDATE
    {
        return Ok(());
    }
    let Some(embedded) = envelope.payload.get("credential") else {
        return Ok(());
    };
    let credential: Credential = serde_json::from_value(embedded.clone())
        .map_err(|e| ClawError::Serialization(e.to_string()))?;
    verify_capability(&credential)?;

    let subject = credential
        .credential_subject
        .as_object()
        .ok_or(VcError::MissingSubjectField("id"))?;
    for (field, value) in subject {
        if envelope.payload.get(field) != Some(value) {
            return Err(VcError::SubjectMismatch(field.clone()));
        }
    }
    Ok(())
}
