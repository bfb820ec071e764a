//! Encrypted on-disk keystore: one JSON record per key id under
//! `<dataDir>/keys/`, AES-256-GCM over an Argon2id-derived key.
//!
//! The event engine never sees this module; it consumes only
//! `sign(msg, sk) → sig` and `verify(sig, msg, pk) → bool`.

use std::fs;
use std::path::{Path, PathBuf};

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use argon2::Argon2;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::Zeroizing;

use crate::keypair::Keypair;

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;

#[derive(Debug, Error)]
pub enum KeystoreError {
    #[error("keystore I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("keystore record malformed: {0}")]
    Malformed(String),

    #[error("wrong passphrase or corrupted record")]
    Decrypt,

    #[error("key not found: {0}")]
    NotFound(String),
}

/// Serialized key record. `ciphertext` holds the AES-256-GCM encryption of
/// the 32 secret-key bytes.
#[derive(Serialize, Deserialize)]
struct KeyRecord {
    id: String,
    created_at: i64,
    did: String,
    salt: String,
    nonce: String,
    ciphertext: String,
}

/// Directory-backed keystore.
pub struct Keystore {
    dir: PathBuf,
}

impl Keystore {
    /// Open (creating the directory if needed) a keystore at `dir`.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, KeystoreError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Encrypt and persist a keypair under `id`.
    pub fn save(&self, id: &str, keypair: &Keypair, passphrase: &str) -> Result<(), KeystoreError> {
        let mut salt = [0u8; SALT_LEN];
        let mut nonce = [0u8; NONCE_LEN];
        rand::rngs::OsRng.fill_bytes(&mut salt);
        rand::rngs::OsRng.fill_bytes(&mut nonce);

        let key = derive_key(passphrase, &salt)?;
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&*key));
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), keypair.secret_bytes().as_slice())
            .map_err(|_| KeystoreError::Decrypt)?;

        let record = KeyRecord {
            id: id.to_string(),
            created_at: chrono::Utc::now().timestamp_millis(),
            did: keypair.did.to_string(),
            salt: hex::encode(salt),
            nonce: hex::encode(nonce),
            ciphertext: hex::encode(ciphertext),
        };
        let json = serde_json::to_string_pretty(&record)
            .map_err(|e| KeystoreError::Malformed(e.to_string()))?;
        fs::write(self.record_path(id), json)?;
        Ok(())
    }

    /// Decrypt and restore the keypair stored under `id`.
    pub fn load(&self, id: &str, passphrase: &str) -> Result<Keypair, KeystoreError> {
        let path = self.record_path(id);
        if !path.exists() {
            return Err(KeystoreError::NotFound(id.to_string()));
        }
        let record: KeyRecord = serde_json::from_str(&fs::read_to_string(path)?)
            .map_err(|e| KeystoreError::Malformed(e.to_string()))?;

        let salt = hex::decode(&record.salt)
            .map_err(|e| KeystoreError::Malformed(e.to_string()))?;
        let nonce = hex::decode(&record.nonce)
            .map_err(|e| KeystoreError::Malformed(e.to_string()))?;
        let ciphertext = hex::decode(&record.ciphertext)
            .map_err(|e| KeystoreError::Malformed(e.to_string()))?;

        let key = derive_key(passphrase, &salt)?;
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&*key));
        let plaintext = Zeroizing::new(
            cipher
                .decrypt(Nonce::from_slice(&nonce), ciphertext.as_slice())
                .map_err(|_| KeystoreError::Decrypt)?,
        );
        let secret: [u8; 32] = plaintext
            .as_slice()
            .try_into()
            .map_err(|_| KeystoreError::Malformed("secret key must be 32 bytes".into()))?;
        Ok(Keypair::from_secret_bytes(&secret))
    }

    /// Key ids with a record on disk.
    pub fn list(&self) -> Result<Vec<String>, KeystoreError> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|e| e == "json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    ids.push(stem.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    fn record_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }
}

fn derive_key(passphrase: &str, salt: &[u8]) -> Result<Zeroizing<[u8; 32]>, KeystoreError> {
    let mut key = Zeroizing::new([0u8; 32]);
    Argon2::default()
        .hash_password_into(passphrase.as_bytes(), salt, &mut *key)
        .map_err(|e| KeystoreError::Malformed(e.to_string()))?;
    Ok(key)
}
