//! Per-user credential vault.
//!
//! Secrets are encrypted with AES-256-GCM under a key derived from the
//! process-wide master secret, the owning user's id and a salt fixed at
//! user creation. The same (user id, salt) pair must be presented at
//! decrypt time; salts are persisted, never regenerated.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::config::VaultConfig;
use crate::error::VaultError;

const NONCE_SIZE: usize = 12;
const KEY_SIZE: usize = 32;
pub const SALT_SIZE: usize = 32;

pub struct CredentialVault {
    master_secret: Vec<u8>,
    kdf_iterations: u32,
}

impl CredentialVault {
    pub fn new(config: &VaultConfig) -> Self {
        Self {
            master_secret: config.master_secret.as_bytes().to_vec(),
            kdf_iterations: config.kdf_iterations,
        }
    }

    /// Fresh 256-bit salt, generated once per user and persisted.
    pub fn generate_salt() -> Vec<u8> {
        let mut salt = vec![0u8; SALT_SIZE];
        rand::thread_rng().fill_bytes(&mut salt);
        salt
    }

    /// PBKDF2-HMAC-SHA256 over master_secret ‖ user_id with the user's salt.
    fn derive_key(&self, user_id: Uuid, salt: &[u8]) -> [u8; KEY_SIZE] {
        let mut material = self.master_secret.clone();
        material.extend_from_slice(user_id.as_bytes());

        let mut key = [0u8; KEY_SIZE];
        pbkdf2_hmac::<Sha256>(&material, salt, self.kdf_iterations, &mut key);
        key
    }

    /// Encrypts to base64(nonce ‖ ciphertext+tag).
    pub fn encrypt(&self, plaintext: &str, user_id: Uuid, salt: &[u8]) -> Result<String, VaultError> {
        if plaintext.is_empty() {
            return Err(VaultError::EmptyInput);
        }

        let key = self.derive_key(user_id, salt);
        let cipher = Aes256Gcm::new_from_slice(&key).map_err(|_| VaultError::KeyDerivation)?;

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| VaultError::EncryptionFailed)?;

        let mut envelope = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        envelope.extend_from_slice(&nonce_bytes);
        envelope.extend_from_slice(&ciphertext);

        Ok(BASE64.encode(envelope))
    }

    /// Fails on tampering, wrong (user id, salt) pair, or malformed input.
    /// No partial plaintext is ever returned; failure detail is deliberately
    /// flattened to a single error kind.
    pub fn decrypt(&self, ciphertext: &str, user_id: Uuid, salt: &[u8]) -> Result<String, VaultError> {
        if ciphertext.is_empty() {
            return Err(VaultError::EmptyInput);
        }

        let envelope = BASE64
            .decode(ciphertext)
            .map_err(|_| VaultError::DecryptionFailed)?;
        if envelope.len() <= NONCE_SIZE {
            return Err(VaultError::DecryptionFailed);
        }
        let (nonce_bytes, payload) = envelope.split_at(NONCE_SIZE);

        let key = self.derive_key(user_id, salt);
        let cipher = Aes256Gcm::new_from_slice(&key).map_err(|_| VaultError::KeyDerivation)?;

        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce_bytes), payload)
            .map_err(|_| VaultError::DecryptionFailed)?;

        String::from_utf8(plaintext).map_err(|_| VaultError::DecryptionFailed)
    }

    /// Verification hash stored alongside the ciphertext; lets callers
    /// detect a key mismatch cheaply without a full decrypt attempt.
    pub fn hash_key_material(&self, user_id: Uuid, salt: &[u8]) -> String {
        let key = self.derive_key(user_id, salt);
        BASE64.encode(Sha256::digest(key))
    }
}
