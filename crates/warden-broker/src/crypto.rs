//! Sealing of refresh secrets with AES-256-GCM.
//!
//! Sealed form: `nonce (12 bytes) || ciphertext || tag (16 bytes)`. The
//! principal id is bound in as associated data, so a sealed secret moved to
//! another principal's row fails to open.

use crate::error::StoreError;
use aes_gcm::aead::{Aead, Payload};
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use rand::RngCore;
use warden_core::{EncryptionKey, PrincipalId, SecretString};

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Authenticated encryption for stored refresh secrets.
#[derive(Clone)]
pub struct TokenCipher {
    cipher: Aes256Gcm,
}

impl TokenCipher {
    pub fn new(key: &EncryptionKey) -> Self {
        Self {
            cipher: Aes256Gcm::new(key.as_bytes().into()),
        }
    }

    pub fn seal(&self, principal: &PrincipalId, secret: &SecretString) -> Result<Vec<u8>, StoreError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(
                nonce,
                Payload {
                    msg: secret.expose().as_bytes(),
                    aad: principal.as_str().as_bytes(),
                },
            )
            .map_err(|e| StoreError::Encryption(e.to_string()))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    pub fn open(&self, principal: &PrincipalId, sealed: &[u8]) -> Result<SecretString, StoreError> {
        if sealed.len() < NONCE_LEN + TAG_LEN {
            return Err(StoreError::Decryption {
                principal: principal.clone(),
            });
        }
        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);

        let plaintext = self
            .cipher
            .decrypt(
                Nonce::from_slice(nonce_bytes),
                Payload {
                    msg: ciphertext,
                    aad: principal.as_str().as_bytes(),
                },
            )
            .map_err(|_| StoreError::Decryption {
                principal: principal.clone(),
            })?;

        String::from_utf8(plaintext)
            .map(SecretString::new)
            .map_err(|_| StoreError::Corrupt(format!("refresh secret for {} is not UTF-8", principal)))
    }
}

impl std::fmt::Debug for TokenCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("TokenCipher([REDACTED])")
    }
}
