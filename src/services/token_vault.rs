//! Envelope encryption for stored payment tokens.
//!
//! A master key derives a per-user data encryption key via HKDF-SHA256; the
//! token is sealed with AES-256-GCM. Stored format, base64-encoded:
//! MAGIC (4 bytes) || nonce (12 bytes) || ciphertext.
//!
//! The cipher sits behind a trait so the key-management strategy (local
//! master key today, external KMS later) can be swapped without touching the
//! renewal logic.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hkdf::Hkdf;
use sha2::Sha256;

use crate::errors::ServiceError;

const NONCE_SIZE: usize = 12;
const MASTER_KEY_SIZE: usize = 32;
const ENCRYPTED_MAGIC: &[u8] = b"MBL1";

/// Pluggable secret-handling seam for stored payment credentials.
pub trait TokenCipher: Send + Sync {
    /// Seal `plaintext` under a key scoped to `scope` (the user id).
    fn encrypt(&self, scope: &str, plaintext: &str) -> Result<String, ServiceError>;
    fn decrypt(&self, scope: &str, blob: &str) -> Result<String, ServiceError>;
}

/// AES-256-GCM vault keyed from a base64 master key.
#[derive(Clone)]
pub struct AesGcmTokenVault {
    key: [u8; MASTER_KEY_SIZE],
}

impl AesGcmTokenVault {
    /// The decoded key must be exactly 32 bytes.
    pub fn from_base64(encoded: &str) -> Result<Self, ServiceError> {
        let decoded = BASE64
            .decode(encoded.trim())
            .map_err(|e| ServiceError::InternalError(format!("invalid master key encoding: {e}")))?;

        if decoded.len() != MASTER_KEY_SIZE {
            return Err(ServiceError::InternalError(format!(
                "master key must be {MASTER_KEY_SIZE} bytes, got {}",
                decoded.len()
            )));
        }

        let mut key = [0u8; MASTER_KEY_SIZE];
        key.copy_from_slice(&decoded);
        Ok(Self { key })
    }

    /// Generate a fresh random master key, base64-encoded (initial setup).
    pub fn generate_key() -> String {
        use rand::rngs::OsRng;
        use rand::RngCore;
        let mut key = [0u8; MASTER_KEY_SIZE];
        OsRng.fill_bytes(&mut key);
        BASE64.encode(key)
    }

    fn derive_dek(&self, scope: &str) -> [u8; 32] {
        let hk = Hkdf::<Sha256>::new(Some(b"memberly-v1"), &self.key);
        let mut dek = [0u8; 32];
        hk.expand(scope.as_bytes(), &mut dek)
            .expect("HKDF expand cannot fail for 32-byte output");
        dek
    }
}

impl TokenCipher for AesGcmTokenVault {
    fn encrypt(&self, scope: &str, plaintext: &str) -> Result<String, ServiceError> {
        use rand::rngs::OsRng;
        use rand::RngCore;

        let dek = self.derive_dek(scope);
        let cipher = Aes256Gcm::new_from_slice(&dek)
            .map_err(|e| ServiceError::InternalError(format!("cipher init: {e}")))?;

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| ServiceError::InternalError(format!("encryption failed: {e}")))?;

        let mut blob = Vec::with_capacity(ENCRYPTED_MAGIC.len() + NONCE_SIZE + ciphertext.len());
        blob.extend_from_slice(ENCRYPTED_MAGIC);
        blob.extend_from_slice(&nonce_bytes);
        blob.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(blob))
    }

    fn decrypt(&self, scope: &str, blob: &str) -> Result<String, ServiceError> {
        let encrypted = BASE64
            .decode(blob.trim())
            .map_err(|e| ServiceError::InternalError(format!("invalid token blob: {e}")))?;

        if encrypted.len() < ENCRYPTED_MAGIC.len() + NONCE_SIZE + 1 {
            return Err(ServiceError::InternalError("token blob too short".into()));
        }
        if &encrypted[..ENCRYPTED_MAGIC.len()] != ENCRYPTED_MAGIC {
            return Err(ServiceError::InternalError(
                "token blob missing magic bytes".into(),
            ));
        }

        let dek = self.derive_dek(scope);
        let cipher = Aes256Gcm::new_from_slice(&dek)
            .map_err(|e| ServiceError::InternalError(format!("cipher init: {e}")))?;

        let nonce_start = ENCRYPTED_MAGIC.len();
        let nonce_end = nonce_start + NONCE_SIZE;
        let nonce = Nonce::from_slice(&encrypted[nonce_start..nonce_end]);

        let plaintext = cipher
            .decrypt(nonce, &encrypted[nonce_end..])
            .map_err(|_| ServiceError::InternalError("token decryption failed".into()))?;

        String::from_utf8(plaintext)
            .map_err(|_| ServiceError::InternalError("token is not valid utf-8".into()))
    }
}
