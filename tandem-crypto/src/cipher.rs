//! Scoped token encryption using AES-256-GCM.

use crate::error::{CryptoError, CryptoResult};
use crate::key::TokenKey;
use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use rand::RngCore;

/// Size of nonce in bytes (96 bits for AES-GCM).
pub const NONCE_SIZE: usize = 12;

/// Size of authentication tag in bytes.
pub const TAG_SIZE: usize = 16;

/// Encrypts and decrypts tokens under a single key.
#[derive(Clone)]
pub struct TokenCipher {
    cipher: Aes256Gcm,
}

impl TokenCipher {
    pub fn new(key: &TokenKey) -> Self {
        Self {
            cipher: Aes256Gcm::new(key.as_bytes().into()),
        }
    }

    /// Seals `plaintext` for `scope`. Returns `nonce || sealed_output`.
    pub fn encrypt(&self, scope: &str, plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
        if plaintext.is_empty() {
            return Err(CryptoError::EmptyInput);
        }

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let sealed = self
            .cipher
            .encrypt(
                nonce,
                Payload {
                    msg: plaintext,
                    aad: scope.as_bytes(),
                },
            )
            .map_err(|e| CryptoError::Encryption(e.to_string()))?;

        let mut out = Vec::with_capacity(NONCE_SIZE + sealed.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    /// Opens a `nonce || sealed_output` blob sealed for `scope`.
    pub fn decrypt(&self, scope: &str, ciphertext: &[u8]) -> CryptoResult<Vec<u8>> {
        if ciphertext.is_empty() {
            return Err(CryptoError::EmptyInput);
        }
        if ciphertext.len() < NONCE_SIZE {
            return Err(CryptoError::CiphertextTooShort {
                len: ciphertext.len(),
                min: NONCE_SIZE,
            });
        }

        let (nonce_bytes, sealed) = ciphertext.split_at(NONCE_SIZE);
        self.cipher
            .decrypt(
                Nonce::from_slice(nonce_bytes),
                Payload {
                    msg: sealed,
                    aad: scope.as_bytes(),
                },
            )
            .map_err(|_| {
                CryptoError::Decryption(
                    "decryption failed (wrong key, wrong scope or tampered data)".to_string(),
                )
            })
    }

    /// Encrypts a string and returns the base64-encoded blob.
    pub fn encrypt_string(&self, scope: &str, plaintext: &str) -> CryptoResult<String> {
        let sealed = self.encrypt(scope, plaintext.as_bytes())?;
        Ok(STANDARD.encode(sealed))
    }

    /// Decrypts a base64-encoded blob produced by [`TokenCipher::encrypt_string`].
    pub fn decrypt_string(&self, scope: &str, encoded: &str) -> CryptoResult<String> {
        if encoded.is_empty() {
            return Err(CryptoError::EmptyInput);
        }
        let bytes = STANDARD
            .decode(encoded)
            .map_err(|e| CryptoError::Encoding(format!("invalid base64: {e}")))?;
        let plaintext = self.decrypt(scope, &bytes)?;
        String::from_utf8(plaintext)
            .map_err(|e| CryptoError::Encoding(format!("invalid UTF-8: {e}")))
    }
}

impl std::fmt::Debug for TokenCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCipher").finish_non_exhaustive()
    }
}
