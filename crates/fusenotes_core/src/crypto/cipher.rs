//! Note body encryption capability.
//!
//! # Responsibility
//! - Define the `NoteCipher` contract used by the plaintext-facing `Note`.
//! - Provide AES-256-GCM with the key derived from the user's key string.
//!
//! # Invariants
//! - Ciphertext format is `base64(nonce(12) || ciphertext || tag)`.
//! - Decrypting an empty or absent body yields an empty string, never an error.
//! - Malformed input and failed authentication are distinct errors.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::fmt::{Debug, Formatter};

const NONCE_LEN: usize = 12;

/// Cipher failures. Lets callers tell a corrupted note from an empty one.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CipherError {
    #[error("ciphertext is not valid base64")]
    MalformedCiphertext,
    #[error("ciphertext too short to hold a nonce ({0} bytes)")]
    MissingNonce(usize),
    #[error("ciphertext failed authentication")]
    Authentication,
    #[error("decrypted body is not valid UTF-8")]
    InvalidUtf8,
    #[error("encryption failed")]
    Encryption,
}

/// Encrypts and decrypts plaintext note bodies.
pub trait NoteCipher: Send + Sync {
    fn encrypt(&self, plaintext: &str) -> Result<String, CipherError>;
    /// Decrypts `ciphertext`; an empty input decrypts to an empty string.
    fn decrypt(&self, ciphertext: &str) -> Result<String, CipherError>;

    /// Decrypts a possibly absent body (tombstoned fragments carry none).
    fn decrypt_body(&self, body: Option<&str>) -> Result<String, CipherError> {
        match body {
            None => Ok(String::new()),
            Some(ciphertext) => self.decrypt(ciphertext),
        }
    }
}

/// AES-256-GCM cipher keyed by SHA-256 of the user's key string.
#[derive(Clone)]
pub struct AesNoteCipher {
    cipher: Aes256Gcm,
}

impl AesNoteCipher {
    /// Derives the encryption key from the same string that unlocks signing.
    pub fn from_key_string(key: &str) -> Self {
        let digest: [u8; 32] = Sha256::digest(key.as_bytes()).into();
        Self::from_key_bytes(digest)
    }

    pub fn from_key_bytes(key: [u8; 32]) -> Self {
        Self {
            cipher: Aes256Gcm::new((&key).into()),
        }
    }
}

impl NoteCipher for AesNoteCipher {
    fn encrypt(&self, plaintext: &str) -> Result<String, CipherError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let sealed = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| CipherError::Encryption)?;

        let mut framed = Vec::with_capacity(NONCE_LEN + sealed.len());
        framed.extend_from_slice(&nonce_bytes);
        framed.extend_from_slice(&sealed);
        Ok(STANDARD.encode(framed))
    }

    fn decrypt(&self, ciphertext: &str) -> Result<String, CipherError> {
        if ciphertext.is_empty() {
            return Ok(String::new());
        }

        let framed = STANDARD
            .decode(ciphertext)
            .map_err(|_| CipherError::MalformedCiphertext)?;
        if framed.len() < NONCE_LEN {
            return Err(CipherError::MissingNonce(framed.len()));
        }

        let (nonce_bytes, sealed) = framed.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce_bytes), sealed)
            .map_err(|_| CipherError::Authentication)?;
        String::from_utf8(plaintext).map_err(|_| CipherError::InvalidUtf8)
    }
}

impl Debug for AesNoteCipher {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("AesNoteCipher(..)")
    }
}
