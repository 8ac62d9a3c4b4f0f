//! Signing capability and its ECDSA implementation.
//!
//! # Responsibility
//! - Define the narrow `SignerVerifier` contract consumed by the record model.
//! - Provide an ECDSA (secp256k1) implementation with sign-capable and
//!   verify-only instances.
//! - Parse, validate and generate the base64 private key strings users hold.
//!
//! # Invariants
//! - A verify-only instance never produces signatures.
//! - Messages are hashed with SHA-256 before signing; signatures are the
//!   64-byte compact encoding.
//! - Private key material is never logged or included in error text.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use secp256k1::{ecdsa, All, Message, PublicKey, Secp256k1, SecretKey};
use sha2::{Digest, Sha256};
use std::fmt::{Debug, Formatter};

const SECRET_KEY_LEN: usize = 32;

/// Raw signature bytes produced by a `SignerVerifier`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Signature(Vec<u8>);

impl Signature {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Key parsing failures. Surfaced when a store is opened with a bad key.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyError {
    #[error("key is not valid base64")]
    InvalidEncoding,
    #[error("invalid key: {0}")]
    InvalidKey(String),
}

/// Signing failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignError {
    #[error("signer holds no private key")]
    NotSignCapable,
    #[error("signing backend failure: {0}")]
    Backend(String),
}

/// Capability used by notes and fragments to sign and verify their fields.
///
/// Shared read-only across every note owned by one key.
pub trait SignerVerifier: Send + Sync {
    /// Whether this instance holds a private key.
    fn can_sign(&self) -> bool;
    /// Signs `message` with the held private key.
    fn sign(&self, message: &[u8]) -> Result<Signature, SignError>;
    /// Checks `signature` over `message` against an arbitrary public key.
    fn verify(&self, public_key: &[u8], message: &[u8], signature: &Signature) -> bool;
    /// Encoded public key identifying the owner.
    fn public_key_bytes(&self) -> Vec<u8>;
}

/// ECDSA over secp256k1.
pub struct EcdsaSigner {
    secp: Secp256k1<All>,
    secret: Option<SecretKey>,
    public: PublicKey,
}

impl EcdsaSigner {
    /// Builds a sign-capable instance from a base64 private key string.
    ///
    /// # Errors
    /// - `KeyError::InvalidEncoding` when the string is not base64.
    /// - `KeyError::InvalidKey` when the bytes are not a valid scalar.
    pub fn from_private_key_str(key: &str) -> Result<Self, KeyError> {
        let bytes = STANDARD
            .decode(key.trim())
            .map_err(|_| KeyError::InvalidEncoding)?;
        Self::from_secret_bytes(&bytes)
    }

    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        if bytes.len() != SECRET_KEY_LEN {
            return Err(KeyError::InvalidKey(format!(
                "expected {SECRET_KEY_LEN} key bytes, got {}",
                bytes.len()
            )));
        }
        let secret = SecretKey::from_slice(bytes)
            .map_err(|_| KeyError::InvalidKey("scalar out of range".to_string()))?;
        let secp = Secp256k1::new();
        let public = PublicKey::from_secret_key(&secp, &secret);
        Ok(Self {
            secp,
            secret: Some(secret),
            public,
        })
    }

    /// Builds a verify-only instance for notes owned by another key.
    pub fn verify_only(public_key: &[u8]) -> Result<Self, KeyError> {
        let public = PublicKey::from_slice(public_key)
            .map_err(|_| KeyError::InvalidKey("not a valid public key point".to_string()))?;
        Ok(Self {
            secp: Secp256k1::new(),
            secret: None,
            public,
        })
    }

    /// Returns the base64 private key string, the form users back up.
    pub fn private_key_string(&self) -> Result<String, SignError> {
        let secret = self.secret.as_ref().ok_or(SignError::NotSignCapable)?;
        Ok(STANDARD.encode(secret.secret_bytes()))
    }

    fn digest(message: &[u8]) -> Result<Message, SignError> {
        let digest = Sha256::digest(message);
        Message::from_slice(digest.as_slice()).map_err(|err| SignError::Backend(err.to_string()))
    }
}

impl SignerVerifier for EcdsaSigner {
    fn can_sign(&self) -> bool {
        self.secret.is_some()
    }

    fn sign(&self, message: &[u8]) -> Result<Signature, SignError> {
        let secret = self.secret.as_ref().ok_or(SignError::NotSignCapable)?;
        let digest = Self::digest(message)?;
        let signature = self.secp.sign_ecdsa(&digest, secret);
        Ok(Signature::from_bytes(signature.serialize_compact().to_vec()))
    }

    fn verify(&self, public_key: &[u8], message: &[u8], signature: &Signature) -> bool {
        let Ok(public) = PublicKey::from_slice(public_key) else {
            return false;
        };
        let Ok(parsed) = ecdsa::Signature::from_compact(signature.as_bytes()) else {
            return false;
        };
        let Ok(digest) = Self::digest(message) else {
            return false;
        };
        self.secp.verify_ecdsa(&digest, &parsed, &public).is_ok()
    }

    fn public_key_bytes(&self) -> Vec<u8> {
        self.public.serialize().to_vec()
    }
}

impl Debug for EcdsaSigner {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EcdsaSigner")
            .field("public", &hex::encode(self.public.serialize()))
            .field("can_sign", &self.secret.is_some())
            .finish()
    }
}

/// Generates a fresh base64 private key string.
pub fn generate_private_key() -> String {
    loop {
        let mut bytes = [0u8; SECRET_KEY_LEN];
        OsRng.fill_bytes(&mut bytes);
        // Rejection-sample the rare values outside the curve order.
        if SecretKey::from_slice(&bytes).is_ok() {
            return STANDARD.encode(bytes);
        }
    }
}

/// Returns whether `key` is a canonical base64 private key string.
///
/// A string that decodes but re-encodes differently is rejected.
pub fn check_key_valid(key: &str) -> bool {
    if key.is_empty() {
        return false;
    }
    match EcdsaSigner::from_private_key_str(key) {
        Ok(signer) => signer
            .private_key_string()
            .map(|canonical| canonical == key)
            .unwrap_or(false),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::{
        check_key_valid, generate_private_key, EcdsaSigner, KeyError, SignError, Signature,
        SignerVerifier,
    };

    #[test]
    fn generated_key_round_trips_through_string_form() {
        let key = generate_private_key();
        assert!(check_key_valid(&key));

        let signer = EcdsaSigner::from_private_key_str(&key).unwrap();
        assert!(signer.can_sign());
        assert_eq!(signer.private_key_string().unwrap(), key);
        assert_eq!(signer.public_key_bytes().len(), 33);
    }

    #[test]
    fn rejects_malformed_keys() {
        assert!(!check_key_valid(""));
        assert!(!check_key_valid("not base64 !!"));
        assert_eq!(
            EcdsaSigner::from_private_key_str("%%%").unwrap_err(),
            KeyError::InvalidEncoding
        );
        assert!(matches!(
            EcdsaSigner::from_private_key_str("AAAA"),
            Err(KeyError::InvalidKey(_))
        ));
        // all-zero scalar is outside the valid range
        assert!(matches!(
            EcdsaSigner::from_secret_bytes(&[0u8; 32]),
            Err(KeyError::InvalidKey(_))
        ));
    }

    #[test]
    fn verify_only_instance_cannot_sign_but_verifies() {
        let signer = EcdsaSigner::from_private_key_str(&generate_private_key()).unwrap();
        let verifier = EcdsaSigner::verify_only(&signer.public_key_bytes()).unwrap();
        assert!(!verifier.can_sign());
        assert_eq!(verifier.sign(b"msg").unwrap_err(), SignError::NotSignCapable);
        assert!(verifier.private_key_string().is_err());

        let signature = signer.sign(b"msg").unwrap();
        assert!(verifier.verify(&signer.public_key_bytes(), b"msg", &signature));
    }

    #[test]
    fn verify_rejects_garbage_inputs() {
        let signer = EcdsaSigner::from_private_key_str(&generate_private_key()).unwrap();
        let signature = signer.sign(b"msg").unwrap();
        assert!(!signer.verify(b"short", b"msg", &signature));
        assert!(!signer.verify(
            &signer.public_key_bytes(),
            b"msg",
            &Signature::from_bytes(vec![1, 2, 3])
        ));
    }
}
