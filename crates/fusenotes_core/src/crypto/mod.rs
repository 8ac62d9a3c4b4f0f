//! Cryptographic capabilities consumed by the note record model.
//!
//! # Responsibility
//! - Expose signing/verification and body encryption behind narrow traits.
//! - Keep primitive choices (secp256k1, AES-GCM) out of model code.
//!
//! # Invariants
//! - The model only ever sees `SignerVerifier` and `NoteCipher`.

pub mod cipher;
pub mod message;
pub mod signer;
