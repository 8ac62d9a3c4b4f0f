//! Plaintext-facing note façade.
//!
//! # Responsibility
//! - Pair one `EncryptedNote` with the cipher so callers read and write
//!   plaintext.
//! - Forward every successful mutation to the registered listener.
//!
//! # Invariants
//! - The listener reference is read once per mutation; detaching concurrently
//!   never yields a half-observed listener.
//! - `body()` never fails: undecryptable content reads as empty and is
//!   logged. `try_body()` exposes the failure.

use crate::crypto::cipher::{CipherError, NoteCipher};
use crate::logging::{sanitize_message, MAX_ERROR_CHARS};
use crate::model::encrypted_note::{EncryptedNote, NoteError};
use crate::model::ids::{NoteId, Timestamp};
use crate::model::snapshot::NoteSnapshot;
use log::error;
use parking_lot::RwLock;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

/// Receives the snapshot produced by each successful note mutation.
pub trait NoteListener: Send + Sync {
    fn on_note_changed(&self, note: &Note, delta: &NoteSnapshot);
}

pub struct Note {
    encrypted: EncryptedNote,
    cipher: Arc<dyn NoteCipher>,
    listener: RwLock<Option<Arc<dyn NoteListener>>>,
}

impl Note {
    pub fn new(encrypted: EncryptedNote, cipher: Arc<dyn NoteCipher>) -> Self {
        Self {
            encrypted,
            cipher,
            listener: RwLock::new(None),
        }
    }

    /// Decrypted current body; empty when there is none or it cannot be read.
    pub fn body(&self) -> String {
        match self.try_body() {
            Ok(body) => body,
            Err(err) => {
                error!(
                    "event=body_decrypt module=note status=error note_id={} error={}",
                    self.id(),
                    sanitize_message(&err.to_string(), MAX_ERROR_CHARS)
                );
                String::new()
            }
        }
    }

    /// Decrypted current body, telling an empty note from a corrupted one.
    pub fn try_body(&self) -> Result<String, CipherError> {
        self.cipher
            .decrypt_body(self.encrypted.current_body().as_deref())
    }

    /// Encrypts `plaintext` and appends it as the newest version.
    pub fn set_body(&self, plaintext: &str) -> Result<NoteSnapshot, NoteError> {
        let ciphertext = self.cipher.encrypt(plaintext)?;
        let delta = self.encrypted.set_body(ciphertext)?;
        self.notify(&delta);
        Ok(delta)
    }

    /// Tombstones the note and all of its versions.
    pub fn delete(&self) -> Result<(), NoteError> {
        self.encrypted.delete()?;
        let snapshot = self.encrypted.snapshot();
        self.notify(&snapshot);
        Ok(())
    }

    pub fn id(&self) -> NoteId {
        self.encrypted.note_id()
    }

    pub fn created_at(&self) -> Timestamp {
        self.encrypted.created_at()
    }

    /// Latest metadata or content change.
    pub fn edited_at(&self) -> Timestamp {
        self.encrypted.edited_at()
    }

    pub fn is_deleted(&self) -> bool {
        self.encrypted.is_deleted()
    }

    pub fn encrypted(&self) -> &EncryptedNote {
        &self.encrypted
    }

    pub fn set_listener(&self, listener: Arc<dyn NoteListener>) {
        *self.listener.write() = Some(listener);
    }

    pub fn clear_listener(&self) {
        *self.listener.write() = None;
    }

    fn notify(&self, delta: &NoteSnapshot) {
        let listener = self.listener.read().clone();
        if let Some(listener) = listener {
            listener.on_note_changed(self, delta);
        }
    }
}

impl Debug for Note {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Note")
            .field("encrypted", &self.encrypted)
            .finish_non_exhaustive()
    }
}
