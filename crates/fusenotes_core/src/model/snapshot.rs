//! Immutable, signature-consistent copies of note and fragment state.
//!
//! # Responsibility
//! - Carry record state across threads (persistence, sync) without touching
//!   live mutable fields.
//! - Verify the signatures a snapshot carries against its owner key.
//!
//! # Invariants
//! - Every snapshot is captured under the owning record's lock, so its
//!   signature always covers exactly the fields it carries.
//! - `NoteSnapshot::fragments` is ordered by `(created_at, fragment_id)`.
//! - A delta snapshot carries the note metadata plus exactly one fragment.

use crate::crypto::message::{fragment_message, note_message};
use crate::crypto::signer::{Signature, SignerVerifier};
use crate::model::encrypted_note::{NoteError, RecordRef};
use crate::model::fragment::FragmentKey;
use crate::model::ids::{FragmentId, NoteId, Timestamp};

/// Point-in-time copy of one fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragmentSnapshot {
    pub fragment_id: FragmentId,
    pub created_at: Timestamp,
    pub edited_at: Timestamp,
    pub deleted: bool,
    /// Ciphertext; `None` once tombstoned.
    pub body: Option<String>,
    pub signature: Signature,
}

impl FragmentSnapshot {
    pub fn key(&self) -> FragmentKey {
        FragmentKey::new(self.created_at, self.fragment_id)
    }

    /// Canonical bytes covered by this fragment's signature.
    pub fn signed_message(&self, note_id: &NoteId) -> Vec<u8> {
        fragment_message(
            self.body.as_deref(),
            note_id,
            &self.fragment_id,
            self.created_at,
            self.edited_at,
            self.deleted,
        )
    }

    pub fn verify(
        &self,
        note_id: &NoteId,
        owner_key: &[u8],
        verifier: &dyn SignerVerifier,
    ) -> bool {
        verifier.verify(owner_key, &self.signed_message(note_id), &self.signature)
    }
}

/// Point-in-time copy of a note: metadata plus zero or more fragments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoteSnapshot {
    pub note_id: NoteId,
    /// Encoded public key of the owning signer.
    pub owner_key: Vec<u8>,
    pub created_at: Timestamp,
    pub meta_edited_at: Timestamp,
    pub deleted: bool,
    pub signature: Signature,
    pub fragments: Vec<FragmentSnapshot>,
}

impl NoteSnapshot {
    /// Canonical bytes covered by the note-level signature.
    pub fn signed_message(&self) -> Vec<u8> {
        note_message(
            &self.note_id,
            self.created_at,
            self.meta_edited_at,
            self.deleted,
        )
    }

    /// Verifies the note signature and every carried fragment signature.
    ///
    /// # Errors
    /// - `NoteError::SignatureMismatch` naming the first record that fails.
    pub fn verify(&self, verifier: &dyn SignerVerifier) -> Result<(), NoteError> {
        if !verifier.verify(&self.owner_key, &self.signed_message(), &self.signature) {
            return Err(NoteError::SignatureMismatch(RecordRef::Note(self.note_id)));
        }
        for fragment in &self.fragments {
            if !fragment.verify(&self.note_id, &self.owner_key, verifier) {
                return Err(NoteError::SignatureMismatch(RecordRef::Fragment(
                    self.note_id,
                    fragment.fragment_id,
                )));
            }
        }
        Ok(())
    }

    /// Ciphertext of the newest carried fragment, if any and not tombstoned.
    pub fn current_body(&self) -> Option<&str> {
        self.fragments
            .last()
            .and_then(|fragment| fragment.body.as_deref())
    }
}
