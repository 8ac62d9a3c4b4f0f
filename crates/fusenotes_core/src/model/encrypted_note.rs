//! EncryptedNote aggregate: signed metadata plus an append-only fragment history.
//!
//! # Responsibility
//! - Own note metadata and its signature behind one per-note lock.
//! - Append new signed fragments and hand out delta / full snapshots.
//! - Cascade soft-delete to every fragment.
//!
//! # Invariants
//! - `created_at` never changes after construction.
//! - `(meta_edited_at, deleted, signature)` is only touched while holding
//!   `meta`, so a snapshot never carries a signature that mismatches its fields.
//! - Fragments are append-only; within one note their `created_at` values
//!   strictly increase, so the newest fragment is always unambiguous.
//! - Verify-only notes reject every mutation.

use crate::crypto::cipher::CipherError;
use crate::crypto::message::note_message;
use crate::crypto::signer::{SignError, Signature, SignerVerifier};
use crate::model::fragment::{Fragment, FragmentKey};
use crate::model::ids::{FragmentId, NoteId, Timestamp};
use crate::model::snapshot::{FragmentSnapshot, NoteSnapshot};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::fmt::{Debug, Display, Formatter};
use std::sync::Arc;

/// Names the signed record an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordRef {
    Note(NoteId),
    Fragment(NoteId, FragmentId),
}

impl Display for RecordRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Note(note_id) => write!(f, "note {note_id}"),
            Self::Fragment(note_id, fragment_id) => {
                write!(f, "fragment {fragment_id} of note {note_id}")
            }
        }
    }
}

/// Errors raised by the note record model.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NoteError {
    #[error("note {0} is verify-only and cannot be modified")]
    NotSignCapable(NoteId),
    #[error("signature mismatch on {0}")]
    SignatureMismatch(RecordRef),
    #[error("note {0} is not owned by the supplied key")]
    OwnerMismatch(NoteId),
    #[error("stored note is unreadable: {0}")]
    Unreadable(String),
    #[error(transparent)]
    Sign(#[from] SignError),
    #[error(transparent)]
    Cipher(#[from] CipherError),
}

/// Whether a note's key can produce new signatures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyCapability {
    SignCapable,
    VerifyOnly,
}

#[derive(Debug, Clone)]
struct NoteMeta {
    meta_edited_at: Timestamp,
    deleted: bool,
    signature: Signature,
}

/// Live encrypted note shared across the caller and background workers.
pub struct EncryptedNote {
    note_id: NoteId,
    created_at: Timestamp,
    signer: Arc<dyn SignerVerifier>,
    capability: KeyCapability,
    meta: Mutex<NoteMeta>,
    fragments: RwLock<BTreeMap<FragmentKey, Arc<Fragment>>>,
}

impl EncryptedNote {
    /// Creates a new, empty, signed note owned by `signer`.
    ///
    /// # Errors
    /// - `NoteError::NotSignCapable` for a verify-only signer.
    pub fn create(signer: Arc<dyn SignerVerifier>) -> Result<Self, NoteError> {
        let note_id = NoteId::generate();
        if !signer.can_sign() {
            return Err(NoteError::NotSignCapable(note_id));
        }

        let now = Timestamp::now();
        let signature = signer.sign(&note_message(&note_id, now, now, false))?;
        Ok(Self {
            note_id,
            created_at: now,
            capability: KeyCapability::SignCapable,
            signer,
            meta: Mutex::new(NoteMeta {
                meta_edited_at: now,
                deleted: false,
                signature,
            }),
            fragments: RwLock::new(BTreeMap::new()),
        })
    }

    /// Rebuilds a note from stored metadata.
    ///
    /// Fields are asserted, not re-signed or verified; call `verify` (or use
    /// `from_snapshot`) before trusting the result.
    pub fn reconstruct(
        note_id: NoteId,
        signer: Arc<dyn SignerVerifier>,
        created_at: Timestamp,
        meta_edited_at: Timestamp,
        deleted: bool,
        signature: Signature,
    ) -> Self {
        let capability = if signer.can_sign() {
            KeyCapability::SignCapable
        } else {
            KeyCapability::VerifyOnly
        };
        Self {
            note_id,
            created_at,
            signer,
            capability,
            meta: Mutex::new(NoteMeta {
                meta_edited_at,
                deleted,
                signature,
            }),
            fragments: RwLock::new(BTreeMap::new()),
        }
    }

    /// Rebuilds a note from a snapshot after verifying ownership and every signature.
    pub fn from_snapshot(
        snapshot: NoteSnapshot,
        signer: Arc<dyn SignerVerifier>,
    ) -> Result<Self, NoteError> {
        if snapshot.owner_key != signer.public_key_bytes() {
            return Err(NoteError::OwnerMismatch(snapshot.note_id));
        }
        snapshot.verify(signer.as_ref())?;

        let note = Self::reconstruct(
            snapshot.note_id,
            signer,
            snapshot.created_at,
            snapshot.meta_edited_at,
            snapshot.deleted,
            snapshot.signature,
        );
        for fragment in snapshot.fragments {
            note.restore_fragment(fragment);
        }
        Ok(note)
    }

    /// Adds a stored fragment to the history without re-signing.
    ///
    /// A fragment already present under the same key is kept as is.
    pub fn restore_fragment(&self, snapshot: FragmentSnapshot) {
        let key = snapshot.key();
        self.fragments
            .write()
            .entry(key)
            .or_insert_with(|| Arc::new(Fragment::restore(self.note_id, snapshot)));
    }

    /// Appends a new signed fragment carrying `ciphertext`.
    ///
    /// Returns a delta snapshot: note metadata plus only the new fragment.
    pub fn set_body(&self, ciphertext: impl Into<String>) -> Result<NoteSnapshot, NoteError> {
        self.require_sign_capable()?;

        let fragment = {
            let mut fragments = self.fragments.write();
            let created_at = match fragments.keys().next_back() {
                Some(last) => Timestamp::now_after(last.created_at),
                None => Timestamp::now(),
            };
            let fragment = Arc::new(Fragment::create(
                self.note_id,
                ciphertext.into(),
                created_at,
                self.signer.as_ref(),
            )?);
            fragments.insert(fragment.key(), Arc::clone(&fragment));
            fragment
        };

        let mut delta = self.meta_snapshot();
        delta.fragments.push(fragment.snapshot());
        Ok(delta)
    }

    /// Marks the note and every existing fragment deleted, re-signing each.
    pub fn delete(&self) -> Result<(), NoteError> {
        self.require_sign_capable()?;

        {
            let mut meta = self.meta.lock();
            let meta_edited_at = Timestamp::now().max(meta.meta_edited_at);
            let signature = self.signer.sign(&note_message(
                &self.note_id,
                self.created_at,
                meta_edited_at,
                true,
            ))?;
            meta.meta_edited_at = meta_edited_at;
            meta.deleted = true;
            meta.signature = signature;
        }

        for fragment in self.fragments() {
            fragment.delete(self.signer.as_ref())?;
        }
        Ok(())
    }

    /// Full point-in-time copy: metadata plus every fragment.
    pub fn snapshot(&self) -> NoteSnapshot {
        let mut snapshot = self.meta_snapshot();
        snapshot.fragments = self
            .fragments()
            .iter()
            .map(|fragment| fragment.snapshot())
            .collect();
        snapshot
    }

    /// Copy of the metadata only, with no fragments.
    pub fn meta_snapshot(&self) -> NoteSnapshot {
        let meta = self.meta.lock().clone();
        NoteSnapshot {
            note_id: self.note_id,
            owner_key: self.signer.public_key_bytes(),
            created_at: self.created_at,
            meta_edited_at: meta.meta_edited_at,
            deleted: meta.deleted,
            signature: meta.signature,
            fragments: Vec::new(),
        }
    }

    /// Verifies the note and all fragment signatures against the owner key.
    pub fn verify(&self) -> Result<(), NoteError> {
        self.snapshot().verify(self.signer.as_ref())
    }

    /// Ciphertext of the newest fragment; `None` when empty or tombstoned.
    pub fn current_body(&self) -> Option<String> {
        let newest = self.fragments.read().values().next_back().cloned();
        newest.and_then(|fragment| fragment.body())
    }

    /// Fragments in history order. Weakly consistent with concurrent appends.
    pub fn fragments(&self) -> Vec<Arc<Fragment>> {
        self.fragments.read().values().cloned().collect()
    }

    pub fn fragment_count(&self) -> usize {
        self.fragments.read().len()
    }

    pub fn note_id(&self) -> NoteId {
        self.note_id
    }

    pub fn created_at(&self) -> Timestamp {
        self.created_at
    }

    /// Last time the note metadata itself changed.
    pub fn meta_edited_at(&self) -> Timestamp {
        self.meta.lock().meta_edited_at
    }

    /// Last time the metadata changed or a fragment was added.
    pub fn edited_at(&self) -> Timestamp {
        let meta_edited_at = self.meta_edited_at();
        match self.fragments.read().keys().next_back() {
            Some(last) => meta_edited_at.max(last.created_at),
            None => meta_edited_at,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.meta.lock().deleted
    }

    pub fn signature(&self) -> Signature {
        self.meta.lock().signature.clone()
    }

    pub fn owner_key(&self) -> Vec<u8> {
        self.signer.public_key_bytes()
    }

    pub fn signer(&self) -> &Arc<dyn SignerVerifier> {
        &self.signer
    }

    pub fn capability(&self) -> KeyCapability {
        self.capability
    }

    fn require_sign_capable(&self) -> Result<(), NoteError> {
        match self.capability {
            KeyCapability::SignCapable => Ok(()),
            KeyCapability::VerifyOnly => Err(NoteError::NotSignCapable(self.note_id)),
        }
    }
}

impl Debug for EncryptedNote {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptedNote")
            .field("note_id", &self.note_id)
            .field("created_at", &self.created_at)
            .field("capability", &self.capability)
            .field("fragments", &self.fragment_count())
            .finish_non_exhaustive()
    }
}
