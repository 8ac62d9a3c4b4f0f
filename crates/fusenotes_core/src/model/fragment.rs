//! Fragment: one signed version of a note's encrypted body.
//!
//! # Responsibility
//! - Own the mutable `(edited_at, deleted, body, signature)` quad of one
//!   version behind a per-fragment lock.
//! - Provide the one-way tombstone transition and atomic snapshots.
//!
//! # Invariants
//! - `fragment_id`, `note_id` and `created_at` never change.
//! - The quad is only read or written while holding `state`, and the stored
//!   signature always covers the stored fields.
//! - Fragments order by `(created_at, fragment_id)`; equal timestamps never
//!   collapse two fragments into one.

use crate::crypto::message::fragment_message;
use crate::crypto::signer::{SignError, Signature, SignerVerifier};
use crate::model::ids::{FragmentId, NoteId, Timestamp};
use crate::model::snapshot::FragmentSnapshot;
use parking_lot::Mutex;

/// Ordering key of a fragment inside its note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FragmentKey {
    pub created_at: Timestamp,
    pub fragment_id: FragmentId,
}

impl FragmentKey {
    pub fn new(created_at: Timestamp, fragment_id: FragmentId) -> Self {
        Self {
            created_at,
            fragment_id,
        }
    }
}

#[derive(Debug)]
struct FragmentState {
    edited_at: Timestamp,
    deleted: bool,
    body: Option<String>,
    signature: Signature,
}

/// Live fragment owned by exactly one `EncryptedNote`.
#[derive(Debug)]
pub struct Fragment {
    note_id: NoteId,
    fragment_id: FragmentId,
    created_at: Timestamp,
    state: Mutex<FragmentState>,
}

impl Fragment {
    /// Creates and signs a new version with `created_at == edited_at`.
    pub(crate) fn create(
        note_id: NoteId,
        body: String,
        created_at: Timestamp,
        signer: &dyn SignerVerifier,
    ) -> Result<Self, SignError> {
        let fragment_id = FragmentId::generate();
        let signature = signer.sign(&fragment_message(
            Some(body.as_str()),
            &note_id,
            &fragment_id,
            created_at,
            created_at,
            false,
        ))?;

        Ok(Self {
            note_id,
            fragment_id,
            created_at,
            state: Mutex::new(FragmentState {
                edited_at: created_at,
                deleted: false,
                body: Some(body),
                signature,
            }),
        })
    }

    /// Rebuilds a fragment from stored fields without re-signing.
    pub(crate) fn restore(note_id: NoteId, snapshot: FragmentSnapshot) -> Self {
        Self {
            note_id,
            fragment_id: snapshot.fragment_id,
            created_at: snapshot.created_at,
            state: Mutex::new(FragmentState {
                edited_at: snapshot.edited_at,
                deleted: snapshot.deleted,
                body: snapshot.body,
                signature: snapshot.signature,
            }),
        }
    }

    pub fn note_id(&self) -> NoteId {
        self.note_id
    }

    pub fn fragment_id(&self) -> FragmentId {
        self.fragment_id
    }

    pub fn created_at(&self) -> Timestamp {
        self.created_at
    }

    pub fn key(&self) -> FragmentKey {
        FragmentKey::new(self.created_at, self.fragment_id)
    }

    pub fn edited_at(&self) -> Timestamp {
        self.state.lock().edited_at
    }

    pub fn is_deleted(&self) -> bool {
        self.state.lock().deleted
    }

    /// Ciphertext body; `None` for a tombstone.
    pub fn body(&self) -> Option<String> {
        self.state.lock().body.clone()
    }

    /// Tombstones this fragment: clears the body, restamps and re-signs.
    ///
    /// Re-deleting restamps `edited_at` again. Nothing changes if signing fails.
    pub(crate) fn delete(&self, signer: &dyn SignerVerifier) -> Result<(), SignError> {
        let mut state = self.state.lock();
        let edited_at = Timestamp::now().max(state.edited_at);
        let signature = signer.sign(&fragment_message(
            None,
            &self.note_id,
            &self.fragment_id,
            self.created_at,
            edited_at,
            true,
        ))?;

        state.deleted = true;
        state.body = None;
        state.edited_at = edited_at;
        state.signature = signature;
        Ok(())
    }

    /// Copies the signed fields atomically with respect to `delete`.
    pub fn snapshot(&self) -> FragmentSnapshot {
        let state = self.state.lock();
        FragmentSnapshot {
            fragment_id: self.fragment_id,
            created_at: self.created_at,
            edited_at: state.edited_at,
            deleted: state.deleted,
            body: state.body.clone(),
            signature: state.signature.clone(),
        }
    }
}
