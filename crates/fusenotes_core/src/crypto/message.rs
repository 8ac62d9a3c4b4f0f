//! Canonical byte encoding of signed record fields.
//!
//! Every field is written with a 4-byte big-endian length prefix after a
//! domain tag, so two different field tuples never encode to the same bytes.

use crate::model::ids::{FragmentId, NoteId, Timestamp};

const NOTE_DOMAIN: &[u8] = b"fusenotes/note/v1";
const FRAGMENT_DOMAIN: &[u8] = b"fusenotes/fragment/v1";

/// Incremental builder for one canonical message.
#[derive(Debug, Default)]
pub struct CanonicalMessage {
    bytes: Vec<u8>,
}

impl CanonicalMessage {
    pub fn new(domain: &[u8]) -> Self {
        let mut message = Self::default();
        message.push_bytes(domain);
        message
    }

    pub fn push_bytes(&mut self, value: &[u8]) -> &mut Self {
        // Field lengths are bounded by note body size, far below u32::MAX.
        let len = u32::try_from(value.len()).unwrap_or(u32::MAX);
        self.bytes.extend_from_slice(&len.to_be_bytes());
        self.bytes.extend_from_slice(value);
        self
    }

    /// Absent values encode differently from empty ones.
    pub fn push_optional(&mut self, value: Option<&[u8]>) -> &mut Self {
        match value {
            Some(bytes) => {
                self.bytes.push(1);
                self.push_bytes(bytes)
            }
            None => {
                self.bytes.push(0);
                self
            }
        }
    }

    pub fn push_timestamp(&mut self, value: Timestamp) -> &mut Self {
        self.push_bytes(&value.as_millis().to_be_bytes())
    }

    pub fn push_flag(&mut self, value: bool) -> &mut Self {
        self.push_bytes(&[u8::from(value)])
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// Message covered by a note-level signature (metadata only).
pub fn note_message(
    note_id: &NoteId,
    created_at: Timestamp,
    meta_edited_at: Timestamp,
    deleted: bool,
) -> Vec<u8> {
    let mut message = CanonicalMessage::new(NOTE_DOMAIN);
    message
        .push_bytes(note_id.as_bytes())
        .push_timestamp(created_at)
        .push_timestamp(meta_edited_at)
        .push_flag(deleted);
    message.into_bytes()
}

/// Message covered by a fragment signature.
pub fn fragment_message(
    body: Option<&str>,
    note_id: &NoteId,
    fragment_id: &FragmentId,
    created_at: Timestamp,
    edited_at: Timestamp,
    deleted: bool,
) -> Vec<u8> {
    let mut message = CanonicalMessage::new(FRAGMENT_DOMAIN);
    message
        .push_optional(body.map(str::as_bytes))
        .push_bytes(note_id.as_bytes())
        .push_bytes(fragment_id.as_bytes())
        .push_timestamp(created_at)
        .push_timestamp(edited_at)
        .push_flag(deleted);
    message.into_bytes()
}

#[cfg(test)]
mod tests {
    use super::{fragment_message, note_message};
    use crate::model::ids::{FragmentId, NoteId, Timestamp};

    #[test]
    fn every_note_field_changes_the_message() {
        let id = NoteId::generate();
        let created = Timestamp::from_millis(10);
        let edited = Timestamp::from_millis(20);
        let base = note_message(&id, created, edited, false);

        assert_ne!(base, note_message(&NoteId::generate(), created, edited, false));
        assert_ne!(base, note_message(&id, Timestamp::from_millis(11), edited, false));
        assert_ne!(base, note_message(&id, created, Timestamp::from_millis(21), false));
        assert_ne!(base, note_message(&id, created, edited, true));
    }

    #[test]
    fn null_body_differs_from_empty_body() {
        let note_id = NoteId::generate();
        let fragment_id = FragmentId::generate();
        let at = Timestamp::from_millis(5);
        let with_empty = fragment_message(Some(""), &note_id, &fragment_id, at, at, false);
        let with_null = fragment_message(None, &note_id, &fragment_id, at, at, false);
        assert_ne!(with_empty, with_null);
    }

    #[test]
    fn note_and_fragment_domains_never_collide() {
        let note_id = NoteId::generate();
        let at = Timestamp::from_millis(1);
        let note = note_message(&note_id, at, at, false);
        let fragment = fragment_message(None, &note_id, &FragmentId::generate(), at, at, false);
        assert_ne!(note[..4], fragment[..4]);
    }
}
