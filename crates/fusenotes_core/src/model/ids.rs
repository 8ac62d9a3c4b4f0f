//! Identifier and timestamp value types.
//!
//! # Responsibility
//! - Generate collision-resistant random ids for notes and fragments.
//! - Provide a millisecond timestamp shared by every signed record.
//!
//! # Invariants
//! - `NoteId` is exactly 96 bits and `FragmentId` exactly 48 bits.
//! - Ids are assigned once at creation and never change.
//! - `Timestamp` is Unix epoch milliseconds, the unit persisted and signed.

use chrono::{TimeZone, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use std::fmt::{Display, Formatter};

/// Byte length of a `NoteId`.
pub const NOTE_ID_LEN: usize = 12;
/// Byte length of a `FragmentId`.
pub const FRAGMENT_ID_LEN: usize = 6;

/// Error returned when raw bytes do not form a valid identifier.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {kind} length: expected {expected} bytes, got {actual}")]
pub struct IdLengthError {
    pub kind: &'static str,
    pub expected: usize,
    pub actual: usize,
}

/// 96-bit random note identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NoteId([u8; NOTE_ID_LEN]);

impl NoteId {
    /// Allocates a fresh random id from the OS RNG.
    pub fn generate() -> Self {
        let mut bytes = [0u8; NOTE_ID_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, IdLengthError> {
        let raw: [u8; NOTE_ID_LEN] = bytes.try_into().map_err(|_| IdLengthError {
            kind: "note id",
            expected: NOTE_ID_LEN,
            actual: bytes.len(),
        })?;
        Ok(Self(raw))
    }

    pub fn as_bytes(&self) -> &[u8; NOTE_ID_LEN] {
        &self.0
    }
}

impl Display for NoteId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// 48-bit random fragment identifier, unique within its owning note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FragmentId([u8; FRAGMENT_ID_LEN]);

impl FragmentId {
    /// Allocates a fresh random id from the OS RNG.
    pub fn generate() -> Self {
        let mut bytes = [0u8; FRAGMENT_ID_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, IdLengthError> {
        let raw: [u8; FRAGMENT_ID_LEN] = bytes.try_into().map_err(|_| IdLengthError {
            kind: "fragment id",
            expected: FRAGMENT_ID_LEN,
            actual: bytes.len(),
        })?;
        Ok(Self(raw))
    }

    pub fn as_bytes(&self) -> &[u8; FRAGMENT_ID_LEN] {
        &self.0
    }
}

impl Display for FragmentId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// Point in time in Unix epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Current wall-clock time.
    pub fn now() -> Self {
        Self(Utc::now().timestamp_millis())
    }

    pub const fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    pub const fn as_millis(self) -> i64 {
        self.0
    }

    /// Returns the instant one millisecond later.
    pub const fn next_tick(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// Returns `now`, or one tick after `floor` when the clock has not moved past it.
    ///
    /// Used wherever a per-record stamp must strictly increase.
    pub fn now_after(floor: Self) -> Self {
        Self::now().max(floor.next_tick())
    }
}

impl Display for Timestamp {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match Utc.timestamp_millis_opt(self.0).single() {
            Some(value) => write!(f, "{}", value.to_rfc3339()),
            None => write!(f, "{}ms", self.0),
        }
    }
}
