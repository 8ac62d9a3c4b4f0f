//! Versioned note record model.
//!
//! # Responsibility
//! - Define identifiers, fragments, encrypted notes and their snapshots.
//! - Keep every mutation signed and every snapshot signature-consistent.
//!
//! # Invariants
//! - Every record is identified by a stable random id (`NoteId`, `FragmentId`).
//! - Deletion is represented by signed tombstones, never by removal.

pub mod encrypted_note;
pub mod fragment;
pub mod ids;
pub mod snapshot;
