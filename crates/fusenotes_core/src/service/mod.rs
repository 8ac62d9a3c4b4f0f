//! Session services over the record model.
//!
//! # Responsibility
//! - Expose plaintext notes and the store that persists and syncs them.
//! - Keep callers decoupled from storage, crypto and scheduling details.

pub mod note;
pub mod note_store;
pub mod persistence;
