//! Repository layer abstractions and persistence implementations.
//!
//! # Responsibility
//! - Define the storage contract the note store depends on.
//! - Isolate SQLite query details from store orchestration.
//!
//! # Invariants
//! - Read paths reject unverifiable or malformed persisted state instead of
//!   masking it.

pub mod note_db;
