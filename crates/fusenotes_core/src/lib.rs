//! Core domain logic for FuseNotes.
//! This crate is the single source of truth for the signed, versioned note
//! record model and the store that persists and syncs it.

pub mod config;
pub mod crypto;
pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;
pub mod sync;

pub use config::{ConfigError, RetryPolicy, StoreConfig};
pub use crypto::cipher::{AesNoteCipher, CipherError, NoteCipher};
pub use crypto::signer::{
    check_key_valid, generate_private_key, EcdsaSigner, KeyError, SignError, Signature,
    SignerVerifier,
};
pub use db::{open_db, open_db_in_memory, DbError, DbResult};
pub use logging::{init_logging, logging_status, LogLevel, LoggingConfig, LoggingError};
pub use model::encrypted_note::{EncryptedNote, KeyCapability, NoteError, RecordRef};
pub use model::fragment::{Fragment, FragmentKey};
pub use model::ids::{FragmentId, IdLengthError, NoteId, Timestamp};
pub use model::snapshot::{FragmentSnapshot, NoteSnapshot};
pub use repo::note_db::{
    LoadedNotes, NoteDatabase, RepoError, RepoResult, SqliteNoteDatabase, StoredNotes,
};
pub use service::note::{Note, NoteListener};
pub use service::note_store::{LiveNotes, NoteStore, NoteStoreListener, StoreError};
pub use sync::engine::SyncReport;
pub use sync::remote::{RemoteSync, SyncError};

/// Minimal health-check API for early integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::{core_version, ping};

    #[test]
    fn ping_returns_pong() {
        assert_eq!(ping(), "pong");
    }

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
