//! Remote store contract.
//!
//! # Invariants
//! - Only snapshots that reached local storage are pushed.
//! - A push either accepts the whole batch or none of it.

use crate::model::snapshot::NoteSnapshot;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    #[error("remote transport failure: {0}")]
    Transport(String),
    #[error("remote rejected changes: {0}")]
    Rejected(String),
    #[error("local sync state unavailable: {0}")]
    Storage(String),
    #[error("sync task aborted: {0}")]
    Aborted(String),
}

/// Remote store collaborator. Calls may block; they run off the caller thread.
pub trait RemoteSync: Send + Sync {
    /// Pushes locally persisted changes owned by `owner_key`.
    fn push(&self, owner_key: &[u8], changes: &[NoteSnapshot]) -> Result<(), SyncError>;
}
