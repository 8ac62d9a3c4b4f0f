//! One synchronization pass: collect pending changes, push, record the sync.
//!
//! # Responsibility
//! - Push locally persisted changes that the remote has not accepted yet.
//! - Keep the last successful sync instant in memory and in storage.
//!
//! # Invariants
//! - Pending state lives in storage, so unpushed changes survive restarts.
//! - Records are only cleared after a successful push, and only when they were
//!   not rewritten while the push was in flight.
//! - Without a remote, runs are skipped and nothing is read.

use crate::logging::{sanitize_message, MAX_ERROR_CHARS};
use crate::model::ids::Timestamp;
use crate::repo::note_db::{NoteDatabase, RepoError, RepoResult};
use crate::sync::remote::{RemoteSync, SyncError};
use log::{info, warn};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;

/// Outcome of one completed pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncReport {
    Skipped,
    /// Number of notes pushed.
    Pushed(usize),
}

pub struct SyncEngine {
    owner_key: Vec<u8>,
    db: Arc<dyn NoteDatabase>,
    remote: Option<Arc<dyn RemoteSync>>,
    last_sync: Mutex<Option<Timestamp>>,
}

impl SyncEngine {
    pub fn new(
        owner_key: Vec<u8>,
        db: Arc<dyn NoteDatabase>,
        remote: Option<Arc<dyn RemoteSync>>,
    ) -> Self {
        let last_sync = match db.last_sync(&owner_key) {
            Ok(value) => value,
            Err(err) => {
                warn!(
                    "event=sync_run module=sync status=error error_code=last_sync_read_failed error={}",
                    sanitize_message(&err.to_string(), MAX_ERROR_CHARS)
                );
                None
            }
        };
        Self {
            owner_key,
            db,
            remote,
            last_sync: Mutex::new(last_sync),
        }
    }

    pub fn has_remote(&self) -> bool {
        self.remote.is_some()
    }

    pub fn last_sync(&self) -> Option<Timestamp> {
        *self.last_sync.lock()
    }

    /// Notes with changes the remote has not accepted yet.
    pub fn unsynced_count(&self) -> RepoResult<usize> {
        self.db.unsynced_count(&self.owner_key)
    }

    /// Runs one blocking pass on the current thread.
    pub fn run_once(&self) -> Result<SyncReport, SyncError> {
        let Some(remote) = self.remote.as_ref() else {
            info!("event=sync_run module=sync status=skip reason=no_remote");
            return Ok(SyncReport::Skipped);
        };

        let started_at = Instant::now();
        let pending = self
            .db
            .load_unsynced(&self.owner_key)
            .map_err(|err| self.storage_failure("load_unsynced_failed", err))?;
        for (note_id, err) in &pending.unreadable {
            warn!(
                "event=sync_run module=sync status=skip note_id={} reason=unreadable error={}",
                note_id,
                sanitize_message(&err.to_string(), MAX_ERROR_CHARS)
            );
        }

        let batch = pending.snapshots;
        let count = batch.len();
        if !batch.is_empty() {
            if let Err(err) = remote.push(&self.owner_key, &batch) {
                warn!(
                    "event=sync_run module=sync status=error changes={} duration_ms={} error={}",
                    count,
                    started_at.elapsed().as_millis(),
                    sanitize_message(&err.to_string(), MAX_ERROR_CHARS)
                );
                return Err(err);
            }
        }

        let now = Timestamp::now();
        self.db
            .record_sync(&self.owner_key, &batch, now)
            .map_err(|err| self.storage_failure("last_sync_write_failed", err))?;
        *self.last_sync.lock() = Some(now);

        info!(
            "event=sync_run module=sync status=ok changes={} duration_ms={}",
            count,
            started_at.elapsed().as_millis()
        );
        Ok(SyncReport::Pushed(count))
    }

    fn storage_failure(&self, error_code: &str, err: RepoError) -> SyncError {
        let message = sanitize_message(&err.to_string(), MAX_ERROR_CHARS);
        warn!(
            "event=sync_run module=sync status=error error_code={} error={}",
            error_code, message
        );
        SyncError::Storage(message)
    }
}

#[cfg(test)]
mod tests {
    use super::{SyncEngine, SyncReport};
    use crate::crypto::signer::{generate_private_key, EcdsaSigner, SignerVerifier};
    use crate::model::encrypted_note::EncryptedNote;
    use crate::model::ids::Timestamp;
    use crate::model::snapshot::NoteSnapshot;
    use crate::repo::note_db::{NoteDatabase, SqliteNoteDatabase};
    use crate::sync::remote::{RemoteSync, SyncError};
    use parking_lot::Mutex;
    use std::sync::Arc;

    struct Refuse;

    impl RemoteSync for Refuse {
        fn push(&self, _owner_key: &[u8], _changes: &[NoteSnapshot]) -> Result<(), SyncError> {
            Err(SyncError::Rejected("quota exceeded".to_string()))
        }
    }

    #[derive(Default)]
    struct Capture {
        batches: Mutex<Vec<Vec<NoteSnapshot>>>,
    }

    impl RemoteSync for Capture {
        fn push(&self, _owner_key: &[u8], changes: &[NoteSnapshot]) -> Result<(), SyncError> {
            self.batches.lock().push(changes.to_vec());
            Ok(())
        }
    }

    fn signer() -> Arc<dyn SignerVerifier> {
        Arc::new(EcdsaSigner::from_private_key_str(&generate_private_key()).unwrap())
    }

    #[test]
    fn without_remote_runs_are_skipped_and_changes_stay_pending() {
        let owner = signer();
        let db: Arc<dyn NoteDatabase> = Arc::new(SqliteNoteDatabase::open_in_memory().unwrap());
        let note = EncryptedNote::create(Arc::clone(&owner)).unwrap();
        db.upsert(&note.set_body("kept").unwrap()).unwrap();

        let engine = SyncEngine::new(owner.public_key_bytes(), Arc::clone(&db), None);
        assert_eq!(engine.run_once().unwrap(), SyncReport::Skipped);
        assert_eq!(engine.unsynced_count().unwrap(), 1);
        assert_eq!(engine.last_sync(), None);
    }

    #[test]
    fn rejected_push_keeps_changes_pending() {
        let owner = signer();
        let db: Arc<dyn NoteDatabase> = Arc::new(SqliteNoteDatabase::open_in_memory().unwrap());
        let note = EncryptedNote::create(Arc::clone(&owner)).unwrap();
        db.upsert(&note.set_body("kept").unwrap()).unwrap();

        let engine = SyncEngine::new(
            owner.public_key_bytes(),
            Arc::clone(&db),
            Some(Arc::new(Refuse)),
        );
        assert!(matches!(engine.run_once(), Err(SyncError::Rejected(_))));
        assert_eq!(engine.unsynced_count().unwrap(), 1);
        assert_eq!(db.last_sync(&owner.public_key_bytes()).unwrap(), None);
    }

    #[test]
    fn edits_during_a_push_stay_pending_for_the_next_pass() {
        let owner = signer();
        let db: Arc<dyn NoteDatabase> = Arc::new(SqliteNoteDatabase::open_in_memory().unwrap());
        let remote = Arc::new(Capture::default());
        let note = EncryptedNote::create(Arc::clone(&owner)).unwrap();
        db.upsert(&note.set_body("first").unwrap()).unwrap();

        let engine = SyncEngine::new(
            owner.public_key_bytes(),
            Arc::clone(&db),
            Some(remote.clone()),
        );
        let pushed = db.load_unsynced(&owner.public_key_bytes()).unwrap().snapshots;
        // a later edit lands before the earlier push is acknowledged
        db.upsert(&note.set_body("second").unwrap()).unwrap();
        db.record_sync(&owner.public_key_bytes(), &pushed, Timestamp::now())
            .unwrap();

        assert_eq!(engine.unsynced_count().unwrap(), 1);
        assert_eq!(engine.run_once().unwrap(), SyncReport::Pushed(1));
        let batches = remote.batches.lock();
        assert_eq!(batches[0][0].fragments.len(), 1);
        assert_eq!(batches[0][0].fragments[0].body.as_deref(), Some("second"));
        drop(batches);
        assert_eq!(engine.unsynced_count().unwrap(), 0);
    }
}
