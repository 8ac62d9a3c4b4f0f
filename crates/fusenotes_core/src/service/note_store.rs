//! Note store: the unlocked session over one owner's notes.
//!
//! # Responsibility
//! - Load, verify and wrap every stored note owned by the session key.
//! - Create notes and route each mutation's snapshot to background
//!   persistence; storage keeps what still has to be pushed.
//! - Drive the recurring sync timer and the bounded shutdown sequence.
//!
//! # Invariants
//! - Notes failing signature or ownership checks are never exposed; they are
//!   listed in `rejected_notes()`.
//! - Mutating callers never block on storage I/O (except on a full queue when
//!   called outside any async runtime).
//! - Notes reach the store only through a weak hook, so dropping the store
//!   releases its runtime even while callers still hold notes.
//! - After `close`/`shutdown`, new notes are refused and edits to existing
//!   notes are no longer persisted.

use crate::config::{ConfigError, StoreConfig};
use crate::crypto::cipher::{AesNoteCipher, NoteCipher};
use crate::crypto::signer::{EcdsaSigner, KeyError, SignError, SignerVerifier};
use crate::logging::{sanitize_message, MAX_ERROR_CHARS};
use crate::model::encrypted_note::{EncryptedNote, NoteError};
use crate::model::ids::{NoteId, Timestamp};
use crate::model::snapshot::NoteSnapshot;
use crate::repo::note_db::{NoteDatabase, RepoError};
use crate::service::note::{Note, NoteListener};
use crate::service::persistence::{FailureHook, PersistenceQueue};
use crate::sync::auto_update::AutoUpdate;
use crate::sync::engine::{SyncEngine, SyncReport};
use crate::sync::remote::{RemoteSync, SyncError};
use log::{error, info, warn};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::runtime::{Handle, Runtime};

/// Store-level errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("invalid private key: {0}")]
    InvalidKey(#[from] KeyError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error(transparent)]
    Note(#[from] NoteError),
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error("persisting note {note_id} failed after {attempts} attempts: {source}")]
    PersistenceFailure {
        note_id: NoteId,
        attempts: u32,
        source: RepoError,
    },
    #[error("failed to start store runtime: {0}")]
    Runtime(String),
    #[error("note store is closed")]
    Closed,
}

impl From<SignError> for StoreError {
    fn from(value: SignError) -> Self {
        Self::Note(NoteError::Sign(value))
    }
}

/// Session-level notifications.
pub trait NoteStoreListener: Send + Sync {
    /// Called once after loading with every live (non-tombstoned) note.
    fn on_bulk_load(&self, notes: LiveNotes<'_>);

    /// Called after every successful mutation, with the change's snapshot.
    fn on_note_changed(&self, note: &Note, delta: &NoteSnapshot);

    /// Called when a snapshot could not be stored after all retries.
    fn on_persistence_failure(&self, _snapshot: &NoteSnapshot, _error: &StoreError) {}
}

/// Lazily skips tombstoned notes.
pub struct LiveNotes<'a> {
    inner: std::slice::Iter<'a, Arc<Note>>,
}

impl<'a> LiveNotes<'a> {
    pub fn new(notes: &'a [Arc<Note>]) -> Self {
        Self { inner: notes.iter() }
    }
}

impl<'a> Iterator for LiveNotes<'a> {
    type Item = &'a Arc<Note>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.by_ref().find(|note| !note.is_deleted())
    }
}

struct StoreShared {
    queue: PersistenceQueue,
    listener: Option<Arc<dyn NoteStoreListener>>,
    closed: AtomicBool,
}

impl StoreShared {
    fn persist(&self, snapshot: NoteSnapshot) -> Result<(), StoreError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        self.queue
            .enqueue(snapshot)
            .map_err(|_| StoreError::Closed)
    }
}

/// Bridges note mutations into the store without keeping it alive.
struct StoreHook {
    shared: Weak<StoreShared>,
}

impl NoteListener for StoreHook {
    fn on_note_changed(&self, note: &Note, delta: &NoteSnapshot) {
        let Some(shared) = self.shared.upgrade() else {
            warn!(
                "event=note_persist module=store status=skip note_id={} reason=store_dropped",
                note.id()
            );
            return;
        };
        if let Err(err) = shared.persist(delta.clone()) {
            warn!(
                "event=note_persist module=store status=skip note_id={} reason={}",
                note.id(),
                err
            );
        }
        if let Some(listener) = shared.listener.as_ref() {
            listener.on_note_changed(note, delta);
        }
    }
}

pub struct NoteStore {
    signer: Arc<EcdsaSigner>,
    cipher: Arc<dyn NoteCipher>,
    config: StoreConfig,
    notes: RwLock<Vec<Arc<Note>>>,
    rejected: Vec<NoteId>,
    shared: Arc<StoreShared>,
    hook: Arc<dyn NoteListener>,
    sync: Arc<SyncEngine>,
    auto_update: AutoUpdate,
    runtime: Mutex<Option<Runtime>>,
    handle: Handle,
}

impl NoteStore {
    /// Unlocks a session for `private_key` and loads its notes.
    ///
    /// When `remote` is given, recurring sync starts at the configured interval.
    ///
    /// # Errors
    /// - `StoreError::InvalidKey` when the key string does not decode.
    /// - `StoreError::Config` for an invalid config.
    /// - `StoreError::Repo` when stored notes cannot be read.
    pub fn open(
        private_key: &str,
        db: Arc<dyn NoteDatabase>,
        remote: Option<Arc<dyn RemoteSync>>,
        config: StoreConfig,
        listener: Option<Arc<dyn NoteStoreListener>>,
    ) -> Result<Self, StoreError> {
        let started_at = Instant::now();
        config.validate()?;
        let signer = Arc::new(EcdsaSigner::from_private_key_str(private_key).map_err(|err| {
            error!("event=store_load module=store status=error error_code=invalid_key");
            err
        })?);
        let cipher: Arc<dyn NoteCipher> = Arc::new(AesNoteCipher::from_key_string(private_key));
        let owner: Arc<dyn SignerVerifier> = signer.clone();

        let loaded = db.load_all(&owner)?;
        let mut rejected = Vec::with_capacity(loaded.rejected.len());
        for (note_id, err) in loaded.rejected {
            warn!(
                "event=note_rejected module=store status=error note_id={} error={}",
                note_id,
                sanitize_message(&err.to_string(), MAX_ERROR_CHARS)
            );
            rejected.push(note_id);
        }

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(config.worker_threads)
            .thread_name("fusenotes-worker")
            .enable_time()
            .build()
            .map_err(|err| StoreError::Runtime(err.to_string()))?;
        let handle = runtime.handle().clone();

        let queue = PersistenceQueue::start(
            &handle,
            config.queue_capacity,
            config.worker_threads,
            config.retry.clone(),
            Arc::clone(&db),
            failure_hook(listener.clone()),
        );
        let sync = Arc::new(SyncEngine::new(
            owner.public_key_bytes(),
            Arc::clone(&db),
            remote,
        ));

        let shared = Arc::new(StoreShared {
            queue,
            listener,
            closed: AtomicBool::new(false),
        });
        let hook: Arc<dyn NoteListener> = Arc::new(StoreHook {
            shared: Arc::downgrade(&shared),
        });

        let notes: Vec<Arc<Note>> = loaded
            .notes
            .into_iter()
            .map(|encrypted| {
                let note = Arc::new(Note::new(encrypted, Arc::clone(&cipher)));
                note.set_listener(Arc::clone(&hook));
                note
            })
            .collect();

        info!(
            "event=store_load module=store status=ok notes={} rejected={} duration_ms={}",
            notes.len(),
            rejected.len(),
            started_at.elapsed().as_millis()
        );

        if let Some(listener) = shared.listener.as_ref() {
            listener.on_bulk_load(LiveNotes::new(&notes));
        }

        let store = Self {
            signer,
            cipher,
            notes: RwLock::new(notes),
            rejected,
            shared,
            hook,
            sync,
            auto_update: AutoUpdate::new(),
            runtime: Mutex::new(Some(runtime)),
            handle,
            config,
        };

        if store.sync.has_remote() {
            let interval = store.config.sync_interval();
            store.start_auto_update(interval, interval)?;
        }
        Ok(store)
    }

    /// Creates a new signed note.
    ///
    /// With `wait_for_edit`, nothing is written until the first `set_body`.
    pub fn create_note(&self, wait_for_edit: bool) -> Result<Arc<Note>, StoreError> {
        if self.is_closed() {
            return Err(StoreError::Closed);
        }

        let signer: Arc<dyn SignerVerifier> = self.signer.clone();
        let encrypted = EncryptedNote::create(signer)?;
        let note = Arc::new(Note::new(encrypted, Arc::clone(&self.cipher)));
        note.set_listener(Arc::clone(&self.hook));
        self.notes.write().push(Arc::clone(&note));

        info!(
            "event=note_create module=store status=ok note_id={} wait_for_edit={}",
            note.id(),
            wait_for_edit
        );

        if !wait_for_edit {
            let snapshot = note.encrypted().meta_snapshot();
            self.shared.persist(snapshot.clone())?;
            if let Some(listener) = self.shared.listener.as_ref() {
                listener.on_note_changed(&note, &snapshot);
            }
        }
        Ok(note)
    }

    /// Every loaded or created note, tombstones included.
    pub fn notes(&self) -> Vec<Arc<Note>> {
        self.notes.read().clone()
    }

    /// Non-deleted notes.
    pub fn live_notes(&self) -> Vec<Arc<Note>> {
        let notes = self.notes.read();
        LiveNotes::new(&notes).cloned().collect()
    }

    pub fn note(&self, note_id: NoteId) -> Option<Arc<Note>> {
        self.notes
            .read()
            .iter()
            .find(|note| note.id() == note_id)
            .cloned()
    }

    /// Ids of stored notes that failed verification on load.
    pub fn rejected_notes(&self) -> &[NoteId] {
        &self.rejected
    }

    /// Key string unlocking this session.
    pub fn private_key(&self) -> Result<String, StoreError> {
        Ok(self.signer.private_key_string()?)
    }

    pub fn public_key(&self) -> Vec<u8> {
        self.signer.public_key_bytes()
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Starts, or restarts with the new settings, recurring sync.
    ///
    /// `interval` is raised to the configured minimum.
    pub fn start_auto_update(
        &self,
        interval: Duration,
        initial_delay: Duration,
    ) -> Result<(), StoreError> {
        if self.is_closed() {
            return Err(StoreError::Closed);
        }
        let interval = self.config.clamp_sync_interval(interval);
        let sync = Arc::clone(&self.sync);
        self.auto_update
            .start(&self.handle, interval, initial_delay, move || {
                let sync = Arc::clone(&sync);
                async move {
                    let outcome = tokio::task::spawn_blocking(move || sync.run_once())
                        .await
                        .unwrap_or_else(|err| Err(SyncError::Aborted(err.to_string())));
                    // other failures are logged by the engine and retried next tick
                    if let Err(SyncError::Aborted(reason)) = outcome {
                        error!(
                            "event=sync_run module=sync status=error error_code=aborted error={}",
                            sanitize_message(&reason, MAX_ERROR_CHARS)
                        );
                    }
                }
            });
        Ok(())
    }

    pub fn stop_auto_update(&self) -> bool {
        self.auto_update.stop()
    }

    pub fn auto_update_interval(&self) -> Option<Duration> {
        self.auto_update.interval()
    }

    /// Runs one sync pass on the calling thread.
    pub fn sync_now(&self) -> Result<SyncReport, StoreError> {
        Ok(self.sync.run_once()?)
    }

    pub fn last_sync(&self) -> Option<Timestamp> {
        self.sync.last_sync()
    }

    /// Number of notes with changes persisted locally but not yet pushed.
    pub fn unsynced_changes(&self) -> Result<usize, StoreError> {
        Ok(self.sync.unsynced_count()?)
    }

    /// Snapshots accepted for persistence but not yet finished.
    pub fn pending_writes(&self) -> usize {
        self.shared.queue.pending()
    }

    /// Blocks until queued and in-flight writes finish or `timeout` elapses.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        self.shared.queue.wait_idle(timeout)
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Stops sync, drains outstanding writes for up to the configured close
    /// timeout, then stops the workers. Returns whether everything drained.
    pub fn close(&self) -> bool {
        let started_at = Instant::now();
        self.begin_shutdown();

        let timeout = self.config.close_timeout();
        let drained = self.shared.queue.wait_idle(timeout);
        let remaining = timeout.saturating_sub(started_at.elapsed());
        if let Some(runtime) = self.runtime.lock().take() {
            if Handle::try_current().is_ok() {
                runtime.shutdown_background();
            } else {
                runtime.shutdown_timeout(remaining);
            }
        }

        if drained {
            info!(
                "event=store_close module=store status=ok duration_ms={}",
                started_at.elapsed().as_millis()
            );
        } else {
            warn!(
                "event=store_close module=store status=timeout pending={} duration_ms={}",
                self.shared.queue.pending(),
                started_at.elapsed().as_millis()
            );
        }
        drained
    }

    /// Stops sync and refuses new work without waiting for outstanding writes.
    pub fn shutdown(&self) {
        self.begin_shutdown();
        info!(
            "event=store_close module=store status=ok mode=nonblocking pending={}",
            self.shared.queue.pending()
        );
    }

    fn begin_shutdown(&self) {
        self.shared.closed.store(true, Ordering::Release);
        self.auto_update.stop();
        self.shared.queue.close();
    }
}

impl Drop for NoteStore {
    fn drop(&mut self) {
        self.begin_shutdown();
        if let Some(runtime) = self.runtime.get_mut().take() {
            runtime.shutdown_background();
        }
    }
}

fn failure_hook(listener: Option<Arc<dyn NoteStoreListener>>) -> FailureHook {
    Arc::new(move |snapshot: &NoteSnapshot, attempts: u32, source: RepoError| {
        let error = StoreError::PersistenceFailure {
            note_id: snapshot.note_id,
            attempts,
            source,
        };
        if let Some(listener) = listener.as_ref() {
            listener.on_persistence_failure(snapshot, &error);
        }
    })
}
