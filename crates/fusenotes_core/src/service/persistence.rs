//! Bounded background persistence queue with retry.
//!
//! # Responsibility
//! - Accept snapshots from mutating callers without blocking on I/O.
//! - Write them through `NoteDatabase::upsert` on a bounded set of workers.
//! - Retry failed writes with exponential backoff, then report exhaustion.
//!
//! # Invariants
//! - At most `workers` writes are in flight at once.
//! - Every accepted job is counted as pending until it succeeds or exhausts
//!   its retries, so `wait_idle` covers queued and in-flight work.

use crate::config::RetryPolicy;
use crate::logging::{sanitize_message, MAX_ERROR_CHARS};
use crate::model::snapshot::NoteSnapshot;
use crate::repo::note_db::{NoteDatabase, RepoError};
use log::{debug, error, warn};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Semaphore};

/// Called once a snapshot exhausted its retries: `(snapshot, attempts, last_error)`.
pub type FailureHook = Arc<dyn Fn(&NoteSnapshot, u32, RepoError) + Send + Sync>;

/// Returned when the queue no longer accepts work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("persistence queue is closed")]
pub struct QueueClosed;

/// Counts accepted-but-unfinished jobs.
#[derive(Debug, Default)]
pub struct PendingTracker {
    count: Mutex<usize>,
    idle: Condvar,
}

impl PendingTracker {
    fn begin(&self) {
        *self.count.lock() += 1;
    }

    fn finish(&self) {
        let mut count = self.count.lock();
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.idle.notify_all();
        }
    }

    pub fn pending(&self) -> usize {
        *self.count.lock()
    }

    /// Blocks until nothing is pending or `timeout` elapses. Returns `true` when idle.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut count = self.count.lock();
        while *count > 0 {
            if self.idle.wait_until(&mut count, deadline).timed_out() {
                return *count == 0;
            }
        }
        true
    }
}

struct Worker {
    db: Arc<dyn NoteDatabase>,
    retry: RetryPolicy,
    on_failure: FailureHook,
}

pub struct PersistenceQueue {
    sender: Mutex<Option<mpsc::Sender<NoteSnapshot>>>,
    pending: Arc<PendingTracker>,
    runtime: Handle,
}

impl PersistenceQueue {
    /// Starts the dispatcher on `runtime`.
    pub fn start(
        runtime: &Handle,
        capacity: usize,
        workers: usize,
        retry: RetryPolicy,
        db: Arc<dyn NoteDatabase>,
        on_failure: FailureHook,
    ) -> Self {
        let (sender, mut receiver) = mpsc::channel::<NoteSnapshot>(capacity.max(1));
        let pending = Arc::new(PendingTracker::default());
        let permits = Arc::new(Semaphore::new(workers.max(1)));
        let worker = Arc::new(Worker {
            db,
            retry,
            on_failure,
        });

        let dispatch_pending = Arc::clone(&pending);
        let dispatch_runtime = runtime.clone();
        runtime.spawn(async move {
            while let Some(snapshot) = receiver.recv().await {
                let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
                    dispatch_pending.finish();
                    break;
                };
                let worker = Arc::clone(&worker);
                let pending = Arc::clone(&dispatch_pending);
                dispatch_runtime.spawn(async move {
                    worker.persist_with_retry(snapshot).await;
                    drop(permit);
                    pending.finish();
                });
            }
        });

        Self {
            sender: Mutex::new(Some(sender)),
            pending,
            runtime: runtime.clone(),
        }
    }

    /// Queues `snapshot` for persistence without waiting on storage.
    ///
    /// When the queue is full, a caller outside any async runtime blocks until
    /// a slot frees; callers inside a runtime hand the send to a task instead.
    pub fn enqueue(&self, snapshot: NoteSnapshot) -> Result<(), QueueClosed> {
        let sender = self.sender.lock().clone().ok_or(QueueClosed)?;
        self.pending.begin();

        match sender.try_send(snapshot) {
            Ok(()) => Ok(()),
            Err(TrySendError::Closed(_)) => {
                self.pending.finish();
                Err(QueueClosed)
            }
            Err(TrySendError::Full(snapshot)) => {
                debug!(
                    "event=note_persist module=persistence status=backpressure note_id={}",
                    snapshot.note_id
                );
                if Handle::try_current().is_err() {
                    sender.blocking_send(snapshot).map_err(|_| {
                        self.pending.finish();
                        QueueClosed
                    })
                } else {
                    let pending = Arc::clone(&self.pending);
                    self.runtime.spawn(async move {
                        if sender.send(snapshot).await.is_err() {
                            pending.finish();
                        }
                    });
                    Ok(())
                }
            }
        }
    }

    /// Stops accepting work. Already queued jobs still drain.
    pub fn close(&self) {
        self.sender.lock().take();
    }

    pub fn is_closed(&self) -> bool {
        self.sender.lock().is_none()
    }

    pub fn pending(&self) -> usize {
        self.pending.pending()
    }

    pub fn wait_idle(&self, timeout: Duration) -> bool {
        self.pending.wait_idle(timeout)
    }
}

impl Worker {
    async fn persist_with_retry(&self, snapshot: NoteSnapshot) {
        let started_at = Instant::now();
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.upsert_blocking(&snapshot).await {
                Ok(()) => {
                    debug!(
                        "event=note_persist module=persistence status=ok note_id={} fragments={} attempts={} duration_ms={}",
                        snapshot.note_id,
                        snapshot.fragments.len(),
                        attempt,
                        started_at.elapsed().as_millis()
                    );
                    return;
                }
                Err(err) if attempt < self.retry.max_attempts => {
                    let backoff = self.retry.backoff_for(attempt);
                    warn!(
                        "event=persist_retry module=persistence status=error note_id={} attempt={} backoff_ms={} error={}",
                        snapshot.note_id,
                        attempt,
                        backoff.as_millis(),
                        sanitize_message(&err.to_string(), MAX_ERROR_CHARS)
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(err) => {
                    error!(
                        "event=persist_failed module=persistence status=error note_id={} attempts={} duration_ms={} error={}",
                        snapshot.note_id,
                        attempt,
                        started_at.elapsed().as_millis(),
                        sanitize_message(&err.to_string(), MAX_ERROR_CHARS)
                    );
                    (self.on_failure)(&snapshot, attempt, err);
                    return;
                }
            }
        }
    }

    async fn upsert_blocking(&self, snapshot: &NoteSnapshot) -> Result<(), RepoError> {
        let db = Arc::clone(&self.db);
        let snapshot = snapshot.clone();
        tokio::task::spawn_blocking(move || db.upsert(&snapshot))
            .await
            .map_err(|err| RepoError::Unavailable(err.to_string()))?
    }
}
