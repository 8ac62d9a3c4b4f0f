//! Note database contract and SQLite implementation.
//!
//! # Responsibility
//! - Persist note metadata plus carried fragments in one transaction.
//! - Load every note owned by a key and verify it before it is trusted.
//! - Track which stored records still have to be pushed, and the per-owner
//!   last-sync instant.
//!
//! # Invariants
//! - Upserts are monotonic: a stored row is only replaced by one with a newer
//!   edit stamp, or an equal stamp that adds a tombstone.
//! - Owner keys are written once on insert and never rewritten.
//! - Every applied upsert marks the written rows as pending sync; a row is only
//!   cleared when the pushed copy still matches its stored stamp.
//! - Loaded rows that fail decoding or signature verification are rejected,
//!   not returned, and never abort the rest of the load.

use crate::crypto::signer::{Signature, SignerVerifier};
use crate::db::{open_db, open_db_in_memory, DbError};
use crate::model::encrypted_note::{EncryptedNote, NoteError};
use crate::model::ids::{FragmentId, NoteId, Timestamp};
use crate::model::snapshot::{FragmentSnapshot, NoteSnapshot};
use log::warn;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

pub type RepoResult<T> = Result<T, RepoError>;

/// Repository error for note persistence and loading.
#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    #[error(transparent)]
    Db(#[from] DbError),
    #[error("invalid persisted note data: {0}")]
    InvalidData(String),
    #[error("note storage unavailable: {0}")]
    Unavailable(String),
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Raw stored state of one owner's notes.
#[derive(Debug, Default)]
pub struct StoredNotes {
    /// Decoded notes, fragments ordered by `(created_at, fragment_id)`.
    pub snapshots: Vec<NoteSnapshot>,
    /// Notes with at least one row that could not be decoded.
    pub unreadable: Vec<(NoteId, RepoError)>,
}

/// Result of loading one owner's notes.
#[derive(Debug, Default)]
pub struct LoadedNotes {
    /// Notes whose metadata and fragments all verified.
    pub notes: Vec<EncryptedNote>,
    /// Notes that were unreadable or failed ownership or signature checks.
    pub rejected: Vec<(NoteId, NoteError)>,
}

/// Storage collaborator consumed by the note store.
///
/// Implementations are shared across persistence workers.
pub trait NoteDatabase: Send + Sync {
    /// Every note owned by `owner_key` with its full fragment history.
    fn load_snapshots(&self, owner_key: &[u8]) -> RepoResult<StoredNotes>;

    /// Persists the snapshot's metadata and every fragment it carries,
    /// atomically, and marks what changed as pending sync.
    fn upsert(&self, snapshot: &NoteSnapshot) -> RepoResult<()>;

    /// Notes with pending changes. Each carries its current metadata and only
    /// the fragments that are still pending.
    fn load_unsynced(&self, owner_key: &[u8]) -> RepoResult<StoredNotes>;

    /// Number of notes with pending changes.
    fn unsynced_count(&self, owner_key: &[u8]) -> RepoResult<usize>;

    fn last_sync(&self, owner_key: &[u8]) -> RepoResult<Option<Timestamp>>;

    /// Clears the pending mark of every pushed record that was not rewritten
    /// since, and records `at` as the last sync instant, in one transaction.
    fn record_sync(&self, owner_key: &[u8], pushed: &[NoteSnapshot], at: Timestamp)
        -> RepoResult<()>;

    /// Loads and verifies every note owned by `signer`.
    fn load_all(&self, signer: &Arc<dyn SignerVerifier>) -> RepoResult<LoadedNotes> {
        let stored = self.load_snapshots(&signer.public_key_bytes())?;
        let mut loaded = LoadedNotes::default();
        for (note_id, err) in stored.unreadable {
            loaded
                .rejected
                .push((note_id, NoteError::Unreadable(err.to_string())));
        }
        for snapshot in stored.snapshots {
            let note_id = snapshot.note_id;
            match EncryptedNote::from_snapshot(snapshot, Arc::clone(signer)) {
                Ok(note) => loaded.notes.push(note),
                Err(err) => loaded.rejected.push((note_id, err)),
            }
        }
        Ok(loaded)
    }
}

/// SQLite-backed note database.
pub struct SqliteNoteDatabase {
    conn: Mutex<Connection>,
}

impl SqliteNoteDatabase {
    /// Wraps a connection that already went through `open_db`.
    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    pub fn open(path: impl AsRef<Path>) -> RepoResult<Self> {
        Ok(Self::from_connection(open_db(path)?))
    }

    pub fn open_in_memory() -> RepoResult<Self> {
        Ok(Self::from_connection(open_db_in_memory()?))
    }
}

impl NoteDatabase for SqliteNoteDatabase {
    fn load_snapshots(&self, owner_key: &[u8]) -> RepoResult<StoredNotes> {
        let conn = self.conn.lock();
        load_stored(&conn, owner_key, LoadScope::All)
    }

    fn upsert(&self, snapshot: &NoteSnapshot) -> RepoResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        tx.execute(
            "INSERT INTO notes (
                note_id,
                owner_key,
                created_at,
                meta_edited_at,
                is_deleted,
                signature,
                sync_pending
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1)
            ON CONFLICT(note_id) DO UPDATE SET
                meta_edited_at = excluded.meta_edited_at,
                is_deleted = excluded.is_deleted,
                signature = excluded.signature,
                sync_pending = 1
            WHERE excluded.meta_edited_at > notes.meta_edited_at
               OR (excluded.meta_edited_at = notes.meta_edited_at
                   AND excluded.is_deleted > notes.is_deleted);",
            params![
                snapshot.note_id.as_bytes().as_slice(),
                snapshot.owner_key.as_slice(),
                snapshot.created_at.as_millis(),
                snapshot.meta_edited_at.as_millis(),
                bool_to_int(snapshot.deleted),
                snapshot.signature.as_bytes(),
            ],
        )?;

        for fragment in &snapshot.fragments {
            tx.execute(
                "INSERT INTO note_fragments (
                    note_id,
                    fragment_id,
                    created_at,
                    edited_at,
                    is_deleted,
                    body,
                    signature,
                    sync_pending
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1)
                ON CONFLICT(note_id, fragment_id) DO UPDATE SET
                    edited_at = excluded.edited_at,
                    is_deleted = excluded.is_deleted,
                    body = excluded.body,
                    signature = excluded.signature,
                    sync_pending = 1
                WHERE excluded.edited_at > note_fragments.edited_at
                   OR (excluded.edited_at = note_fragments.edited_at
                       AND excluded.is_deleted > note_fragments.is_deleted);",
                params![
                    snapshot.note_id.as_bytes().as_slice(),
                    fragment.fragment_id.as_bytes().as_slice(),
                    fragment.created_at.as_millis(),
                    fragment.edited_at.as_millis(),
                    bool_to_int(fragment.deleted),
                    fragment.body.as_deref(),
                    fragment.signature.as_bytes(),
                ],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    fn load_unsynced(&self, owner_key: &[u8]) -> RepoResult<StoredNotes> {
        let conn = self.conn.lock();
        load_stored(&conn, owner_key, LoadScope::Unsynced)
    }

    fn unsynced_count(&self, owner_key: &[u8]) -> RepoResult<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*)
             FROM notes n
             WHERE n.owner_key = ?1
               AND (n.sync_pending = 1
                    OR EXISTS (SELECT 1 FROM note_fragments f
                               WHERE f.note_id = n.note_id AND f.sync_pending = 1));",
            [owner_key],
            |row| row.get(0),
        )?;
        usize::try_from(count).map_err(|err| RepoError::InvalidData(err.to_string()))
    }

    fn last_sync(&self, owner_key: &[u8]) -> RepoResult<Option<Timestamp>> {
        let conn = self.conn.lock();
        let millis = conn
            .query_row(
                "SELECT last_sync_at FROM sync_state WHERE owner_key = ?1;",
                [owner_key],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;
        Ok(millis.map(Timestamp::from_millis))
    }

    fn record_sync(
        &self,
        owner_key: &[u8],
        pushed: &[NoteSnapshot],
        at: Timestamp,
    ) -> RepoResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        for snapshot in pushed {
            let note_id = snapshot.note_id.as_bytes();
            tx.execute(
                "UPDATE notes SET sync_pending = 0
                 WHERE note_id = ?1 AND owner_key = ?2
                   AND meta_edited_at = ?3 AND is_deleted = ?4;",
                params![
                    note_id.as_slice(),
                    owner_key,
                    snapshot.meta_edited_at.as_millis(),
                    bool_to_int(snapshot.deleted),
                ],
            )?;
            for fragment in &snapshot.fragments {
                tx.execute(
                    "UPDATE note_fragments SET sync_pending = 0
                     WHERE note_id = ?1 AND fragment_id = ?2
                       AND edited_at = ?3 AND is_deleted = ?4;",
                    params![
                        note_id.as_slice(),
                        fragment.fragment_id.as_bytes().as_slice(),
                        fragment.edited_at.as_millis(),
                        bool_to_int(fragment.deleted),
                    ],
                )?;
            }
        }

        tx.execute(
            "INSERT INTO sync_state (owner_key, last_sync_at) VALUES (?1, ?2)
             ON CONFLICT(owner_key) DO UPDATE SET
                last_sync_at = max(last_sync_at, excluded.last_sync_at);",
            params![owner_key, at.as_millis()],
        )?;
        tx.commit()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoadScope {
    All,
    Unsynced,
}

impl LoadScope {
    fn notes_sql(self) -> &'static str {
        match self {
            Self::All => {
                "SELECT note_id, owner_key, created_at, meta_edited_at, is_deleted, signature
                 FROM notes
                 WHERE owner_key = ?1
                 ORDER BY created_at ASC, note_id ASC;"
            }
            Self::Unsynced => {
                "SELECT n.note_id, n.owner_key, n.created_at, n.meta_edited_at, n.is_deleted,
                        n.signature
                 FROM notes n
                 WHERE n.owner_key = ?1
                   AND (n.sync_pending = 1
                        OR EXISTS (SELECT 1 FROM note_fragments f
                                   WHERE f.note_id = n.note_id AND f.sync_pending = 1))
                 ORDER BY n.created_at ASC, n.note_id ASC;"
            }
        }
    }

    fn fragments_sql(self) -> &'static str {
        match self {
            Self::All => {
                "SELECT f.note_id, f.fragment_id, f.created_at, f.edited_at, f.is_deleted,
                        f.body, f.signature
                 FROM note_fragments f
                 JOIN notes n ON n.note_id = f.note_id
                 WHERE n.owner_key = ?1
                 ORDER BY f.note_id ASC, f.created_at ASC, f.fragment_id ASC;"
            }
            Self::Unsynced => {
                "SELECT f.note_id, f.fragment_id, f.created_at, f.edited_at, f.is_deleted,
                        f.body, f.signature
                 FROM note_fragments f
                 JOIN notes n ON n.note_id = f.note_id
                 WHERE n.owner_key = ?1 AND f.sync_pending = 1
                 ORDER BY f.note_id ASC, f.created_at ASC, f.fragment_id ASC;"
            }
        }
    }
}

/// Decoding failure of a single row.
enum RowError {
    /// The row's own note id is unreadable, so it cannot be attributed.
    Orphan(RepoError),
    Note(NoteId, RepoError),
}

fn load_stored(conn: &Connection, owner_key: &[u8], scope: LoadScope) -> RepoResult<StoredNotes> {
    let mut snapshots = Vec::new();
    let mut unreadable: HashMap<NoteId, RepoError> = HashMap::new();

    {
        let mut stmt = conn.prepare(scope.notes_sql())?;
        let mut rows = stmt.query([owner_key])?;
        while let Some(row) = rows.next()? {
            match read_note_row(row) {
                Ok(snapshot) => snapshots.push(snapshot),
                Err(RowError::Note(note_id, err)) => {
                    unreadable.entry(note_id).or_insert(err);
                }
                Err(RowError::Orphan(err)) => warn_orphan_row("notes", &err),
            }
        }
    }

    let mut fragments_by_note: HashMap<NoteId, Vec<FragmentSnapshot>> = HashMap::new();
    {
        let mut stmt = conn.prepare(scope.fragments_sql())?;
        let mut rows = stmt.query([owner_key])?;
        while let Some(row) = rows.next()? {
            match read_fragment_row(row) {
                Ok((note_id, fragment)) => {
                    fragments_by_note.entry(note_id).or_default().push(fragment)
                }
                Err(RowError::Note(note_id, err)) => {
                    unreadable.entry(note_id).or_insert(err);
                }
                Err(RowError::Orphan(err)) => warn_orphan_row("note_fragments", &err),
            }
        }
    }

    snapshots.retain(|snapshot| !unreadable.contains_key(&snapshot.note_id));
    for snapshot in &mut snapshots {
        if let Some(fragments) = fragments_by_note.remove(&snapshot.note_id) {
            snapshot.fragments = fragments;
        }
    }
    for (note_id, err) in &unreadable {
        warn!(
            "event=store_load module=repo status=error note_id={} error_code=unreadable_row error={}",
            note_id, err
        );
    }

    Ok(StoredNotes {
        snapshots,
        unreadable: unreadable.into_iter().collect(),
    })
}

fn read_note_id(row: &Row<'_>) -> RepoResult<NoteId> {
    let raw: Vec<u8> = row.get(0)?;
    NoteId::from_bytes(&raw).map_err(|err| RepoError::InvalidData(err.to_string()))
}

fn read_note_row(row: &Row<'_>) -> Result<NoteSnapshot, RowError> {
    let note_id = read_note_id(row).map_err(RowError::Orphan)?;
    let decode = || -> RepoResult<NoteSnapshot> {
        let signature: Vec<u8> = row.get(5)?;
        Ok(NoteSnapshot {
            note_id,
            owner_key: row.get(1)?,
            created_at: Timestamp::from_millis(row.get(2)?),
            meta_edited_at: Timestamp::from_millis(row.get(3)?),
            deleted: parse_bool(row.get(4)?)?,
            signature: Signature::from_bytes(signature),
            fragments: Vec::new(),
        })
    };
    decode().map_err(|err| RowError::Note(note_id, err))
}

fn read_fragment_row(row: &Row<'_>) -> Result<(NoteId, FragmentSnapshot), RowError> {
    let note_id = read_note_id(row).map_err(RowError::Orphan)?;
    let decode = || -> RepoResult<FragmentSnapshot> {
        let fragment_id: Vec<u8> = row.get(1)?;
        let signature: Vec<u8> = row.get(6)?;
        Ok(FragmentSnapshot {
            fragment_id: FragmentId::from_bytes(&fragment_id)
                .map_err(|err| RepoError::InvalidData(err.to_string()))?,
            created_at: Timestamp::from_millis(row.get(2)?),
            edited_at: Timestamp::from_millis(row.get(3)?),
            deleted: parse_bool(row.get(4)?)?,
            body: row.get(5)?,
            signature: Signature::from_bytes(signature),
        })
    };
    decode()
        .map(|fragment| (note_id, fragment))
        .map_err(|err| RowError::Note(note_id, err))
}

fn warn_orphan_row(table: &str, err: &RepoError) {
    warn!(
        "event=store_load module=repo status=error table={} error_code=unreadable_note_id error={}",
        table, err
    );
}

fn parse_bool(value: i64) -> RepoResult<bool> {
    match value {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(RepoError::InvalidData(format!(
            "invalid is_deleted value `{other}`"
        ))),
    }
}

fn bool_to_int(value: bool) -> i64 {
    if value {
        1
    } else {
        0
    }
}
