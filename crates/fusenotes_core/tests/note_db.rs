use fusenotes_core::{
    generate_private_key, EcdsaSigner, EncryptedNote, NoteDatabase, NoteError, RecordRef,
    SignerVerifier, SqliteNoteDatabase, Timestamp,
};
use std::sync::Arc;

fn signer() -> Arc<dyn SignerVerifier> {
    Arc::new(EcdsaSigner::from_private_key_str(&generate_private_key()).unwrap())
}

#[test]
fn upsert_then_load_round_trips_verified_history() {
    let db = SqliteNoteDatabase::open_in_memory().unwrap();
    let owner = signer();
    let note = EncryptedNote::create(Arc::clone(&owner)).unwrap();
    db.upsert(&note.set_body("first").unwrap()).unwrap();
    db.upsert(&note.set_body("second").unwrap()).unwrap();

    let loaded = db.load_all(&owner).unwrap();
    assert!(loaded.rejected.is_empty());
    assert_eq!(loaded.notes.len(), 1);

    let restored = &loaded.notes[0];
    assert_eq!(restored.note_id(), note.note_id());
    assert_eq!(restored.created_at(), note.created_at());
    assert_eq!(restored.fragment_count(), 2);
    assert_eq!(restored.current_body().as_deref(), Some("second"));
    assert_eq!(restored.snapshot(), note.snapshot());
}

#[test]
fn load_only_returns_notes_of_the_owner() {
    let db = SqliteNoteDatabase::open_in_memory().unwrap();
    let mine = signer();
    let theirs = signer();
    db.upsert(&EncryptedNote::create(Arc::clone(&mine)).unwrap().snapshot())
        .unwrap();
    db.upsert(&EncryptedNote::create(Arc::clone(&theirs)).unwrap().snapshot())
        .unwrap();

    assert_eq!(db.load_all(&mine).unwrap().notes.len(), 1);
    assert_eq!(db.load_all(&theirs).unwrap().notes.len(), 1);
}

#[test]
fn stale_snapshot_never_regresses_stored_state() {
    let db = SqliteNoteDatabase::open_in_memory().unwrap();
    let owner = signer();
    let note = EncryptedNote::create(Arc::clone(&owner)).unwrap();
    note.set_body("body").unwrap();
    let before_delete = note.snapshot();

    note.delete().unwrap();
    db.upsert(&note.snapshot()).unwrap();
    // an older write completing late
    db.upsert(&before_delete).unwrap();

    let loaded = db.load_all(&owner).unwrap();
    let stored = loaded.notes[0].snapshot();
    assert!(stored.deleted);
    assert!(stored.fragments.iter().all(|fragment| fragment.deleted));
    assert!(stored.fragments.iter().all(|fragment| fragment.body.is_none()));
}

#[test]
fn tampered_rows_are_rejected_on_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("notes.db");
    let owner = signer();

    let good = EncryptedNote::create(Arc::clone(&owner)).unwrap();
    let forged_note = EncryptedNote::create(Arc::clone(&owner)).unwrap();
    let forged_fragment = EncryptedNote::create(Arc::clone(&owner)).unwrap();
    let fragment_delta = forged_fragment.set_body("original").unwrap();
    {
        let db = SqliteNoteDatabase::open(&path).unwrap();
        db.upsert(&good.snapshot()).unwrap();
        db.upsert(&forged_note.snapshot()).unwrap();
        db.upsert(&fragment_delta).unwrap();
    }

    let conn = rusqlite::Connection::open(&path).unwrap();
    conn.execute(
        "UPDATE notes SET is_deleted = 1 WHERE note_id = ?1;",
        [forged_note.note_id().as_bytes().as_slice()],
    )
    .unwrap();
    conn.execute(
        "UPDATE note_fragments SET body = 'forged' WHERE note_id = ?1;",
        [forged_fragment.note_id().as_bytes().as_slice()],
    )
    .unwrap();
    drop(conn);

    let db = SqliteNoteDatabase::open(&path).unwrap();
    let loaded = db.load_all(&owner).unwrap();
    assert_eq!(loaded.notes.len(), 1);
    assert_eq!(loaded.notes[0].note_id(), good.note_id());
    assert_eq!(loaded.rejected.len(), 2);

    for (note_id, err) in &loaded.rejected {
        if *note_id == forged_note.note_id() {
            assert_eq!(
                *err,
                NoteError::SignatureMismatch(RecordRef::Note(forged_note.note_id()))
            );
        } else {
            assert_eq!(*note_id, forged_fragment.note_id());
            assert!(matches!(
                err,
                NoteError::SignatureMismatch(RecordRef::Fragment(_, _))
            ));
        }
    }
}

#[test]
fn last_sync_is_recorded_per_owner_and_never_moves_back() {
    let db = SqliteNoteDatabase::open_in_memory().unwrap();
    let owner = signer().public_key_bytes();

    assert_eq!(db.last_sync(&owner).unwrap(), None);
    db.record_sync(&owner, &[], Timestamp::from_millis(2_000)).unwrap();
    db.record_sync(&owner, &[], Timestamp::from_millis(1_000)).unwrap();
    assert_eq!(
        db.last_sync(&owner).unwrap(),
        Some(Timestamp::from_millis(2_000))
    );
    assert_eq!(db.last_sync(&signer().public_key_bytes()).unwrap(), None);
}

#[test]
fn unreadable_rows_are_rejected_without_failing_the_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("notes.db");
    let owner = signer();

    let good = EncryptedNote::create(Arc::clone(&owner)).unwrap();
    let bad_meta = EncryptedNote::create(Arc::clone(&owner)).unwrap();
    let bad_fragment = EncryptedNote::create(Arc::clone(&owner)).unwrap();
    {
        let db = SqliteNoteDatabase::open(&path).unwrap();
        db.upsert(&good.set_body("fine").unwrap()).unwrap();
        db.upsert(&bad_meta.snapshot()).unwrap();
        db.upsert(&bad_fragment.set_body("fine too").unwrap()).unwrap();
    }

    let conn = rusqlite::Connection::open(&path).unwrap();
    conn.execute(
        "UPDATE notes SET signature = 'garbage' WHERE note_id = ?1;",
        [bad_meta.note_id().as_bytes().as_slice()],
    )
    .unwrap();
    conn.execute(
        "UPDATE note_fragments SET created_at = 'soon' WHERE note_id = ?1;",
        [bad_fragment.note_id().as_bytes().as_slice()],
    )
    .unwrap();
    drop(conn);

    let db = SqliteNoteDatabase::open(&path).unwrap();
    let loaded = db.load_all(&owner).unwrap();
    assert_eq!(loaded.notes.len(), 1);
    assert_eq!(loaded.notes[0].current_body().as_deref(), Some("fine"));

    let mut rejected: Vec<_> = loaded.rejected.iter().map(|(note_id, _)| *note_id).collect();
    rejected.sort();
    let mut expected = vec![bad_meta.note_id(), bad_fragment.note_id()];
    expected.sort();
    assert_eq!(rejected, expected);
    assert!(loaded
        .rejected
        .iter()
        .all(|(_, err)| matches!(err, NoteError::Unreadable(_))));
}

#[test]
fn pushed_records_stop_being_pending_unless_rewritten() {
    let db = SqliteNoteDatabase::open_in_memory().unwrap();
    let owner = signer();
    let owner_key = owner.public_key_bytes();
    let note = EncryptedNote::create(Arc::clone(&owner)).unwrap();
    db.upsert(&note.set_body("draft").unwrap()).unwrap();
    assert_eq!(db.unsynced_count(&owner_key).unwrap(), 1);

    let pushed = db.load_unsynced(&owner_key).unwrap().snapshots;
    db.record_sync(&owner_key, &pushed, Timestamp::now()).unwrap();
    assert_eq!(db.unsynced_count(&owner_key).unwrap(), 0);
    assert!(db.load_unsynced(&owner_key).unwrap().snapshots.is_empty());

    // replaying an already stored snapshot changes nothing
    db.upsert(&pushed[0]).unwrap();
    assert_eq!(db.unsynced_count(&owner_key).unwrap(), 0);

    note.delete().unwrap();
    db.upsert(&note.snapshot()).unwrap();
    let pending = db.load_unsynced(&owner_key).unwrap().snapshots;
    assert_eq!(pending.len(), 1);
    assert!(pending[0].deleted);
    assert!(pending[0].fragments.iter().all(|fragment| fragment.deleted));
}
