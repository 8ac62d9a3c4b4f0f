use fusenotes_core::db::migrations::latest_version;
use fusenotes_core::db::{open_db, open_db_in_memory, DbError};
use rusqlite::Connection;

#[test]
fn open_db_in_memory_applies_all_migrations() {
    let conn = open_db_in_memory().unwrap();

    assert_eq!(schema_version(&conn), latest_version());
    assert_table_exists(&conn, "notes");
    assert_table_exists(&conn, "note_fragments");
    assert_table_exists(&conn, "sync_state");
}

#[test]
fn opening_same_database_twice_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fusenotes.db");

    let conn_first = open_db(&path).unwrap();
    assert_eq!(schema_version(&conn_first), latest_version());
    drop(conn_first);

    let conn_second = open_db(&path).unwrap();
    assert_eq!(schema_version(&conn_second), latest_version());
    assert_table_exists(&conn_second, "notes");
}

#[test]
fn opening_database_with_newer_schema_version_returns_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("future.db");

    let conn = Connection::open(&path).unwrap();
    conn.execute_batch("PRAGMA user_version = 999;").unwrap();
    drop(conn);

    let err = open_db(&path).unwrap_err();
    match err {
        DbError::UnsupportedSchemaVersion {
            db_version,
            latest_supported,
        } => {
            assert_eq!(db_version, 999);
            assert_eq!(latest_supported, latest_version());
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn fragment_rows_cascade_with_their_note() {
    let conn = open_db_in_memory().unwrap();
    conn.execute(
        "INSERT INTO notes (note_id, owner_key, created_at, meta_edited_at, is_deleted, signature)
         VALUES (?1, x'02', 1, 1, 0, x'00');",
        [vec![7u8; 12]],
    )
    .unwrap();
    conn.execute(
        "INSERT INTO note_fragments
            (note_id, fragment_id, created_at, edited_at, is_deleted, body, signature)
         VALUES (?1, ?2, 2, 2, 0, 'cipher', x'00');",
        rusqlite::params![vec![7u8; 12], vec![1u8; 6]],
    )
    .unwrap();

    conn.execute("DELETE FROM notes;", []).unwrap();
    let remaining: i64 = conn
        .query_row("SELECT COUNT(*) FROM note_fragments;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(remaining, 0);
}

#[test]
fn identifier_lengths_are_enforced_by_schema() {
    let conn = open_db_in_memory().unwrap();
    let result = conn.execute(
        "INSERT INTO notes (note_id, owner_key, created_at, meta_edited_at, is_deleted, signature)
         VALUES (x'0102', x'02', 1, 1, 0, x'00');",
        [],
    );
    assert!(result.is_err());
}

#[test]
fn new_rows_start_pending_sync() {
    let conn = open_db_in_memory().unwrap();
    conn.execute(
        "INSERT INTO notes (note_id, owner_key, created_at, meta_edited_at, is_deleted, signature)
         VALUES (?1, x'02', 1, 1, 0, x'00');",
        [vec![9u8; 12]],
    )
    .unwrap();
    let pending: i64 = conn
        .query_row("SELECT sync_pending FROM notes;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(pending, 1);
}

fn schema_version(conn: &Connection) -> u32 {
    conn.query_row("PRAGMA user_version;", [], |row| row.get(0))
        .unwrap()
}

fn assert_table_exists(conn: &Connection, table_name: &str) {
    let exists: i64 = conn
        .query_row(
            "SELECT EXISTS(
                SELECT 1
                FROM sqlite_master
                WHERE type = 'table' AND name = ?1
            );",
            [table_name],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(exists, 1, "table {table_name} does not exist");
}
