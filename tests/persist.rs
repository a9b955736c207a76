mod common;

use common::{error_text, ok, rows, text, Harness};
use rust_redisql::keyspace::{Entry, Keyspace};
use rust_redisql::{Error, Reply, StorageMode};

#[tokio::test]
async fn test_memory_database_round_trips_with_its_statements() {
    test_memory_database_round_trips_with_its_statements_impl().unwrap();
}

fn test_memory_database_round_trips_with_its_statements_impl() -> rust_redisql::Result<()> {
    let mut h = Harness::new();
    h.call(&["CREATE_DB", "db1"]);
    h.call(&["EXEC", "db1", "CREATE TABLE t(id INTEGER PRIMARY KEY, v TEXT)"]);
    h.call(&["EXEC", "db1", "INSERT INTO t(v) VALUES ('a'), ('it''s'), (NULL)"]);
    h.call(&["CREATE_STATEMENT", "db1", "by_id", "SELECT v FROM t WHERE id = ?1"]);

    let mut saved = Vec::new();
    let summary = h.module.save(&h.keys, Some("db1"), &mut saved)?;
    assert_eq!(summary.map(|summary| summary.rows), Some(3));

    // A fresh process loading the saved stream.
    let mut restored = Harness::new();
    restored.module.restore(&mut restored.keys, "db1", saved.as_slice())?;
    assert_eq!(
        restored.call(&["QUERY", "db1", "SELECT id, v FROM t ORDER BY id"]),
        rows(vec![
            vec![Reply::Integer(1), text("a")],
            vec![Reply::Integer(2), text("it's")],
            vec![Reply::Integer(3), Reply::Null],
        ])
    );
    assert_eq!(
        restored.call(&["QUERY_STATEMENT", "db1", "by_id", "2"]),
        rows(vec![vec![text("it's")]])
    );
    assert_eq!(restored.call(&["EXEC", "db1", "INSERT INTO t(v) VALUES ('b')"]), ok());
    Ok(())
}

#[tokio::test]
async fn test_file_database_saves_only_its_path() {
    test_file_database_saves_only_its_path_impl().unwrap();
}

fn test_file_database_saves_only_its_path_impl() -> rust_redisql::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("saved.sqlite");
    let mut h = Harness::new();
    h.call(&["CREATE_DB", "disk", path.to_str().unwrap()]);
    h.call(&["EXEC", "disk", "CREATE TABLE kv(k, v)"]);
    h.call(&["EXEC", "disk", "INSERT INTO kv VALUES ('a', 1)"]);

    let mut saved = Vec::new();
    assert_eq!(h.module.save(&h.keys, Some("disk"), &mut saved)?, None);
    assert_eq!(
        String::from_utf8(saved.clone()).unwrap(),
        format!("-- redisql file {}\n", path.display())
    );

    let mut restored = Harness::new();
    restored.module.restore(&mut restored.keys, "disk", saved.as_slice())?;
    assert_eq!(
        restored.call(&["QUERY", "disk", "SELECT v FROM kv WHERE k = 'a'"]),
        rows(vec![vec![Reply::Integer(1)]])
    );
    match restored.keys.lookup("disk") {
        Entry::Database(db) => assert_eq!(db.storage(), StorageMode::File(path.clone())),
        other => panic!("disk does not hold a database: {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn test_default_database_is_saved_when_no_name_is_given() {
    let mut h = Harness::new();
    h.call(&["EXEC", "CREATE TABLE t(a)"]);
    h.call(&["EXEC", "INSERT INTO t VALUES (1)"]);

    let mut saved = Vec::new();
    let summary = h.module.save(&h.keys, None, &mut saved).unwrap().unwrap();
    assert_eq!((summary.tables, summary.rows), (1, 1));

    let mut restored = Harness::new();
    restored
        .module
        .restore(&mut restored.keys, "copy", saved.as_slice())
        .unwrap();
    assert_eq!(
        restored.call(&["QUERY", "copy", "SELECT a FROM t"]),
        rows(vec![vec![Reply::Integer(1)]])
    );
}

#[tokio::test]
async fn test_restore_refuses_a_used_key() {
    let mut h = Harness::new();
    h.call(&["CREATE_DB", "db1"]);
    let mut saved = Vec::new();
    h.module.save(&h.keys, Some("db1"), &mut saved).unwrap();
    let open = h.module.counts().open_connections();

    let err = h
        .module
        .restore(&mut h.keys, "db1", saved.as_slice())
        .unwrap_err();
    assert!(matches!(err, Error::KeyAlreadyBound { .. }));
    assert!(err.reply_message().starts_with("KEY_USED"));
    assert_eq!(h.module.counts().open_connections(), open);
}

#[tokio::test]
async fn test_garbage_is_not_restored() {
    let mut h = Harness::new();
    let err = h
        .module
        .restore(&mut h.keys, "db1", b"SELECT 1;".as_slice())
        .unwrap_err();
    assert!(matches!(err, Error::SaveFormat(_)));
    assert!(!h.keys.contains("db1"));

    // A damaged script is an engine error and leaves nothing bound.
    let err = h
        .module
        .restore(&mut h.keys, "db1", b"-- redisql memory\nCREATE TABLE (;".as_slice())
        .unwrap_err();
    assert!(matches!(err, Error::Sqlite(_)));
    assert!(!h.keys.contains("db1"));
    assert_eq!(h.module.counts().open_connections(), 1);
}

#[tokio::test]
async fn test_saving_a_plain_key_is_refused() {
    let mut h = Harness::new();
    h.keys.set_bytes("plain", "value");
    let mut saved = Vec::new();
    let err = h.module.save(&h.keys, Some("plain"), &mut saved).unwrap_err();
    assert!(matches!(err, Error::WrongType));
    assert!(saved.is_empty());
    let reply = h.call(&["QUERY", "plain", "SELECT 1"]);
    assert!(error_text(&reply).starts_with("WRONGTYPE"));
}
