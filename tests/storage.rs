use rusqlite::{params, Connection, OptionalExtension, Result};
use rust_redisql::{DatabaseObject, HandleCounts, StorageMode};
use tempfile::NamedTempFile;

#[derive(Debug, PartialEq)]
struct User {
    name: String,
    email: String,
    age: Option<i32>,
}

// Helper function to open an in-memory database object for testing
fn create_test_db(counts: &std::sync::Arc<HandleCounts>) -> rust_redisql::Result<DatabaseObject> {
    let db = DatabaseObject::open("users", None, counts)?;
    initialize_schema(&db)?;
    Ok(db)
}

// Helper function to open a database object backed by a temporary file
fn create_temp_db(
    counts: &std::sync::Arc<HandleCounts>,
) -> rust_redisql::Result<(DatabaseObject, NamedTempFile)> {
    let temp_file = NamedTempFile::new()?;
    let db = DatabaseObject::open("users", Some(temp_file.path()), counts)?;
    initialize_schema(&db)?;
    Ok((db, temp_file))
}

fn initialize_schema(db: &DatabaseObject) -> rust_redisql::Result<()> {
    db.connection()?.execute_batch(
        r#"
        CREATE TABLE users (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            email TEXT UNIQUE NOT NULL,
            age INTEGER
        );
        CREATE INDEX idx_users_email ON users(email);
        "#,
    )?;
    Ok(())
}

fn find_user(conn: &Connection, id: i64) -> Result<Option<User>> {
    conn.query_row(
        "SELECT name, email, age FROM users WHERE id = ?",
        [id],
        |row| {
            Ok(User {
                name: row.get(0)?,
                email: row.get(1)?,
                age: row.get(2)?,
            })
        },
    )
    .optional()
}

#[tokio::test]
async fn test_in_memory_objects_are_isolated() {
    test_in_memory_objects_are_isolated_impl().unwrap();
}

fn test_in_memory_objects_are_isolated_impl() -> rust_redisql::Result<()> {
    let counts = HandleCounts::new();
    let first = create_test_db(&counts)?;
    let second = create_test_db(&counts)?;
    assert_eq!(first.storage(), StorageMode::InMemory);
    assert_eq!(counts.open_connections(), 2);

    first.connection()?.execute(
        "INSERT INTO users (name, email, age) VALUES (?1, ?2, ?3)",
        params!["John Doe", "john@example.com", 30],
    )?;
    assert_eq!(
        find_user(first.connection()?, 1)?,
        Some(User {
            name: "John Doe".into(),
            email: "john@example.com".into(),
            age: Some(30),
        })
    );
    assert_eq!(find_user(second.connection()?, 1)?, None);

    first.close()?;
    drop(second);
    assert_eq!(counts.open_connections(), 0);
    Ok(())
}

#[tokio::test]
async fn test_file_objects_persist_across_reopen() {
    test_file_objects_persist_across_reopen_impl().unwrap();
}

fn test_file_objects_persist_across_reopen_impl() -> rust_redisql::Result<()> {
    let counts = HandleCounts::new();
    let (db, temp_file) = create_temp_db(&counts)?;
    assert_eq!(db.storage(), StorageMode::File(temp_file.path().to_path_buf()));

    db.connection()?.execute(
        "INSERT INTO users (name, email) VALUES (?1, ?2)",
        params!["Jane Doe", "jane@example.com"],
    )?;
    db.connection()?
        .execute("UPDATE users SET age = ? WHERE id = ?", params![41, 1])?;
    db.close()?;

    let reopened = DatabaseObject::open("users", Some(temp_file.path()), &counts)?;
    let user = find_user(reopened.connection()?, 1)?;
    assert_eq!(user.map(|user| user.age), Some(Some(41)));

    reopened.connection()?.execute("DELETE FROM users WHERE id = ?", [1])?;
    assert_eq!(find_user(reopened.connection()?, 1)?, None);
    Ok(())
}

#[tokio::test]
async fn test_unopenable_path_is_an_open_error() {
    let counts = HandleCounts::new();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("missing").join("nested.sqlite");

    let err = DatabaseObject::open("users", Some(&path), &counts).unwrap_err();
    assert!(matches!(err, rust_redisql::Error::EngineOpen(_)));
    assert_eq!(counts.open_connections(), 0);
}
