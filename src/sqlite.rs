use rusqlite::{Connection, ErrorCode, OpenFlags, Result};
use std::fmt;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Where a database object keeps its pages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageMode {
    InMemory,
    File(PathBuf),
}

/// The name a connection is opened with.
///
/// In-memory databases are opened through a named shared-cache URI so that a
/// copy source can attach to the same pages while the owning connection stays
/// where it is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum OpenTarget {
    SharedMemory(String),
    File(PathBuf),
}

impl OpenTarget {
    pub(crate) fn fresh_memory() -> Self {
        OpenTarget::SharedMemory(format!(
            "file:redisql-{}?mode=memory&cache=shared",
            Uuid::new_v4().simple()
        ))
    }

    pub(crate) fn file(path: &Path) -> Self {
        OpenTarget::File(path.to_path_buf())
    }

    pub(crate) fn storage_mode(&self) -> StorageMode {
        match self {
            OpenTarget::SharedMemory(_) => StorageMode::InMemory,
            OpenTarget::File(path) => StorageMode::File(path.clone()),
        }
    }

    /// Open a read-write connection.
    pub(crate) fn open(&self) -> Result<Connection> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        match self {
            OpenTarget::SharedMemory(uri) => Connection::open_with_flags(uri, flags),
            OpenTarget::File(path) => Connection::open_with_flags(path, flags),
        }
    }

    /// Open a second connection to the same data that refuses to write.
    pub(crate) fn open_sibling(&self) -> Result<Connection> {
        let conn = self.open()?;
        conn.pragma_update(None, "query_only", true)?;
        Ok(conn)
    }
}

impl fmt::Display for OpenTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpenTarget::SharedMemory(uri) => f.write_str(uri),
            OpenTarget::File(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Version of the embedded SQLite library.
pub fn version() -> &'static str {
    rusqlite::version()
}

/// True for the corruption class of failures, which the dump retries backwards.
pub(crate) fn is_corruption(err: &rusqlite::Error) -> bool {
    matches!(
        err.sqlite_error_code(),
        Some(ErrorCode::DatabaseCorrupt) | Some(ErrorCode::NotADatabase)
    )
}

/// Extended result code of an engine failure, or -1 for non-engine errors.
pub(crate) fn error_code(err: &rusqlite::Error) -> i32 {
    match err {
        rusqlite::Error::SqliteFailure(failure, _) => failure.extended_code,
        _ => -1,
    }
}

/// Quote an identifier for use inside generated SQL: `a"b` becomes `"a""b"`.
pub(crate) fn quote_identifier(name: &str) -> String {
    quote_with(name, '"')
}

/// Quote a piece of generated SQL text as a string literal.
///
/// Only used for identifiers embedded in generated statements; row values are
/// always quoted by the engine itself.
pub(crate) fn quote_literal(text: &str) -> String {
    quote_with(text, '\'')
}

fn quote_with(text: &str, quote: char) -> String {
    let mut quoted = String::with_capacity(text.len() + 2);
    quoted.push(quote);
    for c in text.chars() {
        if c == quote {
            quoted.push(quote);
        }
        quoted.push(c);
    }
    quoted.push(quote);
    quoted
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_and_literals_double_their_quote() {
        assert_eq!(quote_identifier("plain"), "\"plain\"");
        assert_eq!(quote_identifier("we\"ird"), "\"we\"\"ird\"");
        assert_eq!(quote_literal("\"t\""), "'\"t\"'");
        assert_eq!(quote_literal("it's"), "'it''s'");
    }

    #[test]
    fn memory_targets_are_unique_and_shared() -> Result<()> {
        let target = OpenTarget::fresh_memory();
        assert_ne!(target, OpenTarget::fresh_memory());
        assert_eq!(target.storage_mode(), StorageMode::InMemory);

        let owner = target.open()?;
        owner.execute_batch("CREATE TABLE t(a); INSERT INTO t VALUES (7);")?;
        let sibling = target.open_sibling()?;
        let a: i64 = sibling.query_row("SELECT a FROM t", [], |row| row.get(0))?;
        assert_eq!(a, 7);
        assert!(sibling.execute("INSERT INTO t VALUES (8)", []).is_err());
        Ok(())
    }
}
