//! Named statements stored per database.
//!
//! Each statement is compiled once when it is stored, to reject bad SQL
//! early, and its text is written into a metadata table of the database
//! itself. Dumps, copies and reopened files therefore carry their statements
//! with them.

use std::collections::HashMap;

use rusqlite::Connection;
use tracing::{debug, warn};

use crate::error::{Error, Result};

pub const METADATA_TABLE: &str = "RediSQLMetadata";

const CREATE_METADATA: &str =
    "CREATE TABLE IF NOT EXISTS RediSQLMetadata(data_type TEXT, key TEXT, value TEXT)";
const SELECT_STATEMENTS: &str =
    "SELECT key, value FROM RediSQLMetadata WHERE data_type = 'statement'";
const INSERT_STATEMENT: &str = "INSERT INTO RediSQLMetadata VALUES('statement', ?1, ?2)";
const UPDATE_STATEMENT: &str =
    "UPDATE RediSQLMetadata SET value = ?2 WHERE data_type = 'statement' AND key = ?1";
const DELETE_STATEMENT: &str =
    "DELETE FROM RediSQLMetadata WHERE data_type = 'statement' AND key = ?1";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredStatement {
    sql: String,
    read_only: bool,
    parameters: usize,
}

impl StoredStatement {
    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn read_only(&self) -> bool {
        self.read_only
    }

    /// Number of `?` parameters the statement binds.
    pub fn parameters(&self) -> usize {
        self.parameters
    }
}

/// The statements of one database, by name.
#[derive(Debug, Default)]
pub struct StatementBook {
    statements: HashMap<String, StoredStatement>,
}

impl StatementBook {
    pub fn get(&self, name: &str) -> Option<&StoredStatement> {
        self.statements.get(name)
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    /// Rebuild the book from the metadata table, if the database has one.
    ///
    /// A statement that no longer compiles is skipped with a warning.
    pub(crate) fn restore(conn: &Connection) -> Result<Self> {
        let mut book = Self::default();
        let present: i64 = conn.query_row(
            "SELECT count(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [METADATA_TABLE],
            |row| row.get(0),
        )?;
        if present == 0 {
            return Ok(book);
        }

        let mut stmt = conn.prepare(SELECT_STATEMENTS)?;
        let saved = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        for (name, sql) in saved {
            match compile(conn, &sql) {
                Ok(stored) => {
                    book.statements.insert(name, stored);
                }
                Err(err) => warn!(statement = %name, error = %err, "skipping stored statement"),
            }
        }
        debug!(statements = book.len(), "restored stored statements");
        Ok(book)
    }

    pub(crate) fn create(&mut self, conn: &Connection, name: &str, sql: &str) -> Result<()> {
        if self.statements.contains_key(name) {
            return Err(Error::StatementExists {
                name: name.to_owned(),
            });
        }
        let stored = compile(conn, sql)?;
        conn.execute(CREATE_METADATA, [])?;
        conn.execute(INSERT_STATEMENT, [name, sql])?;
        self.statements.insert(name.to_owned(), stored);
        Ok(())
    }

    pub(crate) fn update(&mut self, conn: &Connection, name: &str, sql: &str) -> Result<()> {
        let Some(slot) = self.statements.get_mut(name) else {
            return Err(Error::NoSuchStatement {
                name: name.to_owned(),
            });
        };
        let stored = compile(conn, sql)?;
        conn.execute(UPDATE_STATEMENT, [name, sql])?;
        *slot = stored;
        Ok(())
    }

    pub(crate) fn delete(&mut self, conn: &Connection, name: &str) -> Result<()> {
        if !self.statements.contains_key(name) {
            return Err(Error::NoSuchStatement {
                name: name.to_owned(),
            });
        }
        conn.execute(DELETE_STATEMENT, [name])?;
        self.statements.remove(name);
        Ok(())
    }
}

fn compile(conn: &Connection, sql: &str) -> Result<StoredStatement> {
    let stmt = conn.prepare(sql).map_err(|err| Error::query(err, sql))?;
    Ok(StoredStatement {
        sql: sql.to_owned(),
        read_only: stmt.readonly(),
        parameters: stmt.parameter_count(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connection() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t(a INTEGER, b TEXT)").unwrap();
        conn
    }

    #[test]
    fn statements_are_compiled_and_persisted() {
        let conn = connection();
        let mut book = StatementBook::default();
        book.create(&conn, "ins", "INSERT INTO t VALUES(?1, ?2)").unwrap();
        book.create(&conn, "sel", "SELECT b FROM t WHERE a = ?1").unwrap();

        let ins = book.get("ins").unwrap();
        assert!(!ins.read_only());
        assert_eq!(ins.parameters(), 2);
        assert!(book.get("sel").unwrap().read_only());

        let restored = StatementBook::restore(&conn).unwrap();
        assert_eq!(restored.get("ins"), book.get("ins"));
        assert_eq!(restored.len(), 2);
    }

    #[test]
    fn bad_sql_and_duplicates_are_rejected() {
        let conn = connection();
        let mut book = StatementBook::default();
        assert!(matches!(
            book.create(&conn, "bad", "SELECT * FROM missing"),
            Err(Error::EngineQuery { .. })
        ));
        assert!(StatementBook::restore(&conn).unwrap().is_empty());

        book.create(&conn, "sel", "SELECT 1").unwrap();
        assert!(matches!(
            book.create(&conn, "sel", "SELECT 2"),
            Err(Error::StatementExists { .. })
        ));
        assert!(matches!(
            book.update(&conn, "other", "SELECT 2"),
            Err(Error::NoSuchStatement { .. })
        ));
    }

    #[test]
    fn update_and_delete_reach_the_metadata_table() {
        let conn = connection();
        let mut book = StatementBook::default();
        book.create(&conn, "q", "SELECT a FROM t").unwrap();
        book.update(&conn, "q", "SELECT b FROM t WHERE a > ?1").unwrap();
        assert_eq!(
            StatementBook::restore(&conn).unwrap().get("q").map(StoredStatement::sql),
            Some("SELECT b FROM t WHERE a > ?1")
        );

        book.delete(&conn, "q").unwrap();
        assert!(book.is_empty());
        assert!(StatementBook::restore(&conn).unwrap().is_empty());
        assert!(matches!(book.delete(&conn, "q"), Err(Error::NoSuchStatement { .. })));
    }
}
