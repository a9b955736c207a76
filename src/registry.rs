//! Database objects bound to keys of the host namespace.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rusqlite::backup::Backup;
use rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::keyspace::{Entry, Keyspace};
use crate::sqlite::{OpenTarget, StorageMode};
use crate::statements::StatementBook;

const COPY_PAGES_PER_STEP: i32 = 64;

/// Counters of engine handles opened through this crate.
///
/// Shared by every database object a module creates, so a caller can check
/// that failures leave nothing open behind them.
#[derive(Debug, Default)]
pub struct HandleCounts {
    connections: AtomicUsize,
    statements: AtomicUsize,
    finalized: AtomicUsize,
}

impl HandleCounts {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn open_connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Statements prepared and not yet finalized.
    pub fn live_statements(&self) -> usize {
        self.statements.load(Ordering::SeqCst)
    }

    /// Statements finalized since the counters were created.
    pub fn finalized_statements(&self) -> usize {
        self.finalized.load(Ordering::SeqCst)
    }

    fn connection_opened(&self) {
        self.connections.fetch_add(1, Ordering::SeqCst);
    }

    fn connection_closed(&self) {
        self.connections.fetch_sub(1, Ordering::SeqCst);
    }

    pub(crate) fn statement_prepared(&self) {
        self.statements.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn statement_finalized(&self) {
        self.statements.fetch_sub(1, Ordering::SeqCst);
        self.finalized.fetch_add(1, Ordering::SeqCst);
    }
}

/// A relational connection owned by one key of the host namespace.
///
/// Dropping the object closes the connection.
#[derive(Debug)]
pub struct DatabaseObject {
    name: String,
    target: OpenTarget,
    conn: Option<Connection>,
    statements: StatementBook,
    counts: Arc<HandleCounts>,
}

impl DatabaseObject {
    /// Open a connection, in memory when `path` is `None`.
    pub fn open(name: &str, path: Option<&Path>, counts: &Arc<HandleCounts>) -> Result<Self> {
        let target = match path {
            None => OpenTarget::fresh_memory(),
            Some(path) => OpenTarget::file(path),
        };
        let conn = target.open().map_err(Error::EngineOpen)?;
        counts.connection_opened();
        debug!(name, target = %target, "opened database connection");
        let statements = StatementBook::restore(&conn).unwrap_or_else(|err| {
            warn!(name, error = %err, "could not read stored statements");
            StatementBook::default()
        });
        Ok(Self {
            name: name.to_owned(),
            target,
            conn: Some(conn),
            statements,
            counts: Arc::clone(counts),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn storage(&self) -> StorageMode {
        self.target.storage_mode()
    }

    pub fn counts(&self) -> &HandleCounts {
        &self.counts
    }

    pub fn connection(&self) -> Result<&Connection> {
        self.conn.as_ref().ok_or(Error::ConnectionClosed)
    }

    pub(crate) fn connection_mut(&mut self) -> Result<&mut Connection> {
        self.conn.as_mut().ok_or(Error::ConnectionClosed)
    }

    pub fn statements(&self) -> &StatementBook {
        &self.statements
    }

    /// The connection together with the statement book, for edits that
    /// touch both.
    pub(crate) fn statement_book(&mut self) -> Result<(&Connection, &mut StatementBook)> {
        let conn = self.conn.as_ref().ok_or(Error::ConnectionClosed)?;
        Ok((conn, &mut self.statements))
    }

    /// Re-read the statement book after the content was replaced wholesale.
    pub(crate) fn reload_statements(&mut self) -> Result<()> {
        let book = StatementBook::restore(self.connection()?)?;
        self.statements = book;
        Ok(())
    }

    pub(crate) fn target(&self) -> &OpenTarget {
        &self.target
    }

    /// Close the connection now and report the engine's verdict.
    pub fn close(mut self) -> Result<()> {
        match self.conn.take() {
            Some(conn) => {
                self.counts.connection_closed();
                conn.close().map_err(|(_, err)| Error::Sqlite(err))
            }
            None => Ok(()),
        }
    }
}

impl Drop for DatabaseObject {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.counts.connection_closed();
            debug!(name = %self.name, "closing database connection");
            if let Err((_, err)) = conn.close() {
                warn!(name = %self.name, error = %err, "failed to close database connection");
            }
        }
    }
}

/// Open a database and bind it under `name`.
///
/// Any existing key blocks the creation, whatever it holds; nothing is opened
/// in that case.
pub fn create<K>(
    keyspace: &mut K,
    counts: &Arc<HandleCounts>,
    name: &str,
    path: Option<&Path>,
) -> Result<()>
where
    K: Keyspace + ?Sized,
{
    ensure_vacant(keyspace, name)?;
    let database = DatabaseObject::open(name, path, counts)?;
    adopt(keyspace, name, database)?;
    info!(name, "created database");
    Ok(())
}

pub(crate) fn ensure_vacant<K>(keyspace: &K, name: &str) -> Result<()>
where
    K: Keyspace + ?Sized,
{
    match keyspace.lookup(name) {
        Entry::Empty => Ok(()),
        _ => Err(Error::KeyAlreadyBound {
            name: name.to_owned(),
        }),
    }
}

/// Bind an opened database under `name`; a refused object is closed.
pub(crate) fn adopt<K>(keyspace: &mut K, name: &str, database: DatabaseObject) -> Result<()>
where
    K: Keyspace + ?Sized,
{
    let storage = database.storage();
    if let Err(rejected) = keyspace.bind(name, database) {
        if let Err(err) = rejected.database.close() {
            warn!(name, error = %err, "failed to close connection after a rejected bind");
        }
        return Err(Error::Bind {
            reason: rejected.reason,
        });
    }
    debug!(name, storage = ?storage, "bound database");
    Ok(())
}

/// The database object bound to `name`.
pub fn resolve<'k, K>(keyspace: &'k K, name: &str) -> Result<&'k DatabaseObject>
where
    K: Keyspace + ?Sized,
{
    match keyspace.lookup(name) {
        Entry::Database(database) => Ok(database),
        Entry::Empty => Err(Error::NoSuchKey),
        Entry::Other => Err(Error::WrongType),
    }
}

/// Like [`resolve`], falling back to `default` when no name is given.
pub fn resolve_or_default<'k, K>(
    keyspace: &'k K,
    name: Option<&str>,
    default: &'k DatabaseObject,
) -> Result<&'k DatabaseObject>
where
    K: Keyspace + ?Sized,
{
    match name {
        Some(name) => resolve(keyspace, name),
        None => Ok(default),
    }
}

pub(crate) fn resolve_mut<'k, K>(keyspace: &'k mut K, name: &str) -> Result<&'k mut DatabaseObject>
where
    K: Keyspace + ?Sized,
{
    match keyspace.lookup_mut(name) {
        Entry::Database(database) => Ok(database),
        Entry::Empty => Err(Error::NoSuchKey),
        Entry::Other => Err(Error::WrongType),
    }
}

/// Replace the content of `destination` with the content of `source`.
///
/// The source is read through a sibling connection, so its own handle is
/// never borrowed mutably.
pub fn copy<K>(keyspace: &mut K, source: &str, destination: &str) -> Result<()>
where
    K: Keyspace + ?Sized,
{
    let source_conn = resolve(keyspace, source)?
        .target()
        .open_sibling()
        .map_err(Error::EngineOpen)?;
    let destination_db = resolve_mut(keyspace, destination)?;
    {
        let destination_conn = destination_db.connection_mut()?;
        destination_conn.flush_prepared_statement_cache();
        Backup::new(&source_conn, destination_conn)?.run_to_completion(
            COPY_PAGES_PER_STEP,
            Duration::ZERO,
            None,
        )?;
    }
    destination_db.reload_statements()?;
    info!(source, destination, "copied database");
    Ok(())
}
