//! Concurrent snapshot dumps.
//!
//! [`start`] copies the database into a private in-memory snapshot on the
//! calling thread and hands the snapshot to a dedicated worker thread. The
//! owning connection is never locked by the worker, so commands keep running
//! while the dump is read. The worker writes a replayable SQL
//! script into a bounded byte channel; the caller drains it through the
//! returned [`DumpReader`], either as [`std::io::Read`] or as a
//! [`futures::Stream`] of chunks. A read of zero bytes means the script is
//! complete.
//!
//! A script that ends in `ROLLBACK; -- due to errors` is partial and must not
//! be treated as authoritative.

use std::io::{self, Read, Write};
use std::pin::Pin;
use std::task::{Context, Poll};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use futures::channel::mpsc;
use futures::executor::block_on;
use futures::{SinkExt, Stream, StreamExt};
use rusqlite::backup::Backup;
use rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::config::DumpConfig;
use crate::error::{Error, Result};
use crate::registry::DatabaseObject;
use crate::sqlite::{self, quote_identifier, quote_literal};

const TABLES_QUERY: &str = "SELECT name, type, sql FROM sqlite_master \
     WHERE sql NOT NULL AND type == 'table' AND name != 'sqlite_sequence'";
const SEQUENCE_QUERY: &str =
    "SELECT name, type, sql FROM sqlite_master WHERE name == 'sqlite_sequence'";
const EXTRAS_QUERY: &str = "SELECT sql FROM sqlite_master \
     WHERE sql NOT NULL AND type IN ('index', 'trigger', 'view')";
const BACKWARDS: &str = " ORDER BY rowid DESC";
const SNAPSHOT_PAGES_PER_STEP: i32 = 256;

/// Totals reported by a finished worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DumpSummary {
    pub tables: usize,
    pub rows: usize,
    pub errors: usize,
}

impl DumpSummary {
    /// Whether the script ends in `COMMIT` rather than `ROLLBACK`.
    pub fn committed(&self) -> bool {
        self.errors == 0
    }
}

/// Begin dumping `database`. Returns as soon as the worker is running.
pub fn start(database: &DatabaseObject, config: &DumpConfig) -> Result<DumpReader> {
    let conn = snapshot(database.connection()?)?;
    let (tx, rx) = mpsc::channel(config.channel_capacity);
    let out = ChunkWriter::new(tx, config.chunk_size.max(1));
    let name = database.name().to_owned();

    let worker = thread::Builder::new()
        .name(format!("redisql-dump-{name}"))
        .spawn(move || run(conn, out, &name))?;

    Ok(DumpReader {
        chunks: Some(rx),
        pending: Vec::new(),
        offset: 0,
        worker: Some(worker),
    })
}

/// Page-level copy of `source` into a fresh private in-memory database.
///
/// Pages are copied as stored, damaged ones included.
fn snapshot(source: &Connection) -> Result<Connection> {
    let mut copy = Connection::open_in_memory().map_err(Error::EngineOpen)?;
    Backup::new(source, &mut copy)?.run_to_completion(
        SNAPSHOT_PAGES_PER_STEP,
        Duration::ZERO,
        None,
    )?;
    Ok(copy)
}

fn run(conn: Connection, out: ChunkWriter, name: &str) -> Result<DumpSummary> {
    info!(database = name, "dump started");
    let mut dumper = Dumper {
        conn: &conn,
        out,
        summary: DumpSummary::default(),
        writable_schema: false,
    };
    let result = dumper.write_script();
    // Dropping the dumper closes the write end.
    let summary = dumper.summary;
    drop(dumper);
    if let Err((_, err)) = conn.close() {
        warn!(database = name, error = %err, "failed to close dump connection");
    }

    match result {
        Ok(()) => {
            info!(
                database = name,
                tables = summary.tables,
                rows = summary.rows,
                errors = summary.errors,
                "dump finished"
            );
            Ok(summary)
        }
        Err(err) => {
            warn!(database = name, error = %err, "dump abandoned");
            Err(err)
        }
    }
}

struct Dumper<'c> {
    conn: &'c Connection,
    out: ChunkWriter,
    summary: DumpSummary,
    writable_schema: bool,
}

impl Dumper<'_> {
    fn write_script(&mut self) -> Result<()> {
        // Replay may meet rows before the rows they reference.
        self.emit("PRAGMA foreign_keys=OFF;\n")?;
        self.emit("BEGIN TRANSACTION;\n")?;
        if let Err(err) = self.conn.execute_batch("SAVEPOINT dump") {
            self.engine_error(&err)?;
        }

        self.dump_schema(TABLES_QUERY)?;
        self.dump_schema(SEQUENCE_QUERY)?;
        if let Err(err) = self.dump_extras() {
            self.absorb(err)?;
        }

        if self.writable_schema {
            self.emit("PRAGMA writable_schema=OFF;\n")?;
            self.writable_schema = false;
        }
        if let Err(err) = self.conn.execute_batch("RELEASE dump") {
            self.engine_error(&err)?;
        }

        if self.summary.committed() {
            self.emit("COMMIT;\n")?;
        } else {
            self.emit("ROLLBACK; -- due to errors\n")?;
        }
        self.out.flush().map_err(pipe_error)
    }

    fn emit(&mut self, text: &str) -> Result<()> {
        self.out.write_all(text.as_bytes()).map_err(pipe_error)
    }

    /// Record an engine failure in the script itself and count it.
    fn engine_error(&mut self, err: &rusqlite::Error) -> Result<()> {
        self.summary.errors += 1;
        debug!(error = %err, "engine error during dump");
        self.error_comment(sqlite::error_code(err), &err.to_string())
    }

    fn error_comment(&mut self, code: i32, message: &str) -> Result<()> {
        self.emit(&format!("/**** ERROR: ({code}) {message} *****/\n"))
    }

    /// Engine errors are recorded in the script; anything else ends the dump.
    fn absorb(&mut self, err: Error) -> Result<()> {
        match err {
            Error::Sqlite(err) => self.engine_error(&err),
            other => Err(other),
        }
    }

    fn dump_schema(&mut self, query: &str) -> Result<()> {
        let entries = match self.schema_entries(query) {
            Ok(entries) => entries,
            Err(err) if sqlite::is_corruption(&err) => {
                self.emit("/****** CORRUPTION ERROR *******/\n")?;
                self.emit(&format!("/****** {err} ******/\n"))?;
                match self.schema_entries(&format!("{query}{BACKWARDS}")) {
                    Ok(entries) => entries,
                    Err(err) => return self.engine_error(&err),
                }
            }
            Err(err) => return self.engine_error(&err),
        };

        for entry in entries {
            self.dump_entry(&entry)?;
        }
        Ok(())
    }

    fn schema_entries(&self, query: &str) -> rusqlite::Result<Vec<SchemaEntry>> {
        let mut stmt = self.conn.prepare(query)?;
        let entries = stmt
            .query_map([], |row| {
                Ok(SchemaEntry {
                    name: row.get(0)?,
                    kind: row.get(1)?,
                    sql: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }

    fn dump_entry(&mut self, entry: &SchemaEntry) -> Result<()> {
        let mut first_row = None;
        if entry.name == "sqlite_sequence" {
            first_row = Some("DELETE FROM sqlite_sequence;\n");
        } else if is_stat_table(&entry.name) {
            self.emit("ANALYZE sqlite_master;\n")?;
        } else if entry.name.starts_with("sqlite_") {
            return Ok(());
        } else if entry.sql.starts_with("CREATE VIRTUAL TABLE") {
            return self.dump_virtual_table(entry);
        } else {
            self.emit(&format!("{};\n", entry.sql))?;
            self.summary.tables += 1;
        }

        if entry.kind == "table" {
            if let Err(err) = self.dump_rows(&entry.name, first_row) {
                self.absorb(err)?;
            }
        }
        Ok(())
    }

    /// Virtual tables cannot be created by replaying their schema into a
    /// fresh database, so the schema row is written back directly.
    fn dump_virtual_table(&mut self, entry: &SchemaEntry) -> Result<()> {
        if !self.writable_schema {
            self.emit("PRAGMA writable_schema=ON;\n")?;
            self.writable_schema = true;
        }
        let quoted = self.conn.query_row(
            "SELECT quote(?1), quote(?2)",
            [&entry.name, &entry.sql],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
        );
        match quoted {
            Ok((name, sql)) => self.emit(&format!(
                "INSERT INTO sqlite_master(type,name,tbl_name,rootpage,sql) \
                 VALUES('table',{name},{name},0,{sql});\n"
            )),
            Err(err) => self.engine_error(&err),
        }
    }

    fn dump_rows(&mut self, table: &str, first_row: Option<&str>) -> Result<()> {
        let Some(select) = self.insert_select(table)? else {
            self.summary.errors += 1;
            return self.error_comment(-1, &format!("no columns found for table {table}"));
        };
        // Emitted once, before the first row either scan produces.
        let mut prefix = first_row;
        match self.run_insert_select(&select, &mut prefix) {
            Err(Error::Sqlite(err)) if sqlite::is_corruption(&err) => {
                // Forward scans can hit a bad page that a backward scan reaches last.
                self.error_comment(sqlite::error_code(&err), &err.to_string())?;
                self.run_insert_select(&format!("{select}{BACKWARDS}"), &mut prefix)
            }
            other => other,
        }
    }

    /// A SELECT producing one `INSERT` statement per row, with every value
    /// quoted by the engine's `quote()`.
    fn insert_select(&self, table: &str) -> Result<Option<String>> {
        let quoted_table = quote_identifier(table);
        let mut stmt = self
            .conn
            .prepare(&format!("PRAGMA table_info({quoted_table})"))?;
        let columns = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        if columns.is_empty() {
            return Ok(None);
        }

        let values = columns
            .iter()
            .map(|column| format!("quote({})", quote_identifier(column)))
            .collect::<Vec<_>>()
            .join(" || ',' || ");
        Ok(Some(format!(
            "SELECT 'INSERT INTO ' || {} || ' VALUES(' || {values} || ')' FROM {quoted_table}",
            quote_literal(&quoted_table)
        )))
    }

    fn run_insert_select(&mut self, select: &str, first_row: &mut Option<&str>) -> Result<()> {
        let conn = self.conn;
        let mut stmt = conn.prepare(select)?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            if let Some(prefix) = first_row.take() {
                self.emit(prefix)?;
            }
            let insert: String = row.get(0)?;
            self.emit(&insert)?;
            // Keep a trailing `--` inside the value from swallowing the terminator.
            if insert.contains("--") {
                self.emit("\n;\n")?;
            } else {
                self.emit(";\n")?;
            }
            self.summary.rows += 1;
        }
        Ok(())
    }

    fn dump_extras(&mut self) -> Result<()> {
        let conn = self.conn;
        let mut stmt = conn.prepare(EXTRAS_QUERY)?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let sql: String = row.get(0)?;
            self.emit(&format!("{sql};\n"))?;
        }
        Ok(())
    }
}

struct SchemaEntry {
    name: String,
    kind: String,
    sql: String,
}

/// Matches the `sqlite_stat?` glob.
fn is_stat_table(name: &str) -> bool {
    name.strip_prefix("sqlite_stat")
        .map_or(false, |rest| rest.chars().count() == 1)
}

fn pipe_error(err: io::Error) -> Error {
    if err.kind() == io::ErrorKind::BrokenPipe {
        Error::PipeBroken
    } else {
        Error::Io(err)
    }
}

/// Write end of the dump channel. Buffers up to one chunk before sending.
struct ChunkWriter {
    tx: mpsc::Sender<Vec<u8>>,
    buf: Vec<u8>,
    chunk_size: usize,
}

impl ChunkWriter {
    fn new(tx: mpsc::Sender<Vec<u8>>, chunk_size: usize) -> Self {
        Self {
            tx,
            buf: Vec::with_capacity(chunk_size),
            chunk_size,
        }
    }

    fn send(&mut self, chunk: Vec<u8>) -> io::Result<()> {
        block_on(self.tx.send(chunk))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "dump reader closed"))
    }
}

impl Write for ChunkWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(data);
        while self.buf.len() >= self.chunk_size {
            let rest = self.buf.split_off(self.chunk_size);
            let chunk = std::mem::replace(&mut self.buf, rest);
            self.send(chunk)?;
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let chunk = std::mem::take(&mut self.buf);
        self.send(chunk)
    }
}

/// Read end of a dump.
///
/// Dropping the reader closes the channel; a worker still writing then fails
/// its next send and exits.
#[derive(Debug)]
pub struct DumpReader {
    chunks: Option<mpsc::Receiver<Vec<u8>>>,
    pending: Vec<u8>,
    offset: usize,
    worker: Option<JoinHandle<Result<DumpSummary>>>,
}

impl DumpReader {
    /// Close the read end and wait for the worker.
    ///
    /// Closing before the stream is drained makes the worker give up with
    /// [`Error::PipeBroken`].
    pub fn close(mut self) -> Result<DumpSummary> {
        drop(self.chunks.take());
        match self.worker.take() {
            Some(worker) => worker.join().map_err(|_| Error::WorkerPanicked)?,
            None => Err(Error::PipeBroken),
        }
    }

    fn take_pending(&mut self) -> Option<Vec<u8>> {
        if self.offset >= self.pending.len() {
            return None;
        }
        let rest = self.pending.split_off(self.offset);
        self.pending.clear();
        self.offset = 0;
        Some(rest)
    }
}

impl Read for DumpReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.offset >= self.pending.len() {
            let Some(chunks) = self.chunks.as_mut() else {
                return Ok(0);
            };
            match block_on(chunks.next()) {
                Some(chunk) => {
                    self.pending = chunk;
                    self.offset = 0;
                }
                None => return Ok(0),
            }
        }
        let available = &self.pending[self.offset..];
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.offset += n;
        Ok(n)
    }
}

impl Stream for DumpReader {
    type Item = Vec<u8>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if let Some(rest) = self.take_pending() {
            return Poll::Ready(Some(rest));
        }
        match self.chunks.as_mut() {
            Some(chunks) => chunks.poll_next_unpin(cx),
            None => Poll::Ready(None),
        }
    }
}
