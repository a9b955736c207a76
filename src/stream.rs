//! Streams a statement's result set into a reply sink, one row at a time.

use rusqlite::types::ValueRef;
use rusqlite::{Row, Statement};
use tracing::debug;

use crate::error::{Error, Result};
use crate::registry::DatabaseObject;
use crate::reply::ReplySink;

/// Whether a statement may modify the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    ReadWrite,
    ReadOnly,
}

/// What a streamed statement produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    /// The statement completed without producing rows; `OK` was sent.
    Done,
    /// This many rows were sent in one array.
    Rows(usize),
}

/// Prepare `query` on `database` and stream its result into `sink`.
///
/// On success exactly one reply has been written. On error nothing written
/// by this call remains in the sink and the caller owes the error reply. The
/// statement is finalized before returning either way.
pub fn execute<S>(database: &DatabaseObject, query: &str, access: Access, sink: &mut S) -> Result<StreamOutcome>
where
    S: ReplySink + ?Sized,
{
    let conn = database.connection()?;
    let counts = database.counts();

    let mut stmt = conn.prepare(query).map_err(|err| Error::query(err, query))?;
    counts.statement_prepared();

    let mark = sink.mark();
    let streamed = if access == Access::ReadOnly && !stmt.readonly() {
        Err(Error::NotReadOnly {
            query: query.to_owned(),
        })
    } else {
        stream_rows(&mut stmt, sink).map_err(|err| Error::query(err, query))
    };

    counts.statement_finalized();
    let finalized = stmt.finalize().map_err(|err| Error::query(err, query));

    match streamed.and_then(|outcome| finalized.map(|()| outcome)) {
        Ok(outcome) => {
            debug!(database = database.name(), ?outcome, "statement streamed");
            Ok(outcome)
        }
        Err(err) => {
            sink.truncate(mark);
            Err(err)
        }
    }
}

/// Run the stored statement `name` of `database` with `params` bound as
/// text, in order.
///
/// The compiled statement is taken from the connection's statement cache, so
/// repeated calls do not recompile it.
pub fn execute_stored<S>(
    database: &DatabaseObject,
    name: &str,
    params: &[&str],
    access: Access,
    sink: &mut S,
) -> Result<StreamOutcome>
where
    S: ReplySink + ?Sized,
{
    let stored = database
        .statements()
        .get(name)
        .ok_or_else(|| Error::NoSuchStatement {
            name: name.to_owned(),
        })?;
    let sql = stored.sql();
    if access == Access::ReadOnly && !stored.read_only() {
        return Err(Error::NotReadOnly {
            query: sql.to_owned(),
        });
    }
    if params.len() != stored.parameters() {
        return Err(Error::StatementArity {
            expected: stored.parameters(),
            given: params.len(),
        });
    }

    let conn = database.connection()?;
    let mut stmt = conn.prepare_cached(sql).map_err(|err| Error::query(err, sql))?;
    for (index, value) in params.iter().enumerate() {
        stmt.raw_bind_parameter(index + 1, *value)
            .map_err(|err| Error::query(err, sql))?;
    }

    let mark = sink.mark();
    match stream_rows(&mut stmt, sink) {
        Ok(outcome) => {
            debug!(database = database.name(), statement = name, ?outcome, "stored statement streamed");
            Ok(outcome)
        }
        Err(err) => {
            sink.truncate(mark);
            Err(Error::query(err, sql))
        }
    }
}

fn stream_rows<S>(stmt: &mut Statement<'_>, sink: &mut S) -> rusqlite::Result<StreamOutcome>
where
    S: ReplySink + ?Sized,
{
    let columns = stmt.column_count();
    let mut rows = stmt.raw_query();

    let Some(first) = rows.next()? else {
        sink.simple_string("OK");
        return Ok(StreamOutcome::Done);
    };

    let array = sink.postponed_array();
    write_row(first, columns, sink)?;
    let mut count = 1;
    while let Some(row) = rows.next()? {
        write_row(row, columns, sink)?;
        count += 1;
    }
    sink.set_array_length(array, count);
    Ok(StreamOutcome::Rows(count))
}

/// Each value is written by the kind it holds in this row, not by the
/// column's declared type.
fn write_row<S>(row: &Row<'_>, columns: usize, sink: &mut S) -> rusqlite::Result<()>
where
    S: ReplySink + ?Sized,
{
    sink.array(columns);
    for index in 0..columns {
        match row.get_ref(index)? {
            ValueRef::Null => sink.null(),
            ValueRef::Integer(value) => sink.integer(value),
            ValueRef::Real(value) => sink.double(value),
            ValueRef::Text(text) => sink.bulk(text),
            ValueRef::Blob(blob) => sink.bulk(blob),
        }
    }
    Ok(())
}
