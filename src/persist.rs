//! Saving database objects into the host's persistence stream and loading
//! them back.
//!
//! An in-memory database is saved as a header line followed by its full dump
//! script, and loaded by replaying that script into a fresh connection. A
//! file-backed database already keeps its pages on disk, so only its path is
//! saved and loading reopens the file.

use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info};

use crate::config::DumpConfig;
use crate::dump::{self, DumpSummary};
use crate::error::{Error, Result};
use crate::registry::{DatabaseObject, HandleCounts};
use crate::sqlite::StorageMode;

const MEMORY_HEADER: &str = "-- redisql memory\n";
const FILE_HEADER: &str = "-- redisql file ";

/// Write `database` to `out`.
///
/// Returns the dump totals for an in-memory database and `None` for a file.
/// A dump that recorded errors is refused rather than saved partially.
pub fn save<W>(database: &DatabaseObject, config: &DumpConfig, out: &mut W) -> Result<Option<DumpSummary>>
where
    W: Write + ?Sized,
{
    match database.storage() {
        StorageMode::File(path) => {
            let path = path
                .to_str()
                .ok_or_else(|| Error::SaveFormat(format!("path {} is not valid UTF-8", path.display())))?;
            writeln!(out, "{FILE_HEADER}{path}")?;
            debug!(name = database.name(), path, "saved database path");
            Ok(None)
        }
        StorageMode::InMemory => {
            out.write_all(MEMORY_HEADER.as_bytes())?;
            let mut reader = dump::start(database, config)?;
            let copied = io::copy(&mut reader, out);
            let summary = reader.close();
            copied?;
            let summary = summary?;
            if !summary.committed() {
                return Err(Error::DumpIncomplete {
                    errors: summary.errors,
                });
            }
            info!(
                name = database.name(),
                tables = summary.tables,
                rows = summary.rows,
                "saved database"
            );
            Ok(Some(summary))
        }
    }
}

/// Rebuild a database object from what [`save`] wrote.
pub fn load<R>(name: &str, mut input: R, counts: &Arc<HandleCounts>) -> Result<DatabaseObject>
where
    R: Read,
{
    let mut saved = String::new();
    input.read_to_string(&mut saved).map_err(|err| match err.kind() {
        io::ErrorKind::InvalidData => Error::SaveFormat("content is not valid UTF-8".to_owned()),
        _ => Error::Io(err),
    })?;

    if let Some(script) = saved.strip_prefix(MEMORY_HEADER) {
        let mut database = DatabaseObject::open(name, None, counts)?;
        database.connection()?.execute_batch(script)?;
        database.reload_statements()?;
        info!(name, "loaded in-memory database");
        Ok(database)
    } else if let Some(rest) = saved.strip_prefix(FILE_HEADER) {
        let path = rest
            .strip_suffix('\n')
            .filter(|path| !path.is_empty() && !path.contains('\n'))
            .ok_or_else(|| Error::SaveFormat("malformed file entry".to_owned()))?;
        let database = DatabaseObject::open(name, Some(Path::new(path)), counts)?;
        info!(name, path, "reopened file-backed database");
        Ok(database)
    } else {
        Err(Error::SaveFormat("missing header".to_owned()))
    }
}
