//! SQLite databases living in the keys of an embedding key-value host.
//!
//! # Intention
//!
//! - Bind one SQLite connection to one host key, and refuse to touch keys of
//!   any other kind.
//! - Stream statement results into wire replies row by row, typing each value
//!   by what it holds in that row.
//! - Export a database as a replayable SQL script from a worker thread,
//!   without holding up command processing.
//! - Keep named statements inside each database, and save databases into the
//!   host's persistence stream.
//!
//! # Architectural Boundaries
//!
//! - The host's namespace and reply protocol are reached only through the
//!   [`keyspace::Keyspace`] and [`reply::ReplySink`] traits.
//! - SQLite is reached only through rusqlite.
//!
//! # Example
//!
//! ```
//! use rust_redisql::{MemoryKeyspace, Module, Reply, ReplyCollector};
//!
//! let module = Module::load::<&str>(&[]).unwrap();
//! let mut keys = MemoryKeyspace::new();
//! let mut out = ReplyCollector::new();
//! module.call(&mut keys, &[b"CREATE_DB".as_slice(), b"db1".as_slice()], &mut out);
//! module.call(&mut keys, &[b"EXEC".as_slice(), b"db1".as_slice(), b"SELECT 1".as_slice()], &mut out);
//! assert_eq!(
//!     out.into_replies()[1],
//!     Reply::Array(vec![Reply::Array(vec![Reply::Integer(1)])])
//! );
//! ```

pub mod config;
pub mod dispatch;
pub mod dump;
pub mod error;
pub mod keyspace;
pub mod module;
pub mod persist;
pub mod registry;
pub mod reply;
pub mod sqlite;
pub mod statements;
pub mod stream;

pub use config::{DumpConfig, ModuleConfig};
pub use dump::{DumpReader, DumpSummary};
pub use error::{Error, Result};
pub use keyspace::{Keyspace, MemoryKeyspace};
pub use module::Module;
pub use registry::{DatabaseObject, HandleCounts};
pub use reply::{Protocol, Reply, ReplyCollector, ReplySink, RespWriter};
pub use sqlite::StorageMode;
pub use statements::{StatementBook, StoredStatement};
