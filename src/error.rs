//! Error type shared by every layer of the crate.
//!
//! Each variant maps to exactly one wire-level error reply through
//! [`Error::reply_message`]. The dispatcher is the only place that turns an
//! `Error` into a reply.

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("wrong number of arguments for '{command}' command")]
    Arity { command: String },

    #[error("the key '{name}' is already in use, delete it before creating a database")]
    KeyAlreadyBound { name: String },

    #[error("Operation against a key holding the wrong kind of value")]
    WrongType,

    #[error("Error the key is empty")]
    NoSuchKey,

    #[error("Error opening the database connection: {0}")]
    EngineOpen(#[source] rusqlite::Error),

    #[error("{message} | Query: {query}")]
    EngineQuery { message: String, query: String },

    #[error("Statement is not read only but it may modify the database, use EXEC instead | Query: {query}")]
    NotReadOnly { query: String },

    #[error("Error in storing the key into the host: {reason}")]
    Bind { reason: String },

    #[error("Statement already exists, impossible to overwrite it with this command, try with UPDATE_STATEMENT: {name}")]
    StatementExists { name: String },

    #[error("The statement is not present in the database: {name}")]
    NoSuchStatement { name: String },

    #[error("Wrong number of parameters: the statement expects {expected}, got {given}")]
    StatementArity { expected: usize, given: usize },

    #[error("the dump recorded {errors} error(s) and cannot be saved")]
    DumpIncomplete { errors: usize },

    #[error("unreadable saved database: {0}")]
    SaveFormat(String),

    #[error("the dump reader was closed before the dump completed")]
    PipeBroken,

    #[error("the dump worker panicked")]
    WorkerPanicked,

    #[error("the database connection is already closed")]
    ConnectionClosed,

    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    #[error("argument {position} is not valid UTF-8")]
    InvalidUtf8 { position: usize },

    #[error("invalid module configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Attach the offending query text to an engine failure.
    pub fn query(err: rusqlite::Error, query: &str) -> Self {
        Error::EngineQuery {
            message: err.to_string(),
            query: query.to_owned(),
        }
    }

    /// The text sent back to the caller as an error reply.
    pub fn reply_message(&self) -> String {
        match self {
            Error::KeyAlreadyBound { .. } => format!("KEY_USED {self}"),
            Error::WrongType => format!("WRONGTYPE {self}"),
            Error::Arity { .. } | Error::UnknownCommand(_) => format!("ERR {self}"),
            _ => format!("ERR - {self}"),
        }
    }
}
