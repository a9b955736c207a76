//! Command parsing and dispatch.
//!
//! Every invocation ends in exactly one reply: the handler's own on success,
//! or the error reply built from [`Error::reply_message`].

use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use crate::error::{Error, Result};
use crate::keyspace::Keyspace;
use crate::registry::{self, DatabaseObject, HandleCounts};
use crate::reply::ReplySink;
use crate::sqlite;
use crate::stream::{self, Access};

/// A parsed command. `args[0]` is the command name, as the host passes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command<'a> {
    CreateDb {
        name: &'a str,
        path: Option<&'a Path>,
    },
    Exec {
        name: Option<&'a str>,
        query: &'a str,
    },
    Query {
        name: Option<&'a str>,
        query: &'a str,
    },
    Copy {
        source: &'a str,
        destination: &'a str,
    },
    CreateStatement {
        name: &'a str,
        statement: &'a str,
        query: &'a str,
    },
    UpdateStatement {
        name: &'a str,
        statement: &'a str,
        query: &'a str,
    },
    DeleteStatement {
        name: &'a str,
        statement: &'a str,
    },
    ExecStatement {
        name: &'a str,
        statement: &'a str,
        params: Vec<&'a str>,
    },
    QueryStatement {
        name: &'a str,
        statement: &'a str,
        params: Vec<&'a str>,
    },
    Version,
}

impl<'a> Command<'a> {
    pub fn parse(prefix: &str, args: &[&'a [u8]]) -> Result<Self> {
        let Some(raw_name) = args.first() else {
            return Err(Error::UnknownCommand(String::new()));
        };
        let full_name = text(*raw_name, 0)?;
        let command = strip_prefix(full_name, prefix).to_ascii_uppercase();
        let arity = || Error::Arity {
            command: full_name.to_ascii_lowercase(),
        };

        match command.as_str() {
            "CREATE_DB" => match args {
                &[_, name] => Ok(Command::CreateDb {
                    name: text(name, 1)?,
                    path: None,
                }),
                &[_, name, path] => Ok(Command::CreateDb {
                    name: text(name, 1)?,
                    path: Some(Path::new(text(path, 2)?)),
                }),
                _ => Err(arity()),
            },
            "EXEC" | "QUERY" => {
                let (name, query) = match args {
                    &[_, query] => (None, text(query, 1)?),
                    &[_, name, query] => (Some(text(name, 1)?), text(query, 2)?),
                    _ => return Err(arity()),
                };
                if command == "EXEC" {
                    Ok(Command::Exec { name, query })
                } else {
                    Ok(Command::Query { name, query })
                }
            }
            "COPY" => match args {
                &[_, source, destination] => Ok(Command::Copy {
                    source: text(source, 1)?,
                    destination: text(destination, 2)?,
                }),
                _ => Err(arity()),
            },
            "CREATE_STATEMENT" | "UPDATE_STATEMENT" => match args {
                &[_, name, statement, query] => {
                    let (name, statement, query) =
                        (text(name, 1)?, text(statement, 2)?, text(query, 3)?);
                    if command == "CREATE_STATEMENT" {
                        Ok(Command::CreateStatement {
                            name,
                            statement,
                            query,
                        })
                    } else {
                        Ok(Command::UpdateStatement {
                            name,
                            statement,
                            query,
                        })
                    }
                }
                _ => Err(arity()),
            },
            "DELETE_STATEMENT" => match args {
                &[_, name, statement] => Ok(Command::DeleteStatement {
                    name: text(name, 1)?,
                    statement: text(statement, 2)?,
                }),
                _ => Err(arity()),
            },
            "EXEC_STATEMENT" | "QUERY_STATEMENT" => match args {
                &[_, name, statement, ref rest @ ..] => {
                    let name = text(name, 1)?;
                    let statement = text(statement, 2)?;
                    let params = rest
                        .iter()
                        .enumerate()
                        .map(|(index, raw)| text(*raw, index + 3))
                        .collect::<Result<Vec<_>>>()?;
                    if command == "EXEC_STATEMENT" {
                        Ok(Command::ExecStatement {
                            name,
                            statement,
                            params,
                        })
                    } else {
                        Ok(Command::QueryStatement {
                            name,
                            statement,
                            params,
                        })
                    }
                }
                _ => Err(arity()),
            },
            "VERSION" => match args {
                &[_] => Ok(Command::Version),
                _ => Err(arity()),
            },
            _ => Err(Error::UnknownCommand(full_name.to_owned())),
        }
    }
}

fn text(arg: &[u8], position: usize) -> Result<&str> {
    std::str::from_utf8(arg).map_err(|_| Error::InvalidUtf8 { position })
}

fn strip_prefix<'n>(name: &'n str, prefix: &str) -> &'n str {
    if prefix.is_empty() || name.len() <= prefix.len() {
        return name;
    }
    let (head, rest) = name.split_at(prefix.len());
    match rest.strip_prefix('.') {
        Some(rest) if head.eq_ignore_ascii_case(prefix) => rest,
        _ => name,
    }
}

/// Runs commands against a keyspace, with `default` serving commands that
/// name no database.
pub struct Dispatcher<'m> {
    prefix: &'m str,
    counts: &'m Arc<HandleCounts>,
    default: &'m DatabaseObject,
}

impl<'m> Dispatcher<'m> {
    pub fn new(prefix: &'m str, counts: &'m Arc<HandleCounts>, default: &'m DatabaseObject) -> Self {
        Self {
            prefix,
            counts,
            default,
        }
    }

    pub fn dispatch<K, S>(&self, keyspace: &mut K, args: &[&[u8]], sink: &mut S)
    where
        K: Keyspace + ?Sized,
        S: ReplySink + ?Sized,
    {
        if let Err(err) = self.try_dispatch(keyspace, args, sink) {
            debug!(error = %err, "command failed");
            sink.error(&err.reply_message());
        }
    }

    fn try_dispatch<K, S>(&self, keyspace: &mut K, args: &[&[u8]], sink: &mut S) -> Result<()>
    where
        K: Keyspace + ?Sized,
        S: ReplySink + ?Sized,
    {
        let command = Command::parse(self.prefix, args)?;
        debug!(?command, "dispatching");
        match command {
            Command::CreateDb { name, path } => {
                registry::create(keyspace, self.counts, name, path)?;
                sink.simple_string("OK");
            }
            Command::Exec { name, query } => {
                let database = registry::resolve_or_default(&*keyspace, name, self.default)?;
                stream::execute(database, query, Access::ReadWrite, sink)?;
            }
            Command::Query { name, query } => {
                let database = registry::resolve_or_default(&*keyspace, name, self.default)?;
                stream::execute(database, query, Access::ReadOnly, sink)?;
            }
            Command::Copy {
                source,
                destination,
            } => {
                registry::copy(keyspace, source, destination)?;
                sink.simple_string("OK");
            }
            Command::CreateStatement {
                name,
                statement,
                query,
            } => {
                let (conn, book) = registry::resolve_mut(keyspace, name)?.statement_book()?;
                book.create(conn, statement, query)?;
                sink.simple_string("OK");
            }
            Command::UpdateStatement {
                name,
                statement,
                query,
            } => {
                let (conn, book) = registry::resolve_mut(keyspace, name)?.statement_book()?;
                book.update(conn, statement, query)?;
                sink.simple_string("OK");
            }
            Command::DeleteStatement { name, statement } => {
                let (conn, book) = registry::resolve_mut(keyspace, name)?.statement_book()?;
                book.delete(conn, statement)?;
                sink.simple_string("OK");
            }
            Command::ExecStatement {
                name,
                statement,
                params,
            } => {
                let database = registry::resolve(&*keyspace, name)?;
                stream::execute_stored(database, statement, &params, Access::ReadWrite, sink)?;
            }
            Command::QueryStatement {
                name,
                statement,
                params,
            } => {
                let database = registry::resolve(&*keyspace, name)?;
                stream::execute_stored(database, statement, &params, Access::ReadOnly, sink)?;
            }
            Command::Version => sink.simple_string(sqlite::version()),
        }
        Ok(())
    }
}
