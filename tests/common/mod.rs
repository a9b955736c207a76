#![allow(dead_code)]

use rusqlite::Connection;
use rust_redisql::keyspace::{Entry, Keyspace};
use rust_redisql::{MemoryKeyspace, Module, ModuleConfig, Reply, ReplyCollector};
use tracing_subscriber::EnvFilter;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A loaded module with an empty keyspace.
pub struct Harness {
    pub module: Module,
    pub keys: MemoryKeyspace,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(ModuleConfig::default())
    }

    pub fn with_config(config: ModuleConfig) -> Self {
        init_tracing();
        Self {
            module: Module::with_config(config).expect("module loads"),
            keys: MemoryKeyspace::new(),
        }
    }

    /// Run one command and return its single reply.
    pub fn call(&mut self, args: &[&str]) -> Reply {
        let raw: Vec<&[u8]> = args.iter().map(|arg| arg.as_bytes()).collect();
        self.call_raw(&raw)
    }

    pub fn call_raw(&mut self, args: &[&[u8]]) -> Reply {
        let mut out = ReplyCollector::new();
        self.module.call(&mut self.keys, args, &mut out);
        out.take_one().expect("exactly one reply per command")
    }

    /// The connection owned by the database bound to `name`.
    pub fn keys_connection(&self, name: &str) -> &Connection {
        match self.keys.lookup(name) {
            Entry::Database(db) => db.connection().expect("connection is open"),
            other => panic!("{name} does not hold a database: {other:?}"),
        }
    }
}

pub fn ok() -> Reply {
    Reply::SimpleString("OK".to_owned())
}

pub fn rows(rows: Vec<Vec<Reply>>) -> Reply {
    Reply::Array(rows.into_iter().map(Reply::Array).collect())
}

pub fn text(value: &str) -> Reply {
    Reply::Bulk(value.as_bytes().to_vec())
}

pub fn error_text(reply: &Reply) -> &str {
    match reply {
        Reply::Error(message) => message,
        other => panic!("expected an error reply, got {other:?}"),
    }
}
