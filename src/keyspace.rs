//! The host's key namespace, as seen from this crate.
//!
//! The embedding host owns the namespace; the crate only needs to ask what a
//! key holds, reach the database object bound to it, and bind new ones.
//! [`MemoryKeyspace`] is an in-process namespace with the same rules, used by
//! tests and by hosts that do not bring their own.

use std::collections::HashMap;

use crate::registry::DatabaseObject;

/// What a key currently holds.
#[derive(Debug)]
pub enum Entry<D> {
    Empty,
    Database(D),
    /// Some other kind of host value.
    Other,
}

/// Binding refused by the host; hands the object back so it can be closed.
#[derive(Debug)]
pub struct BindRejected {
    pub database: DatabaseObject,
    pub reason: String,
}

pub trait Keyspace {
    fn lookup(&self, name: &str) -> Entry<&DatabaseObject>;

    fn lookup_mut(&mut self, name: &str) -> Entry<&mut DatabaseObject>;

    /// Bind `database` under `name`. Callers check that the key is empty first.
    fn bind(&mut self, name: &str, database: DatabaseObject) -> Result<(), BindRejected>;
}

#[derive(Debug)]
enum HostValue {
    Database(DatabaseObject),
    Bytes(Vec<u8>),
}

/// A namespace kept in a hash map.
///
/// Overwriting or deleting a key drops whatever it held, so a database object
/// bound there closes its connection at that point.
#[derive(Debug, Default)]
pub struct MemoryKeyspace {
    keys: HashMap<String, HostValue>,
    max_keys: Option<usize>,
}

impl MemoryKeyspace {
    pub fn new() -> Self {
        Self::default()
    }

    /// A namespace that refuses new bindings once it holds `max_keys` keys.
    pub fn with_max_keys(max_keys: usize) -> Self {
        Self {
            keys: HashMap::new(),
            max_keys: Some(max_keys),
        }
    }

    /// Host-level write of a plain value, replacing whatever the key held.
    pub fn set_bytes(&mut self, name: &str, value: impl Into<Vec<u8>>) {
        self.keys
            .insert(name.to_owned(), HostValue::Bytes(value.into()));
    }

    pub fn get_bytes(&self, name: &str) -> Option<&[u8]> {
        match self.keys.get(name) {
            Some(HostValue::Bytes(bytes)) => Some(bytes),
            _ => None,
        }
    }

    /// Host-level delete. Returns whether the key existed.
    pub fn delete(&mut self, name: &str) -> bool {
        self.keys.remove(name).is_some()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.keys.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl Keyspace for MemoryKeyspace {
    fn lookup(&self, name: &str) -> Entry<&DatabaseObject> {
        match self.keys.get(name) {
            None => Entry::Empty,
            Some(HostValue::Database(db)) => Entry::Database(db),
            Some(HostValue::Bytes(_)) => Entry::Other,
        }
    }

    fn lookup_mut(&mut self, name: &str) -> Entry<&mut DatabaseObject> {
        match self.keys.get_mut(name) {
            None => Entry::Empty,
            Some(HostValue::Database(db)) => Entry::Database(db),
            Some(HostValue::Bytes(_)) => Entry::Other,
        }
    }

    fn bind(&mut self, name: &str, database: DatabaseObject) -> Result<(), BindRejected> {
        if self.keys.contains_key(name) {
            return Err(BindRejected {
                database,
                reason: format!("key '{name}' is already bound"),
            });
        }
        if let Some(max) = self.max_keys {
            if self.keys.len() >= max {
                return Err(BindRejected {
                    database,
                    reason: format!("keyspace is full ({max} keys)"),
                });
            }
        }
        self.keys
            .insert(name.to_owned(), HostValue::Database(database));
        Ok(())
    }
}
