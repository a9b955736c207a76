//! Module lifecycle: load, command entry point, dump entry point, host
//! persistence, unload.

use std::io::{Read, Write};
use std::sync::Arc;

use anyhow::Context as _;
use tracing::info;

use crate::config::ModuleConfig;
use crate::dispatch::Dispatcher;
use crate::dump::{self, DumpReader, DumpSummary};
use crate::error::Result;
use crate::keyspace::Keyspace;
use crate::persist;
use crate::registry::{self, DatabaseObject, HandleCounts};
use crate::reply::ReplySink;

/// Name given to the process-wide default database.
pub const DEFAULT_DATABASE: &str = "default";

/// State the host keeps between module load and unload.
///
/// The default database serves commands that name no database. It is opened
/// by [`Module::load`] and closed by [`Module::unload`] (or when the module is
/// dropped).
#[derive(Debug)]
pub struct Module {
    config: ModuleConfig,
    counts: Arc<HandleCounts>,
    default: DatabaseObject,
}

impl Module {
    /// Load from the host's module arguments.
    pub fn load<S: AsRef<str>>(args: &[S]) -> anyhow::Result<Self> {
        let config = ModuleConfig::from_args(args).context("parsing module arguments")?;
        Self::with_config(config)
    }

    pub fn with_config(config: ModuleConfig) -> anyhow::Result<Self> {
        config.validate().context("validating module configuration")?;
        let counts = HandleCounts::new();
        let default = DatabaseObject::open(DEFAULT_DATABASE, config.path.as_deref(), &counts)
            .context("opening the default database")?;
        info!(storage = ?default.storage(), sqlite = crate::sqlite::version(), "module loaded");
        Ok(Self {
            config,
            counts,
            default,
        })
    }

    pub fn config(&self) -> &ModuleConfig {
        &self.config
    }

    pub fn counts(&self) -> &Arc<HandleCounts> {
        &self.counts
    }

    pub fn default_database(&self) -> &DatabaseObject {
        &self.default
    }

    /// Run one command; exactly one reply is written to `sink`.
    pub fn call<K, S>(&self, keyspace: &mut K, args: &[&[u8]], sink: &mut S)
    where
        K: Keyspace + ?Sized,
        S: ReplySink + ?Sized,
    {
        Dispatcher::new(&self.config.prefix, &self.counts, &self.default).dispatch(keyspace, args, sink);
    }

    /// Start dumping the database bound to `name`, or the default database.
    pub fn dump<K>(&self, keyspace: &K, name: Option<&str>) -> Result<DumpReader>
    where
        K: Keyspace + ?Sized,
    {
        let database = registry::resolve_or_default(keyspace, name, &self.default)?;
        dump::start(database, &self.config.dump())
    }

    /// Write the database bound to `name`, or the default database, into the
    /// host's persistence stream.
    pub fn save<K, W>(&self, keyspace: &K, name: Option<&str>, out: &mut W) -> Result<Option<DumpSummary>>
    where
        K: Keyspace + ?Sized,
        W: Write + ?Sized,
    {
        let database = registry::resolve_or_default(keyspace, name, &self.default)?;
        persist::save(database, &self.config.dump(), out)
    }

    /// Rebuild a saved database and bind it under `name`, which must be free.
    pub fn restore<K, R>(&self, keyspace: &mut K, name: &str, input: R) -> Result<()>
    where
        K: Keyspace + ?Sized,
        R: Read,
    {
        registry::ensure_vacant(keyspace, name)?;
        let database = persist::load(name, input, &self.counts)?;
        registry::adopt(keyspace, name, database)?;
        info!(name, "restored database");
        Ok(())
    }

    /// Close the default database.
    pub fn unload(self) -> Result<()> {
        info!("module unloading");
        self.default.close()
    }
}
