//! Module configuration, read from the host's module load arguments.
//!
//! Arguments come as `key value` pairs, e.g.
//! `path /var/lib/redisql/default.sqlite protocol resp3 dump_chunk_size 8192`.

use serde::de::value::{Error as ValueError, MapDeserializer};
use serde::de::{self, Deserializer};
use serde::Deserialize;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::reply::Protocol;

pub const DEFAULT_PREFIX: &str = "REDISQL";
pub const DEFAULT_DUMP_CHUNK_SIZE: usize = 4096;
pub const DEFAULT_DUMP_CHANNEL_CAPACITY: usize = 8;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ModuleConfig {
    /// File backing the default database; in memory when unset.
    #[serde(deserialize_with = "some_path")]
    pub path: Option<PathBuf>,
    /// Optional namespace in front of command names, as in `REDISQL.EXEC`.
    pub prefix: String,
    pub protocol: Protocol,
    #[serde(deserialize_with = "parsed")]
    pub dump_chunk_size: usize,
    #[serde(deserialize_with = "parsed")]
    pub dump_channel_capacity: usize,
}

impl Default for ModuleConfig {
    fn default() -> Self {
        Self {
            path: None,
            prefix: DEFAULT_PREFIX.to_owned(),
            protocol: Protocol::default(),
            dump_chunk_size: DEFAULT_DUMP_CHUNK_SIZE,
            dump_channel_capacity: DEFAULT_DUMP_CHANNEL_CAPACITY,
        }
    }
}

/// Sizing of the byte channel between a dump worker and its reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DumpConfig {
    /// Bytes buffered by the worker before a chunk is sent.
    pub chunk_size: usize,
    /// Chunks that may wait in the channel before the worker blocks.
    pub channel_capacity: usize,
}

impl Default for DumpConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_DUMP_CHUNK_SIZE,
            channel_capacity: DEFAULT_DUMP_CHANNEL_CAPACITY,
        }
    }
}

impl ModuleConfig {
    /// Parse module load arguments.
    pub fn from_args<S: AsRef<str>>(args: &[S]) -> Result<Self> {
        if args.len() % 2 != 0 {
            return Err(Error::Config(
                "arguments must be given as key value pairs".to_owned(),
            ));
        }
        let pairs = args
            .chunks(2)
            .map(|pair| (pair[0].as_ref().to_ascii_lowercase(), pair[1].as_ref().to_owned()));
        let deserializer = MapDeserializer::<_, ValueError>::new(pairs);
        let config = ModuleConfig::deserialize(deserializer)
            .map_err(|err| Error::Config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.dump_chunk_size == 0 {
            return Err(Error::Config("dump_chunk_size must be positive".to_owned()));
        }
        if self.prefix.contains(char::is_whitespace) {
            return Err(Error::Config("prefix cannot contain whitespace".to_owned()));
        }
        Ok(())
    }

    pub fn dump(&self) -> DumpConfig {
        DumpConfig {
            chunk_size: self.dump_chunk_size,
            channel_capacity: self.dump_channel_capacity,
        }
    }
}

fn some_path<'de, D>(deserializer: D) -> std::result::Result<Option<PathBuf>, D::Error>
where
    D: Deserializer<'de>,
{
    String::deserialize(deserializer).map(|raw| Some(PathBuf::from(raw)))
}

fn parsed<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
    T::Err: Display,
{
    let raw = String::deserialize(deserializer)?;
    raw.parse().map_err(de::Error::custom)
}
