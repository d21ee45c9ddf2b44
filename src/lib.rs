//! shardkv - a sharded in-memory key-value core
//!
//! The keyspace is partitioned across shard threads that own their data
//! outright. Commands reach a shard as closures; commands that span shards,
//! and MULTI/EXEC blocks, run under per-key locks taken by the transaction
//! coordinator so every transaction appears atomic.
//!
//! - `protocol`: RESP values, the RESP codec and memcache command shapes
//! - `store`: values, entries and the per-shard database slices
//! - `commands`: command implementations and the command registry
//! - `shard`: shard workers, the shard set and per-key lock tables
//! - `transaction`: command plans and the transaction coordinator
//! - `service`: the façade connections call into
//! - `server`: TCP acceptor and connection handling

pub mod commands;
pub mod config;
pub mod error;
pub mod protocol;
pub mod server;
pub mod service;
pub mod shard;
pub mod store;
pub mod transaction;

/// Re-export commonly used types
pub use commands::{Command, CommandContext, CommandRegistry};
pub use config::{Config, InitOpts};
pub use error::{CommandError, LockError, ShardError, TxError};
pub use protocol::{McCommand, McCommandType, RespError, RespValue};
pub use server::Acceptor;
pub use service::{ConnectionContext, ReplySink, Service};
pub use shard::{EngineShard, EngineShardSet};
pub use store::{Entry, MemoryStore};
