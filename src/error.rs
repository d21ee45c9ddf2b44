//! Error types shared across the core
//!
//! Client-visible errors carry their Redis-compatible reply text in their
//! `Display` implementation; internal errors are logged and mapped to a
//! generic reply by the service.

use crate::protocol::RespValue;
use crate::shard::{ShardId, TxId};
use thiserror::Error;

/// Errors produced while validating or executing a single command
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("ERR unknown command '{0}'")]
    UnknownCommand(String),

    #[error("ERR wrong number of arguments for '{0}' command")]
    WrongArity(String),

    #[error("WRONGTYPE Operation against a key holding the wrong kind of value")]
    WrongType,

    #[error("ERR value is not an integer or out of range")]
    NotInteger,

    #[error("ERR increment or decrement would overflow")]
    Overflow,

    #[error("ERR syntax error")]
    Syntax,

    #[error("ERR invalid expire time in '{0}' command")]
    InvalidExpire(String),

    #[error("ERR {0}")]
    Other(String),
}

impl From<CommandError> for RespValue {
    fn from(err: CommandError) -> Self {
        RespValue::error(err.to_string())
    }
}

/// Failures talking to a shard worker. Always an internal invariant violation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShardError {
    #[error("shard {0} is not running")]
    NotRunning(ShardId),

    #[error("shard {0} did not respond")]
    Unresponsive(ShardId),

    #[error("no such shard {0}")]
    NoSuchShard(ShardId),
}

/// Lock-table misuse detected on a shard
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LockError {
    #[error("transaction {txid} released a lock it does not hold")]
    NotHolder { txid: TxId },

    #[error("transaction {txid} already queued on this shard")]
    AlreadyQueued { txid: TxId },
}

/// Outcome of a transaction that did not complete
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TxError {
    /// The transaction was cancelled before reaching DONE; nothing it wrote is visible.
    #[error("transaction {0} aborted")]
    Aborted(TxId),

    #[error(transparent)]
    Shard(#[from] ShardError),

    #[error(transparent)]
    Lock(#[from] LockError),
}

impl TxError {
    /// Whether this error signals a broken core invariant
    pub fn is_internal(&self) -> bool {
        !matches!(self, TxError::Aborted(_))
    }
}
