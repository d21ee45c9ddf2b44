//! Command bodies and the command table
//!
//! Bodies implement the `Command` trait and run on the shard that owns their
//! keys. The registry turns them into immutable descriptors that the service
//! uses for validation and shard routing before anything executes.

mod context;
mod registry;
mod metadata;

// Command implementations
mod admin;
mod counter;
mod key;
mod list;
mod string;
mod ttl;

pub use context::CommandContext;
pub use registry::{CommandDescriptor, CommandHandler, CommandRegistry, ControlCommand};
pub use metadata::{CommandFlags, KeySpec, ReplyMerge};

use crate::error::CommandError;
use crate::protocol::RespValue;
use bytes::Bytes;

/// Command execution trait
///
/// `execute` receives the arguments without the command name. Arity has
/// already been checked against `min_args`/`max_args` by the time it runs.
pub trait Command: Send + Sync {
    fn execute(&self, ctx: &mut CommandContext<'_>, args: &[Bytes]) -> RespValue;

    /// Upper-case command name
    fn name(&self) -> &'static str;

    /// Get the minimum number of arguments required
    fn min_args(&self) -> usize {
        0
    }

    /// Get the maximum number of arguments (None = unlimited)
    fn max_args(&self) -> Option<usize> {
        None
    }

    fn key_spec(&self) -> KeySpec {
        KeySpec::SINGLE
    }

    fn flags(&self) -> CommandFlags {
        CommandFlags::READONLY
    }

    /// How replies are combined when the keys of one call span several shards
    fn reply_merge(&self) -> ReplyMerge {
        ReplyMerge::Single
    }
}

/// Turn a command result into its reply
pub(crate) fn reply(result: Result<RespValue, CommandError>) -> RespValue {
    result.unwrap_or_else(RespValue::from)
}

/// Parse the optional trailing `XX` flag: act only on keys that already exist
pub(crate) fn parse_xx(arg: Option<&Bytes>) -> Result<bool, CommandError> {
    match arg {
        Some(opt) if opt.eq_ignore_ascii_case(b"XX") => Ok(true),
        Some(_) => Err(CommandError::Syntax),
        None => Ok(false),
    }
}

/// Parse a decimal integer argument
pub(crate) fn parse_i64(arg: &Bytes) -> Result<i64, CommandError> {
    std::str::from_utf8(arg)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or(CommandError::NotInteger)
}
