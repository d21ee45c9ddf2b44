//! Key commands (DEL, EXISTS, TYPE)

use super::{Command, CommandContext, CommandFlags, KeySpec, ReplyMerge};
use crate::protocol::RespValue;
use bytes::Bytes;

/// DEL command - Delete one or more keys
///
/// Syntax: DEL key [key ...]
pub struct DelCommand;

impl Command for DelCommand {
    fn execute(&self, ctx: &mut CommandContext<'_>, args: &[Bytes]) -> RespValue {
        let deleted = args.iter().filter(|key| ctx.store.delete(key)).count();
        RespValue::integer(deleted as i64)
    }

    fn name(&self) -> &'static str {
        "DEL"
    }

    fn min_args(&self) -> usize {
        1
    }

    fn key_spec(&self) -> KeySpec {
        KeySpec::ALL
    }

    fn flags(&self) -> CommandFlags {
        CommandFlags::WRITE
    }

    fn reply_merge(&self) -> ReplyMerge {
        ReplyMerge::SumIntegers
    }
}

/// EXISTS command - Count how many of the given keys exist
///
/// Syntax: EXISTS key [key ...]
pub struct ExistsCommand;

impl Command for ExistsCommand {
    fn execute(&self, ctx: &mut CommandContext<'_>, args: &[Bytes]) -> RespValue {
        let count = args.iter().filter(|key| ctx.store.exists(key)).count();
        RespValue::integer(count as i64)
    }

    fn name(&self) -> &'static str {
        "EXISTS"
    }

    fn min_args(&self) -> usize {
        1
    }

    fn key_spec(&self) -> KeySpec {
        KeySpec::ALL
    }

    fn flags(&self) -> CommandFlags {
        CommandFlags::READONLY | CommandFlags::FAST
    }

    fn reply_merge(&self) -> ReplyMerge {
        ReplyMerge::SumIntegers
    }
}

/// TYPE command
///
/// Syntax: TYPE key
pub struct TypeCommand;

impl Command for TypeCommand {
    fn execute(&self, ctx: &mut CommandContext<'_>, args: &[Bytes]) -> RespValue {
        let name = ctx
            .store
            .get(&args[0])
            .map(|value| value.type_name())
            .unwrap_or("none");
        RespValue::simple_string(name)
    }

    fn name(&self) -> &'static str {
        "TYPE"
    }

    fn min_args(&self) -> usize {
        1
    }

    fn max_args(&self) -> Option<usize> {
        Some(1)
    }

    fn flags(&self) -> CommandFlags {
        CommandFlags::READONLY | CommandFlags::FAST
    }
}
