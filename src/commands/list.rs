//! List commands (LPUSH, RPUSH, LLEN, LRANGE)

use super::{parse_i64, reply, Command, CommandContext, CommandFlags};
use crate::error::CommandError;
use crate::protocol::RespValue;
use crate::store::Value;
use bytes::Bytes;

fn push(
    ctx: &mut CommandContext<'_>,
    key: &Bytes,
    items: &[Bytes],
    at_head: bool,
) -> Result<RespValue, CommandError> {
    if !ctx.store.exists(key) {
        ctx.store.set(key.clone(), Value::empty_list());
    }

    let list = ctx
        .store
        .get_mut(key)
        .and_then(|value| value.as_list_mut())
        .ok_or(CommandError::WrongType)?;

    for item in items {
        if at_head {
            list.push_front(item.clone());
        } else {
            list.push_back(item.clone());
        }
    }
    Ok(RespValue::integer(list.len() as i64))
}

/// LPUSH command - Prepend values to a list
///
/// Syntax: LPUSH key element [element ...]
pub struct LPushCommand;

impl Command for LPushCommand {
    fn execute(&self, ctx: &mut CommandContext<'_>, args: &[Bytes]) -> RespValue {
        reply(push(ctx, &args[0], &args[1..], true))
    }

    fn name(&self) -> &'static str {
        "LPUSH"
    }

    fn min_args(&self) -> usize {
        2
    }

    fn flags(&self) -> CommandFlags {
        CommandFlags::WRITE | CommandFlags::FAST
    }
}

/// RPUSH command - Append values to a list
///
/// Syntax: RPUSH key element [element ...]
pub struct RPushCommand;

impl Command for RPushCommand {
    fn execute(&self, ctx: &mut CommandContext<'_>, args: &[Bytes]) -> RespValue {
        reply(push(ctx, &args[0], &args[1..], false))
    }

    fn name(&self) -> &'static str {
        "RPUSH"
    }

    fn min_args(&self) -> usize {
        2
    }

    fn flags(&self) -> CommandFlags {
        CommandFlags::WRITE | CommandFlags::FAST
    }
}

/// LLEN command
///
/// Syntax: LLEN key
pub struct LLenCommand;

impl Command for LLenCommand {
    fn execute(&self, ctx: &mut CommandContext<'_>, args: &[Bytes]) -> RespValue {
        match ctx.store.get(&args[0]) {
            Some(Value::List(list)) => RespValue::integer(list.len() as i64),
            Some(_) => CommandError::WrongType.into(),
            None => RespValue::integer(0),
        }
    }

    fn name(&self) -> &'static str {
        "LLEN"
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

/// LRANGE command
///
/// Syntax: LRANGE key start stop
pub struct LRangeCommand;

impl LRangeCommand {
    fn run(ctx: &mut CommandContext<'_>, args: &[Bytes]) -> Result<RespValue, CommandError> {
        let start = parse_i64(&args[1])?;
        let stop = parse_i64(&args[2])?;

        let list = match ctx.store.get(&args[0]) {
            Some(Value::List(list)) => list,
            Some(_) => return Err(CommandError::WrongType),
            None => return Ok(RespValue::array(Vec::new())),
        };

        let len = list.len() as i64;
        let start = if start < 0 { (len + start).max(0) } else { start };
        let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };

        if start > stop || start >= len {
            return Ok(RespValue::array(Vec::new()));
        }

        let items = list
            .iter()
            .skip(start as usize)
            .take((stop - start + 1) as usize)
            .map(|item| RespValue::bulk_string(item.clone()))
            .collect();
        Ok(RespValue::array(items))
    }
}

impl Command for LRangeCommand {
    fn execute(&self, ctx: &mut CommandContext<'_>, args: &[Bytes]) -> RespValue {
        reply(Self::run(ctx, args))
    }

    fn name(&self) -> &'static str {
        "LRANGE"
    }

    fn min_args(&self) -> usize {
        3
    }

    fn max_args(&self) -> Option<usize> {
        Some(3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn b(s: &str) -> Bytes {
        Bytes::from(s.to_string())
    }

    #[test]
    fn test_push_and_range() {
        let mut store = MemoryStore::new();
        let mut ctx = CommandContext::new(&mut store, 0);

        assert_eq!(RPushCommand.execute(&mut ctx, &[b("l"), b("b"), b("c")]), RespValue::integer(2));
        assert_eq!(LPushCommand.execute(&mut ctx, &[b("l"), b("a")]), RespValue::integer(3));
        assert_eq!(LLenCommand.execute(&mut ctx, &[b("l")]), RespValue::integer(3));

        assert_eq!(
            LRangeCommand.execute(&mut ctx, &[b("l"), b("0"), b("-1")]),
            RespValue::array(vec![
                RespValue::bulk_string("a"),
                RespValue::bulk_string("b"),
                RespValue::bulk_string("c"),
            ])
        );
        assert_eq!(
            LRangeCommand.execute(&mut ctx, &[b("l"), b("-2"), b("10")]),
            RespValue::array(vec![RespValue::bulk_string("b"), RespValue::bulk_string("c")])
        );
        assert_eq!(
            LRangeCommand.execute(&mut ctx, &[b("l"), b("5"), b("10")]),
            RespValue::array(vec![])
        );
    }

    #[test]
    fn test_push_onto_string_is_wrong_type() {
        let mut store = MemoryStore::new();
        store.set("s", Value::string("v"));
        let mut ctx = CommandContext::new(&mut store, 0);

        assert_eq!(
            LPushCommand.execute(&mut ctx, &[b("s"), b("x")]),
            RespValue::from(CommandError::WrongType)
        );
    }
}
