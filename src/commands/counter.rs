//! Counter commands (INCR, INCRBY, DECR, DECRBY)

use super::{parse_i64, parse_xx, reply, Command, CommandContext, CommandFlags};
use crate::error::CommandError;
use crate::protocol::RespValue;
use crate::store::Value;
use bytes::Bytes;

/// Add `delta` to the integer stored at `key`.
///
/// Missing keys count as 0, or are left alone with a null reply when
/// `only_existing` is set.
fn incr_by(
    ctx: &mut CommandContext<'_>,
    key: &Bytes,
    delta: i64,
    only_existing: bool,
) -> Result<RespValue, CommandError> {
    let current = match ctx.store.get(key) {
        Some(Value::String(bytes)) => parse_i64(bytes)?,
        Some(_) => return Err(CommandError::WrongType),
        None if only_existing => return Ok(RespValue::Null),
        None => 0,
    };

    let next = current.checked_add(delta).ok_or(CommandError::Overflow)?;
    let encoded = Value::String(Bytes::from(next.to_string()));

    // Overwrite in place so an existing expiry survives
    match ctx.store.get_mut(key) {
        Some(slot) => *slot = encoded,
        None => {
            ctx.store.set(key.clone(), encoded);
        }
    }
    Ok(RespValue::integer(next))
}

/// INCR command - Increment the integer value of a key by 1
///
/// Syntax: INCR key
pub struct IncrCommand;

impl Command for IncrCommand {
    fn execute(&self, ctx: &mut CommandContext<'_>, args: &[Bytes]) -> RespValue {
        reply(incr_by(ctx, &args[0], 1, false))
    }

    fn name(&self) -> &'static str {
        "INCR"
    }

    fn min_args(&self) -> usize {
        1
    }

    fn max_args(&self) -> Option<usize> {
        Some(1)
    }

    fn flags(&self) -> CommandFlags {
        CommandFlags::WRITE | CommandFlags::FAST
    }
}

/// INCRBY command - Increment the integer value of a key by the given amount
///
/// Syntax: INCRBY key increment [XX]
pub struct IncrByCommand;

impl Command for IncrByCommand {
    fn execute(&self, ctx: &mut CommandContext<'_>, args: &[Bytes]) -> RespValue {
        let result = parse_xx(args.get(2)).and_then(|only_existing| {
            let delta = parse_i64(&args[1])?;
            incr_by(ctx, &args[0], delta, only_existing)
        });
        reply(result)
    }

    fn name(&self) -> &'static str {
        "INCRBY"
    }

    fn min_args(&self) -> usize {
        2
    }

    fn max_args(&self) -> Option<usize> {
        Some(3)
    }

    fn flags(&self) -> CommandFlags {
        CommandFlags::WRITE | CommandFlags::FAST
    }
}

/// DECR command - Decrement the integer value of a key by 1
///
/// Syntax: DECR key
pub struct DecrCommand;

impl Command for DecrCommand {
    fn execute(&self, ctx: &mut CommandContext<'_>, args: &[Bytes]) -> RespValue {
        reply(incr_by(ctx, &args[0], -1, false))
    }

    fn name(&self) -> &'static str {
        "DECR"
    }

    fn min_args(&self) -> usize {
        1
    }

    fn max_args(&self) -> Option<usize> {
        Some(1)
    }

    fn flags(&self) -> CommandFlags {
        CommandFlags::WRITE | CommandFlags::FAST
    }
}

/// DECRBY command - Decrement the integer value of a key by the given amount
///
/// Syntax: DECRBY key decrement [XX]
pub struct DecrByCommand;

impl Command for DecrByCommand {
    fn execute(&self, ctx: &mut CommandContext<'_>, args: &[Bytes]) -> RespValue {
        let result = parse_xx(args.get(2)).and_then(|only_existing| {
            let delta = parse_i64(&args[1])?
                .checked_neg()
                .ok_or(CommandError::Overflow)?;
            incr_by(ctx, &args[0], delta, only_existing)
        });
        reply(result)
    }

    fn name(&self) -> &'static str {
        "DECRBY"
    }

    fn min_args(&self) -> usize {
        2
    }

    fn max_args(&self) -> Option<usize> {
        Some(3)
    }

    fn flags(&self) -> CommandFlags {
        CommandFlags::WRITE | CommandFlags::FAST
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
    fn test_incr_from_missing() {
        let mut store = MemoryStore::new();
        let mut ctx = CommandContext::new(&mut store, 0);

        assert_eq!(IncrCommand.execute(&mut ctx, &[b("c")]), RespValue::integer(1));
        assert_eq!(IncrByCommand.execute(&mut ctx, &[b("c"), b("10")]), RespValue::integer(11));
        assert_eq!(DecrCommand.execute(&mut ctx, &[b("c")]), RespValue::integer(10));
        assert_eq!(DecrByCommand.execute(&mut ctx, &[b("c"), b("4")]), RespValue::integer(6));
    }

    #[test]
    fn test_incr_not_integer() {
        let mut store = MemoryStore::new();
        store.set("s", Value::string("abc"));
        let mut ctx = CommandContext::new(&mut store, 0);

        assert_eq!(
            IncrCommand.execute(&mut ctx, &[b("s")]),
            RespValue::from(CommandError::NotInteger)
        );
    }

    #[test]
    fn test_incr_overflow() {
        let mut store = MemoryStore::new();
        store.set("big", Value::string(i64::MAX.to_string()));
        let mut ctx = CommandContext::new(&mut store, 0);

        assert_eq!(
            IncrCommand.execute(&mut ctx, &[b("big")]),
            RespValue::from(CommandError::Overflow)
        );
    }

    #[test]
    fn test_incrby_xx_skips_missing_key() {
        let mut store = MemoryStore::new();
        let mut ctx = CommandContext::new(&mut store, 0);

        assert_eq!(IncrByCommand.execute(&mut ctx, &[b("c"), b("5"), b("XX")]), RespValue::null());
        assert!(!ctx.store.exists(&b("c")));

        IncrCommand.execute(&mut ctx, &[b("c")]);
        assert_eq!(DecrByCommand.execute(&mut ctx, &[b("c"), b("3"), b("XX")]), RespValue::integer(-2));
    }

    #[test]
    fn test_incr_wrong_type() {
        let mut store = MemoryStore::new();
        store.set("l", Value::empty_list());
        let mut ctx = CommandContext::new(&mut store, 0);

        assert!(IncrCommand.execute(&mut ctx, &[b("l")]).is_error());
    }
}
