//! String commands (SET, GET, APPEND, PREPEND, STRLEN, MSET, MGET)

use super::{parse_i64, parse_xx, reply, Command, CommandContext, CommandFlags, KeySpec, ReplyMerge};
use crate::error::CommandError;
use crate::protocol::RespValue;
use crate::store::Value;
use bytes::{Bytes, BytesMut};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SetCondition {
    Always,
    IfMissing,
    IfExists,
}

/// Parsed trailing options of SET
#[derive(Debug, PartialEq, Eq)]
struct SetOptions {
    condition: SetCondition,
    expire_ms: Option<u64>,
}

fn parse_set_options(opts: &[Bytes]) -> Result<SetOptions, CommandError> {
    let mut parsed = SetOptions {
        condition: SetCondition::Always,
        expire_ms: None,
    };

    let mut i = 0;
    while i < opts.len() {
        let opt = String::from_utf8_lossy(&opts[i]).to_ascii_uppercase();
        match opt.as_str() {
            "NX" | "XX" => {
                if parsed.condition != SetCondition::Always {
                    return Err(CommandError::Syntax);
                }
                parsed.condition = if opt == "NX" {
                    SetCondition::IfMissing
                } else {
                    SetCondition::IfExists
                };
            }
            "EX" | "PX" => {
                let raw = opts.get(i + 1).ok_or(CommandError::Syntax)?;
                if parsed.expire_ms.is_some() {
                    return Err(CommandError::Syntax);
                }
                let amount = parse_i64(raw)?;
                if amount <= 0 {
                    return Err(CommandError::InvalidExpire("set".to_string()));
                }
                let ms = if opt == "EX" {
                    (amount as u64).checked_mul(1000)
                } else {
                    Some(amount as u64)
                };
                parsed.expire_ms = Some(ms.ok_or(CommandError::InvalidExpire("set".to_string()))?);
                i += 1;
            }
            _ => return Err(CommandError::Syntax),
        }
        i += 1;
    }

    Ok(parsed)
}

/// SET command - Set a key to a value
///
/// Syntax: SET key value [NX|XX] [EX seconds|PX milliseconds]
pub struct SetCommand;

impl SetCommand {
    fn run(ctx: &mut CommandContext<'_>, args: &[Bytes]) -> Result<RespValue, CommandError> {
        let key = &args[0];
        let options = parse_set_options(&args[2..])?;

        let exists = ctx.store.exists(key);
        let allowed = match options.condition {
            SetCondition::Always => true,
            SetCondition::IfMissing => !exists,
            SetCondition::IfExists => exists,
        };
        if !allowed {
            return Ok(RespValue::null());
        }

        let value = Value::String(args[1].clone());
        match options.expire_ms {
            Some(ms) => {
                let at = ctx.now_ms().saturating_add(ms);
                ctx.store.set_with_expiry(key.clone(), value, at);
            }
            None => {
                ctx.store.set(key.clone(), value);
            }
        }
        Ok(RespValue::ok())
    }
}

impl Command for SetCommand {
    fn execute(&self, ctx: &mut CommandContext<'_>, args: &[Bytes]) -> RespValue {
        reply(Self::run(ctx, args))
    }

    fn name(&self) -> &'static str {
        "SET"
    }

    fn min_args(&self) -> usize {
        2
    }

    fn flags(&self) -> CommandFlags {
        CommandFlags::WRITE
    }
}

/// GET command - Get the value of a key
///
/// Syntax: GET key
pub struct GetCommand;

impl Command for GetCommand {
    fn execute(&self, ctx: &mut CommandContext<'_>, args: &[Bytes]) -> RespValue {
        match ctx.store.get(&args[0]) {
            Some(Value::String(bytes)) => RespValue::bulk_string(bytes.clone()),
            Some(_) => CommandError::WrongType.into(),
            None => RespValue::null(),
        }
    }

    fn name(&self) -> &'static str {
        "GET"
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

/// Concatenate onto an existing string; returns the new length.
///
/// A missing key is created unless the call ends with `XX`, in which case
/// nothing is written and the reply is null.
fn extend_string(
    ctx: &mut CommandContext<'_>,
    args: &[Bytes],
    at_front: bool,
) -> Result<RespValue, CommandError> {
    let (key, piece) = (&args[0], &args[1]);
    let only_existing = parse_xx(args.get(2))?;

    let current = match ctx.store.get(key) {
        Some(Value::String(existing)) => existing.clone(),
        Some(_) => return Err(CommandError::WrongType),
        None if only_existing => return Ok(RespValue::Null),
        None => Bytes::new(),
    };

    let mut joined = BytesMut::with_capacity(current.len() + piece.len());
    if at_front {
        joined.extend_from_slice(piece);
        joined.extend_from_slice(&current);
    } else {
        joined.extend_from_slice(&current);
        joined.extend_from_slice(piece);
    }
    let len = joined.len() as i64;

    // Keep any expiry already set on the key
    match ctx.store.get_mut(key) {
        Some(slot) => *slot = Value::String(joined.freeze()),
        None => {
            ctx.store.set(key.clone(), Value::String(joined.freeze()));
        }
    }
    Ok(RespValue::integer(len))
}

/// APPEND command
///
/// Syntax: APPEND key value [XX]
pub struct AppendCommand;

impl Command for AppendCommand {
    fn execute(&self, ctx: &mut CommandContext<'_>, args: &[Bytes]) -> RespValue {
        reply(extend_string(ctx, args, false))
    }

    fn name(&self) -> &'static str {
        "APPEND"
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

/// PREPEND command (memcache `prepend`)
///
/// Syntax: PREPEND key value [XX]
pub struct PrependCommand;

impl Command for PrependCommand {
    fn execute(&self, ctx: &mut CommandContext<'_>, args: &[Bytes]) -> RespValue {
        reply(extend_string(ctx, args, true))
    }

    fn name(&self) -> &'static str {
        "PREPEND"
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

/// STRLEN command
///
/// Syntax: STRLEN key
pub struct StrLenCommand;

impl Command for StrLenCommand {
    fn execute(&self, ctx: &mut CommandContext<'_>, args: &[Bytes]) -> RespValue {
        match ctx.store.get(&args[0]) {
            Some(Value::String(bytes)) => RespValue::integer(bytes.len() as i64),
            Some(_) => CommandError::WrongType.into(),
            None => RespValue::integer(0),
        }
    }

    fn name(&self) -> &'static str {
        "STRLEN"
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

/// MSET command - Set several keys at once
///
/// Syntax: MSET key value [key value ...]
pub struct MSetCommand;

impl Command for MSetCommand {
    fn execute(&self, ctx: &mut CommandContext<'_>, args: &[Bytes]) -> RespValue {
        if args.len() % 2 != 0 {
            return CommandError::WrongArity("mset".to_string()).into();
        }
        for pair in args.chunks(2) {
            ctx.store.set(pair[0].clone(), Value::String(pair[1].clone()));
        }
        RespValue::ok()
    }

    fn name(&self) -> &'static str {
        "MSET"
    }

    fn min_args(&self) -> usize {
        2
    }

    fn key_spec(&self) -> KeySpec {
        KeySpec::PAIRS
    }

    fn flags(&self) -> CommandFlags {
        CommandFlags::WRITE
    }

    fn reply_merge(&self) -> ReplyMerge {
        ReplyMerge::AllOk
    }
}

/// MGET command - Get several keys at once
///
/// Syntax: MGET key [key ...]
pub struct MGetCommand;

impl Command for MGetCommand {
    fn execute(&self, ctx: &mut CommandContext<'_>, args: &[Bytes]) -> RespValue {
        let values = args
            .iter()
            .map(|key| match ctx.store.get(key) {
                Some(Value::String(bytes)) => RespValue::bulk_string(bytes.clone()),
                _ => RespValue::null(),
            })
            .collect();
        RespValue::array(values)
    }

    fn name(&self) -> &'static str {
        "MGET"
    }

    fn min_args(&self) -> usize {
        1
    }

    fn key_spec(&self) -> KeySpec {
        KeySpec::ALL
    }

    fn reply_merge(&self) -> ReplyMerge {
        ReplyMerge::KeyOrderArray
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
    fn test_set_get() {
        let mut store = MemoryStore::new();
        let mut ctx = CommandContext::new(&mut store, 0);

        let result = SetCommand.execute(&mut ctx, &[b("mykey"), b("myvalue")]);
        assert_eq!(result, RespValue::ok());

        let result = GetCommand.execute(&mut ctx, &[b("mykey")]);
        assert_eq!(result, RespValue::bulk_string("myvalue"));
    }

    #[test]
    fn test_get_nonexistent() {
        let mut store = MemoryStore::new();
        let mut ctx = CommandContext::new(&mut store, 0);

        assert_eq!(GetCommand.execute(&mut ctx, &[b("nonexistent")]), RespValue::null());
    }

    #[test]
    fn test_set_nx_xx() {
        let mut store = MemoryStore::new();
        let mut ctx = CommandContext::new(&mut store, 0);

        assert_eq!(SetCommand.execute(&mut ctx, &[b("k"), b("1"), b("XX")]), RespValue::null());
        assert_eq!(SetCommand.execute(&mut ctx, &[b("k"), b("1"), b("NX")]), RespValue::ok());
        assert_eq!(SetCommand.execute(&mut ctx, &[b("k"), b("2"), b("nx")]), RespValue::null());
        assert_eq!(GetCommand.execute(&mut ctx, &[b("k")]), RespValue::bulk_string("1"));
    }

    #[test]
    fn test_set_with_expiry_uses_shard_clock() {
        let mut store = MemoryStore::new();
        store.set_time(10_000);
        let mut ctx = CommandContext::new(&mut store, 0);

        assert_eq!(SetCommand.execute(&mut ctx, &[b("k"), b("v"), b("EX"), b("2")]), RespValue::ok());
        assert_eq!(ctx.store.ttl_ms(&b("k")), 2_000);

        ctx.store.set_time(12_000);
        assert_eq!(GetCommand.execute(&mut ctx, &[b("k")]), RespValue::null());
    }

    #[test]
    fn test_set_rejects_bad_options() {
        let mut store = MemoryStore::new();
        let mut ctx = CommandContext::new(&mut store, 0);

        assert!(SetCommand.execute(&mut ctx, &[b("k"), b("v"), b("EX")]).is_error());
        assert!(SetCommand.execute(&mut ctx, &[b("k"), b("v"), b("EX"), b("0")]).is_error());
        assert!(SetCommand.execute(&mut ctx, &[b("k"), b("v"), b("NX"), b("XX")]).is_error());
        assert!(SetCommand.execute(&mut ctx, &[b("k"), b("v"), b("BOGUS")]).is_error());
    }

    #[test]
    fn test_append_prepend() {
        let mut store = MemoryStore::new();
        let mut ctx = CommandContext::new(&mut store, 0);

        assert_eq!(AppendCommand.execute(&mut ctx, &[b("k"), b("bc")]), RespValue::integer(2));
        assert_eq!(PrependCommand.execute(&mut ctx, &[b("k"), b("a")]), RespValue::integer(3));
        assert_eq!(GetCommand.execute(&mut ctx, &[b("k")]), RespValue::bulk_string("abc"));
        assert_eq!(StrLenCommand.execute(&mut ctx, &[b("k")]), RespValue::integer(3));
    }

    #[test]
    fn test_append_xx_requires_existing_key() {
        let mut store = MemoryStore::new();
        let mut ctx = CommandContext::new(&mut store, 0);

        assert_eq!(AppendCommand.execute(&mut ctx, &[b("k"), b("x"), b("XX")]), RespValue::null());
        assert!(!ctx.store.exists(&b("k")));

        SetCommand.execute(&mut ctx, &[b("k"), b("ab")]);
        assert_eq!(PrependCommand.execute(&mut ctx, &[b("k"), b("_"), b("xx")]), RespValue::integer(3));
        assert!(AppendCommand.execute(&mut ctx, &[b("k"), b("x"), b("NX")]).is_error());
    }

    #[test]
    fn test_wrong_type() {
        let mut store = MemoryStore::new();
        store.set("list", Value::empty_list());
        let mut ctx = CommandContext::new(&mut store, 0);

        let result = GetCommand.execute(&mut ctx, &[b("list")]);
        assert_eq!(result, RespValue::from(CommandError::WrongType));
    }

    #[test]
    fn test_mset_mget() {
        let mut store = MemoryStore::new();
        let mut ctx = CommandContext::new(&mut store, 0);

        assert_eq!(
            MSetCommand.execute(&mut ctx, &[b("a"), b("1"), b("b"), b("2")]),
            RespValue::ok()
        );
        assert_eq!(
            MGetCommand.execute(&mut ctx, &[b("a"), b("missing"), b("b")]),
            RespValue::array(vec![
                RespValue::bulk_string("1"),
                RespValue::null(),
                RespValue::bulk_string("2"),
            ])
        );
    }
}
