//! Expiry commands (EXPIRE, PEXPIRE, TTL, PTTL, PERSIST)
//!
//! All arithmetic is against the shard's cached clock, so expiry behaves
//! deterministically when periodic time updates are disabled.

use super::{parse_i64, reply, Command, CommandContext, CommandFlags};
use crate::error::CommandError;
use crate::protocol::RespValue;
use bytes::Bytes;

fn expire_in(
    ctx: &mut CommandContext<'_>,
    key: &Bytes,
    amount: &Bytes,
    unit_ms: i64,
    name: &str,
) -> Result<RespValue, CommandError> {
    let amount = parse_i64(amount)?;
    let delta_ms = amount
        .checked_mul(unit_ms)
        .ok_or_else(|| CommandError::InvalidExpire(name.to_string()))?;

    if delta_ms <= 0 {
        // An expiry in the past deletes the key right away
        return Ok(RespValue::integer(ctx.store.delete(key) as i64));
    }

    let at = ctx.now_ms().saturating_add(delta_ms as u64);
    Ok(RespValue::integer(ctx.store.expire_at(key, at) as i64))
}

/// EXPIRE command - Set a key's time to live in seconds
///
/// Syntax: EXPIRE key seconds
pub struct ExpireCommand;

impl Command for ExpireCommand {
    fn execute(&self, ctx: &mut CommandContext<'_>, args: &[Bytes]) -> RespValue {
        reply(expire_in(ctx, &args[0], &args[1], 1000, "expire"))
    }

    fn name(&self) -> &'static str {
        "EXPIRE"
    }

    fn min_args(&self) -> usize {
        2
    }

    fn max_args(&self) -> Option<usize> {
        Some(2)
    }

    fn flags(&self) -> CommandFlags {
        CommandFlags::WRITE | CommandFlags::FAST
    }
}

/// PEXPIRE command - Set a key's time to live in milliseconds
///
/// Syntax: PEXPIRE key milliseconds
pub struct PExpireCommand;

impl Command for PExpireCommand {
    fn execute(&self, ctx: &mut CommandContext<'_>, args: &[Bytes]) -> RespValue {
        reply(expire_in(ctx, &args[0], &args[1], 1, "pexpire"))
    }

    fn name(&self) -> &'static str {
        "PEXPIRE"
    }

    fn min_args(&self) -> usize {
        2
    }

    fn max_args(&self) -> Option<usize> {
        Some(2)
    }

    fn flags(&self) -> CommandFlags {
        CommandFlags::WRITE | CommandFlags::FAST
    }
}

/// TTL command - Remaining time to live in seconds
///
/// Syntax: TTL key
pub struct TtlCommand;

impl Command for TtlCommand {
    fn execute(&self, ctx: &mut CommandContext<'_>, args: &[Bytes]) -> RespValue {
        let ttl = ctx.store.ttl_ms(&args[0]);
        if ttl < 0 {
            return RespValue::integer(ttl);
        }
        // Round up like Redis does for a partially elapsed second
        RespValue::integer((ttl + 999) / 1000)
    }

    fn name(&self) -> &'static str {
        "TTL"
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

/// PTTL command - Remaining time to live in milliseconds
///
/// Syntax: PTTL key
pub struct PTtlCommand;

impl Command for PTtlCommand {
    fn execute(&self, ctx: &mut CommandContext<'_>, args: &[Bytes]) -> RespValue {
        RespValue::integer(ctx.store.ttl_ms(&args[0]))
    }

    fn name(&self) -> &'static str {
        "PTTL"
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

/// PERSIST command - Remove the expiry of a key
///
/// Syntax: PERSIST key
pub struct PersistCommand;

impl Command for PersistCommand {
    fn execute(&self, ctx: &mut CommandContext<'_>, args: &[Bytes]) -> RespValue {
        RespValue::integer(ctx.store.persist(&args[0]) as i64)
    }

    fn name(&self) -> &'static str {
        "PERSIST"
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
