//! Static command metadata: key positions, flags and reply merging

use crate::error::CommandError;
use crate::protocol::RespValue;
use bytes::Bytes;
use std::ops::BitOr;

/// Where the keys of a command sit in its argument list.
///
/// Positions count the command name as 0. `first == 0` marks a keyless
/// command, a negative `last` counts from the end (`-1` is the last
/// argument) and `step` is the distance between consecutive keys, which is
/// also the width of the argument group that travels with each key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeySpec {
    pub first: usize,
    pub last: isize,
    pub step: usize,
}

impl KeySpec {
    pub const NONE: KeySpec = KeySpec { first: 0, last: 0, step: 0 };

    /// `CMD key ...`
    pub const SINGLE: KeySpec = KeySpec { first: 1, last: 1, step: 1 };

    /// `CMD key [key ...]`
    pub const ALL: KeySpec = KeySpec { first: 1, last: -1, step: 1 };

    /// `CMD key value [key value ...]`
    pub const PAIRS: KeySpec = KeySpec { first: 1, last: -1, step: 2 };

    pub fn is_keyless(&self) -> bool {
        self.first == 0
    }

    /// Whether this layout can name more than one key
    pub fn is_multi_key(&self) -> bool {
        !self.is_keyless() && (self.last < 0 || self.last as usize > self.first)
    }

    /// Argument positions of every key, in argument order.
    ///
    /// `args` includes the command name. Fails when the key groups do not fit
    /// the argument list (for example an odd number of arguments to MSET).
    pub fn key_positions(&self, args: &[Bytes]) -> Result<Vec<usize>, CommandError> {
        if self.is_keyless() {
            return Ok(Vec::new());
        }

        let argc = args.len() as isize;
        let last = if self.last < 0 { argc + self.last } else { self.last };
        let name = || String::from_utf8_lossy(&args[0]).to_lowercase();

        if last < self.first as isize || last >= argc {
            return Err(CommandError::WrongArity(name()));
        }

        let step = self.step.max(1);
        let positions: Vec<usize> = (self.first..=last as usize).step_by(step).collect();

        match positions.last() {
            Some(&p) if p + step <= args.len() => Ok(positions),
            _ => Err(CommandError::WrongArity(name())),
        }
    }

    /// Index of the first argument after the key region
    pub fn tail_start(&self, positions: &[usize]) -> usize {
        positions
            .last()
            .map(|p| p + self.step.max(1))
            .unwrap_or(self.first)
    }
}

/// Behavioral flags of a command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CommandFlags(u32);

impl CommandFlags {
    pub const EMPTY: CommandFlags = CommandFlags(0);
    /// Mutates the keyspace
    pub const WRITE: CommandFlags = CommandFlags(1);
    /// Only reads the keyspace
    pub const READONLY: CommandFlags = CommandFlags(1 << 1);
    /// O(1) command
    pub const FAST: CommandFlags = CommandFlags(1 << 2);
    /// Handled by the service itself (MULTI, EXEC, DISCARD, QUIT, SELECT)
    pub const CONTROL: CommandFlags = CommandFlags(1 << 3);
    /// Rejected while a transaction is queueing
    pub const NO_MULTI: CommandFlags = CommandFlags(1 << 4);

    pub fn contains(self, other: CommandFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_write(self) -> bool {
        self.contains(CommandFlags::WRITE)
    }
}

impl BitOr for CommandFlags {
    type Output = CommandFlags;

    fn bitor(self, rhs: CommandFlags) -> CommandFlags {
        CommandFlags(self.0 | rhs.0)
    }
}

/// How to combine the per-shard replies of a command whose keys span shards
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyMerge {
    /// The command never spans shards
    Single,
    /// Add up integer replies (DEL, EXISTS)
    SumIntegers,
    /// `+OK` when every shard said OK (MSET)
    AllOk,
    /// Reassemble array elements in original key order (MGET)
    KeyOrderArray,
}

impl ReplyMerge {
    /// Merge shard replies.
    ///
    /// Each part carries the ordinals of the keys the shard handled; the
    /// first error reply wins.
    pub fn merge(&self, parts: Vec<(Vec<usize>, RespValue)>, total_keys: usize) -> RespValue {
        if let Some((_, err)) = parts.iter().find(|(_, reply)| reply.is_error()) {
            return err.clone();
        }

        match self {
            ReplyMerge::Single => parts
                .into_iter()
                .next()
                .map(|(_, reply)| reply)
                .unwrap_or(RespValue::Null),
            ReplyMerge::SumIntegers => RespValue::integer(
                parts
                    .iter()
                    .filter_map(|(_, reply)| reply.as_integer())
                    .sum(),
            ),
            ReplyMerge::AllOk => RespValue::ok(),
            ReplyMerge::KeyOrderArray => {
                let mut merged = vec![RespValue::Null; total_keys];
                for (ordinals, reply) in parts {
                    if let RespValue::Array(values) = reply {
                        for (ordinal, value) in ordinals.into_iter().zip(values) {
                            if let Some(slot) = merged.get_mut(ordinal) {
                                *slot = value;
                            }
                        }
                    }
                }
                RespValue::Array(merged)
            }
        }
    }
}
