//! Splitting commands into per-shard work

use crate::commands::CommandDescriptor;
use crate::error::CommandError;
use crate::protocol::RespValue;
use crate::shard::{DbIndex, EngineShardSet, ShardId};
use bytes::Bytes;
use std::collections::BTreeMap;
use std::sync::Arc;

/// The part of a command that runs on one shard
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardSlice {
    pub shard: ShardId,

    /// Argument list for this shard, command name first
    pub args: Vec<Bytes>,

    /// Keys this slice touches, deduplicated
    pub keys: Vec<Bytes>,

    /// Ordinals of the key groups carried by this slice
    pub ordinals: Vec<usize>,
}

/// A validated command together with the shards it needs
#[derive(Debug, Clone)]
pub struct CommandPlan {
    pub descriptor: Arc<CommandDescriptor>,

    /// One slice per shard, ascending by shard id
    pub slices: Vec<ShardSlice>,

    /// Number of key groups in the original call
    pub total_keys: usize,
}

impl CommandPlan {
    /// Resolve the keys of a call and split it by owning shard.
    ///
    /// Keyless commands run on shard 0. For a command whose keys land on
    /// several shards every slice keeps the arguments before the first key
    /// and after the last key group, plus the key groups of its own shard.
    pub fn new(
        descriptor: Arc<CommandDescriptor>,
        args: &[Bytes],
        db: DbIndex,
        shards: &EngineShardSet,
    ) -> Result<Self, CommandError> {
        let spec = descriptor.key_spec;
        let positions = spec.key_positions(args)?;

        if positions.is_empty() {
            let slices = vec![ShardSlice {
                shard: 0,
                args: args.to_vec(),
                keys: Vec::new(),
                ordinals: Vec::new(),
            }];
            return Ok(CommandPlan {
                descriptor,
                slices,
                total_keys: 0,
            });
        }

        let step = spec.step.max(1);
        let tail_start = spec.tail_start(&positions);
        let mut by_shard: BTreeMap<ShardId, ShardSlice> = BTreeMap::new();

        for (ordinal, &pos) in positions.iter().enumerate() {
            let key = &args[pos];
            let shard = shards.partition_for(db, key);
            let slice = by_shard.entry(shard).or_insert_with(|| ShardSlice {
                shard,
                args: args[..spec.first].to_vec(),
                keys: Vec::new(),
                ordinals: Vec::new(),
            });

            slice.args.extend_from_slice(&args[pos..pos + step]);
            if !slice.keys.contains(key) {
                slice.keys.push(key.clone());
            }
            slice.ordinals.push(ordinal);
        }

        let tail = args.get(tail_start..).unwrap_or(&[]);
        let slices = by_shard
            .into_values()
            .map(|mut slice| {
                slice.args.extend_from_slice(tail);
                slice
            })
            .collect();

        Ok(CommandPlan {
            descriptor,
            slices,
            total_keys: positions.len(),
        })
    }

    pub fn is_single_shard(&self) -> bool {
        self.slices.len() == 1
    }

    pub fn shards(&self) -> impl Iterator<Item = ShardId> + '_ {
        self.slices.iter().map(|slice| slice.shard)
    }

    /// Combine the replies of all slices, given in slice order
    pub fn merge(&self, replies: Vec<RespValue>) -> RespValue {
        let parts = self
            .slices
            .iter()
            .zip(replies)
            .map(|(slice, reply)| (slice.ordinals.clone(), reply))
            .collect();
        self.descriptor.merge.merge(parts, self.total_keys)
    }
}

/// Keys to lock per shard for a set of commands, ascending by shard id.
///
/// Shards reached only by keyless commands appear with an empty key list so
/// the transaction still visits them in lock order.
pub fn lock_plan(plans: &[CommandPlan]) -> BTreeMap<ShardId, Vec<Bytes>> {
    let mut per_shard: BTreeMap<ShardId, Vec<Bytes>> = BTreeMap::new();

    for slice in plans.iter().flat_map(|plan| plan.slices.iter()) {
        let keys = per_shard.entry(slice.shard).or_default();
        for key in &slice.keys {
            if !keys.contains(key) {
                keys.push(key.clone());
            }
        }
    }
    per_shard
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::CommandRegistry;

    fn args(parts: &[&str]) -> Vec<Bytes> {
        parts.iter().map(|p| Bytes::from(p.to_string())).collect()
    }

    /// Find a key owned by `shard`
    fn key_on(shards: &EngineShardSet, shard: ShardId, prefix: &str) -> String {
        (0..)
            .map(|i| format!("{}{}", prefix, i))
            .find(|key| shards.partition_for(0, key.as_bytes()) == shard)
            .unwrap()
    }

    #[test]
    fn test_single_key_plan() {
        let registry = CommandRegistry::new();
        let shards = EngineShardSet::new(4, 16);
        let call = args(&["SET", "k", "v", "EX", "10"]);

        let plan = CommandPlan::new(registry.lookup(b"SET").unwrap(), &call, 0, &shards).unwrap();
        assert!(plan.is_single_shard());
        assert_eq!(plan.slices[0].shard, shards.partition_for(0, b"k"));
        assert_eq!(plan.slices[0].args, call);
        assert_eq!(plan.slices[0].keys, args(&["k"]));
    }

    #[test]
    fn test_keyless_plan_runs_on_shard_zero() {
        let registry = CommandRegistry::new();
        let shards = EngineShardSet::new(4, 16);

        let plan = CommandPlan::new(registry.lookup(b"PING").unwrap(), &args(&["PING"]), 0, &shards)
            .unwrap();
        assert_eq!(plan.shards().collect::<Vec<_>>(), vec![0]);
        assert!(plan.slices[0].keys.is_empty());
    }

    #[test]
    fn test_mset_split_by_shard() {
        let registry = CommandRegistry::new();
        let shards = EngineShardSet::new(2, 16);
        let a = key_on(&shards, 0, "a");
        let b = key_on(&shards, 1, "b");
        let c = key_on(&shards, 0, "c");

        let call = args(&["MSET", &a, "1", &b, "2", &c, "3"]);
        let plan = CommandPlan::new(registry.lookup(b"MSET").unwrap(), &call, 0, &shards).unwrap();

        assert_eq!(plan.slices.len(), 2);
        assert_eq!(plan.slices[0].args, args(&["MSET", &a, "1", &c, "3"]));
        assert_eq!(plan.slices[0].ordinals, vec![0, 2]);
        assert_eq!(plan.slices[1].args, args(&["MSET", &b, "2"]));
        assert_eq!(plan.slices[1].ordinals, vec![1]);
        assert_eq!(plan.total_keys, 3);
    }

    #[test]
    fn test_merge_restores_key_order() {
        let registry = CommandRegistry::new();
        let shards = EngineShardSet::new(2, 16);
        let a = key_on(&shards, 1, "a");
        let b = key_on(&shards, 0, "b");

        let plan = CommandPlan::new(
            registry.lookup(b"MGET").unwrap(),
            &args(&["MGET", &a, &b]),
            0,
            &shards,
        )
        .unwrap();

        let merged = plan.merge(vec![
            RespValue::array(vec![RespValue::bulk_string("from-0")]),
            RespValue::array(vec![RespValue::bulk_string("from-1")]),
        ]);
        assert_eq!(
            merged,
            RespValue::array(vec![
                RespValue::bulk_string("from-1"),
                RespValue::bulk_string("from-0"),
            ])
        );
    }

    #[test]
    fn test_lock_plan_dedups_and_orders() {
        let registry = CommandRegistry::new();
        let shards = EngineShardSet::new(2, 16);
        let a = key_on(&shards, 1, "a");
        let b = key_on(&shards, 0, "b");

        let plans = vec![
            CommandPlan::new(registry.lookup(b"SET").unwrap(), &args(&["SET", &a, "1"]), 0, &shards)
                .unwrap(),
            CommandPlan::new(registry.lookup(b"DEL").unwrap(), &args(&["DEL", &a, &b, &a]), 0, &shards)
                .unwrap(),
        ];

        let locks = lock_plan(&plans);
        assert_eq!(locks.keys().copied().collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(locks[&0], args(&[&b]));
        assert_eq!(locks[&1], args(&[&a]));
    }

    #[test]
    fn test_odd_mset_is_rejected() {
        let registry = CommandRegistry::new();
        let shards = EngineShardSet::new(2, 16);
        let result = CommandPlan::new(
            registry.lookup(b"MSET").unwrap(),
            &args(&["MSET", "a", "1", "b"]),
            0,
            &shards,
        );
        assert!(result.is_err());
    }
}
