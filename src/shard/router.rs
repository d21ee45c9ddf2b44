//! Key routing logic for sharding
//!
//! Maps `(DbIndex, key)` to a shard with SipHash-1-3 modulo the shard count.
//! The hasher uses fixed keys, so the mapping is identical for every caller
//! for the whole life of the process.

use super::{DbIndex, ShardId};
use siphasher::sip::SipHasher13;
use std::hash::Hasher;

/// Routes keys to shards
#[derive(Debug, Clone)]
pub struct ShardRouter {
    num_shards: usize,
}

impl ShardRouter {
    /// Create a new shard router
    pub fn new(num_shards: usize) -> Self {
        assert!(num_shards > 0, "Number of shards must be > 0");
        ShardRouter { num_shards }
    }

    /// Route a key of a database to a shard ID
    pub fn route_key(&self, db: DbIndex, key: &[u8]) -> ShardId {
        let hash = Self::hash_key(db, hash_slot_bytes(key));
        (hash % self.num_shards as u64) as ShardId
    }

    fn hash_key(db: DbIndex, key: &[u8]) -> u64 {
        let mut hasher = SipHasher13::new();
        hasher.write_u16(db);
        hasher.write(key);
        hasher.finish()
    }

    /// Get the number of shards
    pub fn num_shards(&self) -> usize {
        self.num_shards
    }
}

/// The part of a key that decides its shard.
///
/// A non-empty `{tag}` section pins keys sharing the tag to the same shard,
/// as Redis Cluster does with hash tags.
fn hash_slot_bytes(key: &[u8]) -> &[u8] {
    if let Some(open) = key.iter().position(|&b| b == b'{') {
        if let Some(len) = key[open + 1..].iter().position(|&b| b == b'}') {
            if len > 0 {
                return &key[open + 1..open + 1 + len];
            }
        }
    }
    key
}
