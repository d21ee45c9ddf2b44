//! Command execution context

use crate::shard::DbIndex;
use crate::store::MemoryStore;

/// What a command body may touch while it runs on a shard.
///
/// Built by the owning shard for the database selected by the connection;
/// commands never see other shards or other databases.
pub struct CommandContext<'a> {
    pub store: &'a mut MemoryStore,

    pub db: DbIndex,
}

impl<'a> CommandContext<'a> {
    pub fn new(store: &'a mut MemoryStore, db: DbIndex) -> Self {
        CommandContext { store, db }
    }

    /// The shard's cached wall clock in milliseconds
    pub fn now_ms(&self) -> u64 {
        self.store.now_ms()
    }
}
