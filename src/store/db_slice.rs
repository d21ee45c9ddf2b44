//! The part of every logical database owned by one shard

use super::memory::{MemoryStore, StoreStats};
use crate::shard::DbIndex;

/// One `MemoryStore` per logical database, created on first use.
pub struct DbSlice {
    dbs: Vec<Option<MemoryStore>>,
    now_ms: u64,
}

impl DbSlice {
    pub fn new(num_databases: usize) -> Self {
        DbSlice {
            dbs: (0..num_databases).map(|_| None).collect(),
            now_ms: 0,
        }
    }

    pub fn num_databases(&self) -> usize {
        self.dbs.len()
    }

    /// Advance the cached clock of every database
    pub fn set_time(&mut self, now_ms: u64) {
        self.now_ms = now_ms;
        for store in self.dbs.iter_mut().flatten() {
            store.set_time(now_ms);
        }
    }

    pub fn now_ms(&self) -> u64 {
        self.now_ms
    }

    /// Mutable access to a database, creating it on first touch.
    ///
    /// Callers validate `db` against `num_databases` before reaching a shard.
    pub fn db_mut(&mut self, db: DbIndex) -> &mut MemoryStore {
        let idx = db as usize;
        if idx >= self.dbs.len() {
            self.dbs.resize_with(idx + 1, || None);
        }

        let now_ms = self.now_ms;
        self.dbs[idx].get_or_insert_with(|| {
            let mut store = MemoryStore::with_capacity(256);
            store.set_time(now_ms);
            store
        })
    }

    /// Statistics summed over all databases of this shard
    pub fn stats(&self) -> StoreStats {
        let mut total = StoreStats::default();
        for store in self.dbs.iter().flatten() {
            total.merge(&store.stats());
        }
        total
    }

    /// Number of keys held for one database
    pub fn db_size(&self, db: DbIndex) -> usize {
        self.dbs
            .get(db as usize)
            .and_then(|s| s.as_ref())
            .map(|s| s.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Value;
    use bytes::Bytes;

    #[test]
    fn test_databases_are_independent() {
        let mut slice = DbSlice::new(4);
        slice.db_mut(0).set("k", Value::string("zero"));
        slice.db_mut(1).set("k", Value::string("one"));

        assert_eq!(
            slice.db_mut(1).get(&Bytes::from("k")).and_then(|v| v.as_string()).cloned(),
            Some(Bytes::from("one"))
        );
        assert_eq!(slice.db_size(0), 1);
        assert_eq!(slice.db_size(2), 0);
    }

    #[test]
    fn test_new_database_inherits_clock() {
        let mut slice = DbSlice::new(2);
        slice.set_time(5_000);
        assert_eq!(slice.db_mut(1).now_ms(), 5_000);
    }
}
