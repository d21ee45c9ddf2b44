//! Shards and the shard set
//!
//! The keyspace is split across a fixed number of shards, each running in its
//! own thread and owning its data and lock table outright. Everything else
//! talks to a shard by submitting closures through `EngineShardSet`.

mod engine_shard;
mod lock_table;
mod router;

pub use engine_shard::{Acquire, EngineShard, ShardHandle, ShardStats, ShardTask};
pub(crate) use engine_shard::unix_time_ms;
pub use lock_table::{LockStatus, LockTable};
pub use router::ShardRouter;

use crate::config::InitOpts;
use crate::error::ShardError;
use bytes::Bytes;
use futures::future::{try_join_all, BoxFuture, FutureExt};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::oneshot;
use tracing::info;

/// Logical database number selected with SELECT
pub type DbIndex = u16;

/// Position of a shard in the shard set
pub type ShardId = usize;

/// Process-wide transaction identifier
pub type TxId = u64;

static NEXT_TXID: AtomicU64 = AtomicU64::new(1);

/// Allocate a fresh transaction id; ids are never reused
pub fn next_txid() -> TxId {
    NEXT_TXID.fetch_add(1, Ordering::Relaxed)
}

/// Reply of a closure dispatched to a shard.
///
/// The closure is enqueued when `dispatch` is called, not when the reply is
/// first polled, so several replies can be joined concurrently.
pub type ShardReply<R> = BoxFuture<'static, Result<R, ShardError>>;

/// Owns all shards and routes work to them
pub struct EngineShardSet {
    shards: Vec<ShardHandle>,
    router: ShardRouter,
    num_databases: usize,
}

impl EngineShardSet {
    /// Create a shard set of `size` shards; no thread runs until `init`
    pub fn new(size: usize, num_databases: usize) -> Self {
        EngineShardSet {
            shards: Vec::with_capacity(size),
            router: ShardRouter::new(size),
            num_databases,
        }
    }

    /// Start one worker thread per shard
    pub fn init(&mut self, opts: &InitOpts) -> anyhow::Result<()> {
        if !self.shards.is_empty() {
            anyhow::bail!("shard set already initialized");
        }

        let size = self.size();
        info!("Initializing shard set with {} shards", size);

        for shard_id in 0..size {
            let handle = ShardHandle::spawn(shard_id, self.num_databases, !opts.disable_time_update)?;
            self.shards.push(handle);
        }

        info!("Shard set initialized with {} shards", size);
        Ok(())
    }

    /// Number of shards; fixed for the lifetime of the set
    pub fn size(&self) -> usize {
        self.router.num_shards()
    }

    pub fn num_databases(&self) -> usize {
        self.num_databases
    }

    pub fn is_running(&self) -> bool {
        !self.shards.is_empty()
    }

    /// The shard owning `key` in database `db`
    pub fn partition_for(&self, db: DbIndex, key: &[u8]) -> ShardId {
        self.router.route_key(db, key)
    }

    /// Enqueue a task on a shard without waiting for it
    pub fn submit(&self, shard: ShardId, task: ShardTask) -> Result<(), ShardError> {
        if shard >= self.size() {
            return Err(ShardError::NoSuchShard(shard));
        }
        match self.shards.get(shard) {
            Some(handle) => handle.submit(task),
            None => Err(ShardError::NotRunning(shard)),
        }
    }

    /// Run `f` on a shard's thread and get its result back
    pub fn dispatch<R, F>(&self, shard: ShardId, f: F) -> ShardReply<R>
    where
        F: FnOnce(&mut EngineShard) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let task: ShardTask = Box::new(move |engine: &mut EngineShard| {
            let _ = tx.send(f(engine));
        });

        let submitted = self.submit(shard, task);
        async move {
            submitted?;
            rx.await.map_err(|_| ShardError::Unresponsive(shard))
        }
        .boxed()
    }

    /// Run `f` on every shard and collect the results in shard order
    pub async fn run_on_all<R, F>(&self, f: F) -> Result<Vec<R>, ShardError>
    where
        F: Fn(&mut EngineShard) -> R + Clone + Send + 'static,
        R: Send + 'static,
    {
        try_join_all((0..self.size()).map(|shard| self.dispatch(shard, f.clone()))).await
    }

    /// Whether a transaction currently holds `key` of database `db`
    pub async fn is_locked(&self, db: DbIndex, key: Bytes) -> Result<bool, ShardError> {
        let shard = self.partition_for(db, &key);
        self.dispatch(shard, move |engine| engine.is_locked(db, &key)).await
    }

    /// Set every shard's cached clock; used when periodic updates are off
    pub async fn set_time(&self, now_ms: u64) -> Result<(), ShardError> {
        self.run_on_all(move |engine| engine.set_time(now_ms)).await?;
        Ok(())
    }

    /// Statistics of every shard
    pub async fn stats(&self) -> Result<Vec<ShardStats>, ShardError> {
        self.run_on_all(|engine| engine.stats()).await
    }

    /// Stop every shard after its queued work has run
    pub async fn shutdown(&self) {
        for handle in &self.shards {
            handle.stop().await;
        }
        info!("All {} shards stopped", self.shards.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn running_set(size: usize) -> EngineShardSet {
        let mut set = EngineShardSet::new(size, 16);
        set.init(&InitOpts {
            disable_time_update: true,
        })
        .unwrap();
        set
    }

    #[test]
    fn test_txids_are_unique() {
        let a = next_txid();
        let b = next_txid();
        assert!(b > a);
    }

    #[tokio::test]
    async fn test_dispatch_before_init() {
        let set = EngineShardSet::new(2, 16);
        assert_eq!(set.dispatch(0, |e| e.id()).await, Err(ShardError::NotRunning(0)));
        assert_eq!(set.dispatch(5, |e| e.id()).await, Err(ShardError::NoSuchShard(5)));
    }

    #[tokio::test]
    async fn test_dispatch_runs_on_target_shard() {
        let set = running_set(4);

        for shard in 0..4 {
            assert_eq!(set.dispatch(shard, |e| e.id()).await, Ok(shard));
        }

        let ids = set.run_on_all(|e| e.id()).await.unwrap();
        assert_eq!(ids, vec![0, 1, 2, 3]);

        set.shutdown().await;
        assert_eq!(set.dispatch(0, |e| e.id()).await, Err(ShardError::NotRunning(0)));
    }

    #[tokio::test]
    async fn test_init_twice_fails() {
        let mut set = running_set(1);
        assert!(set.init(&InitOpts::default()).is_err());
        set.shutdown().await;
    }

    #[tokio::test]
    async fn test_set_time_reaches_every_shard() {
        let set = running_set(3);
        set.set_time(42_000).await.unwrap();

        let clocks = set.run_on_all(|e| e.now_ms()).await.unwrap();
        assert_eq!(clocks, vec![42_000; 3]);
        set.shutdown().await;
    }

    #[tokio::test]
    async fn test_partition_is_stable() {
        let set = EngineShardSet::new(8, 16);
        let shard = set.partition_for(0, b"user:1");
        assert!(shard < 8);
        assert_eq!(shard, set.partition_for(0, b"user:1"));
    }
}
