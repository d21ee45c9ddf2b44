//! Lock / execute / unlock protocol across shards
//!
//! Locks are taken shard by shard in ascending `ShardId` order and the grant
//! of each shard is awaited before the next shard is asked, so two
//! transactions can never wait on each other in a cycle. Within a shard all
//! keys of a transaction are enqueued by one task, which keeps the per-key
//! FIFO queues consistent with each other.

use super::plan::{lock_plan, CommandPlan};
use super::{Transaction, TxState};
use crate::commands::CommandDescriptor;
use crate::error::{LockError, ShardError, TxError};
use crate::protocol::RespValue;
use crate::shard::{
    next_txid, Acquire, DbIndex, EngineShard, EngineShardSet, ShardId, ShardReply, TxId,
};
use bytes::Bytes;
use futures::future::{join_all, try_join_all};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Runs transactions for one connection against the shard set
pub struct TransactionCoordinator<'a> {
    shards: &'a EngineShardSet,
    db: DbIndex,
    cancel: &'a CancellationToken,
}

impl<'a> TransactionCoordinator<'a> {
    pub fn new(shards: &'a EngineShardSet, db: DbIndex, cancel: &'a CancellationToken) -> Self {
        TransactionCoordinator { shards, db, cancel }
    }

    fn check_cancelled(&self, txid: TxId) -> Result<(), TxError> {
        if self.cancel.is_cancelled() {
            return Err(TxError::Aborted(txid));
        }
        Ok(())
    }

    /// Execute every command of `tx` atomically and in order.
    ///
    /// Returns one reply per command. On error nothing the transaction wrote
    /// stays visible and every lock it held or awaited is gone.
    pub async fn execute(
        &self,
        tx: &mut Transaction,
        plans: Vec<CommandPlan>,
    ) -> Result<Vec<RespValue>, TxError> {
        let txid = next_txid();
        let locks = lock_plan(&plans);
        tx.set_shards(locks.keys().copied().collect());
        tx.set_state(TxState::Scheduled);

        debug!(
            "tx {}: {} command(s) over shards {:?}",
            txid,
            plans.len(),
            tx.shards()
        );

        if let Err(e) = self.check_cancelled(txid) {
            tx.set_state(TxState::Aborted);
            return Err(e);
        }

        let mut guard = ShardLocks::new(self.shards, txid, self.db);
        let result = self.run_locked(txid, tx, &plans, locks, &mut guard).await;

        match result {
            Ok(replies) => {
                guard.finish(false).await?;
                tx.set_state(TxState::Done);
                Ok(replies)
            }
            Err(e) => {
                if let TxError::Aborted(_) = e {
                    debug!("tx {}: aborted, rolling back", txid);
                } else {
                    error!("tx {}: {}", txid, e);
                }
                tx.set_state(TxState::Aborted);
                if let Err(release_err) = guard.finish(true).await {
                    error!("tx {}: release after failure: {}", txid, release_err);
                }
                Err(e)
            }
        }
    }

    async fn run_locked(
        &self,
        txid: TxId,
        tx: &mut Transaction,
        plans: &[CommandPlan],
        locks: BTreeMap<ShardId, Vec<Bytes>>,
        guard: &mut ShardLocks<'_>,
    ) -> Result<Vec<RespValue>, TxError> {
        for (shard, keys) in locks {
            guard.track(shard, keys.clone());
            self.acquire_on(txid, shard, keys).await?;
        }

        self.check_cancelled(txid)?;
        tx.set_state(TxState::Executing);

        let mut replies = Vec::with_capacity(plans.len());
        for plan in plans {
            self.check_cancelled(txid)?;
            replies.push(self.execute_plan(txid, plan).await?);
        }

        self.check_cancelled(txid)?;
        Ok(replies)
    }

    async fn acquire_on(&self, txid: TxId, shard: ShardId, keys: Vec<Bytes>) -> Result<(), TxError> {
        let db = self.db;
        let reply = self
            .shards
            .dispatch(shard, move |engine| engine.acquire(txid, db, &keys));

        let acquired = tokio::select! {
            acquired = reply => acquired??,
            _ = self.cancel.cancelled() => return Err(TxError::Aborted(txid)),
        };

        if let Acquire::Pending(granted) = acquired {
            debug!("tx {}: waiting for locks on shard {}", txid, shard);
            tokio::select! {
                result = granted => result.map_err(|_| ShardError::Unresponsive(shard))?,
                _ = self.cancel.cancelled() => return Err(TxError::Aborted(txid)),
            }
        }
        Ok(())
    }

    /// Run one command; slices on different shards run concurrently
    async fn execute_plan(&self, txid: TxId, plan: &CommandPlan) -> Result<RespValue, TxError> {
        let db = self.db;
        let replies: Vec<ShardReply<RespValue>> = plan
            .slices
            .iter()
            .map(|slice| {
                let descriptor: Arc<CommandDescriptor> = plan.descriptor.clone();
                let args = slice.args.clone();
                self.shards.dispatch(slice.shard, move |engine| {
                    engine.execute_in_tx(txid, db, &descriptor, &args)
                })
            })
            .collect();

        // Slices still in flight run before the rollback queued behind them
        let results = tokio::select! {
            results = try_join_all(replies) => results?,
            _ = self.cancel.cancelled() => return Err(TxError::Aborted(txid)),
        };
        Ok(plan.merge(results))
    }
}

/// Shards a transaction has asked for locks on.
///
/// Dropping it while still armed (the coordinator future was cancelled
/// mid-flight) rolls back and releases everything without waiting.
struct ShardLocks<'a> {
    shards: &'a EngineShardSet,
    txid: TxId,
    db: DbIndex,
    held: Vec<(ShardId, Vec<Bytes>)>,
    armed: bool,
}

impl<'a> ShardLocks<'a> {
    fn new(shards: &'a EngineShardSet, txid: TxId, db: DbIndex) -> Self {
        ShardLocks {
            shards,
            txid,
            db,
            held: Vec::new(),
            armed: true,
        }
    }

    fn track(&mut self, shard: ShardId, keys: Vec<Bytes>) {
        self.held.push((shard, keys));
    }

    /// Commit or roll back on every tracked shard and release the locks
    async fn finish(&mut self, rollback: bool) -> Result<(), TxError> {
        self.armed = false;
        let (txid, db, shards) = (self.txid, self.db, self.shards);

        let replies: Vec<ShardReply<Result<(), LockError>>> = self
            .held
            .drain(..)
            .map(|(shard, keys)| {
                shards
                    .dispatch(shard, move |engine| engine.release(txid, db, &keys, rollback))
            })
            .collect();

        let mut outcome = Ok(());
        for reply in join_all(replies).await {
            match reply {
                Ok(Ok(())) => {}
                Ok(Err(e)) => outcome = Err(TxError::Lock(e)),
                Err(e) => outcome = Err(TxError::Shard(e)),
            }
        }
        outcome
    }
}

impl Drop for ShardLocks<'_> {
    fn drop(&mut self) {
        if !self.armed || self.held.is_empty() {
            return;
        }

        warn!("tx {}: dropped while holding locks, releasing", self.txid);
        let (txid, db) = (self.txid, self.db);
        for (shard, keys) in self.held.drain(..) {
            let submitted = self.shards.submit(
                shard,
                Box::new(move |engine: &mut EngineShard| {
                    if let Err(e) = engine.release(txid, db, &keys, true) {
                        error!("tx {}: release on drop failed: {}", txid, e);
                    }
                }),
            );
            if let Err(e) = submitted {
                error!("tx {}: {}", txid, e);
            }
        }
    }
}
