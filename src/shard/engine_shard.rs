//! Engine shard
//!
//! Each shard runs in its own thread with a dedicated current-thread runtime
//! and owns its `DbSlice` and `LockTable`. Work arrives as closures over a
//! FIFO channel and runs one at a time, so nothing in here needs locking.

use super::lock_table::{LockStatus, LockTable};
use super::{DbIndex, ShardId, TxId};
use crate::commands::{CommandContext, CommandDescriptor, CommandHandler};
use crate::error::{LockError, ShardError};
use crate::protocol::RespValue;
use crate::store::{DbSlice, Entry};
use bytes::Bytes;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};

/// A unit of work executed on a shard's own thread
pub type ShardTask = Box<dyn FnOnce(&mut EngineShard) + Send + 'static>;

enum ShardMessage {
    Run(ShardTask),
    Stop,
}

/// How often the shard refreshes its cached clock
const TIME_UPDATE_INTERVAL: Duration = Duration::from_millis(1);

pub(crate) fn unix_time_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Outcome of acquiring all keys of one transaction on one shard
#[derive(Debug)]
pub enum Acquire {
    Granted,
    /// Completes once the last outstanding key is handed over
    Pending(oneshot::Receiver<()>),
}

struct PendingAcquire {
    remaining: usize,
    notify: oneshot::Sender<()>,
}

/// Entries as they were before a transaction first wrote to them
struct UndoJournal {
    db: DbIndex,
    saved: Vec<(Bytes, Option<Entry>)>,
    seen: HashSet<Bytes>,
}

#[derive(Debug, Default, Clone, Copy)]
struct ShardCounters {
    tasks_executed: u64,
    commands_executed: u64,
    fast_path: u64,
    lock_grants: u64,
    lock_waits: u64,
    rollbacks: u64,
}

/// Statistics for a single shard
#[derive(Debug, Clone, Serialize)]
pub struct ShardStats {
    pub shard_id: ShardId,
    pub active_keys: usize,
    pub total_keys: usize,
    pub expired_keys: u64,
    pub memory_bytes: usize,
    pub locked_keys: usize,
    pub pending_transactions: usize,
    pub tasks_executed: u64,
    pub commands_executed: u64,
    pub fast_path: u64,
    pub lock_grants: u64,
    pub lock_waits: u64,
    pub rollbacks: u64,
}

/// Shard-local state. Only ever touched from the shard's own thread.
pub struct EngineShard {
    id: ShardId,
    db_slice: DbSlice,
    locks: LockTable,
    pending: HashMap<TxId, PendingAcquire>,
    journals: HashMap<TxId, UndoJournal>,
    counters: ShardCounters,
}

impl EngineShard {
    pub(crate) fn new(id: ShardId, num_databases: usize) -> Self {
        let mut db_slice = DbSlice::new(num_databases);
        db_slice.set_time(unix_time_ms());

        EngineShard {
            id,
            db_slice,
            locks: LockTable::new(),
            pending: HashMap::new(),
            journals: HashMap::new(),
            counters: ShardCounters::default(),
        }
    }

    pub fn id(&self) -> ShardId {
        self.id
    }

    pub fn set_time(&mut self, now_ms: u64) {
        self.db_slice.set_time(now_ms);
    }

    pub fn now_ms(&self) -> u64 {
        self.db_slice.now_ms()
    }

    pub fn db_slice(&mut self) -> &mut DbSlice {
        &mut self.db_slice
    }

    /// Lock one key for `txid`, queueing it behind the holder if taken
    pub fn try_lock(&mut self, db: DbIndex, key: &Bytes, txid: TxId) -> LockStatus {
        let status = self.locks.try_lock(db, key, txid);
        match status {
            LockStatus::Granted => self.counters.lock_grants += 1,
            LockStatus::Pending => self.counters.lock_waits += 1,
        }
        status
    }

    /// Release one key held by `txid` and hand it to the next waiter
    pub fn unlock(&mut self, db: DbIndex, key: &Bytes, txid: TxId) -> Result<(), LockError> {
        if let Some(next) = self.locks.unlock(db, key, txid)? {
            self.counters.lock_grants += 1;
            self.on_granted(next);
        }
        Ok(())
    }

    pub fn is_locked(&self, db: DbIndex, key: &Bytes) -> bool {
        self.locks.is_locked(db, key)
    }

    fn on_granted(&mut self, txid: TxId) {
        let done = match self.pending.get_mut(&txid) {
            Some(pending) => {
                pending.remaining = pending.remaining.saturating_sub(1);
                pending.remaining == 0
            }
            None => false,
        };

        if done {
            if let Some(pending) = self.pending.remove(&txid) {
                debug!("Shard {}: tx {} now holds all its keys", self.id, txid);
                // The coordinator may be gone; its release task follows in the queue.
                let _ = pending.notify.send(());
            }
        }
    }

    /// Lock every key of `txid` on this shard in one step
    pub fn acquire(&mut self, txid: TxId, db: DbIndex, keys: &[Bytes]) -> Result<Acquire, LockError> {
        if self.pending.contains_key(&txid) {
            return Err(LockError::AlreadyQueued { txid });
        }

        let waiting = keys
            .iter()
            .filter(|key| self.try_lock(db, key, txid) == LockStatus::Pending)
            .count();

        if waiting == 0 {
            return Ok(Acquire::Granted);
        }

        debug!("Shard {}: tx {} waits for {} key(s)", self.id, txid, waiting);
        let (notify, granted) = oneshot::channel();
        self.pending.insert(
            txid,
            PendingAcquire {
                remaining: waiting,
                notify,
            },
        );
        Ok(Acquire::Pending(granted))
    }

    /// Finish a transaction on this shard.
    ///
    /// Undoes its writes when `rollback` is set, then releases keys it holds
    /// and withdraws it from queues it still waits in. Every key is visited
    /// even if one of them fails.
    pub fn release(
        &mut self,
        txid: TxId,
        db: DbIndex,
        keys: &[Bytes],
        rollback: bool,
    ) -> Result<(), LockError> {
        if rollback {
            self.rollback(txid);
        } else {
            self.commit(txid);
        }
        self.pending.remove(&txid);

        let mut result = Ok(());
        for key in keys {
            if self.locks.holder(db, key) == Some(txid) {
                if let Err(e) = self.unlock(db, key, txid) {
                    result = Err(e);
                }
            } else if !self.locks.cancel_wait(db, key, txid) {
                error!("Shard {}: tx {} released a key it neither holds nor awaits", self.id, txid);
                result = Err(LockError::NotHolder { txid });
            }
        }
        result
    }

    /// Keep the writes of `txid`; its undo journal is dropped
    pub fn commit(&mut self, txid: TxId) {
        self.journals.remove(&txid);
    }

    /// Restore every entry `txid` overwrote on this shard
    pub fn rollback(&mut self, txid: TxId) {
        if let Some(journal) = self.journals.remove(&txid) {
            debug!(
                "Shard {}: rolling back {} key(s) of tx {}",
                self.id,
                journal.saved.len(),
                txid
            );
            let store = self.db_slice.db_mut(journal.db);
            for (key, entry) in journal.saved.into_iter().rev() {
                store.restore(key, entry);
            }
            self.counters.rollbacks += 1;
        }
    }

    fn journal_keys(&mut self, txid: TxId, db: DbIndex, keys: &[Bytes]) {
        let journal = self.journals.entry(txid).or_insert_with(|| UndoJournal {
            db,
            saved: Vec::new(),
            seen: HashSet::new(),
        });
        let store = self.db_slice.db_mut(db);

        for key in keys {
            if journal.seen.insert(key.clone()) {
                journal.saved.push((key.clone(), store.entry(key)));
            }
        }
    }

    /// Run a command body against `db`; `args` includes the command name
    pub fn execute(&mut self, db: DbIndex, descriptor: &CommandDescriptor, args: &[Bytes]) -> RespValue {
        self.counters.commands_executed += 1;

        let command = match &descriptor.handler {
            CommandHandler::Shard(command) => command,
            CommandHandler::Control(_) => {
                error!("Shard {}: control command {} routed to a shard", self.id, descriptor.name);
                return RespValue::error("ERR internal error");
            }
        };

        let mut ctx = CommandContext::new(self.db_slice.db_mut(db), db);
        command.execute(&mut ctx, &args[1..])
    }

    /// Run a command on behalf of a transaction that holds its keys here
    pub fn execute_in_tx(
        &mut self,
        txid: TxId,
        db: DbIndex,
        descriptor: &CommandDescriptor,
        args: &[Bytes],
    ) -> RespValue {
        if descriptor.is_write() {
            match descriptor.keys_touched(args) {
                Ok(keys) => self.journal_keys(txid, db, &keys),
                Err(e) => return e.into(),
            }
        }
        self.execute(db, descriptor, args)
    }

    /// Run a single-shard command right away unless a transaction holds one of its keys
    pub fn try_execute_unlocked(
        &mut self,
        db: DbIndex,
        descriptor: &CommandDescriptor,
        args: &[Bytes],
        keys: &[Bytes],
    ) -> Option<RespValue> {
        if keys.iter().any(|key| self.locks.is_locked(db, key)) {
            return None;
        }
        self.counters.fast_path += 1;
        Some(self.execute(db, descriptor, args))
    }

    pub fn stats(&self) -> ShardStats {
        let store = self.db_slice.stats();
        ShardStats {
            shard_id: self.id,
            active_keys: store.active_keys,
            total_keys: store.total_keys,
            expired_keys: store.expired_keys,
            memory_bytes: store.used_memory_bytes,
            locked_keys: self.locks.len(),
            pending_transactions: self.pending.len(),
            tasks_executed: self.counters.tasks_executed,
            commands_executed: self.counters.commands_executed,
            fast_path: self.counters.fast_path,
            lock_grants: self.counters.lock_grants,
            lock_waits: self.counters.lock_waits,
            rollbacks: self.counters.rollbacks,
        }
    }
}

/// Sending side of a running shard
pub struct ShardHandle {
    id: ShardId,
    task_tx: mpsc::UnboundedSender<ShardMessage>,
    stopped_rx: Mutex<Option<oneshot::Receiver<()>>>,
}

impl ShardHandle {
    /// Start the shard thread
    pub(crate) fn spawn(id: ShardId, num_databases: usize, time_updates: bool) -> anyhow::Result<Self> {
        info!("Initializing shard {}", id);

        let (task_tx, task_rx) = mpsc::unbounded_channel();
        let (stopped_tx, stopped_rx) = oneshot::channel();

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        std::thread::Builder::new()
            .name(format!("shard-{}", id))
            .spawn(move || {
                let shard = EngineShard::new(id, num_databases);
                runtime.block_on(run_shard_loop(shard, task_rx, time_updates));
                let _ = stopped_tx.send(());
            })?;

        info!("Shard {} started", id);

        Ok(ShardHandle {
            id,
            task_tx,
            stopped_rx: Mutex::new(Some(stopped_rx)),
        })
    }

    pub fn id(&self) -> ShardId {
        self.id
    }

    /// Enqueue a task; tasks run in submission order
    pub fn submit(&self, task: ShardTask) -> Result<(), ShardError> {
        self.task_tx
            .send(ShardMessage::Run(task))
            .map_err(|_| ShardError::NotRunning(self.id))
    }

    /// Ask the shard to stop once everything queued before has run, and wait for it
    pub(crate) async fn stop(&self) {
        if self.task_tx.send(ShardMessage::Stop).is_err() {
            return;
        }

        let stopped = self.stopped_rx.lock().ok().and_then(|mut rx| rx.take());
        if let Some(stopped) = stopped {
            if stopped.await.is_err() {
                error!("Shard {} exited without signalling", self.id);
            }
        }
    }
}

/// The main loop that runs in the shard's thread
async fn run_shard_loop(
    mut shard: EngineShard,
    mut task_rx: mpsc::UnboundedReceiver<ShardMessage>,
    time_updates: bool,
) {
    let shard_id = shard.id;
    info!("Shard {} loop starting (time updates: {})", shard_id, time_updates);

    let mut ticker = tokio::time::interval(TIME_UPDATE_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;

            message = task_rx.recv() => match message {
                Some(ShardMessage::Run(task)) => {
                    shard.counters.tasks_executed += 1;
                    task(&mut shard);
                }
                Some(ShardMessage::Stop) | None => break,
            },

            _ = ticker.tick(), if time_updates => {
                shard.set_time(unix_time_ms());
            }
        }
    }

    if !shard.locks.is_empty() {
        error!("Shard {} stopping with {} key(s) still locked", shard_id, shard.locks.len());
    }
    info!("Shard {} shutting down", shard_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::CommandRegistry;
    use tokio_test::{assert_pending, assert_ready_ok, task};

    fn args(parts: &[&str]) -> Vec<Bytes> {
        parts.iter().map(|p| Bytes::from(p.to_string())).collect()
    }

    #[test]
    fn test_acquire_waits_for_release() {
        let mut shard = EngineShard::new(0, 16);
        let keys = args(&["a", "b"]);

        assert!(matches!(shard.acquire(1, 0, &keys), Ok(Acquire::Granted)));

        let mut granted = match shard.acquire(2, 0, &keys[1..]) {
            Ok(Acquire::Pending(rx)) => task::spawn(rx),
            other => panic!("expected pending, got {:?}", other),
        };
        assert_pending!(granted.poll());

        shard.release(1, 0, &keys, false).unwrap();
        assert!(granted.is_woken());
        assert_ready_ok!(granted.poll());
        assert!(shard.is_locked(0, &keys[1]));
        assert!(!shard.is_locked(0, &keys[0]));

        shard.release(2, 0, &keys[1..], false).unwrap();
        assert_eq!(shard.stats().locked_keys, 0);
    }

    #[test]
    fn test_release_withdraws_waiter() {
        let mut shard = EngineShard::new(0, 16);
        let keys = args(&["a"]);

        shard.acquire(1, 0, &keys).unwrap();
        let _pending = shard.acquire(2, 0, &keys).unwrap();

        // tx 2 gives up before it was granted
        shard.release(2, 0, &keys, true).unwrap();
        shard.release(1, 0, &keys, false).unwrap();

        assert!(!shard.is_locked(0, &keys[0]));
        assert_eq!(shard.stats().pending_transactions, 0);
    }

    #[test]
    fn test_release_of_foreign_key_is_reported() {
        let mut shard = EngineShard::new(0, 16);
        let result = shard.release(9, 0, &args(&["nobody"]), false);
        assert_eq!(result, Err(LockError::NotHolder { txid: 9 }));
    }

    #[test]
    fn test_rollback_restores_previous_values() {
        let registry = CommandRegistry::new();
        let set = registry.lookup(b"SET").unwrap();
        let get = registry.lookup(b"GET").unwrap();
        let mut shard = EngineShard::new(0, 16);

        shard.execute(0, &set, &args(&["SET", "a", "old"]));
        shard.acquire(5, 0, &args(&["a", "b"])).unwrap();
        shard.execute_in_tx(5, 0, &set, &args(&["SET", "a", "new"]));
        shard.execute_in_tx(5, 0, &set, &args(&["SET", "b", "fresh"]));
        shard.execute_in_tx(5, 0, &set, &args(&["SET", "a", "newer"]));

        shard.release(5, 0, &args(&["a", "b"]), true).unwrap();

        assert_eq!(shard.execute(0, &get, &args(&["GET", "a"])), RespValue::bulk_string("old"));
        assert_eq!(shard.execute(0, &get, &args(&["GET", "b"])), RespValue::Null);
        assert_eq!(shard.stats().rollbacks, 1);
    }

    #[test]
    fn test_fast_path_respects_locks() {
        let registry = CommandRegistry::new();
        let set = registry.lookup(b"SET").unwrap();
        let mut shard = EngineShard::new(0, 16);
        let keys = args(&["a"]);

        assert!(shard
            .try_execute_unlocked(0, &set, &args(&["SET", "a", "1"]), &keys)
            .is_some());

        shard.acquire(1, 0, &keys).unwrap();
        assert!(shard
            .try_execute_unlocked(0, &set, &args(&["SET", "a", "2"]), &keys)
            .is_none());
        assert!(shard
            .try_execute_unlocked(1, &set, &args(&["SET", "a", "2"]), &keys)
            .is_some());
    }

    #[tokio::test]
    async fn test_tasks_run_in_submission_order() {
        let handle = ShardHandle::spawn(0, 16, false).unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();

        for i in 0..100 {
            let tx = tx.clone();
            handle
                .submit(Box::new(move |_shard: &mut EngineShard| {
                    let _ = tx.send(i);
                }))
                .unwrap();
        }
        drop(tx);

        let mut seen = Vec::new();
        while let Some(i) = rx.recv().await {
            seen.push(i);
        }
        assert_eq!(seen, (0..100).collect::<Vec<_>>());

        handle.stop().await;
        assert!(handle.submit(Box::new(|_shard: &mut EngineShard| {})).is_err());
    }
}
