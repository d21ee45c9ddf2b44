//! Per-shard key lock table
//!
//! Exclusive locks with a FIFO queue of waiting transactions per key. An
//! entry exists only while some transaction holds or awaits the key.

use super::{DbIndex, TxId};
use crate::error::LockError;
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};

type LockKey = (DbIndex, Bytes);

#[derive(Debug)]
struct LockEntry {
    holder: TxId,
    waiters: VecDeque<TxId>,
}

/// Result of a lock attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockStatus {
    Granted,
    Pending,
}

#[derive(Debug, Default)]
pub struct LockTable {
    locks: HashMap<LockKey, LockEntry>,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Grant the key to `txid` if it is free, otherwise queue `txid` behind
    /// the current holder and earlier waiters.
    ///
    /// Re-locking a key already held by `txid` is granted again.
    pub fn try_lock(&mut self, db: DbIndex, key: &Bytes, txid: TxId) -> LockStatus {
        match self.locks.get_mut(&(db, key.clone())) {
            Some(entry) if entry.holder == txid => LockStatus::Granted,
            Some(entry) => {
                if !entry.waiters.contains(&txid) {
                    entry.waiters.push_back(txid);
                }
                LockStatus::Pending
            }
            None => {
                self.locks.insert(
                    (db, key.clone()),
                    LockEntry {
                        holder: txid,
                        waiters: VecDeque::new(),
                    },
                );
                LockStatus::Granted
            }
        }
    }

    /// Release a key held by `txid`.
    ///
    /// Returns the transaction the key was handed to, if any waiter was queued.
    pub fn unlock(&mut self, db: DbIndex, key: &Bytes, txid: TxId) -> Result<Option<TxId>, LockError> {
        let lock_key = (db, key.clone());
        let entry = match self.locks.get_mut(&lock_key) {
            Some(entry) if entry.holder == txid => entry,
            _ => return Err(LockError::NotHolder { txid }),
        };

        match entry.waiters.pop_front() {
            Some(next) => {
                entry.holder = next;
                Ok(Some(next))
            }
            None => {
                self.locks.remove(&lock_key);
                Ok(None)
            }
        }
    }

    /// Withdraw `txid` from the waiter queue of a key. Returns false if it was not waiting.
    pub fn cancel_wait(&mut self, db: DbIndex, key: &Bytes, txid: TxId) -> bool {
        match self.locks.get_mut(&(db, key.clone())) {
            Some(entry) => {
                let before = entry.waiters.len();
                entry.waiters.retain(|&waiter| waiter != txid);
                entry.waiters.len() != before
            }
            None => false,
        }
    }

    pub fn is_locked(&self, db: DbIndex, key: &Bytes) -> bool {
        self.locks.contains_key(&(db, key.clone()))
    }

    pub fn holder(&self, db: DbIndex, key: &Bytes) -> Option<TxId> {
        self.locks.get(&(db, key.clone())).map(|entry| entry.holder)
    }

    /// Number of waiters queued on a key
    pub fn queue_len(&self, db: DbIndex, key: &Bytes) -> usize {
        self.locks
            .get(&(db, key.clone()))
            .map(|entry| entry.waiters.len())
            .unwrap_or(0)
    }

    /// Number of keys currently locked
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> Bytes {
        Bytes::from(s.to_string())
    }

    #[test]
    fn test_grant_and_release() {
        let mut table = LockTable::new();

        assert_eq!(table.try_lock(0, &key("a"), 1), LockStatus::Granted);
        assert!(table.is_locked(0, &key("a")));
        assert!(!table.is_locked(1, &key("a")));

        assert_eq!(table.unlock(0, &key("a"), 1), Ok(None));
        assert!(!table.is_locked(0, &key("a")));
        assert!(table.is_empty());
    }

    #[test]
    fn test_waiters_are_fifo() {
        let mut table = LockTable::new();

        assert_eq!(table.try_lock(0, &key("a"), 1), LockStatus::Granted);
        assert_eq!(table.try_lock(0, &key("a"), 2), LockStatus::Pending);
        assert_eq!(table.try_lock(0, &key("a"), 3), LockStatus::Pending);
        assert_eq!(table.queue_len(0, &key("a")), 2);

        assert_eq!(table.unlock(0, &key("a"), 1), Ok(Some(2)));
        assert_eq!(table.holder(0, &key("a")), Some(2));
        assert_eq!(table.unlock(0, &key("a"), 2), Ok(Some(3)));
        assert_eq!(table.unlock(0, &key("a"), 3), Ok(None));
        assert!(table.is_empty());
    }

    #[test]
    fn test_relock_by_holder_is_granted() {
        let mut table = LockTable::new();
        assert_eq!(table.try_lock(0, &key("a"), 7), LockStatus::Granted);
        assert_eq!(table.try_lock(0, &key("a"), 7), LockStatus::Granted);
        assert_eq!(table.queue_len(0, &key("a")), 0);
    }

    #[test]
    fn test_unlock_by_non_holder_is_an_error() {
        let mut table = LockTable::new();
        assert_eq!(table.unlock(0, &key("a"), 1), Err(LockError::NotHolder { txid: 1 }));

        table.try_lock(0, &key("a"), 1);
        table.try_lock(0, &key("a"), 2);
        assert_eq!(table.unlock(0, &key("a"), 2), Err(LockError::NotHolder { txid: 2 }));
        assert_eq!(table.holder(0, &key("a")), Some(1));
    }

    #[test]
    fn test_cancel_wait() {
        let mut table = LockTable::new();
        table.try_lock(0, &key("a"), 1);
        table.try_lock(0, &key("a"), 2);

        assert!(table.cancel_wait(0, &key("a"), 2));
        assert!(!table.cancel_wait(0, &key("a"), 2));
        assert_eq!(table.unlock(0, &key("a"), 1), Ok(None));
        assert!(table.is_empty());
    }
}
