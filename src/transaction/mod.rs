//! MULTI/EXEC transactions
//!
//! A `Transaction` is the per-connection buffer filled between MULTI and
//! EXEC. `plan` turns commands into per-shard work and `coordinator` runs
//! that work under the lock / execute / unlock protocol.

mod coordinator;
mod plan;

pub use coordinator::TransactionCoordinator;
pub use plan::{lock_plan, CommandPlan, ShardSlice};

use crate::commands::CommandDescriptor;
use crate::shard::ShardId;
use bytes::Bytes;
use std::sync::Arc;

/// Lifecycle of a transaction
///
/// NONE -> QUEUEING -> SCHEDULED -> EXECUTING -> DONE, or ABORTED from any
/// state after QUEUEING.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TxState {
    #[default]
    None,
    Queueing,
    Scheduled,
    Executing,
    Done,
    Aborted,
}

/// A command accepted between MULTI and EXEC
#[derive(Debug, Clone)]
pub struct QueuedCommand {
    pub descriptor: Arc<CommandDescriptor>,

    /// Full argument list, command name first
    pub args: Vec<Bytes>,
}

#[derive(Debug, Default)]
pub struct Transaction {
    state: TxState,
    queued: Vec<QueuedCommand>,

    /// Shards touched by the transaction, ascending; known before any lock is taken
    shards: Vec<ShardId>,
}

impl Transaction {
    /// A transaction opened by MULTI
    pub fn new() -> Self {
        Transaction {
            state: TxState::Queueing,
            ..Default::default()
        }
    }

    /// A transaction wrapping a single command issued outside MULTI
    pub fn implicit(descriptor: Arc<CommandDescriptor>, args: Vec<Bytes>) -> Self {
        Transaction {
            state: TxState::Queueing,
            queued: vec![QueuedCommand { descriptor, args }],
            ..Default::default()
        }
    }

    pub fn state(&self) -> TxState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: TxState) {
        self.state = state;
    }

    pub fn queue(&mut self, descriptor: Arc<CommandDescriptor>, args: Vec<Bytes>) {
        self.queued.push(QueuedCommand { descriptor, args });
    }

    pub fn len(&self) -> usize {
        self.queued.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queued.is_empty()
    }

    pub fn commands(&self) -> &[QueuedCommand] {
        &self.queued
    }

    pub fn shards(&self) -> &[ShardId] {
        &self.shards
    }

    pub(crate) fn set_shards(&mut self, shards: Vec<ShardId>) {
        self.shards = shards;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::CommandRegistry;

    #[test]
    fn test_new_transaction_is_queueing() {
        let tx = Transaction::new();
        assert_eq!(tx.state(), TxState::Queueing);
        assert!(tx.is_empty());
        assert_eq!(Transaction::default().state(), TxState::None);
    }

    #[test]
    fn test_queue_keeps_order() {
        let registry = CommandRegistry::new();
        let mut tx = Transaction::new();

        tx.queue(registry.lookup(b"SET").unwrap(), vec!["SET".into(), "a".into(), "1".into()]);
        tx.queue(registry.lookup(b"GET").unwrap(), vec!["GET".into(), "a".into()]);

        let names: Vec<_> = tx.commands().iter().map(|c| c.descriptor.name).collect();
        assert_eq!(names, vec!["SET", "GET"]);
    }
}
