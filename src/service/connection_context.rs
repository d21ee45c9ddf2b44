//! Per-connection state seen by the service

use crate::protocol::RespValue;
use crate::shard::DbIndex;
use crate::transaction::{Transaction, TxState};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Where replies for a connection go
pub trait ReplySink: Send {
    fn send_reply(&mut self, reply: RespValue);
}

/// Collects replies in memory
impl ReplySink for Vec<RespValue> {
    fn send_reply(&mut self, reply: RespValue) {
        self.push(reply);
    }
}

/// Forwards replies to a writer task
impl ReplySink for mpsc::UnboundedSender<RespValue> {
    fn send_reply(&mut self, reply: RespValue) {
        // The writer only goes away together with the connection
        let _ = self.send(reply);
    }
}

/// State owned by one client connection.
///
/// Only the connection's own task touches it; the service borrows it for the
/// duration of one command.
pub struct ConnectionContext<S: ReplySink = Vec<RespValue>> {
    db_index: DbIndex,
    transaction: Option<Transaction>,
    sink: S,
    cancel: CancellationToken,

    /// Set by QUIT; nothing is replied after that
    closing: bool,
}

impl ConnectionContext<Vec<RespValue>> {
    pub fn new() -> Self {
        Self::with_sink(Vec::new())
    }

    /// Take the replies collected so far
    pub fn take_replies(&mut self) -> Vec<RespValue> {
        std::mem::take(&mut self.sink)
    }
}

impl Default for ConnectionContext<Vec<RespValue>> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: ReplySink> ConnectionContext<S> {
    pub fn with_sink(sink: S) -> Self {
        ConnectionContext {
            db_index: 0,
            transaction: None,
            sink,
            cancel: CancellationToken::new(),
            closing: false,
        }
    }

    pub fn db_index(&self) -> DbIndex {
        self.db_index
    }

    pub(crate) fn set_db_index(&mut self, db: DbIndex) {
        self.db_index = db;
    }

    pub fn in_multi(&self) -> bool {
        self.transaction.is_some()
    }

    /// State of the open transaction, `None` outside MULTI
    pub fn tx_state(&self) -> TxState {
        self.transaction
            .as_ref()
            .map(|tx| tx.state())
            .unwrap_or(TxState::None)
    }

    pub fn transaction(&self) -> Option<&Transaction> {
        self.transaction.as_ref()
    }

    pub(crate) fn transaction_mut(&mut self) -> Option<&mut Transaction> {
        self.transaction.as_mut()
    }

    pub(crate) fn begin_transaction(&mut self) {
        self.transaction = Some(Transaction::new());
    }

    pub(crate) fn take_transaction(&mut self) -> Option<Transaction> {
        self.transaction.take()
    }

    /// Token cancelled when the client goes away
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Abort whatever the connection is currently running
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_closing(&self) -> bool {
        self.closing
    }

    pub(crate) fn mark_closing(&mut self) {
        self.closing = true;
    }

    pub fn reply(&mut self, reply: RespValue) {
        self.sink.send_reply(reply);
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cntx = ConnectionContext::new();
        assert_eq!(cntx.db_index(), 0);
        assert_eq!(cntx.tx_state(), TxState::None);
        assert!(!cntx.is_closing());
        assert!(!cntx.cancellation_token().is_cancelled());
    }

    #[test]
    fn test_replies_are_collected_in_order() {
        let mut cntx = ConnectionContext::new();
        cntx.reply(RespValue::ok());
        cntx.reply(RespValue::integer(1));

        assert_eq!(cntx.take_replies(), vec![RespValue::ok(), RespValue::integer(1)]);
        assert!(cntx.sink().is_empty());
    }

    #[tokio::test]
    async fn test_channel_sink() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut cntx = ConnectionContext::with_sink(tx);
        cntx.reply(RespValue::simple_string("PONG"));

        assert_eq!(rx.recv().await, Some(RespValue::simple_string("PONG")));
    }
}
