//! Memcache text-protocol command representation
//!
//! The memcache parser lives outside the core; it hands over already
//! tokenized commands in this shape.

use bytes::Bytes;

/// Memcache verbs understood by the core
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum McCommandType {
    Set,
    Add,
    Replace,
    Append,
    Prepend,
    Get,
    Gets,
    Delete,
    Incr,
    Decr,
    Quit,
    Version,
}

impl McCommandType {
    /// Storage verbs carry a data block after the command line
    pub fn is_store(&self) -> bool {
        matches!(
            self,
            McCommandType::Set
                | McCommandType::Add
                | McCommandType::Replace
                | McCommandType::Append
                | McCommandType::Prepend
        )
    }
}

/// A tokenized memcache command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct McCommand {
    pub cmd_type: McCommandType,

    /// First key of the command
    pub key: Bytes,

    /// Additional keys for multi-key retrieval (`get a b c`)
    pub keys_ext: Vec<Bytes>,

    /// Client flags stored alongside the value (not interpreted)
    pub flags: u32,

    /// Expiration in seconds; 0 means no expiry
    pub expire_ts: u32,

    /// Delta for incr/decr
    pub delta: u64,

    /// Suppress the reply
    pub no_reply: bool,
}

impl McCommand {
    pub fn new(cmd_type: McCommandType, key: impl Into<Bytes>) -> Self {
        McCommand {
            cmd_type,
            key: key.into(),
            keys_ext: Vec::new(),
            flags: 0,
            expire_ts: 0,
            delta: 0,
            no_reply: false,
        }
    }

    /// All keys in command order
    pub fn keys(&self) -> impl Iterator<Item = &Bytes> {
        std::iter::once(&self.key).chain(self.keys_ext.iter())
    }
}
