//! In-memory storage module
//!
//! Shard-local data structures. Nothing here is synchronized: every instance
//! is owned by exactly one shard worker.

mod entry;
mod value;
mod memory;
mod db_slice;

pub use entry::Entry;
pub use value::Value;
pub use memory::{MemoryStore, StoreStats};
pub use db_slice::DbSlice;
