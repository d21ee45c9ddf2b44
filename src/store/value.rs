//! Value types for the key-value store

use bytes::Bytes;
use std::collections::VecDeque;

/// Represents the different kinds of values a key can hold
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// String value (binary-safe); counters are stored as decimal strings
    String(Bytes),

    /// List of values (ordered)
    List(VecDeque<Bytes>),
}

impl Value {
    /// Create a string value
    pub fn string(bytes: impl Into<Bytes>) -> Self {
        Value::String(bytes.into())
    }

    /// Create an empty list
    pub fn empty_list() -> Self {
        Value::List(VecDeque::new())
    }

    /// Type name as reported by TYPE
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::String(_) => "string",
            Value::List(_) => "list",
        }
    }

    /// Try to get as string bytes
    pub fn as_string(&self) -> Option<&Bytes> {
        match self {
            Value::String(b) => Some(b),
            _ => None,
        }
    }

    /// Try to get as list reference
    pub fn as_list(&self) -> Option<&VecDeque<Bytes>> {
        match self {
            Value::List(list) => Some(list),
            _ => None,
        }
    }

    /// Try to get as mutable list
    pub fn as_list_mut(&mut self) -> Option<&mut VecDeque<Bytes>> {
        match self {
            Value::List(list) => Some(list),
            _ => None,
        }
    }

    /// Calculate approximate memory usage in bytes
    pub fn memory_usage(&self) -> usize {
        match self {
            Value::String(bytes) => bytes.len(),
            Value::List(list) => {
                let items_size: usize = list.iter().map(|b| b.len()).sum();
                items_size + std::mem::size_of::<VecDeque<Bytes>>()
            }
        }
    }
}
