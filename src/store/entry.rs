//! Entry structure for key-value pairs

use super::value::Value;

/// A stored value with its optional absolute expiry.
///
/// Expiry is an absolute wall-clock time in milliseconds, compared against
/// the owning shard's cached clock rather than the system clock.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub value: Value,

    /// Absolute expiry in unix milliseconds
    pub expire_at_ms: Option<u64>,
}

impl Entry {
    /// Create a new entry without expiration
    pub fn new(value: Value) -> Self {
        Entry {
            value,
            expire_at_ms: None,
        }
    }

    /// Create a new entry that expires at `expire_at_ms`
    pub fn with_expiry(value: Value, expire_at_ms: u64) -> Self {
        Entry {
            value,
            expire_at_ms: Some(expire_at_ms),
        }
    }

    /// Check whether the entry is expired at `now_ms`
    pub fn is_expired(&self, now_ms: u64) -> bool {
        match self.expire_at_ms {
            Some(at) => now_ms >= at,
            None => false,
        }
    }

    /// Remaining TTL in milliseconds, or -1 when the entry never expires
    pub fn ttl_ms(&self, now_ms: u64) -> i64 {
        match self.expire_at_ms {
            Some(at) => at.saturating_sub(now_ms) as i64,
            None => -1,
        }
    }

    /// Approximate memory usage of the entry (value + metadata)
    pub fn memory_usage(&self) -> usize {
        self.value.memory_usage() + std::mem::size_of::<Option<u64>>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expiry_is_relative_to_given_clock() {
        let entry = Entry::with_expiry(Value::string("v"), 1_000);

        assert!(!entry.is_expired(999));
        assert!(entry.is_expired(1_000));
        assert_eq!(entry.ttl_ms(400), 600);
    }

    #[test]
    fn test_no_expiry() {
        let entry = Entry::new(Value::string("v"));
        assert!(!entry.is_expired(u64::MAX));
        assert_eq!(entry.ttl_ms(0), -1);
    }
}
