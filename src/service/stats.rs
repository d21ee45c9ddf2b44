//! Service counters and the varz snapshot

use crate::shard::ShardStats;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// A single varz value
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum VarzValue {
    Num(i64),
    Str(String),
}

impl From<u64> for VarzValue {
    fn from(n: u64) -> Self {
        VarzValue::Num(i64::try_from(n).unwrap_or(i64::MAX))
    }
}

impl From<usize> for VarzValue {
    fn from(n: usize) -> Self {
        VarzValue::from(n as u64)
    }
}

impl From<&str> for VarzValue {
    fn from(s: &str) -> Self {
        VarzValue::Str(s.to_string())
    }
}

/// Ordered name/value pairs as returned by `Service::varz_stats`
pub type Varz = Vec<(String, VarzValue)>;

/// Render a varz snapshot as a JSON object
pub fn varz_json(varz: &[(String, VarzValue)]) -> serde_json::Value {
    let map = varz
        .iter()
        .map(|(name, value)| (name.clone(), serde_json::json!(value)))
        .collect::<serde_json::Map<_, _>>();
    serde_json::Value::Object(map)
}

#[derive(Debug, Default)]
pub(crate) struct Counter(AtomicU64);

impl Counter {
    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Counters updated by the service on every command
#[derive(Debug, Default)]
pub(crate) struct ServiceStats {
    pub commands: Counter,
    pub errors: Counter,
    pub unknown_commands: Counter,
    pub mc_commands: Counter,
    pub multi: Counter,
    pub exec: Counter,
    pub discard: Counter,
    pub tx_queue_errors: Counter,
    pub tx_aborted: Counter,
    pub implicit_tx: Counter,
    pub fast_path: Counter,
    pub fast_path_fallback: Counter,
    pub internal_errors: Counter,
    pub rejected_shutdown: Counter,
}

impl ServiceStats {
    pub fn snapshot(&self, varz: &mut Varz) {
        let counters = [
            ("commands_total", &self.commands),
            ("errors_total", &self.errors),
            ("unknown_commands_total", &self.unknown_commands),
            ("mc_commands_total", &self.mc_commands),
            ("multi_total", &self.multi),
            ("exec_total", &self.exec),
            ("discard_total", &self.discard),
            ("tx_queue_errors_total", &self.tx_queue_errors),
            ("tx_aborted_total", &self.tx_aborted),
            ("implicit_tx_total", &self.implicit_tx),
            ("fast_path_total", &self.fast_path),
            ("fast_path_fallback_total", &self.fast_path_fallback),
            ("internal_errors_total", &self.internal_errors),
            ("rejected_shutdown_total", &self.rejected_shutdown),
        ];

        for (name, counter) in counters {
            varz.push((name.to_string(), counter.get().into()));
        }
    }
}

/// Per-shard and summed shard statistics
pub(crate) fn shard_varz(shards: &[ShardStats], varz: &mut Varz) {
    let mut keys = 0usize;
    let mut locked = 0usize;
    let mut lock_waits = 0u64;
    let mut rollbacks = 0u64;

    for s in shards {
        keys += s.active_keys;
        locked += s.locked_keys;
        lock_waits += s.lock_waits;
        rollbacks += s.rollbacks;
    }

    varz.push(("keys".to_string(), keys.into()));
    varz.push(("locked_keys".to_string(), locked.into()));
    varz.push(("lock_waits_total".to_string(), lock_waits.into()));
    varz.push(("rollbacks_total".to_string(), rollbacks.into()));

    for s in shards {
        let prefix = format!("shard_{}", s.shard_id);
        varz.push((format!("{}_keys", prefix), s.active_keys.into()));
        varz.push((format!("{}_locked_keys", prefix), s.locked_keys.into()));
        varz.push((format!("{}_tasks", prefix), s.tasks_executed.into()));
        varz.push((format!("{}_lock_grants", prefix), s.lock_grants.into()));
        varz.push((format!("{}_lock_waits", prefix), s.lock_waits.into()));
        varz.push((format!("{}_fast_path", prefix), s.fast_path.into()));
        varz.push((format!("{}_memory_bytes", prefix), s.memory_bytes.into()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_snapshot() {
        let stats = ServiceStats::default();
        stats.commands.inc();
        stats.commands.inc();
        stats.exec.inc();

        let mut varz = Varz::new();
        stats.snapshot(&mut varz);

        let get = |name: &str| varz.iter().find(|(n, _)| n == name).map(|(_, v)| v.clone());
        assert_eq!(get("commands_total"), Some(VarzValue::Num(2)));
        assert_eq!(get("exec_total"), Some(VarzValue::Num(1)));
        assert_eq!(get("multi_total"), Some(VarzValue::Num(0)));
    }

    #[test]
    fn test_varz_json() {
        let varz = vec![
            ("version".to_string(), VarzValue::from("0.1.0")),
            ("num_shards".to_string(), VarzValue::Num(4)),
        ];
        let json = varz_json(&varz);
        assert_eq!(json["version"], "0.1.0");
        assert_eq!(json["num_shards"], 4);
    }
}
