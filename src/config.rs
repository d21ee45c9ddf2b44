//! Server configuration
//!
//! Defaults can be overridden by an optional JSON file and then by
//! environment variables.

use serde::Deserialize;
use std::path::Path;
use tracing::info;

/// Largest shard count picked automatically
const MAX_AUTO_SHARDS: usize = 16;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Address the RESP listener binds to
    pub bind_addr: String,

    /// Number of shards; defaults to one per CPU core
    pub num_shards: usize,

    /// Number of logical databases reachable with SELECT
    pub num_databases: usize,

    /// Freeze the shards' clocks instead of refreshing them every millisecond
    pub disable_time_update: bool,

    /// Default tracing filter when RUST_LOG is unset
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind_addr: "127.0.0.1:6379".to_string(),
            num_shards: num_cpus::get().clamp(1, MAX_AUTO_SHARDS),
            num_databases: 16,
            disable_time_update: false,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load a JSON config file, falling back to defaults for missing fields
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read config {}: {}", path.display(), e))?;
        let config = serde_json::from_str(&raw)?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Defaults or `path`, then `SHARDKV_BIND` and `SHARDKV_SHARDS` overrides
    pub fn load(path: Option<&str>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        if let Ok(addr) = std::env::var("SHARDKV_BIND") {
            config.bind_addr = addr;
        }
        if let Ok(shards) = std::env::var("SHARDKV_SHARDS") {
            config.num_shards = shards
                .parse()
                .map_err(|e| anyhow::anyhow!("invalid SHARDKV_SHARDS '{}': {}", shards, e))?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.num_shards == 0 {
            anyhow::bail!("num_shards must be at least 1");
        }
        if self.num_databases == 0 || self.num_databases > u16::MAX as usize {
            anyhow::bail!("num_databases must be between 1 and {}", u16::MAX);
        }
        Ok(())
    }

    pub fn init_opts(&self) -> InitOpts {
        InitOpts {
            disable_time_update: self.disable_time_update,
        }
    }
}

/// Options for `Service::init`
#[derive(Debug, Clone, Copy, Default)]
pub struct InitOpts {
    /// Skip the periodic clock refresh in every shard
    pub disable_time_update: bool,
}
