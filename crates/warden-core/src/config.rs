//! Kernel configuration (§4.0c, ambient)
//!
//! Loaded from TOML via the `toml` crate, with defaults of a 500,000-fact
//! gas cap, a 4 GiB soft memory ceiling, a four-hour session, sixteen
//! shards.

use crate::error::Result;
use crate::limits::LimitsConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Everything the kernel needs to know before it is constructed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    /// EDB capacity (spec's `MaxFacts`).
    pub max_facts: usize,
    /// Derived-fact cap enforced per `Evaluate` call.
    pub gas_cap: usize,
    pub max_memory_mb: u64,
    pub max_session_duration_secs: u64,
    pub max_shards: usize,
    /// Path to the SQLite file backing the persistent store; `None` means
    /// in-memory only (no hydration, no shutdown persistence).
    pub store_path: Option<String>,
}

impl Default for KernelConfig {
    fn default() -> Self {
        let limits = LimitsConfig::default();
        Self {
            max_facts: 1_000_000,
            gas_cap: 500_000,
            max_memory_mb: limits.max_memory_mb,
            max_session_duration_secs: limits.max_session_duration_secs,
            max_shards: limits.max_shards,
            store_path: None,
        }
    }
}

impl KernelConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: KernelConfig = toml::from_str(&text)?;
        Ok(config)
    }

    pub fn limits(&self) -> LimitsConfig {
        LimitsConfig {
            max_memory_mb: self.max_memory_mb,
            max_session_duration_secs: self.max_session_duration_secs,
            max_shards: self.max_shards,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_resource_ceilings() {
        let config = KernelConfig::default();
        assert_eq!(config.gas_cap, 500_000);
        assert_eq!(config.max_shards, 16);
        assert_eq!(config.max_session_duration_secs, 4 * 3600);
    }

    #[test]
    fn test_from_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("warden.toml");
        std::fs::write(
            &path,
            "max_facts = 2000\ngas_cap = 10000\nmax_memory_mb = 512\nmax_session_duration_secs = 60\nmax_shards = 4\n",
        )
        .unwrap();

        let config = KernelConfig::from_file(&path).unwrap();
        assert_eq!(config.max_facts, 2000);
        assert_eq!(config.gas_cap, 10_000);
        assert_eq!(config.max_shards, 4);
    }

    #[test]
    fn test_from_file_missing_fields_use_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.toml");
        std::fs::write(&path, "max_facts = 50\n").unwrap();

        let config = KernelConfig::from_file(&path).unwrap();
        assert_eq!(config.max_facts, 50);
        assert_eq!(config.gas_cap, 500_000);
    }
}
