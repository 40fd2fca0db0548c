//! Limits Enforcer (§4.7)
//!
//! Tracks resident memory (approx), active shard count, wall-clock session
//! duration, EDB size, and derived-fact gas. Follows a
//! ratio-and-threshold evaluation shape (`from_counts` → `evaluate` →
//! violations list), generalized from reliability ratios to these
//! resource caps. Violations are hard errors; callers (virtual store,
//! shard spawner) must honour them.

use crate::error::LimitError;
use std::time::{Duration, Instant};

/// Configured ceilings for one kernel session.
#[derive(Debug, Clone, Copy)]
pub struct LimitsConfig {
    pub max_memory_mb: u64,
    pub max_session_duration_secs: u64,
    pub max_shards: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_memory_mb: 4096,
            max_session_duration_secs: 4 * 3600,
            max_shards: 16,
        }
    }
}

/// Rough resident-memory estimate from EDB size alone: 200 bytes/fact,
/// covering the term vector, hash index entry, and allocator overhead. No
/// `sysinfo`-style process sampling; good enough to catch runaway growth.
pub fn estimate_memory_mb(fact_count: usize) -> u64 {
    const BYTES_PER_FACT: u64 = 200;
    (fact_count as u64 * BYTES_PER_FACT) / (1024 * 1024)
}

/// Evaluates the configured ceilings against observed resource usage.
pub struct LimitsEnforcer {
    config: LimitsConfig,
    session_start: Instant,
}

/// Available capacity after accounting for memory pressure, expressed as
/// slots plus the reason capacity was reduced (if any).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapacityEstimate {
    pub slots: usize,
    pub reason: Option<String>,
}

impl LimitsEnforcer {
    pub fn new(config: LimitsConfig) -> Self {
        Self {
            config,
            session_start: Instant::now(),
        }
    }

    pub fn check_memory(&self, used_mb: u64) -> Result<(), LimitError> {
        if used_mb > self.config.max_memory_mb {
            return Err(LimitError::MemoryLimitExceeded {
                used_mb,
                limit_mb: self.config.max_memory_mb,
            });
        }
        Ok(())
    }

    pub fn check_session_duration(&self) -> Result<(), LimitError> {
        let elapsed = self.session_start.elapsed();
        if elapsed > Duration::from_secs(self.config.max_session_duration_secs) {
            return Err(LimitError::SessionTimeout {
                elapsed_secs: elapsed.as_secs(),
                limit_secs: self.config.max_session_duration_secs,
            });
        }
        Ok(())
    }

    pub fn check_shard_limit(&self, active_count: usize) -> Result<(), LimitError> {
        if active_count > self.config.max_shards {
            return Err(LimitError::TooManyShards {
                active: active_count,
                limit: self.config.max_shards,
            });
        }
        Ok(())
    }

    /// Reduce slots by 50% above 70% memory utilisation, zero above 90%
    /// or at the shard cap.
    pub fn estimate_capacity(&self, active_count: usize, used_mb: u64) -> CapacityEstimate {
        if active_count >= self.config.max_shards {
            return CapacityEstimate {
                slots: 0,
                reason: Some("shard cap reached".to_string()),
            };
        }

        let base_slots = self.config.max_shards - active_count;
        let utilisation = used_mb as f64 / self.config.max_memory_mb as f64;

        if utilisation >= 0.9 {
            CapacityEstimate {
                slots: 0,
                reason: Some(format!("memory utilisation {:.0}% >= 90%", utilisation * 100.0)),
            }
        } else if utilisation >= 0.7 {
            CapacityEstimate {
                slots: base_slots / 2,
                reason: Some(format!("memory utilisation {:.0}% >= 70%", utilisation * 100.0)),
            }
        } else {
            CapacityEstimate {
                slots: base_slots,
                reason: None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enforcer() -> LimitsEnforcer {
        LimitsEnforcer::new(LimitsConfig {
            max_memory_mb: 1000,
            max_session_duration_secs: 3600,
            max_shards: 10,
        })
    }

    #[test]
    fn test_memory_limit() {
        let e = enforcer();
        assert!(e.check_memory(500).is_ok());
        assert!(matches!(
            e.check_memory(1500).unwrap_err(),
            LimitError::MemoryLimitExceeded { .. }
        ));
    }

    #[test]
    fn test_shard_limit() {
        let e = enforcer();
        assert!(e.check_shard_limit(5).is_ok());
        assert!(matches!(
            e.check_shard_limit(20).unwrap_err(),
            LimitError::TooManyShards { .. }
        ));
    }

    #[test]
    fn test_capacity_full_below_70_percent() {
        let e = enforcer();
        let cap = e.estimate_capacity(2, 500);
        assert_eq!(cap.slots, 8);
        assert!(cap.reason.is_none());
    }

    #[test]
    fn test_capacity_halved_at_70_percent() {
        let e = enforcer();
        let cap = e.estimate_capacity(2, 750);
        assert_eq!(cap.slots, 4);
    }

    #[test]
    fn test_capacity_zero_at_90_percent() {
        let e = enforcer();
        let cap = e.estimate_capacity(2, 950);
        assert_eq!(cap.slots, 0);
    }

    #[test]
    fn test_capacity_zero_at_shard_cap() {
        let e = enforcer();
        let cap = e.estimate_capacity(10, 100);
        assert_eq!(cap.slots, 0);
        assert!(cap.reason.is_some());
    }

    #[test]
    fn test_estimate_memory_mb_scales_with_fact_count() {
        assert_eq!(estimate_memory_mb(0), 0);
        assert_eq!(estimate_memory_mb(5_000_000), (5_000_000u64 * 200) / (1024 * 1024));
        assert!(estimate_memory_mb(10_000_000) > estimate_memory_mb(1_000_000));
    }
}
