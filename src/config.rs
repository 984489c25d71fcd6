//! Configuration types for the cache, circuit breaker, and interpreters
//!
//! All structs carry defaults matching production settings; deserialization
//! accepts partial documents and fills the rest from `Default`.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Settings for the namespace configuration cache and refresh coordinator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct CacheConfig {
    /// Periodic tick interval in seconds.
    pub refresh_interval_sec: u64,

    /// Upper bound on the random jitter added to each tick, in seconds.
    pub refresh_jitter_sec: u64,

    /// Per-namespace rebuild deadline in seconds.
    pub refresh_timeout_sec: u64,

    /// Floor applied to caller deadlines on the on-demand refresh path, in
    /// seconds. Callers with shorter deadlines still get at least this much.
    pub min_refresh_deadline_sec: u64,

    /// Per-call timeout for backing-store operations, in seconds.
    pub store_call_timeout_sec: u64,

    /// Aggregate snapshot memory ceiling in MiB. Least-recently-read
    /// snapshots are evicted once the ceiling is exceeded.
    #[serde(alias = "maxSizeMB")]
    pub max_size_mb: u64,

    /// Maximum number of namespaces refreshed concurrently by one tick.
    pub refresh_concurrency: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            refresh_interval_sec: 60,
            refresh_jitter_sec: 5,
            refresh_timeout_sec: 30,
            min_refresh_deadline_sec: 2,
            store_call_timeout_sec: 10,
            max_size_mb: 256,
            refresh_concurrency: 4,
        }
    }
}

impl CacheConfig {
    /// Periodic tick interval.
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_sec)
    }

    /// Jitter upper bound per tick.
    pub fn refresh_jitter(&self) -> Duration {
        Duration::from_secs(self.refresh_jitter_sec)
    }

    /// Per-namespace rebuild deadline.
    pub fn refresh_timeout(&self) -> Duration {
        Duration::from_secs(self.refresh_timeout_sec)
    }

    /// Minimum deadline granted to on-demand refreshes.
    pub fn min_refresh_deadline(&self) -> Duration {
        Duration::from_secs(self.min_refresh_deadline_sec)
    }

    /// Per-call backing-store timeout.
    pub fn store_call_timeout(&self) -> Duration {
        Duration::from_secs(self.store_call_timeout_sec)
    }

    /// Aggregate snapshot memory ceiling in bytes.
    pub fn max_size_bytes(&self) -> u64 {
        self.max_size_mb * 1024 * 1024
    }
}

/// Settings for the backing-store circuit breaker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct BreakerConfig {
    /// Consecutive failures in the closed state before the breaker opens.
    pub failure_threshold: u32,

    /// Time spent open before a half-open probe is permitted, in
    /// milliseconds.
    pub recovery_timeout_ms: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_ms: 30_000,
        }
    }
}

impl BreakerConfig {
    /// Time the breaker stays open before permitting a probe.
    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_millis(self.recovery_timeout_ms)
    }
}

/// Settings for the rule and workflow interpreters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    /// Upper bound on steps per workflow execution. Bounds cyclic step
    /// graphs at execution time.
    pub max_steps: u32,

    /// Upper bound on nested-rule recursion depth.
    pub max_rule_depth: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_steps: 1024,
            max_rule_depth: 32,
        }
    }
}

/// Top-level configuration bundle.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct RuleFlowConfig {
    /// Cache and refresh settings.
    pub cache: CacheConfig,

    /// Circuit breaker settings.
    pub circuit_breaker: BreakerConfig,

    /// Interpreter settings.
    pub workflow: EngineConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = RuleFlowConfig::default();
        assert_eq!(config.cache.refresh_interval(), Duration::from_secs(60));
        assert_eq!(config.cache.max_size_mb, 256);
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
        assert_eq!(config.workflow.max_steps, 1024);
    }

    #[test]
    fn partial_document_fills_defaults() {
        let config: RuleFlowConfig = serde_json::from_str(
            r#"{"cache": {"refreshIntervalSec": 15}, "workflow": {"maxSteps": 64}}"#,
        )
        .unwrap();

        assert_eq!(config.cache.refresh_interval_sec, 15);
        assert_eq!(config.cache.max_size_mb, 256);
        assert_eq!(config.workflow.max_steps, 64);
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
    }
}
