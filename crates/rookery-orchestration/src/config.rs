//! Orchestrator configuration loading and validation.
//!
//! All tunables the scheduler depends on live here under stable names:
//! worker counts, dispatch timeout, the retry parameters (count, backoff
//! base, backoff cap), the agent health window and threshold, and the
//! bus/queue bounds. Values come from `Default`, from code, or from a YAML
//! file.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use rookery_balancer::Strategy;

/// Complete orchestrator configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Dispatch workers pulling from the priority queue.
    pub workers: usize,
    /// Workers reserved for collaboration-mode coordinators.
    pub coordinator_workers: usize,
    /// Default balancing strategy; tasks may override per submission.
    pub strategy: Strategy,
    /// Seed for the weighted-performance balancer RNG.
    pub balancer_seed: u64,
    /// Dispatch timeout applied when a task carries no override.
    pub default_task_timeout: Duration,
    /// Retries after a dispatch-layer failure before the task fails.
    pub max_retries: u32,
    /// First retry delay; doubles per attempt.
    pub retry_backoff_base: Duration,
    /// Upper bound on the retry delay.
    pub retry_backoff_cap: Duration,
    /// Delay before requeueing a task no agent could take.
    pub queue_backoff: Duration,
    /// Dispatch outcomes remembered per agent for health scoring.
    pub success_window: usize,
    /// Success rate under which a full window marks the agent `error`.
    pub success_threshold: f64,
    /// How long a cancelled running task waits for the agent's ack.
    pub cancel_grace: Duration,
    /// Supervised monitor loop interval.
    pub monitor_interval: Duration,
    /// Per-subscription bus queue depth.
    pub bus_queue_depth: usize,
    /// Bus observability history size.
    pub bus_history: usize,
    /// Largest decomposition plan accepted in one submission
    /// (swarm convergence threshold).
    pub max_plan_tasks: usize,
    /// Wall-clock bound on a whole collaboration session.
    pub session_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            workers: 3,
            coordinator_workers: 2,
            strategy: Strategy::LeastLoaded,
            balancer_seed: 0,
            default_task_timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_backoff_base: Duration::from_millis(250),
            retry_backoff_cap: Duration::from_secs(5),
            queue_backoff: Duration::from_millis(50),
            success_window: 20,
            success_threshold: 0.5,
            cancel_grace: Duration::from_secs(2),
            monitor_interval: Duration::from_secs(5),
            bus_queue_depth: 64,
            bus_history: 256,
            max_plan_tasks: 64,
            session_timeout: Duration::from_secs(300),
        }
    }
}

impl OrchestratorConfig {
    /// Load and validate a configuration from a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = serde_yaml::from_str(&contents)
            .with_context(|| format!("failed to parse YAML config: {}", path.display()))?;
        config.validate()?;
        info!(path = %path.display(), workers = config.workers, "orchestrator config loaded");
        Ok(config)
    }

    /// Check ranges the scheduler depends on.
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            anyhow::bail!("workers must be at least 1");
        }
        if self.coordinator_workers == 0 {
            anyhow::bail!("coordinator_workers must be at least 1");
        }
        if self.success_window == 0 {
            anyhow::bail!("success_window must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.success_threshold) {
            anyhow::bail!(
                "success_threshold must be within [0, 1], got {}",
                self.success_threshold
            );
        }
        if self.retry_backoff_base > self.retry_backoff_cap {
            anyhow::bail!("retry_backoff_base must not exceed retry_backoff_cap");
        }
        if self.default_task_timeout.is_zero() {
            anyhow::bail!("default_task_timeout must be non-zero");
        }
        if self.max_plan_tasks == 0 {
            anyhow::bail!("max_plan_tasks must be at least 1");
        }
        Ok(())
    }

    /// Retry delay for the given 1-based attempt: exponential from the
    /// base, capped.
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let delay = self.retry_backoff_base.saturating_mul(1u32 << exp);
        delay.min(self.retry_backoff_cap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = OrchestratorConfig::default();
        config.validate().unwrap();
        assert_eq!(config.workers, 3);
        assert_eq!(config.max_retries, 3);
    }

    #[test]
    fn retry_delay_doubles_and_caps() {
        let config = OrchestratorConfig {
            retry_backoff_base: Duration::from_millis(100),
            retry_backoff_cap: Duration::from_millis(350),
            ..Default::default()
        };
        assert_eq!(config.retry_delay(1), Duration::from_millis(100));
        assert_eq!(config.retry_delay(2), Duration::from_millis(200));
        assert_eq!(config.retry_delay(3), Duration::from_millis(350));
        assert_eq!(config.retry_delay(10), Duration::from_millis(350));
    }

    #[test]
    fn invalid_ranges_rejected() {
        let mut config = OrchestratorConfig::default();
        config.workers = 0;
        assert!(config.validate().is_err());

        let mut config = OrchestratorConfig::default();
        config.success_threshold = 1.5;
        assert!(config.validate().is_err());

        let mut config = OrchestratorConfig::default();
        config.retry_backoff_base = Duration::from_secs(10);
        config.retry_backoff_cap = Duration::from_secs(1);
        assert!(config.validate().is_err());
    }

    #[test]
    fn yaml_file_round_trip() {
        let config = OrchestratorConfig {
            workers: 5,
            strategy: Strategy::RoundRobin,
            ..Default::default()
        };
        let yaml = serde_yaml::to_string(&config).unwrap();

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(yaml.as_bytes()).unwrap();

        let loaded = OrchestratorConfig::from_yaml_file(file.path()).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn partial_yaml_uses_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"workers: 7\n").unwrap();

        let loaded = OrchestratorConfig::from_yaml_file(file.path()).unwrap();
        assert_eq!(loaded.workers, 7);
        assert_eq!(loaded.max_retries, OrchestratorConfig::default().max_retries);
    }
}
