//! Queue configuration and statistics.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for queue behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum number of simultaneously active jobs (one worker per slot).
    pub concurrency: usize,
    /// Execution attempts per job before it fails terminally.
    pub max_attempts: u32,
    /// Timeout for a whole fetch/upload/persist run (seconds).
    pub job_timeout_secs: u64,
    /// Linear backoff base between attempts (milliseconds, 0 = immediate).
    pub retry_backoff_ms: u64,
    /// Maximum number of queued jobs; new keys are rejected beyond it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_pending: Option<usize>,
    /// How long completed/failed jobs stay queryable (seconds).
    pub terminal_retention_secs: u64,
    /// Upper bound on retained completed/failed jobs.
    pub max_terminal_jobs: usize,
    /// Interval of the housekeeping tick (seconds).
    pub housekeeping_interval_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            max_attempts: 3,
            job_timeout_secs: 60,
            retry_backoff_ms: 1_000,
            max_pending: Some(1_000),
            terminal_retention_secs: 600,
            max_terminal_jobs: 500,
            housekeeping_interval_secs: 30,
        }
    }
}

impl QueueConfig {
    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    /// Delay before re-admitting a job that has failed `attempts` times.
    pub fn retry_delay(&self, attempts: u32) -> Duration {
        Duration::from_millis(self.retry_backoff_ms.saturating_mul(u64::from(attempts)))
    }

    pub fn housekeeping_interval(&self) -> Duration {
        Duration::from_secs(self.housekeeping_interval_secs.max(1))
    }
}

/// Counts of jobs currently held by the queue, per status.
///
/// Derived from the job table on demand.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueStats {
    pub queued: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
}

impl QueueStats {
    /// Jobs still holding their dedup key.
    pub fn in_flight(&self) -> u64 {
        self.queued + self.active
    }

    /// Retained terminal jobs.
    pub fn processed(&self) -> u64 {
        self.completed + self.failed
    }

    /// Success rate as a percentage.
    pub fn success_rate(&self) -> Option<f64> {
        let total = self.processed();
        if total == 0 {
            None
        } else {
            Some((self.completed as f64 / total as f64) * 100.0)
        }
    }
}
