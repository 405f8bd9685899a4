//! Runtime configuration.
//!
//! Compile-time defaults with runtime environment overrides.
//!
//! # Example
//!
//! ```ignore
//! use proact_runtime::config::IoConfig;
//!
//! // Defaults with env overrides
//! let config = IoConfig::from_env();
//!
//! // Or customize programmatically
//! let config = IoConfig::from_env()
//!     .concurrency_hint(4)
//!     .poll_interval(Duration::from_millis(10));
//! ```

use proact_core::env::env_get;
use std::time::Duration;

/// Configuration for an `IoContext` and the system executor pool.
#[derive(Debug, Clone)]
pub struct IoConfig {
    /// Advisory number of threads expected to call the run loop.
    pub concurrency_hint: usize,
    /// Upper bound on any single blocking wait. Unbounded `run_one`
    /// calls re-poll at this interval so deferred work armed mid-wait
    /// is picked up.
    pub poll_interval: Duration,
    /// Worker count for the system executor's thread pool.
    pub pool_workers: usize,
}

impl Default for IoConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl IoConfig {
    /// Defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `PROACT_CONCURRENCY` - advisory run-loop thread count
    /// - `PROACT_POLL_INTERVAL_MS` - internal re-poll bound
    /// - `PROACT_POOL_WORKERS` - system executor pool size
    pub fn from_env() -> Self {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self {
            concurrency_hint: env_get("PROACT_CONCURRENCY", cpus),
            poll_interval: Duration::from_millis(env_get("PROACT_POLL_INTERVAL_MS", 50u64)),
            pool_workers: env_get("PROACT_POOL_WORKERS", cpus),
        }
    }

    pub fn concurrency_hint(mut self, hint: usize) -> Self {
        self.concurrency_hint = hint.max(1);
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn pool_workers(mut self, workers: usize) -> Self {
        self.pool_workers = workers.max(1);
        self
    }
}
