use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Worker topology, per-worker stream capacity and the dispatch-agent idle
/// strategy (busy-spin, then yield, then bounded park).
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RuntimeConfig {
    /// Number of dispatch agents (one OS thread each)
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    /// Max concurrent stream pairs a single worker accepts; further opens
    /// are rejected with `reset`
    #[serde(default = "default_max_streams_per_worker")]
    pub max_streams_per_worker: usize,

    /// Busy-spin iterations before the idle strategy starts yielding
    #[serde(default = "default_spin_limit")]
    pub spin_limit: u32,

    /// Yield iterations before the idle strategy starts parking
    #[serde(default = "default_yield_limit")]
    pub yield_limit: u32,

    /// Upper bound for one park interval in microseconds
    #[serde(default = "default_park_timeout_us")]
    pub park_timeout_us: u64,

    /// Whether unregistration flushes in-flight stream data before teardown
    /// (true) or discards it (false)
    #[serde(default = "default_drain_on_close")]
    pub drain_on_close: bool,

    /// How long a budget outlives its last detached child, in milliseconds,
    /// to absorb in-flight credit/debit races during teardown
    #[serde(default = "default_budget_linger_ms")]
    pub budget_linger_ms: u64,

    /// Directory for the persistent label table; empty means in-memory
    #[serde(default)]
    pub label_dir: String,

    /// Directory for log files
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            max_streams_per_worker: default_max_streams_per_worker(),
            spin_limit: default_spin_limit(),
            yield_limit: default_yield_limit(),
            park_timeout_us: default_park_timeout_us(),
            drain_on_close: default_drain_on_close(),
            budget_linger_ms: default_budget_linger_ms(),
            label_dir: String::new(),
            log_dir: default_log_dir(),
        }
    }
}

impl RuntimeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.worker_count == 0 {
            return Err(Error::InvalidConfig("worker_count must be >= 1".into()));
        }
        if self.worker_count > 64 {
            return Err(Error::InvalidConfig(format!(
                "worker_count {} exceeds the supported maximum of 64",
                self.worker_count
            )));
        }
        if self.max_streams_per_worker == 0 {
            return Err(Error::InvalidConfig(
                "max_streams_per_worker must be >= 1".into(),
            ));
        }
        if self.park_timeout_us == 0 {
            return Err(Error::InvalidConfig("park_timeout_us must be > 0".into()));
        }
        Ok(())
    }
}

fn default_worker_count() -> usize {
    2
}

fn default_max_streams_per_worker() -> usize {
    4096
}

fn default_spin_limit() -> u32 {
    64
}

fn default_yield_limit() -> u32 {
    128
}

fn default_park_timeout_us() -> u64 {
    1000
}

fn default_drain_on_close() -> bool {
    true
}

fn default_budget_linger_ms() -> u64 {
    200
}

fn default_log_dir() -> String {
    "logs".to_string()
}
