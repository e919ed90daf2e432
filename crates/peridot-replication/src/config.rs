//! Replication tier configuration.

use std::time::Duration;

use peridot_client::ProcessorConfig;
use serde::{Deserialize, Serialize};

/// Upper bound on replication workers (one proxy connection each).
pub const MAX_REPLICATION_WORKERS: usize = 4;

/// Tunables for the replication pipeline.
///
/// Durations are carried as `*_ms` integers so the struct deserializes
/// directly from TOML; accessors return `Duration`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicationConfig {
    /// Namespace stamped onto replicated records that carry none.
    pub namespace: String,
    /// Capacity of the replication input queue. A full queue blocks
    /// submitters, pushing back on the storage layer.
    pub queue_capacity: usize,
    /// Total attempts per record, including the first.
    pub retry_attempts: u32,
    /// Pause between failed attempts, in milliseconds.
    pub retry_backoff_ms: u64,
    /// Transport establishment bound, in milliseconds.
    pub connect_timeout_ms: u64,
    /// Per-request deadline, in milliseconds.
    pub request_timeout_ms: u64,
    /// Continuous connection liveness before a voluntary reconnect, in
    /// milliseconds.
    pub connect_recycle_timeout_ms: u64,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            namespace: "replication".to_string(),
            queue_capacity: 1000,
            retry_attempts: 3,
            retry_backoff_ms: 10,
            connect_timeout_ms: 500,
            request_timeout_ms: 1000,
            connect_recycle_timeout_ms: 60_000,
        }
    }
}

impl ReplicationConfig {
    /// Pause between failed attempts.
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    /// Per-connection timeouts for the processors this config drives.
    pub fn processor_config(&self) -> ProcessorConfig {
        ProcessorConfig {
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            request_timeout: Duration::from_millis(self.request_timeout_ms),
            connect_recycle_timeout: Duration::from_millis(self.connect_recycle_timeout_ms),
        }
    }
}
