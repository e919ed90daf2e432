//! # peridot-replication: proxy-bound replication pipeline
//!
//! The storage tier hands records it has applied locally to a [`Replicator`],
//! which pushes them to a remote proxy over a small pool of managed
//! connections, retries transient failures, and reports a per-record
//! success/failure verdict.
//!
//! ```text
//! storage ──replicate(op)──▶ bounded queue ──▶ worker[k] ── Processor[k] ──▶ proxy
//!    ◀────────── bool ◀──────── one-shot ◀────────┘  (≤ 3 attempts, 10ms backoff)
//! ```
//!
//! Each submission carries its own one-shot reply channel, so concurrent
//! callers can never receive each other's verdicts. The input queue is
//! bounded; when replication falls behind, `replicate` blocks and the
//! slowness propagates upstream.
//!
//! ## Usage
//!
//! ```ignore
//! use peridot_replication::{ReplicationConfig, Replicator};
//!
//! let replicator = Replicator::builder()
//!     .proxy_addr("proxy.internal:5080")
//!     .num_connections(2)
//!     .build();
//!
//! let replicated = replicator.replicate(op).await;
//! ```

mod config;
mod replicator;

pub use config::{MAX_REPLICATION_WORKERS, ReplicationConfig};
pub use replicator::{Replicator, ReplicatorBuilder};
