//! Replicator: a bounded worker pool pushing records to a proxy with retry.
//!
//! The pool holds between one and [`MAX_REPLICATION_WORKERS`] processors,
//! each driven by its own worker task. Workers compete for jobs on one
//! bounded queue; every job embeds the one-shot channel its verdict is
//! reported on, so concurrent callers cannot observe each other's results.
//!
//! A record counts as replicated when some attempt yields a response whose
//! status is `NoError` or `VersionConflict`; a conflict means a newer
//! version already landed on the target, which is a consistent outcome.

use std::fmt;
use std::sync::Arc;

use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, warn};

use peridot_client::{ClientError, Processor, SecurityContext, ServiceEndpoint};
use peridot_wire::{OpStatus, OperationalMessage};

use crate::config::{MAX_REPLICATION_WORKERS, ReplicationConfig};

/// How many of every 1000 per-worker failures produce a log line.
const LOGGED_FAILURES_PER_THOUSAND: u64 = 6;

struct ReplicationJob {
    op: OperationalMessage,
    reply: oneshot::Sender<bool>,
}

struct Pool {
    jobs: mpsc::Sender<ReplicationJob>,
    processors: Vec<Arc<Processor>>,
    workers: Vec<JoinHandle<()>>,
}

/// Pushes records to a remote proxy and reports a verdict per record.
///
/// Built by [`Replicator::builder`]; a builder with no proxy address yields a
/// disabled replicator whose [`replicate`](Replicator::replicate) always
/// reports `false`.
pub struct Replicator {
    pool: Option<Pool>,
}

impl Replicator {
    /// Starts building a replicator.
    pub fn builder() -> ReplicatorBuilder {
        ReplicatorBuilder::new()
    }

    /// A replicator that accepts records and reports failure for each: the
    /// not-configured state.
    pub fn disabled() -> Self {
        Self { pool: None }
    }

    /// Whether a pool is running behind this replicator.
    pub fn is_enabled(&self) -> bool {
        self.pool.is_some()
    }

    /// Number of proxy connections (and workers) in the pool.
    pub fn num_connections(&self) -> usize {
        self.pool.as_ref().map_or(0, |pool| pool.processors.len())
    }

    /// Submits one record and awaits its verdict.
    ///
    /// Returns `false` immediately when the replicator is disabled or the
    /// record carries no key; otherwise blocks while the input queue is full
    /// (back-pressure) and then until a worker reports the outcome.
    pub async fn replicate(&self, op: OperationalMessage) -> bool {
        let Some(pool) = &self.pool else {
            return false;
        };
        if op.key.is_empty() {
            return false;
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        if pool
            .jobs
            .send(ReplicationJob { op, reply: reply_tx })
            .await
            .is_err()
        {
            return false;
        }
        reply_rx.await.unwrap_or(false)
    }

    /// Stops accepting records, drains the workers, and closes the
    /// processors.
    pub async fn shutdown(mut self) {
        let Some(pool) = self.pool.take() else {
            return;
        };

        drop(pool.jobs);
        for worker in pool.workers {
            let _ = worker.await;
        }
        for processor in &pool.processors {
            processor.close();
        }
    }
}

/// Builder for [`Replicator`].
pub struct ReplicatorBuilder {
    proxy_addr: String,
    num_connections: usize,
    config: ReplicationConfig,
    security: Option<Arc<SecurityContext>>,
}

impl ReplicatorBuilder {
    fn new() -> Self {
        Self {
            proxy_addr: String::new(),
            num_connections: 1,
            config: ReplicationConfig::default(),
            security: None,
        }
    }

    /// Address of the proxy to replicate to. Leaving this empty produces a
    /// disabled replicator.
    #[must_use]
    pub fn proxy_addr(mut self, addr: impl Into<String>) -> Self {
        self.proxy_addr = addr.into();
        self
    }

    /// Requested pool size; clamped to `[1, MAX_REPLICATION_WORKERS]`.
    #[must_use]
    pub fn num_connections(mut self, n: usize) -> Self {
        self.num_connections = n;
        self
    }

    /// Replaces the default tunables.
    #[must_use]
    pub fn config(mut self, config: ReplicationConfig) -> Self {
        self.config = config;
        self
    }

    /// Explicit TLS context for the pool. When absent, the process-wide
    /// context is used, and its presence is what turns TLS on; security
    /// initialization must happen before `build`.
    #[must_use]
    pub fn security(mut self, context: Arc<SecurityContext>) -> Self {
        self.security = Some(context);
        self
    }

    /// Builds the pool and starts its workers.
    pub fn build(self) -> Replicator {
        if self.proxy_addr.is_empty() {
            debug!("no proxy address configured; replication disabled");
            return Replicator::disabled();
        }

        let security = self.security.or_else(SecurityContext::current);
        let endpoint = ServiceEndpoint {
            addr: self.proxy_addr,
            ssl_enabled: security.is_some(),
        };
        let pool_size = self.num_connections.clamp(1, MAX_REPLICATION_WORKERS);

        debug!(
            addr = %endpoint.addr,
            ssl = endpoint.ssl_enabled,
            workers = pool_size,
            "starting replication pool"
        );

        let (jobs_tx, jobs_rx) = mpsc::channel(self.config.queue_capacity);
        let jobs_rx = Arc::new(Mutex::new(jobs_rx));

        let mut processors = Vec::with_capacity(pool_size);
        let mut workers = Vec::with_capacity(pool_size);
        for slot in 0..pool_size {
            let processor = Arc::new(Processor::with_security(
                endpoint.clone(),
                self.config.namespace.clone(),
                self.config.processor_config(),
                security.clone(),
            ));
            processor.start();

            workers.push(tokio::spawn(run_worker(
                slot,
                Arc::clone(&jobs_rx),
                Arc::clone(&processor),
                self.config.clone(),
            )));
            processors.push(processor);
        }

        Replicator {
            pool: Some(Pool {
                jobs: jobs_tx,
                processors,
                workers,
            }),
        }
    }
}

/// Why one replication attempt (or the whole record) failed.
enum AttemptError {
    Transport(ClientError),
    Rejected(OpStatus),
}

impl fmt::Display for AttemptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(err) => write!(f, "{err}"),
            Self::Rejected(status) => write!(f, "status {status}"),
        }
    }
}

async fn run_worker(
    slot: usize,
    jobs: Arc<Mutex<mpsc::Receiver<ReplicationJob>>>,
    processor: Arc<Processor>,
    config: ReplicationConfig,
) {
    let mut failures: u64 = 0;

    loop {
        let job = { jobs.lock().await.recv().await };
        let Some(ReplicationJob { op, reply }) = job else {
            break;
        };

        let replicated = replicate_record(slot, &processor, op, &config, &mut failures).await;
        // The caller may have gone away; its verdict is still accounted for.
        let _ = reply.send(replicated);
    }

    debug!(slot, "replication worker exiting");
}

/// Runs the retry loop for one record. Exactly one verdict comes out.
async fn replicate_record(
    slot: usize,
    processor: &Processor,
    op: OperationalMessage,
    config: &ReplicationConfig,
    failures: &mut u64,
) -> bool {
    let attempts = config.retry_attempts.max(1);
    let mut last_error = None;

    for attempt in 1..=attempts {
        if attempt > 1 {
            sleep(config.retry_backoff()).await;
        }

        match processor.process_request(op.clone()).await {
            Ok(response) => match check_response(&op, &response) {
                Ok(()) => return true,
                Err(status) => last_error = Some(AttemptError::Rejected(status)),
            },
            Err(err) => last_error = Some(AttemptError::Transport(err)),
        }
    }

    *failures += 1;
    if *failures % 1000 < LOGGED_FAILURES_PER_THOUSAND {
        if let Some(err) = &last_error {
            warn!(
                slot,
                rid = %op.request_id,
                opcode = %op.opcode,
                error = %err,
                "replication failed"
            );
        }
    }
    false
}

/// A response settles its record iff its status is a successful replication
/// outcome.
fn check_response(
    request: &OperationalMessage,
    response: &OperationalMessage,
) -> Result<(), OpStatus> {
    if response.request_id != request.request_id {
        warn!(
            expected = %request.request_id,
            received = %response.request_id,
            "response correlation mismatch"
        );
    }

    if response.status.replication_success() {
        Ok(())
    } else {
        Err(response.status)
    }
}

#[cfg(test)]
mod tests {
    use peridot_wire::OpCode;

    use super::*;

    #[test]
    fn check_response_accepts_success_statuses() {
        let mut request = OperationalMessage::request(OpCode::Set, "ns", "k");
        request.opaque = 3;

        let ok = OperationalMessage::response_to(&request, OpStatus::NoError);
        assert_eq!(check_response(&request, &ok), Ok(()));

        let conflict = OperationalMessage::response_to(&request, OpStatus::VersionConflict);
        assert_eq!(check_response(&request, &conflict), Ok(()));

        let busy = OperationalMessage::response_to(&request, OpStatus::ServiceBusy);
        assert_eq!(check_response(&request, &busy), Err(OpStatus::ServiceBusy));
    }

    #[tokio::test]
    async fn pool_size_is_clamped() {
        let low = Replicator::builder()
            .proxy_addr("127.0.0.1:1")
            .num_connections(0)
            .build();
        assert_eq!(low.num_connections(), 1);
        low.shutdown().await;

        let high = Replicator::builder()
            .proxy_addr("127.0.0.1:1")
            .num_connections(9)
            .build();
        assert_eq!(high.num_connections(), MAX_REPLICATION_WORKERS);
        high.shutdown().await;
    }

    #[tokio::test]
    async fn empty_proxy_addr_disables_replication() {
        let replicator = Replicator::builder().build();
        assert!(!replicator.is_enabled());
        assert_eq!(replicator.num_connections(), 0);

        let op = OperationalMessage::request(OpCode::Set, "ns", "k");
        assert!(!replicator.replicate(op).await);
    }

    #[tokio::test]
    async fn keyless_record_is_rejected_without_submission() {
        let replicator = Replicator::builder().proxy_addr("127.0.0.1:1").build();

        let op = OperationalMessage::request(OpCode::Set, "ns", "");
        assert!(!replicator.replicate(op).await);

        replicator.shutdown().await;
    }
}
