//! Processor: one managed proxy connection behind a synchronous request API.
//!
//! Each processor owns a coordinator task. Callers hand it an operational
//! message through a bounded submission channel and block on a one-shot
//! reply; the coordinator connects on demand, stamps the connection-local
//! sequence, writes the frame, and registers the caller in the pending
//! tracker. A single `select!` loop services submissions, decoded responses,
//! the tracker deadline, the connection recycle deadline, and shutdown; one
//! branch per iteration, so the tracker has exactly one owner.
//!
//! Connection recycling: after `connect_recycle_timeout` of continuous
//! liveness the link is torn down so long-lived TLS sessions get refreshed.
//! Requests in flight at that moment fail with `ReaderClosed`; the next
//! submission reconnects.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, warn};

use peridot_wire::OperationalMessage;

use crate::connection::{Connection, ReaderResponse};
use crate::endpoint::ServiceEndpoint;
use crate::error::{ClientError, ClientResult};
use crate::security::SecurityContext;
use crate::tracker::{PendingTracker, RequestContext};

/// Capacity of the submission channel between callers and the coordinator.
const SUBMISSION_CHANNEL_CAPACITY: usize = 128;

/// Timeouts governing one processor's connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessorConfig {
    /// Bound on transport establishment, including the TLS handshake.
    pub connect_timeout: Duration,
    /// Per-request deadline, measured from the frame write.
    pub request_timeout: Duration,
    /// Continuous liveness after which the connection is recycled.
    pub connect_recycle_timeout: Duration,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_millis(500),
            request_timeout: Duration::from_millis(1000),
            connect_recycle_timeout: Duration::from_secs(60),
        }
    }
}

/// Point-in-time snapshot of a processor's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessorStats {
    pub requests_sent: u64,
    pub responses_matched: u64,
    pub timeouts: u64,
    pub connection_errors: u64,
    pub recycles: u64,
}

#[derive(Debug, Default)]
struct Counters {
    requests_sent: AtomicU64,
    responses_matched: AtomicU64,
    timeouts: AtomicU64,
    connection_errors: AtomicU64,
    recycles: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> ProcessorStats {
        ProcessorStats {
            requests_sent: self.requests_sent.load(Ordering::Relaxed),
            responses_matched: self.responses_matched.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            connection_errors: self.connection_errors.load(Ordering::Relaxed),
            recycles: self.recycles.load(Ordering::Relaxed),
        }
    }
}

struct Submission {
    op: OperationalMessage,
    ctx: RequestContext,
}

/// One managed connection plus its coordinator, exposing a synchronous
/// request API.
pub struct Processor {
    submissions: mpsc::Sender<Submission>,
    shutdown: watch::Sender<bool>,
    coordinator: Mutex<Option<Coordinator>>,
    stats: Arc<Counters>,
}

impl Processor {
    /// Creates a processor for `endpoint`. Ops submitted without a namespace
    /// are stamped with `namespace`. The process-wide security context, if
    /// initialized, is captured here; initialize TLS material first.
    pub fn new(
        endpoint: ServiceEndpoint,
        namespace: impl Into<Bytes>,
        config: ProcessorConfig,
    ) -> Self {
        Self::with_security(endpoint, namespace, config, SecurityContext::current())
    }

    /// Like [`Processor::new`], with an explicit security context.
    pub fn with_security(
        endpoint: ServiceEndpoint,
        namespace: impl Into<Bytes>,
        config: ProcessorConfig,
        security: Option<Arc<SecurityContext>>,
    ) -> Self {
        let (submissions_tx, submissions_rx) = mpsc::channel(SUBMISSION_CHANNEL_CAPACITY);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let stats = Arc::new(Counters::default());

        let coordinator = Coordinator {
            tracker: PendingTracker::new(config.request_timeout),
            endpoint,
            namespace: namespace.into(),
            config,
            security,
            submissions: submissions_rx,
            shutdown: shutdown_rx,
            link: None,
            next_sequence: 1,
            stats: Arc::clone(&stats),
        };

        Self {
            submissions: submissions_tx,
            shutdown: shutdown_tx,
            coordinator: Mutex::new(Some(coordinator)),
            stats,
        }
    }

    /// Spawns the coordinator task. Idempotent; the first call wins.
    pub fn start(&self) {
        let coordinator = self.coordinator.lock().ok().and_then(|mut slot| slot.take());
        if let Some(coordinator) = coordinator {
            tokio::spawn(coordinator.run());
        }
    }

    /// Signals the coordinator to stop. Idempotent; every request still in
    /// flight is failed with [`ClientError::ShuttingDown`].
    pub fn close(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Submits `op` and blocks until a response arrives, the request times
    /// out, the connection fails, or the processor shuts down.
    pub async fn process_request(
        &self,
        op: OperationalMessage,
    ) -> ClientResult<OperationalMessage> {
        let (ctx, reply) = RequestContext::new(&op);
        self.submissions
            .send(Submission { op, ctx })
            .await
            .map_err(|_| ClientError::ShuttingDown)?;
        reply.await.map_err(|_| ClientError::ShuttingDown)?
    }

    /// Current counter values.
    pub fn stats(&self) -> ProcessorStats {
        self.stats.snapshot()
    }
}

impl Drop for Processor {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

struct Link {
    conn: Connection,
    connected_at: Instant,
}

struct Coordinator {
    endpoint: ServiceEndpoint,
    namespace: Bytes,
    config: ProcessorConfig,
    security: Option<Arc<SecurityContext>>,
    submissions: mpsc::Receiver<Submission>,
    shutdown: watch::Receiver<bool>,
    tracker: PendingTracker,
    link: Option<Link>,
    next_sequence: u32,
    stats: Arc<Counters>,
}

impl Coordinator {
    async fn run(mut self) {
        // First connect happens off the caller's path; a failure here is
        // fine, each submission retries establishment.
        if let Err(e) = self.ensure_connected().await {
            debug!(addr = %self.endpoint.addr, error = %e, "initial connect failed");
        }

        loop {
            let tracker_deadline = self.tracker.next_deadline();
            let recycle_deadline = self
                .link
                .as_ref()
                .map(|l| l.connected_at + self.config.connect_recycle_timeout);

            tokio::select! {
                submission = self.submissions.recv() => match submission {
                    Some(submission) => self.handle_submission(submission).await,
                    // Every Processor handle is gone; nothing can submit.
                    None => break,
                },
                event = Self::next_reader_event(&mut self.link) => {
                    self.handle_reader_event(event);
                },
                () = sleep_until_opt(tracker_deadline) => {
                    let expired = self.tracker.on_timeout(Instant::now());
                    self.stats.timeouts.fetch_add(expired, Ordering::Relaxed);
                },
                () = sleep_until_opt(recycle_deadline) => self.recycle(),
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        break;
                    }
                },
            }
        }

        self.tracker.fail_all(ClientError::ShuttingDown);
        if let Some(link) = self.link.take() {
            link.conn.shutdown();
        }
        debug!(addr = %self.endpoint.addr, "coordinator stopped");
    }

    /// Next event from the connection reader; pends while disconnected. A
    /// closed reader channel collapses into a terminal `ReaderClosed`.
    async fn next_reader_event(link: &mut Option<Link>) -> ReaderResponse {
        match link {
            Some(link) => match link.conn.responses.recv().await {
                Some(event) => event,
                None => Err(ClientError::ReaderClosed),
            },
            None => std::future::pending().await,
        }
    }

    async fn handle_submission(&mut self, submission: Submission) {
        let Submission { mut op, ctx } = submission;

        if let Err(err) = self.ensure_connected().await {
            self.stats.connection_errors.fetch_add(1, Ordering::Relaxed);
            ctx.reply_error(err);
            return;
        }

        if op.namespace.is_empty() {
            op.namespace = self.namespace.clone();
        }

        let sequence = self.assign_sequence();
        op.opaque = sequence;

        let Some(link) = self.link.as_mut() else {
            ctx.reply_error(ClientError::ReaderClosed);
            return;
        };

        match link.conn.send(&op).await {
            Ok(()) => {
                self.stats.requests_sent.fetch_add(1, Ordering::Relaxed);
                if let Err(err) = self.tracker.on_request_sent(ctx, sequence, Instant::now()) {
                    // The duplicate's caller has already been failed; this is
                    // an internal invariant breach worth shouting about.
                    error!(sequence, error = %err, "sequence collision on send");
                }
            }
            Err(err) => {
                warn!(addr = %self.endpoint.addr, error = %err, "frame write failed");
                self.stats.connection_errors.fetch_add(1, Ordering::Relaxed);
                ctx.reply_error(err);
                self.teardown_link();
            }
        }
    }

    fn handle_reader_event(&mut self, event: ReaderResponse) {
        match event {
            Ok(response) => {
                if self.tracker.on_response_received(response) {
                    self.stats.responses_matched.fetch_add(1, Ordering::Relaxed);
                }
            }
            Err(err) => {
                warn!(addr = %self.endpoint.addr, error = %err, "connection reader failed");
                self.stats.connection_errors.fetch_add(1, Ordering::Relaxed);
                self.tracker.fail_all(err);
                if let Some(link) = self.link.take() {
                    link.conn.shutdown();
                }
            }
        }
    }

    async fn ensure_connected(&mut self) -> ClientResult<()> {
        if self.link.is_some() {
            return Ok(());
        }

        let connect = Connection::connect(&self.endpoint, self.security.as_deref());
        match tokio::time::timeout(self.config.connect_timeout, connect).await {
            Ok(Ok(conn)) => {
                debug!(addr = %self.endpoint.addr, ssl = self.endpoint.ssl_enabled, "connected");
                self.link = Some(Link {
                    conn,
                    connected_at: Instant::now(),
                });
                Ok(())
            }
            Ok(Err(err)) => Err(err),
            Err(_) => Err(ClientError::ConnectFailed {
                addr: self.endpoint.addr.clone(),
                reason: format!("timed out after {:?}", self.config.connect_timeout),
            }),
        }
    }

    /// Next free sequence: monotonically increasing, wrapping mod 2^32,
    /// skipping values still in flight.
    fn assign_sequence(&mut self) -> u32 {
        loop {
            let sequence = self.next_sequence;
            self.next_sequence = self.next_sequence.wrapping_add(1);
            if !self.tracker.contains(sequence) {
                return sequence;
            }
        }
    }

    /// Voluntary reconnect to refresh transport state. In-flight requests
    /// fail through the reader-closed path.
    fn recycle(&mut self) {
        debug!(addr = %self.endpoint.addr, in_flight = self.tracker.len(), "recycling connection");
        self.stats.recycles.fetch_add(1, Ordering::Relaxed);
        self.teardown_link();
    }

    fn teardown_link(&mut self) {
        if let Some(link) = self.link.take() {
            link.conn.shutdown();
        }
        self.tracker.on_reader_closed();
    }
}

/// Sleeps until `deadline`; pends forever when there is none.
async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline.into()).await,
        None => std::future::pending().await,
    }
}
