//! Pending-request tracking: response correlation and expiry.
//!
//! The tracker pairs two structures:
//!
//! - a map keyed by sequence, giving O(1) correlation on the response path;
//! - a queue in send order, which, because every request gets the same
//!   timeout, is also ordered by expiry, so a sweep is one head scan with no
//!   priority-queue overhead.
//!
//! A delivered response only removes the map entry; its queue slot stays
//! behind as a tombstone and is dropped the next time the sweep or the
//! deadline query walks past it.
//!
//! A tracker is owned by exactly one coordinator task, which serializes
//! registration, delivery, and expiry. Nothing here locks.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use tokio::sync::oneshot;
use tracing::warn;

use peridot_wire::{OpCode, OperationalMessage, RequestId};

use crate::error::{ClientError, ClientResult};

/// One-shot reply handle back to the caller blocked in `process_request`.
///
/// The sender is consumed on first use, so a request is completed exactly
/// once; a receiver that gave up (caller cancelled) makes delivery a no-op.
#[derive(Debug)]
pub(crate) struct RequestContext {
    reply: oneshot::Sender<ClientResult<OperationalMessage>>,
    request_id: RequestId,
    opcode: OpCode,
}

impl RequestContext {
    /// Creates a context for `op` plus the receiver its caller awaits.
    pub(crate) fn new(
        op: &OperationalMessage,
    ) -> (Self, oneshot::Receiver<ClientResult<OperationalMessage>>) {
        let (reply, rx) = oneshot::channel();
        (
            Self {
                reply,
                request_id: op.request_id,
                opcode: op.opcode,
            },
            rx,
        )
    }

    pub(crate) fn reply_error(self, err: ClientError) {
        let _ = self.reply.send(Err(err));
    }

    fn reply(self, response: OperationalMessage) {
        let _ = self.reply.send(Ok(response));
    }
}

/// A request in flight on the connection.
struct PendingRequest {
    ctx: RequestContext,
    time_sent: Instant,
}

/// Send-ordered queue slot; `sequence` may point at an already-delivered
/// request (a tombstone).
struct QueueSlot {
    sequence: u32,
    time_sent: Instant,
    time_to_expire: Instant,
}

/// Correlates in-flight requests with responses and expires stragglers.
pub(crate) struct PendingTracker {
    in_flight: HashMap<u32, PendingRequest>,
    queue: VecDeque<QueueSlot>,
    request_timeout: Duration,
}

impl PendingTracker {
    pub(crate) fn new(request_timeout: Duration) -> Self {
        Self {
            in_flight: HashMap::new(),
            queue: VecDeque::new(),
            request_timeout,
        }
    }

    /// Registers a freshly written request.
    ///
    /// A sequence that is already live is an internal invariant violation:
    /// the caller is failed with [`ClientError::SequenceCollision`] and the
    /// same error is returned for escalation.
    pub(crate) fn on_request_sent(
        &mut self,
        ctx: RequestContext,
        sequence: u32,
        now: Instant,
    ) -> ClientResult<()> {
        if self.in_flight.contains_key(&sequence) {
            ctx.reply_error(ClientError::SequenceCollision(sequence));
            return Err(ClientError::SequenceCollision(sequence));
        }

        self.queue.push_back(QueueSlot {
            sequence,
            time_sent: now,
            time_to_expire: now + self.request_timeout,
        });
        self.in_flight.insert(sequence, PendingRequest { ctx, time_sent: now });
        Ok(())
    }

    /// Delivers a response to the waiter registered under its opaque
    /// sequence. Returns whether a waiter was found; late or duplicate
    /// responses are dropped.
    pub(crate) fn on_response_received(&mut self, response: OperationalMessage) -> bool {
        match self.in_flight.remove(&response.opaque) {
            Some(pending) => {
                // The queue slot stays behind as a tombstone.
                pending.ctx.reply(response);
                true
            }
            None => {
                warn!(
                    sequence = response.opaque,
                    rid = %response.request_id,
                    "no pending request for response"
                );
                false
            }
        }
    }

    /// Expires every live request whose deadline has passed. Returns the
    /// number of requests timed out.
    pub(crate) fn on_timeout(&mut self, now: Instant) -> u64 {
        let mut expired = 0;

        while let Some(slot) = self.queue.front() {
            let live = self.in_flight.contains_key(&slot.sequence);
            if live && slot.time_to_expire > now {
                break;
            }

            let Some(slot) = self.queue.pop_front() else {
                break;
            };
            if !live {
                continue;
            }

            if let Some(pending) = self.in_flight.remove(&slot.sequence) {
                warn!(
                    sequence = slot.sequence,
                    rid = %pending.ctx.request_id,
                    opcode = %pending.ctx.opcode,
                    elapsed_ms = now.duration_since(slot.time_sent).as_millis() as u64,
                    "request timed out"
                );
                pending.ctx.reply_error(ClientError::RequestTimeout);
                expired += 1;
            }
        }

        expired
    }

    /// Fails every live request with `err` and clears all state.
    pub(crate) fn fail_all(&mut self, err: ClientError) -> u64 {
        let failed = self.in_flight.len() as u64;
        for (_, pending) in self.in_flight.drain() {
            pending.ctx.reply_error(err.clone());
        }
        self.queue.clear();
        failed
    }

    /// The connection's read half terminated; fail everything in flight.
    pub(crate) fn on_reader_closed(&mut self) -> u64 {
        self.fail_all(ClientError::ReaderClosed)
    }

    /// Deadline of the earliest live request, pruning dead head slots. The
    /// coordinator arms its sleep from this: armed iff something is in
    /// flight, always for the earliest expiry.
    pub(crate) fn next_deadline(&mut self) -> Option<Instant> {
        while let Some(slot) = self.queue.front() {
            if self.in_flight.contains_key(&slot.sequence) {
                return Some(slot.time_to_expire);
            }
            self.queue.pop_front();
        }
        None
    }

    /// Whether `sequence` is currently in flight.
    pub(crate) fn contains(&self, sequence: u32) -> bool {
        self.in_flight.contains_key(&sequence)
    }

    pub(crate) fn len(&self) -> usize {
        self.in_flight.len()
    }
}
