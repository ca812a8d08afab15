use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use ackpub_core::{CorrelationToken, PublishOutcome, PublishRequest, ResultCode};
use tracing::debug;

use crate::primitive::{
    CloudHealthSnapshot, CloudLimits, CompletionTicket, RejectReason, SendPrimitive,
};

/// In-memory send primitive for tests and simulations.
///
/// Accepted requests are held with their tickets in FIFO order until a test
/// driver completes them with `ack_next`, `time_out_next` or `fail_next`.
#[derive(Debug)]
pub struct MemoryCloud {
    connected: AtomicBool,
    inner: Mutex<MemoryCloudInner>,
}

#[derive(Debug, Default)]
struct MemoryCloudInner {
    pending: VecDeque<(PublishRequest, CompletionTicket)>,
    sent: Vec<PublishRequest>,
    limits: CloudLimits,
    queue_capacity: Option<usize>,
    health: CloudHealthSnapshot,
}

impl Default for MemoryCloud {
    fn default() -> Self {
        Self {
            connected: AtomicBool::new(true),
            inner: Mutex::new(MemoryCloudInner::default()),
        }
    }
}

impl MemoryCloud {
    /// Creates a cloud that enforces `limits` at acceptance time.
    pub fn with_limits(limits: CloudLimits) -> Self {
        let cloud = Self::default();
        cloud.lock().limits = limits;
        cloud
    }

    /// Rejects new requests with `QueueFull` once `capacity` are pending.
    pub fn set_queue_capacity(&self, capacity: Option<usize>) {
        self.lock().queue_capacity = capacity;
    }

    /// Simulates the link going up or down. Requests are rejected while down.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Relaxed);
    }

    /// Drains and returns every request accepted so far.
    pub fn take_sent(&self) -> Vec<PublishRequest> {
        std::mem::take(&mut self.lock().sent)
    }

    pub fn pending_len(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn pending_tokens(&self) -> Vec<CorrelationToken> {
        self.lock()
            .pending
            .iter()
            .map(|(_, ticket)| ticket.token())
            .collect()
    }

    /// Completes the oldest pending request as acknowledged.
    pub fn ack_next(&self) -> Option<CorrelationToken> {
        self.complete_next(ResultCode::NONE)
    }

    /// Completes the oldest pending request as an acknowledgement timeout.
    pub fn time_out_next(&self) -> Option<CorrelationToken> {
        self.complete_next(ResultCode::TIMEOUT)
    }

    /// Completes the oldest pending request with an arbitrary error code.
    pub fn fail_next(&self, code: ResultCode) -> Option<CorrelationToken> {
        self.complete_next(code)
    }

    /// Completes the oldest pending request with `code`.
    ///
    /// The internal lock is released before the ticket is completed so that
    /// handlers may publish again from inside the completion.
    pub fn complete_next(&self, code: ResultCode) -> Option<CorrelationToken> {
        let (_, ticket) = {
            let mut inner = self.lock();
            let next = inner.pending.pop_front()?;
            match code.outcome() {
                PublishOutcome::Delivered => inner.health.acknowledged += 1,
                PublishOutcome::TimedOut => inner.health.timed_out += 1,
                PublishOutcome::Failed => inner.health.failed += 1,
            }
            if !code.is_success() {
                inner.health.last_error = Some(code);
            }
            next
        };
        let token = ticket.token();
        debug!(%token, %code, "memory cloud completing request");
        ticket.complete(code, None);
        Some(token)
    }

    /// Removes the oldest pending request without completing it, handing the
    /// ticket to the caller. Dropping the ticket uncompleted reports it as
    /// abandoned to its route.
    pub fn take_next_ticket(&self) -> Option<(PublishRequest, CompletionTicket)> {
        self.lock().pending.pop_front()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryCloudInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SendPrimitive for MemoryCloud {
    fn attempt_send(
        &self,
        request: PublishRequest,
        ticket: CompletionTicket,
    ) -> Result<(), RejectReason> {
        let mut inner = self.lock();
        let verdict = if !self.connected.load(Ordering::Relaxed) {
            Err(RejectReason::NotConnected)
        } else if inner
            .queue_capacity
            .is_some_and(|capacity| inner.pending.len() >= capacity)
        {
            Err(RejectReason::QueueFull)
        } else {
            inner.limits.validate(&request)
        };

        if let Err(reason) = verdict {
            inner.health.rejected += 1;
            return Err(reason);
        }

        inner.health.accepted += 1;
        inner.sent.push(request.clone());
        inner.pending.push_back((request, ticket));
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    fn health_snapshot(&self) -> CloudHealthSnapshot {
        let inner = self.lock();
        CloudHealthSnapshot {
            queued: inner.pending.len() as u64,
            ..inner.health.clone()
        }
    }
}
