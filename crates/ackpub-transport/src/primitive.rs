use std::fmt;
use std::sync::Arc;

use ackpub_core::{CorrelationToken, PublishRequest, ResultCode};
use bytes::Bytes;
use thiserror::Error;

/// Landing site for completions coming back from a send primitive.
pub trait CompletionRoute: Send + Sync {
    /// Delivers the outcome for `token`.
    ///
    /// Returns `false` when the token is unknown or was already completed.
    fn route(&self, token: CorrelationToken, code: ResultCode, payload: Option<Bytes>) -> bool;

    /// Called when a ticket for `token` is dropped without being completed.
    ///
    /// A primitive refusing a request drops its ticket too, so implementors
    /// must tell that apart from an accepted request being lost.
    fn abandon(&self, token: CorrelationToken) {
        let _ = token;
    }
}

/// Handle a send primitive keeps for an accepted request and completes once
/// the outcome is known.
///
/// `complete` consumes the ticket, so a primitive cannot deliver twice.
/// Dropping it uncompleted reports it to [`CompletionRoute::abandon`].
#[must_use = "an accepted ticket must be completed exactly once"]
pub struct CompletionTicket {
    token: CorrelationToken,
    route: Option<Arc<dyn CompletionRoute>>,
}

impl CompletionTicket {
    pub fn new(token: CorrelationToken, route: Arc<dyn CompletionRoute>) -> Self {
        Self {
            token,
            route: Some(route),
        }
    }

    pub fn token(&self) -> CorrelationToken {
        self.token
    }

    /// Routes the outcome back to the issuer. `payload` is reserved and
    /// normally `None`.
    pub fn complete(mut self, code: ResultCode, payload: Option<Bytes>) -> bool {
        match self.route.take() {
            Some(route) => route.route(self.token, code, payload),
            None => false,
        }
    }
}

impl Drop for CompletionTicket {
    fn drop(&mut self) {
        if let Some(route) = self.route.take() {
            route.abandon(self.token);
        }
    }
}

impl fmt::Debug for CompletionTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionTicket")
            .field("token", &self.token)
            .finish_non_exhaustive()
    }
}

/// Why a primitive refused a request before it entered asynchronous
/// processing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RejectReason {
    #[error("cloud is not connected")]
    NotConnected,
    #[error("event name is empty")]
    InvalidEventName,
    #[error("event name exceeds {max} bytes")]
    EventNameTooLong { max: usize },
    #[error("event data exceeds {max} bytes")]
    PayloadTooLarge { max: usize },
    #[error("send queue is full")]
    QueueFull,
    #[error("send primitive is closed")]
    Closed,
}

/// Size limits enforced at acceptance time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloudLimits {
    pub max_event_name_len: usize,
    pub max_payload_bytes: usize,
}

impl Default for CloudLimits {
    fn default() -> Self {
        Self {
            max_event_name_len: 64,
            max_payload_bytes: 1024,
        }
    }
}

impl CloudLimits {
    pub fn validate(&self, request: &PublishRequest) -> Result<(), RejectReason> {
        if request.event_name.is_empty() {
            return Err(RejectReason::InvalidEventName);
        }
        if request.event_name.len() > self.max_event_name_len {
            return Err(RejectReason::EventNameTooLong {
                max: self.max_event_name_len,
            });
        }
        if request.data_len() > self.max_payload_bytes {
            return Err(RejectReason::PayloadTooLarge {
                max: self.max_payload_bytes,
            });
        }
        Ok(())
    }
}

/// Coarse per-primitive health counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CloudHealthSnapshot {
    pub accepted: u64,
    pub rejected: u64,
    pub acknowledged: u64,
    pub timed_out: u64,
    pub failed: u64,
    pub retransmissions: u64,
    pub queued: u64,
    pub last_error: Option<ResultCode>,
}

/// Non-blocking publish contract consumed by binders.
pub trait SendPrimitive: Send + Sync {
    /// Hands `request` over for asynchronous processing.
    ///
    /// `Ok` means the request was accepted and `ticket` will be completed
    /// exactly once later, possibly from another thread; an accepted ticket
    /// dropped uncompleted is reported as `CANCELLED`. `Err` means the
    /// request was refused synchronously; the ticket is dropped unused and
    /// the caller reports the refusal itself.
    fn attempt_send(
        &self,
        request: PublishRequest,
        ticket: CompletionTicket,
    ) -> Result<(), RejectReason>;

    /// Whether the link to the cloud is currently up.
    fn is_connected(&self) -> bool {
        true
    }

    /// Best-effort counters for logging and diagnostics.
    fn health_snapshot(&self) -> CloudHealthSnapshot {
        CloudHealthSnapshot::default()
    }
}

impl<T: SendPrimitive + ?Sized> SendPrimitive for Arc<T> {
    fn attempt_send(
        &self,
        request: PublishRequest,
        ticket: CompletionTicket,
    ) -> Result<(), RejectReason> {
        (**self).attempt_send(request, ticket)
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }

    fn health_snapshot(&self) -> CloudHealthSnapshot {
        (**self).health_snapshot()
    }
}
