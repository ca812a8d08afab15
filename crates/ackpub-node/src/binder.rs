use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use ackpub_core::{CorrelationToken, PublishFlags, PublishRequest, ResultCode};
use ackpub_transport::{CompletionTicket, SendPrimitive};
use bytes::Bytes;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::config::{BinderConfig, OverlapPolicy};
use crate::dispatch::CompletionTable;
use crate::handler::CompletionHandler;
use crate::state::{AtomicBinderState, BinderState};

#[derive(Debug, Default)]
struct PublishSlot {
    /// Token whose completion clears the in-flight state.
    current: Option<CorrelationToken>,
    /// Every token issued by this binder that has not completed yet.
    outstanding: HashSet<CorrelationToken>,
    last_result: Option<ResultCode>,
}

/// Binder state shared with the completion table.
pub(crate) struct BinderShared {
    state: AtomicBinderState,
    handler: Mutex<Option<CompletionHandler>>,
    slot: Mutex<PublishSlot>,
}

impl BinderShared {
    pub(crate) fn new(handler: Option<CompletionHandler>) -> Self {
        Self {
            state: AtomicBinderState::new(BinderState::Idle),
            handler: Mutex::new(handler),
            slot: Mutex::new(PublishSlot::default()),
        }
    }

    pub(crate) fn state(&self) -> BinderState {
        self.state.load()
    }

    /// Registers a new publish and marks the binder in flight.
    ///
    /// Under [`OverlapPolicy::Reject`] an outstanding publish is returned as
    /// the error and nothing is registered.
    pub(crate) fn begin(
        self: &Arc<Self>,
        table: &CompletionTable,
        policy: OverlapPolicy,
    ) -> Result<CorrelationToken, CorrelationToken> {
        let mut slot = self.lock_slot();
        if let Some(current) = slot.current {
            match policy {
                OverlapPolicy::Reject => return Err(current),
                OverlapPolicy::Overwrite => {
                    debug!(%current, "superseding in-flight publish");
                }
            }
        }
        let token = table.register(self);
        slot.current = Some(token);
        slot.outstanding.insert(token);
        slot.last_result = None;
        self.state.store(BinderState::InFlight);
        Ok(token)
    }

    /// Records the outcome for `token` and hands it to the handler.
    ///
    /// The state transition happens before the handler runs and no lock is
    /// held while it runs, so the handler may publish again.
    pub(crate) fn deliver(&self, token: CorrelationToken, code: ResultCode, payload: Option<Bytes>) {
        let is_current = {
            let mut slot = self.lock_slot();
            slot.outstanding.remove(&token);
            if slot.current == Some(token) {
                slot.current = None;
                slot.last_result = Some(code);
                self.state.store(BinderState::Completed);
                true
            } else {
                false
            }
        };
        if !is_current {
            debug!(%token, %code, "completion for superseded publish");
        }
        self.invoke(code, payload);
    }

    fn invoke(&self, code: ResultCode, payload: Option<Bytes>) {
        let handler = self.lock_handler().clone();
        match handler {
            Some(handler) => handler(code, payload),
            None => debug!(%code, "no completion handler registered; result dropped"),
        }
    }

    fn lock_slot(&self) -> MutexGuard<'_, PublishSlot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_handler(&self) -> MutexGuard<'_, Option<CompletionHandler>> {
        self.handler.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for BinderShared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BinderShared")
            .field("state", &self.state())
            .field("has_handler", &self.lock_handler().is_some())
            .finish_non_exhaustive()
    }
}

/// Issues non-blocking publishes and reports each outcome exactly once
/// through a completion handler.
///
/// ```ignore
/// let table = CompletionTable::shared();
/// let binder = PublishCallback::new(table, cloud, BinderConfig::default())
///     .with_handler(|code, _| tracing::info!(%code, "callback called"));
/// binder.publish_with_data("testEvent", "counter=9", PublishFlags::PRIVATE | PublishFlags::WITH_ACK);
/// ```
///
/// Every publish gets its own correlation token in the shared
/// [`CompletionTable`]. The handler fires synchronously inside `publish` when
/// the send primitive refuses the request (`UNKNOWN`) or when another publish
/// is still in flight under [`OverlapPolicy::Reject`] (`BUSY`); otherwise it
/// fires on the primitive's completion thread.
pub struct PublishCallback<P: SendPrimitive> {
    shared: Arc<BinderShared>,
    table: Arc<CompletionTable>,
    primitive: P,
    config: BinderConfig,
}

impl<P: SendPrimitive> PublishCallback<P> {
    /// Creates a binder without a handler; set one with
    /// [`with_handler`](Self::with_handler) or [`set_handler`](Self::set_handler).
    pub fn new(table: Arc<CompletionTable>, primitive: P, config: BinderConfig) -> Self {
        Self {
            shared: Arc::new(BinderShared::new(None)),
            table,
            primitive,
            config,
        }
    }

    pub fn with_handler<F>(self, handler: F) -> Self
    where
        F: Fn(ResultCode, Option<Bytes>) + Send + Sync + 'static,
    {
        self.set_handler(handler);
        self
    }

    /// Stores or replaces the completion handler.
    ///
    /// The handler in place when a completion arrives is the one invoked; a
    /// publish that already completed is never replayed to a new handler.
    pub fn set_handler<F>(&self, handler: F) -> &Self
    where
        F: Fn(ResultCode, Option<Bytes>) + Send + Sync + 'static,
    {
        *self.shared.lock_handler() = Some(Arc::new(handler));
        self
    }

    /// Removes the handler; later results are dropped.
    pub fn clear_handler(&self) -> &Self {
        *self.shared.lock_handler() = None;
        self
    }

    /// Publishes an event without data, using the configured TTL.
    pub fn publish(&self, event_name: &str, flags: impl Into<Option<PublishFlags>>) {
        self.publish_request(self.request(event_name, None, None, flags.into()));
    }

    /// Publishes an event with data, using the configured TTL.
    pub fn publish_with_data(
        &self,
        event_name: &str,
        data: impl Into<Bytes>,
        flags: impl Into<Option<PublishFlags>>,
    ) {
        self.publish_request(self.request(event_name, Some(data.into()), None, flags.into()));
    }

    /// Publishes an event with data and an explicit TTL (ignored by the
    /// cloud).
    pub fn publish_with_ttl(
        &self,
        event_name: &str,
        data: impl Into<Bytes>,
        ttl: u32,
        flags: impl Into<Option<PublishFlags>>,
    ) {
        self.publish_request(self.request(
            event_name,
            Some(data.into()),
            Some(ttl),
            flags.into(),
        ));
    }

    /// Sends `request` as-is. Never blocks and never fails: every outcome,
    /// including refusal, goes to the handler.
    pub fn publish_request(&self, request: PublishRequest) {
        let token = match self.shared.begin(&self.table, self.config.overlap_policy) {
            Ok(token) => token,
            Err(current) => {
                warn!(
                    %current,
                    event = %request.event_name,
                    "publish refused; previous publish still in flight"
                );
                self.shared.invoke(ResultCode::BUSY, None);
                return;
            }
        };

        let event = request.event_name.clone();
        debug!(%token, event = %event, flags = %request.flags, ttl = request.ttl, "publishing");

        let ticket = CompletionTicket::new(token, self.table.clone());
        match self.primitive.attempt_send(request, ticket) {
            Ok(()) => {
                if self.table.mark_sent(token) {
                    warn!(%token, event = %event, "send primitive dropped the accepted ticket");
                    self.shared.deliver(token, ResultCode::CANCELLED, None);
                }
            }
            Err(reason) => {
                warn!(%token, event = %event, %reason, "send refused; completing locally");
                if self.table.unregister(token) {
                    self.shared.deliver(token, ResultCode::UNKNOWN, None);
                } else {
                    warn!(%token, "refused publish was already completed by the send primitive");
                }
            }
        }
    }

    /// True from `publish` until the latest publish's completion arrives.
    pub fn is_in_progress(&self) -> bool {
        self.shared.state() == BinderState::InFlight
    }

    pub fn state(&self) -> BinderState {
        self.shared.state()
    }

    /// Result of the most recent completed publish, if any.
    pub fn last_result(&self) -> Option<ResultCode> {
        self.shared.lock_slot().last_result
    }

    /// Takes the pending result, moving the binder from `Completed` back to
    /// `Idle`.
    pub fn take_result(&self) -> Option<ResultCode> {
        let mut slot = self.shared.lock_slot();
        if self
            .shared
            .state
            .transition(BinderState::Completed, BinderState::Idle)
        {
            slot.last_result.take()
        } else {
            None
        }
    }

    pub fn primitive(&self) -> &P {
        &self.primitive
    }

    pub fn config(&self) -> &BinderConfig {
        &self.config
    }

    /// Tears the binder down, refusing while any publish is outstanding.
    pub fn close(self) -> Result<(), CloseError<P>> {
        let in_flight = self.shared.lock_slot().outstanding.len();
        if in_flight > 0 {
            return Err(CloseError::InFlight {
                in_flight,
                binder: self,
            });
        }
        Ok(())
    }

    fn request(
        &self,
        event_name: &str,
        data: Option<Bytes>,
        ttl: Option<u32>,
        flags: Option<PublishFlags>,
    ) -> PublishRequest {
        PublishRequest {
            event_name: event_name.to_string(),
            data,
            ttl: ttl.unwrap_or(self.config.default_ttl),
            flags: flags.unwrap_or(self.config.default_flags),
        }
    }
}

impl<P: SendPrimitive> Drop for PublishCallback<P> {
    fn drop(&mut self) {
        let outstanding: Vec<CorrelationToken> =
            self.shared.lock_slot().outstanding.drain().collect();
        if outstanding.is_empty() {
            return;
        }
        error!(
            in_flight = outstanding.len(),
            "publish binder dropped with publishes in flight; their completions will be discarded"
        );
        for token in outstanding {
            self.table.unregister(token);
        }
    }
}

impl<P: SendPrimitive> fmt::Debug for PublishCallback<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublishCallback")
            .field("shared", &self.shared)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[derive(Error)]
pub enum CloseError<P: SendPrimitive> {
    /// The binder is handed back so the caller can wait and retry.
    #[error("{in_flight} publish(es) still in flight")]
    InFlight {
        in_flight: usize,
        binder: PublishCallback<P>,
    },
}

impl<P: SendPrimitive> CloseError<P> {
    pub fn into_binder(self) -> PublishCallback<P> {
        match self {
            Self::InFlight { binder, .. } => binder,
        }
    }
}

impl<P: SendPrimitive> fmt::Debug for CloseError<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InFlight { in_flight, .. } => f
                .debug_struct("InFlight")
                .field("in_flight", in_flight)
                .finish_non_exhaustive(),
        }
    }
}
