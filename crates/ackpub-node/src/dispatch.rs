use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use ackpub_core::{CorrelationToken, ResultCode};
use ackpub_transport::CompletionRoute;
use bytes::Bytes;
use tracing::{debug, warn};

use crate::binder::BinderShared;

/// Where a registered token stands relative to its `attempt_send` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SendWindow {
    /// `attempt_send` has not returned yet.
    Sending,
    /// The ticket was dropped while `attempt_send` was still running.
    Abandoned,
    /// Accepted; the primitive owns the ticket.
    Sent,
}

#[derive(Debug)]
struct Entry {
    binder: Weak<BinderShared>,
    window: SendWindow,
}

/// Maps outstanding correlation tokens back to the binders that issued them.
///
/// Entries hold weak references only: a completion that arrives after its
/// binder was dropped is discarded instead of reaching freed state. Each
/// entry is removed on first delivery, which is what makes delivery
/// exactly-once even if a primitive misbehaves.
#[derive(Debug, Default)]
pub struct CompletionTable {
    next_token: AtomicU64,
    entries: Mutex<HashMap<CorrelationToken, Entry>>,
}

impl CompletionTable {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Number of tokens still waiting for a completion.
    pub fn outstanding(&self) -> usize {
        self.lock().len()
    }

    pub fn is_registered(&self, token: CorrelationToken) -> bool {
        self.lock().contains_key(&token)
    }

    pub(crate) fn register(&self, binder: &Arc<BinderShared>) -> CorrelationToken {
        let token = CorrelationToken(self.next_token.fetch_add(1, Ordering::Relaxed) + 1);
        self.lock().insert(
            token,
            Entry {
                binder: Arc::downgrade(binder),
                window: SendWindow::Sending,
            },
        );
        token
    }

    /// Records that `attempt_send` accepted `token`.
    ///
    /// Returns `true` when the primitive already dropped the ticket; the entry
    /// is then removed and the caller owns the `CANCELLED` delivery.
    pub(crate) fn mark_sent(&self, token: CorrelationToken) -> bool {
        let mut entries = self.lock();
        match entries.get(&token).map(|entry| entry.window) {
            Some(SendWindow::Abandoned) => {
                entries.remove(&token);
                true
            }
            Some(_) => {
                if let Some(entry) = entries.get_mut(&token) {
                    entry.window = SendWindow::Sent;
                }
                false
            }
            None => false,
        }
    }

    /// Returns whether the token was still registered.
    pub(crate) fn unregister(&self, token: CorrelationToken) -> bool {
        self.lock().remove(&token).is_some()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<CorrelationToken, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl CompletionRoute for CompletionTable {
    fn route(&self, token: CorrelationToken, code: ResultCode, payload: Option<Bytes>) -> bool {
        let Some(entry) = self.lock().remove(&token) else {
            warn!(%token, %code, "completion for unknown or already completed token dropped");
            return false;
        };
        let Some(binder) = entry.binder.upgrade() else {
            warn!(%token, %code, "completion arrived after its binder was dropped");
            return false;
        };
        debug!(%token, %code, "routing completion to binder");
        binder.deliver(token, code, payload);
        true
    }

    fn abandon(&self, token: CorrelationToken) {
        let entry = {
            let mut entries = self.lock();
            match entries.get(&token).map(|entry| entry.window) {
                None => return,
                Some(SendWindow::Sending) => {
                    // Refused or dropped mid-send; the binder settles it once
                    // attempt_send returns.
                    if let Some(entry) = entries.get_mut(&token) {
                        entry.window = SendWindow::Abandoned;
                    }
                    return;
                }
                Some(SendWindow::Abandoned) => return,
                Some(SendWindow::Sent) => entries.remove(&token),
            }
        };
        warn!(%token, "send primitive dropped an accepted ticket; reporting CANCELLED");
        if let Some(binder) = entry.and_then(|entry| entry.binder.upgrade()) {
            binder.deliver(token, ResultCode::CANCELLED, None);
        }
    }
}
