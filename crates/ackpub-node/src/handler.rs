use std::sync::Arc;

use ackpub_core::ResultCode;
use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::debug;

/// Callback invoked with the outcome of a publish.
///
/// Handlers run on whichever thread completes the publish: the caller's own
/// thread for local rejections, the send primitive's worker otherwise. They
/// must therefore be `Send + Sync` and should return quickly.
pub type CompletionHandler = Arc<dyn Fn(ResultCode, Option<Bytes>) + Send + Sync>;

/// Outcome of one publish, as carried over [`completion_channel`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub code: ResultCode,
    /// Reserved; normally `None`.
    pub payload: Option<Bytes>,
}

/// Builds a handler that forwards every completion into a channel, so the
/// owner can consume results on its own task instead of on the delivery
/// thread.
pub fn completion_channel() -> (
    impl Fn(ResultCode, Option<Bytes>) + Send + Sync + 'static,
    mpsc::UnboundedReceiver<Completion>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handler = move |code: ResultCode, payload: Option<Bytes>| {
        if tx.send(Completion { code, payload }).is_err() {
            debug!(%code, "completion receiver dropped; result discarded");
        }
    };
    (handler, rx)
}
