//! ackpub binder layer.
//!
//! This crate turns a non-blocking send primitive into a publish call that
//! reports its outcome exactly once through a completion handler. Completions
//! find their way back through a [`dispatch::CompletionTable`] keyed by
//! per-publish correlation tokens.

pub mod binder;
pub mod config;
pub mod dispatch;
pub mod handler;
pub mod state;

pub use binder::{CloseError, PublishCallback};
pub use config::{BinderConfig, OverlapPolicy};
pub use dispatch::CompletionTable;
pub use handler::{completion_channel, Completion, CompletionHandler};
pub use state::BinderState;
