//! Core ackpub primitives shared across crates.
//!
//! Includes publish flags, result codes, correlation tokens, the publish
//! request shape, and base errors.

pub mod error;
pub mod request;
pub mod result;
pub mod types;

pub use error::AckpubError;
pub use request::PublishRequest;
pub use result::{PublishOutcome, ResultCode};
pub use types::{parse_flags, AckMode, CorrelationToken, PublishFlags, Visibility, DEFAULT_TTL_SECS};
