use std::fmt;

use serde::{Deserialize, Serialize};

/// Result code delivered to a completion handler.
///
/// Zero is success; the named constants follow the device-OS system error
/// table. Any other value is a transport error passed through untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultCode(pub i32);

impl ResultCode {
    /// Sent (and acknowledged, when an acknowledgement was requested).
    pub const NONE: Self = Self(0);
    /// Generic failure; used when a request could not be accepted at all.
    pub const UNKNOWN: Self = Self(-100);
    /// Another publish on the same binder is still in flight.
    pub const BUSY: Self = Self(-110);
    /// The send primitive shut down while the request was still queued.
    pub const CANCELLED: Self = Self(-140);
    /// No acknowledgement arrived before the transport deadline.
    pub const TIMEOUT: Self = Self(-160);

    pub fn is_success(self) -> bool {
        self == Self::NONE
    }

    pub fn outcome(self) -> PublishOutcome {
        match self {
            Self::NONE => PublishOutcome::Delivered,
            Self::TIMEOUT => PublishOutcome::TimedOut,
            _ => PublishOutcome::Failed,
        }
    }

    /// Symbolic name for the well-known codes.
    pub fn name(self) -> Option<&'static str> {
        match self {
            Self::NONE => Some("NONE"),
            Self::UNKNOWN => Some("UNKNOWN"),
            Self::BUSY => Some("BUSY"),
            Self::CANCELLED => Some("CANCELLED"),
            Self::TIMEOUT => Some("TIMEOUT"),
            _ => None,
        }
    }
}

impl From<i32> for ResultCode {
    fn from(code: i32) -> Self {
        Self(code)
    }
}

impl From<ResultCode> for i32 {
    fn from(code: ResultCode) -> Self {
        code.0
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{} ({name})", self.0),
            None => write!(f, "{}", self.0),
        }
    }
}

/// Coarse classification of a [`ResultCode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Delivered,
    TimedOut,
    Failed,
}
