use std::fmt;
use std::str::FromStr;

use ackpub_core::{AckpubError, PublishFlags, DEFAULT_TTL_SECS};
use serde::Deserialize;

/// What a binder does with a publish issued while another is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverlapPolicy {
    /// Refuse the new publish and complete it immediately with `BUSY`.
    #[default]
    Reject,
    /// Send the new publish anyway. Earlier publishes still complete
    /// through the handler; only the latest one clears the in-flight state.
    Overwrite,
}

impl FromStr for OverlapPolicy {
    type Err = AckpubError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reject" => Ok(Self::Reject),
            "overwrite" => Ok(Self::Overwrite),
            _ => Err(AckpubError::InvalidInput(
                "overlap policy must be `reject` or `overwrite`",
            )),
        }
    }
}

impl fmt::Display for OverlapPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reject => f.write_str("reject"),
            Self::Overwrite => f.write_str("overwrite"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BinderConfig {
    /// TTL used when a publish does not pass one.
    pub default_ttl: u32,
    /// Flags used when a publish does not pass any.
    pub default_flags: PublishFlags,
    pub overlap_policy: OverlapPolicy,
}

impl Default for BinderConfig {
    fn default() -> Self {
        Self {
            default_ttl: DEFAULT_TTL_SECS,
            default_flags: PublishFlags::PRIVATE | PublishFlags::WITH_ACK,
            overlap_policy: OverlapPolicy::Reject,
        }
    }
}
