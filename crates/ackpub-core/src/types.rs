use std::fmt;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::error::AckpubError;

/// TTL applied when the caller does not supply one.
///
/// The remote service currently ignores TTL; the value is kept for
/// compatibility with callers that expect 60.
pub const DEFAULT_TTL_SECS: u32 = 60;

bitflags! {
    /// Publish flags merged across independent axes (visibility and
    /// acknowledgement mode).
    ///
    /// `PUBLIC` is the absence of `PRIVATE` and is exposed as an associated
    /// constant rather than a bit.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(try_from = "String", into = "String")]
    pub struct PublishFlags: u8 {
        /// Event is only visible to the owner's account.
        const PRIVATE = 0x01;
        /// Best-effort send; do not wait for an acknowledgement.
        const NO_ACK = 0x02;
        /// Wait for the remote acknowledgement before completing.
        const WITH_ACK = 0x08;
    }
}

impl Default for PublishFlags {
    fn default() -> Self {
        Self::PUBLIC
    }
}

impl PublishFlags {
    /// Public visibility with default acknowledgement behavior.
    pub const PUBLIC: Self = Self::empty();

    pub fn visibility(self) -> Visibility {
        if self.contains(Self::PRIVATE) {
            Visibility::Private
        } else {
            Visibility::Public
        }
    }

    /// `WITH_ACK` wins when both acknowledgement flags are present.
    pub fn ack_mode(self) -> AckMode {
        if self.contains(Self::WITH_ACK) {
            AckMode::WithAck
        } else if self.contains(Self::NO_ACK) {
            AckMode::NoAck
        } else {
            AckMode::Default
        }
    }

    /// Whether the transport should wait for a remote acknowledgement.
    pub fn requires_ack(self) -> bool {
        self.ack_mode() != AckMode::NoAck
    }
}

impl fmt::Display for PublishFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("PUBLIC");
        }
        let mut first = true;
        for (name, _) in self.iter_names() {
            if !first {
                f.write_str(" | ")?;
            }
            f.write_str(name)?;
            first = false;
        }
        Ok(())
    }
}

impl TryFrom<String> for PublishFlags {
    type Error = AckpubError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        parse_flags(&value)
    }
}

impl From<PublishFlags> for String {
    fn from(flags: PublishFlags) -> Self {
        flags.to_string()
    }
}

/// Parses a `|`/`,` separated flag expression such as `"PRIVATE | WITH_ACK"`.
///
/// Names are case-insensitive; `PUBLIC` contributes no bits and an empty
/// expression yields `PUBLIC`.
pub fn parse_flags(input: &str) -> Result<PublishFlags, AckpubError> {
    let mut flags = PublishFlags::empty();
    for raw in input.split(|c| c == '|' || c == ',') {
        let name = raw.trim().to_ascii_uppercase();
        if name.is_empty() || name == "PUBLIC" {
            continue;
        }
        match PublishFlags::from_name(&name) {
            Some(flag) => flags |= flag,
            None => return Err(AckpubError::InvalidFlags(raw.trim().to_string())),
        }
    }
    Ok(flags)
}

/// Visibility axis of [`PublishFlags`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Public,
    Private,
}

/// Acknowledgement axis of [`PublishFlags`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckMode {
    /// Neither flag set; the transport acknowledges by default.
    Default,
    WithAck,
    NoAck,
}

/// Per-publish identifier handed to the send primitive so its completion can
/// be routed back to the issuing binder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CorrelationToken(pub u64);

impl fmt::Display for CorrelationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::{parse_flags, AckMode, CorrelationToken, PublishFlags, Visibility};
    use crate::error::AckpubError;

    #[test]
    fn flag_merge_is_order_independent() {
        let a = PublishFlags::PRIVATE | PublishFlags::WITH_ACK;
        let b = PublishFlags::WITH_ACK | PublishFlags::PRIVATE;
        assert_eq!(a, b);

        let left = (PublishFlags::PRIVATE | PublishFlags::NO_ACK) | PublishFlags::WITH_ACK;
        let right = PublishFlags::PRIVATE | (PublishFlags::NO_ACK | PublishFlags::WITH_ACK);
        assert_eq!(left, right);
        assert_eq!(PublishFlags::PUBLIC | PublishFlags::WITH_ACK, PublishFlags::WITH_ACK);
    }

    #[test]
    fn axes_are_classified_independently() {
        let flags = PublishFlags::PRIVATE | PublishFlags::NO_ACK;
        assert_eq!(flags.visibility(), Visibility::Private);
        assert_eq!(flags.ack_mode(), AckMode::NoAck);
        assert!(!flags.requires_ack());

        assert_eq!(PublishFlags::default().visibility(), Visibility::Public);
        assert_eq!(PublishFlags::default().ack_mode(), AckMode::Default);
        assert!(PublishFlags::default().requires_ack());

        let both = PublishFlags::NO_ACK | PublishFlags::WITH_ACK;
        assert_eq!(both.ack_mode(), AckMode::WithAck);
    }

    #[test]
    fn parse_accepts_names_in_any_case_and_order() {
        assert_eq!(
            parse_flags("with_ack | PRIVATE").unwrap(),
            PublishFlags::PRIVATE | PublishFlags::WITH_ACK
        );
        assert_eq!(parse_flags("PUBLIC, NO_ACK").unwrap(), PublishFlags::NO_ACK);
        assert_eq!(parse_flags("  ").unwrap(), PublishFlags::PUBLIC);
    }

    #[test]
    fn parse_rejects_unknown_names() {
        assert_eq!(
            parse_flags("PRIVATE | LOUD"),
            Err(AckpubError::InvalidFlags("LOUD".into()))
        );
    }

    #[test]
    fn display_lists_set_flags() {
        assert_eq!(PublishFlags::PUBLIC.to_string(), "PUBLIC");
        assert_eq!(
            (PublishFlags::WITH_ACK | PublishFlags::PRIVATE).to_string(),
            "PRIVATE | WITH_ACK"
        );
        assert_eq!(CorrelationToken(7).to_string(), "#7");
    }

    #[test]
    fn flags_deserialize_from_text() {
        #[derive(serde::Deserialize)]
        struct Doc {
            flags: PublishFlags,
        }
        let doc: Doc = toml::from_str(r#"flags = "PRIVATE | WITH_ACK""#).unwrap();
        assert_eq!(doc.flags, PublishFlags::PRIVATE | PublishFlags::WITH_ACK);
        assert!(toml::from_str::<Doc>(r#"flags = "SHOUT""#).is_err());
    }
}
