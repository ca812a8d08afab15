use bytes::Bytes;

use crate::types::{PublishFlags, DEFAULT_TTL_SECS};

/// One publish as handed to a send primitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishRequest {
    pub event_name: String,
    /// Absent means the event carries no data.
    pub data: Option<Bytes>,
    /// Seconds; ignored by the remote service.
    pub ttl: u32,
    pub flags: PublishFlags,
}

impl PublishRequest {
    /// Name-only request with the default TTL and the raw wire flags
    /// (`PUBLIC`, transport-default acknowledgement).
    ///
    /// Requests are sent as built. The binder's name-based entry points use
    /// `BinderConfig::default_flags` instead when no flags are given.
    pub fn new(event_name: impl Into<String>) -> Self {
        Self {
            event_name: event_name.into(),
            data: None,
            ttl: DEFAULT_TTL_SECS,
            flags: PublishFlags::default(),
        }
    }

    pub fn with_data(mut self, data: impl Into<Bytes>) -> Self {
        self.data = Some(data.into());
        self
    }

    pub fn with_ttl(mut self, ttl: u32) -> Self {
        self.ttl = ttl;
        self
    }

    /// Merges `flags` into the flags already on the request.
    pub fn with_flags(mut self, flags: PublishFlags) -> Self {
        self.flags |= flags;
        self
    }

    pub fn data_len(&self) -> usize {
        self.data.as_ref().map_or(0, Bytes::len)
    }
}
