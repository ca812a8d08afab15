//! Send-primitive abstractions for ackpub.
//!
//! Binders only depend on the non-blocking send contract and completion
//! tickets defined in this crate.

pub mod memory;
pub mod primitive;

pub use memory::MemoryCloud;
pub use primitive::{
    CloudHealthSnapshot, CloudLimits, CompletionRoute, CompletionTicket, RejectReason,
    SendPrimitive,
};
