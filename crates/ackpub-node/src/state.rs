use std::sync::atomic::{AtomicU8, Ordering};

/// Observable lifecycle of a binder's most recent publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BinderState {
    /// Nothing issued yet, or the last result was taken.
    Idle = 0,
    /// A publish was issued and its completion has not arrived.
    InFlight = 1,
    /// The completion arrived and its result has not been taken.
    Completed = 2,
}

impl BinderState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::InFlight,
            2 => Self::Completed,
            _ => Self::Idle,
        }
    }
}

/// Lock-free cell shared between the issuing context and the completion
/// context.
#[derive(Debug)]
pub(crate) struct AtomicBinderState(AtomicU8);

impl AtomicBinderState {
    pub(crate) fn new(state: BinderState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub(crate) fn load(&self) -> BinderState {
        BinderState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn store(&self, state: BinderState) {
        self.0.store(state as u8, Ordering::Release);
    }

    /// Moves `from` to `to`; returns whether the swap happened.
    pub(crate) fn transition(&self, from: BinderState, to: BinderState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}
