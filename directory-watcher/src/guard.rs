//! Single-slot in-flight guard for dispatches.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// State of a [`DispatchGuard`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardState {
    Idle,
    Busy,
}

/// Allows at most one dispatch in flight.
///
/// Clones share the same slot.
#[derive(Debug, Clone, Default)]
pub struct DispatchGuard {
    busy: Arc<AtomicBool>,
}

impl DispatchGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move from Idle to Busy. Returns `None` if already Busy.
    ///
    /// The slot returns to Idle when the token is dropped.
    pub fn try_acquire(&self) -> Option<BusyToken> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| BusyToken {
                busy: self.busy.clone(),
            })
    }

    pub fn state(&self) -> GuardState {
        if self.busy.load(Ordering::Acquire) {
            GuardState::Busy
        } else {
            GuardState::Idle
        }
    }
}

/// Proof that the guard is held.
#[derive(Debug)]
pub struct BusyToken {
    busy: Arc<AtomicBool>,
}

impl Drop for BusyToken {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}
