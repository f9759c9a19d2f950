//! Guarded lifecycle transitions
//!
//! Every flag a stream exposes is derived from one of the state enums here,
//! and every change goes through [`Lifecycle::try_transition`]. A transition
//! only happens when the current state matches `from` and the edge is legal,
//! which is what makes the "fires exactly once" events exactly once.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

/// A state enum with a fixed set of legal edges.
pub trait Lifecycle: Copy + Eq + fmt::Debug {
    /// Whether `self -> to` is a legal edge.
    fn permits(self, to: Self) -> bool;

    /// Move from `from` to `to` if the current state is `from` and the edge
    /// is legal. Returns whether the transition happened.
    fn try_transition(&mut self, from: Self, to: Self) -> bool {
        if *self != from || !from.permits(to) {
            return false;
        }
        *self = to;
        tracing::trace!(?from, ?to, "state transition");
        true
    }
}

/// Destroy lifecycle shared by every stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DestroyState {
    #[default]
    Live,
    /// A transport destroy is in flight.
    Destroying,
    Destroyed,
}

impl Lifecycle for DestroyState {
    fn permits(self, to: Self) -> bool {
        use DestroyState::*;
        matches!(
            (self, to),
            (Live, Destroying) | (Destroying, Destroyed) | (Destroying, Live) | (Live, Destroyed)
        )
    }
}

/// Read-side lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadState {
    #[default]
    Open,
    Ended,
}

impl Lifecycle for ReadState {
    fn permits(self, to: Self) -> bool {
        matches!((self, to), (ReadState::Open, ReadState::Ended))
    }
}

/// Write-side lifecycle. Strictly `Open -> Ending -> Finished`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteState {
    #[default]
    Open,
    /// `end` was called; no more writes are accepted.
    Ending,
    /// Finalize completed and `finish` was emitted.
    Finished,
}

impl Lifecycle for WriteState {
    fn permits(self, to: Self) -> bool {
        use WriteState::*;
        matches!((self, to), (Open, Ending) | (Ending, Finished))
    }
}

/// A lifecycle state behind its own lock.
#[derive(Debug, Default)]
pub struct StateCell<S> {
    state: Mutex<S>,
}

impl<S: Lifecycle> StateCell<S> {
    pub fn new(initial: S) -> Self {
        Self {
            state: Mutex::new(initial),
        }
    }

    pub fn get(&self) -> S {
        *self.state.lock()
    }

    pub fn try_transition(&self, from: S, to: S) -> bool {
        self.state.lock().try_transition(from, to)
    }
}

/// One-shot latch: `try_set` returns `true` for exactly one caller.
#[derive(Debug, Default)]
pub struct Latch {
    set: AtomicBool,
}

impl Latch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_set(&self) -> bool {
        !self.set.swap(true, Ordering::AcqRel)
    }

    pub fn is_set(&self) -> bool {
        self.set.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_state_is_monotonic() {
        let mut state = WriteState::Open;
        assert!(!state.try_transition(WriteState::Open, WriteState::Finished));
        assert!(state.try_transition(WriteState::Open, WriteState::Ending));
        assert!(!state.try_transition(WriteState::Open, WriteState::Ending));
        assert!(!state.try_transition(WriteState::Ending, WriteState::Open));
        assert!(state.try_transition(WriteState::Ending, WriteState::Finished));
        assert!(!state.try_transition(WriteState::Ending, WriteState::Finished));
        assert_eq!(state, WriteState::Finished);
    }

    #[test]
    fn test_destroy_state_allows_retry_after_failure() {
        let cell = StateCell::new(DestroyState::Live);
        assert!(cell.try_transition(DestroyState::Live, DestroyState::Destroying));
        // A second destroy while one is in flight is refused.
        assert!(!cell.try_transition(DestroyState::Live, DestroyState::Destroying));
        assert!(cell.try_transition(DestroyState::Destroying, DestroyState::Live));
        assert!(cell.try_transition(DestroyState::Live, DestroyState::Destroying));
        assert!(cell.try_transition(DestroyState::Destroying, DestroyState::Destroyed));
        assert!(!cell.try_transition(DestroyState::Destroyed, DestroyState::Live));
        assert_eq!(cell.get(), DestroyState::Destroyed);
    }

    #[test]
    fn test_read_state_ends_once() {
        let cell = StateCell::new(ReadState::default());
        assert!(cell.try_transition(ReadState::Open, ReadState::Ended));
        assert!(!cell.try_transition(ReadState::Open, ReadState::Ended));
    }

    #[test]
    fn test_latch() {
        let latch = Latch::new();
        assert!(!latch.is_set());
        assert!(latch.try_set());
        assert!(!latch.try_set());
        assert!(latch.is_set());
    }
}
