//! Thread run-state machine
//!
//! Every node in the thread tree carries one of four states:
//!
//! ```text
//! Initial ──► Running ──► Stopping ──► Stopped
//! ```
//!
//! Transitions are one-way. A stopped thread is never restarted - build a
//! fresh node instead. The state lives in an atomic cell so the supervisor
//! and the node's own OS thread can both observe it without locking; all
//! forward transitions go through compare-and-swap so concurrent stop
//! requests and fault exits cannot race each other into an invalid state.

use std::sync::atomic::{AtomicU8, Ordering};

/// Run state of a single thread-tree node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ThreadState {
    /// Created, not yet started
    Initial = 0,
    /// OS thread is live and ticking
    Running = 1,
    /// Stop requested; the OS thread will exit after the current tick
    Stopping = 2,
    /// OS thread has exited (cleanly or after a fault)
    Stopped = 3,
}

impl ThreadState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => ThreadState::Initial,
            1 => ThreadState::Running,
            2 => ThreadState::Stopping,
            _ => ThreadState::Stopped,
        }
    }

    /// Human-readable name for logs and errors
    pub fn name(&self) -> &'static str {
        match self {
            ThreadState::Initial => "initial",
            ThreadState::Running => "running",
            ThreadState::Stopping => "stopping",
            ThreadState::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for ThreadState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Atomic holder for a [`ThreadState`]
///
/// Readable from any thread. Writes go through [`StateCell::try_advance`],
/// which only succeeds for the expected current state, except for the
/// terminal [`ThreadState::Stopped`] which may be forced (the exit path of
/// the OS thread must always win).
pub struct StateCell(AtomicU8);

impl StateCell {
    /// New cell in [`ThreadState::Initial`]
    pub fn new() -> Self {
        Self(AtomicU8::new(ThreadState::Initial as u8))
    }

    /// Current state
    #[inline]
    pub fn get(&self) -> ThreadState {
        ThreadState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Attempt the transition `from -> to`; returns whether it happened
    ///
    /// Only forward transitions are accepted; anything that would move the
    /// machine backwards is rejected without touching the cell.
    pub fn try_advance(&self, from: ThreadState, to: ThreadState) -> bool {
        if (to as u8) <= (from as u8) {
            return false;
        }
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Force the terminal state
    ///
    /// Used by the OS thread on exit; valid from any prior state.
    pub fn force_stopped(&self) {
        self.0.store(ThreadState::Stopped as u8, Ordering::Release);
    }

    /// Whether the node is currently in [`ThreadState::Running`]
    #[inline]
    pub fn is_running(&self) -> bool {
        self.get() == ThreadState::Running
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let cell = StateCell::new();
        assert_eq!(cell.get(), ThreadState::Initial);
        assert!(!cell.is_running());
    }

    #[test]
    fn test_forward_transitions() {
        let cell = StateCell::new();
        assert!(cell.try_advance(ThreadState::Initial, ThreadState::Running));
        assert!(cell.is_running());
        assert!(cell.try_advance(ThreadState::Running, ThreadState::Stopping));
        assert!(cell.try_advance(ThreadState::Stopping, ThreadState::Stopped));
        assert_eq!(cell.get(), ThreadState::Stopped);
    }

    #[test]
    fn test_wrong_expected_state_is_rejected() {
        let cell = StateCell::new();
        // Not running yet, so a stop request must not take effect
        assert!(!cell.try_advance(ThreadState::Running, ThreadState::Stopping));
        assert_eq!(cell.get(), ThreadState::Initial);
    }

    #[test]
    fn test_no_reentry_after_stopped() {
        let cell = StateCell::new();
        cell.force_stopped();
        assert!(!cell.try_advance(ThreadState::Stopped, ThreadState::Running));
        assert!(!cell.try_advance(ThreadState::Initial, ThreadState::Running));
        assert_eq!(cell.get(), ThreadState::Stopped);
    }
}
