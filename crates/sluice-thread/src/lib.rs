//! sluice-thread - supervised thread tree scheduler
//!
//! The engine runs on a small fixed set of OS threads arranged in a
//! parent/child tree: a main loop at the root, an audio loop beneath it,
//! and followers (sink, workers) beneath that. The tree enforces the
//! ordering that keeps shared state sound:
//!
//! - parents start before children and stop after them,
//! - every node walks one state machine, `initial -> running -> stopping
//!   -> stopped`, and never re-enters running,
//! - a faulting node is stopped and detached with its subtree while the
//!   rest of the tree keeps ticking, and the fault is reported as an
//!   event rather than swallowed.
//!
//! Nodes carry a [`Runnable`] payload and a [`TickRate`]: either
//! self-timed (`Hz`, for loops that stand in for an external clock) or
//! synced to the parent's completed ticks (`SyncToParent`, the
//! parent-ticks-children composition).

mod error;
mod event;
mod runnable;
mod runner;
mod state;
mod tree;

pub use error::ThreadError;
pub use event::ThreadEvent;
pub use runnable::{FatalThreadError, Runnable};
pub use runner::TickRate;
pub use state::{StateCell, ThreadState};
pub use tree::{ThreadId, ThreadTree};
