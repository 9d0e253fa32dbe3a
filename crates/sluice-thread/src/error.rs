//! Structural errors of the thread tree

use crate::tree::ThreadId;
use thiserror::Error;

/// Errors returned by [`ThreadTree`](crate::ThreadTree) operations
#[derive(Debug, Error)]
pub enum ThreadError {
    /// The referenced node does not exist (never inserted, or pruned)
    #[error("thread {0} is not part of the tree")]
    NotFound(ThreadId),

    /// `add_child` on a node that already has a different parent
    #[error("thread {child} is already parented to {parent}")]
    AlreadyParented { child: ThreadId, parent: ThreadId },

    /// `add_child` that would make a node its own ancestor
    #[error("attaching {child} beneath {parent} would create a cycle")]
    WouldCycle { parent: ThreadId, child: ThreadId },

    /// `remove_child` on a node that is not a child of the given parent
    #[error("thread {child} is not a child of {parent}")]
    NotAChild { parent: ThreadId, child: ThreadId },

    /// `remove_child` on a running or stopping child
    #[error("thread {0} is still running; stop it before detaching")]
    StillRunning(ThreadId),

    /// `start` on a child whose parent has not reached running yet
    #[error("parent {0} must be running before its children start")]
    ParentNotRunning(ThreadId),

    /// Operation not valid for the node's current state
    #[error("thread {thread} is {state}; {operation} is not valid")]
    InvalidState {
        thread: ThreadId,
        state: &'static str,
        operation: &'static str,
    },

    /// A parent-synced node was inserted without a parent to sync to
    #[error("thread {0} syncs to its parent tick but has no parent")]
    SyncWithoutParent(ThreadId),

    /// The OS refused to spawn the backing thread
    #[error("failed to spawn os thread: {0}")]
    Spawn(String),
}
