//! Lifecycle events emitted by the thread tree
//!
//! The tree reports node lifecycle changes on a bounded crossbeam channel
//! so failures are never silently swallowed: a faulting audio child shows
//! up here and the owner decides how to surface the degraded subsystem.

use crate::tree::ThreadId;

/// Lifecycle notification for one tree node
#[derive(Debug, Clone)]
pub enum ThreadEvent {
    /// The node's OS thread was spawned and entered running
    Started { thread: ThreadId, name: String },

    /// The node's OS thread exited cleanly
    Stopped { thread: ThreadId, name: String },

    /// The node's setup or tick failed; its OS thread has exited
    Fault {
        thread: ThreadId,
        name: String,
        message: String,
    },

    /// The supervisor removed a faulted node (and its subtree) from the tree
    Detached { thread: ThreadId, name: String },
}

impl ThreadEvent {
    /// The node this event concerns
    pub fn thread(&self) -> ThreadId {
        match self {
            ThreadEvent::Started { thread, .. }
            | ThreadEvent::Stopped { thread, .. }
            | ThreadEvent::Fault { thread, .. }
            | ThreadEvent::Detached { thread, .. } => *thread,
        }
    }
}
