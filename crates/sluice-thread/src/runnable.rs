//! The work a thread-tree node performs
//!
//! A [`Runnable`] is the payload of one tree node. The runtime calls
//! [`Runnable::setup`] once on the node's own OS thread before the first
//! tick, [`Runnable::tick`] at the node's cadence, and
//! [`Runnable::teardown`] after the last tick - whether the node stopped
//! cleanly or faulted.
//!
//! A tick error is always fatal for the node: the thread stops, the fault
//! is reported on the tree's event channel, and the supervisor detaches
//! the subtree. Recoverable per-item failures (a single effect instance
//! misbehaving, a dropped message) are the runnable's own business and
//! must not surface here.

use thiserror::Error;

/// Unrecoverable failure inside a node's setup or tick
#[derive(Debug, Error)]
#[error("{message}")]
pub struct FatalThreadError {
    message: String,
}

impl FatalThreadError {
    /// Create a fault from any printable cause
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<String> for FatalThreadError {
    fn from(message: String) -> Self {
        Self { message }
    }
}

impl From<&str> for FatalThreadError {
    fn from(message: &str) -> Self {
        Self {
            message: message.to_string(),
        }
    }
}

/// Recurring work bound to one thread-tree node
pub trait Runnable: Send {
    /// Called once on the node's OS thread before the first tick
    fn setup(&mut self) -> Result<(), FatalThreadError> {
        Ok(())
    }

    /// One cycle of work at the node's cadence
    fn tick(&mut self) -> Result<(), FatalThreadError>;

    /// Called once after the last tick, on the node's OS thread
    fn teardown(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_error_display() {
        let err = FatalThreadError::new("device vanished");
        assert_eq!(err.to_string(), "device vanished");

        let err: FatalThreadError = "short".into();
        assert_eq!(err.to_string(), "short");
    }
}
