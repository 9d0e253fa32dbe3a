//! Engine error types
//!
//! Three distinct failure families exist (cancelling an already-released
//! scope is deliberately not one of them - that is a successful no-op):
//!
//! - [`StructuralError`]: a requested graph mutation is invalid. Returned
//!   to the task submitter through its failed handle.
//! - [`ProcessingError`]: one recall instance failed for one run. Contained
//!   to that (template, run) pair and reported as an event; the rest of
//!   the cycle proceeds.
//! - [`TaskError`]: the submission path itself failed (queue full,
//!   engine gone).

use crate::types::{AudioId, ChannelId, RecallTemplateId};
use thiserror::Error;

/// Invalid structural mutation of the audio graph
#[derive(Debug, Clone, Error)]
pub enum StructuralError {
    /// The addressed audio does not exist
    #[error("{0} does not exist")]
    NoSuchAudio(AudioId),

    /// The addressed channel does not exist
    #[error("{0} does not exist")]
    NoSuchChannel(ChannelId),

    /// The addressed recall template does not exist on that owner
    #[error("{0} is not bound to the addressed owner")]
    NoSuchRecall(RecallTemplateId),

    /// Link endpoint already linked elsewhere; unlink first
    #[error("{channel} is already linked to {peer}")]
    LinkOccupied { channel: ChannelId, peer: ChannelId },

    /// Link endpoints are not a valid input/output pair of two audios
    #[error("{a} and {b} cannot be linked: {reason}")]
    BadEndpoints {
        a: ChannelId,
        b: ChannelId,
        reason: &'static str,
    },

    /// The link would close a feedback path through existing links
    #[error("linking {a} to {b} would close a feedback cycle")]
    LinkCycle { a: ChannelId, b: ChannelId },

    /// The endpoint still carries runtime signals from an active run
    #[error("{0} has in-flight runtime signals; cancel or drain them before relinking")]
    ChannelBusy(ChannelId),

    /// Destroying an audio that still has active playback runs
    #[error("{0} still has active playback runs; cancel them first")]
    RunsStillActive(AudioId),
}

/// Failure of one recall instance's processing step for one run
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ProcessingError {
    message: String,
}

impl ProcessingError {
    /// Create from any printable cause
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<String> for ProcessingError {
    fn from(message: String) -> Self {
        Self { message }
    }
}

impl From<&str> for ProcessingError {
    fn from(message: &str) -> Self {
        Self {
            message: message.to_string(),
        }
    }
}

/// Failure of the task submission path itself
#[derive(Debug, Clone, Error)]
pub enum TaskError {
    /// The bounded task queue is full; the audio loop is not draining
    #[error("task queue is full")]
    QueueFull,

    /// The consuming engine is gone
    #[error("engine is shut down")]
    Disconnected,
}
