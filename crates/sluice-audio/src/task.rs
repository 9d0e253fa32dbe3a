//! Structural task queue
//!
//! Any thread may request a graph mutation; only the audio loop applies
//! it, exactly once, at the start of a cycle. The queue is a bounded
//! crossbeam channel: enqueuing never blocks (a full queue fails the
//! submit immediately), and [`TaskQueue::drain_due`] takes a length
//! snapshot first so tasks enqueued while draining - including the
//! engine's own deferred cancellations - wait for the next cycle and are
//! never applied mid-drain.
//!
//! Each submission hands back a [`TaskHandle`]; the audio loop resolves
//! it with the task's outcome once applied, so structural rejections
//! reach the submitter as a failed handle rather than a log line.

use crossbeam::channel::{bounded, Receiver, Sender, TrySendError};
use thiserror::Error;
use tokio::sync::oneshot;

use crate::error::{StructuralError, TaskError};
use crate::graph::RecallOwner;
use crate::recall::Recall;
use crate::types::{AudioId, ChannelId, ChannelKind, RecallId, RecallTemplateId};

/// One requested mutation of the audio graph
///
/// Large payloads (recall templates) ride in the descriptor as boxed
/// trait objects so the descriptor itself stays small on the queue.
pub enum TaskDescriptor {
    /// Create an audio with the given strand count and pad counts
    AddAudio {
        audio_channels: usize,
        output_pads: usize,
        input_pads: usize,
    },
    /// Destroy an audio; fails while runs are still active on it
    RemoveAudio { audio: AudioId },
    /// Set the pad count of one kind
    ResizePads {
        audio: AudioId,
        kind: ChannelKind,
        pads: usize,
    },
    /// Set the audio-channel (strand) count
    SetAudioChannels { audio: AudioId, count: usize },
    /// Link two strands for cross-audio routing
    Link { a: ChannelId, b: ChannelId },
    /// Remove a strand's link (both ends become unlinked)
    Unlink { channel: ChannelId },
    /// Bind an audio-scoped recall template
    AttachAudioRecall {
        audio: AudioId,
        recall: Box<dyn Recall>,
    },
    /// Bind a channel-scoped recall template
    AttachChannelRecall {
        channel: ChannelId,
        recall: Box<dyn Recall>,
    },
    /// Start a playback run on an audio; mints a fresh recall id
    StartPlayback {
        audio: AudioId,
        /// Stop point in frames; `None` runs until cancelled
        stop_at: Option<usize>,
    },
    /// Cancel a run (or all runs) on an audio and its own strands
    CancelAudio {
        audio: AudioId,
        recall_id: Option<RecallId>,
    },
    /// Cancel a run (or all runs) on a single strand
    CancelChannel {
        channel: ChannelId,
        recall_id: Option<RecallId>,
    },
    /// Cancel a run's (or all runs') clones of one template
    CancelRecall {
        owner: RecallOwner,
        template: RecallTemplateId,
        recall_id: Option<RecallId>,
    },
}

impl std::fmt::Debug for TaskDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AddAudio {
                audio_channels,
                output_pads,
                input_pads,
            } => f
                .debug_struct("AddAudio")
                .field("audio_channels", audio_channels)
                .field("output_pads", output_pads)
                .field("input_pads", input_pads)
                .finish(),
            Self::RemoveAudio { audio } => write!(f, "RemoveAudio({})", audio),
            Self::ResizePads { audio, kind, pads } => {
                write!(f, "ResizePads({}, {}, {})", audio, kind, pads)
            }
            Self::SetAudioChannels { audio, count } => {
                write!(f, "SetAudioChannels({}, {})", audio, count)
            }
            Self::Link { a, b } => write!(f, "Link({}, {})", a, b),
            Self::Unlink { channel } => write!(f, "Unlink({})", channel),
            Self::AttachAudioRecall { audio, .. } => write!(f, "AttachAudioRecall({})", audio),
            Self::AttachChannelRecall { channel, .. } => {
                write!(f, "AttachChannelRecall({})", channel)
            }
            Self::StartPlayback { audio, stop_at } => {
                write!(f, "StartPlayback({}, {:?})", audio, stop_at)
            }
            Self::CancelAudio { audio, recall_id } => {
                write!(f, "CancelAudio({}, {:?})", audio, recall_id)
            }
            Self::CancelChannel { channel, recall_id } => {
                write!(f, "CancelChannel({}, {:?})", channel, recall_id)
            }
            Self::CancelRecall {
                owner,
                template,
                recall_id,
            } => write!(f, "CancelRecall({:?}, {}, {:?})", owner, template, recall_id),
        }
    }
}

/// Successful outcome of an applied task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskReply {
    /// Applied; nothing to report
    Done,
    /// The created audio's id
    AudioAdded(AudioId),
    /// The bound template's id
    RecallAttached(RecallTemplateId),
    /// The minted run id
    PlaybackStarted(RecallId),
}

/// How a submitted task can fail
#[derive(Debug, Error)]
pub enum TaskFailure {
    /// The submission path failed before the task reached the queue
    #[error(transparent)]
    Transport(#[from] TaskError),

    /// The audio loop rejected the mutation
    #[error(transparent)]
    Rejected(#[from] StructuralError),
}

pub(crate) type TaskOutcome = Result<TaskReply, StructuralError>;

/// A queued task: descriptor plus its reply slot
pub(crate) struct Task {
    pub(crate) descriptor: TaskDescriptor,
    pub(crate) reply: Option<oneshot::Sender<TaskOutcome>>,
}

/// Awaitable outcome of one submitted task
#[derive(Debug)]
pub struct TaskHandle {
    receiver: oneshot::Receiver<TaskOutcome>,
}

impl TaskHandle {
    /// Block until the task was applied at a cycle boundary
    pub fn wait(self) -> Result<TaskReply, TaskFailure> {
        match self.receiver.blocking_recv() {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(rejected)) => Err(TaskFailure::Rejected(rejected)),
            Err(_) => Err(TaskFailure::Transport(TaskError::Disconnected)),
        }
    }

    /// Non-blocking poll; `None` while the task is still pending
    pub fn try_wait(&mut self) -> Option<Result<TaskReply, TaskFailure>> {
        match self.receiver.try_recv() {
            Ok(Ok(reply)) => Some(Ok(reply)),
            Ok(Err(rejected)) => Some(Err(TaskFailure::Rejected(rejected))),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => {
                Some(Err(TaskFailure::Transport(TaskError::Disconnected)))
            }
        }
    }
}

/// Cloneable submission side of the task queue
#[derive(Clone)]
pub struct TaskSender {
    tx: Sender<Task>,
}

impl TaskSender {
    /// Submit a task; returns immediately with an awaitable handle
    pub fn submit(&self, descriptor: TaskDescriptor) -> Result<TaskHandle, TaskError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let task = Task {
            descriptor,
            reply: Some(reply_tx),
        };
        match self.tx.try_send(task) {
            Ok(()) => Ok(TaskHandle { receiver: reply_rx }),
            Err(TrySendError::Full(_)) => Err(TaskError::QueueFull),
            Err(TrySendError::Disconnected(_)) => Err(TaskError::Disconnected),
        }
    }

    /// Submit without caring about the outcome (internal deferred work)
    pub(crate) fn submit_detached(&self, descriptor: TaskDescriptor) -> Result<(), TaskError> {
        let task = Task {
            descriptor,
            reply: None,
        };
        match self.tx.try_send(task) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(TaskError::QueueFull),
            Err(TrySendError::Disconnected(_)) => Err(TaskError::Disconnected),
        }
    }
}

/// Consuming side, owned by the audio loop
pub(crate) struct TaskQueue {
    rx: Receiver<Task>,
}

impl TaskQueue {
    /// Number of tasks currently queued
    pub(crate) fn len(&self) -> usize {
        self.rx.len()
    }

    /// Move every task that was queued when the call began into `due`
    ///
    /// Tasks enqueued during the drain stay queued for the next cycle.
    pub(crate) fn drain_due(&mut self, due: &mut Vec<Task>) {
        let snapshot = self.rx.len();
        for _ in 0..snapshot {
            match self.rx.try_recv() {
                Ok(task) => due.push(task),
                Err(_) => break,
            }
        }
    }
}

/// Create a task channel pair with bounded capacity
pub(crate) fn task_channel(capacity: usize) -> (TaskSender, TaskQueue) {
    let (tx, rx) = bounded(capacity);
    (TaskSender { tx }, TaskQueue { rx })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order_and_snapshot_drain() {
        let (sender, mut queue) = task_channel(8);
        for pads in [1, 2, 3] {
            sender
                .submit(TaskDescriptor::ResizePads {
                    audio: AudioId(0),
                    kind: ChannelKind::Output,
                    pads,
                })
                .unwrap();
        }

        let mut due = Vec::new();
        queue.drain_due(&mut due);
        let pads: Vec<usize> = due
            .iter()
            .map(|t| match t.descriptor {
                TaskDescriptor::ResizePads { pads, .. } => pads,
                _ => panic!("unexpected descriptor"),
            })
            .collect();
        assert_eq!(pads, vec![1, 2, 3]);

        // A task arriving after the drain waits for the next one
        sender
            .submit(TaskDescriptor::Unlink {
                channel: ChannelId(0),
            })
            .unwrap();
        let mut next = Vec::new();
        queue.drain_due(&mut next);
        assert_eq!(next.len(), 1);
    }

    #[test]
    fn test_full_queue_fails_submit_immediately() {
        let (sender, _queue) = task_channel(1);
        sender
            .submit(TaskDescriptor::Unlink {
                channel: ChannelId(0),
            })
            .unwrap();
        let err = sender
            .submit(TaskDescriptor::Unlink {
                channel: ChannelId(1),
            })
            .unwrap_err();
        assert!(matches!(err, TaskError::QueueFull));
    }

    #[test]
    fn test_torn_down_engine_resolves_handle_as_disconnected() {
        let (sender, queue) = task_channel(4);
        let mut handle = sender
            .submit(TaskDescriptor::Unlink {
                channel: ChannelId(0),
            })
            .unwrap();
        // Engine teardown: consumer and producers both go away, and the
        // queued task (with its reply slot) is destroyed unapplied
        drop(queue);
        drop(sender);

        match handle.try_wait() {
            Some(Err(TaskFailure::Transport(TaskError::Disconnected))) => {}
            other => panic!("unexpected outcome: {:?}", other.map(|r| r.is_ok())),
        }
    }
}
