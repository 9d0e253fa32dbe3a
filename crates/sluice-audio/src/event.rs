//! Engine change notifications
//!
//! The event bus is the only sanctioned path from the core to frontends:
//! widgets refresh from these events, never by reaching into live graph
//! state. Events are published by the audio loop at safe points (task
//! application, run release) and fan out over a bounded crossbeam
//! channel.

use crate::types::{AudioId, ChannelId, ChannelKind, RecallId, RecallTemplateId};

/// A change the core wants frontends to know about
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// An audio's pad count changed for one channel kind
    PadsChanged {
        audio: AudioId,
        kind: ChannelKind,
        old: usize,
        new: usize,
    },

    /// An audio's audio-channel count changed
    AudioChannelsChanged {
        audio: AudioId,
        old: usize,
        new: usize,
    },

    /// A channel's peer link changed; `peer` is the new state
    ///
    /// Emitted once per affected endpoint: a link produces two events, an
    /// unlink produces two events with `peer: None`.
    LinkChanged {
        channel: ChannelId,
        peer: Option<ChannelId>,
    },

    /// A playback run was started on an audio
    PlaybackStarted { audio: AudioId, recall_id: RecallId },

    /// A run finished or was cancelled everywhere and its resources are
    /// released
    RecallCompleted { recall_id: RecallId },

    /// One recall instance failed for one run and was cancelled; the rest
    /// of the cycle was unaffected
    RecallFaulted {
        recall_id: RecallId,
        template: RecallTemplateId,
        message: String,
    },
}

/// Bounded fan-out bus for [`EngineEvent`]s
///
/// Cloned receivers share one queue; give each consumer its own
/// subscription by cloning before events start flowing, or drain from a
/// single place and dispatch. Publishing never blocks the audio loop: a
/// full bus drops the event with a warning.
pub struct EventBus {
    sender: crossbeam::channel::Sender<EngineEvent>,
    receiver: crossbeam::channel::Receiver<EngineEvent>,
}

impl EventBus {
    /// Create a bus with bounded capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = crossbeam::channel::bounded(capacity);
        Self { sender, receiver }
    }

    /// Get a sender for publishing events
    pub fn sender(&self) -> EventSender {
        EventSender {
            sender: self.sender.clone(),
        }
    }

    /// Get a receiver for consuming events
    pub fn subscribe(&self) -> crossbeam::channel::Receiver<EngineEvent> {
        self.receiver.clone()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

/// Non-blocking publishing side of the bus
#[derive(Clone)]
pub struct EventSender {
    sender: crossbeam::channel::Sender<EngineEvent>,
}

impl EventSender {
    /// Publish an event; drops (with a warning) instead of blocking
    pub fn publish(&self, event: EngineEvent) {
        if let Err(err) = self.sender.try_send(event) {
            log::warn!("event bus full, dropping event: {:?}", err.into_inner());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_and_receive() {
        let bus = EventBus::new(16);
        let rx = bus.subscribe();

        bus.sender().publish(EngineEvent::RecallCompleted {
            recall_id: RecallId(9),
        });

        match rx.recv().unwrap() {
            EngineEvent::RecallCompleted { recall_id } => assert_eq!(recall_id, RecallId(9)),
            other => panic!("wrong event: {:?}", other),
        }
    }

    #[test]
    fn test_full_bus_drops_instead_of_blocking() {
        let bus = EventBus::new(1);
        let sender = bus.sender();
        sender.publish(EngineEvent::RecallCompleted {
            recall_id: RecallId(0),
        });
        // Second publish must return immediately even though nobody drains
        sender.publish(EngineEvent::RecallCompleted {
            recall_id: RecallId(1),
        });

        let rx = bus.subscribe();
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }
}
