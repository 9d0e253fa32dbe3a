//! sluice-audio - the real-time audio processing core
//!
//! A tree of cooperating threads advances an audio signal graph once per
//! processing cycle:
//!
//! - the **graph** ([`graph::AudioGraph`]) holds audios (pads ×
//!   audio-channels of channel strands), each strand's recycling with its
//!   template and per-run runtime signals, and the symmetric links used
//!   for cross-audio routing;
//! - **recalls** ([`recall`]) are template effect units bound to an audio
//!   or channel, cloned per concurrent run ([`types::RecallId`]) so
//!   overlapping voices never share mutable state;
//! - **tasks** ([`task`]) are one-shot structural mutations queued from
//!   any thread and applied exclusively by the audio loop at cycle
//!   boundaries;
//! - the **engine** ([`engine::Engine`]) supervises the thread tree (main
//!   loop, audio loop, sink), publishes change notifications
//!   ([`event::EngineEvent`]) and metering snapshots ([`monitor`]), and
//!   streams master frames to a [`sink::Sink`].
//!
//! The audio loop never blocks: enqueues are wait-free for producers,
//! releases defer deallocation to the GC thread ([`gc`]), and frontends
//! read copied snapshots, never live buffers.

pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod gc;
pub mod graph;
pub mod monitor;
pub mod recall;
pub mod sink;
pub mod task;
pub mod types;

pub use config::EngineConfig;
pub use engine::{AudioLoop, Engine};
pub use error::{ProcessingError, StructuralError, TaskError};
pub use event::{EngineEvent, EventBus};
pub use graph::{AudioGraph, RecallOwner};
pub use task::{TaskDescriptor, TaskFailure, TaskHandle, TaskReply, TaskSender};
pub use types::{AudioId, ChannelId, ChannelKind, FrameBuffer, RecallId, RecallTemplateId, Sample};
