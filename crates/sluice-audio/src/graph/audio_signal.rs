//! Audio signal - one frame buffer inside a recycling
//!
//! A recycling owns exactly one template signal (the prototype: preset
//! frames, no concrete playback) and zero or more runtime signals, one
//! per live run. Frame storage is a `basedrop` allocation so releasing a
//! runtime signal at a cycle boundary never runs a deallocator on the
//! audio thread.

use basedrop::Owned;

use crate::gc::gc_handle;
use crate::types::{FrameBuffer, RecallId, Sample};

/// Role of a signal inside its recycling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalRole {
    /// Prototype content, untouched by playback
    Template,
    /// Live buffer owned by one run
    Runtime(RecallId),
}

/// A frame buffer, template or runtime
pub struct AudioSignal {
    role: SignalRole,
    buffer: Owned<FrameBuffer>,
    /// Declared stop point in frames; `None` grows until released
    stop_at: Option<usize>,
}

impl AudioSignal {
    /// New empty template signal
    pub fn template() -> Self {
        Self::template_with_frames(Vec::new())
    }

    /// New template signal holding preset frames
    pub fn template_with_frames(frames: Vec<Sample>) -> Self {
        Self {
            role: SignalRole::Template,
            buffer: Owned::new(&gc_handle(), FrameBuffer::from_frames(frames)),
            stop_at: None,
        }
    }

    /// New runtime signal for one run
    pub fn runtime(recall_id: RecallId, stop_at: Option<usize>) -> Self {
        Self {
            role: SignalRole::Runtime(recall_id),
            buffer: Owned::new(&gc_handle(), FrameBuffer::default()),
            stop_at,
        }
    }

    /// Role of this signal
    pub fn role(&self) -> SignalRole {
        self.role
    }

    /// The owning run for runtime signals, `None` for the template
    pub fn recall_id(&self) -> Option<RecallId> {
        match self.role {
            SignalRole::Template => None,
            SignalRole::Runtime(id) => Some(id),
        }
    }

    /// Whether this is the template signal
    pub fn is_template(&self) -> bool {
        self.role == SignalRole::Template
    }

    /// Current length in frames
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Whether the buffer holds no frames yet
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Declared stop point, if any
    pub fn stop_at(&self) -> Option<usize> {
        self.stop_at
    }

    /// Raise the declared stop point (never lowers it)
    pub fn extend_stop_at(&mut self, stop_at: usize) {
        self.stop_at = Some(self.stop_at.map_or(stop_at, |cur| cur.max(stop_at)));
    }

    /// Frame storage
    pub fn buffer(&self) -> &FrameBuffer {
        &self.buffer
    }

    /// Frame storage, mutable
    pub fn buffer_mut(&mut self) -> &mut FrameBuffer {
        &mut self.buffer
    }

    /// Grow the buffer so the window `position..position + frames` exists,
    /// clamped to the stop point when one is declared
    ///
    /// Returns the usable window length. Shrinking never happens here;
    /// only release drops frames.
    pub fn ensure_window(&mut self, position: usize, frames: usize) -> usize {
        let len = match self.stop_at {
            Some(stop) => stop.saturating_sub(position).min(frames),
            None => frames,
        };
        if len > 0 {
            self.buffer.grow_to(position + len);
        }
        len
    }
}

impl std::fmt::Debug for AudioSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioSignal")
            .field("role", &self.role)
            .field("len", &self.buffer.len())
            .field("stop_at", &self.stop_at)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_has_no_recall_id() {
        let signal = AudioSignal::template_with_frames(vec![0.1, 0.2]);
        assert!(signal.is_template());
        assert_eq!(signal.recall_id(), None);
        assert_eq!(signal.len(), 2);
    }

    #[test]
    fn test_runtime_window_grows_toward_stop() {
        let mut signal = AudioSignal::runtime(RecallId(1), Some(700));
        assert_eq!(signal.recall_id(), Some(RecallId(1)));

        assert_eq!(signal.ensure_window(0, 512), 512);
        assert_eq!(signal.len(), 512);

        // Clamped at the stop point
        assert_eq!(signal.ensure_window(512, 512), 188);
        assert_eq!(signal.len(), 700);

        // Past the stop point nothing grows
        assert_eq!(signal.ensure_window(700, 512), 0);
        assert_eq!(signal.len(), 700);
    }

    #[test]
    fn test_unbounded_runtime_keeps_growing() {
        let mut signal = AudioSignal::runtime(RecallId(2), None);
        assert_eq!(signal.ensure_window(0, 256), 256);
        assert_eq!(signal.ensure_window(256, 256), 256);
        assert_eq!(signal.len(), 512);
    }

    #[test]
    fn test_stop_point_only_extends() {
        let mut signal = AudioSignal::runtime(RecallId(3), Some(100));
        signal.extend_stop_at(50);
        assert_eq!(signal.stop_at(), Some(100));
        signal.extend_stop_at(200);
        assert_eq!(signal.stop_at(), Some(200));
    }
}
