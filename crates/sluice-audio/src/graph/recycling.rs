//! Recycling - the buffer container owned by one channel strand

use std::collections::BTreeMap;

use crate::types::{RecallId, Sample};

use super::audio_signal::AudioSignal;

/// One template signal plus runtime signals keyed by run
///
/// Runtime signals are created lazily the first time a run touches the
/// strand and destroyed when that run is cancelled or finishes. The
/// template always exists and playback never mutates it.
pub struct Recycling {
    template: AudioSignal,
    runtime: BTreeMap<RecallId, AudioSignal>,
}

impl Recycling {
    /// New recycling with an empty template
    pub fn new() -> Self {
        Self {
            template: AudioSignal::template(),
            runtime: BTreeMap::new(),
        }
    }

    /// New recycling whose template holds preset frames
    pub fn with_template(frames: Vec<Sample>) -> Self {
        Self {
            template: AudioSignal::template_with_frames(frames),
            runtime: BTreeMap::new(),
        }
    }

    /// The template signal
    pub fn template(&self) -> &AudioSignal {
        &self.template
    }

    /// The template signal, mutable (content editing, not playback)
    pub fn template_mut(&mut self) -> &mut AudioSignal {
        &mut self.template
    }

    /// Runtime signal for one run, if it exists
    pub fn runtime(&self, recall_id: RecallId) -> Option<&AudioSignal> {
        self.runtime.get(&recall_id)
    }

    /// Runtime signal for one run, mutable
    pub fn runtime_mut(&mut self, recall_id: RecallId) -> Option<&mut AudioSignal> {
        self.runtime.get_mut(&recall_id)
    }

    /// Runtime signal for one run, created on first touch
    pub fn runtime_or_create(
        &mut self,
        recall_id: RecallId,
        stop_at: Option<usize>,
    ) -> &mut AudioSignal {
        self.runtime
            .entry(recall_id)
            .or_insert_with(|| AudioSignal::runtime(recall_id, stop_at))
    }

    /// Release the runtime signal of one run; reports whether one existed
    pub fn release(&mut self, recall_id: RecallId) -> bool {
        self.runtime.remove(&recall_id).is_some()
    }

    /// Release every runtime signal
    pub fn release_all(&mut self) {
        self.runtime.clear();
    }

    /// Runs that currently hold a runtime signal here
    pub fn active_runs(&self) -> impl Iterator<Item = RecallId> + '_ {
        self.runtime.keys().copied()
    }

    /// Number of live runtime signals
    pub fn runtime_count(&self) -> usize {
        self.runtime.len()
    }

    /// Whether any runtime signal is live (the strand is "busy")
    pub fn has_runtime(&self) -> bool {
        !self.runtime.is_empty()
    }
}

impl Default for Recycling {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lazy_runtime_creation() {
        let mut recycling = Recycling::new();
        assert!(!recycling.has_runtime());
        assert!(recycling.runtime(RecallId(1)).is_none());

        recycling.runtime_or_create(RecallId(1), Some(1024));
        assert_eq!(recycling.runtime_count(), 1);
        assert_eq!(
            recycling.runtime(RecallId(1)).unwrap().stop_at(),
            Some(1024)
        );

        // Second touch reuses the instance
        recycling.runtime_or_create(RecallId(1), Some(4096));
        assert_eq!(recycling.runtime_count(), 1);
        assert_eq!(
            recycling.runtime(RecallId(1)).unwrap().stop_at(),
            Some(1024)
        );
    }

    #[test]
    fn test_release_leaves_template_untouched() {
        let mut recycling = Recycling::with_template(vec![0.25; 16]);
        recycling.runtime_or_create(RecallId(1), None);
        recycling.runtime_or_create(RecallId(2), None);

        assert!(recycling.release(RecallId(1)));
        assert!(!recycling.release(RecallId(1)));
        assert_eq!(recycling.runtime_count(), 1);
        assert_eq!(recycling.template().len(), 16);

        recycling.release_all();
        assert!(!recycling.has_runtime());
        assert_eq!(recycling.template().len(), 16);
    }
}
