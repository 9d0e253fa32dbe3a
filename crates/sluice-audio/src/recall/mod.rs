//! Recall system - per-run effect units
//!
//! A [`Recall`] is a template bound to an audio or a channel; it declares
//! the processing it performs but holds no playback state. When a run
//! (identified by a [`RecallId`]) first needs it, the template is
//! duplicated into a [`RecallRun`] clone that owns all mutable per-run
//! state (an envelope's level, a stream's loop bookkeeping). At most one
//! clone exists per (template, run) pair; cancellation or completion
//! removes the clone, and a later lookup for the same run builds a fresh
//! one - stale state is never reused.
//!
//! Dispatch is trait-object based: effect kinds implement the two small
//! capability traits and the engine drives them through a [`RecallRack`]
//! lookup, never through runtime type inspection.

mod envelope;
mod mixer;
mod stream;
mod volume;

pub use envelope::EnvelopeChannel;
pub use mixer::MixerAudio;
pub use stream::StreamChannel;
pub use volume::VolumeChannel;

use std::collections::BTreeMap;

use crate::error::ProcessingError;
use crate::types::{RecallId, RecallTemplateId, Sample};

/// Descriptive metadata of a recall template
#[derive(Debug, Clone)]
pub struct RecallInfo {
    /// Name for display and logs
    pub name: String,
    /// Category (e.g. "source", "gain", "mix")
    pub category: String,
}

impl RecallInfo {
    /// Create a new info block
    pub fn new(name: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            category: category.into(),
        }
    }
}

/// Whether a run instance wants to keep processing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// More frames to produce next cycle
    Active,
    /// No more frames to produce; release this clone
    Done,
}

/// One cycle's worth of windows handed to a run instance
///
/// The engine owns one reusable block and refills it per invocation, so
/// processing never allocates in the steady state. Channel-scoped recalls
/// see their strand's current window in `outputs[0]` (content produced so
/// far this cycle - the link pull and any earlier recall in the chain)
/// and transform or overwrite it in place. Audio-scoped recalls see one
/// window per input line and one per output line, in line order
/// (`pad * audio_channels + audio_channel`).
#[derive(Debug, Default)]
pub struct ProcessBlock {
    /// Frames in this cycle's window
    pub frames: usize,
    /// Run-relative frame position of the window start
    pub position: usize,
    /// Declared stop point of the run in frames; `None` runs until
    /// cancelled
    pub stop_at: Option<usize>,
    /// Audio-channel count of the owning audio (line mapping for
    /// audio-scoped recalls)
    pub audio_channels: usize,
    /// Template frames of the owning channel's recycling, already
    /// windowed to `position..position + frames` (empty for audio scope)
    pub template: Vec<Sample>,
    /// Input line windows (audio scope), empty for channel scope
    pub inputs: Vec<Vec<Sample>>,
    /// Output windows; channel scope uses exactly `outputs[0]`
    pub outputs: Vec<Vec<Sample>>,
}

impl ProcessBlock {
    /// Fresh empty block
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames remaining until the stop point, if one is declared
    pub fn remaining(&self) -> Option<usize> {
        self.stop_at.map(|stop| stop.saturating_sub(self.position))
    }

    /// Whether this window reaches the declared stop point
    pub fn reaches_stop(&self) -> bool {
        match self.stop_at {
            Some(stop) => self.position + self.frames >= stop,
            None => false,
        }
    }
}

/// A template effect unit bound to an audio or channel
pub trait Recall: Send {
    /// Descriptive metadata
    fn info(&self) -> &RecallInfo;

    /// Clone the template into a run instance scoped to `recall_id`
    fn duplicate(&self, recall_id: RecallId) -> Box<dyn RecallRun>;
}

/// A per-run clone of a recall template
pub trait RecallRun: Send {
    /// Called once, right after the clone is created
    fn init(&mut self) {}

    /// Process one cycle's window
    fn process(&mut self, block: &mut ProcessBlock) -> Result<RunStatus, ProcessingError>;
}

/// One attached template and its live per-run clones
pub struct RackEntry {
    id: RecallTemplateId,
    template: Box<dyn Recall>,
    clones: BTreeMap<RecallId, Box<dyn RecallRun>>,
}

impl RackEntry {
    /// Template id
    pub fn id(&self) -> RecallTemplateId {
        self.id
    }

    /// Template name (for logs and events)
    pub fn name(&self) -> &str {
        &self.template.info().name
    }

    /// Get the clone for `recall_id`, creating and initializing it on
    /// first touch
    pub fn run_for(&mut self, recall_id: RecallId) -> &mut dyn RecallRun {
        self.clones
            .entry(recall_id)
            .or_insert_with(|| {
                let mut run = self.template.duplicate(recall_id);
                run.init();
                run
            })
            .as_mut()
    }

    /// Whether a clone exists for `recall_id`
    pub fn has_run(&self, recall_id: RecallId) -> bool {
        self.clones.contains_key(&recall_id)
    }

    /// Remove the clone for `recall_id`; reports whether one existed
    pub fn release_run(&mut self, recall_id: RecallId) -> bool {
        self.clones.remove(&recall_id).is_some()
    }

    /// Remove every clone
    pub fn release_all_runs(&mut self) {
        self.clones.clear();
    }

    /// Number of live clones
    pub fn run_count(&self) -> usize {
        self.clones.len()
    }
}

/// The recall templates bound to one owner (audio or channel)
#[derive(Default)]
pub struct RecallRack {
    entries: Vec<RackEntry>,
}

impl RecallRack {
    /// Empty rack
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a template under a pre-minted id; templates run in attach
    /// order
    pub fn attach(&mut self, id: RecallTemplateId, template: Box<dyn Recall>) {
        self.entries.push(RackEntry {
            id,
            template,
            clones: BTreeMap::new(),
        });
    }

    /// Number of attached templates
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no templates are attached
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Attached entries, in attach order
    pub fn entries(&self) -> impl Iterator<Item = &RackEntry> {
        self.entries.iter()
    }

    /// Attached entries, mutable, in attach order
    pub fn entries_mut(&mut self) -> impl Iterator<Item = &mut RackEntry> {
        self.entries.iter_mut()
    }

    /// Look up one entry by template id
    pub fn entry_mut(&mut self, id: RecallTemplateId) -> Option<&mut RackEntry> {
        self.entries.iter_mut().find(|entry| entry.id == id)
    }

    /// Whether the rack holds a template with this id
    pub fn has_template(&self, id: RecallTemplateId) -> bool {
        self.entries.iter().any(|entry| entry.id == id)
    }

    /// Release clones for one run across all entries (`None` = every run)
    pub fn release(&mut self, recall_id: Option<RecallId>) {
        for entry in &mut self.entries {
            match recall_id {
                Some(id) => {
                    entry.release_run(id);
                }
                None => entry.release_all_runs(),
            }
        }
    }

    /// Whether any entry holds a clone for this run
    pub fn has_clone_for(&self, recall_id: RecallId) -> bool {
        self.entries.iter().any(|entry| entry.has_run(recall_id))
    }

    /// Whether any entry holds any clone at all
    pub fn has_any_clones(&self) -> bool {
        self.entries.iter().any(|entry| entry.run_count() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Template that counts how many clones it produced
    struct CountingTemplate {
        info: RecallInfo,
        duplications: Arc<AtomicUsize>,
    }

    struct CountingRun;

    impl Recall for CountingTemplate {
        fn info(&self) -> &RecallInfo {
            &self.info
        }

        fn duplicate(&self, _recall_id: RecallId) -> Box<dyn RecallRun> {
            self.duplications.fetch_add(1, Ordering::Relaxed);
            Box::new(CountingRun)
        }
    }

    impl RecallRun for CountingRun {
        fn process(&mut self, _block: &mut ProcessBlock) -> Result<RunStatus, ProcessingError> {
            Ok(RunStatus::Active)
        }
    }

    fn rack_with_counter() -> (RecallRack, Arc<AtomicUsize>) {
        let duplications = Arc::new(AtomicUsize::new(0));
        let mut rack = RecallRack::new();
        rack.attach(
            RecallTemplateId(0),
            Box::new(CountingTemplate {
                info: RecallInfo::new("counting", "test"),
                duplications: Arc::clone(&duplications),
            }),
        );
        (rack, duplications)
    }

    #[test]
    fn test_one_clone_per_template_and_run() {
        let (mut rack, duplications) = rack_with_counter();
        let entry = rack.entry_mut(RecallTemplateId(0)).unwrap();

        entry.run_for(RecallId(1));
        entry.run_for(RecallId(1));
        entry.run_for(RecallId(1));
        assert_eq!(duplications.load(Ordering::Relaxed), 1);
        assert_eq!(entry.run_count(), 1);

        // A different run gets its own clone
        entry.run_for(RecallId(2));
        assert_eq!(duplications.load(Ordering::Relaxed), 2);
        assert_eq!(entry.run_count(), 2);
    }

    #[test]
    fn test_release_then_lookup_builds_fresh_clone() {
        let (mut rack, duplications) = rack_with_counter();
        let entry = rack.entry_mut(RecallTemplateId(0)).unwrap();

        entry.run_for(RecallId(1));
        assert!(entry.release_run(RecallId(1)));
        assert!(!entry.has_run(RecallId(1)));

        entry.run_for(RecallId(1));
        assert_eq!(duplications.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_release_is_idempotent() {
        let (mut rack, _) = rack_with_counter();
        let entry = rack.entry_mut(RecallTemplateId(0)).unwrap();

        entry.run_for(RecallId(1));
        assert!(entry.release_run(RecallId(1)));
        // Second release of the same scope is a no-op, not an error
        assert!(!entry.release_run(RecallId(1)));
    }

    #[test]
    fn test_rack_release_filters_by_run() {
        let (mut rack, _) = rack_with_counter();
        {
            let entry = rack.entry_mut(RecallTemplateId(0)).unwrap();
            entry.run_for(RecallId(1));
            entry.run_for(RecallId(2));
        }

        rack.release(Some(RecallId(1)));
        assert!(!rack.has_clone_for(RecallId(1)));
        assert!(rack.has_clone_for(RecallId(2)));

        rack.release(None);
        assert!(!rack.has_any_clones());
    }

    #[test]
    fn test_block_stop_accounting() {
        let block = ProcessBlock {
            frames: 256,
            position: 900,
            stop_at: Some(1024),
            ..Default::default()
        };
        assert_eq!(block.remaining(), Some(124));
        assert!(block.reaches_stop());

        let endless = ProcessBlock {
            frames: 256,
            position: 1_000_000,
            stop_at: None,
            ..Default::default()
        };
        assert_eq!(endless.remaining(), None);
        assert!(!endless.reaches_stop());
    }
}
