//! Envelope recall - attack/release shaping with per-run level state

use crate::error::ProcessingError;
use crate::types::{RecallId, Sample};

use super::{ProcessBlock, Recall, RecallInfo, RecallRun, RunStatus};

/// Per-frame one-pole smoothing coefficient for the envelope level
const LEVEL_SLEW: Sample = 0.05;

/// Channel-scoped attack/release envelope
///
/// The template declares the shape; each run clone carries its own
/// smoothed level, so two overlapping notes through the same strand never
/// share envelope phase.
pub struct EnvelopeChannel {
    info: RecallInfo,
    attack_frames: usize,
    release_frames: usize,
}

impl EnvelopeChannel {
    /// New envelope with attack and release lengths in frames
    pub fn new(attack_frames: usize, release_frames: usize) -> Self {
        Self {
            info: RecallInfo::new("envelope", "shape"),
            attack_frames,
            release_frames,
        }
    }
}

impl Recall for EnvelopeChannel {
    fn info(&self) -> &RecallInfo {
        &self.info
    }

    fn duplicate(&self, _recall_id: RecallId) -> Box<dyn RecallRun> {
        Box::new(EnvelopeChannelRun {
            attack_frames: self.attack_frames,
            release_frames: self.release_frames,
            level: 0.0,
        })
    }
}

struct EnvelopeChannelRun {
    attack_frames: usize,
    release_frames: usize,
    /// Smoothed gain, advanced frame by frame across the clone's lifetime
    level: Sample,
}

impl EnvelopeChannelRun {
    fn target_at(&self, frame: usize, stop_at: Option<usize>) -> Sample {
        let mut target = if self.attack_frames == 0 {
            1.0
        } else {
            (frame as Sample / self.attack_frames as Sample).min(1.0)
        };
        if let (Some(stop), true) = (stop_at, self.release_frames > 0) {
            let remaining = stop.saturating_sub(frame) as Sample;
            target = target.min((remaining / self.release_frames as Sample).min(1.0));
        }
        target
    }
}

impl RecallRun for EnvelopeChannelRun {
    fn process(&mut self, block: &mut ProcessBlock) -> Result<RunStatus, ProcessingError> {
        let position = block.position;
        let stop_at = block.stop_at;
        if let Some(out) = block.outputs.first_mut() {
            for (offset, frame) in out.iter_mut().enumerate() {
                let target = self.target_at(position + offset, stop_at);
                self.level += (target - self.level) * LEVEL_SLEW;
                *frame *= self.level;
            }
        }
        Ok(RunStatus::Active)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constant_block(frames: usize, position: usize, stop_at: Option<usize>) -> ProcessBlock {
        ProcessBlock {
            frames,
            position,
            stop_at,
            audio_channels: 1,
            outputs: vec![vec![1.0; frames]],
            ..Default::default()
        }
    }

    #[test]
    fn test_attack_ramps_up() {
        let mut run = EnvelopeChannel::new(256, 0).duplicate(RecallId(0));
        let mut block = constant_block(64, 0, None);
        run.process(&mut block).unwrap();

        let out = &block.outputs[0];
        // Starts near silence and rises monotonically through the attack
        assert!(out[0] < 0.1);
        assert!(out[63] > out[0]);
    }

    #[test]
    fn test_release_pulls_toward_silence() {
        let mut run = EnvelopeChannel::new(0, 128).duplicate(RecallId(0));

        // Settle the level well before the stop point
        let mut sustain = constant_block(256, 0, Some(10_000));
        run.process(&mut sustain).unwrap();
        let sustained = sustain.outputs[0][255];

        // Window that crosses into the release tail
        let mut tail = constant_block(128, 9_900, Some(10_000));
        run.process(&mut tail).unwrap();
        assert!(tail.outputs[0][127] < sustained);
    }

    #[test]
    fn test_clones_do_not_share_level() {
        let template = EnvelopeChannel::new(1024, 0);
        let mut first = template.duplicate(RecallId(1));
        let mut second = template.duplicate(RecallId(2));

        let mut block = constant_block(64, 512, None);
        first.process(&mut block).unwrap();
        let advanced = block.outputs[0][63];

        // The second clone starts from silence even though the first has
        // already ramped
        let mut fresh = constant_block(64, 0, None);
        second.process(&mut fresh).unwrap();
        assert!(fresh.outputs[0][0] < advanced);
    }
}
