//! Mixer recall - audio-scoped down-mix of input lines into output lines

use crate::error::ProcessingError;
use crate::types::RecallId;

use super::{ProcessBlock, Recall, RecallInfo, RecallRun, RunStatus};

/// Audio-scoped recall summing input pads into the output pads, per
/// audio-channel strand
///
/// Runs before the channel-scoped recalls of its audio's own channels, so
/// output strands see the mixed material.
pub struct MixerAudio {
    info: RecallInfo,
}

impl MixerAudio {
    /// New down-mix
    pub fn new() -> Self {
        Self {
            info: RecallInfo::new("mixer", "mix"),
        }
    }
}

impl Default for MixerAudio {
    fn default() -> Self {
        Self::new()
    }
}

impl Recall for MixerAudio {
    fn info(&self) -> &RecallInfo {
        &self.info
    }

    fn duplicate(&self, _recall_id: RecallId) -> Box<dyn RecallRun> {
        Box::new(MixerAudioRun)
    }
}

struct MixerAudioRun;

impl RecallRun for MixerAudioRun {
    fn process(&mut self, block: &mut ProcessBlock) -> Result<RunStatus, ProcessingError> {
        let audio_channels = block.audio_channels.max(1);
        for (out_line, out) in block.outputs.iter_mut().enumerate() {
            let strand = out_line % audio_channels;
            out.fill(0.0);
            for (in_line, input) in block.inputs.iter().enumerate() {
                if in_line % audio_channels != strand {
                    continue;
                }
                for (dst, src) in out.iter_mut().zip(input.iter()) {
                    *dst += *src;
                }
            }
        }
        Ok(RunStatus::Active)
    }
}
