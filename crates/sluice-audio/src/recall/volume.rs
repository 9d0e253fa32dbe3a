//! Volume recall - per-window gain on one channel strand

use crate::error::ProcessingError;
use crate::types::{RecallId, Sample};

use super::{ProcessBlock, Recall, RecallInfo, RecallRun, RunStatus};

/// Channel-scoped gain stage
///
/// Transforms whatever the chain produced so far; it never completes a
/// run on its own.
pub struct VolumeChannel {
    info: RecallInfo,
    gain: Sample,
}

impl VolumeChannel {
    /// New gain stage with a linear factor
    pub fn new(gain: Sample) -> Self {
        Self {
            info: RecallInfo::new("volume", "gain"),
            gain,
        }
    }
}

impl Recall for VolumeChannel {
    fn info(&self) -> &RecallInfo {
        &self.info
    }

    fn duplicate(&self, _recall_id: RecallId) -> Box<dyn RecallRun> {
        Box::new(VolumeChannelRun { gain: self.gain })
    }
}

struct VolumeChannelRun {
    gain: Sample,
}

impl RecallRun for VolumeChannelRun {
    fn process(&mut self, block: &mut ProcessBlock) -> Result<RunStatus, ProcessingError> {
        if !self.gain.is_finite() {
            return Err(ProcessingError::new(format!(
                "non-finite gain {}",
                self.gain
            )));
        }
        if let Some(out) = block.outputs.first_mut() {
            for frame in out.iter_mut() {
                *frame *= self.gain;
            }
        }
        Ok(RunStatus::Active)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scales_window() {
        let mut run = VolumeChannel::new(0.5).duplicate(RecallId(0));
        let mut block = ProcessBlock {
            frames: 3,
            audio_channels: 1,
            outputs: vec![vec![1.0, -1.0, 0.5]],
            ..Default::default()
        };

        assert_eq!(run.process(&mut block).unwrap(), RunStatus::Active);
        assert_eq!(block.outputs[0], vec![0.5, -0.5, 0.25]);
    }

    #[test]
    fn test_non_finite_gain_is_a_processing_error() {
        let mut run = VolumeChannel::new(Sample::NAN).duplicate(RecallId(0));
        let mut block = ProcessBlock::default();
        assert!(run.process(&mut block).is_err());
    }
}
