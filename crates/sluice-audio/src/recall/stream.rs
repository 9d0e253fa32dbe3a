//! Stream source recall - advances template content into the runtime signal

use crate::error::ProcessingError;
use crate::types::RecallId;

use super::{ProcessBlock, Recall, RecallInfo, RecallRun, RunStatus};

/// Channel-scoped source: streams the recycling's template frames into the
/// run's window, silence once the template is exhausted
///
/// Completion follows the run's declared stop point; a run without one
/// keeps streaming (silence past the template) until it is cancelled.
pub struct StreamChannel {
    info: RecallInfo,
}

impl StreamChannel {
    /// New stream source
    pub fn new() -> Self {
        Self {
            info: RecallInfo::new("stream", "source"),
        }
    }
}

impl Default for StreamChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl Recall for StreamChannel {
    fn info(&self) -> &RecallInfo {
        &self.info
    }

    fn duplicate(&self, _recall_id: RecallId) -> Box<dyn RecallRun> {
        Box::new(StreamChannelRun)
    }
}

struct StreamChannelRun;

impl RecallRun for StreamChannelRun {
    fn process(&mut self, block: &mut ProcessBlock) -> Result<RunStatus, ProcessingError> {
        let done = block.reaches_stop();
        let template = std::mem::take(&mut block.template);
        if let Some(out) = block.outputs.first_mut() {
            let copied = template.len().min(out.len());
            out[..copied].copy_from_slice(&template[..copied]);
            // Template exhausted: the rest of the window is silence
            for frame in out[copied..].iter_mut() {
                *frame = 0.0;
            }
        }
        block.template = template;

        Ok(if done { RunStatus::Done } else { RunStatus::Active })
    }
}
