//! Audio - a processing unit grouping channel strands into pads

use crate::recall::RecallRack;
use crate::types::{AudioId, ChannelId, ChannelKind};

/// An audio-producing or consuming unit
///
/// Channels are grouped as pads × audio-channels per kind, stored
/// pad-major (`line = pad * audio_channels + audio_channel`). An audio is
/// created with zero pads; resize tasks grow and shrink the channel
/// lists, keeping every strand's recycling consistent.
pub struct Audio {
    id: AudioId,
    audio_channels: usize,
    output_pads: usize,
    input_pads: usize,
    outputs: Vec<ChannelId>,
    inputs: Vec<ChannelId>,
    recalls: RecallRack,
}

impl Audio {
    pub(crate) fn new(id: AudioId, audio_channels: usize) -> Self {
        Self {
            id,
            audio_channels: audio_channels.max(1),
            output_pads: 0,
            input_pads: 0,
            outputs: Vec::new(),
            inputs: Vec::new(),
            recalls: RecallRack::new(),
        }
    }

    /// This audio's id
    pub fn id(&self) -> AudioId {
        self.id
    }

    /// Strands per pad
    pub fn audio_channels(&self) -> usize {
        self.audio_channels
    }

    pub(crate) fn set_audio_channels(&mut self, count: usize) {
        self.audio_channels = count.max(1);
    }

    /// Pad count for one kind
    pub fn pads(&self, kind: ChannelKind) -> usize {
        match kind {
            ChannelKind::Output => self.output_pads,
            ChannelKind::Input => self.input_pads,
        }
    }

    pub(crate) fn set_pads(&mut self, kind: ChannelKind, pads: usize) {
        match kind {
            ChannelKind::Output => self.output_pads = pads,
            ChannelKind::Input => self.input_pads = pads,
        }
    }

    /// Number of lines (pads × audio-channels) for one kind
    pub fn lines(&self, kind: ChannelKind) -> usize {
        self.pads(kind) * self.audio_channels
    }

    /// Channel ids of one kind, in line order
    pub fn channels(&self, kind: ChannelKind) -> &[ChannelId] {
        match kind {
            ChannelKind::Output => &self.outputs,
            ChannelKind::Input => &self.inputs,
        }
    }

    pub(crate) fn channels_mut(&mut self, kind: ChannelKind) -> &mut Vec<ChannelId> {
        match kind {
            ChannelKind::Output => &mut self.outputs,
            ChannelKind::Input => &mut self.inputs,
        }
    }

    /// Channel id at (kind, pad, audio-channel)
    pub fn channel_at(
        &self,
        kind: ChannelKind,
        pad: usize,
        audio_channel: usize,
    ) -> Option<ChannelId> {
        if audio_channel >= self.audio_channels {
            return None;
        }
        self.channels(kind)
            .get(pad * self.audio_channels + audio_channel)
            .copied()
    }

    /// Audio-scoped recall templates
    pub fn recalls(&self) -> &RecallRack {
        &self.recalls
    }

    /// Audio-scoped recall templates, mutable
    pub fn recalls_mut(&mut self) -> &mut RecallRack {
        &mut self.recalls
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_audio_has_zero_channels() {
        let audio = Audio::new(AudioId(0), 2);
        assert_eq!(audio.pads(ChannelKind::Output), 0);
        assert_eq!(audio.pads(ChannelKind::Input), 0);
        assert!(audio.channels(ChannelKind::Output).is_empty());
        assert_eq!(audio.lines(ChannelKind::Input), 0);
    }

    #[test]
    fn test_channel_at_bounds() {
        let mut audio = Audio::new(AudioId(0), 2);
        audio.set_pads(ChannelKind::Output, 1);
        audio.channels_mut(ChannelKind::Output).extend([ChannelId(10), ChannelId(11)]);

        assert_eq!(audio.channel_at(ChannelKind::Output, 0, 1), Some(ChannelId(11)));
        assert_eq!(audio.channel_at(ChannelKind::Output, 0, 2), None);
        assert_eq!(audio.channel_at(ChannelKind::Output, 1, 0), None);
    }
}
