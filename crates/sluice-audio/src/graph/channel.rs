//! Channel - one input or output strand of an audio

use crate::recall::RecallRack;
use crate::types::{AudioId, ChannelId, ChannelKind};

use super::recycling::Recycling;

/// One strand of an audio: a (kind, pad, audio-channel) position with its
/// own recycling and channel-scoped recalls
///
/// A channel may be linked to exactly one peer of the opposite kind on a
/// different audio; the relation is symmetric and maintained by the
/// graph, never set directly.
pub struct Channel {
    id: ChannelId,
    audio: AudioId,
    kind: ChannelKind,
    pad: usize,
    audio_channel: usize,
    link: Option<ChannelId>,
    recycling: Recycling,
    recalls: RecallRack,
}

impl Channel {
    pub(crate) fn new(
        id: ChannelId,
        audio: AudioId,
        kind: ChannelKind,
        pad: usize,
        audio_channel: usize,
    ) -> Self {
        Self {
            id,
            audio,
            kind,
            pad,
            audio_channel,
            link: None,
            recycling: Recycling::new(),
            recalls: RecallRack::new(),
        }
    }

    /// This channel's id
    pub fn id(&self) -> ChannelId {
        self.id
    }

    /// The owning audio
    pub fn audio(&self) -> AudioId {
        self.audio
    }

    /// Input or output side
    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    /// Pad index (row within the kind)
    pub fn pad(&self) -> usize {
        self.pad
    }

    /// Audio-channel index (strand within the pad)
    pub fn audio_channel(&self) -> usize {
        self.audio_channel
    }

    /// Line index within the owning audio's channel list
    pub fn line(&self, audio_channels: usize) -> usize {
        self.pad * audio_channels + self.audio_channel
    }

    /// The linked peer, if any
    pub fn link(&self) -> Option<ChannelId> {
        self.link
    }

    pub(crate) fn set_link(&mut self, peer: Option<ChannelId>) {
        self.link = peer;
    }

    /// The strand's buffer container
    pub fn recycling(&self) -> &Recycling {
        &self.recycling
    }

    /// The strand's buffer container, mutable
    pub fn recycling_mut(&mut self) -> &mut Recycling {
        &mut self.recycling
    }

    /// Channel-scoped recall templates
    pub fn recalls(&self) -> &RecallRack {
        &self.recalls
    }

    /// Channel-scoped recall templates, mutable
    pub fn recalls_mut(&mut self) -> &mut RecallRack {
        &mut self.recalls
    }

    /// Split borrow for the dispatch path: recalls and recycling together
    pub fn recalls_and_recycling_mut(&mut self) -> (&mut RecallRack, &mut Recycling) {
        (&mut self.recalls, &mut self.recycling)
    }

    /// Whether any run currently holds a runtime signal or clone here
    pub fn is_busy(&self) -> bool {
        self.recycling.has_runtime() || self.recalls.has_any_clones()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_index_is_pad_major() {
        let channel = Channel::new(ChannelId(0), AudioId(0), ChannelKind::Input, 2, 1);
        assert_eq!(channel.line(2), 5);
        assert_eq!(channel.line(4), 9);
    }
}
