//! The audio signal graph
//!
//! [`AudioGraph`] owns every audio and channel in arena maps keyed by
//! stable monotonic ids, plus the symmetric link table between strands.
//! All mutation happens here, and only ever on the audio-loop thread at a
//! cycle boundary (tasks); other threads hold ids, never references.
//!
//! Links are the cross-audio routing: an input strand pulls its linked
//! output strand's frames. Link validation is conservative about cycles -
//! each audio is treated as connecting all of its inputs to all of its
//! outputs, so accepting a link guarantees a dependency order for the
//! per-cycle walk always exists.

mod audio;
mod audio_signal;
mod channel;
mod recycling;

pub use audio::Audio;
pub use audio_signal::{AudioSignal, SignalRole};
pub use channel::Channel;
pub use recycling::Recycling;

use std::collections::{BTreeMap, BTreeSet};

use crate::error::StructuralError;
use crate::recall::Recall;
use crate::types::{AudioId, ChannelId, ChannelKind, IdSource, RecallId, RecallTemplateId};

/// Where a recall template lives, for template-addressed cancellation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecallOwner {
    Audio(AudioId),
    Channel(ChannelId),
}

/// Outcome of a pad resize, for event emission
#[derive(Debug, Clone)]
pub struct PadsReport {
    pub old: usize,
    pub new: usize,
    /// Peers that lost their link because their endpoint was removed
    pub unlinked_peers: Vec<ChannelId>,
}

/// Outcome of an audio-channel resize, for event emission
#[derive(Debug, Clone)]
pub struct AudioChannelsReport {
    pub old: usize,
    pub new: usize,
    pub unlinked_peers: Vec<ChannelId>,
}

/// The graph of audios, channels, and links
#[derive(Default)]
pub struct AudioGraph {
    audios: BTreeMap<AudioId, Audio>,
    channels: BTreeMap<ChannelId, Channel>,
    audio_ids: IdSource,
    channel_ids: IdSource,
    template_ids: IdSource,
}

impl AudioGraph {
    /// Empty graph
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------
    // Audios
    // ------------------------------------------------------------------

    /// Create an audio with the given strand count and zero pads
    pub fn add_audio(&mut self, audio_channels: usize) -> AudioId {
        let id = AudioId(self.audio_ids.mint());
        self.audios.insert(id, Audio::new(id, audio_channels));
        log::debug!("added {} with {} audio-channels", id, audio_channels.max(1));
        id
    }

    /// Destroy an audio
    ///
    /// Fails while any bound recall still has live clones or any strand
    /// still carries runtime signals - cancel those runs first. Returns
    /// the peers that lost their link.
    pub fn remove_audio(&mut self, id: AudioId) -> Result<Vec<ChannelId>, StructuralError> {
        let audio = self.audios.get(&id).ok_or(StructuralError::NoSuchAudio(id))?;
        let mut all_channels: Vec<ChannelId> = Vec::new();
        for kind in ChannelKind::ALL {
            all_channels.extend_from_slice(audio.channels(kind));
        }

        let busy = audio.recalls().has_any_clones()
            || all_channels.iter().any(|cid| {
                self.channels
                    .get(cid)
                    .map(|c| c.is_busy())
                    .unwrap_or(false)
            });
        if busy {
            return Err(StructuralError::RunsStillActive(id));
        }

        let mut unlinked = Vec::new();
        for cid in all_channels {
            if let Some(peer) = self.remove_channel_entry(cid) {
                unlinked.push(peer);
            }
        }
        self.audios.remove(&id);
        log::debug!("removed {}", id);
        Ok(unlinked)
    }

    /// Look up an audio
    pub fn audio(&self, id: AudioId) -> Option<&Audio> {
        self.audios.get(&id)
    }

    /// Look up an audio, mutable
    pub fn audio_mut(&mut self, id: AudioId) -> Option<&mut Audio> {
        self.audios.get_mut(&id)
    }

    /// All audios in creation order
    pub fn audios(&self) -> impl Iterator<Item = &Audio> {
        self.audios.values()
    }

    /// Number of audios
    pub fn audio_count(&self) -> usize {
        self.audios.len()
    }

    // ------------------------------------------------------------------
    // Channels
    // ------------------------------------------------------------------

    /// Look up a channel
    pub fn channel(&self, id: ChannelId) -> Option<&Channel> {
        self.channels.get(&id)
    }

    /// Look up a channel, mutable
    pub fn channel_mut(&mut self, id: ChannelId) -> Option<&mut Channel> {
        self.channels.get_mut(&id)
    }

    /// All channels in creation order
    pub fn channels(&self) -> impl Iterator<Item = &Channel> {
        self.channels.values()
    }

    /// Number of channels
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// The linked peer of a channel, if any
    pub fn peer(&self, id: ChannelId) -> Option<ChannelId> {
        self.channels.get(&id).and_then(|c| c.link())
    }

    // ------------------------------------------------------------------
    // Resize
    // ------------------------------------------------------------------

    /// Set the pad count of one kind, creating or destroying whole pads
    /// of strands (each with a fresh template recycling)
    pub fn set_pads(
        &mut self,
        audio_id: AudioId,
        kind: ChannelKind,
        pads: usize,
    ) -> Result<PadsReport, StructuralError> {
        let audio = self
            .audios
            .get(&audio_id)
            .ok_or(StructuralError::NoSuchAudio(audio_id))?;
        let old = audio.pads(kind);
        let audio_channels = audio.audio_channels();

        if pads == old {
            return Ok(PadsReport {
                old,
                new: pads,
                unlinked_peers: Vec::new(),
            });
        }

        let mut unlinked = Vec::new();
        if pads > old {
            let mut created = Vec::new();
            for pad in old..pads {
                for audio_channel in 0..audio_channels {
                    let cid = ChannelId(self.channel_ids.mint());
                    self.channels.insert(
                        cid,
                        Channel::new(cid, audio_id, kind, pad, audio_channel),
                    );
                    created.push(cid);
                }
            }
            if let Some(audio) = self.audios.get_mut(&audio_id) {
                audio.channels_mut(kind).extend(created);
                audio.set_pads(kind, pads);
            }
        } else {
            let keep = pads * audio_channels;
            let removed: Vec<ChannelId> = self
                .audios
                .get(&audio_id)
                .map(|a| a.channels(kind)[keep..].to_vec())
                .unwrap_or_default();
            for cid in removed {
                if let Some(peer) = self.remove_channel_entry(cid) {
                    unlinked.push(peer);
                }
            }
            if let Some(audio) = self.audios.get_mut(&audio_id) {
                audio.channels_mut(kind).truncate(keep);
                audio.set_pads(kind, pads);
            }
        }

        log::debug!("{}: {} pads {} -> {}", audio_id, kind, old, pads);
        Ok(PadsReport {
            old,
            new: pads,
            unlinked_peers: unlinked,
        })
    }

    /// Set the audio-channel count, reshaping every pad of both kinds
    ///
    /// Existing strands at retained indices keep their recycling, recalls,
    /// and links; removed strands unlink their peers.
    pub fn set_audio_channels(
        &mut self,
        audio_id: AudioId,
        count: usize,
    ) -> Result<AudioChannelsReport, StructuralError> {
        let count = count.max(1);
        let audio = self
            .audios
            .get(&audio_id)
            .ok_or(StructuralError::NoSuchAudio(audio_id))?;
        let old = audio.audio_channels();
        if count == old {
            return Ok(AudioChannelsReport {
                old,
                new: count,
                unlinked_peers: Vec::new(),
            });
        }

        let mut unlinked = Vec::new();
        for kind in ChannelKind::ALL {
            let pads = self
                .audios
                .get(&audio_id)
                .map(|a| a.pads(kind))
                .unwrap_or(0);
            let old_list = self
                .audios
                .get(&audio_id)
                .map(|a| a.channels(kind).to_vec())
                .unwrap_or_default();

            let mut new_list = Vec::with_capacity(pads * count);
            for pad in 0..pads {
                for audio_channel in 0..count {
                    if audio_channel < old {
                        new_list.push(old_list[pad * old + audio_channel]);
                    } else {
                        let cid = ChannelId(self.channel_ids.mint());
                        self.channels.insert(
                            cid,
                            Channel::new(cid, audio_id, kind, pad, audio_channel),
                        );
                        new_list.push(cid);
                    }
                }
                for audio_channel in count..old {
                    let cid = old_list[pad * old + audio_channel];
                    if let Some(peer) = self.remove_channel_entry(cid) {
                        unlinked.push(peer);
                    }
                }
            }

            if let Some(audio) = self.audios.get_mut(&audio_id) {
                *audio.channels_mut(kind) = new_list;
            }
        }

        if let Some(audio) = self.audios.get_mut(&audio_id) {
            audio.set_audio_channels(count);
        }
        log::debug!("{}: audio-channels {} -> {}", audio_id, old, count);
        Ok(AudioChannelsReport {
            old,
            new: count,
            unlinked_peers: unlinked,
        })
    }

    // ------------------------------------------------------------------
    // Linking
    // ------------------------------------------------------------------

    /// Link two strands for cross-audio routing
    ///
    /// The endpoints must be one input and one output of two different
    /// audios, both currently unlinked and without in-flight runtime
    /// signals, and the link must not close a feedback cycle.
    pub fn link(&mut self, a: ChannelId, b: ChannelId) -> Result<(), StructuralError> {
        let chan_a = self
            .channels
            .get(&a)
            .ok_or(StructuralError::NoSuchChannel(a))?;
        let chan_b = self
            .channels
            .get(&b)
            .ok_or(StructuralError::NoSuchChannel(b))?;

        let (input_id, output_id) = match (chan_a.kind(), chan_b.kind()) {
            (ChannelKind::Input, ChannelKind::Output) => (a, b),
            (ChannelKind::Output, ChannelKind::Input) => (b, a),
            _ => {
                return Err(StructuralError::BadEndpoints {
                    a,
                    b,
                    reason: "endpoints must be one input and one output",
                })
            }
        };
        let input = &self.channels[&input_id];
        let output = &self.channels[&output_id];

        if input.audio() == output.audio() {
            return Err(StructuralError::BadEndpoints {
                a,
                b,
                reason: "endpoints belong to the same audio",
            });
        }
        if let Some(peer) = input.link() {
            return Err(StructuralError::LinkOccupied {
                channel: input_id,
                peer,
            });
        }
        if let Some(peer) = output.link() {
            return Err(StructuralError::LinkOccupied {
                channel: output_id,
                peer,
            });
        }
        if input.is_busy() {
            return Err(StructuralError::ChannelBusy(input_id));
        }
        if output.is_busy() {
            return Err(StructuralError::ChannelBusy(output_id));
        }
        if self.depends_on(output.audio(), input.audio()) {
            return Err(StructuralError::LinkCycle { a, b });
        }

        if let Some(c) = self.channels.get_mut(&input_id) {
            c.set_link(Some(output_id));
        }
        if let Some(c) = self.channels.get_mut(&output_id) {
            c.set_link(Some(input_id));
        }
        log::debug!("linked {} <-> {}", input_id, output_id);
        Ok(())
    }

    /// Remove a strand's link; both ends become unlinked
    ///
    /// Returns the prior peer. Unlinking an unlinked strand is a no-op.
    pub fn unlink(&mut self, id: ChannelId) -> Result<Option<ChannelId>, StructuralError> {
        let peer = self
            .channels
            .get(&id)
            .ok_or(StructuralError::NoSuchChannel(id))?
            .link();
        let Some(peer_id) = peer else {
            return Ok(None);
        };

        if let Some(c) = self.channels.get_mut(&id) {
            c.set_link(None);
        }
        if let Some(c) = self.channels.get_mut(&peer_id) {
            c.set_link(None);
        }
        log::debug!("unlinked {} <-> {}", id, peer_id);
        Ok(Some(peer_id))
    }

    /// Whether `from` (transitively) depends on `to` through existing
    /// links
    ///
    /// Dependency means "consumes frames produced by": an audio depends on
    /// every audio its input strands link to. The traversal is bounded by
    /// the total channel count.
    fn depends_on(&self, from: AudioId, to: AudioId) -> bool {
        let mut visited: BTreeSet<AudioId> = BTreeSet::new();
        let mut stack = vec![from];
        while let Some(current) = stack.pop() {
            if current == to {
                return true;
            }
            if !visited.insert(current) {
                continue;
            }
            let Some(audio) = self.audios.get(&current) else {
                continue;
            };
            for cid in audio.channels(ChannelKind::Input) {
                let Some(peer) = self.channels.get(cid).and_then(|c| c.link()) else {
                    continue;
                };
                if let Some(producer) = self.channels.get(&peer).map(|c| c.audio()) {
                    stack.push(producer);
                }
            }
        }
        false
    }

    /// Audios in dependency order: producers before the consumers that
    /// pull from them
    ///
    /// Link validation guarantees acyclicity; if the invariant is ever
    /// violated the remaining audios are appended in id order so the walk
    /// still covers everything.
    pub fn dependency_order(&self) -> Vec<AudioId> {
        let mut in_degree: BTreeMap<AudioId, usize> =
            self.audios.keys().map(|id| (*id, 0)).collect();
        let mut consumers: BTreeMap<AudioId, BTreeSet<AudioId>> = BTreeMap::new();

        for audio in self.audios.values() {
            let mut producers: BTreeSet<AudioId> = BTreeSet::new();
            for cid in audio.channels(ChannelKind::Input) {
                let Some(peer) = self.channels.get(cid).and_then(|c| c.link()) else {
                    continue;
                };
                if let Some(producer) = self.channels.get(&peer).map(|c| c.audio()) {
                    producers.insert(producer);
                }
            }
            for producer in producers {
                if consumers.entry(producer).or_default().insert(audio.id()) {
                    *in_degree.entry(audio.id()).or_default() += 1;
                }
            }
        }

        let mut ready: BTreeSet<AudioId> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut order = Vec::with_capacity(self.audios.len());
        while let Some(id) = ready.iter().next().copied() {
            ready.remove(&id);
            order.push(id);
            if let Some(downstream) = consumers.get(&id) {
                for consumer in downstream.clone() {
                    if let Some(degree) = in_degree.get_mut(&consumer) {
                        *degree -= 1;
                        if *degree == 0 {
                            ready.insert(consumer);
                        }
                    }
                }
            }
        }

        if order.len() < self.audios.len() {
            log::warn!("dependency order incomplete; appending remaining audios");
            for id in self.audios.keys() {
                if !order.contains(id) {
                    order.push(*id);
                }
            }
        }
        order
    }

    // ------------------------------------------------------------------
    // Recalls
    // ------------------------------------------------------------------

    /// Bind a channel-scoped recall template; templates run in attach
    /// order
    pub fn attach_channel_recall(
        &mut self,
        channel: ChannelId,
        template: Box<dyn Recall>,
    ) -> Result<RecallTemplateId, StructuralError> {
        let id = RecallTemplateId(self.template_ids.mint());
        let chan = self
            .channels
            .get_mut(&channel)
            .ok_or(StructuralError::NoSuchChannel(channel))?;
        chan.recalls_mut().attach(id, template);
        Ok(id)
    }

    /// Bind an audio-scoped recall template
    pub fn attach_audio_recall(
        &mut self,
        audio: AudioId,
        template: Box<dyn Recall>,
    ) -> Result<RecallTemplateId, StructuralError> {
        let id = RecallTemplateId(self.template_ids.mint());
        let audio = self
            .audios
            .get_mut(&audio)
            .ok_or(StructuralError::NoSuchAudio(audio))?;
        audio.recalls_mut().attach(id, template);
        Ok(id)
    }

    // ------------------------------------------------------------------
    // Cancellation
    // ------------------------------------------------------------------
    //
    // Cancels are idempotent and tolerate released scopes: cancelling a
    // run that already finished, or addressing an audio that was already
    // destroyed, is success, not an error.

    /// Release one run's (or every run's) clones and runtime signals on an
    /// audio and on all of its own strands
    pub fn cancel_audio(&mut self, audio_id: AudioId, recall_id: Option<RecallId>) {
        let Some(audio) = self.audios.get_mut(&audio_id) else {
            return;
        };
        audio.recalls_mut().release(recall_id);
        let mut all_channels: Vec<ChannelId> = Vec::new();
        for kind in ChannelKind::ALL {
            all_channels.extend_from_slice(audio.channels(kind));
        }
        for cid in all_channels {
            self.cancel_channel(cid, recall_id);
        }
    }

    /// Release one run's (or every run's) clones and runtime signals on a
    /// single strand
    pub fn cancel_channel(&mut self, channel: ChannelId, recall_id: Option<RecallId>) {
        let Some(chan) = self.channels.get_mut(&channel) else {
            return;
        };
        chan.recalls_mut().release(recall_id);
        match recall_id {
            Some(id) => {
                chan.recycling_mut().release(id);
            }
            None => chan.recycling_mut().release_all(),
        }
    }

    /// Release one run's (or every run's) clones of a single template
    pub fn cancel_recall(
        &mut self,
        owner: RecallOwner,
        template: RecallTemplateId,
        recall_id: Option<RecallId>,
    ) {
        let rack = match owner {
            RecallOwner::Audio(id) => self.audios.get_mut(&id).map(|a| a.recalls_mut()),
            RecallOwner::Channel(id) => self.channels.get_mut(&id).map(|c| c.recalls_mut()),
        };
        let Some(entry) = rack.and_then(|r| r.entry_mut(template)) else {
            return;
        };
        match recall_id {
            Some(id) => {
                entry.release_run(id);
            }
            None => entry.release_all_runs(),
        }
    }

    /// Release a run everywhere: every clone and every runtime signal in
    /// the whole graph
    pub fn release_run(&mut self, recall_id: RecallId) {
        for audio in self.audios.values_mut() {
            audio.recalls_mut().release(Some(recall_id));
        }
        for channel in self.channels.values_mut() {
            channel.recalls_mut().release(Some(recall_id));
            channel.recycling_mut().release(recall_id);
        }
    }

    /// Whether any clone or runtime signal anywhere still belongs to the
    /// run
    pub fn run_in_use(&self, recall_id: RecallId) -> bool {
        self.audios
            .values()
            .any(|a| a.recalls().has_clone_for(recall_id))
            || self.channels.values().any(|c| {
                c.recalls().has_clone_for(recall_id) || c.recycling().runtime(recall_id).is_some()
            })
    }

    /// Runs that still hold runtime signals on a strand
    pub fn runs_on_channel(&self, channel: ChannelId) -> Vec<RecallId> {
        self.channels
            .get(&channel)
            .map(|c| c.recycling().active_runs().collect())
            .unwrap_or_default()
    }

    fn remove_channel_entry(&mut self, id: ChannelId) -> Option<ChannelId> {
        let peer = self.channels.get(&id).and_then(|c| c.link());
        if let Some(peer_id) = peer {
            if let Some(p) = self.channels.get_mut(&peer_id) {
                p.set_link(None);
            }
        }
        self.channels.remove(&id);
        peer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recall::VolumeChannel;

    /// source audio with output pads, sink audio with input pads
    fn two_audios(graph: &mut AudioGraph) -> (AudioId, AudioId) {
        let source = graph.add_audio(2);
        let sink = graph.add_audio(2);
        graph.set_pads(source, ChannelKind::Output, 1).unwrap();
        graph.set_pads(sink, ChannelKind::Input, 1).unwrap();
        (source, sink)
    }

    fn out_channel(graph: &AudioGraph, audio: AudioId, strand: usize) -> ChannelId {
        graph
            .audio(audio)
            .unwrap()
            .channel_at(ChannelKind::Output, 0, strand)
            .unwrap()
    }

    fn in_channel(graph: &AudioGraph, audio: AudioId, strand: usize) -> ChannelId {
        graph
            .audio(audio)
            .unwrap()
            .channel_at(ChannelKind::Input, 0, strand)
            .unwrap()
    }

    #[test]
    fn test_resize_creates_strands_with_template_recycling() {
        let mut graph = AudioGraph::new();
        let audio = graph.add_audio(2);

        let report = graph.set_pads(audio, ChannelKind::Output, 2).unwrap();
        assert_eq!((report.old, report.new), (0, 2));
        assert_eq!(graph.audio(audio).unwrap().lines(ChannelKind::Output), 4);
        assert_eq!(graph.channel_count(), 4);

        for channel in graph.channels() {
            assert!(channel.recycling().template().is_empty());
            assert!(!channel.recycling().has_runtime());
        }
    }

    #[test]
    fn test_link_is_symmetric_and_unlink_clears_both() {
        let mut graph = AudioGraph::new();
        let (source, sink) = two_audios(&mut graph);
        let out = out_channel(&graph, source, 0);
        let input = in_channel(&graph, sink, 0);

        graph.link(input, out).unwrap();
        assert_eq!(graph.peer(input), Some(out));
        assert_eq!(graph.peer(out), Some(input));

        let prior = graph.unlink(input).unwrap();
        assert_eq!(prior, Some(out));
        assert_eq!(graph.peer(input), None);
        assert_eq!(graph.peer(out), None);

        // Unlinking again is a no-op
        assert_eq!(graph.unlink(input).unwrap(), None);
    }

    #[test]
    fn test_link_rejects_occupied_endpoint() {
        let mut graph = AudioGraph::new();
        let (source, sink) = two_audios(&mut graph);
        let other = graph.add_audio(2);
        graph.set_pads(other, ChannelKind::Input, 1).unwrap();

        let out = out_channel(&graph, source, 0);
        graph.link(in_channel(&graph, sink, 0), out).unwrap();

        let err = graph.link(in_channel(&graph, other, 0), out).unwrap_err();
        assert!(matches!(err, StructuralError::LinkOccupied { .. }));
    }

    #[test]
    fn test_link_rejects_same_kind_and_same_audio() {
        let mut graph = AudioGraph::new();
        let (source, sink) = two_audios(&mut graph);
        graph.set_pads(source, ChannelKind::Input, 1).unwrap();

        let err = graph
            .link(out_channel(&graph, source, 0), out_channel(&graph, source, 1))
            .unwrap_err();
        assert!(matches!(err, StructuralError::BadEndpoints { .. }));

        let err = graph
            .link(in_channel(&graph, source, 0), out_channel(&graph, source, 0))
            .unwrap_err();
        assert!(matches!(err, StructuralError::BadEndpoints { .. }));

        let _ = sink;
    }

    #[test]
    fn test_cycle_rejected_and_prior_links_unchanged() {
        let mut graph = AudioGraph::new();
        let a = graph.add_audio(1);
        let b = graph.add_audio(1);
        graph.set_pads(a, ChannelKind::Output, 1).unwrap();
        graph.set_pads(a, ChannelKind::Input, 1).unwrap();
        graph.set_pads(b, ChannelKind::Output, 1).unwrap();
        graph.set_pads(b, ChannelKind::Input, 1).unwrap();

        let a_out = out_channel(&graph, a, 0);
        let a_in = in_channel(&graph, a, 0);
        let b_out = out_channel(&graph, b, 0);
        let b_in = in_channel(&graph, b, 0);

        // a -> b, then closing b -> a must fail
        graph.link(b_in, a_out).unwrap();
        let err = graph.link(a_in, b_out).unwrap_err();
        assert!(matches!(err, StructuralError::LinkCycle { .. }));

        // Prior link untouched, rejected endpoints still unlinked
        assert_eq!(graph.peer(b_in), Some(a_out));
        assert_eq!(graph.peer(a_in), None);
        assert_eq!(graph.peer(b_out), None);
    }

    #[test]
    fn test_busy_channel_cannot_link() {
        let mut graph = AudioGraph::new();
        let (source, sink) = two_audios(&mut graph);
        let out = out_channel(&graph, source, 0);
        let input = in_channel(&graph, sink, 0);

        graph
            .channel_mut(out)
            .unwrap()
            .recycling_mut()
            .runtime_or_create(RecallId(1), None);

        let err = graph.link(input, out).unwrap_err();
        assert!(matches!(err, StructuralError::ChannelBusy(id) if id == out));

        // Draining the run makes the link legal again
        graph.cancel_channel(out, Some(RecallId(1)));
        graph.link(input, out).unwrap();
    }

    #[test]
    fn test_dependency_order_puts_producers_first() {
        let mut graph = AudioGraph::new();
        let (source, sink) = two_audios(&mut graph);
        let downstream = graph.add_audio(2);
        graph.set_pads(downstream, ChannelKind::Input, 1).unwrap();
        graph.set_pads(sink, ChannelKind::Output, 1).unwrap();

        graph
            .link(in_channel(&graph, sink, 0), out_channel(&graph, source, 0))
            .unwrap();
        graph
            .link(in_channel(&graph, downstream, 0), out_channel(&graph, sink, 0))
            .unwrap();

        let order = graph.dependency_order();
        let pos = |id: AudioId| order.iter().position(|x| *x == id).unwrap();
        assert!(pos(source) < pos(sink));
        assert!(pos(sink) < pos(downstream));
    }

    #[test]
    fn test_set_audio_channels_preserves_retained_strands(){
        let mut graph = AudioGraph::new();
        let audio = graph.add_audio(2);
        graph.set_pads(audio, ChannelKind::Input, 2).unwrap();
        let keep = in_channel(&graph, audio, 1);
        graph
            .channel_mut(keep)
            .unwrap()
            .recycling_mut()
            .template_mut()
            .buffer_mut()
            .grow_to(64);

        let report = graph.set_audio_channels(audio, 3).unwrap();
        assert_eq!((report.old, report.new), (2, 3));
        assert_eq!(graph.audio(audio).unwrap().lines(ChannelKind::Input), 6);

        // The retained strand kept its recycling content and position
        let kept = graph.channel(keep).unwrap();
        assert_eq!(kept.audio_channel(), 1);
        assert_eq!(kept.recycling().template().len(), 64);

        let report = graph.set_audio_channels(audio, 1).unwrap();
        assert_eq!((report.old, report.new), (3, 1));
        assert_eq!(graph.audio(audio).unwrap().lines(ChannelKind::Input), 2);
        assert!(graph.channel(keep).is_none());
    }

    #[test]
    fn test_shrink_pads_unlinks_peers() {
        let mut graph = AudioGraph::new();
        let (source, sink) = two_audios(&mut graph);
        let out = out_channel(&graph, source, 0);
        let input = in_channel(&graph, sink, 0);
        graph.link(input, out).unwrap();

        let report = graph.set_pads(source, ChannelKind::Output, 0).unwrap();
        assert_eq!(report.unlinked_peers, vec![input]);
        assert_eq!(graph.peer(input), None);
        assert!(graph.channel(out).is_none());
    }

    #[test]
    fn test_cancel_audio_sweeps_own_channels_only() {
        let mut graph = AudioGraph::new();
        let (source, sink) = two_audios(&mut graph);
        let out = out_channel(&graph, source, 0);
        let input = in_channel(&graph, sink, 0);

        let run = RecallId(5);
        for cid in [out, input] {
            graph
                .channel_mut(cid)
                .unwrap()
                .recycling_mut()
                .runtime_or_create(run, None);
        }

        graph.cancel_audio(source, Some(run));
        assert!(graph.channel(out).unwrap().recycling().runtime(run).is_none());
        // The other audio's strand is out of scope for this cancel
        assert!(graph.channel(input).unwrap().recycling().runtime(run).is_some());

        // Idempotent: a second cancel of the released scope is a no-op
        graph.cancel_audio(source, Some(run));
        assert!(graph.run_in_use(run));

        graph.cancel_channel(input, Some(run));
        assert!(!graph.run_in_use(run));
    }

    #[test]
    fn test_remove_audio_requires_cancelled_runs() {
        let mut graph = AudioGraph::new();
        let (source, _sink) = two_audios(&mut graph);
        let out = out_channel(&graph, source, 0);
        let template = graph
            .attach_channel_recall(out, Box::new(VolumeChannel::new(1.0)))
            .unwrap();

        graph
            .channel_mut(out)
            .unwrap()
            .recalls_mut()
            .entry_mut(template)
            .unwrap()
            .run_for(RecallId(1));

        let err = graph.remove_audio(source).unwrap_err();
        assert!(matches!(err, StructuralError::RunsStillActive(id) if id == source));

        graph.cancel_recall(RecallOwner::Channel(out), template, None);
        graph.remove_audio(source).unwrap();
        assert!(graph.audio(source).is_none());
    }
}
