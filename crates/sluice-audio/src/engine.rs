//! The audio loop and the engine facade
//!
//! [`AudioLoop`] is the leaf runnable of the thread tree: once per tick
//! it drains due tasks, walks the audio graph in dependency order for
//! every active run, mixes the master output into the sink ring, and
//! releases finished or cancelled runs at the cycle boundary. All graph
//! mutation happens inside this tick; every other thread talks to it
//! through the task queue and reads back through events and monitor
//! snapshots.
//!
//! [`Engine`] wires the whole tree: a main loop at the root, the audio
//! loop beneath it (self-timed at `sample_rate / buffer_size`, the
//! cadence a device callback would impose), and the sink thread synced to
//! the audio loop's completed cycles.

use std::collections::{BTreeMap, BTreeSet};

use sluice_thread::{
    FatalThreadError, Runnable, ThreadEvent, ThreadId, ThreadTree, TickRate,
};

use crate::config::EngineConfig;
use crate::event::{EngineEvent, EventBus, EventSender};
use crate::graph::{AudioGraph, Channel};
use crate::monitor::{monitor_channel, CycleSnapshot, MAX_MONITOR_STRANDS};
use crate::recall::{ProcessBlock, RunStatus};
use crate::sink::{frame_channel, Sink, SinkLoop};
use crate::task::{
    task_channel, Task, TaskDescriptor, TaskHandle, TaskOutcome, TaskQueue, TaskReply, TaskSender,
};
use crate::types::{AudioId, ChannelId, ChannelKind, IdSource, RecallId, RecallTemplateId, Sample};
use crate::error::{StructuralError, TaskError};

/// One live playback pass
///
/// Cancellation is scope-filtered: cancelling an audio, channel, or
/// template for this run releases the matching instances *and* excludes
/// that scope from the run's walk, so lazy cloning cannot resurrect it on
/// the next cycle. A fresh run (new recall id) starts with empty
/// exclusions.
struct RunState {
    origin: AudioId,
    stop_at: Option<usize>,
    /// Frames processed so far (global run timeline)
    position: usize,
    /// The audios this run touches: origin plus everything downstream
    domain: BTreeSet<AudioId>,
    /// Whether the run went through at least one processing pass
    touched: bool,
    excluded_audios: BTreeSet<AudioId>,
    excluded_channels: BTreeSet<ChannelId>,
    excluded_templates: BTreeSet<RecallTemplateId>,
}

/// The audio-loop leaf of the thread tree
pub struct AudioLoop {
    config: EngineConfig,
    graph: AudioGraph,
    tasks: TaskQueue,
    /// For work the loop defers to its own next cycle (unlink cancels)
    self_tasks: TaskSender,
    events: EventSender,
    monitor: Option<rtrb::Producer<CycleSnapshot>>,
    frame_output: Option<rtrb::Producer<Sample>>,
    master: Option<AudioId>,
    runs: BTreeMap<RecallId, RunState>,
    run_ids: IdSource,
    cycle: u64,
    walk_dirty: bool,
    walk_order: Vec<AudioId>,
    // Reused per cycle so the steady state does not allocate
    due: Vec<Task>,
    run_scratch: Vec<RecallId>,
    pull_scratch: Vec<Sample>,
    block: ProcessBlock,
    mix: Vec<Vec<Sample>>,
}

impl AudioLoop {
    /// Create the loop and the submission side of its task queue
    pub fn new(config: EngineConfig, events: EventSender) -> (Self, TaskSender) {
        let (sender, queue) = task_channel(config.task_queue_capacity);
        let audio_loop = Self {
            config,
            graph: AudioGraph::new(),
            tasks: queue,
            self_tasks: sender.clone(),
            events,
            monitor: None,
            frame_output: None,
            master: None,
            runs: BTreeMap::new(),
            run_ids: IdSource::default(),
            cycle: 0,
            walk_dirty: true,
            walk_order: Vec::new(),
            due: Vec::new(),
            run_scratch: Vec::new(),
            pull_scratch: Vec::new(),
            block: ProcessBlock::new(),
            mix: Vec::new(),
        };
        (audio_loop, sender)
    }

    /// Attach the monitor snapshot ring
    pub fn set_monitor(&mut self, producer: rtrb::Producer<CycleSnapshot>) {
        self.monitor = Some(producer);
    }

    /// Attach the master frame ring feeding the sink thread
    pub fn set_frame_output(&mut self, producer: rtrb::Producer<Sample>) {
        self.frame_output = Some(producer);
    }

    /// Designate the audio whose output strands feed the sink
    pub fn set_master(&mut self, audio: AudioId) {
        self.master = Some(audio);
    }

    /// The graph, for setup and inspection before the loop is started
    ///
    /// Once the loop runs inside the thread tree, all mutation must go
    /// through tasks.
    pub fn graph(&self) -> &AudioGraph {
        &self.graph
    }

    /// The graph, mutable (setup phase only)
    pub fn graph_mut(&mut self) -> &mut AudioGraph {
        &mut self.graph
    }

    /// Completed cycles
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    /// Live run count
    pub fn active_runs(&self) -> usize {
        self.runs.len()
    }

    /// A run's processed-frames position, while it is live
    pub fn run_position(&self, recall_id: RecallId) -> Option<usize> {
        self.runs.get(&recall_id).map(|run| run.position)
    }

    /// One full processing cycle
    ///
    /// Order matters: due tasks first (safe mutation point), then the
    /// graph walk, then master mix, then release of finished runs - so
    /// nothing observes a half-released instance mid-cycle.
    pub fn run_cycle(&mut self) {
        self.drain_tasks();
        self.refresh_walk();
        self.process_runs();
        self.mix_master();
        self.sweep_runs();
        self.cycle += 1;
    }

    // ------------------------------------------------------------------
    // Task application
    // ------------------------------------------------------------------

    fn drain_tasks(&mut self) {
        let mut due = std::mem::take(&mut self.due);
        self.tasks.drain_due(&mut due);
        for task in due.drain(..) {
            self.apply_task(task);
        }
        self.due = due;
    }

    fn apply_task(&mut self, task: Task) {
        let outcome = self.apply_descriptor(task.descriptor);
        if let Err(err) = &outcome {
            log::warn!("task rejected: {}", err);
        }
        if let Some(reply) = task.reply {
            let _ = reply.send(outcome);
        }
    }

    fn apply_descriptor(&mut self, descriptor: TaskDescriptor) -> TaskOutcome {
        match descriptor {
            TaskDescriptor::AddAudio {
                audio_channels,
                output_pads,
                input_pads,
            } => {
                let id = self.graph.add_audio(audio_channels);
                self.graph.set_pads(id, ChannelKind::Output, output_pads)?;
                self.graph.set_pads(id, ChannelKind::Input, input_pads)?;
                self.walk_dirty = true;
                Ok(TaskReply::AudioAdded(id))
            }
            TaskDescriptor::RemoveAudio { audio } => {
                let unlinked = self.graph.remove_audio(audio)?;
                for peer in unlinked {
                    self.events.publish(EngineEvent::LinkChanged {
                        channel: peer,
                        peer: None,
                    });
                }
                if self.master == Some(audio) {
                    self.master = None;
                }
                self.walk_dirty = true;
                Ok(TaskReply::Done)
            }
            TaskDescriptor::ResizePads { audio, kind, pads } => {
                let report = self.graph.set_pads(audio, kind, pads)?;
                if report.old != report.new {
                    self.events.publish(EngineEvent::PadsChanged {
                        audio,
                        kind,
                        old: report.old,
                        new: report.new,
                    });
                    for peer in report.unlinked_peers {
                        self.events.publish(EngineEvent::LinkChanged {
                            channel: peer,
                            peer: None,
                        });
                    }
                    self.walk_dirty = true;
                }
                Ok(TaskReply::Done)
            }
            TaskDescriptor::SetAudioChannels { audio, count } => {
                let report = self.graph.set_audio_channels(audio, count)?;
                if report.old != report.new {
                    self.events.publish(EngineEvent::AudioChannelsChanged {
                        audio,
                        old: report.old,
                        new: report.new,
                    });
                    for peer in report.unlinked_peers {
                        self.events.publish(EngineEvent::LinkChanged {
                            channel: peer,
                            peer: None,
                        });
                    }
                    self.walk_dirty = true;
                }
                Ok(TaskReply::Done)
            }
            TaskDescriptor::Link { a, b } => {
                self.graph.link(a, b)?;
                self.events.publish(EngineEvent::LinkChanged {
                    channel: a,
                    peer: Some(b),
                });
                self.events.publish(EngineEvent::LinkChanged {
                    channel: b,
                    peer: Some(a),
                });
                self.walk_dirty = true;
                Ok(TaskReply::Done)
            }
            TaskDescriptor::Unlink { channel } => {
                let Some(peer) = self.graph.unlink(channel)? else {
                    return Ok(TaskReply::Done);
                };
                self.events.publish(EngineEvent::LinkChanged {
                    channel,
                    peer: None,
                });
                self.events.publish(EngineEvent::LinkChanged {
                    channel: peer,
                    peer: None,
                });
                // Runs that depended on the broken path release at the
                // next safe point, not synchronously
                for endpoint in [channel, peer] {
                    for run in self.graph.runs_on_channel(endpoint) {
                        let deferred = self.self_tasks.submit_detached(TaskDescriptor::CancelChannel {
                            channel: endpoint,
                            recall_id: Some(run),
                        });
                        if deferred.is_err() {
                            log::warn!("deferred cancel dropped for {} on {}", run, endpoint);
                        }
                    }
                }
                self.walk_dirty = true;
                Ok(TaskReply::Done)
            }
            TaskDescriptor::AttachAudioRecall { audio, recall } => Ok(TaskReply::RecallAttached(
                self.graph.attach_audio_recall(audio, recall)?,
            )),
            TaskDescriptor::AttachChannelRecall { channel, recall } => Ok(
                TaskReply::RecallAttached(self.graph.attach_channel_recall(channel, recall)?),
            ),
            TaskDescriptor::StartPlayback { audio, stop_at } => {
                if self.graph.audio(audio).is_none() {
                    return Err(StructuralError::NoSuchAudio(audio));
                }
                let recall_id = RecallId(self.run_ids.mint());
                self.runs.insert(
                    recall_id,
                    RunState {
                        origin: audio,
                        stop_at,
                        position: 0,
                        domain: downstream_closure(&self.graph, audio),
                        touched: false,
                        excluded_audios: BTreeSet::new(),
                        excluded_channels: BTreeSet::new(),
                        excluded_templates: BTreeSet::new(),
                    },
                );
                self.events.publish(EngineEvent::PlaybackStarted { audio, recall_id });
                log::debug!("started {} on {} (stop_at {:?})", recall_id, audio, stop_at);
                Ok(TaskReply::PlaybackStarted(recall_id))
            }
            TaskDescriptor::CancelAudio { audio, recall_id } => {
                self.graph.cancel_audio(audio, recall_id);
                match recall_id {
                    Some(id) => {
                        if let Some(run) = self.runs.get_mut(&id) {
                            run.excluded_audios.insert(audio);
                        }
                    }
                    None => {
                        for run in self.runs.values_mut() {
                            run.excluded_audios.insert(audio);
                        }
                    }
                }
                Ok(TaskReply::Done)
            }
            TaskDescriptor::CancelChannel { channel, recall_id } => {
                self.graph.cancel_channel(channel, recall_id);
                match recall_id {
                    Some(id) => {
                        if let Some(run) = self.runs.get_mut(&id) {
                            run.excluded_channels.insert(channel);
                        }
                    }
                    None => {
                        for run in self.runs.values_mut() {
                            run.excluded_channels.insert(channel);
                        }
                    }
                }
                Ok(TaskReply::Done)
            }
            TaskDescriptor::CancelRecall {
                owner,
                template,
                recall_id,
            } => {
                self.graph.cancel_recall(owner, template, recall_id);
                match recall_id {
                    Some(id) => {
                        if let Some(run) = self.runs.get_mut(&id) {
                            run.excluded_templates.insert(template);
                        }
                    }
                    None => {
                        for run in self.runs.values_mut() {
                            run.excluded_templates.insert(template);
                        }
                    }
                }
                Ok(TaskReply::Done)
            }
        }
    }

    // ------------------------------------------------------------------
    // Graph walk
    // ------------------------------------------------------------------

    fn refresh_walk(&mut self) {
        if !self.walk_dirty {
            return;
        }
        self.walk_order = self.graph.dependency_order();
        for run in self.runs.values_mut() {
            run.domain = downstream_closure(&self.graph, run.origin);
        }
        self.walk_dirty = false;
    }

    fn process_runs(&mut self) {
        let frames = self.config.buffer_size;
        for index in 0..self.walk_order.len() {
            let audio_id = self.walk_order[index];

            self.run_scratch.clear();
            for (recall_id, run) in &self.runs {
                if run.domain.contains(&audio_id) {
                    self.run_scratch.push(*recall_id);
                }
            }

            for run_index in 0..self.run_scratch.len() {
                let recall_id = self.run_scratch[run_index];
                let (position, stop_at, excluded_channels, excluded_templates) =
                    match self.runs.get(&recall_id) {
                        Some(run) if run.excluded_audios.contains(&audio_id) => continue,
                        Some(run) => (
                            run.position,
                            run.stop_at,
                            run.excluded_channels.clone(),
                            run.excluded_templates.clone(),
                        ),
                        None => continue,
                    };
                let window = match stop_at {
                    Some(stop) => frames.min(stop.saturating_sub(position)),
                    None => frames,
                };
                if window == 0 {
                    continue;
                }
                self.process_audio(
                    audio_id,
                    recall_id,
                    position,
                    window,
                    stop_at,
                    &excluded_channels,
                    &excluded_templates,
                );
            }
        }

        for run in self.runs.values_mut() {
            run.touched = true;
        }
    }

    /// One (audio, run) slice of the walk: link pulls and input strands,
    /// then audio-scoped recalls, then output strands
    #[allow(clippy::too_many_arguments)]
    fn process_audio(
        &mut self,
        audio_id: AudioId,
        recall_id: RecallId,
        position: usize,
        window: usize,
        stop_at: Option<usize>,
        excluded_channels: &BTreeSet<ChannelId>,
        excluded_templates: &BTreeSet<RecallTemplateId>,
    ) {
        let Some(audio) = self.graph.audio(audio_id) else {
            return;
        };
        let audio_channels = audio.audio_channels();
        let force_touch = !audio.recalls().is_empty();
        let input_ids = audio.channels(ChannelKind::Input).to_vec();
        let output_ids = audio.channels(ChannelKind::Output).to_vec();

        for cid in &input_ids {
            if excluded_channels.contains(cid) {
                continue;
            }
            channel_pass(
                &mut self.graph,
                &self.events,
                &mut self.block,
                &mut self.pull_scratch,
                *cid,
                recall_id,
                position,
                window,
                stop_at,
                audio_channels,
                force_touch,
                excluded_templates,
            );
        }

        if force_touch {
            audio_pass(
                &mut self.graph,
                &self.events,
                &mut self.block,
                audio_id,
                &input_ids,
                &output_ids,
                recall_id,
                position,
                window,
                stop_at,
                audio_channels,
                excluded_channels,
                excluded_templates,
            );
        }

        for cid in &output_ids {
            if excluded_channels.contains(cid) {
                continue;
            }
            channel_pass(
                &mut self.graph,
                &self.events,
                &mut self.block,
                &mut self.pull_scratch,
                *cid,
                recall_id,
                position,
                window,
                stop_at,
                audio_channels,
                force_touch,
                excluded_templates,
            );
        }
    }

    // ------------------------------------------------------------------
    // Master mix, monitor, release
    // ------------------------------------------------------------------

    fn mix_master(&mut self) {
        let frames = self.config.buffer_size;
        let Some(master_id) = self.master else {
            self.push_snapshot(0);
            return;
        };
        let Some(audio) = self.graph.audio(master_id) else {
            self.push_snapshot(0);
            return;
        };
        let strands = audio.audio_channels();

        self.mix.resize(strands, Vec::new());
        for strand in &mut self.mix {
            strand.clear();
            strand.resize(frames, 0.0);
        }

        for (line, cid) in audio.channels(ChannelKind::Output).iter().enumerate() {
            let strand = line % strands;
            let Some(channel) = self.graph.channel(*cid) else {
                continue;
            };
            for (recall_id, run) in &self.runs {
                if !run.domain.contains(&master_id) {
                    continue;
                }
                let Some(signal) = channel.recycling().runtime(*recall_id) else {
                    continue;
                };
                let window = signal.buffer().window(run.position, frames);
                for (dst, src) in self.mix[strand].iter_mut().zip(window.iter()) {
                    *dst += *src;
                }
            }
        }

        if let Some(producer) = self.frame_output.as_mut() {
            let needed = frames * strands;
            if producer.slots() >= needed {
                for frame in 0..frames {
                    for strand in 0..strands {
                        let _ = producer.push(self.mix[strand][frame]);
                    }
                }
            } else {
                log::warn!("frame ring full, dropping cycle {} output", self.cycle);
            }
        }

        self.push_snapshot(strands);
    }

    fn push_snapshot(&mut self, strands: usize) {
        let Some(producer) = self.monitor.as_mut() else {
            return;
        };
        let mut snapshot = CycleSnapshot {
            cycle: self.cycle,
            active_runs: self.runs.len() as u32,
            strand_count: strands.min(MAX_MONITOR_STRANDS) as u8,
            ..Default::default()
        };
        for strand in 0..snapshot.strand_count as usize {
            snapshot.master_peaks[strand] = self.mix[strand]
                .iter()
                .map(|s| s.abs())
                .fold(0.0, Sample::max);
        }
        // Metering goes stale immediately; dropping beats stalling
        let _ = producer.push(snapshot);
    }

    fn sweep_runs(&mut self) {
        let frames = self.config.buffer_size;
        let ids: Vec<RecallId> = self.runs.keys().copied().collect();
        for recall_id in ids {
            let Some(run) = self.runs.get_mut(&recall_id) else {
                continue;
            };
            if run.touched {
                run.position += frames;
            }

            let origin_gone = self.graph.audio(run.origin).is_none();
            let finished = run
                .stop_at
                .map(|stop| run.position >= stop)
                .unwrap_or(false);
            let drained = run.touched && !self.graph.run_in_use(recall_id);

            if finished || origin_gone || drained {
                self.graph.release_run(recall_id);
                self.runs.remove(&recall_id);
                self.events
                    .publish(EngineEvent::RecallCompleted { recall_id });
                log::debug!("released {}", recall_id);
            }
        }
    }
}

impl Runnable for AudioLoop {
    fn tick(&mut self) -> Result<(), FatalThreadError> {
        self.run_cycle();
        Ok(())
    }

    fn teardown(&mut self) {
        log::info!("audio loop stopped after {} cycles", self.cycle);
    }
}

/// The run's reach: its origin audio plus every audio downstream of it
/// through links
fn downstream_closure(graph: &AudioGraph, origin: AudioId) -> BTreeSet<AudioId> {
    let mut domain = BTreeSet::new();
    if graph.audio(origin).is_none() {
        return domain;
    }
    let mut stack = vec![origin];
    while let Some(audio_id) = stack.pop() {
        if !domain.insert(audio_id) {
            continue;
        }
        let Some(audio) = graph.audio(audio_id) else {
            continue;
        };
        for cid in audio.channels(ChannelKind::Output) {
            let Some(peer) = graph.peer(*cid) else {
                continue;
            };
            if let Some(consumer) = graph.channel(peer).map(|c| c.audio()) {
                stack.push(consumer);
            }
        }
    }
    domain
}

/// One strand's slice of the walk: ensure the runtime signal, pull the
/// linked peer's window (inputs only), then run the channel recall chain
#[allow(clippy::too_many_arguments)]
fn channel_pass(
    graph: &mut AudioGraph,
    events: &EventSender,
    block: &mut ProcessBlock,
    pull_scratch: &mut Vec<Sample>,
    cid: ChannelId,
    recall_id: RecallId,
    position: usize,
    window: usize,
    stop_at: Option<usize>,
    audio_channels: usize,
    force_touch: bool,
    excluded_templates: &BTreeSet<RecallTemplateId>,
) {
    let Some(channel) = graph.channel(cid) else {
        return;
    };
    let is_input = channel.kind() == ChannelKind::Input;
    let pulls = is_input && channel.link().is_some();
    let touched = force_touch || pulls || !channel.recalls().is_empty();
    if !touched {
        return;
    }

    pull_scratch.clear();
    if pulls {
        if let Some(signal) = channel
            .link()
            .and_then(|peer| graph.channel(peer))
            .and_then(|peer| peer.recycling().runtime(recall_id))
        {
            pull_scratch.extend_from_slice(signal.buffer().window(position, window));
        }
    }

    let Some(channel) = graph.channel_mut(cid) else {
        return;
    };
    process_channel(
        channel,
        events,
        block,
        pull_scratch,
        recall_id,
        position,
        window,
        stop_at,
        audio_channels,
        excluded_templates,
    );
}

#[allow(clippy::too_many_arguments)]
fn process_channel(
    channel: &mut Channel,
    events: &EventSender,
    block: &mut ProcessBlock,
    pulled: &[Sample],
    recall_id: RecallId,
    position: usize,
    window: usize,
    stop_at: Option<usize>,
    audio_channels: usize,
    excluded_templates: &BTreeSet<RecallTemplateId>,
) {
    let (rack, recycling) = channel.recalls_and_recycling_mut();

    let template_window: &[Sample] = recycling.template().buffer().window(position, window);
    block.template.clear();
    block.template.extend_from_slice(template_window);

    let signal = recycling.runtime_or_create(recall_id, stop_at);
    let usable = signal.ensure_window(position, window);
    if usable == 0 {
        return;
    }
    if !pulled.is_empty() {
        signal.buffer_mut().copy_window(position, pulled);
    }

    block.frames = usable;
    block.position = position;
    block.stop_at = stop_at;
    block.audio_channels = audio_channels;
    block.inputs.clear();
    block.outputs.resize(1, Vec::new());
    block.outputs[0].clear();
    block.outputs[0].extend_from_slice(signal.buffer().window(position, usable));

    for entry in rack.entries_mut() {
        if excluded_templates.contains(&entry.id()) {
            continue;
        }
        let status = entry.run_for(recall_id).process(block);
        match status {
            Ok(RunStatus::Active) => {}
            Ok(RunStatus::Done) => {
                entry.release_run(recall_id);
            }
            Err(err) => {
                log::warn!(
                    "recall '{}' failed for {}: {}; cancelling its instance",
                    entry.name(),
                    recall_id,
                    err
                );
                events.publish(EngineEvent::RecallFaulted {
                    recall_id,
                    template: entry.id(),
                    message: err.to_string(),
                });
                entry.release_run(recall_id);
            }
        }
    }

    if let Some(signal) = recycling.runtime_mut(recall_id) {
        signal.buffer_mut().copy_window(position, &block.outputs[0]);
    }
}

/// The audio-scoped slice of the walk: gather input line windows, run the
/// audio rack, write output line windows back
#[allow(clippy::too_many_arguments)]
fn audio_pass(
    graph: &mut AudioGraph,
    events: &EventSender,
    block: &mut ProcessBlock,
    audio_id: AudioId,
    input_ids: &[ChannelId],
    output_ids: &[ChannelId],
    recall_id: RecallId,
    position: usize,
    window: usize,
    stop_at: Option<usize>,
    audio_channels: usize,
    excluded_channels: &BTreeSet<ChannelId>,
    excluded_templates: &BTreeSet<RecallTemplateId>,
) {
    block.frames = window;
    block.position = position;
    block.stop_at = stop_at;
    block.audio_channels = audio_channels;
    block.template.clear();

    // Input line windows (silence where a strand has no runtime signal)
    block.inputs.resize(input_ids.len(), Vec::new());
    for (index, cid) in input_ids.iter().enumerate() {
        let line = &mut block.inputs[index];
        line.clear();
        let signal = graph
            .channel(*cid)
            .and_then(|c| c.recycling().runtime(recall_id));
        match signal {
            Some(signal) => {
                line.extend_from_slice(signal.buffer().window(position, window));
                line.resize(window, 0.0);
            }
            None => line.resize(window, 0.0),
        }
    }

    // Output line windows, ensuring the runtime signals exist (excluded
    // strands stay silent and untouched)
    block.outputs.resize(output_ids.len(), Vec::new());
    for (index, cid) in output_ids.iter().enumerate() {
        let line = &mut block.outputs[index];
        line.clear();
        if excluded_channels.contains(cid) {
            line.resize(window, 0.0);
            continue;
        }
        let Some(channel) = graph.channel_mut(*cid) else {
            line.resize(window, 0.0);
            continue;
        };
        let signal = channel.recycling_mut().runtime_or_create(recall_id, stop_at);
        let usable = signal.ensure_window(position, window);
        line.extend_from_slice(signal.buffer().window(position, usable));
        line.resize(window, 0.0);
    }

    let Some(audio) = graph.audio_mut(audio_id) else {
        return;
    };
    for entry in audio.recalls_mut().entries_mut() {
        if excluded_templates.contains(&entry.id()) {
            continue;
        }
        let status = entry.run_for(recall_id).process(block);
        match status {
            Ok(RunStatus::Active) => {}
            Ok(RunStatus::Done) => {
                entry.release_run(recall_id);
            }
            Err(err) => {
                log::warn!(
                    "recall '{}' failed for {}: {}; cancelling its instance",
                    entry.name(),
                    recall_id,
                    err
                );
                events.publish(EngineEvent::RecallFaulted {
                    recall_id,
                    template: entry.id(),
                    message: err.to_string(),
                });
                entry.release_run(recall_id);
            }
        }
    }

    for (index, cid) in output_ids.iter().enumerate() {
        if excluded_channels.contains(cid) {
            continue;
        }
        if let Some(channel) = graph.channel_mut(*cid) {
            if let Some(signal) = channel.recycling_mut().runtime_mut(recall_id) {
                signal.buffer_mut().copy_window(position, &block.outputs[index]);
            }
        }
    }
}

/// Root-of-tree heartbeat
///
/// The main loop owns no engine work of its own; self-timed children
/// carry their own clocks and the tree's supervision runs from the owner
/// via [`Engine::supervise`].
struct MainLoop {
    ticks: u64,
}

impl MainLoop {
    fn new() -> Self {
        Self { ticks: 0 }
    }
}

impl Runnable for MainLoop {
    fn tick(&mut self) -> Result<(), FatalThreadError> {
        self.ticks += 1;
        if self.ticks % 600 == 0 {
            log::debug!("main loop alive ({} ticks)", self.ticks);
        }
        Ok(())
    }
}

/// The running engine: thread tree plus the channels into and out of it
pub struct Engine {
    tree: ThreadTree,
    root: ThreadId,
    audio_thread: ThreadId,
    sink_thread: ThreadId,
    tasks: TaskSender,
    events: crossbeam::channel::Receiver<EngineEvent>,
    monitor: rtrb::Consumer<CycleSnapshot>,
}

impl Engine {
    /// Build the thread tree and start it
    ///
    /// `setup` runs against the audio loop before any thread exists, so
    /// initial graph construction needs no tasks. Everything after
    /// `start` returns goes through [`Engine::submit`].
    pub fn start(
        config: EngineConfig,
        sink: Box<dyn Sink>,
        setup: impl FnOnce(&mut AudioLoop),
    ) -> Result<Self, sluice_thread::ThreadError> {
        let bus = EventBus::new(config.event_bus_capacity);
        let events = bus.subscribe();
        let (monitor_tx, monitor_rx) = monitor_channel();
        // A couple of seconds of interleaved master audio
        let (frame_tx, frame_rx) = frame_channel(config.sample_rate as usize * 4);

        let (mut audio_loop, tasks) = AudioLoop::new(config.clone(), bus.sender());
        audio_loop.set_monitor(monitor_tx);
        audio_loop.set_frame_output(frame_tx);
        setup(&mut audio_loop);

        let mut tree = ThreadTree::new();
        let root = tree.insert(
            "main-loop",
            TickRate::Hz(config.main_loop_hz),
            Box::new(MainLoop::new()),
        );
        let audio_thread = tree.insert(
            "audio-loop",
            TickRate::Hz(config.cycles_per_second()),
            Box::new(audio_loop),
        );
        let sink_thread = tree.insert(
            "sink-loop",
            TickRate::SyncToParent { divisor: 1 },
            Box::new(SinkLoop::new(frame_rx, sink)),
        );
        tree.add_child(root, audio_thread)?;
        tree.add_child(audio_thread, sink_thread)?;
        tree.start(root)?;

        log::info!(
            "engine started: {:.1} cycles/s, buffer {} frames",
            config.cycles_per_second(),
            config.buffer_size
        );
        Ok(Self {
            tree,
            root,
            audio_thread,
            sink_thread,
            tasks,
            events,
            monitor: monitor_rx,
        })
    }

    /// Submit a structural task to the audio loop
    pub fn submit(&self, descriptor: TaskDescriptor) -> Result<TaskHandle, TaskError> {
        self.tasks.submit(descriptor)
    }

    /// A cloneable task sender for other producer threads
    pub fn task_sender(&self) -> TaskSender {
        self.tasks.clone()
    }

    /// The engine event stream
    pub fn events(&self) -> &crossbeam::channel::Receiver<EngineEvent> {
        &self.events
    }

    /// Latest monitor snapshot, draining anything older
    pub fn poll_monitor(&mut self) -> Option<CycleSnapshot> {
        let mut latest = None;
        while let Ok(snapshot) = self.monitor.pop() {
            latest = Some(snapshot);
        }
        latest
    }

    /// Drain thread lifecycle events and reap faulted subtrees
    pub fn supervise(&mut self) -> Vec<ThreadEvent> {
        self.tree.supervise()
    }

    /// Whether the audio loop thread is currently running
    pub fn is_running(&self) -> bool {
        self.tree
            .state(self.audio_thread)
            .map(|state| state == sluice_thread::ThreadState::Running)
            .unwrap_or(false)
    }

    /// Thread ids of (main loop, audio loop, sink), for diagnostics
    pub fn threads(&self) -> (ThreadId, ThreadId, ThreadId) {
        (self.root, self.audio_thread, self.sink_thread)
    }

    /// Stop the tree: sink before audio loop before main loop
    pub fn shutdown(mut self) -> Result<(), sluice_thread::ThreadError> {
        self.tree.stop(self.root)
    }
}
