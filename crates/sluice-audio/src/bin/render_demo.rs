//! Offline render demo
//!
//! Builds a small graph (a sine source feeding a master mixer), starts a
//! playback run through the task queue, drives the audio loop
//! synchronously, and writes the master output to a WAV file. This
//! exercises the whole core - tasks, graph walk, recall cloning, run
//! completion, sink - without any real-time threads.
//!
//! Usage: `render-demo [output.wav]`

use anyhow::{Context, Result};

use sluice_audio::event::EventBus;
use sluice_audio::recall::{EnvelopeChannel, MixerAudio, StreamChannel, VolumeChannel};
use sluice_audio::sink::{Sink, WavSink};
use sluice_audio::{
    AudioLoop, ChannelKind, EngineConfig, EngineEvent, Sample, TaskDescriptor, TaskReply,
};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let output = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "render-demo.wav".to_string());

    let config = EngineConfig::default();
    let seconds = 2.0;
    let stop_at = config.seconds_to_frames(seconds);

    let bus = EventBus::new(config.event_bus_capacity);
    let events = bus.subscribe();
    let (mut audio_loop, tasks) = AudioLoop::new(config.clone(), bus.sender());

    // Source: one strand streaming a 220Hz sine template
    let graph = audio_loop.graph_mut();
    let source = graph.add_audio(1);
    graph.set_pads(source, ChannelKind::Output, 1)?;
    let source_out = graph
        .audio(source)
        .and_then(|a| a.channel_at(ChannelKind::Output, 0, 0))
        .context("source output strand missing")?;
    let sine: Vec<Sample> = (0..stop_at)
        .map(|i| {
            let phase = i as f64 * 220.0 * std::f64::consts::TAU / f64::from(config.sample_rate);
            (phase.sin() * 0.5) as Sample
        })
        .collect();
    *graph.channel_mut(source_out).context("source strand missing")?.recycling_mut() =
        sluice_audio::graph::Recycling::with_template(sine);
    graph.attach_channel_recall(source_out, Box::new(StreamChannel::new()))?;
    graph.attach_channel_recall(source_out, Box::new(EnvelopeChannel::new(4800, 9600)))?;

    // Master: mixes its input pad and tames the level on the way out
    let master = graph.add_audio(1);
    graph.set_pads(master, ChannelKind::Input, 1)?;
    graph.set_pads(master, ChannelKind::Output, 1)?;
    graph.attach_audio_recall(master, Box::new(MixerAudio::new()))?;
    let master_in = graph
        .audio(master)
        .and_then(|a| a.channel_at(ChannelKind::Input, 0, 0))
        .context("master input strand missing")?;
    let master_out = graph
        .audio(master)
        .and_then(|a| a.channel_at(ChannelKind::Output, 0, 0))
        .context("master output strand missing")?;
    graph.attach_channel_recall(master_out, Box::new(VolumeChannel::new(0.8)))?;
    graph.link(master_in, source_out)?;
    audio_loop.set_master(master);

    // Sink fed straight from the frame ring, drained between cycles
    let (frame_tx, mut frame_rx) = sluice_audio::sink::frame_channel(config.sample_rate as usize);
    audio_loop.set_frame_output(frame_tx);
    let mut sink = WavSink::create(&output, 1, config.sample_rate)?;

    let handle = tasks.submit(TaskDescriptor::StartPlayback {
        audio: source,
        stop_at: Some(stop_at),
    })?;
    audio_loop.run_cycle();
    let run = match handle.wait()? {
        TaskReply::PlaybackStarted(id) => id,
        other => anyhow::bail!("unexpected task reply: {:?}", other),
    };
    log::info!("rendering {} ({}s) as {}", output, seconds, run);

    let mut scratch: Vec<Sample> = Vec::new();
    while audio_loop.active_runs() > 0 {
        audio_loop.run_cycle();
        scratch.clear();
        while let Ok(sample) = frame_rx.pop() {
            scratch.push(sample);
        }
        sink.write(&scratch)?;
    }
    sink.finalize()?;

    let mut completed = false;
    while let Ok(event) = events.try_recv() {
        match event {
            EngineEvent::RecallCompleted { recall_id } if recall_id == run => completed = true,
            EngineEvent::RecallFaulted { message, .. } => log::warn!("recall fault: {}", message),
            _ => {}
        }
    }
    anyhow::ensure!(completed, "run never reported completion");

    log::info!(
        "done: {} cycles, wrote {}",
        audio_loop.cycle(),
        output
    );
    Ok(())
}
