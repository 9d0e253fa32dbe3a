//! Output sink - where master frames leave the engine
//!
//! Device I/O lives outside the core; the engine hands interleaved master
//! frames to a [`Sink`]. The audio loop never writes a sink directly
//! (file writes block): it pushes frames into a wait-free ring, and a
//! sink thread beneath it in the thread tree drains the ring and does the
//! actual writing.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use sluice_thread::{FatalThreadError, Runnable};
use thiserror::Error;

use crate::types::Sample;

/// Sink failures
#[derive(Debug, Error)]
pub enum SinkError {
    /// WAV encoding or file I/O failed
    #[error("wav write failed: {0}")]
    Wav(#[from] hound::Error),

    /// The sink was already finalized
    #[error("sink is closed")]
    Closed,
}

/// Consumer of interleaved master frames
pub trait Sink: Send {
    /// Write a block of interleaved frames
    fn write(&mut self, interleaved: &[Sample]) -> Result<(), SinkError>;

    /// Flush and close; further writes fail
    fn finalize(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Discards everything (headless/test operation)
pub struct NullSink;

impl Sink for NullSink {
    fn write(&mut self, _interleaved: &[Sample]) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Writes 32-bit float WAV via hound
pub struct WavSink {
    writer: Option<hound::WavWriter<BufWriter<File>>>,
}

impl WavSink {
    /// Create the output file; `channels` is the interleave width
    pub fn create(
        path: impl AsRef<Path>,
        channels: u16,
        sample_rate: u32,
    ) -> Result<Self, SinkError> {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        Ok(Self {
            writer: Some(hound::WavWriter::create(path, spec)?),
        })
    }
}

impl Sink for WavSink {
    fn write(&mut self, interleaved: &[Sample]) -> Result<(), SinkError> {
        let writer = self.writer.as_mut().ok_or(SinkError::Closed)?;
        for sample in interleaved {
            writer.write_sample(*sample)?;
        }
        Ok(())
    }

    fn finalize(&mut self) -> Result<(), SinkError> {
        if let Some(writer) = self.writer.take() {
            writer.finalize()?;
        }
        Ok(())
    }
}

impl Drop for WavSink {
    fn drop(&mut self) {
        if let Err(err) = self.finalize() {
            log::error!("failed to finalize wav sink: {}", err);
        }
    }
}

/// Create the frame ring between the audio loop and the sink thread
///
/// `capacity` is in samples (frames × channels); size it for at least a
/// second of audio so a slow disk never back-pressures the audio loop.
pub fn frame_channel(capacity: usize) -> (rtrb::Producer<Sample>, rtrb::Consumer<Sample>) {
    rtrb::RingBuffer::new(capacity)
}

/// Runnable for the sink thread: drains the frame ring into the sink
pub struct SinkLoop {
    frames: rtrb::Consumer<Sample>,
    sink: Box<dyn Sink>,
    scratch: Vec<Sample>,
}

impl SinkLoop {
    /// New sink loop over a frame ring
    pub fn new(frames: rtrb::Consumer<Sample>, sink: Box<dyn Sink>) -> Self {
        Self {
            frames,
            sink,
            scratch: Vec::with_capacity(8192),
        }
    }

    fn drain(&mut self) -> Result<(), SinkError> {
        let available = self.frames.slots();
        if available == 0 {
            return Ok(());
        }
        self.scratch.clear();
        for _ in 0..available {
            match self.frames.pop() {
                Ok(sample) => self.scratch.push(sample),
                Err(_) => break,
            }
        }
        self.sink.write(&self.scratch)
    }
}

impl Runnable for SinkLoop {
    fn tick(&mut self) -> Result<(), FatalThreadError> {
        self.drain()
            .map_err(|err| FatalThreadError::new(err.to_string()))
    }

    fn teardown(&mut self) {
        // Flush whatever the audio loop pushed after our last tick
        if let Err(err) = self.drain() {
            log::error!("sink drain failed during teardown: {}", err);
        }
        if let Err(err) = self.sink.finalize() {
            log::error!("sink finalize failed: {}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wav_sink_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.wav");

        let mut sink = WavSink::create(&path, 2, 48_000).unwrap();
        sink.write(&[0.1, -0.1, 0.2, -0.2]).unwrap();
        sink.finalize().unwrap();

        let mut reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().channels, 2);
        let samples: Vec<f32> = reader.samples::<f32>().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![0.1, -0.1, 0.2, -0.2]);
    }

    #[test]
    fn test_write_after_finalize_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.wav");

        let mut sink = WavSink::create(&path, 1, 48_000).unwrap();
        sink.finalize().unwrap();
        assert!(matches!(sink.write(&[0.0]), Err(SinkError::Closed)));
    }

    #[test]
    fn test_sink_loop_drains_ring() {
        let (mut tx, rx) = frame_channel(64);
        for i in 0..10 {
            tx.push(i as Sample).unwrap();
        }

        let mut sink_loop = SinkLoop::new(rx, Box::new(NullSink));
        sink_loop.tick().unwrap();
        assert_eq!(sink_loop.frames.slots(), 0);
    }
}
