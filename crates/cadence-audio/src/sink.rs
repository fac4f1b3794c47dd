//! Sink abstraction over the concrete audio backend.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use cadence_core::{AudioFormat, Result};
use tracing::trace;

/// Whether a sink took a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliverOutcome {
    /// The chunk was queued for playback.
    Accepted,
    /// No room right now; the caller keeps the chunk and retries later.
    Busy,
}

/// Audio backend fed by the decode loop.
///
/// Sinks are created and used on the decode thread only, so device handles
/// that are not `Send` can live inside them.
pub trait SinkAdapter {
    /// Format the sink wants samples in. Fixed for the sink's lifetime.
    fn output_format(&self) -> AudioFormat;

    /// Offer interleaved `samples` in [`output_format`](Self::output_format).
    ///
    /// A busy sink must not keep any part of the chunk.
    fn deliver(&mut self, samples: &[f32], pts: Option<i64>, epoch: u32) -> DeliverOutcome;

    fn pause(&mut self);

    fn resume(&mut self);

    /// Drop everything buffered but not yet played.
    fn flush(&mut self);

    /// Microseconds between a sample being accepted and becoming audible.
    fn output_delay(&self) -> i64;

    /// Told about a new decoded input format.
    fn reconfigure(&mut self, _input: &AudioFormat) {}

    /// Release the device. Called once, on the decode thread, at exit.
    fn close(&mut self) {}
}

/// Builds the sink on the decode thread.
pub type SinkFactory = Box<dyn FnOnce() -> Result<Box<dyn SinkAdapter>> + Send>;

/// Sink that accepts and discards everything.
#[derive(Debug, Clone)]
pub struct NullSink {
    format: AudioFormat,
    frames: u64,
    paused: bool,
}

impl NullSink {
    pub const fn new(format: AudioFormat) -> Self {
        Self {
            format,
            frames: 0,
            paused: false,
        }
    }

    /// Factory for [`AudioBackend`](crate::AudioBackend).
    pub fn factory(format: AudioFormat) -> SinkFactory {
        Box::new(move || Ok(Box::new(Self::new(format)) as Box<dyn SinkAdapter>))
    }

    /// Frames accepted so far.
    pub const fn frames(&self) -> u64 {
        self.frames
    }

    pub const fn is_paused(&self) -> bool {
        self.paused
    }
}

impl Default for NullSink {
    fn default() -> Self {
        Self::new(AudioFormat::default())
    }
}

impl SinkAdapter for NullSink {
    fn output_format(&self) -> AudioFormat {
        self.format
    }

    fn deliver(&mut self, samples: &[f32], pts: Option<i64>, _epoch: u32) -> DeliverOutcome {
        let frames = samples.len() / self.format.channels();
        trace!("Null sink took {} frames (pts {:?})", frames, pts);
        self.frames += frames as u64;
        DeliverOutcome::Accepted
    }

    fn pause(&mut self) {
        self.paused = true;
    }

    fn resume(&mut self) {
        self.paused = false;
    }

    fn flush(&mut self) {}

    fn output_delay(&self) -> i64 {
        0
    }
}
