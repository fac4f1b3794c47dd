//! Input format tracking and resampler (re)construction.
//!
//! The negotiator owns the resampler and the backlog of converted samples
//! waiting for delivery. When decoded frames change format mid-stream the old
//! resampler is drained into the backlog before a new one is opened, so a
//! successful switch loses no audio.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use cadence_core::{AudioFormat, DecodedFrame};
use std::collections::VecDeque;
use tracing::{debug, warn};

use crate::resample::{Resampler, ResamplerFactory};

/// Result of comparing a frame's format with the last one seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Negotiation {
    /// Same format as before; nothing rebuilt.
    Unchanged,
    /// Format changed and a new resampler is open.
    Reconfigured,
    /// Format changed and no resampler could be opened. Frames in this
    /// format are dropped until the format changes again.
    Failed,
}

/// Keeps the conversion pipeline matched to the decoded frame format.
pub struct FormatNegotiator {
    output: AudioFormat,
    input: Option<AudioFormat>,
    factory: ResamplerFactory,
    resampler: Option<Box<dyn Resampler>>,
    /// Converted interleaved samples in the output format.
    backlog: VecDeque<f32>,
    /// Input has gone into the resampler since it was last drained.
    undrained: bool,
    reconfigurations: u64,
}

impl FormatNegotiator {
    pub fn new(output: AudioFormat, factory: ResamplerFactory) -> Self {
        Self {
            output,
            input: None,
            factory,
            resampler: None,
            backlog: VecDeque::new(),
            undrained: false,
            reconfigurations: 0,
        }
    }

    /// Fixed output format, as requested by the sink.
    pub const fn output_format(&self) -> &AudioFormat {
        &self.output
    }

    /// Last input format seen.
    pub fn input_format(&self) -> Option<&AudioFormat> {
        self.input.as_ref()
    }

    /// True when a resampler is open.
    pub fn is_open(&self) -> bool {
        self.resampler.is_some()
    }

    /// Number of format changes handled so far.
    pub const fn reconfigurations(&self) -> u64 {
        self.reconfigurations
    }

    /// Compare `format` with the last input format and rebuild on change.
    pub fn negotiate(&mut self, format: &AudioFormat) -> Negotiation {
        if self.input.as_ref() == Some(format) {
            return Negotiation::Unchanged;
        }

        self.input = Some(*format);
        self.reconfigurations += 1;
        self.retire_resampler();

        debug!("Converting from {} to {}", format, self.output);

        let mut resampler = (self.factory)();
        match resampler.configure(format, &self.output) {
            Ok(()) => {
                self.resampler = Some(resampler);
                Negotiation::Reconfigured
            }
            Err(e) => {
                warn!("Unable to open resampler for {}: {e}", format);
                Negotiation::Failed
            }
        }
    }

    /// Convert a frame already negotiated with [`negotiate`](Self::negotiate).
    ///
    /// Returns the number of output frames added to the backlog. Frames are
    /// dropped while no resampler is open.
    pub fn push_frame(&mut self, frame: &DecodedFrame) -> usize {
        let Some(resampler) = self.resampler.as_mut() else {
            return 0;
        };

        self.undrained = true;
        match resampler.convert(frame) {
            Ok(samples) => {
                let frames = samples.len() / self.output.channels();
                self.backlog.extend(samples);
                frames
            }
            Err(e) => {
                warn!("Dropping {} frames: {e}", frame.frames());
                0
            }
        }
    }

    /// Converted frames ready for delivery.
    pub fn available_frames(&self) -> usize {
        self.backlog.len() / self.output.channels()
    }

    /// True when at least `min_frames` converted frames are ready.
    pub fn is_ready(&self, min_frames: usize) -> bool {
        self.available_frames() >= min_frames.max(1)
    }

    /// Converted-but-undelivered audio, in microseconds at the output rate.
    pub fn output_delay_micros(&self) -> i64 {
        self.output.frames_to_micros(self.available_frames())
    }

    /// Input buffered inside the resampler, in microseconds at the input rate.
    pub fn input_delay_micros(&self) -> i64 {
        match (&self.resampler, &self.input) {
            (Some(resampler), Some(input)) => {
                input.frames_to_micros(resampler.buffered_input_delay())
            }
            _ => 0,
        }
    }

    /// True when the resampler holds input that has not produced output yet.
    pub fn has_buffered_input(&self) -> bool {
        self.undrained
            && self
                .resampler
                .as_ref()
                .is_some_and(|r| r.buffered_input_delay() > 0)
    }

    /// Copy of the first `frames` converted frames, without consuming them.
    pub fn peek(&self, frames: usize) -> Vec<f32> {
        let samples = frames * self.output.channels();
        self.backlog.iter().take(samples).copied().collect()
    }

    /// Drop the first `frames` converted frames (after a successful delivery).
    pub fn consume(&mut self, frames: usize) {
        let samples = (frames * self.output.channels()).min(self.backlog.len());
        self.backlog.drain(..samples);
    }

    /// Push the resampler's buffered input through to the backlog.
    ///
    /// Returns the number of frames added.
    pub fn drain(&mut self) -> usize {
        self.undrained = false;
        let Some(resampler) = self.resampler.as_mut() else {
            return 0;
        };

        let before = self.backlog.len();
        match resampler.drain() {
            Ok(tail) => self.backlog.extend(tail),
            Err(e) => warn!("Resampler drain failed: {e}"),
        }
        // Whatever could not be drained is dropped so the tail is not retried.
        resampler.reset();
        (self.backlog.len() - before) / self.output.channels()
    }

    /// Discard converted output and resampler state.
    pub fn flush(&mut self) {
        self.backlog.clear();
        self.undrained = false;
        if let Some(resampler) = self.resampler.as_mut() {
            resampler.reset();
        }
    }

    /// Release the resampler. The backlog is dropped.
    pub fn close(&mut self) {
        if let Some(mut resampler) = self.resampler.take() {
            resampler.close();
        }
        self.backlog.clear();
        self.undrained = false;
        self.input = None;
    }

    fn retire_resampler(&mut self) {
        self.undrained = false;
        if let Some(mut old) = self.resampler.take() {
            match old.drain() {
                Ok(tail) => self.backlog.extend(tail),
                Err(e) => warn!("Dropping resampler tail: {e}"),
            }
            old.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resample::RubatoResampler;
    use cadence_core::{ChannelLayout, Error, Result, SampleFormat};

    fn output() -> AudioFormat {
        AudioFormat::new(44100, SampleFormat::F32, ChannelLayout::STEREO)
    }

    fn mono_frame(frames: usize) -> DecodedFrame {
        DecodedFrame::from_f32(44100, ChannelLayout::MONO, &vec![0.25; frames])
    }

    fn stereo_frame(frames: usize) -> DecodedFrame {
        DecodedFrame::from_f32(44100, ChannelLayout::STEREO, &vec![0.5; frames * 2])
    }

    impl FormatNegotiator {
        fn process(&mut self, frame: &DecodedFrame) -> Negotiation {
            let negotiation = self.negotiate(frame.format());
            self.push_frame(frame);
            negotiation
        }
    }

    /// Holds all input until drained.
    struct HoldingResampler {
        held: Vec<f32>,
        out_channels: usize,
    }

    impl Resampler for HoldingResampler {
        fn configure(&mut self, _input: &AudioFormat, output: &AudioFormat) -> Result<()> {
            self.out_channels = output.channels();
            Ok(())
        }

        fn convert(&mut self, frame: &DecodedFrame) -> Result<Vec<f32>> {
            let in_channels = frame.format().channels();
            self.held.extend(crate::resample::remix(
                &frame.to_f32(),
                in_channels,
                self.out_channels,
            ));
            Ok(Vec::new())
        }

        fn buffered_input_delay(&self) -> usize {
            self.held.len() / self.out_channels.max(1)
        }

        fn drain(&mut self) -> Result<Vec<f32>> {
            Ok(std::mem::take(&mut self.held))
        }

        fn reset(&mut self) {
            self.held.clear();
        }

        fn close(&mut self) {}
    }

    /// Refuses mono input.
    struct MonoRefusingResampler(RubatoResampler);

    impl Resampler for MonoRefusingResampler {
        fn configure(&mut self, input: &AudioFormat, output: &AudioFormat) -> Result<()> {
            if input.channel_layout == ChannelLayout::MONO {
                return Err(Error::UnsupportedFormat("mono".into()));
            }
            self.0.configure(input, output)
        }

        fn convert(&mut self, frame: &DecodedFrame) -> Result<Vec<f32>> {
            self.0.convert(frame)
        }

        fn buffered_input_delay(&self) -> usize {
            self.0.buffered_input_delay()
        }

        fn drain(&mut self) -> Result<Vec<f32>> {
            self.0.drain()
        }

        fn reset(&mut self) {
            self.0.reset();
        }

        fn close(&mut self) {
            self.0.close();
        }
    }

    #[test]
    fn test_unchanged_format() {
        let mut negotiator = FormatNegotiator::new(output(), RubatoResampler::factory(1024));

        assert_eq!(negotiator.process(&mono_frame(100)), Negotiation::Reconfigured);
        assert_eq!(negotiator.process(&mono_frame(100)), Negotiation::Unchanged);
        assert_eq!(negotiator.reconfigurations(), 1);
        assert_eq!(negotiator.available_frames(), 200);
    }

    #[test]
    fn test_format_change_rebuilds() {
        let mut negotiator = FormatNegotiator::new(output(), RubatoResampler::factory(1024));

        negotiator.process(&mono_frame(100));
        assert_eq!(negotiator.process(&stereo_frame(50)), Negotiation::Reconfigured);
        assert_eq!(negotiator.reconfigurations(), 2);
        assert_eq!(
            negotiator.input_format().unwrap().channel_layout,
            ChannelLayout::STEREO
        );
        assert_eq!(negotiator.available_frames(), 150);
    }

    #[test]
    fn test_reconfigure_keeps_buffered_input() {
        let factory: ResamplerFactory = Box::new(|| {
            Box::new(HoldingResampler {
                held: Vec::new(),
                out_channels: 0,
            })
        });
        let mut negotiator = FormatNegotiator::new(output(), factory);

        negotiator.process(&mono_frame(64));
        assert_eq!(negotiator.available_frames(), 0);
        assert!(negotiator.has_buffered_input());

        negotiator.process(&stereo_frame(32));
        assert_eq!(negotiator.available_frames(), 64);

        assert_eq!(negotiator.drain(), 32);
        assert_eq!(negotiator.available_frames(), 96);
        assert!(!negotiator.has_buffered_input());
    }

    #[test]
    fn test_reconfigure_flushes_converted_tail() {
        let output = AudioFormat::new(48000, SampleFormat::F32, ChannelLayout::STEREO);
        let mut negotiator = FormatNegotiator::new(output, RubatoResampler::factory(1024));

        let mut samples = vec![0.0f32; 3000];
        samples.extend(std::iter::repeat_n(0.5f32, 300));
        negotiator.process(&DecodedFrame::from_f32(44100, ChannelLayout::MONO, &samples));
        assert!(negotiator.has_buffered_input());

        let stereo = DecodedFrame::from_f32(44100, ChannelLayout::STEREO, &[0.0; 64]);
        assert_eq!(negotiator.process(&stereo), Negotiation::Reconfigured);

        // 3300 frames at 44.1k is 3591 at 48k; the last ~326 carry the loud tail.
        let converted = negotiator.peek(3591);
        assert_eq!(converted.len(), 3591 * 2);
        let loud = converted
            .chunks_exact(2)
            .filter(|frame| frame[0].abs() > 0.25 && frame[1].abs() > 0.25)
            .count();
        assert!((310..=345).contains(&loud), "got {loud} loud frames");
    }

    #[test]
    fn test_failed_open_drops_output() {
        let factory: ResamplerFactory =
            Box::new(|| Box::new(MonoRefusingResampler(RubatoResampler::new(1024))));
        let mut negotiator = FormatNegotiator::new(output(), factory);

        assert_eq!(negotiator.process(&mono_frame(100)), Negotiation::Failed);
        assert!(!negotiator.is_open());
        assert_eq!(negotiator.available_frames(), 0);

        // Still failed for the same format, no rebuild attempted.
        assert_eq!(negotiator.process(&mono_frame(100)), Negotiation::Unchanged);
        assert_eq!(negotiator.reconfigurations(), 1);

        assert_eq!(negotiator.process(&stereo_frame(10)), Negotiation::Reconfigured);
        assert_eq!(negotiator.available_frames(), 10);
    }

    #[test]
    fn test_peek_and_consume() {
        let mut negotiator = FormatNegotiator::new(output(), RubatoResampler::factory(1024));
        negotiator.process(&stereo_frame(10));

        assert!(negotiator.is_ready(10));
        assert!(!negotiator.is_ready(11));

        let chunk = negotiator.peek(4);
        assert_eq!(chunk.len(), 8);
        assert_eq!(negotiator.available_frames(), 10);

        negotiator.consume(4);
        assert_eq!(negotiator.available_frames(), 6);
    }

    #[test]
    fn test_delays() {
        let mut negotiator = FormatNegotiator::new(output(), RubatoResampler::factory(1024));
        negotiator.process(&stereo_frame(441));

        assert_eq!(negotiator.output_delay_micros(), 10_000);
        assert_eq!(negotiator.input_delay_micros(), 0);
    }

    #[test]
    fn test_flush_and_close() {
        let mut negotiator = FormatNegotiator::new(output(), RubatoResampler::factory(1024));
        negotiator.process(&stereo_frame(10));

        negotiator.flush();
        assert_eq!(negotiator.available_frames(), 0);
        assert!(negotiator.is_open());

        negotiator.close();
        assert!(!negotiator.is_open());
        assert!(negotiator.input_format().is_none());
    }
}
