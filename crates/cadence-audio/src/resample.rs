//! Sample conversion using rubato.
//!
//! A [`Resampler`] turns decoded frames of one format into interleaved `f32`
//! samples at the sink's rate and channel layout.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use cadence_core::{AudioFormat, DecodedFrame, Error, Result};
use rubato::{FftFixedIn, Resampler as RubatoResamplerTrait};
use tracing::debug;

/// Conversion between one input format and one output format.
pub trait Resampler {
    /// Open a conversion from `input` to `output`, replacing any previous one.
    fn configure(&mut self, input: &AudioFormat, output: &AudioFormat) -> Result<()>;

    /// Convert a frame in the configured input format.
    ///
    /// Returns whatever output became available; input that does not yet fill
    /// a conversion block stays buffered.
    fn convert(&mut self, frame: &DecodedFrame) -> Result<Vec<f32>>;

    /// Frames of input-rate audio held inside the converter.
    fn buffered_input_delay(&self) -> usize;

    /// Flush buffered input, returning the remaining output.
    fn drain(&mut self) -> Result<Vec<f32>>;

    /// Discard buffered input and filter state.
    fn reset(&mut self);

    /// Release the conversion. `configure` must be called before reuse.
    fn close(&mut self);
}

/// Builds fresh resamplers for the format negotiator.
pub type ResamplerFactory = Box<dyn Fn() -> Box<dyn Resampler> + Send>;

/// Center and surround mix-in level for 5.1 downmix (-3 dB).
const DOWNMIX_LEVEL: f32 = std::f32::consts::FRAC_1_SQRT_2;

/// Rubato-backed resampler with channel remixing.
///
/// Channels are remixed to the output layout first, then rate-converted.
/// Equal input and output rates bypass rubato entirely. The FFT filter delay
/// is trimmed from the start of each conversion, so output frame `n` lines up
/// with input time `n / output_rate`.
pub struct RubatoResampler {
    chunk_frames: usize,
    active: Option<Conversion>,
}

struct Conversion {
    input: AudioFormat,
    output: AudioFormat,
    fft: Option<FftFixedIn<f32>>,
    /// Remixed input waiting for a full block, one buffer per output channel.
    pending: Vec<Vec<f32>>,
    /// Leading output frames still to drop for the filter delay.
    skip: usize,
    /// Input frames accepted since the conversion opened or was reset.
    frames_in: u64,
    /// Output frames returned since the conversion opened or was reset.
    frames_out: u64,
}

impl Conversion {
    fn restart(&mut self) {
        if let Some(fft) = self.fft.as_mut() {
            fft.reset();
            self.skip = fft.output_delay();
        }
        self.pending.iter_mut().for_each(Vec::clear);
        self.frames_in = 0;
        self.frames_out = 0;
    }

    /// Output frames the input accepted so far maps to.
    fn target_frames(&self) -> u64 {
        self.frames_in * u64::from(self.output.sample_rate) / u64::from(self.input.sample_rate)
    }

    /// Run one input block through the filter, padding with silence once
    /// `pending` runs out.
    fn process_block(&mut self, limit: usize, output: &mut Vec<f32>) -> Result<usize> {
        let Some(fft) = self.fft.as_mut() else {
            return Ok(0);
        };

        let needed = fft.input_frames_next();
        let block: Vec<Vec<f32>> = self
            .pending
            .iter_mut()
            .map(|ch| {
                let take = ch.len().min(needed);
                let mut data: Vec<f32> = ch.drain(..take).collect();
                data.resize(needed, 0.0);
                data
            })
            .collect();

        let resampled = fft
            .process(&block, None)
            .map_err(|e| Error::UnsupportedFormat(format!("Resample failed: {e}")))?;

        let frames = emit(&resampled, &mut self.skip, limit, output);
        self.frames_out += frames as u64;
        Ok(frames)
    }
}

impl RubatoResampler {
    pub const fn new(chunk_frames: usize) -> Self {
        Self {
            chunk_frames,
            active: None,
        }
    }

    /// Factory producing resamplers with the given block size.
    pub fn factory(chunk_frames: usize) -> ResamplerFactory {
        Box::new(move || Box::new(Self::new(chunk_frames)) as Box<dyn Resampler>)
    }

    fn conversion(&mut self) -> Result<&mut Conversion> {
        self.active
            .as_mut()
            .ok_or_else(|| Error::UnsupportedFormat("resampler is not configured".to_string()))
    }
}

impl Default for RubatoResampler {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl Resampler for RubatoResampler {
    fn configure(&mut self, input: &AudioFormat, output: &AudioFormat) -> Result<()> {
        self.active = None;

        if input.sample_rate == 0 || output.sample_rate == 0 {
            return Err(Error::UnsupportedFormat(format!(
                "cannot convert {input} to {output}: zero sample rate"
            )));
        }

        let channels = output.channels();
        let fft = if input.sample_rate == output.sample_rate {
            None
        } else {
            let fft = FftFixedIn::<f32>::new(
                input.sample_rate as usize,
                output.sample_rate as usize,
                self.chunk_frames.max(1),
                2,
                channels,
            )
            .map_err(|e| Error::UnsupportedFormat(format!("Failed to create resampler: {e}")))?;
            Some(fft)
        };

        debug!(
            "Resampler opened: {} -> {} ({})",
            input,
            output,
            if fft.is_some() { "rate conversion" } else { "remix only" }
        );

        self.active = Some(Conversion {
            input: *input,
            output: *output,
            skip: fft.as_ref().map_or(0, |fft| fft.output_delay()),
            fft,
            pending: vec![Vec::new(); channels],
            frames_in: 0,
            frames_out: 0,
        });
        Ok(())
    }

    fn convert(&mut self, frame: &DecodedFrame) -> Result<Vec<f32>> {
        let conversion = self.conversion()?;

        if frame.format() != &conversion.input {
            return Err(Error::UnsupportedFormat(format!(
                "frame format {} does not match resampler input {}",
                frame.format(),
                conversion.input
            )));
        }

        let out_channels = conversion.output.channels();
        let remixed = remix(&frame.to_f32(), conversion.input.channels(), out_channels);

        let Some(fft) = conversion.fft.as_ref() else {
            return Ok(remixed);
        };
        let mut next = fft.input_frames_next();

        for (index, sample) in remixed.iter().enumerate() {
            conversion.pending[index % out_channels].push(*sample);
        }
        conversion.frames_in += (remixed.len() / out_channels) as u64;

        let mut output = Vec::new();
        while conversion.pending[0].len() >= next {
            conversion.process_block(usize::MAX, &mut output)?;
            next = conversion
                .fft
                .as_ref()
                .map_or(usize::MAX, |fft| fft.input_frames_next());
        }

        Ok(output)
    }

    fn buffered_input_delay(&self) -> usize {
        let Some(conversion) = &self.active else {
            return 0;
        };
        if conversion.fft.is_none() {
            return 0;
        }

        let emitted = (conversion.frames_out * u64::from(conversion.input.sample_rate))
            .div_ceil(u64::from(conversion.output.sample_rate));
        conversion.frames_in.saturating_sub(emitted) as usize
    }

    fn drain(&mut self) -> Result<Vec<f32>> {
        let conversion = self.conversion()?;
        let Some(fft) = conversion.fft.as_ref() else {
            return Ok(Vec::new());
        };

        // Enough blocks to push the pending input and the filter's held
        // input out, counted in input frames.
        let delay_in = fft.output_delay() as u64 * u64::from(conversion.input.sample_rate)
            / u64::from(conversion.output.sample_rate);
        let chunk = fft.input_frames_next().max(1);
        let mut blocks = (conversion.pending[0].len() + delay_in as usize) / chunk + 3;

        let target = conversion.target_frames();
        let mut output = Vec::new();
        while conversion.frames_out < target && blocks > 0 {
            blocks -= 1;
            let limit = (target - conversion.frames_out) as usize;
            conversion.process_block(limit, &mut output)?;
        }

        conversion.pending.iter_mut().for_each(Vec::clear);
        Ok(output)
    }

    fn reset(&mut self) {
        if let Some(conversion) = self.active.as_mut() {
            conversion.restart();
        }
    }

    fn close(&mut self) {
        self.active = None;
    }
}

/// Append up to `max_frames` frames of planar `channels` to `output`,
/// interleaved, after dropping the first `skip` frames.
///
/// Returns the number of frames appended.
fn emit(
    channels: &[Vec<f32>],
    skip: &mut usize,
    max_frames: usize,
    output: &mut Vec<f32>,
) -> usize {
    let Some(first) = channels.first() else {
        return 0;
    };

    let skipped = first.len().min(*skip);
    *skip -= skipped;

    let frames = (first.len() - skipped).min(max_frames);
    output.reserve(frames * channels.len());
    for frame in skipped..skipped + frames {
        for ch in channels {
            output.push(ch[frame]);
        }
    }
    frames
}

/// Remix interleaved samples between channel counts.
///
/// - equal counts: unchanged
/// - to mono: average of all input channels
/// - from mono: duplicated to every output channel
/// - 5.1 to stereo: ITU-style downmix, LFE dropped
/// - otherwise: shared channels copied, extra output channels silent
pub fn remix(samples: &[f32], in_channels: usize, out_channels: usize) -> Vec<f32> {
    if in_channels == out_channels || in_channels == 0 || out_channels == 0 {
        return samples.to_vec();
    }

    let frames = samples.len() / in_channels;
    let mut output = Vec::with_capacity(frames * out_channels);

    for frame in samples.chunks_exact(in_channels) {
        match (in_channels, out_channels) {
            (_, 1) => {
                let sum: f32 = frame.iter().sum();
                output.push(sum / in_channels as f32);
            }
            (1, _) => {
                output.extend(std::iter::repeat_n(frame[0], out_channels));
            }
            (6, 2) => {
                let gain = 1.0 / (1.0 + 2.0 * DOWNMIX_LEVEL);
                let center = frame[2] * DOWNMIX_LEVEL;
                output.push((frame[0] + center + frame[4] * DOWNMIX_LEVEL) * gain);
                output.push((frame[1] + center + frame[5] * DOWNMIX_LEVEL) * gain);
            }
            _ => {
                for ch in 0..out_channels {
                    output.push(frame.get(ch).copied().unwrap_or(0.0));
                }
            }
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_core::{ChannelLayout, SampleFormat};

    fn format(rate: u32, layout: ChannelLayout) -> AudioFormat {
        AudioFormat::new(rate, SampleFormat::F32, layout)
    }

    #[test]
    #[allow(clippy::float_cmp)]
    fn test_remix_mono_to_stereo() {
        assert_eq!(remix(&[0.1, 0.2], 1, 2), vec![0.1, 0.1, 0.2, 0.2]);
    }

    #[test]
    fn test_remix_stereo_to_mono() {
        let out = remix(&[0.2, 0.4, -1.0, 1.0], 2, 1);
        assert_eq!(out.len(), 2);
        assert!((out[0] - 0.3).abs() < 1e-6);
        assert!(out[1].abs() < 1e-6);
    }

    #[test]
    fn test_remix_surround_to_stereo() {
        // Only the front left channel is active.
        let out = remix(&[1.0, 0.0, 0.0, 0.0, 0.0, 0.0], 6, 2);
        assert_eq!(out.len(), 2);
        assert!(out[0] > 0.0 && out[0] < 1.0);
        assert!(out[1].abs() < 1e-6);
    }

    #[test]
    #[allow(clippy::float_cmp)]
    fn test_remix_zero_fill() {
        assert_eq!(remix(&[0.5, 0.25], 2, 3), vec![0.5, 0.25, 0.0]);
    }

    #[test]
    fn test_unconfigured_convert_fails() {
        let mut resampler = RubatoResampler::default();
        let frame = DecodedFrame::from_f32(48000, ChannelLayout::STEREO, &[0.0; 8]);
        assert!(resampler.convert(&frame).is_err());
    }

    #[test]
    fn test_zero_rate_rejected() {
        let mut resampler = RubatoResampler::default();
        let result = resampler.configure(
            &format(0, ChannelLayout::STEREO),
            &format(48000, ChannelLayout::STEREO),
        );
        assert!(matches!(result, Err(Error::UnsupportedFormat(_))));
    }

    #[test]
    fn test_same_rate_passthrough() {
        let mut resampler = RubatoResampler::default();
        resampler
            .configure(
                &AudioFormat::new(44100, SampleFormat::S16, ChannelLayout::MONO),
                &format(44100, ChannelLayout::STEREO),
            )
            .unwrap();

        let frame =
            DecodedFrame::from_raw_s16(bytes::Bytes::from(vec![0u8; 2048]), 44100, 1).unwrap();
        let out = resampler.convert(&frame).unwrap();
        assert_eq!(out.len(), 2048);
        assert_eq!(resampler.buffered_input_delay(), 0);
        assert!(resampler.drain().unwrap().is_empty());
    }

    #[test]
    fn test_format_mismatch_rejected() {
        let mut resampler = RubatoResampler::default();
        resampler
            .configure(
                &format(44100, ChannelLayout::MONO),
                &format(44100, ChannelLayout::STEREO),
            )
            .unwrap();

        let frame = DecodedFrame::from_f32(44100, ChannelLayout::STEREO, &[0.0; 8]);
        assert!(resampler.convert(&frame).is_err());
    }

    #[test]
    fn test_rate_conversion() {
        let mut resampler = RubatoResampler::new(1024);
        resampler
            .configure(
                &format(44100, ChannelLayout::STEREO),
                &format(48000, ChannelLayout::STEREO),
            )
            .unwrap();

        let input: Vec<f32> = (0..4096 * 2)
            .map(|i| ((i / 2) as f32 * 0.05).sin() * 0.5)
            .collect();
        let frame = DecodedFrame::from_f32(44100, ChannelLayout::STEREO, &input);

        let mut total = resampler.convert(&frame).unwrap().len();
        total += resampler.drain().unwrap().len();

        // 4096 frames at 44.1k is 4458.2 at 48k.
        assert_eq!(total, 4458 * 2);
        assert_eq!(resampler.buffered_input_delay(), 0);
    }

    #[test]
    fn test_drain_keeps_tail() {
        let mut resampler = RubatoResampler::new(1024);
        resampler
            .configure(
                &format(44100, ChannelLayout::MONO),
                &format(48000, ChannelLayout::MONO),
            )
            .unwrap();

        let mut input = vec![0.0f32; 3000];
        input.extend(std::iter::repeat_n(0.5f32, 300));
        let frame = DecodedFrame::from_f32(44100, ChannelLayout::MONO, &input);

        let mut out = resampler.convert(&frame).unwrap();
        out.extend(resampler.drain().unwrap());

        // 3300 frames at 44.1k is 3591.8 at 48k, the last ~326 of them loud.
        assert_eq!(out.len(), 3591);
        let loud = out.iter().filter(|s| s.abs() > 0.25).count();
        assert!((310..=345).contains(&loud), "got {loud} loud frames");
        assert!(out[..3000].iter().all(|s| s.abs() < 0.25));
        assert!(out[3591 - 100..3591 - 20].iter().all(|s| (s - 0.5).abs() < 0.05));
    }

    #[test]
    fn test_output_not_delayed() {
        let mut resampler = RubatoResampler::new(1024);
        resampler
            .configure(
                &format(44100, ChannelLayout::MONO),
                &format(48000, ChannelLayout::MONO),
            )
            .unwrap();

        let mut input = vec![0.5f32; 2048];
        input.extend(std::iter::repeat_n(0.0f32, 2048));
        let frame = DecodedFrame::from_f32(44100, ChannelLayout::MONO, &input);
        let mut out = resampler.convert(&frame).unwrap();
        out.extend(resampler.drain().unwrap());

        // The step from loud to silent stays at input frame 2048 (~2229 out).
        assert!(out[2100..2200].iter().all(|s| (s - 0.5).abs() < 0.05));
        assert!(out[2260..2400].iter().all(|s| s.abs() < 0.05));
    }

    #[test]
    fn test_buffered_input_reported() {
        let mut resampler = RubatoResampler::new(1024);
        resampler
            .configure(
                &format(48000, ChannelLayout::MONO),
                &format(44100, ChannelLayout::MONO),
            )
            .unwrap();

        let frame = DecodedFrame::from_f32(48000, ChannelLayout::MONO, &[0.0; 100]);
        let out = resampler.convert(&frame).unwrap();
        assert!(out.is_empty());
        let before = resampler.buffered_input_delay();
        assert_eq!(before, 100);

        resampler.reset();
        assert_eq!(before - resampler.buffered_input_delay(), 100);
    }
}
