//! Decoded audio frames.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use bytes::{BufMut, Bytes, BytesMut};

use super::format::{AudioFormat, ChannelLayout, SampleFormat};
use crate::{Error, Result};

/// A block of interleaved samples produced by one decode step.
///
/// Every decode call yields a fresh frame; frames are never reused across calls.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedFrame {
    format: AudioFormat,
    data: Bytes,
    frames: usize,
}

impl DecodedFrame {
    /// Wrap interleaved sample bytes. Trailing bytes that do not form a whole frame are ignored.
    pub fn new(format: AudioFormat, data: Bytes) -> Self {
        let frame_bytes = format.frame_bytes();
        let frames = if frame_bytes == 0 {
            0
        } else {
            data.len() / frame_bytes
        };

        Self {
            format,
            data,
            frames,
        }
    }

    /// Build a frame from raw signed 16-bit PCM.
    ///
    /// Only mono and stereo are accepted; any other channel count means the
    /// producer emitted data the pipeline was never configured for.
    pub fn from_raw_s16(payload: Bytes, sample_rate: u32, channels: u16) -> Result<Self> {
        let layout = match channels {
            1 => ChannelLayout::MONO,
            2 => ChannelLayout::STEREO,
            n => {
                return Err(Error::Configuration(format!(
                    "unsupported raw PCM channel count {n}"
                )));
            }
        };

        Ok(Self::new(
            AudioFormat::new(sample_rate, SampleFormat::S16, layout),
            payload,
        ))
    }

    /// Build an `f32` frame from interleaved samples.
    pub fn from_f32(sample_rate: u32, layout: ChannelLayout, samples: &[f32]) -> Self {
        let mut data = BytesMut::with_capacity(samples.len() * 4);
        for sample in samples {
            data.put_f32_le(*sample);
        }

        Self::new(
            AudioFormat::new(sample_rate, SampleFormat::F32, layout),
            data.freeze(),
        )
    }

    /// The frame's sample format triple.
    pub const fn format(&self) -> &AudioFormat {
        &self.format
    }

    /// Number of frames (samples per channel).
    pub const fn frames(&self) -> usize {
        self.frames
    }

    /// Raw interleaved sample bytes.
    pub const fn data(&self) -> &Bytes {
        &self.data
    }

    /// Replace the sample rate, keeping data and layout.
    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.format.sample_rate = sample_rate;
        self
    }

    /// Decode to interleaved `f32` samples.
    pub fn to_f32(&self) -> Vec<f32> {
        let width = self.format.sample_format.bytes_per_sample();
        let len = self.frames * self.format.frame_bytes();

        self.data[..len]
            .chunks_exact(width)
            .map(|bytes| self.format.sample_format.read_f32(bytes))
            .collect()
    }
}
