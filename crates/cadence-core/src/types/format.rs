//! Sample format and channel layout types.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use serde::{Deserialize, Serialize};
use std::fmt;

/// Encoding of a single interleaved sample.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum SampleFormat {
    /// Unsigned 8-bit, centered on 128.
    U8,
    /// Signed 16-bit little-endian.
    #[default]
    S16,
    /// Signed 32-bit little-endian.
    S32,
    /// 32-bit float little-endian.
    F32,
}

impl SampleFormat {
    /// Size of one sample in bytes.
    pub const fn bytes_per_sample(self) -> usize {
        match self {
            Self::U8 => 1,
            Self::S16 => 2,
            Self::S32 | Self::F32 => 4,
        }
    }

    /// Short lowercase name, as used in log lines.
    pub const fn name(self) -> &'static str {
        match self {
            Self::U8 => "u8",
            Self::S16 => "s16",
            Self::S32 => "s32",
            Self::F32 => "f32",
        }
    }

    /// Decode one sample from its little-endian bytes into the `[-1.0, 1.0]` range.
    ///
    /// `bytes` must be exactly [`bytes_per_sample`](Self::bytes_per_sample) long.
    pub fn read_f32(self, bytes: &[u8]) -> f32 {
        match self {
            Self::U8 => (f32::from(bytes[0]) - 128.0) / 128.0,
            Self::S16 => f32::from(i16::from_le_bytes([bytes[0], bytes[1]])) / 32768.0,
            Self::S32 => {
                i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f32 / 2_147_483_648.0
            }
            Self::F32 => f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
        }
    }
}

/// Channel layout, identified by its channel count.
///
/// Channel order follows the usual interleaving convention
/// (FL, FR, FC, LFE, SL, SR for 5.1).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ChannelLayout(u16);

impl ChannelLayout {
    pub const MONO: Self = Self(1);
    pub const STEREO: Self = Self(2);
    pub const SURROUND_5_1: Self = Self(6);

    /// Layout for a channel count. Returns `None` for zero channels.
    pub const fn from_channels(channels: u16) -> Option<Self> {
        if channels == 0 {
            None
        } else {
            Some(Self(channels))
        }
    }

    /// Number of interleaved channels.
    pub const fn channels(self) -> usize {
        self.0 as usize
    }

    /// Human readable name.
    pub fn name(self) -> String {
        match self.0 {
            1 => "mono".to_string(),
            2 => "stereo".to_string(),
            6 => "5.1".to_string(),
            n => format!("{n} channels"),
        }
    }
}

impl Default for ChannelLayout {
    fn default() -> Self {
        Self::STEREO
    }
}

/// The `(rate, format, layout)` triple describing an interleaved sample stream.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub sample_format: SampleFormat,
    pub channel_layout: ChannelLayout,
}

impl AudioFormat {
    pub const fn new(
        sample_rate: u32,
        sample_format: SampleFormat,
        channel_layout: ChannelLayout,
    ) -> Self {
        Self {
            sample_rate,
            sample_format,
            channel_layout,
        }
    }

    /// Number of interleaved channels.
    pub const fn channels(&self) -> usize {
        self.channel_layout.channels()
    }

    /// Bytes occupied by one frame (one sample per channel).
    pub const fn frame_bytes(&self) -> usize {
        self.channels() * self.sample_format.bytes_per_sample()
    }

    /// Duration of `frames` at this rate, in microseconds.
    ///
    /// Returns 0 when the sample rate is unknown.
    pub fn frames_to_micros(&self, frames: usize) -> i64 {
        if self.sample_rate == 0 {
            return 0;
        }
        (frames as i64).saturating_mul(1_000_000) / i64::from(self.sample_rate)
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self::new(48000, SampleFormat::F32, ChannelLayout::STEREO)
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{} {}Hz {}]",
            self.channel_layout.name(),
            self.sample_rate,
            self.sample_format.name()
        )
    }
}
