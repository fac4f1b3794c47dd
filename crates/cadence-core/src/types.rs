//! Core domain types for Cadence.

pub mod codec;
pub mod format;
pub mod frame;
pub mod media_buf;
pub mod queue;

pub use codec::{CodecHandle, DecodeOutput, Decoder};
pub use format::{AudioFormat, ChannelLayout, SampleFormat};
pub use frame::DecodedFrame;
pub use media_buf::{AudioUnit, MediaBuf, MediaBufKind};
pub use queue::MediaQueue;
