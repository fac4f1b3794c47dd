//! # cadence-audio
//!
//! Real-time audio decode-and-render pipeline.
//!
//! Features:
//! - Accounted media queue with producer backpressure
//! - Dedicated decode thread with on-the-fly format renegotiation
//! - Audio-driven playback clock
//! - Pluggable sinks (cpal device output, null sink)

pub mod buffer;
pub mod clock;
pub mod config;
pub mod decode;
pub mod demux;
pub mod engine;
pub mod negotiator;
pub mod output;
pub mod pipe;
pub mod resample;
pub mod sink;

pub use buffer::{shared_device_buffer, DeviceBuffer, SharedDeviceBuffer};
pub use clock::{AudioClock, ClockState};
pub use config::{PipelineConfig, QueueLimits};
pub use decode::SymphoniaDecoder;
pub use demux::FileSource;
pub use engine::{
    AudioBackend, AudioDecoder, DecoderEvent, DecoderStats, DiscardReason, EVENT_CAPACITY,
};
pub use negotiator::{FormatNegotiator, Negotiation};
pub use output::{default_device_name, list_output_devices, CpalSink, OutputConfig};
pub use pipe::MediaPipe;
pub use resample::{Resampler, ResamplerFactory, RubatoResampler};
pub use sink::{DeliverOutcome, NullSink, SinkAdapter, SinkFactory};
