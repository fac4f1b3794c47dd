//! Device output using cpal.

use crate::buffer::{shared_device_buffer, SharedDeviceBuffer};
use crate::sink::{DeliverOutcome, SinkAdapter, SinkFactory};
use cadence_core::{AudioFormat, ChannelLayout, Error, Result, SampleFormat as PcmFormat};
use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    Device, SampleFormat, Stream, StreamConfig,
};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Device output configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutputConfig {
    /// Requested rate. `None` uses the device default.
    pub sample_rate: Option<u32>,
    /// Requested channel count. `None` uses the device default.
    pub channels: Option<u16>,
    /// Frames buffered between the decode thread and the device.
    pub buffer_frames: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            sample_rate: None,
            channels: None,
            buffer_frames: 8192,
        }
    }
}

/// Sink playing through a cpal output stream.
pub struct CpalSink {
    _stream: Stream,
    format: AudioFormat,
    buffer: SharedDeviceBuffer,
    paused: Arc<AtomicBool>,
    device_name: String,
}

impl CpalSink {
    /// Open the default output device.
    pub fn open(config: &OutputConfig) -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_output_device()
            .ok_or_else(|| Error::AudioOutput("No output device found".to_string()))?;

        Self::with_device(&device, config)
    }

    /// Factory for [`AudioBackend`](crate::AudioBackend). The stream is built
    /// on the decode thread since `cpal::Stream` is not `Send`.
    pub fn factory(config: OutputConfig) -> SinkFactory {
        Box::new(move || Ok(Box::new(Self::open(&config)?) as Box<dyn SinkAdapter>))
    }

    /// Open a specific device.
    pub fn with_device(device: &Device, config: &OutputConfig) -> Result<Self> {
        let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        info!("Using audio output device: {device_name}");

        let supported_config = device
            .default_output_config()
            .map_err(|e| Error::AudioOutput(format!("Failed to get output config: {e}")))?;

        debug!("Supported output config: {:?}", supported_config);

        let sample_format = supported_config.sample_format();
        let mut stream_config: StreamConfig = supported_config.into();
        if let Some(rate) = config.sample_rate {
            stream_config.sample_rate = cpal::SampleRate(rate);
        }
        if let Some(channels) = config.channels {
            stream_config.channels = channels;
        }

        let channel_layout = ChannelLayout::from_channels(stream_config.channels)
            .ok_or_else(|| Error::AudioOutput("Device reports zero channels".to_string()))?;
        let format = AudioFormat::new(
            stream_config.sample_rate.0,
            PcmFormat::F32,
            channel_layout,
        );

        debug!("Output format: {}", format);

        let buffer = shared_device_buffer(config.buffer_frames * format.channels());
        let paused = Arc::new(AtomicBool::new(false));

        let stream = match sample_format {
            SampleFormat::F32 => Self::build_stream::<f32>(device, &stream_config, &buffer, &paused)?,
            SampleFormat::I16 => Self::build_stream::<i16>(device, &stream_config, &buffer, &paused)?,
            SampleFormat::U16 => Self::build_stream::<u16>(device, &stream_config, &buffer, &paused)?,
            _ => {
                return Err(Error::AudioOutput(format!(
                    "Unsupported sample format: {sample_format:?}"
                )));
            }
        };

        stream
            .play()
            .map_err(|e| Error::AudioOutput(format!("Failed to start stream: {e}")))?;

        Ok(Self {
            _stream: stream,
            format,
            buffer,
            paused,
            device_name,
        })
    }

    fn build_stream<T: cpal::SizedSample + cpal::FromSample<f32>>(
        device: &Device,
        config: &StreamConfig,
        buffer: &SharedDeviceBuffer,
        paused: &Arc<AtomicBool>,
    ) -> Result<Stream> {
        let buffer = Arc::clone(buffer);
        let paused = Arc::clone(paused);
        let mut scratch = Vec::new();

        let err_fn = |err| {
            error!("Audio stream error: {err}");
        };

        let stream = device
            .build_output_stream(
                config,
                move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                    if paused.load(Ordering::Acquire) {
                        for sample in data.iter_mut() {
                            *sample = T::from_sample(0.0f32);
                        }
                        return;
                    }

                    scratch.resize(data.len(), 0.0f32);
                    // A contended lock plays one period of silence.
                    let samples_read = buffer.read(&mut scratch).unwrap_or(0);

                    for (i, sample) in data.iter_mut().enumerate() {
                        let value = if i < samples_read { scratch[i] } else { 0.0 };
                        *sample = T::from_sample(value);
                    }

                    if samples_read < data.len() && samples_read > 0 {
                        warn!("Buffer underrun: needed {}, got {}", data.len(), samples_read);
                    }
                },
                err_fn,
                None,
            )
            .map_err(|e| Error::AudioOutput(format!("Failed to build stream: {e}")))?;

        Ok(stream)
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }
}

impl SinkAdapter for CpalSink {
    fn output_format(&self) -> AudioFormat {
        self.format
    }

    fn deliver(&mut self, samples: &[f32], _pts: Option<i64>, _epoch: u32) -> DeliverOutcome {
        if self.buffer.try_write(samples) {
            DeliverOutcome::Accepted
        } else {
            DeliverOutcome::Busy
        }
    }

    fn pause(&mut self) {
        debug!("Pausing output");
        self.paused.store(true, Ordering::Release);
    }

    fn resume(&mut self) {
        debug!("Resuming output");
        self.paused.store(false, Ordering::Release);
    }

    fn flush(&mut self) {
        self.buffer.clear();
    }

    fn output_delay(&self) -> i64 {
        self.format
            .frames_to_micros(self.buffer.len() / self.format.channels())
    }

    fn close(&mut self) {
        // Let what is buffered play out unless the device is paused.
        if !self.paused.load(Ordering::Acquire) {
            let delay = self.output_delay();
            if delay > 0 {
                debug!("Draining {delay}us of buffered output");
                std::thread::sleep(Duration::from_micros(delay as u64));
            }
        }
        self.paused.store(true, Ordering::Release);
        self.buffer.clear();
    }
}

/// List available output devices.
pub fn list_output_devices() -> Result<Vec<String>> {
    let host = cpal::default_host();

    let devices: Vec<String> = host
        .output_devices()
        .map_err(|e| Error::AudioOutput(format!("Failed to list devices: {e}")))?
        .filter_map(|d| d.name().ok())
        .collect();

    Ok(devices)
}

/// Get the default output device name.
pub fn default_device_name() -> Option<String> {
    let host = cpal::default_host();
    host.default_output_device().and_then(|d| d.name().ok())
}
