//! File demuxer feeding a media pipe.
//!
//! Reads packets from a container with symphonia's format readers and wraps
//! each one in an [`AudioUnit`] carrying a shared [`SymphoniaDecoder`].

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use std::fs::File;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use std::thread::JoinHandle;

use cadence_core::{AudioUnit, CodecHandle, Error, MediaBuf, Result};
use symphonia::core::{
    codecs::CODEC_TYPE_NULL,
    errors::Error as SymphoniaError,
    formats::{FormatOptions, FormatReader},
    io::{MediaSource, MediaSourceStream, MediaSourceStreamOptions},
    meta::MetadataOptions,
    probe::Hint,
    units::TimeBase,
};
use tracing::{debug, info, trace};

use crate::decode::SymphoniaDecoder;
use crate::pipe::MediaPipe;

/// Producer reading one audio track out of a container.
pub struct FileSource {
    format: Box<dyn FormatReader>,
    track_id: u32,
    time_base: Option<TimeBase>,
    codec: CodecHandle,
    sample_rate: u32,
    channels: u16,
    stream: u32,
    epoch: u32,
}

impl FileSource {
    /// Open a file and demux its `stream`-th audio track (0-based). Units are
    /// tagged with `stream`.
    pub fn open(path: impl AsRef<Path>, stream: u32) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        info!("Opening {}", path.display());
        Self::from_source(Box::new(file), &hint, stream)
    }

    /// Demux an in-memory container. `extension` helps the prober.
    pub fn from_bytes(data: Vec<u8>, extension: Option<&str>, stream: u32) -> Result<Self> {
        let mut hint = Hint::new();
        if let Some(ext) = extension {
            hint.with_extension(ext);
        }

        Self::from_source(Box::new(Cursor::new(data)), &hint, stream)
    }

    fn from_source(source: Box<dyn MediaSource>, hint: &Hint, stream: u32) -> Result<Self> {
        let mss = MediaSourceStream::new(source, MediaSourceStreamOptions::default());

        let format_opts = FormatOptions {
            enable_gapless: true,
            ..Default::default()
        };

        let probed = symphonia::default::get_probe()
            .format(hint, mss, &format_opts, &MetadataOptions::default())
            .map_err(|e| Error::Demux(format!("Failed to probe format: {e}")))?;

        let format = probed.format;

        let track = format
            .tracks()
            .iter()
            .filter(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .nth(stream as usize)
            .ok_or_else(|| Error::Demux(format!("No audio track {stream}")))?;

        let track_id = track.id;
        let sample_rate = track.codec_params.sample_rate.unwrap_or(0);
        #[allow(clippy::cast_possible_truncation)]
        let channels = track.codec_params.channels.map_or(0, |c| c.count() as u16);
        let time_base = track.codec_params.time_base;

        debug!(
            "Audio track: id={}, sample_rate={}, channels={}",
            track_id, sample_rate, channels
        );

        let codec = CodecHandle::new(SymphoniaDecoder::new(&track.codec_params)?);

        Ok(Self {
            format,
            track_id,
            time_base,
            codec,
            sample_rate,
            channels,
            stream,
            epoch: 0,
        })
    }

    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub const fn channels(&self) -> u16 {
        self.channels
    }

    /// Epoch stamped on subsequent units.
    pub fn set_epoch(&mut self, epoch: u32) {
        self.epoch = epoch;
    }

    /// Read the next packet of the selected track. `None` at end of stream.
    pub fn next_unit(&mut self) -> Result<Option<AudioUnit>> {
        loop {
            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Ok(None);
                }
                Err(e) => return Err(Error::Demux(format!("Failed to read packet: {e}"))),
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            let pts = self.ts_to_micros(packet.ts());
            let mut unit = AudioUnit::new(packet.data, self.sample_rate, self.channels)
                .with_stream(self.stream)
                .with_epoch(self.epoch)
                .with_codec(self.codec.clone())
                .driving_clock();
            if let Some(pts) = pts {
                unit = unit.with_pts(pts);
            }

            return Ok(Some(unit));
        }
    }

    /// Push every remaining packet into `pipe`, honouring its limits.
    ///
    /// Returns the number of units pushed. A closed pipe ends the run early.
    pub fn run(&mut self, pipe: &MediaPipe) -> Result<usize> {
        let mut pushed = 0;
        while let Some(unit) = self.next_unit()? {
            trace!("Queueing unit pts={:?} size={}", unit.pts, unit.size());
            match pipe.push_blocking(MediaBuf::Audio(unit)) {
                Ok(()) => pushed += 1,
                Err(Error::PipeClosed) => {
                    debug!("Pipe closed after {} units", pushed);
                    return Ok(pushed);
                }
                Err(e) => return Err(e),
            }
        }

        info!("End of stream after {} units", pushed);
        Ok(pushed)
    }

    /// Run on a dedicated producer thread.
    pub fn spawn(mut self, pipe: Arc<MediaPipe>) -> Result<JoinHandle<Result<usize>>> {
        let handle = std::thread::Builder::new()
            .name("file source".to_string())
            .spawn(move || self.run(&pipe))?;
        Ok(handle)
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    fn ts_to_micros(&self, ts: u64) -> Option<i64> {
        if let Some(time_base) = self.time_base {
            let time = time_base.calc_time(ts);
            let micros = time.seconds as f64 * 1_000_000.0 + time.frac * 1_000_000.0;
            return Some(micros.round() as i64);
        }
        if self.sample_rate == 0 {
            return None;
        }
        Some((ts as i64).saturating_mul(1_000_000) / i64::from(self.sample_rate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueueLimits;

    /// 16-bit mono WAV.
    fn wav(sample_rate: u32, frames: usize) -> Vec<u8> {
        let data_len = (frames * 2) as u32;
        let mut out = Vec::new();
        out.extend_from_slice(b"RIFF");
        out.extend_from_slice(&(36 + data_len).to_le_bytes());
        out.extend_from_slice(b"WAVE");
        out.extend_from_slice(b"fmt ");
        out.extend_from_slice(&16u32.to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes());
        out.extend_from_slice(&sample_rate.to_le_bytes());
        out.extend_from_slice(&(sample_rate * 2).to_le_bytes());
        out.extend_from_slice(&2u16.to_le_bytes());
        out.extend_from_slice(&16u16.to_le_bytes());
        out.extend_from_slice(b"data");
        out.extend_from_slice(&data_len.to_le_bytes());
        for i in 0..frames {
            let sample = ((i % 64) as i16 - 32) * 500;
            out.extend_from_slice(&sample.to_le_bytes());
        }
        out
    }

    #[test]
    fn test_units_from_wav() {
        let mut source = FileSource::from_bytes(wav(8000, 8000), Some("wav"), 0).unwrap();
        assert_eq!(source.sample_rate(), 8000);
        assert_eq!(source.channels(), 1);

        let mut units = Vec::new();
        while let Some(unit) = source.next_unit().unwrap() {
            units.push(unit);
        }

        assert!(!units.is_empty());
        assert_eq!(units[0].pts, Some(0));
        assert!(units.iter().all(|u| u.stream == 0 && u.drive_clock && u.codec.is_some()));
        assert!(units.windows(2).all(|w| w[0].pts < w[1].pts));
    }

    #[test]
    fn test_units_decode_to_all_frames() {
        let mut source = FileSource::from_bytes(wav(8000, 4000), Some("wav"), 0).unwrap();

        let mut frames = 0;
        while let Some(unit) = source.next_unit().unwrap() {
            let codec = unit.codec.clone().unwrap();
            let output = codec.lock().decode(&unit.remaining()).unwrap();
            assert_eq!(output.consumed, unit.size());
            frames += output.frame.map_or(0, |f| f.frames());
        }

        assert_eq!(frames, 4000);
    }

    #[test]
    fn test_run_fills_pipe() {
        let pipe = MediaPipe::new(QueueLimits::default());
        let mut source = FileSource::from_bytes(wav(8000, 2000), Some("wav"), 0).unwrap();

        let pushed = source.run(&pipe).unwrap();
        assert!(pushed > 0);
        assert_eq!(pipe.packets(), pushed);
        assert_eq!(pipe.buffer_bytes(), 4000);
    }

    #[test]
    fn test_missing_track() {
        assert!(FileSource::from_bytes(wav(8000, 100), Some("wav"), 1).is_err());
    }

    #[test]
    fn test_not_a_container() {
        assert!(FileSource::from_bytes(vec![0u8; 64], None, 0).is_err());
    }
}
