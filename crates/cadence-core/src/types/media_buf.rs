//! Units flowing through the media queue.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use bytes::Bytes;

use super::codec::CodecHandle;

/// Discriminant of a [`MediaBuf`], usable without borrowing the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaBufKind {
    Audio,
    Pause,
    Play,
    Flush,
    Exit,
}

/// One item in the media queue: audio payload or a control marker.
#[derive(Debug, Clone)]
pub enum MediaBuf {
    /// Compressed or raw audio.
    Audio(AudioUnit),
    /// Hold device output.
    Pause,
    /// Resume device output.
    Play,
    /// Discard buffered output and invalidate pending timestamps.
    Flush,
    /// Stop the decode thread once this unit is reached.
    Exit,
}

impl MediaBuf {
    pub const fn kind(&self) -> MediaBufKind {
        match self {
            Self::Audio(_) => MediaBufKind::Audio,
            Self::Pause => MediaBufKind::Pause,
            Self::Play => MediaBufKind::Play,
            Self::Flush => MediaBufKind::Flush,
            Self::Exit => MediaBufKind::Exit,
        }
    }

    /// Control marker for a kind. Returns `None` for [`MediaBufKind::Audio`].
    pub const fn control(kind: MediaBufKind) -> Option<Self> {
        match kind {
            MediaBufKind::Audio => None,
            MediaBufKind::Pause => Some(Self::Pause),
            MediaBufKind::Play => Some(Self::Play),
            MediaBufKind::Flush => Some(Self::Flush),
            MediaBufKind::Exit => Some(Self::Exit),
        }
    }

    /// Bytes accounted against the queue. Control markers weigh nothing.
    pub fn size(&self) -> usize {
        match self {
            Self::Audio(unit) => unit.size(),
            _ => 0,
        }
    }

    pub const fn is_audio(&self) -> bool {
        matches!(self, Self::Audio(_))
    }
}

impl From<AudioUnit> for MediaBuf {
    fn from(unit: AudioUnit) -> Self {
        Self::Audio(unit)
    }
}

/// Audio payload plus the metadata the decode loop needs to place it in time.
#[derive(Debug, Clone)]
pub struct AudioUnit {
    /// Owned payload bytes.
    pub payload: Bytes,
    /// Bytes already consumed by earlier decode steps.
    pub offset: usize,
    /// Presentation timestamp in microseconds.
    pub pts: Option<i64>,
    /// Timeline generation; bumped by producers on seek.
    pub epoch: u32,
    pub sample_rate: u32,
    pub channels: u16,
    /// Stream (track) this unit belongs to.
    pub stream: u32,
    /// Unit belongs to a deselected stream.
    pub skip: bool,
    /// Timestamp updates the shared playback clock.
    pub drive_clock: bool,
    /// Stateful decoder. `None` means the payload is raw S16 PCM.
    pub codec: Option<CodecHandle>,
}

impl AudioUnit {
    /// A raw PCM unit with no timestamp on stream 0.
    pub fn new(payload: impl Into<Bytes>, sample_rate: u32, channels: u16) -> Self {
        Self {
            payload: payload.into(),
            offset: 0,
            pts: None,
            epoch: 0,
            sample_rate,
            channels,
            stream: 0,
            skip: false,
            drive_clock: false,
            codec: None,
        }
    }

    pub fn with_pts(mut self, pts: i64) -> Self {
        self.pts = Some(pts);
        self
    }

    pub fn with_epoch(mut self, epoch: u32) -> Self {
        self.epoch = epoch;
        self
    }

    pub fn with_stream(mut self, stream: u32) -> Self {
        self.stream = stream;
        self
    }

    pub fn with_codec(mut self, codec: CodecHandle) -> Self {
        self.codec = Some(codec);
        self
    }

    pub fn driving_clock(mut self) -> Self {
        self.drive_clock = true;
        self
    }

    pub fn skipped(mut self) -> Self {
        self.skip = true;
        self
    }

    /// Total payload size in bytes.
    pub fn size(&self) -> usize {
        self.payload.len()
    }

    /// The part of the payload not yet consumed.
    pub fn remaining(&self) -> Bytes {
        self.payload.slice(self.offset.min(self.payload.len())..)
    }

    /// Mark `bytes` more of the payload as consumed.
    pub fn advance(&mut self, bytes: usize) {
        self.offset = (self.offset + bytes).min(self.payload.len());
    }

    pub fn is_consumed(&self) -> bool {
        self.offset >= self.payload.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_sizes() {
        assert_eq!(MediaBuf::Pause.size(), 0);
        assert_eq!(MediaBuf::Exit.size(), 0);
        assert_eq!(MediaBuf::from(AudioUnit::new(vec![0u8; 64], 44100, 2)).size(), 64);
    }

    #[test]
    fn test_control_from_kind() {
        assert!(MediaBuf::control(MediaBufKind::Audio).is_none());
        assert_eq!(
            MediaBuf::control(MediaBufKind::Flush).unwrap().kind(),
            MediaBufKind::Flush
        );
    }

    #[test]
    fn test_advance_and_remaining() {
        let mut unit = AudioUnit::new(vec![1u8, 2, 3, 4], 44100, 1).with_pts(1000);
        assert_eq!(unit.remaining().len(), 4);

        unit.advance(3);
        assert_eq!(&unit.remaining()[..], &[4u8]);
        assert!(!unit.is_consumed());

        unit.advance(10);
        assert_eq!(unit.offset, 4);
        assert!(unit.is_consumed());
        assert!(unit.remaining().is_empty());
    }

    #[test]
    fn test_builder_flags() {
        let unit = AudioUnit::new(vec![0u8; 4], 48000, 2)
            .with_epoch(3)
            .with_stream(7)
            .driving_clock()
            .skipped();

        assert_eq!(unit.epoch, 3);
        assert_eq!(unit.stream, 7);
        assert!(unit.drive_clock);
        assert!(unit.skip);
        assert!(unit.codec.is_none());
    }
}
