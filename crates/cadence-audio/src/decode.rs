//! Codec decoding using symphonia.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use cadence_core::{ChannelLayout, DecodeOutput, DecodedFrame, Decoder, Error, Result};
use symphonia::core::{
    audio::SampleBuffer,
    codecs::{CodecParameters, Decoder as CodecDecoder, DecoderOptions},
    errors::Error as SymphoniaError,
    formats::Packet,
};
use tracing::{debug, warn};

/// [`Decoder`] backed by a symphonia codec.
///
/// Each call decodes one whole packet; symphonia never consumes partial input.
pub struct SymphoniaDecoder {
    decoder: Box<dyn CodecDecoder>,
}

impl SymphoniaDecoder {
    /// Create a decoder for a track's codec parameters.
    pub fn new(params: &CodecParameters) -> Result<Self> {
        let decoder = symphonia::default::get_codecs()
            .make(params, &DecoderOptions::default())
            .map_err(|e| Error::AudioDecode(format!("Failed to create decoder: {e}")))?;

        debug!("Created decoder for codec {:?}", decoder.codec_params().codec);

        Ok(Self { decoder })
    }

    /// Parameters the codec was opened with.
    pub fn codec_params(&self) -> &CodecParameters {
        self.decoder.codec_params()
    }
}

impl Decoder for SymphoniaDecoder {
    fn decode(&mut self, data: &[u8]) -> Result<DecodeOutput> {
        if data.is_empty() {
            return Ok(DecodeOutput::new(0, None));
        }

        let packet = Packet::new_from_slice(0, 0, 0, data);
        let decoded = match self.decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::ResetRequired) => {
                self.decoder.reset();
                return Err(Error::AudioDecode("Decoder reset required".to_string()));
            }
            Err(e) => return Err(Error::AudioDecode(format!("Decode failed: {e}"))),
        };

        let frames = decoded.frames();
        if frames == 0 {
            return Ok(DecodeOutput::new(data.len(), None));
        }

        let spec = *decoded.spec();
        #[allow(clippy::cast_possible_truncation)]
        let channels = spec.channels.count() as u16;
        let layout = ChannelLayout::from_channels(channels)
            .ok_or_else(|| Error::AudioDecode("Decoded frame has no channels".to_string()))?;

        let mut sample_buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        sample_buf.copy_interleaved_ref(decoded);

        let frame = DecodedFrame::from_f32(spec.rate, layout, sample_buf.samples());
        Ok(DecodeOutput::new(data.len(), Some(frame)))
    }

    fn reset(&mut self) {
        self.decoder.reset();
    }

    fn finalize(&mut self) {
        let result = self.decoder.finalize();
        if let Some(verify) = result.verify_ok {
            if !verify {
                warn!("Decoder verification failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use symphonia::core::audio::Channels;
    use symphonia::core::codecs::CODEC_TYPE_PCM_S16LE;

    fn pcm_params() -> CodecParameters {
        let mut params = CodecParameters::new();
        params
            .for_codec(CODEC_TYPE_PCM_S16LE)
            .with_sample_rate(8000)
            .with_channels(Channels::FRONT_LEFT)
            .with_bits_per_sample(16)
            .with_bits_per_coded_sample(16)
            .with_max_frames_per_packet(1024);
        params
    }

    #[test]
    fn test_decode_pcm_packet() {
        let mut decoder = SymphoniaDecoder::new(&pcm_params()).unwrap();

        let samples: Vec<u8> = (0..100i16).flat_map(|s| (s * 100).to_le_bytes()).collect();
        let output = decoder.decode(&samples).unwrap();

        assert_eq!(output.consumed, 200);
        let frame = output.frame.unwrap();
        assert_eq!(frame.frames(), 100);
        assert_eq!(frame.format().sample_rate, 8000);
        assert_eq!(frame.format().channel_layout, ChannelLayout::MONO);
    }

    #[test]
    fn test_empty_input() {
        let mut decoder = SymphoniaDecoder::new(&pcm_params()).unwrap();
        let output = decoder.decode(&[]).unwrap();
        assert_eq!(output.consumed, 0);
        assert!(output.frame.is_none());
    }

    #[test]
    fn test_unknown_codec() {
        assert!(SymphoniaDecoder::new(&CodecParameters::new()).is_err());
    }
}
