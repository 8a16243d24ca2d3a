//! Codec facade traits (C5): a uniform `encode`/`decode` surface over every
//! payload codec the pipeline supports, so the RTP session and pipeline tick
//! never need to match on a concrete codec type.
//!
//! Unlike the teacher's `AudioEncoder`/`AudioDecoder`, these traits carry no
//! baked-in sample-rate conversion or channel mixing — that is the
//! resampler's (C2) job. Each codec here operates at its own native rate and
//! channel count; the pipeline composes a `Resampler` around it when the
//! device format differs.

use crate::error::{EngineError, Result};

/// Encodes one fixed-size frame of signed 16-bit PCM into a codec's wire format.
pub trait FrameEncoder: Send {
    /// Encodes `pcm` (exactly `frame_size_samples()` samples) into `output`.
    /// Returns the number of bytes written.
    fn encode(&mut self, pcm: &[i16], output: &mut [u8]) -> Result<usize>;

    /// Number of PCM samples this codec expects per call to `encode`.
    fn frame_size_samples(&self) -> usize;

    /// The RTP static or negotiated payload type this encoder produces.
    fn payload_type(&self) -> u8;

    /// Changes the target encode bitrate, in bits per second, where the
    /// codec supports variable rates. Fixed-rate codecs (G.711) accept the
    /// call and ignore it; the default implementation does exactly that.
    fn set_bitrate(&mut self, _bitrate_bps: u32) -> Result<()> {
        Ok(())
    }

    /// Resets any internal codec state (e.g. predictor memory) to its initial value.
    fn reset(&mut self);
}

/// Decodes a codec's wire format back into signed 16-bit PCM.
pub trait FrameDecoder: Send {
    /// Decodes `data` into `output`, returning the number of samples written.
    fn decode(&mut self, data: &[u8], output: &mut [i16]) -> Result<usize>;

    /// Upper bound on samples produced per call, used to size caller buffers.
    fn max_frame_size_samples(&self) -> usize;

    /// Synthesizes a concealment frame for one lost packet, e.g. by
    /// continuing an internal predictor with zero innovation. Codecs with no
    /// meaningful concealment (PCM codecs) write silence.
    fn decode_plc(&mut self, output: &mut [i16]) -> Result<usize>;

    /// Resets any internal codec state to its initial value.
    fn reset(&mut self);
}

/// Identifies a payload codec independent of any concrete encoder/decoder
/// instance — used for payload-type negotiation and facade construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecKind {
    /// G.711 mu-law, 8 kHz mono, PT 0.
    UlawG711,
    /// G.711 A-law, 8 kHz mono, PT 8.
    AlawG711,
    /// Opus, variable rate/channels, dynamic PT.
    Opus,
}

impl CodecKind {
    /// Maps a static RTP payload type to its codec kind, per RFC 3551 §6.
    /// Returns `None` for dynamic payload types (96-127), which require
    /// out-of-band (SDP) negotiation the facade does not perform itself.
    pub fn from_static_payload_type(pt: u8) -> Option<Self> {
        match pt {
            0 => Some(CodecKind::UlawG711),
            8 => Some(CodecKind::AlawG711),
            _ => None,
        }
    }

    /// Builds an encoder for this codec kind at the given sample rate.
    pub fn build_encoder(self, sample_rate: u32, channels: u8) -> Result<Box<dyn FrameEncoder>> {
        match self {
            CodecKind::UlawG711 => Ok(Box::new(crate::codec::ulaw::UlawEncoder::new())),
            CodecKind::AlawG711 => Ok(Box::new(crate::codec::alaw::AlawEncoder::new())),
            CodecKind::Opus => {
                #[cfg(feature = "opus")]
                {
                    crate::codec::opus::OpusFrameEncoder::new(sample_rate, channels)
                        .map(|e| Box::new(e) as Box<dyn FrameEncoder>)
                }
                #[cfg(not(feature = "opus"))]
                {
                    let _ = (sample_rate, channels);
                    Err(EngineError::NotSupported("opus feature not compiled in".into()))
                }
            }
        }
    }

    /// Builds a decoder for this codec kind at the given sample rate.
    pub fn build_decoder(self, sample_rate: u32, channels: u8) -> Result<Box<dyn FrameDecoder>> {
        match self {
            CodecKind::UlawG711 => Ok(Box::new(crate::codec::ulaw::UlawDecoder::new())),
            CodecKind::AlawG711 => Ok(Box::new(crate::codec::alaw::AlawDecoder::new())),
            CodecKind::Opus => {
                #[cfg(feature = "opus")]
                {
                    crate::codec::opus::OpusFrameDecoder::new(sample_rate, channels)
                        .map(|d| Box::new(d) as Box<dyn FrameDecoder>)
                }
                #[cfg(not(feature = "opus"))]
                {
                    let _ = (sample_rate, channels);
                    Err(EngineError::NotSupported("opus feature not compiled in".into()))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_payload_type_mapping() {
        assert_eq!(CodecKind::from_static_payload_type(0), Some(CodecKind::UlawG711));
        assert_eq!(CodecKind::from_static_payload_type(8), Some(CodecKind::AlawG711));
        assert_eq!(CodecKind::from_static_payload_type(96), None);
    }
}
