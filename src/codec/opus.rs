//! Opus codec wrapper (feature `opus`), dynamic RTP payload type.
//!
//! Thin adapter over the `opus` crate's `Encoder`/`Decoder`, matching this
//! facade's fixed-size-frame contract. Frame size is fixed at construction
//! (20 ms, the VoIP-standard Opus frame), since Opus itself only accepts a
//! handful of legal frame durations per call.

use super::facade::{FrameDecoder, FrameEncoder};
use crate::error::{EngineError, Result};
use opus::{Application, Bitrate, Channels, Decoder, Encoder};

fn map_channels(channels: u8) -> Result<Channels> {
    match channels {
        1 => Ok(Channels::Mono),
        2 => Ok(Channels::Stereo),
        other => Err(EngineError::InvalidParam(format!("opus supports 1 or 2 channels, got {other}"))),
    }
}

fn map_opus_err(err: opus::Error) -> EngineError {
    EngineError::InvalidPacket(format!("opus: {err}"))
}

/// Opus encoder producing a fixed 20 ms frame at construction-time rate/channels.
pub struct OpusFrameEncoder {
    inner: Encoder,
    frame_size_samples: usize,
    payload_type: u8,
}

impl OpusFrameEncoder {
    /// Builds an encoder tuned for VoIP at `sample_rate` Hz / `channels` channels.
    pub fn new(sample_rate: u32, channels: u8) -> Result<Self> {
        let ch = map_channels(channels)?;
        let inner = Encoder::new(sample_rate, ch, Application::Voip).map_err(map_opus_err)?;
        let frame_size_samples = (sample_rate as usize / 1000) * 20 * channels as usize;
        Ok(Self { inner, frame_size_samples, payload_type: 96 })
    }
}

impl FrameEncoder for OpusFrameEncoder {
    fn encode(&mut self, pcm: &[i16], output: &mut [u8]) -> Result<usize> {
        self.inner.encode(pcm, output).map_err(map_opus_err)
    }

    fn frame_size_samples(&self) -> usize {
        self.frame_size_samples
    }

    fn payload_type(&self) -> u8 {
        self.payload_type
    }

    fn set_bitrate(&mut self, bitrate_bps: u32) -> Result<()> {
        self.inner.set_bitrate(Bitrate::Bits(bitrate_bps as i32)).map_err(map_opus_err)
    }

    fn reset(&mut self) {
        let _ = self.inner.reset_state();
    }
}

/// Opus decoder, paired one-to-one with an `OpusFrameEncoder` at the same rate/channels.
pub struct OpusFrameDecoder {
    inner: Decoder,
    max_frame_size_samples: usize,
}

impl OpusFrameDecoder {
    /// Builds a decoder for `sample_rate` Hz / `channels` channels.
    pub fn new(sample_rate: u32, channels: u8) -> Result<Self> {
        let ch = map_channels(channels)?;
        let inner = Decoder::new(sample_rate, ch).map_err(map_opus_err)?;
        // Opus frames can run up to 120ms; size the scratch buffer for the worst case.
        let max_frame_size_samples = (sample_rate as usize / 1000) * 120 * channels as usize;
        Ok(Self { inner, max_frame_size_samples })
    }
}

impl FrameDecoder for OpusFrameDecoder {
    fn decode(&mut self, data: &[u8], output: &mut [i16]) -> Result<usize> {
        self.inner.decode(data, output, false).map_err(map_opus_err)
    }

    fn max_frame_size_samples(&self) -> usize {
        self.max_frame_size_samples
    }

    fn decode_plc(&mut self, output: &mut [i16]) -> Result<usize> {
        self.inner.decode(&[], output, false).map_err(map_opus_err)
    }

    fn reset(&mut self) {
        let _ = self.inner.reset_state();
    }
}
