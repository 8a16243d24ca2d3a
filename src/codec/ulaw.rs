//! G.711 mu-law (PCMU) codec, RTP payload type 0.
//!
//! Stateless, sample-for-sample: one encoded byte per PCM sample, 8 kHz mono.
//! Algorithm per ITU-T G.711.

use super::facade::{FrameDecoder, FrameEncoder};
use crate::error::{EngineError, Result};

/// Encodes 16-bit PCM to mu-law bytes, one for one.
#[derive(Default)]
pub struct UlawEncoder;

impl UlawEncoder {
    /// Builds a new encoder. Stateless — construction never fails.
    pub fn new() -> Self {
        Self
    }
}

impl FrameEncoder for UlawEncoder {
    fn encode(&mut self, pcm: &[i16], output: &mut [u8]) -> Result<usize> {
        if output.len() < pcm.len() {
            return Err(EngineError::BufferTooSmall { needed: pcm.len(), available: output.len() });
        }
        for (i, &sample) in pcm.iter().enumerate() {
            output[i] = ulaw_encode(sample);
        }
        Ok(pcm.len())
    }

    fn frame_size_samples(&self) -> usize {
        160 // 20ms at 8kHz
    }

    fn payload_type(&self) -> u8 {
        0
    }

    fn reset(&mut self) {}
}

/// Decodes mu-law bytes to 16-bit PCM, one for one.
#[derive(Default)]
pub struct UlawDecoder;

impl UlawDecoder {
    /// Builds a new decoder. Stateless — construction never fails.
    pub fn new() -> Self {
        Self
    }
}

impl FrameDecoder for UlawDecoder {
    fn decode(&mut self, data: &[u8], output: &mut [i16]) -> Result<usize> {
        if output.len() < data.len() {
            return Err(EngineError::BufferTooSmall { needed: data.len(), available: output.len() });
        }
        for (i, &byte) in data.iter().enumerate() {
            output[i] = ulaw_decode(byte);
        }
        Ok(data.len())
    }

    fn max_frame_size_samples(&self) -> usize {
        160
    }

    fn decode_plc(&mut self, output: &mut [i16]) -> Result<usize> {
        output.iter_mut().for_each(|s| *s = 0);
        Ok(output.len())
    }

    fn reset(&mut self) {}
}

/// Decodes a single mu-law byte to a 16-bit signed sample.
#[inline]
pub fn ulaw_decode(y: u8) -> i16 {
    let y = !y;
    let sign = y & 0x80;
    let exponent = (y >> 4) & 0x07;
    let mantissa = (y & 0x0F) as i16;

    let step = 4i16 << exponent;
    let magnitude = (0x0084i16 << exponent) + step * mantissa + step / 2 - 0x0084;
    if sign != 0 {
        -magnitude
    } else {
        magnitude
    }
}

/// Encodes a single 16-bit signed sample to a mu-law byte.
#[inline]
pub fn ulaw_encode(sample: i16) -> u8 {
    const BIAS: i32 = 0x84;
    const CLIP: i32 = 32635;

    let sign = if sample < 0 { 0x80 } else { 0x00 };
    let mut magnitude = if sample < 0 { -(sample as i32) } else { sample as i32 };
    if magnitude > CLIP {
        magnitude = CLIP;
    }
    magnitude += BIAS;

    let exponent = (0..8)
        .rev()
        .find(|&e| magnitude >= (0x0084 << e))
        .unwrap_or(0);
    let mantissa = (magnitude >> (exponent + 3)) & 0x0F;

    !(sign | (exponent << 4) as i32 | mantissa) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_decodes_near_zero() {
        let sample = ulaw_decode(0xFF);
        assert!(sample.abs() < 10, "silence decoded to {sample}");
    }

    #[test]
    fn roundtrip_within_g711_quantization_error() {
        let values: [i16; 8] = [0, 100, 1000, 10000, -100, -1000, -10000, 32000];
        for &original in &values {
            let encoded = ulaw_encode(original);
            let decoded = ulaw_decode(encoded);
            let diff = (original - decoded).unsigned_abs();
            let tolerance = (original.unsigned_abs() / 20).max(100);
            assert!(diff <= tolerance, "{original} -> {encoded} -> {decoded}, diff={diff}");
        }
    }

    #[test]
    fn encode_frame_matches_sample_count() {
        let mut encoder = UlawEncoder::new();
        let pcm = vec![0i16; 160];
        let mut out = [0u8; 160];
        let written = encoder.encode(&pcm, &mut out).unwrap();
        assert_eq!(written, 160);
    }

    #[test]
    fn decode_rejects_undersized_output() {
        let mut decoder = UlawDecoder::new();
        let data = [0u8; 160];
        let mut out = [0i16; 10];
        assert!(decoder.decode(&data, &mut out).is_err());
    }

    #[test]
    fn plc_emits_silence() {
        let mut decoder = UlawDecoder::new();
        let mut out = [1i16; 160];
        decoder.decode_plc(&mut out).unwrap();
        assert!(out.iter().all(|&s| s == 0));
    }
}
