//! Comfort noise generation (§4.6 "Comfort Noise Generator"): tracks the
//! noise floor while the VAD reports silence, encodes it as an RFC 3389
//! Silence Insertion Descriptor, and synthesizes matching noise locally
//! during DTX so silence doesn't sound like a dropped call.

use crate::error::{EngineError, Result};

/// Comfort noise configuration.
#[derive(Debug, Clone, Copy)]
pub struct ComfortNoiseConfig {
    /// Sample rate the block runs at.
    pub sample_rate: u32,
    /// Noise-floor tracker time constant, in samples.
    pub analysis_time_constant: u32,
}

impl ComfortNoiseConfig {
    /// Validates range constraints.
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(EngineError::InvalidParam("sample_rate must be nonzero".into()));
        }
        Ok(())
    }
}

impl Default for ComfortNoiseConfig {
    fn default() -> Self {
        Self { sample_rate: 48000, analysis_time_constant: 4800 }
    }
}

/// RFC 3389 Silence Insertion Descriptor: one noise-level byte (this
/// implementation does not encode the optional per-band spectral
/// coefficients RFC 3389 allows; see `DESIGN.md`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SidFrame {
    /// Quantized noise level, 0 (silence) to 127 (full scale), RFC 3389 §3.
    pub level: u8,
}

impl SidFrame {
    /// Encodes as the single-byte RFC 3389 SID payload.
    pub fn to_bytes(self) -> [u8; 1] {
        [self.level]
    }

    /// Decodes from an RFC 3389 SID payload.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let &level = data.first().ok_or_else(|| EngineError::InvalidPacket("empty SID payload".into()))?;
        Ok(SidFrame { level: level & 0x7F })
    }
}

/// Noise-floor tracker and local noise synthesizer.
pub struct ComfortNoiseGenerator {
    config: ComfortNoiseConfig,
    noise_level_linear: f32,
    rng_state: u32,
}

impl ComfortNoiseGenerator {
    /// Builds a comfort noise generator from validated config.
    pub fn new(config: ComfortNoiseConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, noise_level_linear: 0.0, rng_state: 0x9E37_79B9 })
    }

    /// Updates the tracked noise floor from one silence-classified frame
    /// (§4.6: "Analyses noise spectrum during silence").
    pub fn analyze(&mut self, samples: &[f32]) {
        if samples.is_empty() {
            return;
        }
        let alpha = 1.0 / self.config.analysis_time_constant as f32;
        let sum_sq: f32 = samples.iter().map(|&s| s * s).sum();
        let rms = (sum_sq / samples.len() as f32).sqrt();
        self.noise_level_linear += (rms - self.noise_level_linear) * alpha;
    }

    /// Encodes the current noise floor as an RFC 3389 SID frame.
    pub fn encode_sid(&self) -> SidFrame {
        let db = if self.noise_level_linear > 1e-9 { 20.0 * self.noise_level_linear.log10() } else { -127.0 };
        let level = (db + 127.0).clamp(0.0, 127.0) as u8;
        SidFrame { level }
    }

    /// Synthesizes `output.len()` samples of noise matching `sid`'s level
    /// (§4.6: "synthesises equivalent noise during DTX").
    pub fn synthesize(&mut self, sid: SidFrame, output: &mut [f32]) {
        let db = sid.level as f32 - 127.0;
        let amplitude = 10f32.powf(db / 20.0);
        for s in output.iter_mut() {
            *s = self.next_white_noise() * amplitude;
        }
    }

    fn next_white_noise(&mut self) -> f32 {
        // xorshift32: deterministic, allocation-free, adequate for comfort
        // noise (no cryptographic or statistical requirement here).
        self.rng_state ^= self.rng_state << 13;
        self.rng_state ^= self.rng_state >> 17;
        self.rng_state ^= self.rng_state << 5;
        (self.rng_state as f32 / u32::MAX as f32) * 2.0 - 1.0
    }

    /// Clears the tracked noise floor back to silence.
    pub fn reset(&mut self) {
        self.noise_level_linear = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_floor_encodes_to_minimum_level() {
        let mut cng = ComfortNoiseGenerator::new(ComfortNoiseConfig::default()).unwrap();
        cng.analyze(&vec![0.0f32; 1000]);
        let sid = cng.encode_sid();
        assert_eq!(sid.level, 0);
    }

    #[test]
    fn sid_roundtrips_through_bytes() {
        let sid = SidFrame { level: 42 };
        let bytes = sid.to_bytes();
        let decoded = SidFrame::from_bytes(&bytes).unwrap();
        assert_eq!(sid, decoded);
    }

    #[test]
    fn synthesized_noise_matches_encoded_level_order_of_magnitude() {
        let mut cng = ComfortNoiseGenerator::new(ComfortNoiseConfig::default()).unwrap();
        cng.analyze(&vec![0.05f32; 5000]);
        let sid = cng.encode_sid();
        let mut out = vec![0.0f32; 2000];
        cng.synthesize(sid, &mut out);
        let rms = (out.iter().map(|s| s * s).sum::<f32>() / out.len() as f32).sqrt();
        assert!(rms > 0.0 && rms < 1.0);
    }

    #[test]
    fn empty_sid_payload_is_rejected() {
        assert!(SidFrame::from_bytes(&[]).is_err());
    }
}
