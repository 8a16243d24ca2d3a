//! Noise suppression (§4.6 "Denoiser"): tracks a running noise floor and
//! applies a soft spectral-subtraction-style gain per sample block, with an
//! optional speech-probability output derived from the same statistic.

use crate::dsp::DspBlock;
use crate::error::{EngineError, Result};

/// Denoiser configuration.
#[derive(Debug, Clone, Copy)]
pub struct DenoiserConfig {
    /// Sample rate the block runs at.
    pub sample_rate: u32,
    /// Suppression strength in `[0, 1]`; 0 disables suppression entirely.
    pub strength: f32,
    /// Time constant, in samples, for the noise-floor tracker's attack/decay.
    pub noise_floor_time_constant: u32,
}

impl DenoiserConfig {
    /// Validates range constraints.
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(EngineError::InvalidParam("sample_rate must be nonzero".into()));
        }
        if !(0.0..=1.0).contains(&self.strength) {
            return Err(EngineError::InvalidParam("strength must be in [0, 1]".into()));
        }
        Ok(())
    }
}

impl Default for DenoiserConfig {
    fn default() -> Self {
        Self { sample_rate: 48000, strength: 0.6, noise_floor_time_constant: 4800 }
    }
}

/// Running-noise-floor denoiser.
pub struct DenoiserProcessor {
    config: DenoiserConfig,
    noise_floor: f32,
    speech_probability: f32,
}

impl DenoiserProcessor {
    /// Builds a denoiser from validated config.
    pub fn new(config: DenoiserConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, noise_floor: 0.0, speech_probability: 0.0 })
    }

    /// Most recent speech-probability estimate, `[0, 1]` (§4.6 "Optional:
    /// speech probability").
    pub fn speech_probability(&self) -> f32 {
        self.speech_probability
    }
}

impl DspBlock for DenoiserProcessor {
    fn process(&mut self, samples: &mut [f32]) -> Result<()> {
        if samples.is_empty() {
            return Ok(());
        }
        let alpha_up = 1.0 / self.config.noise_floor_time_constant as f32;
        let alpha_down = alpha_up * 0.1;

        for s in samples.iter_mut() {
            let mag = s.abs();
            if mag > self.noise_floor {
                self.noise_floor += (mag - self.noise_floor) * alpha_up;
            } else {
                self.noise_floor += (mag - self.noise_floor) * alpha_down;
            }

            let snr = if self.noise_floor > 1e-6 { mag / self.noise_floor } else { mag * 1e6 };
            self.speech_probability = (1.0 - 1.0 / snr.max(1.0)).clamp(0.0, 1.0);

            let gain = 1.0 - self.config.strength * (1.0 - self.speech_probability);
            *s *= gain.clamp(0.0, 1.0);
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.noise_floor = 0.0;
        self.speech_probability = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_length_input_is_a_noop() {
        let mut d = DenoiserProcessor::new(DenoiserConfig::default()).unwrap();
        let mut samples: [f32; 0] = [];
        assert!(d.process(&mut samples).is_ok());
    }

    #[test]
    fn attenuates_low_level_constant_hiss() {
        let mut d = DenoiserProcessor::new(DenoiserConfig { strength: 1.0, ..Default::default() }).unwrap();
        let mut samples = vec![0.01f32; 2000];
        d.process(&mut samples).unwrap();
        let tail_energy: f32 = samples[1900..].iter().map(|s| s.abs()).sum();
        assert!(tail_energy < 19.0);
    }

    #[test]
    fn reset_clears_noise_floor() {
        let mut d = DenoiserProcessor::new(DenoiserConfig::default()).unwrap();
        let mut samples = vec![0.5f32; 100];
        d.process(&mut samples).unwrap();
        d.reset();
        assert_eq!(d.noise_floor, 0.0);
    }

    #[test]
    fn rejects_strength_out_of_range() {
        let cfg = DenoiserConfig { strength: 1.5, ..Default::default() };
        assert!(cfg.validate().is_err());
    }
}
