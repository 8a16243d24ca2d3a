//! Automatic gain control (§4.6 "AGC"): tracks long-term signal level and
//! applies a smoothed gain toward `target_level_dbfs`. Never raises gain on
//! a frame classified as pure noise, so silence isn't amplified into hiss.

use crate::dsp::DspBlock;
use crate::error::{EngineError, Result};

/// AGC operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgcMode {
    /// Applies a fixed gain; level tracking only informs telemetry.
    Fixed,
    /// Gain adapts continuously toward the target level.
    Adaptive,
    /// Digital gain applied post-capture, unbounded by analog headroom.
    Digital,
    /// Gain never exceeds 1.0; only ever attenuates toward the target.
    Limiter,
}

/// AGC configuration.
#[derive(Debug, Clone, Copy)]
pub struct AgcConfig {
    /// Sample rate the block runs at.
    pub sample_rate: u32,
    /// Desired long-term level, in dBFS (negative).
    pub target_level_dbfs: f32,
    /// Operating mode.
    pub mode: AgcMode,
    /// Maximum gain the adaptive/digital modes may apply, linear scale.
    pub max_gain: f32,
    /// Level tracker time constant, in samples.
    pub level_time_constant: u32,
    /// RMS level, linear scale, below which a frame is classified as noise
    /// and gain is not increased.
    pub noise_floor_linear: f32,
}

impl AgcConfig {
    /// Validates range constraints.
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(EngineError::InvalidParam("sample_rate must be nonzero".into()));
        }
        if self.max_gain < 1.0 {
            return Err(EngineError::InvalidParam("max_gain must be >= 1.0".into()));
        }
        Ok(())
    }
}

impl Default for AgcConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            target_level_dbfs: -18.0,
            mode: AgcMode::Adaptive,
            max_gain: 8.0,
            level_time_constant: 4800,
            noise_floor_linear: 0.01,
        }
    }
}

/// Level-tracking automatic gain controller.
pub struct AgcProcessor {
    config: AgcConfig,
    level: f32,
    gain: f32,
}

impl AgcProcessor {
    /// Builds an AGC processor from validated config.
    pub fn new(config: AgcConfig) -> Result<Self> {
        config.validate()?;
        let target_linear = db_to_linear(config.target_level_dbfs);
        let gain = match config.mode {
            AgcMode::Fixed => target_linear,
            _ => 1.0,
        };
        Ok(Self { config, level: 0.0, gain })
    }

    /// Current smoothed gain applied to the signal, linear scale.
    pub fn current_gain(&self) -> f32 {
        self.gain
    }
}

fn db_to_linear(db: f32) -> f32 {
    10f32.powf(db / 20.0)
}

impl DspBlock for AgcProcessor {
    fn process(&mut self, samples: &mut [f32]) -> Result<()> {
        if samples.is_empty() {
            return Ok(());
        }
        let alpha = 1.0 / self.config.level_time_constant as f32;
        let target_linear = db_to_linear(self.config.target_level_dbfs);

        for s in samples.iter_mut() {
            let mag = s.abs();
            self.level += (mag - self.level) * alpha;

            if self.config.mode != AgcMode::Fixed {
                let is_noise = self.level < self.config.noise_floor_linear;
                let desired_gain = if self.level > 1e-6 { target_linear / self.level } else { self.gain };
                let clamped = desired_gain.clamp(0.0, self.config.max_gain);

                if self.config.mode == AgcMode::Limiter {
                    self.gain = clamped.min(1.0);
                } else if is_noise && clamped > self.gain {
                    // never raise gain on a frame classified as pure noise
                } else {
                    self.gain += (clamped - self.gain) * 0.01;
                }
            }

            *s = (*s * self.gain).clamp(-1.0, 1.0);
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.level = 0.0;
        self.gain = match self.config.mode {
            AgcMode::Fixed => db_to_linear(self.config.target_level_dbfs),
            _ => 1.0,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_length_input_is_a_noop() {
        let mut agc = AgcProcessor::new(AgcConfig::default()).unwrap();
        let mut samples: [f32; 0] = [];
        assert!(agc.process(&mut samples).is_ok());
    }

    #[test]
    fn fixed_mode_applies_constant_gain() {
        let cfg = AgcConfig { mode: AgcMode::Fixed, target_level_dbfs: -6.0, ..Default::default() };
        let mut agc = AgcProcessor::new(cfg).unwrap();
        let expected_gain = db_to_linear(-6.0);
        let mut samples = [0.1f32; 10];
        agc.process(&mut samples).unwrap();
        for &s in &samples {
            assert!((s - 0.1 * expected_gain).abs() < 1e-5);
        }
    }

    #[test]
    fn limiter_mode_never_amplifies() {
        let cfg = AgcConfig { mode: AgcMode::Limiter, ..Default::default() };
        let mut agc = AgcProcessor::new(cfg).unwrap();
        let mut samples = vec![0.01f32; 5000];
        agc.process(&mut samples).unwrap();
        assert!(agc.current_gain() <= 1.0);
    }

    #[test]
    fn noise_floor_frames_do_not_raise_gain() {
        let cfg = AgcConfig { mode: AgcMode::Adaptive, noise_floor_linear: 0.5, ..Default::default() };
        let mut agc = AgcProcessor::new(cfg).unwrap();
        let before = agc.current_gain();
        let mut samples = vec![0.001f32; 5000];
        agc.process(&mut samples).unwrap();
        assert!(agc.current_gain() <= before + 1e-6);
    }

    #[test]
    fn rejects_max_gain_below_unity() {
        let cfg = AgcConfig { max_gain: 0.5, ..Default::default() };
        assert!(cfg.validate().is_err());
    }
}
