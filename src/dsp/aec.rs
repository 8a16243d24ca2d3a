//! Acoustic echo cancellation (§4.6 "AEC"): a normalized least-mean-squares
//! adaptive filter models the room's echo path from the far-end reference
//! (captured at `playback()`) and subtracts the estimate from the near-end
//! capture frame.

use std::collections::VecDeque;

use crate::dsp::DspBlock;
use crate::error::{EngineError, Result};

/// AEC configuration.
#[derive(Debug, Clone, Copy)]
pub struct AecConfig {
    /// Sample rate the block runs at.
    pub sample_rate: u32,
    /// Adaptive filter length in taps; bounds the maximum modelled echo tail.
    pub filter_length: usize,
    /// NLMS step size, `(0, 1]`. Larger converges faster but less stably.
    pub step_size: f32,
}

impl AecConfig {
    /// Validates range constraints.
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(EngineError::InvalidParam("sample_rate must be nonzero".into()));
        }
        if self.filter_length == 0 {
            return Err(EngineError::InvalidParam("filter_length must be nonzero".into()));
        }
        if !(0.0..=1.0).contains(&self.step_size) {
            return Err(EngineError::InvalidParam("step_size must be in (0, 1]".into()));
        }
        Ok(())
    }
}

impl Default for AecConfig {
    fn default() -> Self {
        Self { sample_rate: 48000, filter_length: 256, step_size: 0.3 }
    }
}

/// NLMS-based echo canceller.
pub struct AecProcessor {
    config: AecConfig,
    taps: Vec<f32>,
    reference_history: VecDeque<f32>,
}

impl AecProcessor {
    /// Builds an AEC processor from validated config.
    pub fn new(config: AecConfig) -> Result<Self> {
        config.validate()?;
        let mut reference_history = VecDeque::with_capacity(config.filter_length);
        reference_history.resize(config.filter_length, 0.0);
        Ok(Self { config, taps: vec![0.0; config.filter_length], reference_history })
    }

    /// Records one far-end (playback) sample into the reference history the
    /// next `process()` call will echo-cancel against (§4.6: "far-end
    /// reference frame previously recorded via `playback()`").
    pub fn playback(&mut self, reference: &[f32]) {
        for &s in reference {
            self.reference_history.pop_front();
            self.reference_history.push_back(s);
        }
    }

    fn estimate_echo(&self) -> f32 {
        self.reference_history.iter().zip(self.taps.iter()).map(|(&r, &t)| r * t).sum()
    }

    fn adapt(&mut self, error: f32) {
        let energy: f32 = self.reference_history.iter().map(|&r| r * r).sum::<f32>() + 1e-6;
        let mu = self.config.step_size / energy;
        for (t, &r) in self.taps.iter_mut().zip(self.reference_history.iter()) {
            *t += mu * error * r;
        }
    }
}

impl DspBlock for AecProcessor {
    fn process(&mut self, samples: &mut [f32]) -> Result<()> {
        if samples.is_empty() {
            return Ok(());
        }
        for s in samples.iter_mut() {
            let echo_estimate = self.estimate_echo();
            let cleaned = *s - echo_estimate;
            self.adapt(cleaned);
            *s = cleaned;
            self.reference_history.pop_front();
            self.reference_history.push_back(0.0);
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.taps.iter_mut().for_each(|t| *t = 0.0);
        self.reference_history.iter_mut().for_each(|r| *r = 0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_length_input_is_a_noop() {
        let mut aec = AecProcessor::new(AecConfig::default()).unwrap();
        let mut samples: [f32; 0] = [];
        assert!(aec.process(&mut samples).is_ok());
    }

    #[test]
    fn converges_to_cancel_a_known_echo_path() {
        let cfg = AecConfig { filter_length: 8, step_size: 0.5, ..Default::default() };
        let mut aec = AecProcessor::new(cfg).unwrap();
        // Echo path: y[n] = 0.6 * x[n-1].
        let far_end: Vec<f32> = (0..2000).map(|i| ((i as f32) * 0.3).sin()).collect();
        let mut last = 0.0f32;
        let mut residual_energy_early = 0.0f32;
        let mut residual_energy_late = 0.0f32;
        for (i, &x) in far_end.iter().enumerate() {
            aec.playback(&[x]);
            let echoed = 0.6 * last;
            last = x;
            let mut frame = [echoed];
            aec.process(&mut frame).unwrap();
            if i > 1900 {
                residual_energy_late += frame[0] * frame[0];
            } else if i < 100 {
                residual_energy_early += frame[0] * frame[0];
            }
        }
        assert!(residual_energy_late < residual_energy_early);
    }

    #[test]
    fn reset_clears_adaptive_filter() {
        let mut aec = AecProcessor::new(AecConfig::default()).unwrap();
        aec.playback(&[0.5; 10]);
        let mut frame = [0.3f32];
        aec.process(&mut frame).unwrap();
        aec.reset();
        assert!(aec.taps.iter().all(|&t| t == 0.0));
    }
}
