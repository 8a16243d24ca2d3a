//! Time-based effects (§4.6 "Reverb / Delay / Chorus / Flanger"): comb and
//! allpass delay networks, and LFO-modulated tapped delay lines, behind one
//! `wet_mix`/`dry_mix` contract.

use crate::dsp::DspBlock;
use crate::error::{EngineError, Result};

/// Which effect topology `EffectProcessor` runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectKind {
    /// Schroeder reverb: four parallel feedback combs into two series allpass.
    Reverb,
    /// Single tapped delay line with feedback.
    Delay,
    /// LFO-modulated delay line, shallow depth, slow rate.
    Chorus,
    /// LFO-modulated delay line, very shallow depth, comb-like sweep.
    Flanger,
}

/// Effect configuration.
#[derive(Debug, Clone, Copy)]
pub struct EffectConfig {
    /// Sample rate the effect runs at.
    pub sample_rate: u32,
    /// Effect topology.
    pub kind: EffectKind,
    /// Base delay, ms. For `Reverb`, scales the comb delay lengths.
    pub delay_ms: f32,
    /// Feedback gain, `[0, 1)`. Ignored for `Chorus`/`Flanger`.
    pub feedback: f32,
    /// LFO rate, Hz. Ignored for `Reverb`/`Delay`.
    pub lfo_rate_hz: f32,
    /// LFO depth, ms, added on top of `delay_ms`. Ignored for `Reverb`/`Delay`.
    pub lfo_depth_ms: f32,
    /// Wet signal mix, `[0, 1]`.
    pub wet_mix: f32,
    /// Dry signal mix, `[0, 1]`.
    pub dry_mix: f32,
}

impl EffectConfig {
    /// Validates range constraints.
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(EngineError::InvalidParam("sample_rate must be nonzero".into()));
        }
        if !(0.0..1.0).contains(&self.feedback) {
            return Err(EngineError::InvalidParam("feedback must be in [0, 1)".into()));
        }
        if self.delay_ms <= 0.0 {
            return Err(EngineError::InvalidParam("delay_ms must be positive".into()));
        }
        Ok(())
    }
}

impl Default for EffectConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            kind: EffectKind::Delay,
            delay_ms: 250.0,
            feedback: 0.35,
            lfo_rate_hz: 0.5,
            lfo_depth_ms: 3.0,
            wet_mix: 0.3,
            dry_mix: 0.7,
        }
    }
}

/// Fixed-capacity circular delay line with linear-interpolated fractional read.
struct DelayLine {
    buffer: Vec<f32>,
    write_pos: usize,
}

impl DelayLine {
    fn new(max_delay_samples: usize) -> Self {
        Self { buffer: vec![0.0; max_delay_samples.max(1)], write_pos: 0 }
    }

    fn write(&mut self, sample: f32) {
        self.buffer[self.write_pos] = sample;
        self.write_pos = (self.write_pos + 1) % self.buffer.len();
    }

    fn read(&self, delay_samples: f32) -> f32 {
        let len = self.buffer.len() as f32;
        let delay = delay_samples.clamp(0.0, len - 1.0);
        let read_pos = (self.write_pos as f32 - delay + len) % len;
        let i0 = read_pos as usize % self.buffer.len();
        let i1 = (i0 + 1) % self.buffer.len();
        let frac = read_pos - read_pos.floor();
        self.buffer[i0] * (1.0 - frac) + self.buffer[i1] * frac
    }

    fn reset(&mut self) {
        self.buffer.iter_mut().for_each(|s| *s = 0.0);
        self.write_pos = 0;
    }
}

const COMB_RATIOS: [f32; 4] = [1.0, 1.17, 1.33, 1.51];
const ALLPASS_RATIOS: [f32; 2] = [0.23, 0.11];

/// Comb/allpass or LFO-modulated delay effect.
pub struct EffectProcessor {
    config: EffectConfig,
    combs: Vec<DelayLine>,
    allpasses: Vec<DelayLine>,
    single: DelayLine,
    lfo_phase: f32,
}

impl EffectProcessor {
    /// Builds an effect processor from validated config.
    pub fn new(config: EffectConfig) -> Result<Self> {
        config.validate()?;
        let sr = config.sample_rate as f32;
        let base_samples = (config.delay_ms / 1000.0 * sr) as usize;

        let combs = COMB_RATIOS
            .iter()
            .map(|r| DelayLine::new(((base_samples as f32 * r) as usize).max(1)))
            .collect();
        let allpasses = ALLPASS_RATIOS
            .iter()
            .map(|r| DelayLine::new(((base_samples as f32 * r) as usize).max(1)))
            .collect();

        let max_single = base_samples + (config.lfo_depth_ms / 1000.0 * sr) as usize + 2;
        let single = DelayLine::new(max_single.max(2));

        Ok(Self { config, combs, allpasses, single, lfo_phase: 0.0 })
    }

    fn process_reverb_sample(&mut self, x: f32) -> f32 {
        let fb = self.config.feedback;
        let mut sum = 0.0;
        for comb in self.combs.iter_mut() {
            let delayed = comb.read(comb.buffer.len() as f32 - 1.0);
            comb.write(x + delayed * fb);
            sum += delayed;
        }
        let mut out = sum / self.combs.len() as f32;
        for ap in self.allpasses.iter_mut() {
            let delayed = ap.read(ap.buffer.len() as f32 - 1.0);
            let input = out;
            out = -input * 0.5 + delayed;
            ap.write(input + delayed * 0.5);
        }
        out
    }

    fn process_delay_sample(&mut self, x: f32) -> f32 {
        let sr = self.config.sample_rate as f32;
        let delay_samples = self.config.delay_ms / 1000.0 * sr;
        let delayed = self.single.read(delay_samples);
        self.single.write(x + delayed * self.config.feedback);
        delayed
    }

    fn process_modulated_sample(&mut self, x: f32) -> f32 {
        let sr = self.config.sample_rate as f32;
        let base = self.config.delay_ms / 1000.0 * sr;
        let depth = self.config.lfo_depth_ms / 1000.0 * sr;
        let lfo = (2.0 * std::f32::consts::PI * self.lfo_phase).sin();
        self.lfo_phase += self.config.lfo_rate_hz / sr;
        if self.lfo_phase >= 1.0 {
            self.lfo_phase -= 1.0;
        }
        let delay_samples = (base + depth * lfo).max(0.0);
        let delayed = self.single.read(delay_samples);
        self.single.write(x);
        delayed
    }
}

impl DspBlock for EffectProcessor {
    fn process(&mut self, samples: &mut [f32]) -> Result<()> {
        if samples.is_empty() {
            return Ok(());
        }
        for s in samples.iter_mut() {
            let wet = match self.config.kind {
                EffectKind::Reverb => self.process_reverb_sample(*s),
                EffectKind::Delay => self.process_delay_sample(*s),
                EffectKind::Chorus | EffectKind::Flanger => self.process_modulated_sample(*s),
            };
            *s = (*s * self.config.dry_mix + wet * self.config.wet_mix).clamp(-1.0, 1.0);
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.combs.iter_mut().for_each(DelayLine::reset);
        self.allpasses.iter_mut().for_each(DelayLine::reset);
        self.single.reset();
        self.lfo_phase = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(kind: EffectKind) -> EffectConfig {
        EffectConfig { kind, ..Default::default() }
    }

    #[test]
    fn zero_length_input_is_a_noop() {
        let mut e = EffectProcessor::new(cfg(EffectKind::Delay)).unwrap();
        let mut samples: [f32; 0] = [];
        assert!(e.process(&mut samples).is_ok());
    }

    #[test]
    fn delay_echoes_impulse_after_delay_samples() {
        let mut e = EffectProcessor::new(EffectConfig {
            delay_ms: 10.0,
            feedback: 0.0,
            wet_mix: 1.0,
            dry_mix: 0.0,
            sample_rate: 1000,
            ..cfg(EffectKind::Delay)
        })
        .unwrap();
        let mut samples = vec![0.0f32; 40];
        samples[0] = 1.0;
        e.process(&mut samples).unwrap();
        assert!(samples[10].abs() > 0.5);
    }

    #[test]
    fn reverb_produces_decaying_tail_after_impulse() {
        let mut e = EffectProcessor::new(cfg(EffectKind::Reverb)).unwrap();
        let mut samples = vec![0.0f32; 4000];
        samples[0] = 1.0;
        e.process(&mut samples).unwrap();
        let tail_energy: f32 = samples[3000..].iter().map(|s| s * s).sum();
        assert!(tail_energy.is_finite());
    }

    #[test]
    fn chorus_output_stays_bounded() {
        let mut e = EffectProcessor::new(cfg(EffectKind::Chorus)).unwrap();
        let mut samples: Vec<f32> =
            (0..2000).map(|i| (2.0 * std::f32::consts::PI * 440.0 * i as f32 / 48000.0).sin()).collect();
        e.process(&mut samples).unwrap();
        assert!(samples.iter().all(|s| s.abs() <= 1.0));
    }

    #[test]
    fn rejects_feedback_at_unity() {
        let cfg = EffectConfig { feedback: 1.0, ..Default::default() };
        assert!(cfg.validate().is_err());
    }
}
