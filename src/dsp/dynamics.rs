//! Dynamics processing (§4.6 "Compressor/Limiter/Gate/Expander"): a shared
//! envelope detector and gain-computer curve parameterised by `kind`, with
//! attack/release smoothing, makeup gain, and an optional sidechain input.

use crate::dsp::DspBlock;
use crate::error::{EngineError, Result};

/// Which dynamics curve the gain computer applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DynamicsKind {
    /// Attenuates signal above `threshold_db` by `1/ratio`.
    Compressor,
    /// Compressor with `ratio` effectively infinite; hard ceiling at threshold.
    Limiter,
    /// Attenuates signal below `threshold_db`.
    Gate,
    /// Attenuates signal below `threshold_db` by `ratio` (downward expansion).
    Expander,
}

/// Envelope follower mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorMode {
    /// Instantaneous sample magnitude.
    Peak,
    /// Short-window RMS.
    Rms,
    /// True-peak (inter-sample) detection. This implementation treats it as
    /// `Peak` since no oversampling filter is implemented; see `DESIGN.md`.
    TruePeak,
}

/// Attack/release envelope follower shared by every dynamics kind.
pub struct EnvelopeDetector {
    mode: DetectorMode,
    attack_coeff: f32,
    release_coeff: f32,
    envelope: f32,
}

impl EnvelopeDetector {
    /// Builds a detector for `sample_rate`, with `attack_ms`/`release_ms`
    /// one-pole time constants.
    pub fn new(mode: DetectorMode, sample_rate: u32, attack_ms: f32, release_ms: f32) -> Self {
        let attack_coeff = time_constant_coeff(attack_ms, sample_rate);
        let release_coeff = time_constant_coeff(release_ms, sample_rate);
        Self { mode, attack_coeff, release_coeff, envelope: 0.0 }
    }

    /// Feeds one sample, returning the updated envelope magnitude.
    pub fn update(&mut self, sample: f32) -> f32 {
        let input = match self.mode {
            DetectorMode::Peak | DetectorMode::TruePeak => sample.abs(),
            DetectorMode::Rms => sample * sample,
        };
        let coeff = if input > self.envelope { self.attack_coeff } else { self.release_coeff };
        self.envelope += (input - self.envelope) * coeff;
        match self.mode {
            DetectorMode::Rms => self.envelope.sqrt(),
            _ => self.envelope,
        }
    }

    /// Resets the envelope to silence.
    pub fn reset(&mut self) {
        self.envelope = 0.0;
    }
}

fn time_constant_coeff(time_ms: f32, sample_rate: u32) -> f32 {
    if time_ms <= 0.0 {
        return 1.0;
    }
    let samples = time_ms / 1000.0 * sample_rate as f32;
    1.0 - (-1.0 / samples).exp()
}

/// Dynamics processor configuration.
#[derive(Debug, Clone, Copy)]
pub struct DynamicsConfig {
    /// Sample rate the block runs at.
    pub sample_rate: u32,
    /// Which curve to apply.
    pub kind: DynamicsKind,
    /// Envelope detector mode.
    pub detector_mode: DetectorMode,
    /// Threshold, dBFS, above/below which the curve engages.
    pub threshold_db: f32,
    /// Compression/expansion ratio (ignored for `Limiter`, which is infinite).
    pub ratio: f32,
    /// Soft-knee width, dB, centered on `threshold_db`.
    pub knee_db: f32,
    /// Envelope attack time, ms.
    pub attack_ms: f32,
    /// Envelope release time, ms.
    pub release_ms: f32,
    /// Makeup gain applied after the curve, dB.
    pub makeup_gain_db: f32,
}

impl DynamicsConfig {
    /// Validates range constraints.
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(EngineError::InvalidParam("sample_rate must be nonzero".into()));
        }
        if self.ratio < 1.0 {
            return Err(EngineError::InvalidParam("ratio must be >= 1.0".into()));
        }
        if self.knee_db < 0.0 {
            return Err(EngineError::InvalidParam("knee_db must be non-negative".into()));
        }
        Ok(())
    }
}

impl Default for DynamicsConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            kind: DynamicsKind::Compressor,
            detector_mode: DetectorMode::Rms,
            threshold_db: -18.0,
            ratio: 4.0,
            knee_db: 6.0,
            attack_ms: 5.0,
            release_ms: 80.0,
            makeup_gain_db: 0.0,
        }
    }
}

/// Compressor/Limiter/Gate/Expander with optional external sidechain.
pub struct DynamicsProcessor {
    config: DynamicsConfig,
    detector: EnvelopeDetector,
}

impl DynamicsProcessor {
    /// Builds a dynamics processor from validated config.
    pub fn new(config: DynamicsConfig) -> Result<Self> {
        config.validate()?;
        let detector =
            EnvelopeDetector::new(config.detector_mode, config.sample_rate, config.attack_ms, config.release_ms);
        Ok(Self { config, detector })
    }

    fn gain_for_level_db(&self, level_db: f32) -> f32 {
        let threshold = self.config.threshold_db;
        let knee = self.config.knee_db;
        let ratio = if self.config.kind == DynamicsKind::Limiter { 1000.0 } else { self.config.ratio };

        let over_db = match self.config.kind {
            DynamicsKind::Compressor | DynamicsKind::Limiter => level_db - threshold,
            DynamicsKind::Gate | DynamicsKind::Expander => threshold - level_db,
        };

        let reduction_db = if over_db <= -knee / 2.0 {
            0.0
        } else if over_db >= knee / 2.0 {
            over_db * (1.0 - 1.0 / ratio)
        } else {
            let x = over_db + knee / 2.0;
            (1.0 - 1.0 / ratio) * x * x / (2.0 * knee.max(1e-6))
        };

        match self.config.kind {
            DynamicsKind::Compressor | DynamicsKind::Limiter => -reduction_db,
            DynamicsKind::Gate | DynamicsKind::Expander => -reduction_db,
        }
    }

    /// Processes `samples` using an external `sidechain` signal to drive the
    /// envelope detector instead of `samples` itself (§4.6 "optional
    /// sidechain"). `sidechain` must be the same length as `samples`.
    pub fn process_with_sidechain(&mut self, samples: &mut [f32], sidechain: &[f32]) -> Result<()> {
        if samples.is_empty() {
            return Ok(());
        }
        if sidechain.len() != samples.len() {
            return Err(EngineError::InvalidParam("sidechain length must match samples length".into()));
        }
        let makeup = 10f32.powf(self.config.makeup_gain_db / 20.0);
        for (s, &sc) in samples.iter_mut().zip(sidechain.iter()) {
            let envelope = self.detector.update(sc);
            let level_db = if envelope > 1e-9 { 20.0 * envelope.log10() } else { -120.0 };
            let gain_db = self.gain_for_level_db(level_db);
            let gain = 10f32.powf(gain_db / 20.0);
            *s = (*s * gain * makeup).clamp(-1.0, 1.0);
        }
        Ok(())
    }
}

impl DspBlock for DynamicsProcessor {
    fn process(&mut self, samples: &mut [f32]) -> Result<()> {
        if samples.is_empty() {
            return Ok(());
        }
        let makeup = 10f32.powf(self.config.makeup_gain_db / 20.0);
        for s in samples.iter_mut() {
            let envelope = self.detector.update(*s);
            let level_db = if envelope > 1e-9 { 20.0 * envelope.log10() } else { -120.0 };
            let gain_db = self.gain_for_level_db(level_db);
            let gain = 10f32.powf(gain_db / 20.0);
            *s = (*s * gain * makeup).clamp(-1.0, 1.0);
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.detector.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_length_input_is_a_noop() {
        let mut c = DynamicsProcessor::new(DynamicsConfig::default()).unwrap();
        let mut samples: [f32; 0] = [];
        assert!(c.process(&mut samples).is_ok());
    }

    #[test]
    fn compressor_reduces_loud_sustained_signal() {
        let cfg = DynamicsConfig { threshold_db: -12.0, ratio: 4.0, attack_ms: 1.0, ..Default::default() };
        let mut c = DynamicsProcessor::new(cfg).unwrap();
        let mut samples = vec![0.8f32; 2000];
        c.process(&mut samples).unwrap();
        assert!(samples[1900] < 0.8);
    }

    #[test]
    fn gate_attenuates_quiet_signal() {
        let cfg = DynamicsConfig {
            kind: DynamicsKind::Gate,
            threshold_db: -20.0,
            ratio: 10.0,
            attack_ms: 1.0,
            release_ms: 1.0,
            ..Default::default()
        };
        let mut g = DynamicsProcessor::new(cfg).unwrap();
        let mut samples = vec![0.001f32; 2000];
        g.process(&mut samples).unwrap();
        assert!(samples[1900].abs() < 0.001);
    }

    #[test]
    fn limiter_never_exceeds_unity_amplitude() {
        let cfg = DynamicsConfig { kind: DynamicsKind::Limiter, threshold_db: -3.0, ..Default::default() };
        let mut l = DynamicsProcessor::new(cfg).unwrap();
        let mut samples = vec![1.5f32; 200];
        l.process(&mut samples).unwrap();
        assert!(samples.iter().all(|&s| s.abs() <= 1.0));
    }

    #[test]
    fn sidechain_drives_gain_instead_of_own_signal() {
        let cfg = DynamicsConfig { threshold_db: -12.0, ratio: 8.0, attack_ms: 1.0, ..Default::default() };
        let mut c = DynamicsProcessor::new(cfg).unwrap();
        let mut samples = vec![0.5f32; 500];
        let sidechain = vec![0.9f32; 500];
        c.process_with_sidechain(&mut samples, &sidechain).unwrap();
        assert!(samples[400] < 0.5);
    }

    #[test]
    fn rejects_ratio_below_one() {
        let cfg = DynamicsConfig { ratio: 0.5, ..Default::default() };
        assert!(cfg.validate().is_err());
    }
}
