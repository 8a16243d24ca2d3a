//! Voice activity detection (§4.6 "VAD"): energy-threshold classifier with
//! hangover, producing a speech/silence decision plus running frame counts.

use crate::dsp::DspBlock;
use crate::error::{EngineError, Result};

/// VAD configuration.
#[derive(Debug, Clone, Copy)]
pub struct VadConfig {
    /// Sample rate the block runs at.
    pub sample_rate: u32,
    /// Energy threshold, in dBFS, above which a frame is speech.
    pub threshold_dbfs: f32,
    /// Number of additional frames classified as speech after energy drops
    /// back below threshold, to avoid clipping trailing fricatives.
    pub hangover_frames: u32,
}

impl VadConfig {
    /// Validates range constraints.
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(EngineError::InvalidParam("sample_rate must be nonzero".into()));
        }
        Ok(())
    }
}

impl Default for VadConfig {
    fn default() -> Self {
        Self { sample_rate: 48000, threshold_dbfs: -40.0, hangover_frames: 5 }
    }
}

/// One frame's VAD result (§4.6 contract table).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VadOutcome {
    /// `true` if this frame (including hangover) is classified as speech.
    pub is_speech: bool,
    /// Soft probability in `[0, 1]`, saturating as energy exceeds threshold.
    pub speech_probability: f32,
    /// This frame's RMS energy, in dBFS.
    pub energy_db: f32,
    /// Running count of frames classified as speech.
    pub speech_frames: u64,
    /// Running count of frames classified as silence.
    pub silence_frames: u64,
}

/// Energy-threshold VAD with hangover.
pub struct VadProcessor {
    config: VadConfig,
    hangover_remaining: u32,
    speech_frames: u64,
    silence_frames: u64,
    last_outcome: Option<VadOutcome>,
}

impl VadProcessor {
    /// Builds a VAD processor from validated config.
    pub fn new(config: VadConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, hangover_remaining: 0, speech_frames: 0, silence_frames: 0, last_outcome: None })
    }

    /// Classifies one frame without mutating it (VAD never alters audio; see
    /// `DspBlock::process`, which is a pass-through that calls this).
    pub fn analyze(&mut self, samples: &[f32]) -> VadOutcome {
        let energy_db = rms_dbfs(samples);
        let raw_speech = energy_db > self.config.threshold_dbfs;

        if raw_speech {
            self.hangover_remaining = self.config.hangover_frames;
        } else if self.hangover_remaining > 0 {
            self.hangover_remaining -= 1;
        }

        let is_speech = raw_speech || self.hangover_remaining > 0;
        if is_speech {
            self.speech_frames += 1;
        } else {
            self.silence_frames += 1;
        }

        let speech_probability = ((energy_db - self.config.threshold_dbfs) / 20.0 + 0.5).clamp(0.0, 1.0);

        let outcome = VadOutcome {
            is_speech,
            speech_probability,
            energy_db,
            speech_frames: self.speech_frames,
            silence_frames: self.silence_frames,
        };
        self.last_outcome = Some(outcome);
        outcome
    }

    /// The most recent `analyze()` result, if any frame has been processed.
    pub fn last_outcome(&self) -> Option<VadOutcome> {
        self.last_outcome
    }
}

fn rms_dbfs(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return -120.0;
    }
    let sum_sq: f32 = samples.iter().map(|&s| s * s).sum();
    let rms = (sum_sq / samples.len() as f32).sqrt();
    if rms <= 1e-9 {
        -120.0
    } else {
        20.0 * rms.log10()
    }
}

impl DspBlock for VadProcessor {
    fn process(&mut self, samples: &mut [f32]) -> Result<()> {
        if samples.is_empty() {
            return Ok(());
        }
        self.analyze(samples);
        Ok(())
    }

    fn reset(&mut self) {
        self.hangover_remaining = 0;
        self.speech_frames = 0;
        self.silence_frames = 0;
        self.last_outcome = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_length_input_is_a_noop() {
        let mut vad = VadProcessor::new(VadConfig::default()).unwrap();
        let mut samples: [f32; 0] = [];
        assert!(vad.process(&mut samples).is_ok());
    }

    #[test]
    fn loud_frame_is_speech() {
        let mut vad = VadProcessor::new(VadConfig::default()).unwrap();
        let samples = vec![0.5f32; 160];
        let outcome = vad.analyze(&samples);
        assert!(outcome.is_speech);
        assert_eq!(outcome.speech_frames, 1);
    }

    #[test]
    fn silence_frame_after_hangover_expires_is_silence() {
        let cfg = VadConfig { hangover_frames: 2, ..Default::default() };
        let mut vad = VadProcessor::new(cfg).unwrap();
        vad.analyze(&vec![0.5f32; 160]);
        vad.analyze(&vec![0.0f32; 160]); // hangover 1
        vad.analyze(&vec![0.0f32; 160]); // hangover 0
        let outcome = vad.analyze(&vec![0.0f32; 160]);
        assert!(!outcome.is_speech);
    }

    #[test]
    fn counts_accumulate_across_frames() {
        let mut vad = VadProcessor::new(VadConfig::default()).unwrap();
        vad.analyze(&vec![0.5f32; 160]);
        let outcome = vad.analyze(&vec![0.0f32; 160]);
        assert_eq!(outcome.speech_frames + outcome.silence_frames, 2);
    }
}
