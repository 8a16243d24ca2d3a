//! Arbitrary-rate sample-rate conversion (C2).
//!
//! Two quality tiers share one `Resampler` trait so the pipeline is agnostic to
//! which is installed: `Linear` (fractional-position accumulator, grounded on
//! the teacher's adaptive playout resampler in `input/stream.rs::read_samples`)
//! and `Sinc` (windowed-sinc, configurable half-length) for higher quality at
//! the cost of delay and CPU. Both guarantee the length contract in §4.2:
//! `⌈in_len · fout / fin⌉` output samples, ±1 for edge accumulation.

use std::f32::consts::PI;

/// Selects the resampler's internal algorithm and quality/delay trade-off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResamplerQuality {
    /// Linear interpolation. Lowest delay and CPU, adequate for voice.
    Linear,
    /// Windowed-sinc with `half_taps` taps on each side of the kernel center.
    Sinc {
        /// Half-length of the sinc kernel; total taps = `2 * half_taps`.
        half_taps: usize,
    },
}

impl Default for ResamplerQuality {
    fn default() -> Self {
        ResamplerQuality::Linear
    }
}

/// Converts a stream of samples from `fin` Hz to `fout` Hz, one channel.
/// Stateful: holds filter memory between calls so a stream can be fed in
/// arbitrarily sized chunks. No allocation happens inside `process_*` after
/// construction — output is written into a caller-supplied scratch `Vec` that
/// is only ever grown, never shrunk, to avoid a reallocation on the steady
/// state path.
pub struct Resampler {
    fin: u32,
    fout: u32,
    quality: ResamplerQuality,
    /// Fractional read position into the (logical) infinite input stream, in
    /// units of input samples.
    pos: f64,
    /// History ring, sized to the quality tier's required lookback/lookahead.
    history: Vec<f32>,
    history_filled: usize,
    out_scratch: Vec<f32>,
}

impl Resampler {
    /// Creates a resampler converting `fin` Hz to `fout` Hz at the given quality.
    pub fn new(fin: u32, fout: u32, quality: ResamplerQuality) -> Self {
        let taps = match quality {
            ResamplerQuality::Linear => 2,
            ResamplerQuality::Sinc { half_taps } => (half_taps * 2).max(2),
        };
        Self {
            fin,
            fout,
            quality,
            pos: 0.0,
            history: vec![0.0; taps],
            history_filled: 0,
            out_scratch: Vec::new(),
        }
    }

    /// Filter delay introduced by the current quality tier, in output samples.
    pub fn delay_samples(&self) -> usize {
        match self.quality {
            ResamplerQuality::Linear => 1,
            ResamplerQuality::Sinc { half_taps } => half_taps,
        }
    }

    /// Clears all filter memory; the next sample processed is treated as the
    /// start of a new stream.
    pub fn reset(&mut self) {
        self.pos = 0.0;
        self.history.iter_mut().for_each(|s| *s = 0.0);
        self.history_filled = 0;
    }

    /// Expected output length for `in_len` input samples, per §4.2's contract.
    pub fn expected_output_len(&self, in_len: usize) -> usize {
        ((in_len as u64 * self.fout as u64) as f64 / self.fin as f64).ceil() as usize
    }

    fn ratio(&self) -> f64 {
        self.fin as f64 / self.fout as f64
    }

    fn push_history(&mut self, sample: f32) {
        let n = self.history.len();
        for i in 0..n - 1 {
            self.history[i] = self.history[i + 1];
        }
        self.history[n - 1] = sample;
        self.history_filled = (self.history_filled + 1).min(n);
    }

    fn interpolate(&self, frac: f64) -> f32 {
        match self.quality {
            ResamplerQuality::Linear => {
                let n = self.history.len();
                let a = self.history[n - 2];
                let b = self.history[n - 1];
                a + (b - a) * frac as f32
            }
            ResamplerQuality::Sinc { half_taps } => {
                let mut acc = 0.0f32;
                let n = self.history.len();
                for (i, &s) in self.history.iter().enumerate() {
                    let tap_offset = (n - 1 - i) as f64 + frac;
                    acc += s * sinc_window(tap_offset, half_taps as f64);
                }
                acc
            }
        }
    }

    /// Resamples `input` (float PCM) appending results to the internal scratch
    /// buffer, which is returned by reference. The buffer is cleared at the
    /// start of each call; its backing allocation is reused across calls.
    pub fn process_float(&mut self, input: &[f32]) -> &[f32] {
        self.out_scratch.clear();
        if input.is_empty() {
            return &self.out_scratch;
        }
        let ratio = self.ratio();
        for &sample in input {
            self.push_history(sample);
            while self.pos < 1.0 {
                let frac = self.pos;
                self.out_scratch.push(self.interpolate(frac));
                self.pos += ratio;
            }
            self.pos -= 1.0;
        }
        &self.out_scratch
    }

    /// Same contract as `process_float` but over signed 16-bit PCM.
    pub fn process_int16(&mut self, input: &[i16]) -> Vec<i16> {
        let float_in: Vec<f32> = input.iter().map(|&s| s as f32 / 32768.0).collect();
        self.process_float(&float_in)
            .iter()
            .map(|&f| (f.clamp(-1.0, 1.0) * 32767.0) as i16)
            .collect()
    }
}

/// Hann-windowed sinc kernel evaluated at fractional tap offset `x`, spanning
/// `[-half_taps, half_taps]`.
fn sinc_window(x: f64, half_taps: f64) -> f32 {
    if x.abs() >= half_taps {
        return 0.0;
    }
    let sinc = if x.abs() < 1e-9 {
        1.0
    } else {
        (PI as f64 * x).sin() / (PI as f64 * x)
    };
    let window = 0.5 * (1.0 + (PI as f64 * x / half_taps).cos());
    (sinc * window) as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn length_contract_upsample() {
        let mut r = Resampler::new(8000, 16000, ResamplerQuality::Linear);
        let input = vec![0.0f32; 160];
        let out = r.process_float(&input);
        let expected = r.expected_output_len(160);
        assert!((out.len() as i64 - expected as i64).abs() <= 1);
    }

    #[test]
    fn length_contract_downsample() {
        let mut r = Resampler::new(48000, 8000, ResamplerQuality::Linear);
        let input = vec![0.0f32; 960];
        let out_len = r.process_float(&input).len();
        let expected = r.expected_output_len(960);
        assert!((out_len as i64 - expected as i64).abs() <= 1);
    }

    #[test]
    fn identity_rate_passes_through_length() {
        let mut r = Resampler::new(48000, 48000, ResamplerQuality::Linear);
        let input = vec![0.25f32; 480];
        let out = r.process_float(&input);
        assert!((out.len() as i64 - 480).abs() <= 1);
    }

    #[test]
    fn reset_clears_fractional_position() {
        let mut r = Resampler::new(8000, 11025, ResamplerQuality::Linear);
        r.process_float(&[0.1; 100]);
        r.reset();
        assert_eq!(r.pos, 0.0);
    }

    #[test]
    fn sinc_quality_respects_length_contract() {
        let mut r = Resampler::new(44100, 48000, ResamplerQuality::Sinc { half_taps: 8 });
        let input = vec![0.0f32; 441];
        let out_len = r.process_float(&input).len();
        let expected = r.expected_output_len(441);
        assert!((out_len as i64 - expected as i64).abs() <= 1);
    }

    #[test]
    fn int16_roundtrip_length() {
        let mut r = Resampler::new(16000, 8000, ResamplerQuality::Linear);
        let input = vec![1000i16; 320];
        let out = r.process_int16(&input);
        let expected = r.expected_output_len(320);
        assert!((out.len() as i64 - expected as i64).abs() <= 1);
    }
}
