//! Goertzel filter-bank DTMF detector (§4.3.1).
//!
//! Eight second-order Goertzel recurrences evaluate one DFT bin each in O(N)
//! time per block; four cover the low (row) group, four the high (column)
//! group. A detection requires both groups to clear an energy threshold and
//! the high/low energy ratio ("twist") to stay within the gated window, and
//! a digit is only emitted once it has held for `min_on_samples`.

use super::{HIGH_GROUP_HZ, LOW_GROUP_HZ};
use std::f32::consts::PI;

/// A single second-order Goertzel recurrence tuned to one target frequency.
#[derive(Clone, Copy)]
struct GoertzelFilter {
    coeff: f32,
    s1: f32,
    s2: f32,
}

impl GoertzelFilter {
    fn new(target_hz: f32, sample_rate: u32, block_len: usize) -> Self {
        let n = block_len as f32;
        let k = 0.5 + (n * target_hz / sample_rate as f32);
        let coeff = 2.0 * (2.0 * PI * k / n).cos();
        Self { coeff, s1: 0.0, s2: 0.0 }
    }

    #[inline]
    fn update(&mut self, sample: f32) {
        let s0 = sample + self.coeff * self.s1 - self.s2;
        self.s2 = self.s1;
        self.s1 = s0;
    }

    fn power(&self) -> f32 {
        self.s1 * self.s1 + self.s2 * self.s2 - self.coeff * self.s1 * self.s2
    }

    fn reset(&mut self) {
        self.s1 = 0.0;
        self.s2 = 0.0;
    }
}

/// Tunable gating parameters for the detector.
#[derive(Debug, Clone, Copy)]
pub struct DtmfDetectorConfig {
    /// PCM sample rate, typically 8000 Hz.
    pub sample_rate: u32,
    /// Minimum Goertzel power (per tone) to consider a block a candidate.
    pub detection_threshold: f32,
    /// Maximum allowed `10*log10(p_high/p_low)`, in dB.
    pub twist_threshold_db: f32,
    /// Maximum allowed `10*log10(p_low/p_high)`, in dB (i.e. the negative bound on twist).
    pub reverse_twist_threshold_db: f32,
    /// Samples a candidate digit must hold before it is emitted (~40 ms typical).
    pub min_on_samples: u32,
    /// Samples of non-detection before the candidate is cleared (~40 ms typical).
    pub min_off_samples: u32,
}

impl Default for DtmfDetectorConfig {
    fn default() -> Self {
        let sample_rate = 8000;
        Self {
            sample_rate,
            detection_threshold: 100.0,
            twist_threshold_db: 6.0,
            reverse_twist_threshold_db: 8.0,
            min_on_samples: (sample_rate / 1000) * 40,
            min_off_samples: (sample_rate / 1000) * 40,
        }
    }
}

/// A detected digit and how long its tone held, in samples.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DtmfEvent {
    /// The detected digit: `0-9`, `*`, `#`, or `A-D`.
    pub digit: char,
    /// Duration the tone was continuously present, at the point of emission.
    pub on_samples: u32,
}

/// Stateful Goertzel-bank DTMF detector. Feed it samples via `process`; it
/// internally batches them into `N = sample_rate / 100` (~10 ms) blocks and
/// emits at most one `DtmfEvent` per digit press, the instant the hold
/// threshold is crossed (never retroactively, and never more than once per
/// press). Cannot fail — absent input, it simply does not emit.
pub struct DtmfDetector {
    config: DtmfDetectorConfig,
    block_len: usize,
    low_filters: [GoertzelFilter; 4],
    high_filters: [GoertzelFilter; 4],
    block_fill: usize,
    candidate: Option<char>,
    on_samples: u32,
    off_samples: u32,
    digit_active: bool,
}

impl DtmfDetector {
    /// Builds a detector for the given configuration.
    pub fn new(config: DtmfDetectorConfig) -> Self {
        let block_len = (config.sample_rate / 100).max(1) as usize;
        let low_filters = LOW_GROUP_HZ.map(|f| GoertzelFilter::new(f, config.sample_rate, block_len));
        let high_filters = HIGH_GROUP_HZ.map(|f| GoertzelFilter::new(f, config.sample_rate, block_len));
        Self {
            config,
            block_len,
            low_filters,
            high_filters,
            block_fill: 0,
            candidate: None,
            on_samples: 0,
            off_samples: 0,
            digit_active: false,
        }
    }

    /// Resets all filter and hold-timer state, as if newly constructed.
    pub fn reset(&mut self) {
        for f in &mut self.low_filters {
            f.reset();
        }
        for f in &mut self.high_filters {
            f.reset();
        }
        self.block_fill = 0;
        self.candidate = None;
        self.on_samples = 0;
        self.off_samples = 0;
        self.digit_active = false;
    }

    /// Feeds one block's worth of int16 PCM samples at a time; call
    /// repeatedly with arbitrarily sized chunks. Returns every digit event
    /// emitted while processing this call's samples, in order.
    pub fn process(&mut self, samples: &[i16]) -> Vec<DtmfEvent> {
        let mut events = Vec::new();
        for &s in samples {
            let x = s as f32 / 32768.0;
            for f in &mut self.low_filters {
                f.update(x);
            }
            for f in &mut self.high_filters {
                f.update(x);
            }
            self.block_fill += 1;
            if self.block_fill >= self.block_len {
                self.block_fill = 0;
                if let Some(event) = self.end_of_block() {
                    events.push(event);
                }
            }
        }
        events
    }

    fn end_of_block(&mut self) -> Option<DtmfEvent> {
        let low_power: [f32; 4] = std::array::from_fn(|i| self.low_filters[i].power());
        let high_power: [f32; 4] = std::array::from_fn(|i| self.high_filters[i].power());
        for f in &mut self.low_filters {
            f.reset();
        }
        for f in &mut self.high_filters {
            f.reset();
        }

        let (low_idx, &low_max) = argmax(&low_power);
        let (high_idx, &high_max) = argmax(&high_power);

        let detected = low_max > self.config.detection_threshold
            && high_max > self.config.detection_threshold
            && {
                let twist_db = 10.0 * (high_max / low_max).log10();
                twist_db <= self.config.twist_threshold_db
                    && twist_db >= -self.config.reverse_twist_threshold_db
            };

        let block_len = self.block_len as u32;
        if detected {
            self.off_samples = 0;
            let digit = digit_from_indices(low_idx, high_idx);
            if self.candidate == Some(digit) {
                self.on_samples += block_len;
            } else {
                self.candidate = Some(digit);
                self.on_samples = block_len;
                self.digit_active = false;
            }
            if self.on_samples >= self.config.min_on_samples && !self.digit_active {
                self.digit_active = true;
                return Some(DtmfEvent { digit, on_samples: self.on_samples });
            }
        } else {
            self.off_samples += block_len;
            if self.off_samples >= self.config.min_off_samples {
                self.candidate = None;
                self.on_samples = 0;
                self.digit_active = false;
            }
        }
        None
    }
}

fn digit_from_indices(low_idx: usize, high_idx: usize) -> char {
    super::DIGIT_MATRIX[low_idx][high_idx]
}

fn argmax(values: &[f32; 4]) -> (usize, &f32) {
    let mut best_idx = 0;
    for i in 1..4 {
        if values[i] > values[best_idx] {
            best_idx = i;
        }
    }
    (best_idx, &values[best_idx])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dtmf::generator::DtmfGenerator;

    fn detect_digit(digit: char, on_ms: u32, off_ms: u32) -> Vec<DtmfEvent> {
        let sample_rate = 8000;
        let mut gen = DtmfGenerator::new(sample_rate, 1.0);
        let samples = gen.generate_digit(digit, on_ms, off_ms);
        let mut det = DtmfDetector::new(DtmfDetectorConfig { sample_rate, ..Default::default() });
        det.process(&samples)
    }

    #[test]
    fn detects_digit_5_exactly_once() {
        let events = detect_digit('5', 100, 50);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].digit, '5');
        let on_ms = events[0].on_samples as f32 / 8.0;
        assert!((80.0..=120.0).contains(&on_ms), "on_time {on_ms}ms out of [80,120]");
    }

    #[test]
    fn detects_star_and_pound() {
        for digit in ['*', '#'] {
            let events = detect_digit(digit, 60, 40);
            assert_eq!(events.len(), 1);
            assert_eq!(events[0].digit, digit);
        }
    }

    #[test]
    fn silence_produces_no_events() {
        let sample_rate = 8000;
        let silence = vec![0i16; sample_rate as usize];
        let mut det = DtmfDetector::new(DtmfDetectorConfig { sample_rate, ..Default::default() });
        let events = det.process(&silence);
        assert!(events.is_empty());
    }

    #[test]
    fn short_tone_below_min_on_never_emits() {
        let sample_rate = 8000;
        let mut gen = DtmfGenerator::new(sample_rate, 1.0);
        let samples = gen.generate_digit('7', 10, 0);
        let mut det = DtmfDetector::new(DtmfDetectorConfig { sample_rate, ..Default::default() });
        let events = det.process(&samples);
        assert!(events.is_empty());
    }

    #[test]
    fn sequence_of_digits_each_emit_once() {
        let sample_rate = 8000;
        let mut gen = DtmfGenerator::new(sample_rate, 1.0);
        let mut samples = Vec::new();
        for d in ['1', '2', '3'] {
            samples.extend(gen.generate_digit(d, 80, 60));
        }
        let mut det = DtmfDetector::new(DtmfDetectorConfig { sample_rate, ..Default::default() });
        let events = det.process(&samples);
        let digits: Vec<char> = events.iter().map(|e| e.digit).collect();
        assert_eq!(digits, vec!['1', '2', '3']);
    }
}
