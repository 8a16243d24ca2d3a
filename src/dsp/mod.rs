//! DSP block contracts (C3, §4.6): denoiser, AEC, AGC, VAD, equalizer,
//! dynamics processors, time-based effects, comfort noise, and watermarking.
//!
//! Each block is specified by its contract only (§1.1: "standard
//! signal-processing building blocks whose internal algorithms are
//! interchangeable"); the hard cross-cutting concerns live in `rtp`,
//! `jitter`, and `pipeline` instead. Every block implements `DspBlock`, which
//! realizes the source's `create`/`process`/`reset`/`destroy` handle pattern
//! as ordinary construction/`&mut self` methods/`Drop` (§4.6 implementation
//! note) — "process after destroy" is rejected by the borrow checker.
//!
//! None of these blocks allocate inside `process()`; every internal buffer
//! is sized at construction time from `frame_size`.

pub mod aec;
pub mod agc;
pub mod comfort_noise;
pub mod denoiser;
pub mod dynamics;
pub mod effects;
pub mod equalizer;
pub mod vad;
pub mod watermark;

pub use aec::{AecConfig, AecProcessor};
pub use agc::{AgcConfig, AgcMode, AgcProcessor};
pub use comfort_noise::{ComfortNoiseConfig, ComfortNoiseGenerator, SidFrame};
pub use denoiser::{DenoiserConfig, DenoiserProcessor};
pub use dynamics::{DynamicsConfig, DynamicsKind, DynamicsProcessor, EnvelopeDetector};
pub use effects::{EffectConfig, EffectKind, EffectProcessor};
pub use equalizer::{BiquadBand, BiquadKind, Equalizer, EqualizerConfig};
pub use vad::{VadConfig, VadOutcome, VadProcessor};
pub use watermark::{WatermarkDetection, WatermarkDetector, WatermarkEmbedder};

use crate::error::Result;

/// Shared contract for every in-place, allocation-free audio block (§4.6).
pub trait DspBlock {
    /// Processes `samples` in place. Implementations must return immediately,
    /// successfully, on an empty slice (§8 "Zero-length input ... returns
    /// immediately, success").
    fn process(&mut self, samples: &mut [f32]) -> Result<()>;

    /// Clears all internal state (filter histories, envelopes, hangover
    /// counters, ...) back to the state right after construction.
    fn reset(&mut self);
}
