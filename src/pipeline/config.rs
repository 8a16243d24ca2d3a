//! Pipeline configuration and event-sink capability traits (§4.7, §6, §9).
//!
//! `PipelineConfig` groups the per-component configs (`RtpSessionConfig`,
//! `JitterConfig`, the optional DSP block configs) into the one struct
//! `pipeline_create(config)` takes, with a `validate()` step the pipeline
//! runs before leaving `Starting` (§4.7.6: "Codec creation failure -> setup
//! fails before `Running`").
//!
//! The callback surfaces (§9 "Callback surfaces") are small trait objects
//! rather than C function pointers plus opaque user-data: `EncodedSink`,
//! `DecodedSink`, `StateSink`, `ErrorSink`. A pipeline field holding
//! `Box<dyn Trait>` behind a mutex is the idiomatic equivalent.

use crate::codec::CodecKind;
use crate::dsp::{AecConfig, AgcConfig, ComfortNoiseConfig, DenoiserConfig, DynamicsConfig, EffectConfig, EqualizerConfig, VadConfig};
use crate::error::{EngineError, Result};
use crate::jitter::{JitterConfig, JitterMode};
use crate::jitter::plc::PlcAlgorithm;
use crate::pipeline::state::PipelineState;
use crate::rtp::RtpSessionConfig;

/// Receives one encoded RTP payload per capture tick that produced one
/// (§4.7.2 step 9: "Emit via the encoded-data callback").
pub trait EncodedSink: Send {
    /// `payload` is the RTP payload only (no RTP header); `marker` mirrors
    /// the RTP marker bit the pipeline set on this packet.
    fn on_encoded(&self, payload: &[u8], timestamp: u32, marker: bool);
}

/// Receives one decoded PCM frame per playback tick (post-DSP, pre-device-write).
pub trait DecodedSink: Send {
    fn on_decoded(&self, pcm: &[i16]);
}

/// Receives pipeline state-machine transitions (§4.7.1: "state changes emit a callback").
pub trait StateSink: Send {
    fn on_state(&self, state: PipelineState);
}

/// Receives classified errors that reach the error callback (§7 "User-visible
/// failure behaviour"): device/configuration failures, not per-packet drops
/// (those are counted in `stats`, not surfaced here).
pub trait ErrorSink: Send {
    fn on_error(&self, error: &EngineError);
}

/// Which optional post-capture DSP stages run, and in what configuration
/// (§4.7.2 steps 3-6). `None` disables a stage entirely; `Some` seeds its
/// initial config (controls toggle it at runtime without reconstructing it).
#[derive(Debug, Clone)]
pub struct DspChainConfig {
    pub aec: Option<AecConfig>,
    pub denoise: Option<DenoiserConfig>,
    pub agc: Option<AgcConfig>,
    pub vad: Option<VadConfig>,
    pub cng: Option<ComfortNoiseConfig>,
    /// Post-decode equalizer (§4.7.3 step 4 "Apply post-DSP").
    pub post_eq: Option<EqualizerConfig>,
    /// Post-decode dynamics processor (compressor/limiter/gate/expander).
    pub post_dynamics: Option<DynamicsConfig>,
    /// Post-decode time-based effect (reverb/delay/chorus/flanger).
    pub post_effect: Option<EffectConfig>,
}

impl Default for DspChainConfig {
    fn default() -> Self {
        Self {
            aec: None,
            denoise: None,
            agc: None,
            vad: None,
            cng: None,
            post_eq: None,
            post_dynamics: None,
            post_effect: None,
        }
    }
}

/// Construction-time pipeline configuration (§6 "pipeline_create(config)").
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Device/codec sample rate shared by capture and playback (§3 "Frame").
    pub sample_rate: u32,
    /// Channel count; 1 (mono) is the only value every DSP block contract
    /// guarantees interleaving correctness for (§3 "multi-channel is interleaved").
    pub channels: u8,
    /// Frame period in milliseconds; drives `F` and the tick cadence.
    pub frame_duration_ms: u32,
    /// Payload codec the session encodes/decodes with.
    pub codec: CodecKind,
    /// RTP session configuration (SSRC, payload type, clock rate, initial seq/ts).
    pub rtp: RtpSessionConfig,
    /// Jitter buffer / PLC configuration.
    pub jitter: JitterConfig,
    /// Optional DSP processing chain.
    pub dsp: DspChainConfig,
    /// Discontinuous transmission: encode a SID frame instead of PCM when
    /// the VAD reports silence (§4.7.2 step 6). Requires `dsp.vad` and `dsp.cng`.
    pub dtx_enabled: bool,
    /// Capacity, in samples, of the capture/playback ring buffers (§4.1).
    pub ring_capacity_samples: usize,
    /// Initial playback volume, linear scale, applied in §4.7.3 step 5.
    pub playback_volume: f32,
}

impl PipelineConfig {
    /// `F = sample_rate * frame_duration_ms / 1000` (§3 "Frame").
    pub fn frame_samples(&self) -> usize {
        (self.sample_rate as usize / 1000) * self.frame_duration_ms as usize
    }

    /// Validates cross-field constraints so malformed configuration fails
    /// before `Running`, not mid-tick (§4.7.6).
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(EngineError::InvalidParam("sample_rate must be nonzero".into()));
        }
        if self.channels == 0 {
            return Err(EngineError::InvalidParam("channels must be nonzero".into()));
        }
        if self.frame_duration_ms == 0 {
            return Err(EngineError::InvalidParam("frame_duration_ms must be nonzero".into()));
        }
        if self.dtx_enabled && (self.dsp.vad.is_none() || self.dsp.cng.is_none()) {
            return Err(EngineError::InvalidParam("dtx_enabled requires both dsp.vad and dsp.cng".into()));
        }
        self.rtp.validate()?;
        self.jitter.validate()?;
        Ok(())
    }

    /// A reasonable default for an 8 kHz G.711 mu-law call, 20 ms frames.
    pub fn g711_default() -> Self {
        let sample_rate = 8000;
        Self {
            sample_rate,
            channels: 1,
            frame_duration_ms: 20,
            codec: CodecKind::UlawG711,
            rtp: RtpSessionConfig::new(0, sample_rate),
            jitter: JitterConfig {
                clock_rate: sample_rate,
                frame_duration_ms: 20,
                mode: JitterMode::Adaptive,
                plc_algorithm: PlcAlgorithm::Fade,
                ..JitterConfig::default()
            },
            dsp: DspChainConfig::default(),
            dtx_enabled: false,
            ring_capacity_samples: sample_rate as usize, // 1s
            playback_volume: 1.0,
        }
    }
}

/// One pending control-plane mutation (§4.7.5 "control writes enqueue
/// intents; the tick drains and applies them at a safe point before step 1
/// of capture"). Kept as a flat enum rather than a closure so intents can be
/// inspected/logged uniformly.
#[derive(Debug, Clone)]
pub enum ControlIntent {
    SetCaptureMuted(bool),
    SetPlaybackMuted(bool),
    SetPlaybackVolume(f32),
    SetAecEnabled(bool),
    SetDenoiseEnabled(bool),
    SetAgcEnabled(bool),
    SetDenoiseLevel(f32),
    SetBitrate(u32),
    SetSrtpSendKey(Vec<u8>),
    SetSrtpRecvKey(Vec<u8>),
}
