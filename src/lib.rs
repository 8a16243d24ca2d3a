//! vocall-engine: a real-time duplex voice media engine.
//!
//! Capture and playback audio flow through a fixed-size frame pipeline
//! (`pipeline`) that ties together a DSP processing chain (`dsp`), a DTMF
//! detector/generator (`dtmf`), a payload codec facade (`codec`), an RTP
//! session and RTCP reporting layer (`rtp`), an adaptive jitter buffer with
//! packet-loss concealment (`jitter`), a UDP transport wrapper
//! (`transport`), and a rolling statistics/quality estimator (`stats`).
//!
//! `ring_buffer` and `resampler` are the low-level building blocks the rest
//! of the crate is built from; `error` is the shared failure taxonomy every
//! fallible operation in this crate returns.

pub mod codec;
pub mod dsp;
pub mod dtmf;
pub mod error;
pub mod jitter;
pub mod pipeline;
pub mod resampler;
pub mod ring_buffer;
pub mod rtp;
pub mod stats;
pub mod transport;

pub use error::{EngineError, Result};
pub use pipeline::{Pipeline, PipelineConfig, PipelineState};
