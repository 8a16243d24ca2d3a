//! Pipeline (C10): ties C1-C9 together into the duplex capture/playback
//! tick loop described in §4.7, behind a small safe-for-embedding state
//! machine and a handful of control/event traits.

pub mod config;
pub mod state;
pub mod tick;

pub use config::{ControlIntent, DecodedSink, DspChainConfig, EncodedSink, ErrorSink, PipelineConfig, StateSink};
pub use state::PipelineState;
pub use tick::Pipeline;
