//! Adaptive jitter buffer with packet-loss concealment (C7, §4.5): sequence/
//! timestamp reordering, delay estimation, late/early/duplicate policy, PLC,
//! and a playout-rate recommendation for the pipeline's time stretcher.
//!
//! `buffer` owns the slot array, put/get state machine, and adaptive delay
//! control; `plc` owns the standalone concealment algorithms so they can be
//! unit-tested (and reused by a codec's own concealment, e.g. Opus FEC)
//! independent of the buffer's slot bookkeeping.

pub mod buffer;
pub mod plc;

pub use buffer::{GetStatus, JitterBuffer, JitterConfig, JitterMode, JitterStats, PutOutcome};
pub use plc::{PlcAlgorithm, PlcState};
