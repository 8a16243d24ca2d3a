//! Crate-wide error taxonomy.
//!
//! The real-time tick paths never propagate these out of a single frame: ingress
//! parse/decrypt/late/duplicate failures are recovered locally (drop + count, see
//! `crate::stats`), and only device/configuration failures reach the pipeline's
//! error callback.

use thiserror::Error;

/// Classified failure for every fallible operation in this crate.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Caller supplied a malformed configuration or value.
    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    /// Wire-format parse failure. Counted by the caller, never fatal.
    #[error("invalid packet: {0}")]
    InvalidPacket(String),

    /// Caller-provided output buffer cannot hold the result.
    #[error("buffer too small: need {needed} bytes, have {available}")]
    BufferTooSmall {
        /// Bytes required to complete the operation.
        needed: usize,
        /// Bytes actually available in the caller's buffer.
        available: usize,
    },

    /// Operation attempted before `start()`.
    #[error("not initialized")]
    NotInitialized,

    /// `start()` called on a pipeline that is not `Stopped`.
    #[error("already running")]
    AlreadyRunning,

    /// Construction-time allocation failure. Never raised from `process()`.
    #[error("out of memory")]
    OutOfMemory,

    /// Socket error surfaced from the OS.
    #[error("network error: {0}")]
    NetworkError(#[from] std::io::Error),

    /// Capture/playback backend failure. Transitions the pipeline to `Error`.
    #[error("device error: {0}")]
    DeviceError(String),

    /// Expected and benign, e.g. `recv` with a zero timeout.
    #[error("timeout")]
    Timeout,

    /// Feature compiled out, or the platform lacks the capability.
    #[error("not supported: {0}")]
    NotSupported(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, EngineError>;
