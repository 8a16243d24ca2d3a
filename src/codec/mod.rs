//! Codec facade (C5): PCM mu-law/A-law and, with the `opus` feature, Opus.
//!
//! - G.711 mu-law (PT 0) and A-law (PT 8): 8 kHz mono, one byte per sample.
//! - Opus (dynamic PT): wideband/fullband, variable frame size.

pub mod alaw;
pub mod facade;
#[cfg(feature = "opus")]
pub mod opus;
pub mod ulaw;

pub use facade::{CodecKind, FrameDecoder, FrameEncoder};
